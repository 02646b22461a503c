#![forbid(unsafe_code)]

use typecast_ast::{OwnershipMode, Span};

use crate::cast::Classification;
use crate::error::AnalysisError;
use crate::ownership::ViolationKind;
use crate::types::Type;

/// Post-order index of an expression node within one analysis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(pub u32);

#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedExpr {
    pub id: ExprId,
    pub span: Span,
    pub kind: &'static str,
    pub ty: Type,
    /// `ty` rendered with class and template names.
    pub display: String,
    pub lvalue: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CastRecord {
    pub expr: ExprId,
    pub span: Span,
    pub source: String,
    pub target: String,
    /// Inserted by initialisation, assignment or argument passing rather
    /// than written out.
    pub implicit: bool,
    pub classification: Classification,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FindingKind {
    IndexOutOfRange { index: usize, arity: usize },
    NotAssignable,
    NotIndexable { ty: String },
}

impl FindingKind {
    pub fn kind_name(&self) -> &'static str {
        match self {
            FindingKind::IndexOutOfRange { .. } => "IndexOutOfRangeError",
            FindingKind::NotAssignable => "NotAssignableError",
            FindingKind::NotIndexable { .. } => "NotIndexableError",
        }
    }

    pub fn message(&self) -> String {
        match self {
            FindingKind::IndexOutOfRange { index, arity } => {
                format!("index {index} is out of range for a tuple of arity {arity}")
            }
            FindingKind::NotAssignable => "left side of assignment is not an lvalue".to_string(),
            FindingKind::NotIndexable { ty } => format!("`{ty}` cannot be indexed"),
        }
    }
}

/// Recoverable per-node problem other than a cast classification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Finding {
    pub expr: ExprId,
    pub span: Span,
    pub kind: FindingKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OwnershipViolation {
    pub kind: ViolationKind,
    /// Binding the handle was reached through; `None` for temporaries.
    pub binding: Option<String>,
    pub span: Span,
    pub mode: OwnershipMode,
    pub pointee: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Clean,
    Notes,
    Fatal,
}

impl Severity {
    pub fn display(&self) -> &'static str {
        match self {
            Severity::Clean => "clean",
            Severity::Notes => "notes",
            Severity::Fatal => "fatal",
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct AnalysisReport {
    pub expressions: Vec<ResolvedExpr>,
    pub casts: Vec<CastRecord>,
    pub findings: Vec<Finding>,
    pub violations: Vec<OwnershipViolation>,
    pub fatal: Option<AnalysisError>,
}

impl AnalysisReport {
    pub fn has_non_fatal(&self) -> bool {
        !self.findings.is_empty()
            || !self.violations.is_empty()
            || self
                .casts
                .iter()
                .any(|c| !c.classification.is_legal() || !c.classification.notes.is_empty())
    }

    /// Worst severity present.
    pub fn severity(&self) -> Severity {
        if self.fatal.is_some() {
            Severity::Fatal
        } else if self.has_non_fatal() {
            Severity::Notes
        } else {
            Severity::Clean
        }
    }

    /// 0 clean, 1 notes or violations, 2 fatal. `strict` turns 1 into 2.
    pub fn exit_code(&self, strict: bool) -> u8 {
        match self.severity() {
            Severity::Clean => 0,
            Severity::Notes if strict => 2,
            Severity::Notes => 1,
            Severity::Fatal => 2,
        }
    }

    pub fn expression(&self, id: ExprId) -> Option<&ResolvedExpr> {
        self.expressions.iter().find(|e| e.id == id)
    }

    pub fn illegal_casts(&self) -> impl Iterator<Item = &CastRecord> {
        self.casts.iter().filter(|c| !c.classification.is_legal())
    }
}
