#![forbid(unsafe_code)]

use std::fmt::Write as _;
use std::path::Path;

use miette::IntoDiagnostic;
use serde::Serialize;
use sha2::{Digest, Sha256};
use typecast_ast::{CastMechanism, OwnershipMode, Span};
use typecast_core::{AnalysisReport, CastRecord, TargetLayout};

pub const SCHEMA: &str = "typecast.report.v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SpanRange {
    pub offset: usize,
    pub len: usize,
}

impl From<Span> for SpanRange {
    fn from(s: Span) -> Self {
        Self {
            offset: s.offset(),
            len: s.len(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonReport {
    pub schema: &'static str,
    pub input: String,
    pub sha256: String,
    pub target: LayoutSummary,
    pub severity: &'static str,
    pub exit_code: u8,
    pub expressions: Vec<ExprEntry>,
    pub casts: Vec<CastEntry>,
    pub findings: Vec<FindingEntry>,
    pub violations: Vec<ViolationEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fatal: Option<ErrorEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LayoutSummary {
    pub pointer_bits: u16,
    pub long_bits: u16,
    pub long_double_bits: u16,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExprEntry {
    pub id: u32,
    pub span: SpanRange,
    pub kind: &'static str,
    #[serde(rename = "type")]
    pub ty: String,
    pub lvalue: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CastEntry {
    pub expr: u32,
    pub span: SpanRange,
    pub source: String,
    pub target: String,
    pub requested: CastMechanism,
    pub mechanism: CastMechanism,
    pub legal: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorEntry>,
    pub notes: Vec<&'static str>,
    pub implicit: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEntry {
    pub kind: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<SpanRange>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FindingEntry {
    pub expr: u32,
    pub span: SpanRange,
    pub kind: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ViolationEntry {
    pub kind: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binding: Option<String>,
    pub span: SpanRange,
    pub mode: OwnershipMode,
    pub pointee: String,
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub fn build_json_report(
    input: &Path,
    raw: &[u8],
    layout: TargetLayout,
    report: &AnalysisReport,
    strict: bool,
) -> JsonReport {
    JsonReport {
        schema: SCHEMA,
        input: display_path(input),
        sha256: sha256_hex(raw),
        target: LayoutSummary {
            pointer_bits: layout.pointer_bits,
            long_bits: layout.long_bits,
            long_double_bits: layout.long_double_bits,
        },
        severity: report.severity().display(),
        exit_code: report.exit_code(strict),
        expressions: report
            .expressions
            .iter()
            .map(|e| ExprEntry {
                id: e.id.0,
                span: e.span.into(),
                kind: e.kind,
                ty: e.display.clone(),
                lvalue: e.lvalue,
            })
            .collect(),
        casts: report.casts.iter().map(cast_entry).collect(),
        findings: report
            .findings
            .iter()
            .map(|f| FindingEntry {
                expr: f.expr.0,
                span: f.span.into(),
                kind: f.kind.kind_name(),
                message: f.kind.message(),
            })
            .collect(),
        violations: report
            .violations
            .iter()
            .map(|v| ViolationEntry {
                kind: v.kind.kind_name(),
                message: v.kind.to_string(),
                binding: v.binding.clone(),
                span: v.span.into(),
                mode: v.mode,
                pointee: v.pointee.clone(),
            })
            .collect(),
        fatal: report.fatal.as_ref().map(|e| ErrorEntry {
            kind: e.kind_name(),
            message: e.to_string(),
            span: Some(e.span().into()),
        }),
    }
}

fn cast_entry(c: &CastRecord) -> CastEntry {
    let class = &c.classification;
    CastEntry {
        expr: c.expr.0,
        span: c.span.into(),
        source: c.source.clone(),
        target: c.target.clone(),
        requested: class.requested,
        mechanism: class.mechanism,
        legal: class.is_legal(),
        error: class.error().map(|e| ErrorEntry {
            kind: e.kind_name(),
            message: e.to_string(),
            span: None,
        }),
        notes: class.notes.iter().map(|n| n.name()).collect(),
        implicit: c.implicit,
    }
}

pub fn write_json_report(report: &JsonReport, out_path: &Path) -> miette::Result<()> {
    if let Some(parent) = out_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).into_diagnostic()?;
        }
    }
    let json = serde_json::to_string_pretty(report).into_diagnostic()?;
    std::fs::write(out_path, json).into_diagnostic()?;
    Ok(())
}

/// Human-readable summary of the non-fatal results. Fatal errors are
/// rendered separately through miette.
pub fn render_text(report: &AnalysisReport) -> String {
    let mut out = String::new();

    for c in &report.casts {
        let class = &c.classification;
        if class.is_legal() && class.notes.is_empty() {
            continue;
        }
        let how = if c.implicit { "implicit" } else { class.requested.display() };
        let _ = write!(
            out,
            "cast #{} [{how}] {} -> {}: ",
            c.expr.0, c.source, c.target
        );
        match class.error() {
            Some(e) => {
                let _ = write!(out, "illegal ({}: {e})", e.kind_name());
            }
            None => out.push_str("legal"),
        }
        if class.mechanism != class.requested {
            let _ = write!(out, " via {}", class.mechanism.display());
        }
        out.push('\n');
        for n in &class.notes {
            let _ = writeln!(out, "  note: {}", n.message());
        }
    }

    for f in &report.findings {
        let _ = writeln!(
            out,
            "finding #{} {}: {}",
            f.expr.0,
            f.kind.kind_name(),
            f.kind.message()
        );
    }

    for v in &report.violations {
        let who = v.binding.as_deref().unwrap_or("<temporary>");
        let _ = writeln!(
            out,
            "ownership {}: {who} ({} handle to {}): {}",
            v.kind.kind_name(),
            v.mode.display(),
            v.pointee,
            v.kind
        );
    }

    let legal = report.casts.iter().filter(|c| c.classification.is_legal()).count();
    let _ = writeln!(
        out,
        "{}: {} expressions, {} casts ({} illegal), {} findings, {} violations",
        report.severity().display(),
        report.expressions.len(),
        report.casts.len(),
        report.casts.len() - legal,
        report.findings.len(),
        report.violations.len()
    );
    out
}

fn display_path(path: &Path) -> String {
    // Relative to the working directory when possible, with forward slashes.
    let p = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let s = p.to_string_lossy().replace('\\', "/");

    if let Ok(cwd) = std::env::current_dir() {
        let cwd = cwd.canonicalize().unwrap_or(cwd);
        let prefix = format!("{}/", cwd.to_string_lossy().replace('\\', "/"));
        if let Some(rest) = s.strip_prefix(&prefix) {
            return rest.to_string();
        }
    }
    s
}
