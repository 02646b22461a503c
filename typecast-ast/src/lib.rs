#![forbid(unsafe_code)]

//! Input model consumed by the analysis core.
//!
//! Everything here is produced by an external parser and handed over either
//! directly or as JSON. Spans are optional on the wire; a missing span is the
//! empty span at offset 0.

use miette::SourceSpan;
use serde::{Deserialize, Serialize};

pub type Span = SourceSpan;

pub fn span(start: usize, len: usize) -> Span {
    SourceSpan::new(start.into(), len)
}

pub fn no_span() -> Span {
    span(0, 0)
}

/// One analysis input: declarations, the statement tree, and optionally the
/// text the tree was parsed from (used only to render diagnostics).
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct Unit {
    #[serde(default)]
    pub source: Option<SourceText>,
    #[serde(default)]
    pub declarations: Declarations,
    #[serde(default)]
    pub body: Vec<Stmt>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceText {
    pub name: String,
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct Declarations {
    #[serde(default)]
    pub classes: Vec<ClassDecl>,
    #[serde(default)]
    pub templates: Vec<TemplateDecl>,
    #[serde(default)]
    pub operators: Vec<OperatorDecl>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassDecl {
    #[serde(default = "no_span")]
    pub span: Span,
    pub name: String,
    /// Direct bases, in declaration order.
    #[serde(default)]
    pub bases: Vec<String>,
    #[serde(default)]
    pub members: Vec<MemberDecl>,
    /// Set when the class is known to dispatch dynamically even though no
    /// member below says so (e.g. a virtual destructor).
    #[serde(default)]
    pub polymorphic: bool,
    /// Conversion operators (`operator T()`).
    #[serde(default)]
    pub converts_to: Vec<TypeRef>,
    /// Non-explicit single-argument constructors.
    #[serde(default)]
    pub constructible_from: Vec<TypeRef>,
}

impl ClassDecl {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            span: no_span(),
            name: name.into(),
            bases: Vec::new(),
            members: Vec::new(),
            polymorphic: false,
            converts_to: Vec::new(),
            constructible_from: Vec::new(),
        }
    }

    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.bases.push(base.into());
        self
    }

    pub fn with_member(mut self, name: impl Into<String>, ty: TypeRef) -> Self {
        self.members.push(MemberDecl {
            name: name.into(),
            ty,
            is_virtual: false,
        });
        self
    }

    pub fn with_virtual(mut self, name: impl Into<String>, ty: TypeRef) -> Self {
        self.members.push(MemberDecl {
            name: name.into(),
            ty,
            is_virtual: true,
        });
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemberDecl {
    pub name: String,
    pub ty: TypeRef,
    #[serde(default, rename = "virtual")]
    pub is_virtual: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateFamily {
    Sequence,
    OrderedMap,
    Tuple,
    Unique,
    Shared,
}

impl TemplateFamily {
    pub fn display(&self) -> &'static str {
        match self {
            TemplateFamily::Sequence => "sequence",
            TemplateFamily::OrderedMap => "ordered-mapping",
            TemplateFamily::Tuple => "fixed-arity-tuple",
            TemplateFamily::Unique => "unique",
            TemplateFamily::Shared => "shared",
        }
    }
}

/// Extra spelling for a template family, e.g. `std::deque` as a sequence.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateDecl {
    #[serde(default = "no_span")]
    pub span: Span,
    pub name: String,
    pub family: TemplateFamily,
    #[serde(default)]
    pub arity: Option<usize>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OperatorDecl {
    #[serde(default = "no_span")]
    pub span: Span,
    pub op: BinOp,
    pub lhs: TypeRef,
    pub rhs: TypeRef,
    pub ret: TypeRef,
}

/// A type as written in source. `pointer` counts `*` levels applied to the
/// named type; `reference` wraps the result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeRef {
    #[serde(default = "no_span")]
    pub span: Span,
    pub name: String,
    #[serde(default)]
    pub args: Vec<TypeRef>,
    #[serde(default)]
    pub pointer: u8,
    #[serde(default)]
    pub reference: bool,
}

impl TypeRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            span: no_span(),
            name: name.into(),
            args: Vec::new(),
            pointer: 0,
            reference: false,
        }
    }

    pub fn with_args(mut self, args: Vec<TypeRef>) -> Self {
        self.args = args;
        self
    }

    pub fn ptr(mut self) -> Self {
        self.pointer += 1;
        self
    }

    pub fn by_ref(mut self) -> Self {
        self.reference = true;
        self
    }

    pub fn display(&self) -> String {
        let mut out = self.name.clone();
        if !self.args.is_empty() {
            let args = self
                .args
                .iter()
                .map(|a| a.display())
                .collect::<Vec<_>>()
                .join(", ");
            out.push_str(&format!("<{args}>"));
        }
        for _ in 0..self.pointer {
            out.push('*');
        }
        if self.reference {
            out.push('&');
        }
        out
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Stmt {
    Let {
        #[serde(default = "no_span")]
        span: Span,
        name: String,
        #[serde(default)]
        ty: Option<TypeRef>,
        #[serde(default)]
        init: Option<Expr>,
    },
    Expr {
        expr: Expr,
    },
    Block {
        #[serde(default = "no_span")]
        span: Span,
        body: Vec<Stmt>,
    },
    Release {
        #[serde(default = "no_span")]
        span: Span,
        name: String,
    },
}

impl Stmt {
    pub fn let_(name: impl Into<String>, ty: Option<TypeRef>, init: Option<Expr>) -> Self {
        Stmt::Let {
            span: no_span(),
            name: name.into(),
            ty,
            init,
        }
    }

    pub fn expr(expr: Expr) -> Self {
        Stmt::Expr { expr }
    }

    pub fn block(body: Vec<Stmt>) -> Self {
        Stmt::Block {
            span: no_span(),
            body,
        }
    }

    pub fn release(name: impl Into<String>) -> Self {
        Stmt::Release {
            span: no_span(),
            name: name.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    #[serde(default = "no_span")]
    pub span: Span,
    #[serde(flatten)]
    pub kind: ExprKind,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExprKind {
    Literal {
        literal: Literal,
    },
    Variable {
        name: String,
    },
    Member {
        base: Box<Expr>,
        member: String,
        #[serde(default)]
        arrow: bool,
    },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Cast {
        mechanism: CastMechanism,
        target: TypeRef,
        expr: Box<Expr>,
    },
    /// `std::vector<int>{}`, `std::make_tuple(12, "x")` (no type arguments).
    Template {
        template: String,
        #[serde(default)]
        type_args: Vec<TypeRef>,
        #[serde(default)]
        args: Vec<Expr>,
    },
    TupleGet {
        tuple: Box<Expr>,
        index: usize,
    },
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    New {
        ty: TypeRef,
        #[serde(default)]
        args: Vec<Expr>,
    },
    MakeHandle {
        mode: OwnershipMode,
        pointee: TypeRef,
        #[serde(default)]
        args: Vec<Expr>,
    },
    Move {
        expr: Box<Expr>,
    },
    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
    },
}

impl Expr {
    pub fn new(kind: ExprKind) -> Self {
        Self {
            span: no_span(),
            kind,
        }
    }

    pub fn at(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn lit(literal: Literal) -> Self {
        Self::new(ExprKind::Literal { literal })
    }

    pub fn int(value: u64) -> Self {
        Self::lit(Literal::Int(value))
    }

    pub fn var(name: impl Into<String>) -> Self {
        Self::new(ExprKind::Variable { name: name.into() })
    }

    pub fn member(base: Expr, member: impl Into<String>) -> Self {
        Self::new(ExprKind::Member {
            base: Box::new(base),
            member: member.into(),
            arrow: false,
        })
    }

    pub fn binary(op: BinOp, left: Expr, right: Expr) -> Self {
        Self::new(ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    pub fn cast(mechanism: CastMechanism, target: TypeRef, expr: Expr) -> Self {
        Self::new(ExprKind::Cast {
            mechanism,
            target,
            expr: Box::new(expr),
        })
    }

    pub fn tuple_get(tuple: Expr, index: usize) -> Self {
        Self::new(ExprKind::TupleGet {
            tuple: Box::new(tuple),
            index,
        })
    }

    pub fn make_handle(mode: OwnershipMode, pointee: TypeRef) -> Self {
        Self::new(ExprKind::MakeHandle {
            mode,
            pointee,
            args: Vec::new(),
        })
    }

    pub fn moved(expr: Expr) -> Self {
        Self::new(ExprKind::Move {
            expr: Box::new(expr),
        })
    }

    /// Short name of the node kind, as shown in reports.
    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            ExprKind::Literal { .. } => "literal",
            ExprKind::Variable { .. } => "variable",
            ExprKind::Member { .. } => "member",
            ExprKind::Binary { .. } => "binary",
            ExprKind::Cast { .. } => "cast",
            ExprKind::Template { .. } => "template",
            ExprKind::TupleGet { .. } => "tuple_get",
            ExprKind::Index { .. } => "index",
            ExprKind::New { .. } => "new",
            ExprKind::MakeHandle { .. } => "make_handle",
            ExprKind::Move { .. } => "move",
            ExprKind::Assign { .. } => "assign",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Literal {
    Bool(bool),
    Char(char),
    Int(u64),
    #[serde(rename = "uint")]
    UInt(u64),
    Long(u64),
    #[serde(rename = "ulong")]
    ULong(u64),
    LongLong(u64),
    #[serde(rename = "ulong_long")]
    ULongLong(u64),
    Float(f64),
    Double(f64),
    LongDouble(f64),
    String(String),
    Null,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CastMechanism {
    ImplicitNumeric,
    /// Non-numeric implicit conversion: derived-to-base, to `void*`, null to
    /// pointer, user-defined conversions.
    ImplicitObject,
    #[serde(alias = "static_cast")]
    QualifiedHierarchy,
    #[serde(alias = "dynamic_cast")]
    RuntimeCheckedHierarchy,
    #[serde(alias = "reinterpret_cast")]
    BitReinterpretation,
    #[serde(alias = "c_style")]
    LegacyAmbiguous,
}

impl CastMechanism {
    pub fn display(&self) -> &'static str {
        match self {
            CastMechanism::ImplicitNumeric => "implicit-numeric",
            CastMechanism::ImplicitObject => "implicit-object",
            CastMechanism::QualifiedHierarchy => "qualified-hierarchy",
            CastMechanism::RuntimeCheckedHierarchy => "runtime-checked-hierarchy",
            CastMechanism::BitReinterpretation => "bit-reinterpretation",
            CastMechanism::LegacyAmbiguous => "legacy-ambiguous",
        }
    }

    pub fn is_implicit(&self) -> bool {
        matches!(
            self,
            CastMechanism::ImplicitNumeric | CastMechanism::ImplicitObject
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnershipMode {
    Unique,
    Shared,
}

impl OwnershipMode {
    pub fn display(&self) -> &'static str {
        match self {
            OwnershipMode::Unique => "unique",
            OwnershipMode::Shared => "shared",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,

    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,

    And,
    Or,
}

impl BinOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
            BinOp::Le => "<=",
            BinOp::Ge => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge
        )
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinOp::And | BinOp::Or)
    }
}
