#![forbid(unsafe_code)]
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;
use typecast_ast::Span;

/// Structural errors. Any of these aborts the analysis.
#[derive(Clone, Debug, PartialEq, Eq, Error, Diagnostic)]
pub enum AnalysisError {
    #[error("unknown type `{name}`")]
    #[diagnostic(code(typecast::unknown_type))]
    UnknownType {
        name: String,
        #[label("not declared")]
        span: Span,
    },

    #[error("unknown identifier `{name}`")]
    #[diagnostic(code(typecast::unknown_identifier))]
    UnknownIdentifier {
        name: String,
        #[label("not in scope")]
        span: Span,
    },

    #[error("`{ty}` has no member `{member}`")]
    #[diagnostic(code(typecast::unknown_member))]
    UnknownMember {
        ty: String,
        member: String,
        #[label]
        span: Span,
    },

    #[error("cyclic class hierarchy: {}", .cycle.join(" -> "))]
    #[diagnostic(
        code(typecast::cyclic_hierarchy),
        help("a class cannot appear in its own base chain")
    )]
    CyclicHierarchy {
        cycle: Vec<String>,
        #[label("cycle starts here")]
        span: Span,
    },

    #[error("type `{name}` is already declared")]
    #[diagnostic(code(typecast::duplicate_type))]
    DuplicateType {
        name: String,
        #[label]
        span: Span,
    },

    #[error("ambiguous overload for `{lhs} {op} {rhs}`: {} equally ranked candidates", .candidates.len())]
    #[diagnostic(code(typecast::ambiguous_overload))]
    AmbiguousOverload {
        op: String,
        lhs: String,
        rhs: String,
        candidates: Vec<String>,
        #[label]
        span: Span,
    },

    #[error("no operator `{op}` accepts `{lhs}` and `{rhs}`")]
    #[diagnostic(code(typecast::no_matching_operator))]
    NoMatchingOperator {
        op: String,
        lhs: String,
        rhs: String,
        #[label]
        span: Span,
    },

    #[error("`{template}` expects {expected} argument(s), found {found}")]
    #[diagnostic(code(typecast::template_arity))]
    TemplateArity {
        template: String,
        expected: String,
        found: usize,
        #[label]
        span: Span,
    },

    #[error("`{name}` is already declared in this scope")]
    #[diagnostic(
        code(typecast::duplicate_binding),
        help("declarations in an inner block may shadow outer ones")
    )]
    DuplicateBinding {
        name: String,
        #[label]
        span: Span,
    },
}

impl AnalysisError {
    pub fn span(&self) -> Span {
        match self {
            AnalysisError::UnknownType { span, .. }
            | AnalysisError::UnknownIdentifier { span, .. }
            | AnalysisError::UnknownMember { span, .. }
            | AnalysisError::CyclicHierarchy { span, .. }
            | AnalysisError::DuplicateType { span, .. }
            | AnalysisError::AmbiguousOverload { span, .. }
            | AnalysisError::NoMatchingOperator { span, .. }
            | AnalysisError::TemplateArity { span, .. }
            | AnalysisError::DuplicateBinding { span, .. } => *span,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            AnalysisError::UnknownType { .. } => "UnknownTypeError",
            AnalysisError::UnknownIdentifier { .. } => "UnknownIdentifierError",
            AnalysisError::UnknownMember { .. } => "UnknownMemberError",
            AnalysisError::CyclicHierarchy { .. } => "CyclicHierarchyError",
            AnalysisError::DuplicateType { .. } => "DuplicateTypeError",
            AnalysisError::AmbiguousOverload { .. } => "AmbiguousOverloadError",
            AnalysisError::NoMatchingOperator { .. } => "NoMatchingOperatorError",
            AnalysisError::TemplateArity { .. } => "TemplateArityError",
            AnalysisError::DuplicateBinding { .. } => "DuplicateBindingError",
        }
    }
}
