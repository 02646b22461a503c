#![forbid(unsafe_code)]

mod cast;
mod error;
mod layout;
mod ownership;
mod registry;
mod report;
mod sema;
mod template;
mod types;

pub use cast::{CastClassifier, CastError, CastNote, Classification};
pub use error::AnalysisError;
pub use layout::{LayoutError, TargetLayout};
pub use ownership::{HandleId, HandleState, OwnershipTracker, Released, ViolationKind};
pub use registry::{Arity, ClassInfo, RegistryBuilder, TemplateDef, TypeRegistry};
pub use report::{
    AnalysisReport, CastRecord, ExprId, Finding, FindingKind, OwnershipViolation, ResolvedExpr,
    Severity,
};
pub use sema::{AnalysisOptions, Checker, analyze};
pub use template::{IndexOutOfRange, Instantiation, TemplateInstantiator};
pub use types::{ClassId, InstanceId, Primitive, Type, arithmetic_result, display_type};
