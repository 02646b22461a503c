#![forbid(unsafe_code)]

//! Cast legality.
//!
//! [`CastClassifier::classify`] is a pure function of the two types, the
//! requested mechanism, the registry and the target layout.

use thiserror::Error;
use typecast_ast::CastMechanism;

use crate::layout::TargetLayout;
use crate::registry::TypeRegistry;
use crate::types::{ClassId, Primitive, Type};

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CastError {
    #[error("source and target classes are unrelated")]
    UnrelatedTypes,
    #[error("class `{class}` has no dynamically dispatched member")]
    NotPolymorphic { class: String },
    #[error("runtime-checked casts need a pointer or reference to a class on both sides")]
    NotClassIndirection,
    #[error("storage is neither pointer-sized nor register-sized")]
    NotRegisterSized,
    #[error("implicit-numeric conversion needs arithmetic operands")]
    NotArithmetic,
    #[error("no conversion exists between these types")]
    InvalidConversion,
    #[error("no implicit conversion exists between these types")]
    IncompatibleTypes,
}

impl CastError {
    pub fn kind_name(&self) -> &'static str {
        match self {
            CastError::UnrelatedTypes => "UnrelatedTypesError",
            CastError::NotPolymorphic { .. } => "NotPolymorphicError",
            CastError::NotClassIndirection => "NotClassIndirectionError",
            CastError::NotRegisterSized => "NotRegisterSizedError",
            CastError::NotArithmetic => "NotArithmeticError",
            CastError::InvalidConversion => "InvalidConversionError",
            CastError::IncompatibleTypes => "IncompatibleTypesError",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CastNote {
    /// Target holds fewer significant bits, or drops a fraction.
    Narrowing,
    /// Base-to-derived without any runtime verification.
    UncheckedDowncast,
    /// Success depends on the dynamic type; the result may be null.
    RuntimeChecked,
    /// Bit pattern reused verbatim.
    Unsafe,
    /// Legacy syntax fell back from the qualified rules.
    Ambiguous,
    /// Went through a declared conversion operator or constructor.
    UserDefined,
}

impl CastNote {
    pub fn name(&self) -> &'static str {
        match self {
            CastNote::Narrowing => "narrowing",
            CastNote::UncheckedDowncast => "unchecked_downcast",
            CastNote::RuntimeChecked => "runtime_checked",
            CastNote::Unsafe => "unsafe",
            CastNote::Ambiguous => "ambiguous",
            CastNote::UserDefined => "user_defined",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            CastNote::Narrowing => "narrowing: target cannot represent every source value",
            CastNote::UncheckedDowncast => "downcast performed without runtime verification",
            CastNote::RuntimeChecked => "success is decided at run time; result may be null",
            CastNote::Unsafe => "unsafe: bit pattern reused without conversion",
            CastNote::Ambiguous => {
                "ambiguous: legacy cast fell back to bit reinterpretation"
            }
            CastNote::UserDefined => "uses a user-defined conversion",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Classification {
    pub requested: CastMechanism,
    /// Mechanism that actually applies; differs from `requested` only for
    /// legacy casts.
    pub mechanism: CastMechanism,
    pub outcome: Result<(), CastError>,
    pub notes: Vec<CastNote>,
}

impl Classification {
    pub fn legal(mechanism: CastMechanism) -> Self {
        Self {
            requested: mechanism,
            mechanism,
            outcome: Ok(()),
            notes: Vec::new(),
        }
    }

    pub fn illegal(mechanism: CastMechanism, err: CastError) -> Self {
        Self {
            requested: mechanism,
            mechanism,
            outcome: Err(err),
            notes: Vec::new(),
        }
    }

    pub fn with_note(mut self, note: CastNote) -> Self {
        if !self.notes.contains(&note) {
            self.notes.push(note);
        }
        self
    }

    pub fn is_legal(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn has_note(&self, note: CastNote) -> bool {
        self.notes.contains(&note)
    }

    pub fn error(&self) -> Option<&CastError> {
        self.outcome.as_ref().err()
    }
}

pub struct CastClassifier<'r> {
    registry: &'r TypeRegistry,
    layout: TargetLayout,
}

impl<'r> CastClassifier<'r> {
    pub fn new(registry: &'r TypeRegistry, layout: TargetLayout) -> Self {
        Self { registry, layout }
    }

    pub fn layout(&self) -> &TargetLayout {
        &self.layout
    }

    pub fn classify(&self, source: &Type, target: &Type, mechanism: CastMechanism) -> Classification {
        match mechanism {
            CastMechanism::ImplicitNumeric => self.implicit_numeric(source, target),
            CastMechanism::ImplicitObject => self.implicit_object(source, target),
            CastMechanism::QualifiedHierarchy => self.qualified(source, target),
            CastMechanism::RuntimeCheckedHierarchy => self.runtime_checked(source, target),
            CastMechanism::BitReinterpretation => self.reinterpret(source, target),
            CastMechanism::LegacyAmbiguous => self.legacy(source, target),
        }
    }

    pub fn narrows(&self, source: Primitive, target: Primitive) -> bool {
        target.significant_bits(&self.layout) < source.significant_bits(&self.layout)
            || (target.is_integral() && source.is_floating())
    }

    fn numeric(&self, mechanism: CastMechanism, source: Primitive, target: Primitive) -> Classification {
        let c = Classification::legal(mechanism);
        if self.narrows(source, target) {
            c.with_note(CastNote::Narrowing)
        } else {
            c
        }
    }

    fn implicit_numeric(&self, source: &Type, target: &Type) -> Classification {
        let mechanism = CastMechanism::ImplicitNumeric;
        match (source.primitive(), target.primitive()) {
            (Some(s), Some(t)) if s.is_arithmetic() && t.is_arithmetic() => {
                self.numeric(mechanism, s, t)
            }
            _ => Classification::illegal(mechanism, CastError::NotArithmetic),
        }
    }

    fn implicit_object(&self, source: &Type, target: &Type) -> Classification {
        let mechanism = CastMechanism::ImplicitObject;
        if source == target {
            return Classification::legal(mechanism);
        }
        if source.is_arithmetic() && target.is_arithmetic() {
            let mut c = self.implicit_numeric(source, target);
            c.requested = mechanism;
            return c;
        }

        let legal = match (source, target) {
            (Type::Primitive(Primitive::NullPtr), Type::Pointer(_)) => true,
            (Type::Pointer(_) | Type::Primitive(Primitive::NullPtr), Type::Primitive(Primitive::Bool)) => {
                true
            }
            (Type::Pointer(_), t) if t.is_opaque_pointer() => true,
            (Type::Pointer(s), Type::Primitive(Primitive::String)) => {
                **s == Type::Primitive(Primitive::Char)
            }
            (Type::Pointer(s), Type::Pointer(t)) | (Type::Reference(s), Type::Reference(t)) => {
                self.is_upcast(s, t)
            }
            (Type::Class(_), Type::Class(_)) => self.is_upcast(source, target),
            _ => false,
        };

        if legal {
            Classification::legal(mechanism)
        } else {
            Classification::illegal(mechanism, CastError::IncompatibleTypes)
        }
    }

    fn is_upcast(&self, source: &Type, target: &Type) -> bool {
        match (source.class_id(), target.class_id()) {
            (Some(s), Some(t)) => s == t || self.registry.is_base_of(t, s),
            _ => false,
        }
    }

    fn hierarchy(&self, mechanism: CastMechanism, source: ClassId, target: ClassId) -> Classification {
        if source == target || self.registry.is_base_of(target, source) {
            Classification::legal(mechanism)
        } else if self.registry.is_base_of(source, target) {
            Classification::legal(mechanism).with_note(CastNote::UncheckedDowncast)
        } else {
            Classification::illegal(mechanism, CastError::UnrelatedTypes)
        }
    }

    fn qualified(&self, source: &Type, target: &Type) -> Classification {
        let mechanism = CastMechanism::QualifiedHierarchy;
        if source == target {
            return Classification::legal(mechanism);
        }
        if let (Some(s), Some(t)) = (source.primitive(), target.primitive()) {
            if s.is_arithmetic() && t.is_arithmetic() {
                return self.numeric(mechanism, s, t);
            }
        }

        match (source, target) {
            (Type::Primitive(Primitive::NullPtr), Type::Pointer(_)) => {
                Classification::legal(mechanism)
            }
            (Type::Pointer(_), t) if t.is_opaque_pointer() => Classification::legal(mechanism),
            (s, Type::Pointer(_)) if s.is_opaque_pointer() => Classification::legal(mechanism),
            (Type::Pointer(s), Type::Pointer(t)) | (Type::Reference(s), Type::Reference(t)) => {
                match (s.class_id(), t.class_id()) {
                    (Some(s), Some(t)) => self.hierarchy(mechanism, s, t),
                    _ => Classification::illegal(mechanism, CastError::InvalidConversion),
                }
            }
            // Slicing: a derived object converted to a base value.
            (Type::Class(_), Type::Class(_)) if self.is_upcast(source, target) => {
                Classification::legal(mechanism)
            }
            (Type::Class(s), Type::Class(t)) if !self.registry.related(*s, *t) => {
                Classification::illegal(mechanism, CastError::UnrelatedTypes)
            }
            _ => Classification::illegal(mechanism, CastError::InvalidConversion),
        }
    }

    fn runtime_checked(&self, source: &Type, target: &Type) -> Classification {
        let mechanism = CastMechanism::RuntimeCheckedHierarchy;
        let (s, t) = match (source, target) {
            (Type::Pointer(s), Type::Pointer(t)) | (Type::Reference(s), Type::Reference(t)) => {
                match (s.class_id(), t.class_id()) {
                    (Some(s), Some(t)) => (s, t),
                    _ => return Classification::illegal(mechanism, CastError::NotClassIndirection),
                }
            }
            _ => return Classification::illegal(mechanism, CastError::NotClassIndirection),
        };

        if s == t || self.registry.is_base_of(t, s) {
            // Upcasts resolve statically.
            return Classification::legal(mechanism);
        }
        if !self.registry.is_base_of(s, t) {
            return Classification::illegal(mechanism, CastError::UnrelatedTypes);
        }
        if !self.registry.is_polymorphic(s) {
            return Classification::illegal(
                mechanism,
                CastError::NotPolymorphic {
                    class: self.registry.class(s).name.clone(),
                },
            );
        }
        Classification::legal(mechanism).with_note(CastNote::RuntimeChecked)
    }

    fn register_sized(&self, ty: &Type) -> bool {
        match ty {
            Type::Pointer(_) | Type::Reference(_) => true,
            Type::Primitive(Primitive::NullPtr) => true,
            Type::Primitive(p) if p.is_integral() => {
                p.storage_bits(&self.layout) <= self.layout.pointer_bits
            }
            _ => false,
        }
    }

    fn reinterpret(&self, source: &Type, target: &Type) -> Classification {
        let mechanism = CastMechanism::BitReinterpretation;
        if self.register_sized(source) && self.register_sized(target) {
            Classification::legal(mechanism).with_note(CastNote::Unsafe)
        } else {
            Classification::illegal(mechanism, CastError::NotRegisterSized)
        }
    }

    fn legacy(&self, source: &Type, target: &Type) -> Classification {
        let qualified = self.qualified(source, target);
        let mut chosen = if qualified.is_legal() {
            qualified
        } else {
            self.reinterpret(source, target).with_note(CastNote::Ambiguous)
        };
        chosen.requested = CastMechanism::LegacyAmbiguous;
        chosen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use typecast_ast::ClassDecl;

    fn registry() -> TypeRegistry {
        let mut b = TypeRegistry::builder();
        b.register(ClassDecl::new("Base")).unwrap();
        b.register(ClassDecl::new("Child").with_base("Base")).unwrap();
        b.freeze().unwrap()
    }

    fn ptr(reg: &TypeRegistry, name: &str) -> Type {
        Type::pointer_to(Type::Class(reg.class_id(name).unwrap()))
    }

    #[test]
    fn double_to_int_narrows() {
        let reg = registry();
        let c = CastClassifier::new(&reg, TargetLayout::default());
        let out = c.classify(
            &Type::Primitive(Primitive::Double),
            &Type::Primitive(Primitive::Int),
            CastMechanism::ImplicitNumeric,
        );
        assert!(out.is_legal());
        assert!(out.has_note(CastNote::Narrowing));

        let widen = c.classify(
            &Type::Primitive(Primitive::Int),
            &Type::Primitive(Primitive::Double),
            CastMechanism::ImplicitNumeric,
        );
        assert!(widen.notes.is_empty());
    }

    #[test]
    fn qualified_allows_both_directions() {
        let reg = registry();
        let c = CastClassifier::new(&reg, TargetLayout::default());
        let (base, child) = (ptr(&reg, "Base"), ptr(&reg, "Child"));

        let up = c.classify(&child, &base, CastMechanism::QualifiedHierarchy);
        assert!(up.is_legal() && up.notes.is_empty());

        let down = c.classify(&base, &child, CastMechanism::QualifiedHierarchy);
        assert!(down.is_legal());
        assert!(down.has_note(CastNote::UncheckedDowncast));
    }

    #[test]
    fn downcast_needs_polymorphic_source() {
        let reg = registry();
        let c = CastClassifier::new(&reg, TargetLayout::default());
        let out = c.classify(
            &ptr(&reg, "Base"),
            &ptr(&reg, "Child"),
            CastMechanism::RuntimeCheckedHierarchy,
        );
        assert_eq!(
            out.outcome,
            Err(CastError::NotPolymorphic {
                class: "Base".to_string()
            })
        );
    }

    #[test]
    fn runtime_checked_upcast_is_static() {
        let reg = registry();
        let c = CastClassifier::new(&reg, TargetLayout::default());
        let out = c.classify(
            &ptr(&reg, "Child"),
            &ptr(&reg, "Base"),
            CastMechanism::RuntimeCheckedHierarchy,
        );
        assert!(out.is_legal());
        assert!(!out.has_note(CastNote::RuntimeChecked));
    }

    #[test]
    fn reinterpret_rejects_floating_point() {
        let reg = registry();
        let c = CastClassifier::new(&reg, TargetLayout::default());
        let out = c.classify(
            &Type::Primitive(Primitive::Double),
            &ptr(&reg, "Base"),
            CastMechanism::BitReinterpretation,
        );
        assert_eq!(out.outcome, Err(CastError::NotRegisterSized));

        let ok = c.classify(
            &Type::Primitive(Primitive::Int),
            &Type::pointer_to(Type::Primitive(Primitive::Void)),
            CastMechanism::BitReinterpretation,
        );
        assert!(ok.is_legal());
        assert!(ok.has_note(CastNote::Unsafe));
    }

    #[test]
    fn legacy_prefers_qualified() {
        let reg = registry();
        let c = CastClassifier::new(&reg, TargetLayout::default());

        let hier = c.classify(
            &ptr(&reg, "Child"),
            &ptr(&reg, "Base"),
            CastMechanism::LegacyAmbiguous,
        );
        assert_eq!(hier.requested, CastMechanism::LegacyAmbiguous);
        assert_eq!(hier.mechanism, CastMechanism::QualifiedHierarchy);
        assert!(!hier.has_note(CastNote::Ambiguous));

        let address = c.classify(
            &Type::Primitive(Primitive::Int),
            &Type::pointer_to(Type::Primitive(Primitive::Void)),
            CastMechanism::LegacyAmbiguous,
        );
        assert_eq!(address.mechanism, CastMechanism::BitReinterpretation);
        assert!(address.is_legal());
        assert!(address.has_note(CastNote::Ambiguous));
        assert!(address.has_note(CastNote::Unsafe));
    }

    #[test]
    fn legacy_pointer_to_class_value_is_illegal() {
        let reg = registry();
        let c = CastClassifier::new(&reg, TargetLayout::default());
        let out = c.classify(
            &ptr(&reg, "Child"),
            &Type::Class(reg.class_id("Base").unwrap()),
            CastMechanism::LegacyAmbiguous,
        );
        assert_eq!(out.mechanism, CastMechanism::BitReinterpretation);
        assert_eq!(out.outcome, Err(CastError::NotRegisterSized));
        assert!(out.has_note(CastNote::Ambiguous));
    }

    #[test]
    fn implicit_object_upcasts_only() {
        let reg = registry();
        let c = CastClassifier::new(&reg, TargetLayout::default());
        let (base, child) = (ptr(&reg, "Base"), ptr(&reg, "Child"));

        assert!(c.classify(&child, &base, CastMechanism::ImplicitObject).is_legal());
        assert_eq!(
            c.classify(&base, &child, CastMechanism::ImplicitObject).outcome,
            Err(CastError::IncompatibleTypes)
        );
        assert!(
            c.classify(
                &Type::Primitive(Primitive::NullPtr),
                &child,
                CastMechanism::ImplicitObject
            )
            .is_legal()
        );
    }
}
