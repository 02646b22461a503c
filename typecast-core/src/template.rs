#![forbid(unsafe_code)]

use std::collections::HashMap;

use thiserror::Error;
use typecast_ast::{Span, TemplateFamily};

use crate::error::AnalysisError;
use crate::registry::TemplateDef;
use crate::types::{InstanceId, Type};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Instantiation {
    pub template: String,
    pub family: TemplateFamily,
    pub args: Vec<Type>,
}

impl Instantiation {
    pub fn element(&self) -> Option<&Type> {
        match self.family {
            TemplateFamily::Sequence => self.args.first(),
            _ => None,
        }
    }

    pub fn key_value(&self) -> Option<(&Type, &Type)> {
        match (self.family, self.args.as_slice()) {
            (TemplateFamily::OrderedMap, [k, v]) => Some((k, v)),
            _ => None,
        }
    }

    pub fn pointee(&self) -> Option<&Type> {
        match self.family {
            TemplateFamily::Unique | TemplateFamily::Shared => self.args.first(),
            _ => None,
        }
    }

    pub fn is_tuple(&self) -> bool {
        self.family == TemplateFamily::Tuple
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("index {index} is out of range for a tuple of arity {arity}")]
pub struct IndexOutOfRange {
    pub index: usize,
    pub arity: usize,
}

/// Memoized table of template instantiations. Two requests with the same
/// template and argument list get the same [`InstanceId`].
#[derive(Debug, Default)]
pub struct TemplateInstantiator {
    instances: Vec<Instantiation>,
    memo: HashMap<(String, Vec<Type>), InstanceId>,
}

impl TemplateInstantiator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn instantiate(
        &mut self,
        def: &TemplateDef,
        args: Vec<Type>,
        span: Span,
    ) -> Result<InstanceId, AnalysisError> {
        if !def.arity.accepts(args.len()) {
            return Err(AnalysisError::TemplateArity {
                template: def.name.clone(),
                expected: def.arity.display(),
                found: args.len(),
                span,
            });
        }

        let key = (def.name.clone(), args);
        if let Some(id) = self.memo.get(&key) {
            return Ok(*id);
        }

        let id = InstanceId(self.instances.len() as u32);
        tracing::trace!(template = %def.name, arity = key.1.len(), "new instantiation");
        self.instances.push(Instantiation {
            template: def.name.clone(),
            family: def.family,
            args: key.1.clone(),
        });
        self.memo.insert(key, id);
        Ok(id)
    }

    pub fn get(&self, id: InstanceId) -> &Instantiation {
        &self.instances[id.0 as usize]
    }

    /// Member type at `index` of a tuple instantiation, checked against its arity.
    pub fn positional(&self, id: InstanceId, index: usize) -> Result<&Type, IndexOutOfRange> {
        let inst = self.get(id);
        inst.args.get(index).ok_or(IndexOutOfRange {
            index,
            arity: inst.args.len(),
        })
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TypeRegistry;
    use crate::types::Primitive;
    use typecast_ast::no_span;

    fn int() -> Type {
        Type::Primitive(Primitive::Int)
    }

    #[test]
    fn identical_arguments_share_an_instance() {
        let reg = TypeRegistry::default();
        let seq = reg.template("sequence").unwrap();
        let mut t = TemplateInstantiator::new();

        let a = t.instantiate(seq, vec![int()], no_span()).unwrap();
        let b = t.instantiate(seq, vec![int()], no_span()).unwrap();
        let c = t
            .instantiate(seq, vec![Type::Primitive(Primitive::Double)], no_span())
            .unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn container_arity_is_enforced() {
        let reg = TypeRegistry::default();
        let mut t = TemplateInstantiator::new();

        let err = t
            .instantiate(reg.template("std::map").unwrap(), vec![int()], no_span())
            .unwrap_err();
        assert!(matches!(err, AnalysisError::TemplateArity { found: 1, .. }));

        let err = t
            .instantiate(reg.template("sequence").unwrap(), vec![int(), int()], no_span())
            .unwrap_err();
        assert!(matches!(err, AnalysisError::TemplateArity { found: 2, .. }));
    }

    #[test]
    fn tuple_positional_access_is_bounded() {
        let reg = TypeRegistry::default();
        let mut t = TemplateInstantiator::new();
        let id = t
            .instantiate(
                reg.template("fixed-arity-tuple").unwrap(),
                vec![int(), Type::Primitive(Primitive::String)],
                no_span(),
            )
            .unwrap();

        assert_eq!(t.positional(id, 0).unwrap(), &int());
        assert_eq!(
            t.positional(id, 1).unwrap(),
            &Type::Primitive(Primitive::String)
        );
        assert_eq!(
            t.positional(id, 2).unwrap_err(),
            IndexOutOfRange { index: 2, arity: 2 }
        );
    }

    #[test]
    fn map_exposes_key_and_value() {
        let reg = TypeRegistry::default();
        let mut t = TemplateInstantiator::new();
        let key = Type::pointer_to(Type::Primitive(Primitive::Char));
        let id = t
            .instantiate(
                reg.template("std::map").unwrap(),
                vec![key.clone(), int()],
                no_span(),
            )
            .unwrap();
        assert_eq!(t.get(id).key_value(), Some((&key, &int())));
        assert!(t.get(id).element().is_none());
    }
}
