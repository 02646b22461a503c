#![forbid(unsafe_code)]

//! Declared classes and template spellings.
//!
//! Built once through [`RegistryBuilder`] and then frozen. Freezing resolves
//! every base name and proves the hierarchy acyclic, so a [`TypeRegistry`]
//! can answer hierarchy queries by plain reachability.

use std::collections::HashMap;

use typecast_ast::{
    ClassDecl, Declarations, MemberDecl, OwnershipMode, Span, TemplateDecl, TemplateFamily,
    TypeRef,
};

use crate::error::AnalysisError;
use crate::types::{ClassId, Primitive, Type};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    Variadic,
}

impl Arity {
    pub fn accepts(&self, n: usize) -> bool {
        match self {
            Arity::Exact(k) => *k == n,
            Arity::Variadic => true,
        }
    }

    pub fn display(&self) -> String {
        match self {
            Arity::Exact(k) => k.to_string(),
            Arity::Variadic => "any number of".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TemplateDef {
    pub name: String,
    pub family: TemplateFamily,
    pub arity: Arity,
}

impl TemplateDef {
    fn new(name: &str, family: TemplateFamily, fixed: Option<usize>) -> Self {
        let arity = match (family, fixed) {
            (_, Some(n)) => Arity::Exact(n),
            (TemplateFamily::Sequence, None) => Arity::Exact(1),
            (TemplateFamily::OrderedMap, None) => Arity::Exact(2),
            (TemplateFamily::Unique | TemplateFamily::Shared, None) => Arity::Exact(1),
            (TemplateFamily::Tuple, None) => Arity::Variadic,
        };
        Self {
            name: name.to_string(),
            family,
            arity,
        }
    }
}

const UNIQUE_TEMPLATE: &str = "std::unique_ptr";
const SHARED_TEMPLATE: &str = "std::shared_ptr";

fn builtin_templates() -> Vec<TemplateDef> {
    vec![
        TemplateDef::new("sequence", TemplateFamily::Sequence, None),
        TemplateDef::new("std::vector", TemplateFamily::Sequence, None),
        TemplateDef::new("std::list", TemplateFamily::Sequence, None),
        TemplateDef::new("std::deque", TemplateFamily::Sequence, None),
        TemplateDef::new("ordered-mapping", TemplateFamily::OrderedMap, None),
        TemplateDef::new("std::map", TemplateFamily::OrderedMap, None),
        TemplateDef::new("fixed-arity-tuple", TemplateFamily::Tuple, None),
        TemplateDef::new("std::tuple", TemplateFamily::Tuple, None),
        TemplateDef::new("std::pair", TemplateFamily::Tuple, Some(2)),
        TemplateDef::new(UNIQUE_TEMPLATE, TemplateFamily::Unique, None),
        TemplateDef::new(SHARED_TEMPLATE, TemplateFamily::Shared, None),
    ]
}

#[derive(Clone, Debug)]
pub struct ClassInfo {
    pub name: String,
    pub span: Span,
    pub bases: Vec<ClassId>,
    pub members: Vec<MemberDecl>,
    pub converts_to: Vec<TypeRef>,
    pub constructible_from: Vec<TypeRef>,
}

pub struct RegistryBuilder {
    decls: Vec<ClassDecl>,
    class_ids: HashMap<String, ClassId>,
    templates: HashMap<String, TemplateDef>,
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryBuilder {
    pub fn new() -> Self {
        let templates = builtin_templates()
            .into_iter()
            .map(|t| (t.name.clone(), t))
            .collect();
        Self {
            decls: Vec::new(),
            class_ids: HashMap::new(),
            templates,
        }
    }

    fn check_free(&self, name: &str, span: Span) -> Result<(), AnalysisError> {
        if Primitive::from_name(name).is_some()
            || self.class_ids.contains_key(name)
            || self.templates.contains_key(name)
        {
            return Err(AnalysisError::DuplicateType {
                name: name.to_string(),
                span,
            });
        }
        Ok(())
    }

    pub fn register(&mut self, decl: ClassDecl) -> Result<ClassId, AnalysisError> {
        self.check_free(&decl.name, decl.span)?;
        let id = ClassId(self.decls.len() as u32);
        self.class_ids.insert(decl.name.clone(), id);
        self.decls.push(decl);
        Ok(id)
    }

    pub fn register_template(&mut self, decl: TemplateDecl) -> Result<(), AnalysisError> {
        self.check_free(&decl.name, decl.span)?;
        let def = TemplateDef::new(&decl.name, decl.family, decl.arity);
        self.templates.insert(decl.name, def);
        Ok(())
    }

    pub fn freeze(self) -> Result<TypeRegistry, AnalysisError> {
        let mut classes = Vec::with_capacity(self.decls.len());
        for decl in self.decls {
            let mut bases = Vec::with_capacity(decl.bases.len());
            for base in &decl.bases {
                let id = self.class_ids.get(base).copied().ok_or_else(|| {
                    AnalysisError::UnknownType {
                        name: base.clone(),
                        span: decl.span,
                    }
                })?;
                bases.push(id);
            }
            let own_virtual = decl.polymorphic || decl.members.iter().any(|m| m.is_virtual);
            classes.push((
                ClassInfo {
                    name: decl.name,
                    span: decl.span,
                    bases,
                    members: decl.members,
                    converts_to: decl.converts_to,
                    constructible_from: decl.constructible_from,
                },
                own_virtual,
            ));
        }

        find_cycle(&classes.iter().map(|(c, _)| c).collect::<Vec<_>>())?;

        // Acyclic from here on; bases inherit polymorphism downwards.
        let mut polymorphic: Vec<Option<bool>> = vec![None; classes.len()];
        for i in 0..classes.len() {
            compute_polymorphic(i, &classes, &mut polymorphic);
        }

        let (classes, _): (Vec<ClassInfo>, Vec<bool>) = classes.into_iter().unzip();
        Ok(TypeRegistry {
            classes,
            class_ids: self.class_ids,
            templates: self.templates,
            polymorphic: polymorphic.into_iter().map(|p| p.unwrap_or(false)).collect(),
        })
    }
}

fn compute_polymorphic(
    idx: usize,
    classes: &[(ClassInfo, bool)],
    memo: &mut Vec<Option<bool>>,
) -> bool {
    if let Some(known) = memo[idx] {
        return known;
    }
    let (info, own) = &classes[idx];
    let mut result = *own;
    for base in &info.bases {
        if compute_polymorphic(base.0 as usize, classes, memo) {
            result = true;
        }
    }
    memo[idx] = Some(result);
    result
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

/// Depth-first walk over the base graph; a back edge to a class still on
/// the stack is a cycle.
fn find_cycle(classes: &[&ClassInfo]) -> Result<(), AnalysisError> {
    let mut marks = vec![Mark::Unvisited; classes.len()];
    let mut path: Vec<usize> = Vec::new();

    fn visit(
        idx: usize,
        classes: &[&ClassInfo],
        marks: &mut [Mark],
        path: &mut Vec<usize>,
    ) -> Result<(), AnalysisError> {
        marks[idx] = Mark::OnStack;
        path.push(idx);
        for base in &classes[idx].bases {
            let b = base.0 as usize;
            match marks[b] {
                Mark::Done => {}
                Mark::OnStack => {
                    let start = path.iter().position(|p| *p == b).unwrap_or(0);
                    let mut cycle: Vec<String> = path[start..]
                        .iter()
                        .map(|i| classes[*i].name.clone())
                        .collect();
                    cycle.push(classes[b].name.clone());
                    return Err(AnalysisError::CyclicHierarchy {
                        cycle,
                        span: classes[b].span,
                    });
                }
                Mark::Unvisited => visit(b, classes, marks, path)?,
            }
        }
        path.pop();
        marks[idx] = Mark::Done;
        Ok(())
    }

    for idx in 0..classes.len() {
        if marks[idx] == Mark::Unvisited {
            visit(idx, classes, &mut marks, &mut path)?;
        }
    }
    Ok(())
}

/// Frozen, acyclic set of declared types.
#[derive(Debug)]
pub struct TypeRegistry {
    classes: Vec<ClassInfo>,
    class_ids: HashMap<String, ClassId>,
    templates: HashMap<String, TemplateDef>,
    polymorphic: Vec<bool>,
}

impl TypeRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Registers every declared template spelling and class, then freezes.
    pub fn from_declarations(decls: &Declarations) -> Result<Self, AnalysisError> {
        let mut builder = RegistryBuilder::new();
        for t in &decls.templates {
            builder.register_template(t.clone())?;
        }
        for c in &decls.classes {
            builder.register(c.clone())?;
        }
        builder.freeze()
    }

    /// Looks up a non-template type name.
    pub fn resolve(&self, name: &str, span: Span) -> Result<Type, AnalysisError> {
        if let Some(p) = Primitive::from_name(name) {
            return Ok(Type::Primitive(p));
        }
        self.class_ids
            .get(name)
            .map(|id| Type::Class(*id))
            .ok_or_else(|| AnalysisError::UnknownType {
                name: name.to_string(),
                span,
            })
    }

    pub fn class_id(&self, name: &str) -> Option<ClassId> {
        self.class_ids.get(name).copied()
    }

    pub fn class(&self, id: ClassId) -> &ClassInfo {
        &self.classes[id.0 as usize]
    }

    pub fn classes(&self) -> impl Iterator<Item = (ClassId, &ClassInfo)> {
        self.classes
            .iter()
            .enumerate()
            .map(|(i, c)| (ClassId(i as u32), c))
    }

    pub fn template(&self, name: &str) -> Option<&TemplateDef> {
        self.templates.get(name)
    }

    pub fn handle_template(&self, mode: OwnershipMode) -> &TemplateDef {
        let name = match mode {
            OwnershipMode::Unique => UNIQUE_TEMPLATE,
            OwnershipMode::Shared => SHARED_TEMPLATE,
        };
        // Builtins can't be shadowed: registering a taken name fails.
        &self.templates[name]
    }

    /// True iff `base` appears in `derived`'s transitive base chain.
    /// A class is not its own base.
    pub fn is_base_of(&self, base: ClassId, derived: ClassId) -> bool {
        let mut stack = self.class(derived).bases.clone();
        let mut seen = vec![false; self.classes.len()];
        while let Some(next) = stack.pop() {
            if next == base {
                return true;
            }
            if std::mem::replace(&mut seen[next.0 as usize], true) {
                continue;
            }
            stack.extend(self.class(next).bases.iter().copied());
        }
        false
    }

    pub fn related(&self, a: ClassId, b: ClassId) -> bool {
        a == b || self.is_base_of(a, b) || self.is_base_of(b, a)
    }

    /// Has a dynamically dispatched member, directly or through a base.
    pub fn is_polymorphic(&self, id: ClassId) -> bool {
        self.polymorphic[id.0 as usize]
    }

    /// Own members first, then bases in declaration order.
    pub fn find_member(&self, id: ClassId, name: &str) -> Option<&MemberDecl> {
        let class = self.class(id);
        if let Some(m) = class.members.iter().find(|m| m.name == name) {
            return Some(m);
        }
        class
            .bases
            .iter()
            .find_map(|base| self.find_member(*base, name))
    }
}

impl Default for TypeRegistry {
    /// Builtin primitives and templates only.
    fn default() -> Self {
        Self {
            classes: Vec::new(),
            class_ids: HashMap::new(),
            templates: builtin_templates()
                .into_iter()
                .map(|t| (t.name.clone(), t))
                .collect(),
            polymorphic: Vec::new(),
        }
    }
}
