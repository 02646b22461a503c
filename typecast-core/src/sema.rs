#![forbid(unsafe_code)]

//! Expression type resolution.
//!
//! [`analyze`] freezes the registry, then walks the statement tree once.
//! Children are resolved before their parent, so every operand type is known
//! by the time an operator, cast or construction is visited. Structural
//! errors unwind through `?` and end the walk; cast classifications, findings
//! and ownership violations accumulate in the report instead.

use tracing::instrument;
use typecast_ast::{
    BinOp, CastMechanism, Expr, ExprKind, Literal, OperatorDecl, OwnershipMode, Span, Stmt,
    TemplateFamily, TypeRef, Unit,
};

use crate::cast::{CastClassifier, CastNote, Classification};
use crate::error::AnalysisError;
use crate::layout::TargetLayout;
use crate::ownership::{HandleId, HandleState, OwnershipTracker, ViolationKind};
use crate::registry::TypeRegistry;
use crate::report::{
    AnalysisReport, CastRecord, ExprId, Finding, FindingKind, OwnershipViolation, ResolvedExpr,
};
use crate::template::TemplateInstantiator;
use crate::types::{Primitive, Type, arithmetic_result, display_type};

#[derive(Clone, Copy, Debug, Default)]
pub struct AnalysisOptions {
    pub layout: TargetLayout,
}

/// Runs the whole pipeline over one unit. Never fails: a structural error is
/// stored in [`AnalysisReport::fatal`] next to everything resolved before it.
#[instrument(
    level = "debug",
    skip_all,
    fields(
        classes = unit.declarations.classes.len(),
        statements = unit.body.len()
    )
)]
pub fn analyze(unit: &Unit, options: &AnalysisOptions) -> AnalysisReport {
    let registry = match TypeRegistry::from_declarations(&unit.declarations) {
        Ok(registry) => registry,
        Err(err) => {
            tracing::debug!(error = %err, "declarations rejected");
            return AnalysisReport {
                fatal: Some(err),
                ..Default::default()
            };
        }
    };

    let mut checker = Checker::new(&registry, options.layout);
    let outcome = checker.check_unit(unit);
    let mut report = checker.finish();
    if let Err(err) = outcome {
        tracing::debug!(error = %err, "analysis aborted");
        report.fatal = Some(err);
    }
    report
}

/// Result of resolving one expression.
#[derive(Clone, Debug)]
struct Value {
    ty: Type,
    lvalue: bool,
    /// Set when the expression names a binding directly.
    binding: Option<String>,
    handle: Option<HandleId>,
}

impl Value {
    fn rvalue(ty: Type) -> Self {
        Self {
            ty,
            lvalue: false,
            binding: None,
            handle: None,
        }
    }

    fn poison() -> Self {
        Self::rvalue(Type::Unknown)
    }
}

#[derive(Clone, Debug)]
struct Binding {
    name: String,
    ty: Type,
    handle: Option<HandleId>,
    /// Binding a reference was bound to; it owns `handle`.
    referent: Option<String>,
}

#[derive(Clone, Debug)]
struct Overload {
    op: BinOp,
    lhs: Type,
    rhs: Type,
    ret: Type,
    signature: String,
}

/// Resolved `converts_to` / `constructible_from` lists of one class.
#[derive(Clone, Debug, Default)]
struct UserConversions {
    to: Vec<Type>,
    from: Vec<Type>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Rank {
    Exact,
    Numeric,
    UserConversion,
    BaseClass,
}

pub struct Checker<'r> {
    registry: &'r TypeRegistry,
    classifier: CastClassifier<'r>,
    layout: TargetLayout,
    templates: TemplateInstantiator,
    tracker: OwnershipTracker,

    // Innermost scope last; bindings in declaration order.
    scopes: Vec<Vec<Binding>>,
    // Handles produced by the current statement and not yet bound.
    temporaries: Vec<HandleId>,

    operators: Vec<Overload>,
    conversions: Vec<UserConversions>,

    report: AnalysisReport,
    next_id: u32,
}

impl<'r> Checker<'r> {
    pub fn new(registry: &'r TypeRegistry, layout: TargetLayout) -> Self {
        Self {
            registry,
            classifier: CastClassifier::new(registry, layout),
            layout,
            templates: TemplateInstantiator::new(),
            tracker: OwnershipTracker::new(),
            scopes: vec![Vec::new()],
            temporaries: Vec::new(),
            operators: Vec::new(),
            conversions: Vec::new(),
            report: AnalysisReport::default(),
            next_id: 0,
        }
    }

    pub fn finish(self) -> AnalysisReport {
        self.report
    }

    pub fn check_unit(&mut self, unit: &Unit) -> Result<(), AnalysisError> {
        self.load_conversions()?;
        self.load_operators(&unit.declarations.operators)?;

        for stmt in &unit.body {
            self.check_stmt(stmt)?;
        }
        // Namespace scope ends with the unit.
        self.pop_scope();
        Ok(())
    }

    fn load_conversions(&mut self) -> Result<(), AnalysisError> {
        let registry = self.registry;
        for (_, class) in registry.classes() {
            let to = class
                .converts_to
                .iter()
                .map(|t| self.resolve_type(t))
                .collect::<Result<Vec<_>, _>>()?;
            let from = class
                .constructible_from
                .iter()
                .map(|t| self.resolve_type(t))
                .collect::<Result<Vec<_>, _>>()?;
            self.conversions.push(UserConversions { to, from });
        }
        Ok(())
    }

    fn load_operators(&mut self, decls: &[OperatorDecl]) -> Result<(), AnalysisError> {
        for decl in decls {
            let lhs = self.resolve_type(&decl.lhs)?;
            let rhs = self.resolve_type(&decl.rhs)?;
            let ret = self.resolve_type(&decl.ret)?;
            let signature = format!(
                "operator{}({}, {})",
                decl.op.symbol(),
                self.display(&lhs),
                self.display(&rhs)
            );
            self.operators.push(Overload {
                op: decl.op,
                lhs,
                rhs,
                ret,
                signature,
            });
        }
        Ok(())
    }

    /// Turns a written type into a semantic one, instantiating templates on
    /// the way.
    pub fn resolve_type(&mut self, r: &TypeRef) -> Result<Type, AnalysisError> {
        let registry = self.registry;
        let mut ty = match registry.template(&r.name) {
            Some(def) => {
                let args = r
                    .args
                    .iter()
                    .map(|a| self.resolve_type(a))
                    .collect::<Result<Vec<_>, _>>()?;
                Type::Instance(self.templates.instantiate(def, args, r.span)?)
            }
            None if r.args.is_empty() => registry.resolve(&r.name, r.span)?,
            None => {
                return Err(AnalysisError::UnknownType {
                    name: r.name.clone(),
                    span: r.span,
                });
            }
        };
        for _ in 0..r.pointer {
            ty = Type::pointer_to(ty);
        }
        if r.reference {
            ty = Type::reference_to(ty);
        }
        Ok(ty)
    }

    fn display(&self, ty: &Type) -> String {
        display_type(ty, self.registry, &self.templates)
    }

    // ---- statements ----

    fn check_stmt(&mut self, stmt: &Stmt) -> Result<(), AnalysisError> {
        match stmt {
            Stmt::Let {
                span,
                name,
                ty,
                init,
            } => self.check_let(*span, name, ty.as_ref(), init.as_ref())?,
            Stmt::Expr { expr } => {
                self.check_expr(expr)?;
            }
            Stmt::Block { body, .. } => {
                self.scopes.push(Vec::new());
                for s in body {
                    self.check_stmt(s)?;
                }
                self.pop_scope();
                return Ok(());
            }
            Stmt::Release { span, name } => self.check_release(*span, name)?,
        }
        self.drop_temporaries();
        Ok(())
    }

    fn check_let(
        &mut self,
        span: Span,
        name: &str,
        declared: Option<&TypeRef>,
        init: Option<&Expr>,
    ) -> Result<(), AnalysisError> {
        if self
            .scopes
            .last()
            .is_some_and(|scope| scope.iter().any(|b| b.name == name))
        {
            return Err(AnalysisError::DuplicateBinding {
                name: name.to_string(),
                span,
            });
        }

        let declared = declared.map(|t| self.resolve_type(t)).transpose()?;
        let mut handle = None;
        let mut referent = None;
        let ty = match init {
            Some(init) => {
                let value = self.check_expr(init)?;
                let ty = match &declared {
                    Some(ty) => {
                        self.implicit_conversion(self.last_id(), init.span, &value, ty);
                        ty.clone()
                    }
                    None => value.ty.strip_reference().clone(),
                };
                if matches!(ty, Type::Reference(_)) {
                    // A reference aliases the handle it is bound to; one bound
                    // to a temporary extends its life to the scope.
                    self.touch(&value, span);
                    handle = value.handle;
                    referent = value.binding.clone();
                    if let (Some(id), None) = (handle, &referent) {
                        self.temporaries.retain(|t| *t != id);
                    }
                } else if self.is_handle_type(&ty) {
                    handle = self.take_handle(&value, &ty, span);
                } else {
                    self.touch(&value, span);
                }
                ty
            }
            // Default construction; a default handle is empty.
            None => declared.unwrap_or(Type::Unknown),
        };

        tracing::trace!(name, ty = %self.display(&ty), "binding declared");
        if let Some(scope) = self.scopes.last_mut() {
            scope.push(Binding {
                name: name.to_string(),
                ty,
                handle,
                referent,
            });
        }
        Ok(())
    }

    fn check_release(&mut self, span: Span, name: &str) -> Result<(), AnalysisError> {
        let binding = self
            .lookup(name)
            .ok_or_else(|| AnalysisError::UnknownIdentifier {
                name: name.to_string(),
                span,
            })?;
        let Some(handle) = binding.handle else {
            tracing::trace!(name, "release of an untracked binding");
            return Ok(());
        };
        if let Err(kind) = self.tracker.release(handle) {
            self.violation(kind, handle, Some(name.to_string()), span);
        }
        Ok(())
    }

    fn lookup(&self, name: &str) -> Option<&Binding> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.iter().rev().find(|b| b.name == name))
    }

    fn lookup_mut(&mut self, name: &str) -> Option<&mut Binding> {
        self.scopes
            .iter_mut()
            .rev()
            .find_map(|scope| scope.iter_mut().rev().find(|b| b.name == name))
    }

    /// Leaves the innermost scope, releasing its live handles last-declared
    /// first.
    fn pop_scope(&mut self) {
        let Some(scope) = self.scopes.pop() else {
            return;
        };
        for binding in scope.iter().rev() {
            if binding.referent.is_some() {
                continue;
            }
            if let Some(handle) = binding.handle {
                self.release_if_valid(handle);
            }
        }
    }

    fn drop_temporaries(&mut self) {
        for handle in std::mem::take(&mut self.temporaries) {
            self.release_if_valid(handle);
        }
    }

    fn release_if_valid(&mut self, handle: HandleId) {
        if self.tracker.state(handle) == HandleState::Valid {
            // Cannot fail on a valid handle.
            let _ = self.tracker.release(handle);
        }
    }

    // ---- ownership ----

    fn handle_mode(&self, ty: &Type) -> Option<OwnershipMode> {
        let Type::Instance(id) = ty.strip_reference() else {
            return None;
        };
        match self.templates.get(*id).family {
            TemplateFamily::Unique => Some(OwnershipMode::Unique),
            TemplateFamily::Shared => Some(OwnershipMode::Shared),
            _ => None,
        }
    }

    fn is_handle_type(&self, ty: &Type) -> bool {
        self.handle_mode(ty).is_some()
    }

    /// Hands `value`'s handle to a new owner of type `target`: temporaries
    /// are adopted, named handles are copied.
    fn take_handle(&mut self, value: &Value, target: &Type, span: Span) -> Option<HandleId> {
        let id = value.handle?;
        let owned = if value.binding.is_none() {
            self.temporaries.retain(|t| *t != id);
            id
        } else {
            match self.tracker.copy(id) {
                Ok(copy) => copy,
                Err(kind) => {
                    self.violation(kind, id, value.binding.clone(), span);
                    return None;
                }
            }
        };

        match self.handle_mode(target) {
            // unique -> shared ends the unique lineage and starts a shared one.
            Some(mode) if mode != self.tracker.mode(owned) => {
                let pointee = self.tracker.pointee(owned).clone();
                self.release_if_valid(owned);
                Some(self.tracker.make(mode, pointee))
            }
            _ => Some(owned),
        }
    }

    /// Passing by value into a constructor.
    fn pass_argument(&mut self, value: &Value, span: Span) {
        let Some(id) = value.handle else {
            return;
        };
        if value.binding.is_none() {
            self.temporaries.retain(|t| *t != id);
        } else if let Err(kind) = self.tracker.copy(id) {
            self.violation(kind, id, value.binding.clone(), span);
        }
    }

    /// Any non-ownership use of a handle.
    fn touch(&mut self, value: &Value, span: Span) {
        if let Some(handle) = value.handle {
            if let Err(kind) = self.tracker.use_handle(handle) {
                self.violation(kind, handle, value.binding.clone(), span);
            }
        }
    }

    fn violation(
        &mut self,
        kind: ViolationKind,
        handle: HandleId,
        binding: Option<String>,
        span: Span,
    ) {
        let pointee = self.display(self.tracker.pointee(handle));
        tracing::debug!(
            kind = kind.kind_name(),
            binding = binding.as_deref().unwrap_or("<temporary>"),
            "ownership violation"
        );
        self.report.violations.push(OwnershipViolation {
            kind,
            binding,
            span,
            mode: self.tracker.mode(handle),
            pointee,
        });
    }

    // ---- report plumbing ----

    /// Id the node currently being resolved will receive.
    fn pending_id(&self) -> ExprId {
        ExprId(self.next_id)
    }

    fn last_id(&self) -> ExprId {
        ExprId(self.next_id.saturating_sub(1))
    }

    fn record(&mut self, expr: &Expr, value: &Value) {
        let id = ExprId(self.next_id);
        self.next_id += 1;
        let shown = self.display(&value.ty);
        tracing::trace!(id = id.0, kind = expr.kind_name(), ty = %shown, "resolved");
        self.report.expressions.push(ResolvedExpr {
            id,
            span: expr.span,
            kind: expr.kind_name(),
            ty: value.ty.clone(),
            display: shown,
            lvalue: value.lvalue,
        });
    }

    fn finding(&mut self, span: Span, kind: FindingKind) {
        tracing::debug!(kind = kind.kind_name(), "finding");
        self.report.findings.push(Finding {
            expr: self.pending_id(),
            span,
            kind,
        });
    }

    fn record_cast(
        &mut self,
        expr: ExprId,
        span: Span,
        source: &Type,
        target: &Type,
        implicit: bool,
        classification: Classification,
    ) {
        let source = self.display(source);
        let target = self.display(target);
        tracing::debug!(
            expr = expr.0,
            %source,
            %target,
            mechanism = classification.mechanism.display(),
            legal = classification.is_legal(),
            "cast classified"
        );
        self.report.casts.push(CastRecord {
            expr,
            span,
            source,
            target,
            implicit,
            classification,
        });
    }

    // ---- conversions ----

    /// Source type as seen by a conversion to `target`: binding to a
    /// reference keeps the object, anything else reads its value.
    fn conversion_source(value: &Value, target: &Type) -> Type {
        if matches!(target, Type::Reference(_)) {
            Type::reference_to(value.ty.clone())
        } else {
            value.ty.strip_reference().clone()
        }
    }

    fn implicit_conversion(&mut self, expr: ExprId, span: Span, value: &Value, target: &Type) {
        if value.ty.is_unknown() || target.is_unknown() {
            return;
        }
        let source = Self::conversion_source(value, target);
        if &source == target {
            return;
        }
        let classification = self.classify_implicit(&source, target);
        self.record_cast(expr, span, &source, target, true, classification);
    }

    fn classify_implicit(&self, source: &Type, target: &Type) -> Classification {
        let mechanism = if source.is_arithmetic() && target.is_arithmetic() {
            CastMechanism::ImplicitNumeric
        } else {
            CastMechanism::ImplicitObject
        };
        let classification = self.classifier.classify(source, target, mechanism);
        if classification.is_legal() {
            return classification;
        }
        if self.handle_conversion(source, target) {
            return Classification::legal(mechanism);
        }
        if self.user_conversion(source.strip_reference(), target.strip_reference()) {
            return Classification::legal(mechanism).with_note(CastNote::UserDefined);
        }
        classification
    }

    /// `nullptr` to a handle, or a handle to a handle of the same or a
    /// weaker mode whose pointee is the same class or a base of it.
    fn handle_conversion(&self, source: &Type, target: &Type) -> bool {
        let Type::Instance(target_id) = target else {
            return false;
        };
        let to = self.templates.get(*target_id);
        let Some(to_pointee) = to.pointee() else {
            return false;
        };
        match source {
            Type::Primitive(Primitive::NullPtr) => true,
            Type::Instance(source_id) => {
                let from = self.templates.get(*source_id);
                let Some(from_pointee) = from.pointee() else {
                    return false;
                };
                let modes = from.family == to.family
                    || (from.family == TemplateFamily::Unique
                        && to.family == TemplateFamily::Shared);
                let pointees = from_pointee == to_pointee
                    || match (from_pointee.class_id(), to_pointee.class_id()) {
                        (Some(from), Some(to)) => self.registry.is_base_of(to, from),
                        _ => false,
                    };
                modes && pointees
            }
            _ => false,
        }
    }

    fn user_conversion(&self, from: &Type, to: &Type) -> bool {
        let conversions = |ty: &Type| {
            ty.class_id()
                .and_then(|id| self.conversions.get(id.0 as usize))
        };
        conversions(from).is_some_and(|c| c.to.iter().any(|t| t.strip_reference() == to))
            || conversions(to).is_some_and(|c| c.from.iter().any(|t| t.strip_reference() == from))
    }

    // ---- expressions ----

    fn check_expr(&mut self, expr: &Expr) -> Result<Value, AnalysisError> {
        let value = match &expr.kind {
            ExprKind::Literal { literal } => Value::rvalue(literal_type(literal)),
            ExprKind::Variable { name } => {
                let binding = self
                    .lookup(name)
                    .ok_or_else(|| AnalysisError::UnknownIdentifier {
                        name: name.clone(),
                        span: expr.span,
                    })?;
                Value {
                    ty: binding.ty.clone(),
                    lvalue: true,
                    binding: Some(name.clone()),
                    handle: binding.handle,
                }
            }
            ExprKind::Member {
                base,
                member,
                arrow,
            } => self.check_member(expr.span, base, member, *arrow)?,
            ExprKind::Binary { op, left, right } => {
                self.check_binary(expr.span, *op, left, right)?
            }
            ExprKind::Cast {
                mechanism,
                target,
                expr: inner,
            } => self.check_cast(expr.span, *mechanism, target, inner)?,
            ExprKind::Template {
                template,
                type_args,
                args,
            } => self.check_template(expr.span, template, type_args, args)?,
            ExprKind::TupleGet { tuple, index } => {
                self.check_tuple_get(expr.span, tuple, *index)?
            }
            ExprKind::Index { base, index } => self.check_index(expr.span, base, index)?,
            ExprKind::New { ty, args } => {
                let ty = self.resolve_type(ty)?;
                self.check_args(args)?;
                Value::rvalue(Type::pointer_to(ty))
            }
            ExprKind::MakeHandle {
                mode,
                pointee,
                args,
            } => self.check_make_handle(expr.span, *mode, pointee, args)?,
            ExprKind::Move { expr: inner } => self.check_move(expr.span, inner)?,
            ExprKind::Assign { target, value } => self.check_assign(expr.span, target, value)?,
        };
        self.record(expr, &value);
        Ok(value)
    }

    fn check_args(&mut self, args: &[Expr]) -> Result<Vec<Value>, AnalysisError> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            let value = self.check_expr(arg)?;
            self.pass_argument(&value, arg.span);
            values.push(value);
        }
        Ok(values)
    }

    fn check_member(
        &mut self,
        span: Span,
        base: &Expr,
        member: &str,
        arrow: bool,
    ) -> Result<Value, AnalysisError> {
        let base = self.check_expr(base)?;
        self.touch(&base, span);

        let base_ty = base.ty.strip_reference();
        let (class, lvalue) = match (base_ty, arrow) {
            (Type::Unknown, _) => return Ok(Value::poison()),
            (Type::Class(id), false) => (Some(*id), base.lvalue),
            (Type::Pointer(inner), true) => (inner.class_id(), true),
            (Type::Instance(id), true) => (
                self.templates
                    .get(*id)
                    .pointee()
                    .and_then(|t| t.class_id()),
                true,
            ),
            _ => (None, false),
        };

        let registry = self.registry;
        let decl = class.and_then(|id| registry.find_member(id, member));
        let Some(decl) = decl else {
            return Err(AnalysisError::UnknownMember {
                ty: self.display(base_ty),
                member: member.to_string(),
                span,
            });
        };
        let ty = self.resolve_type(&decl.ty)?;
        Ok(Value {
            ty,
            lvalue,
            binding: None,
            handle: None,
        })
    }

    fn check_binary(
        &mut self,
        span: Span,
        op: BinOp,
        left: &Expr,
        right: &Expr,
    ) -> Result<Value, AnalysisError> {
        let l = self.check_expr(left)?;
        let r = self.check_expr(right)?;
        self.touch(&l, span);
        self.touch(&r, span);

        let (lt, rt) = (l.ty.strip_reference(), r.ty.strip_reference());
        if lt.is_unknown() || rt.is_unknown() {
            return Ok(Value::poison());
        }
        if let Some(ty) = self.builtin_binary(op, lt, rt) {
            return Ok(Value::rvalue(ty));
        }
        let ty = self.resolve_overload(span, op, lt, rt)?;
        Ok(Value::rvalue(ty))
    }

    fn is_nullable(&self, ty: &Type) -> bool {
        ty.is_pointer() || is_null(ty) || self.is_handle_type(ty)
    }

    fn is_scalar(&self, ty: &Type) -> bool {
        ty.is_arithmetic() || self.is_nullable(ty)
    }

    /// Operators the language defines without any declaration.
    fn builtin_binary(&self, op: BinOp, l: &Type, r: &Type) -> Option<Type> {
        let boolean = Type::Primitive(Primitive::Bool);
        if op.is_logical() {
            return (self.is_scalar(l) && self.is_scalar(r)).then_some(boolean);
        }
        if op.is_comparison() && self.is_nullable(l) && self.is_nullable(r) {
            let comparable = l == r || is_null(l) || is_null(r) || (l.is_pointer() && r.is_pointer());
            return comparable.then_some(boolean);
        }

        match (l, r) {
            (Type::Primitive(a), Type::Primitive(b)) if a.is_arithmetic() && b.is_arithmetic() => {
                if op.is_comparison() {
                    Some(boolean)
                } else if op == BinOp::Rem && (a.is_floating() || b.is_floating()) {
                    None
                } else {
                    Some(Type::Primitive(arithmetic_result(*a, *b, &self.layout)))
                }
            }
            (Type::Pointer(_), Type::Pointer(_)) if op == BinOp::Sub && l == r => {
                Some(Type::Primitive(Primitive::Long))
            }
            (Type::Pointer(_), i) if i.is_integral() && matches!(op, BinOp::Add | BinOp::Sub) => {
                Some(l.clone())
            }
            (i, Type::Pointer(_)) if i.is_integral() && op == BinOp::Add => Some(r.clone()),
            (Type::Primitive(Primitive::String), other)
            | (other, Type::Primitive(Primitive::String))
                if is_string_like(other) =>
            {
                if op.is_comparison() {
                    Some(boolean)
                } else if op == BinOp::Add {
                    Some(Type::Primitive(Primitive::String))
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    fn param_rank(&self, arg: &Type, param: &Type) -> Option<Rank> {
        let param = param.strip_reference();
        if arg == param {
            return Some(Rank::Exact);
        }
        if arg.is_arithmetic() && param.is_arithmetic() {
            return Some(Rank::Numeric);
        }
        if self.user_conversion(arg, param) {
            return Some(Rank::UserConversion);
        }
        let derived_to_base = |a: &Type, p: &Type| match (a.class_id(), p.class_id()) {
            (Some(a), Some(p)) => self.registry.is_base_of(p, a),
            _ => false,
        };
        match (arg, param) {
            (Type::Class(_), Type::Class(_)) if derived_to_base(arg, param) => Some(Rank::BaseClass),
            (Type::Pointer(a), Type::Pointer(p)) if derived_to_base(a, p) => Some(Rank::BaseClass),
            _ => None,
        }
    }

    /// Picks the best-ranked declared operator. A candidate's rank is its
    /// worse operand; at most one operand may go through a user conversion.
    fn resolve_overload(
        &self,
        span: Span,
        op: BinOp,
        l: &Type,
        r: &Type,
    ) -> Result<Type, AnalysisError> {
        let mut best: Option<Rank> = None;
        let mut winners: Vec<&Overload> = Vec::new();

        for candidate in self.operators.iter().filter(|o| o.op == op) {
            let (Some(a), Some(b)) = (
                self.param_rank(l, &candidate.lhs),
                self.param_rank(r, &candidate.rhs),
            ) else {
                continue;
            };
            if a == Rank::UserConversion && b == Rank::UserConversion {
                continue;
            }
            let rank = a.max(b);
            match best {
                Some(current) if rank > current => {}
                Some(current) if rank == current => winners.push(candidate),
                _ => {
                    best = Some(rank);
                    winners = vec![candidate];
                }
            }
        }

        match winners.as_slice() {
            [] => Err(AnalysisError::NoMatchingOperator {
                op: op.symbol().to_string(),
                lhs: self.display(l),
                rhs: self.display(r),
                span,
            }),
            [only] => {
                tracing::trace!(candidate = %only.signature, rank = ?best, "overload selected");
                Ok(only.ret.clone())
            }
            many => Err(AnalysisError::AmbiguousOverload {
                op: op.symbol().to_string(),
                lhs: self.display(l),
                rhs: self.display(r),
                candidates: many.iter().map(|o| o.signature.clone()).collect(),
                span,
            }),
        }
    }

    fn check_cast(
        &mut self,
        span: Span,
        mechanism: CastMechanism,
        target: &TypeRef,
        inner: &Expr,
    ) -> Result<Value, AnalysisError> {
        let value = self.check_expr(inner)?;
        let target = self.resolve_type(target)?;
        self.touch(&value, span);

        // The cast's type is the target whatever the verdict.
        if !value.ty.is_unknown() {
            let source = Self::conversion_source(&value, &target);
            let classification = self.classifier.classify(&source, &target, mechanism);
            self.record_cast(self.pending_id(), span, &source, &target, false, classification);
        }
        let lvalue = matches!(target, Type::Reference(_));
        Ok(Value {
            ty: target,
            lvalue,
            binding: None,
            handle: None,
        })
    }

    fn check_template(
        &mut self,
        span: Span,
        name: &str,
        type_args: &[TypeRef],
        args: &[Expr],
    ) -> Result<Value, AnalysisError> {
        let registry = self.registry;
        let def = registry
            .template(name)
            .ok_or_else(|| AnalysisError::UnknownType {
                name: name.to_string(),
                span,
            })?;

        let values = self.check_args(args)?;
        let explicit = type_args
            .iter()
            .map(|t| self.resolve_type(t))
            .collect::<Result<Vec<_>, _>>()?;

        // `make_tuple(...)` and `vector{...}` spell no type arguments.
        let inferred = explicit.is_empty() && !values.is_empty();
        let type_list = match def.family {
            TemplateFamily::Tuple if inferred => values
                .iter()
                .map(|v| v.ty.strip_reference().clone())
                .collect(),
            TemplateFamily::Sequence if inferred => values
                .iter()
                .take(1)
                .map(|v| v.ty.strip_reference().clone())
                .collect(),
            _ => explicit,
        };

        let id = self.templates.instantiate(def, type_list, span)?;
        let instance = self.templates.get(id).clone();
        let pending = self.pending_id();
        match instance.family {
            TemplateFamily::Tuple if !inferred && !values.is_empty() => {
                if values.len() != instance.args.len() {
                    return Err(AnalysisError::TemplateArity {
                        template: name.to_string(),
                        expected: instance.args.len().to_string(),
                        found: values.len(),
                        span,
                    });
                }
                for ((value, arg), ty) in values.iter().zip(args).zip(&instance.args) {
                    self.implicit_conversion(pending, arg.span, value, ty);
                }
            }
            TemplateFamily::Sequence => {
                if let Some(element) = instance.element() {
                    for (value, arg) in values.iter().zip(args) {
                        self.implicit_conversion(pending, arg.span, value, element);
                    }
                }
            }
            _ => {}
        }

        // `unique_ptr<T>(new T)`: owning construction; without arguments the
        // handle is empty.
        let mut handle = None;
        if let (Some(mode), false) = (self.handle_mode(&Type::Instance(id)), values.is_empty()) {
            let pointee = instance.pointee().cloned().unwrap_or(Type::Unknown);
            let made = self.tracker.make(mode, pointee);
            self.temporaries.push(made);
            handle = Some(made);
        }

        Ok(Value {
            ty: Type::Instance(id),
            lvalue: false,
            binding: None,
            handle,
        })
    }

    fn check_tuple_get(
        &mut self,
        span: Span,
        tuple: &Expr,
        index: usize,
    ) -> Result<Value, AnalysisError> {
        let value = self.check_expr(tuple)?;
        self.touch(&value, span);

        let id = match value.ty.strip_reference() {
            Type::Unknown => return Ok(Value::poison()),
            Type::Instance(id) if self.templates.get(*id).is_tuple() => *id,
            other => {
                let ty = self.display(other);
                self.finding(span, FindingKind::NotIndexable { ty });
                return Ok(Value::poison());
            }
        };

        match self.templates.positional(id, index).cloned() {
            Ok(ty) => Ok(Value {
                ty,
                lvalue: value.lvalue,
                binding: None,
                handle: None,
            }),
            Err(err) => {
                self.finding(
                    span,
                    FindingKind::IndexOutOfRange {
                        index: err.index,
                        arity: err.arity,
                    },
                );
                Ok(Value::poison())
            }
        }
    }

    fn check_index(
        &mut self,
        span: Span,
        base: &Expr,
        index: &Expr,
    ) -> Result<Value, AnalysisError> {
        let container = self.check_expr(base)?;
        let key = self.check_expr(index)?;
        self.touch(&container, span);
        self.touch(&key, span);

        let pending = self.pending_id();
        let element = match container.ty.strip_reference().clone() {
            Type::Unknown => return Ok(Value::poison()),
            Type::Pointer(inner) => {
                self.subscript(pending, index.span, &key);
                *inner
            }
            Type::Primitive(Primitive::String) => {
                self.subscript(pending, index.span, &key);
                Type::Primitive(Primitive::Char)
            }
            Type::Instance(id) => {
                let instance = self.templates.get(id).clone();
                if let Some(element) = instance.element() {
                    self.subscript(pending, index.span, &key);
                    element.clone()
                } else if let Some((key_ty, value_ty)) = instance.key_value() {
                    self.implicit_conversion(pending, index.span, &key, key_ty);
                    value_ty.clone()
                } else {
                    return Ok(self.not_indexable(span, &Type::Instance(id)));
                }
            }
            other => return Ok(self.not_indexable(span, &other)),
        };

        Ok(Value {
            ty: element,
            lvalue: true,
            binding: None,
            handle: None,
        })
    }

    fn not_indexable(&mut self, span: Span, ty: &Type) -> Value {
        let ty = self.display(ty);
        self.finding(span, FindingKind::NotIndexable { ty });
        Value::poison()
    }

    /// Positional subscripts take a size; integral indices need no record.
    fn subscript(&mut self, expr: ExprId, span: Span, index: &Value) {
        if !index.ty.strip_reference().is_integral() {
            self.implicit_conversion(expr, span, index, &Type::Primitive(Primitive::ULong));
        }
    }

    fn check_make_handle(
        &mut self,
        span: Span,
        mode: OwnershipMode,
        pointee: &TypeRef,
        args: &[Expr],
    ) -> Result<Value, AnalysisError> {
        let pointee = self.resolve_type(pointee)?;
        self.check_args(args)?;

        let registry = self.registry;
        let instance =
            self.templates
                .instantiate(registry.handle_template(mode), vec![pointee.clone()], span)?;
        let handle = self.tracker.make(mode, pointee);
        self.temporaries.push(handle);
        Ok(Value {
            ty: Type::Instance(instance),
            lvalue: false,
            binding: None,
            handle: Some(handle),
        })
    }

    fn check_move(&mut self, span: Span, inner: &Expr) -> Result<Value, AnalysisError> {
        let value = self.check_expr(inner)?;
        let ty = value.ty.strip_reference().clone();
        let Some(handle) = value.handle else {
            return Ok(Value::rvalue(ty));
        };
        if value.binding.is_none() {
            // Already a temporary.
            return Ok(Value {
                handle: Some(handle),
                ..Value::rvalue(ty)
            });
        }

        match self.tracker.move_handle(handle) {
            Ok(to) => {
                self.temporaries.push(to);
                Ok(Value {
                    handle: Some(to),
                    ..Value::rvalue(ty)
                })
            }
            Err(kind) => {
                self.violation(kind, handle, value.binding.clone(), span);
                Ok(Value::rvalue(ty))
            }
        }
    }

    fn check_assign(
        &mut self,
        span: Span,
        target: &Expr,
        value: &Expr,
    ) -> Result<Value, AnalysisError> {
        let place = self.check_expr(target)?;
        let assigned = self.check_expr(value)?;
        let pending = self.pending_id();

        if !place.lvalue && !place.ty.is_unknown() {
            self.finding(span, FindingKind::NotAssignable);
        }
        let target_ty = place.ty.strip_reference().clone();
        self.implicit_conversion(pending, value.span, &assigned, &target_ty);

        match (&place.binding, self.is_handle_type(&target_ty)) {
            (Some(name), true) => {
                // Adopt first so that `p = p` copies a still valid handle.
                let adopted = self.take_handle(&assigned, &target_ty, span);
                if let Some(old) = place.handle {
                    if Some(old) != adopted {
                        self.release_if_valid(old);
                    }
                }
                let mut referent = None;
                if let Some(binding) = self.lookup_mut(name) {
                    binding.handle = adopted;
                    referent = binding.referent.clone();
                }
                // Assigning through a reference reseats the referenced handle.
                if let Some(owner) = referent {
                    if let Some(binding) = self.lookup_mut(&owner) {
                        binding.handle = adopted;
                    }
                }
            }
            _ => self.touch(&assigned, span),
        }

        Ok(Value {
            ty: place.ty,
            lvalue: true,
            binding: None,
            handle: None,
        })
    }
}

fn literal_type(literal: &Literal) -> Type {
    let p = match literal {
        Literal::Bool(_) => Primitive::Bool,
        Literal::Char(_) => Primitive::Char,
        Literal::Int(_) => Primitive::Int,
        Literal::UInt(_) => Primitive::UInt,
        Literal::Long(_) => Primitive::Long,
        Literal::ULong(_) => Primitive::ULong,
        Literal::LongLong(_) => Primitive::LongLong,
        Literal::ULongLong(_) => Primitive::ULongLong,
        Literal::Float(_) => Primitive::Float,
        Literal::Double(_) => Primitive::Double,
        Literal::LongDouble(_) => Primitive::LongDouble,
        Literal::String(_) => return Type::pointer_to(Type::Primitive(Primitive::Char)),
        Literal::Null => Primitive::NullPtr,
    };
    Type::Primitive(p)
}

fn is_null(ty: &Type) -> bool {
    *ty == Type::Primitive(Primitive::NullPtr)
}

fn is_string_like(ty: &Type) -> bool {
    match ty {
        Type::Primitive(Primitive::String) => true,
        Type::Pointer(inner) => **inner == Type::Primitive(Primitive::Char),
        _ => false,
    }
}
