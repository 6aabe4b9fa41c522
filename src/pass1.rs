//! Pass 1 — the symbol collector: a single AST walk that declares every
//! symbol, builds the scope tree, resolves inheritance, and assigns
//! activation-record/instance offsets.
//!
//! Local-variable, parameter, and global offsets are assigned *inline*
//! during the walk (threaded through a small per-function cursor) rather
//! than in a separate pass after inheritance resolution: unlike class field
//! layout, none of those offsets depend on inheritance, and assigning them
//! as each declaration is visited is the natural, single-walk way `mmcc`
//! itself assigns `VarId`s in `build_mir.rs`'s `Translator`. Class field
//! offsets genuinely do depend on the post-walk inheritance merge (a
//! derived class's field list is not known until its base is resolved), so
//! `ClassSymbol::instance_size` is computed only after that merge.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::ast::{ClassMember, NodeId, Program, Stmt, StmtKind, TypeAnnotation};
use crate::errors::{ErrorCollector, SemErrorCode};
use crate::span::Span;
use crate::symtab::{ClassSymbol, FunctionSymbol, Scope, Symbol, VariableSymbol};
use crate::types::Type;

fn resolve_type_annotation(ann: &TypeAnnotation) -> Type { Type::from_text(&ann.name, ann.array_dims) }

/// Per-function offset cursor for parameters and locals.
struct FnCtx {
  params_offset: i32,
  params_seen: u32,
  locals_offset: u32,
}

impl FnCtx {
  fn new() -> Self { Self { params_offset: -4, params_seen: 0, locals_offset: 0 } }

  fn next_param_offset(&mut self, size: u32) -> i32 {
    let offset = self.params_offset;
    self.params_offset -= i32::try_from(size).expect("parameter too large");
    self.params_seen += 1;
    offset
  }

  fn next_local_offset(&mut self, size: u32) -> i32 {
    let offset = i32::try_from(self.locals_offset).expect("locals area too large");
    self.locals_offset += size;
    offset
  }

  fn params_size(&self) -> u32 {
    if self.params_seen == 0 { 0 } else { (-self.params_offset - 4) as u32 }
  }
}

pub struct Pass1Result {
  pub global: Rc<RefCell<Scope>>,
  pub scope_by_node: HashMap<NodeId, Rc<RefCell<Scope>>>,
  /// Tags every `FunctionDeclaration` node with its resolved symbol, so
  /// Pass 2 and the TAC generator don't need to re-resolve it by name.
  pub function_by_node: HashMap<NodeId, Rc<RefCell<FunctionSymbol>>>,
  pub class_by_node: HashMap<NodeId, Rc<RefCell<ClassSymbol>>>,
  pub classes: IndexMap<String, Rc<RefCell<ClassSymbol>>>,
  pub global_offsets_size: u32,
  pub errors: ErrorCollector,
}

struct Collector {
  scope_by_node: HashMap<NodeId, Rc<RefCell<Scope>>>,
  function_by_node: HashMap<NodeId, Rc<RefCell<FunctionSymbol>>>,
  class_by_node: HashMap<NodeId, Rc<RefCell<ClassSymbol>>>,
  classes: IndexMap<String, Rc<RefCell<ClassSymbol>>>,
  errors: ErrorCollector,
  fn_stack: Vec<FnCtx>,
  global_offset: u32,
}

#[must_use] pub fn run(program: &Program) -> Pass1Result {
  let global = Scope::root("global");
  let mut c = Collector {
    scope_by_node: HashMap::new(),
    function_by_node: HashMap::new(),
    class_by_node: HashMap::new(),
    classes: IndexMap::new(),
    errors: ErrorCollector::new(),
    fn_stack: Vec::new(),
    global_offset: 0,
  };
  c.scope_by_node.insert(program.id, Rc::clone(&global));
  for stmt in &program.statements {
    c.visit_stmt(stmt, &global);
  }
  c.finalize_inheritance();
  Pass1Result {
    global,
    scope_by_node: c.scope_by_node,
    function_by_node: c.function_by_node,
    class_by_node: c.class_by_node,
    classes: c.classes,
    global_offsets_size: c.global_offset,
    errors: c.errors,
  }
}

impl Collector {
  fn in_function(&self) -> bool { !self.fn_stack.is_empty() }

  /// Declares a plain (non-parameter) variable in `scope`, assigning it a
  /// global or local offset depending on whether we are inside a function.
  fn declare_variable(
    &mut self, scope: &Rc<RefCell<Scope>>, span: Span,
    name: &str, ty: Type, is_const: bool,
  ) {
    let size = ty.size_of();
    let is_global = !self.in_function();
    let offset = if let Some(ctx) = self.fn_stack.last_mut() {
      Some(ctx.next_local_offset(size))
    } else {
      let offset = self.global_offset;
      self.global_offset += size;
      Some(i32::try_from(offset).expect("global data area too large"))
    };
    let sym = VariableSymbol { name: name.to_string(), ty, is_const, initialized: false, offset, is_global, span };
    if !scope.borrow_mut().define(Symbol::Variable(sym)) {
      self.errors.report(span, SemErrorCode::E001, format!("'{name}' is already declared in this scope"));
    }
  }

  fn visit_stmt(&mut self, stmt: &Stmt, scope: &Rc<RefCell<Scope>>) {
    match &stmt.kind {
      StmtKind::VariableDeclaration { identifier, type_annotation, .. } => {
        let ty = type_annotation.as_ref().map_or(Type::Null, resolve_type_annotation);
        self.declare_variable(scope, stmt.span, identifier, ty, false);
      }
      StmtKind::ConstantDeclaration { identifier, type_annotation, .. } => {
        let ty = type_annotation.as_ref().map_or(Type::Null, resolve_type_annotation);
        self.declare_variable(scope, stmt.span, identifier, ty, true);
      }
      StmtKind::FunctionDeclaration { identifier, parameters, return_type, body } => {
        self.declare_function(stmt.id, stmt.span, identifier, parameters, return_type, body, scope, None);
      }
      StmtKind::ClassDeclaration { identifier, base_identifier, members } => {
        self.declare_class(stmt.id, stmt.span, identifier, base_identifier.clone(), members, scope);
      }
      StmtKind::Block(stmts) => {
        let block_scope = Scope::new_child(scope, "block");
        self.scope_by_node.insert(stmt.id, Rc::clone(&block_scope));
        for s in stmts { self.visit_stmt(s, &block_scope); }
      }
      StmtKind::If { then_block, else_block, .. } => {
        self.visit_stmt(then_block, scope);
        if let Some(e) = else_block { self.visit_stmt(e, scope); }
      }
      StmtKind::While { body, .. } | StmtKind::DoWhile { body, .. } => self.visit_stmt(body, scope),
      StmtKind::For { init, body, .. } => {
        let for_scope = Scope::new_child(scope, "for");
        self.scope_by_node.insert(stmt.id, Rc::clone(&for_scope));
        if let Some(init) = init { self.visit_stmt(init, &for_scope); }
        self.visit_stmt(body, &for_scope);
      }
      StmtKind::Foreach { identifier, body, .. } => {
        let loop_scope = Scope::new_child(scope, "foreach");
        self.scope_by_node.insert(stmt.id, Rc::clone(&loop_scope));
        // The element type is not known until Pass 2 resolves `iterable`'s
        // type; Pass 1 declares it provisionally as `null` and Pass 2
        // narrows it (mirroring how an untyped `let` is handled).
        self.declare_variable(&loop_scope, stmt.span, identifier, Type::Null, false);
        self.visit_stmt(body, &loop_scope);
      }
      StmtKind::Switch { cases, default, .. } => {
        for case in cases { for s in &case.body { self.visit_stmt(s, scope); } }
        if let Some(def) = default { for s in def { self.visit_stmt(s, scope); } }
      }
      StmtKind::Break | StmtKind::Continue | StmtKind::Return(_)
      | StmtKind::Print(_) | StmtKind::ExprStmt(_) => {}
    }
  }

  #[allow(clippy::too_many_arguments)]
  fn declare_function(
    &mut self, node_id: NodeId, span: Span, name: &str,
    parameters: &[crate::ast::Param], return_type: &Option<TypeAnnotation>, body: &Stmt,
    scope: &Rc<RefCell<Scope>>, enclosing_class: Option<String>,
  ) {
    let ret = return_type.as_ref().map_or(Type::Null, resolve_type_annotation);
    let param_types: Vec<Type> = parameters.iter()
      .map(|p| p.type_annotation.as_ref().map_or(Type::Null, resolve_type_annotation))
      .collect();
    let label = enclosing_class.as_ref().map_or_else(|| name.to_string(), |c| format!("{c}_{name}"));
    let fn_scope = Scope::new_child(scope, format!("fn:{name}"));
    self.scope_by_node.insert(node_id, Rc::clone(&fn_scope));

    self.fn_stack.push(FnCtx::new());
    let mut param_syms = Vec::with_capacity(parameters.len());
    for (param, ty) in parameters.iter().zip(param_types.iter()) {
      let size = ty.size_of();
      let offset = self.fn_stack.last_mut().expect("just pushed").next_param_offset(size);
      let sym = VariableSymbol {
        name: param.identifier.clone(), ty: ty.clone(), is_const: false,
        initialized: true, offset: Some(offset), is_global: false, span: param.span,
      };
      if !fn_scope.borrow_mut().define(Symbol::Variable(sym.clone())) {
        self.errors.report(param.span, SemErrorCode::E001,
          format!("duplicate parameter '{}'", param.identifier));
      }
      param_syms.push(sym);
    }
    self.visit_stmt(body, &fn_scope);
    let ctx = self.fn_stack.pop().expect("pushed above");

    let func = Rc::new(RefCell::new(FunctionSymbol {
      name: name.to_string(),
      ty: Type::function(param_types, ret),
      params: param_syms,
      label,
      params_size: ctx.params_size(),
      locals_size: ctx.locals_offset,
      frame_size: ctx.params_size() + ctx.locals_offset + 12,
      enclosing_class,
      span,
    }));
    self.function_by_node.insert(node_id, Rc::clone(&func));
    if !scope.borrow_mut().define(Symbol::Function(func)) {
      self.errors.report(span, SemErrorCode::E001, format!("'{name}' is already declared in this scope"));
    }
  }

  fn declare_class(
    &mut self, node_id: NodeId, span: Span, name: &str, base_name: Option<String>,
    members: &[ClassMember], scope: &Rc<RefCell<Scope>>,
  ) {
    let class = Rc::new(RefCell::new(ClassSymbol { span, ..ClassSymbol::new(name, base_name) }));
    self.class_by_node.insert(node_id, Rc::clone(&class));
    self.classes.insert(name.to_string(), Rc::clone(&class));
    if !scope.borrow_mut().define(Symbol::Class(Rc::clone(&class))) {
      self.errors.report(span, SemErrorCode::E001, format!("'{name}' is already declared in this scope"));
    }

    let class_scope = Scope::new_child(scope, format!("class:{name}"));
    self.scope_by_node.insert(node_id, Rc::clone(&class_scope));

    for member in members {
      match member {
        ClassMember::Variable { identifier, type_annotation, span, .. } => {
          let ty = type_annotation.as_ref().map_or(Type::Null, resolve_type_annotation);
          if class.borrow().fields.contains_key(identifier) {
            self.errors.report(*span, SemErrorCode::E001, format!("field '{identifier}' already declared"));
          } else {
            class.borrow_mut().fields.insert(identifier.clone(), ty.clone());
          }
          let sym = VariableSymbol { name: identifier.clone(), ty, is_const: false, initialized: false, offset: None, is_global: false, span: *span };
          class_scope.borrow_mut().define(Symbol::Variable(sym));
        }
        ClassMember::Constant { identifier, type_annotation, span, .. } => {
          let ty = type_annotation.as_ref().map_or(Type::Null, resolve_type_annotation);
          if class.borrow().fields.contains_key(identifier) {
            self.errors.report(*span, SemErrorCode::E001, format!("field '{identifier}' already declared"));
          } else {
            class.borrow_mut().fields.insert(identifier.clone(), ty.clone());
          }
          let sym = VariableSymbol { name: identifier.clone(), ty, is_const: true, initialized: true, offset: None, is_global: false, span: *span };
          class_scope.borrow_mut().define(Symbol::Variable(sym));
        }
        ClassMember::Function { identifier, parameters, return_type, body, span } => {
          // `constructor` is not registered in the method map (it is
          // never inherited), but it is still declared in the class scope
          // so the TAC generator can find it by name.
          let param_types: Vec<Type> = parameters.iter()
            .map(|p| p.type_annotation.as_ref().map_or(Type::Null, resolve_type_annotation))
            .collect();
          if identifier != "constructor" {
            let ret = return_type.as_ref().map_or(Type::Null, resolve_type_annotation);
            class.borrow_mut().methods.insert(identifier.clone(), Type::function(param_types, ret));
          }
          // Re-use declare_function for scope/offset bookkeeping; it also
          // inserts the FunctionSymbol into `class_scope` under its own name.
          self.declare_function(
            synthetic_member_node_id(node_id, identifier),
            *span, identifier, parameters, return_type, body, &class_scope, Some(name.to_string()),
          );
        }
      }
    }
  }

  /// Three-color DFS over the class graph, merging each base's
  /// fields/methods into its descendants in base-before-derived order, and
  /// reporting `E051`/`E052`/`E053`/`E054`.
  fn finalize_inheritance(&mut self) {
    #[derive(Clone, Copy, PartialEq)]
    enum Color { New, Running, Done }
    let mut colors: HashMap<String, Color> = self.classes.keys().map(|k| (k.clone(), Color::New)).collect();

    fn visit(
      name: &str, classes: &IndexMap<String, Rc<RefCell<ClassSymbol>>>,
      colors: &mut HashMap<String, Color>, errors: &mut ErrorCollector,
    ) {
      match colors.get(name) {
        Some(Color::Done) | None => return,
        Some(Color::Running) => {
          let span = classes.get(name).map_or(Span::synthetic(), |c| c.borrow().span);
          errors.report(span, SemErrorCode::E052, format!("cyclic inheritance involving '{name}'"));
          colors.insert(name.to_string(), Color::Done);
          return;
        }
        Some(Color::New) => {}
      }
      colors.insert(name.to_string(), Color::Running);
      let Some(class) = classes.get(name) else { return };
      let base_name = class.borrow().base_name.clone();
      if let Some(base_name) = base_name {
        let Some(base) = classes.get(&base_name).cloned() else {
          let span = class.borrow().span;
          errors.report(span, SemErrorCode::E051, format!("base class '{base_name}' is not declared"));
          colors.insert(name.to_string(), Color::Done);
          return;
        };
        visit(&base_name, classes, colors, errors);
        class.borrow_mut().base = Some(Rc::clone(&base));
        merge(class, &base, errors);
      }
      colors.insert(name.to_string(), Color::Done);
    }

    fn merge(derived: &Rc<RefCell<ClassSymbol>>, base: &Rc<RefCell<ClassSymbol>>, errors: &mut ErrorCollector) {
      let base = base.borrow();
      let span = derived.borrow().span;
      for (method_name, base_ty) in &base.methods {
        let mut derived_mut = derived.borrow_mut();
        match derived_mut.methods.get(method_name) {
          Some(derived_ty) => {
            if !signature_compatible(derived_ty, base_ty) {
              errors.report(span, SemErrorCode::E053,
                format!("method '{method_name}' overrides '{}' with an incompatible signature", base.name));
            }
          }
          None => { derived_mut.methods.insert(method_name.clone(), base_ty.clone()); }
        }
      }
      // Base-subobject fields occupy the lowest offsets, as in a
      // conventional single-inheritance layout: rebuild the map with the
      // (already-finalized) base fields first, then re-add this class's
      // own fields, flagging any that collide with an inherited name.
      {
        let mut derived_mut = derived.borrow_mut();
        let own_fields = std::mem::take(&mut derived_mut.fields);
        for (field_name, field_ty) in &base.fields {
          derived_mut.fields.insert(field_name.clone(), field_ty.clone());
        }
        for (field_name, field_ty) in own_fields {
          if derived_mut.fields.contains_key(&field_name) {
            errors.report(span, SemErrorCode::E054,
              format!("field '{field_name}' collides with an inherited field from '{}'", base.name));
          } else {
            derived_mut.fields.insert(field_name, field_ty);
          }
        }
      }
    }

    fn signature_compatible(a: &Type, b: &Type) -> bool {
      let (Some((ap, ar)), Some((bp, br))) = (a.as_function(), b.as_function()) else { return false };
      ap.len() == bp.len() && ar == br && ap.iter().zip(bp).all(|(x, y)| x == y)
    }

    for name in self.classes.keys().cloned().collect::<Vec<_>>() {
      visit(&name, &self.classes, &mut colors, &mut self.errors);
    }

    // Finalize instance sizes over the merged, declaration-ordered field maps.
    for class in self.classes.values() {
      let size = class.borrow().fields.values().map(Type::size_of).sum();
      class.borrow_mut().instance_size = Some(size);
    }
  }
}

/// Methods don't have their own `Stmt` node in the AST (`ClassMember` is a
/// separate enum), but `function_by_node`/`scope_by_node` are keyed on
/// `NodeId`. We mint a stable synthetic id, deterministic in the class's own
/// node id plus the method name, so repeated Pass 1 runs over the same AST
/// produce the same keys without needing a second id allocator.
pub(crate) fn synthetic_member_node_id(class_node: NodeId, method_name: &str) -> NodeId {
  use std::hash::{Hash, Hasher};
  let mut hasher = std::collections::hash_map::DefaultHasher::new();
  class_node.hash(&mut hasher);
  method_name.hash(&mut hasher);
  // Keep well clear of the parser's own id range by setting the high bit.
  crate::ast::NodeId(0x8000_0000 | (hasher.finish() as u32 & 0x7fff_ffff))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ast::{AstBuilder, TypeAnnotation};

  fn int_ty() -> TypeAnnotation { TypeAnnotation::new("integer", 0) }

  #[test]
  fn globals_get_increasing_positive_offsets() {
    let mut b = AstBuilder::new();
    let s1 = Span::new(1, 1);
    let five = b.int(s1, 5);
    let v1 = b.var_decl(s1, "a", Some(int_ty()), Some(five));
    let seven = b.int(s1, 7);
    let v2 = b.var_decl(s1, "b", Some(int_ty()), Some(seven));
    let program = b.program(vec![v1, v2]);
    let result = run(&program);
    assert!(!result.errors.has_errors());
    let a = crate::symtab::resolve(&result.global, "a").unwrap();
    let b_sym = crate::symtab::resolve(&result.global, "b").unwrap();
    assert_eq!(a.as_variable().unwrap().offset, Some(0));
    assert_eq!(b_sym.as_variable().unwrap().offset, Some(4));
  }

  #[test]
  fn function_frame_equation_holds() {
    let mut b = AstBuilder::new();
    let s = Span::new(1, 1);
    let params = vec![
      crate::ast::Param { identifier: "a".into(), type_annotation: Some(int_ty()), span: s },
      crate::ast::Param { identifier: "b".into(), type_annotation: Some(int_ty()), span: s },
    ];
    let local_init = b.int(s, 0);
    let local = b.var_decl(s, "c", Some(int_ty()), Some(local_init));
    let body = b.block(s, vec![local]);
    let func = b.func_decl(s, "f", params, Some(int_ty()), body);
    let program = b.program(vec![func]);
    let result = run(&program);
    assert!(!result.errors.has_errors());
    let sym = crate::symtab::resolve(&result.global, "f").unwrap();
    let f = sym.as_function().unwrap();
    let f = f.borrow();
    assert_eq!(f.params_size, 4); // two 4-byte params: offsets -4, -8 => |−8|−4=4
    assert_eq!(f.locals_size, 4);
    assert_eq!(f.frame_size, f.params_size + f.locals_size + 12);
  }

  #[test]
  fn redeclaration_in_same_scope_is_e001() {
    let mut b = AstBuilder::new();
    let s = Span::new(2, 3);
    let init_a = b.int(s, 1);
    let v1 = b.var_decl(s, "x", Some(int_ty()), Some(init_a));
    let init_b = b.int(s, 2);
    let v2 = b.var_decl(s, "x", Some(int_ty()), Some(init_b));
    let program = b.program(vec![v1, v2]);
    let result = run(&program);
    assert!(result.errors.errors().iter().any(|e| e.code == SemErrorCode::E001));
  }

  #[test]
  fn cyclic_inheritance_is_e052() {
    let mut b = AstBuilder::new();
    let s = Span::new(1, 1);
    let class_a = b.class_decl(s, "A", Some("B".into()), vec![]);
    let class_b = b.class_decl(s, "B", Some("A".into()), vec![]);
    let program = b.program(vec![class_a, class_b]);
    let result = run(&program);
    assert!(result.errors.errors().iter().any(|e| e.code == SemErrorCode::E052));
  }

  #[test]
  fn unknown_base_class_is_e051() {
    let mut b = AstBuilder::new();
    let s = Span::new(1, 1);
    let class_a = b.class_decl(s, "A", Some("Missing".into()), vec![]);
    let program = b.program(vec![class_a]);
    let result = run(&program);
    assert!(result.errors.errors().iter().any(|e| e.code == SemErrorCode::E051));
  }

  #[test]
  fn field_collision_with_base_is_e054() {
    let int_field = |b: &mut AstBuilder, s: Span| ClassMember::Variable {
      identifier: "x".into(), type_annotation: Some(int_ty()), initializer: None, span: s,
    };
    let mut b = AstBuilder::new();
    let s = Span::new(1, 1);
    let base = b.class_decl(s, "A", None, vec![int_field(&mut b, s)]);
    let derived = b.class_decl(s, "B", Some("A".into()), vec![int_field(&mut b, s)]);
    let program = b.program(vec![base, derived]);
    let result = run(&program);
    assert!(result.errors.errors().iter().any(|e| e.code == SemErrorCode::E054));
  }

  #[test]
  fn override_with_mismatched_parameter_type_is_e053() {
    let method = |b: &mut AstBuilder, s: Span, param_ty: TypeAnnotation| ClassMember::Function {
      identifier: "f".into(),
      parameters: vec![crate::ast::Param { identifier: "a".into(), type_annotation: Some(param_ty), span: s }],
      return_type: Some(int_ty()),
      body: Box::new(b.block(s, vec![b.return_stmt(s, Some(b.int(s, 1)))])),
      span: s,
    };
    let mut b = AstBuilder::new();
    let s = Span::new(1, 1);
    let base_method = method(&mut b, s, TypeAnnotation::new("string", 0));
    let base = b.class_decl(s, "A", None, vec![base_method]);
    let derived_method = method(&mut b, s, int_ty());
    let derived = b.class_decl(s, "B", Some("A".into()), vec![derived_method]);
    let program = b.program(vec![base, derived]);
    let result = run(&program);
    assert!(result.errors.errors().iter().any(|e| e.code == SemErrorCode::E053));
  }

  #[test]
  fn instance_size_sums_merged_fields_in_declaration_order() {
    let base_field = |name: &str, s: Span| ClassMember::Variable {
      identifier: name.into(), type_annotation: Some(int_ty()), initializer: None, span: s,
    };
    let mut b = AstBuilder::new();
    let s = Span::new(1, 1);
    let base = b.class_decl(s, "A", None, vec![base_field("x", s)]);
    let derived = b.class_decl(s, "B", Some("A".into()), vec![base_field("y", s)]);
    let program = b.program(vec![base, derived]);
    let result = run(&program);
    let class_b = result.classes.get("B").unwrap();
    assert_eq!(class_b.borrow().field_offset("x"), Some(0));
    assert_eq!(class_b.borrow().field_offset("y"), Some(4));
    assert_eq!(class_b.borrow().instance_size, Some(8));
  }
}
