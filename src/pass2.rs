//! Pass 2 — the type checker: a second AST walk, re-entering the scopes
//! Pass 1 built, that infers every expression's type, narrows `let`
//! declarations that had no annotation, and checks every typing rule.
//!
//! Where Pass 1 fixes *layout* (offsets, inheritance), Pass 2 fixes
//! *meaning*: it never allocates a new scope, symbol, or offset, only reads
//! and occasionally narrows what is already there (a `let` with no
//! annotation, or a `foreach` loop variable, both declared as `null` by
//! Pass 1 until their real type is known).

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::ast::{
  AddOp, ClassMember, Expr, ExprKind, MulOp, NodeId, Program, Stmt, StmtKind, SwitchCase, UnOp,
};
use crate::errors::{ErrorCollector, SemErrorCode as E};
use crate::pass1::{synthetic_member_node_id, Pass1Result};
use crate::span::Span;
use crate::symtab::{Scope, Symbol, VariableSymbol};
use crate::types::Type;

pub struct Pass2Result {
  pub type_by_node: HashMap<NodeId, Type>,
  pub errors: ErrorCollector,
}

#[must_use] pub fn run(program: &Program, p1: &Pass1Result) -> Pass2Result {
  let class_scopes: HashMap<String, Rc<RefCell<Scope>>> = p1.class_by_node.iter()
    .filter_map(|(node_id, class)| {
      p1.scope_by_node.get(node_id).map(|scope| (class.borrow().name.clone(), Rc::clone(scope)))
    })
    .collect();

  let mut checker = Checker {
    p1,
    class_scopes,
    type_by_node: HashMap::new(),
    errors: ErrorCollector::new(),
    function_return_stack: Vec::new(),
    loop_depth: 0,
    switch_depth: 0,
    current_class_stack: Vec::new(),
  };
  for stmt in &program.statements {
    checker.check_stmt(stmt, &p1.global);
  }
  Pass2Result { type_by_node: checker.type_by_node, errors: checker.errors }
}

#[derive(Clone, PartialEq, Eq, Hash)]
enum LiteralKey {
  Int(i64),
  Str(String),
  Bool(bool),
}

fn literal_key(expr: &Expr) -> Option<LiteralKey> {
  match &expr.kind {
    ExprKind::IntLiteral(n) => Some(LiteralKey::Int(*n)),
    ExprKind::StringLiteral(s) => Some(LiteralKey::Str(s.clone())),
    ExprKind::BoolLiteral(b) => Some(LiteralKey::Bool(*b)),
    _ => None,
  }
}

/// A statement returns on every path iff it is a `return`, a block
/// containing at least one statement that returns on every path, or an
/// `if`/`else` whose both branches do. Loops and `switch` are conservatively
/// never considered exhaustive, since their bodies may not execute at all.
fn stmt_returns(stmt: &Stmt) -> bool {
  match &stmt.kind {
    StmtKind::Return(_) => true,
    StmtKind::Block(stmts) => stmts.iter().any(stmt_returns),
    StmtKind::If { then_block, else_block: Some(else_block), .. } => {
      stmt_returns(then_block) && stmt_returns(else_block)
    }
    _ => false,
  }
}

struct Checker<'a> {
  p1: &'a Pass1Result,
  class_scopes: HashMap<String, Rc<RefCell<Scope>>>,
  type_by_node: HashMap<NodeId, Type>,
  errors: ErrorCollector,
  function_return_stack: Vec<Type>,
  loop_depth: u32,
  switch_depth: u32,
  current_class_stack: Vec<String>,
}

impl<'a> Checker<'a> {
  fn scope_for(&self, node: NodeId, fallback: &Rc<RefCell<Scope>>) -> Rc<RefCell<Scope>> {
    self.p1.scope_by_node.get(&node).cloned().unwrap_or_else(|| Rc::clone(fallback))
  }

  fn mark_initialized(&self, scope: &Rc<RefCell<Scope>>, name: &str) {
    let mut cur = Rc::clone(scope);
    loop {
      let found = {
        let mut s = cur.borrow_mut();
        if let Some(Symbol::Variable(v)) = s.symbols.get_mut(name) { v.initialized = true; true } else { false }
      };
      if found { return; }
      let parent = cur.borrow().parent.clone();
      match parent { Some(p) => cur = p, None => return }
    }
  }

  fn check_stmt(&mut self, stmt: &Stmt, scope: &Rc<RefCell<Scope>>) {
    match &stmt.kind {
      StmtKind::VariableDeclaration { identifier, type_annotation, initializer } => {
        let init_ty = initializer.as_ref().map(|e| self.check_expr(e, scope));
        let declared = type_annotation.as_ref().map(|a| Type::from_text(&a.name, a.array_dims));
        if let (Some(d), Some(it)) = (&declared, &init_ty) {
          if !it.assignable(d) {
            self.errors.report(stmt.span, E::E004, format!("cannot initialize '{identifier}' of type {d} with a value of type {it}"));
          }
        }
        let resolved = declared.or(init_ty);
        let mut scope_mut = scope.borrow_mut();
        if let Some(sym) = scope_mut.symbols.get_mut(identifier).and_then(Symbol::as_variable_mut) {
          if let Some(ty) = resolved { sym.ty = ty; }
          sym.initialized = initializer.is_some();
        }
      }
      StmtKind::ConstantDeclaration { identifier, type_annotation, expression } => {
        let expr_ty = self.check_expr(expression, scope);
        let declared = type_annotation.as_ref().map(|a| Type::from_text(&a.name, a.array_dims));
        if let Some(d) = &declared {
          if !expr_ty.assignable(d) {
            self.errors.report(stmt.span, E::E004, format!("cannot initialize const '{identifier}' of type {d} with a value of type {expr_ty}"));
          }
        }
        let mut scope_mut = scope.borrow_mut();
        if let Some(sym) = scope_mut.symbols.get_mut(identifier).and_then(Symbol::as_variable_mut) {
          sym.ty = declared.unwrap_or(expr_ty);
          sym.initialized = true;
        }
      }
      StmtKind::FunctionDeclaration { body, .. } => {
        let func = self.p1.function_by_node.get(&stmt.id).cloned();
        let fn_scope = self.scope_for(stmt.id, scope);
        if let Some(func) = func {
          let ret_ty = func.borrow().return_type().clone();
          self.function_return_stack.push(ret_ty.clone());
          self.check_stmt(body, &fn_scope);
          self.function_return_stack.pop();
          if !ret_ty.is_null() && !stmt_returns(body) {
            self.errors.report(stmt.span, E::E015, "function does not return a value on every path");
          }
        }
      }
      StmtKind::ClassDeclaration { identifier, members, .. } => {
        self.check_class_body(stmt.id, identifier, members);
      }
      StmtKind::Block(stmts) => {
        let block_scope = self.scope_for(stmt.id, scope);
        for s in stmts { self.check_stmt(s, &block_scope); }
      }
      StmtKind::If { condition, then_block, else_block } => {
        let ty = self.check_expr(condition, scope);
        if !ty.is_boolean() {
          self.errors.report(condition.span, E::E040, format!("condition must be boolean, found {ty}"));
        }
        self.check_stmt(then_block, scope);
        if let Some(e) = else_block { self.check_stmt(e, scope); }
      }
      StmtKind::While { condition, body } => {
        let ty = self.check_expr(condition, scope);
        if !ty.is_boolean() {
          self.errors.report(condition.span, E::E040, format!("condition must be boolean, found {ty}"));
        }
        self.loop_depth += 1;
        self.check_stmt(body, scope);
        self.loop_depth -= 1;
      }
      StmtKind::DoWhile { body, condition } => {
        self.loop_depth += 1;
        self.check_stmt(body, scope);
        self.loop_depth -= 1;
        let ty = self.check_expr(condition, scope);
        if !ty.is_boolean() {
          self.errors.report(condition.span, E::E040, format!("condition must be boolean, found {ty}"));
        }
      }
      StmtKind::For { init, condition, update, body } => {
        let for_scope = self.scope_for(stmt.id, scope);
        if let Some(init) = init { self.check_stmt(init, &for_scope); }
        if let Some(c) = condition {
          let ty = self.check_expr(c, &for_scope);
          if !ty.is_boolean() {
            self.errors.report(c.span, E::E040, format!("condition must be boolean, found {ty}"));
          }
        }
        if let Some(u) = update { self.check_expr(u, &for_scope); }
        self.loop_depth += 1;
        self.check_stmt(body, &for_scope);
        self.loop_depth -= 1;
      }
      StmtKind::Foreach { identifier, iterable, body } => {
        let loop_scope = self.scope_for(stmt.id, scope);
        let iter_ty = self.check_expr(iterable, scope);
        let elem = match iter_ty.as_array_elem() {
          Some(e) => e.clone(),
          None => {
            self.errors.report(iterable.span, E::E032, format!("foreach target must be an array, found {iter_ty}"));
            Type::Null
          }
        };
        {
          let mut scope_mut = loop_scope.borrow_mut();
          if let Some(sym) = scope_mut.symbols.get_mut(identifier).and_then(Symbol::as_variable_mut) {
            sym.ty = elem;
            sym.initialized = true;
          }
        }
        self.loop_depth += 1;
        self.check_stmt(body, &loop_scope);
        self.loop_depth -= 1;
      }
      StmtKind::Switch { selector, cases, default } => {
        let sel_ty = self.check_expr(selector, scope);
        let mut seen = HashSet::new();
        for case in cases {
          self.check_switch_case(case, &sel_ty, scope, &mut seen);
        }
        if let Some(def) = default {
          self.switch_depth += 1;
          for s in def { self.check_stmt(s, scope); }
          self.switch_depth -= 1;
        }
      }
      StmtKind::Break => {
        if self.loop_depth == 0 && self.switch_depth == 0 {
          self.errors.report(stmt.span, E::E041, "'break' outside a loop or switch");
        }
      }
      StmtKind::Continue => {
        if self.loop_depth == 0 {
          self.errors.report(stmt.span, E::E042, "'continue' outside a loop");
        }
      }
      StmtKind::Return(value) => self.check_return(stmt.span, value.as_ref(), scope),
      StmtKind::Print(e) | StmtKind::ExprStmt(e) => { self.check_expr(e, scope); }
    }
  }

  fn check_switch_case(
    &mut self, case: &SwitchCase, sel_ty: &Type, scope: &Rc<RefCell<Scope>>, seen: &mut HashSet<LiteralKey>,
  ) {
    let case_ty = self.check_expr(&case.selector, scope);
    if !case_ty.eq_compatible(sel_ty) {
      self.errors.report(case.selector.span, E::E060, format!("case type {case_ty} incompatible with switch selector type {sel_ty}"));
    }
    if let Some(key) = literal_key(&case.selector) {
      if !seen.insert(key) {
        self.errors.report(case.selector.span, E::E061, "duplicate case value");
      }
    }
    self.switch_depth += 1;
    for s in &case.body { self.check_stmt(s, scope); }
    self.switch_depth -= 1;
  }

  fn check_return(&mut self, span: Span, value: Option<&Expr>, scope: &Rc<RefCell<Scope>>) {
    let Some(expected) = self.function_return_stack.last().cloned() else {
      self.errors.report(span, E::E014, "'return' outside a function");
      if let Some(v) = value { self.check_expr(v, scope); }
      return;
    };
    match (value, expected.is_null()) {
      (Some(v), true) => {
        self.check_expr(v, scope);
        self.errors.report(span, E::E012, "function has no return type but a value was returned");
      }
      (Some(v), false) => {
        let ty = self.check_expr(v, scope);
        if !ty.assignable(&expected) {
          self.errors.report(v.span, E::E012, format!("returned {ty}, expected {expected}"));
        }
      }
      (None, true) => {}
      (None, false) => {
        self.errors.report(span, E::E013, format!("missing return value of type {expected}"));
      }
    }
  }

  fn check_class_body(&mut self, class_node: NodeId, class_name: &str, members: &[ClassMember]) {
    if !self.p1.scope_by_node.contains_key(&class_node) { return; }
    self.current_class_stack.push(class_name.to_string());
    for member in members {
      if let ClassMember::Function { body, span, .. } = member {
        let node_id = synthetic_member_node_id(class_node, member.name());
        let func = self.p1.function_by_node.get(&node_id).cloned();
        let fn_scope = self.p1.scope_by_node.get(&node_id).cloned();
        if let (Some(func), Some(fn_scope)) = (func, fn_scope) {
          self.define_this(&fn_scope, class_name, *span);
          let ret_ty = func.borrow().return_type().clone();
          self.function_return_stack.push(ret_ty.clone());
          self.check_stmt(body, &fn_scope);
          self.function_return_stack.pop();
          if !ret_ty.is_null() && !stmt_returns(body) {
            self.errors.report(*span, E::E015, "method does not return a value on every path");
          }
        }
      }
    }
    self.current_class_stack.pop();
  }

  fn define_this(&self, fn_scope: &Rc<RefCell<Scope>>, class_name: &str, span: Span) {
    let this_sym = VariableSymbol {
      name: "this".into(), ty: Type::class(class_name), is_const: true,
      initialized: true, offset: Some(8), is_global: false, span,
    };
    fn_scope.borrow_mut().define(Symbol::Variable(this_sym));
  }

  fn check_expr(&mut self, expr: &Expr, scope: &Rc<RefCell<Scope>>) -> Type {
    let ty = self.infer(expr, scope);
    self.type_by_node.insert(expr.id, ty.clone());
    ty
  }

  fn infer(&mut self, expr: &Expr, scope: &Rc<RefCell<Scope>>) -> Type {
    match &expr.kind {
      ExprKind::IntLiteral(_) => Type::Integer,
      ExprKind::StringLiteral(_) => Type::String,
      ExprKind::BoolLiteral(_) => Type::Boolean,
      ExprKind::NullLiteral => Type::Null,
      ExprKind::Identifier(name) => match crate::symtab::resolve(scope, name) {
        Some(Symbol::Variable(v)) => v.ty,
        Some(Symbol::Function(f)) => f.borrow().ty.clone(),
        Some(Symbol::Class(c)) => Type::class(c.borrow().name.clone()),
        None => {
          self.errors.report(expr.span, E::E002, format!("'{name}' is not declared"));
          Type::Null
        }
      },
      ExprKind::This => {
        if let Some(name) = self.current_class_stack.last() {
          Type::class(name.clone())
        } else {
          self.errors.report(expr.span, E::E043, "'this' used outside a method");
          Type::Null
        }
      }
      ExprKind::ArrayLiteral(elems) => {
        let tys: Vec<Type> = elems.iter().map(|e| self.check_expr(e, scope)).collect();
        match tys.split_first() {
          None => Type::array(Type::Null),
          Some((first, rest)) => {
            for t in rest {
              if !t.eq_compatible(first) {
                self.errors.report(expr.span, E::E011, "array literal elements have incompatible types");
              }
            }
            Type::array(first.clone())
          }
        }
      }
      ExprKind::Parenthesized(inner) => self.check_expr(inner, scope),
      ExprKind::Unary { op, expr: inner } => {
        let t = self.check_expr(inner, scope);
        match op {
          UnOp::Neg => {
            if !t.is_integer() { self.errors.report(expr.span, E::E010, format!("unary '-' requires integer, found {t}")); }
            Type::Integer
          }
          UnOp::Not => {
            if !t.is_boolean() { self.errors.report(expr.span, E::E010, format!("unary '!' requires boolean, found {t}")); }
            Type::Boolean
          }
        }
      }
      ExprKind::Additive { op, left, right } => {
        let l = self.check_expr(left, scope);
        let r = self.check_expr(right, scope);
        match op {
          AddOp::Add if l == Type::String && r == Type::String => Type::String,
          AddOp::Add if l.is_integer() && r.is_integer() => Type::Integer,
          AddOp::Add => {
            self.errors.report(expr.span, E::E010, format!("'+' is not defined for {l} and {r}"));
            Type::Integer
          }
          AddOp::Sub => {
            if !(l.is_integer() && r.is_integer()) {
              self.errors.report(expr.span, E::E010, format!("'-' requires integers, found {l} and {r}"));
            }
            Type::Integer
          }
        }
      }
      ExprKind::Multiplicative { op, left, right } => {
        let l = self.check_expr(left, scope);
        let r = self.check_expr(right, scope);
        if !(l.is_integer() && r.is_integer()) {
          let sym = match op { MulOp::Mul => "*", MulOp::Div => "/", MulOp::Mod => "%" };
          self.errors.report(expr.span, E::E010, format!("'{sym}' requires integers, found {l} and {r}"));
        }
        Type::Integer
      }
      ExprKind::Relational { op: _, left, right } => {
        let l = self.check_expr(left, scope);
        let r = self.check_expr(right, scope);
        if !(l.is_integer() && r.is_integer()) {
          self.errors.report(expr.span, E::E010, format!("relational comparison requires integers, found {l} and {r}"));
        }
        Type::Boolean
      }
      ExprKind::Equality { op: _, left, right } => {
        let l = self.check_expr(left, scope);
        let r = self.check_expr(right, scope);
        if !l.eq_compatible(&r) {
          self.errors.report(expr.span, E::E010, format!("cannot compare {l} with {r}"));
        }
        Type::Boolean
      }
      ExprKind::LogicalAnd(left, right) | ExprKind::LogicalOr(left, right) => {
        let l = self.check_expr(left, scope);
        let r = self.check_expr(right, scope);
        if !(l.is_boolean() && r.is_boolean()) {
          self.errors.report(expr.span, E::E010, format!("logical operator requires booleans, found {l} and {r}"));
        }
        Type::Boolean
      }
      ExprKind::Ternary { cond, then, els } => {
        let c = self.check_expr(cond, scope);
        if !c.is_boolean() {
          self.errors.report(cond.span, E::E040, format!("ternary condition must be boolean, found {c}"));
        }
        let t = self.check_expr(then, scope);
        let e = self.check_expr(els, scope);
        if t.is_null() { e } else if e.is_null() { t } else if t.assignable(&e) { e } else if e.assignable(&t) {
          t
        } else {
          self.errors.report(expr.span, E::E070, format!("ternary branches have incompatible types {t} and {e}"));
          Type::Null
        }
      }
      ExprKind::Assignment { target, value } => {
        let value_ty = self.check_expr(value, scope);
        let target_ty = self.check_assignment_target(target, scope);
        if !target_ty.is_null() && !value_ty.assignable(&target_ty) {
          self.errors.report(expr.span, E::E004, format!("cannot assign {value_ty} to {target_ty}"));
        }
        target_ty
      }
      ExprKind::Index { base, index } => {
        let base_ty = self.check_expr(base, scope);
        let index_ty = self.check_expr(index, scope);
        if !index_ty.is_integer() {
          self.errors.report(index.span, E::E030, format!("array index must be an integer, found {index_ty}"));
        }
        match base_ty.as_array_elem() {
          Some(e) => e.clone(),
          None => {
            self.errors.report(base.span, E::E031, format!("cannot index non-array value of type {base_ty}"));
            Type::Null
          }
        }
      }
      ExprKind::Property { base, name } => {
        let base_ty = self.check_expr(base, scope);
        self.resolve_field_type(expr.span, &base_ty, name)
      }
      ExprKind::New { class_name, args } => self.check_new(expr.span, class_name, args, scope),
      ExprKind::Call { callee, args } => self.check_call(expr.span, callee, args, scope),
    }
  }

  fn check_assignment_target(&mut self, target: &Expr, scope: &Rc<RefCell<Scope>>) -> Type {
    match &target.kind {
      ExprKind::Identifier(name) => match crate::symtab::resolve(scope, name) {
        None => {
          self.errors.report(target.span, E::E002, format!("'{name}' is not declared"));
          Type::Null
        }
        Some(Symbol::Variable(v)) => {
          if v.is_const && v.initialized {
            self.errors.report(target.span, E::E005, format!("cannot assign to const '{name}'"));
          }
          self.mark_initialized(scope, name);
          v.ty
        }
        Some(_) => {
          self.errors.report(target.span, E::E006, format!("'{name}' is not assignable"));
          Type::Null
        }
      },
      ExprKind::Property { base, name } => {
        let base_ty = self.check_expr(base, scope);
        self.resolve_field_type(target.span, &base_ty, name)
      }
      ExprKind::Index { base, index } => {
        let base_ty = self.check_expr(base, scope);
        let index_ty = self.check_expr(index, scope);
        if !index_ty.is_integer() {
          self.errors.report(index.span, E::E030, format!("array index must be an integer, found {index_ty}"));
        }
        match base_ty.as_array_elem() {
          Some(e) => e.clone(),
          None => {
            self.errors.report(base.span, E::E031, format!("cannot index non-array value of type {base_ty}"));
            Type::Null
          }
        }
      }
      _ => {
        self.errors.report(target.span, E::E006, "invalid assignment target");
        Type::Null
      }
    }
  }

  fn resolve_field_type(&mut self, span: Span, base_ty: &Type, name: &str) -> Type {
    if let Some(cn) = base_ty.as_class_name() {
      match self.p1.classes.get(cn) {
        Some(class) => {
          let class = class.borrow();
          if let Some(t) = class.fields.get(name) { t.clone() }
          else if let Some(t) = class.methods.get(name) { t.clone() }
          else {
            self.errors.report(span, E::E034, format!("class '{cn}' has no member '{name}'"));
            Type::Null
          }
        }
        None => {
          self.errors.report(span, E::E033, format!("unknown class '{cn}'"));
          Type::Null
        }
      }
    } else if base_ty.is_array() && name == "length" {
      Type::Integer
    } else {
      self.errors.report(span, E::E033, format!("cannot access property '{name}' on non-object value of type {base_ty}"));
      Type::Null
    }
  }

  fn check_arity_types(&mut self, span: Span, params: &[Type], args: &[Type]) {
    if params.len() != args.len() {
      self.errors.report(span, E::E021, format!("expected {} argument(s), got {}", params.len(), args.len()));
      return;
    }
    for (p, a) in params.iter().zip(args) {
      if !a.assignable(p) {
        self.errors.report(span, E::E022, format!("argument of type {a} is not assignable to parameter of type {p}"));
      }
    }
  }

  fn check_call(&mut self, span: Span, callee: &Expr, args: &[Expr], scope: &Rc<RefCell<Scope>>) -> Type {
    let arg_tys: Vec<Type> = args.iter().map(|a| self.check_expr(a, scope)).collect();
    match &callee.kind {
      ExprKind::Identifier(name) => match crate::symtab::resolve(scope, name) {
        Some(Symbol::Function(f)) => {
          let f = f.borrow();
          self.check_arity_types(span, f.param_types(), &arg_tys);
          f.return_type().clone()
        }
        Some(Symbol::Variable(v)) => {
          if let Some((params, ret)) = v.ty.as_function() {
            self.check_arity_types(span, params, &arg_tys);
            ret.clone()
          } else {
            self.errors.report(callee.span, E::E020, format!("'{name}' is not callable"));
            Type::Null
          }
        }
        Some(Symbol::Class(_)) => {
          self.errors.report(callee.span, E::E020, format!("'{name}' is a class, not a function; use 'new {name}(...)'"));
          Type::Null
        }
        None => {
          self.errors.report(callee.span, E::E002, format!("'{name}' is not declared"));
          Type::Null
        }
      },
      ExprKind::Property { base, name } => {
        let base_ty = self.check_expr(base, scope);
        if base_ty.is_integer() && name == "toString" && args.is_empty() {
          return Type::String;
        }
        match base_ty.as_class_name() {
          Some(cn) => match self.p1.classes.get(cn).cloned() {
            Some(class) => {
              let method_ty = class.borrow().methods.get(name).cloned();
              match method_ty {
                Some(mty) => {
                  let (params, ret) = mty.as_function().expect("class methods are always function-typed");
                  let params = params.to_vec();
                  let ret = ret.clone();
                  self.check_arity_types(span, &params, &arg_tys);
                  ret
                }
                None => {
                  self.errors.report(span, E::E034, format!("class '{cn}' has no method '{name}'"));
                  Type::Null
                }
              }
            }
            None => {
              self.errors.report(span, E::E033, format!("unknown class '{cn}'"));
              Type::Null
            }
          },
          None => {
            self.errors.report(span, E::E033, format!("cannot call a method on non-object value of type {base_ty}"));
            Type::Null
          }
        }
      }
      _ => {
        let callee_ty = self.check_expr(callee, scope);
        match callee_ty.as_function() {
          Some((params, ret)) => {
            let params = params.to_vec();
            let ret = ret.clone();
            self.check_arity_types(span, &params, &arg_tys);
            ret
          }
          None => {
            self.errors.report(span, E::E020, format!("cannot call a value of type {callee_ty}"));
            Type::Null
          }
        }
      }
    }
  }

  fn check_new(&mut self, span: Span, class_name: &str, args: &[Expr], scope: &Rc<RefCell<Scope>>) -> Type {
    let arg_tys: Vec<Type> = args.iter().map(|a| self.check_expr(a, scope)).collect();
    if !self.p1.classes.contains_key(class_name) {
      self.errors.report(span, E::E037, format!("class '{class_name}' is not declared"));
      return Type::Null;
    }
    if let Some(ctor_scope) = self.class_scopes.get(class_name).cloned() {
      let ctor = ctor_scope.borrow().symbols.get("constructor").cloned();
      match ctor {
        Some(Symbol::Function(f)) => {
          let f = f.borrow();
          self.check_arity_types(span, f.param_types(), &arg_tys);
        }
        _ if !arg_tys.is_empty() => {
          self.errors.report(span, E::E021, format!("class '{class_name}' has no constructor but arguments were given"));
        }
        _ => {}
      }
    }
    Type::class(class_name)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ast::{AstBuilder, TypeAnnotation};

  fn int_ty() -> TypeAnnotation { TypeAnnotation::new("integer", 0) }

  #[test]
  fn inferred_let_takes_initializer_type() {
    let mut b = AstBuilder::new();
    let s = Span::new(1, 1);
    let five = b.int(s, 5);
    let decl = b.var_decl(s, "x", None, Some(five));
    let program = b.program(vec![decl]);
    let p1 = crate::pass1::run(&program);
    let p2 = run(&program, &p1);
    assert!(!p2.errors.has_errors());
    let sym = crate::symtab::resolve(&p1.global, "x").unwrap();
    assert_eq!(sym.as_variable().unwrap().ty, Type::Integer);
  }

  #[test]
  fn assigning_mismatched_type_is_e004() {
    let mut b = AstBuilder::new();
    let s = Span::new(1, 1);
    let zero = b.int(s, 0);
    let decl = b.var_decl(s, "x", Some(int_ty()), Some(zero));
    let target = b.ident(s, "x");
    let rhs = b.string(s, "nope");
    let assign_expr = b.assign(s, target, rhs);
    let assign = b.expr_stmt(s, assign_expr);
    let program = b.program(vec![decl, assign]);
    let p1 = crate::pass1::run(&program);
    let p2 = run(&program, &p1);
    assert!(p2.errors.errors().iter().any(|e| e.code == E::E004));
  }

  #[test]
  fn reassigning_const_is_e005() {
    let mut b = AstBuilder::new();
    let s = Span::new(1, 1);
    let one = b.int(s, 1);
    let decl = b.const_decl(s, "k", Some(int_ty()), one);
    let target = b.ident(s, "k");
    let two = b.int(s, 2);
    let assign_expr = b.assign(s, target, two);
    let assign = b.expr_stmt(s, assign_expr);
    let program = b.program(vec![decl, assign]);
    let p1 = crate::pass1::run(&program);
    let p2 = run(&program, &p1);
    assert!(p2.errors.errors().iter().any(|e| e.code == E::E005));
  }

  #[test]
  fn non_boolean_if_condition_is_e040() {
    let mut b = AstBuilder::new();
    let s = Span::new(1, 1);
    let cond = b.int(s, 1);
    let then_block = b.block(s, vec![]);
    let if_stmt = b.if_stmt(s, cond, then_block, None);
    let program = b.program(vec![if_stmt]);
    let p1 = crate::pass1::run(&program);
    let p2 = run(&program, &p1);
    assert!(p2.errors.errors().iter().any(|e| e.code == E::E040));
  }

  #[test]
  fn break_outside_loop_is_e041() {
    let mut b = AstBuilder::new();
    let s = Span::new(1, 1);
    let brk = b.stmt(s, StmtKind::Break);
    let program = b.program(vec![brk]);
    let p1 = crate::pass1::run(&program);
    let p2 = run(&program, &p1);
    assert!(p2.errors.errors().iter().any(|e| e.code == E::E041));
  }

  #[test]
  fn break_inside_while_is_accepted() {
    let mut b = AstBuilder::new();
    let s = Span::new(1, 1);
    let cond = b.boolean(s, true);
    let brk = b.stmt(s, StmtKind::Break);
    let body = b.block(s, vec![brk]);
    let while_stmt = b.while_stmt(s, cond, body);
    let program = b.program(vec![while_stmt]);
    let p1 = crate::pass1::run(&program);
    let p2 = run(&program, &p1);
    assert!(!p2.errors.has_errors());
  }

  #[test]
  fn function_missing_return_on_all_paths_is_e015() {
    let mut b = AstBuilder::new();
    let s = Span::new(1, 1);
    let body = b.block(s, vec![]);
    let func = b.func_decl(s, "f", vec![], Some(int_ty()), body);
    let program = b.program(vec![func]);
    let p1 = crate::pass1::run(&program);
    let p2 = run(&program, &p1);
    assert!(p2.errors.errors().iter().any(|e| e.code == E::E015));
  }

  #[test]
  fn function_with_if_else_both_returning_satisfies_e015() {
    let mut b = AstBuilder::new();
    let s = Span::new(1, 1);
    let cond = b.boolean(s, true);
    let one = b.int(s, 1);
    let ret1 = b.return_stmt(s, Some(one));
    let then_block = b.block(s, vec![ret1]);
    let two = b.int(s, 2);
    let ret2 = b.return_stmt(s, Some(two));
    let else_block = b.block(s, vec![ret2]);
    let if_stmt = b.if_stmt(s, cond, then_block, Some(else_block));
    let body = b.block(s, vec![if_stmt]);
    let func = b.func_decl(s, "f", vec![], Some(int_ty()), body);
    let program = b.program(vec![func]);
    let p1 = crate::pass1::run(&program);
    let p2 = run(&program, &p1);
    assert!(!p2.errors.errors().iter().any(|e| e.code == E::E015));
  }

  #[test]
  fn this_outside_method_is_e043() {
    let mut b = AstBuilder::new();
    let s = Span::new(1, 1);
    let this_expr = b.expr(s, ExprKind::This);
    let stmt = b.expr_stmt(s, this_expr);
    let program = b.program(vec![stmt]);
    let p1 = crate::pass1::run(&program);
    let p2 = run(&program, &p1);
    assert!(p2.errors.errors().iter().any(|e| e.code == E::E043));
  }

  #[test]
  fn foreach_over_non_array_is_e032() {
    let mut b = AstBuilder::new();
    let s = Span::new(1, 1);
    let five = b.int(s, 5);
    let body = b.block(s, vec![]);
    let foreach = b.foreach_stmt(s, "x", five, body);
    let program = b.program(vec![foreach]);
    let p1 = crate::pass1::run(&program);
    let p2 = run(&program, &p1);
    assert!(p2.errors.errors().iter().any(|e| e.code == E::E032));
  }

  #[test]
  fn array_length_is_integer() {
    let mut b = AstBuilder::new();
    let s = Span::new(1, 1);
    let one = b.int(s, 1);
    let arr = b.expr(s, ExprKind::ArrayLiteral(vec![one]));
    let len = b.property(s, arr, "length");
    let len_id = len.id;
    let stmt = b.expr_stmt(s, len);
    let program = b.program(vec![stmt]);
    let p1 = crate::pass1::run(&program);
    let p2 = run(&program, &p1);
    assert!(!p2.errors.has_errors());
    assert_eq!(p2.type_by_node.get(&len_id), Some(&Type::Integer));
  }

  #[test]
  fn call_with_wrong_arity_is_e021() {
    let mut b = AstBuilder::new();
    let s = Span::new(1, 1);
    let params = vec![crate::ast::Param { identifier: "a".into(), type_annotation: Some(int_ty()), span: s }];
    let zero = b.int(s, 0);
    let ret = b.return_stmt(s, Some(zero));
    let body = b.block(s, vec![ret]);
    let func = b.func_decl(s, "f", params, Some(int_ty()), body);
    let callee = b.ident(s, "f");
    let call = b.call(s, callee, vec![]);
    let call_stmt = b.expr_stmt(s, call);
    let program = b.program(vec![func, call_stmt]);
    let p1 = crate::pass1::run(&program);
    let p2 = run(&program, &p1);
    assert!(p2.errors.errors().iter().any(|e| e.code == E::E021));
  }
}
