//! The TAC generator: a third AST walk, using the scopes Pass 1 built and
//! the types Pass 2 attached, that lowers statements and expressions into
//! [`crate::tac::TacProgram`] instructions.
//!
//! The generator's mutable addressing/control-flow state is an explicit
//! [`CodegenContext`] (`next_global_address`, `global_addresses`,
//! loop/switch label stacks, `last_method_obj`) rather than fields
//! scattered across a stateful visitor object, mirroring how
//! `build_vcode.rs`'s `LowerCtx` bundles its translation state into one
//! struct threaded through `&mut self` methods.
//!
//! Fallibility here means an internal invariant broke (e.g. an identifier
//! Pass 2 should have resolved did not resolve) — never "the source has a
//! type error", which Pass 2 already reports as an accumulated
//! [`crate::errors::SemanticError`] before this module ever runs (see
//! `driver::compile`).

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use smallvec::SmallVec;

use crate::ast::{
  AddOp, ClassMember, EqOp, Expr, ExprKind, MulOp, Program, RelOp, Stmt, StmtKind, UnOp,
};
use crate::config::CompilerOptions;
use crate::errors::CompileError;
use crate::pass1::{synthetic_member_node_id, Pass1Result};
use crate::pass2::Pass2Result;
use crate::span::Span;
use crate::symtab::{ClassSymbol, FunctionSymbol, Scope, Symbol};
use crate::tac::{LabelId, Op, Operand, TacInstr, TacProgram};
use crate::types::Type;

type Result<T> = std::result::Result<T, CompileError>;

fn internal(message: impl Into<String>) -> CompileError { CompileError::TacGeneration(message.into()) }

/// Labels a loop needs for `break`/`continue`.
#[derive(Clone, Copy)]
struct LoopLabels {
  continue_target: LabelId,
  break_target: LabelId,
}

/// Explicit mutable state threaded through lowering.
#[derive(Default)]
struct CodegenContext {
  next_global_address: u32,
  global_addresses: HashMap<String, u32>,
  loop_stack: Vec<LoopLabels>,
  switch_break_stack: Vec<LabelId>,
  /// Set by a `Property` access that resolved to a method; consumed (and
  /// always cleared) by the next `Call` lowering.
  last_method_obj: Option<Operand>,
  /// True while lowering a class method's body; false for a free function
  /// or the top-level script. Distinguishes the two parameter-offset
  /// translations in `frame_offset` (a method's frame has `this` at
  /// `FP[8]`, pushing every explicit parameter one slot further out than
  /// a free function's).
  in_method: bool,
}

impl CodegenContext {
  fn new() -> Self { Self { next_global_address: 0x1000, ..Self::default() } }

  fn global_address(&mut self, name: &str, ty: &Type) -> Operand {
    if let Some(&addr) = self.global_addresses.get(name) { return Operand::Global(addr); }
    let addr = self.next_global_address;
    self.next_global_address += ty.size_of();
    self.global_addresses.insert(name.to_string(), addr);
    Operand::Global(addr)
  }
}

pub struct Generator<'a> {
  p1: &'a Pass1Result,
  p2: &'a Pass2Result,
  ctx: CodegenContext,
  prog: TacProgram,
}

/// Runs the TAC generator over the whole program: function/method bodies
/// are lowered into their own `FUNC_START..FUNC_END` blocks (wherever they
/// appear in source order); every other top-level statement is lowered in
/// place, forming the `_script_start` sequence the MIPS generator
/// arranges after all function bodies.
///
/// `opts` is accepted (rather than threaded through every call) so the
/// generator's signature matches the other pipeline stages `driver.rs`
/// chains together; this stage itself has no optimize/division knob to read.
pub fn generate(program: &Program, p1: &Pass1Result, p2: &Pass2Result, _opts: &CompilerOptions) -> Result<TacProgram> {
  let mut gen = Generator { p1, p2, ctx: CodegenContext::new(), prog: TacProgram::new() };
  for stmt in &program.statements {
    gen.gen_top_level(stmt, &p1.global)?;
  }
  Ok(gen.prog)
}

impl<'a> Generator<'a> {
  fn scope_for(&self, node: crate::ast::NodeId, fallback: &Rc<RefCell<Scope>>) -> Rc<RefCell<Scope>> {
    self.p1.scope_by_node.get(&node).cloned().unwrap_or_else(|| Rc::clone(fallback))
  }

  fn expr_type(&self, expr: &Expr) -> Type {
    self.p2.type_by_node.get(&expr.id).cloned().unwrap_or(Type::Null)
  }

  fn resolve_symbol(&self, scope: &Rc<RefCell<Scope>>, name: &str) -> Result<Symbol> {
    crate::symtab::resolve(scope, name)
      .ok_or_else(|| internal(format!("'{name}' unresolved during TAC generation")))
  }

  /// Resolves a variable's storage address: a global gets a stable
  /// `0x…` address, a local/parameter its `FP[offset]`.
  ///
  /// The symbol's `offset` is a Pass-1 *symbol-table* offset (locals
  /// 0,4,…; parameters -4,-8,…), not yet a real `$fp` displacement — it
  /// must be translated the way `tac_generator.py`'s `visitPrimary`/
  /// `visitVariableDeclaration` do it, via [`Self::frame_offset`].
  /// `this` is the one exception: Pass 2 seeds it directly with the
  /// already-final displacement `FP[8]`, so it passes through unchanged.
  fn address_of(&mut self, scope: &Rc<RefCell<Scope>>, name: &str) -> Result<Operand> {
    let sym = self.resolve_symbol(scope, name)?;
    let v = sym.as_variable().ok_or_else(|| internal(format!("'{name}' is not a variable")))?;
    if v.is_global {
      Ok(self.ctx.global_address(name, &v.ty))
    } else {
      let offset = v.offset.ok_or_else(|| internal(format!("'{name}' has no assigned offset")))?;
      if name == "this" {
        Ok(Operand::FrameSlot(offset))
      } else {
        Ok(Operand::FrameSlot(self.frame_offset(offset)))
      }
    }
  }

  /// Translates a Pass-1 symbol-table offset into the real `$fp`
  /// displacement used at codegen time, per `tac_generator.py:164-174,
  /// 234-243,957-975`: a local (`offset >= 0`) sits at `-(offset+4)`
  /// below `$fp`; a parameter (`offset < 0`) sits above it, at `(-offset)
  /// + 8` inside a method (past the saved `$ra`/`$fp` and the pushed
  /// `this`) or `(-offset) + 4` in a free function (no `this` slot).
  fn frame_offset(&self, offset: i32) -> i32 {
    if offset >= 0 {
      -(offset + 4)
    } else if self.ctx.in_method {
      (-offset) + 8
    } else {
      (-offset) + 4
    }
  }

  /// Reads a variable's value: loads its address, then `DEREF`s it into a
  /// fresh temporary.
  fn read_variable(&mut self, scope: &Rc<RefCell<Scope>>, name: &str, ty: Type) -> Result<Operand> {
    let addr = self.address_of(scope, name)?;
    let dst = Operand::Temp(self.prog.new_temp());
    self.prog.emit(TacInstr::new(Op::Deref).r(dst.clone()).a1(addr).with_ty(ty));
    Ok(dst)
  }

  // ---- top level -------------------------------------------------------

  fn gen_top_level(&mut self, stmt: &Stmt, scope: &Rc<RefCell<Scope>>) -> Result<()> {
    match &stmt.kind {
      StmtKind::FunctionDeclaration { identifier, body, .. } => {
        let func = self.p1.function_by_node.get(&stmt.id).cloned()
          .ok_or_else(|| internal(format!("function '{identifier}' missing from Pass 1")))?;
        let fn_scope = self.scope_for(stmt.id, scope);
        self.gen_function(&func, body, &fn_scope)
      }
      StmtKind::ClassDeclaration { identifier, members, .. } => self.gen_class(stmt.id, identifier, members),
      _ => self.gen_stmt(stmt, scope),
    }
  }

  fn gen_class(&mut self, class_node: crate::ast::NodeId, class_name: &str, members: &[ClassMember]) -> Result<()> {
    let class_scope = self.p1.scope_by_node.get(&class_node).cloned()
      .ok_or_else(|| internal(format!("class '{class_name}' missing its scope")))?;
    for member in members {
      if let ClassMember::Function { body, .. } = member {
        let node_id = synthetic_member_node_id(class_node, member.name());
        let func = self.p1.function_by_node.get(&node_id).cloned()
          .ok_or_else(|| internal(format!("method '{}' missing from Pass 1", member.name())))?;
        let fn_scope = self.scope_for(node_id, &class_scope);
        self.ctx.in_method = true;
        self.gen_function(&func, body, &fn_scope)?;
        self.ctx.in_method = false;
      }
    }
    Ok(())
  }

  /// Emits `FUNC_START label`, `ENTER frame_size`, the lowered body,
  /// `LEAVE`, `FUNC_END label`.
  fn gen_function(&mut self, func: &Rc<RefCell<FunctionSymbol>>, body: &Stmt, fn_scope: &Rc<RefCell<Scope>>) -> Result<()> {
    let (label, frame_size) = {
      let f = func.borrow();
      (f.label.clone(), f.frame_size)
    };
    log::debug!("tacgen: function {label} frame_size={frame_size}");
    self.prog.emit(TacInstr::new(Op::FuncStart).a1(Operand::name(label.clone())));
    self.prog.emit(TacInstr::new(Op::Enter).a1(Operand::int(i64::from(frame_size))));
    self.gen_stmt(body, fn_scope)?;
    self.prog.emit(TacInstr::new(Op::Leave));
    self.prog.emit(TacInstr::new(Op::FuncEnd).a1(Operand::name(label)));
    Ok(())
  }

  // ---- statements --------------------------------------------------------

  fn gen_stmt(&mut self, stmt: &Stmt, scope: &Rc<RefCell<Scope>>) -> Result<()> {
    match &stmt.kind {
      StmtKind::VariableDeclaration { identifier, initializer, .. } => {
        if let Some(init) = initializer {
          let value = self.gen_expr(init, scope)?;
          let addr = self.address_of(scope, identifier)?;
          self.prog.emit(TacInstr::new(Op::Assign).r(addr).a1(value));
        }
        Ok(())
      }
      StmtKind::ConstantDeclaration { identifier, expression, .. } => {
        let value = self.gen_expr(expression, scope)?;
        let addr = self.address_of(scope, identifier)?;
        self.prog.emit(TacInstr::new(Op::Assign).r(addr).a1(value));
        Ok(())
      }
      // Nested function/class declarations are lowered once from the
      // top-level walk; re-entering them here would duplicate their body.
      StmtKind::FunctionDeclaration { .. } | StmtKind::ClassDeclaration { .. } => Ok(()),
      StmtKind::Block(stmts) => {
        let block_scope = self.scope_for(stmt.id, scope);
        for s in stmts { self.gen_stmt(s, &block_scope)?; }
        Ok(())
      }
      StmtKind::If { condition, then_block, else_block } => self.gen_if(condition, then_block, else_block.as_deref(), scope),
      StmtKind::While { condition, body } => self.gen_while(condition, body, scope),
      StmtKind::DoWhile { body, condition } => self.gen_do_while(body, condition, scope),
      StmtKind::For { init, condition, update, body } => self.gen_for(stmt, init.as_deref(), condition.as_ref(), update.as_ref(), body, scope),
      StmtKind::Foreach { identifier, iterable, body } => self.gen_foreach(stmt, identifier, iterable, body, scope),
      StmtKind::Switch { selector, cases, default } => self.gen_switch(selector, cases, default.as_deref(), scope),
      StmtKind::Break => {
        let target = self.ctx.switch_break_stack.last().or_else(|| self.ctx.loop_stack.last().map(|l| &l.break_target))
          .copied()
          .ok_or_else(|| internal("'break' with no enclosing loop or switch"))?;
        self.prog.emit(TacInstr::new(Op::Goto).a1(Operand::Label(target)));
        Ok(())
      }
      StmtKind::Continue => {
        let target = self.ctx.loop_stack.last().map(|l| l.continue_target)
          .ok_or_else(|| internal("'continue' with no enclosing loop"))?;
        self.prog.emit(TacInstr::new(Op::Goto).a1(Operand::Label(target)));
        Ok(())
      }
      StmtKind::Return(value) => {
        let mut instr = TacInstr::new(Op::Return);
        if let Some(v) = value { instr = instr.a1(self.gen_expr(v, scope)?); }
        self.prog.emit(instr);
        Ok(())
      }
      StmtKind::Print(e) => {
        let ty = self.expr_type(e);
        let value = self.gen_expr(e, scope)?;
        self.prog.emit(TacInstr::new(Op::Print).a1(value).with_ty(ty));
        Ok(())
      }
      StmtKind::ExprStmt(e) => { self.gen_expr(e, scope)?; Ok(()) }
    }
  }

  fn gen_if(&mut self, condition: &Expr, then_block: &Stmt, else_block: Option<&Stmt>, scope: &Rc<RefCell<Scope>>) -> Result<()> {
    let cond = self.gen_expr(condition, scope)?;
    if let Some(else_block) = else_block {
      let else_label = self.prog.new_label();
      let end_label = self.prog.new_label();
      self.prog.emit(TacInstr::new(Op::IfFalse).a1(cond).a2(Operand::Label(else_label)));
      self.gen_stmt(then_block, scope)?;
      self.prog.emit(TacInstr::new(Op::Goto).a1(Operand::Label(end_label)));
      self.prog.emit(TacInstr::new(Op::Label).r(Operand::Label(else_label)));
      self.gen_stmt(else_block, scope)?;
      self.prog.emit(TacInstr::new(Op::Label).r(Operand::Label(end_label)));
    } else {
      let end_label = self.prog.new_label();
      self.prog.emit(TacInstr::new(Op::IfFalse).a1(cond).a2(Operand::Label(end_label)));
      self.gen_stmt(then_block, scope)?;
      self.prog.emit(TacInstr::new(Op::Label).r(Operand::Label(end_label)));
    }
    Ok(())
  }

  fn gen_while(&mut self, condition: &Expr, body: &Stmt, scope: &Rc<RefCell<Scope>>) -> Result<()> {
    let start_label = self.prog.new_label();
    let end_label = self.prog.new_label();
    self.prog.emit(TacInstr::new(Op::Label).r(Operand::Label(start_label)));
    let cond = self.gen_expr(condition, scope)?;
    self.prog.emit(TacInstr::new(Op::IfFalse).a1(cond).a2(Operand::Label(end_label)));
    self.ctx.loop_stack.push(LoopLabels { continue_target: start_label, break_target: end_label });
    self.gen_stmt(body, scope)?;
    self.ctx.loop_stack.pop();
    self.prog.emit(TacInstr::new(Op::Goto).a1(Operand::Label(start_label)));
    self.prog.emit(TacInstr::new(Op::Label).r(Operand::Label(end_label)));
    Ok(())
  }

  /// `do-while` gets an explicit continue label distinct from its start
  /// label, since `continue` must re-check the condition rather than
  /// re-enter the body unconditionally.
  fn gen_do_while(&mut self, body: &Stmt, condition: &Expr, scope: &Rc<RefCell<Scope>>) -> Result<()> {
    let start_label = self.prog.new_label();
    let continue_label = self.prog.new_label();
    let end_label = self.prog.new_label();
    self.prog.emit(TacInstr::new(Op::Label).r(Operand::Label(start_label)));
    self.ctx.loop_stack.push(LoopLabels { continue_target: continue_label, break_target: end_label });
    self.gen_stmt(body, scope)?;
    self.ctx.loop_stack.pop();
    self.prog.emit(TacInstr::new(Op::Label).r(Operand::Label(continue_label)));
    let cond = self.gen_expr(condition, scope)?;
    self.prog.emit(TacInstr::new(Op::IfTrue).a1(cond).a2(Operand::Label(start_label)));
    self.prog.emit(TacInstr::new(Op::Label).r(Operand::Label(end_label)));
    Ok(())
  }

  fn gen_for(
    &mut self, stmt: &Stmt, init: Option<&Stmt>, condition: Option<&Expr>, update: Option<&Expr>,
    body: &Stmt, scope: &Rc<RefCell<Scope>>,
  ) -> Result<()> {
    let for_scope = self.scope_for(stmt.id, scope);
    if let Some(init) = init { self.gen_stmt(init, &for_scope)?; }
    let start_label = self.prog.new_label();
    let continue_label = self.prog.new_label();
    let end_label = self.prog.new_label();
    self.prog.emit(TacInstr::new(Op::Label).r(Operand::Label(start_label)));
    if let Some(cond) = condition {
      let cond_op = self.gen_expr(cond, &for_scope)?;
      self.prog.emit(TacInstr::new(Op::IfFalse).a1(cond_op).a2(Operand::Label(end_label)));
    }
    self.ctx.loop_stack.push(LoopLabels { continue_target: continue_label, break_target: end_label });
    self.gen_stmt(body, &for_scope)?;
    self.ctx.loop_stack.pop();
    self.prog.emit(TacInstr::new(Op::Label).r(Operand::Label(continue_label)));
    if let Some(update) = update { self.gen_expr(update, &for_scope)?; }
    self.prog.emit(TacInstr::new(Op::Goto).a1(Operand::Label(start_label)));
    self.prog.emit(TacInstr::new(Op::Label).r(Operand::Label(end_label)));
    Ok(())
  }

  /// `foreach` desugars to an index-based loop over `array.length` (the
  /// array carries a length header word at offset 0, read via
  /// `FIELD_ACCESS dst, arr, "length"`).
  fn gen_foreach(&mut self, stmt: &Stmt, identifier: &str, iterable: &Expr, body: &Stmt, scope: &Rc<RefCell<Scope>>) -> Result<()> {
    let loop_scope = self.scope_for(stmt.id, scope);
    let elem_ty = self.expr_type(iterable).as_array_elem().cloned().unwrap_or(Type::Null);
    let arr = self.gen_expr(iterable, scope)?;

    let idx = Operand::Temp(self.prog.new_temp());
    self.prog.emit(TacInstr::new(Op::Assign).r(idx.clone()).a1(Operand::int(0)));
    let len = Operand::Temp(self.prog.new_temp());
    self.prog.emit(TacInstr::new(Op::FieldAccess).r(len.clone()).a1(arr.clone()).a2(Operand::name("length")));

    let start_label = self.prog.new_label();
    let continue_label = self.prog.new_label();
    let end_label = self.prog.new_label();
    self.prog.emit(TacInstr::new(Op::Label).r(Operand::Label(start_label)));
    let cmp = Operand::Temp(self.prog.new_temp());
    self.prog.emit(TacInstr::new(Op::Lt).r(cmp.clone()).a1(idx.clone()).a2(len.clone()));
    self.prog.emit(TacInstr::new(Op::IfFalse).a1(cmp).a2(Operand::Label(end_label)));

    let elem = Operand::Temp(self.prog.new_temp());
    self.prog.emit(TacInstr::new(Op::ArrayAccess).r(elem.clone()).a1(arr.clone()).a2(idx.clone()).with_ty(elem_ty));
    let loop_var_addr = self.address_of(&loop_scope, identifier)?;
    self.prog.emit(TacInstr::new(Op::Assign).r(loop_var_addr).a1(elem));

    self.ctx.loop_stack.push(LoopLabels { continue_target: continue_label, break_target: end_label });
    self.gen_stmt(body, &loop_scope)?;
    self.ctx.loop_stack.pop();

    self.prog.emit(TacInstr::new(Op::Label).r(Operand::Label(continue_label)));
    let next_idx = Operand::Temp(self.prog.new_temp());
    self.prog.emit(TacInstr::new(Op::Add).r(next_idx.clone()).a1(idx.clone()).a2(Operand::int(1)));
    self.prog.emit(TacInstr::new(Op::Assign).r(idx).a1(next_idx));
    self.prog.emit(TacInstr::new(Op::Goto).a1(Operand::Label(start_label)));
    self.prog.emit(TacInstr::new(Op::Label).r(Operand::Label(end_label)));
    Ok(())
  }

  /// Sequential compare-and-branch lowering with C-style fallthrough
  /// between case bodies; `break` (via `switch_break_stack`) is how the
  /// source language opts out of fallthrough.
  fn gen_switch(
    &mut self, selector: &Expr, cases: &[crate::ast::SwitchCase], default: Option<&[Stmt]>, scope: &Rc<RefCell<Scope>>,
  ) -> Result<()> {
    let sel = self.gen_expr(selector, scope)?;
    let case_labels: Vec<LabelId> = cases.iter().map(|_| self.prog.new_label()).collect();
    let default_label = self.prog.new_label();
    let end_label = self.prog.new_label();

    for (case, &label) in cases.iter().zip(&case_labels) {
      let case_val = self.gen_expr(&case.selector, scope)?;
      let matches = Operand::Temp(self.prog.new_temp());
      self.prog.emit(TacInstr::new(Op::Eq).r(matches.clone()).a1(sel.clone()).a2(case_val));
      self.prog.emit(TacInstr::new(Op::IfTrue).a1(matches).a2(Operand::Label(label)));
    }
    self.prog.emit(TacInstr::new(Op::Goto).a1(Operand::Label(default_label)));

    self.ctx.switch_break_stack.push(end_label);
    for (case, &label) in cases.iter().zip(&case_labels) {
      self.prog.emit(TacInstr::new(Op::Label).r(Operand::Label(label)));
      for s in &case.body { self.gen_stmt(s, scope)?; }
    }
    self.prog.emit(TacInstr::new(Op::Label).r(Operand::Label(default_label)));
    if let Some(default) = default {
      for s in default { self.gen_stmt(s, scope)?; }
    }
    self.ctx.switch_break_stack.pop();
    self.prog.emit(TacInstr::new(Op::Label).r(Operand::Label(end_label)));
    Ok(())
  }

  // ---- expressions ---------------------------------------------------------

  fn gen_expr(&mut self, expr: &Expr, scope: &Rc<RefCell<Scope>>) -> Result<Operand> {
    match &expr.kind {
      ExprKind::IntLiteral(n) => Ok(Operand::int(*n)),
      ExprKind::BoolLiteral(b) => Ok(Operand::boolean(*b)),
      ExprKind::StringLiteral(s) => Ok(Operand::string(s.clone())),
      ExprKind::NullLiteral => Ok(Operand::int(0)),
      ExprKind::Identifier(name) => {
        let ty = self.expr_type(expr);
        self.read_variable(scope, name, ty)
      }
      ExprKind::This => self.read_variable(scope, "this", self.expr_type(expr)),
      ExprKind::Parenthesized(inner) => self.gen_expr(inner, scope),
      ExprKind::Unary { op, expr: inner } => {
        let v = self.gen_expr(inner, scope)?;
        let dst = Operand::Temp(self.prog.new_temp());
        let tac_op = match op { UnOp::Neg => Op::Neg, UnOp::Not => Op::Not };
        self.prog.emit(TacInstr::new(tac_op).r(dst.clone()).a1(v).with_ty(self.expr_type(expr)));
        Ok(dst)
      }
      ExprKind::Additive { op, left, right } => {
        let l = self.gen_expr(left, scope)?;
        let r = self.gen_expr(right, scope)?;
        let dst = Operand::Temp(self.prog.new_temp());
        let tac_op = match op { AddOp::Add => Op::Add, AddOp::Sub => Op::Sub };
        self.prog.emit(TacInstr::new(tac_op).r(dst.clone()).a1(l).a2(r).with_ty(self.expr_type(expr)));
        Ok(dst)
      }
      ExprKind::Multiplicative { op, left, right } => {
        let l = self.gen_expr(left, scope)?;
        let r = self.gen_expr(right, scope)?;
        let dst = Operand::Temp(self.prog.new_temp());
        let tac_op = match op { MulOp::Mul => Op::Mul, MulOp::Div => Op::Div, MulOp::Mod => Op::Mod };
        self.prog.emit(TacInstr::new(tac_op).r(dst.clone()).a1(l).a2(r).with_ty(Type::Integer));
        Ok(dst)
      }
      ExprKind::Relational { op, left, right } => {
        let l = self.gen_expr(left, scope)?;
        let r = self.gen_expr(right, scope)?;
        let dst = Operand::Temp(self.prog.new_temp());
        let tac_op = match op { RelOp::Lt => Op::Lt, RelOp::Le => Op::Le, RelOp::Gt => Op::Gt, RelOp::Ge => Op::Ge };
        self.prog.emit(TacInstr::new(tac_op).r(dst.clone()).a1(l).a2(r).with_ty(Type::Boolean));
        Ok(dst)
      }
      ExprKind::Equality { op, left, right } => {
        let l = self.gen_expr(left, scope)?;
        let r = self.gen_expr(right, scope)?;
        let dst = Operand::Temp(self.prog.new_temp());
        let tac_op = match op { EqOp::Eq => Op::Eq, EqOp::Ne => Op::Ne };
        self.prog.emit(TacInstr::new(tac_op).r(dst.clone()).a1(l).a2(r).with_ty(Type::Boolean));
        Ok(dst)
      }
      ExprKind::LogicalAnd(left, right) => self.gen_short_circuit(left, right, scope, true),
      ExprKind::LogicalOr(left, right) => self.gen_short_circuit(left, right, scope, false),
      ExprKind::Ternary { cond, then, els } => self.gen_ternary(cond, then, els, scope),
      ExprKind::Assignment { target, value } => self.gen_assignment(target, value, scope),
      ExprKind::ArrayLiteral(elems) => self.gen_array_literal(elems, scope),
      ExprKind::Index { base, index } => {
        let base_op = self.gen_expr(base, scope)?;
        let index_op = self.gen_expr(index, scope)?;
        let dst = Operand::Temp(self.prog.new_temp());
        self.prog.emit(TacInstr::new(Op::ArrayAccess).r(dst.clone()).a1(base_op).a2(index_op).with_ty(self.expr_type(expr)));
        Ok(dst)
      }
      ExprKind::Property { base, name } => self.gen_property_read(expr.span, base, name, scope),
      ExprKind::New { class_name, args } => self.gen_new(class_name, args, scope),
      ExprKind::Call { callee, args } => self.gen_call(callee, args, scope),
    }
  }

  fn gen_short_circuit(&mut self, left: &Expr, right: &Expr, scope: &Rc<RefCell<Scope>>, is_and: bool) -> Result<Operand> {
    let result = Operand::Temp(self.prog.new_temp());
    let short_label = self.prog.new_label();
    let end_label = self.prog.new_label();
    let l = self.gen_expr(left, scope)?;
    let branch_op = if is_and { Op::IfFalse } else { Op::IfTrue };
    self.prog.emit(TacInstr::new(branch_op).a1(l).a2(Operand::Label(short_label)));
    let r = self.gen_expr(right, scope)?;
    self.prog.emit(TacInstr::new(Op::Assign).r(result.clone()).a1(r));
    self.prog.emit(TacInstr::new(Op::Goto).a1(Operand::Label(end_label)));
    self.prog.emit(TacInstr::new(Op::Label).r(Operand::Label(short_label)));
    self.prog.emit(TacInstr::new(Op::Assign).r(result.clone()).a1(Operand::boolean(!is_and)));
    self.prog.emit(TacInstr::new(Op::Label).r(Operand::Label(end_label)));
    Ok(result)
  }

  fn gen_ternary(&mut self, cond: &Expr, then: &Expr, els: &Expr, scope: &Rc<RefCell<Scope>>) -> Result<Operand> {
    let result = Operand::Temp(self.prog.new_temp());
    let else_label = self.prog.new_label();
    let end_label = self.prog.new_label();
    let c = self.gen_expr(cond, scope)?;
    self.prog.emit(TacInstr::new(Op::IfFalse).a1(c).a2(Operand::Label(else_label)));
    let t = self.gen_expr(then, scope)?;
    self.prog.emit(TacInstr::new(Op::Assign).r(result.clone()).a1(t));
    self.prog.emit(TacInstr::new(Op::Goto).a1(Operand::Label(end_label)));
    self.prog.emit(TacInstr::new(Op::Label).r(Operand::Label(else_label)));
    let e = self.gen_expr(els, scope)?;
    self.prog.emit(TacInstr::new(Op::Assign).r(result.clone()).a1(e));
    self.prog.emit(TacInstr::new(Op::Label).r(Operand::Label(end_label)));
    Ok(result)
  }

  fn gen_assignment(&mut self, target: &Expr, value: &Expr, scope: &Rc<RefCell<Scope>>) -> Result<Operand> {
    match &target.kind {
      ExprKind::Identifier(name) => {
        let v = self.gen_expr(value, scope)?;
        let addr = self.address_of(scope, name)?;
        self.prog.emit(TacInstr::new(Op::Assign).r(addr).a1(v.clone()));
        Ok(v)
      }
      ExprKind::Property { base, name } => {
        let obj = self.gen_expr(base, scope)?;
        let offset = self.field_offset(target.span, base, name)?;
        let v = self.gen_expr(value, scope)?;
        self.prog.emit(TacInstr::new(Op::FieldAssign).r(obj).a1(Operand::int(i64::from(offset))).a2(v.clone()));
        Ok(v)
      }
      ExprKind::Index { base, index } => {
        let base_op = self.gen_expr(base, scope)?;
        let index_op = self.gen_expr(index, scope)?;
        let v = self.gen_expr(value, scope)?;
        self.prog.emit(TacInstr::new(Op::ArrayAssign).r(base_op).a1(index_op).a2(v.clone()));
        Ok(v)
      }
      _ => Err(internal("invalid assignment target reached TAC generation")),
    }
  }

  /// `new Class(args)` and array literals share the array/object NEW
  /// instruction, distinguished by `arg1`'s operand kind: a constant
  /// integer (element count) for arrays, a bare name for a class.
  fn gen_array_literal(&mut self, elems: &[Expr], scope: &Rc<RefCell<Scope>>) -> Result<Operand> {
    let values: SmallVec<[Operand; 4]> = elems.iter().map(|e| self.gen_expr(e, scope)).collect::<Result<_>>()?;
    let ptr = Operand::Temp(self.prog.new_temp());
    self.prog.emit(TacInstr::new(Op::New).r(ptr.clone()).a1(Operand::int(i64::try_from(values.len()).unwrap_or(i64::MAX))));
    for (i, v) in values.into_iter().enumerate() {
      self.prog.emit(TacInstr::new(Op::ArrayAssign).r(ptr.clone()).a1(Operand::int(i as i64)).a2(v));
    }
    Ok(ptr)
  }

  fn gen_new(&mut self, class_name: &str, args: &[Expr], scope: &Rc<RefCell<Scope>>) -> Result<Operand> {
    let ptr = Operand::Temp(self.prog.new_temp());
    self.prog.emit(TacInstr::new(Op::New).r(ptr.clone()).a1(Operand::name(class_name)));
    let arg_vals: SmallVec<[Operand; 4]> = args.iter().map(|a| self.gen_expr(a, scope)).collect::<Result<_>>()?;
    for v in arg_vals.into_iter().rev() {
      self.prog.emit(TacInstr::new(Op::Push).a1(v));
    }
    self.prog.emit(TacInstr::new(Op::Push).a1(ptr.clone()));
    let n_args = args.len() + 1;
    let ctor_label = format!("{class_name}_constructor");
    self.prog.emit(TacInstr::new(Op::Call).a1(Operand::name(ctor_label)).a2(Operand::int(n_args as i64)));
    self.prog.emit(TacInstr::new(Op::AddSp).a1(Operand::int(4 * n_args as i64)));
    Ok(ptr)
  }

  fn class_of(&self, expr: &Expr) -> Option<Rc<RefCell<ClassSymbol>>> {
    self.expr_type(expr).as_class_name().and_then(|cn| self.p1.classes.get(cn)).cloned()
  }

  fn field_offset(&self, span: Span, base: &Expr, name: &str) -> Result<u32> {
    let class = self.class_of(base).ok_or_else(|| internal(format!("{span}: '{name}' base has no class type")))?;
    class.borrow().field_offset(name).ok_or_else(|| internal(format!("{span}: class has no field '{name}'")))
  }

  /// A bare property read: field access yields a value; a bound method
  /// reference yields its address and arms `last_method_obj` for the call
  /// that (per grammar) always immediately follows.
  fn gen_property_read(&mut self, span: Span, base: &Expr, name: &str, scope: &Rc<RefCell<Scope>>) -> Result<Operand> {
    let base_ty = self.expr_type(base);
    let obj = self.gen_expr(base, scope)?;
    if base_ty.is_array() && name == "length" {
      let dst = Operand::Temp(self.prog.new_temp());
      self.prog.emit(TacInstr::new(Op::FieldAccess).r(dst.clone()).a1(obj).a2(Operand::name("length")).with_ty(Type::Integer));
      return Ok(dst);
    }
    let class = self.class_of(base).ok_or_else(|| internal(format!("{span}: '{name}' base has no class type")))?;
    let (is_field, field_ty) = {
      let c = class.borrow();
      (c.fields.contains_key(name), c.fields.get(name).cloned())
    };
    if is_field {
      let offset = class.borrow().field_offset(name).expect("just checked fields.contains_key");
      let dst = Operand::Temp(self.prog.new_temp());
      self.prog.emit(TacInstr::new(Op::FieldAccess).r(dst.clone()).a1(obj).a2(Operand::int(i64::from(offset))).with_ty(field_ty.unwrap_or(Type::Null)));
      Ok(dst)
    } else {
      let label = method_label(&class, name)
        .ok_or_else(|| internal(format!("{span}: class has no method '{name}'")))?;
      let dst = Operand::Temp(self.prog.new_temp());
      self.prog.emit(TacInstr::new(Op::FieldAccess).r(dst.clone()).a1(obj.clone()).a2(Operand::name(label)));
      self.ctx.last_method_obj = Some(obj);
      Ok(dst)
    }
  }

  /// Resolves a call's callee operand, arming `last_method_obj` when the
  /// callee is a bound method or the `toString` intrinsic.
  fn gen_callee(&mut self, callee: &Expr, scope: &Rc<RefCell<Scope>>) -> Result<Operand> {
    match &callee.kind {
      ExprKind::Identifier(name) => match self.resolve_symbol(scope, name)? {
        Symbol::Function(f) => Ok(Operand::name(f.borrow().label.clone())),
        Symbol::Variable(_) => self.read_variable(scope, name, self.expr_type(callee)),
        Symbol::Class(_) => Err(internal(format!("'{name}' is a class, not callable"))),
      },
      ExprKind::Property { base, name } => {
        let base_ty = self.expr_type(base);
        let obj = self.gen_expr(base, scope)?;
        if base_ty.is_integer() && name == "toString" {
          self.ctx.last_method_obj = Some(obj);
          return Ok(Operand::name("toString"));
        }
        let class = self.class_of(base).ok_or_else(|| internal(format!("'{name}' base has no class type")))?;
        let label = method_label(&class, name).ok_or_else(|| internal(format!("class has no method '{name}'")))?;
        self.ctx.last_method_obj = Some(obj);
        Ok(Operand::name(label))
      }
      _ => self.gen_expr(callee, scope),
    }
  }

  /// `CALL result, callee, n_args; ADD_SP 4*n_args`: explicit arguments are
  /// pushed in reverse (so the first argument ends up at the lowest stack
  /// address), then the bound-method receiver (if any) is pushed last and
  /// counted as an extra argument.
  fn gen_call(&mut self, callee: &Expr, args: &[Expr], scope: &Rc<RefCell<Scope>>) -> Result<Operand> {
    let callee_op = self.gen_callee(callee, scope)?;
    let arg_vals: SmallVec<[Operand; 4]> = args.iter().map(|a| self.gen_expr(a, scope)).collect::<Result<_>>()?;
    for v in arg_vals.into_iter().rev() {
      self.prog.emit(TacInstr::new(Op::Push).a1(v));
    }
    let mut n_args = args.len();
    if let Some(obj) = self.ctx.last_method_obj.take() {
      self.prog.emit(TacInstr::new(Op::Push).a1(obj));
      n_args += 1;
    }
    let dst = Operand::Temp(self.prog.new_temp());
    self.prog.emit(TacInstr::new(Op::Call).r(dst.clone()).a1(callee_op).a2(Operand::int(n_args as i64)));
    self.prog.emit(TacInstr::new(Op::AddSp).a1(Operand::int(4 * n_args as i64)));
    Ok(dst)
  }
}

/// Walks the base chain (mirroring `ClassSymbol::implementation_class`) to
/// find the mangled `Class_method` label for an indirect call's direct
/// `jal` target.
fn method_label(class: &Rc<RefCell<ClassSymbol>>, method: &str) -> Option<String> {
  class.borrow().implementation_class(method).map(|owner| format!("{owner}_{method}"))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ast::{AstBuilder, TypeAnnotation};
  use crate::config::CompilerOptions;

  fn int_ty() -> TypeAnnotation { TypeAnnotation::new("integer", 0) }

  fn compile(program: &Program) -> TacProgram {
    let p1 = crate::pass1::run(program);
    assert!(!p1.errors.has_errors(), "{}", p1.errors.pretty());
    let p2 = crate::pass2::run(program, &p1);
    assert!(!p2.errors.has_errors(), "{}", p2.errors.pretty());
    generate(program, &p1, &p2, &CompilerOptions::default()).expect("tac generation should succeed")
  }

  #[test]
  fn constant_expression_print() {
    let mut b = AstBuilder::new();
    let s = Span::new(1, 1);
    let three = b.int(s, 3);
    let four = b.int(s, 4);
    let mul = b.multiplicative(s, MulOp::Mul, three, four);
    let two = b.int(s, 2);
    let add = b.additive(s, AddOp::Add, two, mul);
    let decl = b.var_decl(s, "x", Some(int_ty()), Some(add));
    let ident = b.ident(s, "x");
    let print = b.print_stmt(s, ident);
    let program = b.program(vec![decl, print]);
    let tac = compile(&program);
    assert!(tac.instructions.iter().any(|i| i.op == Op::Print));
    assert!(tac.instructions.iter().any(|i| i.op == Op::Mul));
    assert!(tac.instructions.iter().any(|i| i.op == Op::Add));
  }

  #[test]
  fn while_loop_continue_targets_condition_recheck() {
    let mut b = AstBuilder::new();
    let s = Span::new(1, 1);
    let cond = b.boolean(s, true);
    let cont = b.stmt(s, StmtKind::Continue);
    let body = b.block(s, vec![cont]);
    let while_stmt = b.while_stmt(s, cond, body);
    let program = b.program(vec![while_stmt]);
    let tac = compile(&program);
    // the GOTO from `continue` and the loop-back GOTO both target the same label
    let gotos: Vec<_> = tac.instructions.iter().filter(|i| i.op == Op::Goto).collect();
    assert_eq!(gotos.len(), 2);
    assert_eq!(gotos[0].arg1, gotos[1].arg1);
  }

  #[test]
  fn labels_referenced_all_exist() {
    let mut b = AstBuilder::new();
    let s = Span::new(1, 1);
    let one = b.int(s, 1);
    let lt = b.relational(s, RelOp::Lt, one.clone(), b.int(s, 2));
    let then_block = b.block(s, vec![]);
    let if_stmt = b.if_stmt(s, lt, then_block, None);
    let program = b.program(vec![if_stmt]);
    let tac = compile(&program);
    let defined: std::collections::HashSet<_> = tac.instructions.iter()
      .filter(|i| i.op == Op::Label).filter_map(|i| i.result.as_ref().and_then(Operand::as_label)).collect();
    for i in &tac.instructions {
      for target in [&i.arg1, &i.arg2] {
        if let Some(Operand::Label(l)) = target {
          assert!(defined.contains(l), "missing label L{}", l.0);
        }
      }
    }
  }
}
