//! The Three-Address Code model: operands, a single instruction shape
//! carrying up to three of them, and the ordered program plus its counters.
//!
//! An operand is a closed `enum` (`Temp | Constant | Label | Global |
//! FrameSlot | Name`) rather than a single `value: string` field
//! distinguished by sniffing a `t`/`0x`/`FP[` prefix at each use site.
//! `Display` is the one place that produces the textual form; nothing else
//! parses operand text back out.

use std::fmt;
use std::rc::Rc;

use crate::idx::mk_idx;
use crate::types::Type;

mk_idx!(
  /// Indexes a temporary. Displayed as `tK`, 1-based (`VReg`-style: "first
  /// real index is 1, 0 is reserved"), so the coloring pass's output reads
  /// as a dense `{t1, ..., tK}` range.
  TempId
);
mk_idx!(
  /// Indexes a label. Never reused once allocated, unlike temporaries.
  LabelId
);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Literal {
  Int(i64),
  Bool(bool),
}

impl fmt::Display for Literal {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Literal::Int(n) => write!(f, "{n}"),
      Literal::Bool(b) => write!(f, "{b}"),
    }
  }
}

/// One operand of a [`TacInstr`]. `Display` produces its canonical textual
/// form.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Operand {
  Temp(TempId),
  Constant(Literal),
  /// A string constant; quoted on display (`"..."`).
  StringConstant(Rc<str>),
  Label(LabelId),
  /// `0x1000 + 4*k`-style global address.
  Global(u32),
  /// `FP[offset]`; `this` is conventionally `FP[8]`.
  FrameSlot(i32),
  /// A bare name: call targets, class names in `NEW`, the literal field
  /// name `"length"` used by the array-header convention.
  Name(Rc<str>),
}

impl Operand {
  #[must_use] pub fn int(n: i64) -> Self { Operand::Constant(Literal::Int(n)) }
  #[must_use] pub fn boolean(b: bool) -> Self { Operand::Constant(Literal::Bool(b)) }
  #[must_use] pub fn string(s: impl Into<Rc<str>>) -> Self { Operand::StringConstant(s.into()) }
  #[must_use] pub fn name(s: impl Into<Rc<str>>) -> Self { Operand::Name(s.into()) }

  #[must_use] pub fn is_temp(&self) -> bool { matches!(self, Operand::Temp(_)) }
  #[must_use] pub fn is_constant(&self) -> bool {
    matches!(self, Operand::Constant(_) | Operand::StringConstant(_))
  }
  #[must_use] pub fn is_label(&self) -> bool { matches!(self, Operand::Label(_)) }
  #[must_use] pub fn is_memory(&self) -> bool { matches!(self, Operand::Global(_) | Operand::FrameSlot(_)) }

  #[must_use] pub fn as_temp(&self) -> Option<TempId> {
    if let Operand::Temp(t) = self { Some(*t) } else { None }
  }
  #[must_use] pub fn as_int(&self) -> Option<i64> {
    if let Operand::Constant(Literal::Int(n)) = self { Some(*n) } else { None }
  }
  #[must_use] pub fn as_bool(&self) -> Option<bool> {
    if let Operand::Constant(Literal::Bool(b)) = self { Some(*b) } else { None }
  }
  #[must_use] pub fn as_label(&self) -> Option<LabelId> {
    if let Operand::Label(l) = self { Some(*l) } else { None }
  }
}

impl fmt::Display for Operand {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Operand::Temp(t) => write!(f, "t{}", t.0 + 1),
      Operand::Constant(lit) => write!(f, "{lit}"),
      Operand::StringConstant(s) => write!(f, "\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
      Operand::Label(l) => write!(f, "L{}", l.0),
      Operand::Global(addr) => write!(f, "0x{addr:04x}"),
      Operand::FrameSlot(off) => write!(f, "FP[{off}]"),
      Operand::Name(n) => write!(f, "{n}"),
    }
  }
}

/// The operation code of a [`TacInstr`]. `Param` is kept as a reserved code
/// point (an implementation may omit `PARAM` entirely) — the generator below
/// never emits it, only `Push`/`Pop`/`AddSp`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
  Add, Sub, Mul, Div, Mod, Neg,
  And, Or, Not,
  Lt, Le, Gt, Ge, Eq, Ne,
  Goto, IfTrue, IfFalse, Label,
  Call, Param, Push, Pop, Return, FuncStart, FuncEnd, Enter, Leave, AddSp,
  Assign, Deref, ArrayAccess, ArrayAssign, FieldAccess, FieldAssign,
  New,
  Print,
}

impl Op {
  /// Instructions at which per-block local-optimizer maps reset because
  /// control flow or an externally observable effect crosses them.
  #[must_use] pub fn is_boundary(self) -> bool {
    matches!(
      self,
      Op::Label | Op::Goto | Op::IfTrue | Op::IfFalse | Op::Return | Op::Call | Op::Param
        | Op::FuncStart | Op::FuncEnd | Op::ArrayAssign | Op::FieldAssign
    )
  }

  /// Instructions kept by dead-code elimination regardless of whether their
  /// `result` is referenced elsewhere.
  #[must_use] pub fn has_side_effect(self) -> bool {
    matches!(
      self,
      Op::Print | Op::Return | Op::Param | Op::Call | Op::Label | Op::Goto | Op::IfTrue | Op::IfFalse
        | Op::FuncStart | Op::FuncEnd | Op::ArrayAssign | Op::FieldAssign | Op::Push | Op::Pop
        | Op::Enter | Op::Leave | Op::AddSp
    )
  }
}

/// `{op, result, arg1, arg2}`; absent operands are `None`. A three-address
/// instruction never needs more than this.
#[derive(Clone, Debug)]
pub struct TacInstr {
  pub op: Op,
  pub result: Option<Operand>,
  pub arg1: Option<Operand>,
  pub arg2: Option<Operand>,
  /// The static type of `result`, when known; used by the MIPS `PRINT`
  /// dispatch and carried only for debugging elsewhere.
  pub ty: Option<Type>,
}

impl TacInstr {
  #[must_use] pub fn new(op: Op) -> Self {
    Self { op, result: None, arg1: None, arg2: None, ty: None }
  }
  #[must_use] pub fn r(mut self, o: Operand) -> Self { self.result = Some(o); self }
  #[must_use] pub fn a1(mut self, o: Operand) -> Self { self.arg1 = Some(o); self }
  #[must_use] pub fn a2(mut self, o: Operand) -> Self { self.arg2 = Some(o); self }
  #[must_use] pub fn with_ty(mut self, ty: Type) -> Self { self.ty = Some(ty); self }

  /// Every non-`None` operand, in `result, arg1, arg2` order — the order
  /// liveness and dead-code analyses walk them in.
  pub fn operands(&self) -> impl Iterator<Item = &Operand> {
    [&self.result, &self.arg1, &self.arg2].into_iter().flatten()
  }
  pub fn operands_mut(&mut self) -> impl Iterator<Item = &mut Operand> {
    [&mut self.result, &mut self.arg1, &mut self.arg2].into_iter().flatten()
  }

  /// Operands actually *read* by this instruction, i.e. every operand
  /// except a `result` that is purely a definition target. `ArrayAssign`/
  /// `FieldAssign` read their `result` too (it addresses the receiver).
  pub fn uses(&self) -> impl Iterator<Item = &Operand> {
    let include_result = matches!(
      self.op,
      Op::ArrayAssign | Op::FieldAssign | Op::Print | Op::Return | Op::Param
        | Op::Push | Op::IfTrue | Op::IfFalse | Op::AddSp
    );
    let result = if include_result { self.result.as_ref() } else { None };
    [result, self.arg1.as_ref(), self.arg2.as_ref()].into_iter().flatten()
  }
}

impl fmt::Display for TacInstr {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.op {
      Op::Label => write!(f, "{}:", self.result.as_ref().expect("LABEL always has a result")),
      Op::FuncStart => write!(f, "FUNC_START {}", self.arg1.as_ref().expect("has a label")),
      Op::FuncEnd => write!(f, "FUNC_END {}", self.arg1.as_ref().expect("has a label")),
      Op::Goto => write!(f, "GOTO {}", self.arg1.as_ref().expect("has a target")),
      Op::IfTrue => write!(f, "IF_TRUE {}, {}", self.arg1.as_ref().unwrap(), self.arg2.as_ref().unwrap()),
      Op::IfFalse => write!(f, "IF_FALSE {}, {}", self.arg1.as_ref().unwrap(), self.arg2.as_ref().unwrap()),
      Op::Call => {
        write!(f, "CALL ")?;
        if let Some(r) = &self.result { write!(f, "{r}, ")?; }
        write!(f, "{}, {}", self.arg1.as_ref().unwrap(), self.arg2.as_ref().unwrap())
      }
      Op::Return => {
        write!(f, "RETURN")?;
        if let Some(a) = &self.arg1 { write!(f, " {a}")?; }
        Ok(())
      }
      Op::Enter | Op::Leave | Op::AddSp | Op::Push | Op::Pop => {
        write!(f, "{:?}", self.op)?;
        if let Some(a) = &self.arg1 { write!(f, " {a}")?; }
        Ok(())
      }
      Op::Print => write!(f, "PRINT {}", self.arg1.as_ref().unwrap()),
      _ => {
        write!(f, "{:?} ", self.op)?;
        let mut first = true;
        for o in self.operands() {
          if !first { write!(f, ", ")?; }
          write!(f, "{o}")?;
          first = false;
        }
        Ok(())
      }
    }
  }
}

/// Free-list pool for temporary reuse. `acquire` pops a released slot before
/// minting a fresh one; `temp_counter` only ever goes up (a high-water mark
/// of indices ever allocated).
#[derive(Debug, Default)]
struct TempPool {
  free: Vec<TempId>,
}

impl TempPool {
  fn acquire(&mut self, counter: &mut u32) -> TempId {
    if let Some(t) = self.free.pop() { return t; }
    let id = TempId(*counter);
    *counter += 1;
    id
  }
  fn release(&mut self, t: TempId) { self.free.push(t); }
}

/// `{instructions, temp_counter, label_counter, temp_pool}`.
#[derive(Debug, Default)]
pub struct TacProgram {
  pub instructions: Vec<TacInstr>,
  temp_counter: u32,
  label_counter: u32,
  pool: TempPool,
}

impl TacProgram {
  #[must_use] pub fn new() -> Self { Self::default() }

  pub fn emit(&mut self, instr: TacInstr) { self.instructions.push(instr); }

  /// Acquires a temporary, reusing a released one when available.
  pub fn new_temp(&mut self) -> TempId { self.pool.acquire(&mut self.temp_counter) }

  /// Advisory: releasing is always safe to skip, since the coloring pass
  /// gives the final numbering regardless. Call sites free a temp once its
  /// one consumer has read it.
  pub fn free_if_temp(&mut self, operand: &Operand) {
    if let Operand::Temp(t) = operand { self.pool.release(*t); }
  }

  pub fn new_label(&mut self) -> LabelId {
    let id = LabelId(self.label_counter);
    self.label_counter += 1;
    id
  }

  #[must_use] pub fn temp_count(&self) -> u32 { self.temp_counter }
  #[must_use] pub fn label_count(&self) -> u32 { self.label_counter }

  /// Used only by the optimizer's final recoloring pass, after every temp
  /// reference in `instructions` has already been renumbered densely:
  /// resets the high-water mark to match.
  pub(crate) fn set_temp_counter(&mut self, n: u32) {
    self.temp_counter = n;
    self.pool = TempPool::default();
  }

  /// One instruction per line, in canonical textual form.
  #[must_use] pub fn render(&self) -> Vec<String> {
    self.instructions.iter().map(ToString::to_string).collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn temp_pool_reuses_released_slots() {
    let mut prog = TacProgram::new();
    let t0 = prog.new_temp();
    prog.free_if_temp(&Operand::Temp(t0));
    let t1 = prog.new_temp();
    assert_eq!(t0, t1);
    assert_eq!(prog.temp_count(), 1);
  }

  #[test]
  fn labels_are_never_reused() {
    let mut prog = TacProgram::new();
    let l0 = prog.new_label();
    let l1 = prog.new_label();
    assert_ne!(l0, l1);
  }

  #[test]
  fn display_matches_spec_textual_forms() {
    let instr = TacInstr::new(Op::Add).r(Operand::Temp(TempId(0))).a1(Operand::int(2)).a2(Operand::int(3));
    assert_eq!(instr.to_string(), "Add t1, 2, 3");
    let label = TacInstr::new(Op::Label).r(Operand::Label(LabelId(2)));
    assert_eq!(label.to_string(), "L2:");
    let global = Operand::Global(0);
    assert_eq!(global.to_string(), "0x0000");
    let slot = Operand::FrameSlot(-8);
    assert_eq!(slot.to_string(), "FP[-8]");
  }
}
