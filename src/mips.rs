//! The MIPS32 code generator: a data scan over the optimized TAC program,
//! followed by emission of MARS/SPIM assembly text, one line per
//! instruction.
//!
//! This stays a pure text-emission pass — `Vec<String>` lines, the same
//! shape `TacProgram::render` uses for its own textual dump — rather than
//! an in-memory instruction-object model the way `codegen.rs`'s `InstSink`
//! buffers bytes for its binary ELF target. MARS consumes assembly source
//! directly, so there is no encoding step that needs a byte buffer.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::config::{CompilerOptions, DivisionSemantics};
use crate::errors::CompileError;
use crate::symtab::ClassSymbol;
use crate::tac::{Literal, Op, Operand, TacInstr, TacProgram};
use crate::types::Type;

type Result<T> = std::result::Result<T, CompileError>;

fn internal(message: impl Into<String>) -> CompileError { CompileError::MipsGeneration(message.into()) }

/// Bytes reserved at offset 0 of every heap array for its element count;
/// element `i` lives at `ARRAY_HEADER_BYTES + 4*i`.
const ARRAY_HEADER_BYTES: i64 = 4;

const ALLOC: &str = "_alloc";
const PRINT_INT: &str = "_print_int";
const PRINT_STRING: &str = "_print_string";
const PRINT_BOOLEAN: &str = "_print_boolean";
const PRINT_NEWLINE: &str = "_print_newline";
const STRING_LEN: &str = "_string_len";
const STRING_CONCAT: &str = "_string_concat";
const INT_TO_STRING: &str = "_int_to_string";
const EXIT: &str = "_exit";

/// Runs the two-phase generator over an already-optimized (or raw, if
/// optimization was disabled) TAC program, producing MARS/SPIM source text.
pub fn generate(
  prog: &TacProgram,
  classes: &IndexMap<String, Rc<RefCell<ClassSymbol>>>,
  opts: &CompilerOptions,
) -> Result<Vec<String>> {
  let data = DataScan::scan(prog);
  log::debug!(
    "mips: data scan found {} string constant(s), {} global(s)",
    data.strings.len(),
    data.globals.len()
  );
  let (functions, script) = partition_segments(prog);
  let mut emit = Emitter {
    classes,
    opts,
    data,
    frame: FrameLayout::default(),
    out: Vec::new(),
    internal_label_counter: 0,
  };

  emit.emit_data_section();
  emit.blank();
  emit.directive(".text");
  emit.label("main");
  emit.line("move $fp, $sp");
  emit.line("j _script_start");
  emit.blank();
  emit.emit_runtime_library();

  for segment in &functions {
    emit.blank();
    emit.frame.reset(0);
    for instr in segment {
      emit.emit_instr(instr)?;
    }
  }

  emit.blank();
  emit.label("_script_start");
  emit.frame.reset(0);
  for instr in &script {
    emit.emit_instr(instr)?;
  }
  emit.blank();
  emit.label(EXIT);
  emit.line("li $v0, 10");
  emit.line("syscall");

  Ok(emit.out)
}

/// Splits the instruction stream into the `FUNC_START..FUNC_END` blocks and
/// everything else, preserving each group's relative order: functions are
/// emitted ahead of `_script_start` regardless of where their declarations
/// fell among the top-level statements that produced them.
fn partition_segments(prog: &TacProgram) -> (Vec<Vec<&TacInstr>>, Vec<&TacInstr>) {
  let mut functions = Vec::new();
  let mut script = Vec::new();
  let mut current: Option<Vec<&TacInstr>> = None;
  for instr in &prog.instructions {
    match instr.op {
      Op::FuncStart => current = Some(vec![instr]),
      Op::FuncEnd => {
        let mut seg = current.take().unwrap_or_default();
        seg.push(instr);
        functions.push(seg);
      }
      _ => {
        if let Some(seg) = current.as_mut() { seg.push(instr); } else { script.push(instr); }
      }
    }
  }
  (functions, script)
}

/// Data-scan results: every string literal and every global address seen
/// across the program, labeled in first-appearance order. Distinct
/// occurrences of an identical string share one label.
#[derive(Default)]
struct DataScan {
  strings: IndexMap<Rc<str>, String>,
  globals: IndexMap<u32, String>,
}

impl DataScan {
  fn scan(prog: &TacProgram) -> Self {
    let mut scan = Self::default();
    for instr in &prog.instructions {
      for operand in instr.operands() {
        match operand {
          Operand::StringConstant(s) => {
            let next = scan.strings.len();
            scan.strings.entry(Rc::clone(s)).or_insert_with(|| format!("_str_{next}"));
          }
          Operand::Global(addr) => {
            scan.globals.entry(*addr).or_insert_with(|| format!("global_{addr:04x}"));
          }
          _ => {}
        }
      }
    }
    scan
  }

  fn string_label(&self, s: &Rc<str>) -> Result<&str> {
    self.strings.get(s).map(String::as_str).ok_or_else(|| internal(format!("string {s:?} missing from data scan")))
  }

  fn global_label(&self, addr: u32) -> Result<&str> {
    self.globals.get(&addr).map(String::as_str)
      .ok_or_else(|| internal(format!("global 0x{addr:04x} missing from data scan")))
  }
}

/// Maps temporaries to stack slots below the current frame's locals area,
/// lazily on first reference. Reset at each `FUNC_START` and at the
/// function/script boundary.
#[derive(Default)]
struct FrameLayout {
  frame_size: i64,
  temp_offsets: std::collections::HashMap<u32, i64>,
}

impl FrameLayout {
  fn reset(&mut self, frame_size: i64) {
    self.frame_size = frame_size;
    self.temp_offsets.clear();
  }

  /// `-offset($fp)`, where `offset = frame_size + 4*(k-th seen temp)`.
  fn temp_location(&mut self, id: u32) -> String {
    if let Some(&offset) = self.temp_offsets.get(&id) {
      return Self::format_offset(offset);
    }
    let offset = self.frame_size + 4 * i64::try_from(self.temp_offsets.len()).unwrap_or(i64::MAX);
    self.temp_offsets.insert(id, offset);
    Self::format_offset(offset)
  }

  fn format_offset(offset: i64) -> String {
    if offset == 0 { "0($fp)".to_string() } else { format!("-{offset}($fp)") }
  }
}

fn escape_mips_string(s: &str) -> String {
  let mut out = String::with_capacity(s.len());
  for c in s.chars() {
    match c {
      '\\' => out.push_str("\\\\"),
      '\n' => out.push_str("\\n"),
      '"' => out.push_str("\\\""),
      _ => out.push(c),
    }
  }
  out
}

fn operand_name(op: &Operand) -> Result<&str> {
  match op {
    Operand::Name(n) => Ok(n),
    _ => Err(internal("expected a bare name operand")),
  }
}

fn field_offset_of(field: &Operand) -> Result<i64> {
  match field {
    // The array-header convention reuses plain FIELD_ACCESS for `.length`,
    // special-cased to offset 0 rather than resolved through a `ClassSymbol`.
    Operand::Name(n) if &**n == "length" => Ok(0),
    Operand::Constant(Literal::Int(n)) => Ok(*n),
    _ => Err(internal("FIELD_ACCESS field must be \"length\" or a resolved constant offset")),
  }
}

struct Emitter<'a> {
  classes: &'a IndexMap<String, Rc<RefCell<ClassSymbol>>>,
  opts: &'a CompilerOptions,
  data: DataScan,
  frame: FrameLayout,
  out: Vec<String>,
  internal_label_counter: u32,
}

impl Emitter<'_> {
  fn directive(&mut self, text: &str) { self.out.push(text.to_string()); }
  fn line(&mut self, text: impl Into<String>) { self.out.push(format!("  {}", text.into())); }
  fn label(&mut self, name: &str) { self.out.push(format!("{name}:")); }
  fn blank(&mut self) { self.out.push(String::new()); }

  fn fresh_internal_label(&mut self, tag: &str) -> String {
    let n = self.internal_label_counter;
    self.internal_label_counter += 1;
    format!("_{tag}_{n}")
  }

  fn emit_data_section(&mut self) {
    self.directive(".data");
    let globals: Vec<(u32, String)> = self.data.globals.iter().map(|(&a, l)| (a, l.clone())).collect();
    for (_, label) in globals {
      self.line(format!("{label}: .word 0"));
    }
    let strings: Vec<(Rc<str>, String)> =
      self.data.strings.iter().map(|(s, l)| (Rc::clone(s), l.clone())).collect();
    for (s, label) in strings {
      self.line(format!("{label}: .asciiz \"{}\"", escape_mips_string(&s)));
    }
    self.line("_newline: .asciiz \"\\n\"");
    self.line("_true_str: .asciiz \"true\"");
    self.line("_false_str: .asciiz \"false\"");
  }

  /// Fixed subroutines reachable only via `jal`, emitted once, ahead of
  /// `_script_start` just like the translated function bodies they sit
  /// alongside.
  fn emit_runtime_library(&mut self) {
    self.label(PRINT_INT);
    self.line("li $v0, 1");
    self.line("syscall");
    self.line("jr $ra");
    self.blank();

    self.label(PRINT_STRING);
    self.line("li $v0, 4");
    self.line("syscall");
    self.line("jr $ra");
    self.blank();

    self.label(PRINT_BOOLEAN);
    let false_label = self.fresh_internal_label("pb_false");
    let done_label = self.fresh_internal_label("pb_done");
    self.line(format!("beq $a0, $zero, {false_label}"));
    self.line("la $a0, _true_str");
    self.line(format!("j {done_label}"));
    self.label(&false_label);
    self.line("la $a0, _false_str");
    self.label(&done_label);
    self.line("li $v0, 4");
    self.line("syscall");
    self.line("jr $ra");
    self.blank();

    self.label(PRINT_NEWLINE);
    self.line("la $a0, _newline");
    self.line("li $v0, 4");
    self.line("syscall");
    self.line("jr $ra");
    self.blank();

    self.label(ALLOC);
    self.line("li $v0, 9");
    self.line("syscall");
    self.line("jr $ra");
    self.blank();

    self.label(STRING_LEN);
    self.line("move $t0, $a0");
    self.line("li $v0, 0");
    let loop_label = self.fresh_internal_label("slen_loop");
    let done_label = self.fresh_internal_label("slen_done");
    self.label(&loop_label);
    self.line("lb $t1, 0($t0)");
    self.line(format!("beq $t1, $zero, {done_label}"));
    self.line("addu $v0, $v0, 1");
    self.line("addu $t0, $t0, 1");
    self.line(format!("j {loop_label}"));
    self.label(&done_label);
    self.line("jr $ra");
    self.blank();

    self.label(STRING_CONCAT);
    self.line("subu $sp, $sp, 12");
    self.line("sw $a0, 0($sp)");
    self.line("sw $a1, 4($sp)");
    self.line(format!("jal {STRING_LEN}"));
    self.line("sw $v0, 8($sp)");
    self.line("lw $a0, 4($sp)");
    self.line(format!("jal {STRING_LEN}"));
    self.line("lw $t0, 8($sp)");
    self.line("addu $t1, $t0, $v0");
    self.line("addu $a0, $t1, 1");
    self.line("li $v0, 9");
    self.line("syscall");
    self.line("move $t2, $v0");
    self.line("move $t3, $v0");
    self.line("lw $t4, 0($sp)");
    let copy_a = self.fresh_internal_label("concat_copy_a");
    let copy_a_done = self.fresh_internal_label("concat_copy_a_done");
    self.label(&copy_a);
    self.line("lb $t5, 0($t4)");
    self.line(format!("beq $t5, $zero, {copy_a_done}"));
    self.line("sb $t5, 0($t3)");
    self.line("addu $t3, $t3, 1");
    self.line("addu $t4, $t4, 1");
    self.line(format!("j {copy_a}"));
    self.label(&copy_a_done);
    self.line("lw $t4, 4($sp)");
    let copy_b = self.fresh_internal_label("concat_copy_b");
    let copy_b_done = self.fresh_internal_label("concat_copy_b_done");
    self.label(&copy_b);
    self.line("lb $t5, 0($t4)");
    self.line(format!("beq $t5, $zero, {copy_b_done}"));
    self.line("sb $t5, 0($t3)");
    self.line("addu $t3, $t3, 1");
    self.line("addu $t4, $t4, 1");
    self.line(format!("j {copy_b}"));
    self.label(&copy_b_done);
    self.line("sb $zero, 0($t3)");
    self.line("move $v0, $t2");
    self.line("addu $sp, $sp, 12");
    self.line("jr $ra");
    self.blank();

    self.label(INT_TO_STRING);
    self.line("subu $sp, $sp, 8");
    self.line("sw $a0, 0($sp)");
    self.line("li $a0, 16");
    self.line("li $v0, 9");
    self.line("syscall");
    self.line("sw $v0, 4($sp)");
    self.line("lw $t0, 0($sp)");
    self.line("lw $t1, 4($sp)");
    self.line("addu $t1, $t1, 15");
    self.line("sb $zero, 0($t1)");
    self.line("li $t2, 0");
    let abs_label = self.fresh_internal_label("i2s_abs");
    self.line(format!("bgez $t0, {abs_label}"));
    self.line("li $t2, 1");
    self.line("subu $t0, $zero, $t0");
    self.label(&abs_label);
    let loop_label = self.fresh_internal_label("i2s_loop");
    let sign_label = self.fresh_internal_label("i2s_sign");
    let done_label = self.fresh_internal_label("i2s_done");
    self.line(format!("bne $t0, $zero, {loop_label}"));
    self.line("subu $t1, $t1, 1");
    self.line("li $t3, 48");
    self.line("sb $t3, 0($t1)");
    self.line(format!("j {sign_label}"));
    self.label(&loop_label);
    self.line(format!("beq $t0, $zero, {sign_label}"));
    self.line("li $t4, 10");
    self.line("divu $t0, $t4");
    self.line("mflo $t5");
    self.line("mfhi $t6");
    self.line("addu $t6, $t6, 48");
    self.line("subu $t1, $t1, 1");
    self.line("sb $t6, 0($t1)");
    self.line("move $t0, $t5");
    self.line(format!("j {loop_label}"));
    self.label(&sign_label);
    self.line(format!("beq $t2, $zero, {done_label}"));
    self.line("subu $t1, $t1, 1");
    self.line("li $t3, 45");
    self.line("sb $t3, 0($t1)");
    self.label(&done_label);
    self.line("move $v0, $t1");
    self.line("addu $sp, $sp, 8");
    self.line("jr $ra");
  }

  fn emit_load(&mut self, reg: &str, op: &Operand) -> Result<()> {
    match op {
      Operand::Temp(t) => {
        let loc = self.frame.temp_location(t.0);
        self.line(format!("lw {reg}, {loc}"));
      }
      Operand::FrameSlot(off) => self.line(format!("lw {reg}, {off}($fp)")),
      Operand::Global(addr) => {
        let label = self.data.global_label(*addr)?.to_string();
        self.line(format!("lw {reg}, {label}"));
      }
      Operand::Constant(Literal::Int(n)) => self.line(format!("li {reg}, {n}")),
      Operand::Constant(Literal::Bool(b)) => self.line(format!("li {reg}, {}", i32::from(*b))),
      Operand::StringConstant(s) => {
        let label = self.data.string_label(s)?.to_string();
        self.line(format!("la {reg}, {label}"));
      }
      Operand::Label(_) | Operand::Name(_) => return Err(internal("cannot load a label/name operand as a value")),
    }
    Ok(())
  }

  fn emit_store(&mut self, reg: &str, op: &Operand) -> Result<()> {
    match op {
      Operand::Temp(t) => {
        let loc = self.frame.temp_location(t.0);
        self.line(format!("sw {reg}, {loc}"));
      }
      Operand::FrameSlot(off) => self.line(format!("sw {reg}, {off}($fp)")),
      Operand::Global(addr) => {
        let label = self.data.global_label(*addr)?.to_string();
        self.line(format!("sw {reg}, {label}"));
      }
      _ => return Err(internal("cannot store into a non-memory operand")),
    }
    Ok(())
  }

  fn instance_size(&self, class_name: &str) -> Result<i64> {
    let class = self.classes.get(class_name)
      .ok_or_else(|| internal(format!("unknown class '{class_name}' in NEW")))?;
    let size = class.borrow().instance_size
      .ok_or_else(|| internal(format!("class '{class_name}' has no computed instance size")))?;
    Ok(i64::from(size))
  }

  fn emit_numeric_binary(&mut self, instr: &TacInstr, mnemonic: &str) -> Result<()> {
    let dst = instr.result.as_ref().ok_or_else(|| internal("binary op missing destination"))?;
    let a1 = instr.arg1.as_ref().ok_or_else(|| internal("binary op missing left operand"))?;
    let a2 = instr.arg2.as_ref().ok_or_else(|| internal("binary op missing right operand"))?;
    self.emit_load("$t0", a1)?;
    self.emit_load("$t1", a2)?;
    self.line(format!("{mnemonic} $t2, $t0, $t1"));
    self.emit_store("$t2", dst)
  }

  fn emit_add(&mut self, instr: &TacInstr) -> Result<()> {
    if instr.ty.as_ref() == Some(&Type::String) {
      let dst = instr.result.as_ref().ok_or_else(|| internal("ADD missing destination"))?;
      let a1 = instr.arg1.as_ref().ok_or_else(|| internal("ADD missing left operand"))?;
      let a2 = instr.arg2.as_ref().ok_or_else(|| internal("ADD missing right operand"))?;
      self.emit_load("$a0", a1)?;
      self.emit_load("$a1", a2)?;
      self.line(format!("jal {STRING_CONCAT}"));
      return self.emit_store("$v0", dst);
    }
    self.emit_numeric_binary(instr, "addu")
  }

  fn emit_divmod(&mut self, instr: &TacInstr) -> Result<()> {
    let dst = instr.result.as_ref().ok_or_else(|| internal("DIV/MOD missing destination"))?;
    let a1 = instr.arg1.as_ref().ok_or_else(|| internal("DIV/MOD missing left operand"))?;
    let a2 = instr.arg2.as_ref().ok_or_else(|| internal("DIV/MOD missing right operand"))?;
    self.emit_load("$t0", a1)?;
    self.emit_load("$t1", a2)?;
    self.line("div $t0, $t1");
    self.line("mflo $t2");
    self.line("mfhi $t3");
    if self.opts.division == DivisionSemantics::Floor {
      // Floor-correct the hardware's truncating quotient/remainder: when
      // the remainder is nonzero and the operand signs differ, decrement
      // the quotient and add the divisor back into the remainder.
      let skip = self.fresh_internal_label("fdiv");
      self.line(format!("beq $t3, $zero, {skip}"));
      self.line("xor $t4, $t0, $t1");
      self.line(format!("bgez $t4, {skip}"));
      self.line("addi $t2, $t2, -1");
      self.line("add $t3, $t3, $t1");
      self.label(&skip);
    }
    let reg = if instr.op == Op::Div { "$t2" } else { "$t3" };
    self.emit_store(reg, dst)
  }

  fn emit_unary(&mut self, instr: &TacInstr) -> Result<()> {
    let dst = instr.result.as_ref().ok_or_else(|| internal("unary op missing destination"))?;
    let src = instr.arg1.as_ref().ok_or_else(|| internal("unary op missing operand"))?;
    self.emit_load("$t0", src)?;
    if instr.op == Op::Neg { self.line("neg $t1, $t0"); } else { self.line("seq $t1, $t0, $zero"); }
    self.emit_store("$t1", dst)
  }

  fn emit_array_access(&mut self, instr: &TacInstr) -> Result<()> {
    let dst = instr.result.as_ref().ok_or_else(|| internal("ARRAY_ACCESS missing destination"))?;
    let base = instr.arg1.as_ref().ok_or_else(|| internal("ARRAY_ACCESS missing base"))?;
    let index = instr.arg2.as_ref().ok_or_else(|| internal("ARRAY_ACCESS missing index"))?;
    self.emit_load("$t0", base)?;
    self.emit_load("$t1", index)?;
    self.line("sll $t1, $t1, 2");
    self.line(format!("addu $t0, $t0, {ARRAY_HEADER_BYTES}"));
    self.line("addu $t0, $t0, $t1");
    self.line("lw $t2, 0($t0)");
    self.emit_store("$t2", dst)
  }

  fn emit_array_assign(&mut self, instr: &TacInstr) -> Result<()> {
    let base = instr.result.as_ref().ok_or_else(|| internal("ARRAY_ASSIGN missing base"))?;
    let index = instr.arg1.as_ref().ok_or_else(|| internal("ARRAY_ASSIGN missing index"))?;
    let value = instr.arg2.as_ref().ok_or_else(|| internal("ARRAY_ASSIGN missing value"))?;
    self.emit_load("$t0", base)?;
    self.emit_load("$t1", index)?;
    self.line("sll $t1, $t1, 2");
    self.line(format!("addu $t0, $t0, {ARRAY_HEADER_BYTES}"));
    self.line("addu $t0, $t0, $t1");
    self.emit_load("$t2", value)?;
    self.line("sw $t2, 0($t0)");
    Ok(())
  }

  fn emit_field_access(&mut self, instr: &TacInstr) -> Result<()> {
    let dst = instr.result.as_ref().ok_or_else(|| internal("FIELD_ACCESS missing destination"))?;
    let obj = instr.arg1.as_ref().ok_or_else(|| internal("FIELD_ACCESS missing object"))?;
    let field = instr.arg2.as_ref().ok_or_else(|| internal("FIELD_ACCESS missing field"))?;
    let offset = field_offset_of(field)?;
    self.emit_load("$t0", obj)?;
    self.line(format!("lw $t1, {offset}($t0)"));
    self.emit_store("$t1", dst)
  }

  fn emit_field_assign(&mut self, instr: &TacInstr) -> Result<()> {
    let obj = instr.result.as_ref().ok_or_else(|| internal("FIELD_ASSIGN missing object"))?;
    let offset_op = instr.arg1.as_ref().ok_or_else(|| internal("FIELD_ASSIGN missing offset"))?;
    let value = instr.arg2.as_ref().ok_or_else(|| internal("FIELD_ASSIGN missing value"))?;
    let offset = offset_op.as_int().ok_or_else(|| internal("FIELD_ASSIGN offset must be a constant"))?;
    self.emit_load("$t0", obj)?;
    self.emit_load("$t1", value)?;
    self.line(format!("sw $t1, {offset}($t0)"));
    Ok(())
  }

  fn emit_new(&mut self, instr: &TacInstr) -> Result<()> {
    let dst = instr.result.as_ref().ok_or_else(|| internal("NEW missing destination"))?;
    let arg = instr.arg1.as_ref().ok_or_else(|| internal("NEW missing size/class operand"))?;
    if let Some(n) = arg.as_int() {
      let bytes = ARRAY_HEADER_BYTES + 4 * n;
      self.line(format!("li $a0, {bytes}"));
      self.line(format!("jal {ALLOC}"));
      self.line(format!("li $t0, {n}"));
      self.line("sw $t0, 0($v0)");
      return self.emit_store("$v0", dst);
    }
    if let Ok(class_name) = operand_name(arg) {
      let class_name = class_name.to_string();
      let size = self.instance_size(&class_name)?;
      self.line(format!("li $a0, {size}"));
      self.line(format!("jal {ALLOC}"));
      return self.emit_store("$v0", dst);
    }
    Err(internal("NEW operand must be an element count or a class name"))
  }

  fn emit_print(&mut self, instr: &TacInstr) -> Result<()> {
    let value = instr.arg1.as_ref().ok_or_else(|| internal("PRINT missing operand"))?;
    self.emit_load("$a0", value)?;
    match &instr.ty {
      Some(Type::String) => self.line(format!("jal {PRINT_STRING}")),
      Some(Type::Boolean) => self.line(format!("jal {PRINT_BOOLEAN}")),
      _ => self.line(format!("jal {PRINT_INT}")),
    }
    self.line(format!("jal {PRINT_NEWLINE}"));
    Ok(())
  }

  fn emit_call(&mut self, instr: &TacInstr) -> Result<()> {
    let callee = instr.arg1.as_ref().ok_or_else(|| internal("CALL missing callee"))?;
    let n_args = instr.arg2.as_ref().and_then(Operand::as_int)
      .ok_or_else(|| internal("CALL missing argument count"))?;
    if let Operand::Name(name) = callee {
      if &**name == "toString" {
        // The integer receiver sits at `0($sp)` when pushed alone, `4($sp)`
        // when a second argument was pushed ahead of it (never actually
        // exercised by this generator's own call sites, but kept general).
        let offset = if n_args <= 1 { 0 } else { 4 };
        self.line(format!("lw $a0, {offset}($sp)"));
        self.line(format!("jal {INT_TO_STRING}"));
      } else {
        self.line(format!("jal {name}"));
      }
    } else {
      self.emit_load("$t0", callee)?;
      self.line("jalr $t0");
    }
    if let Some(dst) = &instr.result { self.emit_store("$v0", dst)?; }
    Ok(())
  }

  fn emit_instr(&mut self, instr: &TacInstr) -> Result<()> {
    match instr.op {
      Op::Label => {
        let l = instr.result.as_ref().and_then(Operand::as_label).ok_or_else(|| internal("LABEL missing target"))?;
        self.label(&format!("L{}", l.0));
      }
      Op::Goto => {
        let l = instr.arg1.as_ref().and_then(Operand::as_label).ok_or_else(|| internal("GOTO missing target"))?;
        self.line(format!("j L{}", l.0));
      }
      Op::IfTrue => {
        let cond = instr.arg1.as_ref().ok_or_else(|| internal("IF_TRUE missing condition"))?;
        let l = instr.arg2.as_ref().and_then(Operand::as_label).ok_or_else(|| internal("IF_TRUE missing target"))?;
        self.emit_load("$t0", cond)?;
        self.line(format!("bne $t0, $zero, L{}", l.0));
      }
      Op::IfFalse => {
        let cond = instr.arg1.as_ref().ok_or_else(|| internal("IF_FALSE missing condition"))?;
        let l = instr.arg2.as_ref().and_then(Operand::as_label).ok_or_else(|| internal("IF_FALSE missing target"))?;
        self.emit_load("$t0", cond)?;
        self.line(format!("beq $t0, $zero, L{}", l.0));
      }
      Op::FuncStart => {
        let label = instr.arg1.as_ref().ok_or_else(|| internal("FUNC_START missing label"))?;
        let name = operand_name(label)?.to_string();
        self.label(&name);
      }
      Op::FuncEnd => {}
      Op::Enter => {
        let n = instr.arg1.as_ref().and_then(Operand::as_int).ok_or_else(|| internal("ENTER missing frame size"))?;
        self.frame.reset(n);
        self.line("subu $sp, $sp, 8");
        self.line("sw $ra, 4($sp)");
        self.line("sw $fp, 0($sp)");
        self.line("move $fp, $sp");
        if n != 0 { self.line(format!("subu $sp, $sp, {n}")); }
      }
      Op::Leave => {
        self.line("move $sp, $fp");
        self.line("lw $fp, 0($sp)");
        self.line("lw $ra, 4($sp)");
        self.line("addu $sp, $sp, 8");
      }
      Op::Return => {
        if let Some(v) = &instr.arg1 { self.emit_load("$v0", v)?; }
        self.line("jr $ra");
      }
      Op::Push => {
        let v = instr.arg1.as_ref().ok_or_else(|| internal("PUSH missing value"))?;
        self.emit_load("$t0", v)?;
        self.line("subu $sp, $sp, 4");
        self.line("sw $t0, 0($sp)");
      }
      Op::Pop => {
        self.line("lw $t0, 0($sp)");
        self.line("addu $sp, $sp, 4");
        if let Some(dst) = &instr.result { self.emit_store("$t0", dst)?; }
      }
      Op::AddSp => {
        let n = instr.arg1.as_ref().and_then(Operand::as_int).ok_or_else(|| internal("ADD_SP missing amount"))?;
        if n != 0 { self.line(format!("addu $sp, $sp, {n}")); }
      }
      Op::Call => self.emit_call(instr)?,
      Op::Assign => {
        let dst = instr.result.as_ref().ok_or_else(|| internal("ASSIGN missing destination"))?;
        let src = instr.arg1.as_ref().ok_or_else(|| internal("ASSIGN missing source"))?;
        self.emit_load("$t0", src)?;
        self.emit_store("$t0", dst)?;
      }
      Op::Deref => {
        let dst = instr.result.as_ref().ok_or_else(|| internal("DEREF missing destination"))?;
        let addr = instr.arg1.as_ref().ok_or_else(|| internal("DEREF missing address"))?;
        self.emit_load("$t0", addr)?;
        self.line("lw $t1, 0($t0)");
        self.emit_store("$t1", dst)?;
      }
      Op::Neg | Op::Not => self.emit_unary(instr)?,
      Op::Add => self.emit_add(instr)?,
      Op::Sub => self.emit_numeric_binary(instr, "subu")?,
      Op::Mul => self.emit_numeric_binary(instr, "mul")?,
      Op::Div | Op::Mod => self.emit_divmod(instr)?,
      Op::And => self.emit_numeric_binary(instr, "and")?,
      Op::Or => self.emit_numeric_binary(instr, "or")?,
      Op::Lt => self.emit_numeric_binary(instr, "slt")?,
      Op::Le => self.emit_numeric_binary(instr, "sle")?,
      Op::Gt => self.emit_numeric_binary(instr, "sgt")?,
      Op::Ge => self.emit_numeric_binary(instr, "sge")?,
      Op::Eq => self.emit_numeric_binary(instr, "seq")?,
      Op::Ne => self.emit_numeric_binary(instr, "sne")?,
      Op::ArrayAccess => self.emit_array_access(instr)?,
      Op::ArrayAssign => self.emit_array_assign(instr)?,
      Op::FieldAccess => self.emit_field_access(instr)?,
      Op::FieldAssign => self.emit_field_assign(instr)?,
      Op::New => self.emit_new(instr)?,
      Op::Print => self.emit_print(instr)?,
      Op::Param => return Err(internal("PARAM is a reserved opcode this generator never emits or expects")),
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::tac::TempId;

  fn opts() -> CompilerOptions { CompilerOptions::default() }
  fn no_classes() -> IndexMap<String, Rc<RefCell<ClassSymbol>>> { IndexMap::new() }

  #[test]
  fn addition_of_constants_loads_and_stores_through_a_temp_slot() {
    let mut prog = TacProgram::new();
    let t0 = prog.new_temp();
    prog.emit(TacInstr::new(Op::Add).r(Operand::Temp(t0)).a1(Operand::int(2)).a2(Operand::int(3)));
    let out = generate(&prog, &no_classes(), &opts()).unwrap();
    assert!(out.iter().any(|l| l.contains("li $t0, 2")));
    assert!(out.iter().any(|l| l.contains("li $t1, 3")));
    assert!(out.iter().any(|l| l.contains("addu $t2, $t0, $t1")));
  }

  #[test]
  fn string_typed_add_routes_through_string_concat() {
    let mut prog = TacProgram::new();
    let t0 = prog.new_temp();
    let instr = TacInstr::new(Op::Add)
      .r(Operand::Temp(t0))
      .a1(Operand::string("ab"))
      .a2(Operand::string("cd"))
      .with_ty(Type::String);
    prog.emit(instr);
    let out = generate(&prog, &no_classes(), &opts()).unwrap();
    assert!(out.iter().any(|l| l.contains(&format!("jal {STRING_CONCAT}"))));
  }

  #[test]
  fn division_emits_floor_correction_under_default_semantics() {
    let mut prog = TacProgram::new();
    let t0 = prog.new_temp();
    prog.emit(TacInstr::new(Op::Div).r(Operand::Temp(t0)).a1(Operand::int(-7)).a2(Operand::int(2)));
    let out = generate(&prog, &no_classes(), &opts()).unwrap();
    assert!(out.iter().any(|l| l.trim() == "div $t0, $t1"));
    assert!(out.iter().any(|l| l.contains("addi $t2, $t2, -1")));
  }

  #[test]
  fn truncating_semantics_skips_floor_correction() {
    let mut prog = TacProgram::new();
    let t0 = prog.new_temp();
    prog.emit(TacInstr::new(Op::Div).r(Operand::Temp(t0)).a1(Operand::int(-7)).a2(Operand::int(2)));
    let mut custom = CompilerOptions::default();
    custom.division = DivisionSemantics::Truncating;
    let out = generate(&prog, &no_classes(), &custom).unwrap();
    assert!(!out.iter().any(|l| l.contains("addi $t2, $t2, -1")));
  }

  #[test]
  fn print_dispatches_on_operand_type() {
    let mut prog = TacProgram::new();
    prog.emit(TacInstr::new(Op::Print).a1(Operand::string("hi")).with_ty(Type::String));
    let out = generate(&prog, &no_classes(), &opts()).unwrap();
    assert!(out.iter().any(|l| l.contains(&format!("jal {PRINT_STRING}"))));
    assert!(out.iter().any(|l| l.contains(&format!("jal {PRINT_NEWLINE}"))));
  }

  #[test]
  fn new_array_allocates_header_plus_element_words() {
    let mut prog = TacProgram::new();
    let t0 = prog.new_temp();
    prog.emit(TacInstr::new(Op::New).r(Operand::Temp(t0)).a1(Operand::int(3)));
    let out = generate(&prog, &no_classes(), &opts()).unwrap();
    assert!(out.iter().any(|l| l.contains("li $a0, 16")));
  }

  #[test]
  fn function_bodies_are_emitted_before_script_start() {
    let mut prog = TacProgram::new();
    prog.emit(TacInstr::new(Op::FuncStart).a1(Operand::name("Foo_bar")));
    prog.emit(TacInstr::new(Op::Enter).a1(Operand::int(0)));
    prog.emit(TacInstr::new(Op::Leave));
    prog.emit(TacInstr::new(Op::FuncEnd).a1(Operand::name("Foo_bar")));
    prog.emit(TacInstr::new(Op::Print).a1(Operand::int(1)));
    let out = generate(&prog, &no_classes(), &opts()).unwrap();
    let func_pos = out.iter().position(|l| l == "Foo_bar:").unwrap();
    let script_pos = out.iter().position(|l| l == "_script_start:").unwrap();
    assert!(func_pos < script_pos);
  }

  #[test]
  fn temp_slots_reset_across_function_and_script_segments() {
    let mut prog = TacProgram::new();
    prog.emit(TacInstr::new(Op::FuncStart).a1(Operand::name("F")));
    prog.emit(TacInstr::new(Op::Enter).a1(Operand::int(12)));
    prog.emit(TacInstr::new(Op::Assign).r(Operand::Temp(TempId(0))).a1(Operand::int(1)));
    prog.emit(TacInstr::new(Op::Leave));
    prog.emit(TacInstr::new(Op::FuncEnd).a1(Operand::name("F")));
    prog.emit(TacInstr::new(Op::Assign).r(Operand::Temp(TempId(0))).a1(Operand::int(2)));
    let out = generate(&prog, &no_classes(), &opts()).unwrap();
    // Inside F (frame_size 12) t0 is the first temp seen -> -12($fp); in the
    // script segment (frame_size 0) the same numeric id starts over at 0($fp).
    assert!(out.iter().any(|l| l.contains("-12($fp)")));
    assert!(out.iter().any(|l| l.trim() == "sw $t0, 0($fp)"));
  }
}
