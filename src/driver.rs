//! The compilation driver: wires the pipeline stages into the single entry
//! point an embedder (the IDE collaborator, a future CLI, a test) calls.
//! Each stage owns its own state (`Pass1Result`, `Pass2Result`,
//! `TacProgram`) — nothing here is shared mutable state across
//! compilations: a fresh run for one `Program` never touches another run's
//! data.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::ast::Program;
use crate::config::CompilerOptions;
use crate::errors::{CompileError, SemanticError};
use crate::pass1::{self, Pass1Result};
use crate::pass2::{self, Pass2Result};
use crate::symtab::ClassSymbol;
use crate::tac::TacProgram;
use crate::{mips, optimize, tacgen};

/// The outcome of Pass 1 + Pass 2 alone, before TAC/MIPS are attempted.
/// Kept separate from [`CompileOutput`] because `ide.rs` wants symbol
/// information even when semantic errors stop the pipeline short of TAC.
pub struct Analysis {
  pub p1: Pass1Result,
  pub p2: Pass2Result,
}

impl Analysis {
  #[must_use] pub fn errors(&self) -> Vec<SemanticError> {
    self.p1.errors.errors().iter().chain(self.p2.errors.errors()).cloned().collect()
  }

  #[must_use] pub fn has_errors(&self) -> bool {
    self.p1.errors.has_errors() || self.p2.errors.has_errors()
  }

  #[must_use] pub fn classes(&self) -> &IndexMap<String, Rc<RefCell<ClassSymbol>>> { &self.p1.classes }
}

/// Everything a successful full-pipeline run produces. `tac` is the
/// post-optimizer program (or the raw one, if `opts.optimize` was false);
/// `mips` is the emitted assembly text.
pub struct CompileOutput {
  pub analysis: Analysis,
  pub tac: TacProgram,
  pub mips: Vec<String>,
}

/// Runs Pass 1 and Pass 2 only. Both passes always run to completion on a
/// syntactically valid AST — there is no early return on the first error,
/// so a caller sees every diagnostic in one shot.
#[must_use] pub fn analyze(program: &Program) -> Analysis {
  log::debug!("driver: running pass 1 (symbol collection)");
  let p1 = pass1::run(program);
  log::debug!("driver: pass 1 produced {} scope(s), {} class(es)", p1.scope_by_node.len(), p1.classes.len());
  log::debug!("driver: running pass 2 (type checking)");
  let p2 = pass2::run(program, &p1);
  log::debug!(
    "driver: analysis complete, {} semantic error(s)",
    p1.errors.errors().len() + p2.errors.errors().len()
  );
  Analysis { p1, p2 }
}

/// Runs the full pipeline: analysis, then — only if analysis produced no
/// semantic errors (semantic errors are accumulated and stop the pipeline
/// before TAC generation begins) — TAC generation, optimization, and MIPS
/// emission.
///
/// Returns `Err` only for fatal conditions (`TAC_ERR`/`MIPS_ERR`); a
/// semantically invalid-but-syntactically-well-formed program is not an
/// `Err` here, it is an `Ok(Analysis)` with `has_errors() == true` and no
/// TAC/MIPS attempted — callers check `has_errors()` before reading `tac`.
pub fn compile(program: &Program, opts: &CompilerOptions) -> Result<CompileOutput, (Analysis, CompileError)> {
  let analysis = analyze(program);
  if analysis.has_errors() {
    log::warn!("driver: stopping before TAC generation, {} semantic error(s) pending", analysis.errors().len());
    return Ok(CompileOutput { tac: TacProgram::new(), mips: Vec::new(), analysis });
  }
  match generate_tac_and_mips(program, &analysis, opts) {
    Ok((tac, mips)) => Ok(CompileOutput { analysis, tac, mips }),
    Err(e) => Err((analysis, e)),
  }
}

fn generate_tac_and_mips(
  program: &Program, analysis: &Analysis, opts: &CompilerOptions,
) -> Result<(TacProgram, Vec<String>), CompileError> {
  log::debug!("driver: running TAC generator");
  let mut tac = tacgen::generate(program, &analysis.p1, &analysis.p2, opts)?;
  if opts.optimize {
    log::debug!("driver: running TAC optimizer ({} instruction(s) before)", tac.instructions.len());
    optimize::optimize(&mut tac, opts);
    log::debug!("driver: TAC optimizer finished ({} instruction(s) after)", tac.instructions.len());
  }
  log::debug!("driver: running MIPS generator");
  let mips = mips::generate(&tac, analysis.classes(), opts)?;
  Ok((tac, mips))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ast::{AstBuilder, TypeAnnotation};
  use crate::span::Span;

  /// `let x: integer = 2 + 3 * 4; print(x);` prints `14`.
  #[test]
  fn constant_arithmetic_compiles_and_emits_mips() {
    let mut b = AstBuilder::new();
    let sp = Span::new(1, 1);
    let expr = b.additive(sp, crate::ast::AddOp::Add,
      b.int(sp, 2),
      b.multiplicative(sp, crate::ast::MulOp::Mul, b.int(sp, 3), b.int(sp, 4)));
    let decl = b.var_decl(sp, "x", Some(TypeAnnotation::new("integer", 0)), Some(expr));
    let print = b.print_stmt(sp, b.ident(sp, "x"));
    let program = b.program(vec![decl, print]);

    let out = compile(&program, &CompilerOptions::default()).expect("no fatal error");
    assert!(!out.analysis.has_errors(), "{:?}", out.analysis.errors());
    assert!(out.mips.iter().any(|l| l.contains("_print_int")));
  }

  /// Assigning to a `const` after declaration reports `E005` and stops
  /// short of TAC generation.
  #[test]
  fn const_reassignment_reports_e005_without_tac() {
    let mut b = AstBuilder::new();
    let sp = Span::new(1, 1);
    let decl = b.const_decl(sp, "k", Some(TypeAnnotation::new("integer", 0)), b.int(sp, 10));
    let reassign = b.expr_stmt(sp, b.assign(sp, b.ident(sp, "k"), b.int(sp, 11)));
    let program = b.program(vec![decl, reassign]);

    let out = compile(&program, &CompilerOptions::default()).expect("no fatal error");
    assert!(out.analysis.has_errors());
    assert!(out.analysis.errors().iter().any(|e| e.code == crate::errors::SemErrorCode::E005));
    assert!(out.tac.instructions.is_empty());
    assert!(out.mips.is_empty());
  }
}
