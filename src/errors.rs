//! The error taxonomy and the `ErrorCollector` that accumulates diagnostics
//! across Pass 1 and Pass 2, a direct translation of `semantic/errors.py`'s
//! `ErrorCollector`/`SemError`.
//!
//! Error codes are an exhaustive enum, not a bare
//! string, so a missing `match` arm in a reporting front end is a compile
//! error rather than a silent typo.

use std::fmt;
use crate::span::Span;

/// One semantic diagnostic code from the type checker's rule table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize)]
#[allow(non_camel_case_types)]
pub enum SemErrorCode {
  E001, E002, E004, E005, E006,
  E010, E011, E012, E013, E014, E015,
  E020, E021, E022,
  E030, E031, E032, E033, E034,
  E037,
  E040, E041, E042, E043,
  E051, E052, E053, E054,
  E060, E061,
  E070,
}

impl fmt::Display for SemErrorCode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{self:?}") }
}

/// A single accumulated semantic error: `[CODE] (line:col) message`.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct SemanticError {
  pub span: Span,
  pub code: SemErrorCode,
  pub message: String,
}

impl fmt::Display for SemanticError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "[{}] ({}) {}", self.code, self.span, self.message)
  }
}

/// Accumulates diagnostics across a compilation instead of failing fast.
/// Pass 2 keeps walking after every reported error (poisoning the
/// offending expression's type with `Type::Null`) so unrelated mistakes in
/// the same file are still found in one pass.
#[derive(Clone, Debug, Default)]
pub struct ErrorCollector {
  errors: Vec<SemanticError>,
}

impl ErrorCollector {
  #[must_use] pub fn new() -> Self { Self::default() }

  pub fn report(&mut self, span: Span, code: SemErrorCode, message: impl Into<String>) {
    log::debug!("semantic error {code} at {span}");
    self.errors.push(SemanticError { span, code, message: message.into() });
  }

  #[must_use] pub fn has_errors(&self) -> bool { !self.errors.is_empty() }
  #[must_use] pub fn errors(&self) -> &[SemanticError] { &self.errors }
  #[must_use] pub fn into_errors(self) -> Vec<SemanticError> { self.errors }

  /// `[CODE] (line:col) message`, one per line, in report order.
  #[must_use] pub fn pretty(&self) -> String {
    self.errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("\n")
  }
}

/// A fatal condition: an invariant the front end guaranteed before handing
/// us the AST turned out not to hold, or an internal code-generation error.
/// These must never arise from merely-invalid *source*; that always goes
/// through `SemanticError` accumulation and stops TAC/MIPS generation
/// before it starts (see `driver::compile`).
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
  /// `TAC_ERR`: the TAC generator hit a state its invariants say is
  /// unreachable for a semantically-checked AST (e.g. an unresolved symbol
  /// that Pass 2 should have already rejected).
  #[error("TAC_ERR: {0}")]
  TacGeneration(String),
  /// The MIPS generator hit a state its invariants say is unreachable for
  /// a well-formed TAC program (e.g. a `GOTO` to a label that does not
  /// exist, a `FIELD_ACCESS` on a class with no such field).
  #[error("MIPS_ERR: {0}")]
  MipsGeneration(String),
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn pretty_prints_code_span_message() {
    let mut c = ErrorCollector::new();
    c.report(Span::new(3, 7), SemErrorCode::E005, "cannot assign to const 'k'");
    assert_eq!(c.pretty(), "[E005] (3:7) cannot assign to const 'k'");
  }

  #[test]
  fn empty_collector_has_no_errors() {
    assert!(!ErrorCollector::new().has_errors());
  }
}
