//! Compilation options threaded through the driver. This crate has no CLI
//! of its own (a front end embeds it and supplies one), so options arrive as
//! a plain, serializable value rather than being parsed from `argv` here.

use serde::{Deserialize, Serialize};

/// Integer division rounds toward negative infinity ("floor"), matching the
/// source language's `//`. MIPS's `div` instruction truncates toward zero,
/// so the code generator emits a correction sequence whenever this mode is
/// selected; `Truncating` skips it and is kept only for comparison against
/// a plain hardware `div`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DivisionSemantics {
  Floor,
  Truncating,
}

impl Default for DivisionSemantics {
  fn default() -> Self { DivisionSemantics::Floor }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilerOptions {
  pub division: DivisionSemantics,
  /// Run the local TAC optimization passes before code generation.
  pub optimize: bool,
  /// Cap on optimizer pass iterations before giving up on reaching a fixed
  /// point; a fixed point is almost always reached well under this.
  pub max_optimizer_rounds: u32,
}

impl Default for CompilerOptions {
  fn default() -> Self {
    Self { division: DivisionSemantics::Floor, optimize: true, max_optimizer_rounds: 16 }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_match_source_language_semantics() {
    let opts = CompilerOptions::default();
    assert_eq!(opts.division, DivisionSemantics::Floor);
    assert!(opts.optimize);
  }
}
