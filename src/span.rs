//! Source position tracking.
//!
//! The parser is an external collaborator: it is assumed to attach a
//! [`Span`] to every AST node it produces. This mirrors `mm0_util::FileSpan`,
//! which `build_mir.rs`/`types/entity.rs` thread through every typed node
//! without owning its definition; here we own it, since no sibling
//! `mm0_util`-style crate ships in this workspace.

/// A 1-indexed `(line, column)` source position, attached to every AST node
/// and carried into semantic errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Span {
  pub line: u32,
  pub column: u32,
}

impl Span {
  #[must_use] pub fn new(line: u32, column: u32) -> Self { Self { line, column } }

  /// A placeholder span for synthetic nodes that do not come from source
  /// text (e.g. desugared `foreach` loop bookkeeping).
  #[must_use] pub const fn synthetic() -> Self { Self { line: 0, column: 0 } }
}

impl std::fmt::Display for Span {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}:{}", self.line, self.column)
  }
}
