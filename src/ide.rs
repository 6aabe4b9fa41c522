//! The "thin" IDE collaborator contract: the response shape an `ide/server.py`-style
//! front end hands back over HTTP, built here without any HTTP, router, or
//! socket code — an embedder wires [`CompileResponse`] to whatever
//! transport it likes.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use serde::Serialize;

use crate::ast::{NodeId, Program};
use crate::config::CompilerOptions;
use crate::driver::{self, Analysis};
use crate::errors::SemanticError;
use crate::symtab::{Scope, ScopeView, SymbolView};
use crate::tac::TacProgram;

#[derive(Clone, Debug, Serialize)]
pub struct ErrorReport {
  pub line: u32,
  pub column: u32,
  pub code: String,
  pub message: String,
}

impl From<&SemanticError> for ErrorReport {
  fn from(e: &SemanticError) -> Self {
    ErrorReport { line: e.span.line, column: e.span.column, code: e.code.to_string(), message: e.message.clone() }
  }
}

#[derive(Clone, Debug, Serialize)]
pub struct TacStats {
  pub instructions: usize,
  pub temporaries: u32,
  pub labels: u32,
}

#[derive(Clone, Debug, Serialize)]
pub struct TacReport {
  pub code: Vec<String>,
  pub stats: TacStats,
}

impl TacReport {
  #[must_use] pub fn from_program(prog: &TacProgram) -> Self {
    TacReport {
      code: prog.render(),
      stats: TacStats {
        instructions: prog.instructions.len(),
        temporaries: prog.temp_count(),
        labels: prog.label_count(),
      },
    }
  }
}

/// `{ok, errors, symbols, tac?}`. `ok` is `errors.is_empty()`; present as
/// its own field (rather than derived by callers) because the response is
/// read by an HTTP layer that maps it straight to status 422/200 without
/// inspecting `errors`.
#[derive(Clone, Debug, Serialize)]
pub struct CompileResponse {
  pub ok: bool,
  pub errors: Vec<ErrorReport>,
  pub symbols: ScopeView,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub tac: Option<TacReport>,
}

/// Builds the scope *tree* out of the flat `scope_by_node: NodeId -> Scope`
/// map Pass 1 produces: `Scope` only stores a parent pointer, so children
/// are recovered here by grouping the distinct scopes reachable from
/// `scope_by_node` by parent
/// identity, then recursing from `global`. Scopes are deduplicated by `Rc`
/// pointer identity (several AST nodes can map to the same scope, e.g. a
/// function declaration and its own body) and ordered by the `NodeId` that
/// first introduced them, which matches declaration order since `NodeId`s
/// are assigned monotonically by the AST builder/parser.
fn build_scope_tree(global: &Rc<RefCell<Scope>>, scope_by_node: &HashMap<NodeId, Rc<RefCell<Scope>>>) -> ScopeView {
  let mut seen: Vec<(NodeId, Rc<RefCell<Scope>>)> = Vec::new();
  for (node, scope) in scope_by_node {
    if !seen.iter().any(|(_, s)| Rc::ptr_eq(s, scope)) {
      seen.push((*node, Rc::clone(scope)));
    }
  }
  seen.sort_by_key(|(node, _)| node.0);

  fn children_of(parent: &Rc<RefCell<Scope>>, pool: &[(NodeId, Rc<RefCell<Scope>>)]) -> Vec<Rc<RefCell<Scope>>> {
    pool.iter()
      .filter(|(_, s)| !Rc::ptr_eq(s, parent))
      .filter(|(_, s)| s.borrow().parent.as_ref().is_some_and(|p| Rc::ptr_eq(p, parent)))
      .map(|(_, s)| Rc::clone(s))
      .collect()
  }

  fn view(scope: &Rc<RefCell<Scope>>, pool: &[(NodeId, Rc<RefCell<Scope>>)]) -> ScopeView {
    let s = scope.borrow();
    ScopeView {
      scope_name: s.name.clone(),
      symbols: s.symbols.values().map(SymbolView::from).collect(),
      children: children_of(scope, pool).iter().map(|c| view(c, pool)).collect(),
    }
  }

  view(global, &seen)
}

/// Runs the full pipeline (`driver::compile`) and projects its outcome
/// into the IDE collaborator's response shape. `want_tac` mirrors the
/// original endpoint's `?tac=1` query flag: TAC is expensive to render as
/// text and most editor round-trips only want diagnostics plus the symbol
/// table.
#[must_use] pub fn compile(program: &Program, opts: &CompilerOptions, want_tac: bool) -> CompileResponse {
  match driver::compile(program, opts) {
    Ok(out) => response_from_analysis(&out.analysis, want_tac.then_some(&out.tac)),
    Err((analysis, fatal)) => {
      let mut resp = response_from_analysis(&analysis, None);
      resp.ok = false;
      resp.errors.push(ErrorReport {
        line: 0, column: 0, code: "TAC_ERR".to_string(), message: fatal.to_string(),
      });
      resp
    }
  }
}

fn response_from_analysis(analysis: &Analysis, tac: Option<&TacProgram>) -> CompileResponse {
  let errors: Vec<ErrorReport> = analysis.errors().iter().map(ErrorReport::from).collect();
  CompileResponse {
    ok: errors.is_empty(),
    symbols: build_scope_tree(&analysis.p1.global, &analysis.p1.scope_by_node),
    errors,
    tac: tac.map(TacReport::from_program),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ast::AstBuilder;
  use crate::span::Span;

  #[test]
  fn ok_response_has_no_errors_and_includes_tac_when_requested() {
    let mut b = AstBuilder::new();
    let sp = Span::new(1, 1);
    let decl = b.var_decl(sp, "x", Some(crate::ast::TypeAnnotation::new("integer", 0)), Some(b.int(sp, 1)));
    let program = b.program(vec![decl]);

    let resp = compile(&program, &CompilerOptions::default(), true);
    assert!(resp.ok);
    assert!(resp.errors.is_empty());
    assert_eq!(resp.symbols.scope_name, "global");
    assert!(resp.tac.is_some());
  }

  #[test]
  fn error_response_omits_tac_and_reports_every_diagnostic() {
    let mut b = AstBuilder::new();
    let sp = Span::new(2, 5);
    let decl = b.const_decl(sp, "k", Some(crate::ast::TypeAnnotation::new("integer", 0)), b.int(sp, 1));
    let reassign = b.expr_stmt(sp, b.assign(sp, b.ident(sp, "k"), b.int(sp, 2)));
    let program = b.program(vec![decl, reassign]);

    let resp = compile(&program, &CompilerOptions::default(), true);
    assert!(!resp.ok);
    assert!(resp.tac.is_none());
    assert!(resp.errors.iter().any(|e| e.code == "E005" && e.line == 2 && e.column == 5));
  }
}
