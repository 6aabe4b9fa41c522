//! Symbols and the lexical scope tree.
//!
//! `Symbol` is an explicit closed sum
//! (`Variable | Function | Class`) rather than one duck-typed object with
//! optional `.offset`/`.params_size`/`.frame_size` fields read opportunistically
//! (as `semantic/symbols.py`'s single `@dataclass` hierarchy does). `Scope`
//! keeps insertion order (`indexmap::IndexMap`) because class field order is
//! part of the memory-layout contract, not just a presentation nicety.
//!
//! `ClassSymbol` is `Rc<RefCell<_>>` because classes can reference each other
//! before both are declared (Pass 1 resolves `base_name` only after a full
//! AST walk) and because the finalized layout (`instance_size`, merged
//! `fields`/`methods`) is written back onto the same symbol object that
//! callers already hold a handle to.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::span::Span;
use crate::types::Type;

#[derive(Clone, Debug, PartialEq)]
pub struct VariableSymbol {
  pub name: String,
  pub ty: Type,
  pub is_const: bool,
  pub initialized: bool,
  pub offset: Option<i32>,
  /// Set by Pass 1: true for a variable declared outside any function body
  /// (addressed by the TAC generator as `0x…`), false for a parameter or a
  /// local (addressed as `FP[offset]`).
  pub is_global: bool,
  pub span: Span,
}

impl VariableSymbol {
  #[must_use] pub fn new(name: impl Into<String>, ty: Type, is_const: bool) -> Self {
    Self { name: name.into(), ty, is_const, initialized: false, offset: None, is_global: false, span: Span::synthetic() }
  }

  #[must_use] pub fn with_span(mut self, span: Span) -> Self { self.span = span; self }
}

#[derive(Clone, Debug)]
pub struct FunctionSymbol {
  pub name: String,
  pub ty: Type,
  pub params: Vec<VariableSymbol>,
  pub label: String,
  pub params_size: u32,
  pub locals_size: u32,
  pub frame_size: u32,
  /// Set by Pass 1 when this function is a class member; used by Pass 2 to
  /// seed the implicit `this` symbol and by the TAC generator to mangle the
  /// MIPS label (`Class.method` -> `Class_method`).
  pub enclosing_class: Option<String>,
  pub span: Span,
}

impl FunctionSymbol {
  #[must_use] pub fn return_type(&self) -> &Type {
    self.ty.as_function().expect("FunctionSymbol.ty is always Type::Function").1
  }

  #[must_use] pub fn param_types(&self) -> &[Type] {
    self.ty.as_function().expect("FunctionSymbol.ty is always Type::Function").0
  }
}

#[derive(Clone, Debug)]
pub struct ClassSymbol {
  pub name: String,
  pub fields: IndexMap<String, Type>,
  pub methods: IndexMap<String, Type>,
  pub base_name: Option<String>,
  pub base: Option<Rc<RefCell<ClassSymbol>>>,
  pub instance_size: Option<u32>,
  pub span: Span,
}

impl ClassSymbol {
  #[must_use] pub fn new(name: impl Into<String>, base_name: Option<String>) -> Self {
    Self {
      name: name.into(), fields: IndexMap::new(), methods: IndexMap::new(),
      base_name, base: None, instance_size: None, span: Span::synthetic(),
    }
  }

  /// Walks the base chain looking for a field declared on `self` or an
  /// ancestor, returning its byte offset within the (merged) layout. Used
  /// by the TAC generator to resolve `FIELD_ACCESS`/`FIELD_ASSIGN` offsets.
  #[must_use] pub fn field_offset(&self, name: &str) -> Option<u32> {
    let mut offset = 0u32;
    for (field_name, ty) in &self.fields {
      if field_name == name { return Some(offset); }
      offset += ty.size_of();
    }
    None
  }

  /// Walks the base chain to find the class that implements `method` —
  /// needed by the MIPS generator to emit the correct label for an indirect
  /// call when the method was inherited unchanged.
  #[must_use] pub fn implementation_class(&self, method: &str) -> Option<String> {
    if self.methods.contains_key(method) {
      // A method declared directly here shadows an inherited one only if
      // Pass 1's merge actually overrode it; since the merge already copies
      // inherited entries verbatim when there is no override, checking the
      // base chain upward and taking the *furthest* ancestor that still has
      // an identical entry gives the original implementor.
      if let Some(base) = &self.base {
        if let Some(from_base) = base.borrow().implementation_class(method) {
          return Some(from_base);
        }
      }
      return Some(self.name.clone());
    }
    self.base.as_ref().and_then(|b| b.borrow().implementation_class(method))
  }
}

#[derive(Clone, Debug)]
pub enum Symbol {
  Variable(VariableSymbol),
  Function(Rc<RefCell<FunctionSymbol>>),
  Class(Rc<RefCell<ClassSymbol>>),
}

impl Symbol {
  #[must_use] pub fn name(&self) -> String {
    match self {
      Symbol::Variable(v) => v.name.clone(),
      Symbol::Function(f) => f.borrow().name.clone(),
      Symbol::Class(c) => c.borrow().name.clone(),
    }
  }

  #[must_use] pub fn ty(&self) -> Type {
    match self {
      Symbol::Variable(v) => v.ty.clone(),
      Symbol::Function(f) => f.borrow().ty.clone(),
      Symbol::Class(c) => Type::class(c.borrow().name.clone()),
    }
  }

  #[must_use] pub fn as_variable(&self) -> Option<&VariableSymbol> {
    if let Symbol::Variable(v) = self { Some(v) } else { None }
  }

  #[must_use] pub fn as_variable_mut(&mut self) -> Option<&mut VariableSymbol> {
    if let Symbol::Variable(v) = self { Some(v) } else { None }
  }

  #[must_use] pub fn as_function(&self) -> Option<Rc<RefCell<FunctionSymbol>>> {
    if let Symbol::Function(f) = self { Some(Rc::clone(f)) } else { None }
  }

  #[must_use] pub fn as_class(&self) -> Option<Rc<RefCell<ClassSymbol>>> {
    if let Symbol::Class(c) = self { Some(Rc::clone(c)) } else { None }
  }
}

/// A node of the lexical scope tree. One is created per block, function,
/// class, or the program itself.
#[derive(Debug)]
pub struct Scope {
  pub parent: Option<Rc<RefCell<Scope>>>,
  pub name: String,
  pub symbols: IndexMap<String, Symbol>,
}

impl Scope {
  #[must_use] pub fn root(name: impl Into<String>) -> Rc<RefCell<Scope>> {
    Rc::new(RefCell::new(Scope { parent: None, name: name.into(), symbols: IndexMap::new() }))
  }

  #[must_use] pub fn new_child(parent: &Rc<RefCell<Scope>>, name: impl Into<String>) -> Rc<RefCell<Scope>> {
    Rc::new(RefCell::new(Scope { parent: Some(Rc::clone(parent)), name: name.into(), symbols: IndexMap::new() }))
  }

  /// Defines `sym` in this scope level only. Returns `false` (and leaves the
  /// scope unchanged) if the name is already present — callers turn that
  /// into `E001`.
  pub fn define(&mut self, sym: Symbol) -> bool {
    let name = sym.name();
    if self.symbols.contains_key(&name) { return false; }
    self.symbols.insert(name, sym);
    true
  }
}

/// Walks `scope`'s parent chain looking for `name`, starting at `scope`
/// itself. This is a free function (rather than a `&self` method) so it can
/// be called on a borrowed `Ref<Scope>` without re-borrowing through `Rc`.
#[must_use] pub fn resolve(scope: &Rc<RefCell<Scope>>, name: &str) -> Option<Symbol> {
  let mut cur = Rc::clone(scope);
  loop {
    if let Some(sym) = cur.borrow().symbols.get(name) { return Some(sym.clone()); }
    let parent = cur.borrow().parent.clone();
    match parent {
      Some(p) => cur = p,
      None => return None,
    }
  }
}

// --- serialization, for the IDE collaborator (see `ide.rs`) -------------

#[derive(Clone, Debug, serde::Serialize)]
pub struct SymbolView {
  pub name: String,
  pub kind: &'static str,
  #[serde(rename = "type")]
  pub ty: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub is_const: Option<bool>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub initialized: Option<bool>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub params: Option<Vec<String>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub fields: Option<Vec<String>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub methods: Option<Vec<String>>,
}

impl From<&Symbol> for SymbolView {
  fn from(sym: &Symbol) -> Self {
    match sym {
      Symbol::Variable(v) => SymbolView {
        name: v.name.clone(), kind: "variable", ty: v.ty.to_string(),
        is_const: Some(v.is_const), initialized: Some(v.initialized),
        params: None, fields: None, methods: None,
      },
      Symbol::Function(f) => {
        let f = f.borrow();
        SymbolView {
          name: f.name.clone(), kind: "function", ty: f.ty.to_string(),
          is_const: None, initialized: None,
          params: Some(f.params.iter().map(|p| format!("{}: {}", p.name, p.ty)).collect()),
          fields: None, methods: None,
        }
      }
      Symbol::Class(c) => {
        let c = c.borrow();
        SymbolView {
          name: c.name.clone(), kind: "class", ty: c.name.clone(),
          is_const: None, initialized: None, params: None,
          fields: Some(c.fields.iter().map(|(n, t)| format!("{n}: {t}")).collect()),
          methods: Some(c.methods.keys().cloned().collect()),
        }
      }
    }
  }
}

#[derive(Clone, Debug, serde::Serialize)]
pub struct ScopeView {
  pub scope_name: String,
  pub symbols: Vec<SymbolView>,
  pub children: Vec<ScopeView>,
}

impl fmt::Display for ScopeView {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", serde_json_lite(self))
  }
}

/// A dependency-free, indentation-based rendering used only for `Display`
/// (debugging); the real machine-readable form is `serde::Serialize`.
fn serde_json_lite(view: &ScopeView) -> String {
  fn go(view: &ScopeView, depth: usize, out: &mut String) {
    let pad = "  ".repeat(depth);
    out.push_str(&format!("{pad}{}\n", view.scope_name));
    for sym in &view.symbols {
      out.push_str(&format!("{pad}  {} : {}\n", sym.name, sym.ty));
    }
    for child in &view.children {
      go(child, depth + 1, out);
    }
  }
  let mut out = String::new();
  go(view, 0, &mut out);
  out
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn define_rejects_redeclaration_at_same_level() {
    let scope = Scope::root("global");
    assert!(scope.borrow_mut().define(Symbol::Variable(VariableSymbol::new("x", Type::Integer, false))));
    assert!(!scope.borrow_mut().define(Symbol::Variable(VariableSymbol::new("x", Type::Boolean, false))));
  }

  #[test]
  fn resolve_walks_parent_chain() {
    let global = Scope::root("global");
    global.borrow_mut().define(Symbol::Variable(VariableSymbol::new("g", Type::Integer, false)));
    let child = Scope::new_child(&global, "block");
    child.borrow_mut().define(Symbol::Variable(VariableSymbol::new("l", Type::Boolean, false)));
    assert!(resolve(&child, "g").is_some());
    assert!(resolve(&child, "l").is_some());
    assert!(resolve(&global, "l").is_none());
    assert!(resolve(&child, "missing").is_none());
  }

  #[test]
  fn class_field_offset_walks_merged_layout() {
    let mut base = ClassSymbol::new("A", None);
    base.fields.insert("x".into(), Type::Integer);
    let mut derived = ClassSymbol::new("B", Some("A".into()));
    derived.fields.insert("x".into(), Type::Integer);
    derived.fields.insert("y".into(), Type::Integer);
    assert_eq!(derived.field_offset("x"), Some(0));
    assert_eq!(derived.field_offset("y"), Some(4));
    assert_eq!(derived.field_offset("z"), None);
  }
}
