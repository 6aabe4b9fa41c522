//! The Compiscript type algebra.
//!
//! Kept as a small closed sum type rather than an open-ended `TyKind`/`Ty`
//! interning scheme: there are five shapes total here (`integer | string |
//! boolean | null | Array | Class | Function`) and no inference variables
//! survive past Pass 2, so structural `PartialEq` plus plain `Rc` sharing
//! for recursive shapes is simpler than a hash-consing translator. Class
//! identity is by structural name.

use std::fmt;
use std::rc::Rc;

/// A Compiscript type. Array/Function carry their element/signature types
/// behind `Rc` so cloning a `Type` is cheap and values can be freely shared
/// between `Symbol`s and `type_by_ast_node` entries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Type {
  Integer,
  String,
  Boolean,
  Null,
  Array(Rc<Type>),
  Class(Rc<str>),
  Function(Rc<[Type]>, Rc<Type>),
}

impl Type {
  #[must_use] pub fn array(elem: Type) -> Self { Type::Array(Rc::new(elem)) }
  #[must_use] pub fn class(name: impl Into<Rc<str>>) -> Self { Type::Class(name.into()) }
  #[must_use] pub fn function(params: Vec<Type>, ret: Type) -> Self {
    Type::Function(params.into(), Rc::new(ret))
  }

  /// `assignable(src, dst)`: true iff `src.name == dst.name`, or `src` is
  /// `Null` and `dst` is an array or class type.
  #[must_use] pub fn assignable(&self, dst: &Type) -> bool {
    self == dst || (*self == Type::Null && matches!(dst, Type::Array(_) | Type::Class(_)))
  }

  /// `eq_compatible(a, b)`: name equality, or either side is `Null`.
  #[must_use] pub fn eq_compatible(&self, other: &Type) -> bool {
    self == other || *self == Type::Null || *other == Type::Null
  }

  /// `size_of(t)`: 4 bytes for `integer`/`boolean`; 8 bytes for everything
  /// else (`string`, arrays, class references, function values).
  #[must_use] pub fn size_of(&self) -> u32 {
    match self {
      Type::Integer | Type::Boolean => 4,
      Type::String | Type::Null | Type::Array(_) | Type::Class(_) | Type::Function(..) => 8,
    }
  }

  #[must_use] pub fn is_integer(&self) -> bool { matches!(self, Type::Integer) }
  #[must_use] pub fn is_boolean(&self) -> bool { matches!(self, Type::Boolean) }
  #[must_use] pub fn is_array(&self) -> bool { matches!(self, Type::Array(_)) }
  #[must_use] pub fn is_null(&self) -> bool { matches!(self, Type::Null) }

  #[must_use] pub fn as_class_name(&self) -> Option<&str> {
    if let Type::Class(name) = self { Some(name) } else { None }
  }

  #[must_use] pub fn as_array_elem(&self) -> Option<&Type> {
    if let Type::Array(elem) = self { Some(elem) } else { None }
  }

  #[must_use] pub fn as_function(&self) -> Option<(&[Type], &Type)> {
    if let Type::Function(params, ret) = self { Some((params, ret)) } else { None }
  }

  /// `from_text(name, dims)`: parse a base type name plus a trailing-`[]`
  /// dimension count, e.g. `from_text("integer", 2)` is `integer[][]`.
  #[must_use] pub fn from_text(name: &str, dims: u32) -> Self {
    let base = match name {
      "integer" => Type::Integer,
      "string" => Type::String,
      "boolean" => Type::Boolean,
      "null" => Type::Null,
      other => Type::class(other),
    };
    (0..dims).fold(base, |t, _| Type::array(t))
  }
}

impl fmt::Display for Type {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Type::Integer => write!(f, "integer"),
      Type::String => write!(f, "string"),
      Type::Boolean => write!(f, "boolean"),
      Type::Null => write!(f, "null"),
      Type::Array(elem) => write!(f, "{elem}[]"),
      Type::Class(name) => write!(f, "{name}"),
      Type::Function(params, ret) => {
        write!(f, "(")?;
        for (i, p) in params.iter().enumerate() {
          if i > 0 { write!(f, ", ")?; }
          write!(f, "{p}")?;
        }
        write!(f, ") -> {ret}")
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn null_assignable_to_class_and_array_not_primitives() {
    assert!(Type::Null.assignable(&Type::class("Point")));
    assert!(Type::Null.assignable(&Type::array(Type::Integer)));
    assert!(!Type::Null.assignable(&Type::Integer));
    assert!(!Type::Null.assignable(&Type::Boolean));
  }

  #[test]
  fn assignable_requires_name_equality_otherwise() {
    assert!(Type::Integer.assignable(&Type::Integer));
    assert!(!Type::Integer.assignable(&Type::String));
    assert!(!Type::class("A").assignable(&Type::class("B")));
  }

  #[test]
  fn eq_compatible_allows_null_either_side() {
    assert!(Type::class("A").eq_compatible(&Type::Null));
    assert!(Type::Null.eq_compatible(&Type::class("A")));
    assert!(!Type::class("A").eq_compatible(&Type::class("B")));
  }

  #[test]
  fn size_of_matches_spec_table() {
    assert_eq!(Type::Integer.size_of(), 4);
    assert_eq!(Type::Boolean.size_of(), 4);
    assert_eq!(Type::String.size_of(), 8);
    assert_eq!(Type::array(Type::Integer).size_of(), 8);
    assert_eq!(Type::class("A").size_of(), 8);
  }

  #[test]
  fn from_text_applies_array_dimensions() {
    assert_eq!(Type::from_text("integer", 0), Type::Integer);
    assert_eq!(Type::from_text("integer", 2), Type::array(Type::array(Type::Integer)));
  }

  #[test]
  fn display_matches_spec_textual_forms() {
    assert_eq!(Type::array(Type::Integer).to_string(), "integer[]");
    assert_eq!(
      Type::function(vec![Type::Integer, Type::String], Type::Boolean).to_string(),
      "(integer, string) -> boolean"
    );
  }
}
