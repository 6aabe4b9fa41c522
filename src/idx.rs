//! Lightweight index types, in the style of `build_vcode.rs`'s
//! `IdxVec<ProcId, ProcAbi>` / `IdxVec<GlobalId, _>`: newtype indices into
//! dense `Vec`-backed tables instead of raw `usize`, so a `TempId` can never
//! be confused with a `LabelId` at a call site.

use std::marker::PhantomData;

/// A type that can be converted to and from a dense `usize` index.
pub trait Idx: Copy + Eq {
  fn from_usize(n: usize) -> Self;
  fn into_usize(self) -> usize;
}

/// Declares a `Copy` newtype index implementing [`Idx`].
macro_rules! mk_idx {
  ($(#[$attr:meta])* $name:ident) => {
    $(#[$attr])*
    #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
    pub struct $name(pub u32);

    impl $crate::idx::Idx for $name {
      #[inline] fn from_usize(n: usize) -> Self { Self(u32::try_from(n).expect("index overflow")) }
      #[inline] fn into_usize(self) -> usize { self.0 as usize }
    }

    impl std::fmt::Display for $name {
      fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "{}", self.0) }
    }
  };
}
pub(crate) use mk_idx;

/// A `Vec<T>` indexed by an [`Idx`] key instead of `usize`.
#[derive(Clone, Debug)]
pub struct IdxVec<I, T> {
  vec: Vec<T>,
  _marker: PhantomData<fn(I)>,
}

impl<I, T> Default for IdxVec<I, T> {
  fn default() -> Self { Self { vec: Vec::new(), _marker: PhantomData } }
}

impl<I: Idx, T> IdxVec<I, T> {
  #[must_use] pub fn new() -> Self { Self::default() }

  pub fn push(&mut self, t: T) -> I {
    let id = I::from_usize(self.vec.len());
    self.vec.push(t);
    id
  }

  #[must_use] pub fn len(&self) -> usize { self.vec.len() }
  #[must_use] pub fn is_empty(&self) -> bool { self.vec.is_empty() }

  pub fn iter(&self) -> impl Iterator<Item = &T> { self.vec.iter() }
  pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> { self.vec.iter_mut() }

  pub fn enum_iter(&self) -> impl Iterator<Item = (I, &T)> {
    self.vec.iter().enumerate().map(|(i, t)| (I::from_usize(i), t))
  }

  pub fn get(&self, i: I) -> Option<&T> { self.vec.get(i.into_usize()) }
}

impl<I: Idx, T> std::ops::Index<I> for IdxVec<I, T> {
  type Output = T;
  fn index(&self, i: I) -> &T { &self.vec[i.into_usize()] }
}

impl<I: Idx, T> std::ops::IndexMut<I> for IdxVec<I, T> {
  fn index_mut(&mut self, i: I) -> &mut T { &mut self.vec[i.into_usize()] }
}

impl<I, T> FromIterator<T> for IdxVec<I, T> {
  fn from_iter<It: IntoIterator<Item = T>>(iter: It) -> Self {
    Self { vec: Vec::from_iter(iter), _marker: PhantomData }
  }
}
