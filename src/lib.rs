//! Back-end pipeline for the Compiscript language: the symbol/type layer,
//! the TAC generator, the local TAC optimizer, and the MIPS32 code
//! generator. The concrete grammar and parser are an external collaborator
//! — this crate consumes an already-built typed AST (`ast.rs`) and never
//! reads source text itself.
//!
//! [`driver::compile`] is the single entry point that chains every stage;
//! [`ide::compile`] wraps it in the response shape the embedding IDE
//! service's HTTP layer expects.

pub mod ast;
pub mod config;
pub mod driver;
pub mod errors;
pub mod ide;
pub mod idx;
pub mod mips;
pub mod optimize;
pub mod pass1;
pub mod pass2;
pub mod span;
pub mod symtab;
pub mod tac;
pub mod tacgen;
pub mod types;
