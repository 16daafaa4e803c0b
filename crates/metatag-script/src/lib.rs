//! Sandboxed evaluator for calculated-tag snippets.
//!
//! A snippet is a small expression written by a theme author, such as
//! `feat.properties.count * 2`. The crate separates its handling into
//! layers:
//!
//! - `reader`: infix source text to the canonical operator-array tree.
//! - `compiler`: operator tree to a typed [`Expr`], with constant folding.
//! - `vm` + `jval`: evaluation of an [`Expr`] over [`JVal`] values.
//! - `runtime`: the [`Scope`] seam and the helper [`Functions`] table.
//! - `engine`: [`Sandbox`], which ties the above together and contains faults.
//!
//! Compile once, evaluate many: a [`Snippet`] is immutable and every
//! evaluation is handed its bindings explicitly. Nothing an evaluation does
//! survives it except the returned value.

pub mod compiler;
pub mod engine;
pub mod jval;
pub mod reader;
pub mod runtime;
pub mod vm;

pub use compiler::{Expr, Path, compile_expr};
pub use engine::{Sandbox, Snippet, SnippetError, panic_message};
pub use jval::JVal;
pub use reader::{MAX_DEPTH, ReaderError, exceeds_depth, read};
pub use runtime::{Bindings, EvalError, EvalResult, Function, Functions, Scope, descend};
pub use vm::eval_expr;
