use crate::compiler::{Expr, compile_expr};
use crate::reader::{MAX_DEPTH, ReaderError, exceeds_depth, read};
use crate::runtime::{EvalError, EvalResult, Function, Functions, Scope};
use crate::vm::eval_expr;
use serde_json::Value;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SnippetError {
    #[error("cannot read snippet `{snippet}`: {cause}")]
    Read { snippet: String, cause: ReaderError },
    #[error("operator tree nests deeper than {limit} levels")]
    TooDeep { limit: usize },
}

/// One compiled snippet. Immutable; clones share the compiled tree.
#[derive(Debug, Clone)]
pub struct Snippet {
    source: Rc<str>,
    expr: Rc<Expr>,
}

impl Snippet {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }
}

/// Sandbox-scoped evaluation surface.
///
/// Function registration is instance-local (no global singleton), and every
/// evaluation sees exactly the [`Scope`] it is handed plus this sandbox's
/// function table.
#[derive(Debug, Default)]
pub struct Sandbox {
    functions: Functions,
}

impl Sandbox {
    /// Create a sandbox with the standard helper functions preloaded.
    pub fn new() -> Self {
        Self {
            functions: Functions::new(),
        }
    }

    pub fn with_functions(functions: Functions) -> Self {
        Self { functions }
    }

    /// Register or replace a helper function.
    pub fn register(&mut self, name: impl Into<String>, function: Function) -> Option<Function> {
        self.functions.register(name, function)
    }

    /// Read and compile once.
    pub fn compile(&self, source: &str) -> Result<Snippet, SnippetError> {
        let tree = read(source).map_err(|cause| SnippetError::Read {
            snippet: source.to_string(),
            cause,
        })?;
        Ok(Snippet {
            source: Rc::from(source),
            expr: Rc::new(compile_expr(&tree)),
        })
    }

    /// Compile a snippet already in operator-tree form.
    pub fn compile_tree(&self, tree: &Value) -> Result<Snippet, SnippetError> {
        if exceeds_depth(tree, MAX_DEPTH) {
            return Err(SnippetError::TooDeep { limit: MAX_DEPTH });
        }
        Ok(Snippet {
            source: Rc::from(tree.to_string().as_str()),
            expr: Rc::new(compile_expr(tree)),
        })
    }

    /// Evaluate against `scope`. A panic raised anywhere below (typically in
    /// a host callable) is turned into an [`EvalError`] here.
    pub fn evaluate(&self, snippet: &Snippet, scope: &dyn Scope) -> EvalResult {
        panic::catch_unwind(AssertUnwindSafe(|| {
            eval_expr(&snippet.expr, scope, &self.functions)
        }))
        .unwrap_or_else(|payload| {
            Err(EvalError::new(format!(
                "evaluation panicked: {}",
                panic_message(payload.as_ref())
            )))
        })
    }

    pub fn functions(&self) -> &Functions {
        &self.functions
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
