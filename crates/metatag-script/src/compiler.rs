use crate::jval::JVal;
use serde_json::Value;
use std::rc::Rc;

/// Static member path, e.g. `feat.properties.count`.
pub type Path = Rc<[Rc<str>]>;

/// Compiled expression: every operator is a direct enum variant, so no
/// string matching happens at evaluation time.
#[derive(Debug, Clone)]
pub enum Expr {
    // === Literals ===
    Literal(JVal),
    List(Vec<Expr>),

    // === Binding access (resolved through the scope) ===
    /// `["var", "feat", "properties", "count"]`
    Var(Path),
    /// `["get", <expr>, <key>]`: member with a computed key
    Get(Box<Expr>, Box<Expr>),

    // === Arithmetic ===
    Add(Vec<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Vec<Expr>),
    Div(Box<Expr>, Box<Expr>),
    Mod(Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),

    // === Comparison ===
    Eq(Box<Expr>, Box<Expr>),
    Neq(Box<Expr>, Box<Expr>),
    StrictEq(Box<Expr>, Box<Expr>),
    StrictNeq(Box<Expr>, Box<Expr>),
    Gt(Box<Expr>, Box<Expr>),
    Lt(Box<Expr>, Box<Expr>),
    Gte(Box<Expr>, Box<Expr>),
    Lte(Box<Expr>, Box<Expr>),

    // === Logic ===
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Coalesce(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    If(Box<Expr>, Box<Expr>, Option<Box<Expr>>),

    // === Calls ===
    /// Scope callable or registered function, by path.
    Call(Path, Vec<Expr>),
    /// Method on an evaluated value, e.g. `name.toUpperCase()`.
    Method(Box<Expr>, Rc<str>, Vec<Expr>),
}

/// Compile an operator tree (as produced by [`read`](crate::read) or
/// written by hand) into a typed [`Expr`].
///
/// Strings, numbers, objects and arrays that do not start with an operator
/// name are literals. Unknown operator names compile to a call of the
/// function registered under that name.
pub fn compile_expr(value: &Value) -> Expr {
    match value {
        Value::Array(arr) if arr.is_empty() => Expr::Literal(JVal::Array(Rc::new(vec![]))),
        Value::Array(arr) => {
            if let Some(op_name) = arr[0].as_str() {
                compile_op(op_name, &arr[1..])
            } else {
                Expr::Literal(JVal::from(value))
            }
        }
        other => Expr::Literal(JVal::from(other)),
    }
}

fn compile_op(op: &str, args: &[Value]) -> Expr {
    let c = |idx: usize| -> Expr {
        args.get(idx)
            .map(compile_expr)
            .unwrap_or(Expr::Literal(JVal::Undefined))
    };
    let cbox = |idx: usize| -> Box<Expr> { Box::new(c(idx)) };
    let all_args = || -> Vec<Expr> { args.iter().map(compile_expr).collect() };

    match op {
        // --- access ---
        "var" => Expr::Var(path_of(args)),
        "get" => Expr::Get(cbox(0), cbox(1)),
        "undefined" => Expr::Literal(JVal::Undefined),
        "list" => Expr::List(all_args()),

        // --- arithmetic ---
        "+" => try_fold_add(all_args()),
        "-" => Expr::Sub(cbox(0), cbox(1)),
        "*" => try_fold_mul(all_args()),
        "/" => Expr::Div(cbox(0), cbox(1)),
        "%" => try_fold_mod(cbox(0), cbox(1)),
        "neg" => match c(0) {
            Expr::Literal(JVal::Int(n)) if n != i64::MIN => Expr::Literal(JVal::Int(-n)),
            Expr::Literal(JVal::Float(f)) => Expr::Literal(JVal::Float(-f)),
            other => Expr::Neg(Box::new(other)),
        },

        // --- comparison ---
        "==" => Expr::Eq(cbox(0), cbox(1)),
        "!=" => Expr::Neq(cbox(0), cbox(1)),
        "===" => Expr::StrictEq(cbox(0), cbox(1)),
        "!==" => Expr::StrictNeq(cbox(0), cbox(1)),
        ">" => Expr::Gt(cbox(0), cbox(1)),
        "<" => Expr::Lt(cbox(0), cbox(1)),
        ">=" => Expr::Gte(cbox(0), cbox(1)),
        "<=" => Expr::Lte(cbox(0), cbox(1)),

        // --- logic ---
        "&&" => Expr::And(all_args()),
        "||" => Expr::Or(all_args()),
        "??" => Expr::Coalesce(cbox(0), cbox(1)),
        "!" => Expr::Not(cbox(0)),
        "if" => Expr::If(cbox(0), cbox(1), args.get(2).map(|v| Box::new(compile_expr(v)))),

        // --- calls ---
        "call" => {
            let path = match args.first() {
                Some(Value::Array(parts)) => path_of(parts),
                Some(single @ Value::String(_)) => path_of(std::slice::from_ref(single)),
                _ => Rc::from(Vec::<Rc<str>>::new()),
            };
            Expr::Call(path, args.iter().skip(1).map(compile_expr).collect())
        }
        "method" => {
            let name = args.get(1).and_then(Value::as_str).unwrap_or_default();
            Expr::Method(
                cbox(0),
                Rc::from(name),
                args.iter().skip(2).map(compile_expr).collect(),
            )
        }

        // --- fallback ---
        unknown => Expr::Call(Rc::from(vec![Rc::from(unknown)]), all_args()),
    }
}

fn path_of(segments: &[Value]) -> Path {
    segments
        .iter()
        .map(|segment| match segment {
            Value::String(s) => Rc::from(s.as_str()),
            other => Rc::from(other.to_string().as_str()),
        })
        .collect::<Vec<Rc<str>>>()
        .into()
}

// Folding only touches numeric literals: `+` with a string operand is
// concatenation and has to stay dynamic.
fn try_fold_add(args: Vec<Expr>) -> Expr {
    if args.iter().all(|e| matches!(e, Expr::Literal(JVal::Int(_)))) {
        let sum = args.iter().try_fold(0i64, |acc, e| match e {
            Expr::Literal(JVal::Int(n)) => acc.checked_add(*n),
            _ => None,
        });
        if let Some(sum) = sum {
            return Expr::Literal(JVal::Int(sum));
        }
    }
    if args
        .iter()
        .all(|e| matches!(e, Expr::Literal(JVal::Int(_) | JVal::Float(_))))
    {
        let sum: f64 = args
            .iter()
            .map(|e| match e {
                Expr::Literal(v) => v.to_number(),
                _ => 0.0,
            })
            .sum();
        return Expr::Literal(JVal::Float(sum));
    }
    Expr::Add(args)
}

fn try_fold_mul(args: Vec<Expr>) -> Expr {
    if args.iter().all(|e| matches!(e, Expr::Literal(JVal::Int(_)))) {
        let product = args.iter().try_fold(1i64, |acc, e| match e {
            Expr::Literal(JVal::Int(n)) => acc.checked_mul(*n),
            _ => None,
        });
        if let Some(product) = product {
            return Expr::Literal(JVal::Int(product));
        }
    }
    Expr::Mul(args)
}

fn try_fold_mod(a: Box<Expr>, b: Box<Expr>) -> Expr {
    if let (Expr::Literal(JVal::Int(av)), Expr::Literal(JVal::Int(bv))) = (a.as_ref(), b.as_ref()) {
        if *bv != 0 {
            return Expr::Literal(JVal::Int(av % bv));
        }
    }
    Expr::Mod(a, b)
}
