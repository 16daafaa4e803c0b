//! Typed evaluator for compiled [`Expr`](crate::compiler::Expr).
//!
//! Evaluation reads the outside world only through a [`Scope`] and the
//! [`Functions`] table. There is no assignment operator: an evaluation can
//! compute a value but never change state.

use crate::compiler::{Expr, Path};
use crate::jval::{JVal, format_f64};
use crate::runtime::{EvalError, EvalResult, Functions, Scope, member_of};
use std::rc::Rc;

/// Evaluate a compiled expression against `scope`.
pub fn eval_expr(expr: &Expr, scope: &dyn Scope, functions: &Functions) -> EvalResult {
    let eval = |e: &Expr| eval_expr(e, scope, functions);
    match expr {
        // === Literals ===
        Expr::Literal(v) => Ok(v.clone()),
        Expr::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(eval(item)?);
            }
            Ok(JVal::Array(Rc::new(out)))
        }

        // === Binding access ===
        Expr::Var(path) => scope.resolve(path),
        Expr::Get(base, key) => {
            let key = eval(key)?.display_string();
            if let Expr::Var(path) = base.as_ref() {
                // keep the lookup on the scope so it can resolve just this key
                let mut extended: Vec<Rc<str>> = path.to_vec();
                extended.push(Rc::from(key.as_str()));
                return scope.resolve(&extended);
            }
            member_of(&eval(base)?, &key)
        }

        // === Arithmetic ===
        Expr::Add(args) => {
            let mut iter = args.iter();
            let Some(first) = iter.next() else {
                return Ok(JVal::Int(0));
            };
            let mut acc = eval(first)?;
            for arg in iter {
                acc = add_jvals(acc, eval(arg)?);
            }
            Ok(acc)
        }
        Expr::Sub(a, b) => {
            let av = eval(a)?;
            let bv = eval(b)?;
            Ok(match (&av, &bv) {
                (JVal::Int(x), JVal::Int(y)) => x
                    .checked_sub(*y)
                    .map(JVal::Int)
                    .unwrap_or(JVal::Float(*x as f64 - *y as f64)),
                _ => JVal::Float(av.to_number() - bv.to_number()),
            })
        }
        Expr::Mul(args) => {
            let mut iter = args.iter();
            let Some(first) = iter.next() else {
                return Ok(JVal::Int(1));
            };
            let mut acc = eval(first)?;
            for arg in iter {
                acc = mul_jvals(acc, eval(arg)?);
            }
            Ok(acc)
        }
        Expr::Div(a, b) => {
            let av = eval(a)?;
            let bv = eval(b)?;
            // exact integer division stays an integer
            if let (JVal::Int(x), JVal::Int(y)) = (&av, &bv) {
                if *y != 0 && x.checked_rem(*y) == Some(0) {
                    return Ok(JVal::Int(x / y));
                }
            }
            Ok(JVal::Float(av.to_number() / bv.to_number()))
        }
        Expr::Mod(a, b) => {
            let av = eval(a)?;
            let bv = eval(b)?;
            Ok(match (&av, &bv) {
                (JVal::Int(x), JVal::Int(y)) if *y != 0 => {
                    x.checked_rem(*y).map(JVal::Int).unwrap_or(JVal::Int(0))
                }
                _ => JVal::Float(av.to_number() % bv.to_number()),
            })
        }
        Expr::Neg(a) => Ok(match eval(a)? {
            JVal::Int(n) => n
                .checked_neg()
                .map(JVal::Int)
                .unwrap_or(JVal::Float(-(n as f64))),
            other => JVal::Float(-other.to_number()),
        }),

        // === Comparison ===
        Expr::Eq(a, b) => Ok(JVal::Bool(eval(a)?.loose_eq(&eval(b)?))),
        Expr::Neq(a, b) => Ok(JVal::Bool(!eval(a)?.loose_eq(&eval(b)?))),
        Expr::StrictEq(a, b) => Ok(JVal::Bool(eval(a)?.strict_eq(&eval(b)?))),
        Expr::StrictNeq(a, b) => Ok(JVal::Bool(!eval(a)?.strict_eq(&eval(b)?))),
        Expr::Gt(a, b) => {
            let (av, bv) = (eval(a)?, eval(b)?);
            Ok(JVal::Bool(
                av.cmp_numeric_or_string(&bv).is_some_and(|o| o.is_gt()),
            ))
        }
        Expr::Lt(a, b) => {
            let (av, bv) = (eval(a)?, eval(b)?);
            Ok(JVal::Bool(
                av.cmp_numeric_or_string(&bv).is_some_and(|o| o.is_lt()),
            ))
        }
        Expr::Gte(a, b) => {
            let (av, bv) = (eval(a)?, eval(b)?);
            Ok(JVal::Bool(
                av.cmp_numeric_or_string(&bv).is_some_and(|o| o.is_ge()),
            ))
        }
        Expr::Lte(a, b) => {
            let (av, bv) = (eval(a)?, eval(b)?);
            Ok(JVal::Bool(
                av.cmp_numeric_or_string(&bv).is_some_and(|o| o.is_le()),
            ))
        }

        // === Logic (short-circuit, value-returning) ===
        Expr::And(args) => {
            let mut last = JVal::Bool(true);
            for arg in args {
                last = eval(arg)?;
                if !last.is_truthy() {
                    return Ok(last);
                }
            }
            Ok(last)
        }
        Expr::Or(args) => {
            let mut last = JVal::Bool(false);
            for arg in args {
                last = eval(arg)?;
                if last.is_truthy() {
                    return Ok(last);
                }
            }
            Ok(last)
        }
        Expr::Coalesce(a, b) => {
            let av = eval(a)?;
            if av.is_nullish() { eval(b) } else { Ok(av) }
        }
        Expr::Not(a) => Ok(JVal::Bool(!eval(a)?.is_truthy())),
        Expr::If(cond, then_expr, else_expr) => {
            if eval(cond)?.is_truthy() {
                eval(then_expr)
            } else if let Some(e) = else_expr {
                eval(e)
            } else {
                Ok(JVal::Undefined)
            }
        }

        // === Calls ===
        Expr::Call(path, arg_exprs) => {
            let mut args = Vec::with_capacity(arg_exprs.len());
            for arg in arg_exprs {
                args.push(eval(arg)?);
            }
            call_path(path, &args, scope, functions)
        }
        Expr::Method(receiver, name, arg_exprs) => {
            let receiver = eval(receiver)?;
            let mut args = Vec::with_capacity(arg_exprs.len());
            for arg in arg_exprs {
                args.push(eval(arg)?);
            }
            call_method(&receiver, name, &args)
        }
    }
}

/// Scope callables first, then the function table, then a method on the
/// value the path prefix resolves to (`feat.properties.name.trim()`).
fn call_path(path: &Path, args: &[JVal], scope: &dyn Scope, functions: &Functions) -> EvalResult {
    if let Some(result) = scope.call(path, args) {
        return result;
    }
    if let Some(function) = functions.get(&path.join(".")) {
        return function(args);
    }
    match path.split_last() {
        Some((method, receiver)) if !receiver.is_empty() => {
            let receiver = scope.resolve(receiver)?;
            call_method(&receiver, method, args)
        }
        Some((name, _)) => Err(EvalError::not_defined(name)),
        None => Err(EvalError::not_a_function(path)),
    }
}

fn call_method(receiver: &JVal, name: &str, args: &[JVal]) -> EvalResult {
    let arg_str = |idx: usize| -> String {
        args.get(idx)
            .map(JVal::display_string)
            .unwrap_or_else(|| "undefined".to_string())
    };
    let arg_index = |idx: usize| -> Option<usize> {
        args.get(idx)
            .map(JVal::to_number)
            .filter(|n| !n.is_nan())
            .map(|n| n.max(0.0) as usize)
    };

    match (receiver, name) {
        (JVal::Undefined | JVal::Null, _) => Err(EvalError::new(format!(
            "cannot read property '{name}' of {}",
            receiver.display_string()
        ))),
        (_, "toString") => Ok(JVal::str(&receiver.display_string())),

        (JVal::Str(s), "toUpperCase") => Ok(JVal::str(&s.to_uppercase())),
        (JVal::Str(s), "toLowerCase") => Ok(JVal::str(&s.to_lowercase())),
        (JVal::Str(s), "trim") => Ok(JVal::str(s.trim())),
        (JVal::Str(s), "includes") => Ok(JVal::Bool(s.contains(arg_str(0).as_str()))),
        (JVal::Str(s), "startsWith") => Ok(JVal::Bool(s.starts_with(arg_str(0).as_str()))),
        (JVal::Str(s), "endsWith") => Ok(JVal::Bool(s.ends_with(arg_str(0).as_str()))),
        (JVal::Str(s), "indexOf") => {
            let needle = arg_str(0);
            Ok(JVal::Int(match s.find(needle.as_str()) {
                Some(byte_idx) => s[..byte_idx].chars().count() as i64,
                None => -1,
            }))
        }
        (JVal::Str(s), "split") => {
            let parts: Vec<JVal> = match args.first() {
                None | Some(JVal::Undefined) => vec![JVal::Str(s.clone())],
                Some(_) => {
                    let sep = arg_str(0);
                    if sep.is_empty() {
                        s.chars().map(|c| JVal::str(&c.to_string())).collect()
                    } else {
                        s.split(sep.as_str()).map(JVal::str).collect()
                    }
                }
            };
            Ok(JVal::Array(Rc::new(parts)))
        }
        (JVal::Str(s), "substring") => {
            let chars: Vec<char> = s.chars().collect();
            let a = arg_index(0).unwrap_or(0).min(chars.len());
            let b = arg_index(1).unwrap_or(chars.len()).min(chars.len());
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            Ok(JVal::str(&chars[lo..hi].iter().collect::<String>()))
        }
        (JVal::Str(s), "replace") => Ok(JVal::str(&s.replacen(
            arg_str(0).as_str(),
            arg_str(1).as_str(),
            1,
        ))),

        (JVal::Array(arr), "includes") => {
            let needle = args.first().cloned().unwrap_or(JVal::Undefined);
            Ok(JVal::Bool(arr.iter().any(|item| item.strict_eq(&needle))))
        }
        (JVal::Array(arr), "indexOf") => {
            let needle = args.first().cloned().unwrap_or(JVal::Undefined);
            Ok(JVal::Int(
                arr.iter()
                    .position(|item| item.strict_eq(&needle))
                    .map(|i| i as i64)
                    .unwrap_or(-1),
            ))
        }
        (JVal::Array(arr), "join") => {
            let sep = match args.first() {
                None | Some(JVal::Undefined) => ",".to_string(),
                Some(v) => v.display_string(),
            };
            Ok(JVal::str(
                &arr.iter()
                    .map(|item| {
                        if item.is_nullish() {
                            String::new()
                        } else {
                            item.display_string()
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(&sep),
            ))
        }

        (JVal::Int(_) | JVal::Float(_), "toFixed") => {
            let digits = arg_index(0).unwrap_or(0).min(100);
            let n = receiver.to_number();
            if n.is_finite() {
                Ok(JVal::str(&format!("{n:.digits$}")))
            } else {
                Ok(JVal::str(&format_f64(n)))
            }
        }

        _ => Err(EvalError::new(format!(
            "{}.{name} is not a function",
            receiver.type_name()
        ))),
    }
}

// ─── helpers ─────────────────────────────────────────────────────────────────

#[inline]
fn add_jvals(a: JVal, b: JVal) -> JVal {
    match (&a, &b) {
        (JVal::Int(x), JVal::Int(y)) => x
            .checked_add(*y)
            .map(JVal::Int)
            .unwrap_or(JVal::Float(*x as f64 + *y as f64)),
        (JVal::Str(_) | JVal::Array(_) | JVal::Object(_), _)
        | (_, JVal::Str(_) | JVal::Array(_) | JVal::Object(_)) => {
            let mut out = a.display_string();
            out.push_str(&b.display_string());
            JVal::str(&out)
        }
        _ => JVal::Float(a.to_number() + b.to_number()),
    }
}

#[inline]
fn mul_jvals(a: JVal, b: JVal) -> JVal {
    match (&a, &b) {
        (JVal::Int(x), JVal::Int(y)) => x
            .checked_mul(*y)
            .map(JVal::Int)
            .unwrap_or(JVal::Float(*x as f64 * *y as f64)),
        _ => JVal::Float(a.to_number() * b.to_number()),
    }
}
