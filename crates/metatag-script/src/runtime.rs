use crate::jval::JVal;
use std::collections::HashMap;
use std::rc::Rc;
use thiserror::Error;

pub type EvalResult = Result<JVal, EvalError>;

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct EvalError {
    pub message: String,
}

impl EvalError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
        }
    }

    pub fn not_defined(name: &str) -> Self {
        Self::new(format!("{name} is not defined"))
    }

    pub fn not_a_function(path: &[Rc<str>]) -> Self {
        Self::new(format!("{} is not a function", path.join(".")))
    }
}

/// The bindings an evaluation is allowed to see.
///
/// Paths are static member chains rooted at a binding name
/// (`feat.properties.count` arrives as `["feat", "properties", "count"]`).
/// An unknown root must be reported with [`EvalError::not_defined`].
pub trait Scope {
    fn resolve(&self, path: &[Rc<str>]) -> EvalResult;

    /// Host-provided callables, e.g. `feat.distanceTo(...)`.
    /// `None` means the path is not a callable of this scope.
    fn call(&self, _path: &[Rc<str>], _args: &[JVal]) -> Option<EvalResult> {
        None
    }
}

/// Member access on a plain value.
///
/// Reading a member of `undefined`/`null` is an error, reading a missing
/// member of anything else is `undefined`.
pub fn descend(mut value: JVal, path: &[Rc<str>]) -> EvalResult {
    for segment in path {
        value = member_of(&value, segment)?;
    }
    Ok(value)
}

pub(crate) fn member_of(value: &JVal, key: &str) -> EvalResult {
    Ok(match value {
        JVal::Undefined | JVal::Null => {
            return Err(EvalError::new(format!(
                "cannot read property '{key}' of {}",
                value.display_string()
            )));
        }
        JVal::Object(obj) => obj.get(key).cloned().unwrap_or(JVal::Undefined),
        JVal::Array(arr) if key == "length" => JVal::Int(arr.len() as i64),
        JVal::Array(arr) => key
            .parse::<usize>()
            .ok()
            .and_then(|i| arr.get(i).cloned())
            .unwrap_or(JVal::Undefined),
        JVal::Str(s) if key == "length" => JVal::Int(s.encode_utf16().count() as i64),
        _ => JVal::Undefined,
    })
}

/// Plain name-to-value bindings.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    values: HashMap<String, JVal>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(mut self, name: impl Into<String>, value: impl Into<JVal>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }
}

impl Scope for Bindings {
    fn resolve(&self, path: &[Rc<str>]) -> EvalResult {
        let Some((root, rest)) = path.split_first() else {
            return Ok(JVal::Undefined);
        };
        let value = self
            .values
            .get(root.as_ref())
            .cloned()
            .ok_or_else(|| EvalError::not_defined(root))?;
        descend(value, rest)
    }
}

pub type Function = fn(args: &[JVal]) -> EvalResult;

/// Pure helper functions callable from snippets by dotted name.
///
/// Instance-local: each sandbox owns its own table.
#[derive(Debug, Clone)]
pub struct Functions {
    fns: HashMap<String, Function>,
}

impl Functions {
    pub fn new() -> Self {
        let mut fns: HashMap<String, Function> = HashMap::new();
        fns.insert("Math.round".into(), fn_round as Function);
        fns.insert("Math.floor".into(), fn_floor as Function);
        fns.insert("Math.ceil".into(), fn_ceil as Function);
        fns.insert("Math.abs".into(), fn_abs as Function);
        fns.insert("Math.sqrt".into(), fn_sqrt as Function);
        fns.insert("Math.min".into(), fn_min as Function);
        fns.insert("Math.max".into(), fn_max as Function);
        fns.insert("Number".into(), fn_number as Function);
        fns.insert("String".into(), fn_string as Function);
        fns.insert("parseInt".into(), fn_parse_int as Function);
        fns.insert("parseFloat".into(), fn_parse_float as Function);
        fns.insert("isNaN".into(), fn_is_nan as Function);
        Self { fns }
    }

    /// An empty table, for sandboxes that should expose nothing but their scope.
    pub fn empty() -> Self {
        Self {
            fns: HashMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<Function> {
        self.fns.get(name).copied()
    }

    pub fn register(&mut self, name: impl Into<String>, function: Function) -> Option<Function> {
        self.fns.insert(name.into(), function)
    }
}

impl Default for Functions {
    fn default() -> Self {
        Self::new()
    }
}

fn first_number(args: &[JVal]) -> f64 {
    args.first().map(JVal::to_number).unwrap_or(f64::NAN)
}

fn fn_round(args: &[JVal]) -> EvalResult {
    Ok(JVal::Float((first_number(args) + 0.5).floor()))
}

fn fn_floor(args: &[JVal]) -> EvalResult {
    Ok(JVal::Float(first_number(args).floor()))
}

fn fn_ceil(args: &[JVal]) -> EvalResult {
    Ok(JVal::Float(first_number(args).ceil()))
}

fn fn_abs(args: &[JVal]) -> EvalResult {
    Ok(JVal::Float(first_number(args).abs()))
}

fn fn_sqrt(args: &[JVal]) -> EvalResult {
    Ok(JVal::Float(first_number(args).sqrt()))
}

fn fn_min(args: &[JVal]) -> EvalResult {
    let mut out = f64::INFINITY;
    for n in args.iter().map(JVal::to_number) {
        if n.is_nan() {
            return Ok(JVal::Float(f64::NAN));
        }
        out = out.min(n);
    }
    Ok(JVal::Float(out))
}

fn fn_max(args: &[JVal]) -> EvalResult {
    let mut out = f64::NEG_INFINITY;
    for n in args.iter().map(JVal::to_number) {
        if n.is_nan() {
            return Ok(JVal::Float(f64::NAN));
        }
        out = out.max(n);
    }
    Ok(JVal::Float(out))
}

fn fn_number(args: &[JVal]) -> EvalResult {
    Ok(match args.first() {
        None => JVal::Int(0),
        Some(JVal::Int(n)) => JVal::Int(*n),
        Some(v) => JVal::Float(v.to_number()),
    })
}

fn fn_string(args: &[JVal]) -> EvalResult {
    Ok(JVal::str(
        &args.first().map(JVal::display_string).unwrap_or_default(),
    ))
}

fn fn_parse_int(args: &[JVal]) -> EvalResult {
    let text = args.first().map(JVal::display_string).unwrap_or_default();
    let text = text.trim_start();
    let digits_end = text
        .char_indices()
        .find(|(i, c)| !(c.is_ascii_digit() || (*i == 0 && (*c == '-' || *c == '+'))))
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    Ok(text[..digits_end]
        .parse::<i64>()
        .map(JVal::Int)
        .unwrap_or(JVal::Float(f64::NAN)))
}

fn fn_parse_float(args: &[JVal]) -> EvalResult {
    let text = args.first().map(JVal::display_string).unwrap_or_default();
    let text = text.trim_start();
    // longest prefix that still parses
    let parsed = (1..=text.len())
        .rev()
        .filter(|end| text.is_char_boundary(*end))
        .find_map(|end| text[..end].parse::<f64>().ok().filter(|f| f.is_finite()));
    Ok(JVal::Float(parsed.unwrap_or(f64::NAN)))
}

fn fn_is_nan(args: &[JVal]) -> EvalResult {
    Ok(JVal::Bool(first_number(args).is_nan()))
}
