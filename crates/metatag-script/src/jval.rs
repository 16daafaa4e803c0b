use serde_json::{Map, Number, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::rc::Rc;

/// Evaluation value for compiled snippets.
///
/// Same shape as JSON plus `Undefined`, which is what a missing member or an
/// absent property reads as. `Int` and `Float` are inline; `Str`, `Array` and
/// `Object` use `Rc` for cheap cloning.
#[derive(Debug, Clone)]
pub enum JVal {
    Undefined,
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Array(Rc<Vec<JVal>>),
    Object(Rc<BTreeMap<Rc<str>, JVal>>),
}

impl JVal {
    pub fn str(s: &str) -> Self {
        JVal::Str(Rc::from(s))
    }

    #[inline]
    pub fn is_undefined(&self) -> bool {
        matches!(self, JVal::Undefined)
    }

    #[inline]
    pub fn is_nullish(&self) -> bool {
        matches!(self, JVal::Undefined | JVal::Null)
    }

    #[inline]
    pub fn is_truthy(&self) -> bool {
        match self {
            JVal::Undefined | JVal::Null => false,
            JVal::Bool(b) => *b,
            JVal::Int(n) => *n != 0,
            JVal::Float(f) => *f != 0.0 && !f.is_nan(),
            JVal::Str(s) => !s.is_empty(),
            JVal::Array(_) | JVal::Object(_) => true,
        }
    }

    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            JVal::Str(s) => Some(s.as_ref()),
            _ => None,
        }
    }

    #[inline]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            JVal::Int(n) => Some(*n),
            JVal::Float(f) if f.is_finite() && f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    /// Numeric coercion with JavaScript rules: blank strings are zero,
    /// anything unparseable is NaN.
    pub fn to_number(&self) -> f64 {
        match self {
            JVal::Undefined => f64::NAN,
            JVal::Null => 0.0,
            JVal::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            JVal::Int(n) => *n as f64,
            JVal::Float(f) => *f,
            JVal::Str(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    trimmed.parse::<f64>().unwrap_or(f64::NAN)
                }
            }
            JVal::Array(arr) => match arr.as_slice() {
                [] => 0.0,
                [single] => single.to_number(),
                _ => f64::NAN,
            },
            JVal::Object(_) => f64::NAN,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            JVal::Undefined => "undefined",
            JVal::Null | JVal::Array(_) | JVal::Object(_) => "object",
            JVal::Bool(_) => "boolean",
            JVal::Int(_) | JVal::Float(_) => "number",
            JVal::Str(_) => "string",
        }
    }

    /// Relational comparison: two strings compare lexically, everything else
    /// numerically. `None` when a NaN is involved.
    pub fn cmp_numeric_or_string(&self, other: &JVal) -> Option<Ordering> {
        match (self, other) {
            (JVal::Str(a), JVal::Str(b)) => Some(a.cmp(b)),
            (JVal::Int(a), JVal::Int(b)) => Some(a.cmp(b)),
            _ => self.to_number().partial_cmp(&other.to_number()),
        }
    }

    /// `===`
    pub fn strict_eq(&self, other: &JVal) -> bool {
        match (self, other) {
            (JVal::Undefined, JVal::Undefined) | (JVal::Null, JVal::Null) => true,
            (JVal::Bool(a), JVal::Bool(b)) => a == b,
            (JVal::Int(a), JVal::Int(b)) => a == b,
            (JVal::Int(_) | JVal::Float(_), JVal::Int(_) | JVal::Float(_)) => {
                self.to_number() == other.to_number()
            }
            (JVal::Str(a), JVal::Str(b)) => a == b,
            (JVal::Array(a), JVal::Array(b)) => Rc::ptr_eq(a, b),
            (JVal::Object(a), JVal::Object(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// `==`: `null` and `undefined` only equal each other, primitives of
    /// different types are compared as numbers.
    pub fn loose_eq(&self, other: &JVal) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() || b.is_nullish() => a.is_nullish() && b.is_nullish(),
            (JVal::Array(_) | JVal::Object(_), _) | (_, JVal::Array(_) | JVal::Object(_)) => {
                self.strict_eq(other)
            }
            (JVal::Str(a), JVal::Str(b)) => a == b,
            _ => self.to_number() == other.to_number(),
        }
    }

    /// String conversion as string concatenation sees it.
    pub fn display_string(&self) -> String {
        match self {
            JVal::Undefined => "undefined".to_string(),
            JVal::Null => "null".to_string(),
            JVal::Bool(b) => b.to_string(),
            JVal::Int(n) => n.to_string(),
            JVal::Float(f) => format_f64(*f),
            JVal::Str(s) => s.to_string(),
            JVal::Array(arr) => arr
                .iter()
                .map(|v| {
                    if v.is_nullish() {
                        String::new()
                    } else {
                        v.display_string()
                    }
                })
                .collect::<Vec<_>>()
                .join(","),
            JVal::Object(_) => "[object Object]".to_string(),
        }
    }

    /// Canonical structural encoding (the `JSON.stringify` form).
    ///
    /// Integral floats print without a fraction, non-finite numbers and
    /// `undefined` array elements print as `null`, `undefined` object members
    /// are dropped.
    pub fn to_json_string(&self) -> String {
        let mut out = String::new();
        write_json(self, &mut out);
        out
    }
}

fn write_json(v: &JVal, out: &mut String) {
    match v {
        JVal::Undefined | JVal::Null => out.push_str("null"),
        JVal::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        JVal::Int(n) => out.push_str(&n.to_string()),
        JVal::Float(f) if f.is_finite() => out.push_str(&format_f64(*f)),
        JVal::Float(_) => out.push_str("null"),
        JVal::Str(s) => out.push_str(&Value::String(s.to_string()).to_string()),
        JVal::Array(arr) => {
            out.push('[');
            for (i, item) in arr.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_json(item, out);
            }
            out.push(']');
        }
        JVal::Object(obj) => {
            out.push('{');
            let mut first = true;
            for (k, item) in obj.iter() {
                if item.is_undefined() {
                    continue;
                }
                if !first {
                    out.push(',');
                }
                first = false;
                out.push_str(&Value::String(k.to_string()).to_string());
                out.push(':');
                write_json(item, out);
            }
            out.push('}');
        }
    }
}

impl PartialEq for JVal {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (JVal::Undefined, JVal::Undefined) | (JVal::Null, JVal::Null) => true,
            (JVal::Bool(a), JVal::Bool(b)) => a == b,
            (JVal::Int(a), JVal::Int(b)) => a == b,
            (JVal::Float(a), JVal::Float(b)) => a == b,
            (JVal::Int(a), JVal::Float(b)) => (*a as f64) == *b,
            (JVal::Float(a), JVal::Int(b)) => *a == (*b as f64),
            (JVal::Str(a), JVal::Str(b)) => a == b,
            (JVal::Array(a), JVal::Array(b)) => a == b,
            (JVal::Object(a), JVal::Object(b)) => a == b,
            _ => false,
        }
    }
}

pub(crate) fn format_f64(f: f64) -> String {
    if f.is_nan() {
        "NaN".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if f.fract() == 0.0 && f.abs() < 1e21 {
        format!("{:.0}", f + 0.0)
    } else {
        f.to_string()
    }
}

impl From<Value> for JVal {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => JVal::Null,
            Value::Bool(b) => JVal::Bool(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    JVal::Int(i)
                } else if let Some(f) = n.as_f64() {
                    JVal::Float(f)
                } else {
                    JVal::Null
                }
            }
            Value::String(s) => JVal::Str(Rc::from(s.as_str())),
            Value::Array(arr) => JVal::Array(Rc::new(arr.into_iter().map(JVal::from).collect())),
            Value::Object(obj) => {
                let map: BTreeMap<Rc<str>, JVal> = obj
                    .into_iter()
                    .map(|(k, v)| (Rc::from(k.as_str()), JVal::from(v)))
                    .collect();
                JVal::Object(Rc::new(map))
            }
        }
    }
}

impl From<&Value> for JVal {
    fn from(v: &Value) -> Self {
        v.clone().into()
    }
}

impl From<JVal> for Value {
    fn from(jv: JVal) -> Self {
        match jv {
            JVal::Undefined | JVal::Null => Value::Null,
            JVal::Bool(b) => Value::Bool(b),
            JVal::Int(n) => Value::Number(Number::from(n)),
            JVal::Float(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
            JVal::Str(s) => Value::String(s.to_string()),
            JVal::Array(arr) => Value::Array(
                Rc::try_unwrap(arr)
                    .unwrap_or_else(|rc| (*rc).clone())
                    .into_iter()
                    .map(Value::from)
                    .collect(),
            ),
            JVal::Object(obj) => {
                let map: Map<String, Value> = Rc::try_unwrap(obj)
                    .unwrap_or_else(|rc| (*rc).clone())
                    .into_iter()
                    .filter(|(_, v)| !v.is_undefined())
                    .map(|(k, v)| (k.to_string(), Value::from(v)))
                    .collect();
                Value::Object(map)
            }
        }
    }
}

impl From<&JVal> for Value {
    fn from(jv: &JVal) -> Self {
        jv.clone().into()
    }
}
