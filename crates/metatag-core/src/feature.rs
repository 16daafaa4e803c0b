//! Features and their property maps.
//!
//! A property is either a concrete value or a deferred computation. Deferred
//! slots are re-evaluated on every read and never show up in
//! [`Properties::concrete`], so bulk consumers (export, serialisation) can
//! not force them by accident.

use crate::error::MetaTagError;
use crate::geometry::Geometry;
use indexmap::IndexMap;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::cell::Cell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

type Thunk = dyn Fn(&Feature) -> Option<Value>;

/// A value computed on read. Clones share the computation.
#[derive(Clone)]
pub struct Deferred {
    thunk: Rc<Thunk>,
    evaluating: Rc<Cell<bool>>,
}

impl Deferred {
    pub fn new(thunk: impl Fn(&Feature) -> Option<Value> + 'static) -> Self {
        Self {
            thunk: Rc::new(thunk),
            evaluating: Rc::new(Cell::new(false)),
        }
    }

    /// Run the computation against `feature`. A read that re-enters the same
    /// slot (a key defined in terms of itself) yields `None`.
    pub fn evaluate(&self, feature: &Feature) -> Option<Value> {
        if self.evaluating.replace(true) {
            return None;
        }
        let _reset = ResetOnDrop(&self.evaluating);
        (self.thunk)(feature)
    }
}

struct ResetOnDrop<'a>(&'a Cell<bool>);

impl Drop for ResetOnDrop<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Deferred")
    }
}

#[derive(Debug, Clone)]
pub enum Slot {
    Resolved(Value),
    Deferred(Deferred),
}

impl Slot {
    pub fn is_deferred(&self) -> bool {
        matches!(self, Slot::Deferred(_))
    }
}

/// Insertion-ordered property map.
#[derive(Debug, Clone, Default)]
pub struct Properties {
    slots: IndexMap<String, Slot>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Presence test. Never evaluates a deferred slot.
    pub fn contains_key(&self, key: &str) -> bool {
        self.slots.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }

    /// The set of keys present right now.
    pub fn key_snapshot(&self) -> HashSet<String> {
        self.slots.keys().cloned().collect()
    }

    pub fn slot(&self, key: &str) -> Option<&Slot> {
        self.slots.get(key)
    }

    /// Value of a concrete slot; `None` for absent and deferred keys.
    pub fn get_concrete(&self, key: &str) -> Option<&Value> {
        match self.slots.get(key)? {
            Slot::Resolved(v) => Some(v),
            Slot::Deferred(_) => None,
        }
    }

    /// Concrete slots only, in insertion order.
    pub fn concrete(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.slots.iter().filter_map(|(k, slot)| match slot {
            Slot::Resolved(v) => Some((k.as_str(), v)),
            Slot::Deferred(_) => None,
        })
    }

    pub fn concrete_map(&self) -> Map<String, Value> {
        self.concrete()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Slot> {
        self.slots.insert(key.into(), Slot::Resolved(value))
    }

    pub fn defer(&mut self, key: impl Into<String>, deferred: Deferred) -> Option<Slot> {
        self.slots.insert(key.into(), Slot::Deferred(deferred))
    }

    pub fn remove(&mut self, key: &str) -> Option<Slot> {
        self.slots.shift_remove(key)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl From<Map<String, Value>> for Properties {
    fn from(map: Map<String, Value>) -> Self {
        Self {
            slots: map.into_iter().map(|(k, v)| (k, Slot::Resolved(v))).collect(),
        }
    }
}

impl Serialize for Properties {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.concrete())
    }
}

#[derive(Debug, Clone)]
pub struct Feature {
    pub id: String,
    pub geometry: Option<Geometry>,
    pub properties: Properties,
}

impl Feature {
    pub fn new(id: impl Into<String>, geometry: Option<Geometry>) -> Self {
        Self {
            id: id.into(),
            geometry,
            properties: Properties::new(),
        }
    }

    pub fn with_property(mut self, key: &str, value: Value) -> Self {
        self.properties.insert(key, value);
        self
    }

    /// Read a property, evaluating a deferred slot. The result is not cached.
    pub fn get(&self, key: &str) -> Option<Value> {
        match self.properties.slot(key)? {
            Slot::Resolved(v) => Some(v.clone()),
            Slot::Deferred(d) => d.evaluate(self),
        }
    }

    /// Evaluate a deferred slot once and store the result as a concrete value.
    /// A deferred slot that evaluates to nothing is removed.
    pub fn resolve(&mut self, key: &str) -> Option<Value> {
        let deferred = match self.properties.slot(key)? {
            Slot::Resolved(v) => return Some(v.clone()),
            Slot::Deferred(d) => d.clone(),
        };
        match deferred.evaluate(self) {
            Some(value) => {
                self.properties.insert(key, value.clone());
                Some(value)
            }
            None => {
                self.properties.remove(key);
                None
            }
        }
    }

    /// Materialise every deferred slot.
    pub fn resolve_all(&mut self) {
        let deferred: Vec<String> = self
            .properties
            .slots
            .iter()
            .filter(|(_, slot)| slot.is_deferred())
            .map(|(k, _)| k.clone())
            .collect();
        for key in deferred {
            self.resolve(&key);
        }
    }
}

impl Serialize for Feature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("Feature", 4)?;
        s.serialize_field("type", "Feature")?;
        s.serialize_field("id", &self.id)?;
        s.serialize_field("geometry", &self.geometry)?;
        s.serialize_field("properties", &self.properties)?;
        s.end()
    }
}

#[derive(Deserialize)]
struct RawFeature {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    geometry: Option<Geometry>,
    #[serde(default)]
    properties: Option<Map<String, Value>>,
}

fn id_string(id: &Value) -> Option<String> {
    match id {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl TryFrom<RawFeature> for Feature {
    type Error = MetaTagError;

    fn try_from(raw: RawFeature) -> Result<Self, Self::Error> {
        let properties = raw.properties.unwrap_or_default();
        let id = raw
            .id
            .as_ref()
            .and_then(id_string)
            .or_else(|| properties.get("id").and_then(id_string))
            .ok_or(MetaTagError::MissingId)?;
        Ok(Self {
            id,
            geometry: raw.geometry,
            properties: properties.into(),
        })
    }
}

impl<'de> Deserialize<'de> for Feature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawFeature::deserialize(deserializer)?;
        Feature::try_from(raw).map_err(serde::de::Error::custom)
    }
}
