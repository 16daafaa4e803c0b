//! What a calculated-tag snippet can see: the feature, as `feat`, plus the
//! helper calls attached to it by a [`FeatureAugmenter`].

use crate::context::RunContext;
use crate::error::MetaTagError;
use crate::feature::Feature;
use crate::geometry::{self, BBox, Position};
use metatag_script::{EvalError, EvalResult, JVal, Scope, descend};
use serde_json::{Value, json};
use std::rc::Rc;

/// Callables reachable as `feat.<name>(...)`.
pub trait Helpers {
    /// `None` when `name` is not a helper.
    fn call(&self, feature: &Feature, name: &str, args: &[JVal]) -> Option<EvalResult>;
}

/// Runs once per feature per pass, before that feature's calculated tags.
pub trait FeatureAugmenter {
    fn augment(&self, feature: &Feature, ctx: &RunContext) -> Result<Rc<dyn Helpers>, MetaTagError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoHelpers;

impl Helpers for NoHelpers {
    fn call(&self, _feature: &Feature, _name: &str, _args: &[JVal]) -> Option<EvalResult> {
        None
    }
}

/// Default search radius of `feat.closest`, in metres.
const CLOSEST_MAX_DISTANCE_M: f64 = 500.0;
const METRES_PER_DEGREE: f64 = 111_000.0;

/// The standard helpers: `get`, `distanceTo`, `closest` and `overlapWith`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtraFunctions;

impl FeatureAugmenter for ExtraFunctions {
    fn augment(&self, feature: &Feature, ctx: &RunContext) -> Result<Rc<dyn Helpers>, MetaTagError> {
        let geometry = feature.geometry.as_ref();
        Ok(Rc::new(SpatialHelpers {
            ctx: ctx.clone(),
            centroid: geometry.and_then(|g| g.centroid()),
            bbox: geometry.and_then(|g| g.bbox()),
        }))
    }
}

struct SpatialHelpers {
    ctx: RunContext,
    centroid: Option<Position>,
    bbox: Option<BBox>,
}

impl Helpers for SpatialHelpers {
    fn call(&self, feature: &Feature, name: &str, args: &[JVal]) -> Option<EvalResult> {
        Some(match name {
            "get" => Ok(get_parsed(feature, args)),
            "distanceTo" => self.distance_to(args),
            "closest" => Ok(self.closest(feature, args)),
            "overlapWith" => Ok(self.overlap_with(feature, args)),
            _ => return None,
        })
    }
}

// String values that hold JSON are returned parsed.
fn get_parsed(feature: &Feature, args: &[JVal]) -> JVal {
    let Some(key) = args.first().map(JVal::display_string) else {
        return JVal::Undefined;
    };
    match feature.get(&key) {
        None => JVal::Undefined,
        Some(Value::String(s)) => match serde_json::from_str::<Value>(&s) {
            Ok(Value::Null) | Err(_) => JVal::str(&s),
            Ok(parsed) => JVal::from(parsed),
        },
        Some(other) => JVal::from(other),
    }
}

impl SpatialHelpers {
    fn distance_to(&self, args: &[JVal]) -> EvalResult {
        let Some(origin) = self.centroid else {
            return Ok(JVal::Undefined);
        };
        let target = match args {
            [JVal::Str(id)] => self
                .ctx
                .lookup
                .feature_by_id(id)
                .and_then(|f| f.geometry.as_ref().and_then(|g| g.centroid())),
            [lon, lat, ..] => {
                let (lon, lat) = (lon.to_number(), lat.to_number());
                if lon.is_nan() || lat.is_nan() {
                    return Err(EvalError::new("distanceTo expects a feature id or lon, lat"));
                }
                Some([lon, lat])
            }
            _ => return Err(EvalError::new("distanceTo expects a feature id or lon, lat")),
        };
        Ok(target
            .map(|t| JVal::Float(geometry::distance_m(origin, t)))
            .unwrap_or(JVal::Undefined))
    }

    fn closest(&self, feature: &Feature, args: &[JVal]) -> JVal {
        let (Some(layer_id), Some(origin), Some(bbox)) =
            (args.first().and_then(JVal::as_str), self.centroid, self.bbox)
        else {
            return JVal::Undefined;
        };
        let max_distance = args
            .get(1)
            .map(JVal::to_number)
            .filter(|d| d.is_finite())
            .unwrap_or(CLOSEST_MAX_DISTANCE_M);
        let search = bbox.pad(max_distance / METRES_PER_DEGREE);
        self.ctx
            .lookup
            .features_within(layer_id, &search)
            .into_iter()
            .filter(|other| other.id != feature.id)
            .filter_map(|other| {
                let c = other.geometry.as_ref()?.centroid()?;
                Some((geometry::distance_m(origin, c), other.id))
            })
            .filter(|(d, _)| *d <= max_distance)
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, id)| JVal::str(&id))
            .unwrap_or(JVal::Undefined)
    }

    fn overlap_with(&self, feature: &Feature, args: &[JVal]) -> JVal {
        let (Some(layer_id), Some(bbox)) = (args.first().and_then(JVal::as_str), self.bbox) else {
            return JVal::Array(Rc::new(Vec::new()));
        };
        let ids = self
            .ctx
            .lookup
            .features_within(layer_id, &bbox)
            .into_iter()
            .filter(|other| other.id != feature.id)
            .filter(|other| {
                other
                    .geometry
                    .as_ref()
                    .and_then(|g| g.bbox())
                    .is_some_and(|b| b.intersects(&bbox))
            })
            .map(|other| JVal::str(&other.id))
            .collect();
        JVal::Array(Rc::new(ids))
    }
}

/// [`Scope`] over one feature. `feat.properties` only lists concrete
/// values; naming a single key reads it even when deferred.
pub struct FeatureScope<'a> {
    feature: &'a Feature,
    helpers: &'a dyn Helpers,
}

impl<'a> FeatureScope<'a> {
    pub fn new(feature: &'a Feature, helpers: &'a dyn Helpers) -> Self {
        Self { feature, helpers }
    }

    fn geometry(&self) -> JVal {
        self.feature
            .geometry
            .as_ref()
            .and_then(|g| serde_json::to_value(g).ok())
            .map(JVal::from)
            .unwrap_or(JVal::Null)
    }

    fn feat(&self, path: &[Rc<str>]) -> EvalResult {
        let Some((head, rest)) = path.split_first() else {
            return Ok(JVal::from(json!({
                "type": "Feature",
                "id": self.feature.id,
                "geometry": Value::from(&self.geometry()),
                "properties": self.feature.properties.concrete_map(),
            })));
        };
        match head.as_ref() {
            "properties" => match rest.split_first() {
                None => Ok(JVal::from(Value::Object(
                    self.feature.properties.concrete_map(),
                ))),
                Some((key, rest)) => {
                    let value = self
                        .feature
                        .get(key)
                        .map(JVal::from)
                        .unwrap_or(JVal::Undefined);
                    descend(value, rest)
                }
            },
            "id" => descend(JVal::str(&self.feature.id), rest),
            "type" => descend(JVal::str("Feature"), rest),
            "geometry" => descend(self.geometry(), rest),
            _ => descend(JVal::Undefined, rest),
        }
    }
}

impl Scope for FeatureScope<'_> {
    fn resolve(&self, path: &[Rc<str>]) -> EvalResult {
        match path.split_first() {
            Some((root, rest)) if root.as_ref() == "feat" => self.feat(rest),
            Some((root, _)) => Err(EvalError::not_defined(root)),
            None => Ok(JVal::Undefined),
        }
    }

    fn call(&self, path: &[Rc<str>], args: &[JVal]) -> Option<EvalResult> {
        match path {
            [root, name] if root.as_ref() == "feat" => self.helpers.call(self.feature, name, args),
            _ => None,
        }
    }
}
