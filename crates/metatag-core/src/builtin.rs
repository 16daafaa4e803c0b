//! The default derivations.

use crate::config::LayerConfig;
use crate::context::{PropertyStore, RunContext};
use crate::error::MetaTagError;
use crate::feature::{Deferred, Feature};
use crate::registry::Derivation;
use chrono::Local;
use serde_json::{Value, json};

pub(crate) fn defaults() -> Vec<Box<dyn Derivation>> {
    vec![
        Box::new(LatLon),
        Box::new(LayerId),
        Box::new(GeometryType),
        Box::new(Surface),
        Box::new(Length),
        Box::new(Now),
    ]
}

// Eager derivations only count a write that changes the stored value.
fn set(feature: &mut Feature, key: &str, value: Value) -> bool {
    if feature.properties.get_concrete(key) == Some(&value) {
        return false;
    }
    feature.properties.insert(key, value);
    true
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

fn number_text(value: f64) -> Value {
    Value::String(metatag_script::JVal::Float(value).display_string())
}

/// `_lat`, `_lon`: centre of the geometry.
pub struct LatLon;

impl Derivation for LatLon {
    fn keys(&self) -> &[&str] {
        &["_lat", "_lon"]
    }

    fn apply(
        &self,
        feature: &mut Feature,
        _layer: &LayerConfig,
        _store: Option<&dyn PropertyStore>,
        _ctx: &RunContext,
    ) -> Result<bool, MetaTagError> {
        let Some([lon, lat]) = feature.geometry.as_ref().and_then(|g| g.centroid()) else {
            return Ok(false);
        };
        if !lat.is_finite() || !lon.is_finite() {
            return Err(MetaTagError::derivation(self.keys(), "centroid is not finite"));
        }
        let lat_changed = set(feature, "_lat", json!(lat));
        let lon_changed = set(feature, "_lon", json!(lon));
        Ok(lat_changed || lon_changed)
    }
}

/// `_layer`: id of the layer the feature was matched to.
pub struct LayerId;

impl Derivation for LayerId {
    fn keys(&self) -> &[&str] {
        &["_layer"]
    }

    fn apply(
        &self,
        feature: &mut Feature,
        layer: &LayerConfig,
        _store: Option<&dyn PropertyStore>,
        _ctx: &RunContext,
    ) -> Result<bool, MetaTagError> {
        Ok(set(feature, "_layer", json!(layer.id)))
    }
}

/// `_geometry:type`
pub struct GeometryType;

impl Derivation for GeometryType {
    fn keys(&self) -> &[&str] {
        &["_geometry:type"]
    }

    fn apply(
        &self,
        feature: &mut Feature,
        _layer: &LayerConfig,
        _store: Option<&dyn PropertyStore>,
        _ctx: &RunContext,
    ) -> Result<bool, MetaTagError> {
        let Some(kind) = feature.geometry.as_ref().map(|g| g.type_name()) else {
            return Ok(false);
        };
        Ok(set(feature, "_geometry:type", json!(kind)))
    }
}

/// `_surface` (m²) and `_surface:ha`, computed when read.
pub struct Surface;

impl Derivation for Surface {
    fn keys(&self) -> &[&str] {
        &["_surface", "_surface:ha"]
    }

    fn is_lazy(&self) -> bool {
        true
    }

    fn apply(
        &self,
        feature: &mut Feature,
        _layer: &LayerConfig,
        _store: Option<&dyn PropertyStore>,
        _ctx: &RunContext,
    ) -> Result<bool, MetaTagError> {
        feature.properties.defer(
            "_surface",
            Deferred::new(|f| {
                let area = f.geometry.as_ref()?.area_m2();
                Some(number_text(area.round()))
            }),
        );
        feature.properties.defer(
            "_surface:ha",
            Deferred::new(|f| {
                let area = f.geometry.as_ref()?.area_m2();
                Some(number_text((area / 1000.0).floor() / 10.0))
            }),
        );
        Ok(true)
    }
}

/// `_length` (m) and `_length:km`, computed when read.
pub struct Length;

impl Derivation for Length {
    fn keys(&self) -> &[&str] {
        &["_length", "_length:km"]
    }

    fn is_lazy(&self) -> bool {
        true
    }

    fn apply(
        &self,
        feature: &mut Feature,
        _layer: &LayerConfig,
        _store: Option<&dyn PropertyStore>,
        _ctx: &RunContext,
    ) -> Result<bool, MetaTagError> {
        feature.properties.defer(
            "_length",
            Deferred::new(|f| {
                let length = f.geometry.as_ref()?.length_m();
                Some(number_text(round_to(length, 1)))
            }),
        );
        feature.properties.defer(
            "_length:km",
            Deferred::new(|f| {
                let length = f.geometry.as_ref()?.length_m();
                Some(number_text(round_to(length / 1000.0, 1)))
            }),
        );
        Ok(true)
    }
}

/// `_now:date`, `_now:datetime` in local time.
pub struct Now;

impl Derivation for Now {
    fn keys(&self) -> &[&str] {
        &["_now:date", "_now:datetime"]
    }

    fn includes_dates(&self) -> bool {
        true
    }

    fn apply(
        &self,
        feature: &mut Feature,
        _layer: &LayerConfig,
        _store: Option<&dyn PropertyStore>,
        _ctx: &RunContext,
    ) -> Result<bool, MetaTagError> {
        let now = Local::now();
        let date_changed = set(feature, "_now:date", json!(now.format("%Y-%m-%d").to_string()));
        let datetime_changed = set(
            feature,
            "_now:datetime",
            json!(now.format("%Y-%m-%d %H:%M:%S").to_string()),
        );
        Ok(date_changed || datetime_changed)
    }
}
