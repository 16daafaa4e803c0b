//! Collaborators handed to a pass: feature lookups and the property store.

use crate::config::LayoutConfig;
use crate::error::MetaTagError;
use crate::feature::Feature;
use crate::geometry::BBox;
use std::rc::Rc;

/// Cross-feature queries, served by the feature store.
pub trait FeatureLookup {
    fn feature_by_id(&self, id: &str) -> Option<Feature>;
    fn features_within(&self, layer_id: &str, bbox: &BBox) -> Vec<Feature>;
}

/// A lookup that knows no features.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFeatures;

impl FeatureLookup for NoFeatures {
    fn feature_by_id(&self, _id: &str) -> Option<Feature> {
        None
    }

    fn features_within(&self, _layer_id: &str, _bbox: &BBox) -> Vec<Feature> {
        Vec::new()
    }
}

/// Read-only bundle shared by every derivation of a pass.
///
/// Cheap to clone. Deferred calculated tags keep a clone alive so they can
/// still answer lookups when read after the pass.
#[derive(Clone)]
pub struct RunContext {
    pub layout: Rc<LayoutConfig>,
    pub lookup: Rc<dyn FeatureLookup>,
}

impl RunContext {
    pub fn new(layout: LayoutConfig, lookup: impl FeatureLookup + 'static) -> Self {
        Self {
            layout: Rc::new(layout),
            lookup: Rc::new(lookup),
        }
    }

    pub fn detached(layout: LayoutConfig) -> Self {
        Self::new(layout, NoFeatures)
    }
}

/// Downstream reactive store, keyed by feature id.
pub trait PropertyStore {
    /// Tell observers of `id` that its properties changed. Unknown ids are
    /// not an error.
    fn ping(&self, id: &str) -> Result<(), MetaTagError>;
}
