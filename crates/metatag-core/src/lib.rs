//! Derived attributes ("metatags") for map features.
//!
//! A [`MetaTagging`] engine runs over a batch of features of one layer and
//!
//! - applies the built-in [`Derivation`]s of its [`DerivationRegistry`]
//!   (`_lat`, `_surface`, ...), skipping those whose keys are already present;
//! - applies the layer's calculated tags, compiled once per layer from
//!   theme-author snippets and run in a [`metatag_script::Sandbox`];
//! - pings the [`PropertyStore`] for every feature that changed.
//!
//! Lazy values live in the property map as deferred [`Slot`]s. They are
//! computed on every read and are never part of [`Properties::concrete`].
//!
//! ```
//! use metatag_core::{
//!     CalculatedTagDefinition, Feature, LayerConfig, LayoutConfig, MetaTagOptions,
//!     MetaTagging, RunContext,
//! };
//! use serde_json::json;
//!
//! let engine = MetaTagging::default();
//! let layer = LayerConfig::new("shops")
//!     .with_calculated_tag(CalculatedTagDefinition::parse("_double:=feat.properties.count * 2").unwrap());
//! let mut features = vec![Feature::new("node/1", None).with_property("count", json!(3))];
//! let ctx = RunContext::detached(LayoutConfig::default());
//!
//! assert!(engine.apply(&mut features, &ctx, &layer, None, MetaTagOptions::default()));
//! assert_eq!(features[0].get("_double"), Some(json!("6")));
//! ```

pub mod builtin;
pub mod calculated;
pub mod config;
pub mod context;
pub mod error;
mod fault;
pub mod feature;
pub mod geometry;
pub mod metatagging;
pub mod registry;
pub mod scope;
pub mod telemetry;

pub use calculated::{CalculatedTagCompiler, LayerFunctions};
pub use config::{CalculatedTagDefinition, EngineConfig, LayerConfig, LayoutConfig, MetaTagOptions};
pub use context::{FeatureLookup, NoFeatures, PropertyStore, RunContext};
pub use error::{MetaTagError, MetaTagResult};
pub use feature::{Deferred, Feature, Properties, Slot};
pub use geometry::{BBox, Geometry, Position};
pub use metatagging::MetaTagging;
pub use registry::{Derivation, DerivationRegistry};
pub use scope::{ExtraFunctions, FeatureAugmenter, FeatureScope, Helpers, NoHelpers};
pub use telemetry::{CalculatedTagFailure, FailureLog};
