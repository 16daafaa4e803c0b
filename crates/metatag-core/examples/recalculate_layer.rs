//! Run one metatagging pass over a GeoJSON FeatureCollection and print the
//! result. Lazy keys are resolved first so they show up in the output.
//!
//! Usage: cargo run -p metatag-core --example recalculate_layer -- layer.json features.geojson
//! Set RUST_LOG=trace to see the engine's diagnostics.

use metatag_core::{
    BBox, Feature, FeatureLookup, LayerConfig, LayoutConfig, MetaTagError, MetaTagOptions,
    MetaTagging, PropertyStore, RunContext,
};
use serde::Deserialize;
use std::env;
use std::fs;
use std::process;

#[derive(Deserialize)]
struct FeatureCollection {
    features: Vec<Feature>,
}

struct Snapshot(Vec<Feature>);

impl FeatureLookup for Snapshot {
    fn feature_by_id(&self, id: &str) -> Option<Feature> {
        self.0.iter().find(|f| f.id == id).cloned()
    }

    fn features_within(&self, _layer_id: &str, bbox: &BBox) -> Vec<Feature> {
        self.0
            .iter()
            .filter(|f| {
                f.geometry
                    .as_ref()
                    .and_then(|g| g.bbox())
                    .is_some_and(|b| b.intersects(bbox))
            })
            .cloned()
            .collect()
    }
}

struct Stdout;

impl PropertyStore for Stdout {
    fn ping(&self, id: &str) -> Result<(), MetaTagError> {
        eprintln!("changed: {}", id);
        Ok(())
    }
}

fn read(path: &str) -> String {
    fs::read_to_string(path).unwrap_or_else(|e| {
        eprintln!("read {}: {}", path, e);
        process::exit(1);
    })
}

fn main() {
    env_logger::init();
    let mut args = env::args().skip(1);
    let (layer_path, features_path) = match (args.next(), args.next()) {
        (Some(l), Some(f)) => (l, f),
        _ => {
            eprintln!("Usage: recalculate_layer <layer.json> <features.geojson>");
            process::exit(1);
        }
    };
    let layer: LayerConfig = serde_json::from_str(&read(&layer_path)).unwrap_or_else(|e| {
        eprintln!("parse {}: {}", layer_path, e);
        process::exit(1);
    });
    let collection: FeatureCollection =
        serde_json::from_str(&read(&features_path)).unwrap_or_else(|e| {
            eprintln!("parse {}: {}", features_path, e);
            process::exit(1);
        });

    let mut features = collection.features;
    let layout = LayoutConfig {
        id: "cli".to_string(),
        layers: vec![layer.clone()],
    };
    let ctx = RunContext::new(layout, Snapshot(features.clone()));
    let engine = MetaTagging::default();
    let options = MetaTagOptions {
        evaluate_strict: true,
        ..MetaTagOptions::default()
    };
    let changed = engine.apply(&mut features, &ctx, &layer, Some(&Stdout), options);

    let out = serde_json::json!({
        "type": "FeatureCollection",
        "features": features,
    });
    println!("{}", serde_json::to_string_pretty(&out).unwrap_or_default());
    eprintln!(
        "changed: {}, calculated tag failures: {}",
        changed,
        engine.calculated_tag_failures()
    );
}
