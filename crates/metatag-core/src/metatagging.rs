use crate::calculated::CalculatedTagCompiler;
use crate::config::{EngineConfig, LayerConfig, MetaTagOptions};
use crate::context::{PropertyStore, RunContext};
use crate::error::MetaTagError;
use crate::fault::contain;
use crate::feature::Feature;
use crate::registry::{Derivation, DerivationRegistry};
use crate::scope::{ExtraFunctions, FeatureAugmenter};
use crate::telemetry::FailureLog;
use log::{error, trace};
use metatag_script::Sandbox;
use std::rc::Rc;

/// Adds metatags (`_lat`, `_surface`, ...) and calculated tags to features.
///
/// The compiled calculated tags and the failure counters belong to the
/// instance: two engines never share either.
pub struct MetaTagging {
    registry: DerivationRegistry,
    compiler: CalculatedTagCompiler,
    failures: Rc<FailureLog>,
    augmenter: Box<dyn FeatureAugmenter>,
}

impl MetaTagging {
    pub fn new(registry: DerivationRegistry, config: EngineConfig) -> Self {
        let failures = Rc::new(FailureLog::new(config.error_output_limit));
        Self {
            registry,
            compiler: CalculatedTagCompiler::new(Rc::new(Sandbox::new()), failures.clone()),
            failures,
            augmenter: Box::new(ExtraFunctions),
        }
    }

    pub fn with_augmenter(mut self, augmenter: impl FeatureAugmenter + 'static) -> Self {
        self.augmenter = Box::new(augmenter);
        self
    }

    /// Replace the sandbox calculated tags run in. Drops anything compiled so far.
    pub fn with_sandbox(mut self, sandbox: Sandbox) -> Self {
        self.compiler = CalculatedTagCompiler::new(Rc::new(sandbox), self.failures.clone());
        self
    }

    /// (Re)calculate all metatags and calculated tags on every given feature.
    /// The features should belong to `layer`.
    ///
    /// Returns true if at least one feature changed. Nothing raised by a
    /// derivation, the augmenter or the store escapes this call.
    pub fn apply(
        &self,
        features: &mut [Feature],
        ctx: &RunContext,
        layer: &LayerConfig,
        store: Option<&dyn PropertyStore>,
        options: MetaTagOptions,
    ) -> bool {
        if features.is_empty() {
            return false;
        }

        let metatags = self.registry.eligible(&options);
        let layer_functions = self.compiler.functions_for(layer);

        let mut at_least_one_changed = false;
        for feature in features.iter_mut() {
            let defined = feature.properties.key_snapshot();
            let mut changed = false;

            for metatag in &metatags {
                let keys = metatag.keys();
                // presence only: reading a lazy value would evaluate it
                if keys.iter().all(|k| feature.properties.contains_key(k)) {
                    continue;
                }
                if metatag.is_lazy() {
                    if keys.iter().all(|k| defined.contains(*k)) {
                        continue;
                    }
                    changed = true;
                    self.run_metatag(*metatag, feature, layer, store, ctx);
                    if options.evaluate_strict {
                        for key in keys {
                            feature.resolve(key);
                        }
                    }
                } else {
                    // every eager metatag runs, even once a change is known
                    let added = self.run_metatag(*metatag, feature, layer, store, ctx);
                    changed |= added;
                }
            }

            if let Some(functions) = &layer_functions {
                let retagged = contain(|| functions.retag(feature, self.augmenter.as_ref(), ctx))
                    .unwrap_or_else(|panic| {
                        error!("Invalid syntax in calculated tags or some other error: {panic}");
                        false
                    });
                changed |= retagged;
                if options.evaluate_strict {
                    feature.resolve_all();
                }
            }

            if changed {
                if let Some(store) = store {
                    notify(store, &feature.id);
                }
                at_least_one_changed = true;
            }
        }
        at_least_one_changed
    }

    /// Subscription callback for a settled batch of `layer`.
    pub fn handle_batch(
        &self,
        layer: &LayerConfig,
        features: &mut [Feature],
        ctx: &RunContext,
        store: Option<&dyn PropertyStore>,
    ) -> bool {
        if layer.source.is_none() || features.is_empty() {
            return false;
        }
        trace!(
            "Recalculating metatags for layer {} due to a change in the upstream features. Contains {} items",
            layer.id,
            features.len()
        );
        self.apply(features, ctx, layer, store, MetaTagOptions::default())
    }

    fn run_metatag(
        &self,
        metatag: &dyn Derivation,
        feature: &mut Feature,
        layer: &LayerConfig,
        store: Option<&dyn PropertyStore>,
        ctx: &RunContext,
    ) -> bool {
        let outcome = contain(|| metatag.apply(feature, layer, store, ctx))
            .unwrap_or_else(|panic| Err(MetaTagError::derivation(metatag.keys(), panic)));
        match outcome {
            Ok(changed) => changed,
            Err(e) => {
                error!("{e}");
                false
            }
        }
    }

    pub fn registry(&self) -> &DerivationRegistry {
        &self.registry
    }

    /// Times a layer's calculated tags were compiled.
    pub fn compilations(&self) -> usize {
        self.compiler.compilations()
    }

    pub fn calculated_tag_failures(&self) -> usize {
        self.failures.failures()
    }

    pub fn reported_failures(&self) -> usize {
        self.failures.reported()
    }
}

impl Default for MetaTagging {
    fn default() -> Self {
        Self::new(DerivationRegistry::builtin(), EngineConfig::default())
    }
}

fn notify(store: &dyn PropertyStore, id: &str) {
    let outcome = contain(|| store.ping(id)).unwrap_or_else(|panic| {
        Err(MetaTagError::Notification {
            feature: id.to_string(),
            message: panic,
        })
    });
    if let Err(e) = outcome {
        error!("Could not ping a store for a changed property due to {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CalculatedTagDefinition, LayoutConfig};
    use crate::feature::Deferred;
    use crate::geometry::Geometry;
    use crate::scope::Helpers;
    use serde_json::{Map, Value, json};
    use std::cell::{Cell, RefCell};

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn ctx() -> RunContext {
        RunContext::detached(LayoutConfig::default())
    }

    fn engine(derivations: Vec<Box<dyn Derivation>>) -> MetaTagging {
        init_logger();
        MetaTagging::new(
            DerivationRegistry::from_derivations(derivations),
            EngineConfig::default(),
        )
    }

    fn strict_layer(key: &str, snippet: &str) -> LayerConfig {
        LayerConfig::new("shops")
            .with_calculated_tag(CalculatedTagDefinition::strict(key, snippet).unwrap())
    }

    fn concrete(features: &[Feature]) -> Vec<Map<String, Value>> {
        features.iter().map(|f| f.properties.concrete_map()).collect()
    }

    #[derive(Default)]
    struct RecordingStore {
        pings: RefCell<Vec<String>>,
    }

    impl PropertyStore for RecordingStore {
        fn ping(&self, id: &str) -> Result<(), MetaTagError> {
            self.pings.borrow_mut().push(id.to_string());
            Ok(())
        }
    }

    /// Fails for `node/1`, panics for `node/2`, records the rest.
    #[derive(Default)]
    struct BrokenStore {
        pings: RefCell<Vec<String>>,
    }

    impl PropertyStore for BrokenStore {
        fn ping(&self, id: &str) -> Result<(), MetaTagError> {
            match id {
                "node/1" => Err(MetaTagError::Notification {
                    feature: id.to_string(),
                    message: "store closed".to_string(),
                }),
                "node/2" => panic!("store poisoned"),
                _ => {
                    self.pings.borrow_mut().push(id.to_string());
                    Ok(())
                }
            }
        }
    }

    /// Eager test derivation writing `key`; reports whatever `changes` says
    /// for the feature and counts its calls.
    struct Probe {
        keys: &'static [&'static str],
        calls: Rc<Cell<u32>>,
        dates: bool,
        changes: fn(&Feature) -> bool,
    }

    impl Probe {
        fn new(keys: &'static [&'static str], calls: Rc<Cell<u32>>) -> Self {
            Self {
                keys,
                calls,
                dates: false,
                changes: |_| true,
            }
        }
    }

    impl Derivation for Probe {
        fn keys(&self) -> &[&str] {
            self.keys
        }

        fn includes_dates(&self) -> bool {
            self.dates
        }

        fn apply(
            &self,
            feature: &mut Feature,
            _layer: &LayerConfig,
            _store: Option<&dyn PropertyStore>,
            _ctx: &RunContext,
        ) -> Result<bool, MetaTagError> {
            self.calls.set(self.calls.get() + 1);
            if !(self.changes)(feature) {
                return Ok(false);
            }
            for key in self.keys {
                feature.properties.insert(*key, json!("yes"));
            }
            Ok(true)
        }
    }

    /// Lazy `_big`, counting evaluations.
    struct Big {
        evaluations: Rc<Cell<u32>>,
    }

    impl Derivation for Big {
        fn keys(&self) -> &[&str] {
            &["_big"]
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
            let evaluations = self.evaluations.clone();
            feature.properties.defer(
                "_big",
                Deferred::new(move |_| {
                    evaluations.set(evaluations.get() + 1);
                    Some(json!("expensive"))
                }),
            );
            Ok(true)
        }
    }

    struct Failing {
        panics: bool,
    }

    impl Derivation for Failing {
        fn keys(&self) -> &[&str] {
            &["_broken"]
        }

        fn apply(
            &self,
            _feature: &mut Feature,
            _layer: &LayerConfig,
            _store: Option<&dyn PropertyStore>,
            _ctx: &RunContext,
        ) -> Result<bool, MetaTagError> {
            if self.panics {
                panic!("engine bug");
            }
            Err(MetaTagError::derivation(self.keys(), "no geometry index"))
        }
    }

    struct CountingAugmenter {
        calls: Rc<Cell<u32>>,
        fail_for: Option<&'static str>,
    }

    impl FeatureAugmenter for CountingAugmenter {
        fn augment(&self, feature: &Feature, ctx: &RunContext) -> Result<Rc<dyn Helpers>, MetaTagError> {
            self.calls.set(self.calls.get() + 1);
            if self.fail_for == Some(feature.id.as_str()) {
                panic!("augmentation exploded");
            }
            ExtraFunctions.augment(feature, ctx)
        }
    }

    fn point(id: &str) -> Feature {
        Feature::new(id, Some(Geometry::Point([4.0, 51.0])))
    }

    fn square(id: &str) -> Feature {
        Feature::new(
            id,
            Some(Geometry::Polygon(vec![vec![
                [0.0, 0.0],
                [0.01, 0.0],
                [0.01, 0.01],
                [0.0, 0.01],
                [0.0, 0.0],
            ]])),
        )
    }

    #[test]
    fn second_pass_over_unchanged_batch_is_a_no_op() {
        init_logger();
        let engine = MetaTagging::default();
        let layer = LayerConfig::new("shops");
        let mut features = vec![
            point("node/1").with_property("shop", json!("bakery")),
            square("way/2"),
        ];
        let store = RecordingStore::default();

        assert!(engine.apply(&mut features, &ctx(), &layer, Some(&store), MetaTagOptions::default()));
        let first = concrete(&features);
        assert_eq!(first[0]["_layer"], json!("shops"));
        assert_eq!(first[1]["_geometry:type"], json!("Polygon"));
        assert_eq!(store.pings.borrow().len(), 2);

        assert!(!engine.apply(&mut features, &ctx(), &layer, Some(&store), MetaTagOptions::default()));
        assert_eq!(concrete(&features), first);
        assert_eq!(store.pings.borrow().len(), 2);
    }

    #[test]
    fn lazy_metatags_are_not_forced() {
        let evaluations = Rc::new(Cell::new(0));
        let engine = engine(vec![Box::new(Big {
            evaluations: evaluations.clone(),
        })]);
        let mut features = vec![point("node/1")];
        assert!(engine.apply(
            &mut features,
            &ctx(),
            &LayerConfig::new("shops"),
            None,
            MetaTagOptions::default()
        ));
        assert_eq!(evaluations.get(), 0);
        assert!(features[0].properties.contains_key("_big"));
        assert!(!features[0].properties.concrete_map().contains_key("_big"));
        assert_eq!(features[0].get("_big"), Some(json!("expensive")));
        assert_eq!(evaluations.get(), 1);
    }

    #[test]
    fn evaluate_strict_leaves_nothing_deferred() {
        let evaluations = Rc::new(Cell::new(0));
        let engine = engine(vec![Box::new(Big {
            evaluations: evaluations.clone(),
        })]);
        let layer = LayerConfig::new("shops").with_calculated_tag(
            CalculatedTagDefinition::lazy("_name", "feat.properties.name").unwrap(),
        );
        let mut features = vec![point("node/1").with_property("name", json!("x"))];
        let options = MetaTagOptions {
            evaluate_strict: true,
            ..MetaTagOptions::default()
        };
        engine.apply(&mut features, &ctx(), &layer, None, options);
        let props = features[0].properties.concrete_map();
        assert_eq!(props["_big"], json!("expensive"));
        assert_eq!(props["_name"], json!("x"));
        assert_eq!(evaluations.get(), 1);
    }

    #[test]
    fn strict_calculated_tags_are_stringified() {
        let engine = engine(vec![]);
        let mut features = vec![point("node/1"), Feature::new("node/2", None)];
        engine.apply(
            &mut features,
            &ctx(),
            &strict_layer("sum", "1+1"),
            None,
            MetaTagOptions::default(),
        );
        for feature in &features {
            assert_eq!(feature.properties.get_concrete("sum"), Some(&json!("2")));
        }
    }

    #[test]
    fn falsy_results_are_still_written() {
        let engine = engine(vec![]);
        let mut features = vec![
            point("node/a").with_property("count", json!(3)),
            point("node/b").with_property("count", json!(0)),
        ];
        engine.apply(
            &mut features,
            &ctx(),
            &strict_layer("double", "feat.properties.count*2"),
            None,
            MetaTagOptions::default(),
        );
        assert_eq!(features[0].get("double"), Some(json!("6")));
        assert_eq!(features[1].get("double"), Some(json!("0")));
    }

    #[test]
    fn strict_tags_follow_the_current_state() {
        let engine = engine(vec![]);
        let layer = strict_layer("double", "feat.properties.count*2");
        let mut features = vec![point("node/a").with_property("count", json!(3))];
        engine.apply(&mut features, &ctx(), &layer, None, MetaTagOptions::default());
        features[0].properties.insert("count", json!(4));
        engine.apply(&mut features, &ctx(), &layer, None, MetaTagOptions::default());
        assert_eq!(features[0].get("double"), Some(json!("8")));
    }

    #[test]
    fn failing_calculated_tags_are_contained_and_rate_limited() {
        let engine = engine(vec![]);
        let layer = strict_layer("_x", "undefinedThing.length");
        let mut features: Vec<Feature> = (0..4).map(|i| point(&format!("node/{i}"))).collect();

        assert!(engine.apply(&mut features, &ctx(), &layer, None, MetaTagOptions::default()));
        assert!(features.iter().all(|f| !f.properties.contains_key("_x")));
        assert_eq!(engine.calculated_tag_failures(), 4);
        assert_eq!(engine.reported_failures(), 4);

        for _ in 0..3 {
            engine.apply(&mut features, &ctx(), &layer, None, MetaTagOptions::default());
        }
        assert_eq!(engine.calculated_tag_failures(), 16);
        assert_eq!(engine.reported_failures(), 10);
        assert!(features.iter().all(|f| !f.properties.contains_key("_x")));
    }

    #[test]
    fn failure_counters_are_per_engine() {
        let a = engine(vec![]);
        let b = engine(vec![]);
        let layer = strict_layer("_x", "nope");
        let mut features = vec![point("node/1")];
        a.apply(&mut features, &ctx(), &layer, None, MetaTagOptions::default());
        assert_eq!(a.calculated_tag_failures(), 1);
        assert_eq!(b.calculated_tag_failures(), 0);
        assert_eq!(b.compilations(), 0);
    }

    #[test]
    fn layer_is_compiled_once() {
        let engine = engine(vec![]);
        let layer = strict_layer("sum", "1+1");
        for _ in 0..5 {
            let mut features = vec![point("node/1")];
            engine.apply(&mut features, &ctx(), &layer, None, MetaTagOptions::default());
        }
        assert_eq!(engine.compilations(), 1);
        let other = strict_layer("sum", "2+2");
        let other = LayerConfig {
            id: "benches".to_string(),
            ..other
        };
        engine.apply(&mut [point("node/1")], &ctx(), &other, None, MetaTagOptions::default());
        assert_eq!(engine.compilations(), 2);
    }

    #[test]
    fn empty_batch_does_nothing() {
        let engine = engine(vec![]);
        assert!(!engine.apply(
            &mut [],
            &ctx(),
            &strict_layer("sum", "1+1"),
            None,
            MetaTagOptions::default()
        ));
        assert_eq!(engine.compilations(), 0);
    }

    #[test]
    fn date_metatags_are_filtered_out() {
        let calls = Rc::new(Cell::new(0));
        let mut stamp = Probe::new(&["_today"], calls.clone());
        stamp.dates = true;
        let engine = engine(vec![Box::new(stamp)]);
        let mut features = vec![point("node/1"), point("node/2")];
        let options = MetaTagOptions {
            include_dates: false,
            ..MetaTagOptions::default()
        };
        assert!(!engine.apply(&mut features, &ctx(), &LayerConfig::new("shops"), None, options));
        assert_eq!(calls.get(), 0);
        assert!(features.iter().all(|f| !f.properties.contains_key("_today")));
    }

    #[test]
    fn every_eager_metatag_runs_after_a_change() {
        let first = Rc::new(Cell::new(0));
        let second = Rc::new(Cell::new(0));
        let engine = engine(vec![
            Box::new(Probe::new(&["_first"], first.clone())),
            Box::new(Probe::new(&["_second"], second.clone())),
        ]);
        let mut features = vec![point("node/1")];
        engine.apply(
            &mut features,
            &ctx(),
            &LayerConfig::new("shops"),
            None,
            MetaTagOptions::default(),
        );
        assert_eq!((first.get(), second.get()), (1, 1));
        assert!(features[0].properties.contains_key("_second"));
    }

    #[test]
    fn changes_from_metatags_and_calculated_tags_are_both_pinged() {
        let calls = Rc::new(Cell::new(0));
        let mut only_first = Probe::new(&["_first"], calls.clone());
        only_first.changes = |f| f.id == "node/1";
        let engine = engine(vec![Box::new(only_first)]);
        let store = RecordingStore::default();

        let mut features = vec![point("node/1"), point("node/2")];
        assert!(engine.apply(
            &mut features,
            &ctx(),
            &LayerConfig::new("shops"),
            Some(&store),
            MetaTagOptions::default()
        ));
        assert_eq!(*store.pings.borrow(), vec!["node/1"]);

        let store = RecordingStore::default();
        let mut features = vec![point("node/1"), point("node/2")];
        assert!(engine.apply(
            &mut features,
            &ctx(),
            &strict_layer("sum", "1+1"),
            Some(&store),
            MetaTagOptions::default()
        ));
        assert_eq!(*store.pings.borrow(), vec!["node/1", "node/2"]);
    }

    #[test]
    fn one_pass_pings_each_changed_feature_once() {
        let calls = Rc::new(Cell::new(0));
        let mut only_first = Probe::new(&["_first"], calls.clone());
        only_first.changes = |f| f.id == "node/1";
        let engine = engine(vec![Box::new(only_first)]);
        let store = RecordingStore::default();

        let mut features = vec![point("node/1"), point("node/2")];
        assert!(engine.apply(
            &mut features,
            &ctx(),
            &strict_layer("sum", "1+1"),
            Some(&store),
            MetaTagOptions::default()
        ));
        assert_eq!(calls.get(), 2);
        assert_eq!(features[0].get("_first"), Some(json!("yes")));
        assert!(!features[1].properties.contains_key("_first"));
        assert_eq!(*store.pings.borrow(), vec!["node/1", "node/2"]);
    }

    #[test]
    fn deeply_nested_snippets_are_contained() {
        let engine = engine(vec![]);
        let parens = format!("{}1{}", "(".repeat(10_000), ")".repeat(10_000));
        let negations = format!("{}1", "!".repeat(10_000));
        let layer = strict_layer("_parens", &parens).with_calculated_tag(
            CalculatedTagDefinition::lazy("_negations", &negations).unwrap(),
        );
        let store = RecordingStore::default();

        let mut features = vec![point("node/1")];
        assert!(engine.apply(
            &mut features,
            &ctx(),
            &layer,
            Some(&store),
            MetaTagOptions::default()
        ));
        assert!(!features[0].properties.contains_key("_parens"));
        assert_eq!(features[0].get("_negations"), None);
        assert_eq!(engine.calculated_tag_failures(), 2);
        assert_eq!(*store.pings.borrow(), vec!["node/1"]);
    }

    #[test]
    fn broken_metatags_do_not_stop_the_pass() {
        let calls = Rc::new(Cell::new(0));
        let engine = engine(vec![
            Box::new(Failing { panics: false }),
            Box::new(Failing { panics: true }),
            Box::new(Probe::new(&["_after"], calls.clone())),
        ]);
        let mut features = vec![point("node/1"), point("node/2")];
        assert!(engine.apply(
            &mut features,
            &ctx(),
            &LayerConfig::new("shops"),
            None,
            MetaTagOptions::default()
        ));
        assert_eq!(calls.get(), 2);
        assert!(features.iter().all(|f| f.properties.contains_key("_after")));
        assert!(features.iter().all(|f| !f.properties.contains_key("_broken")));
        assert_eq!(engine.calculated_tag_failures(), 0);
    }

    #[test]
    fn augmentation_runs_once_per_feature_and_failures_stay_local() {
        let calls = Rc::new(Cell::new(0));
        let metatag_calls = Rc::new(Cell::new(0));
        let engine = engine(vec![Box::new(Probe::new(&["_seen"], metatag_calls.clone()))])
            .with_augmenter(CountingAugmenter {
                calls: calls.clone(),
                fail_for: Some("node/2"),
            });
        let layer = strict_layer("sum", "1+1").with_calculated_tag(
            CalculatedTagDefinition::lazy("_id", "feat.id").unwrap(),
        );
        let mut features = vec![point("node/1"), point("node/2"), point("node/3")];
        assert!(engine.apply(&mut features, &ctx(), &layer, None, MetaTagOptions::default()));
        assert_eq!(calls.get(), 3);

        assert_eq!(features[0].get("sum"), Some(json!("2")));
        assert_eq!(features[0].get("_id"), Some(json!("node/1")));
        assert!(!features[1].properties.contains_key("sum"));
        assert!(features[1].properties.contains_key("_seen"));
        assert_eq!(features[2].get("sum"), Some(json!("2")));
    }

    #[test]
    fn store_failures_are_contained() {
        let engine = engine(vec![]);
        let store = BrokenStore::default();
        let mut features = vec![point("node/1"), point("node/2"), point("node/3")];
        assert!(engine.apply(
            &mut features,
            &ctx(),
            &strict_layer("sum", "1+1"),
            Some(&store),
            MetaTagOptions::default()
        ));
        assert_eq!(*store.pings.borrow(), vec!["node/3"]);
        assert!(features.iter().all(|f| f.properties.contains_key("sum")));
    }

    #[test]
    fn batches_for_source_less_layers_are_ignored() {
        let engine = engine(vec![]);
        let store = RecordingStore::default();
        let mut features = vec![point("node/1")];

        let hidden = strict_layer("sum", "1+1").without_source();
        assert!(!engine.handle_batch(&hidden, &mut features, &ctx(), Some(&store)));
        assert!(!features[0].properties.contains_key("sum"));

        assert!(!engine.handle_batch(&strict_layer("sum", "1+1"), &mut [], &ctx(), Some(&store)));

        let layer = strict_layer("sum", "1+1");
        assert!(engine.handle_batch(&layer, &mut features, &ctx(), Some(&store)));
        assert_eq!(features[0].get("sum"), Some(json!("2")));
        assert_eq!(*store.pings.borrow(), vec!["node/1"]);
    }

    #[test]
    fn custom_sandbox_functions_are_available() {
        use metatag_script::{EvalResult, Functions, JVal};

        fn shout(args: &[JVal]) -> EvalResult {
            let text = args.first().map(JVal::display_string).unwrap_or_default();
            Ok(JVal::str(&format!("{}!", text.to_uppercase())))
        }
        let mut functions = Functions::new();
        functions.register("shout", shout);
        let engine = engine(vec![]).with_sandbox(Sandbox::with_functions(functions));
        let mut features = vec![point("node/1").with_property("name", json!("hi"))];
        engine.apply(
            &mut features,
            &ctx(),
            &strict_layer("_loud", "shout(feat.properties.name)"),
            None,
            MetaTagOptions::default(),
        );
        assert_eq!(features[0].get("_loud"), Some(json!("HI!")));
    }
}
