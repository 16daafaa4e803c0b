//! Per-layer calculated tags: theme-author snippets compiled once per layer
//! and applied to every feature of that layer.

use crate::config::{CalculatedTagDefinition, LayerConfig};
use crate::context::RunContext;
use crate::error::MetaTagError;
use crate::fault::contain;
use crate::feature::{Deferred, Feature};
use crate::scope::{FeatureAugmenter, FeatureScope, Helpers};
use crate::telemetry::{CalculatedTagFailure, FailureLog};
use log::{debug, error};
use metatag_script::{JVal, Sandbox, Snippet, SnippetError};
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

type TagFunction = Box<dyn Fn(&mut Feature, &Rc<dyn Helpers>)>;

/// One snippet bound to its key.
struct TagEvaluator {
    sandbox: Rc<Sandbox>,
    failures: Rc<FailureLog>,
    layer_id: Rc<str>,
    key: String,
    source: String,
    strict: bool,
    // a snippet that does not read fails on every evaluation
    compiled: Result<Snippet, SnippetError>,
}

impl TagEvaluator {
    /// `None` means the key should be absent: the snippet failed or
    /// produced `undefined`.
    fn calculate(&self, feature: &Feature, helpers: &dyn Helpers) -> Option<Value> {
        let outcome = match &self.compiled {
            Ok(snippet) => self
                .sandbox
                .evaluate(snippet, &FeatureScope::new(feature, helpers))
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        match outcome {
            Ok(value) => as_tag_value(value),
            Err(cause) => {
                self.failures.record(
                    CalculatedTagFailure {
                        layer_id: &self.layer_id,
                        key: &self.key,
                        snippet: &self.source,
                        strict: self.strict,
                    },
                    &cause,
                );
                None
            }
        }
    }
}

// Tags are strings. Anything else is stored in its JSON text form.
fn as_tag_value(value: JVal) -> Option<Value> {
    match value {
        JVal::Undefined => None,
        JVal::Str(s) => Some(Value::String(s.to_string())),
        other => Some(Value::String(other.to_json_string())),
    }
}

/// The compiled calculated tags of one layer, in definition order.
pub struct LayerFunctions {
    layer_id: String,
    functions: Vec<TagFunction>,
}

impl LayerFunctions {
    pub fn layer_id(&self) -> &str {
        &self.layer_id
    }

    /// Number of enabled definitions.
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Augment `feature` once, then run every tag function on it.
    ///
    /// Always reports a change: strict tags are rewritten on every pass and
    /// lazy ones are reinstalled. A failing augmentation skips this
    /// feature's tags and is logged.
    pub fn retag(
        &self,
        feature: &mut Feature,
        augmenter: &dyn FeatureAugmenter,
        ctx: &RunContext,
    ) -> bool {
        let helpers = match contain(|| augmenter.augment(feature, ctx)) {
            Ok(Ok(helpers)) => helpers,
            Ok(Err(e)) => {
                error!("Invalid syntax in calculated tags or some other error: {e}");
                return true;
            }
            Err(panic) => {
                let e = MetaTagError::Augmentation {
                    feature: feature.id.clone(),
                    message: panic,
                };
                error!("Invalid syntax in calculated tags or some other error: {e}");
                return true;
            }
        };
        for function in &self.functions {
            function(feature, &helpers);
        }
        true
    }
}

/// Compiles calculated tags and keeps them per layer id for the lifetime of
/// the compiler. Entries are never invalidated.
pub struct CalculatedTagCompiler {
    sandbox: Rc<Sandbox>,
    failures: Rc<FailureLog>,
    cache: RefCell<HashMap<String, Rc<LayerFunctions>>>,
    compilations: Cell<usize>,
}

impl CalculatedTagCompiler {
    pub fn new(sandbox: Rc<Sandbox>, failures: Rc<FailureLog>) -> Self {
        Self {
            sandbox,
            failures,
            cache: RefCell::new(HashMap::new()),
            compilations: Cell::new(0),
        }
    }

    /// The layer's compiled tags, compiling on first use. `None` when the
    /// layer defines no calculated tags at all.
    pub fn functions_for(&self, layer: &LayerConfig) -> Option<Rc<LayerFunctions>> {
        if layer.calculated_tags.is_empty() {
            return None;
        }
        let cached = self.cache.borrow().get(&layer.id).cloned();
        if let Some(functions) = cached {
            return Some(functions);
        }
        let functions = Rc::new(self.compile(&layer.id, &layer.calculated_tags));
        self.cache
            .borrow_mut()
            .insert(layer.id.clone(), functions.clone());
        Some(functions)
    }

    /// Compile without caching. Disabled placeholders are skipped.
    pub fn compile(&self, layer_id: &str, definitions: &[CalculatedTagDefinition]) -> LayerFunctions {
        self.compilations.set(self.compilations.get() + 1);
        let layer: Rc<str> = Rc::from(layer_id);
        let functions: Vec<TagFunction> = definitions
            .iter()
            .filter_map(|definition| {
                let source = definition.snippet.as_deref()?;
                let evaluator = Rc::new(TagEvaluator {
                    sandbox: self.sandbox.clone(),
                    failures: self.failures.clone(),
                    layer_id: layer.clone(),
                    key: definition.key.clone(),
                    source: source.to_string(),
                    strict: definition.strict,
                    compiled: self.sandbox.compile(source),
                });
                Some(if definition.strict {
                    strict_function(evaluator)
                } else {
                    lazy_function(evaluator)
                })
            })
            .collect();
        debug!(
            "Compiled {} calculated tags for layer {}",
            functions.len(),
            layer_id
        );
        LayerFunctions {
            layer_id: layer_id.to_string(),
            functions,
        }
    }

    /// How many times a layer was compiled.
    pub fn compilations(&self) -> usize {
        self.compilations.get()
    }
}

fn strict_function(evaluator: Rc<TagEvaluator>) -> TagFunction {
    Box::new(move |feature: &mut Feature, helpers: &Rc<dyn Helpers>| {
        match evaluator.calculate(feature, helpers.as_ref()) {
            Some(value) => feature.properties.insert(evaluator.key.as_str(), value),
            None => feature.properties.remove(&evaluator.key),
        };
    })
}

// Installs a slot that runs the snippet on every read.
fn lazy_function(evaluator: Rc<TagEvaluator>) -> TagFunction {
    Box::new(move |feature: &mut Feature, helpers: &Rc<dyn Helpers>| {
        let evaluator = evaluator.clone();
        let helpers = helpers.clone();
        let key = evaluator.key.clone();
        feature.properties.defer(
            key,
            Deferred::new(move |f| evaluator.calculate(f, helpers.as_ref())),
        );
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LayoutConfig;
    use crate::scope::{ExtraFunctions, NoHelpers};
    use serde_json::json;

    fn compiler(limit: usize) -> CalculatedTagCompiler {
        CalculatedTagCompiler::new(Rc::new(Sandbox::new()), Rc::new(FailureLog::new(limit)))
    }

    fn layer(definitions: &[&str]) -> LayerConfig {
        definitions.iter().fold(LayerConfig::new("shops"), |layer, d| {
            layer.with_calculated_tag(CalculatedTagDefinition::parse(d).unwrap())
        })
    }

    fn retag(functions: &LayerFunctions, feature: &mut Feature) -> bool {
        let ctx = RunContext::detached(LayoutConfig::default());
        functions.retag(feature, &ExtraFunctions, &ctx)
    }

    struct FailingAugmenter;

    impl FeatureAugmenter for FailingAugmenter {
        fn augment(&self, feature: &Feature, _ctx: &RunContext) -> Result<Rc<dyn Helpers>, MetaTagError> {
            Err(MetaTagError::Augmentation {
                feature: feature.id.clone(),
                message: "lookup offline".to_string(),
            })
        }
    }

    #[test]
    fn strict_results_are_strings() {
        let compiler = compiler(10);
        let functions = compiler
            .functions_for(&layer(&[
                "sum:=1+1",
                "flag:=feat.properties.count > 2",
                "name:=feat.properties.name",
                "list:=[1, 'a']",
            ]))
            .unwrap();
        let mut feature = Feature::new("node/1", None)
            .with_property("count", json!(3))
            .with_property("name", json!("Bakkerij"));
        assert!(retag(&functions, &mut feature));
        assert_eq!(feature.get("sum"), Some(json!("2")));
        assert_eq!(feature.get("flag"), Some(json!("true")));
        assert_eq!(feature.get("name"), Some(json!("Bakkerij")));
        assert_eq!(feature.get("list"), Some(json!("[1,\"a\"]")));
    }

    #[test]
    fn undefined_and_failing_results_leave_the_key_absent() {
        let compiler = compiler(10);
        let functions = compiler
            .functions_for(&layer(&["_a:=feat.properties.missing", "_b:=nope.x", "_c:=1 +"]))
            .unwrap();
        let mut feature = Feature::new("node/1", None)
            .with_property("_a", json!("stale"))
            .with_property("_b", json!("stale"));
        retag(&functions, &mut feature);
        assert!(!feature.properties.contains_key("_a"));
        assert!(!feature.properties.contains_key("_b"));
        assert!(!feature.properties.contains_key("_c"));
        assert_eq!(compiler.failures.failures(), 2);
    }

    #[test]
    fn lazy_tags_recompute_on_every_read() {
        let compiler = compiler(10);
        let functions = compiler
            .functions_for(&layer(&["_double=feat.properties.count * 2"]))
            .unwrap();
        let mut feature = Feature::new("node/1", None).with_property("count", json!(3));
        retag(&functions, &mut feature);
        assert!(feature.properties.slot("_double").unwrap().is_deferred());
        assert_eq!(feature.properties.concrete().count(), 1);
        assert_eq!(feature.get("_double"), Some(json!("6")));
        feature.properties.insert("count", json!(5));
        assert_eq!(feature.get("_double"), Some(json!("10")));
    }

    #[test]
    fn lazy_failures_are_logged_when_read() {
        let compiler = compiler(10);
        let functions = compiler.functions_for(&layer(&["_bad=nope"])).unwrap();
        let mut feature = Feature::new("node/1", None);
        retag(&functions, &mut feature);
        assert_eq!(compiler.failures.failures(), 0);
        assert_eq!(feature.get("_bad"), None);
        assert_eq!(compiler.failures.failures(), 1);
    }

    #[test]
    fn compiled_once_per_layer() {
        let compiler = compiler(10);
        let shops = layer(&["sum:=1+1"]);
        let a = compiler.functions_for(&shops).unwrap();
        let b = compiler.functions_for(&shops).unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(compiler.compilations(), 1);
        assert!(compiler.functions_for(&LayerConfig::new("bare")).is_none());
        assert_eq!(compiler.compilations(), 1);
    }

    #[test]
    fn placeholders_are_skipped_but_still_count_as_definitions() {
        let compiler = compiler(10);
        let layer = LayerConfig::new("shops")
            .with_calculated_tag(CalculatedTagDefinition::new("_off", None, true).unwrap());
        let functions = compiler.functions_for(&layer).unwrap();
        assert!(functions.is_empty());
        let mut feature = Feature::new("node/1", None);
        assert!(retag(&functions, &mut feature));
        assert!(feature.properties.is_empty());
    }

    #[test]
    fn failing_augmentation_skips_the_tags() {
        let compiler = compiler(10);
        let functions = compiler.functions_for(&layer(&["sum:=1+1"])).unwrap();
        let mut feature = Feature::new("node/1", None);
        let ctx = RunContext::detached(LayoutConfig::default());
        assert!(functions.retag(&mut feature, &FailingAugmenter, &ctx));
        assert!(!feature.properties.contains_key("sum"));
    }

    #[test]
    fn helpers_reach_the_snippet() {
        let compiler = compiler(10);
        let functions = compiler
            .functions_for(&layer(&["_parsed:=feat.get('_raw').a"]))
            .unwrap();
        let mut feature = Feature::new("node/1", None).with_property("_raw", json!("{\"a\": 4}"));
        retag(&functions, &mut feature);
        assert_eq!(feature.get("_parsed"), Some(json!("4")));

        let bare = compiler.compile("bare", &layer(&["_x:=feat.get('_raw')"]).calculated_tags);
        let mut feature = Feature::new("node/2", None).with_property("_raw", json!("1"));
        bare.functions[0](&mut feature, &(Rc::new(NoHelpers) as Rc<dyn Helpers>));
        assert!(!feature.properties.contains_key("_x"));
    }
}
