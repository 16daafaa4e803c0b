use crate::builtin;
use crate::config::{LayerConfig, MetaTagOptions};
use crate::context::{PropertyStore, RunContext};
use crate::error::MetaTagError;
use crate::feature::Feature;

/// A built-in rule producing one or more `_`-prefixed keys.
pub trait Derivation {
    fn keys(&self) -> &[&str];

    /// Lazy derivations install deferred slots instead of values.
    fn is_lazy(&self) -> bool {
        false
    }

    /// Depends on the current date; filtered by `includeDates`.
    fn includes_dates(&self) -> bool {
        false
    }

    /// Write the keys into `feature`. Returns whether anything changed.
    fn apply(
        &self,
        feature: &mut Feature,
        layer: &LayerConfig,
        store: Option<&dyn PropertyStore>,
        ctx: &RunContext,
    ) -> Result<bool, MetaTagError>;
}

/// Fixed, ordered list of derivations.
pub struct DerivationRegistry {
    derivations: Vec<Box<dyn Derivation>>,
}

impl DerivationRegistry {
    pub fn from_derivations(derivations: Vec<Box<dyn Derivation>>) -> Self {
        Self { derivations }
    }

    /// The default set shipped with the engine.
    pub fn builtin() -> Self {
        Self::from_derivations(builtin::defaults())
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Derivation> {
        self.derivations.iter().map(|d| d.as_ref())
    }

    /// Derivations allowed by `options`, in registry order.
    pub fn eligible(&self, options: &MetaTagOptions) -> Vec<&dyn Derivation> {
        self.iter()
            .filter(|d| {
                if d.includes_dates() {
                    options.include_dates
                } else {
                    options.include_non_dates
                }
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.derivations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.derivations.is_empty()
    }
}

impl Default for DerivationRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Marker(&'static [&'static str], bool);

    impl Derivation for Marker {
        fn keys(&self) -> &[&str] {
            self.0
        }

        fn includes_dates(&self) -> bool {
            self.1
        }

        fn apply(
            &self,
            _feature: &mut Feature,
            _layer: &LayerConfig,
            _store: Option<&dyn PropertyStore>,
            _ctx: &RunContext,
        ) -> Result<bool, MetaTagError> {
            Ok(false)
        }
    }

    fn registry() -> DerivationRegistry {
        DerivationRegistry::from_derivations(vec![
            Box::new(Marker(&["_a"], false)),
            Box::new(Marker(&["_today"], true)),
            Box::new(Marker(&["_b"], false)),
        ])
    }

    fn keys(selected: Vec<&dyn Derivation>) -> Vec<&str> {
        selected.iter().flat_map(|d| d.keys().iter().copied()).collect()
    }

    #[test]
    fn eligibility_follows_date_flags() {
        let registry = registry();
        let all = registry.eligible(&MetaTagOptions::default());
        assert_eq!(keys(all), vec!["_a", "_today", "_b"]);

        let no_dates = MetaTagOptions {
            include_dates: false,
            ..MetaTagOptions::default()
        };
        assert_eq!(keys(registry.eligible(&no_dates)), vec!["_a", "_b"]);

        let only_dates = MetaTagOptions {
            include_non_dates: false,
            ..MetaTagOptions::default()
        };
        assert_eq!(keys(registry.eligible(&only_dates)), vec!["_today"]);
    }

    #[test]
    fn builtin_keys_are_namespaced() {
        let registry = DerivationRegistry::builtin();
        assert!(!registry.is_empty());
        assert!(
            registry
                .iter()
                .flat_map(|d| d.keys().iter())
                .all(|k| k.starts_with('_'))
        );
    }
}
