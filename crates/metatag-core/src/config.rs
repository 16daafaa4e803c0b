//! Configuration consumed by the engine. Validation and merging of whole
//! themes happens upstream; these types only carry what a pass needs.

use crate::error::MetaTagError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One calculated tag of a layer.
///
/// Theme files write these as `"_key=code"` (lazy) or `"_key:=code"`
/// (strict). A `None` snippet is a disabled placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawDefinition", into = "RawDefinition")]
pub struct CalculatedTagDefinition {
    pub key: String,
    pub snippet: Option<String>,
    pub strict: bool,
}

impl CalculatedTagDefinition {
    pub fn new(key: &str, snippet: Option<&str>, strict: bool) -> Result<Self, MetaTagError> {
        validate_key(key, key)?;
        Ok(Self {
            key: key.to_string(),
            snippet: snippet.map(str::to_string),
            strict,
        })
    }

    pub fn strict(key: &str, snippet: &str) -> Result<Self, MetaTagError> {
        Self::new(key, Some(snippet), true)
    }

    pub fn lazy(key: &str, snippet: &str) -> Result<Self, MetaTagError> {
        Self::new(key, Some(snippet), false)
    }

    /// Parse the theme string form.
    pub fn parse(entry: &str) -> Result<Self, MetaTagError> {
        let Some(eq) = entry.find('=') else {
            return Err(MetaTagError::InvalidCalculatedTag {
                definition: entry.to_string(),
                reason: "expected '<key>=<code>' or '<key>:=<code>'".to_string(),
            });
        };
        let mut key = entry[..eq].trim();
        let mut strict = false;
        if let Some(stripped) = key.strip_suffix(':') {
            key = stripped.trim();
            strict = true;
        }
        validate_key(key, entry)?;
        Ok(Self {
            key: key.to_string(),
            snippet: Some(entry[eq + 1..].to_string()),
            strict,
        })
    }
}

// [a-z_][a-z0-9:_]*
fn validate_key(key: &str, definition: &str) -> Result<(), MetaTagError> {
    let mut chars = key.chars();
    let head_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_');
    let tail_ok = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == ':' || c == '_');
    if head_ok && tail_ok {
        Ok(())
    } else {
        Err(MetaTagError::InvalidCalculatedTag {
            definition: definition.to_string(),
            reason: format!("'{key}' is not a valid key"),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawDefinition {
    Text(String),
    Triple(String, Option<String>, bool),
}

impl TryFrom<RawDefinition> for CalculatedTagDefinition {
    type Error = MetaTagError;

    fn try_from(raw: RawDefinition) -> Result<Self, Self::Error> {
        match raw {
            RawDefinition::Text(entry) => Self::parse(&entry),
            RawDefinition::Triple(key, snippet, strict) => Self::new(&key, snippet.as_deref(), strict),
        }
    }
}

impl From<CalculatedTagDefinition> for RawDefinition {
    fn from(def: CalculatedTagDefinition) -> Self {
        RawDefinition::Triple(def.key, def.snippet, def.strict)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerConfig {
    pub id: String,
    /// Opaque to the engine; only its presence matters. Layers without a
    /// source never receive batches.
    #[serde(default)]
    pub source: Option<Value>,
    #[serde(default)]
    pub calculated_tags: Vec<CalculatedTagDefinition>,
}

impl LayerConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: Some(Value::Object(Default::default())),
            calculated_tags: Vec::new(),
        }
    }

    pub fn without_source(mut self) -> Self {
        self.source = None;
        self
    }

    pub fn with_calculated_tag(mut self, definition: CalculatedTagDefinition) -> Self {
        self.calculated_tags.push(definition);
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutConfig {
    pub id: String,
    #[serde(default)]
    pub layers: Vec<LayerConfig>,
}

impl LayoutConfig {
    pub fn layer(&self, id: &str) -> Option<&LayerConfig> {
        self.layers.iter().find(|l| l.id == id)
    }
}

/// Per-pass switches for [`MetaTagging::apply`](crate::MetaTagging::apply).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaTagOptions {
    #[serde(default = "default_true")]
    pub include_dates: bool,
    #[serde(default = "default_true")]
    pub include_non_dates: bool,
    /// Read every lazy key right after installing it, so nothing stays
    /// deferred. Used by export paths.
    #[serde(default)]
    pub evaluate_strict: bool,
}

fn default_true() -> bool {
    true
}

impl Default for MetaTagOptions {
    fn default() -> Self {
        Self {
            include_dates: true,
            include_non_dates: true,
            evaluate_strict: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Calculated-tag failures logged before output is silenced.
    #[serde(default = "default_error_output_limit")]
    pub error_output_limit: usize,
}

fn default_error_output_limit() -> usize {
    10
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            error_output_limit: default_error_output_limit(),
        }
    }
}
