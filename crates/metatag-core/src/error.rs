use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MetaTagError {
    #[error("Could not calculate metatag for '{keys}': {message}")]
    Derivation { keys: String, message: String },

    #[error("Feature augmentation failed for '{feature}': {message}")]
    Augmentation { feature: String, message: String },

    #[error("Could not ping the store of '{feature}': {message}")]
    Notification { feature: String, message: String },

    #[error("Invalid calculated tag '{definition}': {reason}")]
    InvalidCalculatedTag { definition: String, reason: String },

    #[error("Feature has neither an 'id' nor a 'properties.id'")]
    MissingId,
}

impl MetaTagError {
    pub fn derivation(keys: &[&str], message: impl Into<String>) -> Self {
        Self::Derivation {
            keys: keys.join(","),
            message: message.into(),
        }
    }
}

pub type MetaTagResult<T> = Result<T, MetaTagError>;
