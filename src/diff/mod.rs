//! Structural diffing, Shorthand inversion and embedded-collection resolution

mod resolve;
mod shorthand;
mod structural;

pub use resolve::{
    apply_collection, resolve_collection, CollectionOps, CollectionValidator, RequiredFields,
    Validators,
};
pub use shorthand::{
    invert, invert_shorthand, CollectionShorthand, EmbeddedChange, Shorthand, ShorthandConfig,
};
pub use structural::{diff, invert_patch};

use thiserror::Error;

/// A rejected embedded-collection addition. Aborts only the collection it
/// was raised for.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{collection} entry {key:?} is missing required field {field}")]
    MissingField {
        collection: String,
        key: String,
        field: String,
    },

    #[error("{collection} entry {key:?} rejected: {reason}")]
    Rejected {
        collection: String,
        key: String,
        reason: String,
    },
}
