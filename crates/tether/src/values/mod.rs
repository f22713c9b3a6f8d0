//! Remote object properties and their generation-stamped cache.

mod cache;
mod loader;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::CallError;

pub use self::cache::PropertyCache;
pub use self::loader::{GET_PROPERTIES, PropertyLoader, VmPropertyLoader};

/// One named property of a remote object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    /// Property name.
    pub name: String,
    /// Property value as reported by the VM.
    #[serde(default)]
    pub value: Value,
}

/// Properties of one object, shared between every reader of a cache entry.
pub type PropertyList = Arc<Vec<Property>>;

/// Outcome of one property load.
pub type PropertyResult = Result<PropertyList, CallError>;
