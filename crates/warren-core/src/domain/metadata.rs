//! Bounded string map for genuinely open-ended per-entity data.
//!
//! Everything the core reasons about is a typed field on the entity; this map
//! only holds annotations such as detected port hints.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub const MAX_ENTRIES: usize = 32;
pub const MAX_KEY_LEN: usize = 64;
pub const MAX_VALUE_LEN: usize = 1024;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, String>", into = "BTreeMap<String, String>")]
pub struct ExtraMetadata(BTreeMap<String, String>);

impl ExtraMetadata {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entry, enforcing the size bounds.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        let key = key.into();
        let value = value.into();
        check_entry(&key, &value)?;
        if !self.0.contains_key(&key) && self.0.len() >= MAX_ENTRIES {
            return Err(Error::validation(format!(
                "metadata is limited to {MAX_ENTRIES} entries"
            )));
        }
        self.0.insert(key, value);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn check_entry(key: &str, value: &str) -> Result<()> {
    if key.is_empty() || key.len() > MAX_KEY_LEN {
        return Err(Error::validation(format!(
            "metadata key '{key}' must be 1-{MAX_KEY_LEN} bytes"
        )));
    }
    if value.len() > MAX_VALUE_LEN {
        return Err(Error::validation(format!(
            "metadata value for '{key}' exceeds {MAX_VALUE_LEN} bytes"
        )));
    }
    Ok(())
}

impl TryFrom<BTreeMap<String, String>> for ExtraMetadata {
    type Error = Error;

    fn try_from(map: BTreeMap<String, String>) -> Result<Self> {
        if map.len() > MAX_ENTRIES {
            return Err(Error::validation(format!(
                "metadata is limited to {MAX_ENTRIES} entries"
            )));
        }
        map.iter().try_for_each(|(k, v)| check_entry(k, v))?;
        Ok(Self(map))
    }
}

impl From<ExtraMetadata> for BTreeMap<String, String> {
    fn from(metadata: ExtraMetadata) -> Self {
        metadata.0
    }
}
