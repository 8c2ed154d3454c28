//! Composite identifiers.
//!
//! Every source numbers its entities independently, so a local id is only
//! meaningful next to the alias of the source it came from. A composite id
//! joins the two: `selectus:feat-12`.

use crate::error::{Error, ErrorKind, Result};
use derive_more::Display;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;

pub const DELIMITER: char = ':';

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[display("{alias}:{local}")]
pub struct CompositeId {
    alias: String,
    local: String,
}

impl CompositeId {
    pub fn new(alias: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            local: local.into(),
        }
    }

    /// Split on the first delimiter only; the local part may contain more.
    pub fn parse(id: &str) -> Result<Self> {
        match id.split_once(DELIMITER) {
            Some((alias, local)) => Ok(Self::new(alias, local)),
            None => exn::bail!(ErrorKind::MalformedId(id.to_string())),
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn local(&self) -> &str {
        &self.local
    }
}

impl FromStr for CompositeId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for CompositeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CompositeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(|e| serde::de::Error::custom(&*e))
    }
}
