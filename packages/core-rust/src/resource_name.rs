//! Resource names: addresses of manageable resources in a registry.
//!
//! A name has the form `domain:key=value[,key=value]*`, e.g.
//! `opbridge.demo:type=Test`. Properties are unordered; the canonical form
//! lists them sorted by key.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Characters that may not appear inside a property key or value.
const RESERVED: &[char] = &[':', ',', '=', '*', '?'];

/// Address naming exactly one manageable resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceName {
    domain: String,
    properties: BTreeMap<String, String>,
}

/// Why a string is not a valid [`ResourceName`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResourceNameError {
    #[error("resource name {0:?} has no domain separator ':'")]
    MissingDomainSeparator(String),
    #[error("resource name has an empty domain")]
    EmptyDomain,
    #[error("resource name has no key properties")]
    NoProperties,
    #[error("property {0:?} is not of the form key=value")]
    MalformedProperty(String),
    #[error("property {0:?} has an empty key or value")]
    EmptyProperty(String),
    #[error("property {0:?} contains a reserved character")]
    ReservedCharacter(String),
    #[error("duplicate property key {0:?}")]
    DuplicateKey(String),
}

impl ResourceName {
    /// Parses a resource name.
    ///
    /// # Errors
    ///
    /// Returns a [`ResourceNameError`] describing the first violation found.
    pub fn parse(input: &str) -> Result<Self, ResourceNameError> {
        let (domain, props) = input
            .split_once(':')
            .ok_or_else(|| ResourceNameError::MissingDomainSeparator(input.to_string()))?;

        if domain.trim().is_empty() {
            return Err(ResourceNameError::EmptyDomain);
        }
        if props.is_empty() {
            return Err(ResourceNameError::NoProperties);
        }

        let mut properties = BTreeMap::new();
        for prop in props.split(',') {
            let (key, value) = prop
                .split_once('=')
                .ok_or_else(|| ResourceNameError::MalformedProperty(prop.to_string()))?;
            if key.is_empty() || value.is_empty() {
                return Err(ResourceNameError::EmptyProperty(prop.to_string()));
            }
            if key.contains(RESERVED) || value.contains(RESERVED) {
                return Err(ResourceNameError::ReservedCharacter(prop.to_string()));
            }
            if properties
                .insert(key.to_string(), value.to_string())
                .is_some()
            {
                return Err(ResourceNameError::DuplicateKey(key.to_string()));
            }
        }

        Ok(Self {
            domain: domain.to_string(),
            properties,
        })
    }

    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Returns the value of a key property.
    #[must_use]
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.domain)?;
        for (i, (key, value)) in self.properties.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{key}={value}")?;
        }
        Ok(())
    }
}

impl FromStr for ResourceName {
    type Err = ResourceNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// On the wire a resource name is its canonical string.

impl Serialize for ResourceName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ResourceName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
