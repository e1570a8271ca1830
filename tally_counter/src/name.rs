//! Validated counter names.
//!
//! A counter name doubles as a path fragment in permanent storage, so it must
//! not contain `:` and must not begin or end with `/`. Interior `/` separate
//! path segments: `page/view` is stored under `.../page/view/data-10s.json`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Errors produced by [`Name`]
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The name contains a colon.
    #[error("\":\" is not allowed in counter name: {0}")]
    Colon(String),
    /// The name begins or ends with a slash.
    #[error("\"/\" is not allowed to begin or end counter name: {0}")]
    Slash(String),
}

/// The name of a counter
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Name(String);

impl Name {
    /// Create a new [`Name`]
    ///
    /// # Errors
    ///
    /// Returns an error if the name contains `:` or begins or ends with `/`.
    pub fn new<S>(name: S) -> Result<Self, Error>
    where
        S: Into<String>,
    {
        let name = name.into();
        if name.contains(':') {
            return Err(Error::Colon(name));
        }
        if name.starts_with('/') || name.ends_with('/') {
            return Err(Error::Slash(name));
        }
        Ok(Self(name))
    }

    /// The name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Name {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Name {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for Name {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Name> for String {
    fn from(value: Name) -> Self {
        value.0
    }
}
