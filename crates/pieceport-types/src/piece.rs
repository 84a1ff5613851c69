//! Piece identifier newtype.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Reasons a string is rejected as a piece CID.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PieceCidError {
    #[error("piece cid must not be empty")]
    Empty,
    #[error("piece cid '{0}' contains invalid character {1:?}")]
    InvalidChar(String, char),
}

/// Content address identifying one migratable piece.
///
/// Used as the join key across both stores; never rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PieceCid(String);

impl PieceCid {
    /// Parse and validate a textual CID.
    ///
    /// Only the textual shape is checked (non-empty, ASCII alphanumeric);
    /// multibase/multihash decoding is left to the stores.
    ///
    /// # Errors
    ///
    /// Returns [`PieceCidError`] when the input is empty or carries a
    /// character outside `[A-Za-z0-9]`.
    pub fn parse(raw: &str) -> Result<Self, PieceCidError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(PieceCidError::Empty);
        }
        if let Some(bad) = trimmed.chars().find(|c| !c.is_ascii_alphanumeric()) {
            return Err(PieceCidError::InvalidChar(trimmed.to_string(), bad));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Borrow the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PieceCid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PieceCid {
    type Err = PieceCidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PieceCid {
    type Error = PieceCidError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PieceCid> for String {
    fn from(value: PieceCid) -> Self {
        value.0
    }
}
