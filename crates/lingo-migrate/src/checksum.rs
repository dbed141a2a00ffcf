//! Bundle digests and bundle parsing.
//!
//! [`ChecksumVerifier::verify`] is pure: it looks only at the bytes it is
//! given. Parsing is separate ([`TranslationBundle::parse`]) so that an
//! unreadable bundle is reported as [`Error::MalformedBundle`], never as a
//! checksum mismatch.

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use sha2::{Digest as _, Sha256};

use crate::error::{Error, Result};

/// Computes a content digest.
pub trait Digester: Send + Sync {
    /// Returns the digest of `content` as a lowercase string.
    fn digest(&self, content: &[u8]) -> String;
}

/// SHA-256, hex encoded.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Digester;

impl Digester for Sha256Digester {
    fn digest(&self, content: &[u8]) -> String {
        hex::encode(Sha256::digest(content))
    }
}

/// Computes and compares bundle digests.
#[derive(Clone)]
pub struct ChecksumVerifier {
    digester: Arc<dyn Digester>,
}

impl fmt::Debug for ChecksumVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChecksumVerifier").finish_non_exhaustive()
    }
}

impl Default for ChecksumVerifier {
    fn default() -> Self {
        Self::sha256()
    }
}

impl ChecksumVerifier {
    /// Creates a SHA-256 verifier.
    #[must_use]
    pub fn sha256() -> Self {
        Self::with_digester(Arc::new(Sha256Digester))
    }

    /// Creates a verifier over a custom digest.
    #[must_use]
    pub fn with_digester(digester: Arc<dyn Digester>) -> Self {
        Self { digester }
    }

    /// Returns the digest of `content`.
    #[must_use]
    pub fn compute(&self, content: &[u8]) -> String {
        self.digester.digest(content)
    }

    /// Returns true if `content` hashes to `expected`.
    ///
    /// Comparison ignores ASCII case and surrounding whitespace.
    #[must_use]
    pub fn verify(&self, content: &[u8], expected: &str) -> bool {
        self.compute(content).eq_ignore_ascii_case(expected.trim())
    }
}

/// Translation content: a flat or nested JSON object keyed by translation key.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TranslationBundle {
    entries: Map<String, Value>,
}

impl TranslationBundle {
    /// Parses bundle bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedBundle`] if the content is not valid JSON or
    /// its top level is not an object.
    pub fn parse(content: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(content).map_err(|e| Error::MalformedBundle {
            reason: format!("invalid JSON: {e}"),
        })?;
        match value {
            Value::Object(entries) => Ok(Self { entries }),
            other => Err(Error::MalformedBundle {
                reason: format!("expected a JSON object, found {}", kind(&other)),
            }),
        }
    }

    /// Wraps already-parsed entries.
    #[must_use]
    pub fn from_entries(entries: Map<String, Value>) -> Self {
        Self { entries }
    }

    /// Returns the translation entries.
    #[must_use]
    pub fn entries(&self) -> &Map<String, Value> {
        &self.entries
    }

    /// Returns the number of top-level keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the bundle has no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serializes the bundle back to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(&self.entries)?)
    }
}

const fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
