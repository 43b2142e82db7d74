//! Storage keys derived from object identities.
//!
//! A [`StorageKey`] is the logical key for one object. The physical record
//! written by a repository appends `+{sequence}` to it (see
//! [`StorageKey::composite`]). Components are percent-escaped, so a
//! composite key can always be split back apart on its last `+`.

use std::fmt;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use serde::{Deserialize, Serialize};

use crate::error::{TypeError, TypeResult};
use crate::identity::Identity;
use crate::version::Sequence;

/// Root segment shared by every key.
pub const KEY_ROOT: &str = "/registrys";

/// Separator between a logical key and its sequence in a composite key.
pub const VERSION_SEPARATOR: char = '+';

const SEGMENT_ENCODE: &AsciiSet = &CONTROLS.add(b'/').add(b'+').add(b'%');

fn escape(segment: &str) -> String {
    utf8_percent_encode(segment, SEGMENT_ENCODE).to_string()
}

fn unescape(key: &str, segment: &str) -> TypeResult<String> {
    percent_decode_str(segment)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|e| TypeError::InvalidKey {
            key: key.to_string(),
            reason: e.to_string(),
        })
}

/// Logical key addressing one object: `/registrys/{namespace}/{kind}/{name}`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StorageKey(String);

impl StorageKey {
    /// Build the key for an object. The kind is lower-cased.
    pub fn new(namespace: &str, kind: &str, name: &str) -> Self {
        Self(format!(
            "{KEY_ROOT}/{}/{}/{}",
            escape(namespace),
            escape(&kind.to_lowercase()),
            escape(name)
        ))
    }

    pub fn for_identity(identity: &Identity) -> Self {
        Self::new(&identity.namespace, &identity.kind, &identity.name)
    }

    /// Parse and validate a rendered logical key.
    pub fn parse(raw: &str) -> TypeResult<Self> {
        let invalid = |reason: &str| TypeError::InvalidKey {
            key: raw.to_string(),
            reason: reason.to_string(),
        };
        let rest = raw
            .strip_prefix(KEY_ROOT)
            .and_then(|r| r.strip_prefix('/'))
            .ok_or_else(|| invalid("missing /registrys root"))?;
        if rest.contains(VERSION_SEPARATOR) {
            return Err(invalid("unescaped version separator"));
        }
        let segments: Vec<&str> = rest.split('/').collect();
        if segments.len() != 3 {
            return Err(invalid("expected namespace/kind/name"));
        }
        for segment in &segments {
            unescape(raw, segment)?;
        }
        Ok(Self(raw.to_string()))
    }

    /// Render the physical record key `{logical}+{sequence}`.
    pub fn composite(&self, sequence: Sequence) -> String {
        format!("{}{VERSION_SEPARATOR}{sequence}", self.0)
    }

    /// Split a composite record key back into its logical key and sequence.
    pub fn split_composite(composite: &str) -> TypeResult<(Self, Sequence)> {
        let (logical, seq) = composite
            .rsplit_once(VERSION_SEPARATOR)
            .ok_or_else(|| TypeError::InvalidKey {
                key: composite.to_string(),
                reason: "missing sequence suffix".into(),
            })?;
        let sequence = seq.parse::<u64>().map_err(|e| TypeError::InvalidKey {
            key: composite.to_string(),
            reason: e.to_string(),
        })?;
        Ok((Self::parse(logical)?, Sequence::new(sequence)))
    }

    /// Decode the key back into its (unescaped, lower-cased kind) identity.
    pub fn identity(&self) -> TypeResult<Identity> {
        let rest = &self.0[KEY_ROOT.len() + 1..];
        let mut parts = rest.splitn(3, '/');
        let mut next = || unescape(&self.0, parts.next().unwrap_or_default());
        let namespace = next()?;
        let kind = next()?;
        let name = next()?;
        Ok(Identity::new(namespace, kind, name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn has_prefix(&self, prefix: &KeyPrefix) -> bool {
        self.0.starts_with(prefix.as_str())
    }
}

impl TryFrom<String> for StorageKey {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<StorageKey> for String {
    fn from(key: StorageKey) -> Self {
        key.0
    }
}

impl fmt::Debug for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StorageKey({})", self.0)
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Prefix addressing a group of keys.
///
/// Prefixes always end with `/`, so the prefix for namespace `a` never
/// matches keys in namespace `ab`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct KeyPrefix(String);

impl KeyPrefix {
    /// Every key in the store.
    pub fn all() -> Self {
        Self(format!("{KEY_ROOT}/"))
    }

    /// Every kind in one namespace.
    pub fn namespace(namespace: &str) -> Self {
        Self(format!("{KEY_ROOT}/{}/", escape(namespace)))
    }

    /// Every object of one kind in one namespace.
    pub fn collection(namespace: &str, kind: &str) -> Self {
        Self(format!(
            "{KEY_ROOT}/{}/{}/",
            escape(namespace),
            escape(&kind.to_lowercase())
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, key: &str) -> bool {
        key.starts_with(&self.0)
    }
}

impl fmt::Display for KeyPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
