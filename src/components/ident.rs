//! Component identity and kind.
//!
//! [`Kind`] is an explicit tag supplied at construction (or derived from a
//! type with [`Kind::of`]); [`Id`] is opaque and generated on first access
//! when the caller did not set one.

use std::any::type_name;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use rand::{Rng, TryRngCore};

/// Opaque component identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id(Arc<str>);

impl Id {
    /// Returns the identity as text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Id {
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl From<String> for Id {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

/// Component kind tag (e.g. `"sensor"`, `"actuator"`).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Kind(Cow<'static, str>);

impl Kind {
    /// Creates a kind tag.
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    /// Derives a stable kind from a type: the last path segment of its name,
    /// falling back to the full type name when that segment is empty.
    ///
    /// # Example
    /// ```
    /// use unitvisor::Kind;
    ///
    /// struct Thermometer;
    /// assert_eq!(Kind::of::<Thermometer>().as_str(), "Thermometer");
    /// ```
    pub fn of<T: ?Sized>() -> Self {
        let full = type_name::<T>();
        let base = full.split('<').next().unwrap_or(full);
        let short = base.rsplit("::").next().unwrap_or(base);
        if short.is_empty() {
            Self(Cow::Borrowed(full))
        } else {
            Self(Cow::Borrowed(short))
        }
    }

    /// Returns the kind as text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for Kind {
    fn from(s: &'static str) -> Self {
        Self(Cow::Borrowed(s))
    }
}

impl From<String> for Kind {
    fn from(s: String) -> Self {
        Self(Cow::Owned(s))
    }
}

/// Generates a random UUID identity; falls back to `<kind>_<HEX>` when OS entropy is unavailable.
pub(crate) fn generate_id(kind: &Kind) -> Id {
    let mut bytes = [0u8; 16];
    let entropy = rand::rngs::OsRng.try_fill_bytes(&mut bytes).map(|()| bytes);
    id_from_entropy(kind, entropy)
}

fn id_from_entropy<E: fmt::Display>(kind: &Kind, entropy: Result<[u8; 16], E>) -> Id {
    match entropy {
        Ok(bytes) => Id::from(uuid::Builder::from_random_bytes(bytes).into_uuid().to_string()),
        Err(e) => {
            tracing::warn!(kind = %kind, error = %e, "error generating id, using fallback");
            let suffix: u64 = rand::rng().random::<u64>() >> 1;
            Id::from(format!("{kind}_{suffix:X}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Thermostat;
    struct Wrapper<T>(T);

    #[test]
    fn test_kind_of_uses_short_name() {
        assert_eq!(Kind::of::<Thermostat>().as_str(), "Thermostat");
        assert_eq!(Kind::of::<Wrapper<Thermostat>>().as_str(), "Wrapper");
    }

    #[test]
    fn test_generated_ids_are_uuids_and_unique() {
        let kind = Kind::new("sensor");
        let a = generate_id(&kind);
        let b = generate_id(&kind);
        assert_ne!(a, b);
        assert!(uuid::Uuid::parse_str(a.as_str()).is_ok());
    }

    #[test]
    fn test_fallback_id_uses_kind_prefix() {
        let kind = Kind::new("actuator");
        let id = id_from_entropy(&kind, Err::<[u8; 16], _>("no entropy"));
        let hex = id.as_str().strip_prefix("actuator_").expect("kind prefix");
        assert!(!hex.is_empty());
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
