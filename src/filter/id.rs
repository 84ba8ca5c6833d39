//! Filter and blocked-service identifiers
//!
//! Every rule source is distinguished by an opaque identifier assigned once
//! and never mutated. A handful of values are reserved for the built-in
//! layers of the pipeline.

use std::fmt;
use std::sync::Arc;

use derive_more::{Display, Error};

/// Maximum length of a filter identifier.
const FILTER_ID_MAX: usize = 128;

/// Maximum length of a blocked-service identifier.
const SERVICE_ID_MAX: usize = 64;

#[derive(Debug, Display, Error)]
pub enum IdError {
    #[display(fmt = "identifier must be 1..={} characters, got {}", max, len)]
    BadLength { len: usize, max: usize },
    #[display(fmt = "identifier contains forbidden byte {:#04x}", byte)]
    BadByte {
        #[error(not(source))]
        byte: u8,
    },
}

type Result<T> = std::result::Result<T, IdError>;

fn validate(s: &str, max: usize) -> Result<()> {
    if s.is_empty() || s.len() > max {
        return Err(IdError::BadLength { len: s.len(), max });
    }
    for &b in s.as_bytes() {
        // Printable ASCII, excluding the slash.
        if !(0x21..=0x7e).contains(&b) || b == b'/' {
            return Err(IdError::BadByte { byte: b });
        }
    }
    Ok(())
}

/// Opaque interned identifier of a rule source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FilterId(Arc<str>);

impl FilterId {
    /// Validates and interns an identifier: 1–128 printable non-slash ASCII
    /// characters.
    pub fn new(s: &str) -> Result<FilterId> {
        validate(s, FILTER_ID_MAX)?;
        Ok(FilterId(Arc::from(s)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    // Reserved sentinels.

    /// Per-profile custom rules.
    pub fn custom() -> FilterId {
        FilterId(Arc::from("custom"))
    }

    /// Blocked-service rule sets; results carry a [`BlockedServiceId`]
    /// instead of rule text.
    pub fn blocked_service() -> FilterId {
        FilterId(Arc::from("blocked_service"))
    }

    pub fn safe_browsing() -> FilterId {
        FilterId(Arc::from("safe_browsing"))
    }

    pub fn adult_blocking() -> FilterId {
        FilterId(Arc::from("adult_blocking"))
    }

    pub fn general_safe_search() -> FilterId {
        FilterId(Arc::from("general_safe_search"))
    }

    pub fn youtube_safe_search() -> FilterId {
        FilterId(Arc::from("youtube_safe_search"))
    }

    pub fn newly_registered_domains() -> FilterId {
        FilterId(Arc::from("newly_registered_domains"))
    }

    /// No filter; used where an identifier is structurally required but no
    /// source applies.
    pub fn none() -> FilterId {
        FilterId(Arc::from("none"))
    }
}

impl fmt::Display for FilterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a product-level blocked service (e.g. a social network),
/// substituted for rule text in blocked-service results.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlockedServiceId(Arc<str>);

impl BlockedServiceId {
    /// Validates and interns an identifier: 1–64 printable non-slash ASCII
    /// characters.
    pub fn new(s: &str) -> Result<BlockedServiceId> {
        validate(s, SERVICE_ID_MAX)?;
        Ok(BlockedServiceId(Arc::from(s)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlockedServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_id_validation() {
        assert!(FilterId::new("base_dns_filter").is_ok());
        assert!(FilterId::new("").is_err());
        assert!(FilterId::new(&"x".repeat(129)).is_err());
        assert!(FilterId::new("has/slash").is_err());
        assert!(FilterId::new("has space").is_err());
        assert!(FilterId::new("non-ascii-\u{e9}").is_err());
    }

    #[test]
    fn test_service_id_validation() {
        assert!(BlockedServiceId::new("social_network").is_ok());
        assert!(BlockedServiceId::new(&"x".repeat(64)).is_ok());
        assert!(BlockedServiceId::new(&"x".repeat(65)).is_err());
    }

    #[test]
    fn test_sentinels_are_valid() {
        for id in &[
            FilterId::custom(),
            FilterId::blocked_service(),
            FilterId::safe_browsing(),
            FilterId::adult_blocking(),
            FilterId::general_safe_search(),
            FilterId::youtube_safe_search(),
            FilterId::newly_registered_domains(),
            FilterId::none(),
        ] {
            assert!(FilterId::new(id.as_str()).is_ok());
        }
    }
}
