//! Filtering decisions
//!
//! The single terminal outcome of one filtering pass. At most one result is
//! produced per pass; the variants are mutually exclusive.

use crate::dns::protocol::DnsPacket;
use crate::filter::id::FilterId;

/// Upper bound on stored rule text, in characters.
const RULE_TEXT_MAX: usize = 1024;

/// The literal filter-syntax rule behind a decision, kept for logging and
/// statistics. For service blocks this carries the blocked-service
/// identifier instead of rule text.
pub type RuleText = String;

/// Truncates rule text to the storage bound without splitting a character.
pub fn bound_rule_text(text: &str) -> RuleText {
    if text.chars().count() <= RULE_TEXT_MAX {
        return text.to_string();
    }
    text.chars().take(RULE_TEXT_MAX).collect()
}

/// The outcome of filtering one request or one answer record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterResult {
    /// An explicit allow-list exception matched.
    Allowed { list: FilterId, rule: RuleText },
    /// The request or answer must be blocked.
    Blocked { list: FilterId, rule: RuleText },
    /// The request should be transformed (e.g. a CNAME rewrite) and
    /// re-resolved.
    ModifiedRequest {
        msg: DnsPacket,
        list: FilterId,
        rule: RuleText,
    },
    /// A full synthetic response should be returned directly.
    ModifiedResponse {
        msg: DnsPacket,
        list: FilterId,
        rule: RuleText,
    },
}

impl FilterResult {
    pub fn list(&self) -> &FilterId {
        match self {
            FilterResult::Allowed { list, .. }
            | FilterResult::Blocked { list, .. }
            | FilterResult::ModifiedRequest { list, .. }
            | FilterResult::ModifiedResponse { list, .. } => list,
        }
    }

    pub fn rule(&self) -> &str {
        match self {
            FilterResult::Allowed { rule, .. }
            | FilterResult::Blocked { rule, .. }
            | FilterResult::ModifiedRequest { rule, .. }
            | FilterResult::ModifiedResponse { rule, .. } => rule,
        }
    }

    /// Whether this result ends the pipeline no matter which layer produced
    /// it. `Allowed` is terminal only for the custom filter, which the
    /// composite handles separately.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, FilterResult::Allowed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bound_rule_text() {
        assert_eq!(bound_rule_text("||short^"), "||short^");
        let long = "y".repeat(2000);
        assert_eq!(bound_rule_text(&long).len(), RULE_TEXT_MAX);
    }

    #[test]
    fn test_terminality() {
        let list = FilterId::custom();
        assert!(!FilterResult::Allowed {
            list: list.clone(),
            rule: String::new()
        }
        .is_terminal());
        assert!(FilterResult::Blocked {
            list,
            rule: String::new()
        }
        .is_terminal());
    }
}
