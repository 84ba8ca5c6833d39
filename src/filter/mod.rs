//! Composite DNS Filtering Pipeline
//!
//! The decision-making half of the crate: rule engines, caches, and the
//! orchestrator that merges their results under a fixed priority order.
//!
//! # Module Structure
//!
//! * `id` - validated filter and blocked-service identifiers
//! * `decision` - the filtering result sum type
//! * `rules` - the compiled rule engine (adblock syntax, hosts lines,
//!   `$dnsrewrite`/`$badfilter`/`$client` modifiers)
//! * `rescache` - bounded, collision-checked match-result cache
//! * `rulelist` - immutable and hot-reloadable rule-list filters
//! * `refresh` - rule-text fetching with on-disk caching and staleness
//! * `rewrite` - `$dnsrewrite` resolution into a single outcome
//! * `category` - hash-prefix and safe-search categorical filters
//! * `composite` - the single entry point for request/response filtering

/// Hash-prefix and safe-search categorical request filters
pub mod category;

/// The composite filter orchestrator
pub mod composite;

/// Filtering decision sum type
pub mod decision;

/// Validated filter and blocked-service identifiers
pub mod id;

/// Match-result caching keyed by a seeded hash
pub mod rescache;

/// Rule-text fetching with on-disk cache and staleness handling
pub mod refresh;

/// `$dnsrewrite` rule resolution
pub mod rewrite;

/// Immutable and refreshable rule-list filters
pub mod rulelist;

/// The compiled rule-matching engine
pub mod rules;
