//! Sift - composite DNS filtering engine
//!
//! The filtering core of a DNS resolution service: given an incoming query
//! (and later, the upstream response), it decides whether to block, allow,
//! or rewrite the answer, merging results from multiple independently
//! refreshing rule sources under a strict priority order.
//!
//! # Features
//!
//! * Layered decision pipeline: custom rules, rule lists, blocked services,
//!   safe browsing, adult blocking, safe search, newly registered domains
//! * `$dnsrewrite` resolution with CNAME redirects, error rcodes, and typed
//!   answer synthesis (A, AAAA, MX, PTR, SRV, TXT, SVCB, HTTPS)
//! * Hot-reloadable rule lists that never serve a torn engine
//! * Bounded, collision-checked result caching with a process-wide hash seed
//! * Pooled deep copies of DNS messages for the high-QPS response path
//!
//! # Architecture
//!
//! The crate is divided into two main modules:
//! * `dns` - the in-memory message model, response construction, and cloning
//! * `filter` - the rule engines and the composite filtering pipeline

/// DNS message model, synthetic response construction, and pooled cloning
pub mod dns;

/// Rule engines, result caching, and the composite filtering pipeline
pub mod filter;
