//! DNS message handling for the filtering core
//!
//! This module carries the in-memory representation of DNS messages and the
//! two engines that operate on them on the hot path:
//!
//! * `protocol` - transport-agnostic message, record, and option structures
//! * `builder` - synthetic response construction (blocked, NODATA, rewrite
//!   answers) with negative-caching SOA records and Extended DNS Errors
//! * `cloner` - pooled deep copies of messages so cached templates are never
//!   aliased across in-flight requests
//!
//! Wire-format parsing and serialization are deliberately out of scope; the
//! surrounding server owns the transport.

/// Synthetic response construction
pub mod builder;

/// Pooled message deep-copy engine
pub mod cloner;

/// Transport-agnostic DNS message structures
pub mod protocol;
