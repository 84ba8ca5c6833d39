//! Rule-List Filters
//!
//! Wraps the compiled rule engine in the two forms the pipeline uses:
//!
//! * [`ImmutableList`] compiles once and never changes. Custom per-profile
//!   rules and blocked-service rule sets use this form, without a result
//!   cache, since their rules are tiny and per-client.
//! * [`RefreshableList`] holds its engine behind a lock and supports
//!   hot reload. A refresh compiles the replacement engine entirely
//!   outside the lock; the write lock covers only the swap and the result
//!   cache wipe, so readers never observe a new engine with old cached
//!   results.

use std::sync::Arc;

use log::info;
use parking_lot::RwLock;

use crate::dns::protocol::CLASS_IN;
use crate::filter::id::FilterId;
use crate::filter::refresh::{self, RuleFetcher, Source};
use crate::filter::rescache::{CacheKey, ResultCache};
use crate::filter::rules::{DnsMatch, ListIndex, MatchInput, RuleEngine};

/// A rule list compiled once at construction.
pub struct ImmutableList {
    id: FilterId,
    index: ListIndex,
    engine: RuleEngine,
}

impl ImmutableList {
    pub fn new(id: FilterId, index: ListIndex, text: &str) -> ImmutableList {
        let engine = RuleEngine::compile(index, text);
        ImmutableList { id, index, engine }
    }

    pub fn id(&self) -> &FilterId {
        &self.id
    }

    pub fn index(&self) -> ListIndex {
        self.index
    }

    pub fn rule_count(&self) -> usize {
        self.engine.rule_count()
    }

    pub fn matches(&self, input: &MatchInput<'_>) -> Option<DnsMatch> {
        self.engine.matches(input)
    }
}

/// A rule list whose engine can be swapped at runtime.
pub struct RefreshableList {
    id: FilterId,
    index: ListIndex,
    source: Source,
    engine: RwLock<RuleEngine>,
    cache: ResultCache,
}

impl RefreshableList {
    /// Creates the list with an empty engine; it matches nothing until the
    /// first [`refresh`](Self::refresh) succeeds.
    pub fn new(
        id: FilterId,
        index: ListIndex,
        source: Source,
        cache_capacity: usize,
    ) -> RefreshableList {
        RefreshableList {
            id,
            index,
            source,
            engine: RwLock::new(RuleEngine::default()),
            cache: ResultCache::new(cache_capacity),
        }
    }

    pub fn id(&self) -> &FilterId {
        &self.id
    }

    pub fn index(&self) -> ListIndex {
        self.index
    }

    pub fn rule_count(&self) -> usize {
        self.engine.read().rule_count()
    }

    /// Fetches and recompiles the rules, then swaps the engine in.
    ///
    /// Compilation happens before the write lock is taken, so readers are
    /// blocked only for the swap itself. On any error the previous engine
    /// and its cached results stay in service.
    pub fn refresh(&self, fetcher: &RuleFetcher, accept_stale: bool) -> refresh::Result<usize> {
        let text = fetcher.fetch(&self.id, &self.source, accept_stale)?;
        let fresh = RuleEngine::compile(self.index, &text);
        let count = fresh.rule_count();

        {
            let mut engine = self.engine.write();
            *engine = fresh;
            self.cache.clear();
        }

        info!("filter {}: refreshed, {} rules", self.id, count);
        Ok(count)
    }

    /// Matches a query, consulting the result cache first. Negative
    /// results are cached as well.
    ///
    /// The read lock is held across the cache probe and the insert, which
    /// keeps a concurrent refresh from wiping the cache between this
    /// lookup and its insert.
    pub fn matches(&self, input: &MatchInput<'_>) -> Option<Arc<DnsMatch>> {
        let key = CacheKey {
            host: input.host.to_string(),
            qtype: input.qtype.to_num(),
            qclass: CLASS_IN,
            is_answer: input.is_answer,
        };

        let engine = self.engine.read();
        if let Some(cached) = self.cache.get(&key) {
            return cached;
        }

        let matched = engine.matches(input).map(Arc::new);
        self.cache.insert(&key, matched.clone());
        matched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::protocol::QueryType;
    use std::env;
    use std::fs;
    use std::time::Duration;

    fn input(host: &'static str) -> MatchInput<'static> {
        MatchInput {
            client_ip: None,
            client_name: None,
            host,
            qtype: QueryType::A,
            is_answer: false,
        }
    }

    #[test]
    fn test_immutable_list() {
        let list = ImmutableList::new(FilterId::custom(), 7, "||ads.example^\n");
        assert_eq!(list.rule_count(), 1);

        let m = list.matches(&input("ads.example")).unwrap();
        assert_eq!(m.network_rules[0].list, 7);
        assert!(list.matches(&input("clean.example")).is_none());
    }

    #[test]
    fn test_refreshable_starts_empty_then_reloads() {
        let dir = env::temp_dir().join(format!("sift-rulelist-{}", std::process::id()));
        let fetcher = RuleFetcher::new(dir.clone(), 4096, Duration::from_secs(0)).unwrap();
        let src = dir.join("rules.txt");
        fs::write(&src, "||ads.example^\n").unwrap();

        let id = FilterId::new("reloadable").unwrap();
        let list = RefreshableList::new(id, 1, Source::File(src.clone()), 16);
        assert!(list.matches(&input("ads.example")).is_none());

        assert_eq!(list.refresh(&fetcher, false).unwrap(), 1);
        assert!(list.matches(&input("ads.example")).is_some());

        // New rules replace, not extend.
        fs::write(&src, "||other.example^\n").unwrap();
        list.refresh(&fetcher, false).unwrap();
        assert!(list.matches(&input("ads.example")).is_none());
        assert!(list.matches(&input("other.example")).is_some());

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_failed_refresh_keeps_engine() {
        let dir = env::temp_dir().join(format!("sift-rulelist-keep-{}", std::process::id()));
        let fetcher = RuleFetcher::new(dir.clone(), 4096, Duration::from_secs(0)).unwrap();
        let src = dir.join("rules.txt");
        fs::write(&src, "||ads.example^\n").unwrap();

        let id = FilterId::new("sticky").unwrap();
        let list = RefreshableList::new(id, 1, Source::File(src.clone()), 16);
        list.refresh(&fetcher, false).unwrap();

        fs::remove_file(&src).unwrap();
        // Cache file exists but staleness is zero and accept_stale is off.
        assert!(list.refresh(&fetcher, false).is_err());
        assert!(list.matches(&input("ads.example")).is_some());

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_cached_negative_result() {
        let dir = env::temp_dir().join(format!("sift-rulelist-neg-{}", std::process::id()));
        let fetcher = RuleFetcher::new(dir.clone(), 4096, Duration::from_secs(0)).unwrap();
        let src = dir.join("rules.txt");
        fs::write(&src, "||ads.example^\n").unwrap();

        let id = FilterId::new("negcache").unwrap();
        let list = RefreshableList::new(id, 1, Source::File(src), 16);
        list.refresh(&fetcher, false).unwrap();

        assert!(list.matches(&input("clean.example")).is_none());
        // Second lookup is served from cache; same observable answer.
        assert!(list.matches(&input("clean.example")).is_none());

        fs::remove_dir_all(dir).unwrap();
    }
}
