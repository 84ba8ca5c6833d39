//! Composite Filter Orchestrator
//!
//! The single entry point for filtering. One composite owns every
//! configured filtering layer and merges their answers under a fixed
//! priority order:
//!
//! 1. `$dnsrewrite` rules from the custom list
//! 2. Custom, shared rule-list, and blocked-service rules, accumulated
//!    and resolved together (exceptions beat blocks)
//! 3. Safe browsing, adult blocking, general and YouTube safe search,
//!    and newly-registered-domain prefixes, in that order
//!
//! An allow from the custom list returns immediately; an allow from a
//! shared list is deferred until the categorical stages have had their
//! say, and returned only when none of them object.
//!
//! Responses are filtered record by record: CNAME targets, A/AAAA
//! addresses, and HTTPS address hints are each matched as if they were
//! queried directly, so a blocked host cannot hide behind an alias chain.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use crate::dns::builder::ResponseBuilder;
use crate::dns::cloner::PacketCloner;
use crate::dns::protocol::{normalize_host, DnsPacket, DnsRecord, QueryType, SvcParam};
use crate::filter::category::{HashPrefixFilter, RequestFilter, SafeSearchFilter};
use crate::filter::decision::{bound_rule_text, FilterResult};
use crate::filter::id::{BlockedServiceId, FilterId};
use crate::filter::refresh::Source;
use crate::filter::rulelist::{ImmutableList, RefreshableList};
use crate::filter::rules::{DnsMatch, ListIndex, MatchInput, NetworkRule};
use crate::filter::rewrite;

/// One query's filtering context.
pub struct FilterRequest<'a> {
    pub msg: &'a DnsPacket,
    /// Normalized question host.
    pub host: String,
    pub qtype: QueryType,
    pub client_ip: Option<IpAddr>,
    pub client_name: Option<&'a str>,
}

impl<'a> FilterRequest<'a> {
    /// Builds the context from a request message; `None` if the message
    /// has no question.
    pub fn new(
        msg: &'a DnsPacket,
        client_ip: Option<IpAddr>,
        client_name: Option<&'a str>,
    ) -> Option<FilterRequest<'a>> {
        let question = msg.question()?;
        Some(FilterRequest {
            msg,
            host: normalize_host(&question.domain),
            qtype: question.qtype,
            client_ip,
            client_name,
        })
    }

    fn match_input<'h>(&'h self, host: &'h str, qtype: QueryType, is_answer: bool) -> MatchInput<'h> {
        MatchInput {
            client_ip: self.client_ip,
            client_name: self.client_name,
            host,
            qtype,
            is_answer,
        }
    }
}

/// Maps an engine-local list index back to the public identifiers results
/// are attributed with.
struct Origin {
    id: FilterId,
    service: Option<BlockedServiceId>,
}

/// The composite filter. Layers are added at construction time; matching
/// is then safe from any thread.
pub struct CompositeFilter {
    builder: Arc<ResponseBuilder>,
    cloner: Arc<PacketCloner>,

    custom: Option<ImmutableList>,
    rule_lists: Vec<Arc<RefreshableList>>,
    service_lists: Vec<ImmutableList>,

    safe_browsing: Option<HashPrefixFilter>,
    adult_blocking: Option<HashPrefixFilter>,
    general_safe_search: Option<SafeSearchFilter>,
    youtube_safe_search: Option<SafeSearchFilter>,
    newly_registered: Option<HashPrefixFilter>,

    origins: HashMap<ListIndex, Origin>,
    next_index: ListIndex,
}

impl CompositeFilter {
    pub fn new(builder: Arc<ResponseBuilder>, cloner: Arc<PacketCloner>) -> CompositeFilter {
        CompositeFilter {
            builder,
            cloner,
            custom: None,
            rule_lists: Vec::new(),
            service_lists: Vec::new(),
            safe_browsing: None,
            adult_blocking: None,
            general_safe_search: None,
            youtube_safe_search: None,
            newly_registered: None,
            origins: HashMap::new(),
            next_index: 0,
        }
    }

    pub fn builder(&self) -> &ResponseBuilder {
        &self.builder
    }

    pub fn cloner(&self) -> &PacketCloner {
        &self.cloner
    }

    fn assign_index(&mut self, id: FilterId, service: Option<BlockedServiceId>) -> ListIndex {
        let index = self.next_index;
        self.next_index += 1;
        self.origins.insert(index, Origin { id, service });
        index
    }

    /// Installs the per-profile custom rules. Custom results are never
    /// cached, since they differ per client.
    pub fn set_custom(&mut self, text: &str) {
        let index = self.assign_index(FilterId::custom(), None);
        self.custom = Some(ImmutableList::new(FilterId::custom(), index, text));
    }

    /// Registers a refreshable shared rule list and returns a handle for
    /// the refresh scheduler.
    pub fn add_rule_list(
        &mut self,
        id: FilterId,
        source: Source,
        cache_capacity: usize,
    ) -> Arc<RefreshableList> {
        let index = self.assign_index(id.clone(), None);
        let list = Arc::new(RefreshableList::new(id, index, source, cache_capacity));
        self.rule_lists.push(list.clone());
        list
    }

    /// Registers a blocked-service rule set. Results from it carry the
    /// service identifier in place of rule text.
    pub fn add_service_list(&mut self, service: BlockedServiceId, text: &str) {
        let index = self.assign_index(FilterId::blocked_service(), Some(service));
        self.service_lists
            .push(ImmutableList::new(FilterId::blocked_service(), index, text));
    }

    pub fn set_safe_browsing(&mut self, filter: HashPrefixFilter) {
        self.safe_browsing = Some(filter);
    }

    pub fn set_adult_blocking(&mut self, filter: HashPrefixFilter) {
        self.adult_blocking = Some(filter);
    }

    pub fn set_general_safe_search(&mut self, filter: SafeSearchFilter) {
        self.general_safe_search = Some(filter);
    }

    pub fn set_youtube_safe_search(&mut self, filter: SafeSearchFilter) {
        self.youtube_safe_search = Some(filter);
    }

    pub fn set_newly_registered(&mut self, filter: HashPrefixFilter) {
        self.newly_registered = Some(filter);
    }

    fn origin(&self, index: ListIndex) -> &Origin {
        self.origins
            .get(&index)
            .unwrap_or_else(|| panic!("unknown rule list index {}", index))
    }

    /// Filters one request. `None` means the request passes untouched.
    pub fn filter_request(&self, req: &FilterRequest<'_>) -> Option<FilterResult> {
        let input = req.match_input(&req.host, req.qtype, false);

        let custom_match = self.custom.as_ref().and_then(|c| c.matches(&input));

        // Custom $dnsrewrite rules outrank everything else. A resolution
        // of None (the self-CNAME opt-out, or no rewrite rules at all)
        // falls through to ordinary matching.
        if let Some(m) = &custom_match {
            if m.network_rules.iter().any(|r| r.rewrite.is_some()) {
                if let Some(result) = rewrite::resolve(
                    &self.builder,
                    &self.cloner,
                    req.msg,
                    &FilterId::custom(),
                    &m.network_rules,
                ) {
                    return Some(result);
                }
            }
        }

        let mut acc = custom_match.unwrap_or_default();
        for list in &self.rule_lists {
            if let Some(m) = list.matches(&input) {
                acc.absorb((*m).clone());
            }
        }
        for list in &self.service_lists {
            if let Some(m) = list.matches(&input) {
                acc.absorb(m);
            }
        }

        let mut deferred = None;
        if let Some(result) = self.resolve_match(req.qtype, &acc) {
            if result.is_terminal() || *result.list() == FilterId::custom() {
                return Some(result);
            }
            deferred = Some(result);
        }

        let mut stages: Vec<&dyn RequestFilter> = Vec::with_capacity(5);
        if let Some(f) = &self.safe_browsing {
            stages.push(f);
        }
        if let Some(f) = &self.adult_blocking {
            stages.push(f);
        }
        if let Some(f) = &self.general_safe_search {
            stages.push(f);
        }
        if let Some(f) = &self.youtube_safe_search {
            stages.push(f);
        }
        if let Some(f) = &self.newly_registered {
            stages.push(f);
        }
        for stage in stages {
            if let Some(result) = stage.filter_request(req) {
                return Some(result);
            }
        }

        deferred
    }

    /// Filters a response record by record. The first record any layer
    /// objects to decides the whole response; the result is attributed to
    /// that record's data, not the original question.
    pub fn filter_response(
        &self,
        req: &FilterRequest<'_>,
        response: &DnsPacket,
    ) -> Option<FilterResult> {
        for record in &response.answers {
            for (host, qtype) in answer_facets(record) {
                let host = normalize_host(&host);
                let input = req.match_input(&host, qtype, true);

                let mut acc = self
                    .custom
                    .as_ref()
                    .and_then(|c| c.matches(&input))
                    .unwrap_or_default();
                for list in &self.rule_lists {
                    if let Some(m) = list.matches(&input) {
                        acc.absorb((*m).clone());
                    }
                }
                for list in &self.service_lists {
                    if let Some(m) = list.matches(&input) {
                        acc.absorb(m);
                    }
                }

                if let Some(result) = self.resolve_match(qtype, &acc) {
                    return Some(result);
                }
            }
        }
        None
    }

    /// Resolves accumulated rules into one result. Exceptions beat
    /// blocks; network rules beat hosts-style rules; among hosts-style
    /// rules the query's address family is preferred.
    fn resolve_match(&self, qtype: QueryType, m: &DnsMatch) -> Option<FilterResult> {
        let mut block: Option<&Arc<NetworkRule>> = None;
        for rule in &m.network_rules {
            if rule.exception {
                let origin = self.origin(rule.list);
                return Some(FilterResult::Allowed {
                    list: origin.id.clone(),
                    rule: bound_rule_text(&rule.text),
                });
            }
            // Rewrite rules are resolved in their own stage; here only
            // plain blocking rules count.
            if rule.is_basic() && block.is_none() {
                block = Some(rule);
            }
        }

        if let Some(rule) = block {
            let origin = self.origin(rule.list);
            let rule_text = match &origin.service {
                Some(service) => service.to_string(),
                None => bound_rule_text(&rule.text),
            };
            return Some(FilterResult::Blocked {
                list: origin.id.clone(),
                rule: rule_text,
            });
        }

        let host_rule = match qtype {
            QueryType::A if !m.host_rules_v4.is_empty() => m.host_rules_v4.first(),
            QueryType::Aaaa if !m.host_rules_v6.is_empty() => m.host_rules_v6.first(),
            _ => m.host_rules_v4.first().or_else(|| m.host_rules_v6.first()),
        }?;

        let origin = self.origin(host_rule.list);
        Some(FilterResult::Blocked {
            list: origin.id.clone(),
            rule: bound_rule_text(&host_rule.text),
        })
    }
}

/// The (host, type) facets of an answer record that are subject to
/// filtering. HTTPS address hints are checked one address at a time, the
/// same way a plain A or AAAA answer would be.
fn answer_facets(record: &DnsRecord) -> Vec<(String, QueryType)> {
    match record {
        DnsRecord::A { addr, .. } => vec![(addr.to_string(), QueryType::A)],
        DnsRecord::Aaaa { addr, .. } => vec![(addr.to_string(), QueryType::Aaaa)],
        DnsRecord::Cname { host, .. } => vec![(host.clone(), QueryType::Cname)],
        DnsRecord::Https { params, .. } => {
            let mut facets = Vec::new();
            for param in params {
                match param {
                    SvcParam::Ipv4Hint { addrs } => {
                        facets.extend(addrs.iter().map(|a| (a.to_string(), QueryType::A)));
                    }
                    SvcParam::Ipv6Hint { addrs } => {
                        facets.extend(addrs.iter().map(|a| (a.to_string(), QueryType::Aaaa)));
                    }
                    _ => {}
                }
            }
            facets
        }
        _ => Vec::new(),
    }
}
