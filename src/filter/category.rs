//! Categorical Request Filters
//!
//! The non-rule-list layers of the pipeline: hash-prefix sets for safe
//! browsing, adult content, and newly registered domains, and safe-search
//! rewriting for search engines.
//!
//! Hash-prefix filters hold only the first 8 bytes of the SHA-256 of each
//! listed host, so the full host list never needs to be materialized at
//! match time. A query host matches if any of its domain suffixes hashes
//! into the set.

use std::collections::HashSet;
use std::io;
use std::net::IpAddr;
use std::sync::Arc;

use log::warn;
use sha2::{Digest, Sha256};

use crate::dns::builder::ResponseBuilder;
use crate::dns::cloner::PacketCloner;
use crate::dns::protocol::{normalize_host, QueryType, ResultCode};
use crate::filter::composite::FilterRequest;
use crate::filter::decision::{bound_rule_text, FilterResult};
use crate::filter::id::FilterId;
use crate::filter::rewrite;
use crate::filter::rulelist::ImmutableList;
use crate::filter::rules::{ListIndex, MatchInput};

/// Bytes of the SHA-256 digest kept per listed host.
const PREFIX_LEN: usize = 8;

type Prefix = [u8; PREFIX_LEN];

/// One categorical stage of the request pipeline.
pub trait RequestFilter: Send + Sync {
    fn filter_request(&self, req: &FilterRequest<'_>) -> Option<FilterResult>;
}

/// Resolves a hostname to addresses on behalf of the safe-search filter.
pub trait HostResolver: Send + Sync {
    fn resolve(&self, host: &str, qtype: QueryType) -> io::Result<Vec<IpAddr>>;
}

/// What a hash-prefix match does to the request.
#[derive(Debug, Clone)]
pub enum PrefixAction {
    /// Redirect the request to a fixed replacement host and re-resolve.
    /// Used by safe browsing and adult blocking.
    RewriteTo(String),
    /// Block outright. Used for newly registered domains.
    Block,
}

/// A hash-prefix host-set filter.
pub struct HashPrefixFilter {
    id: FilterId,
    action: PrefixAction,
    cloner: Arc<PacketCloner>,
    prefixes: HashSet<Prefix>,
}

impl HashPrefixFilter {
    pub fn new(id: FilterId, action: PrefixAction, cloner: Arc<PacketCloner>) -> HashPrefixFilter {
        HashPrefixFilter {
            id,
            action,
            cloner,
            prefixes: HashSet::new(),
        }
    }

    pub fn from_hosts<I, S>(
        id: FilterId,
        action: PrefixAction,
        cloner: Arc<PacketCloner>,
        hosts: I,
    ) -> HashPrefixFilter
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut filter = Self::new(id, action, cloner);
        for host in hosts {
            filter.add_host(host.as_ref());
        }
        filter
    }

    pub fn add_host(&mut self, host: &str) {
        self.prefixes.insert(hash_prefix(&normalize_host(host)));
    }

    pub fn host_count(&self) -> usize {
        self.prefixes.len()
    }

    /// The longest-to-shortest suffix of `host` whose prefix is listed.
    fn matching_suffix<'h>(&self, host: &'h str) -> Option<&'h str> {
        suffixes(host).find(|s| self.prefixes.contains(&hash_prefix(s)))
    }
}

impl RequestFilter for HashPrefixFilter {
    fn filter_request(&self, req: &FilterRequest<'_>) -> Option<FilterResult> {
        let suffix = self.matching_suffix(&req.host)?;
        let rule = bound_rule_text(suffix);

        match &self.action {
            PrefixAction::Block => Some(FilterResult::Blocked {
                list: self.id.clone(),
                rule,
            }),
            PrefixAction::RewriteTo(replacement) => {
                let (mut msg, _) = self.cloner.clone_packet(req.msg);
                if let Some(q) = msg.questions.first_mut() {
                    q.domain = replacement.clone();
                }
                Some(FilterResult::ModifiedRequest {
                    msg,
                    list: self.id.clone(),
                    rule,
                })
            }
        }
    }
}

fn hash_prefix(host: &str) -> Prefix {
    let digest = Sha256::digest(host.as_bytes());
    let mut prefix = [0u8; PREFIX_LEN];
    prefix.copy_from_slice(&digest[..PREFIX_LEN]);
    prefix
}

/// Yields the host itself, then each proper suffix that still has at
/// least two labels.
fn suffixes(host: &str) -> impl Iterator<Item = &str> {
    std::iter::once(host).chain(
        host.match_indices('.')
            .map(move |(i, _)| &host[i + 1..])
            .filter(|s| s.contains('.')),
    )
}

/// Safe-search rewriting for one search provider.
///
/// Built from an immutable `$dnsrewrite` rule list mapping search hosts to
/// their enforced-safe equivalents. When a resolver is available, CNAME
/// redirects are followed eagerly and answered in place; without one the
/// redirect is handed back for re-resolution.
pub struct SafeSearchFilter {
    id: FilterId,
    rules: ImmutableList,
    builder: Arc<ResponseBuilder>,
    cloner: Arc<PacketCloner>,
    resolver: Option<Arc<dyn HostResolver>>,
}

impl SafeSearchFilter {
    pub fn new(
        id: FilterId,
        index: ListIndex,
        rules_text: &str,
        builder: Arc<ResponseBuilder>,
        cloner: Arc<PacketCloner>,
        resolver: Option<Arc<dyn HostResolver>>,
    ) -> SafeSearchFilter {
        let rules = ImmutableList::new(id.clone(), index, rules_text);
        SafeSearchFilter {
            id,
            rules,
            builder,
            cloner,
            resolver,
        }
    }

    pub fn rule_count(&self) -> usize {
        self.rules.rule_count()
    }

    /// Follows a CNAME redirect by resolving the safe host and answering
    /// with the chain directly. Resolver failures degrade to SERVFAIL so a
    /// flaky resolver can never leak an unfiltered search host.
    fn answer_redirect(
        &self,
        req: &FilterRequest<'_>,
        target: &str,
        rule: String,
    ) -> FilterResult {
        let resolver = match &self.resolver {
            Some(r) => r,
            None => unreachable!("answer_redirect called without a resolver"),
        };

        let ips = match resolver.resolve(target, req.qtype) {
            Ok(ips) => ips,
            Err(err) => {
                warn!("safe search {}: resolving {}: {}", self.id, target, err);
                return FilterResult::ModifiedResponse {
                    msg: self.builder.response_rcode(req.msg, ResultCode::SERVFAIL),
                    list: self.id.clone(),
                    rule,
                };
            }
        };

        let mut msg = self.builder.response_template(req.msg);
        msg.answers.push(self.builder.cname_record(&req.host, target));
        for ip in ips {
            msg.answers.push(match ip {
                IpAddr::V4(addr) => self.builder.a_record(target, addr),
                IpAddr::V6(addr) => self.builder.aaaa_record(target, addr),
            });
        }
        FilterResult::ModifiedResponse {
            msg,
            list: self.id.clone(),
            rule,
        }
    }
}

impl RequestFilter for SafeSearchFilter {
    fn filter_request(&self, req: &FilterRequest<'_>) -> Option<FilterResult> {
        let matched = self.rules.matches(&MatchInput {
            client_ip: req.client_ip,
            client_name: req.client_name,
            host: &req.host,
            qtype: req.qtype,
            is_answer: false,
        })?;

        let result = rewrite::resolve(
            &self.builder,
            &self.cloner,
            req.msg,
            &self.id,
            &matched.network_rules,
        )?;

        // Result attribution carries the search host, not the rule text.
        let rule = bound_rule_text(&req.host);
        match result {
            FilterResult::ModifiedRequest { msg, list, .. } => {
                let redirect = msg.questions[0].domain.clone();
                if self.resolver.is_some()
                    && matches!(req.qtype, QueryType::A | QueryType::Aaaa)
                {
                    self.cloner.dispose(msg);
                    return Some(self.answer_redirect(req, &redirect, rule));
                }
                Some(FilterResult::ModifiedRequest { msg, list, rule })
            }
            FilterResult::ModifiedResponse { msg, list, .. } => {
                Some(FilterResult::ModifiedResponse { msg, list, rule })
            }
            other => Some(other),
        }
    }
}
