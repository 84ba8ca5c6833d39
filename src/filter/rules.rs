//! Compiled Rule-Matching Engine
//!
//! Compiles filter-list text into an immutable matching engine. The syntax
//! is the DNS-relevant subset of adblock filter rules plus `/etc/hosts`
//! style lines:
//!
//! * `||host^` blocks the host and every subdomain
//! * `|host^` matches the host exactly
//! * plain patterns match as substrings
//! * `@@` prefixes mark exception (allow) rules
//! * `$dnsrewrite=...` replaces the answer instead of blocking
//! * `$badfilter` disables the rule whose text it names
//! * `$client=name` restricts a rule to one client
//! * `0.0.0.0 host` hosts lines block via address-family-specific rules
//!
//! `$badfilter` precedence is resolved here, at compile time: a disabled
//! rule never reaches the matching loop, so downstream layers can treat the
//! engine's output as already exception-resolved.

use std::net::IpAddr;
use std::sync::Arc;

use log::debug;

use crate::dns::protocol::{normalize_host, QueryType, ResultCode};

/// Engine-local numeric identifier of the rule list a rule came from.
/// The composite filter maps these back to public filter identifiers.
pub type ListIndex = u32;

/// One query's worth of matching input.
#[derive(Debug, Clone, Copy)]
pub struct MatchInput<'a> {
    pub client_ip: Option<IpAddr>,
    pub client_name: Option<&'a str>,
    /// Normalized (lowercased, non-FQDN) hostname.
    pub host: &'a str,
    pub qtype: QueryType,
    pub is_answer: bool,
}

/// How a network rule's pattern applies to a hostname.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    /// `||host^`: the host itself or any subdomain.
    DomainSuffix(String),
    /// `|host^`: the host exactly.
    Exact(String),
    /// Bare pattern: substring match.
    Contains(String),
}

impl Pattern {
    pub fn matches(&self, host: &str) -> bool {
        match self {
            Pattern::DomainSuffix(d) => {
                host == d
                    || (host.len() > d.len()
                        && host.ends_with(d.as_str())
                        && host.as_bytes()[host.len() - d.len() - 1] == b'.')
            }
            Pattern::Exact(d) => host == d,
            Pattern::Contains(s) => host.contains(s.as_str()),
        }
    }
}

/// A dynamically-typed value carried by a `$dnsrewrite` rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteValue {
    Ip(IpAddr),
    /// PTR and TXT values.
    Str(String),
    Mx {
        preference: u16,
        exchange: String,
    },
    Srv {
        priority: u16,
        weight: u16,
        port: u16,
        target: String,
    },
    /// SVCB and HTTPS values; params are raw `key=value` pairs.
    Svcb {
        priority: u16,
        target: String,
        params: Vec<(String, String)>,
    },
}

/// Parsed form of a `$dnsrewrite` modifier. Exactly one of `new_cname`, a
/// non-success `rcode`, or a typed value drives the final resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsRewrite {
    pub rcode: ResultCode,
    pub new_cname: Option<String>,
    pub rr_type: Option<QueryType>,
    pub value: Option<RewriteValue>,
}

/// A compiled adblock-style rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkRule {
    /// Original rule text, for logging and result attribution.
    pub text: String,
    pub list: ListIndex,
    /// `@@` exception rule.
    pub exception: bool,
    pub pattern: Pattern,
    /// `$client=` restriction, matched against client name or IP.
    pub client: Option<String>,
    pub rewrite: Option<DnsRewrite>,
}

impl NetworkRule {
    /// A basic rule blocks or allows outright, with no rewrite payload.
    pub fn is_basic(&self) -> bool {
        self.rewrite.is_none()
    }
}

/// A compiled hosts-file rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRule {
    pub text: String,
    pub list: ListIndex,
    pub addr: IpAddr,
    pub host: String,
}

/// Everything that matched one query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DnsMatch {
    pub network_rules: Vec<Arc<NetworkRule>>,
    pub host_rules_v4: Vec<Arc<HostRule>>,
    pub host_rules_v6: Vec<Arc<HostRule>>,
}

impl DnsMatch {
    pub fn is_empty(&self) -> bool {
        self.network_rules.is_empty()
            && self.host_rules_v4.is_empty()
            && self.host_rules_v6.is_empty()
    }

    /// Appends another match's rules, preserving encounter order.
    pub fn absorb(&mut self, other: DnsMatch) {
        self.network_rules.extend(other.network_rules);
        self.host_rules_v4.extend(other.host_rules_v4);
        self.host_rules_v6.extend(other.host_rules_v6);
    }
}

enum ParsedLine {
    Network(NetworkRule),
    Hosts(Vec<HostRule>),
    /// Canonical text of the rule this `$badfilter` disables.
    BadFilter(String),
}

/// An immutable compiled matcher. Construction is the only mutation;
/// matching is lock-free and safe to call from many threads.
#[derive(Debug, Default)]
pub struct RuleEngine {
    network: Vec<Arc<NetworkRule>>,
    hosts: Vec<Arc<HostRule>>,
}

impl RuleEngine {
    /// Compiles rule text into an engine. Unparseable lines are skipped
    /// with a debug log; a single bad rule must not fail the whole list.
    pub fn compile(list: ListIndex, text: &str) -> RuleEngine {
        let mut network: Vec<NetworkRule> = Vec::new();
        let mut hosts: Vec<Arc<HostRule>> = Vec::new();
        let mut disabled: Vec<String> = Vec::new();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('!') || line.starts_with('#') {
                continue;
            }
            match parse_line(list, line) {
                Some(ParsedLine::Network(rule)) => network.push(rule),
                Some(ParsedLine::Hosts(rules)) => {
                    hosts.extend(rules.into_iter().map(Arc::new))
                }
                Some(ParsedLine::BadFilter(target)) => disabled.push(target),
                None => debug!("skipping unparseable rule {:?} in list {}", line, list),
            }
        }

        if !disabled.is_empty() {
            network.retain(|r| !disabled.iter().any(|d| d == &r.text));
        }

        RuleEngine {
            network: network.into_iter().map(Arc::new).collect(),
            hosts,
        }
    }

    pub fn rule_count(&self) -> usize {
        self.network.len() + self.hosts.len()
    }

    /// Matches a query against the compiled rules.
    ///
    /// Returns `None` when nothing matched at all; an explicit, stable
    /// "found nothing" value rather than an empty match object.
    pub fn matches(&self, input: &MatchInput<'_>) -> Option<DnsMatch> {
        let mut m = DnsMatch::default();

        for rule in &self.network {
            if let Some(client) = &rule.client {
                if !client_matches(client, input) {
                    continue;
                }
            }
            if rule.pattern.matches(input.host) {
                m.network_rules.push(rule.clone());
            }
        }

        for rule in &self.hosts {
            if rule.host == input.host {
                match rule.addr {
                    IpAddr::V4(_) => m.host_rules_v4.push(rule.clone()),
                    IpAddr::V6(_) => m.host_rules_v6.push(rule.clone()),
                }
            }
        }

        if m.is_empty() {
            None
        } else {
            Some(m)
        }
    }
}

fn client_matches(client: &str, input: &MatchInput<'_>) -> bool {
    if let Some(name) = input.client_name {
        if name.eq_ignore_ascii_case(client) {
            return true;
        }
    }
    if let Some(ip) = input.client_ip {
        if ip.to_string() == client {
            return true;
        }
    }
    false
}

fn parse_line(list: ListIndex, line: &str) -> Option<ParsedLine> {
    // Hosts line: an address followed by one or more hostnames.
    let mut tokens = line.split_whitespace();
    if let Some(first) = tokens.next() {
        if let Ok(addr) = first.parse::<IpAddr>() {
            let rules: Vec<HostRule> = tokens
                .map(|h| HostRule {
                    text: line.to_string(),
                    list,
                    addr,
                    host: normalize_host(h),
                })
                .collect();
            if rules.is_empty() {
                return None;
            }
            return Some(ParsedLine::Hosts(rules));
        }
    }

    let (exception, rest) = match line.strip_prefix("@@") {
        Some(r) => (true, r),
        None => (false, line),
    };

    let (pattern_part, modifier_part) = match rest.rfind('$') {
        Some(idx) => (&rest[..idx], Some(&rest[idx + 1..])),
        None => (rest, None),
    };

    let mut client = None;
    let mut rewrite = None;
    let mut kept_mods: Vec<&str> = Vec::new();
    let mut is_badfilter = false;

    if let Some(mods) = modifier_part {
        for m in mods.split(',') {
            if m == "badfilter" {
                is_badfilter = true;
            } else if let Some(v) = m.strip_prefix("dnsrewrite=") {
                rewrite = Some(parse_rewrite(v)?);
                kept_mods.push(m);
            } else if let Some(v) = m.strip_prefix("client=") {
                client = Some(v.to_string());
                kept_mods.push(m);
            } else {
                // Modifier this engine does not speak; drop the whole rule
                // rather than mismatch its intent.
                return None;
            }
        }
    }

    if is_badfilter {
        let mut target = String::new();
        if exception {
            target.push_str("@@");
        }
        target.push_str(pattern_part);
        if !kept_mods.is_empty() {
            target.push('$');
            target.push_str(&kept_mods.join(","));
        }
        return Some(ParsedLine::BadFilter(target));
    }

    let pattern = parse_pattern(pattern_part)?;
    Some(ParsedLine::Network(NetworkRule {
        text: line.to_string(),
        list,
        exception,
        pattern,
        client,
        rewrite,
    }))
}

fn parse_pattern(pattern: &str) -> Option<Pattern> {
    let trim_anchors = |s: &str| s.trim_end_matches(|c| c == '^' || c == '|').to_string();

    if let Some(rest) = pattern.strip_prefix("||") {
        let host = normalize_host(&trim_anchors(rest));
        if host.is_empty() {
            return None;
        }
        return Some(Pattern::DomainSuffix(host));
    }
    if let Some(rest) = pattern.strip_prefix('|') {
        let host = normalize_host(&trim_anchors(rest));
        if host.is_empty() {
            return None;
        }
        return Some(Pattern::Exact(host));
    }
    let needle = normalize_host(&trim_anchors(pattern));
    if needle.is_empty() {
        return None;
    }
    Some(Pattern::Contains(needle))
}

fn parse_rcode(name: &str) -> Option<ResultCode> {
    match name {
        "NOERROR" => Some(ResultCode::NOERROR),
        "FORMERR" => Some(ResultCode::FORMERR),
        "SERVFAIL" => Some(ResultCode::SERVFAIL),
        "NXDOMAIN" => Some(ResultCode::NXDOMAIN),
        "NOTIMP" => Some(ResultCode::NOTIMP),
        "REFUSED" => Some(ResultCode::REFUSED),
        _ => None,
    }
}

/// Parses the value of a `$dnsrewrite=` modifier.
///
/// Short form: an IP address, an rcode keyword, or a CNAME target.
/// Full form: `RCODE;RRTYPE;VALUE`.
fn parse_rewrite(value: &str) -> Option<DnsRewrite> {
    let parts: Vec<&str> = value.split(';').collect();

    match parts.as_slice() {
        [single] => {
            if let Ok(ip) = single.parse::<IpAddr>() {
                return Some(DnsRewrite {
                    rcode: ResultCode::NOERROR,
                    new_cname: None,
                    rr_type: Some(match ip {
                        IpAddr::V4(_) => QueryType::A,
                        IpAddr::V6(_) => QueryType::Aaaa,
                    }),
                    value: Some(RewriteValue::Ip(ip)),
                });
            }
            if let Some(rcode) = parse_rcode(single) {
                return Some(DnsRewrite {
                    rcode,
                    new_cname: None,
                    rr_type: None,
                    value: None,
                });
            }
            Some(DnsRewrite {
                rcode: ResultCode::NOERROR,
                new_cname: Some(normalize_host(single)),
                rr_type: None,
                value: None,
            })
        }
        [rcode_s, type_s, value_s] => {
            let rcode = parse_rcode(rcode_s)?;
            if rcode != ResultCode::NOERROR {
                return Some(DnsRewrite {
                    rcode,
                    new_cname: None,
                    rr_type: None,
                    value: None,
                });
            }

            let rr_type = QueryType::from_num(match *type_s {
                "A" => 1,
                "CNAME" => 5,
                "PTR" => 12,
                "MX" => 15,
                "TXT" => 16,
                "AAAA" => 28,
                "SRV" => 33,
                "SVCB" => 64,
                "HTTPS" => 65,
                _ => return None,
            });

            if rr_type == QueryType::Cname {
                return Some(DnsRewrite {
                    rcode,
                    new_cname: Some(normalize_host(value_s)),
                    rr_type: None,
                    value: None,
                });
            }

            let value = parse_rewrite_value(rr_type, value_s)?;
            Some(DnsRewrite {
                rcode,
                new_cname: None,
                rr_type: Some(rr_type),
                value: Some(value),
            })
        }
        _ => None,
    }
}

fn parse_rewrite_value(rr_type: QueryType, value: &str) -> Option<RewriteValue> {
    match rr_type {
        QueryType::A => {
            let ip: IpAddr = value.parse().ok()?;
            if !ip.is_ipv4() {
                return None;
            }
            Some(RewriteValue::Ip(ip))
        }
        QueryType::Aaaa => {
            let ip: IpAddr = value.parse().ok()?;
            if !ip.is_ipv6() {
                return None;
            }
            Some(RewriteValue::Ip(ip))
        }
        QueryType::Ptr | QueryType::Txt => Some(RewriteValue::Str(value.to_string())),
        QueryType::Mx => {
            let mut it = value.split_whitespace();
            let preference = it.next()?.parse().ok()?;
            let exchange = normalize_host(it.next()?);
            Some(RewriteValue::Mx {
                preference,
                exchange,
            })
        }
        QueryType::Srv => {
            let mut it = value.split_whitespace();
            let priority = it.next()?.parse().ok()?;
            let weight = it.next()?.parse().ok()?;
            let port = it.next()?.parse().ok()?;
            let target = normalize_host(it.next()?);
            Some(RewriteValue::Srv {
                priority,
                weight,
                port,
                target,
            })
        }
        QueryType::Svcb | QueryType::Https => {
            let mut it = value.split_whitespace();
            let priority = it.next()?.parse().ok()?;
            let target = normalize_host(it.next()?);
            let params = it
                .filter_map(|kv| {
                    let mut parts = kv.splitn(2, '=');
                    Some((parts.next()?.to_string(), parts.next()?.to_string()))
                })
                .collect();
            Some(RewriteValue::Svcb {
                priority,
                target,
                params,
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn input(host: &str) -> MatchInput<'static> {
        // Leaked only in tests to keep the borrow simple.
        let host: &'static str = Box::leak(host.to_string().into_boxed_str());
        MatchInput {
            client_ip: None,
            client_name: None,
            host,
            qtype: QueryType::A,
            is_answer: false,
        }
    }

    #[test]
    fn test_domain_suffix_matching() {
        let engine = RuleEngine::compile(1, "||blocked.example^\n");

        assert!(engine.matches(&input("blocked.example")).is_some());
        assert!(engine.matches(&input("sub.blocked.example")).is_some());
        assert!(engine.matches(&input("notblocked.example")).is_none());
        assert!(engine.matches(&input("blocked.example.org")).is_none());
    }

    #[test]
    fn test_exact_matching() {
        let engine = RuleEngine::compile(1, "|exact.example^\n");
        assert!(engine.matches(&input("exact.example")).is_some());
        assert!(engine.matches(&input("sub.exact.example")).is_none());
    }

    #[test]
    fn test_exception_rule() {
        let engine = RuleEngine::compile(1, "||ads.example^\n@@||good.ads.example^\n");
        let m = engine.matches(&input("good.ads.example")).unwrap();
        assert_eq!(m.network_rules.len(), 2);
        assert!(m.network_rules.iter().any(|r| r.exception));
    }

    #[test]
    fn test_badfilter_disables_rule() {
        let engine =
            RuleEngine::compile(1, "||gone.example^\n||gone.example^$badfilter\n||kept.example^\n");
        assert!(engine.matches(&input("gone.example")).is_none());
        assert!(engine.matches(&input("kept.example")).is_some());
    }

    #[test]
    fn test_hosts_line() {
        let engine = RuleEngine::compile(1, "0.0.0.0 pixel.example tracker.example\n:: v6.example\n");

        let m = engine.matches(&input("pixel.example")).unwrap();
        assert_eq!(m.host_rules_v4.len(), 1);
        assert_eq!(
            m.host_rules_v4[0].addr,
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        );

        let m6 = engine.matches(&input("v6.example")).unwrap();
        assert!(m6.host_rules_v4.is_empty());
        assert_eq!(m6.host_rules_v6.len(), 1);
    }

    #[test]
    fn test_client_restricted_rule() {
        let engine = RuleEngine::compile(1, "||kids.example^$client=tablet\n");

        assert!(engine.matches(&input("kids.example")).is_none());

        let matched = engine.matches(&MatchInput {
            client_name: Some("tablet"),
            ..input("kids.example")
        });
        assert!(matched.is_some());
    }

    #[test]
    fn test_rewrite_short_forms() {
        let ip = parse_rewrite("1.2.3.4").unwrap();
        assert_eq!(ip.rr_type, Some(QueryType::A));
        assert_eq!(
            ip.value,
            Some(RewriteValue::Ip("1.2.3.4".parse().unwrap()))
        );

        let rcode = parse_rewrite("REFUSED").unwrap();
        assert_eq!(rcode.rcode, ResultCode::REFUSED);
        assert!(rcode.value.is_none());

        let cname = parse_rewrite("Other.Example.").unwrap();
        assert_eq!(cname.new_cname.as_deref(), Some("other.example"));
    }

    #[test]
    fn test_rewrite_full_forms() {
        let a = parse_rewrite("NOERROR;A;1.2.3.4").unwrap();
        assert_eq!(a.rr_type, Some(QueryType::A));

        let mx = parse_rewrite("NOERROR;MX;32 mail.example").unwrap();
        assert_eq!(
            mx.value,
            Some(RewriteValue::Mx {
                preference: 32,
                exchange: "mail.example".to_string()
            })
        );

        let srv = parse_rewrite("NOERROR;SRV;30 60 8080 srv.example").unwrap();
        assert!(matches!(srv.value, Some(RewriteValue::Srv { port: 8080, .. })));

        let https = parse_rewrite("NOERROR;HTTPS;32 https.example alpn=h3").unwrap();
        match https.value {
            Some(RewriteValue::Svcb { priority, params, .. }) => {
                assert_eq!(priority, 32);
                assert_eq!(params[0], ("alpn".to_string(), "h3".to_string()));
            }
            other => panic!("unexpected value: {:?}", other),
        }

        let nx = parse_rewrite("NXDOMAIN;A;1.2.3.4").unwrap();
        assert_eq!(nx.rcode, ResultCode::NXDOMAIN);
        assert!(nx.value.is_none());

        assert!(parse_rewrite("NOERROR;A;not-an-ip").is_none());
        assert!(parse_rewrite("NOERROR;BOGUS;x").is_none());
    }

    #[test]
    fn test_unknown_modifier_drops_rule() {
        let engine = RuleEngine::compile(1, "||weird.example^$unknownmod\n");
        assert!(engine.matches(&input("weird.example")).is_none());
    }

    #[test]
    fn test_comments_and_blanks() {
        let engine = RuleEngine::compile(1, "! comment\n# also comment\n\n||real.example^\n");
        assert_eq!(engine.rule_count(), 1);
    }
}
