//! `$dnsrewrite` Resolution
//!
//! Collapses the rewrite rules that matched one query into a single
//! outcome, under a fixed precedence:
//!
//! 1. A CNAME rewrite beats everything. The request is redirected to the
//!    new name and re-resolved, except when the rule points the host at
//!    itself, which disables rewriting for that host entirely.
//! 2. Otherwise the first rule carrying a non-success response code wins
//!    outright, discarding any record values seen before or after it.
//! 3. Otherwise the typed values of every rewrite rule are accumulated,
//!    grouped by record type in encounter order, and synthesized into one
//!    NOERROR answer.
//!
//! A malformed value skips its own record with a debug log; it never fails
//! the whole resolution.

use std::net::IpAddr;
use std::sync::Arc;

use log::debug;

use crate::dns::builder::ResponseBuilder;
use crate::dns::cloner::PacketCloner;
use crate::dns::protocol::{DnsPacket, QueryType, ResultCode, SvcParam};
use crate::filter::decision::{bound_rule_text, FilterResult};
use crate::filter::id::FilterId;
use crate::filter::rules::{DnsRewrite, NetworkRule, RewriteValue};

/// Resolves the matched rewrite rules for `request` into a filtering
/// result, or `None` when no rewrite applies (including the self-CNAME
/// opt-out).
pub fn resolve(
    builder: &ResponseBuilder,
    cloner: &PacketCloner,
    request: &DnsPacket,
    list: &FilterId,
    rules: &[Arc<NetworkRule>],
) -> Option<FilterResult> {
    let question = request.question()?;
    let host = question.domain.as_str();

    let rewrites: Vec<(&Arc<NetworkRule>, &DnsRewrite)> = rules
        .iter()
        .filter_map(|r| r.rewrite.as_ref().map(|rw| (r, rw)))
        .collect();
    let (first, _) = *rewrites.first()?;

    // CNAME pass over every rule first.
    for (rule, rw) in &rewrites {
        if let Some(target) = &rw.new_cname {
            if target.eq_ignore_ascii_case(host.trim_end_matches('.')) {
                // Rewriting a host to itself turns rewriting off for it.
                return None;
            }
            let (mut msg, _) = cloner.clone_packet(request);
            msg.questions[0].domain = target.clone();
            return Some(FilterResult::ModifiedRequest {
                msg,
                list: list.clone(),
                rule: bound_rule_text(&rule.text),
            });
        }
    }

    // Single scan: a non-success rcode preempts value accumulation.
    let mut by_type: Vec<(QueryType, Vec<&RewriteValue>)> = Vec::new();
    for (rule, rw) in &rewrites {
        if rw.rcode != ResultCode::NOERROR {
            return Some(FilterResult::ModifiedResponse {
                msg: builder.response_rcode(request, rw.rcode),
                list: list.clone(),
                rule: bound_rule_text(&rule.text),
            });
        }
        if let (Some(rr_type), Some(value)) = (rw.rr_type, rw.value.as_ref()) {
            match by_type.iter_mut().find(|(t, _)| *t == rr_type) {
                Some((_, values)) => values.push(value),
                None => by_type.push((rr_type, vec![value])),
            }
        }
    }

    let mut response = builder.response_template(request);
    for (rr_type, values) in by_type {
        for value in values {
            match synthesize(builder, host, rr_type, value) {
                Some(record) => response.answers.push(record),
                None => debug!(
                    "dnsrewrite for {}: skipping malformed {:?} value {:?}",
                    host, rr_type, value
                ),
            }
        }
    }

    Some(FilterResult::ModifiedResponse {
        msg: response,
        list: list.clone(),
        rule: bound_rule_text(&first.text),
    })
}

fn synthesize(
    builder: &ResponseBuilder,
    domain: &str,
    rr_type: QueryType,
    value: &RewriteValue,
) -> Option<crate::dns::protocol::DnsRecord> {
    match (rr_type, value) {
        (QueryType::A, RewriteValue::Ip(IpAddr::V4(addr))) => {
            Some(builder.a_record(domain, *addr))
        }
        (QueryType::Aaaa, RewriteValue::Ip(IpAddr::V6(addr))) => {
            Some(builder.aaaa_record(domain, *addr))
        }
        (QueryType::Ptr, RewriteValue::Str(host)) => Some(builder.ptr_record(domain, host)),
        (QueryType::Txt, RewriteValue::Str(data)) => Some(builder.txt_record(domain, data)),
        (
            QueryType::Mx,
            RewriteValue::Mx {
                preference,
                exchange,
            },
        ) => Some(builder.mx_record(domain, *preference, exchange)),
        (
            QueryType::Srv,
            RewriteValue::Srv {
                priority,
                weight,
                port,
                target,
            },
        ) => Some(builder.srv_record(domain, *priority, *weight, *port, target)),
        (
            QueryType::Svcb,
            RewriteValue::Svcb {
                priority,
                target,
                params,
            },
        ) => Some(builder.svcb_record(domain, *priority, target, svc_params(params)?)),
        (
            QueryType::Https,
            RewriteValue::Svcb {
                priority,
                target,
                params,
            },
        ) => Some(builder.https_record(domain, *priority, target, svc_params(params)?)),
        _ => None,
    }
}

/// Converts textual `key=value` service parameters to their typed form.
/// Any unparseable parameter makes the whole record malformed.
fn svc_params(params: &[(String, String)]) -> Option<Vec<SvcParam>> {
    params
        .iter()
        .map(|(key, value)| match key.as_str() {
            "alpn" => Some(SvcParam::Alpn {
                protocols: value.split(',').map(str::to_string).collect(),
            }),
            "port" => Some(SvcParam::Port {
                port: value.parse().ok()?,
            }),
            "ipv4hint" => Some(SvcParam::Ipv4Hint {
                addrs: value
                    .split(',')
                    .map(|s| s.parse().ok())
                    .collect::<Option<Vec<_>>>()?,
            }),
            "ipv6hint" => Some(SvcParam::Ipv6Hint {
                addrs: value
                    .split(',')
                    .map(|s| s.parse().ok())
                    .collect::<Option<Vec<_>>>()?,
            }),
            "dohpath" => Some(SvcParam::DohPath {
                path: value.clone(),
            }),
            _ => None,
        })
        .collect()
}
