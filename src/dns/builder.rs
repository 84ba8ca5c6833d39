//! Synthetic DNS Response Construction
//!
//! Builds the well-formed response messages the filtering pipeline serves in
//! place of upstream answers: blocked responses in the configured blocking
//! mode, NODATA/NXDOMAIN/REFUSED with a negative-caching SOA, typed answers
//! synthesized from `$dnsrewrite` rules, and encrypted-DNS discovery
//! templates.
//!
//! # Features
//!
//! * **Blocking Modes** - Custom IP, null IP, NXDOMAIN, REFUSED
//! * **Negative Caching** - SOA authority record on every blocked response
//! * **Extended DNS Errors** - optional EDE (and structured error text) on
//!   responses to EDNS-aware clients
//! * **Typed Constructors** - A/AAAA/CNAME/TXT/PTR/MX/SRV/SVCB/HTTPS records
//!   stamped with the configured filtered-response TTL

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use derive_more::{Display, Error};
use serde_derive::{Deserialize, Serialize};

use crate::dns::protocol::{
    DnsHeader, DnsPacket, DnsRecord, EdnsOption, QueryType, ResultCode, SvcParam, EDE_FILTERED,
};

/// Maximum length of a single TXT character-string on the wire.
const TXT_STRING_LIMIT: usize = 255;

/// Negative-caching SOA timers: refresh, retry, expire, minimum.
const SOA_TIMERS: (u32, u32, u32, u32) = (1800, 900, 604_800, 86_400);

/// Mailbox literal stamped into synthesized SOA records.
const SOA_MAILBOX: &str = "hostmaster.invalid.";

#[derive(Debug, Display, Error)]
pub enum BuildError {
    #[display(fmt = "query type {} does not match the requested constructor", qtype)]
    QueryTypeMismatch {
        #[error(not(source))]
        qtype: u16,
    },
    #[display(fmt = "txt string of {} bytes exceeds the 255 byte limit", len)]
    TxtStringTooLong {
        #[error(not(source))]
        len: usize,
    },
    #[display(fmt = "address {} does not match the query address family", addr)]
    AddressFamilyMismatch {
        #[error(not(source))]
        addr: IpAddr,
    },
}

type Result<T> = std::result::Result<T, BuildError>;

/// How blocked requests are answered.
///
/// A closed set: an unhandled variant in the builder is a code defect, so
/// the dispatch below is an exhaustive match with no default arm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum BlockingMode {
    /// Answer A/AAAA with the configured addresses; NODATA for anything
    /// else or when the matching family has no addresses.
    CustomIp {
        ipv4: Vec<Ipv4Addr>,
        ipv6: Vec<Ipv6Addr>,
    },
    /// Answer A/AAAA with the unspecified address; NODATA otherwise.
    NullIp,
    /// Answer NXDOMAIN.
    NxDomain,
    /// Answer REFUSED.
    Refused,
}

/// Transport protocols advertised by discovery templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DnsProtocol {
    Plain,
    Tls,
    Https,
    Quic,
}

/// Response builder configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuilderConfig {
    /// TTL stamped on every synthesized answer and SOA record.
    pub filtered_ttl: u32,
    /// Attach an Extended DNS Error option to blocked responses when the
    /// request signals EDNS support.
    pub attach_ede: bool,
    /// Structured error text carried in the EDE option, if any.
    pub sde_text: Option<String>,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            filtered_ttl: 10,
            attach_ede: false,
            sde_text: None,
        }
    }
}

/// Builds synthetic responses for the filtering pipeline.
#[derive(Debug, Clone, Default)]
pub struct ResponseBuilder {
    config: BuilderConfig,
}

impl ResponseBuilder {
    pub fn new(config: BuilderConfig) -> Self {
        Self { config }
    }

    pub fn filtered_ttl(&self) -> u32 {
        self.config.filtered_ttl
    }

    /// Response skeleton echoing the request's id, opcode, and question.
    pub fn response_template(&self, request: &DnsPacket) -> DnsPacket {
        let mut response = DnsPacket::new();
        response.header = DnsHeader {
            id: request.header.id,
            response: true,
            opcode: request.header.opcode,
            recursion_desired: request.header.recursion_desired,
            recursion_available: true,
            authoritative_answer: true,
            ..DnsHeader::default()
        };
        response.questions = request.questions.clone();
        response
    }

    /// Builds the blocked response for `request` in the given mode.
    ///
    /// Every blocked response carries a negative-caching SOA in the
    /// authority section; EDE metadata is attached per configuration.
    pub fn blocked_response(&self, request: &DnsPacket, mode: &BlockingMode) -> DnsPacket {
        let qtype = request.question().map(|q| q.qtype);

        let mut response = match *mode {
            BlockingMode::CustomIp { ref ipv4, ref ipv6 } => match qtype {
                Some(QueryType::A) if !ipv4.is_empty() => {
                    let ips: Vec<IpAddr> = ipv4.iter().map(|a| IpAddr::V4(*a)).collect();
                    self.ip_response(request, &ips)
                }
                Some(QueryType::Aaaa) if !ipv6.is_empty() => {
                    let ips: Vec<IpAddr> = ipv6.iter().map(|a| IpAddr::V6(*a)).collect();
                    self.ip_response(request, &ips)
                }
                _ => self.response_rcode(request, ResultCode::NOERROR),
            },
            BlockingMode::NullIp => match qtype {
                Some(QueryType::A) => {
                    self.ip_response(request, &[IpAddr::V4(Ipv4Addr::UNSPECIFIED)])
                }
                Some(QueryType::Aaaa) => {
                    self.ip_response(request, &[IpAddr::V6(Ipv6Addr::UNSPECIFIED)])
                }
                _ => self.response_rcode(request, ResultCode::NOERROR),
            },
            BlockingMode::NxDomain => self.response_rcode(request, ResultCode::NXDOMAIN),
            BlockingMode::Refused => self.response_rcode(request, ResultCode::REFUSED),
        };

        if self.config.attach_ede {
            self.attach_ede(request, &mut response);
        }
        response
    }

    /// IP answers plus the negative-caching SOA; used by the blocking modes,
    /// which have already validated the address family.
    fn ip_response(&self, request: &DnsPacket, ips: &[IpAddr]) -> DnsPacket {
        let mut response = self.response_template(request);
        let domain = request
            .question()
            .map(|q| q.domain.clone())
            .unwrap_or_default();

        for ip in ips {
            response.answers.push(match *ip {
                IpAddr::V4(addr) => self.a_record(&domain, addr),
                IpAddr::V6(addr) => self.aaaa_record(&domain, addr),
            });
        }
        response.authorities.push(self.soa_record(&domain));
        response
    }

    /// Builds an A or AAAA response; the query type must match the address
    /// family of every entry.
    pub fn response_with_ips(&self, request: &DnsPacket, ips: &[IpAddr]) -> Result<DnsPacket> {
        let question = match request.question() {
            Some(q) => q,
            None => return Ok(self.response_template(request)),
        };

        match question.qtype {
            QueryType::A => {
                for ip in ips {
                    if !ip.is_ipv4() {
                        return Err(BuildError::AddressFamilyMismatch { addr: *ip });
                    }
                }
            }
            QueryType::Aaaa => {
                for ip in ips {
                    if !ip.is_ipv6() {
                        return Err(BuildError::AddressFamilyMismatch { addr: *ip });
                    }
                }
            }
            other => {
                return Err(BuildError::QueryTypeMismatch {
                    qtype: other.to_num(),
                })
            }
        }

        let mut response = self.response_template(request);
        let domain = question.domain.clone();
        for ip in ips {
            response.answers.push(match *ip {
                IpAddr::V4(addr) => self.a_record(&domain, addr),
                IpAddr::V6(addr) => self.aaaa_record(&domain, addr),
            });
        }
        Ok(response)
    }

    /// Builds a TXT response; each string must fit one character-string.
    pub fn response_with_txt(&self, request: &DnsPacket, strings: &[String]) -> Result<DnsPacket> {
        let question = match request.question() {
            Some(q) => q,
            None => return Ok(self.response_template(request)),
        };
        if question.qtype != QueryType::Txt {
            return Err(BuildError::QueryTypeMismatch {
                qtype: question.qtype.to_num(),
            });
        }
        for s in strings {
            if s.len() > TXT_STRING_LIMIT {
                return Err(BuildError::TxtStringTooLong { len: s.len() });
            }
        }

        let mut response = self.response_template(request);
        response.answers.push(DnsRecord::Txt {
            domain: question.domain.clone(),
            strings: strings.to_vec(),
            ttl: self.config.filtered_ttl,
        });
        Ok(response)
    }

    /// Generic authoritative response with the given code and an SOA-bearing
    /// authority section. Always sets "recursion available".
    pub fn response_rcode(&self, request: &DnsPacket, rcode: ResultCode) -> DnsPacket {
        let mut response = self.response_template(request);
        response.header.rescode = rcode;
        let zone = request
            .question()
            .map(|q| q.domain.clone())
            .unwrap_or_default();
        response.authorities.push(self.soa_record(&zone));
        response
    }

    /// Attaches an Extended DNS Error to the response, but only when the
    /// request itself signals EDNS support and no EDE is present yet.
    fn attach_ede(&self, request: &DnsPacket, response: &mut DnsPacket) {
        let udp_size = match request.edns_opt() {
            Some(DnsRecord::Opt { udp_size, .. }) => *udp_size,
            _ => return,
        };

        let ede = EdnsOption::Ede {
            info_code: EDE_FILTERED,
            extra_text: self.config.sde_text.clone().unwrap_or_default(),
        };

        for rec in response.resources.iter_mut() {
            if let DnsRecord::Opt { options, .. } = rec {
                if options
                    .iter()
                    .any(|o| matches!(o, EdnsOption::Ede { .. }))
                {
                    return;
                }
                options.push(ede);
                return;
            }
        }

        response.resources.push(DnsRecord::Opt {
            udp_size,
            ext_rcode: 0,
            version: 0,
            dnssec_ok: false,
            options: vec![ede],
        });
    }

    // Typed single-record constructors, each stamping the configured TTL.

    pub fn a_record(&self, domain: &str, addr: Ipv4Addr) -> DnsRecord {
        DnsRecord::A {
            domain: domain.to_string(),
            addr,
            ttl: self.config.filtered_ttl,
        }
    }

    pub fn aaaa_record(&self, domain: &str, addr: Ipv6Addr) -> DnsRecord {
        DnsRecord::Aaaa {
            domain: domain.to_string(),
            addr,
            ttl: self.config.filtered_ttl,
        }
    }

    pub fn cname_record(&self, domain: &str, host: &str) -> DnsRecord {
        DnsRecord::Cname {
            domain: domain.to_string(),
            host: host.to_string(),
            ttl: self.config.filtered_ttl,
        }
    }

    pub fn ptr_record(&self, domain: &str, host: &str) -> DnsRecord {
        DnsRecord::Ptr {
            domain: domain.to_string(),
            host: host.to_string(),
            ttl: self.config.filtered_ttl,
        }
    }

    pub fn mx_record(&self, domain: &str, priority: u16, host: &str) -> DnsRecord {
        DnsRecord::Mx {
            domain: domain.to_string(),
            priority,
            host: host.to_string(),
            ttl: self.config.filtered_ttl,
        }
    }

    pub fn srv_record(
        &self,
        domain: &str,
        priority: u16,
        weight: u16,
        port: u16,
        host: &str,
    ) -> DnsRecord {
        DnsRecord::Srv {
            domain: domain.to_string(),
            priority,
            weight,
            port,
            host: host.to_string(),
            ttl: self.config.filtered_ttl,
        }
    }

    /// TXT record whose data is split into 255-byte character-strings with
    /// ceiling division, never truncating.
    pub fn txt_record(&self, domain: &str, data: &str) -> DnsRecord {
        let strings = data
            .as_bytes()
            .chunks(TXT_STRING_LIMIT)
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .collect();
        DnsRecord::Txt {
            domain: domain.to_string(),
            strings,
            ttl: self.config.filtered_ttl,
        }
    }

    pub fn svcb_record(
        &self,
        domain: &str,
        priority: u16,
        target: &str,
        params: Vec<SvcParam>,
    ) -> DnsRecord {
        DnsRecord::Svcb {
            domain: domain.to_string(),
            priority,
            target: target.to_string(),
            params,
            ttl: self.config.filtered_ttl,
        }
    }

    pub fn https_record(
        &self,
        domain: &str,
        priority: u16,
        target: &str,
        params: Vec<SvcParam>,
    ) -> DnsRecord {
        DnsRecord::Https {
            domain: domain.to_string(),
            priority,
            target: target.to_string(),
            params,
            ttl: self.config.filtered_ttl,
        }
    }

    /// SOA record from the fixed negative-caching template.
    pub fn soa_record(&self, zone: &str) -> DnsRecord {
        let (refresh, retry, expire, minimum) = SOA_TIMERS;
        DnsRecord::Soa {
            domain: zone.to_string(),
            m_name: zone.to_string(),
            r_name: SOA_MAILBOX.to_string(),
            serial: 0,
            refresh,
            retry,
            expire,
            minimum,
            ttl: self.config.filtered_ttl,
        }
    }

    /// SVCB template advertising encrypted-DNS discovery parameters.
    ///
    /// Panics if `protocol` is not an encrypted transport; callers construct
    /// templates from static configuration, so a plain-DNS protocol here is
    /// a code defect, not a runtime condition.
    #[allow(clippy::too_many_arguments)]
    pub fn discovery_template(
        &self,
        protocol: DnsProtocol,
        resolver_name: &str,
        doh_path: Option<&str>,
        ipv4_hints: &[Ipv4Addr],
        ipv6_hints: &[Ipv6Addr],
        port: u16,
        priority: u16,
    ) -> DnsRecord {
        let alpn = match protocol {
            DnsProtocol::Tls => vec!["dot".to_string()],
            DnsProtocol::Https => vec!["h2".to_string()],
            DnsProtocol::Quic => vec!["doq".to_string()],
            DnsProtocol::Plain => {
                panic!("discovery template requires an encrypted protocol, got {:?}", protocol)
            }
        };

        let mut params = vec![SvcParam::Alpn { protocols: alpn }, SvcParam::Port { port }];
        if protocol == DnsProtocol::Https {
            if let Some(path) = doh_path {
                params.push(SvcParam::DohPath {
                    path: path.to_string(),
                });
            }
        }
        if !ipv4_hints.is_empty() {
            params.push(SvcParam::Ipv4Hint {
                addrs: ipv4_hints.to_vec(),
            });
        }
        if !ipv6_hints.is_empty() {
            params.push(SvcParam::Ipv6Hint {
                addrs: ipv6_hints.to_vec(),
            });
        }

        self.svcb_record("_dns.resolver.arpa", priority, resolver_name, params)
    }
}
