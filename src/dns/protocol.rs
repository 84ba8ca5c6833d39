//! implements the DNS message model in a transport agnostic fashion
//!
//! The filtering core never touches the wire format; it receives already
//! parsed messages from the surrounding server and hands back either the
//! same message or a synthesized replacement. Everything here is therefore
//! a plain in-memory structure with value semantics.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use serde_derive::{Deserialize, Serialize};

/// The DNS class used for every query this core handles.
pub const CLASS_IN: u16 = 1;

/// `QueryType` represents the requested record type of a query.
///
/// The specific type Unknown takes an integer parameter in order to retain
/// the id of an unknown query when compiling the reply. An integer can be
/// converted to a querytype using the `from_num` function, and back to an
/// integer using the `to_num` method.
#[derive(PartialEq, Eq, Debug, Clone, Hash, Copy, Serialize, Deserialize)]
pub enum QueryType {
    Unknown(u16),
    A,     // 1
    Cname, // 5
    Soa,   // 6
    Ptr,   // 12
    Mx,    // 15
    Txt,   // 16
    Aaaa,  // 28
    Srv,   // 33
    Opt,   // 41
    Svcb,  // 64
    Https, // 65
}

impl QueryType {
    pub fn to_num(&self) -> u16 {
        match *self {
            QueryType::Unknown(x) => x,
            QueryType::A => 1,
            QueryType::Cname => 5,
            QueryType::Soa => 6,
            QueryType::Ptr => 12,
            QueryType::Mx => 15,
            QueryType::Txt => 16,
            QueryType::Aaaa => 28,
            QueryType::Srv => 33,
            QueryType::Opt => 41,
            QueryType::Svcb => 64,
            QueryType::Https => 65,
        }
    }

    pub fn from_num(num: u16) -> QueryType {
        match num {
            1 => QueryType::A,
            5 => QueryType::Cname,
            6 => QueryType::Soa,
            12 => QueryType::Ptr,
            15 => QueryType::Mx,
            16 => QueryType::Txt,
            28 => QueryType::Aaaa,
            33 => QueryType::Srv,
            41 => QueryType::Opt,
            64 => QueryType::Svcb,
            65 => QueryType::Https,
            _ => QueryType::Unknown(num),
        }
    }
}

/// The result code for a DNS query, as described in the specification
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ResultCode {
    #[default]
    NOERROR = 0,
    FORMERR = 1,
    SERVFAIL = 2,
    NXDOMAIN = 3,
    NOTIMP = 4,
    REFUSED = 5,
}

impl ResultCode {
    pub fn from_num(num: u8) -> ResultCode {
        match num {
            1 => ResultCode::FORMERR,
            2 => ResultCode::SERVFAIL,
            3 => ResultCode::NXDOMAIN,
            4 => ResultCode::NOTIMP,
            5 => ResultCode::REFUSED,
            _ => ResultCode::NOERROR,
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// An EDNS option carried inside an OPT pseudo-record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdnsOption {
    /// DNS cookie (code 10)
    Cookie { data: Vec<u8> },
    /// EDNS client subnet (code 8)
    ClientSubnet {
        family: u16,
        source_prefix: u8,
        scope_prefix: u8,
        addr: Vec<u8>,
    },
    /// Extended DNS Error (code 15); `extra_text` may carry a structured
    /// error payload when the server is configured to emit one.
    Ede { info_code: u16, extra_text: String },
    /// Any option the core does not interpret.
    Unknown { code: u16, data: Vec<u8> },
}

/// EDE info code for "Filtered" per RFC 8914.
pub const EDE_FILTERED: u16 = 17;

/// A service binding parameter on an SVCB or HTTPS record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SvcParam {
    /// Key 1: supported protocol list.
    Alpn { protocols: Vec<String> },
    /// Key 3: alternative port.
    Port { port: u16 },
    /// Key 4: IPv4 address hints.
    Ipv4Hint { addrs: Vec<Ipv4Addr> },
    /// Key 6: IPv6 address hints.
    Ipv6Hint { addrs: Vec<Ipv6Addr> },
    /// Key 7: DoH URI template path.
    DohPath { path: String },
    /// Any key the core does not interpret.
    Unknown { key: u16, value: Vec<u8> },
}

/// `DnsRecord` is the primary representation of a DNS record.
///
/// The variant set covers every type the filtering pipeline inspects or
/// synthesizes; anything else travels through `Unknown` untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DnsRecord {
    Unknown {
        domain: String,
        qtype: u16,
        data: Vec<u8>,
        ttl: u32,
    }, // 0
    A {
        domain: String,
        addr: Ipv4Addr,
        ttl: u32,
    }, // 1
    Cname {
        domain: String,
        host: String,
        ttl: u32,
    }, // 5
    Soa {
        domain: String,
        m_name: String,
        r_name: String,
        serial: u32,
        refresh: u32,
        retry: u32,
        expire: u32,
        minimum: u32,
        ttl: u32,
    }, // 6
    Ptr {
        domain: String,
        host: String,
        ttl: u32,
    }, // 12
    Mx {
        domain: String,
        priority: u16,
        host: String,
        ttl: u32,
    }, // 15
    Txt {
        domain: String,
        strings: Vec<String>,
        ttl: u32,
    }, // 16
    Aaaa {
        domain: String,
        addr: Ipv6Addr,
        ttl: u32,
    }, // 28
    Srv {
        domain: String,
        priority: u16,
        weight: u16,
        port: u16,
        host: String,
        ttl: u32,
    }, // 33
    Opt {
        udp_size: u16,
        ext_rcode: u8,
        version: u8,
        dnssec_ok: bool,
        options: Vec<EdnsOption>,
    }, // 41
    Svcb {
        domain: String,
        priority: u16,
        target: String,
        params: Vec<SvcParam>,
        ttl: u32,
    }, // 64
    Https {
        domain: String,
        priority: u16,
        target: String,
        params: Vec<SvcParam>,
        ttl: u32,
    }, // 65
}

impl DnsRecord {
    pub fn get_querytype(&self) -> QueryType {
        match *self {
            DnsRecord::A { .. } => QueryType::A,
            DnsRecord::Aaaa { .. } => QueryType::Aaaa,
            DnsRecord::Cname { .. } => QueryType::Cname,
            DnsRecord::Soa { .. } => QueryType::Soa,
            DnsRecord::Ptr { .. } => QueryType::Ptr,
            DnsRecord::Mx { .. } => QueryType::Mx,
            DnsRecord::Txt { .. } => QueryType::Txt,
            DnsRecord::Srv { .. } => QueryType::Srv,
            DnsRecord::Opt { .. } => QueryType::Opt,
            DnsRecord::Svcb { .. } => QueryType::Svcb,
            DnsRecord::Https { .. } => QueryType::Https,
            DnsRecord::Unknown { qtype, .. } => QueryType::Unknown(qtype),
        }
    }

    pub fn get_domain(&self) -> Option<&str> {
        match *self {
            DnsRecord::A { ref domain, .. }
            | DnsRecord::Aaaa { ref domain, .. }
            | DnsRecord::Cname { ref domain, .. }
            | DnsRecord::Soa { ref domain, .. }
            | DnsRecord::Ptr { ref domain, .. }
            | DnsRecord::Mx { ref domain, .. }
            | DnsRecord::Txt { ref domain, .. }
            | DnsRecord::Srv { ref domain, .. }
            | DnsRecord::Svcb { ref domain, .. }
            | DnsRecord::Https { ref domain, .. }
            | DnsRecord::Unknown { ref domain, .. } => Some(domain),
            DnsRecord::Opt { .. } => None,
        }
    }

    pub fn get_ttl(&self) -> u32 {
        match *self {
            DnsRecord::A { ttl, .. }
            | DnsRecord::Aaaa { ttl, .. }
            | DnsRecord::Cname { ttl, .. }
            | DnsRecord::Soa { ttl, .. }
            | DnsRecord::Ptr { ttl, .. }
            | DnsRecord::Mx { ttl, .. }
            | DnsRecord::Txt { ttl, .. }
            | DnsRecord::Srv { ttl, .. }
            | DnsRecord::Svcb { ttl, .. }
            | DnsRecord::Https { ttl, .. }
            | DnsRecord::Unknown { ttl, .. } => ttl,
            DnsRecord::Opt { .. } => 0,
        }
    }
}

/// Representation of a DNS header.
///
/// Section counts are derived from the vectors on `DnsPacket` when the
/// surrounding server serializes, so they are not duplicated here.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DnsHeader {
    pub id: u16,

    pub recursion_desired: bool,
    pub truncated_message: bool,
    pub authoritative_answer: bool,
    pub opcode: u8,
    pub response: bool,

    pub rescode: ResultCode,
    pub checking_disabled: bool,
    pub authed_data: bool,
    pub z: bool,
    pub recursion_available: bool,
}

impl DnsHeader {
    pub fn new() -> DnsHeader {
        DnsHeader::default()
    }
}

/// Representation of a DNS question
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsQuestion {
    pub domain: String,
    pub qtype: QueryType,
    pub qclass: u16,
}

impl DnsQuestion {
    pub fn new(domain: String, qtype: QueryType) -> DnsQuestion {
        DnsQuestion {
            domain,
            qtype,
            qclass: CLASS_IN,
        }
    }
}

/// Representation of a complete DNS message
///
/// This is the work horse of the filtering core. Incoming queries arrive in
/// this shape, every synthesized response is assembled into it, and the
/// cloner duplicates it record by record.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DnsPacket {
    pub header: DnsHeader,
    pub questions: Vec<DnsQuestion>,
    pub answers: Vec<DnsRecord>,
    pub authorities: Vec<DnsRecord>,
    pub resources: Vec<DnsRecord>,
}

impl DnsPacket {
    pub fn new() -> DnsPacket {
        DnsPacket::default()
    }

    /// The first (and in practice only) question of the message.
    pub fn question(&self) -> Option<&DnsQuestion> {
        self.questions.first()
    }

    /// The EDNS OPT pseudo-record from the additional section, if any.
    pub fn edns_opt(&self) -> Option<&DnsRecord> {
        self.resources
            .iter()
            .find(|r| matches!(r, DnsRecord::Opt { .. }))
    }

    /// Whether the sender signalled EDNS support.
    pub fn supports_edns(&self) -> bool {
        self.edns_opt().is_some()
    }
}

/// Lowercases a hostname and strips the trailing dot, the form every cache
/// key and rule match uses.
pub fn normalize_host(host: &str) -> String {
    let trimmed = host.strip_suffix('.').unwrap_or(host);
    trimmed.to_ascii_lowercase()
}
