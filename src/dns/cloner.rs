//! Pooled DNS Message Cloning
//!
//! Every filtered or pass-through response on a high-QPS resolver is cloned
//! from a cached template, so the deep copy must not allocate a fresh object
//! graph per request. The cloner keeps a free list per record variant and
//! reuses the `String` and `Vec` capacity of disposed records; variable
//! length data is always copied, never aliased, so a clone is independently
//! mutable.
//!
//! # Features
//!
//! * **Per-variant Pools** - A, AAAA, CNAME, SOA, PTR, MX, TXT, SRV, SVCB,
//!   HTTPS, and OPT records each recycle through their own free list
//! * **Truncate-not-free Reuse** - returned buffers keep their capacity
//! * **Generic Fallback** - unknown record types degrade to a plain deep
//!   copy and the clone is reported as not fully pool-backed
//! * **Type-symmetric Disposal** - every pooled type acquired by `clone` is
//!   matched by a return in `dispose`

use parking_lot::Mutex;

use crate::dns::protocol::{DnsPacket, DnsRecord};

/// Upper bound on each free list; beyond it, disposed objects are dropped.
const POOL_LIMIT: usize = 512;

/// A free list of records of one variant.
#[derive(Default)]
struct RecordPool {
    items: Mutex<Vec<DnsRecord>>,
}

impl RecordPool {
    fn take(&self) -> Option<DnsRecord> {
        self.items.lock().pop()
    }

    fn put(&self, rec: DnsRecord) {
        let mut items = self.items.lock();
        if items.len() < POOL_LIMIT {
            items.push(rec);
        }
    }
}

/// Pooled deep-copy engine for DNS messages.
///
/// Ownership of a clone transfers fully to the caller; `dispose` transfers
/// it back. A disposed message and all its parts must not be touched again.
#[derive(Default)]
pub struct PacketCloner {
    shells: Mutex<Vec<DnsPacket>>,
    a: RecordPool,
    aaaa: RecordPool,
    cname: RecordPool,
    soa: RecordPool,
    ptr: RecordPool,
    mx: RecordPool,
    txt: RecordPool,
    srv: RecordPool,
    opt: RecordPool,
    svcb: RecordPool,
    https: RecordPool,
}

fn copy_str(dst: &mut String, src: &str) {
    dst.clear();
    dst.push_str(src);
}

fn copy_strings(dst: &mut Vec<String>, src: &[String]) {
    dst.truncate(src.len());
    let shared = dst.len();
    for (d, s) in dst.iter_mut().zip(src) {
        copy_str(d, s);
    }
    for s in &src[shared..] {
        dst.push(s.clone());
    }
}

impl PacketCloner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deep-copies `msg`, reusing pooled sub-structures where possible.
    ///
    /// The second return value reports whether the clone was fully
    /// pool-backed; a partial clone fell through the generic copy path for
    /// at least one record.
    pub fn clone_packet(&self, msg: &DnsPacket) -> (DnsPacket, bool) {
        let mut shell = self.shells.lock().pop().unwrap_or_default();
        shell.header = msg.header.clone();

        shell.questions.truncate(msg.questions.len());
        let shared = shell.questions.len();
        for (dst, src) in shell.questions.iter_mut().zip(&msg.questions) {
            copy_str(&mut dst.domain, &src.domain);
            dst.qtype = src.qtype;
            dst.qclass = src.qclass;
        }
        for q in &msg.questions[shared..] {
            shell.questions.push(q.clone());
        }

        let mut full = true;
        full &= self.clone_section(&msg.answers, &mut shell.answers);
        full &= self.clone_section(&msg.authorities, &mut shell.authorities);
        full &= self.clone_section(&msg.resources, &mut shell.resources);

        (shell, full)
    }

    fn clone_section(&self, src: &[DnsRecord], dst: &mut Vec<DnsRecord>) -> bool {
        dst.clear();

        let mut full = true;
        for rec in src {
            let (clone, pooled) = self.clone_record(rec);
            full &= pooled;
            dst.push(clone);
        }
        full
    }

    fn clone_record(&self, rec: &DnsRecord) -> (DnsRecord, bool) {
        match rec {
            DnsRecord::A { domain, addr, ttl } => {
                let mut out = self.a.take().unwrap_or_else(|| DnsRecord::A {
                    domain: String::new(),
                    addr: *addr,
                    ttl: 0,
                });
                if let DnsRecord::A {
                    domain: d,
                    addr: a,
                    ttl: t,
                } = &mut out
                {
                    copy_str(d, domain);
                    *a = *addr;
                    *t = *ttl;
                }
                (out, true)
            }
            DnsRecord::Aaaa { domain, addr, ttl } => {
                let mut out = self.aaaa.take().unwrap_or_else(|| DnsRecord::Aaaa {
                    domain: String::new(),
                    addr: *addr,
                    ttl: 0,
                });
                if let DnsRecord::Aaaa {
                    domain: d,
                    addr: a,
                    ttl: t,
                } = &mut out
                {
                    copy_str(d, domain);
                    *a = *addr;
                    *t = *ttl;
                }
                (out, true)
            }
            DnsRecord::Cname { domain, host, ttl } => {
                let mut out = self.cname.take().unwrap_or_else(|| DnsRecord::Cname {
                    domain: String::new(),
                    host: String::new(),
                    ttl: 0,
                });
                if let DnsRecord::Cname {
                    domain: d,
                    host: h,
                    ttl: t,
                } = &mut out
                {
                    copy_str(d, domain);
                    copy_str(h, host);
                    *t = *ttl;
                }
                (out, true)
            }
            DnsRecord::Ptr { domain, host, ttl } => {
                let mut out = self.ptr.take().unwrap_or_else(|| DnsRecord::Ptr {
                    domain: String::new(),
                    host: String::new(),
                    ttl: 0,
                });
                if let DnsRecord::Ptr {
                    domain: d,
                    host: h,
                    ttl: t,
                } = &mut out
                {
                    copy_str(d, domain);
                    copy_str(h, host);
                    *t = *ttl;
                }
                (out, true)
            }
            DnsRecord::Mx {
                domain,
                priority,
                host,
                ttl,
            } => {
                let mut out = self.mx.take().unwrap_or_else(|| DnsRecord::Mx {
                    domain: String::new(),
                    priority: 0,
                    host: String::new(),
                    ttl: 0,
                });
                if let DnsRecord::Mx {
                    domain: d,
                    priority: p,
                    host: h,
                    ttl: t,
                } = &mut out
                {
                    copy_str(d, domain);
                    *p = *priority;
                    copy_str(h, host);
                    *t = *ttl;
                }
                (out, true)
            }
            DnsRecord::Srv {
                domain,
                priority,
                weight,
                port,
                host,
                ttl,
            } => {
                let mut out = self.srv.take().unwrap_or_else(|| DnsRecord::Srv {
                    domain: String::new(),
                    priority: 0,
                    weight: 0,
                    port: 0,
                    host: String::new(),
                    ttl: 0,
                });
                if let DnsRecord::Srv {
                    domain: d,
                    priority: p,
                    weight: w,
                    port: po,
                    host: h,
                    ttl: t,
                } = &mut out
                {
                    copy_str(d, domain);
                    *p = *priority;
                    *w = *weight;
                    *po = *port;
                    copy_str(h, host);
                    *t = *ttl;
                }
                (out, true)
            }
            DnsRecord::Txt {
                domain,
                strings,
                ttl,
            } => {
                let mut out = self.txt.take().unwrap_or_else(|| DnsRecord::Txt {
                    domain: String::new(),
                    strings: Vec::new(),
                    ttl: 0,
                });
                if let DnsRecord::Txt {
                    domain: d,
                    strings: s,
                    ttl: t,
                } = &mut out
                {
                    copy_str(d, domain);
                    copy_strings(s, strings);
                    *t = *ttl;
                }
                (out, true)
            }
            DnsRecord::Soa {
                domain,
                m_name,
                r_name,
                serial,
                refresh,
                retry,
                expire,
                minimum,
                ttl,
            } => {
                let mut out = self.soa.take().unwrap_or_else(|| DnsRecord::Soa {
                    domain: String::new(),
                    m_name: String::new(),
                    r_name: String::new(),
                    serial: 0,
                    refresh: 0,
                    retry: 0,
                    expire: 0,
                    minimum: 0,
                    ttl: 0,
                });
                if let DnsRecord::Soa {
                    domain: d,
                    m_name: mn,
                    r_name: rn,
                    serial: se,
                    refresh: re,
                    retry: rt,
                    expire: ex,
                    minimum: mi,
                    ttl: t,
                } = &mut out
                {
                    copy_str(d, domain);
                    copy_str(mn, m_name);
                    copy_str(rn, r_name);
                    *se = *serial;
                    *re = *refresh;
                    *rt = *retry;
                    *ex = *expire;
                    *mi = *minimum;
                    *t = *ttl;
                }
                (out, true)
            }
            DnsRecord::Opt {
                udp_size,
                ext_rcode,
                version,
                dnssec_ok,
                options,
            } => {
                let mut out = self.opt.take().unwrap_or_else(|| DnsRecord::Opt {
                    udp_size: 0,
                    ext_rcode: 0,
                    version: 0,
                    dnssec_ok: false,
                    options: Vec::new(),
                });
                if let DnsRecord::Opt {
                    udp_size: u,
                    ext_rcode: e,
                    version: v,
                    dnssec_ok: ok,
                    options: o,
                } = &mut out
                {
                    *u = *udp_size;
                    *e = *ext_rcode;
                    *v = *version;
                    *ok = *dnssec_ok;
                    o.clear();
                    o.extend(options.iter().cloned());
                }
                (out, true)
            }
            DnsRecord::Svcb {
                domain,
                priority,
                target,
                params,
                ttl,
            } => {
                let mut out = self.svcb.take().unwrap_or_else(|| DnsRecord::Svcb {
                    domain: String::new(),
                    priority: 0,
                    target: String::new(),
                    params: Vec::new(),
                    ttl: 0,
                });
                if let DnsRecord::Svcb {
                    domain: d,
                    priority: p,
                    target: tg,
                    params: pa,
                    ttl: t,
                } = &mut out
                {
                    copy_str(d, domain);
                    *p = *priority;
                    copy_str(tg, target);
                    pa.clear();
                    pa.extend(params.iter().cloned());
                    *t = *ttl;
                }
                (out, true)
            }
            DnsRecord::Https {
                domain,
                priority,
                target,
                params,
                ttl,
            } => {
                let mut out = self.https.take().unwrap_or_else(|| DnsRecord::Https {
                    domain: String::new(),
                    priority: 0,
                    target: String::new(),
                    params: Vec::new(),
                    ttl: 0,
                });
                if let DnsRecord::Https {
                    domain: d,
                    priority: p,
                    target: tg,
                    params: pa,
                    ttl: t,
                } = &mut out
                {
                    copy_str(d, domain);
                    *p = *priority;
                    copy_str(tg, target);
                    pa.clear();
                    pa.extend(params.iter().cloned());
                    *t = *ttl;
                }
                (out, true)
            }
            // Anything else takes the generic deep-copy path; correctness
            // over allocation optimality.
            DnsRecord::Unknown { .. } => (rec.clone(), false),
        }
    }

    /// Returns every pooled sub-object reachable from `msg` to its pool.
    pub fn dispose(&self, mut msg: DnsPacket) {
        for rec in msg.answers.drain(..) {
            self.put_record(rec);
        }
        for rec in msg.authorities.drain(..) {
            self.put_record(rec);
        }
        for rec in msg.resources.drain(..) {
            self.put_record(rec);
        }
        msg.questions.truncate(0);

        let mut shells = self.shells.lock();
        if shells.len() < POOL_LIMIT {
            shells.push(msg);
        }
    }

    fn put_record(&self, rec: DnsRecord) {
        match rec {
            DnsRecord::A { .. } => self.a.put(rec),
            DnsRecord::Aaaa { .. } => self.aaaa.put(rec),
            DnsRecord::Cname { .. } => self.cname.put(rec),
            DnsRecord::Soa { .. } => self.soa.put(rec),
            DnsRecord::Ptr { .. } => self.ptr.put(rec),
            DnsRecord::Mx { .. } => self.mx.put(rec),
            DnsRecord::Txt { .. } => self.txt.put(rec),
            DnsRecord::Srv { .. } => self.srv.put(rec),
            DnsRecord::Opt { .. } => self.opt.put(rec),
            DnsRecord::Svcb { .. } => self.svcb.put(rec),
            DnsRecord::Https { .. } => self.https.put(rec),
            DnsRecord::Unknown { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::protocol::{DnsQuestion, EdnsOption, QueryType, SvcParam};
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn full_packet() -> DnsPacket {
        let mut msg = DnsPacket::new();
        msg.header.id = 42;
        msg.header.response = true;
        msg.questions
            .push(DnsQuestion::new("example.com".to_string(), QueryType::A));

        msg.answers.push(DnsRecord::A {
            domain: "example.com".to_string(),
            addr: Ipv4Addr::new(192, 0, 2, 1),
            ttl: 300,
        });
        msg.answers.push(DnsRecord::Aaaa {
            domain: "example.com".to_string(),
            addr: Ipv6Addr::LOCALHOST,
            ttl: 300,
        });
        msg.answers.push(DnsRecord::Cname {
            domain: "www.example.com".to_string(),
            host: "example.com".to_string(),
            ttl: 300,
        });
        msg.answers.push(DnsRecord::Mx {
            domain: "example.com".to_string(),
            priority: 10,
            host: "mail.example.com".to_string(),
            ttl: 300,
        });
        msg.answers.push(DnsRecord::Ptr {
            domain: "1.2.0.192.in-addr.arpa".to_string(),
            host: "example.com".to_string(),
            ttl: 300,
        });
        msg.answers.push(DnsRecord::Srv {
            domain: "_sip._tcp.example.com".to_string(),
            priority: 1,
            weight: 5,
            port: 5060,
            host: "sip.example.com".to_string(),
            ttl: 300,
        });
        msg.answers.push(DnsRecord::Txt {
            domain: "example.com".to_string(),
            strings: vec!["v=spf1 -all".to_string(), "second".to_string()],
            ttl: 300,
        });
        msg.answers.push(DnsRecord::Https {
            domain: "example.com".to_string(),
            priority: 1,
            target: ".".to_string(),
            params: vec![
                SvcParam::Alpn {
                    protocols: vec!["h2".to_string(), "h3".to_string()],
                },
                SvcParam::Port { port: 443 },
                SvcParam::Ipv4Hint {
                    addrs: vec![Ipv4Addr::new(192, 0, 2, 1), Ipv4Addr::new(192, 0, 2, 2)],
                },
                SvcParam::Ipv6Hint {
                    addrs: vec![Ipv6Addr::LOCALHOST],
                },
            ],
            ttl: 300,
        });

        msg.authorities.push(DnsRecord::Soa {
            domain: "example.com".to_string(),
            m_name: "ns1.example.com".to_string(),
            r_name: "hostmaster.example.com".to_string(),
            serial: 2024010101,
            refresh: 1800,
            retry: 900,
            expire: 604800,
            minimum: 86400,
            ttl: 300,
        });

        msg.resources.push(DnsRecord::Opt {
            udp_size: 1232,
            ext_rcode: 0,
            version: 0,
            dnssec_ok: true,
            options: vec![
                EdnsOption::Cookie {
                    data: vec![1, 2, 3, 4, 5, 6, 7, 8],
                },
                EdnsOption::ClientSubnet {
                    family: 1,
                    source_prefix: 24,
                    scope_prefix: 0,
                    addr: vec![192, 0, 2],
                },
            ],
        });

        msg
    }

    #[test]
    fn test_clone_fidelity() {
        let cloner = PacketCloner::new();
        let original = full_packet();

        let (clone, full) = cloner.clone_packet(&original);
        assert!(full);
        assert_eq!(clone, original);
    }

    #[test]
    fn test_clone_after_dispose_cycle() {
        let cloner = PacketCloner::new();
        let original = full_packet();

        let (first, _) = cloner.clone_packet(&original);
        cloner.dispose(first);

        // The second clone reuses pooled objects and must still be a
        // faithful copy with no data bleed from the first cycle.
        let (second, full) = cloner.clone_packet(&original);
        assert!(full);
        assert_eq!(second, original);
    }

    #[test]
    fn test_no_cross_message_bleed() {
        let cloner = PacketCloner::new();
        let big = full_packet();

        let mut small = DnsPacket::new();
        small
            .questions
            .push(DnsQuestion::new("tiny.example".to_string(), QueryType::Txt));
        small.answers.push(DnsRecord::Txt {
            domain: "tiny.example".to_string(),
            strings: vec!["only".to_string()],
            ttl: 60,
        });

        let (c1, _) = cloner.clone_packet(&big);
        cloner.dispose(c1);

        // Pools now hold the big message's carcasses; cloning the small one
        // must not resurrect any of that data.
        let (c2, full) = cloner.clone_packet(&small);
        assert!(full);
        assert_eq!(c2, small);

        cloner.dispose(c2);
        let (c3, _) = cloner.clone_packet(&big);
        assert_eq!(c3, big);
    }

    #[test]
    fn test_unknown_record_fallback() {
        let cloner = PacketCloner::new();
        let mut msg = DnsPacket::new();
        msg.answers.push(DnsRecord::Unknown {
            domain: "example.com".to_string(),
            qtype: 250,
            data: vec![0xde, 0xad],
            ttl: 60,
        });

        let (clone, full) = cloner.clone_packet(&msg);
        assert!(!full);
        assert_eq!(clone, msg);
    }

    #[test]
    fn test_empty_sections_preserved() {
        let cloner = PacketCloner::new();
        let msg = DnsPacket::new();
        let (clone, full) = cloner.clone_packet(&msg);
        assert!(full);
        assert!(clone.answers.is_empty());
        assert!(clone.authorities.is_empty());
        assert!(clone.resources.is_empty());
    }

    #[test]
    fn test_clone_is_independent() {
        let cloner = PacketCloner::new();
        let original = full_packet();
        let (mut clone, _) = cloner.clone_packet(&original);

        if let DnsRecord::A { domain, .. } = &mut clone.answers[0] {
            domain.push_str(".mutated");
        }
        if let DnsRecord::A { domain, .. } = &original.answers[0] {
            assert_eq!(domain, "example.com");
        }
    }
}
