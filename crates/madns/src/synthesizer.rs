//! Static answers for `respond` and `rebind` policies.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use hickory_proto::rr::rdata::{A, AAAA, CNAME};
use hickory_proto::rr::{Name, RData, Record};

/// Synthesized answers must not be cached downstream
pub const ANSWER_TTL: u32 = 0;

/// Classification of a configured answer literal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerLiteral {
    V4(Ipv4Addr),
    V6(Ipv6Addr),
    /// Alias target, always with exactly one trailing dot
    Alias(String),
}

impl AnswerLiteral {
    /// Never fails: anything that isn't an IP address is an alias.
    pub fn classify(literal: &str) -> Self {
        match literal.parse::<IpAddr>() {
            Ok(IpAddr::V4(address)) => AnswerLiteral::V4(address),
            // IPv4-mapped addresses are answered with an A record
            Ok(IpAddr::V6(address)) => match address.to_ipv4_mapped() {
                Some(address) => AnswerLiteral::V4(address),
                None => AnswerLiteral::V6(address),
            },
            Err(_) => AnswerLiteral::Alias(format!("{}.", literal.trim_end_matches('.'))),
        }
    }

    fn into_rdata(self) -> Option<RData> {
        Some(match self {
            AnswerLiteral::V4(address) => RData::A(A(address)),
            AnswerLiteral::V6(address) => RData::AAAA(AAAA(address)),
            AnswerLiteral::Alias(target) => match Name::from_ascii(&target) {
                Ok(name) => RData::CNAME(CNAME(name)),
                Err(e) => {
                    tracing::warn!(%target, "alias target is not a valid DNS name: {}", e);
                    return None;
                }
            },
        })
    }
}

/// Builds the answer to `qname` for a configured literal.
///
/// Returns `None` only for alias targets that have no wire representation.
pub fn synthesize(qname: &Name, literal: &str) -> Option<Record> {
    AnswerLiteral::classify(literal)
        .into_rdata()
        .map(|rdata| Record::from_rdata(qname.clone(), ANSWER_TTL, rdata))
}
