//! IP whitelist enforcement.
//!
//! Entries are literal addresses or IPv4 CIDR ranges (`A.B.C.D/prefix`,
//! prefix 0..=32). Literal equality is tried first; IPv6 entries match only
//! literally. An empty whitelist rejects all traffic — default-deny is the
//! point of the filter.

use super::{Filter, Rejection, RequestContext};
use crate::config::GatewayConfig;
use async_trait::async_trait;
use std::sync::Arc;

/// Parses a dotted-quad IPv4 address into its 32-bit value.
fn ipv4_to_u32(address: &str) -> Option<u32> {
    let mut octets = [0u32; 4];
    let mut count = 0;
    for part in address.split('.') {
        if count == 4 {
            return None;
        }
        octets[count] = part.parse::<u8>().ok()?.into();
        count += 1;
    }
    if count != 4 {
        return None;
    }
    Some((octets[0] << 24) | (octets[1] << 16) | (octets[2] << 8) | octets[3])
}

/// IPv4 CIDR containment. Prefix 0 matches every address; prefix 32 only
/// the exact one. Malformed entries match nothing.
fn cidr_matches(client_ip: &str, cidr: &str) -> bool {
    let Some((network, prefix)) = cidr.split_once('/') else {
        return false;
    };
    let Ok(prefix) = prefix.parse::<u32>() else {
        return false;
    };
    if prefix > 32 {
        return false;
    }
    let (Some(client), Some(network)) = (ipv4_to_u32(client_ip), ipv4_to_u32(network)) else {
        return false;
    };

    let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
    (client & mask) == (network & mask)
}

/// Whether `client_ip` is admitted by the whitelist.
#[must_use]
pub fn is_ip_allowed(client_ip: &str, whitelist: &[String]) -> bool {
    if whitelist.is_empty() {
        return false;
    }
    whitelist.iter().any(|entry| {
        if entry == client_ip {
            return true;
        }
        if entry.contains('/') {
            return cidr_matches(client_ip, entry);
        }
        false
    })
}

pub struct IpGuardFilter {
    config: Arc<GatewayConfig>,
}

impl IpGuardFilter {
    #[must_use]
    pub fn new(config: Arc<GatewayConfig>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Filter for IpGuardFilter {
    fn name(&self) -> &'static str {
        "ip_guard"
    }

    fn enabled(&self) -> bool {
        self.config.filters.ip_guard
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<(), Rejection> {
        if !is_ip_allowed(&ctx.client_ip, &self.config.security.ip_whitelist) {
            tracing::warn!(
                request_id = %ctx.request_id,
                client_ip = %ctx.client_ip,
                "client address rejected by whitelist"
            );
            return Err(Rejection::Forbidden);
        }
        Ok(())
    }
}
