// Static fixed-device and redirect rules applied to the trie at startup

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};

use super::AddressTrie;
use crate::error::{RouterError, RouterResult};

/// Resolve a hostname or literal address to its IPv4 addresses.
/// IPv6 results are discarded.
pub async fn resolve_ipv4(host: &str) -> RouterResult<Vec<Ipv4Addr>> {
    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        return Ok(vec![ip]);
    }

    let addrs = tokio::net::lookup_host((host, 0))
        .await
        .map_err(|e| RouterError::Resolve(format!("{}: {}", host, e)))?;

    let mut ips = Vec::new();
    for addr in addrs {
        if let IpAddr::V4(ip) = addr.ip() {
            if !ips.contains(&ip) {
                ips.push(ip);
            }
        }
    }
    Ok(ips)
}

impl AddressTrie {
    /// Pin every IPv4 address of `host` to `device`. Returns the number of
    /// leaves written; a host that fails to resolve is logged and skipped.
    pub async fn apply_fixed_host(&self, host: &str, device: &str) -> usize {
        self.apply_host(host, device, None).await
    }

    /// Redirect every IPv4 address of `host` to `redirect`
    pub async fn apply_redirect_host(&self, host: &str, redirect: Ipv4Addr) -> usize {
        self.apply_host(host, "", Some(redirect)).await
    }

    async fn apply_host(&self, host: &str, device: &str, redirect: Option<Ipv4Addr>) -> usize {
        let ips = match resolve_ipv4(host).await {
            Ok(ips) => ips,
            Err(e) => {
                tracing::warn!("Skipping rule for {}: {}", host, e);
                return 0;
            }
        };

        if ips.is_empty() {
            tracing::warn!("Skipping rule for {}: no IPv4 address", host);
        }

        for ip in &ips {
            tracing::debug!(
                "Fixed entry {} ({}) -> {} on dev {}",
                ip,
                host,
                redirect.map(|r| r.to_string()).unwrap_or_default(),
                device
            );
            self.insert_fixed(*ip, device, redirect);
        }
        ips.len()
    }

    /// Apply both configured rule maps. Returns the total number of leaves written.
    pub async fn apply_rules(
        &self,
        fixed: &BTreeMap<String, String>,
        redirect: &BTreeMap<String, Ipv4Addr>,
    ) -> usize {
        let mut inserted = 0;
        for (host, device) in fixed {
            inserted += self.apply_fixed_host(host, device).await;
        }
        for (host, target) in redirect {
            inserted += self.apply_redirect_host(host, *target).await;
        }
        inserted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_literal_address() {
        let ips = resolve_ipv4("10.17.0.1").await.unwrap();
        assert_eq!(ips, vec![Ipv4Addr::new(10, 17, 0, 1)]);
    }

    #[tokio::test]
    async fn test_unresolvable_host_is_skipped() {
        let trie = AddressTrie::new();
        assert_eq!(trie.apply_fixed_host("no-such-host.invalid", "eth0").await, 0);
        assert_eq!(trie.dump(), " ->  on dev \n");
    }

    #[tokio::test]
    async fn test_apply_rules() {
        let trie = AddressTrie::new();
        let fixed = BTreeMap::from([
            ("10.17.0.1".to_string(), "tener".to_string()),
            ("bogus.invalid".to_string(), "eth0".to_string()),
        ]);
        let redirect = BTreeMap::from([("10.17.0.9".to_string(), Ipv4Addr::new(127, 0, 0, 1))]);

        assert_eq!(trie.apply_rules(&fixed, &redirect).await, 2);
        assert_eq!(
            trie.device_for_exact(Ipv4Addr::new(10, 17, 0, 1)).as_deref(),
            Some("tener")
        );
        assert_eq!(
            trie.redirect_for(Ipv4Addr::new(10, 17, 0, 9)),
            Ipv4Addr::new(127, 0, 0, 1)
        );
    }

    #[tokio::test]
    async fn test_redirect_applied_after_fixed_for_same_host() {
        let trie = AddressTrie::new();
        let fixed = BTreeMap::from([("10.0.0.7".to_string(), "tun0".to_string())]);
        let redirect = BTreeMap::from([("10.0.0.7".to_string(), Ipv4Addr::new(127, 0, 0, 1))]);

        assert_eq!(trie.apply_rules(&fixed, &redirect).await, 2);
        assert_eq!(trie.dump(), "10.0.0.7 -> 127.0.0.1 on dev \n");
    }
}
