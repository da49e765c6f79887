// Address trie - concurrent per-octet IPv4 prefix tree mapping destinations to devices

pub mod rules;

use std::collections::BTreeMap;
use std::fmt::Write;
use std::net::Ipv4Addr;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Number of octets in a fully specified IPv4 address
pub const FULL_DEPTH: usize = 4;

#[derive(Debug, Default)]
struct NodeState {
    children: BTreeMap<u8, Arc<TrieNode>>,
    device: String,
    redirect: Option<Ipv4Addr>,
}

/// One octet level of the trie. Nodes are never removed once created.
#[derive(Debug, Default)]
pub struct TrieNode {
    state: RwLock<NodeState>,
}

impl TrieNode {
    fn with_device(device: &str) -> Self {
        TrieNode {
            state: RwLock::new(NodeState {
                device: device.to_string(),
                ..NodeState::default()
            }),
        }
    }

    // node state is consistent between statements, poisoning is ignored
    fn read(&self) -> RwLockReadGuard<'_, NodeState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, NodeState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Snapshot of the deepest node matched for an address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixMatch {
    /// Number of octets matched (0-4)
    pub depth: usize,
    pub device: String,
    pub redirect: Option<Ipv4Addr>,
}

impl PrefixMatch {
    pub fn is_exact(&self) -> bool {
        self.depth == FULL_DEPTH
    }
}

/// Longest-prefix-match table from IPv4 destinations to egress devices.
///
/// Every lookup holds a shared lock on each node of its path until it has
/// read the result, so a concurrent insert is either fully visible or not
/// at all. Locks are per node; lookups under unrelated prefixes only share
/// the root's read lock.
#[derive(Debug)]
pub struct AddressTrie {
    root: Arc<TrieNode>,
}

impl Default for AddressTrie {
    fn default() -> Self {
        Self::new()
    }
}

impl AddressTrie {
    pub fn new() -> Self {
        AddressTrie {
            root: Arc::new(TrieNode::default()),
        }
    }

    fn walk<R>(node: &TrieNode, octets: &[u8], depth: usize, f: impl FnOnce(&NodeState, usize) -> R) -> R {
        let state = node.read();
        match octets.split_first() {
            Some((octet, rest)) => match state.children.get(octet) {
                Some(child) => Self::walk(child, rest, depth + 1, f),
                None => f(&state, depth),
            },
            None => f(&state, depth),
        }
    }

    /// Walk from the root one octet per level and report the deepest node reached
    pub fn find_prefix(&self, ip: Ipv4Addr) -> PrefixMatch {
        Self::walk(&self.root, &ip.octets(), 0, |state, depth| PrefixMatch {
            depth,
            device: state.device.clone(),
            redirect: state.redirect,
        })
    }

    /// Device of the longest matching prefix, or the root's device if nothing matches
    pub fn device_for(&self, ip: Ipv4Addr) -> String {
        self.find_prefix(ip).device
    }

    /// Device stored for exactly this host. Shorter prefixes never apply.
    pub fn device_for_exact(&self, ip: Ipv4Addr) -> Option<String> {
        let found = self.find_prefix(ip);
        (found.is_exact() && !found.device.is_empty()).then_some(found.device)
    }

    /// Configured redirect for exactly this host, otherwise `ip` itself
    pub fn redirect_for(&self, ip: Ipv4Addr) -> Ipv4Addr {
        let found = self.find_prefix(ip);
        match found.redirect {
            Some(redirect) if found.is_exact() => redirect,
            _ => ip,
        }
    }

    /// Record a successful connection to `ip` via `device`.
    ///
    /// Only one level is added below the deepest existing match, so the first
    /// contact with an unseen block assigns the device to its first octet and
    /// repeated successes narrow the entry by one octet each, up to the host.
    /// A fully matched address is left untouched.
    pub fn insert_learned(&self, ip: Ipv4Addr, device: &str) {
        Self::learn(&self.root, &ip.octets(), device);
    }

    fn learn(node: &TrieNode, octets: &[u8], device: &str) {
        let Some((octet, rest)) = octets.split_first() else {
            return;
        };

        {
            let state = node.read();
            if let Some(child) = state.children.get(octet) {
                return Self::learn(child, rest, device);
            }
        }

        let mut state = node.write();
        match state.children.get(octet) {
            // another learner got here between the read and the write lock
            Some(child) => child.write().device = device.to_string(),
            None => {
                state
                    .children
                    .insert(*octet, Arc::new(TrieNode::with_device(device)));
            }
        }
    }

    /// Insert a host-exact entry from static configuration.
    ///
    /// All four levels are created regardless of existing matches. The device
    /// is written on the leaf only, replacing any previous one. A missing
    /// redirect leaves the leaf's existing redirect in place.
    pub fn insert_fixed(&self, ip: Ipv4Addr, device: &str, redirect: Option<Ipv4Addr>) {
        let mut node = Arc::clone(&self.root);
        for octet in ip.octets() {
            let child = {
                let mut state = node.write();
                Arc::clone(
                    state
                        .children
                        .entry(octet)
                        .or_insert_with(|| Arc::new(TrieNode::default())),
                )
            };
            node = child;
        }

        let mut leaf = node.write();
        leaf.device = device.to_string();
        if redirect.is_some() {
            leaf.redirect = redirect;
        }
    }

    /// One line per leaf: `<octets> -> <redirect> on dev <device>`
    pub fn dump(&self) -> String {
        let mut out = String::new();
        Self::dump_node(&self.root, "", &mut out);
        out
    }

    fn dump_node(node: &TrieNode, path: &str, out: &mut String) {
        let state = node.read();

        if state.children.is_empty() {
            let redirect = state.redirect.map(|ip| ip.to_string()).unwrap_or_default();
            let _ = writeln!(out, "{} -> {} on dev {}", path, redirect, state.device);
            return;
        }

        for (octet, child) in &state.children {
            let child_path = if path.is_empty() {
                octet.to_string()
            } else {
                format!("{}.{}", path, octet)
            };
            Self::dump_node(child, &child_path, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    fn ip(a: u8, b: u8, c: u8, d: u8) -> Ipv4Addr {
        Ipv4Addr::new(a, b, c, d)
    }

    #[test]
    fn test_empty_trie() {
        let trie = AddressTrie::new();
        let m = trie.find_prefix(ip(1, 2, 3, 4));
        assert_eq!(m.depth, 0);
        assert_eq!(trie.device_for(ip(1, 2, 3, 4)), "");
        assert_eq!(trie.device_for_exact(ip(1, 2, 3, 4)), None);
        assert_eq!(trie.redirect_for(ip(1, 2, 3, 4)), ip(1, 2, 3, 4));
        assert_eq!(trie.dump(), " ->  on dev \n");
    }

    #[test]
    fn test_learned_refines_one_octet_per_insert() {
        let trie = AddressTrie::new();
        let host = ip(192, 168, 178, 1);

        for expected_depth in 1..=FULL_DEPTH {
            trie.insert_learned(host, "eth0");
            assert_eq!(trie.find_prefix(host).depth, expected_depth);
        }

        // fully specified: further inserts change nothing
        trie.insert_learned(host, "wlan0");
        assert_eq!(trie.device_for_exact(host).as_deref(), Some("eth0"));
    }

    #[test]
    fn test_first_contact_covers_whole_block() {
        let trie = AddressTrie::new();
        trie.insert_learned(ip(172, 17, 0, 1), "tap0");

        assert_eq!(trie.find_prefix(ip(172, 99, 1, 1)).depth, 1);
        assert_eq!(trie.device_for(ip(172, 99, 1, 1)), "tap0");
        assert_eq!(trie.device_for_exact(ip(172, 17, 0, 1)), None);
        assert_eq!(trie.device_for(ip(10, 20, 0, 1)), "");
    }

    #[test]
    fn test_learned_siblings_extend_shared_prefix() {
        let trie = AddressTrie::new();
        for last in 1..=5 {
            trie.insert_learned(ip(192, 168, 178, last), "eth0");
        }

        // 192 / 192.168 / 192.168.178 / 192.168.178.4 / 192.168.178.5
        assert_eq!(trie.find_prefix(ip(192, 168, 178, 3)).depth, 3);
        assert_eq!(trie.find_prefix(ip(192, 168, 178, 4)).depth, 4);
        assert_eq!(trie.device_for_exact(ip(192, 168, 178, 5)).as_deref(), Some("eth0"));
        assert_eq!(trie.device_for(ip(192, 188, 178, 3)), "eth0");
    }

    #[test]
    fn test_longest_prefix_wins() {
        let trie = AddressTrie::new();
        let host = ip(10, 1, 2, 3);
        trie.insert_learned(host, "wlan0");
        trie.insert_learned(host, "eth0");

        // 10 -> wlan0, 10.1 -> eth0
        assert_eq!(trie.device_for(ip(10, 1, 9, 9)), "eth0");
        assert_eq!(trie.device_for(ip(10, 2, 9, 9)), "wlan0");
    }

    #[test]
    fn test_fixed_is_host_exact() {
        let trie = AddressTrie::new();
        trie.insert_fixed(ip(10, 17, 0, 1), "tener", None);
        trie.insert_fixed(ip(10, 17, 0, 2), "tener2", None);

        assert_eq!(trie.device_for_exact(ip(10, 17, 0, 1)).as_deref(), Some("tener"));
        assert_eq!(trie.device_for_exact(ip(10, 17, 0, 2)).as_deref(), Some("tener2"));
        assert_eq!(trie.device_for_exact(ip(10, 17, 0, 3)), None);
        // intermediate levels carry no device of their own
        assert_eq!(trie.device_for(ip(10, 17, 0, 5)), "");
    }

    #[test]
    fn test_fixed_descends_past_learned_prefix() {
        let trie = AddressTrie::new();
        trie.insert_learned(ip(10, 9, 9, 9), "wlan0");
        trie.insert_fixed(ip(10, 17, 0, 1), "tener", None);

        assert_eq!(trie.device_for(ip(10, 99, 0, 1)), "wlan0");
        assert_eq!(trie.device_for_exact(ip(10, 17, 0, 1)).as_deref(), Some("tener"));

        // learned traffic to the fixed host does not override it
        trie.insert_learned(ip(10, 17, 0, 1), "wlan0");
        assert_eq!(trie.device_for_exact(ip(10, 17, 0, 1)).as_deref(), Some("tener"));
    }

    #[test]
    fn test_redirect_only_on_exact_match() {
        let trie = AddressTrie::new();
        let target = ip(127, 0, 0, 1);
        trie.insert_fixed(ip(93, 184, 216, 34), "", Some(target));

        assert_eq!(trie.redirect_for(ip(93, 184, 216, 34)), target);
        assert_eq!(trie.redirect_for(ip(93, 184, 216, 35)), ip(93, 184, 216, 35));
        assert_eq!(trie.redirect_for(ip(93, 184, 0, 0)), ip(93, 184, 0, 0));
        // a redirect leaf pins no device
        assert_eq!(trie.device_for_exact(ip(93, 184, 216, 34)), None);
    }

    #[test]
    fn test_learned_never_sets_redirect() {
        let trie = AddressTrie::new();
        let host = ip(8, 8, 8, 8);
        for _ in 0..FULL_DEPTH {
            trie.insert_learned(host, "eth0");
        }
        assert_eq!(trie.find_prefix(host).redirect, None);
        assert_eq!(trie.redirect_for(host), host);
    }

    #[test]
    fn test_redirect_rule_clears_fixed_device() {
        let trie = AddressTrie::new();
        let host = ip(10, 0, 0, 7);
        trie.insert_fixed(host, "tun0", None);
        trie.insert_fixed(host, "", Some(ip(127, 0, 0, 1)));

        let m = trie.find_prefix(host);
        assert_eq!(m.device, "");
        assert_eq!(m.redirect, Some(ip(127, 0, 0, 1)));
        assert_eq!(trie.device_for_exact(host), None);
        assert_eq!(trie.dump(), "10.0.0.7 -> 127.0.0.1 on dev \n");
    }

    #[test]
    fn test_fixed_device_keeps_existing_redirect() {
        let trie = AddressTrie::new();
        let host = ip(10, 0, 0, 7);
        trie.insert_fixed(host, "", Some(ip(127, 0, 0, 1)));
        trie.insert_fixed(host, "tun0", None);

        let m = trie.find_prefix(host);
        assert_eq!(m.device, "tun0");
        assert_eq!(m.redirect, Some(ip(127, 0, 0, 1)));
    }

    #[test]
    fn test_dump_lists_each_leaf_once() {
        let trie = AddressTrie::new();
        trie.insert_learned(ip(172, 17, 0, 1), "tap0");
        trie.insert_fixed(ip(10, 17, 0, 1), "tener", None);
        trie.insert_fixed(ip(10, 17, 0, 2), "", Some(ip(127, 0, 0, 1)));

        let dump = trie.dump();
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(
            lines,
            vec![
                "10.17.0.1 ->  on dev tener",
                "10.17.0.2 -> 127.0.0.1 on dev ",
                "172 ->  on dev tap0",
            ]
        );
    }

    #[test]
    fn test_concurrent_inserts_and_lookups() {
        let trie = AddressTrie::new();

        thread::scope(|s| {
            for t in 0..8u8 {
                let trie = &trie;
                s.spawn(move || {
                    for i in 0..200u8 {
                        let host = ip(10, t, i, i.wrapping_mul(7));
                        trie.insert_learned(host, "eth0");
                        trie.insert_fixed(ip(192, 168, t, i), "tun0", None);
                        let _ = trie.device_for(host);
                        let _ = trie.redirect_for(host);
                    }
                });
            }
            let trie = &trie;
            s.spawn(move || {
                for _ in 0..50 {
                    let _ = trie.dump();
                }
            });
        });

        for t in 0..8u8 {
            for i in 0..200u8 {
                assert_eq!(
                    trie.device_for_exact(ip(192, 168, t, i)).as_deref(),
                    Some("tun0")
                );
            }
        }
        assert_eq!(trie.device_for(ip(10, 3, 3, 3)), "eth0");

        let dump = trie.dump();
        let leaves: HashSet<&str> = dump.lines().collect();
        assert_eq!(leaves.len(), dump.lines().count());
    }
}
