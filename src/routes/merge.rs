// Merge discovered default-route devices with the operator's preference list

use std::collections::HashSet;

/// Preference token standing for every discovered device not named elsewhere
pub const WILDCARD: &str = "*";

/// Order `discovered` by `preferred`.
///
/// Named devices come out in preference order when they were discovered;
/// names that were not discovered are skipped. The wildcard expands in place
/// to the remaining discovered devices not named anywhere in `preferred`, in
/// discovery order. Discovered devices that are neither named nor covered by
/// a wildcard are dropped. With no preferences at all, the discovered list is
/// used as is.
pub fn merge_devices(discovered: &[String], preferred: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = Vec::new();

    if preferred.is_empty() {
        for device in discovered {
            if !merged.contains(device) {
                merged.push(device.clone());
            }
        }
        return merged;
    }

    let named: HashSet<&str> = preferred
        .iter()
        .map(String::as_str)
        .filter(|device| *device != WILDCARD)
        .collect();
    let mut emitted: HashSet<&str> = HashSet::new();

    for preference in preferred {
        if preference == WILDCARD {
            for device in discovered {
                if !named.contains(device.as_str()) && emitted.insert(device.as_str()) {
                    merged.push(device.clone());
                }
            }
        } else if discovered.contains(preference) && emitted.insert(preference.as_str()) {
            merged.push(preference.clone());
        }
    }

    merged
}
