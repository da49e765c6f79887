// Routes module - kernel route table parsing and default-route device discovery

pub mod merge;
pub mod parser;
pub mod snapshot;

use std::net::Ipv4Addr;

/// Interface that never carries outbound traffic
pub const LOOPBACK_DEVICE: &str = "lo";

/// One row of the kernel IPv4 route table. Only lives for a parse pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub interface: String,
    pub destination: Ipv4Addr,
    pub gateway: Ipv4Addr,
}

impl Route {
    pub fn is_default(&self) -> bool {
        self.destination == Ipv4Addr::UNSPECIFIED
    }
}

/// Interfaces holding a default route, loopback excluded, in table order
pub fn default_route_devices(routes: &[Route]) -> Vec<String> {
    let mut devices: Vec<String> = Vec::new();
    for route in routes {
        if !route.is_default() || route.interface == LOOPBACK_DEVICE {
            continue;
        }
        tracing::trace!("Default route via {} on dev {}", route.gateway, route.interface);
        if !devices.contains(&route.interface) {
            devices.push(route.interface.clone());
        }
    }
    devices
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(interface: &str, destination: [u8; 4]) -> Route {
        Route {
            interface: interface.to_string(),
            destination: Ipv4Addr::from(destination),
            gateway: Ipv4Addr::UNSPECIFIED,
        }
    }

    #[test]
    fn test_default_route_devices() {
        let routes = vec![
            route("eth0", [0, 0, 0, 0]),
            route("eth0", [192, 168, 0, 0]),
            route("lo", [0, 0, 0, 0]),
            route("wlan0", [0, 0, 0, 0]),
            route("tun0", [10, 8, 0, 0]),
            route("eth0", [0, 0, 0, 0]),
        ];
        assert_eq!(default_route_devices(&routes), vec!["eth0", "wlan0"]);
    }
}
