// Parser for the Linux /proc/net/route table
//
// Layout: one header line, then whitespace separated columns per route.
// Column 1 is the interface, columns 2 and 3 the destination and gateway
// as 8 hex digits with the least significant address byte first.

use std::net::Ipv4Addr;
use std::path::Path;

use super::{Route, default_route_devices};
use crate::error::{RouterError, RouterResult};

pub const PROC_NET_ROUTE: &str = "/proc/net/route";

/// Decode a little-endian hex address such as `0100A8C0` (192.168.0.1)
pub fn parse_hex_ipv4(hex: &str) -> Option<Ipv4Addr> {
    if hex.len() != 8 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let raw = u32::from_str_radix(hex, 16).ok()?;
    Some(Ipv4Addr::from(raw.swap_bytes()))
}

fn parse_route_line(line: &str) -> Option<Route> {
    let mut columns = line.split_whitespace();
    let interface = columns.next()?.to_string();
    let destination = parse_hex_ipv4(columns.next()?)?;
    let gateway = parse_hex_ipv4(columns.next()?)?;

    Some(Route {
        interface,
        destination,
        gateway,
    })
}

/// Parse the full table text. Malformed lines are logged and skipped; the
/// table only fails as a whole when nothing usable is left.
pub fn parse_route_table(contents: &str) -> RouterResult<Vec<Route>> {
    let mut routes = Vec::new();

    for (index, line) in contents.lines().enumerate().skip(1) {
        if line.trim().is_empty() {
            continue;
        }
        match parse_route_line(line) {
            Some(route) => routes.push(route),
            None => tracing::warn!("Skipping malformed route table line {}: {:?}", index + 1, line),
        }
    }

    if routes.is_empty() {
        return Err(RouterError::NoUsableRoutes);
    }
    Ok(routes)
}

pub fn read_route_table(path: &Path) -> RouterResult<Vec<Route>> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        RouterError::RouteTableParse(format!("cannot read {}: {}", path.display(), e))
    })?;
    parse_route_table(&contents)
}

/// Read the table at `path` and return its default-route interfaces
pub fn discover_default_route_devices(path: &Path) -> RouterResult<Vec<String>> {
    let routes = read_route_table(path)?;
    Ok(default_route_devices(&routes))
}
