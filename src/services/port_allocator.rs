//! UDP destination allocation
//!
//! Scans upward from the requested (or default) port until it finds an
//! `(ip, port)` pair no other active relay job holds. The scan is bounded by
//! the configured ceiling; exhausting it is an error, not an infinite loop.

use crate::config::UdpConfig;
use crate::errors::{RelayError, RelayResult};
use crate::models::RelayDestination;

#[derive(Debug, Clone)]
pub struct PortAllocator {
    default_ip: String,
    default_port: u16,
    max_port: u16,
}

impl PortAllocator {
    pub fn new(udp: &UdpConfig) -> Self {
        Self {
            default_ip: udp.default_ip.clone(),
            default_port: udp.default_port,
            max_port: udp.max_port,
        }
    }

    /// Allocate a destination, avoiding every pair in `in_use`
    pub fn allocate(
        &self,
        requested_ip: Option<&str>,
        requested_port: Option<u16>,
        in_use: &[RelayDestination],
    ) -> RelayResult<RelayDestination> {
        let ip = requested_ip.unwrap_or(&self.default_ip).to_string();
        let base = requested_port.unwrap_or(self.default_port);

        let mut port = base as u32;
        while port <= self.max_port as u32 {
            let candidate = RelayDestination {
                ip: ip.clone(),
                port: port as u16,
            };
            if !in_use.contains(&candidate) {
                return Ok(candidate);
            }
            port += 1;
        }
        Err(RelayError::PortRangeExhausted { ip, base })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocator() -> PortAllocator {
        PortAllocator::new(&UdpConfig::default())
    }

    fn dest(ip: &str, port: u16) -> RelayDestination {
        RelayDestination {
            ip: ip.to_string(),
            port,
        }
    }

    #[test]
    fn defaults_apply_when_nothing_requested() {
        let d = allocator().allocate(None, None, &[]).unwrap();
        assert_eq!(d.ip, "239.255.0.1");
        assert_eq!(d.port, 1234);
    }

    #[test]
    fn occupied_ports_are_skipped() {
        let in_use = vec![dest("239.255.0.1", 1234), dest("239.255.0.1", 1235)];
        let d = allocator().allocate(None, None, &in_use).unwrap();
        assert_eq!(d.port, 1236);
    }

    #[test]
    fn same_port_on_another_ip_does_not_collide() {
        let in_use = vec![dest("239.255.0.2", 1234)];
        let d = allocator().allocate(None, None, &in_use).unwrap();
        assert_eq!(d.port, 1234);
    }

    #[test]
    fn sequential_allocations_get_distinct_ports() {
        let alloc = allocator();
        let mut in_use = Vec::new();
        for expected in 1234..1238 {
            let d = alloc.allocate(None, None, &in_use).unwrap();
            assert_eq!(d.port, expected);
            in_use.push(d);
        }
    }

    #[test]
    fn exhaustion_is_an_error() {
        let udp = UdpConfig {
            default_port: 65533,
            ..UdpConfig::default()
        };
        let alloc = PortAllocator::new(&udp);
        let in_use: Vec<_> = (65533..=65535).map(|p| dest("239.255.0.1", p)).collect();
        match alloc.allocate(None, None, &in_use) {
            Err(RelayError::PortRangeExhausted { ip, base }) => {
                assert_eq!(ip, "239.255.0.1");
                assert_eq!(base, 65533);
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[test]
    fn configured_ceiling_is_honored() {
        let udp = UdpConfig {
            default_port: 5000,
            max_port: 5001,
            ..UdpConfig::default()
        };
        let alloc = PortAllocator::new(&udp);
        let in_use = vec![dest("239.255.0.1", 5000), dest("239.255.0.1", 5001)];
        assert!(matches!(
            alloc.allocate(None, None, &in_use),
            Err(RelayError::PortRangeExhausted { .. })
        ));
    }
}
