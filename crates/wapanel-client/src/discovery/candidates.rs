use std::collections::HashSet;
use wapanel_core::config::DiscoveryConfig;

/// Ordered, de-duplicated list of ports to probe.
///
/// The preferred port comes first, then its neighbours nearest-first within
/// the configured window, then the base range, then the legacy ranges.
/// Ports outside `1..=65535` are skipped.
pub fn candidate_ports(preferred: Option<u16>, config: &DiscoveryConfig) -> Vec<u16> {
    let mut ports = Vec::new();
    let mut seen = HashSet::new();

    if let Some(p) = preferred {
        let p = i64::from(p);
        push(&mut ports, &mut seen, p);
        for offset in 1..=i64::from(config.window) {
            push(&mut ports, &mut seen, p - offset);
            push(&mut ports, &mut seen, p + offset);
        }
    }

    let base = i64::from(config.base_port);
    for port in base..=base + i64::from(config.base_range) {
        push(&mut ports, &mut seen, port);
    }

    for [a, b] in &config.legacy_ranges {
        let (start, end) = (i64::from(*a.min(b)), i64::from(*a.max(b)));
        for port in start..=end {
            push(&mut ports, &mut seen, port);
        }
    }

    ports
}

fn push(ports: &mut Vec<u16>, seen: &mut HashSet<u16>, port: i64) {
    let Ok(port) = u16::try_from(port) else {
        return;
    };
    if port != 0 && seen.insert(port) {
        ports.push(port);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base_port: u16, base_range: u16, legacy: Vec<[u16; 2]>) -> DiscoveryConfig {
        DiscoveryConfig {
            base_port,
            base_range,
            legacy_ranges: legacy,
            ..Default::default()
        }
    }

    #[test]
    fn test_preferred_and_window_first() {
        let ports = candidate_ports(Some(3005), &config(3001, 3, vec![]));
        assert_eq!(ports, vec![3005, 3004, 3006, 3003, 3007, 3001, 3002]);
    }

    #[test]
    fn test_no_preferred_starts_at_base() {
        let ports = candidate_ports(None, &config(3001, 2, vec![[5000, 5001]]));
        assert_eq!(ports, vec![3001, 3002, 3003, 5000, 5001]);
    }

    #[test]
    fn test_no_duplicates() {
        let ports = candidate_ports(Some(3001), &config(3001, 4, vec![[3003, 3006]]));
        let unique: HashSet<_> = ports.iter().collect();
        assert_eq!(unique.len(), ports.len());
        assert_eq!(ports[0], 3001);
        assert!(ports.contains(&3006));
    }

    #[test]
    fn test_default_config_covers_every_range() {
        let ports = candidate_ports(Some(4100), &DiscoveryConfig::default());

        assert_eq!(&ports[..5], &[4100, 4099, 4101, 4098, 4102]);
        for port in (3001..=3021).chain(5000..=5010) {
            assert!(ports.contains(&port), "missing {port}");
        }
        let unique: HashSet<_> = ports.iter().collect();
        assert_eq!(unique.len(), ports.len());
        assert_eq!(ports.len(), 5 + 21 + 11);
    }

    #[test]
    fn test_skips_out_of_range_ports() {
        let ports = candidate_ports(Some(1), &config(65534, 5, vec![]));
        assert_eq!(ports, vec![1, 2, 3, 65534, 65535]);
    }

    #[test]
    fn test_reversed_legacy_range() {
        let ports = candidate_ports(None, &config(3001, 0, vec![[5002, 5000]]));
        assert_eq!(ports, vec![3001, 5000, 5001, 5002]);
    }
}
