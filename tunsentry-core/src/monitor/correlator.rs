//! Tunnel network correlation and disconnect signaling
//!
//! The platform hands out opaque network handles and offers no way to ask
//! which one is the VPN, so the tunnel's network is identified by carrying
//! both of the tunnel's addresses at once. When that network is lost the
//! tunnel is torn down.

use crate::monitor::network::{LinkProperties, NetworkHandle};
use crate::monitor::observer::NetworkCallback;
use crate::monitor::tunnel::TunnelService;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tracing::{debug, info};

/// Watches network events on behalf of one tunnel session
///
/// Build one per session and drop it when the session ends. After it has
/// torn the tunnel down it ignores every further event.
pub struct DisconnectMonitor<T> {
    tunnel: T,
    matched: Option<NetworkHandle>,
    // Latest link properties of each live network, for re-checking once
    // the tunnel gets its addresses.
    seen: HashMap<NetworkHandle, LinkProperties>,
    finished: bool,
}

impl<T: TunnelService> DisconnectMonitor<T> {
    pub fn new(tunnel: T) -> Self {
        Self {
            tunnel,
            matched: None,
            seen: HashMap::new(),
            finished: false,
        }
    }

    /// The network currently believed to carry the tunnel
    pub fn matched(&self) -> Option<&NetworkHandle> {
        self.matched.as_ref()
    }

    /// Whether teardown has already been requested for this session
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn tunnel(&self) -> &T {
        &self.tunnel
    }

    fn tunnel_addresses(&self) -> Option<(Ipv4Addr, Ipv6Addr)> {
        Some((self.tunnel.current_ipv4()?, self.tunnel.current_ipv6()?))
    }

    fn try_match(&mut self, network: &NetworkHandle, properties: &LinkProperties) -> bool {
        let Some((v4, v6)) = self.tunnel_addresses() else {
            return false;
        };

        if !(properties.contains(IpAddr::V4(v4)) && properties.contains(IpAddr::V6(v6))) {
            return false;
        }

        if self.matched.as_ref() != Some(network) {
            match &self.matched {
                Some(previous) => info!(
                    "Tunnel network moved from {} to {} ({} / {})",
                    previous, network, v4, v6
                ),
                None => info!("Matched tunnel network {} ({} / {})", network, v4, v6),
            }
        }
        self.matched = Some(network.clone());
        true
    }
}

impl<T: TunnelService> NetworkCallback for DisconnectMonitor<T> {
    fn on_link_properties_changed(&mut self, network: &NetworkHandle, properties: &LinkProperties) {
        if self.finished {
            debug!("Ignoring link change on {} after teardown", network);
            return;
        }

        self.seen.insert(network.clone(), properties.clone());

        if !self.try_match(network, properties) {
            debug!(
                "Network {} does not carry the tunnel addresses ({} addresses)",
                network,
                properties.addresses.len()
            );
        }
    }

    fn on_lost(&mut self, network: &NetworkHandle) {
        self.seen.remove(network);

        if self.finished || self.matched.as_ref() != Some(network) {
            debug!("Ignoring loss of unrelated network {}", network);
            return;
        }

        info!("Tunnel network {} lost, tearing the tunnel down", network);
        self.matched = None;
        self.finished = true;
        self.tunnel.disconnect();
    }

    fn on_tunnel_addressed(&mut self) {
        if self.finished {
            return;
        }
        let Some((v4, v6)) = self.tunnel_addresses() else {
            return;
        };

        let carries_tunnel =
            |p: &LinkProperties| p.contains(IpAddr::V4(v4)) && p.contains(IpAddr::V6(v6));

        // The latest live match stays authoritative while it still fits.
        if let Some(current) = &self.matched {
            if self.seen.get(current).is_some_and(carries_tunnel) {
                return;
            }
        }

        let mut candidates = self.seen.iter().filter(|(_, p)| carries_tunnel(p));
        let Some((network, properties)) = candidates.next() else {
            return;
        };
        if candidates.next().is_some() {
            debug!("Several networks carry the tunnel addresses, waiting for a live event");
            return;
        }

        let (network, properties) = (network.clone(), properties.clone());
        self.try_match(&network, &properties);
    }

    fn is_finished(&self) -> bool {
        self.finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    #[derive(Default, Clone)]
    struct FakeTunnel {
        v4: Rc<Cell<Option<Ipv4Addr>>>,
        v6: Rc<Cell<Option<Ipv6Addr>>>,
        disconnects: Rc<RefCell<u32>>,
    }

    impl FakeTunnel {
        fn addressed() -> Self {
            let tunnel = Self::default();
            tunnel.v4.set(Some("10.0.0.2".parse().unwrap()));
            tunnel.v6.set(Some("fd00::2".parse().unwrap()));
            tunnel
        }

        fn disconnects(&self) -> u32 {
            *self.disconnects.borrow()
        }
    }

    impl TunnelService for FakeTunnel {
        fn current_ipv4(&self) -> Option<Ipv4Addr> {
            self.v4.get()
        }

        fn current_ipv6(&self) -> Option<Ipv6Addr> {
            self.v6.get()
        }

        fn disconnect(&self) {
            *self.disconnects.borrow_mut() += 1;
        }
    }

    fn props(addresses: &[&str]) -> LinkProperties {
        LinkProperties::new(addresses.iter().map(|a| a.parse().unwrap()).collect())
    }

    #[test]
    fn test_matches_network_with_both_addresses() {
        let tunnel = FakeTunnel::addressed();
        let mut monitor = DisconnectMonitor::new(tunnel.clone());
        let n1 = NetworkHandle::new("n1");

        monitor.on_link_properties_changed(&n1, &props(&["10.0.0.2", "fd00::2", "fe80::1"]));

        assert_eq!(monitor.matched(), Some(&n1));
        assert_eq!(tunnel.disconnects(), 0);
    }

    #[test]
    fn test_single_family_never_matches() {
        let mut monitor = DisconnectMonitor::new(FakeTunnel::addressed());
        let n1 = NetworkHandle::new("n1");

        monitor.on_link_properties_changed(&n1, &props(&["10.0.0.2"]));
        assert_eq!(monitor.matched(), None);

        monitor.on_link_properties_changed(&n1, &props(&["fd00::2", "192.168.1.5"]));
        assert_eq!(monitor.matched(), None);
    }

    #[test]
    fn test_non_matching_event_keeps_match() {
        let mut monitor = DisconnectMonitor::new(FakeTunnel::addressed());
        let n1 = NetworkHandle::new("n1");
        let n2 = NetworkHandle::new("n2");

        monitor.on_link_properties_changed(&n1, &props(&["10.0.0.2", "fd00::2"]));
        monitor.on_link_properties_changed(&n2, &props(&["192.168.1.5"]));
        monitor.on_link_properties_changed(&n1, &props(&["10.0.0.2"]));

        assert_eq!(monitor.matched(), Some(&n1));
    }

    #[test]
    fn test_late_addressing_rechecks_seen_networks() {
        let tunnel = FakeTunnel::default();
        let mut monitor = DisconnectMonitor::new(tunnel.clone());
        let n1 = NetworkHandle::new("n1");
        let wifi = NetworkHandle::new("wifi");

        monitor.on_link_properties_changed(&wifi, &props(&["192.168.1.5", "fe80::1"]));
        monitor.on_link_properties_changed(&n1, &props(&["10.0.0.2", "fd00::2"]));
        assert_eq!(monitor.matched(), None);

        tunnel.v4.set(Some("10.0.0.2".parse().unwrap()));
        monitor.on_tunnel_addressed();
        assert_eq!(monitor.matched(), None);

        tunnel.v6.set(Some("fd00::2".parse().unwrap()));
        monitor.on_tunnel_addressed();
        assert_eq!(monitor.matched(), Some(&n1));
    }

    #[test]
    fn test_lost_networks_are_not_rechecked() {
        let tunnel = FakeTunnel::default();
        let mut monitor = DisconnectMonitor::new(tunnel.clone());
        let n1 = NetworkHandle::new("n1");

        monitor.on_link_properties_changed(&n1, &props(&["10.0.0.2", "fd00::2"]));
        monitor.on_lost(&n1);

        tunnel.v4.set(Some("10.0.0.2".parse().unwrap()));
        tunnel.v6.set(Some("fd00::2".parse().unwrap()));
        monitor.on_tunnel_addressed();

        assert_eq!(monitor.matched(), None);
        assert_eq!(tunnel.disconnects(), 0);
    }

    #[test]
    fn test_readdressing_keeps_latest_match() {
        let tunnel = FakeTunnel::addressed();
        let mut monitor = DisconnectMonitor::new(tunnel.clone());
        let stale = NetworkHandle::new("stale");
        let current = NetworkHandle::new("current");

        monitor.on_link_properties_changed(&stale, &props(&["10.0.0.2", "fd00::2"]));
        monitor.on_link_properties_changed(&current, &props(&["10.0.0.2", "fd00::2"]));

        for _ in 0..50 {
            monitor.on_tunnel_addressed();
            assert_eq!(monitor.matched(), Some(&current));
        }

        monitor.on_lost(&current);
        assert_eq!(tunnel.disconnects(), 1);
    }

    #[test]
    fn test_late_addressing_skips_ambiguous_networks() {
        let tunnel = FakeTunnel::default();
        let mut monitor = DisconnectMonitor::new(tunnel.clone());
        let a = NetworkHandle::new("a");
        let b = NetworkHandle::new("b");

        monitor.on_link_properties_changed(&a, &props(&["10.0.0.2", "fd00::2"]));
        monitor.on_link_properties_changed(&b, &props(&["10.0.0.2", "fd00::2"]));

        tunnel.v4.set(Some("10.0.0.2".parse().unwrap()));
        tunnel.v6.set(Some("fd00::2".parse().unwrap()));
        monitor.on_tunnel_addressed();
        assert_eq!(monitor.matched(), None);

        // A live event settles it
        monitor.on_link_properties_changed(&b, &props(&["10.0.0.2", "fd00::2"]));
        assert_eq!(monitor.matched(), Some(&b));
    }

    #[test]
    fn test_readdressing_moves_off_network_that_lost_addresses() {
        let tunnel = FakeTunnel::addressed();
        let mut monitor = DisconnectMonitor::new(tunnel.clone());
        let n1 = NetworkHandle::new("n1");
        let n2 = NetworkHandle::new("n2");

        monitor.on_link_properties_changed(&n1, &props(&["10.0.0.2", "fd00::2"]));
        monitor.on_link_properties_changed(&n2, &props(&["10.0.0.3", "fd00::3"]));

        tunnel.v4.set(Some("10.0.0.3".parse().unwrap()));
        tunnel.v6.set(Some("fd00::3".parse().unwrap()));
        monitor.on_tunnel_addressed();

        assert_eq!(monitor.matched(), Some(&n2));
    }

    #[test]
    fn test_events_after_teardown_are_ignored() {
        let tunnel = FakeTunnel::addressed();
        let mut monitor = DisconnectMonitor::new(tunnel.clone());
        let n1 = NetworkHandle::new("n1");

        monitor.on_link_properties_changed(&n1, &props(&["10.0.0.2", "fd00::2"]));
        monitor.on_lost(&n1);
        assert!(monitor.is_finished());

        monitor.on_link_properties_changed(&n1, &props(&["10.0.0.2", "fd00::2"]));
        monitor.on_lost(&n1);

        assert_eq!(monitor.matched(), None);
        assert_eq!(tunnel.disconnects(), 1);
    }
}
