//! Tunnel service capability
//!
//! The correlator only ever reads the tunnel's current addresses and asks
//! for teardown; everything else about the tunnel belongs to its owner.

use crate::monitor::teardown::TeardownAction;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

/// What the correlator needs from the service owning the tunnel
pub trait TunnelService {
    /// IPv4 address currently assigned to the tunnel, if any
    fn current_ipv4(&self) -> Option<Ipv4Addr>;

    /// IPv6 address currently assigned to the tunnel, if any
    fn current_ipv6(&self) -> Option<Ipv6Addr>;

    /// Tear the tunnel down. Must return quickly.
    fn disconnect(&self);
}

/// Addresses assigned to the tunnel interface
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TunnelAddresses {
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
}

impl TunnelAddresses {
    pub fn new(ipv4: Ipv4Addr, ipv6: Ipv6Addr) -> Self {
        Self {
            ipv4: Some(ipv4),
            ipv6: Some(ipv6),
        }
    }

    /// Both address families are assigned
    pub fn is_complete(&self) -> bool {
        self.ipv4.is_some() && self.ipv6.is_some()
    }
}

impl std::fmt::Display for TunnelAddresses {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let v4 = self.ipv4.map(|a| a.to_string());
        let v6 = self.ipv6.map(|a| a.to_string());
        write!(
            f,
            "{} / {}",
            v4.as_deref().unwrap_or("-"),
            v6.as_deref().unwrap_or("-")
        )
    }
}

/// Thread-safe handle to a tunnel's addresses and teardown actions
///
/// Clones share the same state. Address updates are published on a watch
/// channel so an active registration can re-check networks it has already
/// seen.
#[derive(Debug, Clone)]
pub struct TunnelHandle {
    addresses: Arc<watch::Sender<TunnelAddresses>>,
    teardown: Arc<Vec<TeardownAction>>,
}

impl TunnelHandle {
    /// Create a handle with no addresses assigned yet
    pub fn new(teardown: Vec<TeardownAction>) -> Self {
        let (tx, _rx) = watch::channel(TunnelAddresses::default());
        Self {
            addresses: Arc::new(tx),
            teardown: Arc::new(teardown),
        }
    }

    /// Create a handle whose tunnel is already addressed
    pub fn with_addresses(addresses: TunnelAddresses, teardown: Vec<TeardownAction>) -> Self {
        let handle = Self::new(teardown);
        handle.set_addresses(addresses);
        handle
    }

    /// Get the current addresses
    pub fn addresses(&self) -> TunnelAddresses {
        *self.addresses.borrow()
    }

    /// Replace the tunnel addresses and notify subscribers
    pub fn set_addresses(&self, addresses: TunnelAddresses) {
        self.addresses.send_replace(addresses);
    }

    /// Forget the tunnel addresses (tunnel going down or restarting)
    pub fn clear_addresses(&self) {
        self.set_addresses(TunnelAddresses::default());
    }

    /// Receive address updates
    pub fn subscribe(&self) -> watch::Receiver<TunnelAddresses> {
        self.addresses.subscribe()
    }
}

impl TunnelService for TunnelHandle {
    fn current_ipv4(&self) -> Option<Ipv4Addr> {
        self.addresses.borrow().ipv4
    }

    fn current_ipv6(&self) -> Option<Ipv6Addr> {
        self.addresses.borrow().ipv6
    }

    fn disconnect(&self) {
        for action in self.teardown.iter() {
            // A failing action is not retried; the remaining ones still run.
            match action.run() {
                Ok(()) => info!("Teardown action succeeded: {}", action),
                Err(e) => error!("Teardown action failed ({}): {}", action, e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_addresses_start_empty() {
        let handle = TunnelHandle::new(vec![]);

        assert_eq!(handle.current_ipv4(), None);
        assert_eq!(handle.current_ipv6(), None);
        assert!(!handle.addresses().is_complete());
    }

    #[test]
    fn test_clones_share_addresses() {
        let handle = TunnelHandle::new(vec![]);
        let clone = handle.clone();

        clone.set_addresses(TunnelAddresses::new(
            "10.0.0.2".parse().unwrap(),
            "fd00::2".parse().unwrap(),
        ));

        assert_eq!(handle.current_ipv4(), Some("10.0.0.2".parse().unwrap()));
        assert_eq!(handle.current_ipv6(), Some("fd00::2".parse().unwrap()));

        handle.clear_addresses();
        assert_eq!(clone.addresses(), TunnelAddresses::default());
    }

    #[test]
    fn test_subscribers_see_updates() {
        let handle = TunnelHandle::new(vec![]);
        let mut rx = handle.subscribe();
        assert!(!rx.has_changed().unwrap());

        handle.set_addresses(TunnelAddresses {
            ipv4: Some("10.0.0.2".parse().unwrap()),
            ipv6: None,
        });

        assert!(rx.has_changed().unwrap());
        assert!(!rx.borrow_and_update().is_complete());
    }

    #[test]
    fn test_disconnect_runs_every_action() {
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let handle = TunnelHandle::new(vec![
            TeardownAction::Notify(tx1),
            TeardownAction::Command(vec![]),
            TeardownAction::Notify(tx2),
        ]);

        handle.disconnect();

        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn test_display() {
        let partial = TunnelAddresses {
            ipv4: Some("10.0.0.2".parse().unwrap()),
            ipv6: None,
        };
        assert_eq!(partial.to_string(), "10.0.0.2 / -");
    }
}
