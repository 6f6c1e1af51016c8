//! Platform network handles and the events reported about them

use serde::Serialize;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

/// Opaque handle for one network as reported by the platform
///
/// Handles are created by a connectivity source and compared by identity
/// only. On NetworkManager the handle wraps the device's D-Bus object path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NetworkHandle(Arc<str>);

impl NetworkHandle {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NetworkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Addresses and related configuration currently bound to a network
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkProperties {
    /// Interface name (e.g., "tun0", "wlan0"), when the platform knows it
    pub interface: Option<String>,

    /// Assigned link addresses, in no particular order
    pub addresses: Vec<IpAddr>,
}

impl LinkProperties {
    pub fn new(addresses: Vec<IpAddr>) -> Self {
        Self {
            interface: None,
            addresses,
        }
    }

    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    pub fn contains(&self, address: IpAddr) -> bool {
        self.addresses.contains(&address)
    }
}

/// Events representing network state changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    /// The address set of a network changed, including right after it
    /// became usable
    LinkPropertiesChanged {
        network: NetworkHandle,
        properties: LinkProperties,
    },

    /// The platform tore the network down
    Lost { network: NetworkHandle },
}

impl NetworkEvent {
    pub fn network(&self) -> &NetworkHandle {
        match self {
            NetworkEvent::LinkPropertiesChanged { network, .. } => network,
            NetworkEvent::Lost { network } => network,
        }
    }
}

/// Point-in-time view of one network, used for listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkSnapshot {
    pub network: String,
    #[serde(flatten)]
    pub properties: LinkProperties,
}
