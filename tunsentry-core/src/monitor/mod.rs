//! Tunnel disconnect detection
//!
//! Observes platform network changes, works out which network carries the
//! tunnel and tears the tunnel down when that network goes away.

pub mod correlator;
pub mod network;
pub mod observer;
pub mod session;
pub mod teardown;
pub mod tunnel;

// NetworkManager over D-Bus
pub mod nm;

// Public re-exports
pub use correlator::DisconnectMonitor;
pub use network::{LinkProperties, NetworkEvent, NetworkHandle, NetworkSnapshot};
pub use observer::{ChannelSource, ConnectivitySource, NetworkCallback, Registration};
pub use session::{SessionOutcome, TunnelSession};
pub use teardown::TeardownAction;
pub use tunnel::{TunnelAddresses, TunnelHandle, TunnelService};
