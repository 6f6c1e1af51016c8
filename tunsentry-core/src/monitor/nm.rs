//! Network change events from NetworkManager via D-Bus
//!
//! Every NetworkManager device is one observed network, identified by its
//! D-Bus object path. A device's link addresses are the union of the
//! `AddressData` of its current IPv4 and IPv6 configurations.

use crate::error::MonitorError;
use crate::monitor::network::{LinkProperties, NetworkEvent, NetworkHandle, NetworkSnapshot};
use crate::monitor::observer::ConnectivitySource;
use futures_util::stream::{select_all, BoxStream, SelectAll};
use futures_util::StreamExt;
use std::collections::HashMap;
use std::net::IpAddr;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zbus::zvariant::{ObjectPath, OwnedObjectPath, OwnedValue};
use zbus::Connection;

const NM_SERVICE: &str = "org.freedesktop.NetworkManager";

// NM_STATE_CONNECTED_GLOBAL
const NM_STATE_CONNECTED_GLOBAL: u32 = 70;

#[zbus::proxy(
    interface = "org.freedesktop.NetworkManager",
    default_service = "org.freedesktop.NetworkManager",
    default_path = "/org/freedesktop/NetworkManager"
)]
trait NetworkManager {
    fn get_devices(&self) -> zbus::Result<Vec<OwnedObjectPath>>;

    #[zbus(signal)]
    fn device_added(&self, device_path: ObjectPath<'_>) -> zbus::Result<()>;

    #[zbus(signal)]
    fn device_removed(&self, device_path: ObjectPath<'_>) -> zbus::Result<()>;

    #[zbus(property)]
    fn state(&self) -> zbus::Result<u32>;
}

#[zbus::proxy(
    interface = "org.freedesktop.NetworkManager.Device",
    default_service = "org.freedesktop.NetworkManager"
)]
trait Device {
    #[zbus(property)]
    fn interface(&self) -> zbus::Result<String>;

    #[zbus(property)]
    fn ip4_config(&self) -> zbus::Result<OwnedObjectPath>;

    #[zbus(property)]
    fn ip6_config(&self) -> zbus::Result<OwnedObjectPath>;
}

#[zbus::proxy(
    interface = "org.freedesktop.NetworkManager.IP4Config",
    default_service = "org.freedesktop.NetworkManager"
)]
trait Ip4Config {
    #[zbus(property)]
    fn address_data(&self) -> zbus::Result<Vec<HashMap<String, OwnedValue>>>;
}

#[zbus::proxy(
    interface = "org.freedesktop.NetworkManager.IP6Config",
    default_service = "org.freedesktop.NetworkManager"
)]
trait Ip6Config {
    #[zbus(property)]
    fn address_data(&self) -> zbus::Result<Vec<HashMap<String, OwnedValue>>>;
}

/// Reports NetworkManager device changes as network events
#[derive(Debug, Clone)]
pub struct NetworkManagerSource {
    connection: Connection,
}

impl NetworkManagerSource {
    /// Connect to the system D-Bus and verify NetworkManager is available
    ///
    /// # Errors
    ///
    /// Returns `MonitorError` if the D-Bus connection fails or NetworkManager is unavailable
    #[tracing::instrument]
    pub async fn new() -> Result<Self, MonitorError> {
        let connection = Connection::system().await?;

        let proxy = zbus::fdo::DBusProxy::new(&connection).await?;
        let bus_name = zbus::names::BusName::try_from(NM_SERVICE)
            .map_err(|e| MonitorError::QueryFailed(e.to_string()))?;
        let name_has_owner = proxy
            .name_has_owner(bus_name)
            .await
            .map_err(|e| MonitorError::QueryFailed(e.to_string()))?;

        if !name_has_owner {
            return Err(MonitorError::NetworkManagerUnavailable);
        }

        Ok(Self { connection })
    }

    /// Check if the host has global connectivity
    #[tracing::instrument(skip(self))]
    pub async fn is_network_available(&self) -> Result<bool, MonitorError> {
        let proxy = NetworkManagerProxy::new(&self.connection).await?;
        let state = proxy
            .state()
            .await
            .map_err(|e| MonitorError::QueryFailed(e.to_string()))?;

        Ok(state == NM_STATE_CONNECTED_GLOBAL)
    }

    /// List every device with its current link properties
    #[tracing::instrument(skip(self))]
    pub async fn snapshot(&self) -> Result<Vec<NetworkSnapshot>, MonitorError> {
        let proxy = NetworkManagerProxy::new(&self.connection).await?;
        let devices = proxy
            .get_devices()
            .await
            .map_err(|e| MonitorError::QueryFailed(e.to_string()))?;

        let mut networks = Vec::with_capacity(devices.len());
        for path in devices {
            let device = device_proxy(&self.connection, &path).await?;
            let properties = read_link_properties(&self.connection, &device)
                .await
                .map_err(|e| MonitorError::QueryFailed(e.to_string()))?;
            networks.push(NetworkSnapshot {
                network: path.as_str().to_string(),
                properties,
            });
        }

        Ok(networks)
    }
}

impl ConnectivitySource for NetworkManagerSource {
    async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<NetworkEvent>, MonitorError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        tokio::spawn(run_source(self.connection.clone(), tx, ready_tx));

        ready_rx.await.map_err(|_| {
            MonitorError::DispatchFailed("NetworkManager source stopped during startup".to_string())
        })??;

        info!("Subscribed to NetworkManager device events");
        Ok(rx)
    }
}

async fn run_source(
    connection: Connection,
    tx: mpsc::UnboundedSender<NetworkEvent>,
    ready: oneshot::Sender<Result<(), MonitorError>>,
) {
    let startup = async {
        let proxy = NetworkManagerProxy::new(&connection).await?;
        // Subscribe to signals before listing devices so none slips in between.
        let added = proxy.receive_device_added().await?;
        let removed = proxy.receive_device_removed().await?;
        let devices = proxy.get_devices().await?;
        Ok::<_, zbus::Error>((proxy, added, removed, devices))
    };

    let (_proxy, added, removed, devices) = match startup.await {
        Ok(parts) => {
            let _ = ready.send(Ok(()));
            parts
        }
        Err(e) => {
            let _ = ready.send(Err(e.into()));
            return;
        }
    };

    tokio::pin!(added, removed);

    let mut watchers: HashMap<OwnedObjectPath, JoinHandle<()>> = HashMap::new();
    for path in devices {
        let watcher = spawn_watcher(&connection, path.clone(), &tx);
        watchers.insert(path, watcher);
    }

    loop {
        tokio::select! {
            _ = tx.closed() => {
                debug!("Event receiver dropped, stopping NetworkManager source");
                break;
            }
            signal = added.next() => {
                let Some(signal) = signal else { break };
                let path = match signal.args() {
                    Ok(args) => OwnedObjectPath::from(args.device_path().clone()),
                    Err(e) => {
                        warn!("Malformed DeviceAdded signal: {}", e);
                        continue;
                    }
                };
                debug!("Device added: {}", path.as_str());
                let watcher = spawn_watcher(&connection, path.clone(), &tx);
                if let Some(previous) = watchers.insert(path, watcher) {
                    previous.abort();
                }
            }
            signal = removed.next() => {
                let Some(signal) = signal else { break };
                let path = match signal.args() {
                    Ok(args) => OwnedObjectPath::from(args.device_path().clone()),
                    Err(e) => {
                        warn!("Malformed DeviceRemoved signal: {}", e);
                        continue;
                    }
                };
                debug!("Device removed: {}", path.as_str());
                if let Some(watcher) = watchers.remove(&path) {
                    // Let the watcher go quiet so its events stay ahead of the loss.
                    watcher.abort();
                    let _ = watcher.await;
                }
                let network = NetworkHandle::new(path.as_str());
                if tx.send(NetworkEvent::Lost { network }).is_err() {
                    break;
                }
            }
        }
    }

    for (_, watcher) in watchers {
        watcher.abort();
    }
}

fn spawn_watcher(
    connection: &Connection,
    path: OwnedObjectPath,
    tx: &mpsc::UnboundedSender<NetworkEvent>,
) -> JoinHandle<()> {
    let connection = connection.clone();
    let tx = tx.clone();
    tokio::spawn(async move {
        if let Err(e) = watch_device(&connection, &path, &tx).await {
            // Typically the device vanished while we were reading it
            debug!("Stopped watching device {}: {}", path.as_str(), e);
        }
    })
}

// Fires when a device switches to another IP configuration object, or when
// the addresses of its current one change in place.
type ChangeStream = SelectAll<BoxStream<'static, ()>>;

enum DeviceChange {
    ConfigPath,
    Addresses,
    Gone,
}

async fn watch_device(
    connection: &Connection,
    path: &OwnedObjectPath,
    tx: &mpsc::UnboundedSender<NetworkEvent>,
) -> zbus::Result<()> {
    let device = device_proxy(connection, path).await?;
    let network = NetworkHandle::new(path.as_str());
    let mut path_changes = select_all([
        device.receive_ip4_config_changed().await.map(|_| ()).boxed(),
        device.receive_ip6_config_changed().await.map(|_| ()).boxed(),
    ]);

    let mut ip4_path = device.ip4_config().await?;
    let mut ip6_path = device.ip6_config().await?;
    let mut address_changes = watch_address_data(connection, &ip4_path, &ip6_path).await?;

    loop {
        let properties = read_link_properties(connection, &device).await?;
        let event = NetworkEvent::LinkPropertiesChanged {
            network: network.clone(),
            properties,
        };
        if tx.send(event).is_err() {
            return Ok(());
        }

        let change = tokio::select! {
            change = path_changes.next() => match change {
                Some(()) => DeviceChange::ConfigPath,
                None => DeviceChange::Gone,
            },
            Some(()) = address_changes.next(), if !address_changes.is_empty() => {
                DeviceChange::Addresses
            }
        };

        match change {
            DeviceChange::Gone => return Ok(()),
            DeviceChange::Addresses => {}
            DeviceChange::ConfigPath => {
                let ip4 = device.ip4_config().await?;
                let ip6 = device.ip6_config().await?;
                if ip4 != ip4_path || ip6 != ip6_path {
                    debug!("IP configuration of {} moved", network);
                    address_changes = watch_address_data(connection, &ip4, &ip6).await?;
                    ip4_path = ip4;
                    ip6_path = ip6;
                }
            }
        }
    }
}

async fn watch_address_data(
    connection: &Connection,
    ip4: &OwnedObjectPath,
    ip6: &OwnedObjectPath,
) -> zbus::Result<ChangeStream> {
    let mut streams = Vec::with_capacity(2);

    if has_config(ip4) {
        let config = Ip4ConfigProxy::builder(connection)
            .path(ip4.clone())?
            .build()
            .await?;
        streams.push(config.receive_address_data_changed().await.map(|_| ()).boxed());
    }

    if has_config(ip6) {
        let config = Ip6ConfigProxy::builder(connection)
            .path(ip6.clone())?
            .build()
            .await?;
        streams.push(config.receive_address_data_changed().await.map(|_| ()).boxed());
    }

    Ok(select_all(streams))
}

async fn device_proxy(
    connection: &Connection,
    path: &OwnedObjectPath,
) -> zbus::Result<DeviceProxy<'static>> {
    DeviceProxy::builder(connection)
        .path(path.clone())?
        .build()
        .await
}

async fn read_link_properties(
    connection: &Connection,
    device: &DeviceProxy<'_>,
) -> zbus::Result<LinkProperties> {
    let mut addresses = Vec::new();

    let ip4 = device.ip4_config().await?;
    if has_config(&ip4) {
        let config = Ip4ConfigProxy::builder(connection)
            .path(ip4)?
            .build()
            .await?;
        addresses.extend(addresses_from_data(&config.address_data().await?));
    }

    let ip6 = device.ip6_config().await?;
    if has_config(&ip6) {
        let config = Ip6ConfigProxy::builder(connection)
            .path(ip6)?
            .build()
            .await?;
        addresses.extend(addresses_from_data(&config.address_data().await?));
    }

    Ok(LinkProperties {
        interface: device.interface().await.ok(),
        addresses,
    })
}

// NetworkManager uses "/" for "no configuration"
fn has_config(path: &OwnedObjectPath) -> bool {
    path.as_str() != "/"
}

fn addresses_from_data(entries: &[HashMap<String, OwnedValue>]) -> Vec<IpAddr> {
    parse_addresses(
        entries
            .iter()
            .filter_map(|entry| entry.get("address"))
            .filter_map(|value| <&str>::try_from(value).ok()),
    )
}

fn parse_addresses<'a>(texts: impl Iterator<Item = &'a str>) -> Vec<IpAddr> {
    texts
        .filter_map(|text| match text.parse() {
            Ok(address) => Some(address),
            Err(_) => {
                warn!("Ignoring unparseable address from NetworkManager: {}", text);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use zbus::zvariant::Value;

    #[test]
    fn test_parse_addresses_skips_garbage() {
        let parsed = parse_addresses(["10.0.0.2", "bogus", "fd00::2"].into_iter());

        assert_eq!(
            parsed,
            vec![
                "10.0.0.2".parse::<IpAddr>().unwrap(),
                "fd00::2".parse::<IpAddr>().unwrap()
            ]
        );
    }

    fn address_entry(address: &str, prefix: u32) -> HashMap<String, OwnedValue> {
        HashMap::from([
            (
                "address".to_string(),
                OwnedValue::try_from(Value::from(address)).unwrap(),
            ),
            (
                "prefix".to_string(),
                OwnedValue::try_from(Value::from(prefix)).unwrap(),
            ),
        ])
    }

    #[test]
    fn test_addresses_from_address_data() {
        // Given: AddressData as NetworkManager sends it, one entry per address
        let entries = vec![
            address_entry("fe80::1", 64),
            address_entry("fd00::2", 64),
            address_entry("10.0.0.2", 24),
        ];

        // When: Extracting the link addresses
        let addresses = addresses_from_data(&entries);

        // Then: Every address is parsed, prefixes are dropped
        assert_eq!(
            addresses,
            vec![
                "fe80::1".parse::<IpAddr>().unwrap(),
                "fd00::2".parse::<IpAddr>().unwrap(),
                "10.0.0.2".parse::<IpAddr>().unwrap(),
            ]
        );
    }

    #[test]
    fn test_address_data_without_usable_address_is_skipped() {
        let mut no_address = address_entry("10.0.0.2", 24);
        no_address.remove("address");
        let mut wrong_type = address_entry("10.0.0.2", 24);
        wrong_type.insert(
            "address".to_string(),
            OwnedValue::try_from(Value::from(42u32)).unwrap(),
        );
        let entries = vec![no_address, wrong_type, address_entry("fd00::2", 64)];

        let addresses = addresses_from_data(&entries);

        assert_eq!(addresses, vec!["fd00::2".parse::<IpAddr>().unwrap()]);
    }

    #[test]
    fn test_root_path_means_no_config() {
        let none = OwnedObjectPath::try_from("/").unwrap();
        let some =
            OwnedObjectPath::try_from("/org/freedesktop/NetworkManager/IP4Config/7").unwrap();

        assert!(!has_config(&none));
        assert!(has_config(&some));
    }
}
