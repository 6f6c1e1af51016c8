//! Delivery of network events to a callback
//!
//! A [`Registration`] owns one background task that drains a connectivity
//! source's event stream and hands each event to the callback, one at a
//! time and in arrival order. The callback is owned by that task, so it
//! needs no locking.

use crate::error::MonitorError;
use crate::monitor::network::{LinkProperties, NetworkEvent, NetworkHandle};
use crate::monitor::tunnel::TunnelAddresses;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::debug;

/// Receiver of connectivity events
pub trait NetworkCallback {
    /// The address set of `network` changed
    fn on_link_properties_changed(&mut self, network: &NetworkHandle, properties: &LinkProperties);

    /// The platform tore `network` down
    fn on_lost(&mut self, network: &NetworkHandle);

    /// The tunnel's own addresses changed
    fn on_tunnel_addressed(&mut self) {}

    /// Stop delivery once this returns true
    fn is_finished(&self) -> bool {
        false
    }
}

/// A platform facility that reports connectivity changes
#[allow(async_fn_in_trait)]
pub trait ConnectivitySource {
    /// Start reporting events. Dropping the receiver ends the subscription.
    async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<NetworkEvent>, MonitorError>;
}

/// Active subscription feeding events to a callback
///
/// Dropping the registration stops delivery as well; no event is delivered
/// to the callback after [`Registration::unsubscribe`] has been called.
pub struct Registration<C> {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<C>>,
}

enum Step {
    Shutdown,
    Event(Option<NetworkEvent>),
    TunnelUpdate(bool),
}

impl<C> Registration<C>
where
    C: NetworkCallback + Send + 'static,
{
    /// Start delivering `events` to `callback`
    ///
    /// When `tunnel_updates` is given, every change of the tunnel's
    /// addresses is reported through [`NetworkCallback::on_tunnel_addressed`].
    pub fn register(
        events: mpsc::UnboundedReceiver<NetworkEvent>,
        callback: C,
        tunnel_updates: Option<watch::Receiver<TunnelAddresses>>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(dispatch_loop(events, callback, tunnel_updates, shutdown_rx));

        Self {
            shutdown: Some(shutdown_tx),
            task: Some(task),
        }
    }

    /// Whether the dispatch task is still running
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Wait until delivery stops on its own and get the callback back
    ///
    /// Delivery stops when the callback reports it is finished or the event
    /// stream closes. Cancelling this future leaves the registration intact.
    pub async fn finished(&mut self) -> Result<C, MonitorError> {
        let task = self
            .task
            .as_mut()
            .ok_or_else(|| MonitorError::DispatchFailed("registration already ended".to_string()))?;

        let result = task.await;
        self.task = None;
        result.map_err(|e| MonitorError::DispatchFailed(e.to_string()))
    }

    /// Stop delivery and get the callback back
    pub async fn unsubscribe(mut self) -> Result<C, MonitorError> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.finished().await
    }
}

async fn dispatch_loop<C: NetworkCallback>(
    mut events: mpsc::UnboundedReceiver<NetworkEvent>,
    mut callback: C,
    mut tunnel_updates: Option<watch::Receiver<TunnelAddresses>>,
    mut shutdown: oneshot::Receiver<()>,
) -> C {
    loop {
        let step = tokio::select! {
            biased;
            _ = &mut shutdown => Step::Shutdown,
            changed = next_tunnel_update(&mut tunnel_updates) => Step::TunnelUpdate(changed),
            event = events.recv() => Step::Event(event),
        };

        match step {
            Step::Shutdown => {
                debug!("Registration cancelled");
                break;
            }
            Step::TunnelUpdate(true) => callback.on_tunnel_addressed(),
            Step::TunnelUpdate(false) => {
                debug!("Tunnel address updates closed");
                tunnel_updates = None;
            }
            Step::Event(Some(event)) => dispatch(&mut callback, event),
            Step::Event(None) => {
                debug!("Network event stream closed");
                break;
            }
        }

        if callback.is_finished() {
            debug!("Callback finished, stopping delivery");
            break;
        }
    }

    callback
}

async fn next_tunnel_update(updates: &mut Option<watch::Receiver<TunnelAddresses>>) -> bool {
    match updates {
        Some(rx) => rx.changed().await.is_ok(),
        None => std::future::pending().await,
    }
}

fn dispatch<C: NetworkCallback>(callback: &mut C, event: NetworkEvent) {
    match event {
        NetworkEvent::LinkPropertiesChanged {
            network,
            properties,
        } => callback.on_link_properties_changed(&network, &properties),
        NetworkEvent::Lost { network } => callback.on_lost(&network),
    }
}

/// Connectivity source fed by hand, for embedders that already receive
/// platform callbacks elsewhere
#[derive(Debug, Clone)]
pub struct ChannelSource {
    subscribers: std::sync::Arc<std::sync::Mutex<Vec<mpsc::UnboundedSender<NetworkEvent>>>>,
}

impl ChannelSource {
    pub fn new() -> Self {
        Self {
            subscribers: Default::default(),
        }
    }

    /// Deliver an event to every live subscriber
    ///
    /// Returns the number of subscribers that received it.
    pub fn publish(&self, event: NetworkEvent) -> usize {
        let mut subscribers = match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        subscribers.len()
    }
}

impl Default for ChannelSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectivitySource for ChannelSource {
    async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<NetworkEvent>, MonitorError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = self
            .subscribers
            .lock()
            .map_err(|e| MonitorError::QueryFailed(e.to_string()))?;
        subscribers.push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
        stop_after: Option<usize>,
    }

    impl NetworkCallback for Recorder {
        fn on_link_properties_changed(&mut self, network: &NetworkHandle, _: &LinkProperties) {
            self.events.push(format!("changed {}", network));
        }

        fn on_lost(&mut self, network: &NetworkHandle) {
            self.events.push(format!("lost {}", network));
        }

        fn on_tunnel_addressed(&mut self) {
            self.events.push("addressed".to_string());
        }

        fn is_finished(&self) -> bool {
            self.stop_after.is_some_and(|n| self.events.len() >= n)
        }
    }

    fn lost(id: &str) -> NetworkEvent {
        NetworkEvent::Lost {
            network: NetworkHandle::new(id),
        }
    }

    #[tokio::test]
    async fn test_events_are_delivered_in_order() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut registration = Registration::register(rx, Recorder::default(), None);

        tx.send(NetworkEvent::LinkPropertiesChanged {
            network: NetworkHandle::new("a"),
            properties: LinkProperties::default(),
        })
        .unwrap();
        tx.send(lost("b")).unwrap();
        drop(tx);

        let recorder = registration.finished().await.unwrap();
        assert_eq!(recorder.events, vec!["changed a", "lost b"]);
        assert!(!registration.is_active());
    }

    #[tokio::test]
    async fn test_no_delivery_after_unsubscribe() {
        let (tx, rx) = mpsc::unbounded_channel();
        let registration = Registration::register(rx, Recorder::default(), None);

        let recorder = registration.unsubscribe().await.unwrap();
        assert!(tx.send(lost("a")).is_err());
        assert!(recorder.events.is_empty());
    }

    #[tokio::test]
    async fn test_finished_callback_stops_delivery() {
        let (tx, rx) = mpsc::unbounded_channel();
        let recorder = Recorder {
            stop_after: Some(1),
            ..Default::default()
        };
        let mut registration = Registration::register(rx, recorder, None);

        tx.send(lost("a")).unwrap();
        let recorder = registration.finished().await.unwrap();

        assert_eq!(recorder.events, vec!["lost a"]);
        assert!(tx.send(lost("b")).is_err());
    }

    #[tokio::test]
    async fn test_tunnel_updates_are_forwarded() {
        let (tx, rx) = mpsc::unbounded_channel::<NetworkEvent>();
        let (addr_tx, addr_rx) = watch::channel(TunnelAddresses::default());
        let mut registration = Registration::register(rx, Recorder::default(), Some(addr_rx));

        addr_tx.send_replace(TunnelAddresses::new(
            "10.0.0.2".parse().unwrap(),
            "fd00::2".parse().unwrap(),
        ));
        drop(addr_tx);
        drop(tx);

        let recorder = registration.finished().await.unwrap();
        assert_eq!(recorder.events, vec!["addressed"]);
    }

    #[tokio::test]
    async fn test_channel_source_fans_out() {
        let source = ChannelSource::new();
        let mut first = source.subscribe().await.unwrap();
        let second = source.subscribe().await.unwrap();

        assert_eq!(source.publish(lost("a")), 2);
        drop(second);
        assert_eq!(source.publish(lost("b")), 1);

        assert_eq!(first.recv().await, Some(lost("a")));
        assert_eq!(first.recv().await, Some(lost("b")));
    }
}
