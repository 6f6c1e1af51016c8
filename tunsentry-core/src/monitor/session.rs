//! One tunnel session: a fresh correlator plus its registration
//!
//! Start the session before the tunnel finishes coming up so the event that
//! assigns the tunnel addresses is not missed. Every way out of
//! [`TunnelSession::run_until`] ends the registration.

use crate::error::MonitorError;
use crate::monitor::correlator::DisconnectMonitor;
use crate::monitor::network::NetworkHandle;
use crate::monitor::observer::{ConnectivitySource, Registration};
use crate::monitor::tunnel::{TunnelAddresses, TunnelService};
use std::future::Future;
use tokio::sync::watch;
use tracing::{info, warn};

/// How a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The tunnel's network was lost and teardown was requested
    TornDown,

    /// The connectivity source stopped reporting events
    SourceClosed {
        /// Network matched when the source went away, if any
        matched: Option<NetworkHandle>,
    },

    /// The session was cancelled by its owner
    Cancelled,
}

pub struct TunnelSession<T> {
    registration: Registration<DisconnectMonitor<T>>,
}

enum Step<T> {
    Finished(Result<DisconnectMonitor<T>, MonitorError>),
    Cancelled,
}

impl<T> TunnelSession<T>
where
    T: TunnelService + Send + 'static,
{
    /// Subscribe to `source` and start correlating for `tunnel`
    ///
    /// `tunnel_updates` reports changes of the tunnel addresses so networks
    /// seen before the tunnel was addressed get re-checked.
    #[tracing::instrument(skip_all)]
    pub async fn start<S: ConnectivitySource>(
        source: &S,
        tunnel: T,
        tunnel_updates: Option<watch::Receiver<TunnelAddresses>>,
    ) -> Result<Self, MonitorError> {
        let events = source.subscribe().await?;
        let monitor = DisconnectMonitor::new(tunnel);

        info!("Tunnel session started");
        Ok(Self {
            registration: Registration::register(events, monitor, tunnel_updates),
        })
    }

    /// Run until teardown, until the source closes, or until `cancel`
    /// resolves, whichever comes first
    pub async fn run_until<F>(mut self, cancel: F) -> Result<SessionOutcome, MonitorError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(cancel);

        let step = tokio::select! {
            result = self.registration.finished() => Step::Finished(result),
            _ = &mut cancel => Step::Cancelled,
        };

        let outcome = match step {
            Step::Finished(result) => {
                let monitor = result?;
                if monitor.is_finished() {
                    SessionOutcome::TornDown
                } else {
                    warn!("Connectivity source closed before the tunnel network was lost");
                    SessionOutcome::SourceClosed {
                        matched: monitor.matched().cloned(),
                    }
                }
            }
            Step::Cancelled => {
                self.registration.unsubscribe().await?;
                SessionOutcome::Cancelled
            }
        };

        info!("Tunnel session ended: {:?}", outcome);
        Ok(outcome)
    }

    /// End the session now and get the correlator back
    pub async fn end(self) -> Result<DisconnectMonitor<T>, MonitorError> {
        self.registration.unsubscribe().await
    }
}
