//! Core library for tunsentry
//!
//! Detects that a VPN tunnel's network went away by correlating the
//! platform's network change events with the tunnel's assigned addresses,
//! and tears the tunnel down when it happens.

pub mod error;

pub mod config;
pub mod monitor;

/// Initialize logging infrastructure
///
/// Sets up tracing with systemd journal logging for production use.
/// Otherwise logs to stderr so command output on stdout stays clean.
pub fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    #[cfg(target_os = "linux")]
    {
        if std::env::var("JOURNAL_STREAM").is_ok() {
            // We're running under systemd, use journal logging
            let journal_layer = tracing_journald::layer()?;
            tracing_subscriber::registry()
                .with(journal_layer)
                .with(tracing_subscriber::filter::LevelFilter::INFO)
                .init();
            return Ok(());
        }
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .pretty()
                .with_writer(std::io::stderr),
        )
        .with(tracing_subscriber::filter::LevelFilter::INFO)
        .init();

    Ok(())
}
