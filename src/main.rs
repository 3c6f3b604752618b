//! # joycal
//!
//! Inspect and calibrate a Linux joystick.
//!
//! Opens the configured joystick device, restores its saved profile and runs
//! the input pipeline until the device goes away or Ctrl+C is pressed.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use joycal::config::{Config, LoggingConfig};
use joycal::joystick::bus::ChannelObserver;
use joycal::joystick::device::DeviceHandle;
use joycal::joystick::engine::{run, InputEngine};
use joycal::profile::ProfileStore;

/// Environment variable naming the configuration file
const CONFIG_ENV: &str = "JOYCAL_CONFIG";

/// Configuration file used when `JOYCAL_CONFIG` is unset
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// File name prefix of daily log files
const LOG_FILE_PREFIX: &str = "joycal.log";

/// Main entry point for joycal
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Load configuration (defaults when the file is absent)
///    - Set up logging with tracing subscriber
///    - Open the joystick device and restore its profile
///
/// 2. **Main Loop**
///    - Pipeline runs on a blocking thread: read → decode → map → calibrate → apply → notify
///    - State changes arrive here through a channel observer and are logged at debug
///    - Handle Ctrl+C for graceful shutdown
///
/// 3. **Graceful Shutdown**
///    - Close the device, which ends a pending read
///    - Log pipeline counters and the final state
///
/// # Errors
///
/// Returns error if:
/// - The configuration file exists but is invalid
/// - The device cannot be opened
///
/// # Examples
///
/// ```bash
/// JOYCAL_CONFIG=config/default.toml RUST_LOG=debug cargo run --release
/// ```
#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load_or_default(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;

    let _log_guard = init_logging(&config.logging)?;
    info!("joycal v{} starting...", env!("CARGO_PKG_VERSION"));

    let mut device = DeviceHandle::open(&config.device.path, config.device.read_mode())?;
    let descriptor = device.descriptor().clone();
    info!(
        "{} at {}: {} axes, {} buttons, driver {} (identity {})",
        descriptor.name,
        descriptor.path.display(),
        descriptor.axis_count,
        descriptor.button_count,
        descriptor.driver_version_string(),
        descriptor.identity()
    );

    let store = ProfileStore::new(config.profiles.directory())
        .with_default_policy(config.conversion.policy());
    let profile = store.load_or_default(&descriptor);
    let engine = Arc::new(InputEngine::new(descriptor, profile)?);

    let (observer, mut changes) = ChannelObserver::channel();
    engine.subscribe(Arc::new(observer));

    let close = device.close_handle();
    let mut pipeline = {
        let engine = Arc::clone(&engine);
        tokio::task::spawn_blocking(move || run(&engine, &mut device))
    };

    info!("Press Ctrl+C to exit");

    let stats = loop {
        tokio::select! {
            Some(change) = changes.recv() => {
                debug!("{:?}", change);
            }

            result = &mut pipeline => {
                warn!("Device closed by the system");
                break result??;
            }

            // Handle Ctrl+C for graceful shutdown
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                close.close();
                break (&mut pipeline).await??;
            }
        }
    };

    info!("Processed {} samples, {} state changes", stats.samples, stats.changes);
    info!("Final state: {:?}", engine.snapshot());
    Ok(())
}

/// Installs the global subscriber.
///
/// Returns the file writer guard when file logging is enabled; it must live
/// until shutdown so buffered lines are flushed.
fn init_logging(logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let level: tracing::Level = logging
        .level
        .parse()
        .with_context(|| format!("Invalid log level {}", logging.level))?;
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    match &logging.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            Ok(None)
        }
    }
}
