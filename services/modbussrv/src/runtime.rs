//! Gateway runtime
//!
//! Owns the sessions handle for the current configuration and drives the
//! publish timer, write commands, reload and shutdown signals.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use common::{SignalEvent, SignalListener};
use modbus_master::{ModuleConfig, SessionsHandle, WriteCommand};

use crate::bootstrap::load_configuration;
use crate::publisher::{publish_content, Publisher};

const WRITE_QUEUE_SIZE: usize = 64;

/// Sessions handle plus the configuration it was built from
pub struct Gateway {
    config_path: PathBuf,
    config: ModuleConfig,
    handle: SessionsHandle,
    publisher: Arc<dyn Publisher>,
}

impl Gateway {
    /// Build and start sessions for `config`
    pub async fn start(
        config_path: PathBuf,
        config: ModuleConfig,
        publisher: Arc<dyn Publisher>,
    ) -> Result<Self> {
        let handle = build_handle(&config).await?;
        Ok(Self {
            config_path,
            config,
            handle,
            publisher,
        })
    }

    pub fn handle(&self) -> &SessionsHandle {
        &self.handle
    }

    pub fn config(&self) -> &ModuleConfig {
        &self.config
    }

    fn publish_timer(&self) -> Interval {
        let mut timer = interval(Duration::from_millis(self.config.publish_interval.max(1)));
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        timer
    }

    /// Drain every session and publish what was collected
    pub async fn publish(&self) {
        let content = self.handle.collect_and_reset_out_messages();
        if let Err(e) = publish_content(self.publisher.as_ref(), content).await {
            error!("Publish failed: {:#}", e);
        }
    }

    pub async fn write(&self, command: &WriteCommand) {
        match self.handle.write_message(command).await {
            Ok(()) => info!(
                "Write to {} at {} completed",
                command.hw_id, command.address
            ),
            Err(e) => error!(
                "Write to {} at {} failed: {}",
                command.hw_id, command.address, e
            ),
        }
    }

    /// Re-read the configuration file and rebuild every session
    ///
    /// The old sessions are fully released first. If the new configuration
    /// cannot be loaded the current one stays active; if it loads but yields
    /// no session the previous configuration is restored.
    pub async fn reload(&mut self) -> Result<()> {
        let config = load_configuration(&self.config_path)?;

        self.publish().await;
        self.handle.release().await;

        match build_handle(&config).await {
            Ok(handle) => {
                self.handle = handle;
                self.config = config;
                info!("Configuration reloaded from {}", self.config_path.display());
                Ok(())
            },
            Err(e) => {
                warn!("Restoring previous configuration");
                self.handle = build_handle(&self.config).await?;
                Err(e)
            },
        }
    }

    /// Publish the last values and release all sessions
    pub async fn shutdown(mut self) {
        self.publish().await;
        self.handle.release().await;
    }

    /// Serve until Ctrl+C or SIGTERM
    pub async fn run(mut self, accept_writes: bool) -> Result<()> {
        let mut signals = SignalListener::install();
        let (write_tx, mut write_rx) = mpsc::channel(WRITE_QUEUE_SIZE);
        if accept_writes {
            let tx = write_tx.clone();
            tokio::spawn(async move {
                if let Err(e) = read_write_commands(tokio::io::stdin(), tx).await {
                    error!("Write command reader stopped: {:#}", e);
                }
            });
            info!("Accepting write commands on stdin");
        }

        let mut timer = self.publish_timer();
        loop {
            tokio::select! {
                _ = timer.tick() => self.publish().await,
                Some(command) = write_rx.recv() => self.write(&command).await,
                event = signals.recv() => match event {
                    SignalEvent::Reload => {
                        info!("Reload requested");
                        match self.reload().await {
                            Ok(()) => timer = self.publish_timer(),
                            Err(e) => error!("Reload failed: {:#}", e),
                        }
                    },
                    SignalEvent::Shutdown => {
                        info!("Shutdown requested");
                        break;
                    },
                },
            }
        }

        drop(write_tx);
        self.shutdown().await;
        info!("modbussrv stopped");
        Ok(())
    }
}

async fn build_handle(config: &ModuleConfig) -> Result<SessionsHandle> {
    let handle = SessionsHandle::create_from_configuration(config)
        .await
        .ok_or_else(|| anyhow!("No Modbus session could be created"))?;
    handle.start().await?;
    Ok(handle)
}

/// Forward JSON write commands, one per line, until the input ends
pub async fn read_write_commands<R>(reader: R, tx: mpsc::Sender<WriteCommand>) -> Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut forwarded = 0;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<WriteCommand>(line) {
            Ok(command) => {
                debug!("Write command for {} at {}", command.hw_id, command.address);
                if tx.send(command).await.is_err() {
                    break;
                }
                forwarded += 1;
            },
            Err(e) => warn!("Ignoring malformed write command: {}", e),
        }
    }
    Ok(forwarded)
}
