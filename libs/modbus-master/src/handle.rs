//! Sessions handle
//!
//! Builds one session per configured slave, starts and stops them together,
//! drains their output and routes write commands by hardware id.

use futures::future::join_all;
use tracing::{debug, error, info, warn};

use crate::config::{ConnectionType, ModuleConfig, SlaveConfig};
use crate::error::{ModbusError, Result};
use crate::operation::{WriteCommand, WriteOperation};
use crate::output::OutContent;
use crate::serial::{default_serial_factory, SerialFactory};
use crate::session::rtu::RtuTransport;
use crate::session::tcp::TcpTransport;
use crate::session::{SessionState, SlaveSession};

/// A slave session over either transport
pub enum ModbusSession {
    Tcp(SlaveSession<TcpTransport>),
    Rtu(SlaveSession<RtuTransport>),
}

macro_rules! delegate {
    ($self:ident, $session:ident => $body:expr) => {
        match $self {
            ModbusSession::Tcp($session) => $body,
            ModbusSession::Rtu($session) => $body,
        }
    };
}

impl ModbusSession {
    /// Build the session matching the slave's connection string
    ///
    /// `Ok(None)` for connection strings that are neither an IP address nor
    /// a serial port.
    pub fn from_config(
        name: &str,
        config: &SlaveConfig,
        serial_factory: &SerialFactory,
    ) -> Result<Option<Self>> {
        let session = match config.connection_type() {
            ConnectionType::Tcp => {
                let transport = TcpTransport::new(config.slave_connection.trim(), config.tcp_port);
                ModbusSession::Tcp(SlaveSession::new(name, config.clone(), transport))
            },
            ConnectionType::Rtu => {
                let transport =
                    RtuTransport::new(config.serial_settings()?, serial_factory.clone());
                ModbusSession::Rtu(SlaveSession::new(name, config.clone(), transport))
            },
            ConnectionType::Unknown => return Ok(None),
        };
        Ok(Some(session))
    }

    pub fn connection_type(&self) -> ConnectionType {
        match self {
            ModbusSession::Tcp(_) => ConnectionType::Tcp,
            ModbusSession::Rtu(_) => ConnectionType::Rtu,
        }
    }

    pub fn name(&self) -> &str {
        delegate!(self, s => s.name())
    }

    pub fn hw_id(&self) -> &str {
        delegate!(self, s => s.hw_id())
    }

    pub fn state(&self) -> SessionState {
        delegate!(self, s => s.state())
    }

    pub async fn init_session(&self) -> Result<()> {
        delegate!(self, s => s.init_session().await)
    }

    pub async fn process_operations(&self) {
        delegate!(self, s => s.process_operations().await)
    }

    pub async fn write_message(&self, write: &WriteOperation) -> Result<()> {
        delegate!(self, s => s.write_message(write).await)
    }

    pub async fn release_session(&self) {
        delegate!(self, s => s.release_session().await)
    }

    pub fn collect_and_reset(&self) -> Option<OutContent> {
        delegate!(self, s => s.collect_and_reset())
    }
}

/// All sessions of one module configuration
pub struct SessionsHandle {
    sessions: Vec<ModbusSession>,
    released: bool,
}

impl SessionsHandle {
    /// Build and initialize sessions with OS serial ports for RTU slaves
    pub async fn create_from_configuration(config: &ModuleConfig) -> Option<Self> {
        Self::create_with_serial_factory(config, default_serial_factory()).await
    }

    /// Build and initialize sessions, opening serial ports through `serial_factory`
    ///
    /// Slaves with an unrecognized connection string are skipped. `None` when
    /// the configuration has errors or yields no session at all.
    pub async fn create_with_serial_factory(
        config: &ModuleConfig,
        serial_factory: SerialFactory,
    ) -> Option<Self> {
        let report = config.validate();
        for warning in &report.warnings {
            warn!("{}", warning);
        }
        if !report.is_ok() {
            for e in &report.errors {
                error!("Invalid slave configuration: {}", e);
            }
            return None;
        }

        let mut sessions = Vec::with_capacity(config.slave_configs.len());
        for (name, slave) in &config.slave_configs {
            match ModbusSession::from_config(name, slave, &serial_factory) {
                Ok(Some(session)) => {
                    debug!(
                        "Slave {} ({}) uses {}",
                        name,
                        slave.hw_id,
                        session.connection_type()
                    );
                    sessions.push(session);
                },
                Ok(None) => {
                    warn!(
                        "Slave {}: unsupported connection '{}', skipped",
                        name, slave.slave_connection
                    );
                },
                Err(e) => {
                    error!("Slave {}: {}", name, e);
                    return None;
                },
            }
        }

        let results = join_all(sessions.iter().map(ModbusSession::init_session)).await;
        let sessions: Vec<_> = sessions
            .into_iter()
            .zip(results)
            .filter_map(|(session, result)| match result {
                Ok(()) => Some(session),
                Err(e) => {
                    error!("Slave {} failed to initialize: {}", session.name(), e);
                    None
                },
            })
            .collect();

        if sessions.is_empty() {
            warn!("No Modbus sessions could be created from the configuration");
            return None;
        }

        info!("Created {} Modbus sessions", sessions.len());
        Some(Self {
            sessions,
            released: false,
        })
    }

    pub fn sessions(&self) -> &[ModbusSession] {
        &self.sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Start polling on every session
    pub async fn start(&self) -> Result<()> {
        if self.released {
            return Err(ModbusError::config("sessions handle already released"));
        }

        for session in &self.sessions {
            session.process_operations().await;
        }
        info!("Modbus sessions started");
        Ok(())
    }

    /// Release every session; later calls do nothing
    pub async fn release(&mut self) {
        if self.released {
            return;
        }
        join_all(self.sessions.iter().map(ModbusSession::release_session)).await;
        self.released = true;
        info!("Modbus sessions released");
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Drain every session's output, skipping sessions with nothing new
    pub fn collect_and_reset_out_messages(&self) -> Vec<OutContent> {
        self.sessions
            .iter()
            .filter_map(ModbusSession::collect_and_reset)
            .collect()
    }

    /// Route a write to the session owning `command.hw_id`
    pub async fn write_message(&self, command: &WriteCommand) -> Result<()> {
        let session = self
            .sessions
            .iter()
            .find(|s| s.hw_id() == command.hw_id)
            .ok_or_else(|| {
                ModbusError::config(format!("No slave with hwId {}", command.hw_id))
            })?;
        let write = WriteOperation::from_command(command)?;
        session.write_message(&write).await
    }
}
