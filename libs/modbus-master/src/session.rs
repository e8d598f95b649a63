//! Slave sessions
//!
//! A [`SlaveSession`] owns the read operations of one physical slave and
//! runs one polling task per operation. Everything except framing and I/O is
//! shared between transports; [`tcp::TcpTransport`] and [`rtu::RtuTransport`]
//! supply the frame layout and the connect/exchange primitives.
//!
//! ```text
//! SlaveSession<T: Transport>
//!     ├── SessionCore (Arc, shared with polling tasks)
//!     │     ├── Mutex<T>            one exchange in flight per connection
//!     │     ├── OutputAggregator    decoded values since the last drain
//!     │     └── CancellationToken   stops polling loops on release
//!     └── JoinHandle per ReadOperation
//! ```

pub mod rtu;
pub mod tcp;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::{RetryPolicy, SlaveConfig};
use crate::decoding::DecodedValue;
use crate::error::{ModbusError, Result};
use crate::operation::{request_pdu, ReadOperation, WriteOperation, PDU_LEN};
use crate::output::{OutContent, OutValue, OutputAggregator};
use crate::types::FunctionCode;

/// Session lifecycle
///
/// `Disconnected → Connecting → Connected → Polling`, falling back to
/// `Connected` or `Disconnected` when an exchange fails. `Released` is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Polling,
    Released,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Frame layout and I/O primitives of one Modbus transport
#[async_trait]
pub trait Transport: Send + 'static {
    /// Short transport name for logs
    const KIND: &'static str;
    /// Offset of the function code in request and response frames
    const DATA_BODY_OFFSET: usize;
    /// Size of an encoded single read/write request
    const REQUEST_SIZE: usize;
    /// Guard time awaited before each request
    const SILENT_INTERVAL: Duration;

    /// Wrap a request PDU into a complete frame
    fn encode_request(unit_id: u8, pdu: &[u8; PDU_LEN]) -> Vec<u8>;

    /// Human readable peer (address or port) for logs
    fn endpoint(&self) -> String;

    fn is_connected(&self) -> bool;

    async fn connect(&mut self) -> Result<()>;

    /// Drop the underlying handle; the next exchange reconnects
    async fn close(&mut self);

    /// Send one request and read its response
    ///
    /// `Ok(None)` when the read retries ran out. An error means the
    /// connection is unusable and must be reopened.
    async fn exchange(&mut self, request: &[u8], retry: &RetryPolicy)
        -> Result<Option<Vec<u8>>>;
}

/// Read retry counter shared by both phases of one response
pub(crate) struct RetryBudget {
    failures: u32,
    limit: u32,
    interval: Duration,
    peer_closed: bool,
}

impl RetryBudget {
    pub(crate) fn new(policy: &RetryPolicy) -> Self {
        Self {
            failures: 0,
            limit: policy.count.max(1),
            interval: policy.interval,
            peer_closed: false,
        }
    }

    pub(crate) fn interval(&self) -> Duration {
        self.interval
    }

    /// Count one empty read; `false` once the budget is spent
    ///
    /// With `wait` the caller is paced by the retry interval before its next
    /// attempt. Timed-out reads already waited and pass `false`.
    pub(crate) async fn spend(&mut self, wait: bool) -> bool {
        self.failures += 1;
        if self.failures >= self.limit {
            return false;
        }
        if wait && !self.interval.is_zero() {
            tokio::time::sleep(self.interval).await;
        }
        true
    }

    pub(crate) fn failures(&self) -> u32 {
        self.failures
    }

    pub(crate) fn mark_peer_closed(&mut self) {
        self.peer_closed = true;
    }

    pub(crate) fn peer_closed(&self) -> bool {
        self.peer_closed
    }
}

/// State shared between a session and its polling tasks
struct SessionCore<T: Transport> {
    name: String,
    hw_id: String,
    retry: RetryPolicy,
    transport: Mutex<T>,
    output: OutputAggregator,
    state: RwLock<SessionState>,
    polling: AtomicBool,
    shutdown: CancellationToken,
}

impl<T: Transport> SessionCore<T> {
    fn state(&self) -> SessionState {
        *self.state.read()
    }

    fn set_state(&self, next: SessionState) {
        let mut state = self.state.write();
        if *state == SessionState::Released || *state == next {
            return;
        }
        debug!("Slave {} state {} -> {}", self.name, *state, next);
        *state = next;
    }

    fn mark_healthy(&self) {
        if self.polling.load(Ordering::Acquire) {
            self.set_state(SessionState::Polling);
        } else {
            self.set_state(SessionState::Connected);
        }
    }

    async fn connect(&self, transport: &mut T) -> Result<()> {
        self.set_state(SessionState::Connecting);
        match transport.connect().await {
            Ok(()) => {
                info!(
                    "Slave {} connected ({} {})",
                    self.name,
                    T::KIND,
                    transport.endpoint()
                );
                self.mark_healthy();
                Ok(())
            },
            Err(e) => {
                self.set_state(SessionState::Disconnected);
                Err(e)
            },
        }
    }

    /// Exchange one request under the connection lock
    ///
    /// Transport failures close the connection and reconnect before the
    /// lock is released; sends are retried up to the retry count.
    async fn send_request(&self, request: &[u8]) -> Option<Vec<u8>> {
        let attempts = self.retry.count.max(1);

        for attempt in 1..=attempts {
            if attempt > 1 {
                if self.shutdown.is_cancelled() {
                    return None;
                }
                tokio::time::sleep(self.retry.interval).await;
            }

            let mut transport = self.transport.lock().await;
            if self.state() == SessionState::Released {
                return None;
            }

            if !transport.is_connected() {
                if let Err(e) = self.connect(&mut transport).await {
                    warn!(
                        "Slave {} connect attempt {}/{} failed: {}",
                        self.name, attempt, attempts, e
                    );
                    continue;
                }
            }

            if !T::SILENT_INTERVAL.is_zero() {
                tokio::time::sleep(T::SILENT_INTERVAL).await;
            }

            trace!("Slave {} TX: {}", self.name, hex::encode(request));
            match transport.exchange(request, &self.retry).await {
                Ok(Some(response)) => {
                    trace!("Slave {} RX: {}", self.name, hex::encode(&response));
                    self.mark_healthy();
                    return Some(response);
                },
                Ok(None) => {
                    debug!(
                        "Slave {} gave no complete response within {} read retries",
                        self.name, self.retry.count
                    );
                    if !transport.is_connected() {
                        self.set_state(SessionState::Disconnected);
                    }
                    return None;
                },
                Err(e) => {
                    warn!(
                        "Slave {} {} exchange failed (attempt {}/{}): {}",
                        self.name,
                        T::KIND,
                        attempt,
                        attempts,
                        e
                    );
                    transport.close().await;
                    self.set_state(SessionState::Disconnected);
                    if let Err(e) = self.connect(&mut transport).await {
                        warn!("Slave {} reconnect failed: {}", self.name, e);
                    }
                },
            }
        }

        None
    }
}

/// Session for one slave over transport `T`
pub struct SlaveSession<T: Transport> {
    core: Arc<SessionCore<T>>,
    config: SlaveConfig,
    operations: parking_lot::Mutex<Vec<ReadOperation>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<T: Transport> SlaveSession<T> {
    pub fn new(name: impl Into<String>, config: SlaveConfig, transport: T) -> Self {
        let core = SessionCore {
            name: name.into(),
            hw_id: config.hw_id.clone(),
            retry: config.retry_policy(),
            transport: Mutex::new(transport),
            output: OutputAggregator::new(
                config.hw_id.clone(),
                config.additional_properties.clone(),
            ),
            state: RwLock::new(SessionState::Disconnected),
            polling: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        };
        Self {
            core: Arc::new(core),
            config,
            operations: parking_lot::Mutex::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn hw_id(&self) -> &str {
        &self.core.hw_id
    }

    pub fn state(&self) -> SessionState {
        self.core.state()
    }

    pub fn config(&self) -> &SlaveConfig {
        &self.config
    }

    /// Operations prepared by `init_session` and not yet handed to tasks
    pub fn pending_operations(&self) -> usize {
        self.operations.lock().len()
    }

    /// Connect and prepare every valid operation
    ///
    /// A failed connect is logged and left to the polling loops to retry.
    /// Invalid operations are excluded.
    pub async fn init_session(&self) -> Result<()> {
        if self.state() == SessionState::Released {
            return Err(ModbusError::config(format!(
                "Slave {} was released and cannot be initialized again",
                self.name()
            )));
        }

        {
            let mut transport = self.core.transport.lock().await;
            if !transport.is_connected() {
                if let Err(e) = self.core.connect(&mut transport).await {
                    warn!(
                        "Slave {} initial connect to {} failed: {}; retrying on first poll",
                        self.name(),
                        transport.endpoint(),
                        e
                    );
                }
            }
        }

        let mut operations = Vec::with_capacity(self.config.operations.len());
        for (name, op_config) in &self.config.operations {
            match ReadOperation::from_config(name, op_config) {
                Ok(mut operation) => {
                    operation.request =
                        T::encode_request(operation.unit_id, &operation.request_pdu());
                    debug!(
                        "Slave {} operation {}: unit {} {} addr {} qty {} ({})",
                        self.name(),
                        name,
                        operation.unit_id,
                        operation.function_code,
                        operation.address,
                        operation.quantity(),
                        operation.data_type
                    );
                    operations.push(operation);
                },
                Err(e) => {
                    error!("Slave {} operation {} excluded: {}", self.name(), name, e);
                },
            }
        }

        info!(
            "Slave {} ({}) initialized with {}/{} operations",
            self.name(),
            self.hw_id(),
            operations.len(),
            self.config.operations.len()
        );
        *self.operations.lock() = operations;
        Ok(())
    }

    /// Spawn one polling task per prepared operation
    pub async fn process_operations(&self) {
        if self.state() == SessionState::Released {
            warn!("Slave {} is released, not starting polling", self.name());
            return;
        }

        let operations = std::mem::take(&mut *self.operations.lock());
        if operations.is_empty() {
            debug!("Slave {} has no operations to poll", self.name());
            return;
        }

        self.core.polling.store(true, Ordering::Release);
        self.core.set_state(SessionState::Polling);

        let mut tasks = self.tasks.lock().await;
        let count = operations.len();
        for operation in operations {
            tasks.push(tokio::spawn(poll_operation(
                Arc::clone(&self.core),
                operation,
            )));
        }
        info!("Slave {} polling started, {} tasks", self.name(), count);
    }

    /// Write one coil or one or more consecutive holding registers
    pub async fn write_message(&self, write: &WriteOperation) -> Result<()> {
        if self.state() == SessionState::Released {
            return Err(ModbusError::NotConnected);
        }

        let registers = write.registers()?;
        for (offset, word) in registers.iter().enumerate() {
            let address = write.address + offset as u16;
            let pdu = request_pdu(write.function_code, address, *word);
            let request = T::encode_request(write.unit_id, &pdu);

            let response = self.core.send_request(&request).await.ok_or_else(|| {
                ModbusError::timeout(format!(
                    "Slave {} did not answer write to address {}",
                    self.name(),
                    address
                ))
            })?;
            check_write_response(&response, T::DATA_BODY_OFFSET, write.function_code)?;
            debug!(
                "Slave {} wrote 0x{:04X} to address {} (unit {})",
                self.name(),
                word,
                address,
                write.unit_id
            );
        }

        info!(
            "Slave {} write of {} ({}) at address {} complete, {} register(s)",
            self.name(),
            write.value,
            write.data_type,
            write.address,
            registers.len()
        );
        Ok(())
    }

    /// Stop polling, wait for every task, then close the transport
    ///
    /// Safe to call repeatedly and before `init_session`.
    pub async fn release_session(&self) {
        if self.state() == SessionState::Released {
            return;
        }
        self.core.shutdown.cancel();

        let handles = std::mem::take(&mut *self.tasks.lock().await);
        let task_count = handles.len();
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Slave {} polling task ended abnormally: {}", self.name(), e);
            }
        }

        let mut transport = self.core.transport.lock().await;
        transport.close().await;
        self.core.polling.store(false, Ordering::Release);
        self.core.set_state(SessionState::Released);
        info!(
            "Slave {} released, {} polling tasks stopped",
            self.name(),
            task_count
        );
    }

    /// Take and clear the aggregated output
    pub fn collect_and_reset(&self) -> Option<OutContent> {
        self.core.output.take()
    }
}

async fn poll_operation<T: Transport>(core: Arc<SessionCore<T>>, mut operation: ReadOperation) {
    let delay = operation.polling_interval.saturating_sub(T::SILENT_INTERVAL);
    debug!(
        "Slave {} operation {} polling every {}ms",
        core.name,
        operation.name,
        operation.polling_interval.as_millis()
    );

    loop {
        if core.shutdown.is_cancelled() {
            break;
        }

        operation.response = core.send_request(&operation.request).await;
        if operation.response.is_some() {
            match process_response(&operation, T::DATA_BODY_OFFSET) {
                Ok(values) => {
                    let values = out_values(&operation, values);
                    core.output.record(&operation.correlation_id, values);
                },
                Err(e @ ModbusError::Exception { .. }) => {
                    warn!(
                        "Slave {} operation {} rejected by device: {}",
                        core.name, operation.name, e
                    );
                },
                Err(e) => {
                    warn!(
                        "Slave {} operation {} response discarded: {}",
                        core.name, operation.name, e
                    );
                },
            }
        }

        tokio::select! {
            _ = core.shutdown.cancelled() => break,
            _ = tokio::time::sleep(delay) => {},
        }
    }

    debug!("Slave {} operation {} stopped", core.name, operation.name);
}

fn out_values(operation: &ReadOperation, values: Vec<DecodedValue>) -> Vec<OutValue> {
    values
        .into_iter()
        .map(|v| OutValue {
            display_name: operation.display_name.clone(),
            address: operation.format_address(v.address),
            value: v.value,
        })
        .collect()
}

/// Validate the function code of the last response and decode it
///
/// An exception response yields [`ModbusError::Exception`].
pub fn process_response(
    operation: &ReadOperation,
    data_body_offset: usize,
) -> Result<Vec<DecodedValue>> {
    let response = operation
        .response
        .as_deref()
        .ok_or_else(|| ModbusError::protocol("no response to process"))?;
    let function = *response.get(data_body_offset).ok_or_else(|| {
        ModbusError::insufficient_data(format!(
            "response of {} bytes has no function code",
            response.len()
        ))
    })?;

    let expected = operation.function_code;
    if function == expected.exception_code() {
        return Err(ModbusError::Exception {
            function: expected.code(),
            code: response.get(data_body_offset + 1).copied().unwrap_or_default(),
        });
    }
    if function != expected.code() {
        return Err(ModbusError::protocol(format!(
            "expected function 0x{:02X}, got 0x{:02X}",
            expected.code(),
            function
        )));
    }

    decode_response(operation, data_body_offset)
}

/// Slice the payload after the byte count and hand it to the decoder
pub fn decode_response(
    operation: &ReadOperation,
    data_body_offset: usize,
) -> Result<Vec<DecodedValue>> {
    let response = operation
        .response
        .as_deref()
        .ok_or_else(|| ModbusError::protocol("no response to decode"))?;
    let byte_count = usize::from(*response.get(data_body_offset + 1).ok_or_else(|| {
        ModbusError::insufficient_data("response ends before the byte count")
    })?);

    let start = data_body_offset + 2;
    let payload = response.get(start..start + byte_count).ok_or_else(|| {
        ModbusError::insufficient_data(format!(
            "byte count {} exceeds the {} payload bytes received",
            byte_count,
            response.len().saturating_sub(start)
        ))
    })?;

    operation.decoder.values(payload, operation)
}

fn check_write_response(
    response: &[u8],
    data_body_offset: usize,
    function: FunctionCode,
) -> Result<()> {
    let received = *response.get(data_body_offset).ok_or_else(|| {
        ModbusError::insufficient_data("write response has no function code")
    })?;
    if received == function.exception_code() {
        return Err(ModbusError::Exception {
            function: function.code(),
            code: response.get(data_body_offset + 1).copied().unwrap_or_default(),
        });
    }
    if received != function.code() {
        return Err(ModbusError::protocol(format!(
            "write answered with function 0x{:02X}, expected 0x{:02X}",
            received,
            function.code()
        )));
    }
    Ok(())
}
