//! Modbus TCP transport
//!
//! MBAP framing with transaction id and protocol id fixed at zero. Responses
//! are read in two phases: the 7-byte header, then the `length - 1` bytes it
//! announces.

use std::io::ErrorKind;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::{RetryBudget, Transport};
use crate::config::RetryPolicy;
use crate::constants::{
    MAX_PDU_SIZE, RESPONSE_BUFFER_SIZE, TCP_CONNECT_TIMEOUT, TCP_DATA_BODY_OFFSET,
    TCP_HEADER_LEN, TCP_REQUEST_LENGTH_FIELD, TCP_REQUEST_SIZE, TCP_SILENT_INTERVAL,
};
use crate::error::{ModbusError, Result};
use crate::operation::PDU_LEN;

/// Floor for the per-read timeout when the retry interval is zero
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// TCP connection to one slave
#[derive(Debug)]
pub struct TcpTransport {
    host: String,
    port: u16,
    connect_timeout: Duration,
    stream: Option<TcpStream>,
}

impl TcpTransport {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: TCP_CONNECT_TIMEOUT,
            stream: None,
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    const KIND: &'static str = "TCP";
    const DATA_BODY_OFFSET: usize = TCP_DATA_BODY_OFFSET;
    const REQUEST_SIZE: usize = TCP_REQUEST_SIZE;
    const SILENT_INTERVAL: Duration = TCP_SILENT_INTERVAL;

    fn encode_request(unit_id: u8, pdu: &[u8; PDU_LEN]) -> Vec<u8> {
        let mut frame = Vec::with_capacity(TCP_REQUEST_SIZE);
        // Transaction ID and Protocol ID
        frame.extend_from_slice(&[0, 0, 0, 0]);
        frame.extend_from_slice(&TCP_REQUEST_LENGTH_FIELD.to_be_bytes());
        frame.push(unit_id);
        frame.extend_from_slice(pdu);
        frame
    }

    fn endpoint(&self) -> String {
        self.address()
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn connect(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let addr = self.address();
        debug!("TCP connecting: {}", addr);
        match timeout(self.connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("TCP_NODELAY: {}", e);
                }
                self.stream = Some(stream);
                Ok(())
            },
            Ok(Err(e)) => Err(ModbusError::connection(format!(
                "Failed to connect to {addr}: {e}"
            ))),
            Err(_) => Err(ModbusError::timeout(format!(
                "Connection to {addr} timed out"
            ))),
        }
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!("TCP shutdown {}: {}", self.address(), e);
            }
        }
    }

    async fn exchange(
        &mut self,
        request: &[u8],
        retry: &RetryPolicy,
    ) -> Result<Option<Vec<u8>>> {
        let stream = self.stream.as_mut().ok_or(ModbusError::NotConnected)?;

        let stale = drain_stale(stream)?;
        if stale > 0 {
            debug!("TCP dropped {} stale bytes before request", stale);
        }

        stream
            .write_all(request)
            .await
            .map_err(|e| ModbusError::Io(format!("TCP send error: {e}")))?;

        let mut budget = RetryBudget::new(retry);
        let response = read_response(stream, &mut budget).await?;

        if response.is_none() {
            warn!(
                "TCP {}: no complete response after {} empty reads",
                self.address(),
                budget.failures()
            );
            if budget.peer_closed() {
                // EOF was seen; reconnect on the next exchange
                self.stream = None;
            }
        }
        Ok(response)
    }
}

/// Discard bytes left over from earlier, late responses
fn drain_stale(stream: &TcpStream) -> Result<usize> {
    let mut scratch = [0u8; RESPONSE_BUFFER_SIZE];
    let mut drained = 0;
    loop {
        match stream.try_read(&mut scratch) {
            Ok(0) => {
                return Err(ModbusError::connection("peer closed the connection"));
            },
            Ok(n) => drained += n,
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(drained),
            Err(e) => return Err(e.into()),
        }
    }
}

async fn read_response(
    stream: &mut TcpStream,
    budget: &mut RetryBudget,
) -> Result<Option<Vec<u8>>> {
    let mut response = vec![0u8; TCP_HEADER_LEN];
    if !read_full(stream, &mut response, budget).await? {
        return Ok(None);
    }

    let length = usize::from(u16::from_be_bytes([response[4], response[5]]));
    if length < 2 || length > MAX_PDU_SIZE + 1 {
        return Err(ModbusError::protocol(format!(
            "invalid MBAP length field {length}"
        )));
    }

    response.resize(TCP_HEADER_LEN + length - 1, 0);
    if !read_full(stream, &mut response[TCP_HEADER_LEN..], budget).await? {
        return Ok(None);
    }
    Ok(Some(response))
}

/// Fill `buf` completely; `false` when the retry budget runs out first
async fn read_full(
    stream: &mut TcpStream,
    buf: &mut [u8],
    budget: &mut RetryBudget,
) -> Result<bool> {
    let read_timeout = budget.interval().max(MIN_READ_TIMEOUT);
    let mut filled = 0;

    while filled < buf.len() {
        match timeout(read_timeout, stream.read(&mut buf[filled..])).await {
            Ok(Ok(0)) => {
                budget.mark_peer_closed();
                if !budget.spend(true).await {
                    return Ok(false);
                }
            },
            Ok(Ok(n)) => filled += n,
            Ok(Err(e)) => return Err(ModbusError::Io(format!("TCP receive error: {e}"))),
            Err(_) => {
                if !budget.spend(false).await {
                    return Ok(false);
                }
            },
        }
    }
    Ok(true)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::operation::request_pdu;
    use crate::types::FunctionCode;
    use tokio::net::TcpListener;
    use tracing_test::traced_test;

    fn policy(count: u32) -> RetryPolicy {
        RetryPolicy {
            count,
            interval: Duration::from_millis(20),
        }
    }

    async fn connected_pair() -> (TcpTransport, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut transport = TcpTransport::new("127.0.0.1", port);
        let (connect, accept) = tokio::join!(transport.connect(), listener.accept());
        connect.unwrap();
        (transport, accept.unwrap().0)
    }

    #[test]
    fn test_encode_request() {
        let pdu = request_pdu(FunctionCode::ReadHoldingRegisters, 0x006B, 3);
        let frame = TcpTransport::encode_request(0x11, &pdu);
        assert_eq!(
            frame,
            vec![0x00, 0x00, 0x00, 0x00, 0x00, 0x06, 0x11, 0x03, 0x00, 0x6B, 0x00, 0x03]
        );
        assert_eq!(frame.len(), TcpTransport::REQUEST_SIZE);
    }

    #[tokio::test]
    async fn test_exchange_two_phase_read() {
        let (mut transport, mut slave) = connected_pair().await;
        let request = TcpTransport::encode_request(
            1,
            &request_pdu(FunctionCode::ReadHoldingRegisters, 0, 1),
        );

        let server = tokio::spawn(async move {
            let mut buf = [0u8; TCP_REQUEST_SIZE];
            slave.read_exact(&mut buf).await.unwrap();
            // Header and body in separate segments
            slave.write_all(&[0, 0, 0, 0, 0, 5, 1]).await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
            slave.write_all(&[0x03, 0x02, 0x12, 0x34]).await.unwrap();
            (buf, slave)
        });

        let response = transport.exchange(&request, &policy(10)).await.unwrap();
        let (received, _slave) = server.await.unwrap();
        assert_eq!(received.to_vec(), request);
        assert_eq!(
            response.unwrap(),
            vec![0, 0, 0, 0, 0, 5, 1, 0x03, 0x02, 0x12, 0x34]
        );
    }

    #[tokio::test]
    async fn test_exchange_drops_stale_bytes() {
        let (mut transport, mut slave) = connected_pair().await;
        slave.write_all(&[0xDE, 0xAD, 0xBE, 0xEF]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let server = tokio::spawn(async move {
            let mut buf = [0u8; TCP_REQUEST_SIZE];
            slave.read_exact(&mut buf).await.unwrap();
            slave
                .write_all(&[0, 0, 0, 0, 0, 3, 1, 0x83, 0x02])
                .await
                .unwrap();
            slave
        });

        let request = TcpTransport::encode_request(
            1,
            &request_pdu(FunctionCode::ReadHoldingRegisters, 0, 1),
        );
        let response = transport.exchange(&request, &policy(10)).await.unwrap();
        let _slave = server.await.unwrap();
        assert_eq!(response.unwrap(), vec![0, 0, 0, 0, 0, 3, 1, 0x83, 0x02]);
    }

    #[tokio::test]
    async fn test_exchange_exhausts_retries() {
        let (mut transport, _slave) = connected_pair().await;
        let request = TcpTransport::encode_request(
            1,
            &request_pdu(FunctionCode::ReadCoils, 0, 8),
        );
        let response = transport.exchange(&request, &policy(3)).await.unwrap();
        assert!(response.is_none());
        // Silence alone keeps the connection
        assert!(transport.is_connected());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_header_and_body_share_retry_budget() {
        let (mut transport, mut slave) = connected_pair().await;
        let request = TcpTransport::encode_request(
            1,
            &request_pdu(FunctionCode::ReadHoldingRegisters, 0, 2),
        );

        // Header after 3 timed-out reads, body after 1.5 more intervals.
        // A fresh budget for the body would still accept it.
        let server = tokio::spawn(async move {
            let mut buf = [0u8; TCP_REQUEST_SIZE];
            slave.read_exact(&mut buf).await.unwrap();
            tokio::time::sleep(Duration::from_millis(350)).await;
            slave.write_all(&[0, 0, 0, 0, 0, 7, 1]).await.unwrap();
            tokio::time::sleep(Duration::from_millis(150)).await;
            let _ = slave.write_all(&[0x03, 0x04, 0, 1, 0, 2]).await;
            slave
        });

        let retry = RetryPolicy {
            count: 4,
            interval: Duration::from_millis(100),
        };
        let response = transport.exchange(&request, &retry).await.unwrap();
        assert!(response.is_none());
        assert!(logs_contain("no complete response after 4 empty reads"));
        let _slave = server.await.unwrap();
    }

    #[tokio::test]
    async fn test_exchange_without_connection() {
        let mut transport = TcpTransport::new("127.0.0.1", 1);
        let err = transport.exchange(&[0u8; 12], &policy(1)).await.unwrap_err();
        assert_eq!(err, ModbusError::NotConnected);
    }
}
