//! RTU sessions over a scripted serial device

#![allow(clippy::disallowed_methods)] // Integration test - unwrap is acceptable

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use modbus_master::crc::append_crc;
use modbus_master::{
    ModbusError, ModuleConfig, Parity, Result, RtuTransport, SerialDevice, SerialFactory,
    SerialSettings, SessionState, SessionsHandle, SlaveSession, StopBits, WriteCommand,
    WriteOperation,
};
use parking_lot::Mutex;

type Responder = Arc<dyn Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync>;

#[derive(Default)]
struct LineState {
    opens: usize,
    written: Vec<Vec<u8>>,
    pending: VecDeque<u8>,
}

/// Serial line whose slave answers through a responder
#[derive(Clone)]
struct MockLine {
    state: Arc<Mutex<LineState>>,
    responder: Responder,
}

impl MockLine {
    fn new(responder: Responder) -> Self {
        Self {
            state: Arc::new(Mutex::new(LineState::default())),
            responder,
        }
    }

    fn factory(&self) -> SerialFactory {
        let line = self.clone();
        Arc::new(move |_settings: &SerialSettings| {
            Ok(Box::new(MockSerial {
                line: line.clone(),
                open: false,
            }) as Box<dyn SerialDevice>)
        })
    }

    fn written(&self) -> Vec<Vec<u8>> {
        self.state.lock().written.clone()
    }

    fn opens(&self) -> usize {
        self.state.lock().opens
    }
}

struct MockSerial {
    line: MockLine,
    open: bool,
}

#[async_trait]
impl SerialDevice for MockSerial {
    async fn open(&mut self) -> Result<()> {
        self.line.state.lock().opens += 1;
        self.open = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.open = false;
        Ok(())
    }

    async fn write(&mut self, buf: &[u8]) -> Result<()> {
        let reply = (self.line.responder)(buf);
        let mut state = self.line.state.lock();
        state.written.push(buf.to_vec());
        if let Some(reply) = reply {
            state.pending.extend(reply);
        }
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.line.state.lock();
        let n = buf.len().min(state.pending.len());
        for slot in buf.iter_mut().take(n) {
            *slot = state.pending.pop_front().unwrap_or_default();
        }
        Ok(n)
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn discard_in_buffer(&mut self) -> Result<()> {
        self.line.state.lock().pending.clear();
        Ok(())
    }

    fn discard_out_buffer(&mut self) -> Result<()> {
        Ok(())
    }
}

fn framed(bytes: &[u8]) -> Vec<u8> {
    let mut frame = bytes.to_vec();
    append_crc(&mut frame);
    frame
}

fn settings() -> SerialSettings {
    SerialSettings {
        port: "/dev/ttyUSB0".to_string(),
        baud_rate: 9600,
        data_bits: 8,
        parity: Parity::Even,
        stop_bits: StopBits::One,
    }
}

fn module_config(operations: &str) -> ModuleConfig {
    let json = format!(
        r#"{{
            "slaveConfigs": {{
                "Line1": {{
                    "slaveConnection": "/dev/ttyUSB0",
                    "retryCount": 3,
                    "retryInterval": 5,
                    "hwId": "Inverter-07",
                    "baudRate": 9600,
                    "dataBits": 8,
                    "parity": "Even",
                    "stopBits": "One",
                    "operations": {operations}
                }}
            }}
        }}"#
    );
    ModuleConfig::from_json(&json).unwrap()
}

fn session(line: &MockLine, operations: &str) -> SlaveSession<RtuTransport> {
    let config = module_config(operations);
    let transport =
        RtuTransport::new(settings(), line.factory()).with_settle_delay(Duration::ZERO);
    SlaveSession::new("Line1", config.slave_configs["Line1"].clone(), transport)
}

async fn wait_for_values(session: &SlaveSession<RtuTransport>) -> Vec<String> {
    for _ in 0..100 {
        if let Some(content) = session.collect_and_reset() {
            return content.data[0].values.iter().map(|v| v.value.clone()).collect();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("no output produced");
}

#[tokio::test]
async fn test_polls_discrete_inputs() {
    let line = MockLine::new(Arc::new(|request: &[u8]| {
        assert_eq!(request.len(), 8);
        Some(framed(&[request[0], 0x02, 0x01, 0x0A]))
    }));
    let session = session(
        &line,
        r#"{ "Op01": { "unitId": 5, "startAddress": "100001", "count": 4,
                       "dataType": "Bit", "pollingInterval": 50 } }"#,
    );

    session.init_session().await.unwrap();
    assert_eq!(session.state(), SessionState::Connected);
    session.process_operations().await;
    assert_eq!(session.state(), SessionState::Polling);

    let values = wait_for_values(&session).await;
    session.release_session().await;

    assert_eq!(values[..4], ["0", "1", "0", "1"]);
    assert_eq!(
        line.written()[0],
        framed(&[0x05, 0x02, 0x00, 0x00, 0x00, 0x04])
    );
    assert_eq!(session.state(), SessionState::Released);
}

#[tokio::test]
async fn test_polls_swapped_float() {
    // 230.5 = 0x43668000, word swapped on the wire
    let line = MockLine::new(Arc::new(|request: &[u8]| {
        Some(framed(&[request[0], 0x03, 0x04, 0x80, 0x00, 0x43, 0x66]))
    }));
    let session = session(
        &line,
        r#"{ "Op01": { "unitId": 1, "startAddress": "40001", "count": 1,
                       "dataType": "Float32", "swapMode": "CDAB",
                       "pollingInterval": 50 } }"#,
    );
    session.init_session().await.unwrap();
    session.process_operations().await;
    let values = wait_for_values(&session).await;
    session.release_session().await;

    assert_eq!(values[0], "230.5");
}

#[tokio::test]
async fn test_corrupt_crc_is_dropped() {
    let line = MockLine::new(Arc::new(|request: &[u8]| {
        let mut reply = framed(&[request[0], 0x03, 0x02, 0x00, 0x2A]);
        reply[5] ^= 0x01;
        Some(reply)
    }));
    let session = session(
        &line,
        r#"{ "Op01": { "unitId": 1, "startAddress": "40001", "count": 1,
                       "dataType": "Int16", "pollingInterval": 20 } }"#,
    );
    session.init_session().await.unwrap();
    session.process_operations().await;
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(session.collect_and_reset().is_none());
    assert!(!line.written().is_empty());
    session.release_session().await;
}

#[tokio::test]
async fn test_write_single_register() {
    let line = MockLine::new(Arc::new(|request: &[u8]| Some(request.to_vec())));
    let session = session(&line, "{}");
    session.init_session().await.unwrap();

    let command: WriteCommand = serde_json::from_str(
        r#"{ "hwId": "Inverter-07", "unitId": 2, "address": "40101", "value": -2 }"#,
    )
    .unwrap();
    let write = WriteOperation::from_command(&command).unwrap();
    session.write_message(&write).await.unwrap();

    assert_eq!(
        line.written(),
        vec![framed(&[0x02, 0x06, 0x00, 0x64, 0xFF, 0xFE])]
    );
}

#[tokio::test]
async fn test_write_exception() {
    let line = MockLine::new(Arc::new(|request: &[u8]| {
        Some(framed(&[request[0], 0x85, 0x04]))
    }));
    let session = session(&line, "{}");

    let command: WriteCommand = serde_json::from_str(
        r#"{ "hwId": "Inverter-07", "unitId": 1, "address": "00010", "value": 1 }"#,
    )
    .unwrap();
    let write = WriteOperation::from_command(&command).unwrap();
    let err = session.write_message(&write).await.unwrap_err();
    assert_eq!(
        err,
        ModbusError::Exception {
            function: 0x05,
            code: 0x04
        }
    );
    // First use opened the port lazily
    assert_eq!(line.opens(), 1);
}

#[tokio::test]
async fn test_release_before_init() {
    let line = MockLine::new(Arc::new(|_request: &[u8]| None));
    let session = session(&line, "{}");
    session.release_session().await;
    assert_eq!(session.state(), SessionState::Released);
    assert!(session.init_session().await.is_err());
    assert_eq!(line.opens(), 0);
}

#[tokio::test]
async fn test_invalid_operations_are_excluded() {
    let line = MockLine::new(Arc::new(|_request: &[u8]| None));
    let session = session(
        &line,
        r#"{ "Good": { "unitId": 1, "startAddress": "40001", "count": 1, "dataType": "Int16" },
             "TooMany": { "unitId": 1, "startAddress": "40001", "count": 33, "dataType": "Int16" },
             "BitOnRegister": { "unitId": 1, "startAddress": "40001", "count": 1, "dataType": "Bit" } }"#,
    );
    session.init_session().await.unwrap();
    assert_eq!(session.pending_operations(), 1);
    session.release_session().await;
}

#[tokio::test]
async fn test_handle_routes_writes_through_factory() {
    let line = MockLine::new(Arc::new(|request: &[u8]| Some(request.to_vec())));
    let config = module_config("{}");

    // Handle-built transports keep the default settle delay
    tokio::time::pause();
    let mut handle = SessionsHandle::create_with_serial_factory(&config, line.factory())
        .await
        .unwrap();
    assert_eq!(handle.len(), 1);
    assert_eq!(line.opens(), 1);

    let command: WriteCommand = serde_json::from_str(
        r#"{ "hwId": "Inverter-07", "unitId": 1, "address": "40001", "value": 300 }"#,
    )
    .unwrap();
    handle.write_message(&command).await.unwrap();
    tokio::time::resume();

    assert_eq!(
        line.written(),
        vec![framed(&[0x01, 0x06, 0x00, 0x00, 0x01, 0x2C])]
    );
    handle.release().await;
}
