//! Modbus RTU transport
//!
//! Frames are `unit | PDU | CRC16 (little endian)`. A response is read as a
//! 3-byte prefix followed by whatever the function code implies, and is
//! dropped when its CRC does not verify.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{RetryBudget, Transport};
use crate::config::RetryPolicy;
use crate::constants::{
    CRC_LEN, EXCEPTION_FLAG, RTU_DATA_BODY_OFFSET, RTU_REQUEST_SIZE, RTU_RESPONSE_PREFIX_LEN,
    RTU_SETTLE_DELAY, RTU_SILENT_INTERVAL,
};
use crate::crc::{append_crc, verify_crc};
use crate::error::{ModbusError, Result};
use crate::operation::PDU_LEN;
use crate::serial::{SerialDevice, SerialFactory, SerialSettings};
use crate::types::FunctionCode;

/// Serial connection to one or more units on a line
pub struct RtuTransport {
    settings: SerialSettings,
    factory: SerialFactory,
    settle_delay: Duration,
    device: Option<Box<dyn SerialDevice>>,
}

impl RtuTransport {
    pub fn new(settings: SerialSettings, factory: SerialFactory) -> Self {
        Self {
            settings,
            factory,
            settle_delay: RTU_SETTLE_DELAY,
            device: None,
        }
    }

    /// Override the pause after opening the port
    pub fn with_settle_delay(mut self, settle_delay: Duration) -> Self {
        self.settle_delay = settle_delay;
        self
    }

    pub fn settings(&self) -> &SerialSettings {
        &self.settings
    }
}

#[async_trait]
impl Transport for RtuTransport {
    const KIND: &'static str = "RTU";
    const DATA_BODY_OFFSET: usize = RTU_DATA_BODY_OFFSET;
    const REQUEST_SIZE: usize = RTU_REQUEST_SIZE;
    const SILENT_INTERVAL: Duration = RTU_SILENT_INTERVAL;

    fn encode_request(unit_id: u8, pdu: &[u8; PDU_LEN]) -> Vec<u8> {
        let mut frame = Vec::with_capacity(RTU_REQUEST_SIZE);
        frame.push(unit_id);
        frame.extend_from_slice(pdu);
        append_crc(&mut frame);
        frame
    }

    fn endpoint(&self) -> String {
        self.settings.to_string()
    }

    fn is_connected(&self) -> bool {
        self.device.as_ref().is_some_and(|d| d.is_open())
    }

    async fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        // Never reuse a device that failed
        self.close().await;

        let mut device = (self.factory)(&self.settings)?;
        device.open().await?;
        if !self.settle_delay.is_zero() {
            debug!(
                "RTU {}: settling {}ms after open",
                self.settings.port,
                self.settle_delay.as_millis()
            );
            tokio::time::sleep(self.settle_delay).await;
        }
        self.device = Some(device);
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(mut device) = self.device.take() {
            if let Err(e) = device.close().await {
                debug!("RTU close {}: {}", self.settings.port, e);
            } else {
                info!("RTU closed: {}", self.settings.port);
            }
        }
    }

    async fn exchange(
        &mut self,
        request: &[u8],
        retry: &RetryPolicy,
    ) -> Result<Option<Vec<u8>>> {
        let device = self.device.as_mut().ok_or(ModbusError::NotConnected)?;

        device.discard_in_buffer()?;
        device.discard_out_buffer()?;
        device.write(request).await?;

        let mut budget = RetryBudget::new(retry);
        let mut response = vec![0u8; RTU_RESPONSE_PREFIX_LEN];
        if !read_full(device.as_mut(), &mut response, &mut budget).await? {
            warn!(
                "RTU {}: no response prefix after {} empty reads",
                self.settings.port,
                budget.failures()
            );
            return Ok(None);
        }

        response.resize(RTU_RESPONSE_PREFIX_LEN + remaining_len(&response), 0);
        if !read_full(
            device.as_mut(),
            &mut response[RTU_RESPONSE_PREFIX_LEN..],
            &mut budget,
        )
        .await?
        {
            warn!(
                "RTU {}: truncated response after {} empty reads",
                self.settings.port,
                budget.failures()
            );
            return Ok(None);
        }

        if !verify_crc(&response) {
            warn!(
                "RTU {}: CRC mismatch, dropping {}",
                self.settings.port,
                hex::encode(&response)
            );
            return Ok(None);
        }
        Ok(Some(response))
    }
}

/// Bytes still expected after the 3-byte prefix
fn remaining_len(prefix: &[u8]) -> usize {
    let function = prefix[1];
    if function & EXCEPTION_FLAG != 0 {
        return CRC_LEN;
    }
    match FunctionCode::from_code(function) {
        // Echo of address and value
        Some(FunctionCode::WriteSingleCoil | FunctionCode::WriteSingleRegister) => {
            RTU_REQUEST_SIZE - RTU_RESPONSE_PREFIX_LEN
        },
        _ => usize::from(prefix[2]) + CRC_LEN,
    }
}

async fn read_full(
    device: &mut dyn SerialDevice,
    buf: &mut [u8],
    budget: &mut RetryBudget,
) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = device.read(&mut buf[filled..]).await?;
        if n == 0 {
            if !budget.spend(true).await {
                return Ok(false);
            }
            continue;
        }
        filled += n;
    }
    Ok(true)
}
