//! Output publishing
//!
//! The gateway hands every non-empty drain to a [`Publisher`]. The default
//! writes one JSON document per line.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::debug;

use modbus_master::{OutContent, OutMessage};

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, message: &OutMessage) -> Result<()>;
}

/// Publisher writing JSON lines to any async writer
pub struct JsonLinePublisher<W> {
    writer: Mutex<W>,
}

impl<W: AsyncWrite + Unpin + Send> JsonLinePublisher<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

/// JSON lines on standard output
pub fn stdout_publisher() -> JsonLinePublisher<tokio::io::Stdout> {
    JsonLinePublisher::new(tokio::io::stdout())
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> Publisher for JsonLinePublisher<W> {
    async fn publish(&self, message: &OutMessage) -> Result<()> {
        let mut line = serde_json::to_vec(message).context("Failed to serialize output")?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer
            .write_all(&line)
            .await
            .context("Failed to write output")?;
        writer.flush().await.context("Failed to flush output")?;
        Ok(())
    }
}

/// Wrap drained content into a message and publish it
///
/// Returns `false` without publishing when nothing was drained.
pub async fn publish_content(publisher: &dyn Publisher, content: Vec<OutContent>) -> Result<bool> {
    if content.is_empty() {
        return Ok(false);
    }
    let message = OutMessage::new(content);
    debug!(
        "Publishing {} content block(s) at {}",
        message.content.len(),
        message.publish_timestamp
    );
    publisher.publish(&message).await?;
    Ok(true)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use modbus_master::{OutData, OutValue};

    fn content() -> OutContent {
        OutContent {
            hw_id: "meter-1".to_string(),
            data: vec![OutData {
                correlation_id: "DefaultCorrelationId".to_string(),
                source_timestamp: "2026-01-01 00:00:00".to_string(),
                values: vec![OutValue {
                    display_name: "Voltage".to_string(),
                    address: "400001".to_string(),
                    value: "230.5".to_string(),
                }],
            }],
            additional_properties: None,
        }
    }

    #[tokio::test]
    async fn test_publish_json_line() {
        let publisher = JsonLinePublisher::new(Vec::new());
        assert!(publish_content(&publisher, vec![content()]).await.unwrap());

        let output = String::from_utf8(publisher.into_inner()).unwrap();
        assert!(output.ends_with('\n'));
        let message: OutMessage = serde_json::from_str(output.trim_end()).unwrap();
        assert_eq!(message.content, vec![content()]);
        assert_eq!(message.publish_timestamp.len(), 19);
    }

    #[tokio::test]
    async fn test_empty_drain_is_not_published() {
        let publisher = JsonLinePublisher::new(Vec::new());
        assert!(!publish_content(&publisher, Vec::new()).await.unwrap());
        assert!(publisher.into_inner().is_empty());
    }
}
