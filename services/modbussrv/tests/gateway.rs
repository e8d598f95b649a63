//! Gateway lifecycle against a loopback Modbus TCP slave

#![allow(clippy::disallowed_methods)] // Integration test - unwrap is acceptable

use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use modbus_master::{OutMessage, WriteCommand};
use modbussrv::{load_configuration, Gateway, Publisher};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

#[derive(Default)]
struct CollectingPublisher {
    messages: Mutex<Vec<OutMessage>>,
}

#[async_trait]
impl Publisher for CollectingPublisher {
    async fn publish(&self, message: &OutMessage) -> anyhow::Result<()> {
        self.messages.lock().unwrap().push(message.clone());
        Ok(())
    }
}

/// Answers FC03 with 0x002A per register and echoes FC06
async fn start_slave() -> (u16, Arc<Mutex<Vec<Vec<u8>>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&requests);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let log = Arc::clone(&log);
            tokio::spawn(async move {
                let mut request = [0u8; 12];
                while socket.read_exact(&mut request).await.is_ok() {
                    log.lock().unwrap().push(request.to_vec());
                    let reply = match request[7] {
                        0x03 => {
                            let quantity = u16::from_be_bytes([request[10], request[11]]);
                            let mut pdu = vec![0x03, (quantity * 2) as u8];
                            for _ in 0..quantity {
                                pdu.extend_from_slice(&[0x00, 0x2A]);
                            }
                            let mut frame = vec![0, 0, 0, 0];
                            frame.extend_from_slice(&((pdu.len() + 1) as u16).to_be_bytes());
                            frame.push(request[6]);
                            frame.extend_from_slice(&pdu);
                            frame
                        },
                        _ => request.to_vec(),
                    };
                    if socket.write_all(&reply).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    (port, requests)
}

fn write_config(path: &Path, port: u16, hw_id: &str) {
    let json = format!(
        r#"{{
            "publishInterval": 100,
            "slaveConfigs": {{
                "Slave01": {{
                    "slaveConnection": "127.0.0.1",
                    "tcpPort": {port},
                    "retryCount": 3,
                    "retryInterval": 20,
                    "hwId": "{hw_id}",
                    "operations": {{
                        "Op01": {{ "unitId": 1, "startAddress": "40001", "count": 2,
                                   "dataType": "Int16", "pollingInterval": 50 }}
                    }}
                }}
            }}
        }}"#
    );
    let mut file = std::fs::File::create(path).unwrap();
    file.write_all(json.as_bytes()).unwrap();
}

async fn publish_until_output(gateway: &Gateway, publisher: &CollectingPublisher) -> OutMessage {
    for _ in 0..100 {
        gateway.publish().await;
        if let Some(message) = publisher.messages.lock().unwrap().pop() {
            return message;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("nothing published");
}

#[tokio::test]
async fn test_publish_reload_and_shutdown() {
    common::logging::init_test_logging();
    let (port, requests) = start_slave().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("modbus.json");
    write_config(&path, port, "meter-A");

    let config = load_configuration(&path).unwrap();
    let publisher = Arc::new(CollectingPublisher::default());
    let mut gateway = Gateway::start(path.clone(), config, publisher.clone())
        .await
        .unwrap();
    assert_eq!(gateway.handle().len(), 1);

    let message = publish_until_output(&gateway, &publisher).await;
    assert_eq!(message.content[0].hw_id, "meter-A");
    let values = &message.content[0].data[0].values;
    assert_eq!(values[0].value, "42");
    assert_eq!(values[1].address, "40002");

    // Writes go through the same connection
    let command: WriteCommand = serde_json::from_str(
        r#"{ "hwId": "meter-A", "unitId": 1, "address": "40005", "value": 9 }"#,
    )
    .unwrap();
    gateway.write(&command).await;
    assert!(requests
        .lock()
        .unwrap()
        .iter()
        .any(|r| r[7..] == [0x06, 0x00, 0x04, 0x00, 0x09]));

    write_config(&path, port, "meter-B");
    gateway.reload().await.unwrap();
    assert_eq!(gateway.handle().sessions()[0].hw_id(), "meter-B");
    publisher.messages.lock().unwrap().clear();

    let message = publish_until_output(&gateway, &publisher).await;
    assert_eq!(message.content[0].hw_id, "meter-B");

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_failed_reload_keeps_configuration() {
    common::logging::init_test_logging();
    let (port, _requests) = start_slave().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("modbus.json");
    write_config(&path, port, "meter-A");

    let config = load_configuration(&path).unwrap();
    let publisher = Arc::new(CollectingPublisher::default());
    let mut gateway = Gateway::start(path.clone(), config, publisher.clone())
        .await
        .unwrap();

    std::fs::write(&path, "{ not json").unwrap();
    assert!(gateway.reload().await.is_err());
    assert_eq!(gateway.config().slave_configs["Slave01"].hw_id, "meter-A");
    assert!(!gateway.handle().is_released());

    gateway.shutdown().await;
}

fn send_signal(name: &str) {
    let status = std::process::Command::new("kill")
        .args([format!("-{name}"), std::process::id().to_string()])
        .status()
        .unwrap();
    assert!(status.success());
}

async fn wait_for_hw_id(publisher: &CollectingPublisher, hw_id: &str) {
    for _ in 0..250 {
        if publisher
            .messages
            .lock()
            .unwrap()
            .iter()
            .any(|m| m.content.iter().any(|c| c.hw_id == hw_id))
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("no output for {hw_id}");
}

#[cfg(unix)]
#[tokio::test]
async fn test_run_reloads_on_sighup_and_stops_on_sigterm() {
    common::logging::init_test_logging();
    let (port, _requests) = start_slave().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("modbus.json");
    write_config(&path, port, "meter-A");

    let config = load_configuration(&path).unwrap();
    let publisher = Arc::new(CollectingPublisher::default());
    let gateway = Gateway::start(path.clone(), config, publisher.clone())
        .await
        .unwrap();
    let service = tokio::spawn(gateway.run(false));

    // Output proves the loop, and its signal handlers, are running
    wait_for_hw_id(&publisher, "meter-A").await;

    write_config(&path, port, "meter-B");
    send_signal("HUP");
    wait_for_hw_id(&publisher, "meter-B").await;

    send_signal("TERM");
    tokio::time::timeout(Duration::from_secs(5), service)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[test]
fn test_sample_configuration_is_valid() {
    let config = load_configuration(Path::new("config/modbus.json")).unwrap();
    assert_eq!(config.slave_configs.len(), 2);
    assert_eq!(config.publish_interval, 5000);
}
