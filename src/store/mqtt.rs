use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{Client, Connection, Event, MqttOptions};
use rumqttc::Transport;

use crate::alert::AlertRecord;
use crate::store::AlertQueue;

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttEndpoint {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

impl MqttEndpoint {
    /// Parse `host:port`, `mqtt://host:port`, or `mqtts://host:port`.
    pub fn parse(addr: &str) -> Result<Self> {
        let mut use_tls = false;
        let mut remainder = addr.trim();

        if let Some((scheme, rest)) = remainder.split_once("://") {
            match scheme {
                "mqtt" | "tcp" => {}
                "mqtts" | "ssl" => use_tls = true,
                other => return Err(anyhow!("unsupported MQTT scheme: {}", other)),
            }
            remainder = rest;
        }

        let (host, port) = split_host_port(remainder)?;
        Ok(Self {
            host,
            port,
            use_tls,
        })
    }
}

fn split_host_port(addr: &str) -> Result<(String, u16)> {
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| anyhow!("invalid MQTT address: {}", addr))?;
        let port = rest
            .strip_prefix(':')
            .ok_or_else(|| anyhow!("missing MQTT port in {}", addr))?;
        let port: u16 = port.parse().context("invalid MQTT port")?;
        return Ok((host.to_string(), port));
    }
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("missing MQTT port in {}", addr))?;
    if host.is_empty() {
        return Err(anyhow!("missing MQTT host in {}", addr));
    }
    let port: u16 = port.parse().context("invalid MQTT port")?;
    Ok((host.to_string(), port))
}

/// Alert queue that publishes each record as JSON with QoS 1.
///
/// The broker connection is driven on a background thread; publishing only
/// hands the message to the client's request channel.
pub struct MqttAlertQueue {
    client: Client,
    topic: String,
    next_id: AtomicU64,
    stopping: Arc<AtomicBool>,
    connection_handle: Mutex<Option<JoinHandle<()>>>,
}

impl MqttAlertQueue {
    pub fn connect(endpoint: &MqttEndpoint, client_id: &str, topic: &str) -> Result<Self> {
        let mut options = MqttOptions::new(client_id, &endpoint.host, endpoint.port);
        options.set_keep_alive(Duration::from_secs(60));
        options.set_clean_start(true);
        if endpoint.use_tls {
            options.set_transport(Transport::tls_with_default_config());
        }

        let (client, connection) = Client::new(options, 10);
        log::info!(
            "MQTT alert queue on {}:{} (TLS: {}), topic {}",
            endpoint.host,
            endpoint.port,
            endpoint.use_tls,
            topic
        );
        Ok(Self::new(client, connection, topic))
    }

    fn new(client: Client, mut connection: Connection, topic: &str) -> Self {
        let stopping = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stopping);
        let handle = std::thread::spawn(move || {
            for event in connection.iter() {
                match event {
                    Ok(Event::Incoming(_)) | Ok(Event::Outgoing(_)) => {}
                    Err(e) => {
                        if stop_flag.load(Ordering::SeqCst) {
                            break;
                        }
                        log::warn!("MQTT connection error: {}", e);
                        std::thread::sleep(RECONNECT_DELAY);
                    }
                }
            }
        });

        Self {
            client,
            topic: topic.to_string(),
            next_id: AtomicU64::new(1),
            stopping,
            connection_handle: Mutex::new(Some(handle)),
        }
    }

    pub fn disconnect(&self) -> Result<()> {
        let handle = self
            .connection_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            return Ok(());
        };
        self.stopping.store(true, Ordering::SeqCst);
        self.client.disconnect()?;
        let _ = handle.join();
        Ok(())
    }
}

impl AlertQueue for MqttAlertQueue {
    fn enqueue(&self, record: &AlertRecord) -> Result<u64> {
        let payload = serde_json::to_vec(record)?;
        self.client
            .publish(self.topic.as_str(), QoS::AtLeastOnce, false, payload)
            .context("queue alert for MQTT publish")?;
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

impl Drop for MqttAlertQueue {
    fn drop(&mut self) {
        if let Err(e) = self.disconnect() {
            log::debug!("MQTT disconnect: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_tls_endpoints() -> Result<()> {
        assert_eq!(
            MqttEndpoint::parse("broker.local:1883")?,
            MqttEndpoint {
                host: "broker.local".into(),
                port: 1883,
                use_tls: false
            }
        );
        let tls = MqttEndpoint::parse("mqtts://[::1]:8883")?;
        assert_eq!(tls.host, "::1");
        assert!(tls.use_tls);
        Ok(())
    }

    #[test]
    fn rejects_bad_endpoints() {
        assert!(MqttEndpoint::parse("http://broker:80").is_err());
        assert!(MqttEndpoint::parse("broker").is_err());
        assert!(MqttEndpoint::parse(":1883").is_err());
        assert!(MqttEndpoint::parse("broker:notaport").is_err());
    }
}
