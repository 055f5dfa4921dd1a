/// MQTT push sink
///
/// One `AsyncClient` publishes snapshots; a background task drives the
/// client's event loop and owns reconnection. Publishing while the broker is
/// unreachable fails fast with `PublishError::NotConnected`, the next cycle
/// tries again.

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::MqttConfig;
use super::publish::{PublishError, PublishSink};
use crate::utils::{
    format_interval, DEFAULT_MQTT_PORT, MQTT_KEEP_ALIVE, MQTT_MAX_RETRY_INTERVAL, MQTT_RETRY_INTERVAL,
};

/// Requests buffered between the client and the event loop
const REQUEST_CAPACITY: usize = 10;

/// Time allowed to flush DISCONNECT on shutdown
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

/// Split a broker address into host and port
///
/// Accepts `tcp://`, `mqtt://` or no scheme. The port defaults to 1883.
pub fn parse_broker(broker: &str) -> Result<(String, u16), PublishError> {
    let broker = broker.trim();
    let address = match broker.split_once("://") {
        Some(("tcp" | "mqtt", rest)) => rest,
        Some((scheme, _)) => {
            return Err(PublishError::InvalidConfig(format!("unsupported broker scheme: {}", scheme)));
        }
        None => broker,
    };
    let address = address.trim_end_matches('/');

    if address.is_empty() {
        return Err(PublishError::InvalidConfig("broker address is empty".to_string()));
    }

    // "[::1]:1883" and bare "::1" are both IPv6
    let (host, port) = match address.strip_prefix('[') {
        Some(rest) => match rest.split_once(']') {
            Some((host, "")) => (host, None),
            Some((host, port)) => (host, Some(port.strip_prefix(':').unwrap_or(port))),
            None => return Err(PublishError::InvalidConfig(format!("invalid broker address: {}", address))),
        },
        None => match address.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') => (host, Some(port)),
            _ => (address, None),
        },
    };

    let port = match port {
        Some(port) => port
            .parse()
            .map_err(|_| PublishError::InvalidConfig(format!("invalid broker port: {}", port)))?,
        None => DEFAULT_MQTT_PORT,
    };

    if host.is_empty() {
        return Err(PublishError::InvalidConfig(format!("missing broker host: {}", address)));
    }

    Ok((host.to_string(), port))
}

pub fn qos_from(level: u8) -> Result<QoS, PublishError> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(PublishError::InvalidConfig(format!("qos must be 0, 1 or 2, got {}", other))),
    }
}

fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(MQTT_MAX_RETRY_INTERVAL)
}

/// Publishes each snapshot to one topic, retain off
pub struct MqttSink {
    client: AsyncClient,
    topic: String,
    qos: QoS,
    connected: Arc<AtomicBool>,
    shutdown: CancellationToken,
}

impl MqttSink {
    /// Build the client and start its event loop
    ///
    /// Must be called inside a tokio runtime. The event loop stops when
    /// `shutdown` fires or the sink is dropped.
    pub fn connect(config: &MqttConfig, shutdown: &CancellationToken) -> Result<Self, PublishError> {
        let (host, port) = parse_broker(&config.broker)?;
        let qos = qos_from(config.qos)?;

        let client_id = config.client_id.trim();
        if client_id.is_empty() {
            return Err(PublishError::InvalidConfig("client_id is empty".to_string()));
        }
        let topic = config.topic.trim();
        if topic.is_empty() {
            return Err(PublishError::InvalidConfig("topic is empty".to_string()));
        }

        let mut options = MqttOptions::new(client_id, host.as_str(), port);
        options.set_keep_alive(MQTT_KEEP_ALIVE);
        if !config.username.is_empty() {
            options.set_credentials(config.username.as_str(), config.password.as_str());
        }

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let connected = Arc::new(AtomicBool::new(false));
        let shutdown = shutdown.child_token();

        tokio::spawn(drive(
            eventloop,
            client.clone(),
            Arc::clone(&connected),
            format!("{}:{}", host, port),
            shutdown.clone(),
        ));

        Ok(Self {
            client,
            topic: topic.to_string(),
            qos,
            connected,
            shutdown,
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for MqttSink {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl PublishSink for MqttSink {
    async fn publish(&self, payload: &[u8], cancel: &CancellationToken) -> Result<(), PublishError> {
        if cancel.is_cancelled() {
            return Err(PublishError::Cancelled);
        }
        if !self.is_connected() {
            return Err(PublishError::NotConnected);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PublishError::Cancelled),
            result = self.client.publish(self.topic.as_str(), self.qos, false, payload.to_vec()) => result?,
        }

        debug!(topic = %self.topic, bytes = payload.len(), "snapshot published");
        Ok(())
    }
}

/// Poll the event loop until shutdown, reconnecting with back-off
async fn drive(
    mut eventloop: EventLoop,
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    broker: String,
    shutdown: CancellationToken,
) {
    let mut backoff = MQTT_RETRY_INTERVAL;

    loop {
        let event = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                connected.store(true, Ordering::SeqCst);
                backoff = MQTT_RETRY_INTERVAL;
                info!(broker = %broker, "mqtt connected");
            }
            Ok(_) => {}
            Err(err) => {
                if connected.swap(false, Ordering::SeqCst) {
                    warn!(broker = %broker, error = %err, "mqtt connection lost");
                } else {
                    warn!(
                        broker = %broker,
                        error = %err,
                        retry_in = %format_interval(&backoff),
                        "mqtt connect failed"
                    );
                }

                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = next_backoff(backoff);
            }
        }
    }

    if connected.swap(false, Ordering::SeqCst) {
        if client.try_disconnect().is_ok() {
            let flushed = tokio::time::timeout(DISCONNECT_GRACE, async {
                loop {
                    match eventloop.poll().await {
                        Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                        Ok(_) => {}
                    }
                }
            })
            .await;
            if flushed.is_err() {
                debug!(broker = %broker, "mqtt disconnect not flushed");
            }
        }
    }
    debug!(broker = %broker, "mqtt event loop stopped");
}
