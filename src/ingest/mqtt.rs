//! MQTT frame transport.
//!
//! Subscribes to one topic and hands every publish payload to the frame
//! subscription. Brokers must be on this host unless remote access is
//! explicitly allowed in the broker settings.

use anyhow::{anyhow, Context, Result};
use rumqttc::v5::{mqttbytes::QoS, Client, Connection, Event, Incoming, MqttOptions};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use super::transport::{Delivery, FrameTransport};
use crate::config::BrokerSettings;

const REQUEST_CAPACITY: usize = 10;
const KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Broker address: `host:port` or `mqtt://host:port`, IPv6 hosts in brackets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttEndpoint {
    pub host: String,
    pub port: u16,
}

impl MqttEndpoint {
    pub fn parse(addr: &str) -> Result<Self> {
        let trimmed = addr.trim();
        let authority = match trimmed.split_once("://") {
            None => trimmed,
            Some(("mqtt", rest)) => rest,
            Some((scheme, _)) => {
                return Err(anyhow!(
                    "broker '{}': frames are read over plain mqtt://, not {}://",
                    addr,
                    scheme
                ))
            }
        };

        if let Ok(socket) = authority.parse::<SocketAddr>() {
            return Ok(Self {
                host: socket.ip().to_string(),
                port: socket.port(),
            });
        }
        let (host, port) = authority
            .rsplit_once(':')
            .ok_or_else(|| anyhow!("broker '{}' has no port", addr))?;
        if host.is_empty() || host.contains(':') || host.contains('/') {
            return Err(anyhow!("broker '{}' has no usable host name", addr));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| anyhow!("broker '{}' has an invalid port", addr))?;
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    pub fn is_loopback(&self) -> bool {
        self.host.eq_ignore_ascii_case("localhost")
            || self
                .host
                .parse::<IpAddr>()
                .is_ok_and(|ip| ip.is_loopback())
    }
}

pub struct MqttTransport {
    endpoint: MqttEndpoint,
    topic: String,
    client: Client,
    connection: Connection,
}

impl MqttTransport {
    pub fn connect(settings: &BrokerSettings, topic: &str) -> Result<Self> {
        let endpoint = MqttEndpoint::parse(&settings.addr)?;
        if !endpoint.is_loopback() {
            if !settings.allow_remote {
                return Err(anyhow!(
                    "broker {} is not on this host; set broker.allow_remote to use it",
                    settings.addr
                ));
            }
            log::warn!("MqttTransport: reading frames from remote broker {}", settings.addr);
        }

        let mut options = MqttOptions::new(&settings.client_id, &endpoint.host, endpoint.port);
        options.set_keep_alive(KEEP_ALIVE);
        options.set_clean_start(true);
        // Image messages are far larger than the client's default packet cap.
        options.set_max_packet_size(Some(settings.max_frame_bytes));
        if let Some(user) = settings.username.as_deref() {
            options.set_credentials(user, settings.password.as_deref().unwrap_or_default());
        }

        let (client, connection) = Client::new(options, REQUEST_CAPACITY);
        client
            .subscribe(topic, QoS::AtMostOnce)
            .with_context(|| format!("subscribe to {}", topic))?;
        log::info!(
            "MqttTransport: subscribed to {} on {}:{} (auth: {}, max frame {} bytes)",
            topic,
            endpoint.host,
            endpoint.port,
            settings.username.is_some(),
            settings.max_frame_bytes
        );

        Ok(Self {
            endpoint,
            topic: topic.to_string(),
            client,
            connection,
        })
    }
}

impl FrameTransport for MqttTransport {
    fn describe(&self) -> String {
        format!(
            "mqtt://{}:{}/{}",
            self.endpoint.host, self.endpoint.port, self.topic
        )
    }

    fn next_payload(&mut self, poll: Duration) -> Result<Delivery> {
        match self.connection.recv_timeout(poll) {
            Ok(Ok(Event::Incoming(Incoming::Publish(publish)))) => {
                Ok(Delivery::Payload(publish.payload.to_vec()))
            }
            Ok(Ok(_)) => Ok(Delivery::Idle),
            // The event loop reconnects on the next poll; the subscription
            // is re-sent because the session is clean.
            Ok(Err(e)) => {
                let _ = self.client.try_subscribe(self.topic.as_str(), QoS::AtMostOnce);
                std::thread::sleep(poll);
                Err(anyhow!("MQTT connection error: {}", e))
            }
            Err(_) => Ok(Delivery::Idle),
        }
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        if let Err(e) = self.client.try_disconnect() {
            log::debug!("MqttTransport: disconnect request failed: {}", e);
        }
    }
}
