use super::{OutboundMessage, Transport, TransportError};
use parking_lot::Mutex;
use reqwest::{Client, ClientBuilder, StatusCode};
use serde_json::{Value, json};
use std::time::Duration;
use url::Url;

const CONTENT_TYPE: &str = "application/vnd.kafka.json.v2+json";

#[derive(Debug, Clone)]
pub struct RestProxyConfig {
    pub timeout: Duration,
    pub connection_timeout: Duration,
    pub user_agent: String,
}

impl Default for RestProxyConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            connection_timeout: Duration::from_secs(2),
            user_agent: format!("clog/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Publishes to a Kafka REST proxy. Brokers are tried in order starting
/// from the last one that answered.
#[derive(Debug)]
pub struct RestProxyTransport {
    client: Client,
    brokers: Vec<Url>,
    preferred: Mutex<usize>,
}

/// Splits a `;`-delimited broker list. Addresses without a scheme get
/// `http://`.
pub fn parse_broker_addrs(raw: &str) -> Result<Vec<Url>, TransportError> {
    raw.split(';')
        .map(str::trim)
        .filter(|addr| !addr.is_empty())
        .map(|addr| {
            let with_scheme = if addr.contains("://") {
                addr.to_string()
            } else {
                format!("http://{addr}")
            };
            Url::parse(&with_scheme).map_err(|e| TransportError::InvalidAddress {
                address: addr.to_string(),
                reason: e.to_string(),
            })
        })
        .collect()
}

impl RestProxyTransport {
    /// Builds the client and health-checks the brokers. Fails when no broker
    /// answers the health check.
    pub async fn connect(brokers: Vec<Url>, config: RestProxyConfig) -> Result<Self, TransportError> {
        if brokers.is_empty() {
            return Err(TransportError::Unreachable(
                "no broker address configured".to_string(),
            ));
        }

        let client = ClientBuilder::new()
            .timeout(config.timeout)
            .connect_timeout(config.connection_timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| TransportError::Network(format!("failed to build HTTP client: {e}")))?;

        let transport = Self {
            client,
            brokers,
            preferred: Mutex::new(0),
        };

        let mut failures = Vec::new();
        for (idx, broker) in transport.brokers.iter().enumerate() {
            match transport.check_health(broker).await {
                Ok(()) => {
                    *transport.preferred.lock() = idx;
                    return Ok(transport);
                }
                Err(e) => failures.push(format!("{broker}: {e}")),
            }
        }

        Err(TransportError::Unreachable(failures.join("; ")))
    }

    pub fn brokers(&self) -> &[Url] {
        &self.brokers
    }

    async fn check_health(&self, broker: &Url) -> Result<(), TransportError> {
        let url = join(broker, "topics")?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(TransportError::Rejected {
                status: response.status().as_u16(),
            })
        }
    }

    async fn post(&self, broker: &Url, message: &OutboundMessage) -> Result<StatusCode, TransportError> {
        let url = join(broker, &format!("topics/{}", message.topic))?;
        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .json(&record_body(message))
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(response.status())
    }
}

fn join(broker: &Url, path: &str) -> Result<Url, TransportError> {
    let mut base = broker.clone();
    if !base.path().ends_with('/') {
        base.set_path(&format!("{}/", base.path()));
    }
    base.join(path).map_err(|e| TransportError::InvalidAddress {
        address: broker.to_string(),
        reason: e.to_string(),
    })
}

/// JSON payloads are embedded as-is; anything else is sent as a string.
fn record_body(message: &OutboundMessage) -> Value {
    let value = serde_json::from_slice::<Value>(&message.payload)
        .unwrap_or_else(|_| Value::String(message.payload_lossy()));
    json!({ "records": [{ "value": value }] })
}

impl Transport for RestProxyTransport {
    async fn publish(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        let start = *self.preferred.lock();
        let mut last_error = TransportError::Unreachable("no broker tried".to_string());

        for offset in 0..self.brokers.len() {
            let idx = (start + offset) % self.brokers.len();
            match self.post(&self.brokers[idx], message).await {
                Ok(status) if status.is_success() => {
                    *self.preferred.lock() = idx;
                    return Ok(());
                }
                // The broker answered; another one would answer the same.
                Ok(status) => {
                    return Err(TransportError::Rejected {
                        status: status.as_u16(),
                    });
                }
                Err(e) => last_error = e,
            }
        }

        Err(last_error)
    }
}
