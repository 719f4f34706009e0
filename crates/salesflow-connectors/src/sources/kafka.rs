//! Kafka Source Connector
//!
//! Consumes encoded transaction payloads from a Kafka topic. Offsets are never
//! committed automatically: a polled record's offset is stored locally and only
//! committed when the pipeline calls [`SourceConnector::commit`] after every
//! required sink has flushed. A crash therefore re-delivers everything after the
//! last commit.
//!
//! The consumer itself needs librdkafka and is only compiled with the `kafka`
//! feature. Configuration parsing is always available.
//!
//! ## Configuration
//!
//! | Key                   | Description                                    | Default                  |
//! |-----------------------|------------------------------------------------|--------------------------|
//! | `bootstrap.servers`   | Kafka broker addresses                         | required                 |
//! | `topics`              | Comma-separated list of topics to subscribe to | `financial_transactions` |
//! | `group.id`            | Consumer group ID                              | required                 |
//! | `auto.offset.reset`   | Where to start consuming: `earliest`/`latest`  | `earliest`               |
//! | `max.poll.records`    | Maximum records returned per poll              | `500`                    |
//! | `poll.timeout.ms`     | Wait for the first record of a poll            | `1000`                   |
//! | `security.protocol`   | Security protocol: `PLAINTEXT`, `SASL_SSL`, etc | `PLAINTEXT`             |
//! | `sasl.mechanism`      | SASL mechanism (e.g. `PLAIN`, `SCRAM-SHA-256`) | (none)                   |
//! | `sasl.username`       | SASL username                                  | (none)                   |
//! | `sasl.password`       | SASL password                                  | (none)                   |

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{parse_list, parse_opt, required, ConnectorState};
use crate::error::{ConnectorError, Result};
use crate::traits::{SourceConnector, SourceRecord};

pub const DEFAULT_TOPIC: &str = "financial_transactions";

/// Wait for further records once a poll has received its first one.
#[cfg(feature = "kafka")]
const POLL_LINGER: Duration = Duration::from_millis(5);

/// Parsed configuration for the Kafka source connector.
#[derive(Debug, Clone)]
pub struct KafkaSourceConfig {
    /// Comma-separated list of Kafka broker addresses.
    pub bootstrap_servers: String,
    /// Topics to subscribe to.
    pub topics: Vec<String>,
    /// Consumer group ID.
    pub group_id: String,
    /// Auto offset reset policy: `"earliest"` or `"latest"`.
    pub auto_offset_reset: String,
    /// Maximum number of records returned per poll.
    pub max_poll_records: usize,
    /// Poll timeout in milliseconds.
    pub poll_timeout_ms: u64,
    pub security_protocol: String,
    pub sasl_mechanism: Option<String>,
    pub sasl_username: Option<String>,
    pub sasl_password: Option<String>,
}

impl KafkaSourceConfig {
    /// Parse a `KafkaSourceConfig` from a string key-value map.
    ///
    /// Required keys: `bootstrap.servers`, `group.id`.
    pub fn from_config_map(config: &HashMap<String, String>) -> Result<Self> {
        let bootstrap_servers = required(config, "bootstrap.servers")?;
        let group_id = required(config, "group.id")?;

        let topics = match config.get("topics") {
            Some(raw) => parse_list(raw),
            None => vec![DEFAULT_TOPIC.to_string()],
        };
        if topics.is_empty() {
            return Err(ConnectorError::ConfigError(
                "'topics' must contain at least one topic".to_string(),
            ));
        }

        let auto_offset_reset = config
            .get("auto.offset.reset")
            .cloned()
            .unwrap_or_else(|| "earliest".to_string());
        match auto_offset_reset.as_str() {
            "earliest" | "latest" => {}
            other => {
                return Err(ConnectorError::ConfigError(format!(
                    "invalid auto.offset.reset '{}': must be 'earliest' or 'latest'",
                    other
                )));
            }
        }

        let max_poll_records = parse_opt::<usize>(config, "max.poll.records")?.unwrap_or(500);
        if max_poll_records == 0 {
            return Err(ConnectorError::ConfigError(
                "max.poll.records must be greater than zero".to_string(),
            ));
        }
        let poll_timeout_ms = parse_opt::<u64>(config, "poll.timeout.ms")?.unwrap_or(1000);

        Ok(KafkaSourceConfig {
            bootstrap_servers,
            topics,
            group_id,
            auto_offset_reset,
            max_poll_records,
            poll_timeout_ms,
            security_protocol: config
                .get("security.protocol")
                .cloned()
                .unwrap_or_else(|| "PLAINTEXT".to_string()),
            sasl_mechanism: config.get("sasl.mechanism").cloned(),
            sasl_username: config.get("sasl.username").cloned(),
            sasl_password: config.get("sasl.password").cloned(),
        })
    }

    /// librdkafka client properties for this configuration.
    ///
    /// Automatic commits and automatic offset storage are both disabled; the
    /// connector stores offsets itself and commits only on request.
    pub fn client_properties(&self) -> Vec<(&'static str, String)> {
        let mut props = vec![
            ("bootstrap.servers", self.bootstrap_servers.clone()),
            ("group.id", self.group_id.clone()),
            ("auto.offset.reset", self.auto_offset_reset.clone()),
            ("enable.auto.commit", "false".to_string()),
            ("enable.auto.offset.store", "false".to_string()),
            ("enable.partition.eof", "false".to_string()),
            ("security.protocol", self.security_protocol.clone()),
        ];
        if let Some(mechanism) = &self.sasl_mechanism {
            props.push(("sasl.mechanism", mechanism.clone()));
        }
        if let Some(username) = &self.sasl_username {
            props.push(("sasl.username", username.clone()));
        }
        if let Some(password) = &self.sasl_password {
            props.push(("sasl.password", password.clone()));
        }
        props
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

/// Kafka Source Connector implementation.
pub struct KafkaSourceConnector {
    name: String,
    config: KafkaSourceConfig,
    state: ConnectorState,
    /// Offsets stored since the last commit.
    uncommitted: usize,
    #[cfg(feature = "kafka")]
    consumer: Option<rdkafka::consumer::StreamConsumer>,
}

impl KafkaSourceConnector {
    /// Create a new `KafkaSourceConnector` with the given name and config map.
    pub fn new(name: &str, config_map: &HashMap<String, String>) -> Result<Self> {
        let config = KafkaSourceConfig::from_config_map(config_map)?;
        Ok(Self::with_config(name, config))
    }

    /// Create with an already-parsed config.
    pub fn with_config(name: &str, config: KafkaSourceConfig) -> Self {
        Self {
            name: name.to_string(),
            config,
            state: ConnectorState::Stopped,
            uncommitted: 0,
            #[cfg(feature = "kafka")]
            consumer: None,
        }
    }

    pub fn config(&self) -> &KafkaSourceConfig {
        &self.config
    }

    pub fn connector_state(&self) -> ConnectorState {
        self.state
    }

    fn ensure_running(&self) -> Result<()> {
        if self.state != ConnectorState::Running {
            return Err(ConnectorError::SourceError(
                "connector is not running".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(feature = "kafka")]
mod consumer {
    use bytes::Bytes;
    use rdkafka::config::ClientConfig;
    use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
    use rdkafka::message::{BorrowedMessage, Message};

    use super::*;

    pub(super) fn create(config: &KafkaSourceConfig) -> Result<StreamConsumer> {
        let mut client = ClientConfig::new();
        for (key, value) in config.client_properties() {
            client.set(key, value);
        }
        let consumer: StreamConsumer = client.create()?;
        let topics: Vec<&str> = config.topics.iter().map(String::as_str).collect();
        consumer.subscribe(&topics)?;
        Ok(consumer)
    }

    fn to_record(msg: &BorrowedMessage<'_>) -> Option<SourceRecord> {
        // Tombstones carry no transaction; their offset is still stored.
        let value = msg.payload()?;
        Some(SourceRecord {
            topic: msg.topic().to_string(),
            partition: msg.partition().max(0) as u32,
            offset: msg.offset().max(0) as u64,
            timestamp: msg.timestamp().to_millis().unwrap_or(0).max(0) as u64,
            key: msg.key().map(Bytes::copy_from_slice),
            value: Bytes::copy_from_slice(value),
        })
    }

    /// Receive up to `max_poll_records` messages, storing each offset.
    pub(super) async fn poll(
        consumer: &StreamConsumer,
        config: &KafkaSourceConfig,
    ) -> Result<(Vec<SourceRecord>, usize)> {
        let mut records = Vec::new();
        let mut stored = 0;
        let mut wait = config.poll_timeout();

        while stored < config.max_poll_records {
            let msg = match tokio::time::timeout(wait, consumer.recv()).await {
                Err(_elapsed) => break,
                Ok(result) => result?,
            };
            consumer.store_offset_from_message(&msg)?;
            stored += 1;
            if let Some(record) = to_record(&msg) {
                records.push(record);
            }
            wait = POLL_LINGER;
        }
        Ok((records, stored))
    }

    /// Commit the stored offsets and wait for the broker to acknowledge them.
    pub(super) fn commit(consumer: &StreamConsumer) -> Result<()> {
        consumer.commit_consumer_state(CommitMode::Sync)?;
        Ok(())
    }
}

#[cfg(feature = "kafka")]
impl KafkaSourceConnector {
    fn open(&mut self) -> Result<()> {
        self.consumer = Some(consumer::create(&self.config)?);
        Ok(())
    }

    async fn fetch(&mut self) -> Result<(Vec<SourceRecord>, usize)> {
        match self.consumer.as_ref() {
            Some(c) => consumer::poll(c, &self.config).await,
            None => Ok((Vec::new(), 0)),
        }
    }

    fn commit_stored(&self) -> Result<()> {
        match self.consumer.as_ref() {
            Some(c) => consumer::commit(c),
            None => Ok(()),
        }
    }

    fn close(&mut self) {
        self.consumer = None;
    }
}

#[cfg(not(feature = "kafka"))]
impl KafkaSourceConnector {
    fn open(&mut self) -> Result<()> {
        Err(ConnectorError::ConfigError(
            "the Kafka source requires the `kafka` feature".to_string(),
        ))
    }

    async fn fetch(&mut self) -> Result<(Vec<SourceRecord>, usize)> {
        Ok((Vec::new(), 0))
    }

    fn commit_stored(&self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) {}
}

#[async_trait]
impl SourceConnector for KafkaSourceConnector {
    async fn start(&mut self) -> Result<()> {
        if self.state == ConnectorState::Running {
            return Err(ConnectorError::SourceError(
                "connector is already running".to_string(),
            ));
        }

        if let Err(e) = self.open() {
            tracing::error!(connector = %self.name, error = %e, "failed to create Kafka consumer");
            return Err(e);
        }

        tracing::info!(
            connector = %self.name,
            bootstrap_servers = %self.config.bootstrap_servers,
            topics = ?self.config.topics,
            group_id = %self.config.group_id,
            auto_offset_reset = %self.config.auto_offset_reset,
            "Kafka source connector started"
        );
        self.state = ConnectorState::Running;
        Ok(())
    }

    async fn poll(&mut self) -> Result<Vec<SourceRecord>> {
        self.ensure_running()?;

        let (records, stored) = match self.fetch().await {
            Ok(polled) => polled,
            Err(e) => {
                self.state = ConnectorState::Failed;
                return Err(e);
            }
        };
        self.uncommitted += stored;
        if stored > 0 {
            tracing::trace!(
                connector = %self.name,
                records = records.len(),
                stored,
                "polled Kafka records"
            );
        }
        Ok(records)
    }

    async fn commit(&mut self) -> Result<()> {
        self.ensure_running()?;
        if self.uncommitted == 0 {
            return Ok(());
        }

        self.commit_stored()?;
        tracing::debug!(
            connector = %self.name,
            records = self.uncommitted,
            "committed consumer offsets"
        );
        self.uncommitted = 0;
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if self.state == ConnectorState::Stopped {
            return Err(ConnectorError::SourceError(
                "connector is already stopped".to_string(),
            ));
        }

        // Offsets are only committed through `commit`, once the caller has
        // persisted everything derived from them.
        if self.uncommitted > 0 {
            tracing::info!(
                connector = %self.name,
                records = self.uncommitted,
                "stopping with uncommitted records, they will be redelivered"
            );
        }
        self.close();

        tracing::info!(connector = %self.name, "Kafka source connector stopped");
        self.state = ConnectorState::Stopped;
        self.uncommitted = 0;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config_map() -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("bootstrap.servers".to_string(), "localhost:9092".to_string());
        m.insert("group.id".to_string(), "salesflow".to_string());
        m
    }

    // ---------------------------------------------------------------
    // Config parsing
    // ---------------------------------------------------------------

    #[test]
    fn test_config_parse_minimal() {
        let config = KafkaSourceConfig::from_config_map(&base_config_map()).unwrap();
        assert_eq!(config.bootstrap_servers, "localhost:9092");
        assert_eq!(config.topics, vec!["financial_transactions"]);
        assert_eq!(config.group_id, "salesflow");
        assert_eq!(config.auto_offset_reset, "earliest");
        assert_eq!(config.max_poll_records, 500);
        assert_eq!(config.poll_timeout(), Duration::from_secs(1));
        assert_eq!(config.security_protocol, "PLAINTEXT");
        assert!(config.sasl_mechanism.is_none());
    }

    #[test]
    fn test_config_parse_all_options() {
        let mut m = base_config_map();
        m.insert("topics".to_string(), "orders, refunds".to_string());
        m.insert("auto.offset.reset".to_string(), "latest".to_string());
        m.insert("max.poll.records".to_string(), "50".to_string());
        m.insert("poll.timeout.ms".to_string(), "250".to_string());
        m.insert("security.protocol".to_string(), "SASL_SSL".to_string());
        m.insert("sasl.mechanism".to_string(), "PLAIN".to_string());
        m.insert("sasl.username".to_string(), "svc".to_string());
        m.insert("sasl.password".to_string(), "secret".to_string());

        let config = KafkaSourceConfig::from_config_map(&m).unwrap();
        assert_eq!(config.topics, vec!["orders", "refunds"]);
        assert_eq!(config.auto_offset_reset, "latest");
        assert_eq!(config.max_poll_records, 50);
        assert_eq!(config.poll_timeout_ms, 250);
        assert_eq!(config.sasl_username.as_deref(), Some("svc"));
    }

    #[test]
    fn test_config_missing_bootstrap_servers() {
        let mut m = base_config_map();
        m.remove("bootstrap.servers");
        assert!(matches!(
            KafkaSourceConfig::from_config_map(&m),
            Err(ConnectorError::ConfigError(_))
        ));
    }

    #[test]
    fn test_config_empty_group_id() {
        let mut m = base_config_map();
        m.insert("group.id".to_string(), "  ".to_string());
        assert!(KafkaSourceConfig::from_config_map(&m).is_err());
    }

    #[test]
    fn test_config_empty_topics() {
        let mut m = base_config_map();
        m.insert("topics".to_string(), " , ".to_string());
        assert!(KafkaSourceConfig::from_config_map(&m).is_err());
    }

    #[test]
    fn test_config_invalid_auto_offset_reset() {
        let mut m = base_config_map();
        m.insert("auto.offset.reset".to_string(), "middle".to_string());
        assert!(KafkaSourceConfig::from_config_map(&m).is_err());
    }

    #[test]
    fn test_config_invalid_max_poll_records() {
        let mut m = base_config_map();
        m.insert("max.poll.records".to_string(), "0".to_string());
        assert!(KafkaSourceConfig::from_config_map(&m).is_err());
        m.insert("max.poll.records".to_string(), "lots".to_string());
        assert!(KafkaSourceConfig::from_config_map(&m).is_err());
    }

    #[test]
    fn test_client_properties_disable_auto_commit() {
        let mut m = base_config_map();
        m.insert("sasl.mechanism".to_string(), "PLAIN".to_string());
        let props: HashMap<&str, String> = KafkaSourceConfig::from_config_map(&m)
            .unwrap()
            .client_properties()
            .into_iter()
            .collect();
        assert_eq!(props["enable.auto.commit"], "false");
        assert_eq!(props["enable.auto.offset.store"], "false");
        assert_eq!(props["auto.offset.reset"], "earliest");
        assert_eq!(props["sasl.mechanism"], "PLAIN");
        assert!(!props.contains_key("sasl.password"));
    }

    // ---------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------

    #[test]
    fn test_new_connector_is_stopped() {
        let connector = KafkaSourceConnector::new("kafka", &base_config_map()).unwrap();
        assert_eq!(connector.name(), "kafka");
        assert_eq!(connector.connector_state(), ConnectorState::Stopped);
        assert_eq!(connector.config().group_id, "salesflow");
    }

    #[tokio::test]
    async fn test_poll_when_not_running_fails() {
        let mut connector = KafkaSourceConnector::new("kafka", &base_config_map()).unwrap();
        assert!(matches!(
            connector.poll().await,
            Err(ConnectorError::SourceError(_))
        ));
        assert!(connector.commit().await.is_err());
    }

    #[tokio::test]
    async fn test_stop_when_stopped_fails() {
        let mut connector = KafkaSourceConnector::new("kafka", &base_config_map()).unwrap();
        assert!(connector.stop().await.is_err());
    }

    #[cfg(not(feature = "kafka"))]
    #[tokio::test]
    async fn test_start_without_feature_is_config_error() {
        let mut connector = KafkaSourceConnector::new("kafka", &base_config_map()).unwrap();
        assert!(matches!(
            connector.start().await,
            Err(ConnectorError::ConfigError(_))
        ));
        assert_eq!(connector.connector_state(), ConnectorState::Stopped);
    }
}
