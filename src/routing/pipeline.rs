//! Pipeline (dataflow) configuration.
//!
//! Document shape, shared by the local file and the store's dataflow key:
//!
//! ```json
//! {"dataflow": {"receiver": [...], "exporter": [...], "filters": [...],
//!               "channel": [...], "ops": {...}}}
//! ```
//!
//! Channels reference receivers, exporters and filters by name. Names are
//! resolved at parse time into owned copies, so a [`PipelineConfig`] is a
//! plain value that can be cloned and swapped as a whole.

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::SchemaError;

macro_rules! coded_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $code:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(try_from = "u32", into = "u32")]
        pub enum $name {
            $($variant = $code),+
        }

        impl TryFrom<u32> for $name {
            type Error = String;

            fn try_from(code: u32) -> Result<Self, Self::Error> {
                match code {
                    $($code => Ok($name::$variant),)+
                    other => Err(format!("unknown {} code {}", stringify!($name), other)),
                }
            }
        }

        impl From<$name> for u32 {
            fn from(value: $name) -> u32 {
                value as u32
            }
        }
    };
}

coded_enum!(
    /// Transport a receiver listens on
    ReceiverProtocol {
        Tcp = 1,
        Udp = 2,
        Kcp = 3,
        Http = 4,
    }
);

coded_enum!(ExporterKind {
    Log = 1,
    Redis = 6,
    Kafka = 7,
    BkData = 8,
    DsProxy = 9,
    Pulsar = 10,
});

coded_enum!(
    /// Payload decoder of a channel
    DecodeType {
        TglogProtobuf = 1,
        TdmProtobuf = 2,
        TdmPackage = 3,
        GseDataPackage = 4,
        GseDataPackageV1 = 5,
        GseDataV1ForTglogProxy = 6,
        OnlyTransport = 7,
        GseDataPackageV2 = 8,
        GseDataPackageOpen = 9,
    }
);

coded_enum!(FilterType { ChannelId = 1 });

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiverConf {
    #[serde(default)]
    pub name: String,
    pub protocol: ReceiverProtocol,
    #[serde(default)]
    pub bind: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub cert: String,
    #[serde(default)]
    pub protostack: u32,
    #[serde(default = "default_work_threads", rename = "workthreadnum")]
    pub work_thread_num: u32,
    /// UDP socket receive buffer in bytes
    #[serde(default = "default_recv_buf_size", rename = "recvbufsize")]
    pub recv_buf_size: u64,
}

fn default_work_threads() -> u32 {
    4
}
fn default_recv_buf_size() -> u64 {
    32 * 1024 * 1024
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterConf {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub filter_type: FilterType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogExporterConf {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub filename: String,
    /// Megabytes per file before rotation
    #[serde(default = "default_max_log_size", rename = "maxlogsize")]
    pub max_log_size: u32,
    #[serde(default = "default_max_file_num", rename = "maxfilenum")]
    pub max_file_num: u32,
    #[serde(default = "default_queue_limit", rename = "queue_limit_max")]
    pub queue_limit_max: u64,
}

fn default_max_log_size() -> u32 {
    200
}
fn default_max_file_num() -> u32 {
    100
}
fn default_queue_limit() -> u64 {
    20_000_000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KafkaExporterConf {
    #[serde(default)]
    pub cluster: String,
    #[serde(default = "default_producer_num", rename = "producernum")]
    pub producer_num: u32,
    #[serde(default, rename = "defaulttopicname")]
    pub default_topic_name: String,
    #[serde(default)]
    pub security_protocol: String,
    #[serde(default)]
    pub sasl_mechanisms: String,
    #[serde(default)]
    pub sasl_username: String,
    #[serde(default)]
    pub sasl_passwd: String,
    #[serde(default)]
    pub addresses: Vec<Address>,
}

fn default_producer_num() -> u32 {
    8
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedisExporterConf {
    #[serde(default)]
    pub cluster: String,
    #[serde(default)]
    pub addresses: Vec<Address>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BkDataExporterConf {
    #[serde(default, rename = "zkaddrs")]
    pub zk_addrs: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DsProxyExporterConf {
    #[serde(default)]
    pub addresses: Vec<Address>,
    #[serde(default = "default_proxy_protocol", rename = "proxyprotocol")]
    pub proxy_protocol: String,
    #[serde(default = "default_proxy_version", rename = "proxyversion")]
    pub proxy_version: String,
    #[serde(default)]
    pub cert: String,
    #[serde(default = "default_connection_num", rename = "connectionnum")]
    pub connection_num: u32,
    #[serde(default)]
    pub heartbeat: bool,
    #[serde(default = "default_noblock")]
    pub noblock: bool,
}

fn default_proxy_protocol() -> String {
    "tcp".to_string()
}
fn default_proxy_version() -> String {
    "v1".to_string()
}
fn default_connection_num() -> u32 {
    3
}
fn default_noblock() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PulsarExporterConf {
    #[serde(default)]
    pub service_url: String,
    #[serde(default = "default_producer_num", rename = "producernum")]
    pub producer_num: u32,
    #[serde(default, rename = "topicname")]
    pub topic_name: String,
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExporterSettings {
    Log(LogExporterConf),
    Kafka(KafkaExporterConf),
    Redis(RedisExporterConf),
    BkData(BkDataExporterConf),
    DsProxy(DsProxyExporterConf),
    Pulsar(PulsarExporterConf),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExporterConf {
    pub name: String,
    pub kind: ExporterKind,
    pub extensions: Vec<String>,
    /// Resolved from the exporter's `filters` names
    pub filters: Vec<FilterConf>,
    pub settings: ExporterSettings,
}

#[derive(Deserialize)]
struct ExporterHead {
    #[serde(default)]
    name: String,
    #[serde(rename = "type")]
    kind: ExporterKind,
    #[serde(default)]
    extensions: Vec<String>,
    #[serde(default)]
    filters: Vec<String>,
}

impl ExporterConf {
    fn parse(
        entry: Value,
        filters: &BTreeMap<String, FilterConf>,
    ) -> Result<Self, SchemaError> {
        let head: ExporterHead = serde_json::from_value(entry.clone())?;
        let settings = match head.kind {
            ExporterKind::Log => ExporterSettings::Log(serde_json::from_value(entry)?),
            ExporterKind::Kafka => ExporterSettings::Kafka(serde_json::from_value(entry)?),
            ExporterKind::Redis => ExporterSettings::Redis(serde_json::from_value(entry)?),
            ExporterKind::BkData => ExporterSettings::BkData(serde_json::from_value(entry)?),
            ExporterKind::DsProxy => ExporterSettings::DsProxy(serde_json::from_value(entry)?),
            ExporterKind::Pulsar => ExporterSettings::Pulsar(serde_json::from_value(entry)?),
        };
        let filters = head
            .filters
            .iter()
            .map(|name| {
                filters.get(name).cloned().ok_or_else(|| {
                    SchemaError::invalid("exporter", format!("{} references unknown filter {}", head.name, name))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ExporterConf {
            name: head.name,
            kind: head.kind,
            extensions: head.extensions,
            filters,
            settings,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpsConf {
    #[serde(default, rename = "agentopschannelid")]
    pub agent_ops_channel_id: i64,
    #[serde(default, rename = "opschannelid")]
    pub ops_channel_id: i64,
    #[serde(default = "default_ops_threads", rename = "ops_threadcount")]
    pub ops_thread_count: u32,
    #[serde(default)]
    pub ops_addresses: Vec<Address>,
}

fn default_ops_threads() -> u32 {
    16
}

impl Default for OpsConf {
    fn default() -> Self {
        Self {
            agent_ops_channel_id: 0,
            ops_channel_id: 0,
            ops_thread_count: default_ops_threads(),
            ops_addresses: Vec::new(),
        }
    }
}

/// One ingestion pipeline: a receiver fanning out to exporters
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelConf {
    pub name: String,
    pub decode: DecodeType,
    pub keep_timing: bool,
    pub worker_num: u32,
    pub receiver: ReceiverConf,
    pub exporters: Vec<ExporterConf>,
}

#[derive(Deserialize)]
struct ChannelDoc {
    #[serde(default)]
    name: String,
    decode: DecodeType,
    #[serde(default, rename = "keeptiming")]
    keep_timing: bool,
    #[serde(default = "default_worker_num", rename = "workernum")]
    worker_num: u32,
    #[serde(default)]
    receiver: String,
    #[serde(default)]
    exporter: Vec<String>,
}

fn default_worker_num() -> u32 {
    8
}

#[derive(Deserialize)]
struct DataflowDoc {
    dataflow: DataflowBody,
}

#[derive(Deserialize, Default)]
struct DataflowBody {
    #[serde(default)]
    receiver: Vec<ReceiverConf>,
    #[serde(default)]
    exporter: Vec<Value>,
    #[serde(default)]
    filters: Vec<FilterConf>,
    #[serde(default)]
    channel: Vec<ChannelDoc>,
    #[serde(default)]
    ops: OpsConf,
}

/// Keeps the first entry per name, skipping unnamed ones
fn index_by_name<T>(
    what: &'static str,
    entries: impl IntoIterator<Item = (String, T)>,
) -> BTreeMap<String, T> {
    let mut indexed = BTreeMap::new();
    for (name, entry) in entries {
        if name.is_empty() {
            warn!("{} without a name skipped", what);
            continue;
        }
        if indexed.contains_key(&name) {
            warn!("duplicate {} {} skipped", what, name);
            continue;
        }
        indexed.insert(name, entry);
    }
    indexed
}

/// Channel name → channel pipeline, plus the ops reporting settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineConfig {
    channels: BTreeMap<String, ChannelConf>,
    ops: OpsConf,
}

impl PipelineConfig {
    pub fn new(ops: OpsConf) -> Self {
        Self {
            channels: BTreeMap::new(),
            ops,
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, SchemaError> {
        let doc: DataflowDoc = serde_json::from_str(raw)?;
        let body = doc.dataflow;

        let receivers = index_by_name("receiver", body.receiver.into_iter().map(|r| (r.name.clone(), r)));
        let filters = index_by_name("filter", body.filters.into_iter().map(|f| (f.name.clone(), f)));
        let exporter_entries = body
            .exporter
            .into_iter()
            .map(|entry| ExporterConf::parse(entry, &filters))
            .collect::<Result<Vec<_>, _>>()?;
        let exporters = index_by_name("exporter", exporter_entries.into_iter().map(|e| (e.name.clone(), e)));

        let mut config = PipelineConfig::new(body.ops);
        for doc in body.channel {
            if doc.name.is_empty() {
                warn!("channel without a name skipped");
                continue;
            }
            let receiver = receivers.get(&doc.receiver).cloned().ok_or_else(|| {
                SchemaError::invalid("channel", format!("{} references unknown receiver {:?}", doc.name, doc.receiver))
            })?;
            let exporters = doc
                .exporter
                .iter()
                .map(|name| {
                    exporters.get(name).cloned().ok_or_else(|| {
                        SchemaError::invalid("channel", format!("{} references unknown exporter {}", doc.name, name))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            config.insert_channel(ChannelConf {
                name: doc.name,
                decode: doc.decode,
                keep_timing: doc.keep_timing,
                worker_num: doc.worker_num,
                receiver,
                exporters,
            });
        }
        Ok(config)
    }

    /// Adds a channel unless one with the same name exists
    pub fn insert_channel(
        &mut self,
        conf: ChannelConf,
    ) -> bool {
        if self.channels.contains_key(&conf.name) {
            warn!(channel = %conf.name, "duplicate channel skipped");
            return false;
        }
        self.channels.insert(conf.name.clone(), conf);
        true
    }

    /// Inserts or replaces `name`, returning the previous pipeline
    pub fn replace_channel(
        &mut self,
        name: &str,
        mut conf: ChannelConf,
    ) -> Option<ChannelConf> {
        conf.name = name.to_string();
        self.channels.insert(name.to_string(), conf)
    }

    pub fn remove_channel(
        &mut self,
        name: &str,
    ) -> Option<ChannelConf> {
        self.channels.remove(name)
    }

    pub fn channel(
        &self,
        name: &str,
    ) -> Option<&ChannelConf> {
        self.channels.get(name)
    }

    pub fn channels(&self) -> impl Iterator<Item = &ChannelConf> {
        self.channels.values()
    }

    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.keys().map(String::as_str).collect()
    }

    pub fn ops(&self) -> &OpsConf {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

impl fmt::Display for PipelineConfig {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "PipelineConfig[{}]", self.channel_names().join(","))
    }
}
