//! Routing entity records as stored under the channel base.
//!
//! One entity is assembled from three kinds of nodes:
//! `<id>/metadata`, `<id>/channel/<name>` and `<id>/filter/<name>`.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::SchemaError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Label {
    #[serde(default)]
    pub odm: String,
    #[serde(default)]
    pub bk_biz_id: i64,
    #[serde(default)]
    pub bk_biz_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub channel_id: u32,
    /// Tenant platform that requested the channel
    #[serde(default)]
    pub plat_name: String,
    #[serde(default)]
    pub label: Label,
}

impl Metadata {
    pub fn parse(raw: &str) -> Result<Self, SchemaError> {
        let metadata: Metadata = serde_json::from_str(raw)?;
        if metadata.plat_name.is_empty() {
            return Err(SchemaError::invalid("metadata", "plat_name is required"));
        }
        Ok(metadata)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KafkaTable {
    #[serde(default)]
    pub topic_name: String,
    #[serde(default)]
    pub data_set: String,
    #[serde(default)]
    pub biz_id: String,
    #[serde(default = "default_partition")]
    pub partition: i32,
}

fn default_partition() -> i32 {
    -1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PulsarTable {
    #[serde(default)]
    pub topic_name: String,
    #[serde(default)]
    pub tenant: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub data_set: String,
    #[serde(default)]
    pub biz_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedisTable {
    #[serde(default)]
    pub channel_name: String,
    #[serde(default)]
    pub data_set: String,
    #[serde(default)]
    pub biz_id: String,
}

/// Destination table of one member channel
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamTarget {
    Kafka(KafkaTable),
    Pulsar(PulsarTable),
    Redis(RedisTable),
    #[serde(rename = "dsproxy")]
    DsProxy {},
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StreamToDoc")]
pub struct StreamTo {
    /// Exporter (storage) the table lives in
    pub stream_to_id: i64,
    #[serde(flatten)]
    pub target: StreamTarget,
}

#[derive(Deserialize)]
struct StreamToDoc {
    #[serde(default = "default_stream_to_id")]
    stream_to_id: i64,
    kafka: Option<KafkaTable>,
    pulsar: Option<PulsarTable>,
    redis: Option<RedisTable>,
    dsproxy: Option<serde_json::Value>,
}

fn default_stream_to_id() -> i64 {
    -1
}

impl TryFrom<StreamToDoc> for StreamTo {
    type Error = String;

    fn try_from(doc: StreamToDoc) -> Result<Self, Self::Error> {
        let target = if let Some(kafka) = doc.kafka {
            if kafka.topic_name.is_empty() {
                return Err("kafka.topic_name is required".to_string());
            }
            StreamTarget::Kafka(kafka)
        } else if let Some(pulsar) = doc.pulsar {
            if pulsar.topic_name.is_empty() {
                return Err("pulsar.topic_name is required".to_string());
            }
            StreamTarget::Pulsar(pulsar)
        } else if let Some(redis) = doc.redis {
            if redis.channel_name.is_empty() {
                return Err("redis.channel_name is required".to_string());
            }
            StreamTarget::Redis(redis)
        } else if doc.dsproxy.is_some() {
            StreamTarget::DsProxy {}
        } else {
            return Err("stream_to names no kafka, pulsar, redis or dsproxy table".to_string());
        };
        Ok(StreamTo {
            stream_to_id: doc.stream_to_id,
            target,
        })
    }
}

/// One pipeline stage of a routing entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    #[serde(default)]
    pub name: String,
    pub stream_to: StreamTo,
    /// Every named filter must match
    #[serde(default)]
    pub filter_name_and: Vec<String>,
    /// At least one named filter must match
    #[serde(default)]
    pub filter_name_or: Vec<String>,
}

impl Channel {
    /// Parses a `channel/<node>` value. An unnamed channel takes the node name.
    pub fn parse(
        node: &str,
        raw: &str,
    ) -> Result<Self, SchemaError> {
        let mut channel: Channel = serde_json::from_str(raw)?;
        if channel.name.is_empty() {
            channel.name = node.to_string();
        }
        Ok(channel)
    }

    pub fn filter_names(&self) -> impl Iterator<Item = &String> {
        self.filter_name_and.iter().chain(self.filter_name_or.iter())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldDataType {
    Int,
    Byte,
    String,
}

/// Where the filtered field is read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldIn {
    Protocol,
    Data,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamFilter {
    pub name: String,
    #[serde(default)]
    pub field_index: i64,
    pub field_data_type: FieldDataType,
    #[serde(default)]
    pub field_data_value: String,
    #[serde(default)]
    pub field_separator: String,
    pub field_in: FieldIn,
}

impl StreamFilter {
    pub fn parse(raw: &str) -> Result<Self, SchemaError> {
        let filter: StreamFilter = serde_json::from_str(raw)?;
        if filter.name.is_empty() {
            return Err(SchemaError::invalid("filter", "name is required"));
        }
        if filter.field_index < 0 {
            return Err(SchemaError::invalid(
                "filter",
                format!("{}: field_index {} is negative", filter.name, filter.field_index),
            ));
        }
        let numeric = matches!(filter.field_data_type, FieldDataType::Int | FieldDataType::Byte);
        if numeric && filter.field_data_value.trim().parse::<i64>().is_err() {
            return Err(SchemaError::invalid(
                "filter",
                format!(
                    "{}: field_data_value {:?} is not numeric",
                    filter.name, filter.field_data_value
                ),
            ));
        }
        Ok(filter)
    }
}

/// A fully gathered routing entity. Immutable once published.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelRecord {
    pub channel_id: u32,
    /// Load attempt that produced this record
    pub revision: u64,
    pub metadata: Metadata,
    /// Ordered by node name
    pub channels: Vec<Channel>,
    pub filters: BTreeMap<String, StreamFilter>,
}

impl ChannelRecord {
    pub fn filter(
        &self,
        name: &str,
    ) -> Option<&StreamFilter> {
        self.filters.get(name)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Sub-records collected while a load is in flight.
#[derive(Debug, Default)]
pub(crate) struct PartialRecord {
    pub(crate) metadata: Option<Metadata>,
    pub(crate) channels: BTreeMap<String, Channel>,
    pub(crate) filters: BTreeMap<String, StreamFilter>,
}

impl PartialRecord {
    /// Records a filter; a second filter with the same name is rejected
    pub(crate) fn add_filter(
        &mut self,
        filter: StreamFilter,
    ) -> Result<(), SchemaError> {
        if self.filters.contains_key(&filter.name) {
            return Err(SchemaError::invalid("filter", format!("duplicate name {}", filter.name)));
        }
        self.filters.insert(filter.name.clone(), filter);
        Ok(())
    }

    pub(crate) fn finish(
        self,
        channel_id: u32,
        revision: u64,
    ) -> Result<ChannelRecord, SchemaError> {
        let metadata = self
            .metadata
            .ok_or_else(|| SchemaError::invalid("channel record", "metadata missing"))?;
        if self.channels.is_empty() {
            return Err(SchemaError::invalid("channel record", "no channels"));
        }
        for channel in self.channels.values() {
            if let Some(missing) = channel.filter_names().find(|name| !self.filters.contains_key(*name)) {
                return Err(SchemaError::invalid(
                    "channel",
                    format!("{} references unknown filter {}", channel.name, missing),
                ));
            }
        }
        Ok(ChannelRecord {
            channel_id,
            revision,
            metadata,
            channels: self.channels.into_values().collect(),
            filters: self.filters,
        })
    }
}
