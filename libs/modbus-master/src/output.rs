//! Output records and the per-session aggregator
//!
//! Decoded values from concurrent polling tasks are merged into one
//! [`OutContent`] per session, bucketed by correlation id and the wall-clock
//! second they were read in. The publisher drains the content periodically.

use std::collections::BTreeMap;

use chrono::Local;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::constants::SOURCE_TIMESTAMP_FORMAT;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutValue {
    pub display_name: String,
    pub address: String,
    pub value: String,
}

/// Values sharing one (correlation id, source timestamp) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutData {
    pub correlation_id: String,
    pub source_timestamp: String,
    pub values: Vec<OutValue>,
}

/// Everything one slave produced since the last drain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutContent {
    pub hw_id: String,
    pub data: Vec<OutData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_properties: Option<BTreeMap<String, String>>,
}

/// Batch handed to the publisher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutMessage {
    pub publish_timestamp: String,
    pub content: Vec<OutContent>,
}

impl OutMessage {
    /// Stamp a drained batch with the current local time
    pub fn new(content: Vec<OutContent>) -> Self {
        Self {
            publish_timestamp: current_timestamp(),
            content,
        }
    }
}

/// Current local time at second resolution, `yyyy-MM-dd HH:mm:ss`
pub fn current_timestamp() -> String {
    Local::now().format(SOURCE_TIMESTAMP_FORMAT).to_string()
}

/// Mutex-guarded output buffer owned by one session
#[derive(Debug)]
pub struct OutputAggregator {
    hw_id: String,
    additional_properties: Option<BTreeMap<String, String>>,
    content: Mutex<Option<OutContent>>,
}

impl OutputAggregator {
    pub fn new(
        hw_id: impl Into<String>,
        additional_properties: Option<BTreeMap<String, String>>,
    ) -> Self {
        Self {
            hw_id: hw_id.into(),
            additional_properties,
            content: Mutex::new(None),
        }
    }

    /// Append values read now
    pub fn record(&self, correlation_id: &str, values: Vec<OutValue>) {
        self.append(correlation_id, &current_timestamp(), values);
    }

    /// Append values under an explicit source timestamp
    pub fn append(&self, correlation_id: &str, source_timestamp: &str, values: Vec<OutValue>) {
        if values.is_empty() {
            return;
        }

        let mut guard = self.content.lock();
        let content = guard.get_or_insert_with(|| OutContent {
            hw_id: self.hw_id.clone(),
            data: Vec::new(),
            additional_properties: self.additional_properties.clone(),
        });

        match content
            .data
            .iter_mut()
            .find(|d| d.correlation_id == correlation_id && d.source_timestamp == source_timestamp)
        {
            Some(bucket) => bucket.values.extend(values),
            None => content.data.push(OutData {
                correlation_id: correlation_id.to_string(),
                source_timestamp: source_timestamp.to_string(),
                values,
            }),
        }
    }

    /// Take the current content and reset the buffer
    pub fn take(&self) -> Option<OutContent> {
        self.content.lock().take().filter(|c| !c.data.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.content.lock().is_none()
    }
}
