//! Data models for stored records.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use hivewatch_types::{Channel, Readings};

/// A record to be appended to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord {
    /// Capture time.
    pub captured_at: OffsetDateTime,
    /// Channel values; missing channels are stored as NULL.
    pub readings: Readings,
    /// Path of an image captured with the readings.
    pub image_path: Option<String>,
}

impl NewRecord {
    /// Create a record captured now.
    pub fn new(readings: Readings) -> Self {
        Self::at(OffsetDateTime::now_utc(), readings)
    }

    /// Create a record with an explicit capture time.
    pub fn at(captured_at: OffsetDateTime, readings: Readings) -> Self {
        Self {
            captured_at,
            readings,
            image_path: None,
        }
    }

    /// Attach an image path.
    pub fn with_image(mut self, path: impl Into<String>) -> Self {
        self.image_path = Some(path.into());
        self
    }

    /// True if the record carries any channel value or an image.
    pub fn has_data(&self) -> bool {
        !self.readings.is_empty() || self.image_path.is_some()
    }
}

/// A record stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorRecord {
    /// Database row ID, strictly increasing in insertion order.
    pub id: i64,
    /// When the readings were captured.
    #[serde(with = "time::serde::rfc3339")]
    pub captured_at: OffsetDateTime,
    #[serde(flatten)]
    pub readings: Readings,
    pub image_path: Option<String>,
    /// Whether the endpoint has acknowledged this record.
    pub synced: bool,
    /// When the record was acknowledged.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub synced_at: Option<OffsetDateTime>,
}

impl SensorRecord {
    /// Upload payload: the record id, its RFC 3339 timestamp, every channel
    /// (null when missing) and the image path.
    pub fn to_payload(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("id".into(), Value::from(self.id));
        map.insert(
            "timestamp".into(),
            self.captured_at
                .format(&Rfc3339)
                .map(Value::String)
                .unwrap_or(Value::Null),
        );
        for channel in Channel::ALL {
            let value = self
                .readings
                .get(channel)
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null);
            map.insert(channel.as_str().into(), value);
        }
        map.insert(
            "image_path".into(),
            self.image_path.clone().map(Value::String).unwrap_or(Value::Null),
        );
        map
    }
}

/// Record counts and time span of the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total: u64,
    pub synced: u64,
    pub unsynced: u64,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub oldest: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub newest: Option<OffsetDateTime>,
}
