//! Remote endpoints that accept records.
//!
//! A [`Submitter`] delivers one record and reports success only when the
//! endpoint positively acknowledged it. The sync engine marks a record as
//! synced after that acknowledgment and never before, so delivery is
//! at-least-once: endpoints must tolerate the occasional duplicate.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use time::format_description::well_known::Rfc3339;
use tracing::debug;

use hivewatch_core::codes;
use hivewatch_store::SensorRecord;
use hivewatch_types::Channel;

use crate::config::{UploadConfig, UploadKind};

/// Errors from a single submit attempt.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// The endpoint answered with a non-success status.
    #[error("Endpoint returned {status}: {message}")]
    Status { status: u16, message: String },

    /// The endpoint answered 2xx but refused the update.
    #[error("Endpoint rejected the record: {0}")]
    Rejected(String),

    /// The endpoint could not be reached.
    #[error("Cannot reach {url}")]
    Connection {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The submit did not complete in time.
    #[error("Submit timed out after {0:?}")]
    Timeout(Duration),

    /// The submitter could not be built.
    #[error("Invalid upload configuration: {0}")]
    Config(String),
}

impl SubmitError {
    /// Error log code for this failure.
    pub fn code(&self) -> &'static str {
        match self {
            SubmitError::Status { .. } | SubmitError::Rejected(_) => codes::SERVER_UPLOAD_ERROR,
            SubmitError::Connection { .. } | SubmitError::Config(_) => {
                codes::SERVER_CONNECTION_ERROR
            }
            SubmitError::Timeout(_) => codes::SERVER_TIMEOUT,
        }
    }

    fn from_reqwest(url: &str, timeout: Duration, e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SubmitError::Timeout(timeout)
        } else {
            SubmitError::Connection {
                url: url.to_string(),
                source: e,
            }
        }
    }
}

/// A remote endpoint that accepts records.
#[async_trait]
pub trait Submitter: Send + Sync {
    /// Deliver one record. `Ok(())` means the endpoint acknowledged it.
    async fn submit(&self, record: &SensorRecord) -> Result<(), SubmitError>;
}

#[async_trait]
impl<T: Submitter + ?Sized> Submitter for Arc<T> {
    async fn submit(&self, record: &SensorRecord) -> Result<(), SubmitError> {
        (**self).submit(record).await
    }
}

fn build_client(timeout: Duration) -> Result<Client, SubmitError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| SubmitError::Config(e.to_string()))
}

/// POSTs each record as a JSON object.
#[derive(Debug, Clone)]
pub struct HttpSubmitter {
    client: Client,
    url: String,
    timeout: Duration,
}

impl HttpSubmitter {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, SubmitError> {
        Ok(Self {
            client: build_client(timeout)?,
            url: url.into(),
            timeout,
        })
    }
}

#[async_trait]
impl Submitter for HttpSubmitter {
    async fn submit(&self, record: &SensorRecord) -> Result<(), SubmitError> {
        let response = self
            .client
            .post(&self.url)
            .json(&record.to_payload())
            .send()
            .await
            .map_err(|e| SubmitError::from_reqwest(&self.url, self.timeout, e))?;

        let status = response.status();
        if status.is_success() {
            debug!("Record {} accepted ({})", record.id, status);
            Ok(())
        } else {
            let message = response.text().await.unwrap_or_default();
            Err(SubmitError::Status {
                status: status.as_u16(),
                message,
            })
        }
    }
}

/// Channels sent to ThingSpeak, in field order.
const THINGSPEAK_FIELDS: [Channel; 5] = [
    Channel::TempInside,
    Channel::HumidityInside,
    Channel::TempOutside,
    Channel::HumidityOutside,
    Channel::Weight,
];

/// Updates a ThingSpeak channel.
///
/// `field1` to `field5` carry indoor temperature, indoor humidity, outdoor
/// temperature, outdoor humidity and weight. ThingSpeak answers `0` instead
/// of an entry id when it refuses an update, so that body is a failure even
/// with a 200 status.
#[derive(Debug, Clone)]
pub struct ThingSpeakSubmitter {
    client: Client,
    url: String,
    api_key: String,
    timeout: Duration,
}

impl ThingSpeakSubmitter {
    pub fn new(
        url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SubmitError> {
        Ok(Self {
            client: build_client(timeout)?,
            url: url.into(),
            api_key: api_key.into(),
            timeout,
        })
    }

    /// Form fields for one record. Missing channels are left out.
    pub fn form_fields(&self, record: &SensorRecord) -> Vec<(String, String)> {
        let mut fields = vec![("api_key".to_string(), self.api_key.clone())];
        for (i, channel) in THINGSPEAK_FIELDS.iter().enumerate() {
            if let Some(value) = record.readings.get(*channel) {
                fields.push((format!("field{}", i + 1), value.to_string()));
            }
        }
        if let Ok(created_at) = record.captured_at.format(&Rfc3339) {
            fields.push(("created_at".to_string(), created_at));
        }
        fields
    }
}

#[async_trait]
impl Submitter for ThingSpeakSubmitter {
    async fn submit(&self, record: &SensorRecord) -> Result<(), SubmitError> {
        let response = self
            .client
            .post(&self.url)
            .form(&self.form_fields(record))
            .send()
            .await
            .map_err(|e| SubmitError::from_reqwest(&self.url, self.timeout, e))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(SubmitError::Status {
                status: status.as_u16(),
                message: body,
            });
        }
        if body.trim() == "0" {
            return Err(SubmitError::Rejected(
                "ThingSpeak refused the update".to_string(),
            ));
        }
        debug!("Record {} stored as ThingSpeak entry {}", record.id, body.trim());
        Ok(())
    }
}

/// Build the configured submitter, or `None` when uploads are disabled.
pub fn build_submitter(config: &UploadConfig) -> Result<Option<Arc<dyn Submitter>>, SubmitError> {
    let Some(url) = config.url.as_deref() else {
        return Ok(None);
    };
    let submitter: Arc<dyn Submitter> = match config.kind {
        UploadKind::Http => Arc::new(HttpSubmitter::new(url, config.timeout())?),
        UploadKind::Thingspeak => {
            let key = config
                .api_key
                .as_deref()
                .ok_or_else(|| SubmitError::Config("missing ThingSpeak API key".to_string()))?;
            Arc::new(ThingSpeakSubmitter::new(url, key, config.timeout())?)
        }
    };
    Ok(Some(submitter))
}
