//! HTTP collector client
//!
//! Telemetry batches post to `{base}{bridge_id}/{device}`; derived activity
//! batches post to `{base}DA{bridge suffix}/{location}`, where the suffix is
//! the bridge id without its three-letter prefix. The body is
//! `{"e": [events]}` and only a 200 counts as accepted.

use crate::domain::{Event, Route};
use crate::infra::config::Config;
use crate::services::delivery::{Collector, DeliveryError};
use crate::services::sink::Batch;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Serialize;
use tracing::debug;

#[derive(Serialize)]
struct BatchBody<'a> {
    e: &'a [Event],
}

pub struct HttpCollector {
    telemetry_url: String,
    activity_url: String,
    auth_header: String,
    client: reqwest::Client,
}

impl HttpCollector {
    pub fn new(config: &Config) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(config.collector_timeout())
            .build()
            .map_err(|e| DeliveryError::Network(e.to_string()))?;

        let (telemetry_url, activity_url) =
            Self::series_bases(config.collector_base_url(), config.bridge_id());

        Ok(Self {
            telemetry_url,
            activity_url,
            auth_header: Self::basic_auth(config.collector_key()),
            client,
        })
    }

    /// Series base URLs for raw telemetry and derived activity
    fn series_bases(base_url: &str, bridge_id: &str) -> (String, String) {
        let suffix = bridge_id.get(3..).unwrap_or("");
        (format!("{base_url}{bridge_id}/"), format!("{base_url}DA{suffix}/"))
    }

    /// The collector key is the user name; the password is empty
    fn basic_auth(key: &str) -> String {
        format!("Basic {}", STANDARD.encode(format!("{key}:")))
    }

    fn url_for(&self, batch: &Batch) -> String {
        match batch.route {
            Route::Telemetry => format!("{}{}", self.telemetry_url, batch.device),
            Route::DerivedActivity => format!("{}{}", self.activity_url, batch.device),
        }
    }

    fn encode(batch: &Batch) -> Result<Vec<u8>, DeliveryError> {
        serde_json::to_vec(&BatchBody { e: &batch.events })
            .map_err(|e| DeliveryError::Serialization(e.to_string()))
    }
}

#[async_trait]
impl Collector for HttpCollector {
    async fn deliver(&self, batch: &Batch) -> Result<(), DeliveryError> {
        let url = self.url_for(batch);
        let body = Self::encode(batch)?;

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Authorization", &self.auth_header)
            .body(body)
            .send()
            .await
            .map_err(|e| DeliveryError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        debug!(url = %url, status = %status, "collector_response");
        if status == 200 {
            Ok(())
        } else {
            Err(DeliveryError::Status { status })
        }
    }
}
