//! [`DeliveryLog`] over the GitHub App webhook delivery API.
//!
//! GitHub lists deliveries newest first and paginates with a cursor carried in
//! the `Link` header. Listing stops at the first page that reaches back past
//! either bound.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::Deserialize;
use tracing::{debug, info};

use dispatch::{DeliveryGuid, DeliveryId, DeliveryLog, DeliveryRecord, ProviderError, Timestamp};

use crate::client::{next_link, GithubClient};
use crate::errors::GithubError;

const PAGE_SIZE: &str = "100";

/// Identity reported for calls authenticated as the App itself.
const APP_IDENTITY: &str = "app";

#[derive(Debug, Deserialize)]
pub(crate) struct Delivery {
    pub id: u64,
    pub guid: String,
    pub delivered_at: DateTime<Utc>,
    #[serde(default)]
    pub redelivery: bool,
    #[serde(default)]
    pub status_code: u16,
    #[serde(default)]
    pub event: String,
}

impl Delivery {
    pub(crate) fn into_record(self) -> Option<DeliveryRecord> {
        Some(DeliveryRecord {
            id: DeliveryId::new(self.id),
            guid: DeliveryGuid::new(self.guid)?,
            succeeded: (200..300).contains(&self.status_code),
            redelivery: self.redelivery,
            delivered_at: Timestamp::from_utc(self.delivered_at),
            event: self.event,
        })
    }
}

/// Keeps the deliveries inside both bounds. Returns `true` once the page
/// reached past a bound, meaning older pages are not needed.
pub(crate) fn collect_page(
    page: Vec<Delivery>,
    after: Option<DeliveryId>,
    not_before: Timestamp,
    into: &mut Vec<DeliveryRecord>,
) -> bool {
    let mut exhausted = false;
    for delivery in page {
        let record = match delivery.into_record() {
            Some(record) => record,
            None => continue,
        };
        let seen = after.is_some_and(|after| record.id <= after);
        if seen || record.delivered_at < not_before {
            exhausted = true;
            continue;
        }
        into.push(record);
    }
    exhausted
}

impl GithubClient {
    async fn list_deliveries(
        &self,
        after: Option<DeliveryId>,
        not_before: Timestamp,
    ) -> Result<Vec<DeliveryRecord>, GithubError> {
        let jwt = self.app_token()?;
        let mut records = Vec::new();
        let mut request = self
            .request(Method::GET, "/app/hook/deliveries", &jwt)
            .query(&[("per_page", PAGE_SIZE)]);
        let mut pages = 0usize;

        loop {
            let response = self.send(request).await?;
            let next = next_link(response.headers());
            let page: Vec<Delivery> = response.json().await.map_err(|e| GithubError::Decode {
                message: e.to_string(),
            })?;
            pages += 1;
            let exhausted = page.is_empty() || collect_page(page, after, not_before, &mut records);
            match next {
                Some(url) if !exhausted => request = self.request(Method::GET, &url, &jwt),
                _ => break,
            }
        }

        records.sort_by_key(|r| r.id);
        debug!(pages, deliveries = records.len(), "Webhook deliveries listed");
        Ok(records)
    }
}

#[async_trait]
impl DeliveryLog for GithubClient {
    async fn list_since(
        &self,
        after: Option<DeliveryId>,
        not_before: Timestamp,
    ) -> Result<Vec<DeliveryRecord>, ProviderError> {
        self.list_deliveries(after, not_before)
            .await
            .map_err(|e| e.into_provider_error(APP_IDENTITY))
    }

    async fn redeliver(&self, id: DeliveryId) -> Result<(), ProviderError> {
        let jwt = self
            .app_token()
            .map_err(|e| e.into_provider_error(APP_IDENTITY))?;
        let path = format!("/app/hook/deliveries/{id}/attempts");
        self.send(self.request(Method::POST, &path, &jwt))
            .await
            .map_err(|e| e.into_provider_error(APP_IDENTITY))?;
        info!(delivery = %id, "Redelivery requested");
        Ok(())
    }
}

#[cfg(test)]
#[path = "deliveries_tests.rs"]
mod tests;
