//! Google Analytics 4
//!
//! Discovery goes through the Admin API's account summaries. Metrics come
//! from one Data API `runReport` per property, grouped by default channel.

use async_trait::async_trait;
use futures::future::join_all;
use serde::Deserialize;
use serde_json::json;

use super::http::{PlatformHttp, as_u64};
use super::{
    DateRange, EntityMetrics, MetricTotals, NormalizedMetrics, PlatformAdapter, Resource,
    probe_result,
};
use crate::Result;
use crate::config::PlatformConfig;
use crate::connection::{Credential, Platform};

const ADMIN_BASE_URL: &str = "https://analyticsadmin.googleapis.com/v1beta";
const DATA_BASE_URL: &str = "https://analyticsdata.googleapis.com/v1beta";

/// Upper bound on summary pages walked during discovery
const MAX_PAGES: usize = 10;

#[derive(Debug, Clone)]
pub struct GoogleAnalyticsAdapter {
    http: PlatformHttp,
    admin_base_url: String,
    data_base_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummariesResponse {
    #[serde(default)]
    pub account_summaries: Vec<AccountSummary>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummary {
    #[serde(default)]
    pub account: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub property_summaries: Vec<PropertySummary>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertySummary {
    pub property: String,
    #[serde(default)]
    pub display_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReportResponse {
    #[serde(default)]
    pub rows: Vec<ReportRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRow {
    #[serde(default)]
    pub dimension_values: Vec<serde_json::Value>,
    #[serde(default)]
    pub metric_values: Vec<serde_json::Value>,
}

impl GoogleAnalyticsAdapter {
    pub fn new(client: reqwest::Client, settings: &PlatformConfig) -> Self {
        let (admin_base_url, data_base_url) = match &settings.api_base {
            // one override serves both APIs, as a local fake would
            Some(base) => (base.clone(), base.clone()),
            None => (ADMIN_BASE_URL.to_string(), DATA_BASE_URL.to_string()),
        };
        Self {
            http: PlatformHttp::new(Platform::GoogleAnalytics, client),
            admin_base_url,
            data_base_url,
        }
    }

    async fn account_summaries_page(
        &self,
        credential: &Credential,
        page_token: Option<&str>,
    ) -> Result<AccountSummariesResponse> {
        let url = format!("{}/accountSummaries", self.admin_base_url);
        let mut request = self
            .http
            .get(&url)
            .bearer_auth(&credential.access_token)
            .query(&[("pageSize", "200")]);
        if let Some(token) = page_token {
            request = request.query(&[("pageToken", token)]);
        }
        self.http.send_json("account_summaries", request).await
    }

    async fn run_report(
        &self,
        credential: &Credential,
        property: &Resource,
        range: &DateRange,
    ) -> Result<EntityMetrics> {
        let url = format!("{}/{}:runReport", self.data_base_url, property.id);
        let body = json!({
            "dateRanges": [{ "startDate": range.start_str(), "endDate": range.end_str() }],
            "dimensions": [{ "name": "sessionDefaultChannelGroup" }],
            "metrics": [{ "name": "sessions" }, { "name": "screenPageViews" }],
        });
        let request = self
            .http
            .post(&url)
            .bearer_auth(&credential.access_token)
            .json(&body);
        let report: RunReportResponse = self.http.send_json("run_report", request).await?;
        Ok(parse_report(property, &report))
    }
}

/// Flatten account summaries into selectable properties
pub fn parse_properties(response: &AccountSummariesResponse) -> Vec<Resource> {
    response
        .account_summaries
        .iter()
        .flat_map(|account| {
            account.property_summaries.iter().map(move |p| Resource {
                id: p.property.clone(),
                name: if p.display_name.is_empty() {
                    p.property.clone()
                } else {
                    p.display_name.clone()
                },
                parent: Some(account.display_name.clone()).filter(|n| !n.is_empty()),
            })
        })
        .collect()
}

/// Sum a channel-grouped report into one property's metrics
pub fn parse_report(property: &Resource, report: &RunReportResponse) -> EntityMetrics {
    let mut entity = EntityMetrics::new(&property.id, &property.name, MetricTotals::default());

    for row in &report.rows {
        let sessions = as_u64(row.metric_values.first().and_then(|v| v.get("value")));
        let page_views = as_u64(row.metric_values.get(1).and_then(|v| v.get("value")));
        entity.totals.sessions += sessions;
        entity.totals.page_views += page_views;

        let channel = row
            .dimension_values
            .first()
            .and_then(|v| v.get("value"))
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .unwrap_or("(not set)");
        *entity.breakdown.entry(channel.to_string()).or_default() += sessions;
    }

    entity
}

#[async_trait]
impl PlatformAdapter for GoogleAnalyticsAdapter {
    fn platform(&self) -> Platform {
        Platform::GoogleAnalytics
    }

    async fn test_connection(&self, credential: &Credential) -> Result<bool> {
        probe_result(self.account_summaries_page(credential, None).await.map(|_| ()))
    }

    #[tracing::instrument(skip(self, credential), fields(platform = "google_analytics"))]
    async fn fetch_metrics(
        &self,
        credential: &Credential,
        range: Option<DateRange>,
        selector: Option<&str>,
    ) -> Result<NormalizedMetrics> {
        let range = range.unwrap_or_default();
        let selector = selector.or(credential.resource_id.as_deref());

        let properties = self.list_resources(credential).await?;
        if properties.is_empty() {
            tracing::debug!("No GA4 properties visible to this credential");
            return Ok(NormalizedMetrics::empty(Platform::GoogleAnalytics));
        }

        let reports = join_all(
            properties
                .iter()
                .map(|property| self.run_report(credential, property, &range)),
        )
        .await;
        let entities = reports.into_iter().collect::<Result<Vec<_>>>()?;

        Ok(NormalizedMetrics::from_entities(
            Platform::GoogleAnalytics,
            entities,
            selector,
        ))
    }

    async fn list_resources(&self, credential: &Credential) -> Result<Vec<Resource>> {
        let mut properties = Vec::new();
        let mut page_token: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let page = self
                .account_summaries_page(credential, page_token.as_deref())
                .await?;
            properties.extend(parse_properties(&page));
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(properties)
    }
}
