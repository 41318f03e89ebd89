//! Google Ads
//!
//! Customers come from `listAccessibleCustomers`; each customer's totals from
//! one GAQL `searchStream` call. Every call needs the developer token.

use async_trait::async_trait;
use futures::future::join_all;
use serde::Deserialize;
use serde_json::{Value, json};

use super::http::{PlatformHttp, as_f64, as_u64};
use super::{
    DateRange, EntityMetrics, MetricTotals, NormalizedMetrics, PlatformAdapter, Resource,
    probe_result,
};
use crate::config::PlatformConfig;
use crate::connection::{Credential, Platform};
use crate::{CoreError, Result};

const BASE_URL: &str = "https://googleads.googleapis.com/v17";

#[derive(Debug, Clone)]
pub struct GoogleAdsAdapter {
    http: PlatformHttp,
    base_url: String,
    developer_token: Option<String>,
    login_customer_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessibleCustomers {
    #[serde(default)]
    pub resource_names: Vec<String>,
}

/// One `searchStream` batch
#[derive(Debug, Deserialize)]
pub struct SearchStreamBatch {
    #[serde(default)]
    pub results: Vec<Value>,
}

impl GoogleAdsAdapter {
    pub fn new(client: reqwest::Client, settings: &PlatformConfig) -> Self {
        Self {
            http: PlatformHttp::new(Platform::GoogleAds, client),
            base_url: settings
                .api_base
                .clone()
                .unwrap_or_else(|| BASE_URL.to_string()),
            developer_token: settings.developer_token.clone().filter(|t| !t.is_empty()),
            login_customer_id: settings.login_customer_id.clone().filter(|t| !t.is_empty()),
        }
    }

    fn developer_token(&self) -> Result<&str> {
        self.developer_token.as_deref().ok_or_else(|| {
            CoreError::validation(
                "developer_token",
                "Google Ads requires a developer token in the server configuration",
            )
        })
    }

    fn authorized(
        &self,
        request: reqwest::RequestBuilder,
        credential: &Credential,
    ) -> Result<reqwest::RequestBuilder> {
        let mut request = request
            .bearer_auth(&credential.access_token)
            .header("developer-token", self.developer_token()?);
        if let Some(login) = &self.login_customer_id {
            request = request.header("login-customer-id", login.replace('-', ""));
        }
        Ok(request)
    }

    async fn accessible_customers(&self, credential: &Credential) -> Result<Vec<String>> {
        let url = format!("{}/customers:listAccessibleCustomers", self.base_url);
        let request = self.authorized(self.http.get(&url), credential)?;
        let response: AccessibleCustomers = self
            .http
            .send_json("list_accessible_customers", request)
            .await?;
        Ok(parse_customer_ids(&response))
    }

    async fn search(
        &self,
        credential: &Credential,
        customer_id: &str,
        query: String,
    ) -> Result<Vec<SearchStreamBatch>> {
        let url = format!(
            "{}/customers/{}/googleAds:searchStream",
            self.base_url, customer_id
        );
        let request =
            self.authorized(self.http.post(&url), credential)?.json(&json!({ "query": query }));
        self.http.send_json("search_stream", request).await
    }

    async fn customer_metrics(
        &self,
        credential: &Credential,
        customer_id: &str,
        range: &DateRange,
    ) -> Result<EntityMetrics> {
        let batches = self
            .search(credential, customer_id, metrics_query(range))
            .await?;
        Ok(parse_customer_metrics(customer_id, &batches))
    }

    async fn customer_resource(&self, credential: &Credential, customer_id: &str) -> Result<Resource> {
        let batches = self
            .search(
                credential,
                customer_id,
                "SELECT customer.id, customer.descriptive_name FROM customer".to_string(),
            )
            .await?;
        Ok(parse_customer_resource(customer_id, &batches))
    }
}

/// GAQL for per-customer totals over the range
pub fn metrics_query(range: &DateRange) -> String {
    format!(
        "SELECT customer.id, customer.descriptive_name, metrics.cost_micros, \
         metrics.impressions, metrics.clicks, metrics.conversions \
         FROM customer WHERE segments.date BETWEEN '{}' AND '{}'",
        range.start_str(),
        range.end_str()
    )
}

/// `customers/1234567890` to `1234567890`
pub fn parse_customer_ids(response: &AccessibleCustomers) -> Vec<String> {
    response
        .resource_names
        .iter()
        .filter_map(|name| name.strip_prefix("customers/"))
        .map(str::to_string)
        .collect()
}

fn descriptive_name(batches: &[SearchStreamBatch]) -> Option<String> {
    batches
        .iter()
        .flat_map(|b| b.results.iter())
        .find_map(|r| r.pointer("/customer/descriptiveName").and_then(Value::as_str))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub fn parse_customer_resource(customer_id: &str, batches: &[SearchStreamBatch]) -> Resource {
    Resource {
        id: customer_id.to_string(),
        name: descriptive_name(batches).unwrap_or_else(|| customer_id.to_string()),
        parent: None,
    }
}

/// Sum every row across batches. Cost arrives in micros.
pub fn parse_customer_metrics(customer_id: &str, batches: &[SearchStreamBatch]) -> EntityMetrics {
    let mut totals = MetricTotals::default();
    let mut cost_micros: u64 = 0;

    for row in batches.iter().flat_map(|b| b.results.iter()) {
        let metrics = row.get("metrics");
        let field = |name: &str| metrics.and_then(|m| m.get(name));
        cost_micros += as_u64(field("costMicros"));
        totals.impressions += as_u64(field("impressions"));
        totals.clicks += as_u64(field("clicks"));
        totals.conversions += as_f64(field("conversions"));
    }
    totals.spend = cost_micros as f64 / 1_000_000.0;

    let name = descriptive_name(batches).unwrap_or_else(|| customer_id.to_string());
    EntityMetrics::new(customer_id, name, totals)
}

#[async_trait]
impl PlatformAdapter for GoogleAdsAdapter {
    fn platform(&self) -> Platform {
        Platform::GoogleAds
    }

    async fn test_connection(&self, credential: &Credential) -> Result<bool> {
        probe_result(self.accessible_customers(credential).await.map(|_| ()))
    }

    #[tracing::instrument(skip(self, credential), fields(platform = "google_ads"))]
    async fn fetch_metrics(
        &self,
        credential: &Credential,
        range: Option<DateRange>,
        selector: Option<&str>,
    ) -> Result<NormalizedMetrics> {
        let range = range.unwrap_or_default();
        let selector = selector
            .or(credential.resource_id.as_deref())
            .map(|s| s.replace('-', ""));

        let customers = self.accessible_customers(credential).await?;
        if customers.is_empty() {
            return Ok(NormalizedMetrics::empty(Platform::GoogleAds));
        }

        let results = join_all(
            customers
                .iter()
                .map(|id| self.customer_metrics(credential, id, &range)),
        )
        .await;
        let entities = results.into_iter().collect::<Result<Vec<_>>>()?;

        Ok(NormalizedMetrics::from_entities(
            Platform::GoogleAds,
            entities,
            selector.as_deref(),
        ))
    }

    async fn list_resources(&self, credential: &Credential) -> Result<Vec<Resource>> {
        let customers = self.accessible_customers(credential).await?;
        let resources = join_all(
            customers
                .iter()
                .map(|id| self.customer_resource(credential, id)),
        )
        .await;

        // manager-only customers reject direct queries; list them by id
        resources
            .into_iter()
            .zip(customers)
            .map(|(result, id)| match result {
                Ok(resource) => Ok(resource),
                Err(e) if e.is_auth_failure() => Err(e),
                Err(_) => Ok(Resource {
                    name: id.clone(),
                    id,
                    parent: None,
                }),
            })
            .collect()
    }
}
