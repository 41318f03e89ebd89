//! Meta (Facebook/Instagram) ads through the Graph API
//!
//! Insights are requested as a field expansion on `/me/adaccounts`, so a
//! single call returns every account with its totals for the range.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::http::{PlatformHttp, as_f64, as_u64};
use super::{
    DateRange, EntityMetrics, MetricTotals, NormalizedMetrics, PlatformAdapter, Resource,
    probe_result,
};
use crate::Result;
use crate::config::PlatformConfig;
use crate::connection::{Credential, Platform};

const BASE_URL: &str = "https://graph.facebook.com/v19.0";

/// Upper bound on account pages followed
const MAX_PAGES: usize = 10;

#[derive(Debug, Clone)]
pub struct MetaAdsAdapter {
    http: PlatformHttp,
    base_url: String,
}

#[derive(Debug, Deserialize)]
pub struct AdAccountsPage {
    #[serde(default)]
    pub data: Vec<AdAccount>,
    #[serde(default)]
    pub paging: Option<Paging>,
}

#[derive(Debug, Deserialize)]
pub struct Paging {
    #[serde(default)]
    pub next: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AdAccount {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub business_name: Option<String>,
    #[serde(default)]
    pub insights: Option<InsightsEdge>,
}

#[derive(Debug, Deserialize)]
pub struct InsightsEdge {
    #[serde(default)]
    pub data: Vec<Value>,
}

impl MetaAdsAdapter {
    pub fn new(client: reqwest::Client, settings: &PlatformConfig) -> Self {
        Self {
            http: PlatformHttp::new(Platform::MetaAds, client),
            base_url: settings
                .api_base
                .clone()
                .unwrap_or_else(|| BASE_URL.to_string()),
        }
    }

    /// Walk `/me/adaccounts`, following `paging.next`
    async fn ad_accounts(&self, credential: &Credential, fields: String) -> Result<Vec<AdAccount>> {
        let mut accounts = Vec::new();
        let mut request = self
            .http
            .get(&format!("{}/me/adaccounts", self.base_url))
            .query(&[
                ("fields", fields.as_str()),
                ("limit", "100"),
                ("access_token", credential.access_token.as_str()),
            ]);

        for _ in 0..MAX_PAGES {
            let page: AdAccountsPage = self.http.send_json("ad_accounts", request).await?;
            accounts.extend(page.data);
            match page.paging.and_then(|p| p.next) {
                // `next` already carries the token and cursor
                Some(next) => request = self.http.get(&next),
                None => break,
            }
        }

        Ok(accounts)
    }
}

/// Account fields with the insights expansion for `range`
pub fn insights_fields(range: &DateRange) -> String {
    format!(
        "id,name,business_name,insights.time_range({{\"since\":\"{}\",\"until\":\"{}\"}}){{spend,impressions,clicks,reach}}",
        range.start_str(),
        range.end_str()
    )
}

fn display_name(account: &AdAccount) -> String {
    account
        .name
        .clone()
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| account.id.clone())
}

pub fn parse_resources(accounts: &[AdAccount]) -> Vec<Resource> {
    accounts
        .iter()
        .map(|a| Resource {
            id: a.id.clone(),
            name: display_name(a),
            parent: a.business_name.clone().filter(|n| !n.is_empty()),
        })
        .collect()
}

/// Account totals; Graph returns every number as a string
pub fn parse_account_metrics(account: &AdAccount) -> EntityMetrics {
    let mut totals = MetricTotals::default();
    let rows = account.insights.iter().flat_map(|i| i.data.iter());
    for row in rows {
        totals.spend += as_f64(row.get("spend"));
        totals.impressions += as_u64(row.get("impressions"));
        totals.clicks += as_u64(row.get("clicks"));
        totals.reach += as_u64(row.get("reach"));
    }
    EntityMetrics::new(&account.id, display_name(account), totals)
}

/// Graph ids carry an `act_` prefix that users often leave off
fn normalize_account_id(id: &str) -> String {
    if id.starts_with("act_") {
        id.to_string()
    } else {
        format!("act_{}", id)
    }
}

#[async_trait]
impl PlatformAdapter for MetaAdsAdapter {
    fn platform(&self) -> Platform {
        Platform::MetaAds
    }

    async fn test_connection(&self, credential: &Credential) -> Result<bool> {
        let request = self.http.get(&format!("{}/me", self.base_url)).query(&[
            ("fields", "id"),
            ("access_token", credential.access_token.as_str()),
        ]);
        probe_result(
            self.http
                .send_json::<Value>("me", request)
                .await
                .map(|_| ()),
        )
    }

    #[tracing::instrument(skip(self, credential), fields(platform = "meta_ads"))]
    async fn fetch_metrics(
        &self,
        credential: &Credential,
        range: Option<DateRange>,
        selector: Option<&str>,
    ) -> Result<NormalizedMetrics> {
        let range = range.unwrap_or_default();
        let selector = selector
            .or(credential.resource_id.as_deref())
            .map(normalize_account_id);

        let accounts = self.ad_accounts(credential, insights_fields(&range)).await?;
        let entities = accounts.iter().map(parse_account_metrics).collect();

        Ok(NormalizedMetrics::from_entities(
            Platform::MetaAds,
            entities,
            selector.as_deref(),
        ))
    }

    async fn list_resources(&self, credential: &Credential) -> Result<Vec<Resource>> {
        let accounts = self
            .ad_accounts(credential, "id,name,business_name".to_string())
            .await?;
        Ok(parse_resources(&accounts))
    }
}
