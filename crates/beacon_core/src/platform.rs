//! Platform fetch adapters
//!
//! One adapter per external platform. Each turns a [`Credential`] into
//! [`NormalizedMetrics`] or a typed failure: [`CoreError::AuthFailure`] when
//! the credential is no good, [`CoreError::TransientNetworkFailure`] for
//! everything else. An account with nothing in it is a successful, empty
//! result.

pub mod google_ads;
pub mod google_analytics;
pub mod http;
pub mod meta_ads;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::BeaconConfig;
use crate::connection::{Credential, Platform};
use crate::{CoreError, Result};

pub use google_ads::GoogleAdsAdapter;
pub use google_analytics::GoogleAnalyticsAdapter;
pub use meta_ads::MetaAdsAdapter;

/// Days covered when a caller does not pass a range
pub const DEFAULT_LOOKBACK_DAYS: i64 = 30;

/// Inclusive date range for reporting queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(CoreError::validation(
                "date_range",
                format!("start {} is after end {}", start, end),
            ));
        }
        Ok(Self { start, end })
    }

    /// The `days` days ending today (UTC)
    pub fn last_days(days: i64) -> Self {
        let end = Utc::now().date_naive();
        let start = end - Duration::days(days.max(1) - 1);
        Self { start, end }
    }

    pub fn start_str(&self) -> String {
        self.start.format("%Y-%m-%d").to_string()
    }

    pub fn end_str(&self) -> String {
        self.end.format("%Y-%m-%d").to_string()
    }
}

impl Default for DateRange {
    fn default() -> Self {
        Self::last_days(DEFAULT_LOOKBACK_DAYS)
    }
}

/// A selectable sub-resource: GA4 property, Google Ads customer, Meta ad account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Resource {
    pub id: String,
    pub name: String,
    /// Owning account, where the platform has one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

/// Numeric metrics every platform maps onto. Fields a platform does not
/// report stay zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MetricTotals {
    pub sessions: u64,
    pub page_views: u64,
    pub spend: f64,
    pub impressions: u64,
    pub clicks: u64,
    pub conversions: f64,
    pub reach: u64,
}

impl MetricTotals {
    pub fn merge(&mut self, other: &MetricTotals) {
        self.sessions += other.sessions;
        self.page_views += other.page_views;
        self.spend += other.spend;
        self.impressions += other.impressions;
        self.clicks += other.clicks;
        self.conversions += other.conversions;
        self.reach += other.reach;
    }

    pub fn is_zero(&self) -> bool {
        *self == MetricTotals::default()
    }

    /// Click-through rate as a percentage
    pub fn ctr(&self) -> Option<f64> {
        (self.impressions > 0).then(|| self.clicks as f64 / self.impressions as f64 * 100.0)
    }

    pub fn cost_per_click(&self) -> Option<f64> {
        (self.clicks > 0).then(|| self.spend / self.clicks as f64)
    }
}

impl std::iter::Sum for MetricTotals {
    fn sum<I: Iterator<Item = MetricTotals>>(iter: I) -> Self {
        iter.fold(MetricTotals::default(), |mut acc, t| {
            acc.merge(&t);
            acc
        })
    }
}

/// Metrics for one sub-resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EntityMetrics {
    pub id: String,
    pub name: String,
    pub totals: MetricTotals,
    /// Category label to weight, e.g. channel group to sessions
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub breakdown: HashMap<String, u64>,
}

impl EntityMetrics {
    pub fn new(id: impl Into<String>, name: impl Into<String>, totals: MetricTotals) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            totals,
            breakdown: HashMap::new(),
        }
    }
}

/// One adapter's answer for one credential
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NormalizedMetrics {
    pub platform: Platform,
    /// Totals for the selected sub-resource, or for every one if none selected
    pub totals: MetricTotals,
    /// Totals across every sub-resource, present only when a selector was used
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cumulative: Option<MetricTotals>,
    /// Sub-resources that contributed to `totals`
    pub entities: Vec<EntityMetrics>,
    /// Largest category across the contributing sub-resources
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_category: Option<String>,
}

impl NormalizedMetrics {
    pub fn empty(platform: Platform) -> Self {
        Self {
            platform,
            totals: MetricTotals::default(),
            cumulative: None,
            entities: Vec::new(),
            top_category: None,
        }
    }

    /// Fold per-entity results, scoping `totals` to `selector` when given.
    ///
    /// A selector that matches nothing yields zero totals, not an error; the
    /// selected account may simply have had no activity.
    pub fn from_entities(
        platform: Platform,
        entities: Vec<EntityMetrics>,
        selector: Option<&str>,
    ) -> Self {
        let cumulative: MetricTotals = entities.iter().map(|e| e.totals).sum();

        let (entities, cumulative) = match selector {
            Some(id) => {
                let selected: Vec<EntityMetrics> =
                    entities.into_iter().filter(|e| e.id == id).collect();
                (selected, Some(cumulative))
            }
            None => (entities, None),
        };

        let totals = entities.iter().map(|e| e.totals).sum();
        let top_category = top_weighted(entities.iter().flat_map(|e| e.breakdown.iter()));

        Self {
            platform,
            totals,
            cumulative,
            entities,
            top_category,
        }
    }

    /// NoData is a successful answer with nothing in it
    pub fn has_data(&self) -> bool {
        !self.entities.is_empty() || !self.totals.is_zero()
    }
}

/// Label with the largest summed weight; ties go to the alphabetically first
fn top_weighted<'a>(pairs: impl Iterator<Item = (&'a String, &'a u64)>) -> Option<String> {
    let mut weights: HashMap<&str, u64> = HashMap::new();
    for (label, weight) in pairs {
        *weights.entry(label.as_str()).or_default() += *weight;
    }
    weights
        .into_iter()
        .max_by(|(a_label, a), (b_label, b)| a.cmp(b).then_with(|| b_label.cmp(a_label)))
        .map(|(label, _)| label.to_string())
}

/// Fetch adapter for one platform
#[async_trait]
pub trait PlatformAdapter: Send + Sync + std::fmt::Debug {
    fn platform(&self) -> Platform;

    /// Whether the credential is accepted. Credential rejection is `Ok(false)`;
    /// an unreachable platform is an error.
    async fn test_connection(&self, credential: &Credential) -> Result<bool>;

    /// Metrics for the range (default: last 30 days). `selector` narrows to one
    /// sub-resource; when absent the credential's selected resource is used.
    async fn fetch_metrics(
        &self,
        credential: &Credential,
        range: Option<DateRange>,
        selector: Option<&str>,
    ) -> Result<NormalizedMetrics>;

    /// Properties / ad accounts reachable with the credential
    async fn list_resources(&self, credential: &Credential) -> Result<Vec<Resource>>;
}

/// Turn a credential probe error into the `test_connection` answer
pub(crate) fn probe_result(result: Result<()>) -> Result<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(e) if e.is_auth_failure() => Ok(false),
        Err(e) => Err(e),
    }
}

/// Adapters keyed by platform
#[derive(Debug, Clone, Default)]
pub struct PlatformRegistry {
    adapters: HashMap<Platform, Arc<dyn PlatformAdapter>>,
}

impl PlatformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The HTTP adapters for every supported platform
    pub fn from_config(config: &BeaconConfig) -> Self {
        let client = http::PlatformHttp::client();
        Self::new()
            .with_adapter(Arc::new(GoogleAnalyticsAdapter::new(
                client.clone(),
                config.platforms.get(Platform::GoogleAnalytics),
            )))
            .with_adapter(Arc::new(GoogleAdsAdapter::new(
                client.clone(),
                config.platforms.get(Platform::GoogleAds),
            )))
            .with_adapter(Arc::new(MetaAdsAdapter::new(
                client,
                config.platforms.get(Platform::MetaAds),
            )))
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn PlatformAdapter>) -> Self {
        self.adapters.insert(adapter.platform(), adapter);
        self
    }

    pub fn get(&self, platform: Platform) -> Result<Arc<dyn PlatformAdapter>> {
        self.adapters.get(&platform).cloned().ok_or_else(|| {
            CoreError::validation(
                "platform",
                format!("No adapter registered for {}", platform),
            )
        })
    }
}
