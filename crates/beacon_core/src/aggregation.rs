//! Multi-source aggregation
//!
//! Every live connection in scope gets one adapter call, all issued before
//! any is awaited. A branch that fails or runs past the adapter timeout is
//! logged, reported in the breakdown and left out of the sums; the other
//! branches still land. No connections at all is a zero-valued result.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::config::AggregationConfig;
use crate::connection::{Connection, Platform, PlatformFamily};
use crate::id::{ClientId, ConnectionId, UserId};
use crate::lifecycle::ConnectionManager;
use crate::platform::{DateRange, MetricTotals, NormalizedMetrics};
use crate::{CoreError, Result, log_contained};

pub mod dashboard;

pub use dashboard::{ActivityItem, ActivityKind, DashboardStats, HealthEntry, UsageStats};

/// What to aggregate over
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<DateRange>,
    /// Restrict to analytics or advertising platforms
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<PlatformFamily>,
    /// Restrict to one platform
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    /// Sub-resource to drill into; only honored together with `platform`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
}

impl MetricsQuery {
    fn includes(&self, platform: Platform) -> bool {
        self.platform.is_none_or(|p| p == platform)
            && self.family.is_none_or(|f| f == platform.family())
    }

    fn platforms(&self) -> Vec<Platform> {
        Platform::ALL
            .into_iter()
            .filter(|p| self.includes(*p))
            .collect()
    }

    fn selector(&self) -> Option<&str> {
        self.platform.and(self.selector.as_deref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchStatus {
    Ok,
    NoData,
    Failed,
}

/// One connection's contribution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformBreakdown {
    pub connection_id: ConnectionId,
    pub client_id: ClientId,
    pub platform: Platform,
    pub status: BranchStatus,
    pub totals: MetricTotals,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cumulative: Option<MetricTotals>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The failure was a credential problem; the user must reconnect
    #[serde(default)]
    pub reconnect_required: bool,
}

/// Fan-in of every branch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatedMetrics {
    #[serde(flatten)]
    pub totals: MetricTotals,
    /// Most frequent top category across successful branches
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_source: Option<String>,
    pub breakdown: Vec<PlatformBreakdown>,
    pub connected_platforms: Vec<Platform>,
    pub missing_platforms: Vec<Platform>,
    pub failed_platforms: Vec<Platform>,
    pub insights: Vec<String>,
}

impl AggregatedMetrics {
    /// Zero-valued result for a scope with no connections
    pub fn empty(scope: &[Platform]) -> Self {
        let mut metrics = Self {
            missing_platforms: scope.to_vec(),
            ..Default::default()
        };
        metrics.insights = insights(&metrics);
        metrics
    }

    pub fn failed_connections(&self) -> impl Iterator<Item = &PlatformBreakdown> {
        self.breakdown
            .iter()
            .filter(|b| b.status == BranchStatus::Failed)
    }
}

/// Condensed platform snapshot for one client, as handed to the assistant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientContext {
    pub client_id: ClientId,
    pub client_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    pub range: DateRange,
    pub connected_platforms: Vec<Platform>,
    pub missing_platforms: Vec<Platform>,
    pub metrics: AggregatedMetrics,
}

impl ClientContext {
    /// Plain-text rendering for a system prompt
    pub fn render(&self) -> String {
        let mut out = format!("Client: {}", self.client_name);
        if let Some(website) = &self.website {
            out.push_str(&format!(" ({})", website));
        }
        out.push_str(&format!(
            "\nReporting period: {} to {}",
            self.range.start_str(),
            self.range.end_str()
        ));

        out.push_str("\nConnected platforms: ");
        out.push_str(&platform_list(&self.connected_platforms));
        out.push_str("\nNot connected: ");
        out.push_str(&platform_list(&self.missing_platforms));

        let totals = &self.metrics.totals;
        for entry in &self.metrics.breakdown {
            out.push_str(&format!("\n\n{}:", entry.platform.display_name()));
            match entry.status {
                BranchStatus::Failed => out.push_str(&format!(
                    " data unavailable ({})",
                    entry.error.as_deref().unwrap_or("unknown error")
                )),
                BranchStatus::NoData => out.push_str(" connected, no data for this period"),
                BranchStatus::Ok => out.push_str(&render_totals(entry.platform, &entry.totals)),
            }
            if let Some(category) = &entry.top_category {
                out.push_str(&format!("\n- Top traffic source: {}", category));
            }
        }

        if !totals.is_zero() {
            out.push_str("\n\nCombined:");
            out.push_str(&render_totals_all(totals));
        }
        for insight in &self.metrics.insights {
            out.push_str(&format!("\n- {}", insight));
        }
        out
    }
}

fn platform_list(platforms: &[Platform]) -> String {
    if platforms.is_empty() {
        "none".to_string()
    } else {
        platforms
            .iter()
            .map(|p| p.display_name())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn render_totals(platform: Platform, totals: &MetricTotals) -> String {
    match platform.family() {
        PlatformFamily::Analytics => format!(
            "\n- Sessions: {}\n- Page views: {}",
            totals.sessions, totals.page_views
        ),
        PlatformFamily::Advertising => format!(
            "\n- Spend: ${:.2}\n- Impressions: {}\n- Clicks: {}\n- Conversions: {:.1}",
            totals.spend, totals.impressions, totals.clicks, totals.conversions
        ),
    }
}

fn render_totals_all(totals: &MetricTotals) -> String {
    format!(
        "\n- Sessions: {}\n- Page views: {}\n- Ad spend: ${:.2}\n- Impressions: {}\n- Clicks: {}",
        totals.sessions, totals.page_views, totals.spend, totals.impressions, totals.clicks
    )
}

/// Mode of the labels; ties go to the alphabetically first
fn mode<'a>(labels: impl Iterator<Item = &'a str>) -> Option<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for label in labels {
        *counts.entry(label).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by(|(a_label, a), (b_label, b)| a.cmp(b).then_with(|| b_label.cmp(a_label)))
        .map(|(label, _)| label.to_string())
}

/// Human-readable observations about an aggregate
pub fn insights(metrics: &AggregatedMetrics) -> Vec<String> {
    let mut out = Vec::new();
    let totals = &metrics.totals;

    if let Some(ctr) = totals.ctr() {
        out.push(format!("Click-through rate is {:.2}%", ctr));
    }
    if let Some(cpc) = totals.cost_per_click() {
        out.push(format!("Average cost per click is ${:.2}", cpc));
    }
    if let Some(source) = &metrics.top_source {
        out.push(format!("Top traffic source is {}", source));
    }
    if !metrics.failed_platforms.is_empty() {
        out.push(format!(
            "Data from {} is currently unavailable",
            platform_list(&metrics.failed_platforms)
        ));
    }
    if !metrics.missing_platforms.is_empty() {
        out.push(format!(
            "Connect {} to see more data",
            platform_list(&metrics.missing_platforms)
        ));
    }
    out
}

/// Fold settled branches into one aggregate. Failed branches are reported
/// but contribute nothing to the sums.
pub fn fold(
    scope: &[Platform],
    branches: Vec<(Connection, Result<NormalizedMetrics>)>,
) -> AggregatedMetrics {
    let mut metrics = AggregatedMetrics::default();

    for (connection, outcome) in branches {
        let entry = match outcome {
            Ok(result) => {
                metrics.totals.merge(&result.totals);
                PlatformBreakdown {
                    connection_id: connection.id,
                    client_id: connection.client_id,
                    platform: connection.platform,
                    status: if result.has_data() {
                        BranchStatus::Ok
                    } else {
                        BranchStatus::NoData
                    },
                    totals: result.totals,
                    cumulative: result.cumulative,
                    top_category: result.top_category,
                    error: None,
                    reconnect_required: false,
                }
            }
            Err(e) => PlatformBreakdown {
                connection_id: connection.id,
                client_id: connection.client_id,
                platform: connection.platform,
                status: BranchStatus::Failed,
                totals: MetricTotals::default(),
                cumulative: None,
                top_category: None,
                reconnect_required: e.is_auth_failure(),
                error: Some(e.user_message()),
            },
        };
        metrics.breakdown.push(entry);
    }

    metrics.breakdown.sort_by_key(|b| b.platform);
    metrics.top_source = mode(
        metrics
            .breakdown
            .iter()
            .filter_map(|b| b.top_category.as_deref()),
    );

    for platform in scope {
        let entries: Vec<&PlatformBreakdown> = metrics
            .breakdown
            .iter()
            .filter(|b| b.platform == *platform)
            .collect();
        if entries.is_empty() {
            metrics.missing_platforms.push(*platform);
            continue;
        }
        metrics.connected_platforms.push(*platform);
        if entries.iter().all(|b| b.status == BranchStatus::Failed) {
            metrics.failed_platforms.push(*platform);
        }
    }

    metrics.insights = insights(&metrics);
    metrics
}

/// Fans adapter calls out across connections
#[derive(Debug, Clone)]
pub struct AggregationEngine {
    manager: Arc<ConnectionManager>,
    adapter_timeout: Duration,
    lookback_days: i64,
    activity_limit: usize,
}

impl AggregationEngine {
    pub fn new(manager: Arc<ConnectionManager>, config: &AggregationConfig) -> Self {
        Self {
            manager,
            adapter_timeout: config.adapter_timeout(),
            lookback_days: config.default_lookback_days,
            activity_limit: config.recent_activity_limit,
        }
    }

    pub fn with_adapter_timeout(mut self, timeout: Duration) -> Self {
        self.adapter_timeout = timeout;
        self
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn default_range(&self) -> DateRange {
        DateRange::last_days(self.lookback_days)
    }

    /// Metrics for one client the user owns
    #[tracing::instrument(skip(self, query), fields(user = %user_id, client = %client_id))]
    pub async fn aggregate_client(
        &self,
        user_id: &UserId,
        client_id: &ClientId,
        query: &MetricsQuery,
    ) -> Result<AggregatedMetrics> {
        self.manager.owned_client(user_id, client_id).await?;
        let connections = self
            .manager
            .store()
            .list_client_connections(client_id)
            .await?;
        Ok(self.aggregate(connections, query).await)
    }

    /// Metrics across every client the user owns
    #[tracing::instrument(skip(self, query), fields(user = %user_id))]
    pub async fn aggregate_user(
        &self,
        user_id: &UserId,
        query: &MetricsQuery,
    ) -> Result<AggregatedMetrics> {
        let connections = self.manager.store().list_user_connections(user_id).await?;
        Ok(self.aggregate(connections, query).await)
    }

    /// Settle one branch per live connection in scope. Never fails as a whole.
    pub async fn aggregate(
        &self,
        connections: Vec<Connection>,
        query: &MetricsQuery,
    ) -> AggregatedMetrics {
        let scope = query.platforms();
        let connections: Vec<Connection> = connections
            .into_iter()
            .filter(|c| c.status.is_live() && query.includes(c.platform))
            .collect();

        if connections.is_empty() {
            tracing::debug!("No connections in scope, returning zero-valued metrics");
            return AggregatedMetrics::empty(&scope);
        }

        let range = query.range.unwrap_or_else(|| self.default_range());
        let selector = query.selector();

        let settled = join_all(connections.iter().map(|connection| {
            self.settle_branch(connection.clone(), range, selector)
        }))
        .await;

        fold(&scope, connections.into_iter().zip(settled).collect())
    }

    async fn settle_branch(
        &self,
        connection: Connection,
        range: DateRange,
        selector: Option<&str>,
    ) -> Result<NormalizedMetrics> {
        let id = connection.id;
        let platform = connection.platform;

        let outcome = match tokio::time::timeout(
            self.adapter_timeout,
            self.fetch_branch(connection, range, selector),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(CoreError::transient(
                platform.as_str(),
                "fetch_metrics",
                format!("no answer within {:?}", self.adapter_timeout),
            )),
        };

        match &outcome {
            Ok(_) => {
                if let Err(e) = self.manager.mark_synced(&id).await {
                    log_contained!("recording sync time", e);
                }
            }
            Err(e) => {
                log_contained!(format!("{} fetch for connection {}", platform.as_str(), id), e);
                if e.is_auth_failure() {
                    if let Err(mark) = self.manager.mark_failed(&id, e).await {
                        log_contained!("recording connection failure", mark);
                    }
                }
            }
        }
        outcome
    }

    async fn fetch_branch(
        &self,
        connection: Connection,
        range: DateRange,
        selector: Option<&str>,
    ) -> Result<NormalizedMetrics> {
        let adapter = self.manager.adapters().get(connection.platform)?;
        let connection = self.manager.ensure_fresh(connection).await?;
        adapter
            .fetch_metrics(&connection.credential(), Some(range), selector)
            .await
    }

    /// Snapshot of a client's platforms and recent numbers
    pub async fn client_context(
        &self,
        user_id: &UserId,
        client_id: &ClientId,
    ) -> Result<ClientContext> {
        let client = self.manager.owned_client(user_id, client_id).await?;
        let query = MetricsQuery::default();
        let range = self.default_range();
        let metrics = self
            .aggregate_client(
                user_id,
                client_id,
                &MetricsQuery {
                    range: Some(range),
                    ..query
                },
            )
            .await?;

        Ok(ClientContext {
            client_id: client.id,
            client_name: client.name,
            website: client.website,
            range,
            connected_platforms: metrics.connected_platforms.clone(),
            missing_platforms: metrics.missing_platforms.clone(),
            metrics,
        })
    }

    pub(crate) fn activity_limit(&self) -> usize {
        self.activity_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::PlatformRegistry;
    use crate::store::Store;
    use crate::test_utils::{FakeAdapter, FakeTokenClient, seeded_store};
    use chrono::{Duration as ChronoDuration, Utc};
    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    async fn engine_with(
        store: Arc<dyn Store>,
        registry: PlatformRegistry,
    ) -> AggregationEngine {
        let manager = Arc::new(ConnectionManager::new(
            store,
            Arc::new(FakeTokenClient::new()),
            registry,
            7,
        ));
        AggregationEngine::new(manager, &AggregationConfig::default())
            .with_adapter_timeout(Duration::from_millis(200))
    }

    async fn add_connection(
        store: &Arc<dyn Store>,
        client: &crate::client::Client,
        platform: Platform,
    ) -> Connection {
        let connection = Connection::new(
            client.id,
            client.owner_id,
            platform,
            format!("{}-token", platform.as_str()),
            Some("refresh".to_string()),
            Utc::now() + ChronoDuration::days(30),
        );
        store.upsert_connection(&connection).await.unwrap();
        connection
    }

    #[tokio::test]
    #[traced_test]
    async fn test_failed_branch_is_excluded_from_sum() {
        let (store, user, client) = seeded_store().await;
        let registry = PlatformRegistry::new()
            .with_adapter(Arc::new(
                FakeAdapter::new(Platform::GoogleAnalytics)
                    .with_sessions(100)
                    .with_top_category("Organic Search"),
            ))
            .with_adapter(Arc::new(FakeAdapter::new(Platform::GoogleAds).with_totals(
                MetricTotals {
                    spend: 40.0,
                    clicks: 20,
                    impressions: 1000,
                    ..Default::default()
                },
            )))
            .with_adapter(Arc::new(
                FakeAdapter::new(Platform::MetaAds).failing_transient(),
            ));
        for platform in Platform::ALL {
            add_connection(&store, &client, platform).await;
        }
        let engine = engine_with(store, registry).await;

        let metrics = engine
            .aggregate_client(&user, &client.id, &MetricsQuery::default())
            .await
            .unwrap();

        assert_eq!(metrics.totals.sessions, 100);
        assert_eq!(metrics.totals.spend, 40.0);
        assert_eq!(metrics.totals.clicks, 20);
        assert_eq!(metrics.failed_platforms, vec![Platform::MetaAds]);
        assert_eq!(metrics.breakdown.len(), 3);
        assert_eq!(metrics.top_source.as_deref(), Some("Organic Search"));
        assert!(logs_contain("meta_ads fetch for connection"));
    }

    #[tokio::test]
    async fn test_timed_out_branch_is_contained() {
        let (store, user, client) = seeded_store().await;
        let slow = Arc::new(
            FakeAdapter::new(Platform::GoogleAds)
                .with_sessions(50)
                .with_delay(Duration::from_secs(5)),
        );
        let registry = PlatformRegistry::new()
            .with_adapter(Arc::new(
                FakeAdapter::new(Platform::GoogleAnalytics).with_sessions(100),
            ))
            .with_adapter(slow.clone());
        add_connection(&store, &client, Platform::GoogleAnalytics).await;
        let slow_connection = add_connection(&store, &client, Platform::GoogleAds).await;
        let engine = engine_with(store, registry).await;

        let metrics = engine
            .aggregate_client(&user, &client.id, &MetricsQuery::default())
            .await
            .unwrap();

        assert_eq!(metrics.totals.sessions, 100);
        assert_eq!(slow.fetches(), 1);
        let failed: Vec<_> = metrics.failed_connections().collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].connection_id, slow_connection.id);
        assert!(!failed[0].reconnect_required);
    }

    #[tokio::test]
    async fn test_auth_failure_marks_connection() {
        let (store, user, client) = seeded_store().await;
        let registry = PlatformRegistry::new()
            .with_adapter(Arc::new(FakeAdapter::new(Platform::MetaAds).failing_auth()));
        let connection = add_connection(&store, &client, Platform::MetaAds).await;
        let engine = engine_with(store.clone(), registry).await;

        let metrics = engine
            .aggregate_client(&user, &client.id, &MetricsQuery::default())
            .await
            .unwrap();

        assert!(metrics.breakdown[0].reconnect_required);
        let stored = store.get_connection(&connection.id).await.unwrap().unwrap();
        assert_eq!(stored.status, crate::connection::ConnectionStatus::Error);
    }

    #[tokio::test]
    async fn test_zero_connections_is_zero_valued() {
        let (store, user, client) = seeded_store().await;
        let engine = engine_with(store, PlatformRegistry::new()).await;

        let metrics = engine
            .aggregate_client(
                &user,
                &client.id,
                &MetricsQuery {
                    family: Some(PlatformFamily::Advertising),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(metrics.totals.is_zero());
        assert!(metrics.breakdown.is_empty());
        assert_eq!(
            metrics.missing_platforms,
            vec![Platform::GoogleAds, Platform::MetaAds]
        );
    }

    #[tokio::test]
    async fn test_family_filter_skips_other_platforms() {
        let (store, user, client) = seeded_store().await;
        let analytics = Arc::new(FakeAdapter::new(Platform::GoogleAnalytics).with_sessions(10));
        let registry = PlatformRegistry::new()
            .with_adapter(analytics.clone())
            .with_adapter(Arc::new(FakeAdapter::new(Platform::MetaAds)));
        add_connection(&store, &client, Platform::GoogleAnalytics).await;
        add_connection(&store, &client, Platform::MetaAds).await;
        let engine = engine_with(store, registry).await;

        let metrics = engine
            .aggregate_client(
                &user,
                &client.id,
                &MetricsQuery {
                    family: Some(PlatformFamily::Advertising),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(analytics.fetches(), 0);
        assert_eq!(metrics.breakdown.len(), 1);
        assert_eq!(metrics.breakdown[0].status, BranchStatus::NoData);
    }

    #[tokio::test]
    async fn test_foreign_client_is_rejected() {
        let (store, _user, client) = seeded_store().await;
        let engine = engine_with(store, PlatformRegistry::new()).await;
        let err = engine
            .aggregate_client(&UserId::generate(), &client.id, &MetricsQuery::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::PermissionDenied { .. }));
    }

    #[test]
    fn test_mode_prefers_most_frequent() {
        let labels = ["Direct", "Organic Search", "Direct", "Paid Social"];
        assert_eq!(mode(labels.into_iter()).as_deref(), Some("Direct"));
        assert_eq!(mode(["B", "A"].into_iter()).as_deref(), Some("A"));
        assert_eq!(mode(std::iter::empty()), None);
    }

    #[tokio::test]
    async fn test_client_context_names_missing_platforms() {
        let (store, user, client) = seeded_store().await;
        let registry = PlatformRegistry::new().with_adapter(Arc::new(
            FakeAdapter::new(Platform::GoogleAnalytics).with_sessions(321),
        ));
        add_connection(&store, &client, Platform::GoogleAnalytics).await;
        let engine = engine_with(store, registry).await;

        let context = engine.client_context(&user, &client.id).await.unwrap();
        assert_eq!(context.connected_platforms, vec![Platform::GoogleAnalytics]);

        let rendered = context.render();
        assert!(rendered.contains("Sessions: 321"));
        assert!(rendered.contains("Not connected: Google Ads, Meta Ads"));
    }
}
