use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::runtime::Handle;

use crate::errors::ApiError;
use crate::events::{EventSource, RtcEvent};

/// Feature every application is entitled to, even offline.
pub const FEATURE_VOICE: &str = "voice";
/// Feature gating video enablement, encoder configuration and RTMP.
pub const FEATURE_LIVE: &str = "live";

const RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Where the current feature set came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureSource {
    Default,
    Remote,
}

/// The features an application identity is entitled to.
///
/// Replaced wholesale on each resolution outcome, never patched field by
/// field, so readers always observe a consistent set.
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilitySet {
    features: BTreeSet<String>,
    source: FeatureSource,
    last_resolved_at: Option<DateTime<Utc>>,
}

impl CapabilitySet {
    /// Built from a successful remote resolution. `features` must be
    /// non-empty; the caller treats an empty list as a malformed response.
    pub fn remote(features: impl IntoIterator<Item = String>, resolved_at: DateTime<Utc>) -> Self {
        Self {
            features: features.into_iter().collect(),
            source: FeatureSource::Remote,
            last_resolved_at: Some(resolved_at),
        }
    }

    pub fn contains(&self, feature: &str) -> bool {
        self.features.contains(feature)
    }

    pub fn features(&self) -> Vec<String> {
        self.features.iter().cloned().collect()
    }

    pub fn source(&self) -> FeatureSource {
        self.source
    }

    pub fn last_resolved_at(&self) -> Option<DateTime<Utc>> {
        self.last_resolved_at
    }
}

impl Default for CapabilitySet {
    fn default() -> Self {
        Self {
            features: BTreeSet::from([FEATURE_VOICE.to_string()]),
            source: FeatureSource::Default,
            last_resolved_at: None,
        }
    }
}

/// Resolves and caches the entitled feature set for an application
/// identity, and answers `has_feature` without ever blocking.
///
/// Gating fails closed: until a remote resolution succeeds, and again
/// after any resolution failure, only the default set (voice) applies.
pub struct FeatureGate {
    http: reqwest::Client,
    cached: Arc<RwLock<Arc<CapabilitySet>>>,
    generation: Arc<AtomicU64>,
    auth_token: Arc<RwLock<Option<String>>>,
}

impl FeatureGate {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            cached: Arc::new(RwLock::new(Arc::new(CapabilitySet::default()))),
            generation: Arc::new(AtomicU64::new(0)),
            auth_token: Arc::new(RwLock::new(None)),
        }
    }

    /// Synchronous read of the cached set. Never waits for an in-flight
    /// resolution.
    pub fn has_feature(&self, feature: &str) -> bool {
        self.cached.read().unwrap().contains(feature)
    }

    /// Snapshot of the currently cached set.
    pub fn snapshot(&self) -> Arc<CapabilitySet> {
        self.cached.read().unwrap().clone()
    }

    pub fn set_auth_token(&self, token: Option<String>) {
        *self.auth_token.write().unwrap() = token;
    }

    /// Drop back to the default set without contacting the authority.
    pub fn reset_to_default(&self) {
        *self.cached.write().unwrap() = Arc::new(CapabilitySet::default());
    }

    /// Kick off a background resolution for `app_id` against
    /// `api_base_url`. Returns immediately; the outcome replaces the cache
    /// and is announced as [`RtcEvent::CapabilitySetUpdated`] through
    /// `events`. A resolution started later supersedes this one: the
    /// superseded outcome is discarded, not merged and not queued.
    pub fn resolve(&self, handle: &Handle, app_id: &str, api_base_url: &str, events: EventSource) {
        let generation = self.generation.clone();
        let ticket = generation.fetch_add(1, Ordering::SeqCst) + 1;

        let url = format!(
            "{}/api/rtc/feature/{}",
            api_base_url.trim_end_matches('/'),
            urlencoding::encode(app_id)
        );
        let http = self.http.clone();
        let cached = self.cached.clone();
        let app_id = app_id.to_string();
        let token = self.auth_token.read().unwrap().clone();

        handle.spawn(async move {
            let set = match fetch_features(&http, &url, &app_id, token.as_deref()).await {
                Ok(features) => CapabilitySet::remote(features, Utc::now()),
                Err(e) => {
                    tracing::warn!("feature resolution failed for {app_id}: {e}");
                    CapabilitySet::default()
                }
            };
            apply_outcome(&cached, &generation, ticket, set, &events);
        });
    }
}

/// Publish a resolution outcome unless a newer resolution has been
/// initiated since (last-writer-wins; superseded outcomes are dropped).
fn apply_outcome(
    cached: &RwLock<Arc<CapabilitySet>>,
    generation: &AtomicU64,
    ticket: u64,
    set: CapabilitySet,
    events: &EventSource,
) {
    {
        let mut slot = cached.write().unwrap();
        if generation.load(Ordering::SeqCst) != ticket {
            tracing::debug!("discarding superseded feature resolution");
            return;
        }
        *slot = Arc::new(set.clone());
    }

    tracing::info!("feature set resolved: {:?} ({:?})", set.features(), set.source());
    events.emit(RtcEvent::CapabilitySetUpdated { features: set.features() });
}

impl Default for FeatureGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
impl FeatureGate {
    /// Install a resolved set directly, standing in for a completed remote
    /// resolution.
    pub(crate) fn install(&self, set: CapabilitySet) {
        *self.cached.write().unwrap() = Arc::new(set);
    }
}

async fn fetch_features(
    http: &reqwest::Client,
    url: &str,
    app_id: &str,
    token: Option<&str>,
) -> Result<Vec<String>, ApiError> {
    let mut req = http.get(url).timeout(RESOLVE_TIMEOUT).header("X-App-Id", app_id);
    if let Some(token) = token {
        req = req.bearer_auth(token);
    }

    let resp = req.send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(ApiError::Http {
            status: status.as_u16(),
            body: resp.text().await.unwrap_or_default(),
        });
    }

    let body: Value = resp.json().await.map_err(|e| ApiError::Parse(e.to_string()))?;
    parse_feature_response(&body)
        .ok_or_else(|| ApiError::Parse("expected `code: 0` and `data.features: [string]`".into()))
}

/// `{code: 0, data: {features: ["voice", ...]}}` with a non-empty list; any
/// other shape is a failed resolution.
fn parse_feature_response(body: &Value) -> Option<Vec<String>> {
    if body.get("code")?.as_i64()? != 0 {
        return None;
    }
    let features = body.get("data")?.get("features")?.as_array()?;
    let features: Option<Vec<String>> =
        features.iter().map(|f| f.as_str().map(str::to_string)).collect();
    let features = features?;
    if features.is_empty() { None } else { Some(features) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_set_is_voice_only() {
        let set = CapabilitySet::default();
        assert!(set.contains(FEATURE_VOICE));
        assert!(!set.contains(FEATURE_LIVE));
        assert_eq!(set.source(), FeatureSource::Default);
        assert!(set.last_resolved_at().is_none());
    }

    #[test]
    fn remote_set_replaces_wholesale() {
        let set = CapabilitySet::remote(vec!["live".to_string()], Utc::now());
        assert!(set.contains("live"));
        // Remote resolutions may legitimately omit voice.
        assert!(!set.contains(FEATURE_VOICE));
        assert_eq!(set.source(), FeatureSource::Remote);
        assert!(set.last_resolved_at().is_some());
    }

    #[test]
    fn parse_accepts_well_formed_response() {
        let body = json!({"code": 0, "data": {"features": ["voice", "live"]}});
        assert_eq!(
            parse_feature_response(&body),
            Some(vec!["voice".to_string(), "live".to_string()])
        );
    }

    #[test]
    fn parse_rejects_failures() {
        for body in [
            json!({"code": 1, "data": {"features": ["voice"]}}),
            json!({"data": {"features": ["voice"]}}),
            json!({"code": 0}),
            json!({"code": 0, "data": {}}),
            json!({"code": 0, "data": {"features": "voice"}}),
            json!({"code": 0, "data": {"features": [1, 2]}}),
            json!({"code": 0, "data": {"features": []}}),
            json!("nonsense"),
        ] {
            assert_eq!(parse_feature_response(&body), None, "should reject {body}");
        }
    }

    #[test]
    fn has_feature_answers_from_cache() {
        let gate = FeatureGate::new();
        assert!(gate.has_feature(FEATURE_VOICE));
        assert!(!gate.has_feature(FEATURE_LIVE));

        *gate.cached.write().unwrap() =
            Arc::new(CapabilitySet::remote(vec!["voice".into(), "live".into()], Utc::now()));
        assert!(gate.has_feature(FEATURE_LIVE));

        gate.reset_to_default();
        assert!(!gate.has_feature(FEATURE_LIVE));
        assert_eq!(gate.snapshot().source(), FeatureSource::Default);
    }

    #[tokio::test]
    async fn failed_resolution_resets_to_default_and_emits() {
        use crate::events::{EventRouter, EventSink};
        use std::sync::Mutex;

        struct Capture(Mutex<Vec<Vec<String>>>);
        impl EventSink for Capture {
            fn on_event(&self, event: RtcEvent) {
                if let RtcEvent::CapabilitySetUpdated { features } = event {
                    self.0.lock().unwrap().push(features);
                }
            }
        }

        let router = EventRouter::new();
        let sink = Arc::new(Capture(Mutex::new(Vec::new())));
        router.register_sink(sink.clone());
        router.start(&Handle::current());

        let gate = FeatureGate::new();
        // Seed a remote set so the failure visibly resets it.
        *gate.cached.write().unwrap() =
            Arc::new(CapabilitySet::remote(vec!["voice".into(), "live".into()], Utc::now()));

        // Unroutable base URL: the fetch fails fast, which is the outcome
        // under test (network failure resets to default).
        gate.resolve(&Handle::current(), "app1", "http://127.0.0.1:1", router.source("features"));

        for _ in 0..500 {
            if !gate.has_feature(FEATURE_LIVE) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(!gate.has_feature(FEATURE_LIVE));
        assert!(gate.has_feature(FEATURE_VOICE));

        for _ in 0..500 {
            if !sink.0.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(sink.0.lock().unwrap().as_slice(), &[vec!["voice".to_string()]]);
    }

    #[tokio::test]
    async fn superseded_outcome_is_discarded() {
        let router = crate::events::EventRouter::new();
        let gate = FeatureGate::new();

        // Two resolutions in flight: the slow one completes after the
        // newer one already published its outcome.
        let stale_gen = gate.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let current_gen = gate.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let winning = CapabilitySet::remote(vec!["voice".into(), "live".into()], Utc::now());
        let source = router.source("features");
        apply_outcome(&gate.cached, &gate.generation, current_gen, winning.clone(), &source);
        apply_outcome(&gate.cached, &gate.generation, stale_gen, CapabilitySet::default(), &source);

        assert_eq!(*gate.snapshot(), winning);
    }
}
