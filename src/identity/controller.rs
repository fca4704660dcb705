//! Identity pool and proxy rotation.

use chrono::Utc;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::error::Result;

use super::traits::{IpEcho, ProxyController, SystemProxy};
use super::types::{
    user_data_dir_for, Identity, ProxyEndpoint, RotationEntry, RotationMethod, RotationStats,
};

/// First fingerprint id handed out.
const INITIAL_PROFILE_ID: u64 = 1000;

/// Rotation policy knobs.
#[derive(Debug, Clone)]
pub struct RotationConfig {
    /// Upper bound on per-strategy switch attempts.
    pub max_attempts: u32,
    /// Settle time after a switch before observing the egress IP.
    pub settle: Duration,
    /// Budget for each strategy.
    pub strategy_timeout: Duration,
    /// Rotate anyway when the identity is older than this.
    pub staleness: Duration,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            settle: Duration::from_secs(3),
            strategy_timeout: Duration::from_secs(10),
            staleness: Duration::from_secs(30 * 60),
        }
    }
}

struct RotationState {
    candidates: Vec<ProxyEndpoint>,
    next_candidate: usize,
    history: Vec<RotationEntry>,
    switch_count: u64,
}

/// Owns the current (profile, proxy) identity.
///
/// Reads (`current`, counter updates) go through a plain `RwLock` and
/// never wait on rotation; `rotate_proxy` runs behind an async mutex so
/// only one rotation executes at a time, with concurrent callers queued.
pub struct IdentityController {
    identity: RwLock<Identity>,
    rotation: Mutex<RotationState>,
    controller: Option<Arc<dyn ProxyController>>,
    system_proxy: Option<Arc<dyn SystemProxy>>,
    echo: Arc<dyn IpEcho>,
    config: RotationConfig,
}

impl IdentityController {
    pub fn new(echo: Arc<dyn IpEcho>) -> Self {
        Self {
            identity: RwLock::new(Identity::new(INITIAL_PROFILE_ID)),
            rotation: Mutex::new(RotationState {
                candidates: Vec::new(),
                next_candidate: 0,
                history: Vec::new(),
                switch_count: 0,
            }),
            controller: None,
            system_proxy: None,
            echo,
            config: RotationConfig::default(),
        }
    }

    pub fn with_proxy_controller(mut self, controller: Arc<dyn ProxyController>) -> Self {
        self.controller = Some(controller);
        self
    }

    pub fn with_system_proxy(mut self, system_proxy: Arc<dyn SystemProxy>) -> Self {
        self.system_proxy = Some(system_proxy);
        self
    }

    pub fn with_candidates(self, candidates: Vec<ProxyEndpoint>) -> Self {
        {
            let mut state = self
                .rotation
                .try_lock()
                .expect("no rotation can run during construction");
            state.candidates = candidates;
        }
        self
    }

    pub fn with_config(mut self, config: RotationConfig) -> Self {
        self.config = config;
        self
    }

    /// Snapshot of the current identity. Lock-free with respect to
    /// rotation; may observe a rotation in progress.
    pub fn current(&self) -> Identity {
        self.identity.read().expect("identity lock").clone()
    }

    /// Count one clean detection against the current profile and clear
    /// its verification-failure streak.
    pub fn record_detection_success(&self) {
        let mut identity = self.identity.write().expect("identity lock");
        identity.detections_used_today += 1;
        identity.verification_failures = 0;
    }

    /// Count one verification failure; returns the new streak length.
    pub fn record_verification_failure(&self) -> u32 {
        let mut identity = self.identity.write().expect("identity lock");
        identity.verification_failures += 1;
        identity.verification_failures
    }

    /// Allocate a fresh fingerprint profile: previous id + 1, a new
    /// user-data directory, zeroed counters.
    pub fn rotate_profile(&self) -> Identity {
        let mut identity = self.identity.write().expect("identity lock");
        let old_id = identity.profile_id;
        identity.profile_id += 1;
        identity.user_data_dir = user_data_dir_for(identity.profile_id);
        identity.detections_used_today = 0;
        identity.verification_failures = 0;
        identity.last_switched_at = Utc::now();

        info!(
            from = old_id,
            to = identity.profile_id,
            dir = %identity.user_data_dir,
            "rotated fingerprint profile"
        );
        identity.clone()
    }

    /// Whether the caller should rotate before the next submission.
    pub fn should_rotate(&self, failure_count: u32) -> bool {
        if failure_count >= 2 {
            return true;
        }
        let last = self
            .identity
            .read()
            .expect("identity lock")
            .last_switched_at;
        let age = Utc::now().signed_duration_since(last);
        age.num_seconds() >= self.config.staleness.as_secs() as i64
    }

    /// Rotate the egress IP using the configured attempt bound.
    pub async fn rotate_proxy(&self) -> Result<bool> {
        self.rotate_proxy_with(self.config.max_attempts).await
    }

    /// Rotate the egress IP. Strategies run in order until the observed
    /// IP actually changes: controller-API switch, system-proxy cycle,
    /// candidate enumeration. Returns false when none changed the IP;
    /// `last_switched_at` is refreshed either way.
    pub async fn rotate_proxy_with(&self, max_attempts: u32) -> Result<bool> {
        // Serialise rotations; concurrent callers queue here
        let mut state = self.rotation.lock().await;

        let initial_ip = self.echo.current_ip().await;
        info!(initial_ip = ?initial_ip, "starting proxy rotation");

        let outcome = match timeout(
            self.config.strategy_timeout,
            self.rotate_via_controller(initial_ip.as_deref(), max_attempts),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                warn!("controller-API rotation timed out");
                None
            }
        };

        let outcome = match outcome {
            Some(entry) => Some(entry),
            None => match timeout(
                self.config.strategy_timeout,
                self.rotate_via_system_proxy(initial_ip.as_deref(), &mut state),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => {
                    warn!("system-proxy rotation timed out");
                    None
                }
            },
        };

        let outcome = match outcome {
            Some(entry) => Some(entry),
            None => match timeout(
                self.config.strategy_timeout,
                self.rotate_via_candidates(initial_ip.as_deref(), &mut state, max_attempts),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => {
                    warn!("candidate-list rotation timed out");
                    None
                }
            },
        };

        state.switch_count += 1;
        {
            let mut identity = self.identity.write().expect("identity lock");
            identity.last_switched_at = Utc::now();
            if outcome.is_some() {
                identity.verification_failures = 0;
            }
        }

        match outcome {
            Some(entry) => {
                info!(
                    method = %entry.method,
                    from = ?initial_ip,
                    to = ?entry.observed_ip,
                    "proxy rotation changed egress IP"
                );
                state.history.push(entry);
                Ok(true)
            }
            None => {
                warn!("no rotation strategy changed the egress IP");
                state.history.push(RotationEntry {
                    at: Utc::now(),
                    method: RotationMethod::Initial,
                    proxy: self.current().current_proxy.map(|p| p.name),
                    observed_ip: initial_ip,
                    ip_changed: false,
                });
                Ok(false)
            }
        }
    }

    async fn rotate_via_controller(
        &self,
        initial_ip: Option<&str>,
        max_attempts: u32,
    ) -> Option<RotationEntry> {
        let controller = self.controller.as_ref()?;

        for attempt in 1..=max_attempts {
            debug!(attempt, "controller-API switch");
            if let Err(e) = controller.switch_node().await {
                warn!(error = %e, "controller switch-node failed");
                return None;
            }
            sleep(self.config.settle).await;

            let observed = self.echo.current_ip().await;
            if ip_changed(initial_ip, observed.as_deref()) {
                return Some(RotationEntry {
                    at: Utc::now(),
                    method: RotationMethod::ControllerApi,
                    proxy: self.current().current_proxy.map(|p| p.name),
                    observed_ip: observed,
                    ip_changed: true,
                });
            }
        }
        None
    }

    async fn rotate_via_system_proxy(
        &self,
        initial_ip: Option<&str>,
        state: &mut RotationState,
    ) -> Option<RotationEntry> {
        let system_proxy = self.system_proxy.as_ref()?;
        let candidate = next_candidate(state)?;

        debug!(candidate = %candidate.name, "system-proxy cycle");
        if let Err(e) = system_proxy.disable().await {
            warn!(error = %e, "disabling system proxy failed");
            return None;
        }
        sleep(self.config.settle).await;
        let direct_ip = self.echo.current_ip().await;
        debug!(direct_ip = ?direct_ip, "direct egress observed");

        if let Err(e) = system_proxy.enable(&candidate).await {
            warn!(error = %e, "re-enabling system proxy failed");
            return None;
        }
        sleep(self.config.settle).await;

        let observed = self.echo.current_ip().await;
        if ip_changed(initial_ip, observed.as_deref()) {
            self.set_current_proxy(candidate.clone());
            return Some(RotationEntry {
                at: Utc::now(),
                method: RotationMethod::SystemProxyCycle,
                proxy: Some(candidate.name),
                observed_ip: observed,
                ip_changed: true,
            });
        }
        None
    }

    async fn rotate_via_candidates(
        &self,
        initial_ip: Option<&str>,
        state: &mut RotationState,
        max_attempts: u32,
    ) -> Option<RotationEntry> {
        for _ in 0..max_attempts.min(state.candidates.len() as u32) {
            let candidate = next_candidate(state)?;
            debug!(candidate = %candidate.name, "trying proxy candidate");
            self.set_current_proxy(candidate.clone());
            sleep(self.config.settle).await;

            let observed = self.echo.current_ip().await;
            if ip_changed(initial_ip, observed.as_deref()) {
                return Some(RotationEntry {
                    at: Utc::now(),
                    method: RotationMethod::CandidateList,
                    proxy: Some(candidate.name),
                    observed_ip: observed,
                    ip_changed: true,
                });
            }
        }
        None
    }

    fn set_current_proxy(&self, endpoint: ProxyEndpoint) {
        let mut identity = self.identity.write().expect("identity lock");
        identity.current_proxy = Some(endpoint);
    }

    /// Most recent rotation observations, newest last.
    pub async fn recent_history(&self, limit: usize) -> Vec<RotationEntry> {
        let state = self.rotation.lock().await;
        let start = state.history.len().saturating_sub(limit);
        state.history[start..].to_vec()
    }

    /// Aggregate rotation statistics.
    pub async fn stats(&self) -> RotationStats {
        let state = self.rotation.lock().await;
        let unique: std::collections::HashSet<_> = state
            .history
            .iter()
            .filter_map(|e| e.observed_ip.as_deref())
            .collect();
        RotationStats {
            total_switches: state.switch_count,
            unique_ips: unique.len(),
            history_len: state.history.len(),
            last_switch_at: state.history.last().map(|e| e.at),
        }
    }
}

fn next_candidate(state: &mut RotationState) -> Option<ProxyEndpoint> {
    if state.candidates.is_empty() {
        return None;
    }
    let candidate = state.candidates[state.next_candidate % state.candidates.len()].clone();
    state.next_candidate += 1;
    Some(candidate)
}

fn ip_changed(initial: Option<&str>, observed: Option<&str>) -> bool {
    match (initial, observed) {
        (Some(a), Some(b)) => a != b,
        // An unobserved IP never counts as changed
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedEcho {
        ips: std::sync::Mutex<VecDeque<Option<String>>>,
        last: std::sync::Mutex<Option<String>>,
    }

    impl ScriptedEcho {
        fn new(ips: Vec<Option<&str>>) -> Arc<Self> {
            Arc::new(Self {
                ips: std::sync::Mutex::new(
                    ips.into_iter().map(|s| s.map(String::from)).collect(),
                ),
                last: std::sync::Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl IpEcho for ScriptedEcho {
        async fn current_ip(&self) -> Option<String> {
            let mut ips = self.ips.lock().unwrap();
            let mut last = self.last.lock().unwrap();
            if let Some(ip) = ips.pop_front() {
                *last = ip.clone();
                ip
            } else {
                last.clone()
            }
        }
    }

    struct CountingController {
        switches: AtomicU32,
    }

    #[async_trait]
    impl ProxyController for CountingController {
        async fn switch_node(&self) -> Result<()> {
            self.switches.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn list_candidates(&self) -> Result<Vec<ProxyEndpoint>> {
            Ok(vec![])
        }
    }

    fn fast_config() -> RotationConfig {
        RotationConfig {
            max_attempts: 3,
            settle: Duration::from_millis(0),
            strategy_timeout: Duration::from_secs(2),
            staleness: Duration::from_secs(30 * 60),
        }
    }

    #[test]
    fn test_rotate_profile_allocates_next_id() {
        let controller = IdentityController::new(ScriptedEcho::new(vec![]));
        let first = controller.current();
        assert_eq!(first.profile_id, 1000);
        assert_eq!(first.user_data_dir, "profile_1000");

        controller.record_detection_success();
        controller.record_verification_failure();

        let rotated = controller.rotate_profile();
        assert_eq!(rotated.profile_id, 1001);
        assert_eq!(rotated.user_data_dir, "profile_1001");
        assert_eq!(rotated.detections_used_today, 0);
        assert_eq!(rotated.verification_failures, 0);
    }

    #[test]
    fn test_should_rotate_on_failures() {
        let controller = IdentityController::new(ScriptedEcho::new(vec![]));
        assert!(!controller.should_rotate(0));
        assert!(!controller.should_rotate(1));
        assert!(controller.should_rotate(2));
        assert!(controller.should_rotate(5));
    }

    #[test]
    fn test_should_rotate_on_staleness() {
        let controller = IdentityController::new(ScriptedEcho::new(vec![])).with_config(
            RotationConfig {
                staleness: Duration::from_secs(0),
                ..fast_config()
            },
        );
        assert!(controller.should_rotate(0));
    }

    #[tokio::test]
    async fn test_controller_api_rotation_succeeds() {
        let clash = Arc::new(CountingController {
            switches: AtomicU32::new(0),
        });
        // initial observation, then post-switch observation
        let echo = ScriptedEcho::new(vec![Some("1.1.1.1"), Some("2.2.2.2")]);
        let controller = IdentityController::new(echo)
            .with_proxy_controller(clash.clone())
            .with_config(fast_config());

        assert!(controller.rotate_proxy().await.unwrap());
        assert_eq!(clash.switches.load(Ordering::SeqCst), 1);

        let stats = controller.stats().await;
        assert_eq!(stats.total_switches, 1);
        assert_eq!(stats.unique_ips, 1);

        let history = controller.recent_history(10).await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].method, RotationMethod::ControllerApi);
        assert!(history[0].ip_changed);
    }

    #[tokio::test]
    async fn test_null_observation_is_not_a_change() {
        let clash = Arc::new(CountingController {
            switches: AtomicU32::new(0),
        });
        // Observation fails after every switch
        let echo = ScriptedEcho::new(vec![Some("1.1.1.1"), None, None, None]);
        let controller = IdentityController::new(echo)
            .with_proxy_controller(clash)
            .with_config(fast_config());

        assert!(!controller.rotate_proxy().await.unwrap());
    }

    #[tokio::test]
    async fn test_falls_back_to_candidate_list() {
        // initial, three controller observations (unchanged), then the
        // candidate observation with a new IP
        let echo = ScriptedEcho::new(vec![
            Some("1.1.1.1"),
            Some("1.1.1.1"),
            Some("1.1.1.1"),
            Some("1.1.1.1"),
            Some("9.9.9.9"),
        ]);
        let clash = Arc::new(CountingController {
            switches: AtomicU32::new(0),
        });
        let controller = IdentityController::new(echo)
            .with_proxy_controller(clash)
            .with_candidates(vec![
                ProxyEndpoint::new("jp-1", "http://127.0.0.1:7891"),
                ProxyEndpoint::new("sg-1", "http://127.0.0.1:7892"),
            ])
            .with_config(fast_config());

        assert!(controller.rotate_proxy().await.unwrap());

        let history = controller.recent_history(10).await;
        assert_eq!(history.last().unwrap().method, RotationMethod::CandidateList);
        assert_eq!(
            controller.current().current_proxy.unwrap().name,
            "jp-1".to_string()
        );
    }

    #[tokio::test]
    async fn test_failed_rotation_still_updates_switch_time() {
        let echo = ScriptedEcho::new(vec![Some("1.1.1.1")]);
        let controller = IdentityController::new(echo).with_config(fast_config());
        let before = controller.current().last_switched_at;

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(!controller.rotate_proxy().await.unwrap());

        assert!(controller.current().last_switched_at > before);
        let stats = controller.stats().await;
        assert_eq!(stats.total_switches, 1);
    }

    #[tokio::test]
    async fn test_successful_rotation_resets_failures() {
        let echo = ScriptedEcho::new(vec![Some("1.1.1.1"), Some("2.2.2.2")]);
        let clash = Arc::new(CountingController {
            switches: AtomicU32::new(0),
        });
        let controller = IdentityController::new(echo)
            .with_proxy_controller(clash)
            .with_config(fast_config());

        controller.record_verification_failure();
        controller.record_verification_failure();
        assert_eq!(controller.current().verification_failures, 2);

        controller.rotate_proxy().await.unwrap();
        assert_eq!(controller.current().verification_failures, 0);
    }

    #[test]
    fn test_ip_changed() {
        assert!(ip_changed(Some("a"), Some("b")));
        assert!(!ip_changed(Some("a"), Some("a")));
        assert!(!ip_changed(Some("a"), None));
        assert!(!ip_changed(None, Some("b")));
        assert!(!ip_changed(None, None));
    }
}
