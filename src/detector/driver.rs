//! Detector driver: submits text through a controlled browser session
//! and reads back the AI probability, rotating identity on quota and
//! verification walls.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::identity::IdentityController;

use super::browser::{Browser, BrowserSession, Locator};
use super::signals::{parse_ai_probability, scan_signals, PageSignal};

/// Driver configuration. Phrase lists are configuration because the
/// recognised wording is vendor- and locale-specific.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Detector page URL.
    pub url: String,
    /// Name recorded on detection results.
    pub platform: String,
    /// Acceptance threshold in percent.
    pub threshold: f64,
    /// Submission attempts inside one `detect` call.
    pub max_retries: u32,
    /// Inputs shorter than this are rejected outright.
    pub min_length: usize,
    /// Short inputs are repeated until at least this long.
    pub pad_target: usize,
    /// Inputs are truncated to this length before submission.
    pub max_length: usize,
    /// Wait before the first result poll.
    pub warmup: Duration,
    pub poll_interval: Duration,
    /// Polling budget after the warm-up.
    pub max_wait: Duration,
    pub browser_startup_wait: Duration,
    pub page_load_wait: Duration,
    pub quota_phrases: Vec<String>,
    pub verification_phrases: Vec<String>,
    /// Page-chrome phrases whose percentages are never results.
    pub chrome_exclusions: Vec<String>,
    /// Submit-control labels tried first, in order.
    pub submit_labels: Vec<String>,
    /// CSS selectors tried when no label matches.
    pub submit_selectors: Vec<String>,
    /// Last-resort scripts fired blind.
    pub js_fallbacks: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            platform: "zhuque".to_string(),
            threshold: 25.0,
            max_retries: 3,
            min_length: 10,
            pad_target: 350,
            max_length: 2000,
            warmup: Duration::from_secs(5),
            poll_interval: Duration::from_secs(1),
            max_wait: Duration::from_secs(15),
            browser_startup_wait: Duration::from_secs(1),
            page_load_wait: Duration::from_secs(3),
            quota_phrases: strings(&[
                "今日次数已用完",
                "今日检测次数已达上限",
                "daily limit exceeded",
                "检测次数已用完",
                "次数用完",
            ]),
            verification_phrases: strings(&[
                "验证码失败",
                "验证失败",
                "verification failed",
                "captcha failed",
                "请重新验证",
                "验证码错误",
                "人机验证失败",
            ]),
            chrome_exclusions: strings(&[
                "accuracy rate",
                "准确率",
                "social media",
                "fake aigc",
                "platforms",
                "news and image",
                "98%+",
                "detection assistant",
            ]),
            submit_labels: strings(&["立即检测", "检测", "开始检测", "提交", "开始", "分析", "识别"]),
            submit_selectors: strings(&[
                "button[type=\"submit\"]",
                ".detect-button",
                ".submit-button",
                ".btn-primary",
                ".btn-submit",
                ".btn-detect",
            ]),
            js_fallbacks: strings(&[
                "document.querySelector('button[type=\"submit\"]')?.click()",
                "document.querySelector('.el-button--primary')?.click()",
                "document.querySelector('[class*=\"detect\"]')?.click()",
                "document.querySelector('[class*=\"submit\"]')?.click()",
            ]),
        }
    }
}

impl DetectorConfig {
    /// Derive threshold and timing fields from the shared configuration
    /// surface.
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            threshold: config.ai_detection.threshold,
            max_wait: Duration::from_secs(config.performance.ai_detection_timeout.into()),
            browser_startup_wait: Duration::from_secs_f64(config.performance.browser_startup_wait),
            page_load_wait: Duration::from_secs_f64(config.performance.page_load_wait),
            ..Self::default()
        }
    }
}

/// How a detection concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionStatus {
    Success,
    /// No readable result appeared in time; probability defaulted to 50
    PartialSuccess,
    /// The retry envelope was exhausted; probability pinned to 100
    Error,
}

/// Outcome of one `detect` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub ai_probability: f64,
    pub passed: bool,
    pub status: DetectionStatus,
    /// Line of page text the probability was read from.
    pub raw_text: Option<String>,
    pub profile_id: u64,
    pub proxy: Option<String>,
    pub attempts: u32,
    pub error: Option<String>,
}

impl Detection {
    /// Diagnostic blob stored on the detection record.
    pub fn diagnostic(&self) -> serde_json::Value {
        json!({
            "profile_id": self.profile_id,
            "proxy": self.proxy,
            "attempts": self.attempts,
            "status": self.status,
            "raw_text": self.raw_text,
            "error": self.error,
        })
    }
}

/// Detector interface used by the detect-optimise loop.
#[async_trait]
pub trait AiDetector: Send + Sync {
    async fn detect(&self, text: &str) -> Result<Detection>;

    /// Name recorded on detection results.
    fn platform(&self) -> &str;
}

enum SubmitOutcome {
    Measured { probability: f64, raw: String },
    NoResult,
}

/// Drives the external detector's web UI through a [`Browser`].
pub struct WebDetector {
    browser: Arc<dyn Browser>,
    identities: Arc<IdentityController>,
    config: DetectorConfig,
    /// One submission per identity at a time; concurrent callers queue.
    submission: tokio::sync::Mutex<()>,
}

impl WebDetector {
    pub fn new(
        browser: Arc<dyn Browser>,
        identities: Arc<IdentityController>,
        config: DetectorConfig,
    ) -> Self {
        Self {
            browser,
            identities,
            config,
            submission: tokio::sync::Mutex::new(()),
        }
    }

    /// Repeat short inputs to the pad target, cap everything at the max
    /// length. Lengths are in characters; inputs are mostly CJK.
    fn prepare_text(&self, text: &str) -> String {
        let length = text.chars().count();
        let padded = if length < self.config.pad_target {
            let repeats = self.config.pad_target / length + 1;
            let mut out = String::with_capacity((length + 1) * repeats);
            for _ in 0..repeats {
                out.push_str(text);
                out.push(' ');
            }
            out
        } else {
            text.to_string()
        };

        padded.chars().take(self.config.max_length).collect()
    }

    async fn submit_once(&self, text: &str) -> Result<SubmitOutcome> {
        let _guard = self.submission.lock().await;
        let identity = self.identities.current();
        debug!(
            profile_id = identity.profile_id,
            proxy = ?identity.current_proxy.as_ref().map(|p| &p.name),
            "opening detector session"
        );

        let mut session = self.browser.open(&identity).await?;
        let outcome = self
            .drive(session.as_mut(), identity.profile_id, text)
            .await;
        // The session is disposed on every path; only the identity
        // record survives between calls.
        session.close().await;
        outcome
    }

    async fn drive(
        &self,
        session: &mut dyn BrowserSession,
        profile_id: u64,
        text: &str,
    ) -> Result<SubmitOutcome> {
        sleep(self.config.browser_startup_wait).await;
        session.navigate(&self.config.url).await?;
        sleep(self.config.page_load_wait).await;

        let filled = session.fill(&Locator::tag("textarea"), text).await?
            || session.fill(&Locator::css("textarea"), text).await?;
        if !filled {
            return Err(Error::transport("text input region not found"));
        }

        self.activate_submit(session).await?;

        // Give the detector time to start before polling for a result
        sleep(self.config.warmup).await;
        let mut waited = Duration::ZERO;
        let mut page = session.body_text().await?;
        while !page.contains('%') && waited < self.config.max_wait {
            sleep(self.config.poll_interval).await;
            waited += self.config.poll_interval;
            page = session.body_text().await?;
        }

        match scan_signals(
            &page,
            &self.config.quota_phrases,
            &self.config.verification_phrases,
        ) {
            Some(PageSignal::QuotaExhausted) => {
                return Err(Error::QuotaExceeded { profile_id });
            }
            Some(PageSignal::VerificationFailure) => {
                let failures = self.identities.record_verification_failure();
                return Err(Error::VerificationFailed { failures });
            }
            None => {}
        }

        match parse_ai_probability(&page, &self.config.chrome_exclusions) {
            Some((probability, raw)) => Ok(SubmitOutcome::Measured { probability, raw }),
            None => Ok(SubmitOutcome::NoResult),
        }
    }

    async fn activate_submit(&self, session: &mut dyn BrowserSession) -> Result<()> {
        for label in &self.config.submit_labels {
            if session.click(&Locator::text(label)).await? {
                debug!(label = %label, "submit control found by label");
                return Ok(());
            }
        }
        for selector in &self.config.submit_selectors {
            if session.click(&Locator::css(selector)).await? {
                debug!(selector = %selector, "submit control found by selector");
                return Ok(());
            }
        }

        warn!("no submit control matched, firing script fallbacks");
        for script in &self.config.js_fallbacks {
            session.run_js(script).await?;
        }
        Ok(())
    }

    fn detection_shell(&self, attempts: u32) -> Detection {
        let identity = self.identities.current();
        Detection {
            ai_probability: 0.0,
            passed: false,
            status: DetectionStatus::Success,
            raw_text: None,
            profile_id: identity.profile_id,
            proxy: identity.current_proxy.map(|p| p.name),
            attempts,
            error: None,
        }
    }
}

#[async_trait]
impl AiDetector for WebDetector {
    #[instrument(skip(self, text), fields(chars = text.chars().count()))]
    async fn detect(&self, text: &str) -> Result<Detection> {
        if text.chars().count() < self.config.min_length {
            return Err(Error::validation(format!(
                "detection input must be at least {} characters",
                self.config.min_length
            )));
        }

        let prepared = self.prepare_text(text);
        let mut last_error: Option<Error> = None;

        for attempt in 1..=self.config.max_retries {
            match self.submit_once(&prepared).await {
                Ok(SubmitOutcome::Measured { probability, raw }) => {
                    self.identities.record_detection_success();
                    info!(probability, attempt, "detector returned a result");
                    return Ok(Detection {
                        ai_probability: probability,
                        passed: probability < self.config.threshold,
                        status: DetectionStatus::Success,
                        raw_text: Some(raw),
                        ..self.detection_shell(attempt)
                    });
                }
                Ok(SubmitOutcome::NoResult) => {
                    warn!(attempt, "no readable result, treating as partial success");
                    return Ok(Detection {
                        ai_probability: 50.0,
                        passed: 50.0 < self.config.threshold,
                        status: DetectionStatus::PartialSuccess,
                        ..self.detection_shell(attempt)
                    });
                }
                Err(e @ Error::QuotaExceeded { .. }) => {
                    warn!(attempt, error = %e, "daily quota wall, rotating profile");
                    self.identities.rotate_profile();
                    last_error = Some(e);
                }
                Err(Error::VerificationFailed { failures }) => {
                    warn!(attempt, failures, "verification wall");
                    if failures >= 2 {
                        match self.identities.rotate_proxy().await {
                            Ok(changed) => {
                                info!(changed, "proxy rotation after verification wall")
                            }
                            Err(rotate_err) => {
                                warn!(error = %rotate_err, "proxy rotation failed")
                            }
                        }
                    }
                    last_error = Some(Error::VerificationFailed { failures });
                }
                Err(e) => {
                    // Plain transport trouble: same identity, try again
                    warn!(attempt, error = %e, "detector submission failed");
                    last_error = Some(e);
                }
            }
        }

        let error = last_error.map(|e| e.reason());
        warn!(error = ?error, "detection retry envelope exhausted");
        Ok(Detection {
            ai_probability: 100.0,
            passed: false,
            status: DetectionStatus::Error,
            error,
            ..self.detection_shell(self.config.max_retries)
        })
    }

    fn platform(&self) -> &str {
        &self.config.platform
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{Identity, IdentityController, IpEcho, RotationConfig};
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct NullEcho;

    #[async_trait]
    impl IpEcho for NullEcho {
        async fn current_ip(&self) -> Option<String> {
            None
        }
    }

    /// Scripted page for one session open.
    #[derive(Clone)]
    struct PageScript {
        page_text: String,
        has_textarea: bool,
        submit_label: Option<String>,
    }

    impl PageScript {
        fn result(page_text: &str) -> Self {
            Self {
                page_text: page_text.to_string(),
                has_textarea: true,
                submit_label: Some("立即检测".to_string()),
            }
        }
    }

    #[derive(Default)]
    struct BrowserState {
        scripts: Mutex<VecDeque<PageScript>>,
        opened: AtomicU32,
        last_filled: Mutex<Option<String>>,
        closed: AtomicU32,
    }

    struct ScriptedBrowser {
        state: Arc<BrowserState>,
    }

    impl ScriptedBrowser {
        fn with_scripts(scripts: Vec<PageScript>) -> (Arc<Self>, Arc<BrowserState>) {
            let state = Arc::new(BrowserState {
                scripts: Mutex::new(scripts.into()),
                ..BrowserState::default()
            });
            (
                Arc::new(Self {
                    state: state.clone(),
                }),
                state,
            )
        }
    }

    #[async_trait]
    impl Browser for ScriptedBrowser {
        async fn open(&self, _identity: &Identity) -> Result<Box<dyn BrowserSession>> {
            self.state.opened.fetch_add(1, Ordering::SeqCst);
            let script = self
                .state
                .scripts
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| Error::transport("browser exhausted"))?;
            Ok(Box::new(ScriptedSession {
                script,
                state: self.state.clone(),
            }))
        }
    }

    struct ScriptedSession {
        script: PageScript,
        state: Arc<BrowserState>,
    }

    #[async_trait]
    impl BrowserSession for ScriptedSession {
        async fn navigate(&mut self, _url: &str) -> Result<()> {
            Ok(())
        }

        async fn fill(&mut self, locator: &Locator, text: &str) -> Result<bool> {
            if matches!(locator, Locator::Tag(t) if t == "textarea") && self.script.has_textarea {
                *self.state.last_filled.lock().unwrap() = Some(text.to_string());
                return Ok(true);
            }
            Ok(false)
        }

        async fn click(&mut self, locator: &Locator) -> Result<bool> {
            match (locator, &self.script.submit_label) {
                (Locator::Text(label), Some(expected)) => Ok(label == expected),
                _ => Ok(false),
            }
        }

        async fn run_js(&mut self, _script: &str) -> Result<()> {
            Ok(())
        }

        async fn body_text(&mut self) -> Result<String> {
            Ok(self.script.page_text.clone())
        }

        async fn close(&mut self) {
            self.state.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn fast_config() -> DetectorConfig {
        DetectorConfig {
            url: "https://detector.example/ai".to_string(),
            warmup: Duration::from_millis(0),
            poll_interval: Duration::from_millis(1),
            max_wait: Duration::from_millis(5),
            browser_startup_wait: Duration::from_millis(0),
            page_load_wait: Duration::from_millis(0),
            ..DetectorConfig::default()
        }
    }

    fn identities() -> Arc<IdentityController> {
        Arc::new(
            IdentityController::new(Arc::new(NullEcho)).with_config(RotationConfig {
                settle: Duration::from_millis(0),
                strategy_timeout: Duration::from_millis(50),
                ..RotationConfig::default()
            }),
        )
    }

    fn detector(
        scripts: Vec<PageScript>,
    ) -> (WebDetector, Arc<BrowserState>, Arc<IdentityController>) {
        let (browser, state) = ScriptedBrowser::with_scripts(scripts);
        let identities = identities();
        (
            WebDetector::new(browser, identities.clone(), fast_config()),
            state,
            identities,
        )
    }

    fn long_text(chars: usize) -> String {
        "这是一段用来测试的中文内容。".chars().cycle().take(chars).collect()
    }

    #[tokio::test]
    async fn test_short_input_rejected_without_session() {
        let (detector, state, _) = detector(vec![]);
        let err = detector.detect("一二三四五六七八九").await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(state.opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_short_text_padded_by_repetition() {
        let (detector, state, _) = detector(vec![PageScript::result("AI浓度 18%")]);
        let input = long_text(200);
        detector.detect(&input).await.unwrap();

        let filled = state.last_filled.lock().unwrap().clone().unwrap();
        let chars = filled.chars().count();
        assert!((350..=2000).contains(&chars), "padded to {chars}");
        assert!(filled.starts_with(&input));
    }

    #[tokio::test]
    async fn test_long_text_truncated() {
        let (detector, state, _) = detector(vec![PageScript::result("AI浓度 18%")]);
        detector.detect(&long_text(10_000)).await.unwrap();

        let filled = state.last_filled.lock().unwrap().clone().unwrap();
        assert_eq!(filled.chars().count(), 2000);
    }

    #[tokio::test]
    async fn test_successful_detection() {
        let (detector, state, identities) = detector(vec![PageScript::result("AI浓度 18.5%")]);
        let detection = detector.detect(&long_text(400)).await.unwrap();

        assert_eq!(detection.ai_probability, 18.5);
        assert!(detection.passed);
        assert_eq!(detection.status, DetectionStatus::Success);
        assert_eq!(detection.attempts, 1);
        assert_eq!(identities.current().detections_used_today, 1);
        assert_eq!(state.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_result_is_partial_success() {
        let (detector, _, _) = detector(vec![PageScript::result("检测进行中")]);
        let detection = detector.detect(&long_text(400)).await.unwrap();

        assert_eq!(detection.ai_probability, 50.0);
        assert!(!detection.passed);
        assert_eq!(detection.status, DetectionStatus::PartialSuccess);
    }

    #[tokio::test]
    async fn test_quota_wall_rotates_profile_and_retries() {
        let (detector, state, identities) = detector(vec![
            PageScript::result("抱歉，今日次数已用完 100%"),
            PageScript::result("AI浓度 20%"),
        ]);
        let before = identities.current().profile_id;

        let detection = detector.detect(&long_text(400)).await.unwrap();
        assert_eq!(detection.ai_probability, 20.0);
        assert_eq!(detection.attempts, 2);
        assert_eq!(detection.profile_id, before + 1);
        assert_eq!(state.opened.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_verification_wall_retries_and_resets_on_success() {
        let (detector, _, identities) = detector(vec![
            PageScript::result("人机验证失败 0%"),
            PageScript::result("人机验证失败 0%"),
            PageScript::result("AI浓度 20%"),
        ]);

        let detection = detector.detect(&long_text(400)).await.unwrap();
        assert_eq!(detection.ai_probability, 20.0);
        assert_eq!(detection.attempts, 3);
        assert_eq!(identities.current().verification_failures, 0);
    }

    #[tokio::test]
    async fn test_envelope_exhaustion_pins_probability() {
        let (detector, state, _) = detector(vec![
            PageScript::result("今日次数已用完 100%"),
            PageScript::result("今日次数已用完 100%"),
            PageScript::result("今日次数已用完 100%"),
        ]);

        let detection = detector.detect(&long_text(400)).await.unwrap();
        assert_eq!(detection.ai_probability, 100.0);
        assert!(!detection.passed);
        assert_eq!(detection.status, DetectionStatus::Error);
        assert_eq!(detection.attempts, 3);
        assert!(detection.error.unwrap().contains("quota"));
        // Every opened session was disposed
        assert_eq!(
            state.opened.load(Ordering::SeqCst),
            state.closed.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn test_transport_failure_keeps_identity() {
        let (detector, _, identities) = detector(vec![
            PageScript {
                page_text: "无结果".into(),
                has_textarea: false,
                submit_label: None,
            },
            PageScript::result("AI浓度 30%"),
        ]);
        let before = identities.current().profile_id;

        let detection = detector.detect(&long_text(400)).await.unwrap();
        assert_eq!(detection.ai_probability, 30.0);
        assert_eq!(identities.current().profile_id, before);
    }

    #[test]
    fn test_prepare_text_boundaries() {
        let identities = identities();
        let (browser, _) = ScriptedBrowser::with_scripts(vec![]);
        let detector = WebDetector::new(browser, identities, fast_config());

        let padded = detector.prepare_text(&long_text(200));
        assert!(padded.chars().count() >= 350);

        let capped = detector.prepare_text(&long_text(10_000));
        assert_eq!(capped.chars().count(), 2000);

        let untouched = detector.prepare_text(&long_text(400));
        assert_eq!(untouched.chars().count(), 400);
    }

    proptest::proptest! {
        #[test]
        fn prop_prepared_length_in_bounds(len in 10usize..6000) {
            let identities = std::sync::Arc::new(IdentityController::new(
                std::sync::Arc::new(NullEcho),
            ));
            let (browser, _) = ScriptedBrowser::with_scripts(vec![]);
            let detector = WebDetector::new(browser, identities, fast_config());

            let text: String = "测试".chars().cycle().take(len).collect();
            let prepared = detector.prepare_text(&text);
            let chars = prepared.chars().count();
            proptest::prop_assert!(chars <= 2000);
            if len < 350 {
                proptest::prop_assert!(chars >= 350);
            }
        }
    }
}

