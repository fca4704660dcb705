//! The detect-optimise loop.
//!
//! Bounded iteration of rewrite-then-detect. A candidate that fails
//! detection never replaces previously accepted content; the loop keeps
//! improving its most recent draft until the detector accepts it or the
//! attempt budget runs out.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, instrument, warn};

use crate::config::AppConfig;
use crate::detector::{AiDetector, DetectionStatus};
use crate::error::{Error, Result};
use crate::llm::{CompletionRequest, LlmClient};
use crate::model::{Article, ArticlePatch, ArticleStatus};
use crate::prompts::{OptimizationRequest, PromptCatalog};
use crate::store::{NewDetection, Store};

use super::cancel::CancelToken;

/// Loop bounds.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub max_attempts: u32,
    /// Acceptance threshold in percent; a measurement strictly below
    /// passes.
    pub threshold: f64,
    pub retry_delay: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            threshold: 25.0,
            retry_delay: Duration::from_secs(2),
        }
    }
}

impl LoopConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            max_attempts: config.ai_optimization.max_attempts,
            threshold: config.ai_detection.threshold,
            retry_delay: Duration::from_secs(config.ai_optimization.retry_delay_seconds.into()),
        }
    }
}

/// Which content slot an accepted candidate is committed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitSlot {
    /// URL-import path
    Optimized,
    /// Topic-creation path
    Original,
}

/// Which prompt family drives the rewrites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    /// First-time optimisation of fresh content
    Optimization,
    /// Re-entry after previously accepted content re-detected above
    /// threshold; targets detector-surface features
    AiReduction,
}

/// Successful loop result.
#[derive(Debug, Clone, Copy)]
pub struct LoopOutcome {
    pub ai_probability: f64,
    pub attempts_used: u32,
}

/// Runs the shared optimise→detect iteration for both pipeline paths.
pub struct DetectOptimizeLoop {
    store: Store,
    catalog: PromptCatalog,
    llm: Arc<dyn LlmClient>,
    detector: Arc<dyn AiDetector>,
    config: LoopConfig,
}

impl DetectOptimizeLoop {
    pub fn new(
        store: Store,
        catalog: PromptCatalog,
        llm: Arc<dyn LlmClient>,
        detector: Arc<dyn AiDetector>,
        config: LoopConfig,
    ) -> Self {
        Self {
            store,
            catalog,
            llm,
            detector,
            config,
        }
    }

    /// Run the loop for an article. On pass the candidate is committed
    /// to `slot` together with the measured probability; on exhaustion
    /// the persisted slot is left exactly as it was and
    /// [`Error::DetectionNotPassed`] is returned.
    #[instrument(skip(self, article, cancel), fields(article_id = article.id, kind = ?kind))]
    pub async fn run(
        &self,
        article: &Article,
        slot: CommitSlot,
        kind: LoopKind,
        cancel: &CancelToken,
    ) -> Result<LoopOutcome> {
        let input = article.best_content();
        if input.is_empty() {
            return Err(Error::validation("no content available for optimization"));
        }

        let content_type = self.catalog.classify(&article.title, input);
        info!(
            content_type = %content_type,
            threshold = self.config.threshold,
            max_attempts = self.config.max_attempts,
            "starting detect-optimise loop"
        );

        let mut candidate = input.to_string();
        let mut last_measured: Option<f64> = None;

        for attempt in 1..=self.config.max_attempts {
            cancel.check()?;
            self.set_status(article.id, ArticleStatus::Optimizing)?;

            // First attempt assumes the standard band; later attempts
            // use the latest measurement, pessimistic when none exists.
            let assumed = if attempt == 1 {
                50.0
            } else {
                last_measured.unwrap_or(75.0)
            };

            let prompt = match kind {
                LoopKind::Optimization => {
                    let mut request = OptimizationRequest::new(&candidate, assumed, attempt);
                    request.title = &article.title;
                    request.content_type = Some(content_type);
                    request.prompt_id = article.selected_prompt_id;
                    request.target_length = article.target_length;
                    let feedback = last_measured.map(|p| {
                        format!(
                            "当前AI概率为{}%，需要降低到{}%以下",
                            format_pct(p),
                            format_pct(self.config.threshold)
                        )
                    });
                    request.detection_feedback = feedback.as_deref().unwrap_or("");
                    self.catalog.optimization(&request)?
                }
                LoopKind::AiReduction => {
                    self.catalog.ai_reduction(&candidate, &article.title, attempt)?
                }
            };

            info!(attempt, assumed, "rewriting candidate");
            // One transient transport error per attempt is retried in
            // place; any other LLM failure is fatal for the whole loop,
            // there is nothing sensible to detect.
            let request = CompletionRequest::new(prompt.text.clone());
            let completion = match self.llm.complete(request.clone()).await {
                Ok(completion) => completion,
                Err(e @ Error::Transport { .. }) => {
                    warn!(attempt, error = %e, "transient LLM transport error, retrying once");
                    self.llm.complete(request).await?
                }
                Err(e) => return Err(e),
            };
            candidate = completion.text;

            cancel.check()?;
            self.set_status(article.id, ArticleStatus::Detecting)?;

            let detection = match self.detector.detect(&candidate).await {
                Ok(detection) => detection,
                Err(e) => {
                    warn!(attempt, error = %e, "detector rejected the submission");
                    if let Some(id) = prompt.template_id {
                        self.store.record_template_usage(id, false)?;
                    }
                    self.delay_if_more_attempts(attempt).await;
                    continue;
                }
            };

            self.store.append_detection(&NewDetection {
                article_id: article.id,
                detection_type: "ai_probability".to_string(),
                platform: self.detector.platform().to_string(),
                score: detection.ai_probability,
                threshold: self.config.threshold,
                is_passed: detection.ai_probability < self.config.threshold,
                diagnostic: detection.diagnostic(),
            })?;

            if detection.status == DetectionStatus::Success {
                last_measured = Some(detection.ai_probability);
            }

            let passed = detection.ai_probability < self.config.threshold;
            if let Some(id) = prompt.template_id {
                self.store.record_template_usage(id, passed)?;
            }

            if passed {
                info!(
                    attempt,
                    ai_probability = detection.ai_probability,
                    "loop passed, committing candidate"
                );
                let mut patch = ArticlePatch {
                    ai_probability: Some(detection.ai_probability),
                    ..ArticlePatch::default()
                };
                match slot {
                    CommitSlot::Optimized => patch.content_optimized = Some(candidate),
                    CommitSlot::Original => patch.content_original = Some(candidate),
                }
                self.store.update_article(article.id, &patch)?;

                return Ok(LoopOutcome {
                    ai_probability: detection.ai_probability,
                    attempts_used: attempt,
                });
            }

            warn!(
                attempt,
                ai_probability = detection.ai_probability,
                threshold = self.config.threshold,
                "candidate rejected"
            );
            // The rejected candidate stays as the next attempt's input:
            // each round improves the most recent draft.
            self.delay_if_more_attempts(attempt).await;
        }

        let probability = last_measured.unwrap_or(100.0);
        // Keep the audited score without touching the accepted content
        if last_measured.is_some() {
            self.store.update_article(
                article.id,
                &ArticlePatch {
                    ai_probability: Some(probability),
                    ..ArticlePatch::default()
                },
            )?;
        }

        Err(Error::DetectionNotPassed {
            probability,
            threshold: self.config.threshold,
        })
    }

    fn set_status(&self, article_id: i64, status: ArticleStatus) -> Result<()> {
        self.store
            .update_article(article_id, &ArticlePatch::status(status))?;
        Ok(())
    }

    async fn delay_if_more_attempts(&self, attempt: u32) {
        if attempt < self.config.max_attempts && !self.config.retry_delay.is_zero() {
            sleep(self.config.retry_delay).await;
        }
    }
}

fn format_pct(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}
