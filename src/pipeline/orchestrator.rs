//! Pipeline orchestrator: stage sequencing, status machine, background
//! execution, progress reporting, cancellation.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::detector::AiDetector;
use crate::error::{Error, Result};
use crate::llm::{CompletionRequest, LlmClient};
use crate::model::{Article, ArticlePatch, ArticleStatus, TaskStatus};
use crate::prompts::PromptCatalog;
use crate::publish::Publisher;
use crate::scrape::Scraper;
use crate::store::Store;

use super::cancel::CancelToken;
use super::detect_optimize::{CommitSlot, DetectOptimizeLoop, LoopConfig, LoopKind};
use super::steps::Step;

/// Advisory scheduling priority. Runs are not reordered; the value is
/// recorded for operators reading the logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// Options for one processing run.
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    /// Explicit step list; derived from the creation type when absent.
    pub steps: Option<Vec<Step>>,
    pub auto_publish: bool,
    pub priority: Priority,
}

/// Outcome of a batch fan-out.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub batch_id: String,
    pub items: Vec<BatchItem>,
}

#[derive(Debug, Clone)]
pub struct BatchItem {
    pub article_id: i64,
    pub task_id: Option<String>,
    pub error: Option<String>,
}

struct Inner {
    store: Store,
    catalog: PromptCatalog,
    llm: Arc<dyn LlmClient>,
    detector: Arc<dyn AiDetector>,
    scraper: Arc<dyn Scraper>,
    publisher: Option<Arc<dyn Publisher>>,
    loop_config: LoopConfig,
    stage_timeout: Duration,
    article_timeout: Duration,
    cancels: Mutex<HashMap<String, CancelToken>>,
}

/// Builder wiring the orchestrator's collaborators. There are no
/// singletons; tests substitute doubles by construction.
pub struct OrchestratorBuilder {
    store: Store,
    catalog: Option<PromptCatalog>,
    llm: Option<Arc<dyn LlmClient>>,
    detector: Option<Arc<dyn AiDetector>>,
    scraper: Option<Arc<dyn Scraper>>,
    publisher: Option<Arc<dyn Publisher>>,
    loop_config: LoopConfig,
    stage_timeout: Duration,
    article_timeout: Duration,
}

impl OrchestratorBuilder {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            catalog: None,
            llm: None,
            detector: None,
            scraper: None,
            publisher: None,
            loop_config: LoopConfig::default(),
            stage_timeout: Duration::from_secs(10 * 60),
            article_timeout: Duration::from_secs(2 * 60 * 60),
        }
    }

    pub fn llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn detector(mut self, detector: Arc<dyn AiDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn scraper(mut self, scraper: Arc<dyn Scraper>) -> Self {
        self.scraper = Some(scraper);
        self
    }

    pub fn publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn catalog(mut self, catalog: PromptCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Take loop bounds from the shared configuration surface.
    pub fn app_config(mut self, config: &AppConfig) -> Self {
        self.loop_config = LoopConfig::from_app_config(config);
        self
    }

    pub fn loop_config(mut self, config: LoopConfig) -> Self {
        self.loop_config = config;
        self
    }

    pub fn stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = timeout;
        self
    }

    pub fn article_timeout(mut self, timeout: Duration) -> Self {
        self.article_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<Orchestrator> {
        let catalog = self
            .catalog
            .unwrap_or_else(|| PromptCatalog::new(self.store.clone()));
        Ok(Orchestrator {
            inner: Arc::new(Inner {
                catalog,
                llm: self
                    .llm
                    .ok_or_else(|| Error::Config("orchestrator requires an LLM client".into()))?,
                detector: self.detector.ok_or_else(|| {
                    Error::Config("orchestrator requires a detector".into())
                })?,
                scraper: self.scraper.ok_or_else(|| {
                    Error::Config("orchestrator requires a scraper".into())
                })?,
                publisher: self.publisher,
                loop_config: self.loop_config,
                stage_timeout: self.stage_timeout,
                article_timeout: self.article_timeout,
                cancels: Mutex::new(HashMap::new()),
                store: self.store,
            }),
        })
    }
}

/// Drives articles through their step sequence in background tasks.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn builder(store: Store) -> OrchestratorBuilder {
        OrchestratorBuilder::new(store)
    }

    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    /// Start processing an article. Creates a pending task, schedules
    /// the run in the background, and returns the task id immediately.
    #[instrument(skip(self, options))]
    pub fn process(&self, article_id: i64, options: ProcessOptions) -> Result<String> {
        let article = self.inner.store.get_article(article_id)?;

        let steps = match options.steps {
            Some(steps) if !steps.is_empty() => {
                let mut steps = steps;
                if options.auto_publish && !steps.contains(&Step::Publish) {
                    steps.push(Step::Publish);
                }
                steps
            }
            _ => Step::derive(article.creation_type, options.auto_publish),
        };

        let task_id = format!("process_{}_{}", article_id, Uuid::new_v4().simple());
        self.inner
            .store
            .create_task(&task_id, article_id, "article_processing")?;

        let cancel = CancelToken::new();
        self.inner
            .cancels
            .lock()
            .expect("cancel registry lock")
            .insert(task_id.clone(), cancel.clone());

        info!(
            article_id,
            task_id = %task_id,
            steps = ?steps.iter().map(Step::as_str).collect::<Vec<_>>(),
            priority = ?options.priority,
            "scheduling article processing"
        );

        let inner = self.inner.clone();
        let spawned_task_id = task_id.clone();
        tokio::spawn(async move {
            Self::run_pipeline(inner, article_id, spawned_task_id, steps, cancel).await;
        });

        Ok(task_id)
    }

    /// Fan a processing run out over many articles. No ordering or
    /// cross-article coordination; each article gets its own task.
    pub fn process_many(&self, article_ids: &[i64], options: &ProcessOptions) -> BatchOutcome {
        let batch_id = format!("batch_{}", Uuid::new_v4().simple());
        let items = article_ids
            .iter()
            .map(|&article_id| match self.process(article_id, options.clone()) {
                Ok(task_id) => BatchItem {
                    article_id,
                    task_id: Some(task_id),
                    error: None,
                },
                Err(e) => BatchItem {
                    article_id,
                    task_id: None,
                    error: Some(e.reason()),
                },
            })
            .collect();

        BatchOutcome { batch_id, items }
    }

    /// Request cooperative cancellation of a running task. The runner
    /// observes the flag at its next checkpoint.
    pub fn cancel(&self, task_id: &str) -> Result<()> {
        let cancels = self.inner.cancels.lock().expect("cancel registry lock");
        match cancels.get(task_id) {
            Some(token) => {
                token.cancel();
                Ok(())
            }
            None => Err(Error::not_found("task", task_id)),
        }
    }

    async fn run_pipeline(
        inner: Arc<Inner>,
        article_id: i64,
        task_id: String,
        steps: Vec<Step>,
        cancel: CancelToken,
    ) {
        if let Err(e) = inner.store.set_task_status(&task_id, TaskStatus::Running, None) {
            error!(task_id = %task_id, error = %e, "failed to mark task running");
            return;
        }
        if let Ok(article) = inner.store.get_article(article_id) {
            let _ = inner.store.update_article(
                article_id,
                &ArticlePatch {
                    processing_attempts: Some(article.processing_attempts + 1),
                    ..ArticlePatch::default()
                },
            );
        }

        let outcome = match timeout(
            inner.article_timeout,
            Self::execute_steps(&inner, article_id, &task_id, &steps, &cancel),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::timeout(inner.article_timeout.as_millis() as u64)),
        };

        match outcome {
            Ok(()) => {
                let _ = inner.store.set_task_progress(&task_id, 100.0);
                let _ = inner
                    .store
                    .set_task_status(&task_id, TaskStatus::Completed, None);
                let _ = inner
                    .store
                    .update_article(article_id, &ArticlePatch::status(ArticleStatus::Ready));
                info!(task_id = %task_id, article_id, "pipeline completed");
            }
            Err(Error::Cancelled) => {
                // The article keeps the status of its last completed stage
                let _ = inner
                    .store
                    .set_task_status(&task_id, TaskStatus::Cancelled, None);
                info!(task_id = %task_id, article_id, "pipeline cancelled");
            }
            Err(e) => {
                let reason = e.reason();
                error!(task_id = %task_id, article_id, error = %reason, "pipeline failed");
                let _ = inner
                    .store
                    .set_task_status(&task_id, TaskStatus::Failed, Some(&reason));
                let _ = inner.store.update_article(
                    article_id,
                    &ArticlePatch {
                        status: Some(ArticleStatus::Failed),
                        last_error: Some(reason),
                        ..ArticlePatch::default()
                    },
                );
            }
        }

        inner
            .cancels
            .lock()
            .expect("cancel registry lock")
            .remove(&task_id);
    }

    async fn execute_steps(
        inner: &Arc<Inner>,
        article_id: i64,
        task_id: &str,
        steps: &[Step],
        cancel: &CancelToken,
    ) -> Result<()> {
        let total = steps.len() as f64;

        for (index, step) in steps.iter().enumerate() {
            cancel.check()?;

            info!(task_id = %task_id, step = %step, "starting step");
            inner.store.set_task_step(task_id, step.as_str())?;
            inner
                .store
                .update_article(article_id, &ArticlePatch::status(step.status()))?;

            match timeout(
                inner.stage_timeout,
                Self::run_step(inner, article_id, *step, cancel),
            )
            .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e),
                Err(_) => return Err(Error::timeout(inner.stage_timeout.as_millis() as u64)),
            }

            let progress = ((index + 1) as f64 / total) * 100.0;
            inner.store.set_task_progress(task_id, progress)?;
            info!(task_id = %task_id, step = %step, progress, "step completed");
        }

        Ok(())
    }

    async fn run_step(
        inner: &Arc<Inner>,
        article_id: i64,
        step: Step,
        cancel: &CancelToken,
    ) -> Result<()> {
        let article = inner.store.get_article(article_id)?;

        match step {
            Step::Extract => Self::run_extract(inner, &article).await,
            Step::Translate => Self::run_translate(inner, &article).await,
            Step::Optimize => Self::run_optimize(inner, &article, cancel).await,
            Step::Create => Self::run_create(inner, &article, cancel).await,
            Step::Publish => Self::run_publish(inner, &article).await,
        }
    }

    async fn run_extract(inner: &Arc<Inner>, article: &Article) -> Result<()> {
        let url = article
            .source_url()
            .ok_or_else(|| Error::validation("article has no source URL to extract"))?;

        let extracted = inner.scraper.extract(url).await?;
        if extracted.content.is_empty() {
            return Err(Error::validation("scraper returned empty content"));
        }

        let mut patch = ArticlePatch {
            content_original: Some(extracted.content),
            word_count: Some(extracted.word_count),
            estimated_reading_time: Some(extracted.reading_time),
            ..ArticlePatch::default()
        };
        if article.title.is_empty() && !extracted.title.is_empty() {
            patch.title = Some(extracted.title);
        }
        if !extracted.tags.is_empty() {
            patch.tags = Some(extracted.tags);
        }
        inner.store.update_article(article.id, &patch)?;
        Ok(())
    }

    async fn run_translate(inner: &Arc<Inner>, article: &Article) -> Result<()> {
        if article.content_original.is_empty() {
            return Err(Error::validation("no original content to translate"));
        }

        let prompt = inner
            .catalog
            .translation(&article.content_original, &article.title)?;
        let completion = inner
            .llm
            .complete(CompletionRequest::new(prompt.text))
            .await?;
        if let Some(id) = prompt.template_id {
            inner.store.record_template_usage(id, true)?;
        }

        inner.store.update_article(
            article.id,
            &ArticlePatch {
                content_translated: Some(completion.text),
                ..ArticlePatch::default()
            },
        )?;
        Ok(())
    }

    async fn run_optimize(
        inner: &Arc<Inner>,
        article: &Article,
        cancel: &CancelToken,
    ) -> Result<()> {
        // Re-entry on content that had already been accepted and then
        // re-detected above threshold targets detector-surface features
        // instead of surface polish.
        let kind = if !article.content_optimized.is_empty()
            && article
                .ai_probability
                .is_some_and(|p| p >= inner.loop_config.threshold)
        {
            LoopKind::AiReduction
        } else {
            LoopKind::Optimization
        };

        Self::detect_loop(inner)
            .run(article, CommitSlot::Optimized, kind, cancel)
            .await?;
        Ok(())
    }

    async fn run_create(
        inner: &Arc<Inner>,
        article: &Article,
        cancel: &CancelToken,
    ) -> Result<()> {
        if article.topic.is_empty() {
            return Err(Error::validation("topic-creation article has no topic"));
        }

        let prompt = inner.catalog.creation(
            &article.topic,
            &article.keywords,
            &article.creation_requirements,
            article.target_length,
            article.selected_prompt_id,
        )?;
        let completion = inner
            .llm
            .complete(CompletionRequest::new(prompt.text))
            .await?;
        if let Some(id) = prompt.template_id {
            inner.store.record_template_usage(id, true)?;
        }

        inner.store.update_article(
            article.id,
            &ArticlePatch {
                content_original: Some(completion.text),
                ..ArticlePatch::default()
            },
        )?;

        // The freshly created draft goes straight into the loop; its
        // accepted rewrite replaces the draft in the original slot.
        let article = inner.store.get_article(article.id)?;
        Self::detect_loop(inner)
            .run(&article, CommitSlot::Original, LoopKind::Optimization, cancel)
            .await?;
        Ok(())
    }

    async fn run_publish(inner: &Arc<Inner>, article: &Article) -> Result<()> {
        let publisher = inner
            .publisher
            .as_ref()
            .ok_or_else(|| Error::validation("no publisher configured"))?;

        let best = article.best_content();
        if best.is_empty() {
            return Err(Error::validation("no content available to publish"));
        }

        let article = if article.content_final.is_empty() {
            inner.store.update_article(
                article.id,
                &ArticlePatch {
                    content_final: Some(best.to_string()),
                    ..ArticlePatch::default()
                },
            )?
        } else {
            article.clone()
        };

        publisher.publish(&article).await?;
        inner.store.update_article(
            article.id,
            &ArticlePatch {
                published_at: Some(Utc::now()),
                ..ArticlePatch::default()
            },
        )?;
        Ok(())
    }

    fn detect_loop(inner: &Arc<Inner>) -> DetectOptimizeLoop {
        DetectOptimizeLoop::new(
            inner.store.clone(),
            inner.catalog.clone(),
            inner.llm.clone(),
            inner.detector.clone(),
            inner.loop_config.clone(),
        )
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("stage_timeout", &self.inner.stage_timeout)
            .field("article_timeout", &self.inner.article_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::model::{ArticleDraft, CreationType, TargetLength, Task};
    use crate::pipeline::detect_optimize::tests::{ScriptedDetector, ScriptedLlm};
    use crate::scrape::ExtractedArticle;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct MockScraper {
        content: String,
    }

    #[async_trait]
    impl Scraper for MockScraper {
        async fn extract(&self, _url: &str) -> Result<ExtractedArticle> {
            Ok(ExtractedArticle {
                title: "Extracted Title".to_string(),
                content: self.content.clone(),
                author: Some("author".to_string()),
                publish_date: None,
                tags: vec!["tech".to_string()],
                word_count: 1000,
                reading_time: 5,
            })
        }
    }

    struct MockPublisher {
        published: AtomicU32,
    }

    #[async_trait]
    impl Publisher for MockPublisher {
        async fn publish(&self, _article: &Article) -> Result<()> {
            self.published.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn orchestrator(
        store: &Store,
        llm: Arc<ScriptedLlm>,
        detector: Arc<ScriptedDetector>,
        max_attempts: u32,
    ) -> Orchestrator {
        Orchestrator::builder(store.clone())
            .llm(llm)
            .detector(detector)
            .scraper(Arc::new(MockScraper {
                content: "An original English article about distributed systems.".to_string(),
            }))
            .publisher(Arc::new(MockPublisher {
                published: AtomicU32::new(0),
            }))
            .loop_config(LoopConfig {
                max_attempts,
                threshold: 25.0,
                retry_delay: Duration::from_millis(0),
            })
            .build()
            .unwrap()
    }

    async fn wait_terminal(store: &Store, task_id: &str) -> Task {
        for _ in 0..5000 {
            let task = store.get_task(task_id).unwrap();
            if task.status.is_terminal() {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("task {task_id} never reached a terminal state");
    }

    #[tokio::test]
    async fn test_topic_creation_first_try_pass() {
        let store = Store::in_memory().unwrap();
        let mut draft = ArticleDraft::from_topic("分布式一致性算法", Utc::now());
        draft.target_length = Some(TargetLength::Mini);
        let article_id = store.create_article(&draft).unwrap();

        let essay: String = "分布式一致性是工程里绕不开的问题。".chars().cycle().take(400).collect();
        let llm = ScriptedLlm::texts(&[essay.as_str(), "贴近人味的重写稿"]);
        let detector = ScriptedDetector::values(&[18.0]);
        let orchestrator = orchestrator(&store, llm.clone(), detector.clone(), 5);

        let task_id = orchestrator
            .process(article_id, ProcessOptions::default())
            .unwrap();
        let task = wait_terminal(&store, &task_id).await;

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.progress, 100.0);

        let article = store.get_article(article_id).unwrap();
        assert_eq!(article.status, ArticleStatus::Ready);
        assert_eq!(article.content_original, "贴近人味的重写稿");
        assert_eq!(article.ai_probability, Some(18.0));
        assert_eq!(store.detections_for(article_id).unwrap().len(), 1);
        // Creation + one loop rewrite
        assert_eq!(llm.calls.load(Ordering::SeqCst), 2);
        assert_eq!(detector.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_url_import_passes_on_third_attempt() {
        let store = Store::in_memory().unwrap();
        let article_id = store
            .create_article(&ArticleDraft::from_url("https://example.com/a", "medium"))
            .unwrap();

        let llm = ScriptedLlm::texts(&["中文翻译稿", "优化一稿", "优化二稿", "优化三稿"]);
        let detector = ScriptedDetector::values(&[70.0, 40.0, 22.0]);
        let orchestrator = orchestrator(&store, llm.clone(), detector.clone(), 5);

        let task_id = orchestrator
            .process(article_id, ProcessOptions::default())
            .unwrap();
        let task = wait_terminal(&store, &task_id).await;

        assert_eq!(task.status, TaskStatus::Completed);
        let article = store.get_article(article_id).unwrap();
        assert_eq!(article.status, ArticleStatus::Ready);
        assert_eq!(article.title, "Extracted Title");
        assert_eq!(article.content_translated, "中文翻译稿");
        assert_eq!(article.content_optimized, "优化三稿");
        assert_eq!(article.ai_probability, Some(22.0));
        // translate + 3 optimisation rewrites
        assert_eq!(llm.calls.load(Ordering::SeqCst), 4);
        assert_eq!(detector.calls.load(Ordering::SeqCst), 3);
        assert_eq!(store.detections_for(article_id).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_loop_exhaustion_fails_article() {
        let store = Store::in_memory().unwrap();
        let article_id = store
            .create_article(&ArticleDraft::from_url("https://example.com/a", "medium"))
            .unwrap();

        let llm = ScriptedLlm::texts(&["中文翻译稿", "草稿一", "草稿二"]);
        let detector = ScriptedDetector::values(&[60.0, 60.0]);
        let orchestrator = orchestrator(&store, llm, detector, 2);

        let task_id = orchestrator
            .process(article_id, ProcessOptions::default())
            .unwrap();
        let task = wait_terminal(&store, &task_id).await;

        assert_eq!(task.status, TaskStatus::Failed);
        let article = store.get_article(article_id).unwrap();
        assert_eq!(article.status, ArticleStatus::Failed);
        assert!(article
            .last_error
            .as_deref()
            .unwrap()
            .contains("AI probability 60% above threshold 25%"));
        // Nothing was ever accepted into the optimized slot
        assert_eq!(article.content_optimized, "");
    }

    #[tokio::test]
    async fn test_cancellation_mid_loop() {
        let store = Store::in_memory().unwrap();
        let article_id = store
            .create_article(&ArticleDraft::from_url("https://example.com/a", "medium"))
            .unwrap();

        // Calls: 1 translate, 2 first rewrite, 3 second rewrite. The
        // third call cancels the task, so attempt 2 stops before its
        // detection.
        let scripted = ScriptedLlm::texts(&["中文翻译稿", "草稿一", "草稿二"]);
        let cancel_registry: Arc<std::sync::OnceLock<(Orchestrator, String)>> =
            Arc::new(std::sync::OnceLock::new());

        struct CancelOnNthCall {
            inner: Arc<ScriptedLlm>,
            on_call: u32,
            target: Arc<std::sync::OnceLock<(Orchestrator, String)>>,
        }

        #[async_trait]
        impl LlmClient for CancelOnNthCall {
            async fn complete(
                &self,
                request: CompletionRequest,
            ) -> Result<crate::llm::CompletionResponse> {
                let response = self.inner.complete(request).await?;
                if self.inner.calls.load(Ordering::SeqCst) == self.on_call {
                    let (orchestrator, task_id) =
                        self.target.get().expect("target registered before run");
                    orchestrator.cancel(task_id).unwrap();
                }
                Ok(response)
            }
        }

        let llm = Arc::new(CancelOnNthCall {
            inner: scripted,
            on_call: 3,
            target: cancel_registry.clone(),
        });
        let detector = ScriptedDetector::values(&[60.0]);
        let orchestrator = Orchestrator::builder(store.clone())
            .llm(llm)
            .detector(detector.clone())
            .scraper(Arc::new(MockScraper {
                content: "original English".to_string(),
            }))
            .loop_config(LoopConfig {
                max_attempts: 5,
                threshold: 25.0,
                retry_delay: Duration::from_millis(0),
            })
            .build()
            .unwrap();

        let task_id = orchestrator
            .process(article_id, ProcessOptions::default())
            .unwrap();
        cancel_registry
            .set((orchestrator.clone(), task_id.clone()))
            .ok()
            .unwrap();

        let task = wait_terminal(&store, &task_id).await;
        assert_eq!(task.status, TaskStatus::Cancelled);

        let article = store.get_article(article_id).unwrap();
        // Last stage status survives; the article is not failed
        assert_eq!(article.status, ArticleStatus::Optimizing);
        // Attempt 2 wrote no partial detection row
        assert_eq!(store.detections_for(article_id).unwrap().len(), 1);
        assert_eq!(detector.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_before_first_step() {
        let store = Store::in_memory().unwrap();
        let article_id = store
            .create_article(&ArticleDraft::from_url("https://example.com/a", "medium"))
            .unwrap();

        let llm = ScriptedLlm::texts(&[]);
        let detector = ScriptedDetector::values(&[]);
        let orchestrator = orchestrator(&store, llm, detector, 5);

        let task_id = orchestrator
            .process(article_id, ProcessOptions::default())
            .unwrap();
        // The spawned run has not been polled yet on the current-thread
        // runtime, so this cancel wins the race deterministically.
        orchestrator.cancel(&task_id).unwrap();

        let task = wait_terminal(&store, &task_id).await;
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert_eq!(
            store.get_article(article_id).unwrap().status,
            ArticleStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_auto_publish_appends_publish_step() {
        let store = Store::in_memory().unwrap();
        let article_id = store
            .create_article(&ArticleDraft::from_url("https://example.com/a", "medium"))
            .unwrap();

        let llm = ScriptedLlm::texts(&["中文翻译稿", "优化稿"]);
        let detector = ScriptedDetector::values(&[10.0]);
        let orchestrator = orchestrator(&store, llm, detector, 5);

        let task_id = orchestrator
            .process(
                article_id,
                ProcessOptions {
                    auto_publish: true,
                    ..ProcessOptions::default()
                },
            )
            .unwrap();
        let task = wait_terminal(&store, &task_id).await;

        assert_eq!(task.status, TaskStatus::Completed);
        let article = store.get_article(article_id).unwrap();
        assert_eq!(article.status, ArticleStatus::Ready);
        assert!(article.published_at.is_some());
        assert_eq!(article.content_final, "优化稿");
    }

    #[tokio::test]
    async fn test_partial_step_list() {
        let store = Store::in_memory().unwrap();
        let article_id = store
            .create_article(&ArticleDraft::from_url("https://example.com/a", "medium"))
            .unwrap();

        let llm = ScriptedLlm::texts(&[]);
        let detector = ScriptedDetector::values(&[]);
        let orchestrator = orchestrator(&store, llm, detector, 5);

        let task_id = orchestrator
            .process(
                article_id,
                ProcessOptions {
                    steps: Some(vec![Step::Extract]),
                    ..ProcessOptions::default()
                },
            )
            .unwrap();
        let task = wait_terminal(&store, &task_id).await;

        assert_eq!(task.status, TaskStatus::Completed);
        let article = store.get_article(article_id).unwrap();
        assert_eq!(article.status, ArticleStatus::Ready);
        assert!(!article.content_original.is_empty());
        assert_eq!(article.content_translated, "");
    }

    #[tokio::test]
    async fn test_scraper_failure_marks_failed() {
        struct FailingScraper;

        #[async_trait]
        impl Scraper for FailingScraper {
            async fn extract(&self, _url: &str) -> Result<ExtractedArticle> {
                Err(Error::transport("fetch refused"))
            }
        }

        let store = Store::in_memory().unwrap();
        let article_id = store
            .create_article(&ArticleDraft::from_url("https://example.com/a", "medium"))
            .unwrap();

        let orchestrator = Orchestrator::builder(store.clone())
            .llm(ScriptedLlm::texts(&[]))
            .detector(ScriptedDetector::values(&[]))
            .scraper(Arc::new(FailingScraper))
            .build()
            .unwrap();

        let task_id = orchestrator
            .process(article_id, ProcessOptions::default())
            .unwrap();
        let task = wait_terminal(&store, &task_id).await;

        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.last_error.unwrap().contains("fetch refused"));
        let article = store.get_article(article_id).unwrap();
        assert_eq!(article.status, ArticleStatus::Failed);
        assert_eq!(article.processing_attempts, 1);
    }

    #[tokio::test]
    async fn test_batch_fan_out() {
        let store = Store::in_memory().unwrap();
        let a = store
            .create_article(&ArticleDraft::from_url("https://example.com/a", "medium"))
            .unwrap();
        let b = store
            .create_article(&ArticleDraft::from_url("https://example.com/b", "medium"))
            .unwrap();

        let llm = ScriptedLlm::texts(&["翻译A", "优化A", "翻译B", "优化B"]);
        let detector = ScriptedDetector::values(&[10.0, 10.0]);
        let orchestrator = orchestrator(&store, llm, detector, 5);

        let batch = orchestrator.process_many(&[a, b, 999], &ProcessOptions::default());
        assert!(batch.batch_id.starts_with("batch_"));
        assert_eq!(batch.items.len(), 3);
        assert!(batch.items[0].task_id.is_some());
        assert!(batch.items[1].task_id.is_some());
        assert!(batch.items[2].error.is_some());

        for item in batch.items.iter().filter_map(|i| i.task_id.as_ref()) {
            let task = wait_terminal(&store, item).await;
            assert_eq!(task.status, TaskStatus::Completed);
        }
    }

    #[tokio::test]
    async fn test_task_progress_is_monotonic_over_run() {
        let store = Store::in_memory().unwrap();
        let article_id = store
            .create_article(&ArticleDraft::from_url("https://example.com/a", "medium"))
            .unwrap();

        let llm = ScriptedLlm::texts(&["翻译", "优化"]);
        let detector = ScriptedDetector::values(&[10.0]);
        let orchestrator = orchestrator(&store, llm, detector, 5);

        let task_id = orchestrator
            .process(article_id, ProcessOptions::default())
            .unwrap();

        let mut last = 0.0_f64;
        loop {
            let task = store.get_task(&task_id).unwrap();
            assert!(task.progress >= last, "progress went backwards");
            last = task.progress;
            if task.status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(last, 100.0);
    }

    #[tokio::test]
    async fn test_stage_timeout_fails_pipeline() {
        struct SlowScraper;

        #[async_trait]
        impl Scraper for SlowScraper {
            async fn extract(&self, _url: &str) -> Result<ExtractedArticle> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                unreachable!()
            }
        }

        let store = Store::in_memory().unwrap();
        let article_id = store
            .create_article(&ArticleDraft::from_url("https://example.com/a", "medium"))
            .unwrap();

        let orchestrator = Orchestrator::builder(store.clone())
            .llm(ScriptedLlm::texts(&[]))
            .detector(ScriptedDetector::values(&[]))
            .scraper(Arc::new(SlowScraper))
            .stage_timeout(Duration::from_millis(20))
            .build()
            .unwrap();

        let task_id = orchestrator
            .process(article_id, ProcessOptions::default())
            .unwrap();
        let task = wait_terminal(&store, &task_id).await;

        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.last_error.unwrap().contains("timed out"));
    }
}
