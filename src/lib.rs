//! # repub-core
//!
//! An end-to-end content republishing pipeline. Given a source URL or a
//! topic prompt, it produces a polished target-language version of the
//! article whose machine-generated probability, as measured by an
//! external detector, falls below a configurable threshold.
//!
//! ## Core Components
//!
//! - **Store**: SQLite persistence for articles, templates, tasks, and
//!   detection results
//! - **Prompts**: template selection by stage, content type, and
//!   rewrite band
//! - **Llm**: single-call HTTP client with JSON and SSE bodies
//! - **Detector**: browser-driven detector driver with quota and
//!   verification handling
//! - **Identity**: fingerprint-profile and proxy rotation
//! - **Pipeline**: stage sequencing and the detect-optimise loop
//!
//! ## Example
//!
//! ```rust,ignore
//! use repub_core::{Orchestrator, ProcessOptions, Store};
//!
//! let store = Store::open("repub.db")?;
//! let orchestrator = Orchestrator::builder(store)
//!     .llm(llm)
//!     .detector(detector)
//!     .scraper(scraper)
//!     .build()?;
//!
//! let task_id = orchestrator.process(article_id, ProcessOptions::default())?;
//! ```

pub mod config;
pub mod detector;
pub mod error;
pub mod identity;
pub mod llm;
pub mod model;
pub mod pipeline;
pub mod prompts;
pub mod publish;
pub mod scrape;
pub mod store;

// Re-exports for convenience
pub use config::{
    AppConfig, DetectionConfig, LlmConfig, OptimizationConfig, PerformanceConfig,
    PerformancePreset, ProxyConfig,
};
pub use detector::{
    AiDetector, Browser, BrowserSession, Detection, DetectionStatus, DetectorConfig, Locator,
    WebDetector,
};
pub use error::{Error, Result};
pub use identity::{
    HttpIpEcho, Identity, IdentityController, IpEcho, ProxyController, ProxyEndpoint,
    RotationConfig, RotationEntry, RotationMethod, RotationStats, SystemProxy,
};
pub use llm::{
    ClientConfig, CompletionRequest, CompletionResponse, FinishReason, HttpLlmClient, LlmClient,
    SamplingParams, TokenUsage,
};
pub use model::{
    Article, ArticleDraft, ArticleFilter, ArticlePatch, ArticleStatus, ContentType, CreationType,
    DetectionRecord, Page, PromptTemplate, PromptType, TargetLength, Task, TaskStatus,
};
pub use pipeline::{
    BatchItem, BatchOutcome, CancelToken, CommitSlot, DetectOptimizeLoop, LoopConfig, LoopKind,
    LoopOutcome, Orchestrator, OrchestratorBuilder, Priority, ProcessOptions, Step,
};
pub use prompts::{
    ClassifierConfig, ContentClassifier, InstantiatedPrompt, OptimizationBand,
    OptimizationRequest, PromptCatalog,
};
pub use publish::Publisher;
pub use scrape::{ExtractedArticle, Scraper};
pub use store::{
    ImportReport, NewDetection, Store, TemplateDraft, TemplateExport, TemplateFilter,
};
