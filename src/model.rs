//! Domain types for articles, tasks, templates, and detection records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How an article entered the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreationType {
    /// Imported from a source URL and translated
    UrlImport,
    /// Created from a topic prompt
    TopicCreation,
}

impl CreationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UrlImport => "url_import",
            Self::TopicCreation => "topic_creation",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "topic_creation" => Self::TopicCreation,
            _ => Self::UrlImport,
        }
    }
}

impl std::fmt::Display for CreationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Article lifecycle status.
///
/// `pending → extracting|creating → translating (url only) → optimizing ↔
/// detecting → ready | failed`. Publishing is an orthogonal transition out
/// of `ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArticleStatus {
    Pending,
    Extracting,
    Creating,
    Translating,
    Optimizing,
    Detecting,
    Ready,
    Publishing,
    Failed,
}

impl ArticleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Extracting => "extracting",
            Self::Creating => "creating",
            Self::Translating => "translating",
            Self::Optimizing => "optimizing",
            Self::Detecting => "detecting",
            Self::Ready => "ready",
            Self::Publishing => "publishing",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => Self::Pending,
            "extracting" => Self::Extracting,
            "creating" => Self::Creating,
            "translating" => Self::Translating,
            "optimizing" => Self::Optimizing,
            "detecting" => Self::Detecting,
            "ready" => Self::Ready,
            "publishing" => Self::Publishing,
            "failed" => Self::Failed,
            _ => return None,
        })
    }

    /// Whether `next` is a legal successor of this status.
    ///
    /// Self-transitions are always allowed (idempotent updates), any
    /// in-flight status may fail, and `failed` may be reset to `pending`
    /// by an explicit retry.
    pub fn can_transition_to(&self, next: ArticleStatus) -> bool {
        use ArticleStatus::*;

        if *self == next {
            return true;
        }

        match (self, next) {
            (_, Failed) => *self != Failed,
            (Failed, Pending) => true,
            (Pending, Extracting) | (Pending, Creating) => true,
            (Extracting, Translating) => true,
            (Translating, Optimizing) => true,
            // Topic creation runs the detection loop directly on the draft
            (Creating, Optimizing) | (Creating, Detecting) => true,
            (Optimizing, Detecting) => true,
            (Detecting, Optimizing) | (Detecting, Publishing) => true,
            // Partial step lists may finish after any in-flight stage
            (Extracting | Creating | Translating | Optimizing | Detecting | Publishing, Ready) => {
                true
            }
            (Ready, Publishing) => true,
            // Re-entry for AI-reduction on an already accepted article
            (Ready, Optimizing) => true,
            _ => false,
        }
    }

    /// Terminal states require no further processing.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Failed)
    }
}

impl std::fmt::Display for ArticleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Target article length, mapped to Chinese character ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetLength {
    Mini,
    Short,
    Medium,
    Long,
}

impl TargetLength {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mini => "mini",
            Self::Short => "short",
            Self::Medium => "medium",
            Self::Long => "long",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "short" => Self::Short,
            "medium" => Self::Medium,
            "long" => Self::Long,
            _ => Self::Mini,
        }
    }

    /// Character range substituted for `{target_length}` in templates.
    pub fn char_range(&self) -> &'static str {
        match self {
            Self::Mini => "300-500",
            Self::Short => "500-800",
            Self::Medium => "800-1500",
            Self::Long => "1500-3000",
        }
    }
}

impl std::fmt::Display for TargetLength {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A persisted article with its four content slots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: i64,
    /// Unique key: the source URL, or `topic://<topic>#<millis>` for
    /// topic creation.
    pub source_key: String,
    pub title: String,
    pub source_platform: String,
    pub creation_type: CreationType,
    pub content_original: String,
    pub content_translated: String,
    pub content_optimized: String,
    pub content_final: String,
    pub status: ArticleStatus,
    pub ai_probability: Option<f64>,
    pub category: String,
    pub word_count: Option<i64>,
    pub estimated_reading_time: Option<i64>,
    pub tags: Vec<String>,
    pub target_length: TargetLength,
    pub writing_style: String,
    pub topic: String,
    pub keywords: Vec<String>,
    pub selected_prompt_id: Option<i64>,
    pub selected_model_id: Option<i64>,
    pub creation_requirements: String,
    pub processing_attempts: i64,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl Article {
    /// Best content available for detection or optimization, preferring
    /// the most refined slot.
    pub fn best_content(&self) -> &str {
        if !self.content_optimized.is_empty() {
            &self.content_optimized
        } else if !self.content_translated.is_empty() {
            &self.content_translated
        } else {
            &self.content_original
        }
    }

    /// Source URL for url-import articles.
    pub fn source_url(&self) -> Option<&str> {
        match self.creation_type {
            CreationType::UrlImport => Some(&self.source_key),
            CreationType::TopicCreation => None,
        }
    }
}

/// Build the synthetic unique key for a topic-creation article.
pub fn topic_source_key(topic: &str, at: DateTime<Utc>) -> String {
    format!("topic://{}#{}", topic, at.timestamp_millis())
}

/// Whitespace-delimited word count.
pub fn word_count(text: &str) -> i64 {
    text.split_whitespace().count() as i64
}

/// Estimated reading time in minutes at ~200 words per minute.
pub fn estimated_reading_time(words: i64) -> i64 {
    (words / 200).max(1)
}

/// Fields required to create a new article row.
#[derive(Debug, Clone, Default)]
pub struct ArticleDraft {
    pub source_key: String,
    pub title: String,
    pub source_platform: String,
    pub creation_type: Option<CreationType>,
    pub category: String,
    pub target_length: Option<TargetLength>,
    pub writing_style: String,
    pub topic: String,
    pub keywords: Vec<String>,
    pub selected_prompt_id: Option<i64>,
    pub selected_model_id: Option<i64>,
    pub creation_requirements: String,
}

impl ArticleDraft {
    /// Draft for a url-import article.
    pub fn from_url(url: impl Into<String>, platform: impl Into<String>) -> Self {
        Self {
            source_key: url.into(),
            source_platform: platform.into(),
            creation_type: Some(CreationType::UrlImport),
            ..Self::default()
        }
    }

    /// Draft for a topic-creation article. `source_platform` is fixed to
    /// the reserved `topic_creation` value.
    pub fn from_topic(topic: impl Into<String>, at: DateTime<Utc>) -> Self {
        let topic = topic.into();
        Self {
            source_key: topic_source_key(&topic, at),
            title: format!("主题创作: {}", topic),
            source_platform: "topic_creation".to_string(),
            creation_type: Some(CreationType::TopicCreation),
            topic,
            ..Self::default()
        }
    }
}

/// Partial update applied atomically to an article row.
#[derive(Debug, Clone, Default)]
pub struct ArticlePatch {
    pub title: Option<String>,
    pub content_original: Option<String>,
    pub content_translated: Option<String>,
    pub content_optimized: Option<String>,
    pub content_final: Option<String>,
    pub status: Option<ArticleStatus>,
    pub ai_probability: Option<f64>,
    pub category: Option<String>,
    pub word_count: Option<i64>,
    pub estimated_reading_time: Option<i64>,
    pub tags: Option<Vec<String>>,
    pub last_error: Option<String>,
    pub processing_attempts: Option<i64>,
    pub published_at: Option<DateTime<Utc>>,
}

impl ArticlePatch {
    pub fn status(status: ArticleStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.content_original.is_none()
            && self.content_translated.is_none()
            && self.content_optimized.is_none()
            && self.content_final.is_none()
            && self.status.is_none()
            && self.ai_probability.is_none()
            && self.category.is_none()
            && self.word_count.is_none()
            && self.estimated_reading_time.is_none()
            && self.tags.is_none()
            && self.last_error.is_none()
            && self.processing_attempts.is_none()
            && self.published_at.is_none()
    }
}

/// Listing filter for articles.
#[derive(Debug, Clone, Default)]
pub struct ArticleFilter {
    pub status: Option<ArticleStatus>,
    pub creation_type: Option<CreationType>,
    pub source_platform: Option<String>,
    pub category: Option<String>,
}

/// Offset/limit pagination.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub offset: u32,
    pub limit: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
        }
    }
}

/// Processing task status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => Self::Pending,
            "running" => Self::Running,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "cancelled" => Self::Cancelled,
            _ => return None,
        })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A background processing task. Ownership of the article during
/// processing is expressed through the article's status, not task locks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub task_id: String,
    pub article_id: i64,
    pub task_type: String,
    pub status: TaskStatus,
    pub progress: f64,
    pub current_step: String,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// One detector submission, appended for every submission, pass or fail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub id: i64,
    pub article_id: i64,
    pub detection_type: String,
    pub platform: String,
    pub score: f64,
    pub threshold: f64,
    pub is_passed: bool,
    pub detected_at: DateTime<Utc>,
    /// Profile id, observed egress IP, attempt count, raw result text.
    pub diagnostic: Value,
}

/// Template category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptType {
    Translation,
    Optimization,
    Creation,
    AiReduction,
}

impl PromptType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Translation => "translation",
            Self::Optimization => "optimization",
            Self::Creation => "creation",
            Self::AiReduction => "ai_reduction",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "translation" => Self::Translation,
            "optimization" => Self::Optimization,
            "creation" => Self::Creation,
            "ai_reduction" => Self::AiReduction,
            _ => return None,
        })
    }
}

impl std::fmt::Display for PromptType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Coarse content classification used to pick prompt wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Technical,
    Tutorial,
    News,
    General,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Technical => "technical",
            Self::Tutorial => "tutorial",
            Self::News => "news",
            Self::General => "general",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "technical" => Self::Technical,
            "tutorial" => Self::Tutorial,
            "news" => Self::News,
            _ => Self::General,
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A stored prompt template with `{variable}` placeholders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub id: i64,
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub prompt_type: PromptType,
    pub template: String,
    pub variables: Vec<String>,
    pub version: String,
    pub language: String,
    pub content_type: ContentType,
    pub priority: i64,
    pub is_active: bool,
    pub is_default: bool,
    pub success_rate: f64,
    pub usage_count: i64,
    pub average_quality_score: f64,
    pub parameters: Option<Value>,
    pub test_group: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_by: String,
}
