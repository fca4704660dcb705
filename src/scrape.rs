//! Source-article extraction interface.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Content pulled from a source URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedArticle {
    pub title: String,
    pub content: String,
    pub author: Option<String>,
    pub publish_date: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
    pub word_count: i64,
    pub reading_time: i64,
}

/// Scraper interface. One implementation per source platform lives
/// outside this crate; tests stub it.
#[async_trait]
pub trait Scraper: Send + Sync {
    async fn extract(&self, url: &str) -> Result<ExtractedArticle>;
}
