//! Publishing interface.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::Article;

/// Publisher interface. Implementations deliver the article's best
/// content to a target platform; the pipeline only records the outcome.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, article: &Article) -> Result<()>;
}
