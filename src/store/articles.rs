//! Article persistence.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{
    estimated_reading_time, word_count, Article, ArticleDraft, ArticleFilter, ArticlePatch,
    ArticleStatus, CreationType, Page, TargetLength,
};

use super::{parse_datetime, parse_datetime_opt, Store};

const ARTICLE_COLUMNS: &str = "id, source_key, title, source_platform, creation_type, \
     content_original, content_translated, content_optimized, content_final, status, \
     ai_probability, category, word_count, estimated_reading_time, tags, target_length, \
     writing_style, topic, keywords, selected_prompt_id, selected_model_id, \
     creation_requirements, processing_attempts, last_error, created_at, updated_at, \
     published_at";

fn url_hash(source_key: &str) -> String {
    let digest = Sha256::digest(source_key.as_bytes());
    format!("{digest:x}")
}

impl Store {
    /// Create a new article row. Fails with `DuplicateKey` when the
    /// source key is already taken.
    pub fn create_article(&self, draft: &ArticleDraft) -> Result<i64> {
        if draft.source_key.is_empty() {
            return Err(Error::validation("source_key must not be empty"));
        }

        let creation_type = draft.creation_type.unwrap_or(CreationType::UrlImport);
        match creation_type {
            CreationType::TopicCreation if draft.topic.is_empty() => {
                return Err(Error::validation(
                    "topic_creation articles require a topic",
                ));
            }
            CreationType::UrlImport if !draft.topic.is_empty() => {
                return Err(Error::validation(
                    "url_import articles must not carry a topic",
                ));
            }
            _ => {}
        }

        let target_length = draft.target_length.unwrap_or(TargetLength::Mini);
        let now = Utc::now().to_rfc3339();

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO articles (
                    source_key, url_hash, title, source_platform, creation_type, category,
                    target_length, writing_style, topic, keywords, selected_prompt_id,
                    selected_model_id, creation_requirements, created_at, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)",
                params![
                    draft.source_key,
                    url_hash(&draft.source_key),
                    draft.title,
                    draft.source_platform,
                    creation_type.as_str(),
                    draft.category,
                    target_length.as_str(),
                    draft.writing_style,
                    draft.topic,
                    serde_json::to_string(&draft.keywords)?,
                    draft.selected_prompt_id,
                    draft.selected_model_id,
                    draft.creation_requirements,
                    now,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Get an article by id.
    pub fn get_article(&self, id: i64) -> Result<Article> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE id = ?1"),
                params![id],
                row_to_article,
            )
            .optional()?
            .ok_or_else(|| Error::not_found("article", id))
        })
    }

    /// Look up an article by its unique source key.
    pub fn find_by_source_key(&self, source_key: &str) -> Result<Option<Article>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE url_hash = ?1 AND source_key = ?2"),
                    params![url_hash(source_key), source_key],
                    row_to_article,
                )
                .optional()?)
        })
    }

    /// Apply a partial update atomically. Status changes are validated
    /// against the lifecycle; an illegal transition is a validation
    /// error and nothing is written.
    pub fn update_article(&self, id: i64, patch: &ArticlePatch) -> Result<Article> {
        if patch.is_empty() {
            return self.get_article(id);
        }

        let mut patch = patch.clone();
        // Content changes keep the word-count metadata in step unless the
        // caller supplied explicit values.
        if patch.word_count.is_none() {
            let changed = patch
                .content_optimized
                .as_deref()
                .or(patch.content_translated.as_deref())
                .or(patch.content_original.as_deref());
            if let Some(content) = changed {
                let words = word_count(content);
                patch.word_count = Some(words);
                if patch.estimated_reading_time.is_none() {
                    patch.estimated_reading_time = Some(estimated_reading_time(words));
                }
            }
        }

        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;

            if let Some(next) = patch.status {
                let current: String = tx
                    .query_row(
                        "SELECT status FROM articles WHERE id = ?1",
                        params![id],
                        |row| row.get(0),
                    )
                    .optional()?
                    .ok_or_else(|| Error::not_found("article", id))?;
                let current = ArticleStatus::parse(&current)
                    .ok_or_else(|| Error::Fatal(format!("unknown stored status: {current}")))?;

                if !current.can_transition_to(next) {
                    return Err(Error::validation(format!(
                        "illegal status transition {current} -> {next} for article {id}"
                    )));
                }
                debug!(article_id = id, from = %current, to = %next, "article status change");
            }

            let mut sets: Vec<String> = Vec::new();
            let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

            macro_rules! set {
                ($field:expr, $column:literal, $value:expr) => {
                    if let Some(v) = $field {
                        sets.push(format!("{} = ?{}", $column, values.len() + 1));
                        values.push(Box::new(($value)(v)));
                    }
                };
            }

            set!(patch.title.as_ref(), "title", |v: &String| v.clone());
            set!(
                patch.content_original.as_ref(),
                "content_original",
                |v: &String| v.clone()
            );
            set!(
                patch.content_translated.as_ref(),
                "content_translated",
                |v: &String| v.clone()
            );
            set!(
                patch.content_optimized.as_ref(),
                "content_optimized",
                |v: &String| v.clone()
            );
            set!(
                patch.content_final.as_ref(),
                "content_final",
                |v: &String| v.clone()
            );
            set!(patch.status.as_ref(), "status", |v: &ArticleStatus| v
                .as_str()
                .to_string());
            set!(patch.ai_probability.as_ref(), "ai_probability", |v: &f64| {
                *v
            });
            set!(patch.category.as_ref(), "category", |v: &String| v.clone());
            set!(patch.word_count.as_ref(), "word_count", |v: &i64| *v);
            set!(
                patch.estimated_reading_time.as_ref(),
                "estimated_reading_time",
                |v: &i64| *v
            );
            if let Some(tags) = patch.tags.as_ref() {
                sets.push(format!("tags = ?{}", values.len() + 1));
                values.push(Box::new(serde_json::to_string(tags)?));
            }
            set!(patch.last_error.as_ref(), "last_error", |v: &String| v
                .clone());
            set!(
                patch.processing_attempts.as_ref(),
                "processing_attempts",
                |v: &i64| *v
            );
            set!(
                patch.published_at.as_ref(),
                "published_at",
                |v: &chrono::DateTime<Utc>| v.to_rfc3339()
            );

            sets.push(format!("updated_at = ?{}", values.len() + 1));
            values.push(Box::new(Utc::now().to_rfc3339()));

            let sql = format!(
                "UPDATE articles SET {} WHERE id = ?{}",
                sets.join(", "),
                values.len() + 1
            );
            values.push(Box::new(id));

            let value_refs: Vec<&dyn rusqlite::ToSql> =
                values.iter().map(|b| b.as_ref()).collect();
            let updated = tx.execute(&sql, value_refs.as_slice())?;
            if updated == 0 {
                return Err(Error::not_found("article", id));
            }

            let article = tx.query_row(
                &format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE id = ?1"),
                params![id],
                row_to_article,
            )?;

            tx.commit()?;
            Ok(article)
        })
    }

    /// List articles matching a filter, newest first.
    pub fn list_articles(&self, filter: &ArticleFilter, page: Page) -> Result<Vec<Article>> {
        self.with_conn(|conn| {
            let mut sql = format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE 1=1");
            let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

            if let Some(status) = filter.status {
                sql.push_str(&format!(" AND status = ?{}", values.len() + 1));
                values.push(Box::new(status.as_str().to_string()));
            }
            if let Some(ct) = filter.creation_type {
                sql.push_str(&format!(" AND creation_type = ?{}", values.len() + 1));
                values.push(Box::new(ct.as_str().to_string()));
            }
            if let Some(platform) = &filter.source_platform {
                sql.push_str(&format!(" AND source_platform = ?{}", values.len() + 1));
                values.push(Box::new(platform.clone()));
            }
            if let Some(category) = &filter.category {
                sql.push_str(&format!(" AND category = ?{}", values.len() + 1));
                values.push(Box::new(category.clone()));
            }

            sql.push_str(&format!(
                " ORDER BY created_at DESC, id DESC LIMIT {} OFFSET {}",
                page.limit, page.offset
            ));

            let value_refs: Vec<&dyn rusqlite::ToSql> =
                values.iter().map(|b| b.as_ref()).collect();
            let mut stmt = conn.prepare(&sql)?;
            let articles = stmt
                .query_map(value_refs.as_slice(), row_to_article)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(articles)
        })
    }

    /// Explicit user retry of a failed article: back to `pending` with
    /// zeroed attempt counter and cleared error.
    pub fn reset_for_retry(&self, id: i64) -> Result<Article> {
        let current = self.get_article(id)?;
        if current.status != ArticleStatus::Failed {
            return Err(Error::validation(format!(
                "article {id} is {}, only failed articles can be retried",
                current.status
            )));
        }

        self.with_conn(|conn| {
            conn.execute(
                "UPDATE articles
                 SET status = 'pending', processing_attempts = 0, last_error = NULL,
                     updated_at = ?2
                 WHERE id = ?1",
                params![id, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })?;
        self.get_article(id)
    }
}

fn row_to_article(row: &Row<'_>) -> rusqlite::Result<Article> {
    let status: String = row.get(9)?;
    let tags: Option<String> = row.get(14)?;
    let keywords: Option<String> = row.get(18)?;

    Ok(Article {
        id: row.get(0)?,
        source_key: row.get(1)?,
        title: row.get(2)?,
        source_platform: row.get(3)?,
        creation_type: CreationType::parse(&row.get::<_, String>(4)?),
        content_original: row.get(5)?,
        content_translated: row.get(6)?,
        content_optimized: row.get(7)?,
        content_final: row.get(8)?,
        status: ArticleStatus::parse(&status).unwrap_or(ArticleStatus::Pending),
        ai_probability: row.get(10)?,
        category: row.get(11)?,
        word_count: row.get(12)?,
        estimated_reading_time: row.get(13)?,
        tags: tags
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default(),
        target_length: TargetLength::parse(&row.get::<_, String>(15)?),
        writing_style: row.get(16)?,
        topic: row.get(17)?,
        keywords: keywords
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default(),
        selected_prompt_id: row.get(19)?,
        selected_model_id: row.get(20)?,
        creation_requirements: row.get(21)?,
        processing_attempts: row.get(22)?,
        last_error: row.get(23)?,
        created_at: parse_datetime(row.get(24)?),
        updated_at: parse_datetime(row.get(25)?),
        published_at: parse_datetime_opt(row.get(26)?),
    })
}
