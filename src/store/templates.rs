//! Prompt template persistence, usage accounting, and import/export.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::{Error, Result};
use crate::model::{ContentType, PromptTemplate, PromptType};

use super::{parse_datetime, parse_datetime_opt, Store};

const TEMPLATE_COLUMNS: &str = "id, name, display_name, description, type, template, variables, \
     version, language, content_type, priority, is_active, is_default, success_rate, \
     usage_count, average_quality_score, parameters, test_group, created_at, updated_at, \
     last_used_at, created_by";

/// Fields required to create a template.
#[derive(Debug, Clone)]
pub struct TemplateDraft {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub prompt_type: PromptType,
    pub template: String,
    pub variables: Vec<String>,
    pub content_type: ContentType,
    pub priority: i64,
    pub is_active: bool,
    pub parameters: Option<Value>,
}

impl TemplateDraft {
    pub fn new(
        name: impl Into<String>,
        prompt_type: PromptType,
        template: impl Into<String>,
    ) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            description: String::new(),
            prompt_type,
            template: template.into(),
            variables: Vec::new(),
            content_type: ContentType::General,
            priority: 0,
            is_active: true,
            parameters: None,
        }
    }

    pub fn with_content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = content_type;
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_variables(mut self, variables: Vec<String>) -> Self {
        self.variables = variables;
        self
    }
}

/// Selection filter for templates.
#[derive(Debug, Clone, Default)]
pub struct TemplateFilter {
    pub content_type: Option<ContentType>,
    pub active_only: bool,
}

/// Neutral serialised form for template exchange. Server-assigned fields
/// (id, timestamps, usage counters) are intentionally absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateExport {
    pub name: String,
    pub display_name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub prompt_type: PromptType,
    pub template: String,
    pub variables: Vec<String>,
    pub version: String,
    pub language: String,
    pub content_type: ContentType,
    pub priority: i64,
    pub is_active: bool,
    pub is_default: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_group: Option<String>,
    pub created_by: String,
}

/// Outcome of a bulk import.
#[derive(Debug, Clone, Default)]
pub struct ImportReport {
    pub imported: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
}

impl Store {
    /// Create a new template. Name must be globally unique.
    pub fn create_template(&self, draft: &TemplateDraft) -> Result<i64> {
        if draft.name.is_empty() {
            return Err(Error::validation("template name must not be empty"));
        }
        let now = Utc::now().to_rfc3339();

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO prompt_templates (
                    name, display_name, description, type, template, variables,
                    content_type, priority, is_active, parameters, created_at, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
                params![
                    draft.name,
                    draft.display_name,
                    draft.description,
                    draft.prompt_type.as_str(),
                    draft.template,
                    serde_json::to_string(&draft.variables)?,
                    draft.content_type.as_str(),
                    draft.priority,
                    draft.is_active,
                    draft
                        .parameters
                        .as_ref()
                        .map(serde_json::to_string)
                        .transpose()?,
                    now,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Get a template by id.
    pub fn get_template(&self, id: i64) -> Result<PromptTemplate> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {TEMPLATE_COLUMNS} FROM prompt_templates WHERE id = ?1"),
                params![id],
                row_to_template,
            )
            .optional()?
            .ok_or_else(|| Error::not_found("prompt_template", id))
        })
    }

    /// Get a template by its unique name.
    pub fn get_template_by_name(&self, name: &str) -> Result<Option<PromptTemplate>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {TEMPLATE_COLUMNS} FROM prompt_templates WHERE name = ?1"),
                    params![name],
                    row_to_template,
                )
                .optional()?)
        })
    }

    /// Select templates of a type, best candidates first: highest
    /// priority, then most recently created.
    pub fn select_templates(
        &self,
        prompt_type: PromptType,
        filter: &TemplateFilter,
    ) -> Result<Vec<PromptTemplate>> {
        self.with_conn(|conn| {
            let mut sql = format!(
                "SELECT {TEMPLATE_COLUMNS} FROM prompt_templates WHERE type = ?1"
            );
            let mut values: Vec<Box<dyn rusqlite::ToSql>> =
                vec![Box::new(prompt_type.as_str().to_string())];

            if filter.active_only {
                sql.push_str(" AND is_active = 1");
            }
            if let Some(ct) = filter.content_type {
                sql.push_str(&format!(" AND content_type = ?{}", values.len() + 1));
                values.push(Box::new(ct.as_str().to_string()));
            }
            sql.push_str(" ORDER BY priority DESC, created_at DESC, id DESC");

            let value_refs: Vec<&dyn rusqlite::ToSql> =
                values.iter().map(|b| b.as_ref()).collect();
            let mut stmt = conn.prepare(&sql)?;
            let templates = stmt
                .query_map(value_refs.as_slice(), row_to_template)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(templates)
        })
    }

    /// Mark a template as the default of its type, clearing the flag on
    /// every other template of the same type in the same transaction.
    pub fn set_default_template(&self, id: i64) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;

            let prompt_type: String = tx
                .query_row(
                    "SELECT type FROM prompt_templates WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or_else(|| Error::not_found("prompt_template", id))?;

            tx.execute(
                "UPDATE prompt_templates SET is_default = 0, updated_at = ?2
                 WHERE type = ?1 AND is_default = 1",
                params![prompt_type, Utc::now().to_rfc3339()],
            )?;
            tx.execute(
                "UPDATE prompt_templates SET is_default = 1, updated_at = ?2 WHERE id = ?1",
                params![id, Utc::now().to_rfc3339()],
            )?;

            tx.commit()?;
            Ok(())
        })
    }

    /// Fold one use into the template's counters.
    pub fn record_template_usage(&self, id: i64, passed: bool) -> Result<()> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE prompt_templates SET
                    usage_count = usage_count + 1,
                    success_rate = (success_rate * usage_count + ?2) / (usage_count + 1),
                    last_used_at = ?3,
                    updated_at = ?3
                 WHERE id = ?1",
                params![
                    id,
                    if passed { 1.0 } else { 0.0 },
                    Utc::now().to_rfc3339()
                ],
            )?;
            if updated == 0 {
                return Err(Error::not_found("prompt_template", id));
            }
            Ok(())
        })
    }

    /// Deactivate a template (rows are never deleted from under running
    /// pipelines).
    pub fn deactivate_template(&self, id: i64) -> Result<()> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE prompt_templates SET is_active = 0, updated_at = ?2 WHERE id = ?1",
                params![id, Utc::now().to_rfc3339()],
            )?;
            if updated == 0 {
                return Err(Error::not_found("prompt_template", id));
            }
            Ok(())
        })
    }

    /// Export all templates in the neutral exchange form.
    pub fn export_templates(&self) -> Result<Vec<TemplateExport>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TEMPLATE_COLUMNS} FROM prompt_templates ORDER BY name"
            ))?;
            let templates = stmt
                .query_map([], row_to_template)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(templates.iter().map(template_to_export).collect())
        })
    }

    /// Import templates. Existing names are overwritten when `overwrite`
    /// is set, skipped otherwise; per-item failures are collected, not
    /// fatal.
    pub fn import_templates(
        &self,
        templates: &[TemplateExport],
        overwrite: bool,
    ) -> Result<ImportReport> {
        let mut report = ImportReport::default();

        for export in templates {
            match self.import_one(export, overwrite) {
                Ok(true) => report.imported += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    warn!(name = %export.name, error = %e, "template import failed");
                    report
                        .errors
                        .push(format!("{}: {}", export.name, e.reason()));
                }
            }
        }

        Ok(report)
    }

    fn import_one(&self, export: &TemplateExport, overwrite: bool) -> Result<bool> {
        if export.name.is_empty() {
            return Err(Error::validation("template name must not be empty"));
        }

        let existing = self.get_template_by_name(&export.name)?;
        if existing.is_some() && !overwrite {
            return Ok(false);
        }

        let now = Utc::now().to_rfc3339();
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;

            tx.execute(
                "INSERT INTO prompt_templates (
                    name, display_name, description, type, template, variables, version,
                    language, content_type, priority, is_active, is_default, parameters,
                    test_group, created_by, created_at, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?16)
                 ON CONFLICT(name) DO UPDATE SET
                    display_name = excluded.display_name,
                    description = excluded.description,
                    type = excluded.type,
                    template = excluded.template,
                    variables = excluded.variables,
                    version = excluded.version,
                    language = excluded.language,
                    content_type = excluded.content_type,
                    priority = excluded.priority,
                    is_active = excluded.is_active,
                    is_default = excluded.is_default,
                    parameters = excluded.parameters,
                    test_group = excluded.test_group,
                    created_by = excluded.created_by,
                    updated_at = excluded.updated_at",
                params![
                    export.name,
                    export.display_name,
                    export.description,
                    export.prompt_type.as_str(),
                    export.template,
                    serde_json::to_string(&export.variables)?,
                    export.version,
                    export.language,
                    export.content_type.as_str(),
                    export.priority,
                    export.is_active,
                    export.is_default,
                    export
                        .parameters
                        .as_ref()
                        .map(serde_json::to_string)
                        .transpose()?,
                    export.test_group,
                    export.created_by,
                    now,
                ],
            )?;

            // An imported default must still be the only one of its type
            if export.is_default {
                tx.execute(
                    "UPDATE prompt_templates SET is_default = 0, updated_at = ?3
                     WHERE type = ?1 AND is_default = 1 AND name != ?2",
                    params![export.prompt_type.as_str(), export.name, now],
                )?;
            }

            tx.commit()?;
            Ok(true)
        })
    }
}

fn template_to_export(t: &PromptTemplate) -> TemplateExport {
    TemplateExport {
        name: t.name.clone(),
        display_name: t.display_name.clone(),
        description: t.description.clone(),
        prompt_type: t.prompt_type,
        template: t.template.clone(),
        variables: t.variables.clone(),
        version: t.version.clone(),
        language: t.language.clone(),
        content_type: t.content_type,
        priority: t.priority,
        is_active: t.is_active,
        is_default: t.is_default,
        parameters: t.parameters.clone(),
        test_group: t.test_group.clone(),
        created_by: t.created_by.clone(),
    }
}

fn row_to_template(row: &Row<'_>) -> rusqlite::Result<PromptTemplate> {
    let prompt_type: String = row.get(4)?;
    let variables: Option<String> = row.get(6)?;
    let parameters: Option<String> = row.get(16)?;

    Ok(PromptTemplate {
        id: row.get(0)?,
        name: row.get(1)?,
        display_name: row.get(2)?,
        description: row.get(3)?,
        prompt_type: PromptType::parse(&prompt_type).unwrap_or(PromptType::Optimization),
        template: row.get(5)?,
        variables: variables
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default(),
        version: row.get(7)?,
        language: row.get(8)?,
        content_type: ContentType::parse(&row.get::<_, String>(9)?),
        priority: row.get(10)?,
        is_active: row.get(11)?,
        is_default: row.get(12)?,
        success_rate: row.get(13)?,
        usage_count: row.get(14)?,
        average_quality_score: row.get(15)?,
        parameters: parameters.and_then(|s| serde_json::from_str(&s).ok()),
        test_group: row.get(17)?,
        created_at: parse_datetime(row.get(18)?),
        updated_at: parse_datetime(row.get(19)?),
        last_used_at: parse_datetime_opt(row.get(20)?),
        created_by: row.get(21)?,
    })
}
