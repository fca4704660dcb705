//! Template selection and instantiation.

use regex::Regex;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::model::{ContentType, PromptType, TargetLength};
use crate::store::{Store, TemplateFilter};

use super::classify::{ClassifierConfig, ContentClassifier, OptimizationBand};
use super::defaults;

/// A ready-to-send prompt and the stored template that produced it, if
/// any, so callers can fold usage statistics back in.
#[derive(Debug, Clone)]
pub struct InstantiatedPrompt {
    pub text: String,
    pub template_id: Option<i64>,
}

impl InstantiatedPrompt {
    fn built_in(text: String) -> Self {
        Self {
            text,
            template_id: None,
        }
    }
}

/// Inputs for an optimization prompt.
#[derive(Debug, Clone)]
pub struct OptimizationRequest<'a> {
    pub content: &'a str,
    pub title: &'a str,
    pub ai_probability: f64,
    pub round: u32,
    /// Pre-classified content type; derived from title/content if absent.
    pub content_type: Option<ContentType>,
    /// Explicit template choice; wins over selection when set.
    pub prompt_id: Option<i64>,
    pub detection_feedback: &'a str,
    pub platform: &'a str,
    /// Substituted for `{target_length}` slots in stored templates.
    pub target_length: TargetLength,
}

impl<'a> OptimizationRequest<'a> {
    pub fn new(content: &'a str, ai_probability: f64, round: u32) -> Self {
        Self {
            content,
            title: "",
            ai_probability,
            round,
            content_type: None,
            prompt_id: None,
            detection_feedback: "",
            platform: "toutiao",
            target_length: TargetLength::Mini,
        }
    }
}

/// Picks a stored template when one matches, falls back to built-in
/// prose, and fills `{variable}` slots.
#[derive(Clone)]
pub struct PromptCatalog {
    store: Store,
    classifier: ContentClassifier,
}

impl PromptCatalog {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            classifier: ContentClassifier::default(),
        }
    }

    pub fn with_classifier_config(mut self, config: ClassifierConfig) -> Self {
        self.classifier = ContentClassifier::new(config);
        self
    }

    /// Classify a (title, content) pair.
    pub fn classify(&self, title: &str, content: &str) -> ContentType {
        self.classifier.classify(title, content)
    }

    /// Build an optimization prompt for the detect-optimise loop.
    pub fn optimization(&self, req: &OptimizationRequest<'_>) -> Result<InstantiatedPrompt> {
        let content_type = req
            .content_type
            .unwrap_or_else(|| self.classify(req.title, req.content));
        let band = OptimizationBand::derive(req.ai_probability, req.round);
        info!(
            band = %band,
            ai_probability = req.ai_probability,
            round = req.round,
            content_type = %content_type,
            "selecting optimization prompt"
        );

        let variables = [
            ("content", req.content.to_string()),
            (
                "objective",
                defaults::optimization_objective(band, req.round),
            ),
            ("level_requirements", defaults::level_requirements_text(band)),
            ("platform", req.platform.to_string()),
            (
                "detection_feedback",
                if req.detection_feedback.is_empty() {
                    "无特殊反馈".to_string()
                } else {
                    req.detection_feedback.to_string()
                },
            ),
            ("target_length", req.target_length.char_range().to_string()),
        ];

        if let Some(prompt) =
            self.stored_prompt(PromptType::Optimization, req.prompt_id, content_type, &variables)?
        {
            return Ok(prompt);
        }

        Ok(InstantiatedPrompt::built_in(
            defaults::build_optimization_prompt(
                req.content,
                band,
                req.round,
                content_type,
                req.detection_feedback,
                req.platform,
            ),
        ))
    }

    /// Build a translation prompt.
    pub fn translation(&self, content: &str, title: &str) -> Result<InstantiatedPrompt> {
        let content_type = self.classify(title, content);
        let variables = [
            ("content", content.to_string()),
            ("title", title.to_string()),
        ];

        if let Some(prompt) =
            self.stored_prompt(PromptType::Translation, None, content_type, &variables)?
        {
            return Ok(prompt);
        }

        Ok(InstantiatedPrompt::built_in(
            defaults::build_translation_prompt(content, title, content_type),
        ))
    }

    /// Build a creation prompt for a topic article.
    pub fn creation(
        &self,
        topic: &str,
        keywords: &[String],
        requirements: &str,
        target_length: TargetLength,
        prompt_id: Option<i64>,
    ) -> Result<InstantiatedPrompt> {
        let variables = [
            ("topic", topic.to_string()),
            // Role-play templates often call the slot `title`
            ("title", topic.to_string()),
            ("keywords", keywords.join(", ")),
            (
                "requirements",
                if requirements.is_empty() {
                    "请创作一篇高质量的文章。".to_string()
                } else {
                    requirements.to_string()
                },
            ),
            ("target_length", target_length.char_range().to_string()),
        ];

        if let Some(prompt) =
            self.stored_prompt(PromptType::Creation, prompt_id, ContentType::General, &variables)?
        {
            return Ok(prompt);
        }

        Ok(InstantiatedPrompt::built_in(defaults::build_creation_prompt(
            topic,
            keywords,
            requirements,
            target_length,
        )))
    }

    /// Build the detector-surface re-optimisation prompt.
    pub fn ai_reduction(
        &self,
        content: &str,
        title: &str,
        round: u32,
    ) -> Result<InstantiatedPrompt> {
        let content_type = self.classify(title, content);
        let variables = [
            ("content", content.to_string()),
            (
                "objective",
                defaults::optimization_objective(OptimizationBand::Heavy, round),
            ),
            (
                "level_requirements",
                defaults::level_requirements_text(OptimizationBand::Heavy),
            ),
        ];

        if let Some(prompt) =
            self.stored_prompt(PromptType::AiReduction, None, content_type, &variables)?
        {
            return Ok(prompt);
        }

        Ok(InstantiatedPrompt::built_in(
            defaults::build_ai_reduction_prompt(content, content_type, round),
        ))
    }

    /// Selection order: explicit id, then the active template of the
    /// stage with the highest priority whose content type matches
    /// (most recently created on ties), then nothing.
    fn stored_prompt(
        &self,
        stage: PromptType,
        prompt_id: Option<i64>,
        content_type: ContentType,
        variables: &[(&str, String)],
    ) -> Result<Option<InstantiatedPrompt>> {
        if let Some(id) = prompt_id {
            match self.store.get_template(id) {
                Ok(template) if template.is_active => {
                    info!(template = %template.name, id, "using explicitly selected template");
                    return Ok(Some(InstantiatedPrompt {
                        text: fill_variables(&template.template, variables),
                        template_id: Some(template.id),
                    }));
                }
                Ok(template) => {
                    warn!(template = %template.name, id, "selected template is inactive, falling back");
                }
                Err(e) => {
                    warn!(id, error = %e, "selected template unavailable, falling back");
                }
            }
        }

        let mut candidates = self.store.select_templates(
            stage,
            &TemplateFilter {
                content_type: Some(content_type),
                active_only: true,
            },
        )?;
        if candidates.is_empty() {
            // Any active template of the stage beats the hard-coded prose
            candidates = self.store.select_templates(
                stage,
                &TemplateFilter {
                    content_type: None,
                    active_only: true,
                },
            )?;
        }

        match candidates.into_iter().next() {
            Some(template) => {
                debug!(template = %template.name, stage = %stage, "using stored template");
                Ok(Some(InstantiatedPrompt {
                    text: fill_variables(&template.template, variables),
                    template_id: Some(template.id),
                }))
            }
            None => {
                debug!(stage = %stage, "no stored template, using built-in default");
                Ok(None)
            }
        }
    }
}

/// Replace `{name}` slots. A template that references a variable the
/// caller did not supply is returned untouched.
pub fn fill_variables(template: &str, variables: &[(&str, String)]) -> String {
    let placeholder = Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static regex");

    for capture in placeholder.captures_iter(template) {
        let name = &capture[1];
        if !variables.iter().any(|(n, _)| *n == name) {
            warn!(placeholder = name, "unknown template placeholder, returning template unchanged");
            return template.to_string();
        }
    }

    let mut filled = template.to_string();
    for (name, value) in variables {
        filled = filled.replace(&format!("{{{name}}}"), value);
    }
    filled
}
