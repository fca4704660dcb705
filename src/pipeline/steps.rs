//! Processing steps and their status mapping.

use serde::{Deserialize, Serialize};

use crate::model::{ArticleStatus, CreationType};

/// One element of the ordered processing sequence. Detection is not a
/// step of its own: it runs inside `optimize` (URL import) and inside
/// `create` (topic creation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Create,
    Extract,
    Translate,
    Optimize,
    Publish,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Extract => "extract",
            Self::Translate => "translate",
            Self::Optimize => "optimize",
            Self::Publish => "publish",
        }
    }

    /// Article status while this step runs.
    pub fn status(&self) -> ArticleStatus {
        match self {
            Self::Create => ArticleStatus::Creating,
            Self::Extract => ArticleStatus::Extracting,
            Self::Translate => ArticleStatus::Translating,
            Self::Optimize => ArticleStatus::Optimizing,
            Self::Publish => ArticleStatus::Publishing,
        }
    }

    /// Default step sequence for an article, with `publish` appended
    /// when auto-publishing was requested.
    pub fn derive(creation_type: CreationType, auto_publish: bool) -> Vec<Step> {
        let mut steps = match creation_type {
            CreationType::TopicCreation => vec![Step::Create],
            CreationType::UrlImport => vec![Step::Extract, Step::Translate, Step::Optimize],
        };
        if auto_publish && !steps.contains(&Step::Publish) {
            steps.push(Step::Publish);
        }
        steps
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_derive_url_import() {
        assert_eq!(
            Step::derive(CreationType::UrlImport, false),
            vec![Step::Extract, Step::Translate, Step::Optimize]
        );
        assert_eq!(
            Step::derive(CreationType::UrlImport, true),
            vec![Step::Extract, Step::Translate, Step::Optimize, Step::Publish]
        );
    }

    #[test]
    fn test_derive_topic_creation() {
        assert_eq!(Step::derive(CreationType::TopicCreation, false), vec![Step::Create]);
        assert_eq!(
            Step::derive(CreationType::TopicCreation, true),
            vec![Step::Create, Step::Publish]
        );
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(Step::Create.status(), ArticleStatus::Creating);
        assert_eq!(Step::Extract.status(), ArticleStatus::Extracting);
        assert_eq!(Step::Translate.status(), ArticleStatus::Translating);
        assert_eq!(Step::Optimize.status(), ArticleStatus::Optimizing);
        assert_eq!(Step::Publish.status(), ArticleStatus::Publishing);
    }
}
