//! Optimization band derivation and content-type classification.

use serde::{Deserialize, Serialize};

use crate::model::ContentType;

/// Rewrite strength derived from the measured AI probability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationBand {
    /// Cosmetic humanisation, structure preserved
    Light,
    /// Sentence-level rewrite with added voice
    Standard,
    /// Deep restructure with subjective colour
    Heavy,
}

impl OptimizationBand {
    /// Derive the band for a probability and optimisation round.
    /// Round two onwards never drops below `standard`.
    pub fn derive(ai_probability: f64, round: u32) -> Self {
        let band = if ai_probability > 50.0 {
            Self::Heavy
        } else if ai_probability >= 25.0 {
            Self::Standard
        } else {
            Self::Light
        };

        if round >= 2 && band == Self::Light {
            Self::Standard
        } else {
            band
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Standard => "standard",
            Self::Heavy => "heavy",
        }
    }
}

impl std::fmt::Display for OptimizationBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Keyword seeds for content-type classification. Substring match,
/// case-insensitive, over the title plus the first 500 characters of
/// content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub technical: Vec<String>,
    pub tutorial: Vec<String>,
    pub news: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            technical: [
                "ai",
                "machine learning",
                "deep learning",
                "neural network",
                "algorithm",
                "programming",
                "python",
                "javascript",
                "api",
                "database",
                "sql",
                "cloud",
                "docker",
                "kubernetes",
                "microservices",
                "devops",
                "blockchain",
                "cryptocurrency",
                "web3",
                "smart contract",
                "人工智能",
                "机器学习",
                "深度学习",
                "神经网络",
                "算法",
                "编程",
                "代码",
                "开发",
                "技术",
                "软件",
                "数据库",
                "云计算",
                "区块链",
            ]
            .map(String::from)
            .to_vec(),
            tutorial: [
                "how to",
                "tutorial",
                "guide",
                "step by step",
                "learn",
                "beginner",
                "introduction",
                "getting started",
                "basics",
                "教程",
                "指南",
                "入门",
                "学习",
                "如何",
                "怎么",
                "步骤",
            ]
            .map(String::from)
            .to_vec(),
            news: [
                "news",
                "breaking",
                "report",
                "announcement",
                "release",
                "update",
                "latest",
                "today",
                "yesterday",
                "新闻",
                "报道",
                "发布",
                "更新",
                "最新",
                "今日",
                "昨日",
            ]
            .map(String::from)
            .to_vec(),
        }
    }
}

/// Classifies a (title, content) pair into a coarse content type.
#[derive(Debug, Clone, Default)]
pub struct ContentClassifier {
    config: ClassifierConfig,
}

impl ContentClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    /// Technical wins at two or more hits; tutorial and news at one;
    /// anything else is general.
    pub fn classify(&self, title: &str, content: &str) -> ContentType {
        let title = title.to_lowercase();
        let head: String = content.chars().take(500).collect::<String>().to_lowercase();

        let hits = |keywords: &[String]| {
            keywords
                .iter()
                .filter(|k| title.contains(k.as_str()) || head.contains(k.as_str()))
                .count()
        };

        if hits(&self.config.technical) >= 2 {
            ContentType::Technical
        } else if hits(&self.config.tutorial) >= 1 {
            ContentType::Tutorial
        } else if hits(&self.config.news) >= 1 {
            ContentType::News
        } else {
            ContentType::General
        }
    }
}
