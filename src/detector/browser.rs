//! Controlled-browser interface the detector driver submits through.
//!
//! The browser itself is an external collaborator. The driver only needs
//! page-level operations; a vendor implementation binds them to a real
//! automation backend, tests script them.

use async_trait::async_trait;

use crate::error::Result;
use crate::identity::Identity;

/// How to find an element on the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// All elements of a tag, e.g. `textarea`
    Tag(String),
    /// CSS selector
    Css(String),
    /// Element whose visible text contains the given label
    Text(String),
}

impl Locator {
    pub fn tag(name: impl Into<String>) -> Self {
        Self::Tag(name.into())
    }

    pub fn css(selector: impl Into<String>) -> Self {
        Self::Css(selector.into())
    }

    pub fn text(label: impl Into<String>) -> Self {
        Self::Text(label.into())
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tag(t) => write!(f, "tag:{t}"),
            Self::Css(s) => write!(f, "css:{s}"),
            Self::Text(t) => write!(f, "text:{t}"),
        }
    }
}

/// Opens browser sessions bound to an identity's fingerprint profile and
/// proxy.
#[async_trait]
pub trait Browser: Send + Sync {
    async fn open(&self, identity: &Identity) -> Result<Box<dyn BrowserSession>>;
}

/// One live page. Sessions are exclusively owned by a single detector
/// call and disposed afterwards.
#[async_trait]
pub trait BrowserSession: Send {
    async fn navigate(&mut self, url: &str) -> Result<()>;

    /// Fill the first element matching the locator. Returns false when
    /// nothing matched.
    async fn fill(&mut self, locator: &Locator, text: &str) -> Result<bool>;

    /// Click the first element matching the locator. Returns false when
    /// nothing matched.
    async fn click(&mut self, locator: &Locator) -> Result<bool>;

    /// Run a fire-and-forget script.
    async fn run_js(&mut self, script: &str) -> Result<()>;

    /// Visible text of the whole page.
    async fn body_text(&mut self) -> Result<String>;

    /// Dispose the session. Must release all resources; never fails.
    async fn close(&mut self);
}
