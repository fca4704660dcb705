//! Detector driver.
//!
//! Submits text to the external AI detector through a controlled browser
//! session bound to the current identity, scans page text for quota and
//! verification walls, and reads the probability back. This module is
//! the only place that inspects detector page text; callers see typed
//! errors and numbers.

mod browser;
mod driver;
mod signals;

pub use browser::{Browser, BrowserSession, Locator};
pub use driver::{AiDetector, Detection, DetectionStatus, DetectorConfig, WebDetector};
pub use signals::{contains_any, parse_ai_probability, scan_signals, PageSignal};
