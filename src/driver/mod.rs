//! Browser driver seam.
//!
//! The engine talks to the browser only through [`BrowserDriver`] and
//! [`PageDriver`]. [`EokaDriver`] drives Chrome over CDP; tests script their
//! own pages.

mod eoka;

pub use self::eoka::EokaDriver;
pub use crate::locate::Locator;

use crate::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How to launch a browser session.
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    pub headless: bool,
    /// Delay inserted before each page operation.
    pub slow_mo: Duration,
    pub viewport: Option<(u32, u32)>,
    pub proxy: Option<String>,
    pub user_agent: Option<String>,
    /// Where the session video should be recorded, if the driver records.
    pub video_dir: Option<PathBuf>,
}

/// Launches isolated browser sessions.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Start one browser with one context and one page. The returned page
    /// owns the whole session.
    async fn launch(&self, opts: &LaunchOptions) -> Result<Box<dyn PageDriver>>;
}

/// State to wait for on a located element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementState {
    /// Present in the DOM.
    Attached,
    Visible,
    Hidden,
    /// Absent from the DOM.
    Detached,
}

/// How a click is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickMode {
    /// Real input events after actionability checks.
    Normal,
    /// Real input events, skipping visibility/animation checks.
    Forced,
    /// `element.click()` in page.
    Programmatic,
    /// Synthetic mouse events dispatched on the element.
    DispatchEvent,
}

impl ClickMode {
    pub const ALL: [ClickMode; 4] = [
        ClickMode::Normal,
        ClickMode::Forced,
        ClickMode::Programmatic,
        ClickMode::DispatchEvent,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Forced => "forced",
            Self::Programmatic => "programmatic",
            Self::DispatchEvent => "dispatch",
        }
    }
}

/// Snapshot of one element's interactive state.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ElementInfo {
    pub tag: String,
    pub visible: bool,
    pub disabled: bool,
    pub read_only: bool,
    pub class_name: String,
    pub aria_selected: Option<String>,
    pub aria_checked: Option<String>,
    pub aria_pressed: Option<String>,
    pub aria_current: Option<String>,
    pub checked: bool,
    pub input_type: Option<String>,
    /// Font weight from computed style, when the driver reports it.
    pub font_weight: Option<u16>,
}

const SELECTED_CLASSES: &[&str] = &[
    "selected",
    "active",
    "checked",
    "mui-selected",
    "mui-checked",
    "ant-select-item-option-selected",
    "ant-menu-item-selected",
    "ant-radio-button-wrapper-checked",
    "is-active",
    "current",
];

impl ElementInfo {
    /// Whether the element already shows a selected/active state.
    pub fn looks_selected(&self) -> bool {
        let truthy = |v: &Option<String>| {
            v.as_deref()
                .map(|s| !s.eq_ignore_ascii_case("false") && !s.is_empty())
                .unwrap_or(false)
        };
        if truthy(&self.aria_selected)
            || truthy(&self.aria_checked)
            || truthy(&self.aria_pressed)
            || truthy(&self.aria_current)
            || self.checked
        {
            return true;
        }
        let class = self.class_name.to_lowercase();
        if class
            .split_whitespace()
            .any(|c| SELECTED_CLASSES.iter().any(|s| c == *s || c.ends_with(&format!("-{}", s))))
        {
            return true;
        }
        self.font_weight.map(|w| w >= 600).unwrap_or(false) && self.tag == "option"
    }

    /// Whether text can be typed into this element.
    pub fn is_fillable(&self) -> bool {
        self.visible && !self.disabled && !self.read_only
    }
}

/// One live page. Locator operations address the `nth` (zero-based) match.
#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn goto(&self, url: &str) -> Result<()>;
    async fn back(&self) -> Result<()>;
    async fn reload(&self) -> Result<()>;
    async fn url(&self) -> Result<String>;
    async fn title(&self) -> Result<String>;
    /// Visible text of the document body.
    async fn body_text(&self) -> Result<String>;
    /// Evaluate a script expression and return its JSON value.
    async fn evaluate(&self, script: &str) -> Result<serde_json::Value>;

    /// Number of elements matching the locator.
    async fn count(&self, locator: &Locator) -> Result<usize>;
    /// Wait until the `nth` match reaches `state`; `Ok(false)` on timeout.
    async fn wait_for(
        &self,
        locator: &Locator,
        nth: usize,
        state: ElementState,
        timeout: Duration,
    ) -> Result<bool>;
    /// Inspect the `nth` match, `None` if it does not exist.
    async fn inspect(&self, locator: &Locator, nth: usize) -> Result<Option<ElementInfo>>;
    async fn click(
        &self,
        locator: &Locator,
        nth: usize,
        mode: ClickMode,
        timeout: Duration,
    ) -> Result<()>;
    async fn fill(&self, locator: &Locator, nth: usize, value: &str, timeout: Duration)
        -> Result<()>;
    async fn set_input_file(&self, locator: &Locator, nth: usize, path: &Path) -> Result<()>;
    async fn scroll_into_view(&self, locator: &Locator, nth: usize) -> Result<()>;

    async fn scroll_by(&self, dy: i64) -> Result<()>;
    async fn scroll_to_top(&self) -> Result<()>;
    /// Wait for the network to go quiet; `Ok(false)` if it never did.
    async fn wait_for_network_idle(&self, idle: Duration, timeout: Duration) -> Result<bool>;
    /// Number of frames in the page, main frame included.
    async fn frame_count(&self) -> Result<usize>;
    async fn screenshot(&self) -> Result<Vec<u8>>;

    /// Finalize the session video to `dest`.
    async fn save_video(&self, dest: &Path) -> Result<PathBuf>;
    async fn is_closed(&self) -> bool;
    /// Close the page, its context and its browser.
    async fn close(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selected_by_aria() {
        let info = ElementInfo {
            aria_selected: Some("true".into()),
            ..Default::default()
        };
        assert!(info.looks_selected());
        let info = ElementInfo {
            aria_selected: Some("false".into()),
            ..Default::default()
        };
        assert!(!info.looks_selected());
    }

    #[test]
    fn selected_by_class() {
        let info = ElementInfo {
            class_name: "MuiMenuItem-root Mui-selected".into(),
            ..Default::default()
        };
        assert!(info.looks_selected());
        let info = ElementInfo {
            class_name: "nav-item active".into(),
            ..Default::default()
        };
        assert!(info.looks_selected());
        let info = ElementInfo {
            class_name: "inactive-row unselected-ish".into(),
            ..Default::default()
        };
        assert!(!info.looks_selected());
    }

    #[test]
    fn element_info_from_json() {
        let info: ElementInfo = serde_json::from_str(
            r#"{"tag":"input","visible":true,"readOnly":true,"className":"x","inputType":"email"}"#,
        )
        .unwrap();
        assert_eq!(info.tag, "input");
        assert!(info.read_only);
        assert!(!info.is_fillable());
        assert_eq!(info.input_type.as_deref(), Some("email"));
    }
}
