//! Scripted in-memory browser for engine tests.
//!
//! Elements match `Text` and `Role` locators by their text and role, and
//! `Css`/`XPath` locators only by the exact selector strings they declare.

#![allow(dead_code)]

use async_trait::async_trait;
use eoka_qa::driver::{
    BrowserDriver, ClickMode, ElementInfo, ElementState, LaunchOptions, Locator, PageDriver,
};
use eoka_qa::{EngineSettings, Error, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

const POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Default)]
pub struct El {
    pub name: String,
    pub text: String,
    pub role: Option<String>,
    pub selectors: Vec<String>,
    pub visible: bool,
    pub info: ElementInfo,
}

impl El {
    pub fn new(text: &str) -> Self {
        Self {
            name: text.to_string(),
            text: text.to_string(),
            visible: true,
            ..Default::default()
        }
    }

    pub fn button(text: &str) -> Self {
        Self::new(text).role("button")
    }

    /// An input addressed by one selector.
    pub fn input(name: &str, selector: &str) -> Self {
        let mut el = Self::new("").named(name).selector(selector);
        el.info.tag = "input".into();
        el
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn role(mut self, role: &str) -> Self {
        self.role = Some(role.to_string());
        self
    }

    pub fn selector(mut self, selector: &str) -> Self {
        self.selectors.push(selector.to_string());
        self
    }

    pub fn class(mut self, class: &str) -> Self {
        self.info.class_name = class.to_string();
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.info.disabled = true;
        self
    }

    fn matches(&self, loc: &Locator) -> bool {
        match loc {
            Locator::Css(s) | Locator::XPath(s) => self.selectors.iter().any(|x| x == s),
            Locator::Text { text, exact } => {
                if text.trim().is_empty() || self.text.is_empty() {
                    false
                } else if *exact {
                    self.text.trim() == text.trim()
                } else {
                    self.text.to_lowercase().contains(&text.to_lowercase())
                }
            }
            Locator::Role { role, name } => {
                self.role.as_deref() == Some(role.as_str())
                    && self.text.to_lowercase().contains(&name.to_lowercase())
            }
        }
    }
}

pub type Transition = Arc<dyn Fn(&mut PageState) + Send + Sync>;

#[derive(Default)]
pub struct PageState {
    pub url: String,
    pub title: String,
    pub body_extra: String,
    pub elements: Vec<El>,
    pub frames: usize,
    pub closed: bool,
    pub close_calls: usize,
    pub visited: Vec<String>,
    pub clicks: Vec<(String, ClickMode)>,
    pub fills: Vec<(String, String)>,
    pub files: Vec<(String, PathBuf)>,
    pub on_click: HashMap<String, Transition>,
    /// `goto` never completes.
    pub hang_goto: bool,
    /// The page closes while waiting for network idle.
    pub close_on_idle: bool,
}

impl PageState {
    pub fn remove(&mut self, name: &str) {
        self.elements.retain(|e| e.name != name);
    }

    pub fn add(&mut self, el: El) {
        self.elements.push(el);
    }

    fn matching(&self, loc: &Locator) -> Vec<&El> {
        self.elements.iter().filter(|e| e.matches(loc)).collect()
    }

    fn nth(&self, loc: &Locator, nth: usize) -> Option<&El> {
        self.matching(loc).get(nth).copied()
    }
}

#[derive(Clone)]
pub struct FakePage {
    state: Arc<Mutex<PageState>>,
}

impl Default for FakePage {
    fn default() -> Self {
        Self::new()
    }
}

impl FakePage {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(PageState {
                url: "about:blank".into(),
                frames: 1,
                ..Default::default()
            })),
        }
    }

    pub fn with(self, el: El) -> Self {
        self.state().add(el);
        self
    }

    pub fn with_title(self, title: &str) -> Self {
        self.state().title = title.to_string();
        self
    }

    pub fn with_body(self, body: &str) -> Self {
        self.state().body_extra = body.to_string();
        self
    }

    /// Run `f` on the page after the named element is clicked.
    pub fn on_click(self, name: &str, f: impl Fn(&mut PageState) + Send + Sync + 'static) -> Self {
        self.state().on_click.insert(name.to_string(), Arc::new(f));
        self
    }

    pub fn state(&self) -> MutexGuard<'_, PageState> {
        self.state.lock().unwrap()
    }

    /// Names of clicked elements, in order.
    pub fn clicked(&self) -> Vec<String> {
        self.state().clicks.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn filled(&self) -> Vec<(String, String)> {
        self.state().fills.clone()
    }

    fn check_open(state: &PageState) -> Result<()> {
        if state.closed {
            Err(Error::PageClosed("target closed".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PageDriver for FakePage {
    async fn goto(&self, url: &str) -> Result<()> {
        let hang = {
            let mut s = self.state();
            Self::check_open(&s)?;
            s.visited.push(url.to_string());
            s.hang_goto
        };
        if hang {
            std::future::pending::<()>().await;
        }
        self.state().url = url.to_string();
        Ok(())
    }

    async fn back(&self) -> Result<()> {
        Self::check_open(&self.state())
    }

    async fn reload(&self) -> Result<()> {
        Self::check_open(&self.state())
    }

    async fn url(&self) -> Result<String> {
        let s = self.state();
        Self::check_open(&s)?;
        Ok(s.url.clone())
    }

    async fn title(&self) -> Result<String> {
        let s = self.state();
        Self::check_open(&s)?;
        Ok(s.title.clone())
    }

    async fn body_text(&self) -> Result<String> {
        let s = self.state();
        Self::check_open(&s)?;
        let mut parts: Vec<&str> = s
            .elements
            .iter()
            .filter(|e| e.visible && !e.text.is_empty())
            .map(|e| e.text.as_str())
            .collect();
        parts.push(&s.body_extra);
        Ok(parts.join("\n"))
    }

    async fn evaluate(&self, _script: &str) -> Result<serde_json::Value> {
        Self::check_open(&self.state())?;
        Ok(serde_json::Value::Null)
    }

    async fn count(&self, locator: &Locator) -> Result<usize> {
        let s = self.state();
        Self::check_open(&s)?;
        Ok(s.matching(locator).len())
    }

    async fn wait_for(
        &self,
        locator: &Locator,
        nth: usize,
        state: ElementState,
        timeout: Duration,
    ) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            let satisfied = {
                let s = self.state();
                Self::check_open(&s)?;
                let el = s.nth(locator, nth);
                match state {
                    ElementState::Attached => el.is_some(),
                    ElementState::Visible => el.is_some_and(|e| e.visible),
                    ElementState::Hidden => el.map_or(true, |e| !e.visible),
                    ElementState::Detached => el.is_none(),
                }
            };
            if satisfied {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(POLL).await;
        }
    }

    async fn inspect(&self, locator: &Locator, nth: usize) -> Result<Option<ElementInfo>> {
        let s = self.state();
        Self::check_open(&s)?;
        Ok(s.nth(locator, nth).map(|e| ElementInfo {
            visible: e.visible,
            ..e.info.clone()
        }))
    }

    async fn click(
        &self,
        locator: &Locator,
        nth: usize,
        mode: ClickMode,
        _timeout: Duration,
    ) -> Result<()> {
        let mut s = self.state();
        Self::check_open(&s)?;
        let el = s
            .nth(locator, nth)
            .ok_or_else(|| Error::Driver(format!("no element for {}", locator)))?;
        if mode == ClickMode::Normal && !el.visible {
            return Err(Error::Driver(format!("element not visible: {}", locator)));
        }
        let name = el.name.clone();
        s.clicks.push((name.clone(), mode));
        let transition = s.on_click.get(&name).cloned();
        if let Some(t) = transition {
            t(&mut *s);
        }
        if s.closed {
            return Err(Error::PageClosed("target closed during navigation".into()));
        }
        Ok(())
    }

    async fn fill(&self, locator: &Locator, nth: usize, value: &str, _timeout: Duration) -> Result<()> {
        let mut s = self.state();
        Self::check_open(&s)?;
        let el = s
            .nth(locator, nth)
            .ok_or_else(|| Error::Driver(format!("no element for {}", locator)))?;
        if !el.visible || el.info.disabled {
            return Err(Error::Driver(format!("element not editable: {}", locator)));
        }
        let name = el.name.clone();
        s.fills.push((name, value.to_string()));
        Ok(())
    }

    async fn set_input_file(&self, locator: &Locator, nth: usize, path: &Path) -> Result<()> {
        let mut s = self.state();
        Self::check_open(&s)?;
        let name = s
            .nth(locator, nth)
            .map(|e| e.name.clone())
            .ok_or_else(|| Error::Driver(format!("no element for {}", locator)))?;
        s.files.push((name, path.to_path_buf()));
        Ok(())
    }

    async fn scroll_into_view(&self, _locator: &Locator, _nth: usize) -> Result<()> {
        Self::check_open(&self.state())
    }

    async fn scroll_by(&self, _dy: i64) -> Result<()> {
        Self::check_open(&self.state())
    }

    async fn scroll_to_top(&self) -> Result<()> {
        Self::check_open(&self.state())
    }

    async fn wait_for_network_idle(&self, _idle: Duration, _timeout: Duration) -> Result<bool> {
        let mut s = self.state();
        Self::check_open(&s)?;
        if s.close_on_idle {
            s.closed = true;
            return Err(Error::PageClosed("target closed".into()));
        }
        Ok(true)
    }

    async fn frame_count(&self) -> Result<usize> {
        let s = self.state();
        Self::check_open(&s)?;
        Ok(s.frames)
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        Self::check_open(&self.state())?;
        Ok(b"\x89PNG".to_vec())
    }

    async fn save_video(&self, _dest: &Path) -> Result<PathBuf> {
        Err(Error::Unsupported("video recording"))
    }

    async fn is_closed(&self) -> bool {
        self.state().closed
    }

    async fn close(&self) -> Result<()> {
        let mut s = self.state();
        s.close_calls += 1;
        s.closed = true;
        Ok(())
    }
}

type Factory = Box<dyn Fn() -> FakePage + Send + Sync>;

/// Hands out pages from a factory and remembers them.
pub struct FakeDriver {
    factory: Factory,
    pub launched: Mutex<Vec<FakePage>>,
    pub fail_launch: bool,
}

impl FakeDriver {
    /// Every launch gets a fresh page from `factory`.
    pub fn new(factory: impl Fn() -> FakePage + Send + Sync + 'static) -> Self {
        Self {
            factory: Box::new(factory),
            launched: Mutex::new(Vec::new()),
            fail_launch: false,
        }
    }

    /// Every launch shares `page`.
    pub fn serving(page: FakePage) -> Self {
        Self::new(move || page.clone())
    }

    pub fn failing() -> Self {
        Self {
            fail_launch: true,
            ..Self::new(FakePage::new)
        }
    }

    pub fn pages(&self) -> Vec<FakePage> {
        self.launched.lock().unwrap().clone()
    }
}

#[async_trait]
impl BrowserDriver for FakeDriver {
    async fn launch(&self, _opts: &LaunchOptions) -> Result<Box<dyn PageDriver>> {
        if self.fail_launch {
            return Err(Error::Driver("chrome not found".into()));
        }
        let page = (self.factory)();
        self.launched.lock().unwrap().push(page.clone());
        Ok(Box::new(page))
    }
}

/// Settings writing artifacts into a temporary directory.
pub fn settings(dir: &Path) -> EngineSettings {
    EngineSettings {
        video_dir: dir.join("videos"),
        screenshot_dir: dir.join("screenshots"),
        upload_dir: dir.join("uploads"),
        ..Default::default()
    }
}
