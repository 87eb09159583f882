//! Chrome backend on the `eoka` CDP client.
//!
//! Locators are resolved in page by injected JS that returns a unique CSS path
//! for the chosen match; real clicks and typing then go through eoka.

use super::{BrowserDriver, ClickMode, ElementInfo, ElementState, LaunchOptions, Locator, PageDriver};
use crate::{Error, Result};
use async_trait::async_trait;
use base64::Engine as _;
use eoka::{Browser, Page, StealthConfig};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::debug;

const POLL: Duration = Duration::from_millis(100);

/// Shared in-page helpers: locator evaluation, visibility, unique selectors.
const LOCATE_PRELUDE: &str = r#"
const __norm = s => (s || '').replace(/\s+/g, ' ').trim();
const __lc = s => __norm(s).toLowerCase();
const __IMPLICIT = {
    button: 'button, input[type="button"], input[type="submit"], input[type="reset"], [role="button"]',
    link: 'a[href], [role="link"]',
    tab: '[role="tab"]',
    option: 'option, [role="option"]',
    menuitem: '[role="menuitem"], [role="menuitemcheckbox"], [role="menuitemradio"]',
    heading: 'h1, h2, h3, h4, h5, h6, [role="heading"]',
    combobox: 'select, [role="combobox"]',
    textbox: 'input:not([type]), input[type="text"], input[type="email"], input[type="password"], input[type="search"], textarea, [role="textbox"]'
};
const __SKIP = new Set(['SCRIPT', 'STYLE', 'NOSCRIPT', 'TEMPLATE', 'HEAD']);

function __visible(el) {
    const r = el.getBoundingClientRect();
    const s = getComputedStyle(el);
    return r.width > 0 && r.height > 0 && s.visibility !== 'hidden' && s.display !== 'none';
}

function __name(el) {
    const by = el.getAttribute('aria-labelledby');
    if (by) {
        const l = document.getElementById(by);
        if (l) return l.innerText || l.textContent;
    }
    return el.getAttribute('aria-label') || el.innerText || el.value || el.title || el.getAttribute('alt') || '';
}

function __uniqueId(el) {
    if (!el.id) return null;
    const sel = '#' + CSS.escape(el.id);
    return document.querySelectorAll(sel).length === 1 ? sel : null;
}

function __selector(el) {
    const own = __uniqueId(el);
    if (own) return own;
    const path = [];
    let n = el;
    while (n && n.nodeType === 1) {
        let s = n.tagName.toLowerCase();
        const anchor = __uniqueId(n);
        if (anchor) { path.unshift(anchor); break; }
        const p = n.parentElement;
        if (p) {
            const sibs = [...p.children].filter(c => c.tagName === n.tagName);
            if (sibs.length > 1) s += ':nth-of-type(' + (sibs.indexOf(n) + 1) + ')';
        }
        path.unshift(s);
        n = p;
    }
    return path.join(' > ');
}

function __find(loc) {
    switch (loc.kind) {
        case 'css':
            return [...document.querySelectorAll(loc.value)];
        case 'xpath': {
            const out = [];
            const r = document.evaluate(loc.value, document, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
            for (let i = 0; i < r.snapshotLength; i++) {
                const n = r.snapshotItem(i);
                if (n.nodeType === 1) out.push(n);
            }
            return out;
        }
        case 'text': {
            const want = loc.exact ? __norm(loc.value) : __lc(loc.value);
            const hits = [...document.body.querySelectorAll('*')].filter(el => {
                if (__SKIP.has(el.tagName)) return false;
                const raw = el.innerText ?? el.textContent;
                return loc.exact ? __norm(raw) === want : __lc(raw).includes(want);
            });
            const set = new Set(hits);
            return hits.filter(el => ![...el.children].some(c => set.has(c)));
        }
        case 'role': {
            const sel = __IMPLICIT[loc.role] || '[role="' + loc.role + '"]';
            const want = __lc(loc.name);
            return [...document.querySelectorAll(sel)].filter(el => __lc(__name(el)).includes(want));
        }
    }
    return [];
}
"#;

const STATE_JS: &str = r#"
const el = __find(LOC)[NTH];
return !el ? 'detached' : (__visible(el) ? 'visible' : 'hidden');
"#;

const INSPECT_JS: &str = r#"
const el = __find(LOC)[NTH];
if (!el) return null;
const s = getComputedStyle(el);
const attr = n => el.getAttribute(n);
return {
    tag: el.tagName.toLowerCase(),
    visible: __visible(el),
    disabled: !!el.disabled || attr('aria-disabled') === 'true',
    readOnly: !!el.readOnly || attr('aria-readonly') === 'true',
    className: typeof el.className === 'string' ? el.className : (attr('class') || ''),
    ariaSelected: attr('aria-selected'),
    ariaChecked: attr('aria-checked'),
    ariaPressed: attr('aria-pressed'),
    ariaCurrent: attr('aria-current'),
    checked: !!el.checked || (el.tagName === 'OPTION' && !!el.selected),
    inputType: el.tagName === 'INPUT' ? (attr('type') || 'text') : null,
    fontWeight: parseInt(s.fontWeight, 10) || null
};
"#;

const SELECTOR_JS: &str = r#"
const el = __find(LOC)[NTH];
if (!el) return null;
el.scrollIntoView({ block: 'center', inline: 'center' });
return __selector(el);
"#;

const PROGRAMMATIC_CLICK_JS: &str = r#"
const el = __find(LOC)[NTH];
if (!el) return false;
el.click();
return true;
"#;

const DISPATCH_CLICK_JS: &str = r#"
const el = __find(LOC)[NTH];
if (!el) return false;
const r = el.getBoundingClientRect();
const opts = { bubbles: true, cancelable: true, view: window, clientX: r.x + r.width / 2, clientY: r.y + r.height / 2 };
for (const type of ['pointerdown', 'mousedown', 'pointerup', 'mouseup', 'click']) {
    const Ctor = type.startsWith('pointer') && window.PointerEvent ? PointerEvent : MouseEvent;
    el.dispatchEvent(new Ctor(type, opts));
}
return true;
"#;

const SCROLL_INTO_VIEW_JS: &str = r#"
const el = __find(LOC)[NTH];
if (!el) return false;
el.scrollIntoView({ block: 'center', inline: 'center' });
return true;
"#;

const SET_FILE_JS: &str = r#"
const el = __find(LOC)[NTH];
if (!el) return 'element_not_found';
if (el.tagName !== 'INPUT' || el.type !== 'file') return 'not_file_input';
const bin = atob(ARGS.data);
const bytes = new Uint8Array(bin.length);
for (let i = 0; i < bin.length; i++) bytes[i] = bin.charCodeAt(i);
const dt = new DataTransfer();
dt.items.add(new File([bytes], ARGS.name, { type: ARGS.mime }));
el.files = dt.files;
el.dispatchEvent(new Event('input', { bubbles: true }));
el.dispatchEvent(new Event('change', { bubbles: true }));
return 'ok';
"#;

/// Build a script that runs `body` with `LOC`, `NTH` and `ARGS` bound.
fn locator_script(body: &str, locator: &Locator, nth: usize, args: Value) -> String {
    format!(
        "(() => {{ {prelude}\nconst LOC = {loc};\nconst NTH = {nth};\nconst ARGS = {args};\n{body} }})()",
        prelude = LOCATE_PRELUDE,
        loc = locator_json(locator),
        nth = nth,
        args = args,
        body = body,
    )
}

fn locator_json(locator: &Locator) -> Value {
    match locator {
        Locator::Css(s) => json!({ "kind": "css", "value": s }),
        Locator::XPath(s) => json!({ "kind": "xpath", "value": s }),
        Locator::Text { text, exact } => json!({ "kind": "text", "value": text, "exact": exact }),
        Locator::Role { role, name } => json!({ "kind": "role", "role": role, "name": name }),
    }
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("pdf") => "application/pdf",
        Some("csv") => "text/csv",
        Some("json") => "application/json",
        Some("txt") => "text/plain",
        Some("zip") => "application/zip",
        _ => "application/octet-stream",
    }
}

/// Launches Chrome sessions through eoka.
#[derive(Debug, Clone, Default)]
pub struct EokaDriver;

impl EokaDriver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BrowserDriver for EokaDriver {
    async fn launch(&self, opts: &LaunchOptions) -> Result<Box<dyn PageDriver>> {
        let (width, height) = opts.viewport.unwrap_or((1280, 720));
        let stealth = StealthConfig {
            headless: opts.headless,
            proxy: opts.proxy.clone(),
            user_agent: opts.user_agent.clone(),
            viewport_width: width,
            viewport_height: height,
            ..Default::default()
        };

        debug!(
            "Launching browser (headless: {}, proxy: {:?})",
            opts.headless, opts.proxy
        );
        if let Some(ref dir) = opts.video_dir {
            debug!("video capture requested at {} (not recorded by eoka)", dir.display());
        }
        let browser = Browser::launch_with_config(stealth).await?;
        let page = browser.new_page("about:blank").await?;

        Ok(Box::new(EokaPage {
            session: Mutex::new(Some(Session { browser, page })),
            slow_mo: opts.slow_mo,
        }))
    }
}

struct Session {
    browser: Browser,
    page: Page,
}

/// One eoka browser session, closed at most once.
pub struct EokaPage {
    session: Mutex<Option<Session>>,
    slow_mo: Duration,
}

impl EokaPage {
    async fn pace(&self) {
        if !self.slow_mo.is_zero() {
            tokio::time::sleep(self.slow_mo).await;
        }
    }

    /// The live page, or `PageClosed` once the session is gone.
    async fn page(&self) -> Result<MappedMutexGuard<'_, Page>> {
        let guard = self.session.lock().await;
        MutexGuard::try_map(guard, |s| s.as_mut().map(|s| &mut s.page))
            .map_err(|_| Error::PageClosed("session closed".into()))
    }

    async fn eval<T: serde::de::DeserializeOwned>(&self, js: &str) -> Result<T> {
        Ok(self.page().await?.evaluate::<T>(js).await?)
    }

    async fn element_state(&self, locator: &Locator, nth: usize) -> Result<ElementState> {
        let state: String = self
            .eval(&locator_script(STATE_JS, locator, nth, Value::Null))
            .await?;
        Ok(match state.as_str() {
            "visible" => ElementState::Visible,
            "hidden" => ElementState::Hidden,
            _ => ElementState::Detached,
        })
    }

    /// Unique CSS path for the `nth` match, scrolled into view.
    async fn unique_selector(&self, locator: &Locator, nth: usize) -> Result<String> {
        let sel: Option<String> = self
            .eval(&locator_script(SELECTOR_JS, locator, nth, Value::Null))
            .await?;
        sel.ok_or_else(|| Error::Driver(format!("element not found: {} [{}]", locator, nth)))
    }

    async fn run_bool(&self, body: &str, locator: &Locator, nth: usize) -> Result<()> {
        let ok: bool = self
            .eval(&locator_script(body, locator, nth, Value::Null))
            .await?;
        if ok {
            Ok(())
        } else {
            Err(Error::Driver(format!("element not found: {} [{}]", locator, nth)))
        }
    }
}

fn state_matches(want: ElementState, got: ElementState) -> bool {
    match want {
        ElementState::Attached => got != ElementState::Detached,
        ElementState::Visible => got == ElementState::Visible,
        ElementState::Hidden => got != ElementState::Visible,
        ElementState::Detached => got == ElementState::Detached,
    }
}

#[async_trait]
impl PageDriver for EokaPage {
    async fn goto(&self, url: &str) -> Result<()> {
        self.pace().await;
        Ok(self.page().await?.goto(url).await?)
    }

    async fn back(&self) -> Result<()> {
        Ok(self.page().await?.back().await?)
    }

    async fn reload(&self) -> Result<()> {
        Ok(self.page().await?.reload().await?)
    }

    async fn url(&self) -> Result<String> {
        Ok(self.page().await?.url().await?)
    }

    async fn title(&self) -> Result<String> {
        Ok(self.page().await?.title().await?)
    }

    async fn body_text(&self) -> Result<String> {
        Ok(self.page().await?.text().await?)
    }

    async fn evaluate(&self, script: &str) -> Result<Value> {
        self.eval::<Value>(script).await
    }

    async fn count(&self, locator: &Locator) -> Result<usize> {
        self.eval(&locator_script("return __find(LOC).length;", locator, 0, Value::Null))
            .await
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
            let got = self.element_state(locator, nth).await?;
            if state_matches(state, got) {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(POLL).await;
        }
    }

    async fn inspect(&self, locator: &Locator, nth: usize) -> Result<Option<ElementInfo>> {
        self.eval(&locator_script(INSPECT_JS, locator, nth, Value::Null))
            .await
    }

    async fn click(
        &self,
        locator: &Locator,
        nth: usize,
        mode: ClickMode,
        timeout: Duration,
    ) -> Result<()> {
        self.pace().await;
        match mode {
            ClickMode::Normal => {
                if !self
                    .wait_for(locator, nth, ElementState::Visible, timeout)
                    .await?
                {
                    return Err(Error::Driver(format!(
                        "not visible after {}ms: {}",
                        timeout.as_millis(),
                        locator
                    )));
                }
                let sel = self.unique_selector(locator, nth).await?;
                Ok(self.page().await?.click(&sel).await?)
            }
            ClickMode::Forced => {
                let sel = self.unique_selector(locator, nth).await?;
                Ok(self.page().await?.click(&sel).await?)
            }
            ClickMode::Programmatic => self.run_bool(PROGRAMMATIC_CLICK_JS, locator, nth).await,
            ClickMode::DispatchEvent => self.run_bool(DISPATCH_CLICK_JS, locator, nth).await,
        }
    }

    async fn fill(
        &self,
        locator: &Locator,
        nth: usize,
        value: &str,
        timeout: Duration,
    ) -> Result<()> {
        self.pace().await;
        if !self
            .wait_for(locator, nth, ElementState::Visible, timeout)
            .await?
        {
            return Err(Error::Driver(format!(
                "not visible after {}ms: {}",
                timeout.as_millis(),
                locator
            )));
        }
        let sel = self.unique_selector(locator, nth).await?;
        Ok(self.page().await?.fill(&sel, value).await?)
    }

    async fn set_input_file(&self, locator: &Locator, nth: usize, path: &Path) -> Result<()> {
        let data = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload")
            .to_string();
        let args = json!({
            "data": base64::engine::general_purpose::STANDARD.encode(&data),
            "name": name,
            "mime": mime_for(path),
        });
        let outcome: String = self
            .eval(&locator_script(SET_FILE_JS, locator, nth, args))
            .await?;
        match outcome.as_str() {
            "ok" => Ok(()),
            "not_file_input" => Err(Error::ActionFailed(format!(
                "{} is not a file input",
                locator
            ))),
            _ => Err(Error::Driver(format!("element not found: {} [{}]", locator, nth))),
        }
    }

    async fn scroll_into_view(&self, locator: &Locator, nth: usize) -> Result<()> {
        self.run_bool(SCROLL_INTO_VIEW_JS, locator, nth).await
    }

    async fn scroll_by(&self, dy: i64) -> Result<()> {
        let js = format!("window.scrollBy(0, {})", dy);
        Ok(self.page().await?.execute(&js).await?)
    }

    async fn scroll_to_top(&self) -> Result<()> {
        Ok(self.page().await?.execute("window.scrollTo(0, 0)").await?)
    }

    async fn wait_for_network_idle(&self, idle: Duration, timeout: Duration) -> Result<bool> {
        let (idle_ms, timeout_ms) = (idle.as_millis() as u64, timeout.as_millis() as u64);
        let outcome = self
            .page()
            .await?
            .wait_for_network_idle(idle_ms, timeout_ms)
            .await;
        match outcome.map_err(Error::from) {
            Ok(()) => Ok(true),
            Err(e) if e.is_page_closed() => Err(e),
            Err(e) => {
                debug!("network idle not reached: {}", e);
                Ok(false)
            }
        }
    }

    async fn frame_count(&self) -> Result<usize> {
        self.eval("window.frames.length + 1").await
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        Ok(self.page().await?.screenshot().await?)
    }

    async fn save_video(&self, _dest: &Path) -> Result<PathBuf> {
        Err(Error::Unsupported("video recording"))
    }

    async fn is_closed(&self) -> bool {
        self.session.lock().await.is_none()
    }

    async fn close(&self) -> Result<()> {
        let session = self.session.lock().await.take();
        match session {
            Some(Session { browser, page }) => {
                drop(page);
                browser.close().await?;
                Ok(())
            }
            None => Ok(()),
        }
    }
}
