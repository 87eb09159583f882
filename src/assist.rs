//! Assisted element finding, the fallback after every locator tier fails.
//!
//! [`HeuristicAssist`] enumerates the visible interactive elements of the page
//! and scores each against the target description.

use crate::driver::{ClickMode, Locator, PageDriver};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Fallback collaborator consulted when ordinary resolution is exhausted.
#[async_trait]
pub trait ElementAssist: Send + Sync {
    /// Try to click the element best matching `target`, up to `max_attempts` scans.
    async fn attempt_click(&self, page: &dyn PageDriver, target: &str, max_attempts: u32) -> bool;

    /// Try to fill the input best matching `target`.
    async fn attempt_fill(&self, page: &dyn PageDriver, target: &str, value: &str) -> bool;
}

/// Enumerates interactive elements with their labels and a unique selector.
const SCAN_JS: &str = r#"
(() => {
    const INTERACTIVE = 'a, button, input, select, textarea, [role="button"], [role="link"], [role="tab"], [role="menuitem"], [role="option"], [onclick], [contenteditable="true"]';
    const out = [];
    const seen = new Set();

    function label(el) {
        if (el.id) {
            const l = document.querySelector('label[for=' + JSON.stringify(el.id) + ']');
            if (l) return l.textContent.trim();
        }
        const parent = el.closest('label');
        if (parent) {
            const clone = parent.cloneNode(true);
            clone.querySelectorAll('input, select, textarea').forEach(c => c.remove());
            const t = clone.textContent.trim();
            if (t) return t;
        }
        const by = el.getAttribute('aria-labelledby');
        if (by) {
            const l = document.getElementById(by);
            if (l) return l.textContent.trim();
        }
        const prev = el.previousElementSibling;
        if (prev && prev.tagName === 'LABEL') return prev.textContent.trim();
        return '';
    }

    function uniqueId(el) {
        if (!el.id) return null;
        const sel = '#' + CSS.escape(el.id);
        return document.querySelectorAll(sel).length === 1 ? sel : null;
    }

    function selector(el) {
        const own = uniqueId(el);
        if (own) return own;
        const path = [];
        let n = el;
        while (n && n.nodeType === 1) {
            let s = n.tagName.toLowerCase();
            const anchor = uniqueId(n);
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

    for (const el of document.querySelectorAll(INTERACTIVE)) {
        const r = el.getBoundingClientRect();
        if (r.width < 2 || r.height < 2) continue;
        const s = getComputedStyle(el);
        if (s.display === 'none' || s.visibility === 'hidden' || parseFloat(s.opacity) < 0.1) continue;
        const sel = selector(el);
        if (seen.has(sel)) continue;
        seen.add(sel);
        const tag = el.tagName.toLowerCase();
        let text = (el.innerText || el.textContent || '').trim().replace(/\s+/g, ' ');
        if (text.length > 120) text = text.substring(0, 120);
        out.push({
            tag,
            role: el.getAttribute('role'),
            text,
            label: label(el),
            placeholder: el.getAttribute('placeholder'),
            ariaLabel: el.getAttribute('aria-label'),
            title: el.getAttribute('title'),
            name: el.getAttribute('name'),
            inputType: tag === 'input' ? (el.getAttribute('type') || 'text') : null,
            disabled: !!el.disabled || el.readOnly === true,
            selector: sel
        });
    }
    return out;
})()
"#;

/// One element reported by the page scan.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScannedElement {
    pub tag: String,
    pub role: Option<String>,
    pub text: String,
    pub label: String,
    pub placeholder: Option<String>,
    pub aria_label: Option<String>,
    pub title: Option<String>,
    pub name: Option<String>,
    pub input_type: Option<String>,
    pub disabled: bool,
    pub selector: String,
}

impl ScannedElement {
    fn is_fillable(&self) -> bool {
        !self.disabled
            && match self.tag.as_str() {
                "textarea" => true,
                "input" => !matches!(
                    self.input_type.as_deref(),
                    Some("button" | "submit" | "reset" | "checkbox" | "radio" | "file" | "hidden" | "image")
                ),
                _ => self.role.as_deref() == Some("textbox"),
            }
    }
}

fn words(s: &str) -> Vec<String> {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

fn norm(s: &str) -> String {
    words(s).join(" ")
}

/// Score how well a text field matches the target; 0 when unrelated.
fn text_score(field: &str, target: &str) -> f64 {
    let (f, t) = (norm(field), norm(target));
    if f.is_empty() || t.is_empty() {
        return 0.0;
    }
    if f == t {
        return 100.0;
    }
    if f.contains(&t) {
        // shorter fields containing the target are more specific
        return 60.0 + 20.0 * (t.len() as f64 / f.len() as f64);
    }
    if t.contains(&f) && f.len() >= 3 {
        return 40.0;
    }
    let tw = words(target);
    let fw = words(field);
    let hits = tw.iter().filter(|w| fw.contains(w)).count();
    50.0 * hits as f64 / tw.len() as f64
}

/// Score an element as a click target.
pub fn click_score(el: &ScannedElement, target: &str) -> f64 {
    let mut best = text_score(&el.text, target);
    for field in [&el.aria_label, &el.title] {
        if let Some(f) = field {
            best = best.max(text_score(f, target) * 0.95);
        }
    }
    best = best.max(text_score(&el.label, target) * 0.9);
    if best > 0.0 {
        let clickable = matches!(el.tag.as_str(), "button" | "a")
            || matches!(el.role.as_deref(), Some("button" | "link" | "tab" | "menuitem" | "option"));
        if clickable {
            best += 5.0;
        }
        if el.disabled {
            best -= 30.0;
        }
    }
    best
}

/// Score an element as a fill target; non-fillable elements score 0.
pub fn fill_score(el: &ScannedElement, target: &str) -> f64 {
    if !el.is_fillable() {
        return 0.0;
    }
    let mut best = text_score(&el.label, target);
    for field in [&el.placeholder, &el.aria_label, &el.name, &el.title] {
        if let Some(f) = field {
            best = best.max(text_score(f, target));
        }
    }
    let t = target.to_lowercase();
    let ty = el.input_type.as_deref().unwrap_or("");
    if t.contains("password") && ty == "password" {
        best += 40.0;
    } else if (t.contains("email") || t.contains("e-mail")) && ty == "email" {
        best += 30.0;
    } else if t.contains("search") && ty == "search" {
        best += 20.0;
    } else if t.contains("phone") && ty == "tel" {
        best += 20.0;
    }
    best
}

const MIN_SCORE: f64 = 25.0;

fn ranked<'a, F>(
    elements: &'a [ScannedElement],
    target: &str,
    score: F,
) -> Vec<(f64, &'a ScannedElement)>
where
    F: Fn(&ScannedElement, &str) -> f64,
{
    let mut scored: Vec<(f64, &'a ScannedElement)> = elements
        .iter()
        .map(|e| (score(e, target), e))
        .filter(|(s, _)| *s >= MIN_SCORE)
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored
}

/// Default assist: DOM scan plus scoring.
#[derive(Debug, Clone)]
pub struct HeuristicAssist {
    /// Candidates tried per click attempt.
    pub click_candidates: usize,
    /// Candidates tried for a fill.
    pub fill_candidates: usize,
    pub action_timeout: Duration,
}

impl Default for HeuristicAssist {
    fn default() -> Self {
        Self {
            click_candidates: 3,
            fill_candidates: 3,
            action_timeout: Duration::from_secs(2),
        }
    }
}

impl HeuristicAssist {
    pub fn new() -> Self {
        Self::default()
    }

    async fn scan(&self, page: &dyn PageDriver) -> Vec<ScannedElement> {
        match page.evaluate(SCAN_JS).await {
            Ok(value) => serde_json::from_value(value).unwrap_or_else(|e| {
                debug!("assist scan parse error: {}", e);
                Vec::new()
            }),
            Err(e) => {
                debug!("assist scan failed: {}", e);
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl ElementAssist for HeuristicAssist {
    async fn attempt_click(&self, page: &dyn PageDriver, target: &str, max_attempts: u32) -> bool {
        for attempt in 1..=max_attempts.max(1) {
            let elements = self.scan(page).await;
            let ranked = ranked(&elements, target, click_score);
            debug!(
                "assist click '{}' attempt {}: {} scored of {}",
                target,
                attempt,
                ranked.len(),
                elements.len()
            );
            for (score, el) in ranked.into_iter().take(self.click_candidates) {
                let loc = Locator::Css(el.selector.clone());
                for mode in [ClickMode::Normal, ClickMode::Programmatic] {
                    match page.click(&loc, 0, mode, self.action_timeout).await {
                        Ok(()) => {
                            debug!("assist clicked {} ({:.0}, {})", loc, score, mode.name());
                            return true;
                        }
                        Err(e) if e.is_page_closed() => return true,
                        Err(e) => debug!("assist click {} failed: {}", loc, e),
                    }
                }
            }
            if attempt < max_attempts {
                let _ = page.scroll_by(600).await;
                tokio::time::sleep(Duration::from_millis(300 * attempt as u64)).await;
            }
        }
        false
    }

    async fn attempt_fill(&self, page: &dyn PageDriver, target: &str, value: &str) -> bool {
        let elements = self.scan(page).await;
        for (score, el) in ranked(&elements, target, fill_score)
            .into_iter()
            .take(self.fill_candidates)
        {
            let loc = Locator::Css(el.selector.clone());
            match page.fill(&loc, 0, value, self.action_timeout).await {
                Ok(()) => {
                    debug!("assist filled {} ({:.0})", loc, score);
                    return true;
                }
                Err(e) => debug!("assist fill {} failed: {}", loc, e),
            }
        }
        false
    }
}
