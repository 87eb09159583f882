//! `verify` steps: the two named assertions and generic visibility.

use super::{resolver, Ctx};
use crate::config::vocab::mentions_any;
use crate::config::{Step, Vocabulary};
use crate::locate;
use crate::{Error, Result};
use serde::Deserialize;
use tracing::{debug, info};

const NO_ERROR_PHRASES: &[&str] = &[
    "no error",
    "no errors",
    "no exception",
    "no exceptions",
    "without error",
    "without errors",
    "error free",
    "error-free",
];

const SNIPPET_LEN: usize = 160;

/// Collects the text of visible error containers. `__SELECTORS__` is replaced
/// with a JSON array of CSS selectors.
const ERROR_SCAN_JS: &str = r#"
(() => {
    const out = [];
    for (const sel of __SELECTORS__) {
        let nodes = [];
        try { nodes = document.querySelectorAll(sel); } catch (e) { continue; }
        for (const el of nodes) {
            const r = el.getBoundingClientRect();
            const s = getComputedStyle(el);
            if (r.width === 0 || r.height === 0 || s.display === 'none' || s.visibility === 'hidden') continue;
            const text = (el.innerText || el.textContent || '').trim();
            if (text) out.push({ selector: sel, text: text.slice(0, 400) });
        }
    }
    return out;
})()
"#;

/// A visible error container and its text.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub(crate) struct ErrorContainer {
    pub selector: String,
    pub text: String,
}

fn wants_no_error(step: &Step) -> bool {
    let text = format!(
        "{} {}",
        step.target,
        step.expected_result.as_deref().unwrap_or_default()
    )
    .to_lowercase();
    NO_ERROR_PHRASES.iter().any(|p| text.contains(p))
}

fn wants_dashboard(step: &Step) -> bool {
    step.target.to_lowercase().contains("dashboard")
}

/// Execute a `verify` step.
pub(crate) async fn verify(ctx: &Ctx<'_>, step: &Step) -> Result<()> {
    let vocab = &ctx.settings.vocabulary;

    if wants_no_error(step) {
        return verify_no_errors(ctx).await;
    }

    if wants_dashboard(step) && on_dashboard(ctx, vocab).await {
        info!("verified dashboard");
        return Ok(());
    }

    let target = step.target.as_str();
    let candidates = locate::generate_candidates(target, &step.action);
    match resolver::probe(ctx, &candidates, step.index, target).await {
        Ok(found) => {
            debug!("verified '{}' via {}", target, found.locator);
            Ok(())
        }
        Err(e) if e.is_page_closed() => Err(e),
        Err(_) => {
            let body = ctx.page.body_text().await.unwrap_or_default();
            if !target.is_empty() && body.to_lowercase().contains(&target.to_lowercase()) {
                debug!("verified '{}' via body text", target);
                Ok(())
            } else {
                Err(Error::resolution(target, "not visible on the page"))
            }
        }
    }
}

async fn verify_no_errors(ctx: &Ctx<'_>) -> Result<()> {
    let vocab = &ctx.settings.vocabulary;
    let selectors = serde_json::to_string(&vocab.error_containers)?;
    let script = ERROR_SCAN_JS.replace("__SELECTORS__", &selectors);
    let containers: Vec<ErrorContainer> = match ctx.page.evaluate(&script).await {
        Ok(v) => serde_json::from_value(v).unwrap_or_default(),
        Err(e) if e.is_page_closed() => return Err(e),
        Err(e) => {
            debug!("error container scan failed: {}", e);
            Vec::new()
        }
    };
    let body = ctx.page.body_text().await?;
    match scan_for_errors(&containers, &body, vocab) {
        Some(report) => Err(Error::VerificationFailed(report)),
        None => {
            info!("verified page shows no errors");
            Ok(())
        }
    }
}

/// Look for on-screen errors. Returns a report of everything found, or
/// `None` when the page is clean.
///
/// Container hits count unless their text is an excluded phrase; body text
/// counts when it matches an error pattern outside any excluded phrase.
pub(crate) fn scan_for_errors(
    containers: &[ErrorContainer],
    body: &str,
    vocab: &Vocabulary,
) -> Option<String> {
    let mut findings = Vec::new();
    let mut container_hits = 0;

    for c in containers {
        if mentions_any(&c.text, &vocab.error_exclusions) {
            continue;
        }
        container_hits += 1;
        findings.push(format!("container {}: {}", c.selector, snippet(&c.text, 0, c.text.len())));
    }

    let mut scrubbed = body.to_lowercase();
    for excl in &vocab.error_exclusions {
        let excl = excl.to_lowercase();
        if !excl.is_empty() {
            scrubbed = scrubbed.replace(&excl, &" ".repeat(excl.len()));
        }
    }
    let mut matched = Vec::new();
    for pattern in &vocab.error_patterns {
        let p = pattern.to_lowercase();
        if p.is_empty() {
            continue;
        }
        if let Some(at) = scrubbed.find(&p) {
            matched.push(pattern.as_str());
            findings.push(format!(
                "pattern '{}': \"{}\"",
                pattern,
                snippet(&scrubbed, at, at + p.len())
            ));
        }
    }

    if findings.is_empty() {
        return None;
    }
    let mut report = format!(
        "page shows errors ({} containers, {} patterns",
        container_hits,
        matched.len()
    );
    if !matched.is_empty() {
        report.push_str(": ");
        report.push_str(&matched.join(", "));
    }
    report.push(')');
    for f in findings {
        report.push_str("\n  - ");
        report.push_str(&f);
    }
    Some(report)
}

/// Up to `SNIPPET_LEN` characters around `[start, end)`, whitespace collapsed.
fn snippet(text: &str, start: usize, end: usize) -> String {
    let pad = SNIPPET_LEN.saturating_sub(end - start) / 2;
    let mut from = start.saturating_sub(pad);
    while !text.is_char_boundary(from) {
        from -= 1;
    }
    let mut to = (end + pad).min(text.len());
    while !text.is_char_boundary(to) {
        to += 1;
    }
    text[from..to].split_whitespace().collect::<Vec<_>>().join(" ")
}

/// URL, title or body suggest a landing page, and no login form is showing.
async fn on_dashboard(ctx: &Ctx<'_>, vocab: &Vocabulary) -> bool {
    let url = ctx.page.url().await.unwrap_or_default();
    let title = ctx.page.title().await.unwrap_or_default();
    if mentions_any(&url, &vocab.dashboard) || mentions_any(&title, &vocab.dashboard) {
        return true;
    }
    let body = ctx.page.body_text().await.unwrap_or_default();
    if !mentions_any(&body, &vocab.dashboard) {
        return false;
    }
    let password = crate::driver::Locator::css("input[type=\"password\"]");
    !matches!(ctx.page.count(&password).await, Ok(n) if n > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ActionKind;

    fn container(text: &str) -> ErrorContainer {
        ErrorContainer {
            selector: "[role=\"alert\"]".into(),
            text: text.into(),
        }
    }

    #[test]
    fn detects_no_error_assertions() {
        assert!(wants_no_error(&Step::new(ActionKind::Verify, "No errors on page")));
        let step = Step {
            expected_result: Some("Page renders with no exception".into()),
            ..Step::new(ActionKind::Verify, "Report")
        };
        assert!(wants_no_error(&step));
        assert!(!wants_no_error(&Step::new(ActionKind::Verify, "Error log")));
    }

    #[test]
    fn clean_page_passes() {
        let v = Vocabulary::default();
        assert!(scan_for_errors(&[], "Welcome back. 3 projects.", &v).is_none());
    }

    #[test]
    fn excluded_phrases_are_ignored() {
        let v = Vocabulary::default();
        let body = "Build finished. 0 errors. Error handling is configured.";
        assert!(scan_for_errors(&[], body, &v).is_none());
        assert!(scan_for_errors(&[container("No errors")], "", &v).is_none());
    }

    #[test]
    fn body_pattern_is_reported_with_snippet() {
        let v = Vocabulary::default();
        let body = "Loading report...\nTraceback (most recent call last):\n  File app.py";
        let report = scan_for_errors(&[], body, &v).unwrap();
        assert!(report.contains("traceback"));
        assert!(report.contains("most recent call last"));
    }

    #[test]
    fn container_hit_is_reported() {
        let v = Vocabulary::default();
        let report = scan_for_errors(&[container("Quota exceeded")], "All good", &v).unwrap();
        assert!(report.contains("1 containers"));
        assert!(report.contains("Quota exceeded"));
    }

    #[test]
    fn snippet_respects_char_boundaries() {
        let text = "ééééé error ééééé";
        let at = text.find("error").unwrap();
        let s = snippet(text, at, at + 5);
        assert!(s.contains("error"));
    }
}
