//! `if` steps: a condition plus one inline action.
//!
//! Accepted forms:
//! - `condition: "Cookie banner visible"`, `target: "click Accept"`
//! - `target: "If(text=Cookie banner) then click on Accept"`

use super::{dispatch, Ctx};
use crate::config::step::parse_duration;
use crate::config::{ActionKind, Step};
use crate::driver::{ElementState, Locator};
use crate::Result;
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info, warn};

const CONDITION_WAIT: Duration = Duration::from_millis(1500);

/// `If(<cond>) then <action>`; the condition may itself contain parentheses.
fn if_then_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)^\s*if\s*\((.+)\)\s*then\s+(.+?)\s*$").expect("if-then regex")
    })
}

/// `If(<cond>) <action>` without the `then`.
fn if_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)^\s*if\s*\((.+?)\)\s*(.+?)\s*$").expect("if regex"))
}

fn enter_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)^(?:enter|type|fill)\s+(.+?)\s+(?:in|into)\s+(.+)$").expect("enter regex")
    })
}

/// What an `if` step checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Condition {
    /// Some text is visible on the page.
    Text(String),
    /// A selector matches at least one element.
    Exists(Locator),
}

impl Condition {
    pub fn parse(s: &str) -> Option<Self> {
        let s = unquote(s.trim());
        if s.is_empty() {
            return None;
        }
        let lower = s.to_ascii_lowercase();
        let after = |p: &str| unquote(s[p.len()..].trim()).to_string();
        let cond = if lower.starts_with("text=") {
            Self::Text(after("text="))
        } else if lower.starts_with("css=") {
            Self::Exists(Locator::css(after("css=")))
        } else if lower.starts_with("selector=") {
            Self::Exists(Locator::css(after("selector=")))
        } else if lower.starts_with("xpath=") {
            Self::Exists(Locator::xpath(after("xpath=")))
        } else if lower.ends_with(" visible") {
            let mut text = s[..s.len() - " visible".len()].trim_end();
            if text.to_ascii_lowercase().ends_with(" is") {
                text = &text[..text.len() - 3];
            }
            Self::Text(unquote(text).to_string())
        } else {
            Self::Text(s.to_string())
        };
        Some(cond)
    }
}

/// The action an `if` step runs when its condition holds.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum InlineAction {
    Click(String),
    Enter { value: String, target: String },
    Verify(String),
    Wait(Duration),
    Back,
    Refresh,
}

impl InlineAction {
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().trim_end_matches('.');
        let lower = s.to_ascii_lowercase();
        if lower == "back" || lower == "go back" {
            return Some(Self::Back);
        }
        if lower == "refresh" || lower == "reload" {
            return Some(Self::Refresh);
        }
        if let Some(caps) = enter_re().captures(s) {
            return Some(Self::Enter {
                value: unquote(caps[1].trim()).to_string(),
                target: unquote(caps[2].trim()).to_string(),
            });
        }
        let word_end = lower.find(char::is_whitespace)?;
        let (verb, rest) = (&lower[..word_end], s[word_end..].trim());
        match verb {
            "click" | "tap" | "press" => {
                let rest = if rest.get(..3).is_some_and(|p| p.eq_ignore_ascii_case("on ")) {
                    rest[3..].trim()
                } else {
                    rest
                };
                non_empty(rest).map(|t| Self::Click(unquote(t).to_string()))
            }
            "verify" | "check" | "see" => non_empty(rest).map(|t| Self::Verify(unquote(t).to_string())),
            "wait" => parse_duration(rest).map(Self::Wait),
            _ => None,
        }
    }

    /// The equivalent standalone step.
    fn to_step(&self, position: usize) -> Step {
        let mut step = match self {
            Self::Click(t) => Step::new(ActionKind::Click, t.as_str()),
            Self::Enter { value, target } => {
                Step::new(ActionKind::Input, target.as_str()).with_value(value.as_str())
            }
            Self::Verify(t) => Step::new(ActionKind::Verify, t.as_str()),
            Self::Wait(d) => Step::new(ActionKind::Wait, "").with_value(format!("{}ms", d.as_millis())),
            Self::Back => Step::new(ActionKind::Back, ""),
            Self::Refresh => Step::new(ActionKind::Refresh, ""),
        };
        step.step = position;
        step.normalize();
        step
    }
}

fn non_empty(s: &str) -> Option<&str> {
    let s = s.trim();
    (!s.is_empty()).then_some(s)
}

fn unquote(s: &str) -> &str {
    let s = s.trim();
    for q in ['"', '\''] {
        if s.len() >= 2 && s.starts_with(q) && s.ends_with(q) {
            return &s[1..s.len() - 1];
        }
    }
    s
}

/// Split an `if` step into its condition and action.
pub(crate) fn parse(step: &Step) -> Option<(Condition, InlineAction)> {
    if let Some(cond) = step.condition.as_deref().filter(|c| !c.trim().is_empty()) {
        return Some((Condition::parse(cond)?, InlineAction::parse(&step.target)?));
    }
    let caps = if_then_re()
        .captures(&step.target)
        .or_else(|| if_re().captures(&step.target))?;
    Some((Condition::parse(&caps[1])?, InlineAction::parse(&caps[2])?))
}

async fn holds(ctx: &Ctx<'_>, cond: &Condition) -> bool {
    match cond {
        Condition::Exists(loc) => {
            matches!(ctx.page.wait_for(loc, 0, ElementState::Attached, CONDITION_WAIT).await, Ok(true))
        }
        Condition::Text(text) => {
            let loc = Locator::text(text.as_str());
            if let Ok(true) = ctx.page.wait_for(&loc, 0, ElementState::Visible, CONDITION_WAIT).await {
                return true;
            }
            let body = ctx.page.body_text().await.unwrap_or_default();
            body.to_lowercase().contains(&text.to_lowercase())
        }
    }
}

/// Run an `if` step. Never fails: an unparsable step, a false condition and
/// a failing inline action all pass.
pub(crate) async fn run(ctx: &Ctx<'_>, step: &Step) -> Result<()> {
    let Some((cond, action)) = parse(step) else {
        warn!("step {}: could not parse conditional '{}'", step.step, step.target);
        return Ok(());
    };
    if !holds(ctx, &cond).await {
        debug!("step {}: condition {:?} is false", step.step, cond);
        return Ok(());
    }
    info!("step {}: condition {:?} holds, running {:?}", step.step, cond, action);
    let inline = action.to_step(step.step);
    if let Err(e) = dispatch::execute_action(ctx, &inline).await {
        warn!("step {}: conditional action failed: {}", step.step, e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn if_step(target: &str) -> Step {
        Step::new(ActionKind::If, target)
    }

    #[test]
    fn parses_single_string_form() {
        let (cond, action) = parse(&if_step("If(text=Cookie banner) then click on Accept")).unwrap();
        assert_eq!(cond, Condition::Text("Cookie banner".into()));
        assert_eq!(action, InlineAction::Click("Accept".into()));
    }

    #[test]
    fn parses_condition_field_form() {
        let step = if_step("enter \"qa@example.test\" in Email").with_condition("css=#login-form");
        let (cond, action) = parse(&step).unwrap();
        assert_eq!(cond, Condition::Exists(Locator::css("#login-form")));
        assert_eq!(
            action,
            InlineAction::Enter {
                value: "qa@example.test".into(),
                target: "Email".into()
            }
        );
    }

    #[test]
    fn parses_conditions() {
        assert_eq!(
            Condition::parse("xpath=//div[@id='promo']"),
            Some(Condition::Exists(Locator::xpath("//div[@id='promo']")))
        );
        assert_eq!(
            Condition::parse("selector=.modal"),
            Some(Condition::Exists(Locator::css(".modal")))
        );
        assert_eq!(
            Condition::parse("'Upgrade dialog' is visible"),
            Some(Condition::Text("Upgrade dialog".into()))
        );
        assert_eq!(Condition::parse("Welcome"), Some(Condition::Text("Welcome".into())));
        let (cond, _) = parse(&if_step("If(xpath=//div[contains(@class,'promo')]) then click Dismiss")).unwrap();
        assert_eq!(
            cond,
            Condition::Exists(Locator::xpath("//div[contains(@class,'promo')]"))
        );
        assert_eq!(Condition::parse("  "), None);
    }

    #[test]
    fn parses_inline_actions() {
        assert_eq!(InlineAction::parse("back"), Some(InlineAction::Back));
        assert_eq!(InlineAction::parse("Refresh"), Some(InlineAction::Refresh));
        assert_eq!(InlineAction::parse("verify Saved"), Some(InlineAction::Verify("Saved".into())));
        assert_eq!(
            InlineAction::parse("wait 2s"),
            Some(InlineAction::Wait(Duration::from_secs(2)))
        );
        assert_eq!(InlineAction::parse("click Close"), Some(InlineAction::Click("Close".into())));
        assert_eq!(InlineAction::parse("dance"), None);
    }

    #[test]
    fn inline_action_becomes_step() {
        let step = InlineAction::Enter {
            value: "42".into(),
            target: "Quantity".into(),
        }
        .to_step(3);
        assert_eq!(step.step, 3);
        assert_eq!(step.action, ActionKind::Input);
        assert_eq!(step.target, "Quantity");
        assert_eq!(step.value.as_deref(), Some("42"));

        let wait = InlineAction::Wait(Duration::from_millis(1500)).to_step(1);
        assert_eq!(wait.declared_duration(), Some(Duration::from_millis(1500)));
    }
}
