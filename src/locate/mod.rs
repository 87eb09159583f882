//! Candidate locator generation.
//!
//! Turns a loose target description into an ordered list of concrete
//! locators, most confident first. Pure: no page access happens here.

mod hint;

pub use hint::{Hint, HintKind};

use crate::config::ActionKind;
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

/// A concrete locator expression understood by every driver.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    Css(String),
    XPath(String),
    /// Element whose own text equals (`exact`) or contains the text,
    /// whitespace-normalized. Containment is case-insensitive.
    Text { text: String, exact: bool },
    /// Element with the ARIA role (explicit or implicit) whose accessible
    /// name contains `name`, case-insensitively.
    Role { role: String, name: String },
}

impl Locator {
    pub fn css(s: impl Into<String>) -> Self {
        Self::Css(s.into())
    }

    pub fn xpath(s: impl Into<String>) -> Self {
        Self::XPath(s.into())
    }

    pub fn text(s: impl Into<String>) -> Self {
        Self::Text {
            text: s.into(),
            exact: false,
        }
    }

    pub fn role(role: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Role {
            role: role.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Css(s) => write!(f, "css={}", s),
            Self::XPath(s) => write!(f, "xpath={}", s),
            Self::Text { text, exact: true } => write!(f, "text=\"{}\"", text),
            Self::Text { text, exact: false } => write!(f, "text={}", text),
            Self::Role { role, name } => write!(f, "role={}[name=/{}/i]", role, name),
        }
    }
}

/// Which heuristic produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Explicit,
    TestId,
    Id,
    Href,
    Text,
    XPathText,
    Role,
    Aria,
    ClassHeuristic,
    Dropdown,
    ComponentLibrary,
    Placeholder,
    Name,
    Label,
    InputType,
    GenericInput,
}

impl Strategy {
    pub fn name(self) -> &'static str {
        match self {
            Self::Explicit => "explicit",
            Self::TestId => "test-id",
            Self::Id => "id",
            Self::Href => "href",
            Self::Text => "text",
            Self::XPathText => "xpath-text",
            Self::Role => "role",
            Self::Aria => "aria",
            Self::ClassHeuristic => "class-heuristic",
            Self::Dropdown => "dropdown",
            Self::ComponentLibrary => "component-library",
            Self::Placeholder => "placeholder",
            Self::Name => "name",
            Self::Label => "label",
            Self::InputType => "input-type",
            Self::GenericInput => "generic-input",
        }
    }
}

/// A locator tagged with the strategy that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub locator: Locator,
    pub strategy: Strategy,
}

impl Candidate {
    fn new(strategy: Strategy, locator: Locator) -> Self {
        Self { locator, strategy }
    }
}

fn token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("token regex"))
}

/// Whether a description looks like an opaque identifier rather than prose.
pub fn is_token(description: &str) -> bool {
    token_re().is_match(description)
}

/// Quote a string as an XPath 1.0 literal.
pub fn xpath_literal(s: &str) -> String {
    if !s.contains('\'') {
        format!("'{}'", s)
    } else if !s.contains('"') {
        format!("\"{}\"", s)
    } else {
        let parts: Vec<String> = s.split('\'').map(|p| format!("'{}'", p)).collect();
        format!("concat({})", parts.join(", \"'\", "))
    }
}

/// Escape a value for use inside a double-quoted CSS attribute selector.
pub fn css_value(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\a "),
            _ => out.push(c),
        }
    }
    out
}

/// Ranked candidate locators for a target description.
///
/// An explicit hint yields exactly that one locator. Otherwise candidates are
/// chosen by action: input-capable elements for `input`, prose-first lists for
/// `verify`, and identity- or text-first lists for everything else.
pub fn generate_candidates(description: &str, action: &ActionKind) -> Vec<Candidate> {
    let desc = description.trim();
    if desc.is_empty() {
        return Vec::new();
    }
    if let Some(hint) = Hint::parse(desc) {
        return vec![Candidate::new(Strategy::Explicit, hint.locator())];
    }

    let candidates = match action {
        ActionKind::Input => input_candidates(desc),
        ActionKind::Verify => verify_candidates(desc),
        _ if is_token(desc) => {
            let mut list = token_candidates(desc);
            list.extend(free_text_candidates(desc));
            list
        }
        _ => free_text_candidates(desc),
    };
    dedupe(candidates)
}

fn dedupe(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut seen = std::collections::HashSet::new();
    candidates
        .into_iter()
        .filter(|c| seen.insert(c.locator.clone()))
        .collect()
}

const ALT_TEST_IDS: &[&str] = &["data-test-id", "data-test", "data-qa", "data-cy"];

fn token_candidates(token: &str) -> Vec<Candidate> {
    let v = css_value(token);
    let mut list = vec![
        Candidate::new(Strategy::TestId, Locator::css(format!("[data-testid=\"{}\"]", v))),
        Candidate::new(Strategy::TestId, Locator::css(format!("[data-testid=\"{}\" i]", v))),
        Candidate::new(Strategy::TestId, Locator::css(format!("[data-testid*=\"{}\" i]", v))),
    ];
    for attr in ALT_TEST_IDS {
        list.push(Candidate::new(
            Strategy::TestId,
            Locator::css(format!("[{}=\"{}\"]", attr, v)),
        ));
    }
    list.push(Candidate::new(Strategy::Id, Locator::css(format!("[id=\"{}\"]", v))));
    list.push(Candidate::new(Strategy::Id, Locator::css(format!("[id*=\"{}\"]", v))));
    list.push(Candidate::new(Strategy::Href, Locator::css(format!("a[href*=\"{}\"]", v))));
    list
}

fn free_text_candidates(desc: &str) -> Vec<Candidate> {
    let v = css_value(desc);
    let lit = xpath_literal(desc);
    let contains = format!("contains(normalize-space(.), {})", lit);

    let mut list = vec![
        Candidate::new(Strategy::Id, Locator::css(format!("[id=\"{}\"]", v))),
        Candidate::new(Strategy::TestId, Locator::css(format!("[data-testid=\"{}\"]", v))),
    ];
    for role in ["button", "link", "tab"] {
        list.push(Candidate::new(Strategy::Role, Locator::role(role, desc)));
    }
    list.push(Candidate::new(
        Strategy::Aria,
        Locator::css(format!("[aria-label=\"{}\" i]", v)),
    ));
    list.push(Candidate::new(Strategy::Text, Locator::text(desc)));
    list.extend([
        Candidate::new(Strategy::XPathText, Locator::xpath(format!("//*[text()={}]", lit))),
        Candidate::new(
            Strategy::XPathText,
            Locator::xpath(format!("//*[contains(text(), {})]", lit)),
        ),
        Candidate::new(
            Strategy::XPathText,
            Locator::xpath(format!("//*[normalize-space(.)={}]", lit)),
        ),
    ]);
    list.extend([
        Candidate::new(Strategy::ClassHeuristic, Locator::xpath(format!("//nav//a[{}]", contains))),
        Candidate::new(
            Strategy::ClassHeuristic,
            Locator::xpath(format!("//*[@role='tab'][{}]", contains)),
        ),
        Candidate::new(
            Strategy::ClassHeuristic,
            Locator::xpath(format!(
                "//*[contains(@class, 'nav') or contains(@class, 'btn') or contains(@class, 'tab') or contains(@class, 'menu')][{}]",
                contains
            )),
        ),
    ]);
    list.push(Candidate::new(Strategy::Dropdown, Locator::role("option", desc)));
    list.push(Candidate::new(Strategy::Dropdown, Locator::role("menuitem", desc)));
    list.push(Candidate::new(Strategy::Dropdown, Locator::xpath(format!("//li[{}]", contains))));
    list.push(Candidate::new(
        Strategy::Dropdown,
        Locator::xpath(format!("//option[{}]", contains)),
    ));
    list.push(Candidate::new(
        Strategy::ComponentLibrary,
        Locator::xpath(format!(
            "//*[contains(@class, 'MuiButton') or contains(@class, 'MuiTab') or contains(@class, 'MuiMenuItem') or contains(@class, 'MuiListItem')][{}]",
            contains
        )),
    ));
    list.push(Candidate::new(
        Strategy::ComponentLibrary,
        Locator::xpath(format!(
            "//*[contains(@class, 'ant-btn') or contains(@class, 'ant-menu-item') or contains(@class, 'ant-tabs-tab') or contains(@class, 'ant-select-item')][{}]",
            contains
        )),
    ));
    list
}

fn verify_candidates(desc: &str) -> Vec<Candidate> {
    let v = css_value(desc);
    let mut list = vec![
        Candidate::new(Strategy::Text, Locator::text(desc)),
        Candidate::new(Strategy::Role, Locator::role("heading", desc)),
        Candidate::new(Strategy::Aria, Locator::css(format!("[aria-label*=\"{}\" i]", v))),
    ];
    if is_token(desc) {
        list.extend(token_candidates(desc));
    }
    list.extend(free_text_candidates(desc));
    list
}

const INPUT_TAGS: &[&str] = &["input", "textarea"];

fn on_inputs(attr_selector: &str) -> String {
    let mut parts: Vec<String> = INPUT_TAGS
        .iter()
        .map(|t| format!("{}{}", t, attr_selector))
        .collect();
    parts.push(format!("[contenteditable=\"true\"]{}", attr_selector));
    parts.join(", ")
}

/// Input-capable candidates, reranked by inferred field type.
fn input_candidates(desc: &str) -> Vec<Candidate> {
    let v = css_value(desc);
    let lit = xpath_literal(desc);
    let lower = desc.to_lowercase();

    let mut list = Vec::new();
    if is_token(desc) {
        list.push(Candidate::new(
            Strategy::TestId,
            Locator::css(on_inputs(&format!("[data-testid=\"{}\"]", v))),
        ));
        list.push(Candidate::new(Strategy::Id, Locator::css(on_inputs(&format!("[id=\"{}\"]", v)))));
        list.push(Candidate::new(Strategy::Name, Locator::css(on_inputs(&format!("[name=\"{}\"]", v)))));
    }
    list.extend([
        Candidate::new(
            Strategy::Placeholder,
            Locator::css(on_inputs(&format!("[placeholder=\"{}\" i]", v))),
        ),
        Candidate::new(
            Strategy::Placeholder,
            Locator::css(on_inputs(&format!("[placeholder*=\"{}\" i]", v))),
        ),
        Candidate::new(Strategy::Aria, Locator::css(on_inputs(&format!("[aria-label*=\"{}\" i]", v)))),
        Candidate::new(Strategy::Name, Locator::css(on_inputs(&format!("[name*=\"{}\" i]", v)))),
        Candidate::new(
            Strategy::Label,
            Locator::xpath(format!(
                "//*[self::input or self::textarea][@id=//label[contains(normalize-space(.), {})]/@for]",
                lit
            )),
        ),
        Candidate::new(
            Strategy::Label,
            Locator::xpath(format!(
                "//label[contains(normalize-space(.), {})]//*[self::input or self::textarea]",
                lit
            )),
        ),
        Candidate::new(
            Strategy::Label,
            Locator::xpath(format!(
                "//label[contains(normalize-space(.), {})]/following::*[self::input or self::textarea][1]",
                lit
            )),
        ),
    ]);

    let wants_email = lower.contains("email") || lower.contains("e-mail");
    let wants_password = lower.contains("password");
    if wants_password {
        list.push(Candidate::new(Strategy::InputType, Locator::css("input[type=\"password\"]")));
    }
    if wants_email {
        list.push(Candidate::new(Strategy::InputType, Locator::css("input[type=\"email\"]")));
        list.push(Candidate::new(
            Strategy::GenericInput,
            Locator::css("input[type=\"text\"], input:not([type])"),
        ));
    }
    if lower.contains("search") {
        list.push(Candidate::new(Strategy::InputType, Locator::css("input[type=\"search\"]")));
    }

    list.sort_by_key(|c| input_rank(c, wants_email, wants_password));
    list
}

/// Stable rank for input candidates; lower is tried first.
fn input_rank(c: &Candidate, wants_email: bool, wants_password: bool) -> u8 {
    let sel = match &c.locator {
        Locator::Css(s) => s.as_str(),
        _ => "",
    };
    match c.strategy {
        Strategy::InputType if wants_password && sel.contains("type=\"password\"") => 0,
        Strategy::InputType if wants_email && sel.contains("type=\"email\"") => 1,
        Strategy::GenericInput => 3,
        _ => 2,
    }
}

/// File inputs related to a target, most specific first, generic last.
pub fn file_input_candidates(desc: &str) -> Vec<Locator> {
    let mut list = Vec::new();
    let desc = desc.trim();
    if let Some(hint) = Hint::parse(desc) {
        list.push(hint.locator());
    } else if !desc.is_empty() {
        let v = css_value(desc);
        for attr in ["data-testid", "id", "name", "aria-label", "accept"] {
            list.push(Locator::css(format!("input[type=\"file\"][{}*=\"{}\" i]", attr, v)));
        }
    }
    list.push(Locator::css("input[type=\"file\"]"));
    list
}

/// Deterministic last-resort sweep: text equality then containment across
/// common clickable node kinds.
pub fn sweep_locators(desc: &str) -> Vec<Locator> {
    let lit = xpath_literal(desc.trim());
    let nodes = ["a", "button", "div", "span", "li", "*[@role]"];
    let mut list = Vec::new();
    for pred in [
        format!("normalize-space(.)={}", lit),
        format!("contains(normalize-space(.), {})", lit),
    ] {
        for node in nodes {
            list.push(Locator::xpath(format!("//{}[{}]", node, pred)));
        }
    }
    list
}

/// Controls that open a dropdown panel.
pub fn dropdown_triggers() -> Vec<Locator> {
    [
        "[role=\"combobox\"]",
        "[aria-haspopup=\"listbox\"]",
        ".MuiSelect-select",
        ".ant-select-selector",
        "select",
    ]
    .iter()
    .map(|s| Locator::css(*s))
    .collect()
}

/// Options inside an opened dropdown panel.
pub fn option_locators(desc: &str) -> Vec<Locator> {
    let contains = format!("contains(normalize-space(.), {})", xpath_literal(desc.trim()));
    vec![
        Locator::xpath(format!("//*[@role='listbox']//*[@role='option'][{}]", contains)),
        Locator::role("option", desc.trim()),
        Locator::xpath(format!("//*[contains(@class, 'MuiMenuItem')][{}]", contains)),
        Locator::xpath(format!("//*[contains(@class, 'ant-select-item-option')][{}]", contains)),
        Locator::xpath(format!("//select/option[{}]", contains)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locators(c: &[Candidate]) -> Vec<Locator> {
        c.iter().map(|c| c.locator.clone()).collect()
    }

    #[test]
    fn explicit_hint_yields_single_candidate() {
        let c = generate_candidates("xpath=//button[@id='go']", &ActionKind::Click);
        assert_eq!(c.len(), 1);
        assert_eq!(c[0].locator, Locator::XPath("//button[@id='go']".into()));
        assert_eq!(c[0].strategy, Strategy::Explicit);

        let c = generate_candidates("css=#email", &ActionKind::Input);
        assert_eq!(c, vec![Candidate::new(Strategy::Explicit, Locator::css("#email"))]);
    }

    #[test]
    fn generation_is_pure() {
        for (desc, action) in [
            ("Sign In", ActionKind::Click),
            ("submit-btn", ActionKind::Click),
            ("Email address", ActionKind::Input),
            ("Welcome", ActionKind::Verify),
        ] {
            assert_eq!(
                generate_candidates(desc, &action),
                generate_candidates(desc, &action)
            );
        }
    }

    #[test]
    fn blank_description_yields_nothing() {
        assert!(generate_candidates("   ", &ActionKind::Click).is_empty());
    }

    #[test]
    fn never_empty_for_non_blank() {
        for desc in ["x", "Go", "a b c", "it's \"quoted\"", "ümlaut"] {
            for action in [ActionKind::Click, ActionKind::Input, ActionKind::Verify] {
                assert!(!generate_candidates(desc, &action).is_empty(), "{}", desc);
            }
        }
    }

    #[test]
    fn token_prioritizes_test_id() {
        let c = generate_candidates("submit-btn", &ActionKind::Click);
        assert_eq!(c[0].locator, Locator::css("[data-testid=\"submit-btn\"]"));
        assert_eq!(c[1].locator, Locator::css("[data-testid=\"submit-btn\" i]"));
        assert_eq!(c[2].locator, Locator::css("[data-testid*=\"submit-btn\" i]"));
        let first_text = c.iter().position(|c| c.strategy == Strategy::Text).unwrap();
        let last_id = c.iter().rposition(|c| c.strategy == Strategy::Id).unwrap();
        assert!(last_id < first_text);
    }

    #[test]
    fn free_text_prioritizes_roles_before_text() {
        let c = generate_candidates("Accept Cookies", &ActionKind::Click);
        assert_eq!(c[0].strategy, Strategy::Id);
        let role = c.iter().position(|c| c.strategy == Strategy::Role).unwrap();
        let text = c.iter().position(|c| c.strategy == Strategy::Text).unwrap();
        let xpath = c.iter().position(|c| c.strategy == Strategy::XPathText).unwrap();
        let lib = c
            .iter()
            .position(|c| c.strategy == Strategy::ComponentLibrary)
            .unwrap();
        assert!(role < text && text < xpath && xpath < lib);
        assert_eq!(c[role].locator, Locator::role("button", "Accept Cookies"));
        // no token strategies for prose
        assert!(!locators(&c).contains(&Locator::css("[id*=\"Accept Cookies\"]")));
    }

    #[test]
    fn password_inputs_rank_first() {
        let c = generate_candidates("Password", &ActionKind::Input);
        assert_eq!(c[0].locator, Locator::css("input[type=\"password\"]"));
        // descriptive candidates are kept, only moved down
        assert!(c.iter().any(|c| c.strategy == Strategy::Placeholder));
    }

    #[test]
    fn email_inputs_outrank_generic_text() {
        let c = generate_candidates("Email address", &ActionKind::Input);
        assert_eq!(c[0].locator, Locator::css("input[type=\"email\"]"));
        assert_eq!(c.last().unwrap().strategy, Strategy::GenericInput);
    }

    #[test]
    fn xpath_literal_quotes() {
        assert_eq!(xpath_literal("Home"), "'Home'");
        assert_eq!(xpath_literal("it's"), "\"it's\"");
        assert_eq!(
            xpath_literal("it's \"x\""),
            "concat('it', \"'\", 's \"x\"')"
        );
    }

    #[test]
    fn css_value_escapes_quotes() {
        assert_eq!(css_value("a\"b"), "a\\\"b");
        assert_eq!(css_value("a\\b"), "a\\\\b");
    }

    #[test]
    fn sweep_covers_equality_then_containment() {
        let s = sweep_locators("Save");
        assert_eq!(s.len(), 12);
        assert_eq!(s[0], Locator::xpath("//a[normalize-space(.)='Save']"));
        assert_eq!(s[6], Locator::xpath("//a[contains(normalize-space(.), 'Save')]"));
    }

    #[test]
    fn file_inputs_end_with_generic() {
        let f = file_input_candidates("avatar");
        assert_eq!(f.last(), Some(&Locator::css("input[type=\"file\"]")));
        assert!(f.len() > 1);
        assert_eq!(file_input_candidates("").len(), 1);
    }
}
