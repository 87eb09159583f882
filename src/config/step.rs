use regex::Regex;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;

/// What a step does.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Navigate,
    Click,
    Input,
    Upload,
    Verify,
    Back,
    Refresh,
    Wait,
    If,
    /// Anything else. Executed as a no-op so newer test files still run.
    Other(String),
}

impl ActionKind {
    /// Parse an action name. Case-insensitive, accepts common aliases.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "navigate" | "open" | "goto" => Self::Navigate,
            "click" => Self::Click,
            "input" | "fill" | "enter" | "type" => Self::Input,
            "upload" => Self::Upload,
            "verify" | "assert" => Self::Verify,
            "back" => Self::Back,
            "refresh" | "reload" => Self::Refresh,
            "wait" => Self::Wait,
            "if" => Self::If,
            other => Self::Other(other.to_string()),
        }
    }

    /// Short name for logging and results.
    pub fn name(&self) -> &str {
        match self {
            Self::Navigate => "navigate",
            Self::Click => "click",
            Self::Input => "input",
            Self::Upload => "upload",
            Self::Verify => "verify",
            Self::Back => "back",
            Self::Refresh => "refresh",
            Self::Wait => "wait",
            Self::If => "if",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl<'de> Deserialize<'de> for ActionKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if s.trim().is_empty() {
            return Err(de::Error::custom("action must not be empty"));
        }
        Ok(Self::parse(&s))
    }
}

impl Serialize for ActionKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

/// Which match to use when a locator hits several elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementIndex {
    /// 1-based position, clamped to the number of matches.
    Nth(usize),
    Last,
}

impl ElementIndex {
    /// Zero-based position among `count` matches, `None` if there are none.
    pub fn select(self, count: usize) -> Option<usize> {
        if count == 0 {
            return None;
        }
        Some(match self {
            Self::Nth(n) => n.clamp(1, count) - 1,
            Self::Last => count - 1,
        })
    }

    /// Parse `"last"` or a positive integer.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("last") {
            return Some(Self::Last);
        }
        match s.parse::<usize>() {
            Ok(n) if n > 0 => Some(Self::Nth(n)),
            _ => None,
        }
    }
}

/// Zero-based match position for an optional index; the first match by default.
pub fn select_match(index: Option<ElementIndex>, count: usize) -> Option<usize> {
    match index {
        Some(idx) => idx.select(count),
        None if count > 0 => Some(0),
        None => None,
    }
}

impl fmt::Display for ElementIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nth(n) => write!(f, "{}", n),
            Self::Last => f.write_str("last"),
        }
    }
}

impl<'de> Deserialize<'de> for ElementIndex {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(ElementIndexVisitor)
    }
}

struct ElementIndexVisitor;

impl<'de> Visitor<'de> for ElementIndexVisitor {
    type Value = ElementIndex;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a positive integer or \"last\"")
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        if v == 0 {
            return Err(E::custom("index is 1-based, got 0"));
        }
        Ok(ElementIndex::Nth(v as usize))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        if v <= 0 {
            return Err(E::custom(format!("index must be positive, got {}", v)));
        }
        Ok(ElementIndex::Nth(v as usize))
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        ElementIndex::parse(v)
            .ok_or_else(|| E::custom(format!("invalid index '{}', expected N or \"last\"", v)))
    }
}

impl Serialize for ElementIndex {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Nth(n) => serializer.serialize_u64(*n as u64),
            Self::Last => serializer.serialize_str("last"),
        }
    }
}

/// One declarative test step.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Step {
    /// 1-based position. Reassigned from document order on load.
    #[serde(default)]
    pub step: usize,

    pub action: ActionKind,

    /// Free-text locator hint, URL, or inline action (for `if`).
    #[serde(default)]
    pub target: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    #[serde(
        default,
        alias = "expectedResult",
        skip_serializing_if = "Option::is_none"
    )]
    pub expected_result: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<ElementIndex>,

    #[serde(default, alias = "useAI", alias = "useAi")]
    pub use_ai: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

const AI_SUFFIX: &str = " with ai";

fn duration_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*(?:wait\s+)?(?:for\s+)?(\d+(?:\.\d+)?)\s*(ms|millis|milliseconds?|s|secs?|seconds?|m|mins?|minutes?)?\s*$",
        )
        .expect("duration regex")
    })
}

/// Parse a human duration such as `5`, `5s`, `5sec`, `1500ms` or `wait 2 minutes`.
/// Bare numbers are seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let caps = duration_re().captures(s)?;
    let n: f64 = caps[1].parse().ok()?;
    let unit = caps
        .get(2)
        .map(|m| m.as_str().to_ascii_lowercase())
        .unwrap_or_default();
    let secs = match unit.as_str() {
        "ms" | "millis" | "millisecond" | "milliseconds" => n / 1000.0,
        "m" | "min" | "mins" | "minute" | "minutes" => n * 60.0,
        _ => n,
    };
    Duration::try_from_secs_f64(secs).ok()
}

impl Step {
    pub fn new(action: ActionKind, target: impl Into<String>) -> Self {
        Self {
            step: 0,
            action,
            target: target.into(),
            value: None,
            expected_result: None,
            index: None,
            use_ai: false,
            condition: None,
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_index(mut self, index: ElementIndex) -> Self {
        self.index = Some(index);
        self
    }

    pub fn with_ai(mut self) -> Self {
        self.use_ai = true;
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    /// Trim the target and fold a trailing "with AI" into `use_ai`.
    pub(crate) fn normalize(&mut self) {
        let trimmed = self.target.trim();
        let lower = trimmed.to_ascii_lowercase();
        if lower.ends_with(AI_SUFFIX) && trimmed.len() > AI_SUFFIX.len() {
            self.use_ai = true;
            self.target = trimmed[..trimmed.len() - AI_SUFFIX.len()].trim_end().to_string();
        } else {
            self.target = trimmed.to_string();
        }
    }

    /// Duration declared by a `wait` step, from `value` first, then `target`.
    pub fn declared_duration(&self) -> Option<Duration> {
        self.value
            .as_deref()
            .and_then(parse_duration)
            .or_else(|| parse_duration(&self.target))
    }
}
