//! # eoka-qa
//!
//! Adaptive browser test execution. Declare steps in YAML with loose,
//! human-written targets ("Sign In", a test-id, an href fragment); the engine
//! resolves them against the live DOM through escalating strategies and
//! reports per-step outcomes.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use eoka_qa::{Engine, EngineSettings, HeuristicAssist, RunOptions, TestCase};
//! use eoka_qa::driver::EokaDriver;
//!
//! # #[tokio::main]
//! # async fn main() -> eoka_qa::Result<()> {
//! let test = TestCase::load("configs/smoke.yaml")?;
//! let engine = Engine::new(
//!     Arc::new(EokaDriver::new()),
//!     Arc::new(HeuristicAssist::new()),
//!     EngineSettings::default(),
//! );
//! let result = engine
//!     .execute_test(&test, RunOptions::from_test(&test), |event| println!("{:?}", event))
//!     .await;
//! println!("{}: {:?}", test.name, result.status);
//! # Ok(())
//! # }
//! ```

pub mod assist;
pub mod classify;
mod config;
pub mod driver;
pub mod events;
pub mod locate;
mod runner;
pub mod store;
pub mod timeout;
pub mod uploads;

pub use assist::{ElementAssist, HeuristicAssist};
pub use classify::FailureKind;
pub use config::{
    ActionKind, BrowserSettings, Credentials, ElementIndex, EngineSettings, ParamDef, Params,
    StabilitySettings, Step, TestCase, TestStatus, Viewport, Vocabulary,
};
pub use events::{Event, EventBus, EventSink, ExecutionId};
pub use runner::{
    await_stable, Engine, ExecutionResult, RunHandle, RunOptions, RunStatus, Settled, StepResult,
};
pub use timeout::TimeoutPolicy;

/// Result type for eoka-qa operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Message fragments that mean the page or browser went away under us.
const CLOSED_MARKERS: &[&str] = &[
    "target closed",
    "page closed",
    "session closed",
    "browser has been closed",
    "has been closed",
    "detached",
    "connection closed",
];

/// Errors that can occur while loading tests or executing steps.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("browser error: {0}")]
    Browser(#[from] eoka::Error),

    #[error("driver error: {0}")]
    Driver(String),

    #[error("page closed: {0}")]
    PageClosed(String),

    #[error("not supported by this driver: {0}")]
    Unsupported(&'static str),

    #[error("could not resolve '{target}': {detail}")]
    ResolutionFailed { target: String, detail: String },

    #[error("step timeout after {ms}ms")]
    StepTimeout { ms: u64 },

    #[error("login failed: {0}")]
    LoginFailed(String),

    #[error("login timeout after {ms}ms")]
    LoginTimeout { ms: u64 },

    #[error("verification failed: {0}")]
    VerificationFailed(String),

    #[error("upload file not found: {0}")]
    UploadNotFound(String),

    #[error("action failed: {0}")]
    ActionFailed(String),
}

impl Error {
    pub(crate) fn resolution(target: &str, detail: impl Into<String>) -> Self {
        Self::ResolutionFailed {
            target: target.to_string(),
            detail: detail.into(),
        }
    }

    /// Whether this error means the page or session closed mid-action.
    ///
    /// A click that triggers a full navigation often tears down the page the
    /// driver was talking to; callers treat that as success.
    pub fn is_page_closed(&self) -> bool {
        match self {
            Self::PageClosed(_) => true,
            Self::Browser(e) => mentions_closed(&e.to_string()),
            Self::Driver(msg) => mentions_closed(msg),
            _ => false,
        }
    }
}

fn mentions_closed(msg: &str) -> bool {
    let msg = msg.to_lowercase();
    CLOSED_MARKERS.iter().any(|m| msg.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_test() {
        let yaml = r#"
name: "Minimal"
steps:
  - action: navigate
    target: "https://example.test"
"#;
        let test = TestCase::parse(yaml).unwrap();
        assert_eq!(test.name, "Minimal");
        assert_eq!(test.id, "minimal");
        assert_eq!(test.steps.len(), 1);
        assert_eq!(test.status, TestStatus::Active);
        assert_eq!(test.version, 1);
        assert!(!test.browser.headless);
        assert!(test.login.is_none());
    }

    #[test]
    fn test_parse_browser_settings() {
        let yaml = r#"
name: "Test"
browser:
  headless: true
  slow_mo_ms: 250
  proxy: "http://localhost:8080"
  user_agent: "Custom UA"
  viewport:
    width: 1920
    height: 1080
steps:
  - action: navigate
    target: "https://example.test"
"#;
        let test = TestCase::parse(yaml).unwrap();
        assert!(test.browser.headless);
        assert_eq!(test.browser.slow_mo_ms, 250);
        assert_eq!(test.browser.proxy, Some("http://localhost:8080".into()));
        assert_eq!(test.browser.user_agent, Some("Custom UA".into()));
        let viewport = test.browser.viewport.unwrap();
        assert_eq!(viewport.width, 1920);
        assert_eq!(viewport.height, 1080);
    }

    #[test]
    fn test_parse_full_test_case() {
        let yaml = r#"
id: checkout-01
name: "Checkout"
description: "Buy one item"
tags: [smoke, checkout]
status: draft
version: 4
steps:
  - action: open
    target: "https://shop.example.test"
  - action: click
    target: "Add to cart"
    index: last
  - action: enter
    target: "Email"
    value: "qa@example.test"
  - action: verify
    target: "Order placed"
    expectedResult: "confirmation banner"
  - action: hover
    target: "Menu"
"#;
        let test = TestCase::parse(yaml).unwrap();
        assert_eq!(test.id, "checkout-01");
        assert_eq!(test.status, TestStatus::Draft);
        assert_eq!(test.version, 4);
        assert_eq!(test.tags, vec!["smoke".to_string(), "checkout".to_string()]);
        assert_eq!(test.steps[0].action, ActionKind::Navigate);
        assert_eq!(test.steps[1].index, Some(ElementIndex::Last));
        assert_eq!(test.steps[2].action, ActionKind::Input);
        assert_eq!(test.steps[2].value.as_deref(), Some("qa@example.test"));
        assert_eq!(
            test.steps[4].action,
            ActionKind::Other("hover".to_string())
        );
    }

    #[test]
    fn test_parse_login() {
        let yaml = r#"
name: "Gated"
login:
  email: "qa@example.test"
  password: "secret"
steps:
  - action: navigate
    target: "https://app.example.test"
"#;
        let test = TestCase::parse(yaml).unwrap();
        let login = test.login.unwrap();
        assert_eq!(login.email, "qa@example.test");
        assert_eq!(login.password, "secret");
    }

    #[test]
    fn test_validation_missing_name() {
        let yaml = r#"
steps:
  - action: navigate
    target: "https://example.test"
"#;
        assert!(TestCase::parse(yaml).is_err());
    }

    #[test]
    fn test_validation_empty_name() {
        let yaml = r#"
name: ""
steps:
  - action: navigate
    target: "https://example.test"
"#;
        assert!(TestCase::parse(yaml).is_err());
    }

    #[test]
    fn test_validation_no_steps() {
        let yaml = r#"
name: "Empty"
steps: []
"#;
        let err = TestCase::parse(yaml).unwrap_err();
        assert!(err.to_string().contains("at least one step"));
    }

    #[test]
    fn test_validation_navigate_without_url() {
        let yaml = r#"
name: "Test"
steps:
  - action: navigate
"#;
        let err = TestCase::parse(yaml).unwrap_err();
        assert!(err.to_string().contains("step 1"));
    }

    #[test]
    fn test_validation_input_without_value() {
        let yaml = r#"
name: "Test"
steps:
  - action: navigate
    target: "https://example.test"
  - action: input
    target: "Email"
"#;
        let err = TestCase::parse(yaml).unwrap_err();
        assert!(err.to_string().contains("step 2"));
        assert!(err.to_string().contains("value"));
    }

    #[test]
    fn test_validation_bad_wait() {
        let yaml = r#"
name: "Test"
steps:
  - action: wait
    value: "a while"
"#;
        assert!(TestCase::parse(yaml).is_err());
    }

    #[test]
    fn test_validation_wait_out_of_range() {
        let yaml = r#"
name: "Test"
steps:
  - action: wait
    value: "99999999999999999999999"
"#;
        let err = TestCase::parse(yaml).unwrap_err();
        assert!(err.to_string().contains("wait duration"), "{}", err);
    }

    #[test]
    fn test_validation_empty_action() {
        let yaml = r#"
name: "Test"
steps:
  - action: ""
    target: "x"
"#;
        assert!(TestCase::parse(yaml).is_err());
    }

    #[test]
    fn test_params_substitution() {
        let yaml = r##"
name: "Login"
params:
  email:
    required: true
  host:
    default: "staging.example.test"
steps:
  - action: navigate
    target: "https://${host}/login"
  - action: input
    target: "Email"
    value: "${email}"
"##;
        let params = Params::new().set("email", "qa@example.test");
        let test = TestCase::parse_with_params(yaml, &params).unwrap();
        assert_eq!(test.steps[0].target, "https://staging.example.test/login");
        assert_eq!(test.steps[1].value.as_deref(), Some("qa@example.test"));
    }

    #[test]
    fn test_params_missing_required() {
        let yaml = r##"
name: "Test"
params:
  api_key:
    required: true
steps:
  - action: navigate
    target: "https://example.test/${api_key}"
"##;
        let err = TestCase::parse(yaml).unwrap_err();
        assert!(err.to_string().contains("api_key"));
    }

    #[test]
    fn test_step_timeout_message() {
        let err = Error::StepTimeout { ms: 10000 };
        assert_eq!(err.to_string(), "step timeout after 10000ms");
        let err = Error::LoginTimeout { ms: 55000 };
        assert_eq!(err.to_string(), "login timeout after 55000ms");
    }

    #[test]
    fn test_page_closed_detection() {
        assert!(Error::PageClosed("gone".into()).is_page_closed());
        assert!(Error::Driver("Target closed while waiting".into()).is_page_closed());
        assert!(Error::Driver("Execution context was detached".into()).is_page_closed());
        assert!(!Error::Driver("element not found".into()).is_page_closed());
        assert!(!Error::resolution("Sign in", "exhausted").is_page_closed());
    }

    #[test]
    fn test_load_smoke_config() {
        let test = TestCase::load("configs/smoke.yaml").unwrap();
        assert_eq!(test.name, "Smoke");
        assert_eq!(test.steps[0].action, ActionKind::Navigate);
        assert!(test.steps.len() >= 3);
    }
}
