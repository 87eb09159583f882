//! Keyword vocabularies behind the heuristics.
//!
//! Every list has an English default tuned for component-library web apps and
//! can be replaced from the settings file.

use serde::Deserialize;

/// Keyword lists consulted by the timeout policy, resolver, dispatcher and verifier.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Vocabulary {
    /// Click targets that submit credentials.
    pub auth_submit: Vec<String>,
    /// Click targets that usually move to another view.
    pub navigation_intent: Vec<String>,
    /// State/option words that live inside dropdowns.
    pub dropdown: Vec<String>,
    /// Targets hidden behind an "advanced settings" expansion.
    pub advanced_settings: Vec<String>,
    /// Targets that may trigger a full page navigation after creation.
    pub project_creation: Vec<String>,
    /// Words that mark a target as AI-assisted.
    pub ai_markers: Vec<String>,
    /// Text that marks a login page.
    pub login_page: Vec<String>,
    /// Text that marks a post-login landing page.
    pub dashboard: Vec<String>,
    /// Phrases that indicate an application error on screen.
    pub error_patterns: Vec<String>,
    /// Phrases containing an error word that are not errors.
    pub error_exclusions: Vec<String>,
    /// Failure messages that point at the locator rather than the app.
    pub selector_errors: Vec<String>,
    /// URL fragments of embedded applications that need a stability wait.
    pub embedded_app_urls: Vec<String>,
    /// CSS selectors of loading indicators.
    pub loading_indicators: Vec<String>,
    /// CSS selectors of on-screen error containers.
    pub error_containers: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self {
            auth_submit: strings(&["sign in", "sign-in", "signin", "log in", "log-in", "login"]),
            navigation_intent: strings(&["next", "continue", "proceed", "go to", "open", "launch"]),
            dropdown: strings(&[
                "default",
                "running",
                "stopped",
                "production",
                "staging",
                "development",
                "environment",
                "status",
                "active",
                "inactive",
            ]),
            advanced_settings: strings(&["advanced settings", "advanced options", "advanced"]),
            project_creation: strings(&[
                "create project",
                "new project",
                "create template",
                "new template",
                "use template",
                "template",
            ]),
            ai_markers: strings(&["ai"]),
            login_page: strings(&["sign in", "log in", "login", "forgot password"]),
            dashboard: strings(&["dashboard", "projects", "workspace", "home"]),
            error_patterns: strings(&[
                "error",
                "exception",
                "traceback",
                "something went wrong",
                "failed to load",
                "failed to fetch",
                "internal server error",
                "unexpected error",
                "stack trace",
                "uncaught",
            ]),
            error_exclusions: strings(&[
                "no error",
                "no errors",
                "error handling",
                "errors: 0",
                "0 errors",
            ]),
            selector_errors: strings(&[
                "timeout",
                "waiting for locator",
                "no element found",
                "strict mode violation",
                "could not resolve",
                "not visible",
                "element not found",
            ]),
            embedded_app_urls: strings(&["/apps/", "autolaunch=true", "dataapp"]),
            loading_indicators: strings(&[
                "[aria-busy=\"true\"]",
                "[role=\"progressbar\"]",
                ".loading",
                ".spinner",
                ".MuiCircularProgress-root",
                ".MuiSkeleton-root",
                ".ant-spin-spinning",
            ]),
            error_containers: strings(&[
                "[role=\"alert\"]",
                ".error",
                ".error-message",
                ".MuiAlert-standardError",
                ".MuiAlert-filledError",
                ".ant-alert-error",
                ".stException",
            ]),
        }
    }
}

/// Case-insensitive substring match against any keyword.
pub fn mentions_any(text: &str, keywords: &[String]) -> bool {
    let text = text.to_lowercase();
    keywords
        .iter()
        .any(|k| !k.is_empty() && text.contains(&k.to_lowercase()))
}

/// Case-insensitive whole-word match against any keyword.
///
/// Multi-word keywords must appear as a contiguous run of words.
pub fn mentions_word(text: &str, keywords: &[String]) -> bool {
    let words: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect();
    keywords.iter().any(|k| {
        let needle: Vec<String> = k
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(|w| w.to_lowercase())
            .collect();
        !needle.is_empty() && words.windows(needle.len()).any(|w| w == needle.as_slice())
    })
}

impl Vocabulary {
    pub fn is_auth_submit(&self, target: &str) -> bool {
        mentions_any(target, &self.auth_submit)
    }

    pub fn is_navigation_intent(&self, target: &str) -> bool {
        mentions_word(target, &self.navigation_intent)
    }

    pub fn is_dropdown_like(&self, target: &str) -> bool {
        mentions_word(target, &self.dropdown) || mentions_any(target, &self.advanced_settings)
    }

    pub fn is_project_creation(&self, target: &str) -> bool {
        mentions_any(target, &self.project_creation)
    }

    pub fn mentions_ai(&self, target: &str) -> bool {
        mentions_word(target, &self.ai_markers)
    }

    pub fn is_embedded_app_url(&self, url: &str) -> bool {
        mentions_any(url, &self.embedded_app_urls)
    }
}
