//! Per-step time budgets.

use crate::config::{ActionKind, Step, TestCase, Vocabulary};
use std::time::Duration;

const BASE: Duration = Duration::from_secs(10);
const AUTH_CLICK: Duration = Duration::from_secs(15);
const AI_CLICK: Duration = Duration::from_secs(30);
const AI_VERIFY: Duration = Duration::from_secs(13);
const DROPDOWN: Duration = Duration::from_secs(20);
const PROJECT_CREATION: Duration = Duration::from_secs(15);
/// Slack on top of a declared wait so the sleep itself never trips the budget.
const WAIT_MARGIN: Duration = Duration::from_secs(1);
/// Detection, credential entry and the two settling waits of a login.
const LOGIN_FLOW: Duration = Duration::from_secs(45);

/// Picks a wall-clock budget for a step from its action and target text.
///
/// The budget depends only on the step, never on page state. When several
/// rules match, the largest budget wins.
#[derive(Debug, Clone, Default)]
pub struct TimeoutPolicy {
    vocab: Vocabulary,
}

impl TimeoutPolicy {
    pub fn new(vocab: Vocabulary) -> Self {
        Self { vocab }
    }

    pub fn timeout_for(&self, step: &Step) -> Duration {
        let target = step.target.as_str();
        let ai = step.use_ai || self.vocab.mentions_ai(target);

        match step.action {
            ActionKind::Wait => match step.declared_duration() {
                Some(declared) => declared.saturating_add(WAIT_MARGIN).max(BASE),
                None => BASE,
            },
            ActionKind::Click => {
                let mut budget = BASE;
                if self.vocab.is_auth_submit(target) {
                    budget = budget.max(AUTH_CLICK);
                }
                if ai {
                    budget = budget.max(AI_CLICK);
                }
                if self.vocab.is_dropdown_like(target) {
                    budget = budget.max(DROPDOWN);
                }
                if self.vocab.is_project_creation(target) {
                    budget = budget.max(PROJECT_CREATION);
                }
                budget
            }
            ActionKind::Verify if ai => AI_VERIFY,
            _ => BASE,
        }
    }

    /// Budget for login-on-demand: the first step's navigation plus the
    /// login flow itself.
    pub fn login_budget(&self, test: &TestCase) -> Duration {
        let first = test.steps.first().map_or(BASE, |s| self.timeout_for(s));
        first.saturating_add(LOGIN_FLOW)
    }
}
