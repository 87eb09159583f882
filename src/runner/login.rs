//! Login-on-demand before the first step.

use super::stability::await_stable;
use super::Ctx;
use crate::config::vocab::mentions_any;
use crate::config::{ActionKind, Credentials, TestCase};
use crate::driver::{ClickMode, ElementState, Locator};
use crate::events::Event;
use crate::{Error, Result};
use chrono::Utc;
use std::time::Duration;
use tracing::{debug, info};

const FIELD_WAIT: Duration = Duration::from_secs(2);
const PASSWORD_REVEAL_WAIT: Duration = Duration::from_secs(5);
const ACTION_TIMEOUT: Duration = Duration::from_secs(5);

const EMAIL_FIELDS: &[&str] = &[
    "input[type=\"email\"]",
    "input[name=\"email\"]",
    "input[autocomplete=\"username\"]",
    "input[name=\"username\"]",
    "input[id*=\"email\" i]",
    "input[name*=\"user\" i]",
    "input[placeholder*=\"email\" i]",
    "input[type=\"text\"]",
];

const PASSWORD_FIELDS: &[&str] = &[
    "input[type=\"password\"]",
    "input[name=\"password\"]",
    "input[autocomplete=\"current-password\"]",
];

const VISIBLE_INPUTS: &str =
    "input:not([type=\"hidden\"]):not([type=\"checkbox\"]):not([type=\"radio\"])";

fn password_field() -> Locator {
    Locator::css(PASSWORD_FIELDS[0])
}

/// Controls that advance a two-step (email first) login form.
fn next_controls() -> Vec<Locator> {
    vec![
        Locator::role("button", "Next"),
        Locator::role("button", "Continue"),
        Locator::css("button[type=\"submit\"]"),
        Locator::css("input[type=\"submit\"]"),
    ]
}

fn submit_controls(ctx: &Ctx<'_>) -> Vec<Locator> {
    let mut list = vec![
        Locator::css("button[type=\"submit\"]"),
        Locator::css("input[type=\"submit\"]"),
    ];
    for word in &ctx.settings.vocabulary.auth_submit {
        list.push(Locator::role("button", word.as_str()));
    }
    list.push(Locator::role("button", "Continue"));
    list
}

/// Whether the current page asks for credentials.
///
/// A password field is enough on its own. Otherwise the title or body must
/// carry login vocabulary and the page must show a text-like input.
pub(crate) async fn is_login_page(ctx: &Ctx<'_>) -> Result<bool> {
    if ctx.page.count(&password_field()).await? > 0 {
        return Ok(true);
    }
    let title = ctx.page.title().await.unwrap_or_default();
    let body = ctx.page.body_text().await.unwrap_or_default();
    let vocab = &ctx.settings.vocabulary.login_page;
    if !mentions_any(&title, vocab) && !mentions_any(&body, vocab) {
        return Ok(false);
    }
    Ok(ctx.page.count(&Locator::css(VISIBLE_INPUTS)).await? > 0)
}

/// Navigate to the first step's URL and log in if a login page shows up.
pub(crate) async fn gate(ctx: &Ctx<'_>, test: &TestCase, creds: &Credentials) -> Result<()> {
    let Some(first) = test.steps.first() else {
        return Ok(());
    };
    if first.action != ActionKind::Navigate {
        debug!("first step is not a navigation, skipping login check");
        return Ok(());
    }
    let url = if first.target.is_empty() {
        first.value.as_deref().unwrap_or_default()
    } else {
        first.target.as_str()
    };
    ctx.page.goto(url).await?;
    await_stable(ctx.page, false, &ctx.settings.stability, &ctx.settings.vocabulary).await;

    if !is_login_page(ctx).await? {
        debug!("{} is not a login page", url);
        return Ok(());
    }
    let current = ctx.page.url().await.unwrap_or_else(|_| url.to_string());
    info!("Login page detected at {}", current);
    ctx.events.emit(Event::LoginDetected {
        timestamp: Utc::now(),
        url: current,
    });
    perform_login(ctx, creds).await
}

/// Fill the credentials, submit, and confirm the login page is gone.
pub(crate) async fn perform_login(ctx: &Ctx<'_>, creds: &Credentials) -> Result<()> {
    ctx.events.emit(Event::LoginAttempting { timestamp: Utc::now() });

    let emails: Vec<Locator> = EMAIL_FIELDS.iter().map(|s| Locator::css(*s)).collect();
    if !fill_first(ctx, &emails, &creds.email).await? {
        return Err(Error::LoginFailed("email field not found".into()));
    }
    ctx.events.emit(Event::LoginEmailFilled { timestamp: Utc::now() });

    let password = password_field();
    let visible = ctx
        .page
        .wait_for(&password, 0, ElementState::Visible, Duration::ZERO)
        .await?;
    if !visible {
        debug!("password field hidden, advancing two-step form");
        click_first(ctx, &next_controls()).await?;
        ctx.page
            .wait_for(&password, 0, ElementState::Visible, PASSWORD_REVEAL_WAIT)
            .await?;
    }

    let passwords: Vec<Locator> = PASSWORD_FIELDS.iter().map(|s| Locator::css(*s)).collect();
    if !fill_first(ctx, &passwords, &creds.password).await? {
        return Err(Error::LoginFailed("password field not found".into()));
    }
    ctx.events.emit(Event::LoginPasswordFilled { timestamp: Utc::now() });

    if !click_first(ctx, &submit_controls(ctx)).await? {
        return Err(Error::LoginFailed("submit control not found".into()));
    }
    ctx.events.emit(Event::LoginSubmitted { timestamp: Utc::now() });

    await_stable(ctx.page, false, &ctx.settings.stability, &ctx.settings.vocabulary).await;

    match is_login_page(ctx).await {
        Ok(false) => {}
        Ok(true) => {
            return Err(Error::LoginFailed(
                "login page still shown after submitting credentials".into(),
            ))
        }
        Err(e) if e.is_page_closed() => {}
        Err(e) => return Err(e),
    }
    info!("Login succeeded");
    ctx.events.emit(Event::LoginSuccess { timestamp: Utc::now() });
    Ok(())
}

async fn fill_first(ctx: &Ctx<'_>, fields: &[Locator], value: &str) -> Result<bool> {
    for loc in fields {
        if ctx.page.count(loc).await? == 0 {
            continue;
        }
        if !ctx
            .page
            .wait_for(loc, 0, ElementState::Visible, FIELD_WAIT)
            .await?
        {
            continue;
        }
        match ctx.page.inspect(loc, 0).await? {
            Some(info) if info.is_fillable() => {}
            _ => continue,
        }
        match ctx.page.fill(loc, 0, value, ACTION_TIMEOUT).await {
            Ok(()) => {
                debug!("login filled {}", loc);
                return Ok(true);
            }
            Err(e) => debug!("login fill {} failed: {}", loc, e),
        }
    }
    Ok(false)
}

async fn click_first(ctx: &Ctx<'_>, controls: &[Locator]) -> Result<bool> {
    for loc in controls {
        if ctx.page.count(loc).await? == 0 {
            continue;
        }
        match ctx.page.click(loc, 0, ClickMode::Normal, ACTION_TIMEOUT).await {
            Ok(()) => {
                debug!("login clicked {}", loc);
                return Ok(true);
            }
            Err(e) if e.is_page_closed() => return Ok(true),
            Err(e) => debug!("login click {} failed: {}", loc, e),
        }
    }
    Ok(false)
}
