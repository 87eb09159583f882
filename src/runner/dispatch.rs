//! Step dispatch by action kind.

use super::stability::await_stable;
use super::{conditional, resolver, verify, Ctx};
use crate::config::step::select_match;
use crate::config::{ActionKind, ElementIndex, Step};
use crate::driver::{ClickMode, ElementState, Locator};
use crate::events::DiagnosticKind;
use crate::locate::{self, Candidate};
use crate::{Error, Result};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

const APPEAR_POLLS: usize = 6;
const APPEAR_INTERVAL: Duration = Duration::from_millis(500);
const TRIGGER_TIMEOUT: Duration = Duration::from_secs(2);
const OPTION_WAIT: Duration = Duration::from_secs(1);
const DEFAULT_WAIT: Duration = Duration::from_secs(1);

/// Execute one step, including `if`.
pub(crate) async fn execute_step(ctx: &Ctx<'_>, step: &Step) -> Result<()> {
    match step.action {
        ActionKind::If => conditional::run(ctx, step).await,
        _ => execute_action(ctx, step).await,
    }
}

/// Execute one non-conditional step.
pub(crate) async fn execute_action(ctx: &Ctx<'_>, step: &Step) -> Result<()> {
    match &step.action {
        ActionKind::Navigate => navigate(ctx, step).await,
        ActionKind::Click => click(ctx, step).await,
        ActionKind::Input => input(ctx, step).await,
        ActionKind::Upload => upload(ctx, step).await,
        ActionKind::Verify => verify::verify(ctx, step).await,
        ActionKind::Back => {
            if let Err(e) = ctx.page.back().await {
                warn!("step {}: back failed: {}", step.step, e);
            }
            await_stable(ctx.page, true, &ctx.settings.stability, &ctx.settings.vocabulary).await;
            Ok(())
        }
        ActionKind::Refresh => {
            ctx.page.reload().await?;
            await_stable(ctx.page, false, &ctx.settings.stability, &ctx.settings.vocabulary).await;
            Ok(())
        }
        ActionKind::Wait => {
            let d = step.declared_duration().unwrap_or(DEFAULT_WAIT);
            debug!("step {}: waiting {:?}", step.step, d);
            tokio::time::sleep(d).await;
            Ok(())
        }
        ActionKind::If => {
            warn!("step {}: nested conditional ignored", step.step);
            Ok(())
        }
        ActionKind::Other(name) => {
            info!("step {}: unknown action '{}', skipping", step.step, name);
            Ok(())
        }
    }
}

async fn navigate(ctx: &Ctx<'_>, step: &Step) -> Result<()> {
    let url = if step.target.is_empty() {
        step.value.as_deref().unwrap_or_default()
    } else {
        step.target.as_str()
    };
    info!("Navigating to {}", url);
    ctx.page.goto(url).await?;
    if ctx.settings.vocabulary.is_embedded_app_url(url) {
        debug!("{} hosts an embedded app, waiting for it to mount", url);
        let settled =
            await_stable(ctx.page, false, &ctx.settings.stability, &ctx.settings.vocabulary).await;
        ctx.diagnostic(DiagnosticKind::Stability, format!("{:?} after navigate", settled));
    }
    Ok(())
}

async fn click(ctx: &Ctx<'_>, step: &Step) -> Result<()> {
    let target = step.target.as_str();

    if step.use_ai {
        ctx.diagnostic(DiagnosticKind::Fallback, format!("assisted click on '{}'", target));
        return assisted_click(ctx, target).await;
    }

    let candidates = locate::generate_candidates(target, &step.action);

    if ctx.settings.vocabulary.is_dropdown_like(target)
        && dropdown(ctx, &candidates, step.index, target).await?
    {
        return Ok(());
    }

    let err = match resolver::click(ctx, &candidates, step.index, target).await {
        Ok(r) => {
            debug!("clicked '{}' via {} [{}] in tier {}", target, r.locator, r.nth, r.tier);
            return Ok(());
        }
        Err(e) => e,
    };
    debug!("resolver exhausted for '{}': {}", target, err);

    ctx.diagnostic(DiagnosticKind::Fallback, format!("assist for '{}'", target));
    if assisted_click(ctx, target).await.is_ok() {
        return Ok(());
    }

    ctx.diagnostic(DiagnosticKind::Fallback, format!("xpath sweep for '{}'", target));
    if resolver::xpath_sweep(ctx, target, step.index).await {
        return Ok(());
    }

    Err(err)
}

async fn assisted_click(ctx: &Ctx<'_>, target: &str) -> Result<()> {
    if ctx
        .assist
        .attempt_click(ctx.page, target, ctx.settings.assist_attempts)
        .await
    {
        resolver::settle_after(ctx, target).await;
        Ok(())
    } else {
        Err(Error::resolution(target, "assisted click found no match"))
    }
}

/// Dropdown and state-option targets. Returns `true` when the step is done.
///
/// Waits for the option to appear; when it is already selected the click is
/// skipped. When it never appears, opens a dropdown trigger and picks the
/// option from the panel. Otherwise the standard resolver takes over.
async fn dropdown(
    ctx: &Ctx<'_>,
    candidates: &[Candidate],
    index: Option<ElementIndex>,
    target: &str,
) -> Result<bool> {
    if let Some((loc, nth)) = wait_for_any(ctx, candidates, index).await? {
        if let Some(info) = ctx.page.inspect(&loc, nth).await? {
            if info.looks_selected() {
                info!("'{}' is already selected, skipping click", target);
                ctx.diagnostic(
                    DiagnosticKind::Skip,
                    format!("'{}' already selected ({} [{}])", target, loc, nth),
                );
                return Ok(true);
            }
        }
        return Ok(false);
    }

    for trigger in locate::dropdown_triggers() {
        if ctx.page.count(&trigger).await? == 0 {
            continue;
        }
        if let Err(e) = ctx
            .page
            .click(&trigger, 0, ClickMode::Normal, TRIGGER_TIMEOUT)
            .await
        {
            debug!("dropdown trigger {} failed: {}", trigger, e);
            continue;
        }
        ctx.diagnostic(DiagnosticKind::Fallback, format!("opened dropdown via {}", trigger));

        for option in locate::option_locators(target) {
            if !ctx
                .page
                .wait_for(&option, 0, ElementState::Attached, OPTION_WAIT)
                .await?
            {
                continue;
            }
            let count = ctx.page.count(&option).await?;
            let Some(nth) = select_match(index, count) else {
                continue;
            };
            match ctx
                .page
                .click(&option, nth, ClickMode::Normal, TRIGGER_TIMEOUT)
                .await
            {
                Ok(()) => {
                    ctx.diagnostic(
                        DiagnosticKind::Click,
                        format!("{} via option {} [{}]", target, option, nth),
                    );
                    resolver::settle_after(ctx, target).await;
                    return Ok(true);
                }
                Err(e) if e.is_page_closed() => return Ok(true),
                Err(e) => debug!("dropdown option {} failed: {}", option, e),
            }
        }
        // One opened panel is enough to know the option is not in it.
        break;
    }
    Ok(false)
}

/// Poll until any candidate matches.
async fn wait_for_any(
    ctx: &Ctx<'_>,
    candidates: &[Candidate],
    index: Option<ElementIndex>,
) -> Result<Option<(Locator, usize)>> {
    for poll in 0..APPEAR_POLLS {
        for cand in candidates {
            let count = match ctx.page.count(&cand.locator).await {
                Ok(n) => n,
                Err(e) if e.is_page_closed() => return Err(e),
                Err(_) => continue,
            };
            if let Some(nth) = select_match(index, count) {
                return Ok(Some((cand.locator.clone(), nth)));
            }
        }
        if poll + 1 < APPEAR_POLLS {
            tokio::time::sleep(APPEAR_INTERVAL).await;
        }
    }
    Ok(None)
}

async fn input(ctx: &Ctx<'_>, step: &Step) -> Result<()> {
    let target = step.target.as_str();
    let value = step.value.as_deref().unwrap_or_default();

    if step.use_ai {
        ctx.diagnostic(DiagnosticKind::Fallback, format!("assisted fill of '{}'", target));
        return if ctx.assist.attempt_fill(ctx.page, target, value).await {
            Ok(())
        } else {
            Err(Error::resolution(target, "assisted fill found no input"))
        };
    }

    let candidates = locate::generate_candidates(target, &ActionKind::Input);
    resolver::fill(ctx, &candidates, step.index, target, value).await?;
    await_stable(ctx.page, true, &ctx.settings.stability, &ctx.settings.vocabulary).await;
    Ok(())
}

async fn upload(ctx: &Ctx<'_>, step: &Step) -> Result<()> {
    let target = step.target.as_str();
    let path = ctx
        .uploads
        .resolve(step.value.as_deref().unwrap_or_default())?;
    info!("Uploading {}", path.display());

    if set_file(ctx, &locate::file_input_candidates(target), step.index, &path).await? {
        return Ok(());
    }

    if !target.is_empty() {
        let candidates = locate::generate_candidates(target, &ActionKind::Click);
        if let Err(e) = resolver::click(ctx, &candidates, step.index, target).await {
            debug!("could not click upload target '{}': {}", target, e);
        }
        let generic = [Locator::css("input[type=\"file\"]")];
        if set_file(ctx, &generic, None, &path).await? {
            return Ok(());
        }
    }

    Err(Error::ActionFailed(format!(
        "no file input accepted {}",
        path.display()
    )))
}

async fn set_file(
    ctx: &Ctx<'_>,
    inputs: &[Locator],
    index: Option<ElementIndex>,
    path: &Path,
) -> Result<bool> {
    for loc in inputs {
        let count = ctx.page.count(loc).await?;
        let Some(nth) = select_match(index, count) else {
            continue;
        };
        match ctx.page.set_input_file(loc, nth, path).await {
            Ok(()) => {
                debug!("set {} on {} [{}]", path.display(), loc, nth);
                return Ok(true);
            }
            Err(e) if e.is_page_closed() => return Err(e),
            Err(e) => debug!("set file on {} failed: {}", loc, e),
        }
    }
    Ok(false)
}
