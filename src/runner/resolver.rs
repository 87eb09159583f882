//! Escalating element resolution.
//!
//! One tier runner, driven by a fixed list of tiers, re-scans the full
//! candidate list on every tier.

use super::stability::{await_stable, Settled};
use super::Ctx;
use crate::config::step::select_match;
use crate::config::ElementIndex;
use crate::driver::{ClickMode, ElementState, Locator};
use crate::events::DiagnosticKind;
use crate::locate::{self, Candidate};
use crate::{Error, Result};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// One escalation pass.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Tier {
    pub name: &'static str,
    /// Bound for any candidate to be attached. Zero means a single count pass.
    pub attach_wait: Duration,
    /// Bound for the chosen match to become visible, if required.
    pub visible_wait: Option<Duration>,
    pub action_timeout: Duration,
    /// Action timeout for authentication-submit targets.
    pub auth_action_timeout: Duration,
    /// Run a scroll sweep before scanning.
    pub scroll_sweep: bool,
    /// Dispatch the interaction directly, ignoring visibility.
    pub force: bool,
    /// Only the first N candidates are tried.
    pub limit: Option<usize>,
}

const QUICK: Tier = Tier {
    name: "quick",
    attach_wait: Duration::from_millis(400),
    visible_wait: None,
    action_timeout: Duration::from_millis(1200),
    auth_action_timeout: Duration::from_secs(5),
    scroll_sweep: false,
    force: false,
    limit: None,
};

const SWEEP: Tier = Tier {
    name: "scroll-sweep",
    attach_wait: Duration::from_millis(400),
    visible_wait: Some(Duration::from_millis(1200)),
    action_timeout: Duration::from_secs(2),
    auth_action_timeout: Duration::from_secs(5),
    scroll_sweep: true,
    force: false,
    limit: None,
};

const FORCE: Tier = Tier {
    name: "force",
    attach_wait: Duration::ZERO,
    visible_wait: None,
    action_timeout: Duration::from_secs(2),
    auth_action_timeout: Duration::from_secs(5),
    scroll_sweep: false,
    force: true,
    limit: Some(5),
};

pub(crate) const CLICK_TIERS: [Tier; 3] = [QUICK, SWEEP, FORCE];
/// Forcing text into a non-interactive field is unsafe, so fills stop before forcing.
pub(crate) const FILL_TIERS: [Tier; 2] = [QUICK, SWEEP];
pub(crate) const PROBE_TIERS: [Tier; 2] = [QUICK, SWEEP];

const SWEEP_STEPS: usize = 4;
const SWEEP_DISTANCE: i64 = 600;
const SWEEP_PAUSE: Duration = Duration::from_millis(150);
const XPATH_SWEEP_TIMEOUT: Duration = Duration::from_millis(1500);
const ATTACH_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy)]
enum Op<'v> {
    Click,
    Fill(&'v str),
    /// Only require the element to be visible.
    Probe,
}

impl Op<'_> {
    fn name(&self) -> &'static str {
        match self {
            Op::Click => "click",
            Op::Fill(_) => "fill",
            Op::Probe => "probe",
        }
    }
}

/// What a successful resolution used.
#[derive(Debug, Clone)]
pub(crate) struct Resolved {
    pub tier: &'static str,
    pub locator: Locator,
    pub nth: usize,
}

/// Reset to the top, then scroll down a few steps to trigger lazy rendering.
pub(crate) async fn scroll_sweep(ctx: &Ctx<'_>) {
    let _ = ctx.page.scroll_to_top().await;
    for _ in 0..SWEEP_STEPS {
        let _ = ctx.page.scroll_by(SWEEP_DISTANCE).await;
        tokio::time::sleep(SWEEP_PAUSE).await;
    }
}

/// Stability wait after a successful state change: lenient when the target
/// reads like navigation, strict otherwise.
pub(crate) async fn settle_after(ctx: &Ctx<'_>, target: &str) -> Settled {
    let lenient = ctx.settings.vocabulary.is_navigation_intent(target);
    let settled = await_stable(
        ctx.page,
        lenient,
        &ctx.settings.stability,
        &ctx.settings.vocabulary,
    )
    .await;
    debug!("settled after '{}' ({}): {:?}", target, if lenient { "lenient" } else { "strict" }, settled);
    if settled != Settled::Stable {
        ctx.diagnostic(DiagnosticKind::Stability, format!("{:?} after '{}'", settled, target));
    }
    settled
}

/// Click the target through the click tiers.
pub(crate) async fn click(
    ctx: &Ctx<'_>,
    candidates: &[Candidate],
    index: Option<ElementIndex>,
    target: &str,
) -> Result<Resolved> {
    let resolved = run_tiers(ctx, candidates, index, target, &CLICK_TIERS, Op::Click).await?;
    settle_after(ctx, target).await;
    Ok(resolved)
}

/// Fill the target through the fill tiers, skipping disabled, read-only and
/// hidden matches.
pub(crate) async fn fill(
    ctx: &Ctx<'_>,
    candidates: &[Candidate],
    index: Option<ElementIndex>,
    target: &str,
    value: &str,
) -> Result<Resolved> {
    run_tiers(ctx, candidates, index, target, &FILL_TIERS, Op::Fill(value)).await
}

/// Find a visible match without interacting.
pub(crate) async fn probe(
    ctx: &Ctx<'_>,
    candidates: &[Candidate],
    index: Option<ElementIndex>,
    target: &str,
) -> Result<Resolved> {
    run_tiers(ctx, candidates, index, target, &PROBE_TIERS, Op::Probe).await
}

async fn run_tiers(
    ctx: &Ctx<'_>,
    candidates: &[Candidate],
    index: Option<ElementIndex>,
    target: &str,
    tiers: &[Tier],
    op: Op<'_>,
) -> Result<Resolved> {
    if candidates.is_empty() {
        return Err(Error::resolution(target, "no candidate locators"));
    }
    let auth = ctx.settings.vocabulary.is_auth_submit(target);
    let mut last_error: Option<String> = None;

    for tier in tiers {
        let limit = tier.limit.unwrap_or(candidates.len()).min(candidates.len());
        debug!(
            "{} '{}': tier {} over {} candidates",
            op.name(),
            target,
            tier.name,
            limit
        );
        ctx.diagnostic(
            DiagnosticKind::Tier,
            format!("{} {} over {} candidates", tier.name, op.name(), limit),
        );
        if tier.scroll_sweep {
            scroll_sweep(ctx).await;
        }

        let live = live_candidates(ctx, &candidates[..limit], index, tier.attach_wait).await?;
        if live.is_empty() {
            debug!("  {}: nothing attached", tier.name);
        }
        for (cand, nth) in live {
            match attempt(ctx, tier, cand, nth, auth, op).await {
                Ok(true) => {
                    debug!(
                        "{} '{}' resolved by {} ({}) in tier {}",
                        op.name(),
                        target,
                        cand.locator,
                        cand.strategy.name(),
                        tier.name
                    );
                    let kind = match op {
                        Op::Click => Some(DiagnosticKind::Click),
                        Op::Fill(_) => Some(DiagnosticKind::Fill),
                        Op::Probe => None,
                    };
                    if let Some(kind) = kind {
                        ctx.diagnostic(
                            kind,
                            format!("{} via {} [{}] ({})", target, cand.locator, nth, tier.name),
                        );
                    }
                    return Ok(Resolved {
                        tier: tier.name,
                        locator: cand.locator.clone(),
                        nth,
                    });
                }
                Ok(false) => {}
                Err(e) if e.is_page_closed() && matches!(op, Op::Click) => {
                    debug!("page closed after clicking '{}', treating as navigation", target);
                    return Ok(Resolved {
                        tier: tier.name,
                        locator: cand.locator.clone(),
                        nth,
                    });
                }
                Err(e) if e.is_page_closed() => return Err(e),
                Err(e) => {
                    debug!("  {} {}: {}", tier.name, cand.locator, e);
                    last_error = Some(e.to_string());
                }
            }
        }
    }

    let detail = match last_error {
        Some(e) => format!(
            "{} candidates exhausted across {} tiers, last error: {}",
            candidates.len(),
            tiers.len(),
            e
        ),
        None => format!(
            "{} candidates exhausted across {} tiers, no match",
            candidates.len(),
            tiers.len()
        ),
    };
    Err(Error::resolution(target, detail))
}

/// Candidates with a usable match, polling up to `wait` for the first one
/// to attach. Each comes with the zero-based match it selects.
async fn live_candidates<'c>(
    ctx: &Ctx<'_>,
    candidates: &'c [Candidate],
    index: Option<ElementIndex>,
    wait: Duration,
) -> Result<Vec<(&'c Candidate, usize)>> {
    let deadline = Instant::now() + wait;
    loop {
        let mut live = Vec::new();
        for cand in candidates {
            let count = match ctx.page.count(&cand.locator).await {
                Ok(n) => n,
                Err(e) if e.is_page_closed() => return Err(e),
                Err(e) => {
                    debug!("  count {}: {}", cand.locator, e);
                    continue;
                }
            };
            if let Some(nth) = select_match(index, count) {
                live.push((cand, nth));
            }
        }
        if !live.is_empty() || Instant::now() >= deadline {
            return Ok(live);
        }
        tokio::time::sleep(ATTACH_POLL).await;
    }
}

/// Try one attached match in one tier. `Ok(false)` means "not usable here".
async fn attempt(
    ctx: &Ctx<'_>,
    tier: &Tier,
    cand: &Candidate,
    nth: usize,
    auth: bool,
    op: Op<'_>,
) -> Result<bool> {
    let page = ctx.page;
    let loc = &cand.locator;

    if let Some(wait) = tier.visible_wait {
        if !page.wait_for(loc, nth, ElementState::Visible, wait).await? {
            return Ok(false);
        }
    }

    let timeout = if auth {
        tier.auth_action_timeout
    } else {
        tier.action_timeout
    };

    match op {
        Op::Click if tier.force => {
            let mut last = None;
            for mode in [ClickMode::Programmatic, ClickMode::DispatchEvent] {
                match page.click(loc, nth, mode, timeout).await {
                    Ok(()) => return Ok(true),
                    Err(e) if e.is_page_closed() => return Err(e),
                    Err(e) => last = Some(e),
                }
            }
            Err(last.unwrap_or_else(|| Error::ActionFailed("force click failed".into())))
        }
        Op::Click => {
            let _ = page.scroll_into_view(loc, nth).await;
            page.click(loc, nth, ClickMode::Normal, timeout).await?;
            Ok(true)
        }
        Op::Fill(value) => {
            match page.inspect(loc, nth).await? {
                Some(info) if info.is_fillable() => {}
                Some(info) => {
                    debug!(
                        "  skip {} [{}]: visible={} disabled={} readonly={}",
                        loc, nth, info.visible, info.disabled, info.read_only
                    );
                    return Ok(false);
                }
                None => return Ok(false),
            }
            page.fill(loc, nth, value, timeout).await?;
            Ok(true)
        }
        Op::Probe => page.wait_for(loc, nth, ElementState::Visible, timeout).await,
    }
}

/// Last-resort sweep over text-equality and text-containment XPaths, each
/// tried with every click mode.
pub(crate) async fn xpath_sweep(ctx: &Ctx<'_>, target: &str, index: Option<ElementIndex>) -> bool {
    for loc in locate::sweep_locators(target) {
        let count = match ctx.page.count(&loc).await {
            Ok(n) => n,
            Err(e) if e.is_page_closed() => return true,
            Err(_) => continue,
        };
        let Some(nth) = select_match(index, count) else {
            continue;
        };
        for mode in ClickMode::ALL {
            match ctx.page.click(&loc, nth, mode, XPATH_SWEEP_TIMEOUT).await {
                Ok(()) => {
                    debug!("xpath sweep clicked {} [{}] ({})", loc, nth, mode.name());
                    ctx.diagnostic(
                        DiagnosticKind::Click,
                        format!("{} via sweep {} [{}] ({})", target, loc, nth, mode.name()),
                    );
                    settle_after(ctx, target).await;
                    return true;
                }
                Err(e) if e.is_page_closed() => return true,
                Err(e) => debug!("  sweep {} ({}): {}", loc, mode.name(), e),
            }
        }
    }
    false
}
