//! Best-effort "page has settled" waits.

use crate::config::{StabilitySettings, Vocabulary};
use crate::driver::{ElementState, Locator, PageDriver};
use std::time::Duration;
use tracing::debug;

/// How a stability wait ended. None of these is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settled {
    /// Every signal settled in time.
    Stable,
    /// At least one signal hit its bound; the wait gave up.
    TimedOut,
    /// The page went away, usually because the last action navigated.
    PageClosed,
}

/// Wait for the page to settle after a navigation or interaction.
///
/// Races network idle and loader disappearance against bounded timeouts. The
/// strict variant then polls the frame count until embedded apps have mounted;
/// the lenient one adds a short pause instead. Never fails.
pub async fn await_stable(
    page: &dyn PageDriver,
    lenient: bool,
    settings: &StabilitySettings,
    vocab: &Vocabulary,
) -> Settled {
    if page.is_closed().await {
        return Settled::PageClosed;
    }
    let mut timed_out = false;

    let net_timeout = Duration::from_millis(if lenient {
        settings.lenient_network_timeout_ms
    } else {
        settings.network_timeout_ms
    });
    let idle = Duration::from_millis(settings.network_idle_ms);
    match tokio::time::timeout(net_timeout, page.wait_for_network_idle(idle, net_timeout)).await {
        Ok(Ok(true)) => {}
        Ok(Ok(false)) | Err(_) => timed_out = true,
        Ok(Err(e)) if e.is_page_closed() => return Settled::PageClosed,
        Ok(Err(e)) => {
            debug!("network idle wait failed: {}", e);
            timed_out = true;
        }
    }

    if !vocab.loading_indicators.is_empty() {
        let loaders = Locator::Css(vocab.loading_indicators.join(", "));
        let loader_timeout = Duration::from_millis(if lenient {
            settings.lenient_loader_timeout_ms
        } else {
            settings.loader_timeout_ms
        });
        let wait = page.wait_for(&loaders, 0, ElementState::Hidden, loader_timeout);
        match tokio::time::timeout(loader_timeout, wait).await {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) | Err(_) => timed_out = true,
            Ok(Err(e)) if e.is_page_closed() => return Settled::PageClosed,
            Ok(Err(e)) => {
                debug!("loader wait failed: {}", e);
                timed_out = true;
            }
        }
    }

    if lenient {
        tokio::time::sleep(Duration::from_millis(settings.lenient_pause_ms)).await;
    } else {
        let interval = Duration::from_millis(settings.frame_poll_interval_ms);
        let mut mounted = false;
        for attempt in 0..settings.frame_poll_attempts.max(1) {
            match page.frame_count().await {
                Ok(n) if n >= settings.min_frames => {
                    mounted = true;
                    break;
                }
                Ok(n) => debug!("frames {}/{} (attempt {})", n, settings.min_frames, attempt + 1),
                Err(e) if e.is_page_closed() => return Settled::PageClosed,
                Err(e) => debug!("frame count failed: {}", e),
            }
            tokio::time::sleep(interval).await;
        }
        timed_out |= !mounted;
    }

    if page.is_closed().await {
        Settled::PageClosed
    } else if timed_out {
        Settled::TimedOut
    } else {
        Settled::Stable
    }
}
