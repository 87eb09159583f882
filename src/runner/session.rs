use crate::driver::{BrowserDriver, LaunchOptions, PageDriver};
use crate::events::ExecutionId;
use crate::Result;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

const VIDEO_EXTENSIONS: &[&str] = &["webm", "mp4"];

/// One browser, one context, one page, owned by a single execution.
///
/// [`teardown`](Self::teardown) consumes the session, so the browser is closed
/// exactly once.
pub(crate) struct ExecutionSession {
    page: Box<dyn PageDriver>,
    started: SystemTime,
}

impl ExecutionSession {
    pub async fn open(driver: &dyn BrowserDriver, opts: &LaunchOptions) -> Result<Self> {
        let started = SystemTime::now();
        let page = driver.launch(opts).await?;
        Ok(Self { page, started })
    }

    pub fn page(&self) -> &dyn PageDriver {
        self.page.as_ref()
    }

    /// Finalize the video and close the browser. Returns the video path when
    /// one was saved or found.
    pub async fn teardown(self, video_dir: &Path, id: ExecutionId) -> Option<PathBuf> {
        let video = self.finalize_video(video_dir, id).await;
        if let Err(e) = self.page.close().await {
            warn!("closing browser failed: {}", e);
        }
        video
    }

    async fn finalize_video(&self, video_dir: &Path, id: ExecutionId) -> Option<PathBuf> {
        if let Err(e) = tokio::fs::create_dir_all(video_dir).await {
            debug!("cannot create {}: {}", video_dir.display(), e);
        }
        let dest = video_dir.join(format!("{}.webm", id));
        match self.page.save_video(&dest).await {
            Ok(path) => return Some(path),
            Err(e) => debug!("video save failed: {}", e),
        }
        let found = newest_video(video_dir, self.started);
        if let Some(ref path) = found {
            debug!("using most recent video {}", path.display());
        }
        found
    }
}

/// The most recently modified video file in `dir` written since `since`.
pub(crate) fn newest_video(dir: &Path, since: SystemTime) -> Option<PathBuf> {
    std::fs::read_dir(dir)
        .ok()?
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            let ext = path.extension()?.to_str()?.to_ascii_lowercase();
            if !VIDEO_EXTENSIONS.contains(&ext.as_str()) {
                return None;
            }
            let modified = entry.metadata().ok()?.modified().ok()?;
            (modified >= since).then_some((modified, path))
        })
        .max_by_key(|(modified, _)| *modified)
        .map(|(_, path)| path)
}
