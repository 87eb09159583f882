//! Test execution.

mod conditional;
mod dispatch;
mod login;
mod resolver;
mod result;
mod session;
mod stability;
mod verify;

pub use result::{ExecutionResult, RunStatus, StepResult};
pub use stability::{await_stable, Settled};

use crate::assist::ElementAssist;
use crate::classify::FailureKind;
use crate::config::{ActionKind, Credentials, EngineSettings, TestCase, Viewport};
use crate::driver::{BrowserDriver, LaunchOptions, PageDriver};
use crate::events::{DiagnosticKind, Envelope, Event, EventBus, EventSink, ExecutionId};
use crate::timeout::TimeoutPolicy;
use crate::uploads::UploadStore;
use crate::{Error, Result};
use chrono::Utc;
use futures::FutureExt;
use session::ExecutionSession;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Everything a step needs, borrowed for one execution.
#[derive(Clone, Copy)]
pub(crate) struct Ctx<'a> {
    pub page: &'a dyn PageDriver,
    pub settings: &'a EngineSettings,
    pub assist: &'a dyn ElementAssist,
    pub events: &'a EventSink,
    pub uploads: &'a UploadStore,
    /// Position of the running step, if any.
    pub step: Option<usize>,
}

impl Ctx<'_> {
    pub fn diagnostic(&self, kind: DiagnosticKind, message: impl Into<String>) {
        self.events.diagnostic(self.step, kind, message);
    }
}

/// Per-execution options.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub headless: bool,
    pub slow_mo_ms: u64,
    /// Credentials for login-on-demand. Falls back to the test's own `login`.
    pub login: Option<Credentials>,
    pub viewport: Option<Viewport>,
    pub proxy: Option<String>,
    pub user_agent: Option<String>,
}

impl RunOptions {
    /// Options taken from the test's `browser` and `login` sections.
    pub fn from_test(test: &TestCase) -> Self {
        Self {
            headless: test.browser.headless,
            slow_mo_ms: test.browser.slow_mo_ms,
            login: test.login.clone(),
            viewport: test.browser.viewport,
            proxy: test.browser.proxy.clone(),
            user_agent: test.browser.user_agent.clone(),
        }
    }

    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn with_login(mut self, login: Credentials) -> Self {
        self.login = Some(login);
        self
    }
}

/// An execution running on its own task.
pub struct RunHandle {
    pub id: ExecutionId,
    /// Subscribed before the execution started, so no event is missed.
    pub events: broadcast::Receiver<Envelope>,
    handle: JoinHandle<ExecutionResult>,
}

impl RunHandle {
    /// Wait for the execution to finish.
    pub async fn result(self) -> Result<ExecutionResult> {
        self.handle
            .await
            .map_err(|e| Error::Driver(format!("execution task failed: {}", e)))
    }
}

/// Runs tests. Cheap to clone; executions share nothing but settings and the
/// event bus.
#[derive(Clone)]
pub struct Engine {
    driver: Arc<dyn BrowserDriver>,
    assist: Arc<dyn ElementAssist>,
    settings: Arc<EngineSettings>,
    uploads: Arc<UploadStore>,
    timeouts: TimeoutPolicy,
    bus: EventBus,
}

impl Engine {
    pub fn new(
        driver: Arc<dyn BrowserDriver>,
        assist: Arc<dyn ElementAssist>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            driver,
            assist,
            uploads: Arc::new(UploadStore::new(settings.upload_dir.clone())),
            timeouts: TimeoutPolicy::new(settings.vocabulary.clone()),
            settings: Arc::new(settings),
            bus: EventBus::new(),
        }
    }

    /// Publish events on a shared bus instead of a private one.
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = bus;
        self
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Run a test. Never fails; every failure ends up in the result.
    pub async fn execute(&self, test: &TestCase, opts: RunOptions) -> ExecutionResult {
        self.execute_with_id(ExecutionId::new(), test, opts).await
    }

    /// Run a test under a caller-chosen id, e.g. after subscribing to it.
    pub async fn execute_with_id(
        &self,
        id: ExecutionId,
        test: &TestCase,
        opts: RunOptions,
    ) -> ExecutionResult {
        let sink = self.bus.open(id);
        self.run(sink, test, &opts).await
    }

    /// Run a test, delivering every event to `on_event` as it happens.
    pub async fn execute_test<F>(
        &self,
        test: &TestCase,
        opts: RunOptions,
        on_event: F,
    ) -> ExecutionResult
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let sink = self.bus.open(ExecutionId::new()).with_hook(on_event);
        self.run(sink, test, &opts).await
    }

    /// Run a test on its own task.
    pub fn spawn(&self, test: TestCase, opts: RunOptions) -> RunHandle {
        let id = ExecutionId::new();
        let events = self.bus.subscribe(id);
        let engine = self.clone();
        let handle = tokio::spawn(async move { engine.execute_with_id(id, &test, opts).await });
        RunHandle { id, events, handle }
    }

    fn launch_options(&self, opts: &RunOptions) -> LaunchOptions {
        LaunchOptions {
            headless: opts.headless,
            slow_mo: Duration::from_millis(opts.slow_mo_ms),
            viewport: opts.viewport.map(|v| (v.width, v.height)),
            proxy: opts.proxy.clone(),
            user_agent: opts.user_agent.clone(),
            video_dir: Some(self.settings.video_dir.clone()),
        }
    }

    async fn run(&self, sink: EventSink, test: &TestCase, opts: &RunOptions) -> ExecutionResult {
        let id = sink.id();
        let started_at = Utc::now();
        info!("Running test: {} ({} steps) [{}]", test.name, test.steps.len(), id);
        sink.emit(Event::Start {
            timestamp: started_at,
            test_id: test.id.clone(),
            test_name: test.name.clone(),
            total_steps: test.steps.len(),
        });

        let mut steps = Vec::new();
        let mut error = None;
        let mut video = None;

        match ExecutionSession::open(self.driver.as_ref(), &self.launch_options(opts)).await {
            Err(e) => {
                error!("browser launch failed: {}", e);
                error = Some(format!("browser launch failed: {}", e));
            }
            Ok(session) => {
                {
                    let ctx = Ctx {
                        page: session.page(),
                        settings: &self.settings,
                        assist: self.assist.as_ref(),
                        events: &sink,
                        uploads: &self.uploads,
                        step: None,
                    };
                    let login = opts.login.as_ref().or(test.login.as_ref());
                    let gated = match login {
                        Some(creds) => {
                            let budget = self.timeouts.login_budget(test);
                            tokio::time::timeout(budget, login::gate(&ctx, test, creds))
                                .await
                                .unwrap_or(Err(Error::LoginTimeout {
                                    ms: budget.as_millis() as u64,
                                }))
                        }
                        None => Ok(()),
                    };
                    match gated {
                        Ok(()) => {
                            let run = AssertUnwindSafe(self.run_steps(&ctx, test, &mut steps))
                                .catch_unwind()
                                .await;
                            if let Err(panic) = run {
                                let msg = panic_message(panic.as_ref());
                                error!("step panicked: {}", msg);
                                if let Some(step) = test.steps.get(steps.len()) {
                                    let result = StepResult {
                                        step: step.step,
                                        action: step.action.name().to_string(),
                                        target: step.target.clone(),
                                        status: RunStatus::Failed,
                                        error: Some(format!("internal error: {}", msg)),
                                        failure_kind: Some(FailureKind::Application),
                                        timestamp: Utc::now(),
                                        screenshot: None,
                                        duration_ms: 0,
                                    };
                                    emit_step_end(&sink, &result);
                                    steps.push(result);
                                }
                            }
                        }
                        Err(e) => {
                            warn!("login failed: {}", e);
                            let message = e.to_string();
                            sink.emit(match e {
                                Error::LoginFailed(_) => Event::LoginFailed {
                                    timestamp: Utc::now(),
                                    message: message.clone(),
                                },
                                _ => Event::LoginError {
                                    timestamp: Utc::now(),
                                    message: message.clone(),
                                },
                            });
                            error = Some(message);
                        }
                    }
                }
                video = session.teardown(&self.settings.video_dir, id).await;
            }
        }

        let status = if error.is_none() && steps.iter().all(StepResult::passed) {
            RunStatus::Passed
        } else {
            RunStatus::Failed
        };
        let result = ExecutionResult {
            execution_id: id,
            test_id: test.id.clone(),
            test_name: test.name.clone(),
            status,
            steps,
            video,
            started_at,
            completed_at: Utc::now(),
            error,
        };

        match status {
            RunStatus::Passed => info!("✓ {} passed in {}ms", test.name, result.duration_ms()),
            RunStatus::Failed => info!(
                "✗ {} failed: {}",
                test.name,
                result.error_message().unwrap_or("unknown error")
            ),
        }
        sink.emit(Event::End {
            timestamp: result.completed_at,
            status,
            message: result.error_message().map(str::to_string),
        });
        self.bus.close(id);
        result
    }

    /// Run steps in order, stopping at the first failure.
    async fn run_steps(&self, base: &Ctx<'_>, test: &TestCase, results: &mut Vec<StepResult>) {
        for step in &test.steps {
            let ctx = Ctx {
                step: Some(step.step),
                ..*base
            };
            let budget = self.timeouts.timeout_for(step);
            info!(
                "Step {}/{}: {} {}",
                step.step,
                test.steps.len(),
                step.action.name(),
                step.target
            );
            debug!("step {} budget {:?}", step.step, budget);
            ctx.events.emit(Event::StepStart {
                timestamp: Utc::now(),
                step: step.step,
                action: step.action.name().to_string(),
                target: step.target.clone(),
            });

            let timestamp = Utc::now();
            let started = Instant::now();
            let outcome = match tokio::time::timeout(budget, dispatch::execute_step(&ctx, step)).await
            {
                Ok(outcome) => outcome,
                Err(_) if step.action == ActionKind::If => {
                    warn!(
                        "step {}: conditional ran past {:?}, continuing",
                        step.step, budget
                    );
                    Ok(())
                }
                Err(_) => Err(Error::StepTimeout {
                    ms: budget.as_millis() as u64,
                }),
            };
            let duration_ms = started.elapsed().as_millis() as u64;

            let mut result = StepResult {
                step: step.step,
                action: step.action.name().to_string(),
                target: step.target.clone(),
                status: RunStatus::Passed,
                error: None,
                failure_kind: None,
                timestamp,
                screenshot: None,
                duration_ms,
            };
            let failed = outcome.is_err();
            if let Err(e) = outcome {
                warn!("Step {} failed: {}", step.step, e);
                result.status = RunStatus::Failed;
                result.failure_kind = Some(FailureKind::of(&e, &self.settings.vocabulary));
                result.error = Some(e.to_string());
                result.screenshot = self.capture_failure(&ctx, step.step).await;
            }
            emit_step_end(ctx.events, &result);
            results.push(result);
            if failed {
                return;
            }
        }
    }

    async fn capture_failure(&self, ctx: &Ctx<'_>, step: usize) -> Option<PathBuf> {
        if ctx.page.is_closed().await {
            return None;
        }
        let bytes = match ctx.page.screenshot().await {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!("failure screenshot failed: {}", e);
                return None;
            }
        };
        let dir = &self.settings.screenshot_dir;
        let path = dir.join(format!("{}-step-{}.png", ctx.events.id(), step));
        let written = async {
            tokio::fs::create_dir_all(dir).await?;
            tokio::fs::write(&path, &bytes).await
        }
        .await;
        match written {
            Ok(()) => Some(path),
            Err(e) => {
                debug!("writing {} failed: {}", path.display(), e);
                None
            }
        }
    }
}

fn emit_step_end(sink: &EventSink, result: &StepResult) {
    sink.emit(Event::StepEnd {
        timestamp: Utc::now(),
        step: result.step,
        action: result.action.clone(),
        target: result.target.clone(),
        status: result.status,
        message: result.error.clone(),
        duration_ms: result.duration_ms,
    });
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}
