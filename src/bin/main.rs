use clap::Parser;
use eoka_qa::driver::EokaDriver;
use eoka_qa::store::{DirTestStore, TestStore};
use eoka_qa::{
    Credentials, Engine, EngineSettings, ExecutionResult, HeuristicAssist, Params, RunOptions,
    TestCase,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinSet;
use tracing::{warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "eoka-qa")]
#[command(about = "Run declarative browser tests")]
#[command(version)]
struct Cli {
    /// Test files or directories of test files
    #[arg(required = true)]
    tests: Vec<PathBuf>,

    /// Run in headless mode (overrides test files)
    #[arg(long)]
    headless: bool,

    /// Delay between browser operations, in milliseconds
    #[arg(long, value_name = "MS")]
    slow_mo: Option<u64>,

    /// Set a parameter (can be used multiple times)
    #[arg(short = 'P', long = "param", value_name = "KEY=VALUE")]
    params: Vec<String>,

    /// Engine settings file
    #[arg(long, value_name = "YAML")]
    settings: Option<PathBuf>,

    /// Login email for login-gated tests
    #[arg(long, env = "EOKA_QA_EMAIL")]
    login_email: Option<String>,

    /// Login password for login-gated tests
    #[arg(long, env = "EOKA_QA_PASSWORD", hide_env_values = true)]
    login_password: Option<String>,

    /// Write one JSON result per execution into this directory
    #[arg(long, value_name = "DIR")]
    report: Option<PathBuf>,

    /// Stream execution events to stdout as JSON lines
    #[arg(long)]
    events: bool,

    /// Validate tests without running
    #[arg(long)]
    check: bool,

    /// Verbose output (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (only errors)
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> eoka_qa::Result<()> {
    let cli = Cli::parse();

    let level = if cli.quiet {
        Level::ERROR
    } else {
        match cli.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            _ => Level::DEBUG,
        }
    };

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    let params = Params::from_args(&cli.params)?;
    let tests = load_tests(&cli.tests, &params)?;

    if cli.check {
        for test in &tests {
            print_summary(test);
        }
        return Ok(());
    }

    let settings = match cli.settings {
        Some(ref path) => EngineSettings::load(path)?,
        None => EngineSettings::default(),
    };
    let engine = Engine::new(
        Arc::new(EokaDriver::new()),
        Arc::new(HeuristicAssist::new()),
        settings,
    );

    let login = match (cli.login_email, cli.login_password) {
        (Some(email), Some(password)) => Some(Credentials::new(email, password)),
        (None, None) => None,
        _ => {
            warn!("both --login-email and --login-password are needed, ignoring login");
            None
        }
    };

    let mut set = JoinSet::new();
    for test in tests {
        let mut opts = RunOptions::from_test(&test);
        if cli.headless {
            opts = opts.headless(true);
        }
        if let Some(ms) = cli.slow_mo {
            opts.slow_mo_ms = ms;
        }
        if let Some(ref creds) = login {
            opts = opts.with_login(creds.clone());
        }

        println!("Running: {}", test.name);
        let mut handle = engine.spawn(test, opts);
        let stream = cli.events;
        set.spawn(async move {
            if stream {
                loop {
                    match handle.events.recv().await {
                        Ok(envelope) => match serde_json::to_string(&envelope) {
                            Ok(line) => println!("{}", line),
                            Err(e) => warn!("cannot encode event: {}", e),
                        },
                        Err(RecvError::Lagged(n)) => warn!("dropped {} events", n),
                        Err(RecvError::Closed) => break,
                    }
                }
            }
            handle.result().await
        });
    }

    let mut failed = 0;
    let mut total = 0;
    while let Some(joined) = set.join_next().await {
        total += 1;
        let result = match joined {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                failed += 1;
                println!("✗ {}", e);
                continue;
            }
            Err(e) => {
                failed += 1;
                println!("✗ execution task failed: {}", e);
                continue;
            }
        };
        print_result(&result);
        if !result.passed() {
            failed += 1;
        }
        if let Some(ref dir) = cli.report {
            write_report(dir, &result).await?;
        }
    }

    println!();
    println!("{} passed, {} failed", total - failed, failed);

    if failed > 0 {
        std::process::exit(1);
    }

    Ok(())
}

/// Files load directly; directories go through a test store.
fn load_tests(paths: &[PathBuf], params: &Params) -> eoka_qa::Result<Vec<TestCase>> {
    let mut tests = Vec::new();
    for path in paths {
        if path.is_dir() {
            let store = DirTestStore::open(path, params)?;
            let ids = store.ids();
            if ids.is_empty() {
                warn!("no tests found in {}", store.root().display());
            }
            tests.extend(ids.iter().filter_map(|id| store.get(id)));
        } else {
            tests.push(TestCase::load_with_params(path, params)?);
        }
    }
    Ok(tests)
}

fn print_summary(test: &TestCase) {
    println!("Test valid: {} ({})", test.name, test.id);
    println!("  Steps: {}", test.steps.len());
    if !test.params.is_empty() {
        println!("  Parameters: {}", test.params.len());
        for (name, def) in &test.params {
            let req = if def.required { " (required)" } else { "" };
            let desc = def.description.as_deref().unwrap_or("");
            println!("    - {}{}: {}", name, req, desc);
        }
    }
    if test.login.is_some() {
        println!("  Login: yes");
    }
}

fn print_result(result: &ExecutionResult) {
    println!();
    if result.passed() {
        println!("✓ {}", result.test_name);
    } else {
        println!("✗ {}", result.test_name);
        if let Some(error) = result.error_message() {
            println!("  Error: {}", error);
        }
        if let Some(step) = result.failed_step() {
            println!("  Step {}: {} '{}'", step.step, step.action, step.target);
            if let Some(ref shot) = step.screenshot {
                println!("  Screenshot: {}", shot.display());
            }
        }
    }
    println!("  Steps: {}", result.steps.len());
    println!("  Duration: {}ms", result.duration_ms());
    if let Some(ref video) = result.video {
        println!("  Video: {}", video.display());
    }
}

async fn write_report(dir: &Path, result: &ExecutionResult) -> eoka_qa::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(format!("{}-{}.json", result.test_id, result.execution_id));
    tokio::fs::write(&path, result.to_json()?).await?;
    Ok(())
}
