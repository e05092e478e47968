use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use browser_pilot::browser::{BrowserCapability, BrowserError};
use browser_pilot::config::{ConfigOverrides, DEFAULT_CONFIG_PATH, Settings, UserCredentials};
use browser_pilot::report::ReportCompiler;
use browser_pilot::runner::SuiteRunner;
use browser_pilot::scenario::Scenario;
use browser_pilot::webdriver::WebDriverBrowser;

/// Browser Pilot - scenario-driven browser testing with styled reports
#[derive(Parser, Debug)]
#[command(
    name = "browser-pilot",
    about = "Run CSV browser scenarios against a WebDriver endpoint and compile styled reports"
)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

/// Flags shared by both subcommands for locating the configuration family
#[derive(clap::Args, Debug)]
struct ConfigArgs {
    /// Main configuration file
    #[arg(short, long, env = "BROWSER_PILOT_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Scenario CSV (overrides the config file)
    #[arg(short, long)]
    scenario: Option<PathBuf>,

    /// URL configuration file (overrides the config file)
    #[arg(long)]
    url_config: Option<PathBuf>,

    /// User configuration file (overrides the config file)
    #[arg(long)]
    user_config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Execute the scenario for every configured user
    Run {
        #[command(flatten)]
        config: ConfigArgs,

        /// Browser to drive (chrome, firefox, edge, safari)
        #[arg(short, long)]
        browser: Option<String>,

        /// Visible browser, irreversible effects suppressed by the driver
        #[arg(long)]
        test_mode: bool,

        /// Insert a delay between actions so a human can follow along
        #[arg(long)]
        slow_mode: bool,

        /// Explicit delay between actions in seconds (overrides modes)
        #[arg(long)]
        action_delay: Option<f64>,

        /// Stop at the first failed row instead of continuing
        #[arg(long)]
        fail_fast: bool,

        /// Verbose logging
        #[arg(short, long)]
        debug: bool,

        /// Output base directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// WebDriver endpoint, e.g. http://127.0.0.1:9515
        #[arg(long, env = "BROWSER_PILOT_WEBDRIVER")]
        webdriver: Option<String>,
    },

    /// Validate configuration, report styling, and the scenario file
    Check {
        #[command(flatten)]
        config: ConfigArgs,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();

    let debug = matches!(&args.command, Commands::Run { debug: true, .. });
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match args.command {
        Commands::Run {
            config,
            browser,
            test_mode,
            slow_mode,
            action_delay,
            fail_fast,
            debug,
            output,
            webdriver,
        } => {
            let overrides = ConfigOverrides {
                scenario: config.scenario.clone(),
                url_config: config.url_config.clone(),
                user_config: config.user_config.clone(),
                browser,
                test_mode,
                slow_mode,
                action_delay,
                debug,
                fail_fast,
                webdriver_url: webdriver,
                output_dir: output,
            };
            run_suite(&config.config, overrides)
        }
        Commands::Check { config } => check(&config),
    }
}

fn run_suite(config_path: &PathBuf, overrides: ConfigOverrides) -> ExitCode {
    let settings = match Settings::load(config_path, &overrides) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("Error: {}", err);
            return ExitCode::from(2);
        }
    };

    let endpoint = settings.run.webdriver_url.clone();
    let browser = settings.run.browser;
    let mode = settings.run.mode;
    let factory = move |session_id: usize,
                        _user: &UserCredentials|
          -> Result<Box<dyn BrowserCapability>, BrowserError> {
        tracing::debug!(session = session_id, "starting browser");
        Ok(Box::new(WebDriverBrowser::start(&endpoint, browser, mode)?))
    };

    let runner = SuiteRunner::new(settings);
    match runner.run(&factory) {
        Ok((suite, _, workspace)) => {
            println!(
                "{} session(s), {} failed row(s), output: {}",
                suite.sessions.len(),
                suite.total_failed(),
                workspace.root.display()
            );
            if suite.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            }
        }
        Err(err) => {
            eprintln!("Error: {}", err);
            ExitCode::from(2)
        }
    }
}

fn check(config: &ConfigArgs) -> ExitCode {
    let overrides = ConfigOverrides {
        scenario: config.scenario.clone(),
        url_config: config.url_config.clone(),
        user_config: config.user_config.clone(),
        ..ConfigOverrides::default()
    };

    let settings = match Settings::load(&config.config, &overrides) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("Config error: {}", err);
            return ExitCode::from(2);
        }
    };
    if let Err(err) = ReportCompiler::new(settings.report.clone()) {
        eprintln!("Report styling error: {}", err);
        return ExitCode::from(2);
    }
    let scenario = match Scenario::load(&settings.run.scenario_path) {
        Ok(scenario) => scenario,
        Err(err) => {
            eprintln!("Scenario error: {}", err);
            return ExitCode::from(2);
        }
    };

    println!(
        "OK: {} row(s) in {}, {} user(s), browser {}",
        scenario.len(),
        settings.run.scenario_path.display(),
        settings.run.users.len(),
        settings.run.browser
    );
    ExitCode::SUCCESS
}
