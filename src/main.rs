//! CloudRunner CLI Entry Point
//!
//! Runs a workflow file against the simulated compute provider, storing
//! serial console logs in a local directory.
//!
//! # Usage
//!
//! ```bash
//! # Execute a workflow
//! cloudrunner build-image.yaml
//!
//! # Store console logs somewhere else
//! cloudrunner build-image.yaml --storage-dir /tmp/logs
//!
//! # Cancel the run by touching a file
//! cloudrunner build-image.yaml --cancel-flag /tmp/cancel.flag
//!
//! # Poll serial consoles every second
//! cloudrunner build-image.yaml --serial-interval 1
//! ```

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info};

use cloudrunner::cloud::{LocalStorage, SimulatedCompute};
use cloudrunner::execution::Engine;
use cloudrunner::monitoring::ConsoleLogSink;
use cloudrunner::workflow::parser::load_workflow;
use cloudrunner::workflow::state::STATE_DIR;
use cloudrunner::{APP_NAME, VERSION};

/// Default workflow file used when none is specified.
const DEFAULT_WORKFLOW: &str = "workflow.yaml";

/// Default root of the local object store.
const DEFAULT_STORAGE_DIR: &str = "./cloudrunner-storage";

/// Command-line configuration parsed from arguments.
#[derive(Debug)]
struct Config {
    workflow_path: String,
    storage_dir: PathBuf,
    state_dir: PathBuf,
    cancel_flag_path: Option<PathBuf>,
    serial_interval: Option<Duration>,
    verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workflow_path: DEFAULT_WORKFLOW.to_string(),
            storage_dir: PathBuf::from(DEFAULT_STORAGE_DIR),
            state_dir: PathBuf::from(STATE_DIR),
            cancel_flag_path: None,
            serial_interval: None,
            verbose: false,
        }
    }
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME, VERSION);
    println!("Parallel Instance Provisioning");
    println!();
}

fn print_usage() {
    println!("Usage: cloudrunner [OPTIONS] <WORKFLOW_FILE>");
    println!();
    println!("Arguments:");
    println!("  <WORKFLOW_FILE>          Path to workflow YAML file");
    println!();
    println!("Options:");
    println!("  --storage-dir PATH       Root directory for stored logs (default: {})", DEFAULT_STORAGE_DIR);
    println!("  --state-dir PATH         Directory for provision state (default: {})", STATE_DIR);
    println!("  --cancel-flag PATH       Cancel the workflow when this file appears");
    println!("  --serial-interval SECS   Serial console polling interval");
    println!("  --verbose                Enable debug logging");
    println!("  --help                   Show this help message");
    println!("  --version                Show version information");
    println!();
    println!("Examples:");
    println!("  cloudrunner build-image.yaml");
    println!("  cloudrunner build-image.yaml --cancel-flag /tmp/cancel.flag --serial-interval 1");
}

/// Takes the value following an option.
fn option_value<'a>(args: &'a [String], i: &mut usize, option: &str) -> Result<&'a str, String> {
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| format!("{} requires a value", option))
}

/// Parses command-line arguments into a Config struct.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut positional_index = 0;
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--verbose" | "-v" => {
                config.verbose = true;
            }
            "--storage-dir" => {
                config.storage_dir = PathBuf::from(option_value(args, &mut i, arg)?);
            }
            "--state-dir" => {
                config.state_dir = PathBuf::from(option_value(args, &mut i, arg)?);
            }
            "--cancel-flag" => {
                config.cancel_flag_path = Some(PathBuf::from(option_value(args, &mut i, arg)?));
            }
            "--serial-interval" => {
                let value = option_value(args, &mut i, arg)?;
                let secs: u64 = value
                    .parse()
                    .map_err(|_| format!("Invalid serial interval: {}", value))?;
                if secs == 0 {
                    return Err("--serial-interval must be at least 1".to_string());
                }
                config.serial_interval = Some(Duration::from_secs(secs));
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => {
                match positional_index {
                    0 => config.workflow_path = arg.clone(),
                    _ => return Err(format!("Unexpected argument: {}", arg)),
                }
                positional_index += 1;
            }
        }
        i += 1;
    }

    Ok(config)
}

/// Main application entry point.
fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let config = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    setup_logging(config.verbose);
    print_banner();

    if let Some(ref path) = config.cancel_flag_path {
        info!("Cancel control: {}", path.display());
    }
    info!("Log storage: {}", config.storage_dir.display());

    info!("Loading workflow: {}", config.workflow_path);
    let workflow = load_workflow(&config.workflow_path).map_err(|e| {
        error!("Failed to load workflow: {}", e);
        format!(
            "Could not load workflow from '{}': {}",
            config.workflow_path, e
        )
    })?;

    info!(
        "Workflow loaded: {} steps, {} instances",
        workflow.steps.len(),
        workflow.instance_count()
    );

    let mut engine = Engine::new(
        workflow,
        Arc::new(SimulatedCompute::new()),
        Arc::new(LocalStorage::new(config.storage_dir)),
        Arc::new(ConsoleLogSink),
    );
    engine.set_workflow_path(&config.workflow_path);
    engine.set_state_dir(config.state_dir);

    if let Some(path) = config.cancel_flag_path {
        engine.set_cancel_flag_path(path);
    }
    if let Some(interval) = config.serial_interval {
        engine.set_serial_interval(interval);
    }

    engine.run()?;

    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
