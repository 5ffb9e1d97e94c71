//! # stickcal
//!
//! Measure a game's stick response curve with a virtual gamepad.
//!
//! # Control Flow
//!
//! 1. **Initialization**
//!    - Parse the command line and load the TOML configuration
//!    - Set up logging to the console and a daily log file
//!    - Create the virtual pad and start the 100Hz output loop
//!
//! 2. **Main Loop**
//!    - Read one operator command per line from stdin
//!    - Route calibration actions through the debouncing dispatcher
//!    - Handle Ctrl+C for graceful shutdown
//!
//! 3. **Graceful Shutdown**
//!    - Stop any running session
//!    - Stop the output loop, leaving the pad neutral
//!
//! # Examples
//!
//! ```bash
//! cargo run --release -- --config config/default.toml --personality xbox360
//! ```
//!
//! Then type `start`, `deadzone_increase`, `end_deadzone`, `record`, ...

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use stickcal::calibration::{CalibrationStateMachine, CsvExporter, ExportSink, Transition};
use stickcal::clock::{Clock, MonotonicClock};
use stickcal::config::{Config, LoggingConfig};
use stickcal::controls::SharedControls;
use stickcal::gamepad::{lock_gamepad, Personality, SharedGamepad, VirtualGamepadOutput};
use stickcal::operator::{Dispatch, OperatorAction, OperatorDispatcher};
use stickcal::scheduler::{OutputScheduler, SchedulerConfig};

/// Default configuration file path
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Command line interface
#[derive(Parser, Debug)]
#[command(name = "stickcal", version, about)]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override the emulated pad (ds4 or xbox360)
    #[arg(short, long)]
    personality: Option<Personality>,

    /// Override the export directory
    #[arg(short, long)]
    export_dir: Option<PathBuf>,

    /// Start without creating the virtual pad (use `enable` later)
    #[arg(long)]
    no_device: bool,
}

/// One line of operator input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Action(OperatorAction),
    /// Center everything without stopping the session.
    Neutral,
    Enable,
    Disable,
    Status,
    Help,
    Quit,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "neutral" => Ok(Command::Neutral),
            "enable" => Ok(Command::Enable),
            "disable" => Ok(Command::Disable),
            "status" => Ok(Command::Status),
            "help" | "?" => Ok(Command::Help),
            "quit" | "exit" | "q" => Ok(Command::Quit),
            other => other.parse().map(Command::Action),
        }
    }
}

const HELP: &str = "commands: start, deadzone_increase, deadzone_decrease, end_deadzone, \
record, retry_last, stop (reset), neutral, enable, disable, status, help, quit";

/// Virtual pad plus the output loop driving it.
struct Device {
    gamepad: SharedGamepad,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

struct App {
    machine: Arc<CalibrationStateMachine>,
    controls: Arc<SharedControls>,
    clock: Arc<dyn Clock>,
    dispatcher: OperatorDispatcher,
    personality: Personality,
    scheduler_config: SchedulerConfig,
    device: Option<Device>,
}

impl App {
    /// Create the virtual pad and start its output loop. Does nothing if the
    /// pad already exists.
    fn enable(&mut self) -> Result<()> {
        if self.device.is_some() {
            info!("Virtual {} pad already enabled", self.personality);
            return Ok(());
        }

        let pad = VirtualGamepadOutput::open(self.personality)
            .with_context(|| format!("Failed to create virtual {} pad", self.personality))?;
        let gamepad: SharedGamepad = Arc::new(Mutex::new(pad));
        self.machine.attach_gamepad(gamepad.clone());

        let (shutdown, rx) = watch::channel(false);
        let scheduler = OutputScheduler::new(
            gamepad.clone(),
            self.controls.clone(),
            self.scheduler_config.clone(),
            self.clock.clone(),
        );
        let task = tokio::spawn(scheduler.run(rx));

        info!("Virtual {} pad enabled", self.personality);
        self.device = Some(Device {
            gamepad,
            shutdown,
            task,
        });
        Ok(())
    }

    /// Drop any session, stop the output loop and release the pad.
    async fn disable(&mut self) {
        let Some(device) = self.device.take() else {
            return;
        };
        self.machine.detach_gamepad();
        self.controls.center_all();

        let _ = device.shutdown.send(true);
        if let Err(e) = device.task.await {
            error!("Output loop ended abnormally: {}", e);
        }
        info!("Virtual pad disabled");
    }

    /// Handle one command. Returns `false` when the app should exit.
    async fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Action(action) => {
                let now = self.clock.now();
                match self.dispatcher.handle(&self.machine, action, now) {
                    Ok(Dispatch::Applied(transition)) => report_transition(&transition),
                    // Rejections are already logged by the dispatcher
                    Ok(Dispatch::Debounced) | Ok(Dispatch::Ignored(_)) | Err(_) => {}
                }
            }
            Command::Neutral => {
                self.controls.center_all();
                if let Some(device) = &self.device {
                    lock_gamepad(&device.gamepad).neutral();
                }
                info!("Sticks centered");
            }
            Command::Enable => {
                if let Err(e) = self.enable() {
                    error!("{:#}", e);
                }
            }
            Command::Disable => self.disable().await,
            Command::Status => self.log_status(),
            Command::Help => info!("{}", HELP),
            Command::Quit => return false,
        }
        true
    }

    fn log_status(&self) {
        let status = self.machine.status();
        info!(
            "mode={} armed={} in_trial={} device={}",
            status.mode,
            status.armed,
            status.in_trial,
            if self.device.is_some() { "enabled" } else { "disabled" }
        );
        self.machine.with_session(|session| {
            if let Some(s) = session {
                info!(
                    "candidate={:.4} deadzone={:.4} point={}/{} repeat={} samples={}",
                    s.candidate(),
                    s.deadzone_estimate(),
                    s.point_index() + 1,
                    s.measurement_magnitudes().len(),
                    s.repeat_index() + 1,
                    s.samples().len()
                );
            }
        });
        if let Some(device) = &self.device {
            let state = lock_gamepad(&device.gamepad).state();
            info!(
                "pad: held_button={:?} triggers=({:.2}, {:.2}) sticks={:?}",
                state.held_button, state.held_trigger_l, state.held_trigger_r, state.sticks
            );
        }
    }
}

fn report_transition(transition: &Transition) {
    if let Transition::Completed {
        report: Some(report),
        ..
    } = transition
    {
        info!("Compensation table (point, forward x/y, inverse x/y):");
        for row in &report.fit.compensation_table {
            info!(
                "  {:>2}  {:>7.2} {:>7.2}  {:>7.2} {:>7.2}",
                row.point_index, row.forward_x, row.forward_y, row.inv_x, row.inv_y
            );
        }
    }
}

/// Load the configuration, falling back to defaults when the default file
/// is absent. Returns the config and whether the fallback was used.
fn load_config(path: &Path) -> Result<(Config, bool)> {
    if !path.exists() && path == Path::new(DEFAULT_CONFIG_PATH) {
        return Ok((Config::default(), true));
    }
    let config = Config::load(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    Ok((config, false))
}

/// Console plus daily-rolling file logging. Keep the guard alive for the
/// lifetime of the program.
fn init_logging(config: &LoggingConfig) -> Result<WorkerGuard> {
    std::fs::create_dir_all(&config.dir)
        .with_context(|| format!("Failed to create log dir {}", config.dir.display()))?;
    let file_appender = tracing_appender::rolling::daily(&config.dir, &config.file_prefix);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .init();

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, defaulted) = load_config(&cli.config)?;
    if let Some(personality) = cli.personality {
        config.device.personality = personality;
    }
    if let Some(dir) = cli.export_dir {
        config.export.dir = dir;
    }

    let _log_guard = init_logging(&config.logging)?;
    info!("stickcal v{} starting...", env!("CARGO_PKG_VERSION"));
    if defaulted {
        warn!("{} not found, using built-in defaults", DEFAULT_CONFIG_PATH);
    }

    let sink: Box<dyn ExportSink> = if config.export.timestamped {
        Box::new(CsvExporter::new(&config.export.dir))
    } else {
        Box::new(CsvExporter::flat(&config.export.dir))
    };

    let controls = Arc::new(SharedControls::new());
    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock);
    let machine = Arc::new(CalibrationStateMachine::new(
        config.test_params(),
        sink,
        controls.clone(),
        clock.clone(),
    ));

    let mut app = App {
        machine,
        controls,
        clock,
        dispatcher: OperatorDispatcher::new(config.operator_cooldown()),
        personality: config.device.personality,
        scheduler_config: config.scheduler_config(),
        device: None,
    };

    if config.device.enabled && !cli.no_device {
        app.enable()?;
    }

    info!("{}", HELP);
    info!("Press Ctrl+C to exit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match line.parse::<Command>() {
                    Ok(command) => {
                        if !app.handle(command).await {
                            break;
                        }
                    }
                    Err(e) => warn!("{}; type 'help'", e),
                },
                Ok(None) => {
                    info!("Input closed, shutting down...");
                    break;
                }
                Err(e) => {
                    error!("Failed to read input: {}", e);
                    break;
                }
            },

            // Handle Ctrl+C for graceful shutdown
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    app.machine.stop();
    app.disable().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_path() {
        assert_eq!(DEFAULT_CONFIG_PATH, "config/default.toml");
    }

    #[test]
    fn test_command_parsing() {
        assert_eq!("record".parse::<Command>(), Ok(Command::Action(OperatorAction::Record)));
        assert_eq!("RESET".parse::<Command>(), Ok(Command::Action(OperatorAction::Stop)));
        assert_eq!(" neutral ".parse::<Command>(), Ok(Command::Neutral));
        assert_eq!("q".parse::<Command>(), Ok(Command::Quit));
        assert!("fly".parse::<Command>().is_err());
    }

    #[test]
    fn test_every_action_is_a_command() {
        for action in OperatorAction::ALL {
            assert_eq!(action.name().parse::<Command>(), Ok(Command::Action(action)));
            assert!(HELP.contains(action.name()));
        }
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from([
            "stickcal",
            "--personality",
            "xbox360",
            "--export-dir",
            "/tmp/out",
        ]);
        assert_eq!(cli.personality, Some(Personality::Xbox360));
        assert_eq!(cli.export_dir, Some(PathBuf::from("/tmp/out")));
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_PATH));
        assert!(!cli.no_device);
    }

    #[test]
    fn test_missing_default_config_falls_back() {
        // Only the default path falls back; any other missing path is an error.
        assert!(load_config(Path::new("/nonexistent/stickcal.toml")).is_err());
    }
}
