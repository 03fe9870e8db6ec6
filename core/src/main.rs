//! KAFI: run the Extended Kalman Filter over recorded or synthetic sensor data.
//!
//! Two models are available:
//!
//! - vehicle: planar vehicle state estimated from a CSV log of IMU accelerations, correvit
//!   velocities and heading.
//! - temperature: one temperature read by two noisy sensors, with seeded synthetic readings.
//!
//! Runs are configured either through a configuration file (TOML/JSON/YAML) or command-line flags.
//! Every run writes the per-step estimates as CSV.

use clap::{Args, Parser, Subcommand};
use log::{error, info};
use nalgebra::SVector;
use std::error::Error;
use std::path::{Path, PathBuf};

use kafi::KafiError;
use kafi::config::{FilterConfig, ModelKind, SimulationConfig};
use kafi::models::{
    VEHICLE_SAMPLE_PERIOD, temperature_model, vehicle_observation, vehicle_transition,
};
use kafi::sim::{
    SensorRecord, TemperatureScenario, run_closed_loop, simulate_temperature_observations,
    write_estimates,
};

const LONG_ABOUT: &str = "KAFI: an Extended Kalman Filter over recorded or synthetic sensor data.

- vehicle: estimates the planar state [x, y, ax, ay, vx, vy, psi] of a vehicle from a CSV log with
  the columns ax[m/s^2], ay[m/s^2], vx[m/s], vy[m/s] and psi[rad]. Other columns are ignored.

- temperature: fuses two noisy thermometers reading one constant temperature. Readings are
  generated from a seeded Gaussian noise model.

You can run the filter either by:
  1. Loading all parameters from a configuration file (TOML/JSON/YAML)
  2. Specifying parameters via command-line flags";

/// Command line arguments
#[derive(Parser)]
#[command(author, version, about = "Extended Kalman Filter over recorded or synthetic sensor data.", long_about = LONG_ABOUT)]
struct Cli {
    /// Run from a configuration file (TOML/JSON/YAML)
    /// This option overrides any subcommand arguments
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Command to execute (ignored if --config is provided)
    #[command(subcommand)]
    command: Option<Command>,

    /// Log level (off, error, warn, info, debug, trace); RUST_LOG directives refine it
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Log file path (if not specified, logs to stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand, Clone)]
enum Command {
    #[command(
        name = "vehicle",
        about = "Estimate the vehicle state from a sensor log",
        long_about = "Run the 7-state vehicle model over a recorded CSV sensor log. One filter step is taken per row, fusing the row as the observation. The filter starts at the origin with the sensed components of the first row."
    )]
    Vehicle(VehicleArgs),

    #[command(
        name = "temperature",
        about = "Fuse two synthetic temperature sensors",
        long_about = "Run the scalar temperature model over seeded synthetic readings of two identical sensors."
    )]
    Temperature(TemperatureArgs),

    #[command(name = "config", about = "Generate a template configuration file")]
    CreateConfig(CreateConfigArgs),
}

#[derive(Args, Clone, Debug)]
struct VehicleArgs {
    /// Input CSV sensor log
    #[arg(short, long, value_parser)]
    input: PathBuf,

    /// Output CSV file for the estimates
    #[arg(short, long, value_parser)]
    output: PathBuf,

    /// Sample period of the log in seconds
    #[arg(long, default_value_t = VEHICLE_SAMPLE_PERIOD)]
    sample_period: f64,
}

#[derive(Args, Clone, Debug)]
struct TemperatureArgs {
    /// Output CSV file for the estimates
    #[arg(short, long, value_parser)]
    output: PathBuf,

    /// True temperature in degrees Celsius
    #[arg(long, default_value_t = 19.5)]
    truth: f64,

    /// Standard deviation of each sensor
    #[arg(long, default_value_t = 0.8)]
    sensor_std: f64,

    /// Number of readings per sensor
    #[arg(long, default_value_t = 500)]
    steps: usize,

    /// Seed of the noise generator
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Starting estimate
    #[arg(long, default_value_t = 20.64)]
    start: f64,
}

impl From<&TemperatureArgs> for TemperatureScenario {
    fn from(args: &TemperatureArgs) -> Self {
        TemperatureScenario {
            truth: args.truth,
            sensor_std: args.sensor_std,
            steps: args.steps,
            seed: args.seed,
            start: args.start,
        }
    }
}

#[derive(Args, Clone, Debug)]
struct CreateConfigArgs {
    /// Path of the template; the extension selects the format
    #[arg(short, long, default_value = "kafi.toml")]
    output: PathBuf,

    /// Model the template is written for
    #[arg(short, long, value_enum, default_value_t = ModelKind::Vehicle)]
    model: ModelKind,
}

/// Parse the `--log-level` / `logging.level` value.
fn parse_level(log_level: &str) -> Result<log::LevelFilter, KafiError> {
    log_level.parse::<log::LevelFilter>().map_err(|_| {
        KafiError::InvalidParameter(format!(
            "unknown log level '{log_level}' (off, error, warn, info, debug, trace)"
        ))
    })
}

/// Logger builder at `level`, refined by any `RUST_LOG` directives (e.g. `kafi::kalman=trace`).
///
/// Records carry a millisecond timestamp and the emitting module so per-step filter traces
/// can be told apart from the driver's progress messages.
fn logger_builder(level: log::LevelFilter) -> env_logger::Builder {
    use std::io::Write;

    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    builder.parse_env(env_logger::Env::default());
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} {:<5} {}: {}",
            chrono::Local::now().format("%H:%M:%S%.3f"),
            record.level(),
            record.target(),
            record.args()
        )
    });
    builder
}

/// Initialize logging to stderr, or to `log_file` (appended) when given.
fn init_logger(log_level: &str, log_file: Option<&PathBuf>) -> Result<(), Box<dyn Error>> {
    let mut builder = logger_builder(parse_level(log_level)?);
    if let Some(log_path) = log_file {
        ensure_parent_dir(log_path)?;
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.try_init()?;
    Ok(())
}

fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn run_vehicle(
    input: &Path,
    output: &Path,
    sample_period: f64,
    filter_config: &FilterConfig,
) -> Result<(), Box<dyn Error>> {
    if !(sample_period.is_finite() && sample_period > 0.0) {
        return Err(KafiError::InvalidParameter(format!(
            "sample period must be positive, got {sample_period}"
        ))
        .into());
    }

    let records = SensorRecord::from_csv(input)?;
    info!("Read {} records from {}", records.len(), input.display());
    let first = records.first().ok_or_else(|| {
        KafiError::InvalidParameter(format!("sensor log {} has no records", input.display()))
    })?;

    let mut filter = filter_config.build(
        vehicle_transition(sample_period),
        vehicle_observation(),
        first.initial_vehicle_state(),
    )?;
    info!("Initialized vehicle EKF with sample period {} s", sample_period);

    let observations: Vec<_> = records.iter().map(SensorRecord::to_observation).collect();
    let estimates = run_closed_loop(&mut filter, &observations)?;
    let last = filter.state();
    info!(
        "Final position: x = {:.3} m, y = {:.3} m, psi = {:.4} rad",
        last[0], last[1], last[6]
    );

    ensure_parent_dir(output)?;
    write_estimates(&estimates, output)?;
    info!("Results written to {}", output.display());
    Ok(())
}

fn run_temperature(
    scenario: &TemperatureScenario,
    output: &Path,
    filter_config: &FilterConfig,
) -> Result<(), Box<dyn Error>> {
    let observations = simulate_temperature_observations::<2>(scenario)?;
    info!(
        "Generated {} readings around {} with std {} (seed {})",
        observations.len(),
        scenario.truth,
        scenario.sensor_std,
        scenario.seed
    );

    let (transition, observation_model) = temperature_model::<2>();
    let mut filter = filter_config.build(
        transition,
        observation_model,
        SVector::<f64, 1>::new(scenario.start),
    )?;

    let estimates = run_closed_loop(&mut filter, &observations)?;
    info!(
        "Final estimate {:.4} (truth {}), P = {:.6}",
        filter.state()[0],
        scenario.truth,
        filter.prediction_error()[(0, 0)]
    );

    ensure_parent_dir(output)?;
    write_estimates(&estimates, output)?;
    info!("Results written to {}", output.display());
    Ok(())
}

/// Execute a run described by a configuration file
fn run_from_config(config: &SimulationConfig) -> Result<(), Box<dyn Error>> {
    info!("Model: {:?}", config.model);
    info!("Output: {}", config.output.display());
    let filter_config = config.filter_config();

    match config.model {
        ModelKind::Vehicle => {
            let input = config.input.as_ref().ok_or_else(|| {
                KafiError::InvalidParameter("the vehicle model needs an input log".to_string())
            })?;
            info!("Input: {}", input.display());
            run_vehicle(input, &config.output, config.sample_period, &filter_config)
        }
        ModelKind::Temperature => {
            run_temperature(&config.temperature, &config.output, &filter_config)
        }
    }
}

fn create_config_file(args: &CreateConfigArgs) -> Result<(), Box<dyn Error>> {
    let config = match args.model {
        ModelKind::Vehicle => SimulationConfig {
            filter: Some(FilterConfig::vehicle()),
            ..Default::default()
        },
        ModelKind::Temperature => SimulationConfig {
            model: ModelKind::Temperature,
            input: None,
            output: PathBuf::from("temperature_estimates.csv"),
            filter: Some(FilterConfig::temperature()),
            ..Default::default()
        },
    };
    ensure_parent_dir(&args.output)?;
    config.to_file(&args.output)?;
    println!("Template configuration written to {}", args.output.display());
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    if let Some(ref config_path) = cli.config {
        let config = SimulationConfig::from_file(config_path)?;

        // CLI log file takes precedence over the configured one
        let log_file = cli.log_file.as_ref().or(config.logging.file.as_ref());
        init_logger(&config.logging.level, log_file)?;
        info!("Configuration loaded from {}", config_path.display());

        return run_from_config(&config).inspect_err(|e| error!("Run failed: {}", e));
    }

    init_logger(&cli.log_level, cli.log_file.as_ref())?;

    let result = match cli.command {
        Some(Command::Vehicle(args)) => {
            info!("Running vehicle model with input: {}", args.input.display());
            run_vehicle(
                &args.input,
                &args.output,
                args.sample_period,
                &FilterConfig::vehicle(),
            )
        }
        Some(Command::Temperature(args)) => {
            info!("Running temperature model");
            run_temperature(
                &TemperatureScenario::from(&args),
                &args.output,
                &FilterConfig::temperature(),
            )
        }
        Some(Command::CreateConfig(args)) => create_config_file(&args),
        None => {
            eprintln!("Error: No command provided. Use -h or --help for usage information.");
            std::process::exit(1);
        }
    };
    result.inspect_err(|e| error!("Run failed: {}", e))
}
