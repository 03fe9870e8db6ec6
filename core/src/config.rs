//! Run configuration for the `kafi` binary and helpers turning it into filters.
//!
//! Configurations are plain serde structs stored as JSON, YAML or TOML; [`SimulationConfig::to_file`]
//! and [`SimulationConfig::from_file`] pick the format from the file extension. Matrices are
//! given as diagonals and checked against the compile-time dimensions of the model they are
//! applied to.
//!
//! ```toml
//! model = "vehicle"
//! input = "data/vehicle_log.csv"
//! output = "out/estimates.csv"
//! sample_period = 0.001
//!
//! [filter]
//! process_noise = [0.0, 0.0, 0.1, 0.1, 0.1, 0.1, 0.1]
//! sensor_noise = [0.7, 0.7, 0.45, 0.45, 0.001]
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use nalgebra::{SMatrix, SVector};
use serde::{Deserialize, Serialize};

use crate::error::KafiError;
use crate::jacobian::JacobianFunction;
use crate::kalman::ExtendedKalmanFilter;
use crate::models::{VEHICLE_PROCESS_NOISE, VEHICLE_SAMPLE_PERIOD, VEHICLE_SENSOR_NOISE};
use crate::sim::TemperatureScenario;

/// Which built-in model a run uses.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// Planar vehicle over a recorded sensor log
    #[default]
    Vehicle,
    /// Scalar temperature read by two sensors, synthetic data
    Temperature,
}

/// Noise and initialization of one filter, as matrix diagonals.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct FilterConfig {
    /// Diagonal of `Q`, length `N`
    pub process_noise: Vec<f64>,
    /// Diagonal of `R`, length `M`
    pub sensor_noise: Vec<f64>,
    /// Diagonal of the initial `P`, length `N`; identity when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_covariance: Option<Vec<f64>>,
    /// Starting state, length `N`; the model's own start (e.g. the first log record) when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_state: Option<Vec<f64>>,
}

impl FilterConfig {
    /// Noise setup of the vehicle model.
    pub fn vehicle() -> Self {
        FilterConfig {
            process_noise: VEHICLE_PROCESS_NOISE.to_vec(),
            sensor_noise: VEHICLE_SENSOR_NOISE.to_vec(),
            initial_covariance: None,
            initial_state: None,
        }
    }

    /// Noise setup of the two-sensor temperature model.
    pub fn temperature() -> Self {
        FilterConfig {
            process_noise: vec![0.05],
            sensor_noise: vec![0.64, 0.64],
            initial_covariance: None,
            initial_state: None,
        }
    }

    pub fn for_model(model: ModelKind) -> Self {
        match model {
            ModelKind::Vehicle => Self::vehicle(),
            ModelKind::Temperature => Self::temperature(),
        }
    }

    pub fn process_noise_matrix<const N: usize>(&self) -> Result<SMatrix<f64, N, N>, KafiError> {
        diagonal("process_noise", &self.process_noise)
    }

    pub fn sensor_noise_matrix<const M: usize>(&self) -> Result<SMatrix<f64, M, M>, KafiError> {
        diagonal("sensor_noise", &self.sensor_noise)
    }

    pub fn initial_covariance_matrix<const N: usize>(
        &self,
    ) -> Result<SMatrix<f64, N, N>, KafiError> {
        match &self.initial_covariance {
            Some(values) => diagonal("initial_covariance", values),
            None => Ok(SMatrix::<f64, N, N>::identity()),
        }
    }

    pub fn initial_state_vector<const N: usize>(
        &self,
    ) -> Result<Option<SVector<f64, N>>, KafiError> {
        self.initial_state
            .as_deref()
            .map(|values| {
                check_len("initial_state", N, values.len())?;
                Ok(SVector::<f64, N>::from_column_slice(values))
            })
            .transpose()
    }

    /// Assemble a filter from the given models; `default_start` is used unless the
    /// configuration names its own initial state.
    pub fn build<const N: usize, const M: usize>(
        &self,
        transition: JacobianFunction<N, N>,
        observation_model: JacobianFunction<N, M>,
        default_start: SVector<f64, N>,
    ) -> Result<ExtendedKalmanFilter<N, M>, KafiError> {
        let start = self.initial_state_vector::<N>()?.unwrap_or(default_start);
        Ok(ExtendedKalmanFilter::with_prediction_error(
            transition,
            observation_model,
            start,
            self.process_noise_matrix::<N>()?,
            self.sensor_noise_matrix::<M>()?,
            self.initial_covariance_matrix::<N>()?,
        ))
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self::vehicle()
    }
}

fn check_len(what: &'static str, expected: usize, found: usize) -> Result<(), KafiError> {
    if expected == found {
        Ok(())
    } else {
        Err(KafiError::ShapeMismatch {
            what,
            expected,
            found,
        })
    }
}

fn diagonal<const D: usize>(
    what: &'static str,
    values: &[f64],
) -> Result<SMatrix<f64, D, D>, KafiError> {
    check_len(what, D, values.len())?;
    Ok(SMatrix::<f64, D, D>::from_diagonal(
        &SVector::<f64, D>::from_column_slice(values),
    ))
}

/// Logging preferences stored alongside a run.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_sample_period() -> f64 {
    VEHICLE_SAMPLE_PERIOD
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Everything needed for one run of the `kafi` binary.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct SimulationConfig {
    #[serde(default)]
    pub model: ModelKind,
    /// Sensor log; required for the vehicle model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<PathBuf>,
    /// Estimate CSV written at the end of the run
    pub output: PathBuf,
    /// Vehicle sample period in seconds
    #[serde(default = "default_sample_period")]
    pub sample_period: f64,
    /// Overrides the model's built-in noise setup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterConfig>,
    #[serde(default)]
    pub temperature: TemperatureScenario,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            model: ModelKind::Vehicle,
            input: Some(PathBuf::from("data/vehicle_log.csv")),
            output: PathBuf::from("estimates.csv"),
            sample_period: VEHICLE_SAMPLE_PERIOD,
            filter: None,
            temperature: TemperatureScenario::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl SimulationConfig {
    /// Filter setup for this run: the explicit `filter` section or the model's defaults.
    pub fn filter_config(&self) -> FilterConfig {
        self.filter
            .clone()
            .unwrap_or_else(|| FilterConfig::for_model(self.model))
    }

    /// Render in `format`; JSON is pretty-printed.
    pub fn to_string_as(&self, format: ConfigFormat) -> io::Result<String> {
        match format {
            ConfigFormat::Json => serde_json::to_string_pretty(self).map_err(io::Error::other),
            ConfigFormat::Yaml => serde_yaml::to_string(self).map_err(io::Error::other),
            ConfigFormat::Toml => toml::to_string(self).map_err(io::Error::other),
        }
    }

    /// Parse from text in `format`.
    pub fn from_str_as(text: &str, format: ConfigFormat) -> io::Result<Self> {
        match format {
            ConfigFormat::Json => serde_json::from_str(text).map_err(io::Error::other),
            ConfigFormat::Yaml => serde_yaml::from_str(text).map_err(io::Error::other),
            ConfigFormat::Toml => toml::from_str(text).map_err(io::Error::other),
        }
    }

    /// Write to `path`, in the format named by its extension.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let path = path.as_ref();
        let text = self.to_string_as(ConfigFormat::from_path(path)?)?;
        fs::write(path, text)
    }

    /// Read from `path`, in the format named by its extension.
    pub fn from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path)?;
        Self::from_str_as(&fs::read_to_string(path)?, format)
    }
}

/// On-disk formats of a [`SimulationConfig`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Yaml,
    Toml,
}

impl ConfigFormat {
    /// `.json`, `.yaml`/`.yml` or `.toml`, case-insensitive.
    pub fn from_path(path: &Path) -> io::Result<Self> {
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_ascii_lowercase());
        match ext.as_deref() {
            Some("json") => Ok(ConfigFormat::Json),
            Some("yaml") | Some("yml") => Ok(ConfigFormat::Yaml),
            Some("toml") => Ok(ConfigFormat::Toml),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "unsupported configuration file extension: {} (expected .json, .yaml, .yml or .toml)",
                    path.display()
                ),
            )),
        }
    }
}
