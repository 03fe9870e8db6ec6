//! Simulation utilities and CSV data handling for the filter.
//!
//! This module provides:
//! - [`SensorRecord`], one row of a recorded vehicle log (IMU accelerations, correvit
//!   velocities and heading)
//! - [`run_closed_loop`], feeding a sequence of observations through a filter one step each
//! - [`write_estimates`], exporting the per-step estimates to CSV
//! - [`TemperatureScenario`] and [`simulate_temperature_observations`], seeded synthetic data for
//!   the scalar temperature model

use std::path::Path;
use std::sync::Arc;

use log::{info, warn};
use nalgebra::SVector;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::error::KafiError;
use crate::kalman::{Estimate, ExtendedKalmanFilter};
use crate::models::{VEHICLE_OBSERVATIONS, VEHICLE_STATES};

/// One row of a vehicle sensor log.
///
/// Column names follow the logger export, units included. Any other column (such as `Time[s]`)
/// is ignored.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
pub struct SensorRecord {
    /// Longitudinal acceleration in m/s^2
    #[serde(rename = "ax[m/s^2]")]
    pub ax: f64,
    /// Lateral acceleration in m/s^2
    #[serde(rename = "ay[m/s^2]")]
    pub ay: f64,
    /// Longitudinal velocity over ground in m/s
    #[serde(rename = "vx[m/s]")]
    pub vx: f64,
    /// Lateral velocity over ground in m/s
    #[serde(rename = "vy[m/s]")]
    pub vy: f64,
    /// Heading in radians
    #[serde(rename = "psi[rad]")]
    pub psi: f64,
}

impl SensorRecord {
    /// Reads every row of the CSV file at `path`.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use kafi::sim::SensorRecord;
    ///
    /// let records = SensorRecord::from_csv("./data/vehicle_log.csv").expect("readable log");
    /// println!("Loaded {} records", records.len());
    /// ```
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Vec<Self>, KafiError> {
        let mut rdr = csv::Reader::from_path(path)?;
        let mut records = Vec::new();
        for result in rdr.deserialize() {
            let record: Self = result?;
            records.push(record);
        }
        Ok(records)
    }

    /// Observation vector `[ax, ay, vx, vy, psi]` of the vehicle model.
    pub fn to_observation(&self) -> SVector<f64, VEHICLE_OBSERVATIONS> {
        SVector::<f64, VEHICLE_OBSERVATIONS>::from([self.ax, self.ay, self.vx, self.vy, self.psi])
    }

    /// Vehicle state at the origin, with every sensed component taken from this record.
    pub fn initial_vehicle_state(&self) -> SVector<f64, VEHICLE_STATES> {
        SVector::<f64, VEHICLE_STATES>::from([
            0.0, 0.0, self.ax, self.ay, self.vx, self.vy, self.psi,
        ])
    }
}

/// Run `filter` over `observations`, registering one observation and stepping once per entry.
///
/// A singular innovation only skips the update of that step; it is logged and the predicted
/// estimate is recorded instead. Any other error aborts the run.
pub fn run_closed_loop<const N: usize, const M: usize>(
    filter: &mut ExtendedKalmanFilter<N, M>,
    observations: &[SVector<f64, M>],
) -> Result<Vec<Estimate<N, M>>, KafiError> {
    info!("Running closed-loop filter over {} observations", observations.len());
    let mut estimates = Vec::with_capacity(observations.len());
    let mut skipped = 0usize;
    for (i, observation) in observations.iter().enumerate() {
        let observation = Arc::new(*observation);
        filter.set_current_observation(&observation);
        match filter.step() {
            Ok(estimate) => estimates.push(estimate),
            Err(KafiError::SingularInnovation) => {
                warn!("Step {}: innovation covariance is singular, update skipped", i);
                skipped += 1;
                estimates.push(filter.estimate());
            }
            Err(e) => return Err(e),
        }
    }
    info!(
        "Closed loop finished: {} predictions, {} updates, {} skipped",
        filter.prediction_count(),
        filter.update_count(),
        skipped
    );
    Ok(estimates)
}

/// Write one CSV row per estimate: `step, x0..x{N-1}, p_trace, updated`.
pub fn write_estimates<P: AsRef<Path>, const N: usize, const M: usize>(
    estimates: &[Estimate<N, M>],
    path: P,
) -> Result<(), KafiError> {
    let mut writer = csv::Writer::from_path(path)?;

    let mut header = Vec::with_capacity(N + 3);
    header.push("step".to_string());
    header.extend((0..N).map(|i| format!("x{i}")));
    header.push("p_trace".to_string());
    header.push("updated".to_string());
    writer.write_record(&header)?;

    for (step, estimate) in estimates.iter().enumerate() {
        let mut row = Vec::with_capacity(N + 3);
        row.push(step.to_string());
        row.extend(estimate.state.iter().map(|v| v.to_string()));
        row.push(estimate.prediction_error.trace().to_string());
        row.push(estimate.updated.to_string());
        writer.write_record(&row)?;
    }

    writer.flush()?;
    Ok(())
}

/// Parameters of a synthetic temperature run: a constant true temperature read by several
/// identical sensors with Gaussian noise.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TemperatureScenario {
    /// True temperature in degrees Celsius
    pub truth: f64,
    /// Standard deviation of every sensor
    pub sensor_std: f64,
    /// Number of observation vectors to generate
    pub steps: usize,
    pub seed: u64,
    /// Starting state of the filter
    pub start: f64,
}

impl Default for TemperatureScenario {
    fn default() -> Self {
        TemperatureScenario {
            truth: 19.5,
            sensor_std: 0.8,
            steps: 500,
            seed: 42,
            start: 20.64,
        }
    }
}

/// Draw `scenario.steps` observation vectors of `M` independent noisy readings each.
///
/// The same seed always yields the same sequence.
pub fn simulate_temperature_observations<const M: usize>(
    scenario: &TemperatureScenario,
) -> Result<Vec<SVector<f64, M>>, KafiError> {
    let noise = Normal::new(0.0, scenario.sensor_std)
        .map_err(|e| KafiError::InvalidParameter(format!("sensor_std: {e}")))?;
    let mut rng = StdRng::seed_from_u64(scenario.seed);
    Ok((0..scenario.steps)
        .map(|_| SVector::<f64, M>::from_fn(|_, _| scenario.truth + noise.sample(&mut rng)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::temperature_model;
    use assert_approx_eq::assert_approx_eq;
    use nalgebra::{SMatrix, Vector2};
    use std::fs;
    use std::io::Write;
    use std::path::PathBuf;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("kafi_sim_{}_{}", std::process::id(), name))
    }

    fn temperature_filter() -> ExtendedKalmanFilter<1, 2> {
        let (f, h) = temperature_model::<2>();
        ExtendedKalmanFilter::new(
            f,
            h,
            SVector::<f64, 1>::new(20.64),
            SMatrix::<f64, 1, 1>::new(0.05),
            SMatrix::<f64, 2, 2>::from_diagonal_element(0.64),
        )
    }

    #[test]
    fn reads_sensor_log_and_ignores_extra_columns() {
        let path = temp_path("log.csv");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "Time[s],ax[m/s^2],ay[m/s^2],vx[m/s],vy[m/s],psi[rad]").unwrap();
        writeln!(file, "0.000,0.5,-0.1,10.0,0.2,0.01").unwrap();
        writeln!(file, "0.001,0.6,-0.2,10.1,0.3,0.02").unwrap();
        drop(file);

        let records = SensorRecord::from_csv(&path).unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(records.len(), 2);
        assert_eq!(records[1].vx, 10.1);
        assert_eq!(
            records[0].to_observation(),
            SVector::<f64, 5>::from([0.5, -0.1, 10.0, 0.2, 0.01])
        );
        assert_eq!(
            records[0].initial_vehicle_state(),
            SVector::<f64, 7>::from([0.0, 0.0, 0.5, -0.1, 10.0, 0.2, 0.01])
        );
    }

    #[test]
    fn missing_column_is_a_csv_error() {
        let path = temp_path("broken.csv");
        fs::write(&path, "ax[m/s^2],ay[m/s^2]\n1.0,2.0\n").unwrap();
        let result = SensorRecord::from_csv(&path);
        fs::remove_file(&path).ok();
        assert!(matches!(result, Err(KafiError::Csv(_))));
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(SensorRecord::from_csv(temp_path("does_not_exist.csv")).is_err());
    }

    #[test]
    fn closed_loop_steps_once_per_observation() {
        let mut filter = temperature_filter();
        let observations = vec![Vector2::new(18.625, 20.0); 5];
        let estimates = run_closed_loop(&mut filter, &observations).unwrap();
        assert_eq!(estimates.len(), 5);
        assert!(estimates.iter().all(|e| e.updated));
        assert_eq!(filter.prediction_count(), 5);
        assert_eq!(filter.update_count(), 5);
        assert_approx_eq!(estimates[0].state[0], 19.6226, 0.001);
    }

    #[test]
    fn closed_loop_continues_past_singular_innovation() {
        let (f, h) = temperature_model::<2>();
        let mut filter = ExtendedKalmanFilter::with_prediction_error(
            f,
            h,
            SVector::<f64, 1>::new(1.0),
            SMatrix::<f64, 1, 1>::zeros(),
            SMatrix::<f64, 2, 2>::zeros(),
            SMatrix::<f64, 1, 1>::zeros(),
        );
        let observations = vec![Vector2::new(2.0, 2.0); 3];
        let estimates = run_closed_loop(&mut filter, &observations).unwrap();
        assert_eq!(estimates.len(), 3);
        assert!(estimates.iter().all(|e| !e.updated));
        assert_eq!(filter.update_count(), 0);
        assert_eq!(estimates[2].state[0], 1.0);
    }

    #[test]
    fn writes_estimate_csv() {
        let mut filter = temperature_filter();
        let estimates =
            run_closed_loop(&mut filter, &[Vector2::new(18.625, 20.0), Vector2::new(19.0, 19.5)])
                .unwrap();
        let path = temp_path("estimates.csv");
        write_estimates(&estimates, &path).unwrap();

        let mut rdr = csv::Reader::from_path(&path).unwrap();
        let header: Vec<String> = rdr.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(header, vec!["step", "x0", "p_trace", "updated"]);
        let rows: Vec<csv::StringRecord> = rdr.records().map(|r| r.unwrap()).collect();
        fs::remove_file(&path).ok();

        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[1][0], "1");
        assert_eq!(&rows[1][3], "true");
        let x0: f64 = rows[0][1].parse().unwrap();
        assert_approx_eq!(x0, estimates[0].state[0], 1e-12);
    }

    #[test]
    fn temperature_simulation_is_reproducible() {
        let scenario = TemperatureScenario {
            steps: 50,
            ..Default::default()
        };
        let a = simulate_temperature_observations::<3>(&scenario).unwrap();
        let b = simulate_temperature_observations::<3>(&scenario).unwrap();
        assert_eq!(a.len(), 50);
        assert_eq!(a, b);

        let mean = a.iter().map(|o| o.sum()).sum::<f64>() / (50.0 * 3.0);
        assert!((mean - scenario.truth).abs() < 0.5, "mean {mean}");
    }

    #[test]
    fn temperature_simulation_rejects_negative_std() {
        let scenario = TemperatureScenario {
            sensor_std: -1.0,
            ..Default::default()
        };
        assert!(matches!(
            simulate_temperature_observations::<2>(&scenario),
            Err(KafiError::InvalidParameter(_))
        ));
    }
}
