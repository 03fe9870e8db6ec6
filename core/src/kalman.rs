//! Extended Kalman Filter with statically sized state and observation vectors.
//!
//! The filter fuses a nonlinear state transition $f$ and a nonlinear observation model $h$, each
//! given as a [`JacobianFunction`], with constant process noise $Q$ and sensor noise $R$. Every
//! call to [`ExtendedKalmanFilter::step`] runs the prediction
//!
//! $$
//! \begin{aligned}
//! F &= \frac{\partial f}{\partial x}\bigg|_{x} \\\\
//! P &= F P F^T + Q \\\\
//! x &= f(x)
//! \end{aligned}
//! $$
//!
//! and, only when a fresh observation $o$ was registered since the previous step, the update
//!
//! $$
//! \begin{aligned}
//! H &= \frac{\partial h}{\partial x}\bigg|_{x} \\\\
//! G &= P H^T (H P H^T + R)^{-1} \\\\
//! x &= x + G (o - h(x)) \\\\
//! P &= (I - G H) P
//! \end{aligned}
//! $$
//!
//! All Jacobians and temporaries live in buffers owned by the filter and sized by `N` and `M`
//! at compile time, so `step()` never allocates.
//!
//! The observation is not owned. A producer keeps it in an [`Arc`] and registers it with
//! [`ExtendedKalmanFilter::set_current_observation`]; the filter only keeps a weak handle. If
//! several observations are registered between two steps only the last one is used.

use std::fmt::{self, Debug, Display};
use std::sync::{Arc, Weak};

use log::{debug, trace};
use nalgebra::{SMatrix, SVector};

use crate::error::KafiError;
use crate::jacobian::JacobianFunction;
use crate::linalg::try_invert_spd;
use crate::util::create_identity;

const SEPARATOR: &str = "============================\n";

/// Non-owning handle to the most recently registered observation.
#[derive(Clone, Debug, Default)]
pub struct ObservationHandle<const M: usize>(Weak<SVector<f64, M>>);

impl<const M: usize> ObservationHandle<M> {
    pub fn new(observation: &Arc<SVector<f64, M>>) -> Self {
        ObservationHandle(Arc::downgrade(observation))
    }

    /// The observation, if the producer still holds it.
    pub fn try_lock(&self) -> Option<Arc<SVector<f64, M>>> {
        self.0.upgrade()
    }
}

/// Copy of the filter's state, prediction error covariance and gain after one step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Estimate<const N: usize, const M: usize> {
    pub state: SVector<f64, N>,
    pub prediction_error: SMatrix<f64, N, N>,
    pub gain: SMatrix<f64, N, M>,
    /// Whether the step that produced this estimate fused an observation.
    pub updated: bool,
}

/// Read-only diagnostic view of the filter.
///
/// Rendered by `Display` roughly as:
///
/// ```text
/// Kafi:
///   Update      # calls: 1
///   Predictions # calls: 1
///  [S] state:
///   ┌         ┐
///   │ 19.6226 │
///   └         ┘
/// ============================
///  [O] observation:
/// ...
/// ```
#[derive(Clone, Debug)]
pub struct FilterSnapshot<const N: usize, const M: usize> {
    pub update_count: usize,
    pub prediction_count: usize,
    pub state: SVector<f64, N>,
    /// `None` once the producer has dropped the last registered observation.
    pub observation: Option<SVector<f64, M>>,
    pub prediction_error: SMatrix<f64, N, N>,
    pub gain: SMatrix<f64, N, M>,
}

impl<const N: usize, const M: usize> Display for FilterSnapshot<N, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Kafi:")?;
        writeln!(f, "  Update      # calls: {}", self.update_count)?;
        writeln!(f, "  Predictions # calls: {}", self.prediction_count)?;
        writeln!(f, " [S] state:\n{}", self.state)?;
        f.write_str(SEPARATOR)?;
        match &self.observation {
            Some(observation) => writeln!(f, " [O] observation:\n{}", observation)?,
            None => writeln!(f, " [O] observation:\n  (none)")?,
        }
        f.write_str(SEPARATOR)?;
        writeln!(f, " [P] prediction_error:\n{}", self.prediction_error)?;
        f.write_str(SEPARATOR)?;
        writeln!(f, " [G] gain:\n{}", self.gain)?;
        f.write_str(SEPARATOR)
    }
}

/// Extended Kalman Filter over `N` states and `M` observed quantities.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use kafi::kalman::ExtendedKalmanFilter;
/// use kafi::util::create_identity_jacobian;
/// use nalgebra::{SMatrix, SVector};
///
/// // one temperature, two thermometers
/// let mut ekf = ExtendedKalmanFilter::<1, 2>::new(
///     create_identity_jacobian::<1, 1>(),
///     create_identity_jacobian::<1, 2>(),
///     SVector::<f64, 1>::new(20.64),
///     SMatrix::<f64, 1, 1>::new(0.05),
///     SMatrix::<f64, 2, 2>::from_diagonal_element(0.64),
/// );
///
/// let observation = Arc::new(SVector::<f64, 2>::new(18.625, 20.0));
/// ekf.set_current_observation(&observation);
/// let estimate = ekf.step().expect("innovation covariance is invertible");
/// assert!((estimate.state[0] - 19.62).abs() < 0.01);
/// ```
pub struct ExtendedKalmanFilter<const N: usize, const M: usize> {
    /// State transition `f`
    transition: JacobianFunction<N, N>,
    /// Preallocated Jacobian of `f`
    transition_jacobian: SMatrix<f64, N, N>,
    /// Copy of the state before the transition, input of `f`
    prior_state: SVector<f64, N>,
    /// Observation model `h`
    observation_model: JacobianFunction<N, M>,
    /// Preallocated `h(state)`
    predicted_observation: SVector<f64, M>,
    /// Preallocated Jacobian of `h`
    observation_jacobian: SMatrix<f64, M, N>,
    /// `Q`
    process_noise: SMatrix<f64, N, N>,
    /// `R`
    sensor_noise: SMatrix<f64, M, M>,
    identity: SMatrix<f64, N, N>,
    state: SVector<f64, N>,
    observation: ObservationHandle<M>,
    /// `P`
    prediction_error: SMatrix<f64, N, N>,
    /// `G`
    gain: SMatrix<f64, N, M>,
    new_data_available: bool,
    prediction_count: usize,
    update_count: usize,
}

impl<const N: usize, const M: usize> Debug for ExtendedKalmanFilter<N, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EKF")
            .field("state", &self.state)
            .field("prediction_error", &self.prediction_error)
            .field("gain", &self.gain)
            .field("process_noise", &self.process_noise)
            .field("sensor_noise", &self.sensor_noise)
            .field("new_data_available", &self.new_data_available)
            .field("prediction_count", &self.prediction_count)
            .field("update_count", &self.update_count)
            .finish()
    }
}

impl<const N: usize, const M: usize> Display for ExtendedKalmanFilter<N, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.snapshot(), f)
    }
}

impl<const N: usize, const M: usize> ExtendedKalmanFilter<N, M> {
    /// Create a filter whose prediction error covariance starts at the identity.
    ///
    /// # Arguments
    ///
    /// * `transition` - state transition `f` with its `N x N` Jacobian
    /// * `observation_model` - observation model `h` with its `M x N` Jacobian
    /// * `starting_state` - initial state estimate
    /// * `process_noise` - `Q`, covariance of the unmodelled real-world disturbance
    /// * `sensor_noise` - `R`, covariance of the sensors
    pub fn new(
        transition: JacobianFunction<N, N>,
        observation_model: JacobianFunction<N, M>,
        starting_state: SVector<f64, N>,
        process_noise: SMatrix<f64, N, N>,
        sensor_noise: SMatrix<f64, M, M>,
    ) -> ExtendedKalmanFilter<N, M> {
        Self::with_prediction_error(
            transition,
            observation_model,
            starting_state,
            process_noise,
            sensor_noise,
            create_identity::<N>(),
        )
    }

    /// Same as [`ExtendedKalmanFilter::new`] with a caller supplied initial `P`.
    pub fn with_prediction_error(
        transition: JacobianFunction<N, N>,
        observation_model: JacobianFunction<N, M>,
        starting_state: SVector<f64, N>,
        process_noise: SMatrix<f64, N, N>,
        sensor_noise: SMatrix<f64, M, M>,
        prediction_error: SMatrix<f64, N, N>,
    ) -> ExtendedKalmanFilter<N, M> {
        ExtendedKalmanFilter {
            transition,
            transition_jacobian: SMatrix::zeros(),
            prior_state: SVector::zeros(),
            observation_model,
            predicted_observation: SVector::zeros(),
            observation_jacobian: SMatrix::zeros(),
            process_noise,
            sensor_noise,
            identity: create_identity::<N>(),
            state: starting_state,
            observation: ObservationHandle::default(),
            prediction_error,
            gain: SMatrix::zeros(),
            new_data_available: false,
            prediction_count: 0,
            update_count: 0,
        }
    }

    /// Register the observation the next [`step`](Self::step) should fuse.
    ///
    /// Every call is treated as new, previously unseen data; deduplication is the caller's job.
    /// Only a weak handle is kept, so the producer stays responsible for keeping `observation`
    /// alive until the next step.
    pub fn set_current_observation(&mut self, observation: &Arc<SVector<f64, M>>) {
        self.observation = ObservationHandle::new(observation);
        self.new_data_available = true;
    }

    /// Predict, then update if an observation was registered since the last step.
    ///
    /// # Errors
    ///
    /// Prediction has already been applied when either error is returned, and the pending
    /// observation is considered consumed.
    ///
    /// * [`KafiError::ObservationExpired`] - the registered observation was dropped
    /// * [`KafiError::SingularInnovation`] - `H P Hᵀ + R` is singular or too ill-conditioned to
    ///   invert reliably; state and `P` keep their predicted values and the gain keeps its
    ///   previous value
    pub fn step(&mut self) -> Result<Estimate<N, M>, KafiError> {
        self.apply_prediction();
        let updated = self.take_new_data();
        if updated {
            self.apply_update()?;
        }
        debug!(
            "EKF step: {} predictions, {} updates",
            self.prediction_count, self.update_count
        );
        trace!("{}", self.snapshot());
        Ok(self.estimate_with(updated))
    }

    /// Current state, prediction error and gain without stepping.
    pub fn estimate(&self) -> Estimate<N, M> {
        self.estimate_with(false)
    }

    pub fn snapshot(&self) -> FilterSnapshot<N, M> {
        FilterSnapshot {
            update_count: self.update_count,
            prediction_count: self.prediction_count,
            state: self.state,
            observation: self.observation.try_lock().map(|o| *o),
            prediction_error: self.prediction_error,
            gain: self.gain,
        }
    }

    pub fn state(&self) -> &SVector<f64, N> {
        &self.state
    }

    pub fn prediction_error(&self) -> &SMatrix<f64, N, N> {
        &self.prediction_error
    }

    pub fn gain(&self) -> &SMatrix<f64, N, M> {
        &self.gain
    }

    pub fn prediction_count(&self) -> usize {
        self.prediction_count
    }

    pub fn update_count(&self) -> usize {
        self.update_count
    }

    /// Whether an observation is waiting to be fused by the next step.
    pub fn has_pending_observation(&self) -> bool {
        self.new_data_available
    }

    fn estimate_with(&self, updated: bool) -> Estimate<N, M> {
        Estimate {
            state: self.state,
            prediction_error: self.prediction_error,
            gain: self.gain,
            updated,
        }
    }

    /// Reads and clears the new-data flag.
    fn take_new_data(&mut self) -> bool {
        std::mem::replace(&mut self.new_data_available, false)
    }

    fn apply_prediction(&mut self) {
        // F has to be taken at the pre-transition state
        self.transition
            .jacobian(&self.state, &mut self.transition_jacobian);
        let f_jac = &self.transition_jacobian;
        let predicted = f_jac * self.prediction_error * f_jac.transpose() + self.process_noise;
        self.prediction_error = predicted;

        self.prior_state = self.state;
        self.transition.evaluate(&self.prior_state, &mut self.state);
        self.prediction_count += 1;
    }

    fn apply_update(&mut self) -> Result<(), KafiError> {
        let observation = self
            .observation
            .try_lock()
            .ok_or(KafiError::ObservationExpired)?;

        self.observation_model
            .evaluate(&self.state, &mut self.predicted_observation);
        self.observation_model
            .jacobian(&self.state, &mut self.observation_jacobian);

        let h_jac = &self.observation_jacobian;
        let h_jac_t = h_jac.transpose();
        let p = &self.prediction_error;

        let innovation_covariance = h_jac * p * h_jac_t + self.sensor_noise;
        let Some(innovation_inverse) = try_invert_spd(&innovation_covariance) else {
            return Err(KafiError::SingularInnovation);
        };

        let gain = p * h_jac_t * innovation_inverse;
        let innovation = *observation - self.predicted_observation;
        let corrected_error = (self.identity - gain * h_jac) * p;

        self.state += gain * innovation;
        self.prediction_error = corrected_error;
        self.gain = gain;
        self.update_count += 1;
        Ok(())
    }
}
