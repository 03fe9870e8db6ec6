//! Kafi: an Extended Kalman Filter with compile-time dimensions
//!
//! This crate fuses a nonlinear process model and a nonlinear sensor model into a recursive estimate of a
//! hidden state vector. It targets embedded and real-time estimation problems such as vehicle dynamics, where
//! the state dimension `N` and the observation dimension `M` are known when the program is built. Both are
//! const generic parameters, so every vector and matrix the filter touches is a statically sized `nalgebra`
//! type and a filter step never allocates.
//!
//! This crate is primarily built off of two additional dependencies:
//! - [`nalgebra`](https://crates.io/crates/nalgebra): Provides the linear algebra tools for the filter.
//! - [`rand`](https://crates.io/crates/rand) and [`rand_distr`](https://crates.io/crates/rand_distr): Provide
//!   random number generation for synthetic measurements.
//!
//! All other functionality is auxiliary (configuration, CSV I/O, the `kafi` binary).
//!
//! ## Crate overview
//!
//! - [jacobian]: a vector function paired with its analytically supplied matrix of partial derivatives.
//! - [kalman]: the filter engine driving the predict/update recursion.
//! - [models]: ready-made models (scalar temperature fusion, planar vehicle with correvit sensor).
//! - [linalg]: covariance helpers (symmetrization, guarded inversion of the innovation covariance).
//! - [util]: identity matrices, broadcasting identity functions and constant derivatives.
//! - [sim]: CSV sensor logs, closed-loop driver, estimate export and synthetic data.
//! - [config]: JSON/YAML/TOML run configuration.
//! - [error]: the crate-wide error type.
//!
//! ## Filter equations
//!
//! Given the state transition $f$ with Jacobian $F$, the observation model $h$ with Jacobian $H$, process noise
//! $Q$ and sensor noise $R$, each step first predicts
//!
//! $$
//! P = F P F^T + Q, \qquad x = f(x)
//! $$
//!
//! where $F$ is evaluated at the state before the transition. If an observation $o$ was registered since the
//! previous step, the update follows:
//!
//! $$
//! \begin{aligned}
//! S &= H P H^T + R \\\\
//! G &= P H^T S^{-1} \\\\
//! x &= x + G (o - h(x)) \\\\
//! P &= (I - G H) P
//! \end{aligned}
//! $$
//!
//! ## Example
//!
//! Two thermometers reading the same room:
//!
//! ```
//! use std::sync::Arc;
//! use nalgebra::{SMatrix, SVector, Vector2};
//! use kafi::models::temperature_model;
//! use kafi::ExtendedKalmanFilter;
//!
//! let (transition, observation_model) = temperature_model::<2>();
//! let mut filter = ExtendedKalmanFilter::new(
//!     transition,
//!     observation_model,
//!     SVector::<f64, 1>::new(20.64),
//!     SMatrix::<f64, 1, 1>::new(0.05),
//!     SMatrix::<f64, 2, 2>::from_diagonal_element(0.64),
//! );
//!
//! let reading = Arc::new(Vector2::new(18.625, 20.0));
//! filter.set_current_observation(&reading);
//! let estimate = filter.step().expect("invertible innovation");
//! assert!((estimate.state[0] - 19.6226).abs() < 1e-3);
//! ```

pub mod config;
pub mod error;
pub mod jacobian;
pub mod kalman;
pub mod linalg;
pub mod models;
pub mod sim;
pub mod util;

pub use error::KafiError;
pub use jacobian::{JacobianFunction, PartialDerivative, VectorFunction};
pub use kalman::{Estimate, ExtendedKalmanFilter, FilterSnapshot, ObservationHandle};
