//! Ready-made process and observation models.
//!
//! - [`temperature_model`]: one scalar quantity measured by `M` identical sensors.
//! - [`vehicle_transition`] / [`vehicle_observation`]: planar vehicle driven by body-frame
//!   accelerations and velocities, observed by an IMU and an optical ground-speed sensor
//!   (correvit) sampling at a fixed period.
//!
//! ## Vehicle state
//!
//! $$
//! x = [p_x, p_y, a_x, a_y, v_x, v_y, \varphi]
//! $$
//!
//! with observations $z = [a_x, a_y, v_x, v_y, \varphi]$. Positions advance with the rotated
//! displacement over one sample period $t$:
//!
//! $$
//! \begin{aligned}
//! p_x^+ &= (\tfrac{1}{2} a_x t^2 + v_x t)\cos\varphi + (\tfrac{1}{2} a_y t^2 + v_y t)\sin\varphi + p_x \\\\
//! p_y^+ &= -(\tfrac{1}{2} a_x t^2 + v_x t)\sin\varphi + (\tfrac{1}{2} a_y t^2 + v_y t)\cos\varphi + p_y \\\\
//! v^+ &= v + a t
//! \end{aligned}
//! $$
//!
//! Accelerations and heading are carried over unchanged.

use std::sync::Arc;

use nalgebra::SVector;

use crate::jacobian::{JacobianFunction, PartialDerivative};
use crate::util::{create_identity_jacobian, identity_derivative};

pub const VEHICLE_STATES: usize = 7;
pub const VEHICLE_OBSERVATIONS: usize = 5;

/// Default sample period of the vehicle sensors (1 kHz).
pub const VEHICLE_SAMPLE_PERIOD: f64 = 0.001;

/// Diagonal of `Q` for the vehicle model: positions are not disturbed directly.
pub const VEHICLE_PROCESS_NOISE: [f64; VEHICLE_STATES] = [0.0, 0.0, 0.1, 0.1, 0.1, 0.1, 0.1];

/// Diagonal of `R` for the vehicle model: accelerometers, correvit velocities, heading.
pub const VEHICLE_SENSOR_NOISE: [f64; VEHICLE_OBSERVATIONS] = [0.7, 0.7, 0.45, 0.45, 0.001];

// state indices
const X: usize = 0;
const Y: usize = 1;
const AX: usize = 2;
const AY: usize = 3;
const VX: usize = 4;
const VY: usize = 5;
const PHI: usize = 6;

type VehicleState = SVector<f64, VEHICLE_STATES>;

/// Identity transition and broadcast observation of a single scalar into `M` sensors.
pub fn temperature_model<const M: usize>() -> (JacobianFunction<1, 1>, JacobianFunction<1, M>) {
    (
        create_identity_jacobian::<1, 1>(),
        create_identity_jacobian::<1, M>(),
    )
}

/// State transition of the planar vehicle for a sample period `t` (seconds).
pub fn vehicle_transition(t: f64) -> JacobianFunction<VEHICLE_STATES, VEHICLE_STATES> {
    let t2 = t * t;

    let f = move |s: &VehicleState, out: &mut VehicleState| {
        let (sin, cos) = s[PHI].sin_cos();
        let along = 0.5 * s[AX] * t2 + s[VX] * t;
        let across = 0.5 * s[AY] * t2 + s[VY] * t;

        out[X] = along * cos + across * sin + s[X];
        out[Y] = -along * sin + across * cos + s[Y];
        out[AX] = s[AX];
        out[AY] = s[AY];
        out[VX] = s[VX] + s[AX] * t;
        out[VY] = s[VY] + s[AY] * t;
        out[PHI] = s[PHI];
    };

    let one = identity_derivative::<VEHICLE_STATES>(1.0);
    let zero = identity_derivative::<VEHICLE_STATES>(0.0);
    let dt = identity_derivative::<VEHICLE_STATES>(t);

    // row X
    let dx_dax: PartialDerivative<VEHICLE_STATES> =
        Arc::new(move |s: &VehicleState| 0.5 * t2 * s[PHI].cos());
    let dx_day: PartialDerivative<VEHICLE_STATES> =
        Arc::new(move |s: &VehicleState| 0.5 * t2 * s[PHI].sin());
    let dx_dvx: PartialDerivative<VEHICLE_STATES> =
        Arc::new(move |s: &VehicleState| t * s[PHI].cos());
    let dx_dvy: PartialDerivative<VEHICLE_STATES> =
        Arc::new(move |s: &VehicleState| t * s[PHI].sin());
    let dx_dphi: PartialDerivative<VEHICLE_STATES> = Arc::new(move |s: &VehicleState| {
        let (sin, cos) = s[PHI].sin_cos();
        cos * (0.5 * s[AY] * t2 + s[VY] * t) - sin * (0.5 * s[AX] * t2 + s[VX] * t)
    });

    // row Y
    let dy_dax: PartialDerivative<VEHICLE_STATES> =
        Arc::new(move |s: &VehicleState| -0.5 * t2 * s[PHI].sin());
    let dy_day: PartialDerivative<VEHICLE_STATES> =
        Arc::new(move |s: &VehicleState| 0.5 * t2 * s[PHI].cos());
    let dy_dvx: PartialDerivative<VEHICLE_STATES> =
        Arc::new(move |s: &VehicleState| -t * s[PHI].sin());
    let dy_dvy: PartialDerivative<VEHICLE_STATES> =
        Arc::new(move |s: &VehicleState| t * s[PHI].cos());
    let dy_dphi: PartialDerivative<VEHICLE_STATES> = Arc::new(move |s: &VehicleState| {
        let (sin, cos) = s[PHI].sin_cos();
        -cos * (0.5 * s[AX] * t2 + s[VX] * t) - sin * (0.5 * s[AY] * t2 + s[VY] * t)
    });

    let o = || one.clone();
    let z = || zero.clone();

    JacobianFunction::new(
        f,
        [
            //  x    y    ax      ay      vx      vy      phi
            [o(), z(), dx_dax, dx_day, dx_dvx, dx_dvy, dx_dphi],
            [z(), o(), dy_dax, dy_day, dy_dvx, dy_dvy, dy_dphi],
            [z(), z(), o(), z(), z(), z(), z()],
            [z(), z(), z(), o(), z(), z(), z()],
            [z(), z(), dt.clone(), z(), o(), z(), z()],
            [z(), z(), z(), dt, z(), o(), z()],
            [z(), z(), z(), z(), z(), z(), o()],
        ],
    )
}

/// Observation model of the vehicle: drops the positions from the state.
pub fn vehicle_observation() -> JacobianFunction<VEHICLE_STATES, VEHICLE_OBSERVATIONS> {
    let one = identity_derivative::<VEHICLE_STATES>(1.0);
    let zero = identity_derivative::<VEHICLE_STATES>(0.0);
    JacobianFunction::from_fn(
        |s: &VehicleState, out: &mut SVector<f64, VEHICLE_OBSERVATIONS>| {
            out.copy_from(&s.fixed_rows::<VEHICLE_OBSERVATIONS>(AX));
        },
        |row, col| {
            if col == row + AX {
                one.clone()
            } else {
                zero.clone()
            }
        },
    )
}
