//! Convenience constructors for common matrices, functions and derivatives.
//!
//! These mostly exist to assemble test models quickly: an identity matrix of any static size, a
//! function broadcasting the first state component into every output, the constant derivative
//! used for pass-through or unaffected components, and the [`JacobianFunction`] combining them.

use std::sync::Arc;

use nalgebra::{SMatrix, SVector};

use crate::jacobian::{JacobianFunction, PartialDerivative};

/// Statically sized `N x N` identity matrix.
pub fn create_identity<const N: usize>() -> SMatrix<f64, N, N> {
    SMatrix::<f64, N, N>::identity()
}

/// Function that copies `input[0]` into every component of the output.
///
/// `[1, 2, 3, 4]` with `M = 2` becomes `[1, 1]`.
pub fn identity_broadcast_function<const N: usize, const M: usize>()
-> impl Fn(&SVector<f64, N>, &mut SVector<f64, M>) + Send + Sync + Clone + 'static {
    |input: &SVector<f64, N>, output: &mut SVector<f64, M>| output.fill(input[0])
}

/// Partial derivative that ignores the state and always returns `value` (mostly 0 or 1).
pub fn identity_derivative<const N: usize>(value: f64) -> PartialDerivative<N> {
    Arc::new(move |_: &SVector<f64, N>| value)
}

/// Broadcasting identity function paired with its Jacobian.
///
/// With `N = 3` and `M = 5`:
///
/// ```text
/// f[x, y, z] = [x, x, x, x, x]
///
/// F[x, y, z] = [[1, 0, 0]
///               [1, 0, 0]
///               [1, 0, 0]
///               [1, 0, 0]
///               [1, 0, 0]]
/// ```
pub fn create_identity_jacobian<const N: usize, const M: usize>() -> JacobianFunction<N, M> {
    let one = identity_derivative::<N>(1.0);
    let zero = identity_derivative::<N>(0.0);
    JacobianFunction::from_fn(identity_broadcast_function::<N, M>(), |_, col| {
        if col == 0 { one.clone() } else { zero.clone() }
    })
}
