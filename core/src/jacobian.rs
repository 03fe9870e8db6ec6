//! Vector functions paired with their analytic Jacobian.
//!
//! A [`JacobianFunction<N, M>`] binds a nonlinear mapping $f: \mathbb{R}^N \to \mathbb{R}^M$ to the
//! dense $M \times N$ grid of its scalar partial derivatives
//!
//! $$
//! F_{r,c}(x) = \frac{\partial f_r}{\partial x_c}(x)
//! $$
//!
//! Both halves are supplied by the integrator; nothing here differentiates numerically. The pair
//! is immutable once built and is handed to the filter by move. It deliberately does not
//! implement `Clone` so that closures capturing large external context are never duplicated.
//!
//! Derivative cells are reference counted, which lets one stateless closure (typically a
//! constant 0 or 1, see [`crate::util::identity_derivative`]) fill many cells of the grid.

use std::fmt::{self, Debug};
use std::sync::Arc;

use nalgebra::{SMatrix, SVector};

use crate::error::KafiError;

/// The vector-valued half of a [`JacobianFunction`]: reads the input and writes `f(input)`.
pub type VectorFunction<const N: usize, const M: usize> =
    Box<dyn Fn(&SVector<f64, N>, &mut SVector<f64, M>) + Send + Sync>;

/// A single scalar partial derivative $\partial f_r / \partial x_c$ evaluated at a state.
pub type PartialDerivative<const N: usize> = Arc<dyn Fn(&SVector<f64, N>) -> f64 + Send + Sync>;

/// A function $f: \mathbb{R}^N \to \mathbb{R}^M$ together with its $M \times N$ Jacobian.
pub struct JacobianFunction<const N: usize, const M: usize> {
    function: VectorFunction<N, M>,
    /// Row-major, exactly `M * N` cells.
    partials: Vec<PartialDerivative<N>>,
}

impl<const N: usize, const M: usize> Debug for JacobianFunction<N, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JacobianFunction")
            .field("inputs", &N)
            .field("outputs", &M)
            .field("partials", &self.partials.len())
            .finish()
    }
}

impl<const N: usize, const M: usize> JacobianFunction<N, M> {
    /// Builds the pair from a statically shaped derivative grid.
    ///
    /// The grid is indexed `partials[row][col]` where `row` selects the output component and
    /// `col` the input component, so a wrongly shaped grid is rejected by the compiler.
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::sync::Arc;
    /// use kafi::jacobian::{JacobianFunction, PartialDerivative};
    /// use nalgebra::{SMatrix, SVector};
    ///
    /// // f(x) = [x0, x0] with derivative [1; 1]
    /// let one: PartialDerivative<1> = Arc::new(|_: &SVector<f64, 1>| 1.0);
    /// let h = JacobianFunction::<1, 2>::new(
    ///     |input: &SVector<f64, 1>, output: &mut SVector<f64, 2>| {
    ///         output[0] = input[0];
    ///         output[1] = input[0];
    ///     },
    ///     [[one.clone()], [one]],
    /// );
    ///
    /// let mut jac = SMatrix::<f64, 2, 1>::zeros();
    /// h.jacobian(&SVector::<f64, 1>::new(1.5), &mut jac);
    /// assert_eq!(jac, SMatrix::<f64, 2, 1>::new(1.0, 1.0));
    /// ```
    pub fn new<F>(function: F, partials: [[PartialDerivative<N>; N]; M]) -> Self
    where
        F: Fn(&SVector<f64, N>, &mut SVector<f64, M>) + Send + Sync + 'static,
    {
        JacobianFunction {
            function: Box::new(function),
            partials: partials.into_iter().flatten().collect(),
        }
    }

    /// Builds the pair from a runtime-assembled grid of rows.
    ///
    /// # Errors
    ///
    /// [`KafiError::ShapeMismatch`] if there are not exactly `M` rows of exactly `N` cells.
    pub fn from_rows<F>(function: F, rows: Vec<Vec<PartialDerivative<N>>>) -> Result<Self, KafiError>
    where
        F: Fn(&SVector<f64, N>, &mut SVector<f64, M>) + Send + Sync + 'static,
    {
        if rows.len() != M {
            return Err(KafiError::ShapeMismatch {
                what: "jacobian rows",
                expected: M,
                found: rows.len(),
            });
        }
        if let Some(row) = rows.iter().find(|row| row.len() != N) {
            return Err(KafiError::ShapeMismatch {
                what: "jacobian columns",
                expected: N,
                found: row.len(),
            });
        }
        Ok(JacobianFunction {
            function: Box::new(function),
            partials: rows.into_iter().flatten().collect(),
        })
    }

    /// Builds the pair by asking `cell(row, col)` for every derivative in row-major order.
    pub fn from_fn<F, C>(function: F, mut cell: C) -> Self
    where
        F: Fn(&SVector<f64, N>, &mut SVector<f64, M>) + Send + Sync + 'static,
        C: FnMut(usize, usize) -> PartialDerivative<N>,
    {
        let mut partials = Vec::with_capacity(M * N);
        for row in 0..M {
            for col in 0..N {
                partials.push(cell(row, col));
            }
        }
        JacobianFunction {
            function: Box::new(function),
            partials,
        }
    }

    /// Writes `f(state)` into `output`.
    ///
    /// `output` is not cleared first. Components the function leaves untouched keep whatever
    /// the caller put there, which the filter relies on when it passes the previous state as
    /// the output buffer of the state transition.
    #[inline]
    pub fn evaluate(&self, state: &SVector<f64, N>, output: &mut SVector<f64, M>) {
        (self.function)(state, output)
    }

    /// Evaluates every partial derivative at `state` into `output` and returns it for chaining.
    ///
    /// Each cell is independent of the others.
    pub fn jacobian<'a>(
        &self,
        state: &SVector<f64, N>,
        output: &'a mut SMatrix<f64, M, N>,
    ) -> &'a mut SMatrix<f64, M, N> {
        for row in 0..M {
            for col in 0..N {
                output[(row, col)] = (self.partials[row * N + col])(state);
            }
        }
        output
    }

    /// Evaluates the single partial derivative $\partial f_{row} / \partial x_{col}$ at `state`.
    ///
    /// # Panics
    ///
    /// If `row >= M` or `col >= N`.
    pub fn partial(&self, row: usize, col: usize, state: &SVector<f64, N>) -> f64 {
        assert!(
            row < M && col < N,
            "JacobianFunction::partial: ({row}, {col}) outside of {M}x{N}"
        );
        (self.partials[row * N + col])(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::{create_identity_jacobian, identity_derivative};

    fn check_identity_jacobian<const N: usize, const M: usize>() {
        let x = 1.5;
        let prediction_scaling = create_identity_jacobian::<N, M>();

        let input = SVector::<f64, N>::repeat(x);
        let mut h_result = SVector::<f64, M>::zeros();
        let mut jac_result = SMatrix::<f64, M, N>::zeros();

        prediction_scaling.evaluate(&input, &mut h_result);
        prediction_scaling.jacobian(&input, &mut jac_result);

        let h_expected = SVector::<f64, M>::repeat(x);
        let mut jac_expected = SMatrix::<f64, M, N>::zeros();
        jac_expected.column_mut(0).fill(1.0);

        assert_eq!(h_result, h_expected, "N = {N}, M = {M}");
        assert_eq!(jac_result, jac_expected, "N = {N}, M = {M}");
    }

    #[test]
    fn explicit_one_by_two() {
        let h_0_0: PartialDerivative<1> = Arc::new(|_: &SVector<f64, 1>| 1.0);
        let h_1_0: PartialDerivative<1> = Arc::new(|_: &SVector<f64, 1>| 1.0);
        let prediction_scaling = JacobianFunction::<1, 2>::new(
            |input: &SVector<f64, 1>, output: &mut SVector<f64, 2>| {
                output[0] = input[0];
                output[1] = input[0];
            },
            [[h_0_0], [h_1_0]],
        );

        let input = SVector::<f64, 1>::new(1.5);
        let mut h_result = SVector::<f64, 2>::zeros();
        let mut jac_result = SMatrix::<f64, 2, 1>::zeros();
        prediction_scaling.evaluate(&input, &mut h_result);
        prediction_scaling.jacobian(&input, &mut jac_result);

        assert_eq!(h_result, SVector::<f64, 2>::new(1.5, 1.5));
        assert_eq!(jac_result, SMatrix::<f64, 2, 1>::new(1.0, 1.0));
    }

    #[test]
    fn identity_jacobian_various_shapes() {
        check_identity_jacobian::<1, 4>();
        check_identity_jacobian::<2, 4>();
        check_identity_jacobian::<5, 5>();
        check_identity_jacobian::<2, 10>();
        check_identity_jacobian::<1, 100>();
        check_identity_jacobian::<20, 50>();
        check_identity_jacobian::<50, 4>();
    }

    #[test]
    fn broadcast_jacobian_ignores_input_value() {
        let f = create_identity_jacobian::<1, 3>();
        let mut jac = SMatrix::<f64, 3, 1>::zeros();
        for x in [-1e6, -2.5, 0.0, 3.25, 1e9] {
            f.jacobian(&SVector::<f64, 1>::new(x), &mut jac);
            assert_eq!(jac, SMatrix::<f64, 3, 1>::repeat(1.0));
        }
    }

    #[test]
    fn state_dependent_partials() {
        // f(x, y) = [x * y, sin(x)]
        let d00: PartialDerivative<2> = Arc::new(|s: &SVector<f64, 2>| s[1]);
        let d01: PartialDerivative<2> = Arc::new(|s: &SVector<f64, 2>| s[0]);
        let d10: PartialDerivative<2> = Arc::new(|s: &SVector<f64, 2>| s[0].cos());
        let f = JacobianFunction::<2, 2>::new(
            |s: &SVector<f64, 2>, out: &mut SVector<f64, 2>| {
                out[0] = s[0] * s[1];
                out[1] = s[0].sin();
            },
            [[d00, d01], [d10, identity_derivative::<2>(0.0)]],
        );
        let state = SVector::<f64, 2>::new(0.5, 3.0);
        let mut jac = SMatrix::<f64, 2, 2>::zeros();
        let jac = f.jacobian(&state, &mut jac);
        assert_eq!(jac[(0, 0)], 3.0);
        assert_eq!(jac[(0, 1)], 0.5);
        assert_eq!(jac[(1, 0)], 0.5f64.cos());
        assert_eq!(jac[(1, 1)], 0.0);
        assert_eq!(f.partial(0, 1, &state), 0.5);
    }

    #[test]
    fn evaluate_leaves_unwritten_components() {
        let f = JacobianFunction::<2, 2>::from_fn(
            |s: &SVector<f64, 2>, out: &mut SVector<f64, 2>| out[0] = 2.0 * s[0],
            |_, _| identity_derivative::<2>(0.0),
        );
        let mut out = SVector::<f64, 2>::new(-1.0, 7.0);
        f.evaluate(&SVector::<f64, 2>::new(4.0, 0.0), &mut out);
        assert_eq!(out, SVector::<f64, 2>::new(8.0, 7.0));
    }

    #[test]
    fn from_rows_accepts_matching_grid() {
        let one = identity_derivative::<1>(1.0);
        let f = JacobianFunction::<1, 2>::from_rows(
            |s: &SVector<f64, 1>, out: &mut SVector<f64, 2>| out.fill(s[0]),
            vec![vec![one.clone()], vec![one]],
        )
        .expect("2x1 grid should be accepted");
        assert_eq!(f.partial(1, 0, &SVector::<f64, 1>::zeros()), 1.0);
    }

    #[test]
    fn from_rows_rejects_wrong_row_count() {
        let one = identity_derivative::<1>(1.0);
        let result = JacobianFunction::<1, 2>::from_rows(
            |s: &SVector<f64, 1>, out: &mut SVector<f64, 2>| out.fill(s[0]),
            vec![vec![one]],
        );
        match result {
            Err(KafiError::ShapeMismatch {
                expected, found, ..
            }) => {
                assert_eq!(expected, 2);
                assert_eq!(found, 1);
            }
            other => panic!("expected a shape mismatch, got {other:?}"),
        }
    }

    #[test]
    fn from_rows_rejects_wrong_column_count() {
        let zero = identity_derivative::<2>(0.0);
        let result = JacobianFunction::<2, 1>::from_rows(
            |s: &SVector<f64, 2>, out: &mut SVector<f64, 1>| out[0] = s[0],
            vec![vec![zero.clone(), zero.clone(), zero]],
        );
        assert!(matches!(
            result,
            Err(KafiError::ShapeMismatch {
                what: "jacobian columns",
                expected: 2,
                found: 3
            })
        ));
    }

    #[test]
    #[should_panic]
    fn partial_out_of_bounds_panics() {
        let f = create_identity_jacobian::<2, 2>();
        let _ = f.partial(2, 0, &SVector::<f64, 2>::zeros());
    }
}
