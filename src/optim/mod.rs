//! Bounded-step quasi-Newton minimization.
//!
//! The BFGS state keeps a dense approximation of the objective Hessian and
//! turns it into descent directions through a modified Cholesky
//! factorization, so it stays usable under the indefinite updates that occur
//! near phase boundaries. Step lengths are bounded by a caller-supplied
//! constraint function, which is how the thermodynamic feasibility sets
//! (positive mole numbers, covolume bounds) enter the iteration.

mod linalg;

use crate::errors::{EosError, EosResult};
use crate::log_iter;
use crate::phase_equilibria::Verbosity;
use ndarray::{Array1, Array2};

const ARMIJO_C1: f64 = 1e-4;
const MAX_BACKTRACKS: usize = 48;

/// BFGS method state.
pub struct CholBfgs {
    hessian: Array2<f64>,
}

impl CholBfgs {
    /// New method state for `dim` variables, preconditioned with the identity.
    pub fn new(dim: usize) -> Self {
        Self {
            hessian: Array2::eye(dim),
        }
    }

    /// Preload the Hessian approximation, e.g. with an analytic Hessian.
    pub fn reset(&mut self, hessian: Array2<f64>) {
        self.hessian = hessian;
    }

    fn descent_direction(&self, gradient: &Array1<f64>) -> EosResult<Array1<f64>> {
        let l = linalg::cholesky_modified(&self.hessian)
            .ok_or_else(|| EosError::IterationFailed(String::from("BFGS direction")))?;
        Ok(-linalg::solve_cholesky(&l, gradient))
    }

    fn update(&mut self, step: &Array1<f64>, dgrad: &Array1<f64>) {
        let sy = step.dot(dgrad);
        if !(sy > 0.0) {
            // curvature condition violated, keep the current approximation
            return;
        }
        let bs = self.hessian.dot(step);
        let sbs = step.dot(&bs);
        if !(sbs > 0.0) {
            return;
        }
        let n = step.len();
        for i in 0..n {
            for j in 0..n {
                self.hessian[(i, j)] += dgrad[i] * dgrad[j] / sy - bs[i] * bs[j] / sbs;
            }
        }
    }
}

/// Options of a minimization run.
#[derive(Debug, Clone, Copy)]
pub struct OptimOptions {
    /// Convergence threshold on the infinity norm of the gradient.
    pub gtol: f64,
    pub max_iter: usize,
    /// Reinitialize the Hessian approximation with the identity. The
    /// stability and flash drivers preload an analytic Hessian through
    /// [`CholBfgs::reset`] instead and pass `false`.
    pub reset: bool,
    pub verbosity: Verbosity,
}

/// Termination state of a minimization.
pub struct OptimResult {
    pub argument: Array1<f64>,
    pub value: f64,
    pub converged: bool,
    pub iterations: usize,
}

/// Minimizes `f` starting from `x0`.
///
/// `f(x, grad)` fills the gradient in place and returns the objective value;
/// `constrain_step(x, d)` returns the largest admissible step length along
/// `d` (possibly infinite). Objective evaluations that fail on an infeasible
/// trial point or return a non-finite value make the line search backtrack;
/// an exhausted line search terminates the run with `converged == false`.
pub fn optimize<F, C>(
    method: &mut CholBfgs,
    mut f: F,
    x0: Array1<f64>,
    options: OptimOptions,
    mut constrain_step: C,
) -> EosResult<OptimResult>
where
    F: FnMut(&Array1<f64>, &mut Array1<f64>) -> EosResult<f64>,
    C: FnMut(&Array1<f64>, &Array1<f64>) -> EosResult<f64>,
{
    if options.reset {
        method.hessian = Array2::eye(x0.len());
    }

    let mut x = x0;
    let mut gradient = Array1::zeros(x.len());
    let mut value = f(&x, &mut gradient)?;
    let mut converged = false;
    let mut iterations = 0;

    log_iter!(options.verbosity, " iter |    objective    |  grad norm ");
    log_iter!(options.verbosity, "{:-<46}", "");
    log_iter!(
        options.verbosity,
        " {:4} | {:15.8e} | {:11.4e}",
        0,
        value,
        inf_norm(&gradient)
    );

    loop {
        if inf_norm(&gradient) <= options.gtol {
            converged = true;
            break;
        }
        if iterations >= options.max_iter {
            break;
        }
        iterations += 1;

        let direction = method.descent_direction(&gradient)?;
        let alpha_max = constrain_step(&x, &direction)?;
        let mut alpha = if alpha_max.is_finite() {
            alpha_max.min(1.0)
        } else {
            1.0
        };
        let slope = gradient.dot(&direction);

        let mut trial_gradient = Array1::zeros(x.len());
        let mut accepted = None;
        for _ in 0..MAX_BACKTRACKS {
            let trial = &x + &(&direction * alpha);
            match f(&trial, &mut trial_gradient) {
                Ok(v) if v.is_finite() && v <= value + ARMIJO_C1 * alpha * slope => {
                    accepted = Some((trial, v));
                    break;
                }
                Ok(_) | Err(EosError::InvalidState(..)) => alpha *= 0.5,
                Err(e) => return Err(e),
            }
        }
        let (trial, trial_value) = match accepted {
            Some(accepted) => accepted,
            None => break,
        };

        let step = &trial - &x;
        let dgrad = &trial_gradient - &gradient;
        method.update(&step, &dgrad);

        x = trial;
        value = trial_value;
        gradient.assign(&trial_gradient);

        log_iter!(
            options.verbosity,
            " {:4} | {:15.8e} | {:11.4e}",
            iterations,
            value,
            inf_norm(&gradient)
        );
    }

    Ok(OptimResult {
        argument: x,
        value,
        converged,
        iterations,
    })
}

fn inf_norm(v: &Array1<f64>) -> f64 {
    v.iter().fold(0.0, |max, &g| max.max(g.abs()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use ndarray::{arr1, arr2};

    fn unconstrained(_: &Array1<f64>, _: &Array1<f64>) -> EosResult<f64> {
        Ok(f64::INFINITY)
    }

    #[test]
    fn booth_with_exact_hessian() {
        // f(x) = (x₁+2x₂−7)² + (2x₁+x₂−5)², minimum 0 at (1, 3)
        let f = |x: &Array1<f64>, g: &mut Array1<f64>| -> EosResult<f64> {
            let u = x[0] + 2.0 * x[1] - 7.0;
            let v = 2.0 * x[0] + x[1] - 5.0;
            g[0] = 2.0 * u + 4.0 * v;
            g[1] = 4.0 * u + 2.0 * v;
            Ok(u * u + v * v)
        };
        let mut method = CholBfgs::new(2);
        method.reset(arr2(&[[10.0, 8.0], [8.0, 10.0]]));
        let result = optimize(
            &mut method,
            f,
            arr1(&[4.0, 2.0]),
            OptimOptions {
                gtol: 1e-8,
                max_iter: 100,
                reset: false,
                verbosity: Verbosity::None,
            },
            unconstrained,
        )
        .unwrap();
        assert!(result.converged);
        assert!(result.value < 1e-10);
        assert_abs_diff_eq!(result.argument[0], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(result.argument[1], 3.0, epsilon = 1e-6);
        // the exact Hessian turns the first step into a Newton step
        assert!(result.iterations <= 2);
    }

    #[test]
    fn quadratic_from_identity() {
        let f = |x: &Array1<f64>, g: &mut Array1<f64>| -> EosResult<f64> {
            g[0] = x[0] - 1.0;
            g[1] = 10.0 * (x[1] + 2.0);
            Ok(0.5 * (x[0] - 1.0).powi(2) + 5.0 * (x[1] + 2.0).powi(2))
        };
        let mut method = CholBfgs::new(2);
        let result = optimize(
            &mut method,
            f,
            arr1(&[4.0, 4.0]),
            OptimOptions {
                gtol: 1e-8,
                max_iter: 200,
                reset: true,
                verbosity: Verbosity::None,
            },
            unconstrained,
        )
        .unwrap();
        assert!(result.converged);
        assert_abs_diff_eq!(result.argument[0], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(result.argument[1], -2.0, epsilon = 1e-6);
    }

    #[test]
    fn rosenbrock_converges() {
        let f = |x: &Array1<f64>, g: &mut Array1<f64>| -> EosResult<f64> {
            let r = x[1] - x[0] * x[0];
            g[0] = -2.0 * (1.0 - x[0]) - 400.0 * x[0] * r;
            g[1] = 200.0 * r;
            Ok((1.0 - x[0]).powi(2) + 100.0 * r * r)
        };
        let mut method = CholBfgs::new(2);
        let result = optimize(
            &mut method,
            f,
            arr1(&[-1.2, 1.0]),
            OptimOptions {
                gtol: 1e-5,
                max_iter: 500,
                reset: true,
                verbosity: Verbosity::None,
            },
            unconstrained,
        )
        .unwrap();
        assert!(result.converged);
        assert_relative_eq!(result.argument[0], 1.0, max_relative = 1e-3);
        assert_relative_eq!(result.argument[1], 1.0, max_relative = 1e-3);
    }

    #[test]
    fn step_limiter_is_respected() {
        // the limiter admits steps of at most 0.5 in the infinity norm; the
        // first Newton step would otherwise jump to the minimum directly
        let f = |x: &Array1<f64>, g: &mut Array1<f64>| -> EosResult<f64> {
            g[0] = 2.0 * (x[0] - 2.0);
            Ok((x[0] - 2.0).powi(2))
        };
        let mut method = CholBfgs::new(1);
        let result = optimize(
            &mut method,
            f,
            arr1(&[0.0]),
            OptimOptions {
                gtol: 1e-6,
                max_iter: 200,
                reset: true,
                verbosity: Verbosity::None,
            },
            |_, d: &Array1<f64>| Ok(0.5 / d[0].abs().max(f64::MIN_POSITIVE)),
        )
        .unwrap();
        assert!(result.converged);
        assert_abs_diff_eq!(result.argument[0], 2.0, epsilon = 1e-5);
        assert!(result.iterations >= 4);
    }
}
