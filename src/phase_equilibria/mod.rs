//! Isochoric phase stability and phase-split calculations.
//!
//! The entry points are [`stability()`], which decides whether a state
//! `(N, V, RT)` is stable as a single phase, and [`flash()`], which computes
//! the two-phase split minimizing the Helmholtz free energy when it is not.

mod flash;
mod hessian;
mod stability;

pub use flash::{flash, EquilibriumPhase, FlashPhases, FlashResult};
pub use hessian::flash_hessian;
pub use stability::{stability, StabilityResult, StabilityTrial};

use crate::equation_of_state::EquationOfState;
use crate::errors::{EosError, EosResult};
use ndarray::Array1;

/// Level of detail of iteration printouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    /// Do not print anything.
    None,
    /// Print a one-line summary of every solver run.
    Result,
    /// Print a table of all iterations.
    Iter,
}

impl Default for Verbosity {
    fn default() -> Self {
        Verbosity::None
    }
}

/// Print a result message depending on the verbosity level.
#[macro_export]
macro_rules! log_result {
    ($verbosity:expr, $($arg:tt)*) => {
        if $verbosity >= $crate::phase_equilibria::Verbosity::Result {
            println!($($arg)*);
        }
    };
}

/// Print a progress message depending on the verbosity level.
#[macro_export]
macro_rules! log_iter {
    ($verbosity:expr, $($arg:tt)*) => {
        if $verbosity >= $crate::phase_equilibria::Verbosity::Iter {
            println!($($arg)*);
        }
    };
}

/// Options of the stability and flash solvers. `None` entries resolve to the
/// solver's built-in defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct SolverOptions {
    pub max_iter: Option<usize>,
    pub tol: Option<f64>,
    pub verbosity: Verbosity,
}

impl SolverOptions {
    pub fn new(max_iter: Option<usize>, tol: Option<f64>, verbosity: Verbosity) -> Self {
        Self {
            max_iter,
            tol,
            verbosity,
        }
    }

    pub fn unwrap_or(self, max_iter: usize, tol: f64) -> (usize, f64, Verbosity) {
        (
            self.max_iter.unwrap_or(max_iter),
            self.tol.unwrap_or(tol),
            self.verbosity,
        )
    }
}

/// Checks the invariants of an input state: matching component count,
/// positive mole numbers and a volume above the mixture covolume.
pub(crate) fn validate_state<E: EquationOfState>(
    eos: &E,
    operation: &str,
    moles: &Array1<f64>,
    volume: f64,
) -> EosResult<()> {
    if moles.len() != eos.components() {
        return Err(EosError::IncompatibleComponents(
            eos.components(),
            moles.len(),
        ));
    }
    for &n in moles.iter() {
        if !(n > 0.0) {
            return Err(EosError::InvalidState(
                operation.into(),
                String::from("moles"),
                n,
            ));
        }
    }
    let covolume = moles.dot(eos.covolumes());
    if !(volume > covolume) {
        return Err(EosError::InvalidState(
            operation.into(),
            String::from("volume"),
            volume,
        ));
    }
    Ok(())
}
