//! Isochoric (VT) phase-equilibrium core for multicomponent mixtures
//! described by the Brusilovsky cubic equation of state.
//!
//! Given a closed system of mole numbers `N`, total volume `V` and thermal
//! parameter `RT`, the crate decides whether the system is thermodynamically
//! stable as a single phase ([`stability`]) and, if it is not, computes the
//! two-phase split minimizing the Helmholtz free energy under mass and
//! volume conservation ([`flash`]). The resulting phases are classified as
//! gas and liquid by their compressibility factors.
//!
//! Both drivers are generic over the [`EquationOfState`] capability trait,
//! so alternative cubic models stay insertable without touching them. The
//! minimizations run on a bounded-step BFGS method ([`optim`]) whose
//! modified Cholesky factorization keeps the search directions downhill
//! under indefinite Hessian updates.
//!
//! # Example
//!
//! ```no_run
//! use ndarray::{arr1, Array2};
//! use std::rc::Rc;
//! use vtflash_core::parameter::{Parameter, PureRecord};
//! use vtflash_core::{
//!     flash, Brusilovsky, BrusilovskyParameters, BrusilovskyRecord, FlashPhases,
//!     SolverOptions, GAS_CONSTANT,
//! };
//!
//! # fn main() -> vtflash_core::EosResult<()> {
//! let records: Vec<PureRecord<BrusilovskyRecord>> = serde_json::from_str(
//!     r#"[{
//!         "identifier": { "name": "methane" },
//!         "molarweight": 16.043,
//!         "model_record": {
//!             "tc": 190.564, "pc": 4599200.0, "acentric_factor": 0.01142,
//!             "critical_compressibility": 0.33294, "omega_c": 0.7563, "psi": 0.37447
//!         }
//!     }]"#,
//! )
//! .expect("parse substance records");
//! let parameters = BrusilovskyParameters::from_records(records, Array2::default((1, 1)))?;
//! let eos = Brusilovsky::new(Rc::new(parameters));
//!
//! let result = flash(
//!     &eos,
//!     &arr1(&[1.0]),
//!     0.1,
//!     250.0 * GAS_CONSTANT,
//!     SolverOptions::default(),
//! )?;
//! match result.phases {
//!     FlashPhases::Single(phase) => println!("single phase, V = {} m³", phase.volume),
//!     FlashPhases::Split { gas, liquid } => {
//!         println!("gas {} m³ / liquid {} m³", gas.volume, liquid.volume)
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod cubic;
mod equation_of_state;
pub mod errors;
pub mod optim;
pub mod parameter;
pub mod phase_equilibria;

pub use crate::cubic::{
    Brusilovsky, BrusilovskyBinaryRecord, BrusilovskyParameters, BrusilovskyRecord, EosAggregates,
};
pub use crate::equation_of_state::{EquationOfState, PhaseRoot};
pub use crate::errors::{EosError, EosResult};
pub use crate::phase_equilibria::{
    flash, flash_hessian, stability, EquilibriumPhase, FlashPhases, FlashResult, SolverOptions,
    StabilityResult, StabilityTrial, Verbosity,
};

/// Universal gas constant in J/(mol·K).
pub const GAS_CONSTANT: f64 = 8.31446261815324;
