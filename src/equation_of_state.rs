use crate::errors::EosResult;
use ndarray::{Array1, Array2};

/// Root of the cubic equation of state to select when solving for the
/// compressibility factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseRoot {
    /// Largest physical root.
    Gas,
    /// Smallest physical root.
    Liquid,
}

/// Capability interface consumed by the stability and flash drivers.
///
/// All operations are pure in their inputs and work on extensive states:
/// mole numbers `N`, total volume `V` and the thermal parameter `RT`
/// (gas constant times temperature). Alternative models stay insertable
/// into the drivers by implementing this trait.
pub trait EquationOfState {
    /// Number of components the model is parameterized for.
    fn components(&self) -> usize;

    /// Per-component covolumes; `Σ Nᵢbᵢ < V` bounds the feasible volumes.
    fn covolumes(&self) -> &Array1<f64>;

    /// Pressure at `(N, V, RT)`.
    fn pressure(&self, moles: &Array1<f64>, volume: f64, rt: f64) -> EosResult<f64>;

    /// Natural logarithm of the activity coefficients, i.e. the residual
    /// part of the chemical potentials per `RT` at fixed volume.
    fn log_activity(&self, moles: &Array1<f64>, volume: f64, rt: f64) -> EosResult<Array1<f64>>;

    /// Log-activity together with its jacobian `∂lnγᵢ/∂Nⱼ` at fixed `V`, `RT`.
    /// The jacobian is symmetric.
    fn log_activity_with_jacobian(
        &self,
        moles: &Array1<f64>,
        volume: f64,
        rt: f64,
    ) -> EosResult<(Array1<f64>, Array2<f64>)>;

    /// Pressure derivatives `(∂p/∂Nᵢ at fixed V, ∂p/∂V at fixed N)`.
    fn pressure_gradient(
        &self,
        moles: &Array1<f64>,
        volume: f64,
        rt: f64,
    ) -> EosResult<(Array1<f64>, f64)>;

    /// Compressibility factor of the requested root of the cubic at
    /// `(N, p, RT)`; only the composition of `moles` matters.
    fn compressibility(
        &self,
        moles: &Array1<f64>,
        pressure: f64,
        rt: f64,
        root: PhaseRoot,
    ) -> EosResult<f64>;

    /// Wilson correlation for the pure-component saturation pressures.
    fn wilson_saturation_pressure(&self, rt: f64) -> Array1<f64>;
}
