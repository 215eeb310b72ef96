use super::{validate_state, SolverOptions, Verbosity};
use crate::equation_of_state::{EquationOfState, PhaseRoot};
use crate::errors::{EosError, EosResult};
use crate::log_result;
use crate::optim::{optimize, CholBfgs, OptimOptions};
use ndarray::Array1;

/// Tangent-plane distances below this threshold prove instability.
const TPD_THRESHOLD: f64 = -1e-5;
const DEFAULT_GTOL: f64 = 1e-3;
const DEFAULT_MAX_ITER: usize = 1000;

/// Outcome of a single stability trial.
#[derive(Debug, Clone)]
pub struct StabilityTrial {
    /// Trial-phase concentration at the located minimum.
    pub concentration: Array1<f64>,
    /// Tangent-plane distance at the located minimum.
    pub energy_density: f64,
    /// Whether this trial failed to prove instability.
    pub stable: bool,
}

/// Result of the stability analysis. All finished trials are kept; the flash
/// driver seeds its initial split from the most unstable one.
#[derive(Debug, Clone)]
pub struct StabilityResult {
    pub stable: bool,
    pub trials: Vec<StabilityTrial>,
}

impl StabilityResult {
    /// Trial with the lowest finite tangent-plane distance.
    pub fn best_trial(&self) -> Option<&StabilityTrial> {
        self.trials
            .iter()
            .filter(|trial| trial.energy_density.is_finite())
            .min_by(|a, b| a.energy_density.total_cmp(&b.energy_density))
    }
}

/// Tangent-plane-distance functional of a parent phase, evaluated on trial
/// concentrations; the trial phase is taken at unit volume.
struct TpdObjective<'a, E> {
    eos: &'a E,
    /// lnγᵢ + ln cᵢ of the parent phase
    log_activity_parent: Array1<f64>,
    pressure_parent: f64,
    rt: f64,
}

impl<'a, E: EquationOfState> TpdObjective<'a, E> {
    fn new(eos: &'a E, moles: &Array1<f64>, volume: f64, rt: f64) -> EosResult<Self> {
        let mut log_activity_parent = eos.log_activity(moles, volume, rt)?;
        for (la, &n) in log_activity_parent.iter_mut().zip(moles.iter()) {
            *la += (n / volume).ln();
        }
        let pressure_parent = eos.pressure(moles, volume, rt)?;
        Ok(Self {
            eos,
            log_activity_parent,
            pressure_parent,
            rt,
        })
    }

    /// D(η) and its gradient,
    /// ∇Dᵢ = lnγᵢ(η, 1) + ln ηᵢ − (lnγᵢ + ln cᵢ)(parent),
    /// D = ⟨∇D, η⟩ − (p(η, 1) − p(parent))/RT.
    fn evaluate(&self, eta: &Array1<f64>, gradient: &mut Array1<f64>) -> EosResult<f64> {
        let log_activity = self.eos.log_activity(eta, 1.0, self.rt)?;
        for i in 0..eta.len() {
            gradient[i] = log_activity[i] + eta[i].ln() - self.log_activity_parent[i];
        }
        let pressure = self.eos.pressure(eta, 1.0, self.rt)?;
        Ok(gradient.dot(eta) - (pressure - self.pressure_parent) / self.rt)
    }

    /// Largest step keeping the concentration positive and below the
    /// unit-volume covolume bound. Boundary-touching steps are admissible;
    /// the line search recovers from them.
    fn max_step(&self, eta: &Array1<f64>, direction: &Array1<f64>) -> EosResult<f64> {
        let covolumes = self.eos.covolumes();
        let mut alpha = f64::INFINITY;
        for i in 0..eta.len() {
            if direction[i] < 0.0 {
                alpha = alpha.min(-eta[i] / direction[i]);
            }
        }
        let db = direction.dot(covolumes);
        if db > 0.0 {
            alpha = alpha.min((1.0 - eta.dot(covolumes)) / db);
        }
        Ok(alpha)
    }
}

/// VT stability analysis of the state `(N, V, RT)`.
///
/// Minimizes the tangent-plane distance from four Wilson-seeded trial
/// concentrations (vapor-like and liquid-like composition, each resolved
/// with the gas and the liquid root of the cubic). The first minimum below
/// the instability threshold short-circuits the remaining trials, which
/// keeps the expected work small for unstable inputs.
pub fn stability<E: EquationOfState>(
    eos: &E,
    moles: &Array1<f64>,
    volume: f64,
    rt: f64,
    options: SolverOptions,
) -> EosResult<StabilityResult> {
    validate_state(eos, "stability", moles, volume)?;
    let (max_iter, gtol, verbosity) = options.unwrap_or(DEFAULT_MAX_ITER, DEFAULT_GTOL);

    let objective = TpdObjective::new(eos, moles, volume, rt)?;
    let p_sat = eos.wilson_saturation_pressure(rt);
    let total = moles.sum();

    // vapor-like composition: partial-pressure weighting of the feed
    let p_vapor = p_sat.dot(moles) / total;
    let vapor_seed = moles * &p_sat / p_vapor;

    // liquid-like composition: inverse-volatility weighting
    let liquid_seed = moles / &p_sat;
    let liquid_seed = &liquid_seed / liquid_seed.sum();
    let p_liquid = p_sat.dot(&liquid_seed);

    let seeds = [(vapor_seed, p_vapor), (liquid_seed, p_liquid)];
    let mut trials = Vec::with_capacity(4);

    for (composition, p_init) in seeds.iter() {
        for &root in &[PhaseRoot::Gas, PhaseRoot::Liquid] {
            let z = eos.compressibility(composition, *p_init, rt, root)?;
            let eta = composition * (*p_init / (z * rt * composition.sum()));
            let mut trial = run_trial(eos, &objective, eta, rt, gtol, max_iter, verbosity)?;
            if trial.energy_density < TPD_THRESHOLD {
                trial.stable = false;
                log_result!(
                    verbosity,
                    "Stability: unstable after {} trial(s), D = {:.6e}",
                    trials.len() + 1,
                    trial.energy_density
                );
                trials.push(trial);
                return Ok(StabilityResult {
                    stable: false,
                    trials,
                });
            }
            trials.push(trial);
        }
    }

    if trials.iter().all(|trial| trial.energy_density.is_nan()) {
        return Err(EosError::StabilityDiverged);
    }
    log_result!(
        verbosity,
        "Stability: single phase confirmed after {} trials",
        trials.len()
    );
    Ok(StabilityResult {
        stable: true,
        trials,
    })
}

fn run_trial<E: EquationOfState>(
    eos: &E,
    objective: &TpdObjective<E>,
    eta: Array1<f64>,
    rt: f64,
    gtol: f64,
    max_iter: usize,
    verbosity: Verbosity,
) -> EosResult<StabilityTrial> {
    let (_, jacobian) = eos.log_activity_with_jacobian(&eta, 1.0, rt)?;
    let mut hessian = jacobian;
    for i in 0..eta.len() {
        hessian[(i, i)] += 1.0 / eta[i];
    }
    let mut method = CholBfgs::new(eta.len());
    method.reset(hessian);

    let result = optimize(
        &mut method,
        |x, gradient| objective.evaluate(x, gradient),
        eta,
        OptimOptions {
            gtol,
            max_iter,
            reset: false,
            verbosity,
        },
        |x, direction| objective.max_step(x, direction),
    )?;

    Ok(StabilityTrial {
        concentration: result.argument,
        energy_density: result.value,
        stable: true,
    })
}
