use super::hessian::flash_hessian;
use super::stability::stability;
use super::{validate_state, SolverOptions};
use crate::equation_of_state::EquationOfState;
use crate::errors::{EosError, EosResult};
use crate::log_result;
use crate::optim::{optimize, CholBfgs, OptimOptions};
use ndarray::Array1;

const DEFAULT_GTOL: f64 = 1e-3;
const DEFAULT_MAX_ITER: usize = 100;
/// Saturation of the trial phase at the first initializer attempt.
const INIT_SATURATION: f64 = 0.25;
const INIT_STEPS: usize = 200;
const INIT_SCALE_FACTOR: f64 = 0.5;
const INIT_THRESHOLD: f64 = -1e-7;
/// Keeps flash iterates strictly inside the feasible set.
const STEP_BACKOFF: f64 = 0.9;

/// Moles and volume of one phase of an equilibrium.
#[derive(Debug, Clone)]
pub struct EquilibriumPhase {
    pub moles: Array1<f64>,
    pub volume: f64,
}

/// Phase configuration found by the flash.
#[derive(Debug, Clone)]
pub enum FlashPhases {
    /// The input state is stable as a single phase.
    Single(EquilibriumPhase),
    /// Two-phase split; the gas is the phase with the higher
    /// compressibility factor.
    Split {
        gas: EquilibriumPhase,
        liquid: EquilibriumPhase,
    },
}

/// Result of an isochoric flash.
#[derive(Debug, Clone)]
pub struct FlashResult {
    pub rt: f64,
    pub converged: bool,
    pub iterations: usize,
    pub phases: FlashPhases,
}

/// Helmholtz free-energy difference between a two-phase and the one-phase
/// configuration, parameterized by the fractional split vector
/// `x = (N′₁/N₁, …, N′_c/N_c, V′/V)` with all coordinates strictly inside
/// `(0, 1)`.
struct FlashObjective<'a, E> {
    eos: &'a E,
    moles: Array1<f64>,
    volume: f64,
    rt: f64,
    /// lnγᵢ + ln cᵢ of the one-phase base state
    log_activity_base: Array1<f64>,
    pressure_base: f64,
    /// (N₁b₁, …, N_c b_c, −V), the normal of the phase-1 covolume constraint
    covolume_normal: Array1<f64>,
}

impl<'a, E: EquationOfState> FlashObjective<'a, E> {
    /// Precomputes the base-state quantities. The callers validate the base
    /// state up front, so the one-phase state is always feasible here.
    fn new(eos: &'a E, moles: &Array1<f64>, volume: f64, rt: f64) -> EosResult<Self> {
        let mut log_activity_base = eos.log_activity(moles, volume, rt)?;
        for (la, &n) in log_activity_base.iter_mut().zip(moles.iter()) {
            *la += (n / volume).ln();
        }
        let pressure_base = eos.pressure(moles, volume, rt)?;

        let c = moles.len();
        let mut covolume_normal = Array1::zeros(c + 1);
        for i in 0..c {
            covolume_normal[i] = moles[i] * eos.covolumes()[i];
        }
        covolume_normal[c] = -volume;

        Ok(Self {
            eos,
            moles: moles.clone(),
            volume,
            rt,
            log_activity_base,
            pressure_base,
            covolume_normal,
        })
    }

    /// Splits the state into `(N′, V′, N″, V″)`.
    fn split(&self, x: &Array1<f64>) -> EosResult<(Array1<f64>, f64, Array1<f64>, f64)> {
        for &xi in x.iter() {
            if !(xi > 0.0 && xi < 1.0) {
                return Err(EosError::InvalidState(
                    String::from("flash"),
                    String::from("split fraction"),
                    xi,
                ));
            }
        }
        let c = self.moles.len();
        let moles1 = Array1::from_shape_fn(c, |i| self.moles[i] * x[i]);
        let volume1 = self.volume * x[c];
        let moles2 = &self.moles - &moles1;
        let volume2 = self.volume - volume1;
        Ok((moles1, volume1, moles2, volume2))
    }

    /// ΔA(x) and its gradient,
    /// gᵢ = Nᵢ(μ′ᵢ − μ″ᵢ), g_v = V(p″ − p′); the energy follows from the
    /// gradient through Euler's theorem for the extensive Helmholtz energy.
    fn evaluate(&self, x: &Array1<f64>, gradient: &mut Array1<f64>) -> EosResult<f64> {
        let c = self.moles.len();
        let (moles1, volume1, moles2, volume2) = self.split(x)?;

        let log_activity1 = self.eos.log_activity(&moles1, volume1, self.rt)?;
        let log_activity2 = self.eos.log_activity(&moles2, volume2, self.rt)?;
        let p1 = self.eos.pressure(&moles1, volume1, self.rt)?;
        let p2 = self.eos.pressure(&moles2, volume2, self.rt)?;

        let mut base_terms = 0.0;
        for i in 0..c {
            let chemical1 = (moles1[i] / volume1).ln() + log_activity1[i];
            let chemical2 = (moles2[i] / volume2).ln() + log_activity2[i];
            gradient[i] = self.moles[i] * self.rt * (chemical1 - chemical2);
            base_terms += self.moles[i] * self.rt * (self.log_activity_base[i] - chemical2);
        }
        gradient[c] = self.volume * (p2 - p1);

        Ok(gradient.dot(x) + (self.pressure_base - p2) * self.volume - base_terms)
    }

    /// Largest admissible step from `x` along `direction`, scaled back to
    /// keep the iterate strictly interior.
    fn max_step(&self, x: &Array1<f64>, direction: &Array1<f64>) -> EosResult<f64> {
        let mut alpha = f64::INFINITY;
        for i in 0..x.len() {
            if direction[i] > 0.0 {
                alpha = alpha.min((1.0 - x[i]) / direction[i]);
            } else if direction[i] < 0.0 {
                alpha = alpha.min(-x[i] / direction[i]);
            }
        }
        let db = direction.dot(&self.covolume_normal);
        if db > 0.0 {
            alpha = alpha.min(-x.dot(&self.covolume_normal) / db);
        }
        if !(alpha.is_finite() && alpha > 0.0) {
            return Err(EosError::IterationFailed(String::from(
                "flash step constraint",
            )));
        }
        Ok(STEP_BACKOFF * alpha)
    }
}

/// Geometric contraction of the trial-phase saturation: returns the first
/// `(attempt, scale)` whose energy difference is acceptably negative.
/// Evaluation failures on infeasible scales are skipped; the contraction
/// eventually enters the feasible interior whenever the parent is unstable.
fn contract_scale<F>(mut delta_energy: F) -> EosResult<(usize, f64)>
where
    F: FnMut(f64) -> EosResult<f64>,
{
    let mut scale = INIT_SATURATION;
    for attempt in 0..INIT_STEPS {
        match delta_energy(scale) {
            Ok(value) if value.is_finite() && value < INIT_THRESHOLD => {
                return Ok((attempt, scale));
            }
            _ => {}
        }
        scale *= INIT_SCALE_FACTOR;
    }
    Err(EosError::InitialStateNotFound)
}

/// Initial split vector along the ray defined by an unstable trial-phase
/// concentration.
fn initial_split<E: EquationOfState>(
    objective: &FlashObjective<E>,
    concentration: &Array1<f64>,
) -> EosResult<Array1<f64>> {
    let c = objective.moles.len();
    let mut x = Array1::zeros(c + 1);
    let mut gradient = Array1::zeros(c + 1);
    contract_scale(|scale| {
        for i in 0..c {
            x[i] = concentration[i] * scale * objective.volume / objective.moles[i];
        }
        x[c] = scale;
        objective.evaluate(&x, &mut gradient)
    })?;
    // x holds the accepted state of the last evaluation
    Ok(x)
}

/// Isochoric two-phase flash of the state `(N, V, RT)`.
///
/// Runs the stability analysis first and returns a single-phase result for
/// stable inputs. Otherwise the most unstable trial seeds the initial split,
/// the analytic Hessian at that split preconditions the BFGS method, and the
/// resulting two phases are labeled by their compressibility factors.
pub fn flash<E: EquationOfState>(
    eos: &E,
    moles: &Array1<f64>,
    volume: f64,
    rt: f64,
    options: SolverOptions,
) -> EosResult<FlashResult> {
    validate_state(eos, "flash", moles, volume)?;
    let (max_iter, gtol, verbosity) = options.unwrap_or(DEFAULT_MAX_ITER, DEFAULT_GTOL);

    let stability_result = stability(
        eos,
        moles,
        volume,
        rt,
        SolverOptions {
            verbosity,
            ..SolverOptions::default()
        },
    )?;
    if stability_result.stable {
        log_result!(verbosity, "Flash: the state is stable as a single phase");
        return Ok(FlashResult {
            rt,
            converged: true,
            iterations: 0,
            phases: FlashPhases::Single(EquilibriumPhase {
                moles: moles.clone(),
                volume,
            }),
        });
    }
    let seed = stability_result
        .best_trial()
        .ok_or(EosError::StabilityDiverged)?
        .concentration
        .clone();

    let objective = FlashObjective::new(eos, moles, volume, rt)?;
    let x0 = initial_split(&objective, &seed)?;
    let hessian = flash_hessian(eos, moles, volume, rt, &x0)?;

    let mut method = CholBfgs::new(x0.len());
    method.reset(hessian);
    let result = optimize(
        &mut method,
        |x, gradient| objective.evaluate(x, gradient),
        x0,
        OptimOptions {
            gtol,
            max_iter,
            reset: false,
            verbosity,
        },
        |x, direction| objective.max_step(x, direction),
    )?;

    let (moles1, volume1, moles2, volume2) = objective.split(&result.argument)?;
    let p1 = eos.pressure(&moles1, volume1, rt)?;
    let p2 = eos.pressure(&moles2, volume2, rt)?;
    let z1 = p1 * volume1 / (moles1.sum() * rt);
    let z2 = p2 * volume2 / (moles2.sum() * rt);

    let phase1 = EquilibriumPhase {
        moles: moles1,
        volume: volume1,
    };
    let phase2 = EquilibriumPhase {
        moles: moles2,
        volume: volume2,
    };
    let (gas, liquid) = if z2 > z1 {
        (phase2, phase1)
    } else {
        (phase1, phase2)
    };

    log_result!(
        verbosity,
        "Flash: two-phase split in {} iteration(s), converged: {}",
        result.iterations,
        result.converged
    );
    Ok(FlashResult {
        rt,
        converged: result.converged,
        iterations: result.iterations,
        phases: FlashPhases::Split { gas, liquid },
    })
}

#[cfg(test)]
mod tests {
    use super::super::stability::stability;
    use super::*;
    use crate::cubic::tests::{methane, methane_decane, methane_decane_records};
    use crate::cubic::{Brusilovsky, BrusilovskyParameters};
    use crate::parameter::Parameter;
    use crate::GAS_CONSTANT;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use ndarray::{arr1, Array1, Array2};
    use std::rc::Rc;

    fn split_result(result: &FlashResult) -> (&EquilibriumPhase, &EquilibriumPhase) {
        match &result.phases {
            FlashPhases::Split { gas, liquid } => (gas, liquid),
            FlashPhases::Single(_) => panic!("expected a two-phase result"),
        }
    }

    #[test]
    fn supercritical_methane_stays_single_phase() {
        let eos = methane();
        let moles = arr1(&[1.0]);
        let rt = 250.0 * GAS_CONSTANT;
        let result = flash(&eos, &moles, 0.1, rt, SolverOptions::default()).unwrap();
        assert!(result.converged);
        assert_eq!(result.iterations, 0);
        match &result.phases {
            FlashPhases::Single(phase) => {
                assert_relative_eq!(phase.moles[0], 1.0);
                assert_relative_eq!(phase.volume, 0.1);
            }
            FlashPhases::Split { .. } => panic!("expected a single-phase result"),
        }
    }

    #[test]
    fn methane_decane_splits_into_gas_and_liquid() {
        let eos = methane_decane();
        let moles = arr1(&[0.8, 0.2]);
        let volume = 5.0e-4;
        let rt = 300.0 * GAS_CONSTANT;
        let result = flash(&eos, &moles, volume, rt, SolverOptions::default()).unwrap();
        assert!(result.converged);
        let (gas, liquid) = split_result(&result);

        // conservation of mass and volume
        for i in 0..2 {
            assert_relative_eq!(
                gas.moles[i] + liquid.moles[i],
                moles[i],
                max_relative = 1e-9
            );
        }
        assert_relative_eq!(gas.volume + liquid.volume, volume, max_relative = 1e-9);

        // strictly positive phases
        for phase in [gas, liquid].iter() {
            assert!(phase.volume > 0.0 && phase.volume < volume);
            for &n in phase.moles.iter() {
                assert!(n > 0.0);
            }
        }

        // pressures agree within the gradient tolerance of the optimizer
        let p_gas = eos.pressure(&gas.moles, gas.volume, rt).unwrap();
        let p_liquid = eos.pressure(&liquid.moles, liquid.volume, rt).unwrap();
        assert!((p_gas - p_liquid).abs() <= 1e-3 / volume);

        // the gas label goes to the phase with the higher Z factor
        let z_gas = p_gas * gas.volume / (gas.moles.sum() * rt);
        let z_liquid = p_liquid * liquid.volume / (liquid.moles.sum() * rt);
        assert!(z_gas > z_liquid);

        // the split is not the trivial one
        let vapor_fraction = gas.volume / volume;
        let mole_fraction = gas.moles.sum() / moles.sum();
        assert!((vapor_fraction - mole_fraction).abs() > 1e-3);

        // the liquid holds most of the decane
        assert!(liquid.moles[1] > gas.moles[1]);
    }

    #[test]
    fn stability_and_flash_agree() {
        let eos = methane();
        let moles = arr1(&[1.0]);
        let rt = 250.0 * GAS_CONSTANT;
        let stable = stability(&eos, &moles, 0.1, rt, SolverOptions::default())
            .unwrap()
            .stable;
        let result = flash(&eos, &moles, 0.1, rt, SolverOptions::default()).unwrap();
        assert!(stable);
        assert!(matches!(result.phases, FlashPhases::Single(_)));
    }

    #[test]
    fn flash_is_scale_invariant() {
        let eos = methane_decane();
        let rt = 300.0 * GAS_CONSTANT;
        let small = flash(
            &eos,
            &arr1(&[0.8, 0.2]),
            5.0e-4,
            rt,
            SolverOptions::default(),
        )
        .unwrap();
        let large = flash(
            &eos,
            &arr1(&[1.6, 0.4]),
            1.0e-3,
            rt,
            SolverOptions::default(),
        )
        .unwrap();
        let (gas_small, liquid_small) = split_result(&small);
        let (gas_large, liquid_large) = split_result(&large);
        assert_relative_eq!(gas_large.volume, 2.0 * gas_small.volume, max_relative = 1e-5);
        assert_relative_eq!(
            liquid_large.volume,
            2.0 * liquid_small.volume,
            max_relative = 1e-5
        );
        for i in 0..2 {
            assert_relative_eq!(
                gas_large.moles[i],
                2.0 * gas_small.moles[i],
                max_relative = 1e-5
            );
        }
    }

    #[test]
    fn flash_is_permutation_equivariant() {
        let rt = 300.0 * GAS_CONSTANT;
        let forward = flash(
            &methane_decane(),
            &arr1(&[0.8, 0.2]),
            5.0e-4,
            rt,
            SolverOptions::default(),
        )
        .unwrap();

        let mut records = methane_decane_records();
        records.reverse();
        let parameters =
            BrusilovskyParameters::from_records(records, Array2::default((2, 2))).unwrap();
        let reversed_eos = Brusilovsky::new(Rc::new(parameters));
        let reversed = flash(
            &reversed_eos,
            &arr1(&[0.2, 0.8]),
            5.0e-4,
            rt,
            SolverOptions::default(),
        )
        .unwrap();

        let (gas, liquid) = split_result(&forward);
        let (gas_rev, liquid_rev) = split_result(&reversed);
        assert_relative_eq!(gas.volume, gas_rev.volume, max_relative = 1e-4);
        assert_relative_eq!(liquid.volume, liquid_rev.volume, max_relative = 1e-4);
        for i in 0..2 {
            assert_relative_eq!(
                gas.moles[i],
                gas_rev.moles[1 - i],
                max_relative = 1e-4
            );
        }
    }

    #[test]
    fn converged_phases_are_themselves_stable() {
        let eos = methane_decane();
        let moles = arr1(&[0.8, 0.2]);
        let rt = 300.0 * GAS_CONSTANT;
        // tighten the flash so the residual chemical-potential mismatch stays
        // below the stability threshold
        let options = SolverOptions::new(Some(200), Some(1e-6), Default::default());
        let result = flash(&eos, &moles, 5.0e-4, rt, options).unwrap();
        assert!(result.converged);
        let (gas, liquid) = split_result(&result);
        for phase in [gas, liquid].iter() {
            let phase_stability = stability(
                &eos,
                &phase.moles,
                phase.volume,
                rt,
                SolverOptions::default(),
            )
            .unwrap();
            assert!(phase_stability.stable);
        }
    }

    #[test]
    fn delta_energy_matches_direct_helmholtz_difference() {
        let eos = methane_decane();
        let moles = arr1(&[0.8, 0.2]);
        let volume = 5.0e-4;
        let rt = 300.0 * GAS_CONSTANT;
        let objective = FlashObjective::new(&eos, &moles, volume, rt).unwrap();

        let x = arr1(&[0.3, 0.6, 0.12]);
        let mut gradient = Array1::zeros(3);
        let value = objective.evaluate(&x, &mut gradient).unwrap();

        let (moles1, volume1, moles2, volume2) = objective.split(&x).unwrap();
        let mut direct = eos.residual_helmholtz(&moles1, volume1, rt).unwrap()
            + eos.residual_helmholtz(&moles2, volume2, rt).unwrap()
            - eos.residual_helmholtz(&moles, volume, rt).unwrap();
        for i in 0..2 {
            direct += rt
                * (moles1[i] * (moles1[i] / volume1).ln()
                    + moles2[i] * (moles2[i] / volume2).ln()
                    - moles[i] * (moles[i] / volume).ln());
        }
        assert_abs_diff_eq!(value, direct, epsilon = 1e-8);
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let eos = methane_decane();
        let moles = arr1(&[0.8, 0.2]);
        let volume = 5.0e-4;
        let rt = 300.0 * GAS_CONSTANT;
        let objective = FlashObjective::new(&eos, &moles, volume, rt).unwrap();

        let x = arr1(&[0.3, 0.6, 0.12]);
        let mut gradient = Array1::zeros(3);
        objective.evaluate(&x, &mut gradient).unwrap();

        let mut scratch = Array1::zeros(3);
        for k in 0..3 {
            let h = 1e-6;
            let mut plus = x.clone();
            plus[k] += h;
            let mut minus = x.clone();
            minus[k] -= h;
            let fd = (objective.evaluate(&plus, &mut scratch).unwrap()
                - objective.evaluate(&minus, &mut scratch).unwrap())
                / (2.0 * h);
            assert_relative_eq!(gradient[k], fd, max_relative = 1e-4, epsilon = 1e-2);
        }
    }

    #[test]
    fn hessian_matches_finite_differences() {
        let eos = methane_decane();
        let moles = arr1(&[0.8, 0.2]);
        let volume = 5.0e-4;
        let rt = 300.0 * GAS_CONSTANT;
        let objective = FlashObjective::new(&eos, &moles, volume, rt).unwrap();

        let x = arr1(&[0.3, 0.6, 0.12]);
        let hessian = flash_hessian(&eos, &moles, volume, rt, &x).unwrap();

        let mut grad_plus = Array1::zeros(3);
        let mut grad_minus = Array1::zeros(3);
        for k in 0..3 {
            let h = 1e-7;
            let mut plus = x.clone();
            plus[k] += h;
            let mut minus = x.clone();
            minus[k] -= h;
            objective.evaluate(&plus, &mut grad_plus).unwrap();
            objective.evaluate(&minus, &mut grad_minus).unwrap();
            for i in 0..3 {
                let fd = (grad_plus[i] - grad_minus[i]) / (2.0 * h);
                assert_relative_eq!(hessian[(i, k)], fd, max_relative = 1e-3, epsilon = 1e-2);
            }
        }
    }

    #[test]
    fn contraction_accepts_the_first_negative_scale() {
        // the value turns acceptably negative at the fourth attempt
        let (attempt, scale) = contract_scale(|s| Ok(s - 0.05)).unwrap();
        assert_eq!(attempt, 3);
        assert_relative_eq!(scale, 0.03125);
    }

    #[test]
    fn contraction_skips_failing_scales() {
        let (attempt, _) = contract_scale(|s| {
            if s > 0.2 {
                Err(EosError::InvalidState(
                    String::from("test"),
                    String::from("scale"),
                    s,
                ))
            } else {
                Ok(-1.0)
            }
        })
        .unwrap();
        assert_eq!(attempt, 1);
    }

    #[test]
    fn contraction_exhaustion_is_reported() {
        let result = contract_scale(|_| Ok(1.0));
        assert!(matches!(result, Err(EosError::InitialStateNotFound)));
    }
}
