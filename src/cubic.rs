use crate::equation_of_state::{EquationOfState, PhaseRoot};
use crate::errors::{EosError, EosResult};
use crate::parameter::{Parameter, ParameterError, PureRecord};
use crate::GAS_CONSTANT;
use ndarray::{Array1, Array2};
use roots::Roots;
use serde::{Deserialize, Serialize};
use std::rc::Rc;

/// Brusilovsky parameters for a single substance.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct BrusilovskyRecord {
    /// critical temperature in Kelvin
    tc: f64,
    /// critical pressure in Pascal
    pc: f64,
    /// acentric factor
    acentric_factor: f64,
    /// critical compressibility factor
    critical_compressibility: f64,
    /// generalized critical parameter Ωc
    omega_c: f64,
    /// primary coefficient Ψ of the alpha function
    psi: f64,
}

impl std::fmt::Display for BrusilovskyRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BrusilovskyRecord(tc={} K", self.tc)?;
        write!(f, ", pc={} Pa", self.pc)?;
        write!(f, ", acentric factor={}", self.acentric_factor)?;
        write!(f, ", zc={}", self.critical_compressibility)?;
        write!(f, ", omega_c={}", self.omega_c)?;
        write!(f, ", psi={})", self.psi)
    }
}

/// Temperature-dependent binary interaction, kᵢⱼ(T) = k₀ + k₁T + k₂T².
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default)]
pub struct BrusilovskyBinaryRecord {
    #[serde(default)]
    pub k0: f64,
    #[serde(default)]
    pub k1: f64,
    #[serde(default)]
    pub k2: f64,
}

/// Brusilovsky parameters for one or more substances.
///
/// The four volumetric coefficients of every substance follow from its
/// critical constants through the critical-point identities
/// `ac = Ωc³(RTc)²/pc`, `b = (Zc+Ωc−1)RTc/pc` and
/// `c, d = (−Zc + Ωc(½ ± √(Ωc−¾)))RTc/pc`.
pub struct BrusilovskyParameters {
    /// critical RT (gas constant times critical temperature)
    rtc: Array1<f64>,
    pc: Array1<f64>,
    acentric_factor: Array1<f64>,
    /// attraction coefficient at the critical point
    ac: Array1<f64>,
    b: Array1<f64>,
    c: Array1<f64>,
    d: Array1<f64>,
    psi: Array1<f64>,
    k0: Array2<f64>,
    k1: Array2<f64>,
    k2: Array2<f64>,
    molarweight: Array1<f64>,
}

impl BrusilovskyParameters {
    /// Molar weights in g/mol, in component order.
    pub fn molarweight(&self) -> &Array1<f64> {
        &self.molarweight
    }
}

impl Parameter for BrusilovskyParameters {
    type Pure = BrusilovskyRecord;
    type Binary = BrusilovskyBinaryRecord;

    fn from_records(
        pure_records: Vec<PureRecord<BrusilovskyRecord>>,
        binary_records: Array2<BrusilovskyBinaryRecord>,
    ) -> Result<Self, ParameterError> {
        let n = pure_records.len();
        if n == 0 {
            return Err(ParameterError::IncompatibleParameters(String::from(
                "at least one component is required.",
            )));
        }

        let mut rtc = Array1::zeros(n);
        let mut pc = Array1::zeros(n);
        let mut acentric_factor = Array1::zeros(n);
        let mut ac = Array1::zeros(n);
        let mut b = Array1::zeros(n);
        let mut c = Array1::zeros(n);
        let mut d = Array1::zeros(n);
        let mut psi = Array1::zeros(n);
        let mut molarweight = Array1::zeros(n);

        for (i, record) in pure_records.iter().enumerate() {
            let r = &record.model_record;
            if r.tc <= 0.0 || r.pc <= 0.0 {
                return Err(ParameterError::IncompatibleParameters(format!(
                    "critical constants of {} must be positive.",
                    record.identifier.name
                )));
            }
            if r.omega_c <= 0.75 {
                return Err(ParameterError::IncompatibleParameters(format!(
                    "omega_c = {} of {} is not above 3/4.",
                    r.omega_c, record.identifier.name
                )));
            }
            let zc = r.critical_compressibility;
            if zc + r.omega_c <= 1.0 {
                return Err(ParameterError::IncompatibleParameters(format!(
                    "covolume of {} is not positive.",
                    record.identifier.name
                )));
            }
            rtc[i] = GAS_CONSTANT * r.tc;
            pc[i] = r.pc;
            acentric_factor[i] = r.acentric_factor;
            psi[i] = r.psi;
            molarweight[i] = record.molarweight;

            let vc = rtc[i] / r.pc;
            let ds = (r.omega_c - 0.75).sqrt();
            ac[i] = r.omega_c.powi(3) * rtc[i] * vc;
            b[i] = (zc + r.omega_c - 1.0) * vc;
            c[i] = (-zc + r.omega_c * (0.5 + ds)) * vc;
            d[i] = (-zc + r.omega_c * (0.5 - ds)) * vc;
        }

        let k0 = binary_records.mapv(|br| br.k0);
        let k1 = binary_records.mapv(|br| br.k1);
        let k2 = binary_records.mapv(|br| br.k2);

        Ok(Self {
            rtc,
            pc,
            acentric_factor,
            ac,
            b,
            c,
            d,
            psi,
            k0,
            k1,
            k2,
            molarweight,
        })
    }
}

/// Mixture aggregates of the Brusilovsky EoS at a given composition and RT.
pub struct EosAggregates {
    /// attraction, Σᵢⱼ NᵢNⱼaᵢⱼ(RT)
    pub a: f64,
    /// covolume, Σ Nᵢbᵢ
    pub b: f64,
    pub c: f64,
    pub d: f64,
    /// pair attraction matrix aᵢⱼ(RT)
    pub a_ij: Array2<f64>,
    /// partial attraction, Σⱼ aᵢⱼNⱼ
    pub a_i: Array1<f64>,
}

/// Brusilovsky cubic equation of state,
///
/// p = ΣN·RT/(V−B) − A/((V+C)(V+D)).
pub struct Brusilovsky {
    parameters: Rc<BrusilovskyParameters>,
}

impl Brusilovsky {
    pub fn new(parameters: Rc<BrusilovskyParameters>) -> Self {
        Self { parameters }
    }

    /// Scalar aggregates and the pair attraction matrix at `(N, RT)`.
    pub fn eos_parameters(&self, moles: &Array1<f64>, rt: f64) -> EosAggregates {
        let p = &self.parameters;
        let n = p.b.len();
        let t = rt / GAS_CONSTANT;

        let a_pure = Array1::from_shape_fn(n, |i| {
            let alpha = 1.0 + p.psi[i] * (1.0 - (rt / p.rtc[i]).sqrt());
            p.ac[i] * alpha * alpha
        });
        let a_ij = Array2::from_shape_fn((n, n), |(i, j)| {
            let k = p.k0[(i, j)] + (p.k1[(i, j)] + p.k2[(i, j)] * t) * t;
            (1.0 - k) * (a_pure[i] * a_pure[j]).sqrt()
        });
        let a_i = a_ij.dot(moles);
        let a = a_i.dot(moles);

        EosAggregates {
            a,
            b: moles.dot(&p.b),
            c: moles.dot(&p.c),
            d: moles.dot(&p.d),
            a_ij,
            a_i,
        }
    }

    /// Residual Helmholtz energy at `(N, V, RT)`,
    ///
    /// A_res = −ΣN·RT·ln(1−B/V) + A/(C−D)·ln((V+D)/(V+C)).
    pub fn residual_helmholtz(&self, moles: &Array1<f64>, volume: f64, rt: f64) -> EosResult<f64> {
        let agg = self.eos_parameters(moles, rt);
        feasible("residual_helmholtz", &agg, volume)?;
        let repulsion = -moles.sum() * rt * (1.0 - agg.b / volume).ln();
        let attraction =
            agg.a / (agg.c - agg.d) * ((volume + agg.d) / (volume + agg.c)).ln();
        Ok(repulsion + attraction)
    }
}

fn feasible(operation: &str, agg: &EosAggregates, volume: f64) -> EosResult<()> {
    if !(volume > agg.b) || !(volume + agg.c > 0.0) || !(volume + agg.d > 0.0) {
        return Err(EosError::InvalidState(
            operation.into(),
            String::from("volume"),
            volume,
        ));
    }
    Ok(())
}

impl EquationOfState for Brusilovsky {
    fn components(&self) -> usize {
        self.parameters.b.len()
    }

    fn covolumes(&self) -> &Array1<f64> {
        &self.parameters.b
    }

    fn pressure(&self, moles: &Array1<f64>, volume: f64, rt: f64) -> EosResult<f64> {
        let agg = self.eos_parameters(moles, rt);
        feasible("pressure", &agg, volume)?;
        Ok(moles.sum() * rt / (volume - agg.b)
            - agg.a / ((volume + agg.c) * (volume + agg.d)))
    }

    fn log_activity(&self, moles: &Array1<f64>, volume: f64, rt: f64) -> EosResult<Array1<f64>> {
        let agg = self.eos_parameters(moles, rt);
        feasible("log_activity", &agg, volume)?;
        let p = &self.parameters;
        let total = moles.sum();
        let vb = volume - agg.b;
        let e = agg.c - agg.d;
        let l = ((volume + agg.d) / (volume + agg.c)).ln();
        let log_vb = (1.0 - agg.b / volume).ln();

        Ok(Array1::from_shape_fn(moles.len(), |i| {
            let e_i = p.c[i] - p.d[i];
            let g_i = p.d[i] / (volume + agg.d) - p.c[i] / (volume + agg.c);
            -log_vb
                + total * p.b[i] / vb
                + ((2.0 * agg.a_i[i] - agg.a * e_i / e) * l / e + agg.a * g_i / e) / rt
        }))
    }

    fn log_activity_with_jacobian(
        &self,
        moles: &Array1<f64>,
        volume: f64,
        rt: f64,
    ) -> EosResult<(Array1<f64>, Array2<f64>)> {
        let log_activity = self.log_activity(moles, volume, rt)?;
        let agg = self.eos_parameters(moles, rt);
        let p = &self.parameters;
        let total = moles.sum();
        let vb = volume - agg.b;
        let e = agg.c - agg.d;
        let l = ((volume + agg.d) / (volume + agg.c)).ln();
        let vc2 = (volume + agg.c) * (volume + agg.c);
        let vd2 = (volume + agg.d) * (volume + agg.d);

        let jacobian = Array2::from_shape_fn((moles.len(), moles.len()), |(i, j)| {
            let e_i = p.c[i] - p.d[i];
            let e_j = p.c[j] - p.d[j];
            let g_i = p.d[i] / (volume + agg.d) - p.c[i] / (volume + agg.c);
            let g_j = p.d[j] / (volume + agg.d) - p.c[j] / (volume + agg.c);
            let h_ij = p.c[i] * p.c[j] / vc2 - p.d[i] * p.d[j] / vd2;
            let attraction = (2.0 * agg.a_ij[(i, j)] - 2.0 * agg.a_i[j] * e_i / e
                + agg.a * e_i * e_j / (e * e))
                * l
                / e
                + (2.0 * agg.a_i[i] - agg.a * e_i / e) * (g_j / e - l * e_j / (e * e))
                + (2.0 * agg.a_i[j] / e - agg.a * e_j / (e * e)) * g_i
                + agg.a / e * h_ij;
            (p.b[i] + p.b[j]) / vb + total * p.b[i] * p.b[j] / (vb * vb) + attraction / rt
        });
        Ok((log_activity, jacobian))
    }

    fn pressure_gradient(
        &self,
        moles: &Array1<f64>,
        volume: f64,
        rt: f64,
    ) -> EosResult<(Array1<f64>, f64)> {
        let agg = self.eos_parameters(moles, rt);
        feasible("pressure_gradient", &agg, volume)?;
        let p = &self.parameters;
        let total = moles.sum();
        let vb = volume - agg.b;
        let w = (volume + agg.c) * (volume + agg.d);

        let dp_dn = Array1::from_shape_fn(moles.len(), |i| {
            let dw_i = p.c[i] * (volume + agg.d) + p.d[i] * (volume + agg.c);
            rt / vb + total * rt * p.b[i] / (vb * vb) - 2.0 * agg.a_i[i] / w
                + agg.a * dw_i / (w * w)
        });
        let dp_dv =
            -total * rt / (vb * vb) + agg.a * (2.0 * volume + agg.c + agg.d) / (w * w);
        Ok((dp_dn, dp_dv))
    }

    fn compressibility(
        &self,
        moles: &Array1<f64>,
        pressure: f64,
        rt: f64,
        root: PhaseRoot,
    ) -> EosResult<f64> {
        if !(pressure > 0.0) {
            return Err(EosError::InvalidState(
                String::from("compressibility"),
                String::from("pressure"),
                pressure,
            ));
        }
        let agg = self.eos_parameters(moles, rt);
        let srt = moles.sum() * rt;
        let b = agg.b * pressure / srt;
        let c = agg.c * pressure / srt;
        let d = agg.d * pressure / srt;
        let a = agg.a * pressure / (srt * srt);

        // (Z−b)(Z+c)(Z+d) − (Z+c)(Z+d) + a(Z−b) = 0
        let a2 = c + d - b - 1.0;
        let a1 = a + c * d - (b + 1.0) * (c + d);
        let a0 = -(b * c * d + c * d + a * b);

        let found = roots::find_roots_cubic(1.0, a2, a1, a0);
        let candidates: &[f64] = match &found {
            Roots::No(r) => &r[..],
            Roots::One(r) => &r[..],
            Roots::Two(r) => &r[..],
            Roots::Three(r) => &r[..],
            Roots::Four(r) => &r[..],
        };

        let mut selected: Option<f64> = None;
        for &z in candidates.iter().filter(|&&z| z > b) {
            selected = Some(match (selected, root) {
                (None, _) => z,
                (Some(best), PhaseRoot::Gas) => best.max(z),
                (Some(best), PhaseRoot::Liquid) => best.min(z),
            });
        }
        selected.ok_or_else(|| {
            EosError::UndeterminedState(format!(
                "compressibility has no root above the covolume at p = {}",
                pressure
            ))
        })
    }

    fn wilson_saturation_pressure(&self, rt: f64) -> Array1<f64> {
        let p = &self.parameters;
        Array1::from_shape_fn(p.pc.len(), |i| {
            p.pc[i]
                * (5.373 * (1.0 + p.acentric_factor[i]) * (1.0 - p.rtc[i] / rt)).exp()
        })
    }
}
