use crate::equation_of_state::EquationOfState;
use crate::errors::EosResult;
use ndarray::{Array1, Array2};

/// Exact Hessian of the two-phase Helmholtz difference at the split vector
/// `x = (N′₁/N₁, …, N′_c/N_c, V′/V)`.
///
/// With `J = ∂lnγᵢ/∂Nⱼ` evaluated at both phases, the blocks are
///
/// * top-left: `RT·NᵢNⱼ(J′ᵢⱼ + J″ᵢⱼ)`, plus the ideal-mixing part
///   `RT·Nᵢ²(1/N′ᵢ + 1/N″ᵢ)` on the diagonal,
/// * cross column: `−V·Nᵢ(∂p/∂Nᵢ|′ + ∂p/∂Nᵢ|″)`,
/// * bottom-right: `−V²(∂p/∂V|′ + ∂p/∂V|″)`.
///
/// The result is symmetric by construction. Preloading it into the BFGS
/// method admits near-Newton steps from the first iteration, which matters
/// close to phase boundaries where the curvature of the surface varies over
/// orders of magnitude.
pub fn flash_hessian<E: EquationOfState>(
    eos: &E,
    moles: &Array1<f64>,
    volume: f64,
    rt: f64,
    x: &Array1<f64>,
) -> EosResult<Array2<f64>> {
    let c = moles.len();
    let moles1 = Array1::from_shape_fn(c, |i| moles[i] * x[i]);
    let volume1 = volume * x[c];
    let moles2 = moles - &moles1;
    let volume2 = volume - volume1;

    let (_, jacobian1) = eos.log_activity_with_jacobian(&moles1, volume1, rt)?;
    let (_, jacobian2) = eos.log_activity_with_jacobian(&moles2, volume2, rt)?;
    let (dp_dn1, dp_dv1) = eos.pressure_gradient(&moles1, volume1, rt)?;
    let (dp_dn2, dp_dv2) = eos.pressure_gradient(&moles2, volume2, rt)?;

    let mut hessian = Array2::zeros((c + 1, c + 1));
    for i in 0..c {
        for j in 0..c {
            hessian[(i, j)] =
                rt * moles[i] * moles[j] * (jacobian1[(i, j)] + jacobian2[(i, j)]);
        }
        hessian[(i, i)] += rt * moles[i] * moles[i] * (1.0 / moles1[i] + 1.0 / moles2[i]);
        let cross = -volume * moles[i] * (dp_dn1[i] + dp_dn2[i]);
        hessian[(i, c)] = cross;
        hessian[(c, i)] = cross;
    }
    hessian[(c, c)] = -volume * volume * (dp_dv1 + dp_dv2);
    Ok(hessian)
}
