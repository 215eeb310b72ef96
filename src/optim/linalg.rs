use ndarray::{Array1, Array2};

/// Lower-triangular Cholesky factor of a symmetric matrix, or `None` if a
/// pivot is not strictly positive.
pub(crate) fn cholesky(a: &Array2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    let mut l = Array2::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[(i, j)];
            for k in 0..j {
                sum -= l[(i, k)] * l[(j, k)];
            }
            if i == j {
                if !(sum > 0.0) {
                    return None;
                }
                l[(i, i)] = sum.sqrt();
            } else {
                l[(i, j)] = sum / l[(j, j)];
            }
        }
    }
    Some(l)
}

/// Solves `L Lᵀ x = b` given the lower Cholesky factor.
pub(crate) fn solve_cholesky(l: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    let n = b.len();
    let mut y = Array1::zeros(n);
    for i in 0..n {
        let mut sum = b[i];
        for k in 0..i {
            sum -= l[(i, k)] * y[k];
        }
        y[i] = sum / l[(i, i)];
    }
    let mut x = Array1::zeros(n);
    for i in (0..n).rev() {
        let mut sum = y[i];
        for k in i + 1..n {
            sum -= l[(k, i)] * x[k];
        }
        x[i] = sum / l[(i, i)];
    }
    x
}

/// Cholesky factor of `a + τI` with τ grown geometrically until all pivots
/// are strictly positive. Keeps quasi-Newton directions downhill when the
/// Hessian approximation turns indefinite.
pub(crate) fn cholesky_modified(a: &Array2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    let scale = (0..n)
        .map(|i| a[(i, i)].abs())
        .fold(0.0f64, f64::max)
        .max(1.0);
    let min_diag = (0..n).map(|i| a[(i, i)]).fold(f64::INFINITY, f64::min);
    let beta = 1e-8 * scale;
    let mut tau = if min_diag > 0.0 { 0.0 } else { beta - min_diag };

    for _ in 0..64 {
        let shifted = if tau == 0.0 {
            a.clone()
        } else {
            let mut shifted = a.clone();
            for i in 0..n {
                shifted[(i, i)] += tau;
            }
            shifted
        };
        if let Some(l) = cholesky(&shifted) {
            return Some(l);
        }
        tau = (2.0 * tau).max(beta);
    }
    None
}
