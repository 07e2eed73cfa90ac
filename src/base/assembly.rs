use super::SystemMatrix;
use russell_lab::{Matrix, Vector};

/// Assembles local vector into global vector
///
/// # Output
///
/// * `rr_global` -- is the global vector R with length = `n_equation`
///
/// # Input
///
/// * `r_local` -- is the local vector r with length = `n_equation_local`
/// * `local_to_global` -- is an array holding all equation numbers
/// * `prescribed` -- tells whether a global equation number has prescribed
///   DOF or not. Its length is equal to the total number of DOFs `n_equation`.
///
/// # Panics
///
/// This function will panic if the indices are out-of-bounds
#[inline]
pub fn assemble_vector(rr_global: &mut Vector, r_local: &Vector, local_to_global: &[usize], prescribed: &[bool]) {
    let n_equation_local = r_local.dim();
    for l in 0..n_equation_local {
        let g = local_to_global[l];
        if !prescribed[g] {
            rr_global[g] += r_local[l];
        }
    }
}

/// Assembles local matrix into global matrix
///
/// The rows and columns of prescribed equations are skipped; the
/// corresponding unit diagonal is added by [SystemMatrix::compress].
///
/// # Output
///
/// * `kk_global` -- is the global square matrix K with dims = (`n_equation`,`n_equation`)
///
/// # Input
///
/// * `kk_local` -- is the local square matrix K with dims = (`n_equation_local`,`n_equation_local`)
/// * `alpha` -- scales the local matrix
/// * `local_to_global` -- is an array holding all equation numbers
/// * `prescribed` -- tells whether a global equation number has prescribed DOF or not
///
/// # Panics
///
/// This function will panic if the indices are out-of-bounds
#[inline]
pub fn assemble_matrix(
    kk_global: &mut SystemMatrix,
    alpha: f64,
    kk_local: &Matrix,
    local_to_global: &[usize],
    prescribed: &[bool],
) {
    let n_equation_local = kk_local.nrow();
    for l in 0..n_equation_local {
        let g = local_to_global[l];
        if !prescribed[g] {
            for ll in 0..n_equation_local {
                let gg = local_to_global[ll];
                if !prescribed[gg] {
                    kk_global.put(g, gg, alpha * kk_local.get(l, ll));
                }
            }
        }
    }
}

/// Moves the prescribed values of a cell to the right-hand side
///
/// Computes `r_local[l] -= Σ K[l][ll] · value[gg]` for all free rows `l` and
/// prescribed columns `ll`, with `gg = local_to_global[ll]`.
#[inline]
pub fn apply_lifting(
    r_local: &mut Vector,
    kk_local: &Matrix,
    local_to_global: &[usize],
    prescribed: &[bool],
    values: &Vector,
) {
    let n_equation_local = kk_local.nrow();
    for l in 0..n_equation_local {
        if prescribed[local_to_global[l]] {
            continue;
        }
        for ll in 0..n_equation_local {
            let gg = local_to_global[ll];
            if prescribed[gg] && values[gg] != 0.0 {
                r_local[l] -= kk_local.get(l, ll) * values[gg];
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
