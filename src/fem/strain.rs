use crate::StrError;
use gemlab::shapes::Scratchpad;
use russell_lab::{Matrix, Vector};
use russell_tensor::Tensor2;

/// Calculates the gradient of a vector field at an integration point
///
/// Computes `G[i][j] = ∂uᵢ/∂xⱼ` with `uᵢ = Σₘ Nᵐ U[l2g[i + ndim m]]`
/// and returns the determinant of the Jacobian.
///
/// # Input
///
/// * `uu` -- The global vector holding the field
/// * `l2g` -- The local to global map (vector components first)
/// * `ksi` -- The coordinate of the integration point (ξᵖ)
/// * `pad` -- Scratchpad to calculate interpolation functions
pub fn calculate_field_gradient(
    grad: &mut Matrix,
    uu: &Vector,
    l2g: &[usize],
    ksi: &[f64],
    pad: &mut Scratchpad,
) -> Result<f64, StrError> {
    let ndim = grad.nrow();
    let nnode = pad.kind.nnode();
    let det_jac = pad.calc_gradient(ksi)?;
    let gg = &pad.gradient;
    grad.fill(0.0);
    for m in 0..nnode {
        for i in 0..ndim {
            let u = uu[l2g[i + ndim * m]];
            for j in 0..ndim {
                grad.add(i, j, u * gg.get(m, j));
            }
        }
    }
    Ok(det_jac)
}

/// Calculates the small strain tensor ε = sym(∇u) from the global displacement vector
///
/// Returns the determinant of the Jacobian.
#[rustfmt::skip]
pub fn calculate_strain(
    eps: &mut Tensor2,
    uu: &Vector,
    l2g: &[usize],
    ksi: &[f64],
    pad: &mut Scratchpad,
) -> Result<f64, StrError> {
    let nnode = pad.kind.nnode();
    let det_jac = pad.calc_gradient(ksi)?;
    let gg = &pad.gradient;
    eps.clear();
    if gg.ncol() == 2 {
        for m in 0..nnode {
            eps.sym_add(0, 0, 1.0,  uu[l2g[0+2*m]] * gg.get(m,0));
            eps.sym_add(1, 1, 1.0,  uu[l2g[1+2*m]] * gg.get(m,1));
            eps.sym_add(0, 1, 1.0, (uu[l2g[0+2*m]] * gg.get(m,1) + uu[l2g[1+2*m]] * gg.get(m,0))/2.0);
        }
    } else {
        for m in 0..nnode {
            eps.sym_add(0, 0, 1.0,  uu[l2g[0+3*m]] * gg.get(m,0));
            eps.sym_add(1, 1, 1.0,  uu[l2g[1+3*m]] * gg.get(m,1));
            eps.sym_add(2, 2, 1.0,  uu[l2g[2+3*m]] * gg.get(m,2));
            eps.sym_add(0, 1, 1.0, (uu[l2g[0+3*m]] * gg.get(m,1) + uu[l2g[1+3*m]] * gg.get(m,0))/2.0);
            eps.sym_add(1, 2, 1.0, (uu[l2g[1+3*m]] * gg.get(m,2) + uu[l2g[2+3*m]] * gg.get(m,1))/2.0);
            eps.sym_add(0, 2, 1.0, (uu[l2g[0+3*m]] * gg.get(m,2) + uu[l2g[2+3*m]] * gg.get(m,0))/2.0);
        }
    }
    Ok(det_jac)
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
