use crate::base::{FsiError, SystemMatrix};
use crate::StrError;
use russell_lab::{vec_copy, vec_inner, vec_norm, vec_update, Norm, Vector};
use std::mem;

/// Holds the outcome of an iterative solve
#[derive(Clone, Copy, Debug)]
pub struct SolveReport {
    /// Number of iterations
    pub iterations: usize,

    /// Final residual norm
    pub residual: f64,
}

/// Defines the action of a preconditioner `z = M⁻¹ r`
pub trait Preconditioner {
    fn apply(&self, z: &mut Vector, r: &Vector) -> Result<(), FsiError>;
}

/// Implements the identity preconditioner (no preconditioning)
pub struct Identity;

impl Preconditioner for Identity {
    fn apply(&self, z: &mut Vector, r: &Vector) -> Result<(), FsiError> {
        vec_copy(z, r)?;
        Ok(())
    }
}

/// Implements the diagonal (Jacobi) preconditioner
pub struct Jacobi {
    inv_diag: Vector,
}

impl Jacobi {
    /// Allocates a new instance from the diagonal of a matrix
    pub fn new(diagonal: &[f64]) -> Result<Self, StrError> {
        if diagonal.iter().any(|d| *d <= 0.0) {
            return Err("Jacobi preconditioner requires a positive diagonal");
        }
        Ok(Jacobi {
            inv_diag: Vector::from(&diagonal.iter().map(|d| 1.0 / d).collect::<Vec<_>>()),
        })
    }
}

impl Preconditioner for Jacobi {
    fn apply(&self, z: &mut Vector, r: &Vector) -> Result<(), FsiError> {
        for i in 0..z.dim() {
            z[i] = self.inv_diag[i] * r[i];
        }
        Ok(())
    }
}

/// Implements the block-diagonal preconditioner of a velocity-pressure system
///
/// ```text
/// M = ┌ Dᵥ  0  ┐
///     └ 0   Mₚ ┘
/// ```
///
/// `Dᵥ` is the diagonal of the velocity preconditioner block and `Mₚ` is the
/// pressure mass matrix scaled by 1/ν, inverted by an inner Jacobi-preconditioned CG.
pub struct BlockDiagonal<'a> {
    n_vector: usize,
    velocity: Jacobi,
    pressure: &'a SystemMatrix,
    pressure_jacobi: Jacobi,
    inner_tolerance: f64,
}

impl<'a> BlockDiagonal<'a> {
    /// Allocates a new instance
    ///
    /// * `velocity_diagonal` -- diagonal of the velocity block
    /// * `pressure` -- the compressed pressure mass matrix
    /// * `n_equation` -- dimension of the whole system
    pub fn new(
        velocity_diagonal: &[f64],
        pressure: &'a SystemMatrix,
        n_equation: usize,
        inner_tolerance: f64,
    ) -> Result<Self, StrError> {
        let n_vector = velocity_diagonal.len();
        if n_equation != n_vector + pressure.dim() {
            return Err("block dimensions are inconsistent with the system dimension");
        }
        Ok(BlockDiagonal {
            n_vector,
            velocity: Jacobi::new(velocity_diagonal)?,
            pressure,
            pressure_jacobi: Jacobi::new(pressure.diagonal().as_data())?,
            inner_tolerance,
        })
    }
}

impl<'a> Preconditioner for BlockDiagonal<'a> {
    fn apply(&self, z: &mut Vector, r: &Vector) -> Result<(), FsiError> {
        let nv = self.n_vector;
        let np = self.pressure.dim();
        for i in 0..nv {
            z[i] = self.velocity.inv_diag[i] * r[i];
        }
        let rp = Vector::from(&r.as_data()[nv..(nv + np)].to_vec());
        let mut zp = Vector::new(np);
        conjugate_gradient(
            self.pressure,
            &mut zp,
            &rp,
            &self.pressure_jacobi,
            self.inner_tolerance,
            2 * np,
        )?;
        z.as_mut_data()[nv..(nv + np)].copy_from_slice(zp.as_data());
        Ok(())
    }
}

/// Solves a symmetric positive-definite system with the (preconditioned) conjugate gradient method
///
/// Starts from zero and stops when `‖r‖ ≤ tolerance · ‖b‖`.
pub fn conjugate_gradient(
    aa: &SystemMatrix,
    x: &mut Vector,
    b: &Vector,
    precond: &dyn Preconditioner,
    tolerance: f64,
    max_iterations: usize,
) -> Result<SolveReport, FsiError> {
    let n = b.dim();
    x.fill(0.0);
    let norm_b = vec_norm(b, Norm::Euc);
    if norm_b == 0.0 {
        return Ok(SolveReport {
            iterations: 0,
            residual: 0.0,
        });
    }
    let tol = tolerance * norm_b;
    let mut r = b.clone();
    let mut z = Vector::new(n);
    let mut q = Vector::new(n);
    precond.apply(&mut z, &r)?;
    let mut p = z.clone();
    let mut rz = vec_inner(&r, &z);
    let mut residual = norm_b;
    for it in 0..max_iterations {
        aa.mat_vec_mul(&mut q, 1.0, &p).map_err(FsiError::numerical)?;
        let pq = vec_inner(&p, &q);
        if pq <= 0.0 {
            return Err(FsiError::Convergence {
                solver: "CG",
                iterations: it,
                residual,
            });
        }
        let alpha = rz / pq;
        vec_update(x, alpha, &p)?;
        vec_update(&mut r, -alpha, &q)?;
        residual = vec_norm(&r, Norm::Euc);
        log::trace!("CG iter {}: residual = {:.6e}", it + 1, residual);
        if residual <= tol {
            return Ok(SolveReport {
                iterations: it + 1,
                residual,
            });
        }
        precond.apply(&mut z, &r)?;
        let rz_new = vec_inner(&r, &z);
        let beta = rz_new / rz;
        rz = rz_new;
        for i in 0..n {
            p[i] = z[i] + beta * p[i];
        }
    }
    Err(FsiError::Convergence {
        solver: "CG",
        iterations: max_iterations,
        residual,
    })
}

/// Solves a symmetric (indefinite) system with the preconditioned minimum residual method
///
/// The preconditioner must be symmetric positive-definite. Starts from zero
/// and stops when the true residual satisfies `‖b - A x‖ ≤ tolerance · ‖b‖`.
///
/// Reference: Elman, Silvester, Wathen (2014) Finite Elements and Fast
/// Iterative Solvers, Algorithm 2.4
pub fn minres(
    aa: &SystemMatrix,
    x: &mut Vector,
    b: &Vector,
    precond: &dyn Preconditioner,
    tolerance: f64,
    max_iterations: usize,
) -> Result<SolveReport, FsiError> {
    let n = b.dim();
    x.fill(0.0);
    let norm_b = vec_norm(b, Norm::Euc);
    if norm_b == 0.0 {
        return Ok(SolveReport {
            iterations: 0,
            residual: 0.0,
        });
    }
    let tol = tolerance * norm_b;
    let not_spd = |iterations, residual| FsiError::Convergence {
        solver: "MINRES (preconditioner is not SPD)",
        iterations,
        residual,
    };

    // Lanczos vectors
    let mut v_old = Vector::new(n);
    let mut v = b.clone();
    let mut v_new = Vector::new(n);
    let mut z = Vector::new(n);
    let mut z_new = Vector::new(n);
    precond.apply(&mut z, &v)?;
    let zv = vec_inner(&z, &v);
    if zv <= 0.0 {
        return Err(not_spd(0, norm_b));
    }
    let mut gamma_old = 1.0;
    let mut gamma = f64::sqrt(zv);

    // Givens rotations and search directions
    let mut eta = gamma;
    let (mut s_old, mut s) = (0.0, 0.0);
    let (mut c_old, mut c) = (1.0, 1.0);
    let mut w_old = Vector::new(n);
    let mut w = Vector::new(n);
    let mut w_new = Vector::new(n);

    // auxiliary
    let mut az = Vector::new(n);
    let mut ax = Vector::new(n);
    let mut residual = norm_b;

    for it in 1..=max_iterations {
        for i in 0..n {
            z[i] /= gamma;
        }
        aa.mat_vec_mul(&mut az, 1.0, &z).map_err(FsiError::numerical)?;
        let delta = vec_inner(&az, &z);
        for i in 0..n {
            v_new[i] = az[i] - (delta / gamma) * v[i] - (gamma / gamma_old) * v_old[i];
        }
        precond.apply(&mut z_new, &v_new)?;
        let zv = vec_inner(&z_new, &v_new);
        if zv < 0.0 {
            return Err(not_spd(it, residual));
        }
        let gamma_new = f64::sqrt(zv);

        let a0 = c * delta - c_old * s * gamma;
        let a1 = f64::sqrt(a0 * a0 + gamma_new * gamma_new);
        let a2 = s * delta + c_old * c * gamma;
        let a3 = s_old * gamma;
        if a1 == 0.0 {
            return Err(FsiError::Convergence {
                solver: "MINRES (breakdown)",
                iterations: it,
                residual,
            });
        }
        let c_new = a0 / a1;
        let s_new = gamma_new / a1;
        for i in 0..n {
            w_new[i] = (z[i] - a3 * w_old[i] - a2 * w[i]) / a1;
        }
        vec_update(x, c_new * eta, &w_new)?;
        eta = -s_new * eta;

        // true residual
        aa.mat_vec_mul(&mut ax, 1.0, x).map_err(FsiError::numerical)?;
        residual = f64::sqrt((0..n).map(|i| (b[i] - ax[i]) * (b[i] - ax[i])).sum());
        log::trace!("MINRES iter {}: residual = {:.6e}", it, residual);
        if residual <= tol {
            return Ok(SolveReport {
                iterations: it,
                residual,
            });
        }
        if gamma_new == 0.0 {
            return Err(FsiError::Convergence {
                solver: "MINRES (breakdown)",
                iterations: it,
                residual,
            });
        }

        // shift
        mem::swap(&mut v_old, &mut v);
        mem::swap(&mut v, &mut v_new);
        mem::swap(&mut z, &mut z_new);
        mem::swap(&mut w_old, &mut w);
        mem::swap(&mut w, &mut w_new);
        gamma_old = gamma;
        gamma = gamma_new;
        c_old = c;
        c = c_new;
        s_old = s;
        s = s_new;
    }
    Err(FsiError::Convergence {
        solver: "MINRES",
        iterations: max_iterations,
        residual,
    })
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::{conjugate_gradient, minres, BlockDiagonal, Identity, Jacobi};
    use crate::base::{SerialComm, SystemMatrix};
    use russell_lab::{array_approx_eq, Vector};

    fn matrix(entries: &[(usize, usize, f64)], dim: usize) -> SystemMatrix {
        let mut aa = SystemMatrix::new(dim);
        for (i, j, v) in entries {
            aa.put(*i, *j, *v);
        }
        aa.compress(&SerialComm, &vec![false; dim]).unwrap();
        aa
    }

    #[test]
    fn jacobi_captures_errors() {
        assert_eq!(
            Jacobi::new(&[1.0, 0.0]).err(),
            Some("Jacobi preconditioner requires a positive diagonal")
        );
    }

    #[test]
    fn conjugate_gradient_works() {
        #[rustfmt::skip]
        let aa = matrix(&[
            (0, 0, 4.0), (0, 1, 1.0),
            (1, 0, 1.0), (1, 1, 3.0), (1, 2, 1.0),
            (2, 1, 1.0), (2, 2, 2.0),
        ], 3);
        let b = Vector::from(&[1.0, 2.0, 3.0]);
        let mut x = Vector::new(3);
        let report = conjugate_gradient(&aa, &mut x, &b, &Identity, 1e-12, 6).unwrap();
        assert!(report.iterations <= 6);
        let mut ax = Vector::new(3);
        aa.mat_vec_mul(&mut ax, 1.0, &x).unwrap();
        array_approx_eq(ax.as_data(), b.as_data(), 1e-10);

        let jacobi = Jacobi::new(aa.diagonal().as_data()).unwrap();
        conjugate_gradient(&aa, &mut x, &b, &jacobi, 1e-12, 6).unwrap();
        aa.mat_vec_mul(&mut ax, 1.0, &x).unwrap();
        array_approx_eq(ax.as_data(), b.as_data(), 1e-10);
    }

    #[test]
    fn conjugate_gradient_reports_failure() {
        let aa = matrix(&[(0, 0, 4.0), (0, 1, 1.0), (1, 0, 1.0), (1, 1, 3.0)], 2);
        let b = Vector::from(&[1.0, 2.0]);
        let mut x = Vector::new(2);
        let err = conjugate_gradient(&aa, &mut x, &b, &Identity, 1e-12, 1).unwrap_err();
        assert!(err.is_convergence());
    }

    #[test]
    fn zero_rhs_gives_zero_solution() {
        let aa = matrix(&[(0, 0, 1.0)], 1);
        let b = Vector::new(1);
        let mut x = Vector::from(&[3.0]);
        let report = minres(&aa, &mut x, &b, &Identity, 1e-11, 1).unwrap();
        assert_eq!(report.iterations, 0);
        assert_eq!(x.as_data(), &[0.0]);
    }

    #[test]
    fn minres_solves_saddle_point_system() {
        // 2x + z = 1, 2y + z = 2, x + y = 3
        #[rustfmt::skip]
        let aa = matrix(&[
            (0, 0, 2.0), (0, 2, 1.0),
            (1, 1, 2.0), (1, 2, 1.0),
            (2, 0, 1.0), (2, 1, 1.0),
        ], 3);
        let b = Vector::from(&[1.0, 2.0, 3.0]);
        let mut x = Vector::new(3);
        minres(&aa, &mut x, &b, &Identity, 1e-11, 10).unwrap();
        array_approx_eq(x.as_data(), &[1.25, 1.75, -1.5], 1e-10);

        let mp = matrix(&[(0, 0, 1.0)], 1);
        let precond = BlockDiagonal::new(&aa.diagonal().as_data()[0..2], &mp, 3, 1e-11).unwrap();
        let report = minres(&aa, &mut x, &b, &precond, 1e-11, 10).unwrap();
        assert!(report.residual <= 1e-11 * f64::sqrt(14.0));
        array_approx_eq(x.as_data(), &[1.25, 1.75, -1.5], 1e-10);
    }

    #[test]
    fn block_diagonal_captures_errors() {
        let aa = matrix(&[(0, 0, 2.0), (1, 1, 2.0)], 2);
        let mp = matrix(&[(0, 0, 1.0)], 1);
        assert_eq!(
            BlockDiagonal::new(aa.diagonal().as_data(), &mp, 2, 1e-11).err(),
            Some("block dimensions are inconsistent with the system dimension")
        );
    }
}
