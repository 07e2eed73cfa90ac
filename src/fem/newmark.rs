use crate::StrError;
use russell_lab::Vector;

/// Holds the coefficients of the Newmark α-method
///
/// ```text
/// α = -damping
/// γ = 1/2 - α
/// β = (1 - α)² / 4
/// ```
///
/// With zero damping the method reduces to the average acceleration rule
/// (β = 1/4, γ = 1/2).
#[derive(Clone, Copy, Debug)]
pub struct Newmark {
    /// Damping control α (≤ 0)
    pub alpha: f64,

    /// Newmark β
    pub beta: f64,

    /// Newmark γ
    pub gamma: f64,
}

impl Newmark {
    /// Allocates a new instance
    pub fn new(damping: f64) -> Result<Self, StrError> {
        if damping < 0.0 || damping >= 1.0 {
            return Err("Newmark method requires 0 ≤ damping < 1");
        }
        let alpha = -damping;
        Ok(Newmark {
            alpha,
            beta: (1.0 - alpha) * (1.0 - alpha) / 4.0,
            gamma: 0.5 - alpha,
        })
    }

    /// Returns the factor multiplying the stiffness in the effective matrix: Δt²β(1+α)
    pub fn stiffness_factor(&self, dt: f64) -> f64 {
        dt * dt * self.beta * (1.0 + self.alpha)
    }

    /// Returns the factor multiplying the damping matrix in the effective matrix: γΔt
    pub fn damping_factor(&self, dt: f64) -> f64 {
        self.gamma * dt
    }

    /// Computes the predicted displacement `dₙ + Δt(1+α)vₙ + (0.5-β)Δt²(1+α)aₙ`
    pub fn predictor(&self, pred: &mut Vector, dt: f64, d: &Vector, v: &Vector, a: &Vector) {
        let c1 = dt * (1.0 + self.alpha);
        let c2 = (0.5 - self.beta) * dt * dt * (1.0 + self.alpha);
        for i in 0..pred.dim() {
            pred[i] = d[i] + c1 * v[i] + c2 * a[i];
        }
    }

    /// Updates velocity and displacement given the new acceleration
    ///
    /// ```text
    /// vₙ₊₁ = vₙ + Δt(1-γ)aₙ + Δtγaₙ₊₁
    /// dₙ₊₁ = dₙ + Δt vₙ + Δt²(0.5-β)aₙ + Δt²β aₙ₊₁
    /// ```
    pub fn update(
        &self,
        dt: f64,
        d_new: &mut Vector,
        v_new: &mut Vector,
        d: &Vector,
        v: &Vector,
        a: &Vector,
        a_new: &Vector,
    ) {
        let dt2 = dt * dt;
        for i in 0..d_new.dim() {
            v_new[i] = v[i] + dt * (1.0 - self.gamma) * a[i] + dt * self.gamma * a_new[i];
            d_new[i] = d[i] + dt * v[i] + dt2 * (0.5 - self.beta) * a[i] + dt2 * self.beta * a_new[i];
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
