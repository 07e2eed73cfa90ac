use super::{new_nodal_tensor, CellIndicator};
use crate::base::{DofMap, FsiError};
use russell_lab::{vec_copy, Vector};
use serde::{Deserialize, Serialize};

/// Holds the fields of the fluid
///
/// The solution holds the velocity block followed by the pressure block (see
/// [DofMap]). The nodal stress holds one vector per tensor component in the
/// lower-triangle order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FluidState {
    /// Time
    pub t: f64,

    /// Velocity and pressure at the current step
    pub solution: Vector,

    /// Velocity and pressure at the previous step
    pub previous_solution: Vector,

    /// Indicator of each cell
    pub indicators: Vec<CellIndicator>,

    /// Nodal stress of the immersed solid (one vector per component)
    pub fsi_stress: Vec<Vector>,

    /// Acceleration of the immersed solid at each velocity DOF
    pub fsi_acceleration: Vector,

    /// Inertial part ρ_s a·φ of the force exerted by the immersed solid
    pub force_acceleration_part: Vector,

    /// Stress part σ:∇φ of the force exerted by the immersed solid
    pub force_stress_part: Vector,

    /// Total force exerted by the immersed solid
    pub force_total: Vector,

    /// Nodal fluid stress -pI + 2ν sym∇u
    pub stress: Vec<Vector>,
}

impl FluidState {
    /// Allocates a zeroed state with all cells tagged as fluid
    pub fn new(dofs: &DofMap, npoint: usize, ncell: usize) -> Self {
        let n = dofs.n_equation;
        FluidState {
            t: 0.0,
            solution: Vector::new(n),
            previous_solution: Vector::new(n),
            indicators: vec![CellIndicator::Fluid; ncell],
            fsi_stress: new_nodal_tensor(dofs.ndim, npoint),
            fsi_acceleration: Vector::new(dofs.n_vector),
            force_acceleration_part: Vector::new(n),
            force_stress_part: Vector::new(n),
            force_total: Vector::new(n),
            stress: new_nodal_tensor(dofs.ndim, npoint),
        }
    }

    /// Copies the current solution into the previous solution
    pub fn advance(&mut self) {
        self.previous_solution.as_mut_data().copy_from_slice(self.solution.as_data());
    }

    /// Installs a solution as both the current and previous solution
    pub fn install(&mut self, solution: &Vector) -> Result<(), FsiError> {
        if solution.dim() != self.solution.dim() {
            return Err(FsiError::Protocol(format!(
                "fluid solution must have {} entries (got {})",
                self.solution.dim(),
                solution.dim()
            )));
        }
        vec_copy(&mut self.solution, solution)?;
        self.advance();
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
