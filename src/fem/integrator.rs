use super::{OutputWriter, TimeState};
use crate::base::{FemMesh, FsiError};
use russell_lab::Vector;

/// Defines the capabilities of a time integrator driven by [super::Simulation]
pub trait Integrator {
    /// Returns the name used as the checkpoint prefix (e.g., "solid")
    fn name(&self) -> &'static str;

    /// Prepares the system storage and the time-independent matrices
    fn initialize(&mut self, time: &TimeState) -> Result<(), FsiError>;

    /// Assembles the system for the current step
    fn assemble(&mut self, time: &TimeState) -> Result<(), FsiError>;

    /// Solves the current step and updates the state
    ///
    /// Step 0 computes the initial condition (e.g., the initial acceleration).
    fn solve_step(&mut self, time: &TimeState) -> Result<(), FsiError>;

    /// Writes the current state
    fn output(&mut self, time: &TimeState, writer: &mut OutputWriter) -> Result<(), FsiError>;

    /// Returns the names of the fields persisted by checkpoints
    fn checkpoint_names(&self) -> &'static [&'static str];

    /// Returns the fields persisted by checkpoints in the order of [Integrator::checkpoint_names]
    fn checkpoint_fields(&self) -> Vec<&Vector>;

    /// Installs fields loaded from a checkpoint (previous = current afterwards)
    fn restore_fields(&mut self, fields: &[Vector]) -> Result<(), FsiError>;

    /// Refines the mesh and transfers the state
    ///
    /// Returns true if the mesh has changed.
    fn refine(&mut self, refiner: &mut dyn Refiner) -> Result<bool, FsiError>;
}

/// Defines the mesh refinement collaborator
///
/// Every process must call `refine` with the same mesh; the refinement is a
/// collective operation.
pub trait Refiner {
    /// Refines a mesh and interpolates nodal fields onto it
    ///
    /// Each field holds a fixed number of values per point, ordered as
    /// `point * ncomp + component` (e.g., `ncomp = ndim` for vector fields and
    /// `ncomp = 1` for the pressure).
    /// Returns None if the mesh is left unchanged.
    fn refine(&mut self, fem: &FemMesh, fields: &[&Vector]) -> Result<Option<(FemMesh, Vec<Vector>)>, FsiError>;
}

/// Implements a refiner that never changes the mesh
pub struct NoRefinement;

impl Refiner for NoRefinement {
    fn refine(&mut self, _fem: &FemMesh, _fields: &[&Vector]) -> Result<Option<(FemMesh, Vec<Vector>)>, FsiError> {
        Ok(None)
    }
}
