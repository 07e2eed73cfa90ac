use super::{ExternalCoupling, GridCounts};
use crate::base::{kind_degree, Communicator, CouplingConfig, DofMap, FemMesh, FluidConfig, FsiError};
use crate::fem::{OutputWriter, TimeState};
use russell_lab::Vector;
use serde::Serialize;

/// Holds the data written at each output of the external fluid
#[derive(Serialize)]
struct ExternalFluidSnapshot<'b> {
    t: f64,
    velocity: &'b Vector,
}

/// Stands for the fluid when the flow is computed by an external code
///
/// The wrapper does not solve anything. It follows the exchange protocol of
/// the external code: the grid sizes are agreed at every step, the mesh is
/// checked against the interior of the external grid at step 0, and the
/// velocity received afterwards is written at the output interval.
///
/// Only first-order meshes with first-order velocity and pressure are supported.
pub struct ExternalFluidWrapper<'a> {
    coupling: ExternalCoupling<'a>,
    fem: FemMesh,
    dofs: DofMap,

    /// Velocity received from the external code
    pub velocity: Vector,
}

impl<'a> ExternalFluidWrapper<'a> {
    /// Allocates a new instance
    pub fn new(
        comm: &'a dyn Communicator,
        fem: FemMesh,
        config: &FluidConfig,
        coupling_config: &CouplingConfig,
    ) -> Result<Self, FsiError> {
        if config.velocity_degree != 1 || config.pressure_degree != 1 {
            return Err(FsiError::Config(format!(
                "external fluid requires velocity and pressure degrees equal to 1 (got {} and {})",
                config.velocity_degree, config.pressure_degree
            )));
        }
        if config.ndim != fem.ndim() {
            return Err(FsiError::Config(format!(
                "fluid config has ndim = {} but the mesh has ndim = {}",
                config.ndim,
                fem.ndim()
            )));
        }
        if let Some(cell) = fem.mesh.cells.iter().find(|c| kind_degree(c.kind) != 1) {
            return Err(FsiError::Config(format!(
                "external fluid requires first-order cells (cell {} is {:?})",
                cell.id, cell.kind
            )));
        }
        let coupling = ExternalCoupling::new(comm, coupling_config)?;
        let dofs = DofMap::vector(&fem.mesh);
        let velocity = Vector::new(dofs.n_equation);
        Ok(ExternalFluidWrapper {
            coupling,
            fem,
            dofs,
            velocity,
        })
    }

    /// Returns the exchange with the external code
    pub fn coupling(&self) -> &ExternalCoupling<'a> {
        &self.coupling
    }

    /// Returns the mesh
    pub fn fem(&self) -> &FemMesh {
        &self.fem
    }

    /// Runs the protocol loop until every process reports inactive
    pub fn run(&mut self, time: &mut TimeState, writer: &mut OutputWriter) -> Result<(), FsiError> {
        time.initialize();
        self.step(time, writer)?;
        while self.coupling.is_active() {
            self.coupling.agree_delta_t(time, 0.0)?;
            self.step(time, writer)?;
        }
        writer.write_summary()?;
        Ok(())
    }

    /// Performs one exchange with the external code
    fn step(&mut self, time: &TimeState, writer: &mut OutputWriter) -> Result<(), FsiError> {
        let counts = self.coupling.agree_counts(GridCounts::default());
        if time.step == 0 {
            self.coupling.check_mesh(&self.fem)?;
            log::info!(
                "external fluid: grid with {} nodes and {} cells; {} interior points",
                counts.n_node,
                counts.n_cell,
                self.fem.npoint()
            );
            return self.write(time, writer);
        }
        self.coupling.recv_nodal(&mut self.velocity, self.dofs.ndim)?;
        self.coupling.update_activity(false);
        log::info!(
            "external fluid: step {} at t = {:e} (Δt = {:e})",
            time.step,
            time.current,
            time.delta_t
        );
        if time.time_to_output() {
            self.write(time, writer)?;
        }
        Ok(())
    }

    fn write(&self, time: &TimeState, writer: &mut OutputWriter) -> Result<(), FsiError> {
        let snapshot = ExternalFluidSnapshot {
            t: time.current,
            velocity: &self.velocity,
        };
        writer.write_snapshot(&snapshot, time.current)?;
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
