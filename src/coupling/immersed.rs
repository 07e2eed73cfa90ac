use super::{FieldInterpolator, FieldSnapshot, NodeMap, Side};
use crate::base::{Communicator, FsiError, PenaltyMode};
use crate::fem::{replay_output_schedule, CheckpointManager, FluidIntegrator, Integrator, NoRefinement, OutputWriter};
use crate::fem::{Refiner, SolidIntegrator, TimeState};
use russell_lab::Vector;

/// Holds the fluid fields sampled at the solid points
#[derive(Clone, Debug)]
pub struct FluidOnSolid {
    /// Fluid velocity (ndim values per solid point)
    pub velocity: FieldSnapshot,

    /// Fluid pressure (one value per solid point)
    pub pressure: FieldSnapshot,

    /// Fluid stress (lower-triangle components per solid point)
    pub stress: FieldSnapshot,
}

/// Exchanges the fields of a solid immersed in the fluid mesh (same process)
///
/// The solid stress and acceleration feed the forcing of the non-fluid cells
/// of the fluid; the fluid stress feeds the FSI boundaries of the solid and
/// the fluid velocity feeds the penalty force of the solid.
pub struct ImmersedCoupling<'a> {
    interpolator: Box<dyn FieldInterpolator + 'a>,

    /// Rebuilds a [NodeMap] when the meshes change
    follows_meshes: bool,

    /// Fluid fields sampled at the solid points by the last exchange
    pub fluid_on_solid: Option<FluidOnSolid>,
}

impl<'a> ImmersedCoupling<'a> {
    /// Allocates a new instance
    pub fn new(interpolator: Box<dyn FieldInterpolator + 'a>) -> Self {
        ImmersedCoupling {
            interpolator,
            follows_meshes: false,
            fluid_on_solid: None,
        }
    }

    /// Allocates a new instance coupling coincident vertices
    ///
    /// The [NodeMap] also becomes the indicator source of the fluid and is
    /// rebuilt by [ImmersedCoupling::remap] after a mesh refinement.
    pub fn with_node_map(solid: &SolidIntegrator, fluid: &mut FluidIntegrator<'a>) -> Result<Self, FsiError> {
        let map = node_map_for(solid, fluid)?;
        let mut coupling = ImmersedCoupling::new(Box::new(map));
        coupling.follows_meshes = true;
        Ok(coupling)
    }

    /// Rebuilds the node map for the current meshes
    ///
    /// Fails if the coupling was given a custom interpolator.
    pub fn remap(&mut self, solid: &SolidIntegrator, fluid: &mut FluidIntegrator<'a>) -> Result<(), FsiError> {
        if !self.follows_meshes {
            return Err(FsiError::Config(
                "the interpolator of the coupling cannot follow a mesh refinement".to_string(),
            ));
        }
        self.interpolator = Box::new(node_map_for(solid, fluid)?);
        Ok(())
    }

    /// Hands the solid stress and acceleration over to the fluid
    pub fn solid_to_fluid(&mut self, solid: &SolidIntegrator, fluid: &mut FluidIntegrator) -> Result<(), FsiError> {
        let ndim = solid.dofs().ndim;
        let stress = FieldSnapshot::from_components(Side::Solid, &solid.state.stress)?;
        let acceleration = FieldSnapshot::from_nodal(Side::Solid, ndim, &solid.state.acceleration)?;
        let stress = self.interpolator.interpolate(&stress)?;
        let acceleration = self.interpolator.interpolate(&acceleration)?;
        fluid.set_fsi_stress(stress.to_components())?;
        fluid.set_fsi_acceleration(acceleration.values)
    }

    /// Hands the fluid stress and velocity over to the solid
    ///
    /// With the penalty coupling, the solid receives the velocity difference
    /// (fluid minus solid) at the points reached by the fluid and zero elsewhere.
    pub fn fluid_to_solid(&mut self, fluid: &mut FluidIntegrator, solid: &mut SolidIntegrator) -> Result<(), FsiError> {
        let ndim = fluid.dofs().ndim;
        let n_vector = fluid.dofs().n_vector;
        let npoint = fluid.fem().npoint();
        let velocity = Vector::from(&fluid.state.solution.as_data()[0..n_vector].to_vec());
        let velocity = FieldSnapshot::from_nodal(Side::Fluid, ndim, &velocity)?;
        let pressure = FieldSnapshot::from_nodal(Side::Fluid, 1, &fluid.nodal_pressure()?)?;
        let stress = FieldSnapshot::from_components(Side::Fluid, &fluid.state.stress)?;
        let reached = FieldSnapshot::from_nodal(Side::Fluid, 1, &Vector::filled(npoint, 1.0))?;

        let sampled = FluidOnSolid {
            velocity: self.interpolator.interpolate(&velocity)?,
            pressure: self.interpolator.interpolate(&pressure)?,
            stress: self.interpolator.interpolate(&stress)?,
        };
        let reached = self.interpolator.interpolate(&reached)?;

        solid.set_fsi_stress(sampled.stress.to_components())?;
        if solid.config().penalty != PenaltyMode::Off {
            let mut difference = Vector::new(solid.dofs().n_equation);
            for p in 0..reached.npoint() {
                if reached.values[p] == 0.0 {
                    continue;
                }
                for i in 0..ndim {
                    let eq = solid.dofs().vector_eq(p, i);
                    difference[eq] = sampled.velocity.get(p, i) - solid.state.velocity[eq];
                }
            }
            solid.set_velocity_difference(difference)?;
        }
        self.fluid_on_solid = Some(sampled);
        Ok(())
    }
}

/// Builds the node map of the current meshes and makes it the indicator source of the fluid
fn node_map_for<'a>(solid: &SolidIntegrator, fluid: &mut FluidIntegrator<'a>) -> Result<NodeMap, FsiError> {
    let map = NodeMap::new(solid.fem(), fluid.fem())?;
    log::info!(
        "coupling: {} coincident vertices; {} fluid points within the solid",
        map.n_matched(),
        map.n_covered()
    );
    fluid.set_indicator_source(Box::new(map.clone()));
    Ok(map)
}

/// Drives the immersed fluid-structure simulation
///
/// Each step runs the fluid (indicators, assembly, solve and stress recovery),
/// hands the fluid fields over to the solid, runs the solid and finally hands
/// the solid fields over to the fluid for the next step. Step 0 computes the
/// initial state of both sides without a fluid solve.
///
/// When the refinement trigger fires, both meshes are handed to their
/// refiners; if either changes, the coupling is remapped and the solid fields
/// are handed over again to the refined fluid.
pub struct FsiSimulation<'a> {
    comm: &'a dyn Communicator,

    /// Holds the clock
    pub time: TimeState,

    /// Holds the output writer of the solid
    pub solid_writer: OutputWriter,

    /// Holds the output writer of the fluid
    pub fluid_writer: OutputWriter,

    coupling: ImmersedCoupling<'a>,
    checkpoint_dir: Option<String>,
    solid_refiner: Box<dyn Refiner + 'a>,
    fluid_refiner: Box<dyn Refiner + 'a>,
}

impl<'a> FsiSimulation<'a> {
    /// Allocates a new instance (no outputs, no checkpoints and no refinement)
    pub fn new(comm: &'a dyn Communicator, time: TimeState, coupling: ImmersedCoupling<'a>) -> Self {
        FsiSimulation {
            comm,
            time,
            solid_writer: OutputWriter::new(),
            fluid_writer: OutputWriter::new(),
            coupling,
            checkpoint_dir: None,
            solid_refiner: Box::new(NoRefinement),
            fluid_refiner: Box::new(NoRefinement),
        }
    }

    /// Sets the mesh refinement collaborators of the solid and the fluid
    pub fn set_refiners(&mut self, solid: Box<dyn Refiner + 'a>, fluid: Box<dyn Refiner + 'a>) -> &mut Self {
        self.solid_refiner = solid;
        self.fluid_refiner = fluid;
        self
    }

    /// Sets the output writers
    pub fn set_writers(&mut self, solid: OutputWriter, fluid: OutputWriter) -> &mut Self {
        self.solid_writer = solid;
        self.fluid_writer = fluid;
        self
    }

    /// Enables checkpoints in the given directory
    pub fn set_checkpoint_dir(&mut self, directory: &str) -> &mut Self {
        self.checkpoint_dir = Some(directory.to_string());
        self
    }

    /// Returns the coupling exchange
    pub fn coupling(&self) -> &ImmersedCoupling<'a> {
        &self.coupling
    }

    /// Runs the coupled time loop until the end time
    pub fn run(&mut self, solid: &mut SolidIntegrator, fluid: &mut FluidIntegrator<'a>) -> Result<(), FsiError> {
        solid.initialize(&self.time)?;
        fluid.initialize(&self.time)?;
        if !self.resume(solid, fluid)? {
            self.time.initialize();
            self.step(solid, fluid, true)?;
        }
        while !self.time.finished() {
            self.time.increment();
            let output = self.time.time_to_output();
            self.step(solid, fluid, output)?;
            if self.time.time_to_refine() {
                self.refine(solid, fluid)?;
            }
            if self.time.time_to_save() {
                self.save(solid, fluid)?;
            }
        }
        self.solid_writer.write_summary()?;
        self.fluid_writer.write_summary()?;
        log::info!(
            "fsi: finished at t = {:e} after {} steps",
            self.time.current,
            self.time.step
        );
        Ok(())
    }

    fn step(&mut self, solid: &mut SolidIntegrator, fluid: &mut FluidIntegrator, output: bool) -> Result<(), FsiError> {
        fluid.assemble(&self.time)?;
        fluid.solve_step(&self.time)?;
        self.coupling.fluid_to_solid(fluid, solid)?;
        solid.assemble(&self.time)?;
        solid.solve_step(&self.time)?;
        self.coupling.solid_to_fluid(solid, fluid)?;
        if output {
            fluid.output(&self.time, &mut self.fluid_writer)?;
            solid.output(&self.time, &mut self.solid_writer)?;
        }
        Ok(())
    }

    fn refine(&mut self, solid: &mut SolidIntegrator, fluid: &mut FluidIntegrator<'a>) -> Result<(), FsiError> {
        let solid_changed = solid.refine(self.solid_refiner.as_mut())?;
        let fluid_changed = fluid.refine(self.fluid_refiner.as_mut())?;
        if solid_changed || fluid_changed {
            self.coupling.remap(solid, fluid)?;
            self.coupling.solid_to_fluid(solid, fluid)?;
        }
        Ok(())
    }

    fn save(&self, solid: &SolidIntegrator, fluid: &FluidIntegrator) -> Result<(), FsiError> {
        let dir = match &self.checkpoint_dir {
            Some(d) => d,
            None => return Ok(()),
        };
        let integrators: [&dyn Integrator; 2] = [solid, fluid];
        for integrator in integrators {
            let manager = CheckpointManager::new(dir, integrator.name());
            let fields: Vec<_> = integrator
                .checkpoint_names()
                .iter()
                .copied()
                .zip(integrator.checkpoint_fields())
                .collect();
            manager.save(self.comm, self.time.step, &fields)?;
        }
        Ok(())
    }

    /// Loads the latest checkpoints of both sides; returns true if the run is resumed
    fn resume(&mut self, solid: &mut SolidIntegrator, fluid: &mut FluidIntegrator) -> Result<bool, FsiError> {
        let dir = match &self.checkpoint_dir {
            Some(d) => d.clone(),
            None => return Ok(false),
        };
        let solid_manager = CheckpointManager::new(&dir, solid.name());
        let fluid_manager = CheckpointManager::new(&dir, fluid.name());
        let solid_data = solid_manager.load(self.comm, solid.checkpoint_names())?;
        let fluid_data = fluid_manager.load(self.comm, fluid.checkpoint_names())?;
        let step = match (solid_data, fluid_data) {
            (None, None) => return Ok(false),
            (Some((s, solid_fields)), Some((f, fluid_fields))) if s == f => {
                solid.restore_fields(&solid_fields)?;
                fluid.restore_fields(&fluid_fields)?;
                s
            }
            _ => {
                return Err(FsiError::Protocol(
                    "solid and fluid checkpoints do not belong to the same step".to_string(),
                ))
            }
        };
        replay_output_schedule(&mut self.time, &mut self.solid_writer, step);
        replay_output_schedule(&mut self.time, &mut self.fluid_writer, step);

        // the exchanged fields are derived from the restored states
        fluid.update_stress()?;
        solid.update_stress()?;
        self.coupling.solid_to_fluid(solid, fluid)?;
        log::info!("fsi: resuming at step {} (t = {:e})", step, self.time.current);
        Ok(true)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
