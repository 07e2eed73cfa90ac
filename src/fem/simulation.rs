use super::{replay_output_schedule, CheckpointManager, Integrator, NoRefinement, OutputWriter, Refiner, TimeState};
use crate::base::{Communicator, FsiError};

/// Drives a single integrator through the time loop
///
/// Step 0 computes the initial condition and always writes an output. Each
/// later step assembles and solves the system, then writes an output, refines
/// the mesh and saves a checkpoint when the corresponding trigger fires.
///
/// With checkpoints enabled, a run resumes from the latest checkpoint found
/// in the directory; otherwise it starts from scratch.
pub struct Simulation<'a> {
    comm: &'a dyn Communicator,

    /// Holds the clock
    pub time: TimeState,

    /// Holds the output writer
    pub writer: OutputWriter,

    checkpoint_dir: Option<String>,
    refiner: Box<dyn Refiner + 'a>,
}

impl<'a> Simulation<'a> {
    /// Allocates a new instance (no checkpoints and no refinement)
    pub fn new(comm: &'a dyn Communicator, time: TimeState, writer: OutputWriter) -> Self {
        Simulation {
            comm,
            time,
            writer,
            checkpoint_dir: None,
            refiner: Box::new(NoRefinement),
        }
    }

    /// Enables checkpoints in the given directory
    pub fn set_checkpoint_dir(&mut self, directory: &str) -> &mut Self {
        self.checkpoint_dir = Some(directory.to_string());
        self
    }

    /// Sets the mesh refinement collaborator
    pub fn set_refiner(&mut self, refiner: Box<dyn Refiner + 'a>) -> &mut Self {
        self.refiner = refiner;
        self
    }

    /// Runs the time loop until the end time
    pub fn run(&mut self, integrator: &mut dyn Integrator) -> Result<(), FsiError> {
        integrator.initialize(&self.time)?;
        if !self.resume(integrator)? {
            self.time.initialize();
            self.step(integrator, true)?;
        }
        while !self.time.finished() {
            self.time.increment();
            let output = self.time.time_to_output();
            self.step(integrator, output)?;
            if self.time.time_to_refine() {
                integrator.refine(self.refiner.as_mut())?;
            }
            if self.time.time_to_save() {
                self.save(integrator)?;
            }
        }
        self.writer.write_summary()?;
        log::info!(
            "{}: finished at t = {:e} after {} steps",
            integrator.name(),
            self.time.current,
            self.time.step
        );
        Ok(())
    }

    fn step(&mut self, integrator: &mut dyn Integrator, output: bool) -> Result<(), FsiError> {
        integrator.assemble(&self.time)?;
        integrator.solve_step(&self.time)?;
        if output {
            integrator.output(&self.time, &mut self.writer)?;
        }
        Ok(())
    }

    fn save(&self, integrator: &dyn Integrator) -> Result<(), FsiError> {
        if let Some(dir) = &self.checkpoint_dir {
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

    /// Loads the latest checkpoint; returns true if the run is resumed
    fn resume(&mut self, integrator: &mut dyn Integrator) -> Result<bool, FsiError> {
        let dir = match &self.checkpoint_dir {
            Some(d) => d,
            None => return Ok(false),
        };
        let manager = CheckpointManager::new(dir, integrator.name());
        match manager.load(self.comm, integrator.checkpoint_names())? {
            Some((step, fields)) => {
                integrator.restore_fields(&fields)?;
                replay_output_schedule(&mut self.time, &mut self.writer, step);
                log::info!("{}: resuming at step {} (t = {:e})", integrator.name(), step, self.time.current);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
