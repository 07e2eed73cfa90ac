use crate::base::{TimeConfig, END_TIME_TOLERANCE};
use crate::StrError;
use serde::{Deserialize, Serialize};

/// Defines the phases of the time loop
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// The clock has not been started yet
    Uninitialized,

    /// The clock is at step 0
    Initialized,

    /// The clock is at step n > 0
    Stepping(usize),

    /// The end time has been reached
    Finished,
}

/// Holds the global clock of a simulation
///
/// The output, refinement and save intervals are given in time units and
/// converted to a number of steps `k = round(interval / Δt) ≥ 1`. A trigger
/// fires at the steps that are multiples of `k` (step 0 excluded). A zero
/// (or negative) interval disables the trigger.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimeState {
    /// Current time
    pub current: f64,

    /// Time step size Δt
    pub delta_t: f64,

    /// Step index
    pub step: usize,

    /// Final time
    pub end: f64,

    /// Interval between outputs
    pub output_interval: f64,

    /// Interval between mesh refinements
    pub refine_interval: f64,

    /// Interval between checkpoints
    pub save_interval: f64,

    /// Indicates that the clock has been started
    initialized: bool,
}

impl TimeState {
    /// Allocates a new instance
    pub fn new(
        end: f64,
        delta_t: f64,
        output_interval: f64,
        refine_interval: f64,
        save_interval: f64,
    ) -> Result<Self, StrError> {
        if delta_t <= 0.0 {
            return Err("Δt must be > 0.0");
        }
        if end < 0.0 {
            return Err("end time must be ≥ 0.0");
        }
        Ok(TimeState {
            current: 0.0,
            delta_t,
            step: 0,
            end,
            output_interval,
            refine_interval,
            save_interval,
            initialized: false,
        })
    }

    /// Allocates a new instance from the time configuration
    pub fn from_config(config: &TimeConfig) -> Result<Self, StrError> {
        TimeState::new(
            config.end_time,
            config.delta_t,
            config.output_interval,
            config.refine_interval,
            config.save_interval,
        )
    }

    /// Starts the clock at step 0
    pub fn initialize(&mut self) {
        self.current = 0.0;
        self.step = 0;
        self.initialized = true;
    }

    /// Advances the clock by Δt
    pub fn increment(&mut self) {
        self.initialized = true;
        self.current += self.delta_t;
        self.step += 1;
    }

    /// Overrides the time step size (e.g., with the value of an external solver)
    pub fn set_delta_t(&mut self, delta_t: f64) -> Result<(), StrError> {
        if delta_t <= 0.0 {
            return Err("Δt must be > 0.0");
        }
        self.delta_t = delta_t;
        Ok(())
    }

    /// Returns true if the end time has been reached
    pub fn finished(&self) -> bool {
        self.end - self.current <= END_TIME_TOLERANCE
    }

    /// Returns true if an output must be written at the current step
    pub fn time_to_output(&self) -> bool {
        self.fires(self.output_interval)
    }

    /// Returns true if the mesh must be refined at the current step
    pub fn time_to_refine(&self) -> bool {
        self.fires(self.refine_interval)
    }

    /// Returns true if a checkpoint must be saved at the current step
    pub fn time_to_save(&self) -> bool {
        self.fires(self.save_interval)
    }

    /// Returns the phase of the time loop
    pub fn phase(&self) -> Phase {
        if !self.initialized {
            Phase::Uninitialized
        } else if self.finished() && self.step > 0 {
            Phase::Finished
        } else if self.step == 0 {
            Phase::Initialized
        } else {
            Phase::Stepping(self.step)
        }
    }

    /// Converts an interval to a number of steps
    fn steps_per(&self, interval: f64) -> Option<usize> {
        if interval <= 0.0 {
            return None;
        }
        let k = (interval / self.delta_t).round() as usize;
        Some(usize::max(k, 1))
    }

    fn fires(&self, interval: f64) -> bool {
        match self.steps_per(interval) {
            Some(k) => self.step >= k && self.step % k == 0,
            None => false,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
