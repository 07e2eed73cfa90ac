//! Implements the solid and fluid integrators and the single-field time loop

mod checkpoint;
mod diagnostics;
mod fluid_integrator;
mod fluid_state;
mod indicator;
mod integrator;
mod newmark;
mod nodal_recovery;
mod output;
mod pressure_pin;
mod simulation;
mod solid_integrator;
mod solid_state;
mod solvers;
mod strain;
mod time_state;
pub use crate::fem::checkpoint::*;
pub use crate::fem::diagnostics::*;
pub use crate::fem::fluid_integrator::*;
pub use crate::fem::fluid_state::*;
pub use crate::fem::indicator::*;
pub use crate::fem::integrator::*;
pub use crate::fem::newmark::*;
pub use crate::fem::nodal_recovery::*;
pub use crate::fem::output::*;
pub use crate::fem::pressure_pin::*;
pub use crate::fem::simulation::*;
pub use crate::fem::solid_integrator::*;
pub use crate::fem::solid_state::*;
pub use crate::fem::solvers::*;
pub use crate::fem::strain::*;
pub use crate::fem::time_state::*;
