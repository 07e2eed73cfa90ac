//! Makes available common structures needed to run a simulation
//!
//! You may write `use fsisim::prelude::*` in your code and obtain
//! access to commonly used functionality.

pub use crate::base::{ComponentMask, CouplingConfig, FluidConfig, ParamSolid, PenaltyMode, SolidConfig, TimeConfig};
pub use crate::base::{Communicator, FemMesh, FsiError, LocalComm, SampleMeshes, SerialComm};
pub use crate::base::{SolidTraction, VelocityBc, DEFAULT_OUT_DIR, DEFAULT_TEST_DIR};
pub use crate::coupling::{ExternalCoupling, ExternalFluidWrapper, FsiSimulation, ImmersedCoupling, NodeMap};
pub use crate::fem::{DiagnosticsSink, FluidIntegrator, Integrator, OutputWriter, Simulation, SolidIntegrator};
pub use crate::fem::{NoRefinement, TimeState};
