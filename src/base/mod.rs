//! Implements the base structures for a partitioned simulation

mod assembly;
mod communicator;
mod config;
mod constants;
mod dof_map;
mod error;
mod fem_mesh;
mod partition;
mod sample_meshes;
mod system_matrix;
pub use crate::base::assembly::*;
pub use crate::base::communicator::*;
pub use crate::base::config::*;
pub use crate::base::constants::*;
pub use crate::base::dof_map::*;
pub use crate::base::error::*;
pub use crate::base::fem_mesh::*;
pub use crate::base::partition::*;
pub use crate::base::sample_meshes::*;
pub use crate::base::system_matrix::*;
