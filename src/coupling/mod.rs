//! Implements the exchange of fields between the solid, the fluid and external codes

mod external;
mod external_fluid;
mod immersed;
mod node_map;
mod snapshot;
pub use crate::coupling::external::*;
pub use crate::coupling::external_fluid::*;
pub use crate::coupling::immersed::*;
pub use crate::coupling::node_map::*;
pub use crate::coupling::snapshot::*;
