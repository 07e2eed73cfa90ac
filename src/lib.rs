//! Partitioned fluid-structure interaction simulator
//!
//! A solid integrator (implicit Newmark α-method with lumped mass) and an
//! indicator-driven Stokes integrator exchange stress, acceleration and
//! velocity fields every time step. The exchange works either between two
//! meshes in the same process (immersed coupling) or across ranks with an
//! external flow code (penalty coupling).
//!
//! You may write `use fsisim::prelude::*` to access the most common structures.

/// Defines a type alias for the error type as a static string
pub type StrError = &'static str;

pub mod base;
pub mod coupling;
pub mod fem;
pub mod material;
pub mod prelude;
