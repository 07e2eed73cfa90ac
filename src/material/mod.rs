//! Implements material models

mod linear_elastic;
pub use crate::material::linear_elastic::*;
