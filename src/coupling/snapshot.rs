use crate::base::FsiError;
use russell_lab::Vector;
use serde::{Deserialize, Serialize};

/// Identifies the mesh a field lives on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Solid,
    Fluid,
}

impl Side {
    /// Returns the other side of the interface
    pub fn other(&self) -> Side {
        match self {
            Side::Solid => Side::Fluid,
            Side::Fluid => Side::Solid,
        }
    }
}

/// Holds an owned copy of a nodal field handed over the coupling interface
///
/// The values are ordered as `point * ncomp + component`. A snapshot is never
/// shared with the integrator that produced it; the receiver gets its own copy.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldSnapshot {
    /// Mesh holding the points of the field
    pub side: Side,

    /// Number of components per point
    pub ncomp: usize,

    /// Nodal values
    pub values: Vector,
}

impl FieldSnapshot {
    /// Allocates a zeroed snapshot
    pub fn new(side: Side, ncomp: usize, npoint: usize) -> Self {
        FieldSnapshot {
            side,
            ncomp,
            values: Vector::new(npoint * ncomp),
        }
    }

    /// Copies a nodal field with `ncomp` values per point
    pub fn from_nodal(side: Side, ncomp: usize, values: &Vector) -> Result<Self, FsiError> {
        if ncomp == 0 || values.dim() % ncomp != 0 {
            return Err(FsiError::Protocol(format!(
                "field with {} values cannot hold {} components per point",
                values.dim(),
                ncomp
            )));
        }
        Ok(FieldSnapshot {
            side,
            ncomp,
            values: values.clone(),
        })
    }

    /// Copies a nodal tensor stored as one vector per component
    pub fn from_components(side: Side, components: &[Vector]) -> Result<Self, FsiError> {
        let ncomp = components.len();
        let npoint = components.first().map(|c| c.dim()).unwrap_or(0);
        if ncomp == 0 || components.iter().any(|c| c.dim() != npoint) {
            return Err(FsiError::Protocol(
                "tensor components must be given with the same number of points".to_string(),
            ));
        }
        let mut snapshot = FieldSnapshot::new(side, ncomp, npoint);
        for (k, component) in components.iter().enumerate() {
            for p in 0..npoint {
                snapshot.values[p * ncomp + k] = component[p];
            }
        }
        Ok(snapshot)
    }

    /// Returns the number of points
    pub fn npoint(&self) -> usize {
        if self.ncomp == 0 {
            return 0;
        }
        self.values.dim() / self.ncomp
    }

    /// Returns a component at a point
    pub fn get(&self, point_id: usize, component: usize) -> f64 {
        self.values[point_id * self.ncomp + component]
    }

    /// Returns the values as one vector per component
    pub fn to_components(&self) -> Vec<Vector> {
        let npoint = self.npoint();
        let mut components = vec![Vector::new(npoint); self.ncomp];
        for p in 0..npoint {
            for (k, component) in components.iter_mut().enumerate() {
                component[p] = self.values[p * self.ncomp + k];
            }
        }
        components
    }
}

/// Samples nodal fields of one mesh at the points of the other mesh
pub trait FieldInterpolator {
    /// Returns the field sampled on the other side of the interface
    ///
    /// Points of the target mesh that the source does not reach get zero.
    fn interpolate(&self, source: &FieldSnapshot) -> Result<FieldSnapshot, FsiError>;
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
