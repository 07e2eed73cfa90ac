use crate::base::POINT_MATCH_TOLERANCE;
use crate::StrError;
use gemlab::mesh::{CellId, Mesh, PointId};
use gemlab::shapes::GeoKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Identifies a tagged part of the boundary
pub type BoundaryId = usize;

/// Holds a boundary face (an edge in 2D) tagged with a boundary id
///
/// The points are ordered such that the normal computed from the face
/// geometry points outwards of the cell.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BoundaryFace {
    /// Tag selecting the boundary condition
    pub boundary_id: BoundaryId,

    /// The cell owning this face
    pub cell_id: CellId,

    /// The geometry kind of the face (e.g., Lin2, Lin3, Qua4)
    pub kind: GeoKind,

    /// The points of the face
    pub points: Vec<PointId>,
}

/// Holds a mesh together with its tagged boundary faces
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FemMesh {
    /// The mesh (points and cells)
    pub mesh: Mesh,

    /// The boundary faces
    pub faces: Vec<BoundaryFace>,
}

impl FemMesh {
    /// Allocates a new instance
    pub fn new(mesh: Mesh, faces: Vec<BoundaryFace>) -> Result<Self, StrError> {
        if mesh.ndim < 2 || mesh.ndim > 3 {
            return Err("the mesh must be 2D or 3D");
        }
        if mesh.cells.is_empty() {
            return Err("the mesh must have at least one cell");
        }
        let npoint = mesh.points.len();
        for cell in &mesh.cells {
            if cell.points.len() != cell.kind.nnode() {
                return Err("number of cell points is inconsistent with its kind");
            }
            if cell.points.iter().any(|p| *p >= npoint) {
                return Err("cell point id is out of range");
            }
        }
        for face in &faces {
            if face.cell_id >= mesh.cells.len() {
                return Err("face cell id is out of range");
            }
            if face.points.len() != face.kind.nnode() {
                return Err("number of face points is inconsistent with its kind");
            }
            if face.points.iter().any(|p| *p >= npoint) {
                return Err("face point id is out of range");
            }
        }
        Ok(FemMesh { mesh, faces })
    }

    /// Returns the space dimension
    pub fn ndim(&self) -> usize {
        self.mesh.ndim
    }

    /// Returns the number of points
    pub fn npoint(&self) -> usize {
        self.mesh.points.len()
    }

    /// Returns the number of cells
    pub fn ncell(&self) -> usize {
        self.mesh.cells.len()
    }

    /// Returns the faces tagged with a boundary id
    pub fn faces_with(&self, boundary_id: BoundaryId) -> impl Iterator<Item = &BoundaryFace> {
        self.faces.iter().filter(move |f| f.boundary_id == boundary_id)
    }

    /// Returns the (sorted) points on the faces tagged with a boundary id
    pub fn boundary_points(&self, boundary_id: BoundaryId) -> BTreeSet<PointId> {
        let mut points = BTreeSet::new();
        for face in self.faces_with(boundary_id) {
            points.extend(face.points.iter().copied());
        }
        points
    }

    /// Counts how many cells share each point
    pub fn cells_per_point(&self) -> Vec<usize> {
        let mut count = vec![0; self.npoint()];
        for cell in &self.mesh.cells {
            for p in &cell.points {
                count[*p] += 1;
            }
        }
        count
    }

    /// Finds the point located at the given coordinates
    pub fn find_point(&self, coords: &[f64]) -> Option<PointId> {
        if coords.len() != self.ndim() {
            return None;
        }
        self.mesh.points.iter().find_map(|point| {
            let dist = distance(&point.coords, coords);
            if dist <= POINT_MATCH_TOLERANCE {
                Some(point.id)
            } else {
                None
            }
        })
    }
}

/// Returns the Euclidean distance between two points
pub fn distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum::<f64>().sqrt()
}

/// Returns the polynomial degree of the interpolation of a geometry kind
pub fn kind_degree(kind: GeoKind) -> usize {
    match kind {
        GeoKind::Lin2 | GeoKind::Tri3 | GeoKind::Qua4 | GeoKind::Tet4 | GeoKind::Hex8 => 1,
        GeoKind::Lin3 | GeoKind::Tri6 | GeoKind::Qua8 | GeoKind::Qua9 | GeoKind::Tet10 | GeoKind::Hex20 => 2,
        _ => 3,
    }
}

/// Returns the first-order kind using the corner nodes of a geometry kind
///
/// The corner nodes come first in the local numbering of all kinds, thus the
/// first `nnode()` points of the cell define the returned kind.
pub fn corner_kind(kind: GeoKind) -> Result<GeoKind, StrError> {
    match kind {
        GeoKind::Lin2 | GeoKind::Lin3 => Ok(GeoKind::Lin2),
        GeoKind::Tri3 | GeoKind::Tri6 => Ok(GeoKind::Tri3),
        GeoKind::Qua4 | GeoKind::Qua8 | GeoKind::Qua9 => Ok(GeoKind::Qua4),
        GeoKind::Tet4 | GeoKind::Tet10 => Ok(GeoKind::Tet4),
        GeoKind::Hex8 | GeoKind::Hex20 => Ok(GeoKind::Hex8),
        _ => Err("cell kind is not available for the mixed velocity-pressure interpolation"),
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::{corner_kind, distance, kind_degree, FemMesh};
    use crate::base::SampleMeshes;
    use gemlab::shapes::GeoKind;

    #[test]
    fn new_captures_errors() {
        let fem = SampleMeshes::rectangle(1, 1, 1.0, 1.0, GeoKind::Qua4, 1).unwrap();
        let mut mesh = fem.mesh.clone();
        mesh.cells[0].points[0] = 100;
        assert_eq!(
            FemMesh::new(mesh, Vec::new()).err(),
            Some("cell point id is out of range")
        );
        let mut faces = fem.faces.clone();
        faces[0].cell_id = 5;
        assert_eq!(
            FemMesh::new(fem.mesh.clone(), faces).err(),
            Some("face cell id is out of range")
        );
    }

    #[test]
    fn queries_work() {
        let fem = SampleMeshes::rectangle(2, 1, 2.0, 1.0, GeoKind::Qua4, 1).unwrap();
        assert_eq!(fem.ndim(), 2);
        assert_eq!(fem.npoint(), 6);
        assert_eq!(fem.ncell(), 2);
        assert_eq!(fem.cells_per_point(), &[1, 2, 1, 1, 2, 1]);
        assert_eq!(fem.find_point(&[1.0, 1.0]), Some(4));
        assert_eq!(fem.find_point(&[1.5, 1.0]), None);
        let left: Vec<_> = fem.boundary_points(0).into_iter().collect();
        assert_eq!(left, &[0, 3]);
        assert_eq!(fem.faces_with(2).count(), 2);
    }

    #[test]
    fn kind_helpers_work() {
        assert_eq!(distance(&[0.0, 0.0], &[3.0, 4.0]), 5.0);
        assert_eq!(kind_degree(GeoKind::Qua4), 1);
        assert_eq!(kind_degree(GeoKind::Qua9), 2);
        assert_eq!(corner_kind(GeoKind::Qua9).unwrap(), GeoKind::Qua4);
        assert_eq!(corner_kind(GeoKind::Tri6).unwrap(), GeoKind::Tri3);
    }
}
