use super::corner_kind;
use crate::StrError;
use gemlab::mesh::{Cell, Mesh, PointId};

/// Numbers the degrees of freedom (equations)
///
/// The vector field (displacement or velocity) has `ndim` equations per point
/// numbered first, as `point * ndim + component`. The optional scalar field
/// (pressure) lives on the corner points of the cells and is numbered next, in
/// increasing point id order. Thus the global vectors are split in a vector
/// block `[0, n_vector)` and a scalar block `[n_vector, n_equation)`.
#[derive(Clone, Debug)]
pub struct DofMap {
    /// Space dimension
    pub ndim: usize,

    /// Number of equations of the vector field
    pub n_vector: usize,

    /// Number of equations of the scalar field
    pub n_scalar: usize,

    /// Total number of equations
    pub n_equation: usize,

    /// Scalar equation of each point (None if the point carries no scalar)
    scalar_eq: Vec<Option<usize>>,
}

impl DofMap {
    /// Allocates a numbering for a vector field only
    pub fn vector(mesh: &Mesh) -> Self {
        let n_vector = mesh.ndim * mesh.points.len();
        DofMap {
            ndim: mesh.ndim,
            n_vector,
            n_scalar: 0,
            n_equation: n_vector,
            scalar_eq: vec![None; mesh.points.len()],
        }
    }

    /// Allocates a numbering for a vector field plus a scalar field on the cell corners
    pub fn mixed(mesh: &Mesh) -> Result<Self, StrError> {
        let n_vector = mesh.ndim * mesh.points.len();
        let mut is_corner = vec![false; mesh.points.len()];
        for cell in &mesh.cells {
            let ncorner = corner_kind(cell.kind)?.nnode();
            for p in &cell.points[0..ncorner] {
                is_corner[*p] = true;
            }
        }
        let mut scalar_eq = vec![None; mesh.points.len()];
        let mut n_scalar = 0;
        for (p, corner) in is_corner.iter().enumerate() {
            if *corner {
                scalar_eq[p] = Some(n_vector + n_scalar);
                n_scalar += 1;
            }
        }
        Ok(DofMap {
            ndim: mesh.ndim,
            n_vector,
            n_scalar,
            n_equation: n_vector + n_scalar,
            scalar_eq,
        })
    }

    /// Returns the equation number of a component of the vector field at a point
    pub fn vector_eq(&self, point_id: PointId, component: usize) -> usize {
        point_id * self.ndim + component
    }

    /// Returns the equation number of the scalar field at a point
    pub fn scalar_eq(&self, point_id: PointId) -> Option<usize> {
        self.scalar_eq[point_id]
    }

    /// Returns the points carrying a scalar equation together with the equation number
    pub fn scalar_points(&self) -> impl Iterator<Item = (PointId, usize)> + '_ {
        self.scalar_eq.iter().enumerate().filter_map(|(p, eq)| eq.map(|e| (p, e)))
    }

    /// Computes the local-to-global map of a cell
    ///
    /// The local ordering is `m * ndim + i` for the vector field followed by
    /// the scalar field on the first `n_scalar_local` cell points.
    pub fn local_to_global(&self, cell: &Cell, n_scalar_local: usize) -> Result<Vec<usize>, StrError> {
        let nnode = cell.points.len();
        let mut l2g = Vec::with_capacity(nnode * self.ndim + n_scalar_local);
        for p in &cell.points {
            for i in 0..self.ndim {
                l2g.push(self.vector_eq(*p, i));
            }
        }
        for p in &cell.points[0..n_scalar_local] {
            match self.scalar_eq[*p] {
                Some(eq) => l2g.push(eq),
                None => return Err("cannot find the scalar equation of a cell corner"),
            }
        }
        Ok(l2g)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::DofMap;
    use crate::base::SampleMeshes;
    use gemlab::shapes::GeoKind;

    #[test]
    fn vector_numbering_works() {
        let fem = SampleMeshes::rectangle(2, 1, 2.0, 1.0, GeoKind::Qua4, 1).unwrap();
        let dofs = DofMap::vector(&fem.mesh);
        assert_eq!(dofs.n_equation, 12);
        assert_eq!(dofs.vector_eq(4, 1), 9);
        let l2g = dofs.local_to_global(&fem.mesh.cells[1], 0).unwrap();
        assert_eq!(l2g, &[2, 3, 4, 5, 10, 11, 8, 9]);
        assert_eq!(
            dofs.local_to_global(&fem.mesh.cells[1], 1).err(),
            Some("cannot find the scalar equation of a cell corner")
        );
    }

    #[test]
    fn mixed_numbering_works() {
        // 6---7---8
        // |       |
        // 3   4   5
        // |       |
        // 0---1---2
        let fem = SampleMeshes::rectangle(1, 1, 1.0, 1.0, GeoKind::Qua9, 1).unwrap();
        let dofs = DofMap::mixed(&fem.mesh).unwrap();
        assert_eq!(dofs.n_vector, 18);
        assert_eq!(dofs.n_scalar, 4);
        assert_eq!(dofs.n_equation, 22);
        assert_eq!(dofs.scalar_eq(0), Some(18));
        assert_eq!(dofs.scalar_eq(1), None);
        assert_eq!(dofs.scalar_eq(2), Some(19));
        assert_eq!(dofs.scalar_eq(6), Some(20));
        assert_eq!(dofs.scalar_eq(8), Some(21));
        let l2g = dofs.local_to_global(&fem.mesh.cells[0], 4).unwrap();
        assert_eq!(l2g.len(), 22);
        assert_eq!(&l2g[18..], &[18, 19, 21, 20]);
        let points: Vec<_> = dofs.scalar_points().map(|(p, _)| p).collect();
        assert_eq!(points, &[0, 2, 6, 8]);
    }
}
