use crate::base::{agree, Communicator, FemMesh, FsiError, Partition};
use crate::StrError;
use gemlab::integ::Gauss;
use gemlab::recovery::get_extrap_matrix;
use gemlab::shapes::Scratchpad;
use russell_lab::{mat_mat_mul, Matrix, Vector};

/// Returns the number of components of a symmetric tensor stored as its lower triangle
pub fn n_tensor_component(ndim: usize) -> usize {
    ndim * (ndim + 1) / 2
}

/// Returns the position of the (i,j) component of a symmetric tensor
///
/// The lower triangle is stored row by row: (0,0), (1,0), (1,1), (2,0), (2,1), (2,2).
pub fn tensor_index(i: usize, j: usize) -> usize {
    let (a, b) = if i >= j { (i, j) } else { (j, i) };
    a * (a + 1) / 2 + b
}

/// Allocates the storage of a nodal tensor field (one vector per component)
pub fn new_nodal_tensor(ndim: usize, npoint: usize) -> Vec<Vector> {
    (0..n_tensor_component(ndim)).map(|_| Vector::new(npoint)).collect()
}

/// Extrapolates tensors from the Gauss points to the nodes and averages them
///
/// The value at a node is the arithmetic mean of the extrapolated values of
/// all cells sharing this node.
pub struct NodalRecovery {
    /// Scratchpad of each cell
    pads: Vec<Scratchpad>,

    /// Integration points of each cell
    gauss: Vec<Gauss>,

    /// Extrapolation matrix (nnode, ngauss) of each cell
    extrap: Vec<Matrix>,

    /// Number of cells sharing each point
    count: Vec<usize>,
}

impl NodalRecovery {
    /// Allocates a new instance
    pub fn new(fem: &FemMesh) -> Result<Self, StrError> {
        let ndim = fem.ndim();
        let mut pads = Vec::with_capacity(fem.ncell());
        let mut gauss = Vec::with_capacity(fem.ncell());
        let mut extrap = Vec::with_capacity(fem.ncell());
        for cell in &fem.mesh.cells {
            let mut pad = Scratchpad::new(ndim, cell.kind)?;
            fem.mesh.set_pad(&mut pad, &cell.points);
            let g = Gauss::new(cell.kind);
            extrap.push(get_extrap_matrix(&mut pad, &g)?);
            pads.push(pad);
            gauss.push(g);
        }
        Ok(NodalRecovery {
            pads,
            gauss,
            extrap,
            count: fem.cells_per_point(),
        })
    }

    /// Computes a nodal tensor field
    ///
    /// # Input
    ///
    /// * `calc` -- a `(cell_id, pad, ksi, values)` function computing the tensor
    ///   components at the integration point `ksi` of a cell owned by this rank
    ///
    /// # Output
    ///
    /// * `nodal` -- one vector per tensor component, holding all points
    pub fn recover<F>(
        &mut self,
        fem: &FemMesh,
        partition: &Partition,
        comm: &dyn Communicator,
        nodal: &mut [Vector],
        calc: F,
    ) -> Result<(), FsiError>
    where
        F: FnMut(usize, &mut Scratchpad, &[f64], &mut [f64]) -> Result<(), FsiError>,
    {
        let res = self.accumulate(fem, partition, nodal, calc);
        agree(comm, "nodal recovery", res)?;
        for v in nodal.iter_mut() {
            comm.sum_in_place(v.as_mut_data());
        }
        for (point_id, count) in self.count.iter().enumerate() {
            if *count > 0 {
                for v in nodal.iter_mut() {
                    v[point_id] /= *count as f64;
                }
            }
        }
        Ok(())
    }

    /// Adds the values extrapolated from the cells owned by this rank
    fn accumulate<F>(
        &mut self,
        fem: &FemMesh,
        partition: &Partition,
        nodal: &mut [Vector],
        mut calc: F,
    ) -> Result<(), FsiError>
    where
        F: FnMut(usize, &mut Scratchpad, &[f64], &mut [f64]) -> Result<(), FsiError>,
    {
        let ncomp = nodal.len();
        for v in nodal.iter_mut() {
            v.fill(0.0);
        }
        let mut values = vec![0.0; ncomp];
        for cell in &fem.mesh.cells {
            if !partition.owns_cell(cell.id) {
                continue;
            }
            let gauss = &self.gauss[cell.id];
            let pad = &mut self.pads[cell.id];
            let ngauss = gauss.npoint();
            let mut ten_gauss = Matrix::new(ngauss, ncomp);
            for p in 0..ngauss {
                calc(cell.id, pad, gauss.coords(p), &mut values)?;
                for k in 0..ncomp {
                    ten_gauss.set(p, k, values[k]);
                }
            }
            let mut ten_nodal = Matrix::new(cell.points.len(), ncomp);
            mat_mat_mul(&mut ten_nodal, 1.0, &self.extrap[cell.id], &ten_gauss, 0.0)
                .map_err(FsiError::numerical)?;
            for (m, point_id) in cell.points.iter().enumerate() {
                for k in 0..ncomp {
                    nodal[k][*point_id] += ten_nodal.get(m, k);
                }
            }
        }
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::{n_tensor_component, new_nodal_tensor, tensor_index, NodalRecovery};
    use crate::base::{Partition, SampleMeshes, SerialComm};
    use gemlab::shapes::GeoKind;
    use russell_lab::approx_eq;

    #[test]
    fn tensor_indices_work() {
        assert_eq!(n_tensor_component(2), 3);
        assert_eq!(n_tensor_component(3), 6);
        assert_eq!(tensor_index(0, 0), 0);
        assert_eq!(tensor_index(1, 0), 1);
        assert_eq!(tensor_index(0, 1), 1);
        assert_eq!(tensor_index(1, 1), 2);
        assert_eq!(tensor_index(2, 0), 3);
        assert_eq!(tensor_index(2, 1), 4);
        assert_eq!(tensor_index(2, 2), 5);
    }

    #[test]
    fn recover_averages_constant_fields() {
        let fem = SampleMeshes::rectangle(2, 2, 2.0, 2.0, GeoKind::Qua4, 1).unwrap();
        let partition = Partition::serial(&fem.mesh);
        let mut recovery = NodalRecovery::new(&fem).unwrap();
        let mut nodal = new_nodal_tensor(2, fem.npoint());
        // each cell holds a constant tensor equal to its id
        recovery
            .recover(&fem, &partition, &SerialComm, &mut nodal, |cell_id, _, _, values| {
                values[0] = cell_id as f64;
                values[1] = 1.0;
                values[2] = -2.0;
                Ok(())
            })
            .unwrap();
        // corner (0,0) touches cell 0; center point 4 touches all cells
        approx_eq(nodal[0][0], 0.0, 1e-14);
        approx_eq(nodal[0][4], (0.0 + 1.0 + 2.0 + 3.0) / 4.0, 1e-14);
        approx_eq(nodal[0][1], 0.5, 1e-14);
        for p in 0..fem.npoint() {
            approx_eq(nodal[1][p], 1.0, 1e-14);
            approx_eq(nodal[2][p], -2.0, 1e-14);
        }
    }
}
