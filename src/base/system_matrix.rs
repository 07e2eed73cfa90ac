use super::{Communicator, FsiError};
use crate::StrError;
use russell_lab::Vector;
use russell_sparse::{CooMatrix, Sym};

/// Holds a distributed square matrix assembled by several processes
///
/// Each process puts the contributions of the cells it owns as triplets.
/// [SystemMatrix::compress] gathers all triplets so every process ends up
/// with the same global matrix (in COO format) and its diagonal.
pub struct SystemMatrix {
    dim: usize,
    rows: Vec<usize>,
    cols: Vec<usize>,
    values: Vec<f64>,
    coo: Option<CooMatrix>,
    diagonal: Vector,
}

impl SystemMatrix {
    /// Allocates a new (empty) instance
    pub fn new(dim: usize) -> Self {
        SystemMatrix {
            dim,
            rows: Vec::new(),
            cols: Vec::new(),
            values: Vec::new(),
            coo: None,
            diagonal: Vector::new(dim),
        }
    }

    /// Returns the dimension
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Adds a local contribution (duplicates are summed up)
    pub fn put(&mut self, i: usize, j: usize, value: f64) {
        self.rows.push(i);
        self.cols.push(j);
        self.values.push(value);
    }

    /// Clears the local contributions and the compressed matrix
    pub fn reset(&mut self) {
        self.rows.clear();
        self.cols.clear();
        self.values.clear();
        self.coo = None;
        self.diagonal.fill(0.0);
    }

    /// Gathers the contributions of all processes and builds the global matrix
    ///
    /// A unit diagonal is added to each prescribed equation.
    pub fn compress(&mut self, comm: &dyn Communicator, prescribed: &[bool]) -> Result<(), FsiError> {
        if prescribed.len() != self.dim {
            return Err(FsiError::Config(format!(
                "prescribed array has length {} but the matrix dimension is {}",
                prescribed.len(),
                self.dim
            )));
        }
        let mut local = Vec::with_capacity(3 * self.values.len());
        for k in 0..self.values.len() {
            local.push(self.rows[k] as f64);
            local.push(self.cols[k] as f64);
            local.push(self.values[k]);
        }
        let all = comm.all_gather(&local);
        let nnz_local: usize = all.iter().map(|v| v.len() / 3).sum();
        let n_prescribed = prescribed.iter().filter(|p| **p).count();
        let max_nnz = usize::max(nnz_local + n_prescribed, 1);
        let mut coo = CooMatrix::new(self.dim, self.dim, max_nnz, Sym::No)?;
        self.diagonal.fill(0.0);
        for triplets in &all {
            for t in triplets.chunks_exact(3) {
                let (i, j) = (t[0] as usize, t[1] as usize);
                coo.put(i, j, t[2])?;
                if i == j {
                    self.diagonal[i] += t[2];
                }
            }
        }
        for (eq, fixed) in prescribed.iter().enumerate() {
            if *fixed {
                coo.put(eq, eq, 1.0)?;
                self.diagonal[eq] += 1.0;
            }
        }
        self.coo = Some(coo);
        Ok(())
    }

    /// Performs the matrix-vector multiplication `v := α · A · u`
    pub fn mat_vec_mul(&self, v: &mut Vector, alpha: f64, u: &Vector) -> Result<(), StrError> {
        match &self.coo {
            Some(coo) => coo.mat_vec_mul(v, alpha, u),
            None => Err("the matrix must be compressed first"),
        }
    }

    /// Returns the diagonal of the compressed matrix
    pub fn diagonal(&self) -> &Vector {
        &self.diagonal
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::SystemMatrix;
    use crate::base::{Communicator, LocalComm, SerialComm};
    use russell_lab::Vector;
    use std::thread;

    #[test]
    fn requires_compress() {
        let kk = SystemMatrix::new(2);
        let mut v = Vector::new(2);
        let u = Vector::new(2);
        assert_eq!(
            kk.mat_vec_mul(&mut v, 1.0, &u).err(),
            Some("the matrix must be compressed first")
        );
        let mut kk = SystemMatrix::new(2);
        assert!(kk.compress(&SerialComm, &[false]).unwrap_err().is_config());
    }

    #[test]
    fn compress_gathers_all_ranks() {
        let comms = LocalComm::create(2);
        let results: Vec<_> = thread::scope(|s| {
            let handles: Vec<_> = comms
                .iter()
                .map(|comm| {
                    s.spawn(move || {
                        let mut kk = SystemMatrix::new(2);
                        // each rank contributes one element [[1, -1], [-1, 1]]
                        kk.put(0, 0, 1.0);
                        kk.put(0, 1, -1.0);
                        kk.put(1, 0, -1.0);
                        kk.put(1, 1, 1.0);
                        if comm.rank() == 1 {
                            kk.put(1, 1, 3.0);
                        }
                        kk.compress(comm, &[false, false]).unwrap();
                        let u = Vector::from(&[1.0, 2.0]);
                        let mut v = Vector::new(2);
                        kk.mat_vec_mul(&mut v, 1.0, &u).unwrap();
                        (v.as_data().to_vec(), kk.diagonal().as_data().to_vec())
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for (v, d) in results {
            // [[2, -2], [-2, 5]] · [1, 2]
            assert_eq!(v, &[-2.0, 8.0]);
            assert_eq!(d, &[2.0, 5.0]);
        }
    }

    #[test]
    fn reset_works() {
        let mut kk = SystemMatrix::new(1);
        kk.put(0, 0, 4.0);
        kk.compress(&SerialComm, &[false]).unwrap();
        assert_eq!(kk.diagonal().as_data(), &[4.0]);
        kk.reset();
        kk.compress(&SerialComm, &[true]).unwrap();
        assert_eq!(kk.diagonal().as_data(), &[1.0]);
        assert_eq!(kk.dim(), 1);
    }
}
