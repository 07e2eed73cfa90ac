use super::new_nodal_tensor;
use crate::base::{DofMap, FsiError};
use crate::StrError;
use russell_lab::{vec_copy, Vector};
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::Path;

/// Holds the primary and secondary fields of the solid
///
/// The vectors hold all degrees of freedom (`point * ndim + component`).
/// The nodal strain and stress hold one vector per tensor component in the
/// lower-triangle order `(0,0), (1,0), (1,1), (2,0), (2,1), (2,2)`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SolidState {
    /// Time
    pub t: f64,

    /// Displacement at the current step
    pub displacement: Vector,

    /// Velocity at the current step
    pub velocity: Vector,

    /// Acceleration at the current step
    pub acceleration: Vector,

    /// Displacement at the previous step
    pub previous_displacement: Vector,

    /// Velocity at the previous step
    pub previous_velocity: Vector,

    /// Acceleration at the previous step
    pub previous_acceleration: Vector,

    /// Nodal strain components
    pub strain: Vec<Vector>,

    /// Nodal stress components
    pub stress: Vec<Vector>,
}

impl SolidState {
    /// Allocates a zeroed state
    pub fn new(dofs: &DofMap, npoint: usize) -> Self {
        let n = dofs.n_vector;
        SolidState {
            t: 0.0,
            displacement: Vector::new(n),
            velocity: Vector::new(n),
            acceleration: Vector::new(n),
            previous_displacement: Vector::new(n),
            previous_velocity: Vector::new(n),
            previous_acceleration: Vector::new(n),
            strain: new_nodal_tensor(dofs.ndim, npoint),
            stress: new_nodal_tensor(dofs.ndim, npoint),
        }
    }

    /// Returns the number of degrees of freedom
    pub fn ndof(&self) -> usize {
        self.displacement.dim()
    }

    /// Copies the current fields into the previous fields
    pub fn advance(&mut self) {
        self.previous_displacement.as_mut_data().copy_from_slice(self.displacement.as_data());
        self.previous_velocity.as_mut_data().copy_from_slice(self.velocity.as_data());
        self.previous_acceleration.as_mut_data().copy_from_slice(self.acceleration.as_data());
    }

    /// Installs displacement, velocity and acceleration as both the current and previous fields
    pub fn install(&mut self, d: &Vector, v: &Vector, a: &Vector) -> Result<(), FsiError> {
        let n = self.ndof();
        if d.dim() != n || v.dim() != n || a.dim() != n {
            return Err(FsiError::Protocol(format!(
                "solid fields must have {} entries (got {}, {}, {})",
                n,
                d.dim(),
                v.dim(),
                a.dim()
            )));
        }
        vec_copy(&mut self.displacement, d)?;
        vec_copy(&mut self.velocity, v)?;
        vec_copy(&mut self.acceleration, a)?;
        self.advance();
        Ok(())
    }

    /// Reads a JSON file containing the state
    pub fn read_json<P>(full_path: &P) -> Result<Self, StrError>
    where
        P: AsRef<OsStr> + ?Sized,
    {
        let path = Path::new(full_path).to_path_buf();
        let file = File::open(path).map_err(|_| "cannot open file")?;
        let buffered = BufReader::new(file);
        let state = serde_json::from_reader(buffered).map_err(|_| "cannot parse JSON file")?;
        Ok(state)
    }

    /// Writes a JSON file with the state
    pub fn write_json<P>(&self, full_path: &P) -> Result<(), StrError>
    where
        P: AsRef<OsStr> + ?Sized,
    {
        let path = Path::new(full_path).to_path_buf();
        if let Some(p) = path.parent() {
            fs::create_dir_all(p).map_err(|_| "cannot create directory")?;
        }
        let mut file = File::create(&path).map_err(|_| "cannot create file")?;
        serde_json::to_writer(&mut file, &self).map_err(|_| "cannot write file")?;
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
