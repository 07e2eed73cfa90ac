use crate::base::{distance, Communicator, DofMap, FemMesh, FsiError, Partition};

/// Holds the pressure equation pinned to zero
///
/// The pressure of the Stokes problem is determined up to a constant unless
/// an open boundary prescribes it; the pin removes this constant.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PressurePin {
    /// Global equation number of the pinned pressure
    pub equation: usize,

    /// Rank owning the pinned pressure node
    pub owner: usize,

    /// Distance between the pinned node and the anchor point
    pub distance: f64,
}

impl PressurePin {
    /// Returns true if this rank adds the constraint
    pub fn is_owner(&self, comm: &dyn Communicator) -> bool {
        self.owner == comm.rank()
    }
}

/// Selects the pressure node closest to the anchor point
///
/// Each rank searches its owned pressure nodes; the global minimum distance
/// wins and ties go to the lowest rank. Within a rank, the first node in
/// point order wins. All ranks return the same pin.
pub fn select_pressure_pin(
    comm: &dyn Communicator,
    fem: &FemMesh,
    dofs: &DofMap,
    partition: &Partition,
    anchor: &[f64],
) -> Result<PressurePin, FsiError> {
    let mut best: Option<(f64, usize)> = None;
    for (point_id, eq) in dofs.scalar_points() {
        if !partition.owns_point(point_id) {
            continue;
        }
        let d = distance(&fem.mesh.points[point_id].coords, anchor);
        match best {
            Some((dist, _)) if d >= dist => (),
            _ => best = Some((d, eq)),
        }
    }
    let local_distance = best.map(|(d, _)| d).unwrap_or(f64::MAX);
    let (dist, owner) = comm.min_loc(local_distance);
    let equation = comm.broadcast_index(owner, best.map(|(_, eq)| eq));
    match equation {
        Some(equation) if dist < f64::MAX => {
            log::debug!(
                "pressure pinned at equation {} (rank {}, distance = {:e})",
                equation,
                owner,
                dist
            );
            Ok(PressurePin {
                equation,
                owner,
                distance: dist,
            })
        }
        _ => Err(FsiError::Config("cannot find a pressure node to pin".to_string())),
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
