use gemlab::mesh::{CellId, Mesh, PointId};

/// Assigns one owner rank to each cell and each point
///
/// Cells are split in contiguous blocks of ids. A point belongs to the
/// lowest rank owning one of the cells around it, hence every degree of
/// freedom has exactly one owner.
#[derive(Clone, Debug)]
pub struct Partition {
    /// The rank of this process
    pub rank: usize,

    /// The number of processes
    pub size: usize,

    /// Owner of each cell
    cell_owner: Vec<usize>,

    /// Owner of each point
    point_owner: Vec<usize>,
}

impl Partition {
    /// Allocates a new instance
    ///
    /// **Note:** `rank` is clamped to `size - 1`; `size` is at least 1.
    pub fn new(mesh: &Mesh, rank: usize, size: usize) -> Self {
        let size = usize::max(size, 1);
        let rank = usize::min(rank, size - 1);
        let ncell = mesh.cells.len();
        let cell_owner: Vec<_> = (0..ncell).map(|c| c * size / usize::max(ncell, 1)).collect();
        let mut point_owner = vec![usize::MAX; mesh.points.len()];
        for cell in &mesh.cells {
            for p in &cell.points {
                point_owner[*p] = usize::min(point_owner[*p], cell_owner[cell.id]);
            }
        }
        for owner in point_owner.iter_mut() {
            if *owner == usize::MAX {
                *owner = 0;
            }
        }
        Partition {
            rank,
            size,
            cell_owner,
            point_owner,
        }
    }

    /// Allocates a single-process partition
    pub fn serial(mesh: &Mesh) -> Self {
        Partition::new(mesh, 0, 1)
    }

    /// Returns true if this rank owns the cell
    pub fn owns_cell(&self, cell_id: CellId) -> bool {
        self.cell_owner[cell_id] == self.rank
    }

    /// Returns true if this rank owns the point
    pub fn owns_point(&self, point_id: PointId) -> bool {
        self.point_owner[point_id] == self.rank
    }

    /// Returns the owner of a point
    pub fn point_owner(&self, point_id: PointId) -> usize {
        self.point_owner[point_id]
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
