use super::{BoundaryFace, FemMesh};
use crate::StrError;
use gemlab::mesh::{Cell, Mesh, Point};
use gemlab::shapes::GeoKind;

/// Boundary id of the left side (x = 0) of the sample rectangles
pub const LEFT: usize = 0;

/// Boundary id of the right side (x = lx) of the sample rectangles
pub const RIGHT: usize = 1;

/// Boundary id of the bottom side (y = 0) of the sample rectangles
pub const BOTTOM: usize = 2;

/// Boundary id of the top side (y = ly) of the sample rectangles
pub const TOP: usize = 3;

pub struct SampleMeshes {}

impl SampleMeshes {
    /// Generates a structured rectangle with tagged boundary faces
    ///
    /// ```text
    ///        3 (top)
    ///     +---------+
    ///     |         |
    ///   0 |         | 1      (#) boundary ids
    ///     |         |
    ///     +---------+
    ///        2 (bottom)
    /// ```
    ///
    /// The points are numbered row by row starting at the origin and the cells
    /// are numbered row by row as well. Only `Qua4` and `Qua9` are available.
    pub fn rectangle(
        nx: usize,
        ny: usize,
        lx: f64,
        ly: f64,
        kind: GeoKind,
        attribute: usize,
    ) -> Result<FemMesh, StrError> {
        if nx < 1 || ny < 1 {
            return Err("the number of divisions must be at least 1");
        }
        if lx <= 0.0 || ly <= 0.0 {
            return Err("the rectangle dimensions must be positive");
        }
        let step = match kind {
            GeoKind::Qua4 => 1,
            GeoKind::Qua9 => 2,
            _ => return Err("rectangle is only available with Qua4 or Qua9"),
        };

        // lattice of points
        let ni = step * nx + 1;
        let nj = step * ny + 1;
        let id = |i: usize, j: usize| j * ni + i;
        let mut points = Vec::with_capacity(ni * nj);
        for j in 0..nj {
            for i in 0..ni {
                let x = lx * (i as f64) / ((ni - 1) as f64);
                let y = ly * (j as f64) / ((nj - 1) as f64);
                points.push(Point {
                    id: id(i, j),
                    marker: 0,
                    coords: vec![x, y],
                });
            }
        }

        // cells and boundary faces
        let (face_kind, s) = if step == 1 { (GeoKind::Lin2, 1) } else { (GeoKind::Lin3, 2) };
        let edge = |a: (usize, usize), b: (usize, usize)| {
            let mut pts = vec![id(a.0, a.1), id(b.0, b.1)];
            if step == 2 {
                pts.push(id((a.0 + b.0) / 2, (a.1 + b.1) / 2));
            }
            pts
        };
        let mut cells = Vec::with_capacity(nx * ny);
        let mut faces = Vec::new();
        for cj in 0..ny {
            for ci in 0..nx {
                let cell_id = cj * nx + ci;
                let (a, b) = (s * ci, s * cj);
                let cell_points = if step == 1 {
                    vec![id(a, b), id(a + 1, b), id(a + 1, b + 1), id(a, b + 1)]
                } else {
                    vec![
                        id(a, b),
                        id(a + 2, b),
                        id(a + 2, b + 2),
                        id(a, b + 2),
                        id(a + 1, b),
                        id(a + 2, b + 1),
                        id(a + 1, b + 2),
                        id(a, b + 1),
                        id(a + 1, b + 1),
                    ]
                };
                cells.push(Cell {
                    id: cell_id,
                    attribute,
                    kind,
                    points: cell_points,
                });
                let mut add = |boundary_id: usize, points: Vec<usize>| {
                    faces.push(BoundaryFace {
                        boundary_id,
                        cell_id,
                        kind: face_kind,
                        points,
                    })
                };
                if cj == 0 {
                    add(BOTTOM, edge((a, b), (a + s, b)));
                }
                if ci == nx - 1 {
                    add(RIGHT, edge((a + s, b), (a + s, b + s)));
                }
                if cj == ny - 1 {
                    add(TOP, edge((a + s, b + s), (a, b + s)));
                }
                if ci == 0 {
                    add(LEFT, edge((a, b + s), (a, b)));
                }
            }
        }
        FemMesh::new(
            Mesh {
                ndim: 2,
                points,
                cells,
            },
            faces,
        )
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
