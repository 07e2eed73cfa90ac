use super::{FieldInterpolator, FieldSnapshot, Side};
use crate::base::{corner_kind, FemMesh, FsiError, POINT_MATCH_TOLERANCE};
use crate::fem::{CellIndicator, IndicatorSource};
use gemlab::mesh::PointId;
use gemlab::shapes::{GeoKind, Scratchpad};
use russell_lab::Vector;

/// Maximum number of iterations of the inverse isoparametric mapping
const LOCATE_NIT_MAX: usize = 30;

/// Tolerance on the coordinates of the inverse isoparametric mapping
const LOCATE_TOLERANCE: f64 = 1e-12;

/// Tolerance on the reference coordinates when testing if a point is inside a cell
const KSI_TOLERANCE: f64 = 1e-8;

/// Holds the source points and shape-function values reconstructing one target point
type Weights = Vec<(PointId, f64)>;

/// Maps the nodal fields between the solid and fluid meshes
///
/// Coincident vertices are matched directly. Every other point is located in
/// a cell of the opposite mesh by inverting the isoparametric mapping, and
/// receives the field interpolated by the shape functions of that cell.
/// Points outside the opposite mesh receive zero.
///
/// The map also tags the fluid cells: a cell whose corners are all matched and
/// whose center lies within a solid cell is [CellIndicator::Solid]; a cell
/// with some matched corners is [CellIndicator::Artificial] (the layer around
/// the immersed boundary); the other cells are [CellIndicator::Fluid].
#[derive(Clone, Debug)]
pub struct NodeMap {
    /// Fluid point matching each solid point
    solid_to_fluid: Vec<Option<PointId>>,

    /// Solid point matching each fluid point
    fluid_to_solid: Vec<Option<PointId>>,

    /// Weights reconstructing each solid point from the fluid points
    solid_weights: Vec<Weights>,

    /// Weights reconstructing each fluid point from the solid points
    fluid_weights: Vec<Weights>,

    /// Indicator of each fluid cell
    indicators: Vec<CellIndicator>,
}

impl NodeMap {
    /// Allocates a new instance
    pub fn new(solid: &FemMesh, fluid: &FemMesh) -> Result<Self, FsiError> {
        let ndim = solid.ndim();
        if fluid.ndim() != ndim {
            return Err(FsiError::Config(format!(
                "solid mesh has ndim = {} but the fluid mesh has ndim = {}",
                ndim,
                fluid.ndim()
            )));
        }
        let mut solid_to_fluid = vec![None; solid.npoint()];
        let mut fluid_to_solid = vec![None; fluid.npoint()];
        for point in &solid.mesh.points {
            if let Some(f) = fluid.find_point(&point.coords) {
                solid_to_fluid[point.id] = Some(f);
                fluid_to_solid[f] = Some(point.id);
            }
        }
        let solid_locator = CellLocator::new(solid)?;
        let fluid_locator = CellLocator::new(fluid)?;
        let solid_weights = fluid_locator.weights(solid, &solid_to_fluid);
        let fluid_weights = solid_locator.weights(fluid, &fluid_to_solid);

        let mut indicators = vec![CellIndicator::Fluid; fluid.ncell()];
        for cell in &fluid.mesh.cells {
            let ncorner = corner_kind(cell.kind)?.nnode();
            let corners = &cell.points[0..ncorner];
            let matched = corners.iter().filter(|p| fluid_to_solid[**p].is_some()).count();
            if matched == 0 {
                continue;
            }
            let mut center = vec![0.0; ndim];
            for p in corners {
                for i in 0..ndim {
                    center[i] += fluid.mesh.points[*p].coords[i] / (ncorner as f64);
                }
            }
            let inside = solid_locator.boxes.iter().any(|(min, max)| in_box(&center, min, max));
            indicators[cell.id] = if matched == ncorner && inside {
                CellIndicator::Solid
            } else {
                CellIndicator::Artificial
            };
        }
        Ok(NodeMap {
            solid_to_fluid,
            fluid_to_solid,
            solid_weights,
            fluid_weights,
            indicators,
        })
    }

    /// Returns the number of matched vertices
    pub fn n_matched(&self) -> usize {
        self.solid_to_fluid.iter().filter(|f| f.is_some()).count()
    }

    /// Returns the number of fluid points receiving the solid fields
    pub fn n_covered(&self) -> usize {
        self.fluid_weights.iter().filter(|w| !w.is_empty()).count()
    }

    /// Returns the fluid point coinciding with a solid point
    pub fn fluid_point(&self, solid_point: PointId) -> Option<PointId> {
        self.solid_to_fluid.get(solid_point).copied().flatten()
    }

    /// Returns the solid point coinciding with a fluid point
    pub fn solid_point(&self, fluid_point: PointId) -> Option<PointId> {
        self.fluid_to_solid.get(fluid_point).copied().flatten()
    }

    /// Returns the indicator of each fluid cell
    pub fn cell_indicators(&self) -> &[CellIndicator] {
        &self.indicators
    }
}

impl FieldInterpolator for NodeMap {
    fn interpolate(&self, source: &FieldSnapshot) -> Result<FieldSnapshot, FsiError> {
        let (weights, n_source) = match source.side {
            Side::Solid => (&self.fluid_weights, self.solid_to_fluid.len()),
            Side::Fluid => (&self.solid_weights, self.fluid_to_solid.len()),
        };
        if source.npoint() != n_source {
            return Err(FsiError::Protocol(format!(
                "{:?} field has {} points but the {:?} mesh has {}",
                source.side,
                source.npoint(),
                source.side,
                n_source
            )));
        }
        let ncomp = source.ncomp;
        let mut target = FieldSnapshot::new(source.side.other(), ncomp, weights.len());
        for (t, w) in weights.iter().enumerate() {
            for (s, n) in w {
                for k in 0..ncomp {
                    target.values[t * ncomp + k] += n * source.values[s * ncomp + k];
                }
            }
        }
        Ok(target)
    }
}

/// Finds the cell of a mesh containing a given point
struct CellLocator<'b> {
    fem: &'b FemMesh,
    boxes: Vec<(Vec<f64>, Vec<f64>)>,
    pads: Vec<Scratchpad>,
}

impl<'b> CellLocator<'b> {
    fn new(fem: &'b FemMesh) -> Result<Self, FsiError> {
        let ndim = fem.ndim();
        let mut boxes = Vec::with_capacity(fem.ncell());
        let mut pads = Vec::with_capacity(fem.ncell());
        for cell in &fem.mesh.cells {
            let mut min = vec![f64::MAX; ndim];
            let mut max = vec![f64::MIN; ndim];
            for p in &cell.points {
                for i in 0..ndim {
                    min[i] = f64::min(min[i], fem.mesh.points[*p].coords[i]);
                    max[i] = f64::max(max[i], fem.mesh.points[*p].coords[i]);
                }
            }
            boxes.push((min, max));
            let mut pad = Scratchpad::new(ndim, cell.kind)?;
            fem.mesh.set_pad(&mut pad, &cell.points);
            pads.push(pad);
        }
        Ok(CellLocator { fem, boxes, pads })
    }

    /// Computes the weights of every point of the target mesh
    ///
    /// Matched points take the value of the coincident point.
    fn weights(&self, target: &FemMesh, matched: &[Option<PointId>]) -> Vec<Weights> {
        target
            .mesh
            .points
            .iter()
            .map(|point| match matched[point.id] {
                Some(s) => vec![(s, 1.0)],
                None => self.locate(&point.coords).unwrap_or_default(),
            })
            .collect()
    }

    /// Returns the shape-function weights at x of the first cell containing x
    fn locate(&self, x: &[f64]) -> Option<Weights> {
        let xx = Vector::from(&x);
        for cell in &self.fem.mesh.cells {
            let (min, max) = &self.boxes[cell.id];
            if !in_box(x, min, max) {
                continue;
            }
            // the pad is cloned because the inverse mapping overwrites its work arrays
            let mut pad = self.pads[cell.id].clone();
            let mut ksi = vec![0.0; x.len()];
            if pad
                .approximate_ksi(&mut ksi, &xx, LOCATE_NIT_MAX, LOCATE_TOLERANCE)
                .is_err()
            {
                continue;
            }
            if !in_reference(cell.kind, &ksi) {
                continue;
            }
            (pad.fn_interp)(&mut pad.interp, &ksi);
            let weights = cell
                .points
                .iter()
                .enumerate()
                .map(|(m, p)| (*p, pad.interp[m]))
                .collect();
            return Some(weights);
        }
        None
    }
}

/// Tells whether x lies within a bounding box
fn in_box(x: &[f64], min: &[f64], max: &[f64]) -> bool {
    (0..x.len()).all(|i| x[i] >= min[i] - POINT_MATCH_TOLERANCE && x[i] <= max[i] + POINT_MATCH_TOLERANCE)
}

/// Tells whether the reference coordinates lie within the reference element
fn in_reference(kind: GeoKind, ksi: &[f64]) -> bool {
    if kind.is_tri_or_tet() {
        ksi.iter().all(|k| *k >= -KSI_TOLERANCE) && ksi.iter().sum::<f64>() <= 1.0 + KSI_TOLERANCE
    } else {
        ksi.iter().all(|k| f64::abs(*k) <= 1.0 + KSI_TOLERANCE)
    }
}

impl IndicatorSource for NodeMap {
    fn indicators(&self, fem: &FemMesh, indicators: &mut [CellIndicator]) -> Result<(), FsiError> {
        if fem.ncell() != self.indicators.len() || indicators.len() != self.indicators.len() {
            return Err(FsiError::Protocol(format!(
                "node map holds {} fluid cells but the fluid mesh has {}",
                self.indicators.len(),
                fem.ncell()
            )));
        }
        indicators.copy_from_slice(&self.indicators);
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::NodeMap;
    use crate::base::SampleMeshes;
    use crate::coupling::{FieldInterpolator, FieldSnapshot, Side};
    use crate::fem::{CellIndicator, IndicatorSource};
    use gemlab::shapes::GeoKind;
    use russell_lab::{approx_eq, Vector};

    #[test]
    fn matching_and_indicators_work() {
        // solid: unit square; fluid: 2 × 2 cells over [0,2]²
        let solid = SampleMeshes::rectangle(1, 1, 1.0, 1.0, GeoKind::Qua4, 1).unwrap();
        let fluid = SampleMeshes::rectangle(2, 2, 2.0, 2.0, GeoKind::Qua9, 1).unwrap();
        let map = NodeMap::new(&solid, &fluid).unwrap();
        assert_eq!(map.n_matched(), 4);
        // fluid lattice has 5 points per row
        assert_eq!(map.fluid_point(0), Some(0));
        assert_eq!(map.fluid_point(1), Some(2));
        assert_eq!(map.fluid_point(2), Some(10));
        assert_eq!(map.fluid_point(3), Some(12));
        assert_eq!(map.solid_point(12), Some(3));
        assert_eq!(map.solid_point(1), None);
        // the 9 fluid points of the lower-left cell lie within the solid
        assert_eq!(map.n_covered(), 9);
        assert_eq!(
            map.cell_indicators(),
            &[
                CellIndicator::Solid,
                CellIndicator::Artificial,
                CellIndicator::Artificial,
                CellIndicator::Artificial
            ]
        );
        let mut ind = vec![CellIndicator::Fluid; 4];
        map.indicators(&fluid, &mut ind).unwrap();
        assert_eq!(ind[0], CellIndicator::Solid);
        assert!(map.indicators(&solid, &mut ind[0..1]).unwrap_err().is_protocol());
    }

    #[test]
    fn interpolate_works() {
        let solid = SampleMeshes::rectangle(1, 1, 1.0, 1.0, GeoKind::Qua4, 1).unwrap();
        let fluid = SampleMeshes::rectangle(2, 2, 2.0, 2.0, GeoKind::Qua9, 1).unwrap();
        let map = NodeMap::new(&solid, &fluid).unwrap();

        // solid → fluid
        let values = Vector::from(&[1.0, 10.0, 2.0, 20.0, 3.0, 30.0, 4.0, 40.0]);
        let source = FieldSnapshot::from_nodal(Side::Solid, 2, &values).unwrap();
        let target = map.interpolate(&source).unwrap();
        assert_eq!(target.side, Side::Fluid);
        assert_eq!(target.npoint(), 25);
        assert_eq!(target.get(2, 1), 20.0);
        assert_eq!(target.get(12, 0), 4.0);
        // fluid points within the solid but not coinciding with a solid vertex
        approx_eq(target.get(1, 0), 1.5, 1e-14);
        approx_eq(target.get(1, 1), 15.0, 1e-13);
        approx_eq(target.get(6, 0), 2.5, 1e-14);
        approx_eq(target.get(7, 1), 30.0, 1e-13);
        // fluid points outside the solid
        assert_eq!(target.get(3, 0), 0.0);
        assert_eq!(target.get(24, 1), 0.0);

        // fluid → solid
        let mut values = Vector::new(25);
        values[10] = 7.0;
        let source = FieldSnapshot::from_nodal(Side::Fluid, 1, &values).unwrap();
        let target = map.interpolate(&source).unwrap();
        assert_eq!(target.values.as_data(), &[0.0, 0.0, 7.0, 0.0]);

        // wrong size
        let source = FieldSnapshot::from_nodal(Side::Fluid, 1, &Vector::new(4)).unwrap();
        assert!(map.interpolate(&source).unwrap_err().is_protocol());
    }

    #[test]
    fn interpolate_locates_points_inside_cells() {
        // solid: one Qua4 over [0,1]²; fluid: one Qua9 over the same square
        let solid = SampleMeshes::rectangle(1, 1, 1.0, 1.0, GeoKind::Qua4, 1).unwrap();
        let fluid = SampleMeshes::rectangle(1, 1, 1.0, 1.0, GeoKind::Qua9, 1).unwrap();
        let map = NodeMap::new(&solid, &fluid).unwrap();
        assert_eq!(map.n_matched(), 4);
        assert_eq!(map.n_covered(), 9);

        // a linear field is reproduced at the midside and center points
        let values = Vector::from(&[
            1.0 + 2.0 * 0.0 + 3.0 * 0.0,
            1.0 + 2.0 * 1.0 + 3.0 * 0.0,
            1.0 + 2.0 * 0.0 + 3.0 * 1.0,
            1.0 + 2.0 * 1.0 + 3.0 * 1.0,
        ]);
        let source = FieldSnapshot::from_nodal(Side::Solid, 1, &values).unwrap();
        let target = map.interpolate(&source).unwrap();
        for point in &fluid.mesh.points {
            let (x, y) = (point.coords[0], point.coords[1]);
            approx_eq(target.get(point.id, 0), 1.0 + 2.0 * x + 3.0 * y, 1e-13);
        }

        // a Qua4 fluid mesh finer than the solid
        let solid = SampleMeshes::rectangle(1, 1, 1.0, 1.0, GeoKind::Qua4, 1).unwrap();
        let fluid = SampleMeshes::rectangle(4, 4, 1.0, 1.0, GeoKind::Qua4, 1).unwrap();
        let map = NodeMap::new(&solid, &fluid).unwrap();
        assert_eq!(map.n_covered(), 25);
        let source = FieldSnapshot::from_nodal(Side::Solid, 1, &values).unwrap();
        let target = map.interpolate(&source).unwrap();
        for point in &fluid.mesh.points {
            let (x, y) = (point.coords[0], point.coords[1]);
            approx_eq(target.get(point.id, 0), 1.0 + 2.0 * x + 3.0 * y, 1e-13);
        }

        // fluid → solid: the solid vertices coincide with fluid vertices
        let mut values = Vector::new(25);
        values[24] = 5.0;
        let source = FieldSnapshot::from_nodal(Side::Fluid, 1, &values).unwrap();
        let target = map.interpolate(&source).unwrap();
        assert_eq!(target.values.as_data(), &[0.0, 0.0, 0.0, 5.0]);
    }

    #[test]
    fn new_captures_errors() {
        let solid = SampleMeshes::rectangle(1, 1, 1.0, 1.0, GeoKind::Qua4, 1).unwrap();
        let mut fluid = solid.clone();
        for point in fluid.mesh.points.iter_mut() {
            point.coords.push(0.0);
        }
        fluid.mesh.ndim = 3;
        assert!(NodeMap::new(&solid, &fluid).unwrap_err().is_config());
    }
}
