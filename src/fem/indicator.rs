use crate::base::{FemMesh, FsiError};
use serde::{Deserialize, Serialize};

/// Tags a fluid cell with the material that occupies it
///
/// The tag only selects the coefficients of the cell during assembly; it never
/// changes the connectivity or the constraints.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellIndicator {
    /// Pure fluid (code 0)
    Fluid,

    /// Immersed solid (code 1)
    Solid,

    /// Smoothing layer around the immersed boundary (code 2)
    Artificial,
}

impl CellIndicator {
    /// Returns the numeric code written to the output files
    pub fn code(&self) -> usize {
        match self {
            CellIndicator::Fluid => 0,
            CellIndicator::Solid => 1,
            CellIndicator::Artificial => 2,
        }
    }

    /// Converts a numeric code
    pub fn from_code(code: usize) -> Result<Self, FsiError> {
        match code {
            0 => Ok(CellIndicator::Fluid),
            1 => Ok(CellIndicator::Solid),
            2 => Ok(CellIndicator::Artificial),
            _ => Err(FsiError::Config(format!("indicator code {} is invalid", code))),
        }
    }

    /// Returns true if the cell holds fluid only
    pub fn is_fluid(&self) -> bool {
        *self == CellIndicator::Fluid
    }
}

/// Produces the indicator of every cell of a fluid mesh
///
/// The source is queried before each assembly, thus a moving immersed
/// boundary is followed step by step.
pub trait IndicatorSource {
    /// Writes the indicator of each cell into `indicators` (one entry per cell)
    fn indicators(&self, fem: &FemMesh, indicators: &mut [CellIndicator]) -> Result<(), FsiError>;
}

/// Tags every cell with the same indicator
pub struct UniformIndicator(pub CellIndicator);

impl IndicatorSource for UniformIndicator {
    fn indicators(&self, _fem: &FemMesh, indicators: &mut [CellIndicator]) -> Result<(), FsiError> {
        indicators.fill(self.0);
        Ok(())
    }
}

/// Tags the cells by region (cell attribute)
///
/// Cells whose attribute is not listed are tagged as fluid.
pub struct RegionIndicator {
    pub regions: Vec<(usize, CellIndicator)>,
}

impl IndicatorSource for RegionIndicator {
    fn indicators(&self, fem: &FemMesh, indicators: &mut [CellIndicator]) -> Result<(), FsiError> {
        for cell in &fem.mesh.cells {
            indicators[cell.id] = self
                .regions
                .iter()
                .find(|(attribute, _)| *attribute == cell.attribute)
                .map(|(_, indicator)| *indicator)
                .unwrap_or(CellIndicator::Fluid);
        }
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::{CellIndicator, IndicatorSource, RegionIndicator, UniformIndicator};
    use crate::base::SampleMeshes;
    use gemlab::shapes::GeoKind;

    #[test]
    fn codes_work() {
        for code in 0..3 {
            assert_eq!(CellIndicator::from_code(code).unwrap().code(), code);
        }
        assert_eq!(
            CellIndicator::from_code(3).err().unwrap().to_string(),
            "configuration error: indicator code 3 is invalid"
        );
        assert!(CellIndicator::Fluid.is_fluid());
        assert!(!CellIndicator::Artificial.is_fluid());
    }

    #[test]
    fn sources_work() {
        let mut fem = SampleMeshes::rectangle(3, 1, 3.0, 1.0, GeoKind::Qua4, 1).unwrap();
        fem.mesh.cells[1].attribute = 2;
        let mut ind = vec![CellIndicator::Fluid; 3];
        UniformIndicator(CellIndicator::Artificial).indicators(&fem, &mut ind).unwrap();
        assert_eq!(ind, &[CellIndicator::Artificial; 3]);
        let source = RegionIndicator {
            regions: vec![(2, CellIndicator::Solid)],
        };
        source.indicators(&fem, &mut ind).unwrap();
        assert_eq!(ind, &[CellIndicator::Fluid, CellIndicator::Solid, CellIndicator::Fluid]);
    }
}
