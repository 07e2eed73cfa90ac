use crate::base::{FsiError, ParamSolid, SolidConfig};
use russell_tensor::{t4_ddot_t2_update, LinElasticity, Mandel, Tensor2};

/// Implements a linear elastic model (plane-strain in 2D)
pub struct LinearElastic {
    /// Density
    pub density: f64,

    /// First Lamé parameter
    pub lambda: f64,

    /// Shear modulus (second Lamé parameter)
    pub mu: f64,

    /// Elasticity modulus
    pub model: LinElasticity,

    two_dim: bool,
}

impl LinearElastic {
    /// Allocates a new instance
    pub fn new(param: &ParamSolid, two_dim: bool) -> Self {
        let (young, poisson) = (param.young, param.poisson);
        LinearElastic {
            density: param.density,
            lambda: young * poisson / ((1.0 + poisson) * (1.0 - 2.0 * poisson)),
            mu: young / (2.0 * (1.0 + poisson)),
            model: LinElasticity::new(young, poisson, two_dim, false),
            two_dim,
        }
    }

    /// Allocates a zero strain or stress tensor with the representation used by this model
    pub fn new_tensor(&self) -> Tensor2 {
        if self.two_dim {
            Tensor2::new(Mandel::Symmetric2D)
        } else {
            Tensor2::new(Mandel::Symmetric)
        }
    }

    /// Computes the stress tensor given the strain tensor (σ = D : ε)
    pub fn stress(&self, sigma: &mut Tensor2, epsilon: &Tensor2) {
        t4_ddot_t2_update(sigma, 1.0, self.model.get_modulus(), epsilon, 0.0);
    }
}

/// Holds the material models of all regions
///
/// Regions are identified by the cell attribute, starting at 1.
pub struct Materials {
    regions: Vec<LinearElastic>,
}

impl Materials {
    /// Allocates the models of all regions
    pub fn new(config: &SolidConfig) -> Self {
        let two_dim = config.ndim == 2;
        Materials {
            regions: config.materials.iter().map(|p| LinearElastic::new(p, two_dim)).collect(),
        }
    }

    /// Returns the model of a region
    pub fn get(&self, attribute: usize) -> Result<&LinearElastic, FsiError> {
        if attribute < 1 || attribute > self.regions.len() {
            return Err(FsiError::Config(format!(
                "region {} has no material (there are {} materials)",
                attribute,
                self.regions.len()
            )));
        }
        Ok(&self.regions[attribute - 1])
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
