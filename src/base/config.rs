use super::BoundaryId;
use gemlab::mesh::PointId;
use crate::base::{DEFAULT_DRAG_BOUNDARY, DEFAULT_DRAG_DIAMETER, DEFAULT_DRAG_VELOCITY};
use crate::StrError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Selects constrained directions: bit 0 → x, bit 1 → y, bit 2 → z
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentMask(pub u8);

impl ComponentMask {
    pub const X: ComponentMask = ComponentMask(1);
    pub const Y: ComponentMask = ComponentMask(2);
    pub const XY: ComponentMask = ComponentMask(3);
    pub const Z: ComponentMask = ComponentMask(4);
    pub const XYZ: ComponentMask = ComponentMask(7);

    /// Returns true if the mask selects the component
    pub fn contains(&self, component: usize) -> bool {
        component < 3 && (self.0 >> component) & 1 == 1
    }

    /// Returns true if the mask only selects existing components
    pub fn fits(&self, ndim: usize) -> bool {
        self.0 > 0 && (self.0 as usize) < (1 << ndim)
    }
}

/// Holds the material parameters of one solid region
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ParamSolid {
    /// Young's modulus
    pub young: f64,

    /// Poisson's coefficient
    pub poisson: f64,

    /// Density
    pub density: f64,

    /// Damping parameter controlling the Newmark α (α = -damping)
    pub damping: f64,
}

/// Defines the Neumann condition of a solid boundary
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum SolidTraction {
    /// Constant traction vector
    Vector(Vec<f64>),

    /// Pressure multiplying the outward normal
    Pressure(f64),

    /// Traction received from the fluid through the coupling exchange
    Fsi,
}

/// Constrains the displacement of the mesh vertex located at some coordinates
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PointConstraint {
    pub coords: Vec<f64>,
    pub mask: ComponentMask,
}

/// Selects the penalty coupling of the solid with an external flow code
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PenaltyMode {
    /// No penalty force
    Off,

    /// Penalty force from the velocity difference only
    Explicit,

    /// Penalty force plus the implicit damping matrix ρ/Δt ∫φφ
    Implicit,
}

/// Holds the configuration of the solid integrator
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SolidConfig {
    /// Space dimension
    pub ndim: usize,

    /// Material parameters; the region (cell attribute) id `i` maps to `materials[i-1]`
    pub materials: Vec<ParamSolid>,

    /// Gravity acceleration vector
    pub gravity: Vec<f64>,

    /// Homogeneous Dirichlet conditions
    pub dirichlet: BTreeMap<BoundaryId, ComponentMask>,

    /// Neumann conditions
    pub neumann: BTreeMap<BoundaryId, SolidTraction>,

    /// Constrained vertices
    pub point_constraints: Vec<PointConstraint>,

    /// Initial velocity vector applied at t = 0
    pub initial_velocity: Vec<f64>,

    /// Penalty coupling mode
    pub penalty: PenaltyMode,

    /// Adds the received added-mass diagonal to the effective matrix
    pub added_mass: bool,
}

impl SolidConfig {
    /// Allocates a new instance with default values
    pub fn new(ndim: usize) -> Self {
        SolidConfig {
            ndim,
            materials: Vec::new(),
            gravity: vec![0.0; ndim],
            dirichlet: BTreeMap::new(),
            neumann: BTreeMap::new(),
            point_constraints: Vec::new(),
            initial_velocity: vec![0.0; ndim],
            penalty: PenaltyMode::Off,
            added_mass: false,
        }
    }

    /// Appends the parameters of the next region
    pub fn add_material(&mut self, param: ParamSolid) -> Result<&mut Self, StrError> {
        if param.young <= 0.0 {
            return Err("Young's modulus must be > 0.0");
        }
        if param.poisson <= -1.0 || param.poisson >= 0.5 {
            return Err("Poisson's coefficient must satisfy -1 < ν < 0.5");
        }
        if param.density <= 0.0 {
            return Err("density must be > 0.0");
        }
        if param.damping < 0.0 || param.damping >= 1.0 {
            return Err("damping parameter must satisfy 0 ≤ damping < 1");
        }
        self.materials.push(param);
        Ok(self)
    }

    /// Sets the gravity acceleration vector
    pub fn set_gravity(&mut self, gravity: &[f64]) -> Result<&mut Self, StrError> {
        if gravity.len() != self.ndim {
            return Err("gravity vector must have ndim components");
        }
        self.gravity = gravity.to_vec();
        Ok(self)
    }

    /// Sets a homogeneous Dirichlet condition
    pub fn set_dirichlet(&mut self, boundary_id: BoundaryId, mask: ComponentMask) -> Result<&mut Self, StrError> {
        if !mask.fits(self.ndim) {
            return Err("component mask is incompatible with ndim");
        }
        self.dirichlet.insert(boundary_id, mask);
        Ok(self)
    }

    /// Sets a Neumann condition
    pub fn set_neumann(&mut self, boundary_id: BoundaryId, traction: SolidTraction) -> Result<&mut Self, StrError> {
        if let SolidTraction::Vector(v) = &traction {
            if v.len() != self.ndim {
                return Err("traction vector must have ndim components");
            }
        }
        self.neumann.insert(boundary_id, traction);
        Ok(self)
    }

    /// Constrains the vertex located at the given coordinates
    pub fn add_point_constraint(&mut self, coords: &[f64], mask: ComponentMask) -> Result<&mut Self, StrError> {
        if coords.len() != self.ndim {
            return Err("point constraint must have ndim coordinates");
        }
        if !mask.fits(self.ndim) {
            return Err("component mask is incompatible with ndim");
        }
        self.point_constraints.push(PointConstraint {
            coords: coords.to_vec(),
            mask,
        });
        Ok(self)
    }

    /// Sets the initial velocity vector
    pub fn set_initial_velocity(&mut self, velocity: &[f64]) -> Result<&mut Self, StrError> {
        if velocity.len() != self.ndim {
            return Err("initial velocity must have ndim components");
        }
        self.initial_velocity = velocity.to_vec();
        Ok(self)
    }

    /// Sets the penalty coupling mode
    pub fn set_penalty(&mut self, mode: PenaltyMode) -> Result<&mut Self, StrError> {
        self.penalty = mode;
        Ok(self)
    }

    /// Enables the added-mass term of the external coupling
    pub fn set_added_mass(&mut self, flag: bool) -> Result<&mut Self, StrError> {
        self.added_mass = flag;
        Ok(self)
    }

    /// Returns the (common) damping parameter of all regions
    pub fn damping(&self) -> f64 {
        self.materials.first().map(|p| p.damping).unwrap_or(0.0)
    }

    /// Validates all data
    ///
    /// Returns a message with the inconsistent data, or returns None if everything is all right.
    pub fn validate(&self) -> Option<String> {
        if self.ndim < 2 || self.ndim > 3 {
            return Some(format!("ndim = {} is invalid", self.ndim));
        }
        if self.materials.is_empty() {
            return Some("at least one material must be given".to_string());
        }
        let damping = self.damping();
        if self.materials.iter().any(|p| p.damping != damping) {
            return Some("all regions must share the same damping parameter".to_string());
        }
        if self.gravity.len() != self.ndim || self.initial_velocity.len() != self.ndim {
            return Some("gravity and initial velocity must have ndim components".to_string());
        }
        None
    }
}

/// Defines a velocity condition of the fluid
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum VelocityBc {
    /// No-slip wall
    Zero,

    /// Constant velocity vector
    Constant(Vec<f64>),

    /// Parabolic inflow along x over a channel of given height, ramped in time
    Parabolic {
        max_velocity: f64,
        height: f64,
        ramp_time: f64,
    },
}

impl VelocityBc {
    /// Returns a velocity component at some point and time
    pub fn value(&self, coords: &[f64], time: f64, component: usize) -> f64 {
        match self {
            VelocityBc::Zero => 0.0,
            VelocityBc::Constant(v) => v.get(component).copied().unwrap_or(0.0),
            VelocityBc::Parabolic {
                max_velocity,
                height,
                ramp_time,
            } => {
                if component != 0 {
                    return 0.0;
                }
                let ramp = if *ramp_time > 0.0 {
                    f64::min(time / ramp_time, 1.0)
                } else {
                    1.0
                };
                let y = coords[1];
                4.0 * max_velocity * y * (height - y) / (height * height) * ramp
            }
        }
    }
}

/// Holds the reference data for the drag and lift coefficients
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct DragLift {
    /// Boundary of the immersed body
    pub boundary_id: BoundaryId,

    /// Reference length
    pub diameter: f64,

    /// Reference velocity
    pub reference_velocity: f64,
}

impl Default for DragLift {
    fn default() -> Self {
        DragLift {
            boundary_id: DEFAULT_DRAG_BOUNDARY,
            diameter: DEFAULT_DRAG_DIAMETER,
            reference_velocity: DEFAULT_DRAG_VELOCITY,
        }
    }
}

/// Holds the configuration of the fluid integrator
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FluidConfig {
    /// Space dimension
    pub ndim: usize,

    /// Fluid density ρ_f
    pub fluid_density: f64,

    /// Viscosity ν
    pub viscosity: f64,

    /// Density ρ_s of the immersed solid
    pub solid_density: f64,

    /// Penalty scale θ multiplying the solid inertia in immersed cells
    pub penalty_scale: f64,

    /// Polynomial degree of the velocity interpolation
    pub velocity_degree: usize,

    /// Polynomial degree of the pressure interpolation
    pub pressure_degree: usize,

    /// Gravity acceleration vector
    pub gravity: Vec<f64>,

    /// Velocity conditions
    pub dirichlet: BTreeMap<BoundaryId, VelocityBc>,

    /// Prescribed pressure on open boundaries
    pub neumann_pressure: BTreeMap<BoundaryId, f64>,

    /// The pressure is pinned to zero at the pressure node closest to this point
    pub pressure_anchor: Vec<f64>,

    /// Reference data for the drag and lift coefficients
    pub drag_lift: DragLift,
}

impl FluidConfig {
    /// Allocates a new instance with default values
    pub fn new(ndim: usize) -> Self {
        FluidConfig {
            ndim,
            fluid_density: 1.0,
            viscosity: 1.0,
            solid_density: 1.0,
            penalty_scale: 0.0,
            velocity_degree: 2,
            pressure_degree: 1,
            gravity: vec![0.0; ndim],
            dirichlet: BTreeMap::new(),
            neumann_pressure: BTreeMap::new(),
            pressure_anchor: vec![0.0; ndim],
            drag_lift: DragLift::default(),
        }
    }

    /// Sets the fluid density and viscosity
    pub fn set_fluid(&mut self, density: f64, viscosity: f64) -> Result<&mut Self, StrError> {
        if density <= 0.0 {
            return Err("fluid density must be > 0.0");
        }
        if viscosity <= 0.0 {
            return Err("viscosity must be > 0.0");
        }
        self.fluid_density = density;
        self.viscosity = viscosity;
        Ok(self)
    }

    /// Sets the density of the immersed solid and the penalty scale θ
    pub fn set_immersed_solid(&mut self, density: f64, penalty_scale: f64) -> Result<&mut Self, StrError> {
        if density <= 0.0 {
            return Err("solid density must be > 0.0");
        }
        if penalty_scale < 0.0 {
            return Err("penalty scale must be ≥ 0.0");
        }
        self.solid_density = density;
        self.penalty_scale = penalty_scale;
        Ok(self)
    }

    /// Sets the polynomial degrees of the velocity and pressure interpolations
    pub fn set_degrees(&mut self, velocity: usize, pressure: usize) -> Result<&mut Self, StrError> {
        if velocity < 1 || pressure < 1 {
            return Err("polynomial degrees must be ≥ 1");
        }
        self.velocity_degree = velocity;
        self.pressure_degree = pressure;
        Ok(self)
    }

    /// Sets the gravity acceleration vector
    pub fn set_gravity(&mut self, gravity: &[f64]) -> Result<&mut Self, StrError> {
        if gravity.len() != self.ndim {
            return Err("gravity vector must have ndim components");
        }
        self.gravity = gravity.to_vec();
        Ok(self)
    }

    /// Sets a velocity condition
    pub fn set_dirichlet(&mut self, boundary_id: BoundaryId, bc: VelocityBc) -> Result<&mut Self, StrError> {
        if let VelocityBc::Constant(v) = &bc {
            if v.len() != self.ndim {
                return Err("velocity vector must have ndim components");
            }
        }
        if let VelocityBc::Parabolic { height, .. } = &bc {
            if *height <= 0.0 {
                return Err("channel height must be > 0.0");
            }
        }
        self.dirichlet.insert(boundary_id, bc);
        Ok(self)
    }

    /// Sets a prescribed pressure on an open boundary
    pub fn set_neumann_pressure(&mut self, boundary_id: BoundaryId, pressure: f64) -> Result<&mut Self, StrError> {
        self.neumann_pressure.insert(boundary_id, pressure);
        Ok(self)
    }

    /// Sets the anchor point of the pressure pin
    pub fn set_pressure_anchor(&mut self, coords: &[f64]) -> Result<&mut Self, StrError> {
        if coords.len() != self.ndim {
            return Err("pressure anchor must have ndim coordinates");
        }
        self.pressure_anchor = coords.to_vec();
        Ok(self)
    }

    /// Sets the reference data for the drag and lift coefficients
    pub fn set_drag_lift(&mut self, drag_lift: DragLift) -> Result<&mut Self, StrError> {
        if drag_lift.diameter <= 0.0 || drag_lift.reference_velocity <= 0.0 {
            return Err("drag reference values must be > 0.0");
        }
        self.drag_lift = drag_lift;
        Ok(self)
    }

    /// Returns the mass coefficient of a cell given whether it is pure fluid
    pub fn mass_coefficient(&self, pure_fluid: bool, dt: f64) -> f64 {
        if pure_fluid {
            self.fluid_density / dt
        } else {
            (1.0 + self.penalty_scale) * self.solid_density / dt
        }
    }

    /// Validates all data
    ///
    /// Returns a message with the inconsistent data, or returns None if everything is all right.
    pub fn validate(&self) -> Option<String> {
        if self.ndim < 2 || self.ndim > 3 {
            return Some(format!("ndim = {} is invalid", self.ndim));
        }
        if self.gravity.len() != self.ndim || self.pressure_anchor.len() != self.ndim {
            return Some("gravity and pressure anchor must have ndim components".to_string());
        }
        None
    }
}

/// Lists the mesh points whose values are exchanged with one rank of the external code
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Rank of the external process
    pub rank: usize,

    /// Points of the local mesh, in the order of the message buffers
    pub points: Vec<PointId>,
}

/// Holds the configuration of the coupling with an external flow code
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CouplingConfig {
    /// External processes exchanging data with this process
    pub peers: Vec<PeerConfig>,

    /// The structured grid of the external code carries one layer of ghost cells
    pub ghost_layer: bool,
}

impl CouplingConfig {
    /// Allocates a new instance with default values
    pub fn new() -> Self {
        CouplingConfig {
            peers: Vec::new(),
            ghost_layer: true,
        }
    }

    /// Adds an external process and the points exchanged with it
    pub fn add_peer(&mut self, rank: usize, points: &[PointId]) -> Result<&mut Self, StrError> {
        if points.is_empty() {
            return Err("peer must exchange at least one point");
        }
        if self.peers.iter().any(|p| p.rank == rank) {
            return Err("peer rank is already set");
        }
        self.peers.push(PeerConfig {
            rank,
            points: points.to_vec(),
        });
        Ok(self)
    }

    /// Sets whether the external grid carries a ghost layer
    pub fn set_ghost_layer(&mut self, flag: bool) -> Result<&mut Self, StrError> {
        self.ghost_layer = flag;
        Ok(self)
    }

    /// Validates all data against the local rank and the number of processes
    ///
    /// Returns a message with the inconsistent data, or returns None if everything is all right.
    pub fn validate(&self, rank: usize, size: usize) -> Option<String> {
        for peer in &self.peers {
            if peer.rank == rank {
                return Some(format!("rank {} cannot be its own peer", rank));
            }
            if peer.rank >= size {
                return Some(format!("peer rank {} is out of range (size = {})", peer.rank, size));
            }
        }
        None
    }
}

/// Holds the time stepping parameters
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct TimeConfig {
    /// End time
    pub end_time: f64,

    /// Time step size
    pub delta_t: f64,

    /// Time between outputs (≤ 0 disables the output)
    pub output_interval: f64,

    /// Time between mesh refinements (≤ 0 disables the refinement)
    pub refine_interval: f64,

    /// Time between checkpoints (≤ 0 disables the checkpoints)
    pub save_interval: f64,
}

impl TimeConfig {
    /// Allocates a new instance with outputs at every step and no refinement or checkpoint
    pub fn new(end_time: f64, delta_t: f64) -> Result<Self, StrError> {
        if delta_t <= 0.0 {
            return Err("Δt must be > 0.0");
        }
        if end_time < 0.0 {
            return Err("end time must be ≥ 0.0");
        }
        Ok(TimeConfig {
            end_time,
            delta_t,
            output_interval: delta_t,
            refine_interval: 0.0,
            save_interval: 0.0,
        })
    }

    /// Sets the output, refinement and checkpoint intervals
    pub fn set_intervals(&mut self, output: f64, refine: f64, save: f64) -> Result<&mut Self, StrError> {
        self.output_interval = output;
        self.refine_interval = refine;
        self.save_interval = save;
        Ok(self)
    }

    /// Validates all data
    ///
    /// Returns a message with the inconsistent data, or returns None if everything is all right.
    pub fn validate(&self) -> Option<String> {
        if self.delta_t <= 0.0 {
            return Some(format!("Δt = {:?} is invalid", self.delta_t));
        }
        if self.end_time < 0.0 {
            return Some(format!("end time = {:?} is invalid", self.end_time));
        }
        None
    }
}

impl fmt::Display for SolidConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Solid configuration\n")?;
        write!(f, "===================\n")?;
        write!(f, "ndim = {}\n", self.ndim)?;
        write!(f, "gravity = {:?}\n", self.gravity)?;
        write!(f, "initial_velocity = {:?}\n", self.initial_velocity)?;
        write!(f, "penalty = {:?}\n", self.penalty)?;
        write!(f, "added_mass = {:?}\n", self.added_mass)?;
        for (i, p) in self.materials.iter().enumerate() {
            write!(f, "region {} → {:?}\n", i + 1, p)?;
        }
        for (id, mask) in &self.dirichlet {
            write!(f, "dirichlet {} → {:?}\n", id, mask)?;
        }
        for (id, traction) in &self.neumann {
            write!(f, "neumann {} → {:?}\n", id, traction)?;
        }
        Ok(())
    }
}

impl fmt::Display for FluidConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fluid configuration\n")?;
        write!(f, "===================\n")?;
        write!(f, "ndim = {}\n", self.ndim)?;
        write!(f, "fluid_density = {:?}\n", self.fluid_density)?;
        write!(f, "viscosity = {:?}\n", self.viscosity)?;
        write!(f, "solid_density = {:?}\n", self.solid_density)?;
        write!(f, "penalty_scale = {:?}\n", self.penalty_scale)?;
        write!(f, "degrees (velocity, pressure) = ({}, {})\n", self.velocity_degree, self.pressure_degree)?;
        write!(f, "gravity = {:?}\n", self.gravity)?;
        write!(f, "pressure_anchor = {:?}\n", self.pressure_anchor)?;
        for (id, bc) in &self.dirichlet {
            write!(f, "dirichlet {} → {:?}\n", id, bc)?;
        }
        for (id, p) in &self.neumann_pressure {
            write!(f, "neumann pressure {} → {:?}\n", id, p)?;
        }
        Ok(())
    }
}

impl fmt::Display for CouplingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Coupling configuration\n")?;
        write!(f, "======================\n")?;
        write!(f, "ghost_layer = {:?}\n", self.ghost_layer)?;
        for peer in &self.peers {
            write!(f, "peer {} → {} points\n", peer.rank, peer.points.len())?;
        }
        Ok(())
    }
}

impl fmt::Display for TimeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Time configuration\n")?;
        write!(f, "==================\n")?;
        write!(f, "end_time = {:?}\n", self.end_time)?;
        write!(f, "delta_t = {:?}\n", self.delta_t)?;
        write!(f, "output_interval = {:?}\n", self.output_interval)?;
        write!(f, "refine_interval = {:?}\n", self.refine_interval)?;
        write!(f, "save_interval = {:?}\n", self.save_interval)?;
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
