use super::{calculate_strain, conjugate_gradient, n_tensor_component, tensor_index, DiagnosticsSink, Identity};
use super::{Integrator, Newmark, NodalRecovery, OutputWriter, Refiner, SolidState, TimeState};
use crate::base::{agree, assemble_matrix, assemble_vector, Communicator, DofMap, FemMesh, FsiError, Partition};
use crate::base::{PenaltyMode, SolidConfig, SolidTraction, SystemMatrix, SOLID_SOLVER_TOLERANCE};
use crate::material::Materials;
use crate::StrError;
use gemlab::integ::{self, Gauss};
use gemlab::shapes::Scratchpad;
use russell_lab::{Matrix, Vector};

/// Header of the kinetic energy channel
const KE_HEADER: &str = "Time\tSolid KE Rate\tSolid KE";

/// Header of the potential energy rate channel
const PE_HEADER: &str = "Time\tSolid PE Rate";

/// Holds the local matrices of a solid cell
pub struct LocalSolidMatrices {
    /// Stiffness (deviatoric part plus volumetric part)
    pub stiffness: Matrix,

    /// Consistent mass ρ ∫ NᵐNⁿ δᵢⱼ
    pub mass: Matrix,

    /// Lumped mass (row sums of the consistent mass)
    pub lumped_mass: Vector,
}

/// Calculates the stiffness and mass matrices of a cell
///
/// The deviatoric part `2μ sym∇φ : sym∇φ` uses the given integration points.
/// The volumetric part `λ (∇·φ)(∇·φ)` uses the single-point rule `reduced`
/// if given (selective reduced integration) or the same points otherwise.
///
/// The local ordering of the equations is `m * ndim + i`.
pub fn calc_local_solid_matrices(
    pad: &mut Scratchpad,
    gauss: &Gauss,
    reduced: Option<&Gauss>,
    lambda: f64,
    mu: f64,
    density: f64,
) -> Result<LocalSolidMatrices, StrError> {
    let (ndim, nnode) = pad.xxt.dims();
    let neq = ndim * nnode;
    let mut kk = Matrix::new(neq, neq);
    let mut mm = Matrix::new(neq, neq);
    for p in 0..gauss.npoint() {
        let ksi = gauss.coords(p);
        (pad.fn_interp)(&mut pad.interp, ksi);
        let det_jac = pad.calc_gradient(ksi)?;
        let coef = gauss.weight(p) * det_jac;
        for m in 0..nnode {
            for n in 0..nnode {
                let nn = density * pad.interp[m] * pad.interp[n] * coef;
                let mut gg = 0.0;
                for k in 0..ndim {
                    gg += pad.gradient.get(m, k) * pad.gradient.get(n, k);
                }
                for i in 0..ndim {
                    mm.add(m * ndim + i, n * ndim + i, nn);
                    for j in 0..ndim {
                        let delta = if i == j { gg } else { 0.0 };
                        let mut value = mu * (delta + pad.gradient.get(m, j) * pad.gradient.get(n, i));
                        if reduced.is_none() {
                            value += lambda * pad.gradient.get(m, i) * pad.gradient.get(n, j);
                        }
                        kk.add(m * ndim + i, n * ndim + j, value * coef);
                    }
                }
            }
        }
    }
    if let Some(rule) = reduced {
        for p in 0..rule.npoint() {
            let ksi = rule.coords(p);
            let det_jac = pad.calc_gradient(ksi)?;
            let coef = rule.weight(p) * det_jac;
            for m in 0..nnode {
                for n in 0..nnode {
                    for i in 0..ndim {
                        for j in 0..ndim {
                            let value = lambda * pad.gradient.get(m, i) * pad.gradient.get(n, j);
                            kk.add(m * ndim + i, n * ndim + j, value * coef);
                        }
                    }
                }
            }
        }
    }
    let mut lumped = Vector::new(neq);
    for l in 0..neq {
        for ll in 0..neq {
            lumped[l] += mm.get(l, ll);
        }
    }
    Ok(LocalSolidMatrices {
        stiffness: kk,
        mass: mm,
        lumped_mass: lumped,
    })
}

/// Holds the mesh-dependent data of the solid
struct SolidSpace {
    fem: FemMesh,
    partition: Partition,
    dofs: DofMap,
    prescribed: Vec<bool>,
    pads: Vec<Scratchpad>,
    gauss: Vec<Gauss>,
    reduced: Vec<Option<Gauss>>,
    local_to_global: Vec<Vec<usize>>,
    face_pads: Vec<(usize, Scratchpad, Gauss)>,
    recovery: NodalRecovery,
}

impl SolidSpace {
    fn new(fem: FemMesh, config: &SolidConfig, rank: usize, size: usize) -> Result<Self, FsiError> {
        let ndim = fem.ndim();
        if ndim != config.ndim {
            return Err(FsiError::Config(format!(
                "mesh has ndim = {} but the solid configuration has ndim = {}",
                ndim, config.ndim
            )));
        }
        let partition = Partition::new(&fem.mesh, rank, size);
        let dofs = DofMap::vector(&fem.mesh);

        // homogeneous Dirichlet conditions
        let mut prescribed = vec![false; dofs.n_equation];
        for (boundary_id, mask) in &config.dirichlet {
            for p in fem.boundary_points(*boundary_id) {
                for i in 0..ndim {
                    if mask.contains(i) {
                        prescribed[dofs.vector_eq(p, i)] = true;
                    }
                }
            }
        }
        for constraint in &config.point_constraints {
            let p = fem.find_point(&constraint.coords).ok_or_else(|| {
                FsiError::Config(format!("cannot find a mesh vertex at {:?}", constraint.coords))
            })?;
            for i in 0..ndim {
                if constraint.mask.contains(i) {
                    prescribed[dofs.vector_eq(p, i)] = true;
                }
            }
        }

        // cells
        let ncell = fem.ncell();
        let mut pads = Vec::with_capacity(ncell);
        let mut gauss = Vec::with_capacity(ncell);
        let mut reduced = Vec::with_capacity(ncell);
        let mut local_to_global = Vec::with_capacity(ncell);
        for cell in &fem.mesh.cells {
            let mut pad = Scratchpad::new(ndim, cell.kind)?;
            fem.mesh.set_pad(&mut pad, &cell.points);
            let g = Gauss::new(cell.kind);
            reduced.push(if g.npoint() > 1 {
                Some(Gauss::new_or_sized(cell.kind, Some(1))?)
            } else {
                None
            });
            pads.push(pad);
            gauss.push(g);
            local_to_global.push(dofs.local_to_global(cell, 0)?);
        }

        // faces with Neumann conditions (skipped if the boundary is clamped)
        let mut face_pads = Vec::new();
        for (index, face) in fem.faces.iter().enumerate() {
            if !config.neumann.contains_key(&face.boundary_id) || config.dirichlet.contains_key(&face.boundary_id) {
                continue;
            }
            if !partition.owns_cell(face.cell_id) {
                continue;
            }
            let mut pad = Scratchpad::new(ndim, face.kind)?;
            fem.mesh.set_pad(&mut pad, &face.points);
            face_pads.push((index, pad, Gauss::new(face.kind)));
        }

        let recovery = NodalRecovery::new(&fem)?;
        Ok(SolidSpace {
            fem,
            partition,
            dofs,
            prescribed,
            pads,
            gauss,
            reduced,
            local_to_global,
            face_pads,
            recovery,
        })
    }
}

/// Implements the solid integrator (Newmark α-method with lumped mass)
///
/// Each step solves `M_eff aₙ₊₁ = F_eff` with
///
/// ```text
/// M_eff = M + Δt²β(1+α) K [+ diag(added mass)] [+ γΔt C]
/// F_eff = F - K (dₙ + Δt(1+α)vₙ + (0.5-β)Δt²(1+α)aₙ) [- C vₙ - Δt(1-γ) C aₙ]
/// ```
///
/// where M is the lumped mass and C = (ρ/Δt) ∫ φφ is the damping matrix of
/// the implicit penalty coupling. Step 0 solves `M a₀ = F₀` instead.
pub struct SolidIntegrator<'a> {
    comm: &'a dyn Communicator,
    config: SolidConfig,
    materials: Materials,
    newmark: Newmark,
    space: SolidSpace,

    /// Holds the state
    pub state: SolidState,

    /// Local stiffness of the owned cells (None for the other cells)
    local_stiffness: Vec<Option<Matrix>>,

    /// Local consistent mass of the owned cells, used by the damping matrix
    local_mass: Vec<Option<Matrix>>,

    /// Lumped mass of each degree of freedom (summed over all processes)
    nodal_mass: Vector,

    stiffness: SystemMatrix,
    damping: SystemMatrix,
    effective: SystemMatrix,

    /// External force vector (summed over all processes)
    force: Vector,

    added_mass: Option<Vector>,
    velocity_difference: Option<Vector>,
    fsi_stress: Option<Vec<Vector>>,
    sink: DiagnosticsSink,
    initialized: bool,
}

impl<'a> SolidIntegrator<'a> {
    /// Allocates a new instance
    pub fn new(
        comm: &'a dyn Communicator,
        fem: FemMesh,
        config: &SolidConfig,
        sink: DiagnosticsSink,
    ) -> Result<Self, FsiError> {
        if let Some(message) = config.validate() {
            return Err(FsiError::Config(message));
        }
        let newmark = Newmark::new(config.damping())?;
        let space = SolidSpace::new(fem, config, comm.rank(), comm.size())?;
        let n = space.dofs.n_equation;
        let ncell = space.fem.ncell();
        let mut state = SolidState::new(&space.dofs, space.fem.npoint());
        apply_initial_velocity(&mut state, &space, config);
        Ok(SolidIntegrator {
            comm,
            config: config.clone(),
            materials: Materials::new(config),
            newmark,
            space,
            state,
            local_stiffness: (0..ncell).map(|_| None).collect(),
            local_mass: (0..ncell).map(|_| None).collect(),
            nodal_mass: Vector::new(n),
            stiffness: SystemMatrix::new(n),
            damping: SystemMatrix::new(n),
            effective: SystemMatrix::new(n),
            force: Vector::new(n),
            added_mass: None,
            velocity_difference: None,
            fsi_stress: None,
            sink,
            initialized: false,
        })
    }

    /// Returns the mesh
    pub fn fem(&self) -> &FemMesh {
        &self.space.fem
    }

    /// Returns the numbering of the degrees of freedom
    pub fn dofs(&self) -> &DofMap {
        &self.space.dofs
    }

    /// Returns the partition of cells and points
    pub fn partition(&self) -> &Partition {
        &self.space.partition
    }

    /// Returns the prescribed flags of all equations
    pub fn prescribed(&self) -> &[bool] {
        &self.space.prescribed
    }

    /// Returns the configuration
    pub fn config(&self) -> &SolidConfig {
        &self.config
    }

    /// Returns the lumped mass of each degree of freedom
    pub fn nodal_mass(&self) -> &Vector {
        &self.nodal_mass
    }

    /// Returns the external force vector of the current step
    pub fn force(&self) -> &Vector {
        &self.force
    }

    /// Sets the added-mass diagonal received from the external flow code
    pub fn set_added_mass(&mut self, added_mass: Vector) -> Result<(), FsiError> {
        self.check_len("added mass", added_mass.dim())?;
        self.added_mass = Some(added_mass);
        Ok(())
    }

    /// Sets the velocity difference (fluid minus solid) driving the penalty force
    pub fn set_velocity_difference(&mut self, velocity_difference: Vector) -> Result<(), FsiError> {
        self.check_len("velocity difference", velocity_difference.dim())?;
        self.velocity_difference = Some(velocity_difference);
        Ok(())
    }

    /// Sets the nodal fluid stress (lower-triangle components) used on FSI boundaries
    pub fn set_fsi_stress(&mut self, stress: Vec<Vector>) -> Result<(), FsiError> {
        let ncomp = n_tensor_component(self.space.dofs.ndim);
        let npoint = self.space.fem.npoint();
        if stress.len() != ncomp || stress.iter().any(|s| s.dim() != npoint) {
            return Err(FsiError::Protocol(format!(
                "FSI stress must have {} components with {} values each",
                ncomp, npoint
            )));
        }
        self.fsi_stress = Some(stress);
        Ok(())
    }

    fn check_len(&self, what: &str, len: usize) -> Result<(), FsiError> {
        let n = self.space.dofs.n_equation;
        if len != n {
            return Err(FsiError::Protocol(format!("{} has {} values but the solid has {} DOFs", what, len, n)));
        }
        Ok(())
    }

    fn implicit_penalty(&self) -> bool {
        self.config.penalty == PenaltyMode::Implicit
    }

    /// Assembles the local matrices, the stiffness matrix and the lumped mass
    fn assemble_matrices(&mut self) -> Result<(), FsiError> {
        let res = self.assemble_owned_cells();
        agree(self.comm, "solid matrix assembly", res)?;
        self.comm.sum_in_place(self.nodal_mass.as_mut_data());
        self.stiffness.compress(self.comm, &self.space.prescribed)?;
        self.damping.compress(self.comm, &self.space.prescribed)?;
        Ok(())
    }

    /// Computes the local matrices of the cells owned by this rank
    fn assemble_owned_cells(&mut self) -> Result<(), FsiError> {
        let space = &mut self.space;
        self.stiffness.reset();
        self.damping.reset();
        self.nodal_mass.fill(0.0);
        for cell in &space.fem.mesh.cells {
            if !space.partition.owns_cell(cell.id) {
                continue;
            }
            let material = self.materials.get(cell.attribute)?;
            let local = calc_local_solid_matrices(
                &mut space.pads[cell.id],
                &space.gauss[cell.id],
                space.reduced[cell.id].as_ref(),
                material.lambda,
                material.mu,
                material.density,
            )
            .map_err(FsiError::numerical)?;
            let l2g = &space.local_to_global[cell.id];
            for (l, g) in l2g.iter().enumerate() {
                self.nodal_mass[*g] += local.lumped_mass[l];
            }
            assemble_matrix(&mut self.stiffness, 1.0, &local.stiffness, l2g, &space.prescribed);
            assemble_matrix(&mut self.damping, 1.0, &local.mass, l2g, &space.prescribed);
            self.local_stiffness[cell.id] = Some(local.stiffness);
            self.local_mass[cell.id] = Some(local.mass);
        }
        Ok(())
    }

    /// Assembles the effective matrix of a Newmark step
    fn assemble_effective(&mut self, dt: f64) -> Result<(), FsiError> {
        let space = &self.space;
        let kf = self.newmark.stiffness_factor(dt);
        let cf = self.newmark.damping_factor(dt) / dt;
        self.effective.reset();
        for cell in &space.fem.mesh.cells {
            let l2g = &space.local_to_global[cell.id];
            if let Some(kk) = &self.local_stiffness[cell.id] {
                assemble_matrix(&mut self.effective, kf, kk, l2g, &space.prescribed);
            }
            if self.config.penalty == PenaltyMode::Implicit {
                if let Some(mm) = &self.local_mass[cell.id] {
                    assemble_matrix(&mut self.effective, cf, mm, l2g, &space.prescribed);
                }
            }
        }
        for point in &space.fem.mesh.points {
            if !space.partition.owns_point(point.id) {
                continue;
            }
            for i in 0..space.dofs.ndim {
                let eq = space.dofs.vector_eq(point.id, i);
                if !space.prescribed[eq] {
                    let mass = self.effective_mass(eq);
                    self.effective.put(eq, eq, mass);
                }
            }
        }
        self.effective.compress(self.comm, &space.prescribed)
    }

    /// Returns the lumped mass plus the added mass of an equation
    fn effective_mass(&self, eq: usize) -> f64 {
        let added = match (&self.added_mass, self.config.added_mass) {
            (Some(a), true) => a[eq],
            _ => 0.0,
        };
        self.nodal_mass[eq] + added
    }

    /// Assembles the external force vector
    fn assemble_force(&mut self) -> Result<(), FsiError> {
        let res = self.assemble_owned_force();
        agree(self.comm, "solid force assembly", res)?;
        self.comm.sum_in_place(self.force.as_mut_data());
        Ok(())
    }

    /// Computes the body and boundary forces of the cells and faces owned by this rank
    fn assemble_owned_force(&mut self) -> Result<(), FsiError> {
        let space = &mut self.space;
        let ndim = space.dofs.ndim;
        let gravity = &self.config.gravity;
        let penalty = match (self.config.penalty, &self.velocity_difference) {
            (PenaltyMode::Off, _) => None,
            (_, vdiff) => vdiff.as_ref(),
        };
        self.force.fill(0.0);

        // body forces
        for cell in &space.fem.mesh.cells {
            if !space.partition.owns_cell(cell.id) {
                continue;
            }
            let material = self.materials.get(cell.attribute)?;
            let pad = &mut space.pads[cell.id];
            let gauss = &space.gauss[cell.id];
            let l2g = &space.local_to_global[cell.id];
            let nnode = cell.points.len();
            let mut f_local = Vector::new(nnode * ndim);
            for p in 0..gauss.npoint() {
                let ksi = gauss.coords(p);
                (pad.fn_interp)(&mut pad.interp, ksi);
                let det_jac = pad.calc_gradient(ksi).map_err(FsiError::numerical)?;
                let coef = gauss.weight(p) * det_jac;
                let mut vdiff = vec![0.0; ndim];
                if let Some(vd) = penalty {
                    for m in 0..nnode {
                        for i in 0..ndim {
                            vdiff[i] += pad.interp[m] * vd[l2g[m * ndim + i]];
                        }
                    }
                }
                for m in 0..nnode {
                    for i in 0..ndim {
                        f_local[m * ndim + i] += pad.interp[m] * (material.density * gravity[i] + vdiff[i]) * coef;
                    }
                }
            }
            assemble_vector(&mut self.force, &f_local, l2g, &space.prescribed);
        }

        // boundary tractions
        for (index, pad, gauss) in space.face_pads.iter_mut() {
            let face = &space.fem.faces[*index];
            let traction = match self.config.neumann.get(&face.boundary_id) {
                Some(t) => t,
                None => continue,
            };
            let nnode = face.points.len();
            let mut f_local = Vector::new(nnode * ndim);
            let mut args = integ::CommonArgs::new(pad, gauss);
            let res = match traction {
                SolidTraction::Vector(t) => integ::vec_02_nv(&mut f_local, &mut args, |v, _, _| {
                    for i in 0..ndim {
                        v[i] = t[i];
                    }
                    Ok(())
                }),
                SolidTraction::Pressure(pressure) => integ::vec_02_nv_bry(&mut f_local, &mut args, |v, _, un, _| {
                    for i in 0..ndim {
                        v[i] = pressure * un[i];
                    }
                    Ok(())
                }),
                SolidTraction::Fsi => {
                    let stress = match &self.fsi_stress {
                        Some(s) => s,
                        None => continue,
                    };
                    integ::vec_02_nv_bry(&mut f_local, &mut args, |v, _, un, nn| {
                        for i in 0..ndim {
                            v[i] = 0.0;
                            for j in 0..ndim {
                                let k = tensor_index(i, j);
                                let mut sigma = 0.0;
                                for m in 0..nnode {
                                    sigma += nn[m] * stress[k][face.points[m]];
                                }
                                v[i] += sigma * un[j];
                            }
                        }
                        Ok(())
                    })
                }
            };
            res.map_err(FsiError::numerical)?;
            let l2g: Vec<_> = face
                .points
                .iter()
                .flat_map(|p| (0..ndim).map(move |i| p * ndim + i))
                .collect();
            assemble_vector(&mut self.force, &f_local, &l2g, &space.prescribed);
        }
        Ok(())
    }

    /// Computes the initial acceleration from `M a₀ = F₀`
    fn solve_initial(&mut self, dt: f64) -> Result<(), FsiError> {
        let n = self.space.dofs.n_equation;
        let mut rhs = self.force.clone();
        if self.implicit_penalty() {
            let mut cv = Vector::new(n);
            self.damping
                .mat_vec_mul(&mut cv, 1.0 / dt, &self.state.velocity)
                .map_err(FsiError::numerical)?;
            for i in 0..n {
                rhs[i] -= cv[i];
            }
        }
        for eq in 0..n {
            if self.space.prescribed[eq] {
                self.state.acceleration[eq] = 0.0;
                continue;
            }
            let mass = self.effective_mass(eq);
            if mass <= 0.0 {
                return Err(FsiError::Config(format!("free DOF {} has no mass", eq)));
            }
            self.state.acceleration[eq] = rhs[eq] / mass;
        }
        Ok(())
    }

    /// Computes the nodal strain and stress
    pub fn update_stress(&mut self) -> Result<(), FsiError> {
        let ncomp = n_tensor_component(self.space.dofs.ndim);
        let mut both: Vec<Vector> = self.state.strain.drain(..).chain(self.state.stress.drain(..)).collect();
        let cells = &self.space.fem.mesh.cells;
        let l2g = &self.space.local_to_global;
        let materials = &self.materials;
        let uu = &self.state.displacement;
        let ndim = self.space.dofs.ndim;
        let res = self.space.recovery.recover(
            &self.space.fem,
            &self.space.partition,
            self.comm,
            &mut both,
            |cell_id, pad, ksi, values| {
                let material = materials.get(cells[cell_id].attribute)?;
                let mut eps = material.new_tensor();
                let mut sig = material.new_tensor();
                calculate_strain(&mut eps, uu, &l2g[cell_id], ksi, pad).map_err(FsiError::numerical)?;
                material.stress(&mut sig, &eps);
                for i in 0..ndim {
                    for j in 0..=i {
                        let k = tensor_index(i, j);
                        values[k] = eps.get(i, j);
                        values[ncomp + k] = sig.get(i, j);
                    }
                }
                Ok(())
            },
        );
        self.state.stress = both.split_off(ncomp);
        self.state.strain = both;
        res
    }

    /// Returns the kinetic energy and its rate (summed over all processes)
    pub fn kinetic_energy(&self, time: &TimeState) -> (f64, f64) {
        let space = &self.space;
        let dt = time.delta_t;
        let first = time.step == 1;
        let (v, v_old) = (&self.state.velocity, &self.state.previous_velocity);
        let mut ke = 0.0;
        let mut ke_rate = 0.0;
        for point in &space.fem.mesh.points {
            if !space.partition.owns_point(point.id) {
                continue;
            }
            for i in 0..space.dofs.ndim {
                let eq = space.dofs.vector_eq(point.id, i);
                let m = self.nodal_mass[eq];
                if time.step > 0 {
                    if first {
                        ke_rate += v[eq] * m * v_old[eq] / dt;
                    }
                    ke_rate += v[eq] * m * (v[eq] - v_old[eq]) / dt;
                }
                ke += 0.5 * v[eq] * v[eq] * m;
            }
        }
        (self.comm.sum(ke_rate), self.comm.sum(ke))
    }

    /// Returns the rate of potential energy ∫ v·(∇·σ) (summed over all processes)
    pub fn potential_energy_rate(&mut self) -> Result<f64, FsiError> {
        let space = &mut self.space;
        let ndim = space.dofs.ndim;
        let stress = &self.state.stress;
        let vel = &self.state.velocity;
        let mut pe_rate = 0.0;
        for cell in &space.fem.mesh.cells {
            if !space.partition.owns_cell(cell.id) {
                continue;
            }
            let pad = &mut space.pads[cell.id];
            let gauss = &space.gauss[cell.id];
            let l2g = &space.local_to_global[cell.id];
            for p in 0..gauss.npoint() {
                let ksi = gauss.coords(p);
                (pad.fn_interp)(&mut pad.interp, ksi);
                let det_jac = pad.calc_gradient(ksi).map_err(FsiError::numerical)?;
                let coef = gauss.weight(p) * det_jac;
                for i in 0..ndim {
                    let mut v = 0.0;
                    let mut div = 0.0;
                    for (m, point_id) in cell.points.iter().enumerate() {
                        v += pad.interp[m] * vel[l2g[m * ndim + i]];
                        for j in 0..ndim {
                            div += pad.gradient.get(m, j) * stress[tensor_index(i, j)][*point_id];
                        }
                    }
                    pe_rate += v * div * coef;
                }
            }
        }
        Ok(self.comm.sum(pe_rate))
    }

    fn write_diagnostics(&mut self, time: &TimeState) -> Result<(), FsiError> {
        let (ke_rate, ke) = self.kinetic_energy(time);
        let pe_rate = self.potential_energy_rate()?;
        self.sink.record("solid_ke.txt", KE_HEADER, time.current, &[ke_rate, ke])?;
        self.sink.record("solid_pe_rate.txt", PE_HEADER, time.current, &[pe_rate])?;
        Ok(())
    }
}

/// Sets the initial velocity of all free DOFs
fn apply_initial_velocity(state: &mut SolidState, space: &SolidSpace, config: &SolidConfig) {
    for point in &space.fem.mesh.points {
        for i in 0..space.dofs.ndim {
            let eq = space.dofs.vector_eq(point.id, i);
            if !space.prescribed[eq] {
                state.velocity[eq] = config.initial_velocity[i];
                state.previous_velocity[eq] = config.initial_velocity[i];
            }
        }
    }
}

impl<'a> SolidIntegrator<'a> {
    /// Performs a Newmark step (step ≥ 1)
    fn solve_newmark(&mut self, dt: f64) -> Result<(), FsiError> {
        let n = self.space.dofs.n_equation;
        let nm = self.newmark;
        let state = &mut self.state;

        // effective right-hand side
        let mut pred = Vector::new(n);
        nm.predictor(
            &mut pred,
            dt,
            &state.previous_displacement,
            &state.previous_velocity,
            &state.previous_acceleration,
        );
        let mut rhs = self.force.clone();
        let mut tmp = Vector::new(n);
        self.stiffness
            .mat_vec_mul(&mut tmp, 1.0, &pred)
            .map_err(FsiError::numerical)?;
        for i in 0..n {
            rhs[i] -= tmp[i];
        }
        if self.config.penalty == PenaltyMode::Implicit {
            self.damping
                .mat_vec_mul(&mut tmp, 1.0 / dt, &state.previous_velocity)
                .map_err(FsiError::numerical)?;
            for i in 0..n {
                rhs[i] -= tmp[i];
            }
            self.damping
                .mat_vec_mul(&mut tmp, 1.0 - nm.gamma, &state.previous_acceleration)
                .map_err(FsiError::numerical)?;
            for i in 0..n {
                rhs[i] -= tmp[i];
            }
        }
        for i in 0..n {
            if self.space.prescribed[i] {
                rhs[i] = 0.0;
            }
        }

        // solve
        self.assemble_effective(dt)?;
        let state = &mut self.state;
        let report = conjugate_gradient(
            &self.effective,
            &mut state.acceleration,
            &rhs,
            &Identity,
            SOLID_SOLVER_TOLERANCE,
            2 * n,
        )?;
        log::debug!(
            "solid CG: {} iterations, residual = {:.6e}",
            report.iterations,
            report.residual
        );

        // update velocity and displacement
        nm.update(
            dt,
            &mut state.displacement,
            &mut state.velocity,
            &state.previous_displacement,
            &state.previous_velocity,
            &state.previous_acceleration,
            &state.acceleration,
        );
        Ok(())
    }
}

impl<'a> Integrator for SolidIntegrator<'a> {
    fn name(&self) -> &'static str {
        "solid"
    }

    fn initialize(&mut self, _time: &TimeState) -> Result<(), FsiError> {
        self.assemble_matrices()?;
        self.initialized = true;
        Ok(())
    }

    fn assemble(&mut self, _time: &TimeState) -> Result<(), FsiError> {
        if !self.initialized {
            return Err(FsiError::Config("the solid integrator must be initialized first".to_string()));
        }
        self.assemble_force()
    }

    fn solve_step(&mut self, time: &TimeState) -> Result<(), FsiError> {
        if time.step == 0 {
            self.solve_initial(time.delta_t)?;
        } else {
            self.solve_newmark(time.delta_t)?;
        }
        self.state.t = time.current;
        self.update_stress()?;
        self.write_diagnostics(time)?;
        self.state.advance();
        log::info!("solid: step {} at t = {:e} done", time.step, time.current);
        Ok(())
    }

    fn output(&mut self, time: &TimeState, writer: &mut OutputWriter) -> Result<(), FsiError> {
        writer.write_snapshot(&self.state, time.current)?;
        self.comm.barrier();
        Ok(())
    }

    fn checkpoint_names(&self) -> &'static [&'static str] {
        &["displacement", "velocity", "acceleration"]
    }

    fn checkpoint_fields(&self) -> Vec<&Vector> {
        vec![&self.state.displacement, &self.state.velocity, &self.state.acceleration]
    }

    fn restore_fields(&mut self, fields: &[Vector]) -> Result<(), FsiError> {
        if fields.len() != 3 {
            return Err(FsiError::Protocol(format!("expected 3 solid fields, got {}", fields.len())));
        }
        self.state.install(&fields[0], &fields[1], &fields[2])
    }

    fn refine(&mut self, refiner: &mut dyn Refiner) -> Result<bool, FsiError> {
        let fields = [
            &self.state.previous_displacement,
            &self.state.previous_velocity,
            &self.state.previous_acceleration,
        ];
        let (fem, mut data) = match refiner.refine(&self.space.fem, &fields)? {
            Some(res) => res,
            None => return Ok(false),
        };
        if data.len() != 3 {
            return Err(FsiError::Protocol(format!("refiner returned {} fields instead of 3", data.len())));
        }
        let t = self.state.t;
        self.space = SolidSpace::new(fem, &self.config, self.comm.rank(), self.comm.size())?;
        let n = self.space.dofs.n_equation;
        let ncell = self.space.fem.ncell();
        for field in data.iter_mut() {
            if field.dim() != n {
                return Err(FsiError::Protocol(format!(
                    "transferred field has {} values but the refined solid has {} DOFs",
                    field.dim(),
                    n
                )));
            }
            for i in 0..n {
                if self.space.prescribed[i] {
                    field[i] = 0.0;
                }
            }
        }
        self.state = SolidState::new(&self.space.dofs, self.space.fem.npoint());
        self.state.install(&data[0], &data[1], &data[2])?;
        self.state.t = t;
        self.local_stiffness = (0..ncell).map(|_| None).collect();
        self.local_mass = (0..ncell).map(|_| None).collect();
        self.nodal_mass = Vector::new(n);
        self.stiffness = SystemMatrix::new(n);
        self.damping = SystemMatrix::new(n);
        self.effective = SystemMatrix::new(n);
        self.force = Vector::new(n);
        self.added_mass = None;
        self.velocity_difference = None;
        self.fsi_stress = None;
        self.assemble_matrices()?;
        log::info!("solid: mesh refined to {} cells", ncell);
        Ok(true)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::{calc_local_solid_matrices, SolidIntegrator};
    use crate::base::{ComponentMask, FemMesh, FsiError, ParamSolid, SampleMeshes, SerialComm, SolidConfig};
    use crate::base::{PenaltyMode, SolidTraction, BOTTOM, LEFT, RIGHT, TOP};
    use crate::fem::{DiagnosticsSink, Integrator, Refiner, TimeState};
    use gemlab::integ::Gauss;
    use gemlab::shapes::{GeoKind, Scratchpad};
    use russell_lab::{approx_eq, Vector};

    fn config(young: f64, poisson: f64, density: f64) -> SolidConfig {
        let mut config = SolidConfig::new(2);
        config
            .add_material(ParamSolid {
                young,
                poisson,
                density,
                damping: 0.0,
            })
            .unwrap();
        config
    }

    #[test]
    fn lumped_mass_conserves_the_consistent_mass() {
        let fem = SampleMeshes::rectangle(1, 1, 2.0, 3.0, GeoKind::Qua9, 1).unwrap();
        let cell = &fem.mesh.cells[0];
        let mut pad = Scratchpad::new(2, cell.kind).unwrap();
        fem.mesh.set_pad(&mut pad, &cell.points);
        let gauss = Gauss::new(cell.kind);
        let reduced = Gauss::new_or_sized(cell.kind, Some(1)).unwrap();
        let local = calc_local_solid_matrices(&mut pad, &gauss, Some(&reduced), 1.0, 1.0, 2.5).unwrap();
        let neq = local.lumped_mass.dim();
        let mut total = 0.0;
        for l in 0..neq {
            let mut row = 0.0;
            for ll in 0..neq {
                row += local.mass.get(l, ll);
            }
            approx_eq(local.lumped_mass[l], row, 1e-14);
            total += local.lumped_mass[l];
        }
        // ρ × area for each of the two directions
        approx_eq(total, 2.0 * 2.5 * 6.0, 1e-12);
    }

    #[test]
    fn stiffness_is_symmetric_and_rigid_modes_are_free() {
        let fem = SampleMeshes::rectangle(1, 1, 1.0, 1.0, GeoKind::Qua4, 1).unwrap();
        let cell = &fem.mesh.cells[0];
        let mut pad = Scratchpad::new(2, cell.kind).unwrap();
        fem.mesh.set_pad(&mut pad, &cell.points);
        let gauss = Gauss::new(cell.kind);
        let reduced = Gauss::new_or_sized(cell.kind, Some(1)).unwrap();
        let local = calc_local_solid_matrices(&mut pad, &gauss, Some(&reduced), 0.4, 0.4, 1.0).unwrap();
        let kk = &local.stiffness;
        for i in 0..8 {
            for j in 0..8 {
                approx_eq(kk.get(i, j), kk.get(j, i), 1e-15);
            }
        }
        // rigid translation along x
        for i in 0..8 {
            let mut f = 0.0;
            for m in 0..4 {
                f += kk.get(i, 2 * m);
            }
            approx_eq(f, 0.0, 1e-15);
        }
    }

    #[test]
    fn new_captures_errors() {
        let fem = SampleMeshes::rectangle(2, 1, 2.0, 1.0, GeoKind::Qua4, 1).unwrap();
        let mut cfg = config(1.0, 0.0, 1.0);
        cfg.add_point_constraint(&[0.5, 0.5], ComponentMask::XY).unwrap();
        let sink = DiagnosticsSink::disabled();
        let err = SolidIntegrator::new(&SerialComm, fem.clone(), &cfg, sink.clone()).err().unwrap();
        assert!(err.is_config());

        // region 2 has no material
        let mut fem2 = fem.clone();
        fem2.mesh.cells[1].attribute = 2;
        let cfg = config(1.0, 0.0, 1.0);
        let mut solid = SolidIntegrator::new(&SerialComm, fem2, &cfg, sink).unwrap();
        let time = TimeState::new(1.0, 0.1, 0.0, 0.0, 0.0).unwrap();
        assert_eq!(
            solid.initialize(&time).err().unwrap().to_string(),
            "configuration error: region 2 has no material (there are 1 materials)"
        );
    }

    #[test]
    fn nodal_mass_and_gravity_work() {
        //  3-------4-------5
        //  |  [0]  |  [1]  |
        //  0-------1-------2
        let fem = SampleMeshes::rectangle(2, 1, 2.0, 1.0, GeoKind::Qua4, 1).unwrap();
        let mut cfg = config(1.0, 0.0, 4.0);
        cfg.set_gravity(&[1.0, 0.0]).unwrap().set_dirichlet(LEFT, ComponentMask::X).unwrap();
        let mut solid = SolidIntegrator::new(&SerialComm, fem, &cfg, DiagnosticsSink::disabled()).unwrap();
        let time = TimeState::new(1.0, 0.1, 0.0, 0.0, 0.0).unwrap();
        solid.initialize(&time).unwrap();
        solid.assemble(&time).unwrap();
        let mass: Vec<_> = (0..6).map(|p| solid.nodal_mass()[2 * p]).collect();
        assert_eq!(mass, &[1.0, 2.0, 1.0, 1.0, 2.0, 1.0]);
        // the prescribed DOFs get no force
        assert_eq!(solid.force()[0], 0.0);
        approx_eq(solid.force()[2], 2.0, 1e-15);
        approx_eq(solid.force()[4], 1.0, 1e-15);
        approx_eq(solid.force()[5], 0.0, 1e-15);
        solid.solve_step(&time).unwrap();
        approx_eq(solid.state.acceleration[2], 1.0, 1e-15);
        assert_eq!(solid.state.acceleration[0], 0.0);
        assert_eq!(solid.state.previous_acceleration[2], solid.state.acceleration[2]);
    }

    #[test]
    fn implicit_penalty_step_works() {
        // free unit square under gravity g = (1, 0) with initial velocity (0.3, 0)
        // uniform fields are rigid translations, thus K·pred = 0 and the rows of the
        // consistent mass sum to the lumped mass; at every node:
        //   a₀ = g - v₀/Δt
        //   (1 + γ) a₁ = g - v₀/Δt - (1 - γ) a₀
        let fem = SampleMeshes::rectangle(1, 1, 1.0, 1.0, GeoKind::Qua4, 1).unwrap();
        let mut cfg = config(10.0, 0.25, 2.0);
        cfg.set_gravity(&[1.0, 0.0])
            .unwrap()
            .set_initial_velocity(&[0.3, 0.0])
            .unwrap()
            .set_penalty(PenaltyMode::Implicit)
            .unwrap();
        let mut solid = SolidIntegrator::new(&SerialComm, fem, &cfg, DiagnosticsSink::disabled()).unwrap();
        let mut time = TimeState::new(1.0, 0.1, 0.0, 0.0, 0.0).unwrap();
        solid.initialize(&time).unwrap();
        time.initialize();
        solid.assemble(&time).unwrap();
        solid.solve_step(&time).unwrap();
        for p in 0..4 {
            approx_eq(solid.state.acceleration[2 * p], -2.0, 1e-14);
            approx_eq(solid.state.acceleration[2 * p + 1], 0.0, 1e-14);
        }

        // (1 + 0.5) a₁ = 1 - 3 + 0.5 × 2 = -1
        // v₁ = 0.3 + 0.05 × (-2) + 0.05 × (-2/3) = 1/6
        // d₁ = 0.1 × 0.3 + 0.0025 × (-2) + 0.0025 × (-2/3) = 7/300
        time.increment();
        solid.assemble(&time).unwrap();
        solid.solve_step(&time).unwrap();
        for p in 0..4 {
            approx_eq(solid.state.acceleration[2 * p], -2.0 / 3.0, 1e-8);
            approx_eq(solid.state.velocity[2 * p], 1.0 / 6.0, 1e-9);
            approx_eq(solid.state.displacement[2 * p], 7.0 / 300.0, 1e-10);
            approx_eq(solid.state.acceleration[2 * p + 1], 0.0, 1e-8);
        }
    }

    #[test]
    fn added_mass_slows_the_acceleration() {
        // free unit square with ρ = 2 (lumped mass 0.5 per DOF) and added mass 1.5 per DOF
        // rigid translation: a = g m / (m + mₐ) = 0.25 at steps 0 and 1
        let fem = SampleMeshes::rectangle(1, 1, 1.0, 1.0, GeoKind::Qua4, 1).unwrap();
        let mut cfg = config(10.0, 0.25, 2.0);
        cfg.set_gravity(&[1.0, 0.0]).unwrap().set_added_mass(true).unwrap();
        let mut solid = SolidIntegrator::new(&SerialComm, fem, &cfg, DiagnosticsSink::disabled()).unwrap();
        let mut time = TimeState::new(1.0, 0.1, 0.0, 0.0, 0.0).unwrap();
        solid.initialize(&time).unwrap();
        assert!(solid.set_added_mass(Vector::new(3)).unwrap_err().is_protocol());
        solid.set_added_mass(Vector::filled(8, 1.5)).unwrap();
        time.initialize();
        solid.assemble(&time).unwrap();
        solid.solve_step(&time).unwrap();
        for p in 0..4 {
            approx_eq(solid.state.acceleration[2 * p], 0.25, 1e-15);
        }
        time.increment();
        solid.assemble(&time).unwrap();
        solid.solve_step(&time).unwrap();
        for p in 0..4 {
            approx_eq(solid.state.acceleration[2 * p], 0.25, 1e-9);
            approx_eq(solid.state.velocity[2 * p], 0.025, 1e-10);
        }

        // the flag switches the added mass off
        let fem = SampleMeshes::rectangle(1, 1, 1.0, 1.0, GeoKind::Qua4, 1).unwrap();
        cfg.set_added_mass(false).unwrap();
        let mut solid = SolidIntegrator::new(&SerialComm, fem, &cfg, DiagnosticsSink::disabled()).unwrap();
        solid.initialize(&time).unwrap();
        solid.set_added_mass(Vector::filled(8, 1.5)).unwrap();
        time.initialize();
        solid.assemble(&time).unwrap();
        solid.solve_step(&time).unwrap();
        approx_eq(solid.state.acceleration[0], 1.0, 1e-15);
    }

    #[test]
    fn kinetic_energy_uses_the_step_index() {
        // unit square with ρ = 2: lumped mass 0.5 per DOF
        let fem = SampleMeshes::rectangle(1, 1, 1.0, 1.0, GeoKind::Qua4, 1).unwrap();
        let cfg = config(1.0, 0.0, 2.0);
        let mut solid = SolidIntegrator::new(&SerialComm, fem, &cfg, DiagnosticsSink::disabled()).unwrap();
        let mut time = TimeState::new(1.0, 0.1, 0.0, 0.0, 0.0).unwrap();
        solid.initialize(&time).unwrap();
        solid.state.velocity.fill(1.0);
        solid.state.previous_velocity.fill(0.5);

        // first step at a time different from Δt: the first-step term is included
        time.step = 1;
        time.current = 0.25;
        let (rate, ke) = solid.kinetic_energy(&time);
        approx_eq(ke, 2.0, 1e-15);
        approx_eq(rate, 20.0 + 20.0, 1e-13);

        // later step at a time equal to Δt: no first-step term
        time.step = 2;
        time.current = 0.1;
        let (rate, _) = solid.kinetic_energy(&time);
        approx_eq(rate, 20.0, 1e-13);
    }

    #[test]
    fn pressure_traction_works() {
        // unit square with pressure 2 on the right side: total force = 2 along +x
        let fem = SampleMeshes::rectangle(1, 1, 1.0, 1.0, GeoKind::Qua4, 1).unwrap();
        let mut cfg = config(1.0, 0.0, 1.0);
        cfg.set_neumann(RIGHT, SolidTraction::Pressure(2.0)).unwrap();
        cfg.set_neumann(TOP, SolidTraction::Vector(vec![0.0, -3.0])).unwrap();
        let mut solid = SolidIntegrator::new(&SerialComm, fem, &cfg, DiagnosticsSink::disabled()).unwrap();
        let time = TimeState::new(1.0, 0.1, 0.0, 0.0, 0.0).unwrap();
        solid.initialize(&time).unwrap();
        solid.assemble(&time).unwrap();
        // points 1 and 2 are on the right side; points 2 and 3 are on the top side
        approx_eq(solid.force()[2], 1.0, 1e-15);
        approx_eq(solid.force()[4], 1.0, 1e-15);
        approx_eq(solid.force()[5], -1.5, 1e-15);
        approx_eq(solid.force()[7], -1.5, 1e-15);
        approx_eq(solid.force()[0], 0.0, 1e-15);
    }

    #[test]
    fn fsi_traction_uses_the_fluid_stress() {
        // uniform fluid pressure p = 3 (σ = -p I) on the bottom side of a unit square
        let fem = SampleMeshes::rectangle(1, 1, 1.0, 1.0, GeoKind::Qua4, 1).unwrap();
        let mut cfg = config(1.0, 0.0, 1.0);
        cfg.set_neumann(BOTTOM, SolidTraction::Fsi).unwrap();
        let mut solid = SolidIntegrator::new(&SerialComm, fem, &cfg, DiagnosticsSink::disabled()).unwrap();
        let time = TimeState::new(1.0, 0.1, 0.0, 0.0, 0.0).unwrap();
        solid.initialize(&time).unwrap();
        assert!(solid.set_fsi_stress(vec![Vector::new(4); 2]).unwrap_err().is_protocol());
        solid
            .set_fsi_stress(vec![Vector::filled(4, -3.0), Vector::new(4), Vector::filled(4, -3.0)])
            .unwrap();
        solid.assemble(&time).unwrap();
        // outward normal (0, -1): traction σ·n = (0, 3)
        approx_eq(solid.force()[1], 1.5, 1e-15);
        approx_eq(solid.force()[3], 1.5, 1e-15);
        approx_eq(solid.force()[0], 0.0, 1e-15);
    }

    struct Uniform;

    impl Refiner for Uniform {
        fn refine(&mut self, fem: &FemMesh, fields: &[&Vector]) -> Result<Option<(FemMesh, Vec<Vector>)>, FsiError> {
            assert_eq!(fem.ncell(), 1);
            assert_eq!(fields.len(), 3);
            let fine = SampleMeshes::rectangle(2, 2, 1.0, 1.0, GeoKind::Qua4, 1)?;
            let n = 2 * fine.npoint();
            Ok(Some((fine, vec![Vector::filled(n, 0.5); 3])))
        }
    }

    #[test]
    fn refine_transfers_the_state() {
        let fem = SampleMeshes::rectangle(1, 1, 1.0, 1.0, GeoKind::Qua4, 1).unwrap();
        let mut cfg = config(1.0, 0.0, 1.0);
        cfg.set_dirichlet(LEFT, ComponentMask::XY).unwrap();
        let mut solid = SolidIntegrator::new(&SerialComm, fem, &cfg, DiagnosticsSink::disabled()).unwrap();
        let time = TimeState::new(1.0, 0.1, 0.0, 0.0, 0.0).unwrap();
        solid.initialize(&time).unwrap();
        assert!(solid.refine(&mut Uniform).unwrap());
        assert_eq!(solid.fem().ncell(), 4);
        assert_eq!(solid.state.ndof(), 18);
        // point 0 is on the left side
        assert_eq!(solid.state.displacement[0], 0.0);
        assert_eq!(solid.state.previous_velocity[2], 0.5);
        approx_eq(solid.nodal_mass().as_data().iter().sum::<f64>(), 2.0, 1e-14);
    }
}
