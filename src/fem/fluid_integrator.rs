use super::{calculate_field_gradient, minres, n_tensor_component, select_pressure_pin, tensor_index, BlockDiagonal};
use super::{CellIndicator, DiagnosticsSink, FluidState, IndicatorSource, Integrator, NodalRecovery, OutputWriter};
use super::{PressurePin, Refiner, TimeState};
use crate::base::{agree, apply_lifting, assemble_matrix, assemble_vector, corner_kind, kind_degree, Communicator};
use crate::base::{DofMap, FemMesh, FluidConfig, FsiError, Partition, SystemMatrix};
use crate::base::{FLUID_SOLVER_TOLERANCE, INNER_SOLVER_TOLERANCE};
use crate::StrError;
use gemlab::integ::{self, Gauss};
use gemlab::shapes::Scratchpad;
use russell_lab::{Matrix, Vector};
use std::mem;

const IND_VEL_HEADER: &str = "Time\tL2-norm\tMax-norm";
const VELOCITY_HEADER: &str = "Time\tL2_norm_velocity";
const DIVERGENCE_HEADER: &str = "Time\tL2_norm_divergence";
const GRAD_P_HEADER: &str = "Time\tL2_norm_grad_p";
const DRAG_LIFT_HEADER: &str = "Step\tTime\tCd\tCl";
const ENERGY_HEADER: &str = concat!(
    "Time\tKinetic_Energy\tViscous_Dissipation\tPressure_Div_Term\tAlgorithmic_Dissipation\t",
    "Artificial_Algorithmic_Dissipation\tArtificial_KE\tArtificial_Viscous_Dissipation"
);

/// Holds the local matrices of a fluid cell
pub struct LocalFluidMatrices {
    /// Saddle-point matrix with the velocity block first and the pressure block last
    pub system: Matrix,

    /// Diagonal of the velocity block of the preconditioner `c ∫ φφ + ν ∫ ∇φ:∇φ`
    pub velocity_diagonal: Vector,

    /// Pressure mass matrix scaled by 1/ν
    pub pressure_mass: Matrix,
}

/// Calculates the local matrices of a Taylor–Hood fluid cell
///
/// ```text
/// K = c ∫ φ·φ + ν ∫ (∇φ:∇φ + ∇φ:∇φᵀ) - ∫ (∇·φ) ψ - ∫ ψ (∇·φ)
/// ```
///
/// where `c` is the mass coefficient of the cell (see [FluidConfig::mass_coefficient]).
/// `ppad` holds the first-order (corner) interpolation of the pressure.
pub fn calc_local_fluid_matrices(
    pad: &mut Scratchpad,
    ppad: &mut Scratchpad,
    gauss: &Gauss,
    mass_coefficient: f64,
    viscosity: f64,
) -> Result<LocalFluidMatrices, StrError> {
    let (ndim, nnode) = pad.xxt.dims();
    let npres = ppad.kind.nnode();
    let nv = ndim * nnode;
    let mut kk = Matrix::new(nv + npres, nv + npres);
    let mut diag = Vector::new(nv);
    let mut mp = Matrix::new(npres, npres);
    for p in 0..gauss.npoint() {
        let ksi = gauss.coords(p);
        (pad.fn_interp)(&mut pad.interp, ksi);
        (ppad.fn_interp)(&mut ppad.interp, ksi);
        let det_jac = pad.calc_gradient(ksi)?;
        let coef = gauss.weight(p) * det_jac;
        let gg = &pad.gradient;
        let nn = &pad.interp;
        let psi = &ppad.interp;
        for m in 0..nnode {
            let mut gm_gm = 0.0;
            for k in 0..ndim {
                gm_gm += gg.get(m, k) * gg.get(m, k);
            }
            for i in 0..ndim {
                diag[m * ndim + i] += (mass_coefficient * nn[m] * nn[m] + viscosity * gm_gm) * coef;
            }
            for n in 0..nnode {
                let mut gm_gn = 0.0;
                for k in 0..ndim {
                    gm_gn += gg.get(m, k) * gg.get(n, k);
                }
                let mass = mass_coefficient * nn[m] * nn[n];
                for i in 0..ndim {
                    for j in 0..ndim {
                        let mut value = viscosity * gg.get(m, j) * gg.get(n, i);
                        if i == j {
                            value += mass + viscosity * gm_gn;
                        }
                        kk.add(m * ndim + i, n * ndim + j, value * coef);
                    }
                }
            }
            for k in 0..npres {
                for i in 0..ndim {
                    let value = -gg.get(m, i) * psi[k] * coef;
                    kk.add(m * ndim + i, nv + k, value);
                    kk.add(nv + k, m * ndim + i, value);
                }
            }
        }
        for k in 0..npres {
            for l in 0..npres {
                mp.add(k, l, psi[k] * psi[l] * coef / viscosity);
            }
        }
    }
    Ok(LocalFluidMatrices {
        system: kk,
        velocity_diagonal: diag,
        pressure_mass: mp,
    })
}

/// Interpolates the pressure at a reference point
fn interpolate_pressure(ppad: &mut Scratchpad, solution: &Vector, l2g: &[usize], offset: usize, ksi: &[f64]) -> f64 {
    (ppad.fn_interp)(&mut ppad.interp, ksi);
    let mut p = 0.0;
    for k in 0..ppad.kind.nnode() {
        p += ppad.interp[k] * solution[l2g[offset + k]];
    }
    p
}

/// Holds the mesh-dependent data of the fluid
struct FluidSpace {
    fem: FemMesh,
    partition: Partition,
    dofs: DofMap,
    prescribed: Vec<bool>,
    pin: PressurePin,
    pads: Vec<Scratchpad>,
    ppads: Vec<Scratchpad>,
    gauss: Vec<Gauss>,
    local_to_global: Vec<Vec<usize>>,
    neumann_pads: Vec<(usize, Scratchpad, Gauss)>,
    drag_pads: Vec<(usize, Scratchpad, Gauss)>,
    has_drag_boundary: bool,
    recovery: NodalRecovery,
}

impl FluidSpace {
    fn new(fem: FemMesh, config: &FluidConfig, comm: &dyn Communicator) -> Result<Self, FsiError> {
        let ndim = fem.ndim();
        if ndim != config.ndim {
            return Err(FsiError::Config(format!(
                "mesh has ndim = {} but the fluid configuration has ndim = {}",
                ndim, config.ndim
            )));
        }
        if config.pressure_degree != 1 || config.velocity_degree != config.pressure_degree + 1 {
            return Err(FsiError::Config(format!(
                "velocity degree ({}) must be the pressure degree ({}) plus one with a first-order pressure",
                config.velocity_degree, config.pressure_degree
            )));
        }
        for cell in &fem.mesh.cells {
            let degree = kind_degree(cell.kind);
            if degree != config.velocity_degree {
                return Err(FsiError::Config(format!(
                    "cell {} has degree {} but the velocity degree is {}",
                    cell.id, degree, config.velocity_degree
                )));
            }
        }
        let partition = Partition::new(&fem.mesh, comm.rank(), comm.size());
        let dofs = DofMap::mixed(&fem.mesh)?;

        // velocity conditions and pressure pin
        let mut prescribed = vec![false; dofs.n_equation];
        for boundary_id in config.dirichlet.keys() {
            for p in fem.boundary_points(*boundary_id) {
                for i in 0..ndim {
                    prescribed[dofs.vector_eq(p, i)] = true;
                }
            }
        }
        let pin = select_pressure_pin(comm, &fem, &dofs, &partition, &config.pressure_anchor)?;
        prescribed[pin.equation] = true;

        // cells
        let ncell = fem.ncell();
        let mut pads = Vec::with_capacity(ncell);
        let mut ppads = Vec::with_capacity(ncell);
        let mut gauss = Vec::with_capacity(ncell);
        let mut local_to_global = Vec::with_capacity(ncell);
        for cell in &fem.mesh.cells {
            let mut pad = Scratchpad::new(ndim, cell.kind)?;
            fem.mesh.set_pad(&mut pad, &cell.points);
            let pkind = corner_kind(cell.kind)?;
            let mut ppad = Scratchpad::new(ndim, pkind)?;
            fem.mesh.set_pad(&mut ppad, &cell.points[0..pkind.nnode()]);
            pads.push(pad);
            ppads.push(ppad);
            gauss.push(Gauss::new(cell.kind));
            local_to_global.push(dofs.local_to_global(cell, pkind.nnode())?);
        }

        // faces with prescribed pressure and faces of the body
        let mut neumann_pads = Vec::new();
        let mut drag_pads = Vec::new();
        let mut has_drag_boundary = false;
        for (index, face) in fem.faces.iter().enumerate() {
            let open = config.neumann_pressure.contains_key(&face.boundary_id)
                && !config.dirichlet.contains_key(&face.boundary_id);
            let body = face.boundary_id == config.drag_lift.boundary_id;
            has_drag_boundary = has_drag_boundary || body;
            if !partition.owns_cell(face.cell_id) || !(open || body) {
                continue;
            }
            for (wanted, pads) in [(open, &mut neumann_pads), (body, &mut drag_pads)] {
                if wanted {
                    let mut pad = Scratchpad::new(ndim, face.kind)?;
                    fem.mesh.set_pad(&mut pad, &face.points);
                    pads.push((index, pad, Gauss::new(face.kind)));
                }
            }
        }

        let recovery = NodalRecovery::new(&fem)?;
        Ok(FluidSpace {
            fem,
            partition,
            dofs,
            prescribed,
            pin,
            pads,
            ppads,
            gauss,
            local_to_global,
            neumann_pads,
            drag_pads,
            has_drag_boundary,
            recovery,
        })
    }
}

/// Implements the fluid integrator (Taylor–Hood Stokes with indicator-driven coefficients)
///
/// Each step solves the symmetric saddle-point system
///
/// ```text
/// ┌ c M + ν A   Bᵀ ┐ ┌ uₙ₊₁ ┐   ┌ F + c M uₙ ┐
/// └ B           0  ┘ └ pₙ₊₁ ┘ = └ 0          ┘
/// ```
///
/// with MINRES preconditioned by [BlockDiagonal]. The mass coefficient `c`
/// and the forcing of each cell follow its [CellIndicator]: immersed cells
/// use the solid inertia and receive the force `σ:∇φ + ρ_s a·φ` computed from
/// the solid stress and acceleration handed over by the coupling.
pub struct FluidIntegrator<'a> {
    comm: &'a dyn Communicator,
    config: FluidConfig,
    space: FluidSpace,

    /// Holds the state
    pub state: FluidState,

    system: SystemMatrix,
    pressure_mass: SystemMatrix,

    /// Diagonal of the velocity block of the preconditioner
    velocity_diagonal: Vector,

    rhs: Vector,

    /// Prescribed values (zero for the free equations)
    values: Vector,

    indicator_source: Option<Box<dyn IndicatorSource + 'a>>,
    sink: DiagnosticsSink,
    initialized: bool,
}

impl<'a> FluidIntegrator<'a> {
    /// Allocates a new instance
    pub fn new(
        comm: &'a dyn Communicator,
        fem: FemMesh,
        config: &FluidConfig,
        sink: DiagnosticsSink,
    ) -> Result<Self, FsiError> {
        if let Some(message) = config.validate() {
            return Err(FsiError::Config(message));
        }
        let space = FluidSpace::new(fem, config, comm)?;
        let state = FluidState::new(&space.dofs, space.fem.npoint(), space.fem.ncell());
        let n = space.dofs.n_equation;
        Ok(FluidIntegrator {
            comm,
            config: config.clone(),
            system: SystemMatrix::new(n),
            pressure_mass: SystemMatrix::new(space.dofs.n_scalar),
            velocity_diagonal: Vector::new(space.dofs.n_vector),
            rhs: Vector::new(n),
            values: Vector::new(n),
            space,
            state,
            indicator_source: None,
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

    /// Returns the pinned pressure equation
    pub fn pressure_pin(&self) -> PressurePin {
        self.space.pin
    }

    /// Returns the right-hand side of the current step
    pub fn rhs(&self) -> &Vector {
        &self.rhs
    }

    /// Returns the configuration
    pub fn config(&self) -> &FluidConfig {
        &self.config
    }

    /// Returns a velocity component at a point
    pub fn velocity(&self, point_id: usize, component: usize) -> f64 {
        self.state.solution[self.space.dofs.vector_eq(point_id, component)]
    }

    /// Returns the pressure at a point (None if the point carries no pressure)
    pub fn pressure(&self, point_id: usize) -> Option<f64> {
        self.space.dofs.scalar_eq(point_id).map(|eq| self.state.solution[eq])
    }

    /// Sets the source queried for the cell indicators before each assembly
    pub fn set_indicator_source(&mut self, source: Box<dyn IndicatorSource + 'a>) {
        self.indicator_source = Some(source);
    }

    /// Sets the indicator of each cell
    pub fn set_indicators(&mut self, indicators: Vec<CellIndicator>) -> Result<(), FsiError> {
        let ncell = self.space.fem.ncell();
        if indicators.len() != ncell {
            return Err(FsiError::Protocol(format!(
                "got {} indicators but the fluid mesh has {} cells",
                indicators.len(),
                ncell
            )));
        }
        self.state.indicators = indicators;
        Ok(())
    }

    /// Sets the nodal stress of the immersed solid (lower-triangle components on the fluid points)
    pub fn set_fsi_stress(&mut self, stress: Vec<Vector>) -> Result<(), FsiError> {
        let ncomp = n_tensor_component(self.space.dofs.ndim);
        let npoint = self.space.fem.npoint();
        if stress.len() != ncomp || stress.iter().any(|s| s.dim() != npoint) {
            return Err(FsiError::Protocol(format!(
                "FSI stress must have {} components with {} values each",
                ncomp, npoint
            )));
        }
        self.state.fsi_stress = stress;
        Ok(())
    }

    /// Sets the acceleration of the immersed solid at each velocity DOF
    pub fn set_fsi_acceleration(&mut self, acceleration: Vector) -> Result<(), FsiError> {
        let n = self.space.dofs.n_vector;
        if acceleration.dim() != n {
            return Err(FsiError::Protocol(format!(
                "FSI acceleration has {} values but the fluid has {} velocity DOFs",
                acceleration.dim(),
                n
            )));
        }
        self.state.fsi_acceleration = acceleration;
        Ok(())
    }

    /// Computes the prescribed velocities at time t
    fn update_prescribed_values(&mut self, t: f64) {
        let space = &self.space;
        self.values.fill(0.0);
        for (boundary_id, bc) in &self.config.dirichlet {
            for p in space.fem.boundary_points(*boundary_id) {
                let coords = &space.fem.mesh.points[p].coords;
                for i in 0..space.dofs.ndim {
                    self.values[space.dofs.vector_eq(p, i)] = bc.value(coords, t, i);
                }
            }
        }
    }

    /// Assembles the system matrix, the preconditioner and the right-hand side
    fn assemble_system(&mut self, time: &TimeState) -> Result<(), FsiError> {
        let res = self.assemble_owned_cells(time);
        agree(self.comm, "fluid assembly", res)?;
        let space = &self.space;
        let state = &mut self.state;
        let n_vector = space.dofs.n_vector;

        // gather
        self.comm.sum_in_place(self.rhs.as_mut_data());
        self.comm.sum_in_place(self.velocity_diagonal.as_mut_data());
        self.comm.sum_in_place(state.force_acceleration_part.as_mut_data());
        self.comm.sum_in_place(state.force_stress_part.as_mut_data());
        for i in 0..state.force_total.dim() {
            state.force_total[i] = state.force_acceleration_part[i] + state.force_stress_part[i];
        }
        for (eq, fixed) in space.prescribed.iter().enumerate() {
            if *fixed {
                self.rhs[eq] = self.values[eq];
                if eq < n_vector {
                    self.velocity_diagonal[eq] = 1.0;
                }
            }
        }
        self.system.compress(self.comm, &space.prescribed)?;
        self.pressure_mass.compress(self.comm, &space.prescribed[n_vector..])?;
        Ok(())
    }

    /// Computes the contributions of the cells and faces owned by this rank
    fn assemble_owned_cells(&mut self, time: &TimeState) -> Result<(), FsiError> {
        if let Some(source) = &self.indicator_source {
            source.indicators(&self.space.fem, &mut self.state.indicators)?;
        }
        self.update_prescribed_values(time.current);
        let space = &mut self.space;
        let state = &mut self.state;
        let config = &self.config;
        let ndim = space.dofs.ndim;
        let n_vector = space.dofs.n_vector;
        let dt = time.delta_t;
        self.system.reset();
        self.pressure_mass.reset();
        self.velocity_diagonal.fill(0.0);
        self.rhs.fill(0.0);
        state.force_acceleration_part.fill(0.0);
        state.force_stress_part.fill(0.0);

        for cell in &space.fem.mesh.cells {
            if !space.partition.owns_cell(cell.id) {
                continue;
            }
            let indicator = state.indicators[cell.id];
            let mass_coefficient = config.mass_coefficient(indicator.is_fluid(), dt);
            let pad = &mut space.pads[cell.id];
            let ppad = &mut space.ppads[cell.id];
            let gauss = &space.gauss[cell.id];
            let l2g = &space.local_to_global[cell.id];
            let local = calc_local_fluid_matrices(pad, ppad, gauss, mass_coefficient, config.viscosity)
                .map_err(FsiError::numerical)?;

            // right-hand side
            let nnode = cell.points.len();
            let nv = nnode * ndim;
            let mut f = Vector::new(l2g.len());
            let mut f_acc = Vector::new(l2g.len());
            let mut f_sig = Vector::new(l2g.len());
            let mut u_prev = vec![0.0; ndim];
            let mut acc = vec![0.0; ndim];
            let mut sigma = Matrix::new(ndim, ndim);
            for p in 0..gauss.npoint() {
                let ksi = gauss.coords(p);
                (pad.fn_interp)(&mut pad.interp, ksi);
                let det_jac = pad.calc_gradient(ksi).map_err(FsiError::numerical)?;
                let coef = gauss.weight(p) * det_jac;
                u_prev.fill(0.0);
                for m in 0..nnode {
                    for i in 0..ndim {
                        u_prev[i] += pad.interp[m] * state.previous_solution[l2g[m * ndim + i]];
                    }
                }
                for m in 0..nnode {
                    for i in 0..ndim {
                        f[m * ndim + i] += pad.interp[m] * (config.gravity[i] + mass_coefficient * u_prev[i]) * coef;
                    }
                }
                if indicator.is_fluid() {
                    continue;
                }
                acc.fill(0.0);
                sigma.fill(0.0);
                for (m, point_id) in cell.points.iter().enumerate() {
                    for i in 0..ndim {
                        acc[i] += pad.interp[m] * state.fsi_acceleration[l2g[m * ndim + i]];
                        for j in 0..ndim {
                            sigma.add(i, j, pad.interp[m] * state.fsi_stress[tensor_index(i, j)][*point_id]);
                        }
                    }
                }
                for m in 0..nnode {
                    for i in 0..ndim {
                        let mut s = 0.0;
                        for j in 0..ndim {
                            s += pad.gradient.get(m, j) * sigma.get(i, j);
                        }
                        f_sig[m * ndim + i] += s * coef;
                        f_acc[m * ndim + i] += config.solid_density * acc[i] * pad.interp[m] * coef;
                    }
                }
            }
            for l in 0..nv {
                f[l] += f_acc[l] + f_sig[l];
            }
            apply_lifting(&mut f, &local.system, l2g, &space.prescribed, &self.values);

            // global system and preconditioner
            assemble_matrix(&mut self.system, 1.0, &local.system, l2g, &space.prescribed);
            assemble_vector(&mut self.rhs, &f, l2g, &space.prescribed);
            assemble_vector(&mut state.force_acceleration_part, &f_acc, l2g, &space.prescribed);
            assemble_vector(&mut state.force_stress_part, &f_sig, l2g, &space.prescribed);
            for l in 0..nv {
                if !space.prescribed[l2g[l]] {
                    self.velocity_diagonal[l2g[l]] += local.velocity_diagonal[l];
                }
            }
            let l2g_p: Vec<_> = l2g[nv..].iter().map(|g| g - n_vector).collect();
            assemble_matrix(
                &mut self.pressure_mass,
                1.0,
                &local.pressure_mass,
                &l2g_p,
                &space.prescribed[n_vector..],
            );
        }

        // prescribed pressure on open boundaries
        for (index, pad, gauss) in space.neumann_pads.iter_mut() {
            let face = &space.fem.faces[*index];
            let pressure = match config.neumann_pressure.get(&face.boundary_id) {
                Some(p) => *p,
                None => continue,
            };
            let mut f_local = Vector::new(face.points.len() * ndim);
            let mut args = integ::CommonArgs::new(pad, gauss);
            integ::vec_02_nv_bry(&mut f_local, &mut args, |v, _, un, _| {
                for i in 0..ndim {
                    v[i] = -pressure * un[i];
                }
                Ok(())
            })
            .map_err(FsiError::numerical)?;
            let l2g: Vec<_> = face
                .points
                .iter()
                .flat_map(|p| (0..ndim).map(move |i| p * ndim + i))
                .collect();
            assemble_vector(&mut self.rhs, &f_local, &l2g, &space.prescribed);
        }
        Ok(())
    }

    /// Solves the saddle-point system
    fn solve_system(&mut self) -> Result<(), FsiError> {
        let n = self.space.dofs.n_equation;
        let precond = BlockDiagonal::new(
            self.velocity_diagonal.as_data(),
            &self.pressure_mass,
            n,
            INNER_SOLVER_TOLERANCE,
        )
        .map_err(FsiError::numerical)?;
        let report = minres(
            &self.system,
            &mut self.state.solution,
            &self.rhs,
            &precond,
            FLUID_SOLVER_TOLERANCE,
            n,
        )?;
        log::debug!(
            "fluid MINRES: {} iterations, residual = {:.6e}",
            report.iterations,
            report.residual
        );
        Ok(())
    }

    /// Computes the nodal fluid stress -pI + 2ν sym∇u
    pub fn update_stress(&mut self) -> Result<(), FsiError> {
        let ndim = self.space.dofs.ndim;
        let viscosity = self.config.viscosity;
        let l2g = &self.space.local_to_global;
        let ppads = &mut self.space.ppads;
        let solution = &self.state.solution;
        let mut stress = mem::take(&mut self.state.stress);
        let res = self.space.recovery.recover(
            &self.space.fem,
            &self.space.partition,
            self.comm,
            &mut stress,
            |cell_id, pad, ksi, values| {
                let mut grad = Matrix::new(ndim, ndim);
                calculate_field_gradient(&mut grad, solution, &l2g[cell_id], ksi, pad)
                    .map_err(FsiError::numerical)?;
                let offset = ndim * pad.kind.nnode();
                let p = interpolate_pressure(&mut ppads[cell_id], solution, &l2g[cell_id], offset, ksi);
                for i in 0..ndim {
                    for j in 0..=i {
                        let mut s = viscosity * (grad.get(i, j) + grad.get(j, i));
                        if i == j {
                            s -= p;
                        }
                        values[tensor_index(i, j)] = s;
                    }
                }
                Ok(())
            },
        );
        self.state.stress = stress;
        res
    }

    /// Returns the pressure at every point, including the points without a pressure DOF
    ///
    /// The corner interpolation is extrapolated from the integration points
    /// and averaged at the nodes, as the nodal stress.
    pub fn nodal_pressure(&mut self) -> Result<Vector, FsiError> {
        let ndim = self.space.dofs.ndim;
        let l2g = &self.space.local_to_global;
        let ppads = &mut self.space.ppads;
        let solution = &self.state.solution;
        let mut nodal = vec![Vector::new(self.space.fem.npoint())];
        self.space.recovery.recover(
            &self.space.fem,
            &self.space.partition,
            self.comm,
            &mut nodal,
            |cell_id, pad, ksi, values| {
                let offset = ndim * pad.kind.nnode();
                values[0] = interpolate_pressure(&mut ppads[cell_id], solution, &l2g[cell_id], offset, ksi);
                Ok(())
            },
        )?;
        Ok(nodal.remove(0))
    }

    /// Returns the drag and lift coefficients of the body
    ///
    /// Integrates the traction `σ·(-n)` of the nodal fluid stress over the
    /// faces of the body boundary and scales the force by `0.5 ρ_f U² D`.
    pub fn drag_lift(&mut self) -> Result<(f64, f64), FsiError> {
        let ndim = self.space.dofs.ndim;
        let stress = &self.state.stress;
        let mut force = vec![0.0; ndim];
        for (index, pad, gauss) in self.space.drag_pads.iter_mut() {
            let face = &self.space.fem.faces[*index];
            let nnode = face.points.len();
            let mut f_local = Vector::new(nnode * ndim);
            let mut args = integ::CommonArgs::new(pad, gauss);
            integ::vec_02_nv_bry(&mut f_local, &mut args, |v, _, un, nn| {
                for i in 0..ndim {
                    v[i] = 0.0;
                    for j in 0..ndim {
                        let k = tensor_index(i, j);
                        let mut sigma = 0.0;
                        for m in 0..nnode {
                            sigma += nn[m] * stress[k][face.points[m]];
                        }
                        v[i] -= sigma * un[j];
                    }
                }
                Ok(())
            })
            .map_err(FsiError::numerical)?;
            for m in 0..nnode {
                for i in 0..ndim {
                    force[i] += f_local[m * ndim + i];
                }
            }
        }
        self.comm.sum_in_place(&mut force);
        let reference = &self.config.drag_lift;
        let scale = 2.0
            / (self.config.fluid_density
                * reference.reference_velocity
                * reference.reference_velocity
                * reference.diameter);
        Ok((force[0] * scale, force[1] * scale))
    }

    /// Writes the norms, the energy estimates and the drag and lift coefficients
    fn write_diagnostics(&mut self, time: &TimeState) -> Result<(), FsiError> {
        let space = &mut self.space;
        let ndim = space.dofs.ndim;
        let dt = time.delta_t;
        let nu = self.config.viscosity;
        let solution = &self.state.solution;
        let previous = &self.state.previous_solution;
        let (mut ind_l2, mut ind_max) = (0.0, 0.0);
        let (mut vel_l2, mut div_l2, mut grad_p_l2) = (0.0, 0.0, 0.0);
        let (mut ke, mut visc, mut p_div, mut alg) = (0.0, 0.0, 0.0, 0.0);
        let (mut alg_art, mut ke_art, mut visc_art) = (0.0, 0.0, 0.0);
        let mut u = vec![0.0; ndim];
        let mut du = vec![0.0; ndim];
        let mut grad_p = vec![0.0; ndim];
        let mut grad = Matrix::new(ndim, ndim);
        for cell in &space.fem.mesh.cells {
            if !space.partition.owns_cell(cell.id) {
                continue;
            }
            let indicator = self.state.indicators[cell.id];
            let artificial = indicator == CellIndicator::Solid;
            let rho = if artificial {
                self.config.solid_density
            } else {
                self.config.fluid_density
            };
            let pad = &mut space.pads[cell.id];
            let ppad = &mut space.ppads[cell.id];
            let gauss = &space.gauss[cell.id];
            let l2g = &space.local_to_global[cell.id];
            let nnode = cell.points.len();
            let offset = nnode * ndim;
            for p in 0..gauss.npoint() {
                let ksi = gauss.coords(p);
                (pad.fn_interp)(&mut pad.interp, ksi);
                let det_jac =
                    calculate_field_gradient(&mut grad, solution, l2g, ksi, pad).map_err(FsiError::numerical)?;
                let coef = gauss.weight(p) * det_jac;
                let pressure = interpolate_pressure(ppad, solution, l2g, offset, ksi);
                ppad.calc_gradient(ksi).map_err(FsiError::numerical)?;
                grad_p.fill(0.0);
                for k in 0..ppad.kind.nnode() {
                    for j in 0..ndim {
                        grad_p[j] += ppad.gradient.get(k, j) * solution[l2g[offset + k]];
                    }
                }
                u.fill(0.0);
                du.fill(0.0);
                for m in 0..nnode {
                    for i in 0..ndim {
                        let eq = l2g[m * ndim + i];
                        u[i] += pad.interp[m] * solution[eq];
                        du[i] += pad.interp[m] * (solution[eq] - previous[eq]);
                    }
                }
                let u2: f64 = u.iter().map(|x| x * x).sum();
                let du2: f64 = du.iter().map(|x| x * x).sum();
                let mut div = 0.0;
                let mut eps_eps = 0.0;
                for i in 0..ndim {
                    div += grad.get(i, i);
                    for j in 0..ndim {
                        let eps = 0.5 * (grad.get(i, j) + grad.get(j, i));
                        eps_eps += eps * eps;
                    }
                }
                if artificial {
                    ind_l2 += u2 * coef;
                    ind_max = f64::max(ind_max, f64::sqrt(u2));
                    ke_art += 0.5 * rho * u2 * coef;
                    visc_art += 2.0 * nu * eps_eps * coef;
                    alg_art += 0.5 * rho / dt * du2 * coef;
                } else {
                    vel_l2 += u2 * coef;
                    div_l2 += div * div * coef;
                    ke += 0.5 * rho * u2 * coef;
                    visc += 2.0 * nu * eps_eps * coef;
                    p_div += pressure * div * coef;
                    alg += 0.5 * rho / dt * du2 * coef;
                }
                if indicator == CellIndicator::Fluid {
                    grad_p_l2 += grad_p.iter().map(|x| x * x).sum::<f64>() * coef;
                }
            }
        }
        let mut sums = [
            ind_l2, vel_l2, div_l2, grad_p_l2, ke, visc, p_div, alg, alg_art, ke_art, visc_art,
        ];
        self.comm.sum_in_place(&mut sums);
        let ind_max = self.comm.max(ind_max);
        let t = time.current;
        let sink = &self.sink;
        sink.record("ind_vel_norm.txt", IND_VEL_HEADER, t, &[f64::sqrt(sums[0]), ind_max])?;
        sink.record("velocity_L2_norm.txt", VELOCITY_HEADER, t, &[f64::sqrt(sums[1])])?;
        sink.record("divergence_L2_norm.txt", DIVERGENCE_HEADER, t, &[f64::sqrt(sums[2])])?;
        sink.record("gradp_L2_norm.txt", GRAD_P_HEADER, t, &[f64::sqrt(sums[3])])?;
        sink.record("energy_estimates.txt", ENERGY_HEADER, t, &sums[4..])?;
        if self.space.has_drag_boundary {
            let (cd, cl) = self.drag_lift()?;
            let line = format!("{}\t{}\t{}\t{}", time.step, t, cd, cl);
            self.sink
                .record_line("drag_lift_history.txt", DRAG_LIFT_HEADER, time.step == 0, &line)?;
        }
        Ok(())
    }

    /// Allocates the system storage for the current space
    fn allocate(&mut self) {
        let dofs = &self.space.dofs;
        let n = dofs.n_equation;
        self.system = SystemMatrix::new(n);
        self.pressure_mass = SystemMatrix::new(dofs.n_scalar);
        self.velocity_diagonal = Vector::new(dofs.n_vector);
        self.rhs = Vector::new(n);
        self.values = Vector::new(n);
    }
}

impl<'a> Integrator for FluidIntegrator<'a> {
    fn name(&self) -> &'static str {
        "fluid"
    }

    fn initialize(&mut self, _time: &TimeState) -> Result<(), FsiError> {
        log::info!(
            "fluid: {} velocity DOFs, {} pressure DOFs, pressure pinned at equation {}",
            self.space.dofs.n_vector,
            self.space.dofs.n_scalar,
            self.space.pin.equation
        );
        self.initialized = true;
        Ok(())
    }

    fn assemble(&mut self, time: &TimeState) -> Result<(), FsiError> {
        if !self.initialized {
            return Err(FsiError::Config("the fluid integrator must be initialized first".to_string()));
        }
        self.assemble_system(time)
    }

    fn solve_step(&mut self, time: &TimeState) -> Result<(), FsiError> {
        if time.step > 0 {
            self.solve_system()?;
        }
        self.state.t = time.current;
        self.update_stress()?;
        self.write_diagnostics(time)?;
        self.state.advance();
        log::info!("fluid: step {} at t = {:e} done", time.step, time.current);
        Ok(())
    }

    fn output(&mut self, time: &TimeState, writer: &mut OutputWriter) -> Result<(), FsiError> {
        writer.write_snapshot(&self.state, time.current)?;
        self.comm.barrier();
        Ok(())
    }

    fn checkpoint_names(&self) -> &'static [&'static str] {
        &["solution"]
    }

    fn checkpoint_fields(&self) -> Vec<&Vector> {
        vec![&self.state.solution]
    }

    fn restore_fields(&mut self, fields: &[Vector]) -> Result<(), FsiError> {
        if fields.len() != 1 {
            return Err(FsiError::Protocol(format!("expected 1 fluid field, got {}", fields.len())));
        }
        self.state.install(&fields[0])
    }

    fn refine(&mut self, refiner: &mut dyn Refiner) -> Result<bool, FsiError> {
        let pressure = self.nodal_pressure()?;
        let n_vector = self.space.dofs.n_vector;
        let velocity = Vector::from(&self.state.solution.as_data()[0..n_vector].to_vec());
        let (fem, data) = match refiner.refine(&self.space.fem, &[&velocity, &pressure])? {
            Some(res) => res,
            None => return Ok(false),
        };
        if data.len() != 2 {
            return Err(FsiError::Protocol(format!("refiner returned {} fields instead of 2", data.len())));
        }
        let t = self.state.t;
        self.space = FluidSpace::new(fem, &self.config, self.comm)?;
        let dofs = &self.space.dofs;
        let npoint = self.space.fem.npoint();
        if data[0].dim() != dofs.n_vector || data[1].dim() != npoint {
            return Err(FsiError::Protocol(format!(
                "transferred fields have {} and {} values but the refined fluid needs {} and {}",
                data[0].dim(),
                data[1].dim(),
                dofs.n_vector,
                npoint
            )));
        }
        let mut solution = Vector::new(dofs.n_equation);
        solution.as_mut_data()[0..dofs.n_vector].copy_from_slice(data[0].as_data());
        for (p, eq) in dofs.scalar_points() {
            solution[eq] = data[1][p];
        }
        self.state = FluidState::new(dofs, npoint, self.space.fem.ncell());
        self.state.install(&solution)?;
        self.state.t = t;
        self.allocate();
        log::info!("fluid: mesh refined to {} cells", self.space.fem.ncell());
        Ok(true)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::{calc_local_fluid_matrices, FluidIntegrator};
    use crate::base::{DragLift, FluidConfig, SampleMeshes, SerialComm, VelocityBc, BOTTOM, LEFT, RIGHT, TOP};
    use crate::fem::{CellIndicator, DiagnosticsSink, Integrator, TimeState};
    use gemlab::integ::Gauss;
    use gemlab::shapes::{GeoKind, Scratchpad};
    use russell_lab::{approx_eq, Vector};

    fn stepping_time() -> TimeState {
        let mut time = TimeState::new(1.0, 0.1, 0.0, 0.0, 0.0).unwrap();
        time.initialize();
        time.increment();
        time
    }

    #[test]
    fn mass_coefficient_follows_the_indicator() {
        // 2 × 2 reference-sized cell, thus det(J) = 1
        let fem = SampleMeshes::rectangle(1, 1, 2.0, 2.0, GeoKind::Qua9, 1).unwrap();
        let cell = &fem.mesh.cells[0];
        let mut pad = Scratchpad::new(2, cell.kind).unwrap();
        fem.mesh.set_pad(&mut pad, &cell.points);
        let mut ppad = Scratchpad::new(2, GeoKind::Qua4).unwrap();
        fem.mesh.set_pad(&mut ppad, &cell.points[0..4]);
        let gauss = Gauss::new(cell.kind);

        let mut config = FluidConfig::new(2);
        config.set_fluid(1.5, 0.3).unwrap().set_immersed_solid(4.0, 0.5).unwrap();
        let dt = 0.1;
        let c_fluid = config.mass_coefficient(CellIndicator::Fluid.is_fluid(), dt);
        let c_solid = config.mass_coefficient(CellIndicator::Solid.is_fluid(), dt);
        approx_eq(c_fluid, 15.0, 1e-14);
        approx_eq(c_solid, 60.0, 1e-13);

        let fluid = calc_local_fluid_matrices(&mut pad, &mut ppad, &gauss, c_fluid, 0.3).unwrap();
        let solid = calc_local_fluid_matrices(&mut pad, &mut ppad, &gauss, c_solid, 0.3).unwrap();

        // ∫ N₀² over the cell = (4/15)²
        let n0n0 = 16.0 / 225.0;
        approx_eq(fluid.system.get(0, 0) - solid.system.get(0, 0), (c_fluid - c_solid) * n0n0, 1e-12);
        approx_eq(
            fluid.velocity_diagonal[1] - solid.velocity_diagonal[1],
            (c_fluid - c_solid) * n0n0,
            1e-12,
        );

        // symmetry and the pressure mass (area / ν)
        let n = fluid.system.nrow();
        assert_eq!(n, 22);
        for i in 0..n {
            for j in 0..n {
                approx_eq(fluid.system.get(i, j), fluid.system.get(j, i), 1e-13);
            }
        }
        let mut total = 0.0;
        for k in 0..4 {
            for l in 0..4 {
                total += fluid.pressure_mass.get(k, l);
            }
        }
        approx_eq(total, 4.0 / 0.3, 1e-12);
        // the pressure block is zero
        for k in 18..22 {
            for l in 18..22 {
                assert_eq!(fluid.system.get(k, l), 0.0);
            }
        }
    }

    #[test]
    fn new_captures_errors() {
        let sink = DiagnosticsSink::disabled();
        let config = FluidConfig::new(2);
        let fem = SampleMeshes::rectangle(1, 1, 1.0, 1.0, GeoKind::Qua4, 1).unwrap();
        let err = FluidIntegrator::new(&SerialComm, fem, &config, sink.clone()).err().unwrap();
        assert_eq!(
            err.to_string(),
            "configuration error: cell 0 has degree 1 but the velocity degree is 2"
        );

        let mut config = FluidConfig::new(2);
        config.set_degrees(2, 2).unwrap();
        let fem = SampleMeshes::rectangle(1, 1, 1.0, 1.0, GeoKind::Qua9, 1).unwrap();
        let err = FluidIntegrator::new(&SerialComm, fem.clone(), &config, sink.clone()).err().unwrap();
        assert!(err.is_config());

        let config = FluidConfig::new(2);
        let mut fluid = FluidIntegrator::new(&SerialComm, fem, &config, sink).unwrap();
        assert!(fluid.set_indicators(vec![CellIndicator::Solid; 2]).unwrap_err().is_protocol());
        assert!(fluid.set_fsi_acceleration(Vector::new(3)).unwrap_err().is_protocol());
        assert!(fluid.set_fsi_stress(vec![Vector::new(9); 2]).unwrap_err().is_protocol());
        fluid.set_indicators(vec![CellIndicator::Solid]).unwrap();
        let time = stepping_time();
        assert!(fluid.assemble(&time).unwrap_err().is_config());
    }

    #[test]
    fn hydrostatic_pressure_is_recovered() {
        // closed box under gravity: u = 0 and p = -g y (pinned at the origin)
        let fem = SampleMeshes::rectangle(2, 2, 1.0, 1.0, GeoKind::Qua9, 1).unwrap();
        let mut config = FluidConfig::new(2);
        config
            .set_gravity(&[0.0, -2.0])
            .unwrap()
            .set_drag_lift(DragLift {
                boundary_id: TOP,
                diameter: 1.0,
                reference_velocity: 1.0,
            })
            .unwrap();
        for side in [LEFT, RIGHT, BOTTOM, TOP] {
            config.set_dirichlet(side, VelocityBc::Zero).unwrap();
        }
        let mut fluid = FluidIntegrator::new(&SerialComm, fem, &config, DiagnosticsSink::disabled()).unwrap();
        assert_eq!(fluid.pressure_pin().equation, fluid.dofs().scalar_eq(0).unwrap());
        let time = stepping_time();
        fluid.initialize(&time).unwrap();
        fluid.assemble(&time).unwrap();
        fluid.solve_step(&time).unwrap();
        let fem = fluid.fem().clone();
        for point in &fem.mesh.points {
            approx_eq(fluid.velocity(point.id, 0), 0.0, 1e-9);
            approx_eq(fluid.velocity(point.id, 1), 0.0, 1e-9);
            if let Some(p) = fluid.pressure(point.id) {
                approx_eq(p, -2.0 * point.coords[1], 1e-8);
            }
        }
        // σ = -pI = 2y I; the top face (n = +y) gets the traction σ·(-n) = (0, -2)
        let (cd, cl) = fluid.drag_lift().unwrap();
        approx_eq(cd, 0.0, 1e-7);
        approx_eq(cl, -4.0, 1e-7);
        // the linear pressure is recovered exactly at the mid-side and center points
        let nodal = fluid.nodal_pressure().unwrap();
        for point in &fem.mesh.points {
            approx_eq(nodal[point.id], -2.0 * point.coords[1], 1e-8);
        }
    }

    #[test]
    fn uniform_flow_is_preserved() {
        let fem = SampleMeshes::rectangle(2, 2, 1.0, 1.0, GeoKind::Qua9, 1).unwrap();
        let mut config = FluidConfig::new(2);
        config.set_fluid(1.0, 0.1).unwrap();
        for side in [LEFT, RIGHT, BOTTOM, TOP] {
            config.set_dirichlet(side, VelocityBc::Constant(vec![1.0, 0.0])).unwrap();
        }
        let mut fluid = FluidIntegrator::new(&SerialComm, fem, &config, DiagnosticsSink::disabled()).unwrap();
        let n = fluid.dofs().n_equation;
        let mut initial = Vector::new(n);
        for p in 0..fluid.fem().npoint() {
            initial[2 * p] = 1.0;
        }
        fluid.restore_fields(&[initial]).unwrap();
        let time = stepping_time();
        fluid.initialize(&time).unwrap();
        fluid.assemble(&time).unwrap();
        fluid.solve_step(&time).unwrap();
        // center point of the mesh (free)
        approx_eq(fluid.velocity(12, 0), 1.0, 1e-9);
        approx_eq(fluid.velocity(12, 1), 0.0, 1e-9);
        for p in 0..fluid.fem().npoint() {
            if let Some(pressure) = fluid.pressure(p) {
                approx_eq(pressure, 0.0, 1e-8);
            }
        }
        assert_eq!(fluid.state.previous_solution[24], fluid.state.solution[24]);
    }

    #[test]
    fn immersed_cells_receive_the_solid_force() {
        // uniform solid acceleration a = (1, 0) over the whole (single) cell
        let fem = SampleMeshes::rectangle(1, 1, 1.0, 1.0, GeoKind::Qua9, 1).unwrap();
        let mut config = FluidConfig::new(2);
        config.set_immersed_solid(3.0, 0.0).unwrap();
        let mut fluid = FluidIntegrator::new(&SerialComm, fem, &config, DiagnosticsSink::disabled()).unwrap();
        let mut acc = Vector::new(18);
        for p in 0..9 {
            acc[2 * p] = 1.0;
        }
        fluid.set_fsi_acceleration(acc).unwrap();
        fluid.set_indicators(vec![CellIndicator::Solid]).unwrap();
        let time = stepping_time();
        fluid.initialize(&time).unwrap();
        fluid.assemble(&time).unwrap();
        // Σ ρ_s a·φ = ρ_s × area along x; the stress part vanishes (zero stress)
        let total_x: f64 = (0..9).map(|p| fluid.state.force_total[2 * p]).sum();
        let total_y: f64 = (0..9).map(|p| fluid.state.force_total[2 * p + 1]).sum();
        approx_eq(total_x, 3.0, 1e-13);
        approx_eq(total_y, 0.0, 1e-13);
        let stress_part: f64 = fluid.state.force_stress_part.as_data().iter().map(|x| x.abs()).sum();
        assert_eq!(stress_part, 0.0);
    }
}
