use crate::base::{Communicator, CouplingConfig, FemMesh, FsiError, PenaltyMode};
use crate::fem::{Integrator, OutputWriter, SolidIntegrator, TimeState};
use russell_lab::Vector;

/// Holds the sizes of the structured grid of the external code
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GridCounts {
    /// Number of nodes along one direction (ghost nodes included)
    pub nodes_one_dir: usize,

    /// Total number of nodes
    pub n_node: usize,

    /// Total number of cells
    pub n_cell: usize,
}

/// Holds the indices of the nodes and cells of the external grid that are not ghosts
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NonGhostIndices {
    pub nodes: Vec<usize>,
    pub cells: Vec<usize>,
}

/// Returns the interior indices of a structured grid carrying one ghost layer
///
/// The grid is numbered x-fastest, then y, then z. In 2D all indices with a
/// ghost row or column are skipped; in 3D the first and last z-layers are
/// skipped as well.
pub fn find_non_ghost_indices(ndim: usize, counts: &GridCounts) -> Result<NonGhostIndices, FsiError> {
    let n1 = counts.nodes_one_dir;
    if n1 < 3 {
        return Err(FsiError::Protocol(format!(
            "external grid has {} nodes along one direction (at least 3 are needed)",
            n1
        )));
    }
    let e1 = match ndim {
        2 => f64::sqrt(counts.n_cell as f64).round() as usize,
        3 => f64::cbrt(counts.n_cell as f64).round() as usize,
        _ => return Err(FsiError::Config(format!("ndim = {} is invalid", ndim))),
    };
    if e1 < 3 {
        return Err(FsiError::Protocol(format!(
            "external grid has {} cells (at least 3 along each direction are needed)",
            counts.n_cell
        )));
    }
    let node_layers = counts.n_node / (n1 * n1);
    let cell_layers = counts.n_cell / (e1 * e1);
    let (node_range, cell_range) = if ndim == 3 {
        (1..node_layers.saturating_sub(1), 1..cell_layers.saturating_sub(1))
    } else {
        (0..node_layers, 0..cell_layers)
    };
    let mut res = NonGhostIndices::default();
    for l in node_range {
        let corner = l * n1 * n1 + n1 + 1;
        for i in 0..(n1 - 2) {
            for j in 0..(n1 - 2) {
                res.nodes.push(corner + j + i * n1);
            }
        }
    }
    for l in cell_range {
        let corner = l * e1 * e1 + e1 + 1;
        for i in 0..(e1 - 2) {
            for j in 0..(e1 - 2) {
                res.cells.push(corner + j + i * e1);
            }
        }
    }
    Ok(res)
}

/// Exchanges data with an external flow code running on other ranks
///
/// All processes (including the external ones) call the collectives in the
/// same order. The nodal buffers exchanged with each peer hold the values of
/// the configured points, in that order; a buffer of another size is a
/// protocol error.
///
/// The exchange stays active while at least one process reports active data;
/// it ends at the same step on every process once all of them report inactive.
pub struct ExternalCoupling<'a> {
    comm: &'a dyn Communicator,
    config: CouplingConfig,
    counts: GridCounts,
    active: bool,
    non_ghost: Option<NonGhostIndices>,
}

impl<'a> ExternalCoupling<'a> {
    /// Allocates a new instance
    pub fn new(comm: &'a dyn Communicator, config: &CouplingConfig) -> Result<Self, FsiError> {
        if let Some(message) = config.validate(comm.rank(), comm.size()) {
            return Err(FsiError::Config(message));
        }
        Ok(ExternalCoupling {
            comm,
            config: config.clone(),
            counts: GridCounts::default(),
            active: true,
            non_ghost: None,
        })
    }

    /// Returns true while the exchange goes on
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Returns the agreed grid sizes
    pub fn counts(&self) -> GridCounts {
        self.counts
    }

    /// Returns the interior indices of the external grid (after [ExternalCoupling::check_mesh])
    pub fn non_ghost(&self) -> Option<&NonGhostIndices> {
        self.non_ghost.as_ref()
    }

    /// Agrees on the grid sizes with a max-reduction over all processes
    ///
    /// Processes that do not know the sizes contribute zeros.
    pub fn agree_counts(&mut self, local: GridCounts) -> GridCounts {
        self.counts = GridCounts {
            nodes_one_dir: self.comm.max_usize(local.nodes_one_dir),
            n_node: self.comm.max_usize(local.n_node),
            n_cell: self.comm.max_usize(local.n_cell),
        };
        self.counts
    }

    /// Updates the activity flag; returns true while some process is active
    pub fn update_activity(&mut self, local_active: bool) -> bool {
        self.active = !self.comm.all_inactive(local_active);
        self.active
    }

    /// Agrees on Δt with a max-reduction, then advances the clock
    pub fn agree_delta_t(&self, time: &mut TimeState, local_delta_t: f64) -> Result<(), FsiError> {
        let delta_t = self.comm.max(local_delta_t);
        time.set_delta_t(delta_t)?;
        time.increment();
        Ok(())
    }

    /// Checks the local mesh against the interior of the agreed external grid
    pub fn check_mesh(&mut self, fem: &FemMesh) -> Result<&NonGhostIndices, FsiError> {
        let indices = if self.config.ghost_layer {
            find_non_ghost_indices(fem.ndim(), &self.counts)?
        } else {
            NonGhostIndices {
                nodes: (0..self.counts.n_node).collect(),
                cells: (0..self.counts.n_cell).collect(),
            }
        };
        if indices.nodes.len() != fem.npoint() || indices.cells.len() != fem.ncell() {
            return Err(FsiError::Protocol(format!(
                "external grid has {} interior nodes and {} interior cells but the mesh has {} points and {} cells",
                indices.nodes.len(),
                indices.cells.len(),
                fem.npoint(),
                fem.ncell()
            )));
        }
        Ok(self.non_ghost.insert(indices))
    }

    /// Sends the values of a nodal field (`ncomp` values per point) to every peer
    pub fn send_nodal(&self, field: &Vector, ncomp: usize) -> Result<(), FsiError> {
        for peer in &self.config.peers {
            let mut buffer = Vec::with_capacity(peer.points.len() * ncomp);
            for p in &peer.points {
                for k in 0..ncomp {
                    let index = p * ncomp + k;
                    if index >= field.dim() {
                        return Err(FsiError::Protocol(format!(
                            "point {} is out of range of a field with {} values",
                            p,
                            field.dim()
                        )));
                    }
                    buffer.push(field[index]);
                }
            }
            self.comm.send(peer.rank, &buffer)?;
        }
        Ok(())
    }

    /// Receives the values of a nodal field (`ncomp` values per point) from every peer
    ///
    /// Values of points not exchanged with any peer are left unchanged.
    pub fn recv_nodal(&self, field: &mut Vector, ncomp: usize) -> Result<(), FsiError> {
        for peer in &self.config.peers {
            let buffer = self.comm.recv(peer.rank)?;
            let expected = peer.points.len() * ncomp;
            if buffer.len() != expected {
                return Err(FsiError::Protocol(format!(
                    "rank {} sent {} values but {} were expected",
                    peer.rank,
                    buffer.len(),
                    expected
                )));
            }
            for (m, p) in peer.points.iter().enumerate() {
                for k in 0..ncomp {
                    let index = p * ncomp + k;
                    if index >= field.dim() {
                        return Err(FsiError::Protocol(format!(
                            "point {} is out of range of a field with {} values",
                            p,
                            field.dim()
                        )));
                    }
                    field[index] = buffer[m * ncomp + k];
                }
            }
        }
        Ok(())
    }

    /// Receives the penalty velocity difference and the added mass of the solid
    pub fn receive_penalty(&self, solid: &mut SolidIntegrator) -> Result<(), FsiError> {
        let ndim = solid.dofs().ndim;
        let n = solid.dofs().n_equation;
        if solid.config().penalty != PenaltyMode::Off {
            let mut difference = Vector::new(n);
            self.recv_nodal(&mut difference, ndim)?;
            solid.set_velocity_difference(difference)?;
        }
        if solid.config().added_mass {
            let mut added_mass = Vector::new(n);
            self.recv_nodal(&mut added_mass, ndim)?;
            solid.set_added_mass(added_mass)?;
        }
        Ok(())
    }

    /// Runs the solid driven by the external code
    ///
    /// The external code sets Δt and decides when the run ends; the end time
    /// of the clock is ignored. Each step receives the penalty data, solves
    /// the solid and sends back the solid velocity.
    pub fn run_solid(
        &mut self,
        solid: &mut SolidIntegrator,
        time: &mut TimeState,
        writer: &mut OutputWriter,
    ) -> Result<(), FsiError> {
        let ndim = solid.dofs().ndim;
        solid.initialize(time)?;
        time.initialize();
        self.agree_counts(GridCounts::default());
        solid.assemble(time)?;
        solid.solve_step(time)?;
        solid.output(time, writer)?;
        self.send_nodal(&solid.state.velocity, ndim)?;
        while self.active {
            self.agree_delta_t(time, 0.0)?;
            self.receive_penalty(solid)?;
            solid.assemble(time)?;
            solid.solve_step(time)?;
            if time.time_to_output() {
                solid.output(time, writer)?;
            }
            self.send_nodal(&solid.state.velocity, ndim)?;
            self.update_activity(false);
        }
        writer.write_summary()?;
        log::info!(
            "coupling: external code finished at t = {:e} after {} steps",
            time.current,
            time.step
        );
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
