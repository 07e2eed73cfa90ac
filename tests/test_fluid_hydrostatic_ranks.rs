use fsisim::base::{BOTTOM, LEFT, RIGHT, TOP};
use fsisim::prelude::*;
use gemlab::shapes::GeoKind;
use russell_lab::approx_eq;
use std::thread;

// Closed box under gravity: u = 0 and p = -g y with the pressure pinned at the
// origin. Every partition must find the same solution.
fn solve(comm: &dyn Communicator) -> Result<Vec<f64>, FsiError> {
    let fem = SampleMeshes::rectangle(2, 2, 1.0, 1.0, GeoKind::Qua9, 1)?;
    let mut config = FluidConfig::new(2);
    config.set_gravity(&[0.0, -3.0])?;
    for side in [LEFT, RIGHT, BOTTOM, TOP] {
        config.set_dirichlet(side, VelocityBc::Zero)?;
    }
    let mut fluid = FluidIntegrator::new(comm, fem, &config, DiagnosticsSink::disabled())?;
    let mut time = TimeState::new(1.0, 0.1, 0.0, 0.0, 0.0)?;
    time.initialize();
    time.increment();
    fluid.initialize(&time)?;
    fluid.assemble(&time)?;
    fluid.solve_step(&time)?;
    let fem = fluid.fem().clone();
    let mut pressures = Vec::new();
    for point in &fem.mesh.points {
        approx_eq(fluid.velocity(point.id, 0), 0.0, 1e-9);
        approx_eq(fluid.velocity(point.id, 1), 0.0, 1e-9);
        if let Some(p) = fluid.pressure(point.id) {
            approx_eq(p, -3.0 * point.coords[1], 1e-8);
            pressures.push(p);
        }
    }
    Ok(pressures)
}

#[test]
fn test_fluid_hydrostatic_ranks() -> Result<(), FsiError> {
    let serial = solve(&SerialComm)?;
    assert_eq!(serial.len(), 9);
    for size in [2, 4] {
        let comms = LocalComm::create(size);
        let results: Vec<_> = thread::scope(|s| {
            let handles: Vec<_> = comms
                .iter()
                .map(|comm| s.spawn(move || solve(comm).map_err(|e| e.to_string())))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for res in results {
            let pressures = res.unwrap();
            for (p, q) in pressures.iter().zip(&serial) {
                approx_eq(*p, *q, 1e-8);
            }
        }
    }
    Ok(())
}
