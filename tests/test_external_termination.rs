use fsisim::coupling::{ExternalCoupling, GridCounts};
use fsisim::prelude::*;
use gemlab::shapes::GeoKind;
use russell_lab::Vector;
use std::thread;

// Rank 0 runs the fluid wrapper; ranks 1 and 2 mock the external flow code.
// The mocks stop reporting activity at different steps; the exchange ends at
// the same step everywhere.
#[test]
fn test_external_termination() -> Result<(), FsiError> {
    let fem = SampleMeshes::rectangle(2, 2, 1.0, 1.0, GeoKind::Qua4, 1)?;
    let npoint = fem.npoint();
    let counts = GridCounts {
        nodes_one_dir: 5,
        n_node: 25,
        n_cell: 16,
    };
    let last_active = [0, 2, 4];
    let comms = LocalComm::create(3);
    let steps: Vec<usize> = thread::scope(|s| {
        let fem = &fem;
        let handles: Vec<_> = comms
            .iter()
            .map(|comm| {
                s.spawn(move || {
                    let rank = comm.rank();
                    if rank == 0 {
                        // the first mock sends the bottom row and the second one the rest
                        let mut coupling_config = CouplingConfig::new();
                        coupling_config.add_peer(1, &[0, 1, 2]).unwrap();
                        coupling_config.add_peer(2, &[3, 4, 5, 6, 7, 8]).unwrap();
                        let mut config = FluidConfig::new(2);
                        config.set_degrees(1, 1).unwrap();
                        let mut wrapper =
                            ExternalFluidWrapper::new(comm, fem.clone(), &config, &coupling_config).unwrap();
                        let mut time = TimeState::new(1.0, 1.0, 0.0, 0.0, 0.0).unwrap();
                        let mut writer = OutputWriter::new();
                        wrapper.run(&mut time, &mut writer).unwrap();
                        assert_eq!(writer.count(), 1);
                        assert_eq!(wrapper.velocity[0], 1.0);
                        assert_eq!(wrapper.velocity[2 * 8 + 1], 2.0);
                        time.step
                    } else {
                        let points: Vec<_> = if rank == 1 { vec![0, 1, 2] } else { vec![3, 4, 5, 6, 7, 8] };
                        let mut coupling_config = CouplingConfig::new();
                        coupling_config.add_peer(0, &points).unwrap();
                        let mut coupling = ExternalCoupling::new(comm, &coupling_config).unwrap();
                        let mut time = TimeState::new(1.0, 0.001, 0.0, 0.0, 0.0).unwrap();
                        time.initialize();
                        coupling.agree_counts(counts);
                        let velocity = Vector::filled(2 * npoint, rank as f64);
                        let mut step = 0;
                        while coupling.is_active() {
                            step += 1;
                            coupling.agree_delta_t(&mut time, 0.001).unwrap();
                            coupling.agree_counts(counts);
                            coupling.send_nodal(&velocity, 2).unwrap();
                            coupling.update_activity(step < last_active[rank]);
                        }
                        time.step
                    }
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert_eq!(steps, &[4, 4, 4]);
    Ok(())
}
