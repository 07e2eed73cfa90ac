use fsisim::base::{BOTTOM, LEFT, RIGHT, TOP};
use fsisim::prelude::*;
use gemlab::shapes::GeoKind;
use structopt::StructOpt;

/// Command line options
#[derive(StructOpt, Debug)]
#[structopt(name = "fsisim", about = "Runs one of the sample fluid-structure problems")]
struct Options {
    /// Problem: bar, cavity or immersed
    problem: String,

    /// Output directory (defaults to /tmp/fsisim/results)
    #[structopt(long)]
    out_dir: Option<String>,

    /// Final time
    #[structopt(long, default_value = "0.1")]
    end_time: f64,

    /// Time step size
    #[structopt(long, default_value = "0.01")]
    delta_t: f64,

    /// Interval between outputs
    #[structopt(long, default_value = "0.01")]
    output_interval: f64,

    /// Interval between checkpoints (≤ 0 disables them)
    #[structopt(long, default_value = "0.0")]
    save_interval: f64,

    /// Directory of checkpoints (the run resumes from the latest one found there)
    #[structopt(long)]
    checkpoint_dir: Option<String>,

    /// Writes the diagnostics files to the output directory
    #[structopt(long)]
    diagnostics: bool,
}

impl Options {
    /// Returns the output directory
    fn output_directory(&self) -> &str {
        self.out_dir.as_deref().unwrap_or(DEFAULT_OUT_DIR)
    }
}

/// Returns the configuration of an elastic bar fixed on the left and loaded by gravity
fn bar_config(penalty: PenaltyMode) -> Result<SolidConfig, FsiError> {
    let mut config = SolidConfig::new(2);
    config
        .add_material(ParamSolid {
            young: 1000.0,
            poisson: 0.3,
            density: 1.0,
            damping: 0.0,
        })?
        .set_dirichlet(LEFT, ComponentMask::XY)?
        .set_penalty(penalty)?;
    Ok(config)
}

fn main() -> Result<(), FsiError> {
    env_logger::init();
    let options = Options::from_args();

    let mut time_config = TimeConfig::new(options.end_time, options.delta_t)?;
    time_config.set_intervals(options.output_interval, 0.0, options.save_interval)?;
    if let Some(message) = time_config.validate() {
        return Err(FsiError::Config(message));
    }
    let time = TimeState::from_config(&time_config)?;
    log::info!("time: {}", time_config);

    let out_dir = options.output_directory();
    let comm = SerialComm;
    let sink = if options.diagnostics {
        DiagnosticsSink::new(out_dir, comm.rank())
    } else {
        DiagnosticsSink::disabled()
    };

    match options.problem.as_str() {
        "bar" => {
            let fem = SampleMeshes::rectangle(10, 1, 10.0, 1.0, GeoKind::Qua4, 1)?;
            let mut config = bar_config(PenaltyMode::Off)?;
            config.set_gravity(&[0.0, -1.0])?;
            let writer = OutputWriter::new_enabled(&fem, "bar", Some(out_dir))?;
            let mut solid = SolidIntegrator::new(&comm, fem, &config, sink)?;
            let mut sim = Simulation::new(&comm, time, writer);
            if let Some(dir) = &options.checkpoint_dir {
                sim.set_checkpoint_dir(dir);
            }
            sim.run(&mut solid)?;
        }
        "cavity" => {
            let fem = SampleMeshes::rectangle(8, 8, 1.0, 1.0, GeoKind::Qua9, 1)?;
            let mut config = FluidConfig::new(2);
            config
                .set_dirichlet(LEFT, VelocityBc::Zero)?
                .set_dirichlet(RIGHT, VelocityBc::Zero)?
                .set_dirichlet(BOTTOM, VelocityBc::Zero)?
                .set_dirichlet(TOP, VelocityBc::Constant(vec![1.0, 0.0]))?;
            let writer = OutputWriter::new_enabled(&fem, "cavity", Some(out_dir))?;
            let mut fluid = FluidIntegrator::new(&comm, fem, &config, sink)?;
            let mut sim = Simulation::new(&comm, time, writer);
            if let Some(dir) = &options.checkpoint_dir {
                sim.set_checkpoint_dir(dir);
            }
            sim.run(&mut fluid)?;
        }
        "immersed" => {
            let solid_fem = SampleMeshes::rectangle(2, 2, 1.0, 1.0, GeoKind::Qua4, 1)?;
            let fluid_fem = SampleMeshes::rectangle(4, 4, 2.0, 2.0, GeoKind::Qua9, 1)?;
            let solid_config = bar_config(PenaltyMode::Explicit)?;
            let mut fluid_config = FluidConfig::new(2);
            fluid_config
                .set_immersed_solid(1.0, 1.0)?
                .set_gravity(&[0.0, -1.0])?
                .set_dirichlet(LEFT, VelocityBc::Zero)?
                .set_dirichlet(RIGHT, VelocityBc::Zero)?
                .set_dirichlet(BOTTOM, VelocityBc::Zero)?
                .set_dirichlet(TOP, VelocityBc::Zero)?;
            let solid_writer = OutputWriter::new_enabled(&solid_fem, "immersed_solid", Some(out_dir))?;
            let fluid_writer = OutputWriter::new_enabled(&fluid_fem, "immersed_fluid", Some(out_dir))?;
            let mut solid = SolidIntegrator::new(&comm, solid_fem, &solid_config, sink.clone())?;
            let mut fluid = FluidIntegrator::new(&comm, fluid_fem, &fluid_config, sink)?;
            let coupling = ImmersedCoupling::with_node_map(&solid, &mut fluid)?;
            let mut sim = FsiSimulation::new(&comm, time, coupling);
            sim.set_writers(solid_writer, fluid_writer);
            if let Some(dir) = &options.checkpoint_dir {
                sim.set_checkpoint_dir(dir);
            }
            sim.run(&mut solid, &mut fluid)?;
        }
        _ => {
            return Err(FsiError::Config(format!(
                "problem '{}' is not available (use bar, cavity or immersed)",
                options.problem
            )))
        }
    }

    let thin_line = format!("{:─^1$}", "", out_dir.len());
    println!("\n\n{}", thin_line);
    println!("results written to:");
    println!("{}", out_dir);
    println!("{}\n\n", thin_line);
    Ok(())
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
