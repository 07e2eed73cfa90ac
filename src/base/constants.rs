/// Defines the directory where the simulation result files are saved
pub const DEFAULT_OUT_DIR: &str = "/tmp/fsisim/results";

/// Defines an auxiliary directory where the test result files are saved
pub const DEFAULT_TEST_DIR: &str = "/tmp/fsisim/test";

/// Relative tolerance of the conjugate gradient solve of the solid (times ‖b‖)
pub const SOLID_SOLVER_TOLERANCE: f64 = 1e-8;

/// Relative tolerance of the MINRES solve of the fluid (times ‖b‖)
pub const FLUID_SOLVER_TOLERANCE: f64 = 1e-11;

/// Relative tolerance of the inner solve applying the inverse pressure mass (times ‖r‖)
pub const INNER_SOLVER_TOLERANCE: f64 = 1e-11;

/// The run is finished when `end − current` falls below this value
pub const END_TIME_TOLERANCE: f64 = 1e-12;

/// Maximum distance between a constrained point and its mesh vertex
pub const POINT_MATCH_TOLERANCE: f64 = 1e-10;

/// Reference diameter used in the drag and lift coefficients
pub const DEFAULT_DRAG_DIAMETER: f64 = 0.1;

/// Reference velocity used in the drag and lift coefficients
pub const DEFAULT_DRAG_VELOCITY: f64 = 0.9796;

/// Boundary id of the body for the drag and lift computation
pub const DEFAULT_DRAG_BOUNDARY: usize = 2;
