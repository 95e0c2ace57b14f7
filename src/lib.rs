/*!
Position-Based Fluids in 2D: a spatial-hash neighbor index, smoothing kernels
and the PBF constraint solver, driven by a headless command line runner.
*/

mod platform;
#[allow(hidden_glob_reexports)]
mod simulation;

pub use simulation::*;

pub use platform::start;
