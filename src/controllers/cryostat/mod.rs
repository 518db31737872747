pub mod controller;
pub mod reconcilers;

pub use controller::{run, run_container_jfr};
