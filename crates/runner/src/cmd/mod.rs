mod run;

pub use run::{RunArgs, run_bounded};
