//! A single-threaded, deterministic interpreter for verified IL modules
//! (C8). Build an `Interpreter` over a `viper_il::Module` and a
//! `viper_rt::Bridge`, then `run` an entry function.

pub mod frame;
pub mod interpreter;
pub mod memory;
pub mod value;

pub use interpreter::{Interpreter, RunOutcome};
pub use value::RtValue;
