//! Module-level IL transforms (C10). Both passes operate in place on a
//! `viper_il::Module` and are safe to run in either order or skip entirely —
//! a module that never runs through this crate is still a valid program, a
//! runnable module that does is merely a smaller one with the same observed
//! behavior.

pub mod constfold;
pub mod mem2reg;

pub use constfold::constfold;
pub use mem2reg::mem2reg;
