pub mod dip;
pub mod incremental;
pub mod indicators;

#[cfg(test)]
mod indicators_tests;

pub use dip::*;
pub use incremental::*;
pub use indicators::*;
