pub mod aggregator;
pub mod emitter;
pub mod state_machine;

pub use aggregator::*;
pub use emitter::*;
pub use state_machine::*;
