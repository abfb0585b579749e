pub mod prescore;
pub mod ranker;

pub use prescore::*;
pub use ranker::*;
