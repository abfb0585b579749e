pub mod engine;
pub mod kv;
pub mod models;
pub mod noise;
pub mod storage;


pub use engine::*;
pub use kv::*;
pub use models::*;
pub use noise::*;
pub use storage::*;
