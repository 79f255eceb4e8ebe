pub mod common;
pub mod plan;
pub mod resolve;
pub mod sync;
