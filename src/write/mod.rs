pub(crate) mod bits;

mod config;
pub use config::*;

mod crypto;
pub use crypto::*;

mod engine;
pub use engine::*;

pub(crate) mod pipeline;
pub(crate) mod tables;
