pub mod assistant;
pub mod audio;
pub mod config;
pub mod error;
pub mod interrupt;
pub mod resampler;
pub mod session;
pub mod transport;
pub mod wake;

pub use error::{EdgeError, Result};
