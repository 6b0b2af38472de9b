pub mod engine;
pub mod error;
pub mod ingest;
pub mod io;
pub mod metrics;
pub mod shared;
pub mod signal;

pub use engine::*;
pub use error::*;
pub use metrics::hrv::*;
pub use shared::SharedEngine;
pub use signal::*;
