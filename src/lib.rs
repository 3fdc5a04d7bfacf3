pub mod circuit_breaker;
pub mod error;

pub use circuit_breaker::{CircuitBreaker, ProbeFailure, Settings, State};
pub use error::{BreakerError, BreakerResult};
