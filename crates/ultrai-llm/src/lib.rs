//! Provider adapters and the resilience layer around them
//!
//! Each upstream provider gets one adapter speaking its wire format and
//! returning the normalized [`ultrai_core::ResponseEnvelope`]. A
//! [`ResilientClient`] wraps every adapter with timeouts, retries with
//! jittered backoff, and a circuit breaker, while the process-wide
//! [`HealthRegistry`] decides which providers may participate in a request.

mod breaker;
mod health;
pub mod provider;
mod registry;
mod resilience;

pub use breaker::{CircuitBreaker, CircuitState};
pub use health::{HealthOutcome, HealthRegistry, ProviderStatus};
pub use registry::{AdapterRegistry, default_catalog};
pub use resilience::ResilientClient;
