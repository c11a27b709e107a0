pub mod backoff;
pub mod circuit_breaker;
pub mod event_bus;
pub mod relay_status;
