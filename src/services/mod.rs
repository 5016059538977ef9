//! Backend orchestration services.
//!
//! [`DatabaseFactory`] sequences backend startup, tracks availability and
//! selects the primary store.

mod factory;

pub use factory::{DatabaseFactory, HEALTH_CHECK_TIMEOUT, HealthReport};
