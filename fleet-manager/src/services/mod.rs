//! Services the reconcilers are built from.
//!
//! - [`kafka`]: storage of kafka requests
//! - [`quota`]: quota admission and billing model resolution
//! - [`placement`]: choosing the data plane cluster for a request
//! - [`preparer`]: readying an assigned request for provisioning
//! - [`kafka_state`]: provisioning state reported by the data plane
//! - [`sso`]: SSO client registration for kafka instances

pub mod kafka;
pub mod kafka_state;
pub mod placement;
pub mod preparer;
pub mod quota;
pub mod sso;
