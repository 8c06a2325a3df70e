//! register-publisher: forwards messages from the System of Record to the
//! outside world over AMQP.
//!
//! The System of Record publishes to this service through a direct exchange;
//! the service forwards every message to a topic/fanout exchange for external
//! subscribers. It exists purely as an isolation layer (the SoR never talks
//! to the outside world directly), so the interesting parts are operational:
//! timeout-bounded connects, idempotent topology declaration, bounded retry,
//! ack-strictly-after-forward ordering, and an audit trail proving no message
//! vanished in transit.

pub mod audit;
pub mod broker;
pub mod config;
pub mod errors;
pub mod message;
pub mod retry;
pub mod service;

pub use audit::{AuditEvent, AuditLog};
pub use broker::{ConnectionManager, Consumer, DeclareOutcome, ExchangeSpec, Producer};
pub use config::{EndpointConfig, RelayConfig};
pub use errors::{RelayError, Result};
pub use retry::RetryPolicy;
pub use service::{Relay, RelayState};
