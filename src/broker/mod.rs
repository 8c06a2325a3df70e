pub mod connection;
pub mod consumer;
pub mod ledger;
pub mod producer;
pub mod topology;

// Re-export the pieces the service loop wires together.
pub use connection::{redact_uri, ConnectionManager};
pub use consumer::Consumer;
pub use ledger::DeliveryLedger;
pub use producer::Producer;
pub use topology::{declare_exchange, declare_queue, queue_depth, DeclareOutcome, ExchangeSpec};
