use lapin::options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{Channel, ExchangeKind};
use tracing::{debug, info};

use crate::errors::{RelayError, Result};

/// Result of an idempotent declaration.
///
/// AMQP reports an existing entity either by accepting the re-declare (same
/// arguments) or by rejecting it (argument mismatch, exclusivity). Both count
/// as "the entity is there"; anything else propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclareOutcome {
    Created,
    AlreadyExists,
}

/// Server-side identity of an exchange. Exchanges are broker-owned and
/// survive restarts of this process.
#[derive(Debug, Clone)]
pub struct ExchangeSpec {
    pub name: String,
    pub kind: ExchangeKind,
    pub durable: bool,
}

impl ExchangeSpec {
    pub fn direct(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ExchangeKind::Direct,
            durable: true,
        }
    }

    pub fn topic(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ExchangeKind::Topic,
            durable: true,
        }
    }

    pub fn fanout(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ExchangeKind::Fanout,
            durable: true,
        }
    }

    /// The nameless default exchange. Every queue is bound to it under its own
    /// name; it cannot be declared or bound explicitly.
    pub fn is_default(&self) -> bool {
        self.name.is_empty()
    }
}

/// Ensure an exchange exists server-side.
pub async fn declare_exchange(channel: &Channel, spec: &ExchangeSpec) -> Result<DeclareOutcome> {
    if spec.is_default() {
        return Ok(DeclareOutcome::AlreadyExists);
    }

    let result = channel
        .exchange_declare(
            &spec.name,
            spec.kind.clone(),
            ExchangeDeclareOptions {
                durable: spec.durable,
                ..ExchangeDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await;

    match result {
        Ok(()) => {
            debug!(exchange = %spec.name, "exchange declared");
            Ok(DeclareOutcome::Created)
        }
        Err(err) if is_already_exists(&err) => {
            debug!(exchange = %spec.name, "exchange already exists");
            Ok(DeclareOutcome::AlreadyExists)
        }
        Err(err) => Err(RelayError::Declare(format!(
            "failed to declare exchange '{}': {err}",
            spec.name
        ))),
    }
}

/// Ensure a queue exists server-side and is bound to `exchange`.
///
/// Declaration is mandatory: binding a client-side object without declaring
/// leaves the queue absent on the broker and silently drops published
/// messages. For a direct exchange the binding key defaults to the queue
/// name; queues on the default exchange are bound implicitly and skip the
/// bind call.
///
/// An already-exists rejection is success: the entity (and the bindings of
/// whoever created it) pre-date this call, and the broker has closed the
/// channel as part of the rejection, so no bind is attempted.
pub async fn declare_queue(
    channel: &Channel,
    name: &str,
    exchange: &ExchangeSpec,
    binding_key: Option<&str>,
    durable: bool,
) -> Result<DeclareOutcome> {
    let result = channel
        .queue_declare(
            name,
            QueueDeclareOptions {
                durable,
                ..QueueDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await;

    match result {
        Ok(queue) => {
            debug!(queue = %name, depth = queue.message_count(), "queue declared");
        }
        Err(err) if is_already_exists(&err) => {
            debug!(queue = %name, "queue already exists");
            return Ok(DeclareOutcome::AlreadyExists);
        }
        Err(err) => {
            return Err(RelayError::Declare(format!(
                "failed to declare queue '{name}': {err}"
            )))
        }
    }

    if !exchange.is_default() {
        let key = effective_binding_key(name, binding_key);
        channel
            .queue_bind(
                name,
                &exchange.name,
                key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                RelayError::Declare(format!(
                    "failed to bind queue '{name}' to exchange '{}': {e}",
                    exchange.name
                ))
            })?;
        info!(queue = %name, exchange = %exchange.name, binding_key = %key, "queue bound");
    } else {
        info!(queue = %name, "queue declared on default exchange");
    }

    Ok(DeclareOutcome::Created)
}

/// Current depth of a queue, via a passive declare. Consumed read-only by the
/// external monitoring layer.
pub async fn queue_depth(channel: &Channel, name: &str) -> Result<u32> {
    let queue = channel
        .queue_declare(
            name,
            QueueDeclareOptions {
                passive: true,
                ..QueueDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| RelayError::Declare(format!("failed to query queue '{name}': {e}")))?;

    Ok(queue.message_count())
}

/// Routing key defaulting: same as the queue name when not given. Matches the
/// "default direct exchange" convention where the routing key is the queue
/// name and the exchange name is blank.
fn effective_binding_key<'a>(queue: &'a str, binding_key: Option<&'a str>) -> &'a str {
    binding_key.unwrap_or(queue)
}

// The broker signals an existing-but-mismatched entity with
// PRECONDITION-FAILED, and an exclusively held one with RESOURCE-LOCKED.
// lapin exposes both only through the protocol error text.
fn is_already_exists(err: &lapin::Error) -> bool {
    let text = err.to_string();
    text.contains("PRECONDITION-FAILED") || text.contains("RESOURCE-LOCKED")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_key_defaults_to_queue_name() {
        assert_eq!(
            effective_binding_key("system_of_record", None),
            "system_of_record"
        );
        assert_eq!(effective_binding_key("system_of_record", Some("#")), "#");
    }

    #[test]
    fn default_exchange_is_recognised() {
        assert!(ExchangeSpec::direct("").is_default());
        assert!(!ExchangeSpec::topic("register_publisher.topic").is_default());
    }

    #[test]
    fn exchange_spec_constructors_set_kind() {
        assert_eq!(ExchangeSpec::direct("a").kind, ExchangeKind::Direct);
        assert_eq!(ExchangeSpec::topic("b").kind, ExchangeKind::Topic);
        assert_eq!(ExchangeSpec::fanout("c").kind, ExchangeKind::Fanout);
        assert!(ExchangeSpec::direct("a").durable);
    }
}
