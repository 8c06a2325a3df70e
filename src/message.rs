use lapin::message::Delivery;
use lapin::types::{AMQPValue, FieldTable, ShortString};

/// Header carrying the correlation identifier of a register entry. Used for
/// audit logging only, never for routing decisions.
pub const TITLE_HEADER: &str = "title_number";

/// A message pulled from the incoming queue, pending forward and
/// acknowledgment.
///
/// The body is opaque to the relay (conventionally JSON) and is forwarded
/// unmodified.
#[derive(Debug)]
pub struct InboundMessage {
    pub body: Vec<u8>,
    pub headers: FieldTable,
    pub delivery_tag: u64,
    pub routing_key: String,
    pub redelivered: bool,
}

impl InboundMessage {
    pub fn from_delivery(delivery: &Delivery) -> Self {
        let headers = delivery
            .properties
            .headers()
            .clone()
            .unwrap_or_default();

        Self {
            body: delivery.data.clone(),
            headers,
            delivery_tag: delivery.delivery_tag,
            routing_key: delivery.routing_key.to_string(),
            redelivered: delivery.redelivered,
        }
    }

    pub fn title(&self) -> Option<String> {
        title_of(&self.headers)
    }
}

/// Extract the correlation/title identifier from an AMQP header table.
pub fn title_of(headers: &FieldTable) -> Option<String> {
    match headers.inner().get(&ShortString::from(TITLE_HEADER)) {
        Some(AMQPValue::LongString(value)) => {
            Some(String::from_utf8_lossy(value.as_bytes()).into_owned())
        }
        Some(AMQPValue::ShortString(value)) => Some(value.as_str().to_string()),
        _ => None,
    }
}

/// Build a header table carrying a title identifier.
pub fn headers_with_title(title: &str) -> FieldTable {
    let mut headers = FieldTable::default();
    headers.insert(
        ShortString::from(TITLE_HEADER),
        AMQPValue::LongString(title.into()),
    );
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_round_trips_through_headers() {
        let headers = headers_with_title("T1");
        assert_eq!(title_of(&headers), Some("T1".to_string()));
    }

    #[test]
    fn missing_title_is_none() {
        assert_eq!(title_of(&FieldTable::default()), None);
    }

    #[test]
    fn short_string_titles_are_accepted() {
        let mut headers = FieldTable::default();
        headers.insert(
            ShortString::from(TITLE_HEADER),
            AMQPValue::ShortString(ShortString::from("T2")),
        );
        assert_eq!(title_of(&headers), Some("T2".to_string()));
    }

    #[test]
    fn non_string_titles_are_ignored() {
        let mut headers = FieldTable::default();
        headers.insert(ShortString::from(TITLE_HEADER), AMQPValue::LongInt(42));
        assert_eq!(title_of(&headers), None);
    }
}
