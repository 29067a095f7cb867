//! Printing events

use pulsebus_client::Event;

/// One event as a JSON line, discriminator included
pub fn format_event(event: &Event, pretty: bool) -> String {
    let value = event.to_value();
    if pretty {
        serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string())
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map, Value};

    #[test]
    fn test_format_event_compact() {
        let Value::Object(fields) = json!({"bps": 10}) else {
            unreachable!()
        };
        let event = Event::new("Throughput", fields);
        assert_eq!(
            format_event(&event, false),
            r#"{"bps":10,"event":"Throughput"}"#
        );
    }

    #[test]
    fn test_format_join() {
        let line = format_event(&Event::join("Throughput"), false);
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value, json!({"event": "join", "channel": "Throughput"}));
    }

    #[test]
    fn test_format_event_pretty() {
        let line = format_event(&Event::new("Ping", Map::new()), true);
        assert_eq!(line, "{\n  \"event\": \"Ping\"\n}");
    }
}
