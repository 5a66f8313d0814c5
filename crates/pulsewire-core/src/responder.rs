//! Response Generator
//!
//! Maps command text to a response payload. Matching is a case-insensitive
//! substring search with a fixed priority order; the first match wins:
//!
//! 1. `status`      → JSON status report
//! 2. `subscribe`   → subscription confirmation (unless it says `unsubscribe`)
//! 3. `unsubscribe` → unsubscription confirmation
//! 4. `ping`        → pong with a synthetic latency
//! 5. anything else → generic acknowledgement
//!
//! Everything that varies between calls (uptime, ping latency) arrives in a
//! [`ResponseContext`], so [`generate_response`] has no side effects.

use core::time::Duration;
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Command Classification
// ----------------------------------------------------------------------------

/// What a command asks for, in match priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandIntent {
    Status,
    Subscribe,
    Unsubscribe,
    Ping,
    Other,
}

impl CommandIntent {
    /// Classify command text
    pub fn classify(text: &str) -> Self {
        let lowered = text.to_lowercase();

        if lowered.contains("status") {
            CommandIntent::Status
        } else if lowered.contains("subscribe") && !lowered.contains("unsubscribe") {
            CommandIntent::Subscribe
        } else if lowered.contains("unsubscribe") {
            CommandIntent::Unsubscribe
        } else if lowered.contains("ping") {
            CommandIntent::Ping
        } else {
            CommandIntent::Other
        }
    }
}

// ----------------------------------------------------------------------------
// Response Context
// ----------------------------------------------------------------------------

/// Inputs that vary between calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseContext {
    /// Time since the current session connected
    pub uptime: Duration,
    /// Sessions opened by this client so far
    pub connections: u64,
    /// Synthetic round-trip latency for ping replies
    pub ping_latency_ms: u64,
}

/// Structured payload for `status` commands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    #[serde(rename = "type")]
    pub kind: String,
    pub online: bool,
    pub uptime_secs: u64,
    pub connections: u64,
}

// ----------------------------------------------------------------------------
// Generator
// ----------------------------------------------------------------------------

/// Produce the response payload for a command
pub fn generate_response(text: &str, ctx: &ResponseContext) -> String {
    match CommandIntent::classify(text) {
        CommandIntent::Status => status_payload(ctx),
        CommandIntent::Subscribe => "Subscribed to channel updates".to_string(),
        CommandIntent::Unsubscribe => "Unsubscribed from channel updates".to_string(),
        CommandIntent::Ping => format!("Pong! Latency: {}ms", ctx.ping_latency_ms),
        CommandIntent::Other => format!("Server received: {}", text),
    }
}

fn status_payload(ctx: &ResponseContext) -> String {
    let report = StatusReport {
        kind: "status".to_string(),
        online: true,
        uptime_secs: ctx.uptime.as_secs(),
        connections: ctx.connections,
    };
    // Serializing a plain struct of strings/ints/bools cannot fail
    serde_json::to_string(&report).unwrap_or_else(|_| {
        format!(
            "{{\"type\":\"status\",\"online\":true,\"uptime_secs\":{},\"connections\":{}}}",
            report.uptime_secs, report.connections
        )
    })
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ctx() -> ResponseContext {
        ResponseContext {
            uptime: Duration::from_secs(42),
            connections: 3,
            ping_latency_ms: 57,
        }
    }

    #[test]
    fn test_priority_order() {
        assert_eq!(CommandIntent::classify("status please"), CommandIntent::Status);
        assert_eq!(CommandIntent::classify("unsubscribe status"), CommandIntent::Status);
        assert_eq!(CommandIntent::classify("Subscribe me"), CommandIntent::Subscribe);
        assert_eq!(CommandIntent::classify("UNSUBSCRIBE"), CommandIntent::Unsubscribe);
        assert_eq!(CommandIntent::classify("subscribe ping"), CommandIntent::Subscribe);
        assert_eq!(CommandIntent::classify("unsubscribe ping"), CommandIntent::Unsubscribe);
        assert_eq!(CommandIntent::classify("PiNg"), CommandIntent::Ping);
        assert_eq!(CommandIntent::classify("hello"), CommandIntent::Other);
    }

    #[test]
    fn test_status_payload_fields() {
        let payload = generate_response("STATUS", &ctx());
        let report: StatusReport = serde_json::from_str(&payload).unwrap();

        assert_eq!(report.kind, "status");
        assert!(report.online);
        assert_eq!(report.uptime_secs, 42);
        assert_eq!(report.connections, 3);
    }

    #[test]
    fn test_ping_reports_latency() {
        let payload = generate_response("ping", &ctx());
        assert_eq!(payload, "Pong! Latency: 57ms");
    }

    #[test]
    fn test_subscription_replies() {
        assert!(generate_response("subscribe", &ctx()).starts_with("Subscribed"));
        assert!(generate_response("unsubscribe", &ctx()).starts_with("Unsubscribed"));
    }

    #[test]
    fn test_fallback_echoes_text() {
        assert_eq!(
            generate_response("Hello World", &ctx()),
            "Server received: Hello World"
        );
    }

    #[test]
    fn test_generator_is_deterministic_for_same_context() {
        assert_eq!(generate_response("ping", &ctx()), generate_response("ping", &ctx()));
    }

    proptest! {
        #[test]
        fn prop_ping_always_pongs(prefix in "[a-z ]{0,8}", suffix in "[a-z ]{0,8}", upper in any::<bool>()) {
            let ping = if upper { "PING" } else { "ping" };
            let text = format!("{}{}{}", prefix, ping, suffix);
            prop_assume!(!text.to_lowercase().contains("status"));
            prop_assume!(!text.to_lowercase().contains("subscribe"));

            let payload = generate_response(&text, &ctx());
            prop_assert!(payload.to_lowercase().contains("pong"));
        }

        #[test]
        fn prop_status_always_structured(prefix in ".{0,12}", suffix in ".{0,12}") {
            let text = format!("{}StAtUs{}", prefix, suffix);
            let payload = generate_response(&text, &ctx());
            let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
            prop_assert_eq!(&value["online"], &serde_json::Value::Bool(true));
            prop_assert!(value.get("uptime_secs").is_some());
        }

        #[test]
        fn prop_fallback_contains_original(text in "[a-z0-9 ]{1,24}") {
            prop_assume!(CommandIntent::classify(&text) == CommandIntent::Other);
            let payload = generate_response(&text, &ctx());
            prop_assert!(payload.contains(&text));
        }
    }
}
