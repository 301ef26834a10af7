//! Tracing layer that forwards errors and data-integrity warnings to the
//! provider's Telegram chat.
//!
//! At most one message goes out per `MIN_INTERVAL`, and a message identical to
//! one sent within `DEDUP_WINDOW` is dropped. Sending is spawned onto the Tokio
//! runtime; events logged outside a runtime are not forwarded.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use crate::telegram::{escape_html, TelegramClient};

const MIN_INTERVAL: Duration = Duration::from_secs(10);
const DEDUP_WINDOW: Duration = Duration::from_secs(60);

/// Log target the engine uses for skipped or unreadable records.
pub const INTEGRITY_TARGET: &str = "integrity";

pub struct AlertLayer {
    telegram: TelegramClient,
    chat_id: i64,
    gate: Mutex<AlertGate>,
}

impl AlertLayer {
    pub fn new(telegram: TelegramClient, chat_id: i64) -> Self {
        Self {
            telegram,
            chat_id,
            gate: Mutex::new(AlertGate::default()),
        }
    }
}

/// Whether an event at `level` under `target` is worth an alert.
fn forwards(level: &Level, target: &str) -> bool {
    *level == Level::ERROR || (*level == Level::WARN && target == INTEGRITY_TARGET)
}

impl<S: Subscriber> Layer<S> for AlertLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if !forwards(meta.level(), meta.target()) {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let message = visitor.message();

        let admitted = {
            let mut gate = self.gate.lock().unwrap_or_else(|p| p.into_inner());
            gate.admit(fingerprint(&message), Instant::now())
        };
        if !admitted {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let title = if *meta.level() == Level::ERROR {
            "\u{1f6a8} <b>Ошибка сервера</b>"
        } else {
            "\u{26a0}\u{fe0f} <b>Повреждённые данные</b>"
        };
        let text = format!(
            "{title}\n<code>{}</code>\n\u{1f4cd} {} ({}:{})\n\u{1f550} {}",
            escape_html(&message),
            meta.target(),
            meta.file().unwrap_or("?"),
            meta.line().map(|l| l.to_string()).unwrap_or_else(|| "?".into()),
            chrono::Utc::now().format("%H:%M:%S UTC"),
        );

        let telegram = self.telegram.clone();
        let chat_id = self.chat_id;
        runtime.spawn(async move {
            // Logging a failure here would feed back into this layer.
            let _ = telegram.send_message(chat_id, &text).await;
        });
    }
}

fn fingerprint(message: &str) -> u64 {
    let mut h = DefaultHasher::new();
    message.hash(&mut h);
    h.finish()
}

// ── Rate limit + dedup ──

#[derive(Debug, Default)]
struct AlertGate {
    last_sent: Option<Instant>,
    recent: Vec<(u64, Instant)>,
}

impl AlertGate {
    fn admit(&mut self, hash: u64, now: Instant) -> bool {
        self.recent.retain(|(_, at)| now.duration_since(*at) < DEDUP_WINDOW);

        let duplicate = self.recent.iter().any(|(h, _)| *h == hash);
        let too_soon = self
            .last_sent
            .is_some_and(|last| now.duration_since(last) < MIN_INTERVAL);
        if duplicate || too_soon {
            return false;
        }

        self.last_sent = Some(now);
        self.recent.push((hash, now));
        true
    }
}

// ── Field visitor ──

/// Collects the `message` field plus any structured fields.
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl MessageVisitor {
    fn message(&self) -> String {
        if self.fields.is_empty() {
            return self.message.clone();
        }
        let extras = self
            .fields
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(", ");
        if self.message.is_empty() {
            extras
        } else {
            format!("{} ({})", self.message, extras)
        }
    }

    fn push(&mut self, field: &Field, value: String) {
        if field.name() == "message" {
            self.message = value;
        } else {
            self.fields.push((field.name().to_string(), value));
        }
    }
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.push(field, format!("{:?}", value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.push(field, value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forwards_errors_and_integrity_warnings() {
        assert!(forwards(&Level::ERROR, "salon_server"));
        assert!(forwards(&Level::WARN, INTEGRITY_TARGET));
        assert!(!forwards(&Level::WARN, "salon_server"));
        assert!(!forwards(&Level::INFO, INTEGRITY_TARGET));
    }

    #[test]
    fn test_gate_first_message_allowed() {
        let mut gate = AlertGate::default();
        assert!(gate.admit(1, Instant::now()));
    }

    #[test]
    fn test_gate_rate_limits() {
        let mut gate = AlertGate::default();
        let start = Instant::now();
        assert!(gate.admit(1, start));
        assert!(!gate.admit(2, start + Duration::from_secs(5)));
        assert!(gate.admit(2, start + MIN_INTERVAL));
    }

    #[test]
    fn test_gate_dedups_within_window() {
        let mut gate = AlertGate::default();
        let start = Instant::now();
        assert!(gate.admit(1, start));
        assert!(!gate.admit(1, start + MIN_INTERVAL));
        assert!(gate.admit(1, start + DEDUP_WINDOW));
    }

    #[test]
    fn test_message_with_fields() {
        let v = MessageVisitor {
            message: "Sweep failed".into(),
            fields: vec![("appointment".into(), "42".into())],
        };
        assert_eq!(v.message(), "Sweep failed (appointment=42)");

        let bare = MessageVisitor {
            message: String::new(),
            fields: vec![("error".into(), "timeout".into())],
        };
        assert_eq!(bare.message(), "error=timeout");
    }
}
