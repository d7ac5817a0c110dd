//! Tracing layer that records reconciler log events for assertions.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::field::{Field, Visit};
use tracing::Level;
use tracing_subscriber::Layer;

const POISONED: &str =
    "MockCaptureLayer mutex poisoned - a test thread panicked while holding the lock";

/// Layer that captures every event together with its fields.
#[derive(Debug, Clone, Default)]
pub struct MockCaptureLayer {
    captured: Arc<Mutex<Vec<CapturedEvent>>>,
}

/// One captured log event.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct CapturedEvent {
    pub level: Level,
    pub message: String,
    /// Every non-message field, rendered with `Display` for strings and
    /// `Debug` for everything else.
    pub fields: BTreeMap<String, String>,
}

impl CapturedEvent {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

impl MockCaptureLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all captured events.
    pub fn get_captured(&self) -> Vec<CapturedEvent> {
        self.captured.lock().expect(POISONED).clone()
    }

    /// Captured events whose message equals `message`.
    ///
    /// # Examples
    ///
    /// ```
    /// use rule_group_reconciler::infrastructure::mocks::MockCaptureLayer;
    /// use tracing::info;
    /// use tracing_subscriber::layer::SubscriberExt;
    ///
    /// let capture = MockCaptureLayer::new();
    /// let subscriber = tracing_subscriber::registry().with(capture.clone());
    ///
    /// tracing::subscriber::with_default(subscriber, || {
    ///     info!(rule_group_id = "rg-1", "created rule group");
    ///     info!("something else");
    /// });
    ///
    /// let created = capture.with_message("created rule group");
    /// assert_eq!(created.len(), 1);
    /// assert_eq!(created[0].field("rule_group_id"), Some("rg-1"));
    /// ```
    pub fn with_message(&self, message: &str) -> Vec<CapturedEvent> {
        self.captured
            .lock()
            .expect(POISONED)
            .iter()
            .filter(|event| event.message == message)
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.captured.lock().expect(POISONED).len()
    }

    pub fn clear(&self) {
        self.captured.lock().expect(POISONED).clear();
    }
}

impl<S> Layer<S> for MockCaptureLayer
where
    S: tracing::Subscriber,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);

        self.captured.lock().expect(POISONED).push(CapturedEvent {
            level: *event.metadata().level(),
            message: visitor.message,
            fields: visitor.fields,
        });
    }
}

#[derive(Default)]
struct EventVisitor {
    message: String,
    fields: BTreeMap<String, String>,
}

impl Visit for EventVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.insert(field.name().to_string(), value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.fields
                .insert(field.name().to_string(), format!("{:?}", value));
        }
    }
}
