//! Diagnostics broadcast shared by the print pipeline.
//!
//! A [`Diagnostics`] value is created by the caller and handed to the components that
//! report through it. Every event is mirrored into `tracing`; subscribers receive events
//! synchronously on the reporting thread.
//! 診斷事件廣播：由呼叫端建立並注入，事件同步送達訂閱者並同時寫入 tracing。

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

pub const CATEGORY_PAGINATION: &str = "Pagination";
pub const CATEGORY_PRINT_MANAGER: &str = "PrintManager";
pub const CATEGORY_PDF_EXPORTER: &str = "PdfExporter";
pub const CATEGORY_RASTER_RENDERER: &str = "RasterRenderer";
pub const CATEGORY_NATIVE_PRINT: &str = "NativePrint";

/// Suffix appended to a category for render trace events.
pub const TRACE_SUFFIX: &str = ".Trace";

/// One diagnostic record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticEvent {
    pub timestamp: DateTime<Utc>,
    pub category: String,
    pub message: String,
    pub error: Option<String>,
    pub context: Option<Value>,
}

impl DiagnosticEvent {
    pub fn new(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            category: category.into(),
            message: message.into(),
            error: None,
            context: None,
        }
    }

    pub fn with_error(mut self, error: &dyn std::error::Error) -> Self {
        self.error = Some(error.to_string());
        self
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    pub fn is_trace(&self) -> bool {
        self.category.ends_with(TRACE_SUFFIX)
    }
}

/// Handle returned by [`Diagnostics::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscriber = Arc<dyn Fn(&DiagnosticEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    subscribers: Vec<(SubscriptionId, Subscriber)>,
}

/// Cloneable publish/subscribe channel. Clones share one subscriber list.
#[derive(Clone, Default)]
pub struct Diagnostics {
    registry: Arc<Mutex<Registry>>,
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        // Subscribers never run under the lock.
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn subscribe<F>(&self, subscriber: F) -> SubscriptionId
    where
        F: Fn(&DiagnosticEvent) + Send + Sync + 'static,
    {
        let mut registry = self.registry();
        registry.next_id += 1;
        let id = SubscriptionId(registry.next_id);
        registry.subscribers.push((id, Arc::new(subscriber)));
        id
    }

    /// Removes a subscriber. Returns false when the id is unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = self.registry();
        let before = registry.subscribers.len();
        registry.subscribers.retain(|(existing, _)| *existing != id);
        registry.subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry().subscribers.len()
    }

    /// Publishes `event` to every current subscriber.
    pub fn publish(&self, event: DiagnosticEvent) {
        mirror_to_tracing(&event);

        let subscribers: Vec<Subscriber> = self
            .registry()
            .subscribers
            .iter()
            .map(|(_, subscriber)| Arc::clone(subscriber))
            .collect();
        for subscriber in subscribers {
            subscriber(&event);
        }
    }

    pub fn report(&self, category: &str, message: impl Into<String>) {
        self.publish(DiagnosticEvent::new(category, message));
    }

    pub fn report_error(
        &self,
        category: &str,
        message: impl Into<String>,
        error: &dyn std::error::Error,
        context: Option<Value>,
    ) {
        let mut event = DiagnosticEvent::new(category, message).with_error(error);
        event.context = context;
        self.publish(event);
    }

    pub fn trace(&self, category: &str, message: impl Into<String>, context: Value) {
        self.publish(
            DiagnosticEvent::new(format!("{category}{TRACE_SUFFIX}"), message).with_context(context),
        );
    }
}

fn mirror_to_tracing(event: &DiagnosticEvent) {
    let context = event.context.as_ref().map(Value::to_string);
    match &event.error {
        Some(error) => tracing::warn!(
            category = %event.category,
            error = %error,
            context = ?context,
            "{}",
            event.message
        ),
        None if event.is_trace() => tracing::trace!(
            category = %event.category,
            context = ?context,
            "{}",
            event.message
        ),
        None => tracing::debug!(
            category = %event.category,
            context = ?context,
            "{}",
            event.message
        ),
    }
}
