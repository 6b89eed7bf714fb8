//! Output sink plumbing shared by the adapters.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::engine::{Event, Value, format_num};

/// Host callback receiving rendered output text.
pub type OutputSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Render an emitted value: numbers as decimal text, strings quoted without
/// escaping, everything else as two-space indented JSON.
pub fn render_output(value: &Value) -> String {
    match value {
        Value::Num(num) => format_num(*num),
        Value::Str(text) => format!("\"{text}\""),
        other => serde_json::to_string_pretty(&other.to_json()).unwrap_or_else(|_| other.repr()),
    }
}

/// Sink held by a runner until it is disposed.
#[derive(Clone)]
pub(crate) struct SinkSlot(Arc<RwLock<Option<OutputSink>>>);

impl SinkSlot {
    pub(crate) fn new(sink: OutputSink) -> Self {
        Self(Arc::new(RwLock::new(Some(sink))))
    }

    pub(crate) fn send(&self, text: &str) {
        let sink = self.0.read().clone();
        if let Some(sink) = sink {
            sink(text);
        }
    }

    pub(crate) fn release(&self) {
        self.0.write().take();
    }

    /// Native `out` hook: render and forward every emitted value.
    pub(crate) fn out_hook(&self) -> Box<dyn Fn(Value) + Send + Sync> {
        let slot = self.clone();
        Box::new(move |value| slot.send(&render_output(&value)))
    }

    /// Native `log` hook: forward only the final value of a finished program.
    pub(crate) fn log_hook(&self) -> Box<dyn Fn(Event) + Send + Sync> {
        let slot = self.clone();
        Box::new(move |event| {
            if let Event::End { val: Some(val) } = event {
                slot.send(&val.repr());
            }
        })
    }
}
