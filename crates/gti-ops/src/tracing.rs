use super::{Log, LogLevel};
use serde_json::json;
use std::time::SystemTime;

// Credit to this blog for a high-level overview of implementing a custom
// tracing layer: https://burgers.io/custom-logging-in-rust-using-tracing
//
// Example usage:
//
//   use tracing_subscriber::prelude::*;
//   let env_filter = tracing_subscriber::EnvFilter::from_default_env();
//   tracing_subscriber::registry()
//     .with(gti_ops::tracing::Layer::new(gti_ops::stderr_log_handler, std::time::SystemTime::now).with_filter(env_filter))
//     .init();

pub struct Layer<H, T>(H, T)
where
    H: Fn(Log),
    T: Fn() -> SystemTime;

impl<H, T> Layer<H, T>
where
    H: Fn(Log),
    T: Fn() -> SystemTime,
{
    pub fn new(handler: H, timesource: T) -> Self {
        Self(handler, timesource)
    }

    fn log_from_metadata(&self, metadata: &tracing::Metadata) -> Log {
        let mut log = Log {
            ts: (self.1)(),
            level: level_from_tracing(metadata.level()),
            message: String::new(),
            fields: Default::default(),
            place: None,
            spans: Default::default(),
        };

        log.fields
            .insert("module".to_string(), json!(metadata.target()).to_string());

        log
    }
}

impl<S, H, T> tracing_subscriber::Layer<S> for Layer<H, T>
where
    S: tracing::Subscriber,
    S: for<'lookup> tracing_subscriber::registry::LookupSpan<'lookup>,
    H: Fn(Log) + 'static,
    T: Fn() -> SystemTime + 'static,
{
    fn on_new_span(
        &self,
        attrs: &tracing::span::Attributes<'_>,
        id: &tracing::span::Id,
        ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let mut log = self.log_from_metadata(attrs.metadata());
        log.message = attrs.metadata().name().to_string();
        attrs.record(&mut FieldVisitor(&mut log));

        let span = ctx.span(id).unwrap();
        let mut extensions = span.extensions_mut();
        extensions.insert(log);
    }

    fn on_record(
        &self,
        id: &tracing::span::Id,
        values: &tracing::span::Record<'_>,
        ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let span = ctx.span(id).unwrap();
        let mut extensions = span.extensions_mut();
        let log: &mut Log = extensions.get_mut::<Log>().unwrap();
        values.record(&mut FieldVisitor(log));
    }

    fn on_event(&self, event: &tracing::Event<'_>, ctx: tracing_subscriber::layer::Context<'_, S>) {
        let mut log = self.log_from_metadata(event.metadata());
        event.record(&mut FieldVisitor(&mut log));

        if let Some(scope) = ctx.event_scope(event) {
            for span in scope.from_root() {
                let extensions = span.extensions();
                let span = extensions.get::<Log>().unwrap();
                log.spans.push(span.clone());
            }
        }

        (self.0)(log)
    }
}

struct FieldVisitor<'a>(&'a mut Log);

impl<'a> FieldVisitor<'a> {
    fn record_raw<V>(&mut self, field: &tracing::field::Field, value: V)
    where
        V: serde::Serialize + ToString,
    {
        if field.name() == "message" && self.0.message.is_empty() {
            self.0.message = value.to_string();
        } else if let Ok(value) = serde_json::to_string(&value) {
            self.0.fields.insert(field.name().to_string(), value);
        } else {
            self.0
                .fields
                .insert(field.name().to_string(), json!(value.to_string()).to_string());
        }
    }
}

impl<'a> tracing::field::Visit for FieldVisitor<'a> {
    fn record_f64(&mut self, field: &tracing::field::Field, value: f64) {
        self.record_raw(field, value)
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.record_raw(field, value)
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.record_raw(field, value)
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.record_raw(field, value)
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.record_raw(field, value)
    }

    fn record_error(
        &mut self,
        field: &tracing::field::Field,
        value: &(dyn std::error::Error + 'static),
    ) {
        let parsed = |value: &dyn std::error::Error| {
            let value = format!("{value}");
            match serde_json::from_str::<serde_json::Value>(&value) {
                Ok(v) => v,
                Err(_) => serde_json::Value::String(value),
            }
        };

        if value.source().is_none() {
            self.record_raw(field, parsed(value));
            return;
        }

        let mut chain = Vec::new();
        let mut next = Some(value);
        while let Some(cur) = next {
            chain.push(parsed(cur));
            next = cur.source();
        }

        self.0
            .fields
            .insert(field.name().to_string(), json!(chain).to_string());
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.record_raw(field, format!("{value:?}"))
    }
}

fn level_from_tracing(lvl: &tracing::Level) -> LogLevel {
    match lvl.as_str() {
        "TRACE" => LogLevel::Trace,
        "DEBUG" => LogLevel::Debug,
        "INFO" => LogLevel::Info,
        "WARN" => LogLevel::Warn,
        "ERROR" => LogLevel::Error,
        other => unreachable!("tracing::Level only has five variants, got {other:?}"),
    }
}

#[cfg(test)]
mod test {
    use super::Layer;
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, SystemTime};
    use tracing_subscriber::prelude::*;

    #[test]
    fn spans_and_events_are_mapped_to_structured_logs() {
        let out = Arc::new(Mutex::new(Vec::new()));
        let out_clone = out.clone();
        let base = SystemTime::UNIX_EPOCH + Duration::from_secs(1_660_000_000);
        let seq = Arc::new(Mutex::new(0u64));

        let _guard = tracing_subscriber::registry()
            .with(
                Layer::new(
                    move |log| out_clone.lock().unwrap().push(log),
                    move || {
                        let mut seq = seq.lock().unwrap();
                        *seq += 10;
                        base + Duration::from_secs(*seq)
                    },
                )
                .with_filter(tracing::level_filters::LevelFilter::DEBUG),
            )
            .set_default();

        let span = tracing::debug_span!("first span", the_answer = 42);
        let _enter = span.enter();
        tracing::warn!(five = 5, "a scary warning");
        tracing::trace!("filtered out");
        std::mem::drop(_enter);
        tracing::info!("an info message");

        let out = out.lock().unwrap();
        assert_eq!(out.len(), 2);

        assert_eq!(out[0].message, "a scary warning");
        assert_eq!(out[0].fields.get("five").unwrap(), "5");
        assert_eq!(out[0].spans.len(), 1);
        assert_eq!(out[0].spans[0].message, "first span");
        assert_eq!(out[0].spans[0].fields.get("the_answer").unwrap(), "42");

        assert_eq!(out[1].message, "an info message");
        assert_eq!(out[1].spans.len(), 0);
    }
}
