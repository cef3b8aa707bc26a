//! Structured logging (A1): a [`Log`] record shape and a
//! `tracing_subscriber::Layer` ([`tracing::Layer`]) that turns tracing
//! spans and events into them, so every place in the tool emits the same
//! canonical JSON line regardless of which analysis or strategy logged
//! it.

use std::collections::BTreeMap;
use std::io::Write;
use std::time::SystemTime;

use serde::{de::Error as _, Deserialize, Serialize};

pub mod tracing;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Identifies which place in the tree emitted a log line, for logs
/// gathered centrally across the whole run.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaceMeta {
    pub place_id: u32,
    pub layer: u32,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Log {
    #[serde(serialize_with = "serialize_ts", deserialize_with = "deserialize_ts")]
    pub ts: SystemTime,
    pub level: LogLevel,
    #[serde(default)]
    pub message: String,
    /// Supplemental fields, each already-serialized as a JSON value.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub place: Option<PlaceMeta>,
    /// The chain of enclosing spans, from root to leaf.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub spans: Vec<Log>,
}

fn serialize_ts<S: serde::Serializer>(ts: &SystemTime, serializer: S) -> Result<S::Ok, S::Error> {
    humantime::format_rfc3339_millis(*ts).to_string().serialize(serializer)
}

fn deserialize_ts<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<SystemTime, D::Error> {
    let s = String::deserialize(deserializer)?;
    humantime::parse_rfc3339(&s).map_err(D::Error::custom)
}

/// Writes canonical JSON log serializations to stderr, one per line.
pub fn stderr_log_handler(log: Log) {
    let mut buf = serde_json::to_vec(&log).expect("Log always serializes");
    buf.push(b'\n');
    _ = std::io::stderr().write_all(&buf);
}

/// Returns a log handler that writes canonical JSON log serializations
/// to the given writer, one per line.
pub fn new_encoded_json_write_handler<W>(
    writer: std::sync::Arc<std::sync::Mutex<W>>,
) -> impl Fn(Log) + Send + Sync + 'static
where
    W: std::io::Write + Send + 'static,
{
    move |log: Log| {
        let mut buf = serde_json::to_vec(&log).expect("Log always serializes");
        buf.push(b'\n');
        _ = writer.lock().expect("writer is never poisoned").write_all(&buf);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn encoded_json_write_handler_emits_one_line_per_log() {
        let writer = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let handler = new_encoded_json_write_handler(writer.clone());

        let ts = humantime::parse_rfc3339("2024-01-01T00:00:00Z").unwrap();
        let mut log = Log {
            ts,
            level: LogLevel::Warn,
            message: "hello world".to_string(),
            fields: [("name".to_string(), "\"value\"".to_string())].into_iter().collect(),
            place: Some(PlaceMeta { place_id: 3, layer: 1 }),
            spans: Vec::new(),
        };

        handler(log.clone());
        log.message = "different".to_string();
        handler(log);

        std::mem::drop(handler);
        let writer = std::sync::Arc::try_unwrap(writer).unwrap().into_inner().unwrap();
        let lines: Vec<&str> = std::str::from_utf8(&writer).unwrap().lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"hello world\""));
        assert!(lines[1].contains("\"different\""));
        assert!(lines[0].contains("\"place_id\":3"));
    }
}
