//! Centralised tracing initialisation for OpsBench binaries.
//!
//! Call [`init_tracing`] once at program start. Later calls are ignored
//! because the global subscriber can only be set once per process.
//! Log lines always go to stderr; stdout carries command output only.

use tracing::{Level, Subscriber};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialise the global tracing subscriber.
///
/// * `json` - emit newline-delimited JSON log lines.
/// * `level` - default verbosity when `RUST_LOG` is not set.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    build_subscriber(json, env_filter, std::io::stderr)
        .try_init()
        .ok();
}

fn build_subscriber<W>(
    json: bool,
    filter: EnvFilter,
    writer: W,
) -> Box<dyn Subscriber + Send + Sync + 'static>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let layer = fmt::layer().with_target(false).with_writer(writer);
    if json {
        Box::new(tracing_subscriber::registry().with(filter).with(layer.json()))
    } else {
        Box::new(tracing_subscriber::registry().with(filter).with(layer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[test]
    fn test_init_tracing_twice_is_harmless() {
        init_tracing(false, Level::WARN);
        init_tracing(true, Level::DEBUG);
    }

    #[test]
    fn test_json_lines_use_the_configured_writer() {
        let out = Captured::default();
        let subscriber = build_subscriber(true, EnvFilter::new("info"), out.clone());
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(task_id = "task_1-abcd", "task.started");
        });

        let line: serde_json::Value = serde_json::from_str(out.text().trim()).unwrap();
        assert_eq!(line["fields"]["task_id"], "task_1-abcd");
        assert_eq!(line["fields"]["message"], "task.started");
    }

    #[test]
    fn test_filter_applies_to_text_output() {
        let out = Captured::default();
        let subscriber = build_subscriber(false, EnvFilter::new("warn"), out.clone());
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("hidden");
            tracing::warn!("shown");
        });

        let text = out.text();
        assert!(text.contains("shown"));
        assert!(!text.contains("hidden"));
    }
}
