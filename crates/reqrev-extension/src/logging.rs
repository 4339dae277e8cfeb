#![forbid(unsafe_code)]

//! Line-oriented tracing output for environments without stderr.
//!
//! `tracing-subscriber`'s fmt layer writes each event through a fresh
//! writer; [`LineWriter`] buffers those bytes and hands the finished line to
//! a [`LogSink`] when the writer is dropped. In the browser the sink is the
//! devtools console, picked per level so warnings and errors keep their
//! styling.

use std::io;

use tracing::level_filters::LevelFilter;
use tracing::{Level, Metadata};
use tracing_subscriber::fmt::MakeWriter;

/// Destination for finished log lines.
pub trait LogSink: Clone {
    fn emit(&self, level: Level, line: &str);
}

/// [`MakeWriter`] producing one [`LineWriter`] per event.
#[derive(Debug, Clone)]
pub struct SinkWriter<S> {
    sink: S,
}

impl<S: LogSink> SinkWriter<S> {
    pub fn new(sink: S) -> Self {
        Self { sink }
    }
}

/// Buffers one formatted event.
pub struct LineWriter<S: LogSink> {
    sink: S,
    level: Level,
    buf: Vec<u8>,
}

impl<S: LogSink> io::Write for LineWriter<S> {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<S: LogSink> Drop for LineWriter<S> {
    fn drop(&mut self) {
        let text = String::from_utf8_lossy(&self.buf);
        let line = text.trim_end();
        if !line.is_empty() {
            self.sink.emit(self.level, line);
        }
    }
}

impl<'a, S: LogSink + 'a> MakeWriter<'a> for SinkWriter<S> {
    type Writer = LineWriter<S>;

    fn make_writer(&'a self) -> Self::Writer {
        LineWriter {
            sink: self.sink.clone(),
            level: Level::INFO,
            buf: Vec::new(),
        }
    }

    fn make_writer_for(&'a self, meta: &Metadata<'_>) -> Self::Writer {
        LineWriter {
            sink: self.sink.clone(),
            level: *meta.level(),
            buf: Vec::new(),
        }
    }
}

/// Install a global fmt subscriber writing to `sink`.
///
/// Returns `false` when a global subscriber was already set (a second
/// content-script start on the same page), in which case the existing one
/// keeps running.
pub fn init<S>(sink: S, max_level: LevelFilter) -> bool
where
    S: LogSink + Send + Sync + 'static,
{
    let subscriber = tracing_subscriber::fmt()
        .with_writer(SinkWriter::new(sink))
        .with_max_level(max_level)
        .with_ansi(false)
        .without_time()
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber).is_ok()
}
