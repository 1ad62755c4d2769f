//! Event emission through one ordered channel.
//!
//! Pipeline stages run on separate threads but never write to the output
//! stream directly: every emitter clone sends pre-encoded frames into one
//! channel, and a single writer thread drains it. Ordering comes from the
//! channel, not from a lock around the stream.

use crate::events::wire::{Event, LogLevel};
use crossbeam_channel::{Receiver, Sender, unbounded};
use std::io::Write;
use std::thread;

/// Which wire encoding an emitter produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFormat {
    /// Legacy line-oriented frames.
    Text,
    /// JSON lines, one object per frame.
    Json,
}

/// Cloneable handle for emitting events from any pipeline stage.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    tx: Sender<String>,
    format: EventFormat,
}

impl EventEmitter {
    /// Create an emitter and the receiving end for [`spawn_writer`].
    pub fn new(format: EventFormat) -> (Self, Receiver<String>) {
        let (tx, rx) = unbounded();
        (Self { tx, format }, rx)
    }

    pub fn format(&self) -> EventFormat {
        self.format
    }

    /// Encode and queue one event. A closed channel means the writer is
    /// gone and the process is shutting down; the frame is dropped.
    pub fn emit(&self, event: &Event) {
        let frame = match self.format {
            EventFormat::Text => event.to_legacy(),
            EventFormat::Json => match event.to_json() {
                Ok(json) => json,
                Err(_) => return,
            },
        };
        let _ = self.tx.send(frame);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(&Event::Log {
            level: LogLevel::Info,
            message: message.into(),
        });
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(&Event::Log {
            level: LogLevel::Warning,
            message: message.into(),
        });
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(&Event::Error {
            message: message.into(),
        });
    }
}

/// Drain encoded frames onto a writer, one line per frame, flushing after
/// each so a controller reading the pipe sees events promptly. Returns
/// when every emitter clone has been dropped.
pub fn spawn_writer<W>(rx: Receiver<String>, mut out: W) -> thread::JoinHandle<()>
where
    W: Write + Send + 'static,
{
    thread::spawn(move || {
        for frame in rx {
            if writeln!(out, "{frame}").is_err() {
                break;
            }
            let _ = out.flush();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::parser::EventParser;
    use crate::events::wire::Phase;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn frames_arrive_in_emission_order() {
        let (emitter, rx) = EventEmitter::new(EventFormat::Text);
        let buf = SharedBuf::default();
        let writer = spawn_writer(rx, buf.clone());

        emitter.emit(&Event::Phase {
            phase: Phase::Parsing,
        });
        emitter.emit(&Event::Progress {
            current_chunk: 1,
            total_chunks: 2,
        });
        emitter.info("hello");
        drop(emitter);
        writer.join().unwrap();

        let text = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert_eq!(text, "PHASE:PARSING\nPROGRESS:1/2 chunks\nhello\n");
    }

    #[test]
    fn clones_share_one_stream() {
        let (emitter, rx) = EventEmitter::new(EventFormat::Json);
        let buf = SharedBuf::default();
        let writer = spawn_writer(rx, buf.clone());

        let clone = emitter.clone();
        emitter.emit(&Event::Phase {
            phase: Phase::Inference,
        });
        clone.warn("late start");
        drop(emitter);
        drop(clone);
        writer.join().unwrap();

        let bytes = buf.0.lock().unwrap().clone();
        let mut parser = EventParser::new();
        let events = parser.push(&bytes);
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0],
            Event::Phase {
                phase: Phase::Inference
            }
        );
        assert_eq!(
            events[1],
            Event::Log {
                level: LogLevel::Warning,
                message: "late start".to_string()
            }
        );
    }

    #[test]
    fn json_format_emits_decodable_frames() {
        let (emitter, rx) = EventEmitter::new(EventFormat::Json);
        let buf = SharedBuf::default();
        let writer = spawn_writer(rx, buf.clone());

        emitter.error("backend crashed");
        drop(emitter);
        writer.join().unwrap();

        let bytes = buf.0.lock().unwrap().clone();
        let line = String::from_utf8(bytes).unwrap();
        assert_eq!(
            Event::from_json(line.trim()).unwrap(),
            Event::Error {
                message: "backend crashed".to_string()
            }
        );
    }
}
