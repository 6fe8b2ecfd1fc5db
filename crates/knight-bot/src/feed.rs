//! Newline-delimited JSON event replay.
//!
//! Each non-blank line is one [`FeedEvent`]:
//! `{"event": "chats.set", "data": [{"id": "c1"}]}`. Lines that are not
//! UTF-8, do not parse or name an unknown kind are logged and skipped; only
//! I/O errors end the replay early.

use std::io::BufRead;

use knight_shared::{EventEmitter, FeedEvent};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::BotError;

/// Lines buffered between the stdin thread and the replay loop.
const STDIN_QUEUE: usize = 256;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplayStats {
    /// Events delivered to the emitter.
    pub events: usize,
    /// Lines dropped as malformed.
    pub skipped_lines: usize,
    /// Non-object batch entries dropped from otherwise valid events.
    pub skipped_records: usize,
}

impl ReplayStats {
    /// Decode and dispatch one raw line.
    fn apply_line(&mut self, line_no: usize, raw: &[u8], emitter: &mut EventEmitter) {
        let line = match std::str::from_utf8(raw) {
            Ok(line) => line.trim(),
            Err(e) => {
                warn!(line = line_no, error = %e, "Skipping non UTF-8 feed line");
                self.skipped_lines += 1;
                return;
            }
        };
        if line.is_empty() {
            return;
        }

        let parsed = FeedEvent::from_line(line).and_then(|event| {
            let kind = event.kind()?;
            let (records, skipped) = event.records()?;
            Ok((kind, records, skipped))
        });

        match parsed {
            Ok((kind, records, skipped)) => {
                let handlers = emitter.emit(kind, &records);
                debug!(line = line_no, %kind, records = records.len(), handlers, "Replayed event");
                self.events += 1;
                self.skipped_records += skipped;
            }
            Err(e) => {
                warn!(line = line_no, error = %e, "Skipping malformed feed line");
                self.skipped_lines += 1;
            }
        }
    }
}

pub async fn replay<R>(mut reader: R, emitter: &mut EventEmitter) -> Result<ReplayStats, BotError>
where
    R: AsyncBufRead + Unpin,
{
    let mut stats = ReplayStats::default();
    let mut buf = Vec::new();
    let mut line_no = 0usize;

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        line_no += 1;
        stats.apply_line(line_no, &buf, emitter);
    }

    Ok(stats)
}

/// Replay lines handed over by [`spawn_stdin_reader`] until the sender side
/// closes or reports a read error.
pub async fn replay_lines(
    mut lines: mpsc::Receiver<std::io::Result<Vec<u8>>>,
    emitter: &mut EventEmitter,
) -> Result<ReplayStats, BotError> {
    let mut stats = ReplayStats::default();
    let mut line_no = 0usize;

    while let Some(line) = lines.recv().await {
        line_no += 1;
        stats.apply_line(line_no, &line?, emitter);
    }

    Ok(stats)
}

/// Read stdin on a plain OS thread and forward raw lines.
///
/// A blocking read on the runtime's blocking pool cannot be cancelled and
/// would hold up runtime shutdown; a detached thread does not.
pub fn spawn_stdin_reader() -> std::io::Result<mpsc::Receiver<std::io::Result<Vec<u8>>>> {
    let (tx, rx) = mpsc::channel(STDIN_QUEUE);
    std::thread::Builder::new()
        .name("stdin-feed".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            let mut input = stdin.lock();
            loop {
                let mut buf = Vec::new();
                let line = match input.read_until(b'\n', &mut buf) {
                    Ok(0) => break,
                    Ok(_) => Ok(buf),
                    Err(e) => Err(e),
                };
                let failed = line.is_err();
                if tx.blocking_send(line).is_err() || failed {
                    break;
                }
            }
        })?;
    Ok(rx)
}
