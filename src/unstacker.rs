//! Drains a tailer's FIFO, splits appended bytes into lines, and paces
//! their delivery onto the central event channel.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::event::{ChannelId, Event, FileEvent};

/// Minimum spacing between two events emitted for the same channel. A burst
/// of thousands of appended lines is smoothed into a steady trickle so the
/// hub can interleave other channels instead of starving on one.
pub const SEND_INTERVAL: Duration = Duration::from_millis(5);

/// Runs until `fifo_rx` is closed and drained, which happens once the
/// tailer feeding it has exited and dropped its sender.
pub async fn run(
    channel: ChannelId,
    mut fifo_rx: mpsc::UnboundedReceiver<FileEvent>,
    event_tx: mpsc::Sender<Event>,
) {
    let mut last_sent = Instant::now() - SEND_INTERVAL;

    while let Some(file_event) = fifo_rx.recv().await {
        match file_event {
            FileEvent::Append(bytes) => {
                for line in split_lines(&bytes) {
                    let wait = SEND_INTERVAL.saturating_sub(last_sent.elapsed());
                    if wait > Duration::ZERO {
                        tokio::time::sleep(wait).await;
                    }
                    last_sent = Instant::now();

                    if event_tx.send(Event::add(&channel, line)).await.is_err() {
                        return;
                    }
                }
            }
            FileEvent::Reset => {
                if event_tx.send(Event::reset(&channel)).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// Splits appended bytes on `\n`, dropping an empty trailing segment (the
/// normal case: writers append complete, newline-terminated lines).
fn split_lines(bytes: &[u8]) -> Vec<String> {
    let text = String::from_utf8_lossy(bytes);
    let mut lines: Vec<&str> = text.split('\n').collect();
    if lines.last() == Some(&"") {
        lines.pop();
    }
    lines
        .into_iter()
        .filter(|l| !l.is_empty())
        .map(|l| l.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_complete_lines_and_drops_trailing_empty() {
        assert_eq!(split_lines(b"a\nb\nc\n"), vec!["a", "b", "c"]);
    }

    #[test]
    fn keeps_partial_trailing_line() {
        assert_eq!(split_lines(b"a\nb\npartial"), vec!["a", "b", "partial"]);
    }

    #[test]
    fn drops_empty_lines() {
        assert_eq!(split_lines(b"a\n\nb\n"), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn forwards_append_as_add_events_in_order() {
        let (fifo_tx, fifo_rx) = mpsc::unbounded_channel();
        let (event_tx, mut event_rx) = mpsc::channel(16);
        let channel = ChannelId::Classic("app".to_string());

        let handle = tokio::spawn(run(channel.clone(), fifo_rx, event_tx));

        fifo_tx.send(FileEvent::Append(b"hello\nworld\n".to_vec())).unwrap();
        drop(fifo_tx);

        let first = event_rx.recv().await.unwrap();
        let second = event_rx.recv().await.unwrap();
        assert_eq!(first.content.as_deref(), Some("hello"));
        assert_eq!(second.content.as_deref(), Some("world"));
        assert!(event_rx.recv().await.is_none());

        handle.await.unwrap();
    }

    #[tokio::test]
    async fn reset_emits_reset_event() {
        let (fifo_tx, fifo_rx) = mpsc::unbounded_channel();
        let (event_tx, mut event_rx) = mpsc::channel(16);
        let channel = ChannelId::Classic("app".to_string());

        let handle = tokio::spawn(run(channel, fifo_rx, event_tx));
        fifo_tx.send(FileEvent::Reset).unwrap();
        drop(fifo_tx);

        let evt = event_rx.recv().await.unwrap();
        assert_eq!(evt.kind, crate::event::EventType::Reset);
        assert!(evt.content.is_none());

        handle.await.unwrap();
    }
}
