//! Single-use note queue between a blocking worker and an async consumer.
//!
//! The producer half ([`NoteSender`]) is pushed from a blocking thread and
//! never waits. The consumer half ([`NoteReceiver`]) suspends its task until
//! the next item arrives. Items are delivered in insertion order, and exactly
//! one [`ChannelItem::EndOfStream`] is pushed, always last: either explicitly
//! through [`NoteSender::finish`] or from `Drop` if the worker unwinds.

use notegen_core::types::NoteEvent;
use tokio::sync::mpsc;

/// How a generation ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Termination {
    Completed,
    Failed(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum ChannelItem {
    Note(NoteEvent),
    EndOfStream(Termination),
}

/// Creates a fresh, unbounded note channel.
pub fn note_channel() -> (NoteSender, NoteReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (NoteSender { tx: Some(tx) }, NoteReceiver { rx })
}

/// Producer half, owned by the generation worker.
#[derive(Debug)]
pub struct NoteSender {
    // `None` once the end-of-stream sentinel has been pushed.
    tx: Option<mpsc::UnboundedSender<ChannelItem>>,
}

impl NoteSender {
    /// Pushes a note without blocking.
    ///
    /// Returns `false` if the consumer has gone away; the note is dropped.
    pub fn push(&self, note: NoteEvent) -> bool {
        self.tx
            .as_ref()
            .is_some_and(|tx| tx.send(ChannelItem::Note(note)).is_ok())
    }

    /// Returns `true` while a consumer is still attached.
    pub fn is_attached(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Pushes the end-of-stream sentinel and closes the channel.
    pub fn finish(mut self, termination: Termination) {
        self.close(termination);
    }

    fn close(&mut self, termination: Termination) {
        if let Some(tx) = self.tx.take() {
            // An abandoned channel makes this a no-op.
            let _ = tx.send(ChannelItem::EndOfStream(termination));
        }
    }
}

impl Drop for NoteSender {
    fn drop(&mut self) {
        self.close(Termination::Failed(
            "worker exited without finishing".to_string(),
        ));
    }
}

/// Consumer half, owned by the session coordinator.
#[derive(Debug)]
pub struct NoteReceiver {
    rx: mpsc::UnboundedReceiver<ChannelItem>,
}

impl NoteReceiver {
    /// Waits for the next item.
    ///
    /// Once the sentinel has been received the channel is exhausted and
    /// further calls keep returning a failed end-of-stream.
    pub async fn next(&mut self) -> ChannelItem {
        match self.rx.recv().await {
            Some(item) => item,
            None => ChannelItem::EndOfStream(Termination::Failed(
                "note channel already drained".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(i: usize) -> NoteEvent {
        NoteEvent::new(i as f64 * 0.5, (i % 128) as u8, 64, 0.5)
    }

    #[tokio::test]
    async fn delivers_in_order_then_terminates() {
        for n in [0_usize, 1, 2, 17, 1000] {
            let (tx, mut rx) = note_channel();
            for i in 0..n {
                assert!(tx.push(note(i)));
            }
            tx.finish(Termination::Completed);

            for i in 0..n {
                assert_eq!(rx.next().await, ChannelItem::Note(note(i)));
            }
            assert_eq!(
                rx.next().await,
                ChannelItem::EndOfStream(Termination::Completed)
            );
        }
    }

    #[tokio::test]
    async fn push_from_another_thread() {
        let (tx, mut rx) = note_channel();
        let producer = std::thread::spawn(move || {
            for i in 0..64 {
                tx.push(note(i));
            }
            tx.finish(Termination::Completed);
        });

        let mut received = Vec::new();
        loop {
            match rx.next().await {
                ChannelItem::Note(n) => received.push(n),
                ChannelItem::EndOfStream(t) => {
                    assert_eq!(t, Termination::Completed);
                    break;
                }
            }
        }
        producer.join().unwrap();
        assert_eq!(received, (0..64).map(note).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn dropped_sender_still_terminates() {
        let (tx, mut rx) = note_channel();
        tx.push(note(0));
        drop(tx);

        assert_eq!(rx.next().await, ChannelItem::Note(note(0)));
        assert!(matches!(
            rx.next().await,
            ChannelItem::EndOfStream(Termination::Failed(_))
        ));
    }

    #[test]
    fn push_into_abandoned_channel_is_a_no_op() {
        let (tx, rx) = note_channel();
        drop(rx);
        assert!(!tx.is_attached());
        assert!(!tx.push(note(0)));
        tx.finish(Termination::Completed);
    }
}
