//! Test and helper mocks for reactor_core

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::NaiveDateTime;

use crate::error::FeedError;
use crate::feed::{FeedRows, PredictionFeed, Sample};

#[derive(Debug, Default)]
struct Script {
    replies: VecDeque<Result<Vec<u8>, String>>,
    written: Vec<Vec<u8>>,
    closed: bool,
}

/// Transport that replays scripted replies and records every write.
///
/// Clones share state, so a test can keep a handle after moving the
/// transport into a `PumpLink`. Once the script is exhausted reads return
/// nothing, which the link treats as "no reply".
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    inner: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, Script> {
        // a panicked test thread poisons the lock; the data is still usable
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue the next read reply.
    pub fn reply(&self, bytes: impl AsRef<[u8]>) -> &Self {
        self.state().replies.push_back(Ok(bytes.as_ref().to_vec()));
        self
    }

    /// Queue a read failure carrying `message`.
    pub fn fail(&self, message: &str) -> &Self {
        self.state().replies.push_back(Err(message.to_string()));
        self
    }

    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state().written.clone()
    }

    /// Writes rendered as text with control bytes shown as `<XX>`.
    pub fn written_text(&self) -> Vec<String> {
        self.written()
            .iter()
            .map(|w| {
                w.iter()
                    .map(|&b| {
                        if b.is_ascii_graphic() {
                            (b as char).to_string()
                        } else {
                            format!("<{b:02X}>")
                        }
                    })
                    .collect()
            })
            .collect()
    }

    pub fn clear_written(&self) {
        self.state().written.clear();
    }

    pub fn pending_replies(&self) -> usize {
        self.state().replies.len()
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }
}

impl reactor_traits::Transport for ScriptedTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut s = self.state();
        if s.closed {
            return Err(Box::new(std::io::Error::other("transport closed")));
        }
        s.written.push(bytes.to_vec());
        Ok(())
    }

    fn read(&mut self, max: usize) -> Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync>> {
        match self.state().replies.pop_front() {
            Some(Ok(mut bytes)) => {
                bytes.truncate(max);
                Ok(bytes)
            }
            Some(Err(msg)) => Err(Box::new(std::io::Error::other(msg))),
            None => Ok(Vec::new()),
        }
    }

    fn close(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.state().closed = true;
        Ok(())
    }
}

/// In-memory prediction feed.
#[derive(Debug, Default, Clone)]
pub struct StaticFeed {
    rows: FeedRows,
}

impl StaticFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_labels<S: Into<String>>(labels: impl IntoIterator<Item = S>) -> Self {
        let mut feed = Self::default();
        feed.rows
            .set_labels(labels.into_iter().map(Into::into).collect());
        feed
    }

    pub fn push(&mut self, at: NaiveDateTime, values: Vec<f64>) -> Result<(), FeedError> {
        self.rows.push(at, values)
    }
}

impl PredictionFeed for StaticFeed {
    fn event_count(&self) -> u64 {
        self.rows.len() as u64
    }

    fn labels(&self) -> Option<&[String]> {
        self.rows.labels()
    }

    fn latest(&self, column: usize, n: usize) -> Result<Vec<Sample>, FeedError> {
        self.rows.latest(column, n)
    }
}
