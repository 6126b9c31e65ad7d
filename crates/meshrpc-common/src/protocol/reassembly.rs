//! Chunk reassembly
//!
//! Multi-chunk messages are collected per correlation id until every slot has been
//! filled. Arrival order does not matter; a chunk that lands in an already filled
//! slot is ignored. A missing chunk keeps its entry alive until
//! [`Reassembler::evict_older_than`] removes it.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::protocol::error::{MeshError, Result};
use crate::protocol::frame::{FrameView, MessageKind};

/// A complete inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub correlation_id: u32,
    pub function_id: u16,
    pub kind: MessageKind,
    pub payload: Vec<u8>,
}

/// Partially received multi-chunk payload.
#[derive(Debug)]
pub struct ReassemblyEntry {
    function_id: u16,
    chunk_count: u16,
    kind: MessageKind,
    slots: Vec<Option<Vec<u8>>>,
    received: usize,
    started: Instant,
}

impl ReassemblyEntry {
    fn new(view: &FrameView<'_>) -> Self {
        Self {
            function_id: view.function_id,
            chunk_count: view.chunk_count,
            kind: view.kind.message_kind(),
            slots: vec![None; view.chunk_count as usize],
            received: 0,
            started: Instant::now(),
        }
    }

    pub fn received(&self) -> usize {
        self.received
    }

    fn is_complete(&self) -> bool {
        self.received == self.slots.len()
    }
}

/// Key separating our requests' responses from the peer's requests, which draw
/// correlation ids from an independent counter on the same connection.
type EntryKey = (u32, bool);

/// Per-connection reassembly state.
#[derive(Debug, Default)]
pub struct Reassembler {
    entries: HashMap<EntryKey, ReassemblyEntry>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one decoded frame.
    ///
    /// Returns `Ok(Some(message))` once a message is complete and `Ok(None)` while
    /// chunks are still missing.
    ///
    /// # Errors
    ///
    /// Returns `MeshError::Reassembly` when a chunk disagrees with the entry it
    /// belongs to. The entry is discarded.
    pub fn accept(&mut self, view: &FrameView<'_>) -> Result<Option<Message>> {
        if view.is_single() {
            return Ok(Some(Message {
                correlation_id: view.correlation_id,
                function_id: view.function_id,
                kind: view.kind.message_kind(),
                payload: view.payload.to_vec(),
            }));
        }

        let key = (view.correlation_id, view.kind.is_response());
        let entry = self
            .entries
            .entry(key)
            .or_insert_with(|| ReassemblyEntry::new(view));

        if entry.chunk_count != view.chunk_count || entry.function_id != view.function_id {
            self.entries.remove(&key);
            warn!(
                "Discarding reassembly for correlation id {}: chunk count or function id mismatch",
                view.correlation_id
            );
            return Err(MeshError::Reassembly(format!(
                "chunk of correlation id {} does not match its message",
                view.correlation_id
            )));
        }

        let slot = view.chunk_index as usize - 1;
        if entry.slots[slot].is_none() {
            entry.slots[slot] = Some(view.payload.to_vec());
            entry.received += 1;
        } else {
            debug!(
                "Ignoring duplicate chunk {} for correlation id {}",
                view.chunk_index, view.correlation_id
            );
        }

        if !entry.is_complete() {
            return Ok(None);
        }

        match self.entries.remove(&key) {
            Some(entry) => {
                let size = entry.slots.iter().flatten().map(Vec::len).sum();
                let mut payload = Vec::with_capacity(size);
                for chunk in entry.slots.into_iter().flatten() {
                    payload.extend_from_slice(&chunk);
                }
                Ok(Some(Message {
                    correlation_id: view.correlation_id,
                    function_id: entry.function_id,
                    kind: entry.kind,
                    payload,
                }))
            }
            None => Ok(None),
        }
    }

    /// Drops entries that started more than `max_age` ago.
    pub fn evict_older_than(&mut self, max_age: Duration) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.started.elapsed() < max_age);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, correlation_id: u32, response: bool) -> Option<&ReassemblyEntry> {
        self.entries.get(&(correlation_id, response))
    }
}
