//! Bounded FIFO of recently received frames (client side).

use std::collections::VecDeque;

use crate::registry::ClientIdentity;
use crate::typecast::{cast, PayloadType, TypeCastError, Value};

/// One received frame as recorded by the cache.
///
/// The payload is kept exactly as it arrived.  The type a frame should be
/// read as belongs to whoever consumes it, so [`CacheEntry::value`] casts on
/// demand instead of the cache guessing at record time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Arrival sequence number, starting at 0 for the first frame.
    pub seq: u64,
    /// Sender, when known.  A client's own cache leaves this empty.
    pub identity: Option<ClientIdentity>,
    /// `None` for raw frames sent without a command.
    pub command: Option<String>,
    /// Payload bytes as received; `None` when the frame carried none.
    pub payload: Option<Vec<u8>>,
    /// Whether a handler (or a waiting `recv`) consumed the frame.
    pub handled: bool,
}

impl CacheEntry {
    /// The payload cast to `target`, as a typed handler would have seen it.
    pub fn value(&self, target: &PayloadType) -> Result<Value, TypeCastError> {
        cast(self.payload.as_deref(), target)
    }
}

/// Strict FIFO with a fixed capacity.
///
/// Pushing beyond capacity evicts the oldest entry.  A capacity of zero keeps
/// nothing.
#[derive(Debug, Clone)]
pub struct MessageCache {
    capacity: usize,
    entries: VecDeque<CacheEntry>,
    next_seq: u64,
}

impl MessageCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity.min(1024)),
            next_seq: 0,
        }
    }

    /// Records a frame, assigning it the next sequence number.
    pub fn push(
        &mut self,
        identity: Option<ClientIdentity>,
        command: Option<String>,
        payload: Option<Vec<u8>>,
        handled: bool,
    ) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        if self.capacity == 0 {
            return seq;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(CacheEntry {
            seq,
            identity,
            command,
            payload,
            handled,
        });
        seq
    }

    /// Most recent entry.
    pub fn latest(&self) -> Option<&CacheEntry> {
        self.entries.back()
    }

    /// Entries carrying `command`, oldest first.
    pub fn by_command(&self, command: &str) -> Vec<CacheEntry> {
        self.entries
            .iter()
            .filter(|e| e.command.as_deref() == Some(command))
            .cloned()
            .collect()
    }

    /// Every entry, oldest first.
    pub fn snapshot(&self) -> Vec<CacheEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_command(cache: &mut MessageCache, command: &str) -> u64 {
        cache.push(None, Some(command.to_string()), None, true)
    }

    #[test]
    fn test_overflow_evicts_oldest_entry() {
        // Arrange
        let mut cache = MessageCache::new(3);

        // Act – N + 1 entries
        for command in ["a", "b", "c", "d"] {
            push_command(&mut cache, command);
        }

        // Assert
        let commands: Vec<_> = cache
            .snapshot()
            .into_iter()
            .map(|e| e.command.unwrap())
            .collect();
        assert_eq!(commands, vec!["b", "c", "d"]);
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_sequence_numbers_keep_counting_after_eviction() {
        let mut cache = MessageCache::new(1);
        push_command(&mut cache, "a");
        let seq = push_command(&mut cache, "b");
        assert_eq!(seq, 1);
        assert_eq!(cache.latest().unwrap().seq, 1);
    }

    #[test]
    fn test_by_command_filters_in_arrival_order() {
        let mut cache = MessageCache::new(10);
        cache.push(None, Some("x".to_string()), Some(b"1".to_vec()), true);
        cache.push(None, None, Some(b"raw".to_vec()), false);
        cache.push(None, Some("x".to_string()), Some(b"2".to_vec()), true);

        let payloads: Vec<_> = cache.by_command("x").into_iter().map(|e| e.payload).collect();
        assert_eq!(payloads, vec![Some(b"1".to_vec()), Some(b"2".to_vec())]);
    }

    #[test]
    fn test_entry_value_casts_recorded_payload() {
        // Arrange
        let mut cache = MessageCache::new(4);
        cache.push(None, Some("score".to_string()), Some(b"42".to_vec()), false);
        cache.push(None, Some("ping".to_string()), None, false);

        // Act
        let score = cache.by_command("score")[0].value(&PayloadType::Int);
        let ping = cache.latest().unwrap().value(&PayloadType::Null);
        let ping_as_text = cache.latest().unwrap().value(&PayloadType::Text);

        // Assert
        assert_eq!(score.unwrap(), Value::Int(42));
        assert_eq!(ping.unwrap(), Value::Null);
        assert!(ping_as_text.is_err());
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let mut cache = MessageCache::new(0);
        push_command(&mut cache, "a");
        assert!(cache.is_empty());
        assert!(cache.latest().is_none());
    }
}
