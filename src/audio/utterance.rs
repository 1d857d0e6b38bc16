use tracing::{debug, trace};

/// Observable state of an [`UtteranceBuffer`]. Flushing is a transient step
/// inside [`UtteranceBuffer::flush`] and always ends back in `Empty`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    Empty,
    Accumulating,
}

/// Reassembles one reply utterance from its audio fragments.
///
/// Fragments are kept in arrival order, never reordered, deduplicated or
/// dropped. A completion signal drains everything held, so the buffer never
/// mixes fragments of two utterances.
#[derive(Debug, Default)]
pub struct UtteranceBuffer {
    fragments: Vec<Vec<u8>>,
    byte_len: usize,
}

impl UtteranceBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> BufferState {
        if self.fragments.is_empty() {
            BufferState::Empty
        } else {
            BufferState::Accumulating
        }
    }

    pub fn fragment_count(&self) -> usize {
        self.fragments.len()
    }

    /// Sum of the lengths of all held fragments.
    pub fn byte_len(&self) -> usize {
        self.byte_len
    }

    pub fn push(&mut self, fragment: Vec<u8>) {
        if self.fragments.is_empty() {
            debug!("[UtteranceBuffer] First fragment of a new utterance.");
        }
        self.byte_len += fragment.len();
        self.fragments.push(fragment);
        trace!(
            "[UtteranceBuffer] Holding {} fragment(s), {} byte(s).",
            self.fragments.len(),
            self.byte_len
        );
    }

    /// Concatenates and clears the held fragments.
    ///
    /// Returns `None` when nothing was received since the last flush.
    pub fn flush(&mut self) -> Option<Vec<u8>> {
        if self.fragments.is_empty() {
            debug!("[UtteranceBuffer] Completion with no fragments; nothing to flush.");
            return None;
        }
        let mut assembled = Vec::with_capacity(self.byte_len);
        for fragment in self.fragments.drain(..) {
            assembled.extend_from_slice(&fragment);
        }
        debug!(
            "[UtteranceBuffer] Flushed utterance of {} byte(s).",
            assembled.len()
        );
        self.byte_len = 0;
        Some(assembled)
    }

    /// Drops the held fragments without assembling them. Returns the number
    /// of bytes discarded.
    pub fn clear(&mut self) -> usize {
        let discarded = self.byte_len;
        self.fragments.clear();
        self.byte_len = 0;
        discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flush_concatenates_in_arrival_order() {
        let mut buffer = UtteranceBuffer::new();
        assert_eq!(buffer.state(), BufferState::Empty);

        buffer.push(b"AAA".to_vec());
        assert_eq!(buffer.state(), BufferState::Accumulating);
        buffer.push(b"BBB".to_vec());

        assert_eq!(buffer.flush().unwrap(), b"AAABBB".to_vec());
        assert_eq!(buffer.state(), BufferState::Empty);

        buffer.push(b"CCC".to_vec());
        assert_eq!(buffer.flush().unwrap(), b"CCC".to_vec());
    }

    #[test]
    fn test_flush_when_empty_is_noop() {
        let mut buffer = UtteranceBuffer::new();
        assert!(buffer.flush().is_none());
        buffer.push(vec![1]);
        buffer.flush();
        assert!(buffer.flush().is_none());
    }

    #[test]
    fn test_total_length_is_sum_of_fragments() {
        let mut buffer = UtteranceBuffer::new();
        let fragments: Vec<Vec<u8>> = (0..20u8).map(|i| vec![i; (i as usize * 7) % 13]).collect();
        let expected: Vec<u8> = fragments.iter().flatten().copied().collect();
        for fragment in fragments.iter().cloned() {
            buffer.push(fragment);
        }
        assert_eq!(buffer.fragment_count(), 20);
        assert_eq!(buffer.byte_len(), expected.len());
        let flushed = buffer.flush().unwrap();
        assert_eq!(flushed, expected);
        assert_eq!(buffer.byte_len(), 0);
    }

    #[test]
    fn test_clear_discards_partial_utterance() {
        let mut buffer = UtteranceBuffer::new();
        buffer.push(b"AAA".to_vec());
        buffer.push(b"BB".to_vec());
        assert_eq!(buffer.clear(), 5);
        assert_eq!(buffer.state(), BufferState::Empty);
        assert_eq!(buffer.fragment_count(), 0);
        assert!(buffer.flush().is_none());

        buffer.push(b"CCC".to_vec());
        assert_eq!(buffer.flush().unwrap(), b"CCC".to_vec());
    }

    #[test]
    fn test_empty_fragments_are_kept() {
        let mut buffer = UtteranceBuffer::new();
        buffer.push(Vec::new());
        assert_eq!(buffer.state(), BufferState::Accumulating);
        assert_eq!(buffer.flush(), Some(Vec::new()));
    }
}
