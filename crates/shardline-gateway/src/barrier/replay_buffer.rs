//! Ordered frame buffer

use std::collections::VecDeque;

use crate::events::DispatchFrame;

/// Append-only while buffering, drained strictly in arrival order
#[derive(Debug, Default, Clone)]
pub struct ReplayBuffer {
    frames: VecDeque<DispatchFrame>,
}

impl ReplayBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: DispatchFrame) {
        self.frames.push_back(frame);
    }

    /// Move every frame of `other` behind ours
    pub fn append(&mut self, other: &mut ReplayBuffer) {
        self.frames.append(&mut other.frames);
    }

    /// Take every frame, oldest first
    pub fn drain(&mut self) -> impl Iterator<Item = DispatchFrame> + '_ {
        self.frames.drain(..)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(seq: u64) -> DispatchFrame {
        DispatchFrame::new("MESSAGE_CREATE", Some(seq), json!({}))
    }

    #[test]
    fn test_drain_is_fifo() {
        let mut buffer = ReplayBuffer::new();
        for seq in 1..=5 {
            buffer.push(frame(seq));
        }
        let seqs: Vec<_> = buffer.drain().filter_map(|f| f.sequence).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_append_keeps_order() {
        let mut a = ReplayBuffer::new();
        let mut b = ReplayBuffer::new();
        a.push(frame(1));
        b.push(frame(2));
        b.push(frame(3));
        a.append(&mut b);
        assert!(b.is_empty());
        let seqs: Vec<_> = a.drain().filter_map(|f| f.sequence).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }
}
