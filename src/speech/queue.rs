//! FIFO queue of utterances awaiting synthesis.
//!
//! The queue length doubles as a backpressure signal: at or below the
//! low-water mark the coordinator asks the producer for more text.

use std::collections::VecDeque;

use tracing::debug;

use super::utterance::Utterance;

/// Default low-water mark.
pub const DEFAULT_LOW_WATER_MARK: usize = 100;

/// Ordered utterances, spoken strictly in enqueue order.
#[derive(Debug)]
pub struct UtteranceQueue {
    items: VecDeque<Utterance>,
    low_water_mark: usize,
}

impl UtteranceQueue {
    pub fn new(low_water_mark: usize) -> Self {
        Self {
            items: VecDeque::new(),
            low_water_mark,
        }
    }

    pub fn push(&mut self, utterance: Utterance) {
        debug!(
            utterance_id = %utterance.id,
            queue_len = self.items.len() + 1,
            "Utterance queue: enqueued"
        );
        self.items.push_back(utterance);
    }

    pub fn pop(&mut self) -> Option<Utterance> {
        self.items.pop_front()
    }

    /// Drop everything. Returns how many utterances were discarded.
    pub fn clear(&mut self) -> usize {
        let dropped = self.items.len();
        self.items.clear();
        if dropped > 0 {
            debug!(dropped, "Utterance queue: cleared");
        }
        dropped
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// True when the producer should be asked for more input.
    pub fn is_low(&self) -> bool {
        self.items.len() <= self.low_water_mark
    }
}

impl Default for UtteranceQueue {
    fn default() -> Self {
        Self::new(DEFAULT_LOW_WATER_MARK)
    }
}
