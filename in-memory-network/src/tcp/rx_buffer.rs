//! Reassembly of received data, tracking out-of-order ranges for SACK

use std::collections::BTreeMap;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct RxOutcome {
    /// Bytes that became available in order
    pub delivered: u64,
    pub out_of_order: bool,
    pub filled_gap: bool,
    pub duplicate: bool,
}

#[derive(Debug)]
pub(crate) struct RxBuffer {
    next_expected: u64,
    out_of_order: BTreeMap<u64, u64>,
    out_of_order_bytes: u64,
    last_block_start: Option<u64>,
    capacity: u32,
}

impl RxBuffer {
    pub fn new(next_expected: u64, capacity: u32) -> Self {
        Self {
            next_expected,
            out_of_order: BTreeMap::new(),
            out_of_order_bytes: 0,
            last_block_start: None,
            capacity,
        }
    }

    pub fn next_expected(&self) -> u64 {
        self.next_expected
    }

    /// Consumes sequence space that carries no data (SYN, FIN)
    pub fn advance(&mut self, by: u64) {
        self.next_expected += by;
    }

    /// Advertised window; delivered data is consumed by the application right away, so only
    /// out-of-order data takes up space
    pub fn window(&self) -> u32 {
        (self.capacity as u64).saturating_sub(self.out_of_order_bytes) as u32
    }

    pub fn has_gaps(&self) -> bool {
        !self.out_of_order.is_empty()
    }

    pub fn receive(&mut self, seq: u64, len: u32) -> RxOutcome {
        let mut outcome = RxOutcome::default();
        let end = seq + len as u64;

        if len == 0 {
            return outcome;
        }

        if end <= self.next_expected || seq >= self.next_expected + self.capacity as u64 {
            outcome.duplicate = true;
            return outcome;
        }

        if seq <= self.next_expected {
            let had_gaps = self.has_gaps();
            let before = self.next_expected;
            self.next_expected = end;

            while let Some(entry) = self.out_of_order.first_entry() {
                if *entry.key() > self.next_expected {
                    break;
                }

                let start = *entry.key();
                let block_end = entry.remove();
                self.out_of_order_bytes -= block_end - start;
                self.next_expected = self.next_expected.max(block_end);
            }

            if self.out_of_order.is_empty() {
                self.last_block_start = None;
            }

            outcome.delivered = self.next_expected - before;
            outcome.filled_gap = had_gaps;
            return outcome;
        }

        // Merge with every overlapping or adjacent range
        let mut merged_start = seq;
        let mut merged_end = end;
        let overlapping: Vec<_> = self
            .out_of_order
            .range(..=end)
            .rev()
            .take_while(|(_, block_end)| **block_end >= seq)
            .map(|(&start, &block_end)| (start, block_end))
            .collect();
        for (start, block_end) in overlapping {
            self.out_of_order.remove(&start);
            self.out_of_order_bytes -= block_end - start;
            merged_start = merged_start.min(start);
            merged_end = merged_end.max(block_end);
        }

        self.out_of_order.insert(merged_start, merged_end);
        self.out_of_order_bytes += merged_end - merged_start;
        self.last_block_start = Some(merged_start);
        outcome.out_of_order = true;
        outcome
    }

    /// Up to `max` out-of-order ranges, the most recently updated one first
    pub fn sack_blocks(&self, max: usize) -> Vec<(u64, u64)> {
        let mut blocks = Vec::with_capacity(max);
        if let Some(start) = self.last_block_start {
            if let Some(&end) = self.out_of_order.get(&start) {
                blocks.push((start, end));
            }
        }

        for (&start, &end) in self.out_of_order.iter().rev() {
            if blocks.len() >= max {
                break;
            }
            if Some(start) != self.last_block_start {
                blocks.push((start, end));
            }
        }

        blocks.truncate(max);
        blocks
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_in_order_delivery() {
        let mut rx = RxBuffer::new(1, 10_000);
        let outcome = rx.receive(1, 100);
        assert_eq!(outcome.delivered, 100);
        assert_eq!(rx.next_expected(), 101);

        assert!(rx.receive(1, 100).duplicate);
    }

    #[test]
    fn test_gap_is_filled() {
        let mut rx = RxBuffer::new(1, 10_000);
        assert!(rx.receive(101, 100).out_of_order);
        assert!(rx.receive(301, 100).out_of_order);
        assert_eq!(rx.window(), 10_000 - 200);
        assert_eq!(rx.sack_blocks(3), vec![(301, 401), (101, 201)]);

        let outcome = rx.receive(1, 100);
        assert!(outcome.filled_gap);
        assert_eq!(outcome.delivered, 200);
        assert_eq!(rx.next_expected(), 201);
        assert_eq!(rx.sack_blocks(3), vec![(301, 401)]);

        let outcome = rx.receive(201, 100);
        assert_eq!(outcome.delivered, 200);
        assert!(!rx.has_gaps());
        assert_eq!(rx.window(), 10_000);
    }

    #[test]
    fn test_adjacent_ranges_merge() {
        let mut rx = RxBuffer::new(1, 10_000);
        rx.receive(201, 100);
        rx.receive(401, 100);
        rx.receive(301, 100);
        assert_eq!(rx.sack_blocks(3), vec![(201, 501)]);
    }

    #[test]
    fn test_most_recent_block_first() {
        let mut rx = RxBuffer::new(1, 10_000);
        rx.receive(801, 100);
        rx.receive(201, 100);
        rx.receive(501, 100);
        rx.receive(1001, 100);
        rx.receive(211, 10);

        // The block that was touched last comes first, the rest from the highest down
        assert_eq!(rx.sack_blocks(3), vec![(201, 301), (1001, 1101), (801, 901)]);
    }

    #[test]
    fn test_data_beyond_window_is_ignored() {
        let mut rx = RxBuffer::new(1, 1000);
        assert!(rx.receive(5001, 100).duplicate);
        assert!(!rx.has_gaps());
    }
}
