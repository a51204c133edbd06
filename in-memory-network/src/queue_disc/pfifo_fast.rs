use crate::queue_disc::{QueueDisc, QueueDiscKind, QueueDiscStats, QueueItem};
use crate::sim::SimTime;
use std::collections::VecDeque;

const BANDS: usize = 3;

// Maps bits 1-4 of the TOS byte to a priority, and a priority to a band (0 is served first)
const TOS_TO_PRIORITY: [usize; 16] = [0, 1, 0, 0, 2, 2, 2, 2, 6, 6, 6, 6, 4, 4, 4, 4];
const PRIORITY_TO_BAND: [usize; 16] = [1, 2, 2, 2, 1, 2, 0, 0, 1, 1, 1, 1, 1, 1, 1, 1];

/// Three FIFO bands served in strict priority order, sharing one packet limit
pub struct PfifoFast {
    bands: [VecDeque<QueueItem>; BANDS],
    limit: usize,
    stats: QueueDiscStats,
}

impl PfifoFast {
    pub const DEFAULT_LIMIT: usize = 1000;

    pub fn with_limit(limit: usize) -> Self {
        Self {
            bands: Default::default(),
            limit,
            stats: QueueDiscStats::default(),
        }
    }

    fn band(tos: u8) -> usize {
        let priority = TOS_TO_PRIORITY[((tos & 0x1e) >> 1) as usize];
        PRIORITY_TO_BAND[priority]
    }
}

impl Default for PfifoFast {
    fn default() -> Self {
        Self::with_limit(Self::DEFAULT_LIMIT)
    }
}

impl QueueDisc for PfifoFast {
    fn kind(&self) -> QueueDiscKind {
        QueueDiscKind::PfifoFast
    }

    fn enqueue(&mut self, item: QueueItem) -> Result<(), QueueItem> {
        if self.len() >= self.limit {
            self.stats.dropped_before_enqueue.track_one(item.size());
            return Err(item);
        }

        self.stats.enqueued.track_one(item.size());
        let band = Self::band(item.packet.ip.tos);
        self.bands[band].push_back(item);
        self.stats.max_len = self.stats.max_len.max(self.len());
        Ok(())
    }

    fn dequeue(&mut self, _now: SimTime, _dropped: &mut Vec<QueueItem>) -> Option<QueueItem> {
        let item = self.bands.iter_mut().find_map(|band| band.pop_front())?;
        self.stats.dequeued.track_one(item.size());
        Some(item)
    }

    fn len(&self) -> usize {
        self.bands.iter().map(|band| band.len()).sum()
    }

    fn stats(&self) -> &QueueDiscStats {
        &self.stats
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::queue_disc::test_util::item;

    #[test]
    fn test_drops_beyond_limit() {
        let mut queue = PfifoFast::with_limit(3);
        for uid in 0..3 {
            assert!(queue.enqueue(item(uid, 0, SimTime::ZERO)).is_ok());
        }

        let rejected = queue.enqueue(item(3, 0, SimTime::ZERO)).unwrap_err();
        assert_eq!(rejected.packet.uid, 3);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.stats().dropped_before_enqueue.packets, 1);
    }

    #[test]
    fn test_fifo_within_band_and_priority_across_bands() {
        let mut queue = PfifoFast::default();
        queue.enqueue(item(0, 0x00, SimTime::ZERO)).unwrap();
        queue.enqueue(item(1, 0x02, SimTime::ZERO)).unwrap();
        queue.enqueue(item(2, 0x00, SimTime::ZERO)).unwrap();
        queue.enqueue(item(3, 0x10, SimTime::ZERO)).unwrap();

        let mut dropped = Vec::new();
        let order: Vec<_> =
            std::iter::from_fn(|| queue.dequeue(SimTime::ZERO, &mut dropped))
                .map(|i| i.packet.uid)
                .collect();

        // Low-delay TOS goes first, filler traffic goes last
        assert_eq!(order, vec![3, 0, 2, 1]);
        assert!(dropped.is_empty());
    }
}
