use crate::queue_disc::{QueueDisc, QueueDiscKind, QueueDiscStats, QueueItem};
use crate::sim::SimTime;
use std::collections::VecDeque;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct CoDelConfig {
    /// Acceptable standing queue delay
    pub target: Duration,
    /// Window over which the delay must stay above target before dropping starts
    pub interval: Duration,
    /// Maximum number of queued packets
    pub limit: usize,
    /// Below this many queued bytes nothing is dropped
    pub min_bytes: usize,
}

impl Default for CoDelConfig {
    fn default() -> Self {
        Self {
            target: Duration::from_millis(5),
            interval: Duration::from_millis(100),
            limit: 1500,
            min_bytes: 1500,
        }
    }
}

/// Controlled delay AQM, dropping at dequeue time based on how long packets sat in the queue
pub struct CoDel {
    config: CoDelConfig,
    queue: VecDeque<QueueItem>,
    bytes: usize,
    first_above_time: Option<SimTime>,
    drop_next: SimTime,
    count: u32,
    last_count: u32,
    dropping: bool,
    stats: QueueDiscStats,
}

struct Dequeued {
    item: Option<QueueItem>,
    ok_to_drop: bool,
}

impl CoDel {
    pub fn new(config: CoDelConfig) -> Self {
        Self {
            config,
            queue: VecDeque::new(),
            bytes: 0,
            first_above_time: None,
            drop_next: SimTime::ZERO,
            count: 0,
            last_count: 0,
            dropping: false,
            stats: QueueDiscStats::default(),
        }
    }

    pub fn is_dropping(&self) -> bool {
        self.dropping
    }

    fn control_law(&self, t: SimTime, count: u32) -> SimTime {
        let spacing = self.config.interval.as_secs_f64() / (count.max(1) as f64).sqrt();
        t + Duration::from_secs_f64(spacing)
    }

    fn do_dequeue(&mut self, now: SimTime) -> Dequeued {
        let Some(item) = self.queue.pop_front() else {
            self.first_above_time = None;
            return Dequeued {
                item: None,
                ok_to_drop: false,
            };
        };

        self.bytes -= item.size();

        let sojourn = now.saturating_duration_since(item.enqueued_at);
        let mut ok_to_drop = false;
        if sojourn < self.config.target || self.bytes <= self.config.min_bytes {
            self.first_above_time = None;
        } else {
            match self.first_above_time {
                None => self.first_above_time = Some(now + self.config.interval),
                Some(first_above_time) => ok_to_drop = now >= first_above_time,
            }
        }

        Dequeued {
            item: Some(item),
            ok_to_drop,
        }
    }

    fn drop_item(&mut self, item: QueueItem, dropped: &mut Vec<QueueItem>) {
        self.stats.dropped_after_dequeue.track_one(item.size());
        dropped.push(item);
    }
}

impl QueueDisc for CoDel {
    fn kind(&self) -> QueueDiscKind {
        QueueDiscKind::CoDel
    }

    fn enqueue(&mut self, item: QueueItem) -> Result<(), QueueItem> {
        if self.queue.len() >= self.config.limit {
            self.stats.dropped_before_enqueue.track_one(item.size());
            return Err(item);
        }

        self.stats.enqueued.track_one(item.size());
        self.bytes += item.size();
        self.queue.push_back(item);
        self.stats.max_len = self.stats.max_len.max(self.queue.len());
        Ok(())
    }

    fn dequeue(&mut self, now: SimTime, dropped: &mut Vec<QueueItem>) -> Option<QueueItem> {
        let mut r = self.do_dequeue(now);
        if r.item.is_none() {
            self.dropping = false;
            return None;
        }

        if self.dropping {
            if !r.ok_to_drop {
                self.dropping = false;
            }

            while self.dropping && now >= self.drop_next {
                if let Some(item) = r.item.take() {
                    self.drop_item(item, dropped);
                }
                self.count += 1;

                r = self.do_dequeue(now);
                if r.ok_to_drop {
                    self.drop_next = self.control_law(self.drop_next, self.count);
                } else {
                    self.dropping = false;
                }
            }
        } else if r.ok_to_drop {
            if let Some(item) = r.item.take() {
                self.drop_item(item, dropped);
            }

            r = self.do_dequeue(now);
            self.dropping = true;

            // Resume close to the previous drop rate if the last dropping episode was recent
            let delta = self.count.saturating_sub(self.last_count);
            self.count = 1;
            if delta > 1
                && now.saturating_duration_since(self.drop_next) < 16 * self.config.interval
            {
                self.count = delta;
            }

            self.drop_next = self.control_law(now, self.count);
            self.last_count = self.count;
        }

        let item = r.item?;
        self.stats.dequeued.track_one(item.size());
        Some(item)
    }

    fn len(&self) -> usize {
        self.queue.len()
    }

    fn stats(&self) -> &QueueDiscStats {
        &self.stats
    }
}
