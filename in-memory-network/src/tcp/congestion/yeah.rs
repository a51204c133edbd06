use crate::tcp::TcpSocketState;
use crate::tcp::congestion::{AdditiveIncrease, CongestionOps, RoundTracker, slow_start};
use std::time::Duration;

/// Maximum backlog, in segments, tolerated in fast mode
const ALPHA: u32 = 80;
const GAMMA: u32 = 1;
const DELTA: u32 = 3;
const EPSILON: u32 = 1;
/// Maximum queueing delay, as a fraction of the base RTT (1 / PHY)
const PHY: f64 = 8.0;
const RHO: u32 = 16;
const ZETA: u32 = 50;
const SCALABLE_AI_FACTOR: u32 = 50;

/// Yet Another Highspeed TCP
///
/// Runs Scalable TCP while the estimated queue is short and falls back to Reno otherwise. When the
/// queue grows too long, the window is reduced before any loss happens.
pub struct Yeah {
    base_rtt: Option<Duration>,
    round: RoundTracker,
    /// Rounds spent in slow (Reno) mode in a row
    reno_rounds: u32,
    reno_count: u32,
    fast_count: u32,
    last_queue: u32,
    scalable: AdditiveIncrease,
    reno: AdditiveIncrease,
}

impl Default for Yeah {
    fn default() -> Self {
        Self {
            base_rtt: None,
            round: RoundTracker::default(),
            reno_rounds: 0,
            reno_count: 2,
            fast_count: 0,
            last_queue: 0,
            scalable: AdditiveIncrease::default(),
            reno: AdditiveIncrease::default(),
        }
    }
}

impl Yeah {
    pub fn in_fast_mode(&self) -> bool {
        self.reno_rounds == 0
    }

    fn end_of_round(&mut self, tcb: &mut TcpSocketState, rtt: Duration, base_rtt: Duration) {
        let window = tcb.cwnd_segments();
        let queueing = rtt.saturating_sub(base_rtt).as_secs_f64();
        let queue = (queueing * window as f64 / rtt.as_secs_f64().max(f64::MIN_POSITIVE)) as u32;
        let congestion_level = queueing / base_rtt.as_secs_f64().max(f64::MIN_POSITIVE);

        if queue > ALPHA || congestion_level > 1.0 / PHY {
            if queue > ALPHA && window > self.reno_count {
                // Precautionary decongestion
                let reduction = (queue / GAMMA).min(window >> EPSILON);
                let reduced = window.saturating_sub(reduction).max(self.reno_count).max(2);
                tcb.cwnd = reduced * tcb.segment_size;
                tcb.ssthresh = tcb.cwnd;
            }

            if self.reno_count <= 2 {
                self.reno_count = (window >> 1).max(2);
            } else {
                self.reno_count += 1;
            }
            self.reno_rounds += 1;
        } else {
            self.fast_count += 1;
            if self.fast_count > ZETA {
                self.reno_count = 2;
                self.fast_count = 0;
            }
            self.reno_rounds = 0;
        }

        self.last_queue = queue;
    }
}

impl CongestionOps for Yeah {
    fn name(&self) -> &'static str {
        "TcpYeah"
    }

    fn increase_window(&mut self, tcb: &mut TcpSocketState, mut segments_acked: u32) {
        if tcb.in_slow_start() {
            segments_acked = slow_start(tcb, segments_acked);
        }

        if !tcb.in_slow_start() && segments_acked > 0 {
            if self.in_fast_mode() {
                let every = tcb.cwnd_segments().min(SCALABLE_AI_FACTOR);
                self.scalable.increase_every(tcb, segments_acked, every);
            } else {
                self.reno.on_acked(tcb, segments_acked);
            }
        }

        if let (Some(round), Some(base_rtt)) = (self.round.poll_round_end(tcb), self.base_rtt) {
            if !tcb.in_slow_start() {
                self.end_of_round(tcb, round.min_rtt, base_rtt);
            }
        }
    }

    fn get_ssthresh(&mut self, tcb: &TcpSocketState, bytes_in_flight: u32) -> u32 {
        let window = tcb.cwnd_segments();
        let reduction = if self.reno_rounds < RHO {
            self.last_queue
                .max(window >> DELTA)
                .min((window >> 1).max(2))
        } else {
            (window >> 1).max(2)
        };

        self.fast_count = 0;
        self.reno_count = (self.reno_count >> 1).max(2);

        let in_flight = bytes_in_flight / tcb.segment_size;
        in_flight.saturating_sub(reduction).max(2) * tcb.segment_size
    }

    fn pkts_acked(&mut self, _tcb: &mut TcpSocketState, _segments_acked: u32, rtt: Option<Duration>) {
        if let Some(rtt) = rtt {
            self.base_rtt = Some(self.base_rtt.map_or(rtt, |b| b.min(rtt)));
            self.round.add_sample(rtt);
        }
    }
}
