use crate::tcp::congestion::{AdditiveIncrease, CongestionOps, RoundTracker, slow_start};
use crate::tcp::{CongestionState, TcpSocketState};
use std::time::Duration;

const ALPHA: f64 = 2.0;
const BETA: f64 = 4.0;
const GAMMA: f64 = 1.0;

/// Delay-based control: once per round trip, compares the expected and actual throughput and
/// keeps between `ALPHA` and `BETA` segments queued in the network
pub struct Vegas {
    base_rtt: Option<Duration>,
    round: RoundTracker,
    enabled: bool,
    reno: AdditiveIncrease,
    /// Queued segments estimated at the end of the last round
    diff: Option<f64>,
}

impl Default for Vegas {
    fn default() -> Self {
        Self {
            base_rtt: None,
            round: RoundTracker::default(),
            enabled: true,
            reno: AdditiveIncrease::default(),
            diff: None,
        }
    }
}

impl Vegas {
    pub fn diff(&self) -> Option<f64> {
        self.diff
    }
}

impl CongestionOps for Vegas {
    fn name(&self) -> &'static str {
        "TcpVegas"
    }

    fn increase_window(&mut self, tcb: &mut TcpSocketState, segments_acked: u32) {
        if !self.enabled {
            let left = if tcb.in_slow_start() {
                slow_start(tcb, segments_acked)
            } else {
                segments_acked
            };
            if !tcb.in_slow_start() {
                self.reno.on_acked(tcb, left);
            }
            return;
        }

        let Some(round) = self.round.poll_round_end(tcb) else {
            if tcb.in_slow_start() {
                slow_start(tcb, segments_acked);
            }
            return;
        };

        let Some(base_rtt) = self.base_rtt else {
            return;
        };

        if round.samples <= 2 {
            // Too few samples to trust the estimate
            if tcb.in_slow_start() {
                slow_start(tcb, segments_acked);
            } else {
                self.reno.on_acked(tcb, segments_acked);
            }
            return;
        }

        let rtt = round.min_rtt.as_secs_f64();
        let window = tcb.cwnd_segments() as f64;
        let target = window * (base_rtt.as_secs_f64() / rtt);
        let diff = window - target;
        self.diff = Some(diff);

        let mut segments = tcb.cwnd_segments();
        if diff > GAMMA && tcb.in_slow_start() {
            // Leave slow start, too much is queued already
            tcb.ssthresh = self.get_ssthresh(tcb, 0);
            segments = segments.min(target as u32 + 1);
        } else if tcb.in_slow_start() {
            slow_start(tcb, segments_acked);
            segments = tcb.cwnd_segments();
        } else if diff > BETA {
            tcb.ssthresh = self.get_ssthresh(tcb, 0);
            segments = segments.saturating_sub(1);
        } else if diff < ALPHA {
            segments += 1;
        }

        tcb.cwnd = segments.max(2) * tcb.segment_size;
        tcb.ssthresh = tcb.ssthresh.max(3 * tcb.cwnd / 4);
    }

    fn get_ssthresh(&mut self, tcb: &TcpSocketState, _bytes_in_flight: u32) -> u32 {
        tcb.ssthresh
            .min(tcb.cwnd.saturating_sub(tcb.segment_size))
            .max(2 * tcb.segment_size)
    }

    fn pkts_acked(&mut self, _tcb: &mut TcpSocketState, _segments_acked: u32, rtt: Option<Duration>) {
        let Some(rtt) = rtt else {
            return;
        };

        self.base_rtt = Some(self.base_rtt.map_or(rtt, |b| b.min(rtt)));
        if self.enabled {
            self.round.add_sample(rtt);
        }
    }

    fn congestion_state_set(&mut self, tcb: &mut TcpSocketState, new_state: CongestionState) {
        match new_state {
            CongestionState::Open if !self.enabled => {
                self.enabled = true;
                self.round.reset(tcb);
            }
            CongestionState::Open => {}
            _ => self.enabled = false,
        }
    }
}
