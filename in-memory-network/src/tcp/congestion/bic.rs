use crate::tcp::TcpSocketState;
use crate::tcp::congestion::{CongestionOps, slow_start};

const LOW_WINDOW: u32 = 14;
const B: u32 = 4;
const MAX_INCREMENT: u32 = 16;
const SMOOTH_PART: u32 = 20;
const BETA: f64 = 0.8;

/// Binary increase congestion control
///
/// After a loss the window searches for the last maximum with a binary search, then probes past
/// it slowly before accelerating again.
#[derive(Default)]
pub struct Bic {
    /// Window size, in segments, at the last loss
    last_max_cwnd: u32,
    acked_count: u32,
}

impl Bic {
    /// The number of ACKs needed to grow the window by one segment
    fn acks_per_increment(&self, window: u32) -> u32 {
        let window = window.max(1);
        let count = if window < LOW_WINDOW {
            window
        } else if window < self.last_max_cwnd {
            let distance = (self.last_max_cwnd - window) / B;
            if distance > MAX_INCREMENT {
                window / MAX_INCREMENT
            } else if distance <= 1 {
                window * SMOOTH_PART / B
            } else {
                window / distance
            }
        } else if window < self.last_max_cwnd + B {
            window * SMOOTH_PART / B
        } else if window < self.last_max_cwnd + MAX_INCREMENT * (B - 1) {
            window * (B - 1) / (window - self.last_max_cwnd)
        } else {
            window / MAX_INCREMENT
        };

        let count = if self.last_max_cwnd == 0 {
            count.min(SMOOTH_PART)
        } else {
            count
        };
        count.max(1)
    }
}

impl CongestionOps for Bic {
    fn name(&self) -> &'static str {
        "TcpBic"
    }

    fn increase_window(&mut self, tcb: &mut TcpSocketState, mut segments_acked: u32) {
        if tcb.in_slow_start() {
            segments_acked = slow_start(tcb, segments_acked);
        }

        if tcb.in_slow_start() {
            return;
        }

        for _ in 0..segments_acked {
            self.acked_count += 1;
            if self.acked_count >= self.acks_per_increment(tcb.cwnd_segments()) {
                tcb.cwnd = tcb.cwnd.saturating_add(tcb.segment_size);
                self.acked_count = 0;
            }
        }
    }

    fn get_ssthresh(&mut self, tcb: &TcpSocketState, _bytes_in_flight: u32) -> u32 {
        let window = tcb.cwnd_segments();

        // Fast convergence: release bandwidth sooner when the maximum keeps shrinking
        self.last_max_cwnd = if window < self.last_max_cwnd {
            (window as f64 * BETA) as u32
        } else {
            window
        };

        let reduced = if window < LOW_WINDOW {
            window / 2
        } else {
            (window as f64 * BETA) as u32
        };
        reduced.max(2) * tcb.segment_size
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tcp::congestion::test_util::*;
    use crate::tcp::congestion::test_util::tcb as tcb_with;
    use std::time::Duration;

    #[test]
    fn test_small_windows_behave_like_reno() {
        let mut cc = Bic::default();
        let mut tcb = tcb(10, 10);
        ack_one_window(&mut cc, &mut tcb, Duration::from_millis(100));
        assert_eq!(tcb.cwnd, 11 * MSS);
        assert_eq!(cc.get_ssthresh(&tcb, tcb.cwnd), 5 * MSS);
    }

    #[test]
    fn test_binary_search_towards_last_maximum() {
        let mut cc = Bic::default();
        let mut tcb = tcb(100, 100);
        let ssthresh = cc.get_ssthresh(&tcb, tcb.cwnd);
        assert_eq!(ssthresh, 80 * MSS);
        assert_eq!(cc.last_max_cwnd, 100);

        // Far below the maximum the window grows by several segments per round trip
        tcb.cwnd = ssthresh;
        tcb.ssthresh = ssthresh;
        ack_one_window(&mut cc, &mut tcb, Duration::from_millis(100));
        assert!(tcb.cwnd >= 84 * MSS, "cwnd = {}", tcb.cwnd);

        // Close to the maximum it slows down
        let mut near = tcb_with(99, 90);
        let before = near.cwnd;
        ack_one_window(&mut cc, &mut near, Duration::from_millis(100));
        assert!(near.cwnd - before <= MSS, "cwnd = {}", near.cwnd);
    }

    #[test]
    fn test_fast_convergence() {
        let mut cc = Bic::default();
        cc.last_max_cwnd = 200;
        let tcb = tcb(100, 100);
        cc.get_ssthresh(&tcb, tcb.cwnd);
        assert_eq!(cc.last_max_cwnd, 80);
    }
}
