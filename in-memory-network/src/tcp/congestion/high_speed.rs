use crate::tcp::TcpSocketState;
use crate::tcp::congestion::{CongestionOps, FractionalIncrease, slow_start};

const LOW_WINDOW: f64 = 38.0;
const HIGH_WINDOW: f64 = 83_000.0;
const HIGH_DECREASE: f64 = 0.1;
const HIGH_P: f64 = 1e-7;

/// HighSpeed TCP (RFC 3649): larger increases and smaller decreases once the window is large
#[derive(Default)]
pub struct HighSpeed {
    growth: FractionalIncrease,
}

/// Multiplicative decrease factor for a window of `w` segments
pub fn decrease_factor(w: f64) -> f64 {
    if w <= LOW_WINDOW {
        return 0.5;
    }

    let w = w.min(HIGH_WINDOW);
    (HIGH_DECREASE - 0.5) * (w.ln() - LOW_WINDOW.ln()) / (HIGH_WINDOW.ln() - LOW_WINDOW.ln()) + 0.5
}

/// Additive increase, in segments per round trip, for a window of `w` segments
pub fn increase_factor(w: f64) -> f64 {
    if w <= LOW_WINDOW {
        return 1.0;
    }

    // Response function p(w), interpolated on a log-log scale between the two reference points
    let low_p = 1.5 / (LOW_WINDOW * LOW_WINDOW);
    let slope = (HIGH_P.ln() - low_p.ln()) / (HIGH_WINDOW.ln() - LOW_WINDOW.ln());
    let p = (low_p.ln() + slope * (w.ln() - LOW_WINDOW.ln())).exp();
    let b = decrease_factor(w);
    (w * w * p * 2.0 * b / (2.0 - b)).max(1.0)
}

impl CongestionOps for HighSpeed {
    fn name(&self) -> &'static str {
        "TcpHighSpeed"
    }

    fn increase_window(&mut self, tcb: &mut TcpSocketState, mut segments_acked: u32) {
        if tcb.in_slow_start() {
            segments_acked = slow_start(tcb, segments_acked);
        }

        if !tcb.in_slow_start() {
            for _ in 0..segments_acked {
                let w = tcb.cwnd_segments().max(1) as f64;
                self.growth.add(tcb, increase_factor(w) / w);
            }
        }
    }

    fn get_ssthresh(&mut self, tcb: &TcpSocketState, _bytes_in_flight: u32) -> u32 {
        let w = tcb.cwnd_segments() as f64;
        let reduced = (w * (1.0 - decrease_factor(w))) as u32;
        reduced.max(2) * tcb.segment_size
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tcp::congestion::test_util::*;
    use std::time::Duration;

    #[test]
    fn test_response_function_reference_points() {
        assert_eq!(decrease_factor(10.0), 0.5);
        assert!((decrease_factor(HIGH_WINDOW) - HIGH_DECREASE).abs() < 1e-9);
        assert_eq!(increase_factor(38.0), 1.0);

        // Larger windows increase faster and decrease less
        assert!(increase_factor(1000.0) > increase_factor(100.0));
        assert!(decrease_factor(1000.0) < decrease_factor(100.0));
    }

    #[test]
    fn test_small_windows_behave_like_reno() {
        let mut cc = HighSpeed::default();
        let mut tcb = tcb(10, 10);
        ack_one_window(&mut cc, &mut tcb, Duration::from_millis(100));
        assert_eq!(tcb.cwnd, 11 * MSS);
        assert_eq!(cc.get_ssthresh(&tcb, tcb.cwnd), 5 * MSS);
    }

    #[test]
    fn test_large_windows_grow_faster_and_shrink_less() {
        let mut cc = HighSpeed::default();
        let mut tcb = tcb(1000, 1000);
        ack_one_window(&mut cc, &mut tcb, Duration::from_millis(100));
        assert!(tcb.cwnd > 1001 * MSS, "cwnd = {}", tcb.cwnd);

        let ssthresh = cc.get_ssthresh(&tcb, tcb.cwnd);
        assert!(ssthresh > tcb.cwnd / 2);
    }
}
