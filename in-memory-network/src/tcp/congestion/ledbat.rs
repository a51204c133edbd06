use crate::tcp::TcpSocketState;
use crate::tcp::congestion::{CongestionOps, half_of_flight, slow_start};
use std::collections::VecDeque;
use std::time::Duration;

const TARGET_DELAY: Duration = Duration::from_millis(100);
const GAIN: f64 = 1.0;
const MIN_CWND_SEGMENTS: u32 = 2;
/// RTT samples used to filter the current delay
const CURRENT_FILTER: usize = 4;

/// Low extra delay background transport (RFC 6817)
///
/// Yields to other traffic by keeping the queueing delay it causes below a target. The queueing
/// delay is estimated as the current RTT minus the lowest RTT ever observed.
pub struct Ledbat {
    base_rtt: Option<Duration>,
    current: VecDeque<Duration>,
    /// Fractional window growth (or shrinkage), in bytes
    pending_bytes: f64,
}

impl Default for Ledbat {
    fn default() -> Self {
        Self {
            base_rtt: None,
            current: VecDeque::with_capacity(CURRENT_FILTER),
            pending_bytes: 0.0,
        }
    }
}

impl Ledbat {
    pub fn queuing_delay(&self) -> Option<Duration> {
        let base = self.base_rtt?;
        let current = self.current.iter().min()?;
        Some(current.saturating_sub(base))
    }
}

impl CongestionOps for Ledbat {
    fn name(&self) -> &'static str {
        "TcpLedbat"
    }

    fn increase_window(&mut self, tcb: &mut TcpSocketState, mut segments_acked: u32) {
        let Some(queuing_delay) = self.queuing_delay() else {
            slow_start(tcb, segments_acked);
            return;
        };

        if tcb.in_slow_start() && queuing_delay < TARGET_DELAY {
            segments_acked = slow_start(tcb, segments_acked);
        }

        if segments_acked == 0 {
            return;
        }

        let target = TARGET_DELAY.as_secs_f64();
        let off_target = (target - queuing_delay.as_secs_f64()) / target;
        let mss = tcb.segment_size as f64;
        self.pending_bytes += GAIN * off_target * segments_acked as f64 * mss * mss / tcb.cwnd as f64;

        let whole = self.pending_bytes.trunc();
        self.pending_bytes -= whole;
        let cwnd = (tcb.cwnd as f64 + whole).max((MIN_CWND_SEGMENTS * tcb.segment_size) as f64);
        tcb.cwnd = cwnd as u32;

        if off_target < 0.0 {
            // Over the target: slow start ends for good
            tcb.ssthresh = tcb.ssthresh.min(tcb.cwnd);
        }
    }

    fn get_ssthresh(&mut self, tcb: &TcpSocketState, bytes_in_flight: u32) -> u32 {
        half_of_flight(tcb, bytes_in_flight)
    }

    fn pkts_acked(&mut self, _tcb: &mut TcpSocketState, _segments_acked: u32, rtt: Option<Duration>) {
        if let Some(rtt) = rtt {
            self.base_rtt = Some(self.base_rtt.map_or(rtt, |b| b.min(rtt)));
            if self.current.len() == CURRENT_FILTER {
                self.current.pop_front();
            }
            self.current.push_back(rtt);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tcp::congestion::test_util::*;

    #[test]
    fn test_grows_below_target() {
        let mut cc = Ledbat::default();
        let mut tcb = tcb(20, 20);
        for _ in 0..3 {
            ack_one_window(&mut cc, &mut tcb, Duration::from_millis(100));
        }

        assert_eq!(cc.queuing_delay(), Some(Duration::ZERO));
        assert!(tcb.cwnd >= 22 * MSS, "cwnd = {}", tcb.cwnd);
    }

    #[test]
    fn test_shrinks_above_target() {
        let mut cc = Ledbat::default();
        let mut tcb = tcb(20, 20);
        ack_one(&mut cc, &mut tcb, Duration::from_millis(50));
        for _ in 0..3 {
            ack_one_window(&mut cc, &mut tcb, Duration::from_millis(300));
        }

        assert_eq!(cc.queuing_delay(), Some(Duration::from_millis(250)));
        assert!(tcb.cwnd < 20 * MSS, "cwnd = {}", tcb.cwnd);
    }

    #[test]
    fn test_window_never_drops_below_minimum() {
        let mut cc = Ledbat::default();
        let mut tcb = tcb(3, 3);
        ack_one(&mut cc, &mut tcb, Duration::from_millis(10));
        for _ in 0..50 {
            ack_one(&mut cc, &mut tcb, Duration::from_secs(2));
        }

        assert_eq!(tcb.cwnd, 2 * MSS);
    }
}
