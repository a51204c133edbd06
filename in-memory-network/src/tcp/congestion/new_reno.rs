use crate::tcp::TcpSocketState;
use crate::tcp::congestion::{AdditiveIncrease, CongestionOps, half_of_flight, slow_start};

/// Slow start followed by additive increase, halving on loss
#[derive(Default)]
pub struct NewReno {
    avoidance: AdditiveIncrease,
}

impl CongestionOps for NewReno {
    fn name(&self) -> &'static str {
        "TcpNewReno"
    }

    fn increase_window(&mut self, tcb: &mut TcpSocketState, mut segments_acked: u32) {
        if tcb.in_slow_start() {
            segments_acked = slow_start(tcb, segments_acked);
        }

        if !tcb.in_slow_start() && segments_acked > 0 {
            self.avoidance.on_acked(tcb, segments_acked);
        }
    }

    fn get_ssthresh(&mut self, tcb: &TcpSocketState, bytes_in_flight: u32) -> u32 {
        half_of_flight(tcb, bytes_in_flight)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tcp::congestion::test_util::*;
    use std::time::Duration;

    #[test]
    fn test_slow_start_doubles_per_round() {
        let mut cc = NewReno::default();
        let mut tcb = tcb(10, u32::MAX);
        ack_one_window(&mut cc, &mut tcb, Duration::from_millis(100));
        assert_eq!(tcb.cwnd, 20 * MSS);
    }

    #[test]
    fn test_congestion_avoidance_adds_one_segment_per_round() {
        let mut cc = NewReno::default();
        let mut tcb = tcb(10, 10);
        ack_one_window(&mut cc, &mut tcb, Duration::from_millis(100));
        assert_eq!(tcb.cwnd, 11 * MSS);
    }

    #[test]
    fn test_leftover_segments_continue_in_avoidance() {
        let mut cc = NewReno::default();
        let mut tcb = tcb(10, 11);

        // One segment finishes slow start, the other nine count towards avoidance
        cc.increase_window(&mut tcb, 10);
        assert_eq!(tcb.cwnd, 11 * MSS);
        cc.increase_window(&mut tcb, 2);
        assert_eq!(tcb.cwnd, 12 * MSS);
    }

    #[test]
    fn test_ssthresh_halves_flight() {
        let mut cc = NewReno::default();
        let tcb = tcb(10, 10);
        assert_eq!(cc.get_ssthresh(&tcb, 20 * MSS), 10 * MSS);
        assert_eq!(cc.get_ssthresh(&tcb, MSS), 2 * MSS);
    }
}
