use crate::tcp::TcpSocketState;
use crate::tcp::congestion::{AdditiveIncrease, CongestionOps, RoundTracker, slow_start};
use std::time::Duration;

/// Backlog, in segments, above which the network is considered congested
const BETA: f64 = 3.0;

/// Veno: uses the Vegas backlog estimate to tell random losses from congestion losses
#[derive(Default)]
pub struct Veno {
    base_rtt: Option<Duration>,
    round: RoundTracker,
    diff: f64,
    avoidance: AdditiveIncrease,
}

impl Veno {
    pub fn backlog(&self) -> f64 {
        self.diff
    }
}

impl CongestionOps for Veno {
    fn name(&self) -> &'static str {
        "TcpVeno"
    }

    fn increase_window(&mut self, tcb: &mut TcpSocketState, mut segments_acked: u32) {
        if let (Some(round), Some(base_rtt)) = (self.round.poll_round_end(tcb), self.base_rtt) {
            let window = tcb.cwnd_segments() as f64;
            let rtt = round.min_rtt.as_secs_f64();
            self.diff = window - window * (base_rtt.as_secs_f64() / rtt);
        }

        if tcb.in_slow_start() {
            segments_acked = slow_start(tcb, segments_acked);
        }

        if tcb.in_slow_start() || segments_acked == 0 {
            return;
        }

        if self.diff < BETA {
            self.avoidance.on_acked(tcb, segments_acked);
        } else {
            // Congested: grow by one segment every other round trip
            let every = 2 * tcb.cwnd_segments().max(1);
            self.avoidance.increase_every(tcb, segments_acked, every);
        }
    }

    fn get_ssthresh(&mut self, tcb: &TcpSocketState, bytes_in_flight: u32) -> u32 {
        let reduced = if self.diff < BETA {
            // Probably a random loss
            bytes_in_flight / 5 * 4
        } else {
            bytes_in_flight / 2
        };
        reduced.max(2 * tcb.segment_size)
    }

    fn pkts_acked(&mut self, _tcb: &mut TcpSocketState, _segments_acked: u32, rtt: Option<Duration>) {
        if let Some(rtt) = rtt {
            self.base_rtt = Some(self.base_rtt.map_or(rtt, |b| b.min(rtt)));
            self.round.add_sample(rtt);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tcp::congestion::test_util::*;

    #[test]
    fn test_random_loss_reduces_less() {
        let mut cc = Veno::default();
        let mut tcb = tcb(20, 20);
        for _ in 0..3 {
            ack_one_window(&mut cc, &mut tcb, Duration::from_millis(100));
        }

        assert!(cc.backlog() < BETA);
        assert_eq!(cc.get_ssthresh(&tcb, 20 * MSS), 16 * MSS);
    }

    #[test]
    fn test_congestion_loss_halves() {
        let mut cc = Veno::default();
        let mut tcb = tcb(20, 20);
        ack_one_window(&mut cc, &mut tcb, Duration::from_millis(100));
        for _ in 0..3 {
            ack_one_window(&mut cc, &mut tcb, Duration::from_millis(200));
        }

        assert!(cc.backlog() >= BETA);
        assert_eq!(cc.get_ssthresh(&tcb, 20 * MSS), 10 * MSS);
    }

    #[test]
    fn test_congested_growth_is_slower() {
        let mut reno_like = Veno::default();
        let mut tcb_a = tcb(20, 20);
        let mut congested = Veno::default();
        let mut tcb_b = tcb(20, 20);
        congested.diff = 10.0;

        reno_like.increase_window(&mut tcb_a, 40);
        congested.increase_window(&mut tcb_b, 40);
        assert_eq!(tcb_a.cwnd, 22 * MSS);
        assert_eq!(tcb_b.cwnd, 21 * MSS);
    }
}
