use crate::tcp::TcpSocketState;
use crate::tcp::congestion::{CongestionOps, FractionalIncrease, RoundTracker, slow_start};
use std::time::Duration;

const ALPHA_MIN: f64 = 0.3;
const ALPHA_MAX: f64 = 10.0;
const ALPHA_BASE: f64 = 1.0;
const BETA_MIN: f64 = 0.125;
const BETA_MAX: f64 = 0.5;
const BETA_BASE: f64 = 0.5;
/// Below this window (in segments) Illinois behaves like Reno
const WINDOW_THRESHOLD: u32 = 15;

/// TCP-Illinois: loss-based, with the increase and decrease factors picked from the average
/// queueing delay
pub struct Illinois {
    alpha: f64,
    beta: f64,
    base_rtt: Option<Duration>,
    max_rtt: Option<Duration>,
    round: RoundTracker,
    growth: FractionalIncrease,
}

impl Default for Illinois {
    fn default() -> Self {
        Self {
            alpha: ALPHA_MAX,
            beta: BETA_BASE,
            base_rtt: None,
            max_rtt: None,
            round: RoundTracker::default(),
            growth: FractionalIncrease::default(),
        }
    }
}

impl Illinois {
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn beta(&self) -> f64 {
        self.beta
    }

    fn update_factors(&mut self, window: u32, avg_rtt: Duration) {
        let (Some(base_rtt), Some(max_rtt)) = (self.base_rtt, self.max_rtt) else {
            return;
        };

        if window < WINDOW_THRESHOLD {
            self.alpha = ALPHA_BASE;
            self.beta = BETA_BASE;
            return;
        }

        let max_delay = max_rtt.saturating_sub(base_rtt).as_secs_f64();
        let delay = avg_rtt.saturating_sub(base_rtt).as_secs_f64();

        // Alpha: largest while the queue is nearly empty, shrinking as delay grows
        let d1 = max_delay / 100.0;
        self.alpha = if delay <= d1 || max_delay <= 0.0 {
            ALPHA_MAX
        } else {
            let k1 = (max_delay - d1) * ALPHA_MIN * ALPHA_MAX / (ALPHA_MAX - ALPHA_MIN);
            let k2 = (max_delay - d1) * ALPHA_MIN / (ALPHA_MAX - ALPHA_MIN) - d1;
            (k1 / (k2 + delay)).clamp(ALPHA_MIN, ALPHA_MAX)
        };

        // Beta: smallest while the queue is nearly empty, growing linearly in between
        let d2 = max_delay / 10.0;
        let d3 = max_delay * 8.0 / 10.0;
        self.beta = if delay <= d2 {
            BETA_MIN
        } else if delay >= d3 {
            BETA_MAX
        } else {
            let k3 = (BETA_MIN * d3 - BETA_MAX * d2) / (d3 - d2);
            let k4 = (BETA_MAX - BETA_MIN) / (d3 - d2);
            k3 + k4 * delay
        };
    }
}

impl CongestionOps for Illinois {
    fn name(&self) -> &'static str {
        "TcpIllinois"
    }

    fn increase_window(&mut self, tcb: &mut TcpSocketState, mut segments_acked: u32) {
        if let Some(round) = self.round.poll_round_end(tcb) {
            self.update_factors(tcb.cwnd_segments(), round.avg_rtt);
        }

        if tcb.in_slow_start() {
            segments_acked = slow_start(tcb, segments_acked);
        }

        if !tcb.in_slow_start() && segments_acked > 0 {
            let w = tcb.cwnd_segments().max(1) as f64;
            self.growth.add(tcb, self.alpha * segments_acked as f64 / w);
        }
    }

    fn get_ssthresh(&mut self, tcb: &TcpSocketState, _bytes_in_flight: u32) -> u32 {
        let reduced = (tcb.cwnd as f64 * (1.0 - self.beta)) as u32;
        reduced.max(2 * tcb.segment_size)
    }

    fn pkts_acked(&mut self, _tcb: &mut TcpSocketState, _segments_acked: u32, rtt: Option<Duration>) {
        if let Some(rtt) = rtt {
            self.base_rtt = Some(self.base_rtt.map_or(rtt, |b| b.min(rtt)));
            self.max_rtt = Some(self.max_rtt.map_or(rtt, |m| m.max(rtt)));
            self.round.add_sample(rtt);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tcp::congestion::test_util::*;

    #[test]
    fn test_empty_queue_means_aggressive_growth() {
        let mut cc = Illinois::default();
        let mut tcb = tcb(50, 50);

        // A single delayed sample establishes the maximum delay
        ack_one(&mut cc, &mut tcb, Duration::from_millis(200));
        for _ in 0..2 {
            ack_one_window(&mut cc, &mut tcb, Duration::from_millis(100));
        }

        assert_eq!(cc.alpha(), ALPHA_MAX);
        assert_eq!(cc.beta(), BETA_MIN);
        assert!(tcb.cwnd > 60 * MSS, "cwnd = {}", tcb.cwnd);
    }

    #[test]
    fn test_full_queue_means_cautious_growth() {
        let mut cc = Illinois::default();
        let mut tcb = tcb(50, 50);
        ack_one(&mut cc, &mut tcb, Duration::from_millis(100));
        for _ in 0..2 {
            ack_one_window(&mut cc, &mut tcb, Duration::from_millis(200));
        }

        assert!((cc.alpha() - ALPHA_MIN).abs() < 1e-6, "alpha = {}", cc.alpha());
        assert_eq!(cc.beta(), BETA_MAX);
        assert_eq!(cc.get_ssthresh(&tcb, tcb.cwnd), tcb.cwnd / 2);
    }

    #[test]
    fn test_small_windows_use_reno_factors() {
        let mut cc = Illinois::default();
        cc.base_rtt = Some(Duration::from_millis(100));
        cc.max_rtt = Some(Duration::from_millis(200));
        cc.update_factors(10, Duration::from_millis(150));
        assert_eq!(cc.alpha(), ALPHA_BASE);
        assert_eq!(cc.beta(), BETA_BASE);
    }
}
