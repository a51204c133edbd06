use crate::sim::SimTime;
use crate::tcp::{CongestionState, TcpSocketState};
use crate::tcp::congestion::{CongestionOps, FractionalIncrease, slow_start};
use std::time::Duration;

const DELTA_L: Duration = Duration::from_secs(1);
const DEFAULT_BACKOFF: f64 = 0.5;
const MIN_BETA: f64 = 0.5;
const MAX_BETA: f64 = 0.8;

/// H-TCP: the increase depends on the time elapsed since the last congestion event, the backoff
/// on the ratio between the minimum and maximum RTT
pub struct Htcp {
    alpha: f64,
    beta: f64,
    last_congestion: SimTime,
    min_rtt: Option<Duration>,
    max_rtt: Option<Duration>,
    growth: FractionalIncrease,
}

impl Default for Htcp {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta: DEFAULT_BACKOFF,
            last_congestion: SimTime::ZERO,
            min_rtt: None,
            max_rtt: None,
            growth: FractionalIncrease::default(),
        }
    }
}

impl Htcp {
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn beta(&self) -> f64 {
        self.beta
    }

    fn update_alpha(&mut self, now: SimTime) {
        let elapsed = now.saturating_duration_since(self.last_congestion);
        let factor = if elapsed <= DELTA_L {
            1.0
        } else {
            let diff = (elapsed - DELTA_L).as_secs_f64();
            1.0 + 10.0 * diff + (diff / 2.0).powi(2)
        };

        self.alpha = (2.0 * (1.0 - self.beta) * factor).max(1.0);
    }

    fn update_beta(&mut self) {
        self.beta = match (self.min_rtt, self.max_rtt) {
            (Some(min), Some(max)) if !max.is_zero() => {
                (min.as_secs_f64() / max.as_secs_f64()).clamp(MIN_BETA, MAX_BETA)
            }
            _ => DEFAULT_BACKOFF,
        };
    }
}

impl CongestionOps for Htcp {
    fn name(&self) -> &'static str {
        "TcpHtcp"
    }

    fn increase_window(&mut self, tcb: &mut TcpSocketState, mut segments_acked: u32) {
        if tcb.in_slow_start() {
            segments_acked = slow_start(tcb, segments_acked);
        }

        if !tcb.in_slow_start() && segments_acked > 0 {
            self.update_alpha(tcb.now);
            let w = tcb.cwnd_segments().max(1) as f64;
            self.growth.add(tcb, self.alpha * segments_acked as f64 / w);
        }
    }

    fn get_ssthresh(&mut self, tcb: &TcpSocketState, _bytes_in_flight: u32) -> u32 {
        self.update_beta();
        self.last_congestion = tcb.now;
        ((tcb.cwnd as f64 * self.beta) as u32).max(2 * tcb.segment_size)
    }

    fn pkts_acked(&mut self, _tcb: &mut TcpSocketState, _segments_acked: u32, rtt: Option<Duration>) {
        if let Some(rtt) = rtt {
            self.min_rtt = Some(self.min_rtt.map_or(rtt, |m| m.min(rtt)));
            self.max_rtt = Some(self.max_rtt.map_or(rtt, |m| m.max(rtt)));
        }
    }

    fn congestion_state_set(&mut self, tcb: &mut TcpSocketState, new_state: CongestionState) {
        if new_state == CongestionState::Loss {
            self.last_congestion = tcb.now;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tcp::congestion::test_util::*;

    #[test]
    fn test_alpha_grows_with_time_since_congestion() {
        let mut cc = Htcp::default();
        let mut tcb = tcb(100, 100);

        tcb.now = at(0.5);
        cc.increase_window(&mut tcb, 1);
        assert_eq!(cc.alpha(), 1.0);

        tcb.now = at(3.0);
        cc.increase_window(&mut tcb, 1);
        assert!(cc.alpha() > 10.0, "alpha = {}", cc.alpha());
    }

    #[test]
    fn test_beta_follows_rtt_ratio() {
        let mut cc = Htcp::default();
        let mut tcb = tcb(100, 100);
        cc.pkts_acked(&mut tcb, 1, Some(Duration::from_millis(70)));
        cc.pkts_acked(&mut tcb, 1, Some(Duration::from_millis(100)));

        let ssthresh = cc.get_ssthresh(&tcb, tcb.cwnd);
        assert!((cc.beta() - 0.7).abs() < 1e-9);
        assert_eq!(ssthresh, 70 * MSS);
    }

    #[test]
    fn test_beta_is_clamped() {
        let mut cc = Htcp::default();
        let mut tcb = tcb(100, 100);
        cc.pkts_acked(&mut tcb, 1, Some(Duration::from_millis(10)));
        cc.pkts_acked(&mut tcb, 1, Some(Duration::from_millis(100)));
        cc.get_ssthresh(&tcb, tcb.cwnd);
        assert_eq!(cc.beta(), MIN_BETA);
    }
}
