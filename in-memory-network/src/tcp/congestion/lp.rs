use crate::sim::SimTime;
use crate::tcp::TcpSocketState;
use crate::tcp::congestion::{AdditiveIncrease, CongestionOps, half_of_flight, slow_start};
use std::time::Duration;

/// Share of the delay range above the minimum that signals early congestion
const DELAY_THRESHOLD: f64 = 0.15;
/// The inference window, in smoothed RTTs
const INFERENCE_RTTS: u32 = 3;

/// TCP Low Priority: backs off as soon as the smoothed delay rises, before any loss, so it only
/// uses capacity that other flows leave unused
#[derive(Default)]
pub struct Lp {
    min_delay: Option<Duration>,
    max_delay: Option<Duration>,
    smoothed_delay: Option<Duration>,
    last_reduction: Option<SimTime>,
    within_inference: bool,
    avoidance: AdditiveIncrease,
}

impl Lp {
    pub fn within_inference(&self) -> bool {
        self.within_inference
    }

    fn congestion_detected(&self) -> bool {
        let (Some(min), Some(max), Some(smoothed)) =
            (self.min_delay, self.max_delay, self.smoothed_delay)
        else {
            return false;
        };

        let threshold = min.as_secs_f64() + DELAY_THRESHOLD * (max - min).as_secs_f64();
        smoothed.as_secs_f64() > threshold
    }
}

impl CongestionOps for Lp {
    fn name(&self) -> &'static str {
        "TcpLp"
    }

    fn increase_window(&mut self, tcb: &mut TcpSocketState, mut segments_acked: u32) {
        if self.within_inference {
            return;
        }

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

    fn pkts_acked(&mut self, tcb: &mut TcpSocketState, _segments_acked: u32, rtt: Option<Duration>) {
        let Some(rtt) = rtt else {
            return;
        };

        self.min_delay = Some(self.min_delay.map_or(rtt, |m| m.min(rtt)));
        self.max_delay = Some(self.max_delay.map_or(rtt, |m| m.max(rtt)));
        self.smoothed_delay = Some(match self.smoothed_delay {
            Some(smoothed) => smoothed * 7 / 8 + rtt / 8,
            None => rtt,
        });

        let inference = tcb.srtt.unwrap_or(rtt) * INFERENCE_RTTS;
        if let Some(last) = self.last_reduction {
            if tcb.now > last + inference {
                self.within_inference = false;
            }
        }

        if !self.congestion_detected() {
            return;
        }

        if self.within_inference {
            // A second indication inside the inference window
            tcb.cwnd = tcb.segment_size;
        } else {
            tcb.cwnd = (tcb.cwnd / 2).max(tcb.segment_size);
        }

        tcb.ssthresh = tcb.ssthresh.min(tcb.cwnd.max(2 * tcb.segment_size));
        self.last_reduction = Some(tcb.now);
        self.within_inference = true;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tcp::congestion::test_util::*;

    #[test]
    fn test_grows_like_reno_without_delay_increase() {
        let mut cc = Lp::default();
        let mut tcb = tcb(10, 10);
        ack_one_window(&mut cc, &mut tcb, Duration::from_millis(100));
        assert_eq!(tcb.cwnd, 11 * MSS);
        assert!(!cc.within_inference());
    }

    #[test]
    fn test_rising_delay_halves_then_collapses() {
        let mut cc = Lp::default();
        let mut tcb = tcb(40, 40);
        tcb.srtt = Some(Duration::from_millis(100));
        ack_one(&mut cc, &mut tcb, Duration::from_millis(100));
        ack_one(&mut cc, &mut tcb, Duration::from_millis(100));
        assert_eq!(tcb.cwnd, 40 * MSS);

        // The smoothed delay needs a couple of samples to climb above 15% of the observed range
        ack_one(&mut cc, &mut tcb, Duration::from_millis(400));
        assert!(!cc.within_inference());
        assert_eq!(tcb.cwnd, 40 * MSS);

        ack_one(&mut cc, &mut tcb, Duration::from_millis(400));
        assert!(cc.within_inference());
        assert_eq!(tcb.cwnd, 20 * MSS);

        ack_one(&mut cc, &mut tcb, Duration::from_millis(400));
        assert_eq!(tcb.cwnd, MSS);
    }

    #[test]
    fn test_inference_window_expires() {
        let mut cc = Lp::default();
        let mut tcb = tcb(40, 40);
        tcb.srtt = Some(Duration::from_millis(100));
        ack_one(&mut cc, &mut tcb, Duration::from_millis(100));
        ack_one(&mut cc, &mut tcb, Duration::from_millis(400));
        ack_one(&mut cc, &mut tcb, Duration::from_millis(400));
        assert!(cc.within_inference());

        // Back to the minimum delay, long after the last reduction
        tcb.now = at(10.0);
        cc.smoothed_delay = Some(Duration::from_millis(100));
        cc.pkts_acked(&mut tcb, 1, Some(Duration::from_millis(100)));
        assert!(!cc.within_inference());
    }
}
