use crate::tcp::TcpSocketState;
use crate::tcp::congestion::{CongestionOps, FractionalIncrease, half_of_flight};
use std::time::Duration;

/// RTT of the reference connection whose throughput Hybla tries to match
const REFERENCE_RTT: Duration = Duration::from_millis(25);

/// Scales window growth by the ratio between the connection's RTT and a short reference RTT, so
/// long-delay paths ramp up as fast as short ones
pub struct Hybla {
    rho: f64,
    growth: FractionalIncrease,
}

impl Default for Hybla {
    fn default() -> Self {
        Self {
            rho: 1.0,
            growth: FractionalIncrease::default(),
        }
    }
}

impl Hybla {
    pub fn rho(&self) -> f64 {
        self.rho
    }
}

impl CongestionOps for Hybla {
    fn name(&self) -> &'static str {
        "TcpHybla"
    }

    fn increase_window(&mut self, tcb: &mut TcpSocketState, segments_acked: u32) {
        for _ in 0..segments_acked {
            if tcb.in_slow_start() {
                let increment = 2f64.powf(self.rho) - 1.0;
                let before = tcb.cwnd;
                self.growth.add(tcb, increment);
                tcb.cwnd = tcb.cwnd.min(tcb.ssthresh).max(before);
            } else {
                let window = tcb.cwnd_segments().max(1) as f64;
                self.growth.add(tcb, self.rho * self.rho / window);
            }
        }
    }

    fn get_ssthresh(&mut self, tcb: &TcpSocketState, bytes_in_flight: u32) -> u32 {
        half_of_flight(tcb, bytes_in_flight)
    }

    fn pkts_acked(&mut self, tcb: &mut TcpSocketState, _segments_acked: u32, _rtt: Option<Duration>) {
        if let Some(min_rtt) = tcb.min_rtt {
            self.rho = (min_rtt.as_secs_f64() / REFERENCE_RTT.as_secs_f64()).max(1.0);
        }
    }
}
