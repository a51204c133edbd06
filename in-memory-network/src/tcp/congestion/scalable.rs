use crate::tcp::TcpSocketState;
use crate::tcp::congestion::{AdditiveIncrease, CongestionOps, slow_start};

const AI_FACTOR: u32 = 50;
const MD_FACTOR: f64 = 0.125;

/// Scalable TCP: one segment more every `AI_FACTOR` ACKs, an eighth less on loss
#[derive(Default)]
pub struct Scalable {
    avoidance: AdditiveIncrease,
}

impl CongestionOps for Scalable {
    fn name(&self) -> &'static str {
        "TcpScalable"
    }

    fn increase_window(&mut self, tcb: &mut TcpSocketState, mut segments_acked: u32) {
        if tcb.in_slow_start() {
            segments_acked = slow_start(tcb, segments_acked);
        }

        if !tcb.in_slow_start() && segments_acked > 0 {
            let every = tcb.cwnd_segments().min(AI_FACTOR);
            self.avoidance.increase_every(tcb, segments_acked, every);
        }
    }

    fn get_ssthresh(&mut self, tcb: &TcpSocketState, bytes_in_flight: u32) -> u32 {
        let segments = (bytes_in_flight / tcb.segment_size) as f64;
        ((segments * (1.0 - MD_FACTOR)) as u32).max(2) * tcb.segment_size
    }
}
