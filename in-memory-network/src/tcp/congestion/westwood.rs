use crate::sim::SimTime;
use crate::tcp::TcpSocketState;
use crate::tcp::congestion::{AdditiveIncrease, CongestionOps, ProtocolType, slow_start};
use std::time::Duration;

/// Weight of the previous estimate in the low-pass filter
const FILTER_ALPHA: f64 = 0.9;

/// Westwood: Reno growth, but after a loss the window is set from an estimate of the bandwidth
/// that was actually available
pub struct Westwood {
    protocol_type: ProtocolType,
    /// Estimated bandwidth, in bytes per second
    bandwidth: f64,
    last_sample: f64,
    acked_since_sample: u64,
    last_sample_at: Option<SimTime>,
    avoidance: AdditiveIncrease,
}

impl Westwood {
    pub fn new(protocol_type: ProtocolType) -> Self {
        Self {
            protocol_type,
            bandwidth: 0.0,
            last_sample: 0.0,
            acked_since_sample: 0,
            last_sample_at: None,
            avoidance: AdditiveIncrease::default(),
        }
    }

    pub fn protocol_type(&self) -> ProtocolType {
        self.protocol_type
    }

    /// Bytes per second
    pub fn bandwidth_estimate(&self) -> f64 {
        self.bandwidth
    }

    fn sample_interval_elapsed(&self, elapsed: Duration, tcb: &TcpSocketState) -> bool {
        match self.protocol_type {
            ProtocolType::Westwood => !elapsed.is_zero(),
            ProtocolType::WestwoodPlus => {
                tcb.srtt.or(tcb.last_rtt).is_some_and(|rtt| elapsed >= rtt)
            }
        }
    }

    fn add_bandwidth_sample(&mut self, sample: f64) {
        // Tustin approximation of a low-pass filter
        self.bandwidth = FILTER_ALPHA * self.bandwidth
            + (1.0 - FILTER_ALPHA) * (sample + self.last_sample) / 2.0;
        self.last_sample = sample;
    }
}

impl CongestionOps for Westwood {
    fn name(&self) -> &'static str {
        "TcpWestwood"
    }

    fn increase_window(&mut self, tcb: &mut TcpSocketState, mut segments_acked: u32) {
        if tcb.in_slow_start() {
            segments_acked = slow_start(tcb, segments_acked);
        }

        if !tcb.in_slow_start() && segments_acked > 0 {
            self.avoidance.on_acked(tcb, segments_acked);
        }
    }

    fn get_ssthresh(&mut self, tcb: &TcpSocketState, _bytes_in_flight: u32) -> u32 {
        let min_rtt = tcb.min_rtt.unwrap_or_default().as_secs_f64();
        let estimate = (self.bandwidth * min_rtt) as u32;
        estimate.max(2 * tcb.segment_size)
    }

    fn pkts_acked(&mut self, tcb: &mut TcpSocketState, segments_acked: u32, _rtt: Option<Duration>) {
        self.acked_since_sample += segments_acked as u64 * tcb.segment_size as u64;

        let Some(last_sample_at) = self.last_sample_at else {
            self.last_sample_at = Some(tcb.now);
            return;
        };

        let elapsed = tcb.now.saturating_duration_since(last_sample_at);
        if !self.sample_interval_elapsed(elapsed, tcb) {
            return;
        }

        let sample = self.acked_since_sample as f64 / elapsed.as_secs_f64();
        self.add_bandwidth_sample(sample);
        self.acked_since_sample = 0;
        self.last_sample_at = Some(tcb.now);
    }
}
