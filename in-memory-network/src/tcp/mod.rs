//! A byte-counting TCP implementation with pluggable congestion control and loss recovery

pub mod congestion;
pub mod recovery;
mod rx_buffer;
pub mod rtt;
pub mod socket;
mod tx_buffer;

use crate::sim::SimTime;
use anyhow::bail;
use congestion::CongestionControl;
use recovery::RecoveryKind;
use std::fmt::{Display, Formatter};
use std::time::Duration;

/// Settings every TCP socket reads when it is created
///
/// The value is handed to the network once, at construction, and never changes afterwards.
#[derive(Clone, Debug)]
pub struct TcpConfig {
    pub congestion_control: CongestionControl,
    pub recovery: RecoveryKind,
    /// Maximum payload per segment
    pub segment_size: u32,
    pub send_buffer_size: u32,
    pub receive_buffer_size: u32,
    pub initial_cwnd_segments: u32,
    /// Whether sockets offer selective acknowledgements on their SYN
    pub sack: bool,
    /// In-order segments received before an ACK is sent
    pub delayed_ack_count: u32,
    pub delayed_ack_timeout: Duration,
    pub dup_ack_threshold: u32,
    pub initial_rto: Duration,
    pub min_rto: Duration,
    pub max_rto: Duration,
    pub clock_granularity: Duration,
    pub syn_retries: u32,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            congestion_control: CongestionControl::default(),
            recovery: RecoveryKind::Classic,
            segment_size: 536,
            send_buffer_size: 131_072,
            receive_buffer_size: 131_072,
            initial_cwnd_segments: 10,
            sack: true,
            delayed_ack_count: 2,
            delayed_ack_timeout: Duration::from_millis(200),
            dup_ack_threshold: 3,
            initial_rto: Duration::from_secs(1),
            min_rto: Duration::from_secs(1),
            max_rto: Duration::from_secs(60),
            clock_granularity: Duration::from_millis(1),
            syn_retries: 6,
        }
    }
}

impl TcpConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.segment_size == 0 {
            bail!("the TCP segment size must be positive");
        }
        if self.send_buffer_size < self.segment_size {
            bail!(
                "the TCP send buffer ({} bytes) cannot hold a single segment ({} bytes)",
                self.send_buffer_size,
                self.segment_size
            );
        }
        if self.receive_buffer_size < self.segment_size {
            bail!(
                "the TCP receive buffer ({} bytes) cannot hold a single segment ({} bytes)",
                self.receive_buffer_size,
                self.segment_size
            );
        }
        if self.delayed_ack_count == 0 {
            bail!("the delayed ACK count must be at least 1");
        }
        if self.dup_ack_threshold == 0 {
            bail!("the duplicate ACK threshold must be at least 1");
        }

        Ok(())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CongestionState {
    /// Normal operation
    Open,
    /// Duplicate ACKs have been seen, but not enough to declare a loss
    Disorder,
    /// Fast recovery after a loss detected through duplicate ACKs
    Recovery,
    /// Recovering from a retransmission timeout
    Loss,
}

impl Display for CongestionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CongestionState::Open => "open",
            CongestionState::Disorder => "disorder",
            CongestionState::Recovery => "recovery",
            CongestionState::Loss => "loss",
        };
        f.write_str(name)
    }
}

/// The part of a socket's state that congestion control and recovery algorithms may inspect and
/// modify
#[derive(Clone, Debug)]
pub struct TcpSocketState {
    pub cwnd: u32,
    pub ssthresh: u32,
    pub segment_size: u32,
    pub initial_cwnd: u32,
    pub congestion_state: CongestionState,
    pub min_rtt: Option<Duration>,
    pub last_rtt: Option<Duration>,
    pub srtt: Option<Duration>,
    pub bytes_in_flight: u32,
    /// First byte that has not been acknowledged yet
    pub last_acked_seq: u64,
    /// Next byte that would be sent as new data
    pub next_tx_sequence: u64,
    pub now: SimTime,
}

impl TcpSocketState {
    pub fn new(segment_size: u32, initial_cwnd_segments: u32) -> Self {
        let initial_cwnd = segment_size * initial_cwnd_segments;
        Self {
            cwnd: initial_cwnd,
            ssthresh: u32::MAX,
            segment_size,
            initial_cwnd,
            congestion_state: CongestionState::Open,
            min_rtt: None,
            last_rtt: None,
            srtt: None,
            bytes_in_flight: 0,
            last_acked_seq: 0,
            next_tx_sequence: 0,
            now: SimTime::ZERO,
        }
    }

    pub fn in_slow_start(&self) -> bool {
        self.cwnd < self.ssthresh
    }

    pub fn cwnd_segments(&self) -> u32 {
        self.cwnd / self.segment_size
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_config_validation() {
        assert!(TcpConfig::default().validate().is_ok());

        let config = TcpConfig {
            segment_size: 0,
            ..TcpConfig::default()
        };
        assert!(config.validate().is_err());

        let config = TcpConfig {
            segment_size: 4000,
            send_buffer_size: 1000,
            ..TcpConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_initial_socket_state() {
        let tcb = TcpSocketState::new(400, 10);
        assert_eq!(tcb.cwnd, 4000);
        assert_eq!(tcb.cwnd_segments(), 10);
        assert!(tcb.in_slow_start());
    }
}
