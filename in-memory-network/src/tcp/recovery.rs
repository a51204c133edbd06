//! Loss recovery: how the congestion window evolves while retransmitting after duplicate ACKs

use crate::tcp::TcpSocketState;
use anyhow::bail;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum RecoveryKind {
    /// The window drops to the slow start threshold right away (RFC 6675)
    #[default]
    Classic,
    /// Proportional rate reduction (RFC 6937)
    Prr,
}

impl RecoveryKind {
    pub fn build(&self) -> Box<dyn RecoveryOps> {
        match self {
            RecoveryKind::Classic => Box::new(ClassicRecovery),
            RecoveryKind::Prr => Box::new(PrrRecovery::default()),
        }
    }
}

impl Display for RecoveryKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoveryKind::Classic => f.write_str("classic"),
            RecoveryKind::Prr => f.write_str("prr"),
        }
    }
}

impl FromStr for RecoveryKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "classic" | "tcpclassicrecovery" => Ok(RecoveryKind::Classic),
            "prr" | "tcpprrrecovery" => Ok(RecoveryKind::Prr),
            _ => bail!("unknown recovery algorithm `{s}` (expected `classic` or `prr`)"),
        }
    }
}

pub trait RecoveryOps: Send {
    fn name(&self) -> &'static str;

    /// Called once the slow start threshold has been reduced for a new loss episode
    fn enter_recovery(&mut self, tcb: &mut TcpSocketState, delivered_bytes: u32);

    /// Called for every ACK received during recovery, with `tcb.bytes_in_flight` up to date
    fn do_recovery(&mut self, tcb: &mut TcpSocketState, delivered_bytes: u32);

    fn exit_recovery(&mut self, tcb: &mut TcpSocketState);

    fn update_bytes_sent(&mut self, _bytes_sent: u32) {}
}

pub struct ClassicRecovery;

impl RecoveryOps for ClassicRecovery {
    fn name(&self) -> &'static str {
        "TcpClassicRecovery"
    }

    fn enter_recovery(&mut self, tcb: &mut TcpSocketState, _delivered_bytes: u32) {
        tcb.cwnd = tcb.ssthresh;
    }

    fn do_recovery(&mut self, _tcb: &mut TcpSocketState, _delivered_bytes: u32) {}

    fn exit_recovery(&mut self, tcb: &mut TcpSocketState) {
        tcb.cwnd = tcb.ssthresh;
    }
}

#[derive(Default)]
pub struct PrrRecovery {
    prr_delivered: u64,
    prr_out: u64,
    recover_flight_size: u64,
}

impl PrrRecovery {
    fn update_cwnd(&mut self, tcb: &mut TcpSocketState, delivered_bytes: u32) {
        self.prr_delivered += delivered_bytes as u64;

        let pipe = tcb.bytes_in_flight as u64;
        let ssthresh = tcb.ssthresh as u64;
        let send_count = if pipe > ssthresh {
            // Proportional reduction
            let target = (self.prr_delivered * ssthresh).div_ceil(self.recover_flight_size.max(1));
            target.saturating_sub(self.prr_out)
        } else {
            // Slow start reduction bound
            let limit = self
                .prr_delivered
                .saturating_sub(self.prr_out)
                .max(delivered_bytes as u64)
                + tcb.segment_size as u64;
            (ssthresh - pipe).min(limit)
        };

        tcb.cwnd = (pipe + send_count).min(u32::MAX as u64) as u32;
    }
}

impl RecoveryOps for PrrRecovery {
    fn name(&self) -> &'static str {
        "TcpPrrRecovery"
    }

    fn enter_recovery(&mut self, tcb: &mut TcpSocketState, delivered_bytes: u32) {
        self.prr_out = 0;
        self.prr_delivered = 0;
        self.recover_flight_size = tcb.bytes_in_flight as u64 + delivered_bytes as u64;
        self.update_cwnd(tcb, delivered_bytes);
    }

    fn do_recovery(&mut self, tcb: &mut TcpSocketState, delivered_bytes: u32) {
        self.update_cwnd(tcb, delivered_bytes);
    }

    fn exit_recovery(&mut self, tcb: &mut TcpSocketState) {
        tcb.cwnd = tcb.ssthresh;
    }

    fn update_bytes_sent(&mut self, bytes_sent: u32) {
        self.prr_out += bytes_sent as u64;
    }
}
