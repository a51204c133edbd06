//! Congestion control algorithms
//!
//! Every algorithm is registered under a type id in the `transport::` namespace (e.g.
//! `transport::TcpNewReno`). Sockets build their own instance from the [`CongestionControl`]
//! value in the TCP configuration.

mod bic;
mod high_speed;
mod htcp;
mod hybla;
mod illinois;
mod ledbat;
mod lp;
mod new_reno;
mod scalable;
mod vegas;
mod veno;
mod westwood;
mod yeah;

pub use bic::Bic;
pub use high_speed::HighSpeed;
pub use htcp::Htcp;
pub use hybla::Hybla;
pub use illinois::Illinois;
pub use ledbat::Ledbat;
pub use lp::Lp;
pub use new_reno::NewReno;
pub use scalable::Scalable;
pub use vegas::Vegas;
pub use veno::Veno;
pub use westwood::Westwood;
pub use yeah::Yeah;

use crate::tcp::{CongestionState, TcpSocketState};
use std::fmt::{Display, Formatter};
use std::time::Duration;

pub const TYPE_ID_NAMESPACE: &str = "transport::";

pub trait CongestionOps: Send {
    fn name(&self) -> &'static str;

    /// Grows the window after `segments_acked` segments were newly acknowledged
    fn increase_window(&mut self, tcb: &mut TcpSocketState, segments_acked: u32);

    /// The slow start threshold to use after a loss
    fn get_ssthresh(&mut self, tcb: &TcpSocketState, bytes_in_flight: u32) -> u32;

    /// Called on every ACK that acknowledges new data, before the window is increased
    fn pkts_acked(
        &mut self,
        _tcb: &mut TcpSocketState,
        _segments_acked: u32,
        _rtt: Option<Duration>,
    ) {
    }

    fn congestion_state_set(&mut self, _tcb: &mut TcpSocketState, _new_state: CongestionState) {}
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CongestionAlgorithm {
    NewReno,
    Hybla,
    HighSpeed,
    Htcp,
    Vegas,
    Scalable,
    Veno,
    Bic,
    Yeah,
    Illinois,
    Westwood,
    Ledbat,
    Lp,
}

impl CongestionAlgorithm {
    pub const ALL: [CongestionAlgorithm; 13] = [
        CongestionAlgorithm::NewReno,
        CongestionAlgorithm::Hybla,
        CongestionAlgorithm::HighSpeed,
        CongestionAlgorithm::Htcp,
        CongestionAlgorithm::Vegas,
        CongestionAlgorithm::Scalable,
        CongestionAlgorithm::Veno,
        CongestionAlgorithm::Bic,
        CongestionAlgorithm::Yeah,
        CongestionAlgorithm::Illinois,
        CongestionAlgorithm::Westwood,
        CongestionAlgorithm::Ledbat,
        CongestionAlgorithm::Lp,
    ];

    /// The name without namespace, e.g. `TcpNewReno`
    pub fn name(&self) -> &'static str {
        match self {
            CongestionAlgorithm::NewReno => "TcpNewReno",
            CongestionAlgorithm::Hybla => "TcpHybla",
            CongestionAlgorithm::HighSpeed => "TcpHighSpeed",
            CongestionAlgorithm::Htcp => "TcpHtcp",
            CongestionAlgorithm::Vegas => "TcpVegas",
            CongestionAlgorithm::Scalable => "TcpScalable",
            CongestionAlgorithm::Veno => "TcpVeno",
            CongestionAlgorithm::Bic => "TcpBic",
            CongestionAlgorithm::Yeah => "TcpYeah",
            CongestionAlgorithm::Illinois => "TcpIllinois",
            CongestionAlgorithm::Westwood => "TcpWestwood",
            CongestionAlgorithm::Ledbat => "TcpLedbat",
            CongestionAlgorithm::Lp => "TcpLp",
        }
    }

    /// The registered type id, e.g. `transport::TcpNewReno`
    pub fn type_id(&self) -> String {
        format!("{TYPE_ID_NAMESPACE}{}", self.name())
    }

    pub fn from_type_id(type_id: &str) -> Option<CongestionAlgorithm> {
        let name = type_id.strip_prefix(TYPE_ID_NAMESPACE)?;
        Self::ALL.into_iter().find(|a| a.name() == name)
    }
}

impl Display for CongestionAlgorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Bandwidth estimation flavour of Westwood
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ProtocolType {
    /// A bandwidth sample on every ACK
    Westwood,
    /// One bandwidth sample per RTT
    WestwoodPlus,
}

/// A registered algorithm together with its optional sub-mode
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CongestionControl {
    pub algorithm: CongestionAlgorithm,
    pub protocol_type: Option<ProtocolType>,
}

impl Default for CongestionControl {
    fn default() -> Self {
        Self {
            algorithm: CongestionAlgorithm::NewReno,
            protocol_type: None,
        }
    }
}

impl CongestionControl {
    pub fn new(algorithm: CongestionAlgorithm) -> Self {
        Self {
            algorithm,
            protocol_type: None,
        }
    }

    pub fn build(&self) -> Box<dyn CongestionOps> {
        match self.algorithm {
            CongestionAlgorithm::NewReno => Box::new(NewReno::default()),
            CongestionAlgorithm::Hybla => Box::new(Hybla::default()),
            CongestionAlgorithm::HighSpeed => Box::new(HighSpeed::default()),
            CongestionAlgorithm::Htcp => Box::new(Htcp::default()),
            CongestionAlgorithm::Vegas => Box::new(Vegas::default()),
            CongestionAlgorithm::Scalable => Box::new(Scalable::default()),
            CongestionAlgorithm::Veno => Box::new(Veno::default()),
            CongestionAlgorithm::Bic => Box::new(Bic::default()),
            CongestionAlgorithm::Yeah => Box::new(Yeah::default()),
            CongestionAlgorithm::Illinois => Box::new(Illinois::default()),
            CongestionAlgorithm::Westwood => Box::new(Westwood::new(
                self.protocol_type.unwrap_or(ProtocolType::Westwood),
            )),
            CongestionAlgorithm::Ledbat => Box::new(Ledbat::default()),
            CongestionAlgorithm::Lp => Box::new(Lp::default()),
        }
    }
}

impl Display for CongestionControl {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.protocol_type {
            Some(protocol_type) => write!(f, "{} ({protocol_type:?})", self.algorithm),
            None => write!(f, "{}", self.algorithm),
        }
    }
}

/// Standard slow start with appropriate byte counting, capped at the slow start threshold
///
/// Returns the number of acknowledged segments that were not used to grow the window.
pub(crate) fn slow_start(tcb: &mut TcpSocketState, segments_acked: u32) -> u32 {
    if segments_acked == 0 {
        return 0;
    }

    let before = tcb.cwnd;
    let grown = before.saturating_add(segments_acked.saturating_mul(tcb.segment_size));
    tcb.cwnd = grown.min(tcb.ssthresh).max(before);
    let used = (tcb.cwnd - before) / tcb.segment_size;
    segments_acked.saturating_sub(used)
}

/// Additive increase: one segment per window's worth of acknowledged segments
#[derive(Clone, Debug, Default)]
pub(crate) struct AdditiveIncrease {
    acked_count: u32,
}

impl AdditiveIncrease {
    pub fn on_acked(&mut self, tcb: &mut TcpSocketState, segments_acked: u32) {
        self.increase_every(tcb, segments_acked, tcb.cwnd_segments().max(1));
    }

    /// Grows the window by one segment every `every` acknowledged segments
    pub fn increase_every(&mut self, tcb: &mut TcpSocketState, segments_acked: u32, every: u32) {
        let every = every.max(1);
        self.acked_count += segments_acked;
        if self.acked_count >= every {
            let delta = self.acked_count / every;
            self.acked_count -= delta * every;
            tcb.cwnd = tcb.cwnd.saturating_add(delta * tcb.segment_size);
        }
    }
}

/// Fractional window growth, accumulated in segments until a whole segment can be added
#[derive(Clone, Debug, Default)]
pub(crate) struct FractionalIncrease {
    pending_segments: f64,
}

impl FractionalIncrease {
    pub fn add(&mut self, tcb: &mut TcpSocketState, segments: f64) {
        // Tolerate rounding, so ten increments of 0.1 add up to a whole segment
        self.pending_segments += segments;
        if self.pending_segments + 1e-9 >= 1.0 {
            let whole = (self.pending_segments + 1e-9).floor();
            self.pending_segments = (self.pending_segments - whole).max(0.0);
            tcb.cwnd = tcb
                .cwnd
                .saturating_add((whole as u32).saturating_mul(tcb.segment_size));
        }
    }
}

/// The NewReno reduction: half of what is in flight, at least two segments
pub(crate) fn half_of_flight(tcb: &TcpSocketState, bytes_in_flight: u32) -> u32 {
    (bytes_in_flight / 2).max(2 * tcb.segment_size)
}

/// Tracks the RTT samples of one round trip, ending when the first byte sent in the next round
/// gets acknowledged
#[derive(Clone, Debug, Default)]
pub(crate) struct RoundTracker {
    end_seq: u64,
    min_rtt: Option<Duration>,
    sum_rtt: Duration,
    samples: u32,
}

#[derive(Clone, Debug)]
pub(crate) struct Round {
    pub min_rtt: Duration,
    pub avg_rtt: Duration,
    pub samples: u32,
}

impl RoundTracker {
    pub fn add_sample(&mut self, rtt: Duration) {
        self.min_rtt = Some(self.min_rtt.map_or(rtt, |m| m.min(rtt)));
        self.sum_rtt += rtt;
        self.samples += 1;
    }

    /// Returns the finished round, if the ACKs have moved past it
    pub fn poll_round_end(&mut self, tcb: &TcpSocketState) -> Option<Round> {
        if tcb.last_acked_seq < self.end_seq {
            return None;
        }

        let round = self.min_rtt.map(|min_rtt| Round {
            min_rtt,
            avg_rtt: self.sum_rtt / self.samples.max(1),
            samples: self.samples,
        });

        self.end_seq = tcb.next_tx_sequence;
        self.min_rtt = None;
        self.sum_rtt = Duration::ZERO;
        self.samples = 0;
        round
    }

    pub fn reset(&mut self, tcb: &TcpSocketState) {
        self.end_seq = tcb.next_tx_sequence;
        self.min_rtt = None;
        self.sum_rtt = Duration::ZERO;
        self.samples = 0;
    }
}
