//! A TCP endpoint, driven entirely by its caller
//!
//! The socket never touches the network or the clock on its own: every method receives the
//! current time and pushes what should happen next (segments to transmit, timers to arm,
//! notifications for the application) to an output vector.

use crate::packet::{TcpFlags, TcpHeader};
use crate::sim::SimTime;
use crate::tcp::congestion::CongestionOps;
use crate::tcp::recovery::RecoveryOps;
use crate::tcp::rtt::RttEstimator;
use crate::tcp::rx_buffer::RxBuffer;
use crate::tcp::tx_buffer::{Pending, TxScoreboard};
use crate::tcp::{CongestionState, TcpConfig, TcpSocketState};
use serde::Serialize;
use std::fmt::{Display, Formatter};
use std::net::SocketAddrV4;
use std::time::Duration;

const MAX_SACK_BLOCKS: usize = 3;
const INITIAL_SEQUENCE: u64 = 0;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TcpState {
    Closed,
    SynSent,
    SynReceived,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    Closing,
    LastAck,
}

impl Display for TcpState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TcpState::Closed => "CLOSED",
            TcpState::SynSent => "SYN_SENT",
            TcpState::SynReceived => "SYN_RCVD",
            TcpState::Established => "ESTABLISHED",
            TcpState::FinWait1 => "FIN_WAIT_1",
            TcpState::FinWait2 => "FIN_WAIT_2",
            TcpState::CloseWait => "CLOSE_WAIT",
            TcpState::Closing => "CLOSING",
            TcpState::LastAck => "LAST_ACK",
        };
        f.write_str(name)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TimerKind {
    Retransmit,
    DelayedAck,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SocketNotification {
    Connected,
    /// The handshake was given up after too many retransmitted SYNs
    ConnectionFailed,
    /// Room became available in the send buffer
    SendSpace(u32),
    /// In-order bytes were delivered to the application
    Received(u64),
    /// The peer will not send anything else
    PeerClosed,
    Closed,
}

#[derive(Clone, Debug)]
pub struct OutgoingSegment {
    pub header: TcpHeader,
    pub payload_len: u32,
    pub retransmission: bool,
}

#[derive(Clone, Debug)]
pub enum TcpOutput {
    Segment(OutgoingSegment),
    /// Arm a timer; when it fires, pass `generation` back to [`TcpSocket::on_timer`]
    Timer {
        kind: TimerKind,
        at: SimTime,
        generation: u64,
    },
    Notify(SocketNotification),
}

#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TcpSocketStats {
    pub segments_sent: u64,
    pub data_bytes_sent: u64,
    pub retransmitted_segments: u64,
    pub retransmitted_bytes: u64,
    pub timeouts: u64,
    pub fast_recoveries: u64,
    pub bytes_acked: u64,
    pub bytes_received: u64,
}

pub struct TcpSocket {
    config: TcpConfig,
    local: SocketAddrV4,
    remote: SocketAddrV4,
    state: TcpState,
    tcb: TcpSocketState,
    cc: Box<dyn CongestionOps>,
    recovery: Box<dyn RecoveryOps>,
    rtt: RttEstimator,

    // Sender
    scoreboard: TxScoreboard,
    snd_una: u64,
    snd_nxt: u64,
    unsent: u64,
    written: u64,
    peer_window: u32,
    recover: u64,
    dup_acks: u32,
    acked_remainder: u32,
    close_requested: bool,
    fin_sent: bool,
    sack_enabled: bool,
    syn_sent_at: Option<SimTime>,
    syn_retransmitted: bool,
    syn_attempts: u32,

    // Receiver
    rx: Option<RxBuffer>,
    peer_fin_seq: Option<u64>,
    peer_fin_received: bool,
    unacked_segments: u32,

    // Timers
    retransmit_generation: u64,
    retransmit_armed: bool,
    delayed_ack_generation: u64,
    delayed_ack_armed: bool,

    stats: TcpSocketStats,
}

impl TcpSocket {
    fn new(config: &TcpConfig, local: SocketAddrV4, remote: SocketAddrV4, state: TcpState) -> Self {
        Self {
            config: config.clone(),
            local,
            remote,
            state,
            tcb: TcpSocketState::new(config.segment_size, config.initial_cwnd_segments),
            cc: config.congestion_control.build(),
            recovery: config.recovery.build(),
            rtt: RttEstimator::new(
                config.initial_rto,
                config.min_rto,
                config.max_rto,
                config.clock_granularity,
            ),
            scoreboard: TxScoreboard::default(),
            snd_una: INITIAL_SEQUENCE,
            snd_nxt: INITIAL_SEQUENCE + 1,
            unsent: 0,
            written: 0,
            peer_window: config.receive_buffer_size,
            recover: INITIAL_SEQUENCE,
            dup_acks: 0,
            acked_remainder: 0,
            close_requested: false,
            fin_sent: false,
            sack_enabled: false,
            syn_sent_at: None,
            syn_retransmitted: false,
            syn_attempts: 0,
            rx: None,
            peer_fin_seq: None,
            peer_fin_received: false,
            unacked_segments: 0,
            retransmit_generation: 0,
            retransmit_armed: false,
            delayed_ack_generation: 0,
            delayed_ack_armed: false,
            stats: TcpSocketStats::default(),
        }
    }

    /// Starts an active open towards `remote`
    pub fn connect(
        config: &TcpConfig,
        local: SocketAddrV4,
        remote: SocketAddrV4,
        now: SimTime,
        out: &mut Vec<TcpOutput>,
    ) -> Self {
        let mut socket = Self::new(config, local, remote, TcpState::SynSent);
        socket.tcb.now = now;
        socket.send_syn(now, out);
        socket
    }

    /// Answers a SYN received by a listener
    pub fn accept(
        config: &TcpConfig,
        local: SocketAddrV4,
        remote: SocketAddrV4,
        syn: &TcpHeader,
        now: SimTime,
        out: &mut Vec<TcpOutput>,
    ) -> Self {
        let mut socket = Self::new(config, local, remote, TcpState::SynReceived);
        socket.tcb.now = now;
        socket.sack_enabled = config.sack && syn.sack_permitted;
        socket.peer_window = syn.window;
        socket.rx = Some(RxBuffer::new(syn.sequence + 1, config.receive_buffer_size));
        socket.send_syn(now, out);
        socket
    }

    pub fn state(&self) -> TcpState {
        self.state
    }

    pub fn local(&self) -> SocketAddrV4 {
        self.local
    }

    pub fn remote(&self) -> SocketAddrV4 {
        self.remote
    }

    pub fn tcb(&self) -> &TcpSocketState {
        &self.tcb
    }

    pub fn stats(&self) -> &TcpSocketStats {
        &self.stats
    }

    pub fn congestion_control_name(&self) -> &'static str {
        self.cc.name()
    }

    pub fn recovery_name(&self) -> &'static str {
        self.recovery.name()
    }

    pub fn sack_enabled(&self) -> bool {
        self.sack_enabled
    }

    pub fn is_closed(&self) -> bool {
        self.state == TcpState::Closed
    }

    /// Bytes accepted from the application so far
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Free room in the send buffer
    pub fn tx_available(&self) -> u32 {
        let buffered = self.snd_nxt.saturating_sub(self.snd_una) + self.unsent;
        (self.config.send_buffer_size as u64).saturating_sub(buffered) as u32
    }

    /// Queues up to `bytes` for transmission, returning how many were accepted
    pub fn send(&mut self, bytes: u32, now: SimTime, out: &mut Vec<TcpOutput>) -> u32 {
        let writable = matches!(
            self.state,
            TcpState::SynSent | TcpState::SynReceived | TcpState::Established | TcpState::CloseWait
        );
        if self.close_requested || !writable {
            return 0;
        }

        let accepted = bytes.min(self.tx_available());
        self.unsent += accepted as u64;
        self.written += accepted as u64;
        self.tcb.now = now;
        self.send_pending(now, out);
        accepted
    }

    /// Sends a FIN once everything written so far has been transmitted
    pub fn close(&mut self, now: SimTime, out: &mut Vec<TcpOutput>) {
        self.tcb.now = now;
        match self.state {
            TcpState::SynSent => self.enter_closed(out),
            TcpState::SynReceived | TcpState::Established | TcpState::CloseWait => {
                self.close_requested = true;
                self.send_pending(now, out);
            }
            _ => {}
        }
    }

    pub fn receive(
        &mut self,
        header: &TcpHeader,
        payload_len: u32,
        now: SimTime,
        out: &mut Vec<TcpOutput>,
    ) {
        self.tcb.now = now;

        if header.flags.rst {
            if !self.is_closed() {
                self.enter_closed(out);
            }
            return;
        }

        match self.state {
            TcpState::Closed => {
                // What is left of TIME_WAIT: the peer did not get our last ACK
                if self.peer_fin_received && header.flags.fin {
                    self.send_ack(out);
                }
                return;
            }
            TcpState::SynSent => {
                if header.flags.syn && header.flags.ack && header.ack == INITIAL_SEQUENCE + 1 {
                    self.complete_active_open(header, now, out);
                }
                return;
            }
            TcpState::SynReceived => {
                if header.flags.syn && !header.flags.ack {
                    // The SYN-ACK got lost
                    self.send_syn(now, out);
                    return;
                }

                if !header.flags.ack || header.ack < INITIAL_SEQUENCE + 1 {
                    return;
                }

                self.snd_una = INITIAL_SEQUENCE + 1;
                self.peer_window = header.window;
                self.cancel_retransmit();
                self.take_syn_rtt_sample(now);
                self.state = TcpState::Established;
                out.push(TcpOutput::Notify(SocketNotification::Connected));
            }
            _ => {}
        }

        if header.flags.syn {
            // A retransmitted SYN-ACK, because our ACK got lost
            self.send_ack(out);
            return;
        }

        if header.flags.ack {
            self.process_ack(header, payload_len, now, out);
        }

        self.process_payload(header, payload_len, now, out);
        self.send_pending(now, out);
    }

    pub fn on_timer(
        &mut self,
        kind: TimerKind,
        generation: u64,
        now: SimTime,
        out: &mut Vec<TcpOutput>,
    ) {
        self.tcb.now = now;
        match kind {
            TimerKind::DelayedAck => {
                if generation != self.delayed_ack_generation || !self.delayed_ack_armed {
                    return;
                }

                self.delayed_ack_armed = false;
                if self.unacked_segments > 0 {
                    self.send_ack(out);
                }
            }
            TimerKind::Retransmit => {
                if generation != self.retransmit_generation || !self.retransmit_armed {
                    return;
                }

                self.retransmit_armed = false;
                self.on_retransmit_timeout(now, out);
            }
        }
    }

    fn complete_active_open(&mut self, header: &TcpHeader, now: SimTime, out: &mut Vec<TcpOutput>) {
        self.sack_enabled = self.config.sack && header.sack_permitted;
        self.rx = Some(RxBuffer::new(
            header.sequence + 1,
            self.config.receive_buffer_size,
        ));
        self.peer_window = header.window;
        self.snd_una = INITIAL_SEQUENCE + 1;
        self.cancel_retransmit();
        self.take_syn_rtt_sample(now);
        self.state = TcpState::Established;
        self.send_ack(out);
        out.push(TcpOutput::Notify(SocketNotification::Connected));
        self.send_pending(now, out);
    }

    fn take_syn_rtt_sample(&mut self, now: SimTime) {
        if self.syn_retransmitted {
            return;
        }

        if let Some(sent_at) = self.syn_sent_at {
            self.add_rtt_sample(now.saturating_duration_since(sent_at));
        }
        self.rtt.reset_backoff();
    }

    fn add_rtt_sample(&mut self, sample: Duration) {
        self.rtt.add_sample(sample);
        self.tcb.last_rtt = Some(sample);
        self.tcb.min_rtt = Some(self.tcb.min_rtt.map_or(sample, |m| m.min(sample)));
        self.tcb.srtt = self.rtt.srtt();
    }

    fn process_ack(
        &mut self,
        header: &TcpHeader,
        payload_len: u32,
        now: SimTime,
        out: &mut Vec<TcpOutput>,
    ) {
        let ack = header.ack;
        if ack > self.snd_nxt {
            // Acknowledges something that was never sent
            return;
        }

        self.peer_window = header.window;
        let newly_sacked = if self.sack_enabled && !header.sack_blocks.is_empty() {
            self.scoreboard.apply_sack(&header.sack_blocks)
        } else {
            0
        };

        if ack > self.snd_una {
            self.on_new_ack(ack, newly_sacked, now, out);
        } else if ack == self.snd_una
            && payload_len == 0
            && !header.flags.fin
            && !self.scoreboard.is_empty()
        {
            self.on_dup_ack(newly_sacked, now, out);
        }
    }

    fn on_new_ack(&mut self, ack: u64, newly_sacked: u64, now: SimTime, out: &mut Vec<TcpOutput>) {
        let summary = self.scoreboard.ack_up_to(ack);
        self.snd_una = ack;

        let mut rtt_sample = None;
        if let Some(sent_at) = summary.rtt_sample_sent_at {
            let sample = now.saturating_duration_since(sent_at);
            self.add_rtt_sample(sample);
            rtt_sample = Some(sample);
        }
        self.rtt.reset_backoff();
        self.stats.bytes_acked += summary.bytes;

        let mss = self.config.segment_size as u64;
        let total = summary.bytes + self.acked_remainder as u64;
        let segments_acked = (total / mss) as u32;
        self.acked_remainder = (total % mss) as u32;
        self.dup_acks = 0;

        if self.sack_enabled {
            self.scoreboard.mark_lost_by_sack(self.config.dup_ack_threshold);
        } else {
            self.scoreboard.clear_sacks();
        }

        self.sync_tcb();
        self.cc.pkts_acked(&mut self.tcb, segments_acked, rtt_sample);

        match self.tcb.congestion_state {
            CongestionState::Recovery => {
                if ack >= self.recover {
                    self.recovery.exit_recovery(&mut self.tcb);
                    self.set_congestion_state(CongestionState::Open);
                } else {
                    // Partial ACK: the next hole is lost as well
                    self.scoreboard.mark_head_lost();
                    self.sync_tcb();
                    let delivered = (summary.bytes + newly_sacked).min(u32::MAX as u64) as u32;
                    self.recovery.do_recovery(&mut self.tcb, delivered);
                    self.retransmit_first_lost(now, out);
                }
            }
            CongestionState::Loss => {
                if ack >= self.recover {
                    self.set_congestion_state(CongestionState::Open);
                }
                self.cc.increase_window(&mut self.tcb, segments_acked);
            }
            CongestionState::Open | CongestionState::Disorder => {
                if self.tcb.congestion_state == CongestionState::Disorder {
                    self.set_congestion_state(CongestionState::Open);
                }
                self.cc.increase_window(&mut self.tcb, segments_acked);
            }
        }

        if summary.fin_acked {
            self.on_fin_acked(out);
        }

        if self.scoreboard.is_empty() {
            self.cancel_retransmit();
        } else {
            self.arm_retransmit(now, out);
        }

        let writable = matches!(self.state, TcpState::Established | TcpState::CloseWait);
        let available = self.tx_available();
        if summary.bytes > 0 && writable && !self.close_requested && available > 0 {
            out.push(TcpOutput::Notify(SocketNotification::SendSpace(available)));
        }
    }

    fn on_dup_ack(&mut self, newly_sacked: u64, now: SimTime, out: &mut Vec<TcpOutput>) {
        self.dup_acks += 1;
        let delivered = if self.sack_enabled {
            self.scoreboard.mark_lost_by_sack(self.config.dup_ack_threshold);
            newly_sacked
        } else {
            self.scoreboard.reno_sack()
        };
        let delivered = delivered.min(u32::MAX as u64) as u32;
        self.sync_tcb();

        match self.tcb.congestion_state {
            CongestionState::Open => self.set_congestion_state(CongestionState::Disorder),
            CongestionState::Recovery => {
                self.recovery.do_recovery(&mut self.tcb, delivered);
                return;
            }
            CongestionState::Disorder | CongestionState::Loss => {}
        }

        let head_lost = self.sack_enabled && self.scoreboard.is_lost(self.snd_una);
        let loss_detected = self.dup_acks >= self.config.dup_ack_threshold || head_lost;
        if self.tcb.congestion_state == CongestionState::Disorder
            && loss_detected
            && self.snd_una > self.recover
        {
            self.enter_fast_recovery(delivered, now, out);
        }
    }

    fn enter_fast_recovery(&mut self, delivered: u32, now: SimTime, out: &mut Vec<TcpOutput>) {
        self.recover = self.snd_nxt;
        self.sync_tcb();
        let in_flight = self.tcb.bytes_in_flight;
        self.tcb.ssthresh = self.cc.get_ssthresh(&self.tcb, in_flight);

        self.scoreboard.mark_head_lost();
        self.sync_tcb();
        self.set_congestion_state(CongestionState::Recovery);
        self.recovery.enter_recovery(&mut self.tcb, delivered);
        self.stats.fast_recoveries += 1;

        tracing::trace!(
            socket = %self.local,
            cwnd = self.tcb.cwnd,
            ssthresh = self.tcb.ssthresh,
            "entering fast recovery"
        );

        self.retransmit_first_lost(now, out);
    }

    fn on_retransmit_timeout(&mut self, now: SimTime, out: &mut Vec<TcpOutput>) {
        match self.state {
            TcpState::Closed => {}
            TcpState::SynSent | TcpState::SynReceived => {
                if self.syn_attempts > self.config.syn_retries {
                    self.state = TcpState::Closed;
                    self.cancel_delayed_ack();
                    out.push(TcpOutput::Notify(SocketNotification::ConnectionFailed));
                    return;
                }

                self.rtt.backoff();
                self.send_syn(now, out);
            }
            _ => {
                if self.scoreboard.is_empty() {
                    return;
                }

                self.stats.timeouts += 1;
                self.sync_tcb();
                if self.tcb.congestion_state != CongestionState::Loss {
                    let in_flight = self.tcb.bytes_in_flight;
                    self.tcb.ssthresh = self.cc.get_ssthresh(&self.tcb, in_flight);
                }

                self.tcb.cwnd = self.config.segment_size;
                self.recover = self.snd_nxt;
                self.dup_acks = 0;
                self.scoreboard.mark_all_lost(self.sack_enabled);
                self.sync_tcb();
                self.set_congestion_state(CongestionState::Loss);
                self.rtt.backoff();

                tracing::trace!(
                    socket = %self.local,
                    rto = ?self.rtt.rto(),
                    ssthresh = self.tcb.ssthresh,
                    "retransmission timeout"
                );

                self.send_pending(now, out);
                if !self.retransmit_armed {
                    self.arm_retransmit(now, out);
                }
            }
        }
    }

    fn process_payload(
        &mut self,
        header: &TcpHeader,
        payload_len: u32,
        now: SimTime,
        out: &mut Vec<TcpOutput>,
    ) {
        let receiving = matches!(
            self.state,
            TcpState::Established
                | TcpState::FinWait1
                | TcpState::FinWait2
                | TcpState::CloseWait
                | TcpState::Closing
                | TcpState::LastAck
        );
        let Some(rx) = self.rx.as_mut() else {
            return;
        };
        if !receiving {
            return;
        }

        let mut ack_now = false;
        if payload_len > 0 {
            let outcome = rx.receive(header.sequence, payload_len);
            if outcome.delivered > 0 {
                self.stats.bytes_received += outcome.delivered;
                out.push(TcpOutput::Notify(SocketNotification::Received(
                    outcome.delivered,
                )));
            }

            if outcome.out_of_order || outcome.duplicate || outcome.filled_gap || rx.has_gaps() {
                ack_now = true;
            } else {
                self.unacked_segments += 1;
                ack_now = self.unacked_segments >= self.config.delayed_ack_count;
            }
        }

        if header.flags.fin {
            if self.peer_fin_received {
                ack_now = true;
            } else {
                self.peer_fin_seq = Some(header.sequence + payload_len as u64);
            }
        }

        let fin_in_order = self.peer_fin_seq == Some(rx.next_expected());
        if !self.peer_fin_received && fin_in_order {
            rx.advance(1);
            self.peer_fin_received = true;
            ack_now = true;
            self.on_peer_fin(out);
        }

        if ack_now {
            self.send_ack(out);
        } else if self.unacked_segments > 0 && !self.delayed_ack_armed {
            self.arm_delayed_ack(now, out);
        }
    }

    fn on_peer_fin(&mut self, out: &mut Vec<TcpOutput>) {
        out.push(TcpOutput::Notify(SocketNotification::PeerClosed));
        match self.state {
            TcpState::Established => self.state = TcpState::CloseWait,
            TcpState::FinWait1 => self.state = TcpState::Closing,
            TcpState::FinWait2 => self.enter_closed(out),
            _ => {}
        }
    }

    fn on_fin_acked(&mut self, out: &mut Vec<TcpOutput>) {
        match self.state {
            TcpState::FinWait1 => self.state = TcpState::FinWait2,
            TcpState::Closing | TcpState::LastAck => self.enter_closed(out),
            _ => {}
        }
    }

    fn enter_closed(&mut self, out: &mut Vec<TcpOutput>) {
        self.state = TcpState::Closed;
        self.cancel_retransmit();
        self.cancel_delayed_ack();
        out.push(TcpOutput::Notify(SocketNotification::Closed));
    }

    /// Sends whatever the congestion and receive windows allow: lost segments first, then new
    /// data, then the FIN
    fn send_pending(&mut self, now: SimTime, out: &mut Vec<TcpOutput>) {
        let synchronized = matches!(
            self.state,
            TcpState::Established
                | TcpState::CloseWait
                | TcpState::FinWait1
                | TcpState::Closing
                | TcpState::LastAck
        );
        if !synchronized {
            return;
        }

        let mss = self.config.segment_size as u64;
        loop {
            let pipe = self.scoreboard.pipe();
            let cwnd = self.tcb.cwnd as u64;

            if let Some(lost) = self.scoreboard.next_lost() {
                if pipe + lost.len as u64 <= cwnd {
                    self.transmit(lost, true, now, out);
                    continue;
                }
                break;
            }

            if self.unsent > 0 && !self.fin_sent {
                let len = self.unsent.min(mss);
                let window_end = self.snd_una + self.peer_window as u64;
                if pipe + len <= cwnd && self.snd_nxt + len <= window_end {
                    self.send_new_segment(len as u32, false, now, out);
                    continue;
                }
                break;
            }

            if self.close_requested && !self.fin_sent {
                self.send_new_segment(0, true, now, out);
            }
            break;
        }
    }

    fn send_new_segment(&mut self, len: u32, fin: bool, now: SimTime, out: &mut Vec<TcpOutput>) {
        let seq = self.snd_nxt;
        self.scoreboard.push(seq, len, fin, now);
        self.snd_nxt += len as u64 + u64::from(fin);
        self.unsent -= len as u64;
        self.stats.data_bytes_sent += len as u64;

        if fin {
            self.fin_sent = true;
            match self.state {
                TcpState::Established | TcpState::SynReceived => self.state = TcpState::FinWait1,
                TcpState::CloseWait => self.state = TcpState::LastAck,
                _ => {}
            }
        }

        let pending = Pending {
            seq,
            len: len + u32::from(fin),
            payload: len,
            fin,
        };
        self.transmit(pending, false, now, out);
    }

    fn retransmit_first_lost(&mut self, now: SimTime, out: &mut Vec<TcpOutput>) {
        if let Some(lost) = self.scoreboard.next_lost() {
            self.transmit(lost, true, now, out);
        }
    }

    fn transmit(
        &mut self,
        segment: Pending,
        retransmission: bool,
        now: SimTime,
        out: &mut Vec<TcpOutput>,
    ) {
        let flags = if segment.fin {
            TcpFlags::FIN_ACK
        } else {
            TcpFlags::ACK
        };
        let header = self.header(segment.seq, flags);

        if retransmission {
            self.scoreboard.mark_retransmitted(segment.seq);
            self.stats.retransmitted_segments += 1;
            self.stats.retransmitted_bytes += segment.payload as u64;
        }

        self.emit(header, segment.payload, retransmission, out);
        if self.tcb.congestion_state == CongestionState::Recovery {
            self.recovery.update_bytes_sent(segment.len);
        }

        self.sync_tcb();
        if !self.retransmit_armed {
            self.arm_retransmit(now, out);
        }
    }

    fn send_syn(&mut self, now: SimTime, out: &mut Vec<TcpOutput>) {
        let (flags, sack_permitted) = match self.state {
            TcpState::SynSent => (TcpFlags::SYN, self.config.sack),
            _ => (TcpFlags::SYN_ACK, self.sack_enabled),
        };

        let mut header = self.header(INITIAL_SEQUENCE, flags);
        header.sack_permitted = sack_permitted;
        header.sack_blocks.clear();

        let retransmission = self.syn_attempts > 0;
        if retransmission {
            self.syn_retransmitted = true;
        } else {
            self.syn_sent_at = Some(now);
        }
        self.syn_attempts += 1;

        self.emit(header, 0, retransmission, out);
        self.arm_retransmit(now, out);
    }

    fn send_ack(&mut self, out: &mut Vec<TcpOutput>) {
        let header = self.header(self.snd_nxt, TcpFlags::ACK);
        self.emit(header, 0, false, out);
    }

    fn header(&self, sequence: u64, flags: TcpFlags) -> TcpHeader {
        let (ack, window, sack_blocks) = match &self.rx {
            Some(rx) => {
                let blocks = if self.sack_enabled {
                    rx.sack_blocks(MAX_SACK_BLOCKS)
                } else {
                    Vec::new()
                };
                (rx.next_expected(), rx.window(), blocks)
            }
            None => (0, self.config.receive_buffer_size, Vec::new()),
        };

        TcpHeader {
            source_port: self.local.port(),
            destination_port: self.remote.port(),
            sequence,
            ack,
            flags,
            window,
            sack_permitted: false,
            sack_blocks,
        }
    }

    fn emit(
        &mut self,
        header: TcpHeader,
        payload_len: u32,
        retransmission: bool,
        out: &mut Vec<TcpOutput>,
    ) {
        if header.flags.ack {
            // Every segment carries the latest acknowledgement
            self.unacked_segments = 0;
            self.cancel_delayed_ack();
        }

        self.stats.segments_sent += 1;
        out.push(TcpOutput::Segment(OutgoingSegment {
            header,
            payload_len,
            retransmission,
        }));
    }

    fn arm_retransmit(&mut self, now: SimTime, out: &mut Vec<TcpOutput>) {
        self.retransmit_generation += 1;
        self.retransmit_armed = true;
        out.push(TcpOutput::Timer {
            kind: TimerKind::Retransmit,
            at: now + self.rtt.rto(),
            generation: self.retransmit_generation,
        });
    }

    fn cancel_retransmit(&mut self) {
        self.retransmit_generation += 1;
        self.retransmit_armed = false;
    }

    fn arm_delayed_ack(&mut self, now: SimTime, out: &mut Vec<TcpOutput>) {
        self.delayed_ack_generation += 1;
        self.delayed_ack_armed = true;
        out.push(TcpOutput::Timer {
            kind: TimerKind::DelayedAck,
            at: now + self.config.delayed_ack_timeout,
            generation: self.delayed_ack_generation,
        });
    }

    fn cancel_delayed_ack(&mut self) {
        if self.delayed_ack_armed {
            self.delayed_ack_generation += 1;
            self.delayed_ack_armed = false;
        }
    }

    fn set_congestion_state(&mut self, state: CongestionState) {
        self.tcb.congestion_state = state;
        self.cc.congestion_state_set(&mut self.tcb, state);
    }

    fn sync_tcb(&mut self) {
        self.tcb.bytes_in_flight = self.scoreboard.pipe().min(u32::MAX as u64) as u32;
        self.tcb.last_acked_seq = self.snd_una;
        self.tcb.next_tx_sequence = self.snd_nxt;
    }
}
