//! Bookkeeping for segments that have been sent but not cumulatively acknowledged yet

use crate::sim::SimTime;
use std::collections::BTreeMap;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum SegmentState {
    InFlight,
    Sacked,
    /// Considered lost and not retransmitted since
    Lost,
    /// Retransmitted after being considered lost
    Retransmitted,
}

#[derive(Clone, Debug)]
pub(crate) struct SentSegment {
    /// Sequence space used by the segment (payload, plus one for a FIN)
    pub len: u32,
    pub payload: u32,
    pub fin: bool,
    pub state: SegmentState,
    pub first_sent: SimTime,
    pub ever_retransmitted: bool,
}

/// A segment that should go out (again)
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct Pending {
    pub seq: u64,
    pub len: u32,
    pub payload: u32,
    pub fin: bool,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct AckedSummary {
    pub bytes: u64,
    /// Send time of the most recent fully acknowledged segment that was never retransmitted
    pub rtt_sample_sent_at: Option<SimTime>,
    pub fin_acked: bool,
}

#[derive(Debug, Default)]
struct Totals {
    pipe: u64,
    sacked: u64,
    lost: u64,
}

impl Totals {
    fn add(&mut self, state: SegmentState, len: u32) {
        let len = len as u64;
        match state {
            SegmentState::InFlight | SegmentState::Retransmitted => self.pipe += len,
            SegmentState::Sacked => self.sacked += len,
            SegmentState::Lost => self.lost += len,
        }
    }

    fn remove(&mut self, state: SegmentState, len: u32) {
        let len = len as u64;
        match state {
            SegmentState::InFlight | SegmentState::Retransmitted => {
                self.pipe = self.pipe.saturating_sub(len)
            }
            SegmentState::Sacked => self.sacked = self.sacked.saturating_sub(len),
            SegmentState::Lost => self.lost = self.lost.saturating_sub(len),
        }
    }
}

fn set_state(totals: &mut Totals, segment: &mut SentSegment, state: SegmentState) {
    totals.remove(segment.state, segment.len);
    segment.state = state;
    totals.add(state, segment.len);
}

/// The sender's scoreboard
///
/// The number of bytes considered to be in the network ("pipe") is kept up to date on every state
/// change, so it can be read in constant time.
#[derive(Debug, Default)]
pub(crate) struct TxScoreboard {
    segments: BTreeMap<u64, SentSegment>,
    totals: Totals,
}

impl TxScoreboard {
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn pipe(&self) -> u64 {
        self.totals.pipe
    }

    #[cfg(test)]
    pub fn sacked_bytes(&self) -> u64 {
        self.totals.sacked
    }

    pub fn has_lost(&self) -> bool {
        self.totals.lost > 0
    }

    #[cfg(test)]
    pub fn first_seq(&self) -> Option<u64> {
        self.segments.keys().next().copied()
    }

    pub fn push(&mut self, seq: u64, payload: u32, fin: bool, now: SimTime) {
        let segment = SentSegment {
            len: payload + u32::from(fin),
            payload,
            fin,
            state: SegmentState::InFlight,
            first_sent: now,
            ever_retransmitted: false,
        };
        self.totals.add(segment.state, segment.len);
        self.segments.insert(seq, segment);
    }

    /// Forgets every segment below `ack`
    pub fn ack_up_to(&mut self, ack: u64) -> AckedSummary {
        let mut summary = AckedSummary::default();

        while let Some(mut entry) = self.segments.first_entry() {
            let seq = *entry.key();
            let segment = entry.get_mut();
            let end = seq + segment.len as u64;

            if end <= ack {
                let segment = entry.remove();
                self.totals.remove(segment.state, segment.len);
                summary.bytes += segment.len as u64;
                summary.fin_acked |= segment.fin;
                if !segment.ever_retransmitted {
                    summary.rtt_sample_sent_at = Some(segment.first_sent);
                }
            } else if seq < ack {
                // Partially acknowledged, keep the remainder
                let acked = (ack - seq) as u32;
                let mut segment = entry.remove();
                self.totals.remove(segment.state, segment.len);
                segment.len -= acked;
                segment.payload = segment.payload.saturating_sub(acked);
                self.totals.add(segment.state, segment.len);
                self.segments.insert(ack, segment);
                summary.bytes += acked as u64;
                break;
            } else {
                break;
            }
        }

        summary
    }

    /// Marks segments fully covered by the provided `[start, end)` blocks as selectively
    /// acknowledged, returning the amount of newly sacked bytes
    pub fn apply_sack(&mut self, blocks: &[(u64, u64)]) -> u64 {
        let mut newly_sacked = 0;
        for &(start, end) in blocks {
            if start >= end {
                continue;
            }

            for (&seq, segment) in self.segments.range_mut(start..end) {
                if seq + segment.len as u64 > end || segment.state == SegmentState::Sacked {
                    continue;
                }

                set_state(&mut self.totals, segment, SegmentState::Sacked);
                newly_sacked += segment.len as u64;
            }
        }

        newly_sacked
    }

    /// Without SACK, every duplicate ACK means one more segment has left the network
    ///
    /// The head segment is never marked, since a duplicate ACK says it has not arrived.
    pub fn reno_sack(&mut self) -> u64 {
        let candidate = self
            .segments
            .iter_mut()
            .skip(1)
            .find(|(_, s)| s.state != SegmentState::Sacked);

        match candidate {
            Some((_, segment)) => {
                set_state(&mut self.totals, segment, SegmentState::Sacked);
                segment.len as u64
            }
            None => 0,
        }
    }

    pub fn clear_sacks(&mut self) {
        for segment in self.segments.values_mut() {
            if segment.state == SegmentState::Sacked {
                set_state(&mut self.totals, segment, SegmentState::InFlight);
            }
        }
    }

    /// Marks as lost every segment with at least `dup_threshold` sacked segments above it
    pub fn mark_lost_by_sack(&mut self, dup_threshold: u32) {
        let mut sacked_above = 0;
        for segment in self.segments.values_mut().rev() {
            if segment.state == SegmentState::Sacked {
                sacked_above += 1;
            } else if sacked_above >= dup_threshold && segment.state == SegmentState::InFlight {
                set_state(&mut self.totals, segment, SegmentState::Lost);
            }
        }
    }

    /// Marks the first unacknowledged segment as lost, unless it is already being retransmitted
    pub fn mark_head_lost(&mut self) {
        if let Some(segment) = self.segments.values_mut().next() {
            if segment.state == SegmentState::InFlight {
                set_state(&mut self.totals, segment, SegmentState::Lost);
            }
        }
    }

    /// Marks everything as lost, as needed after a retransmission timeout
    pub fn mark_all_lost(&mut self, keep_sacked: bool) {
        for segment in self.segments.values_mut() {
            if keep_sacked && segment.state == SegmentState::Sacked {
                continue;
            }
            set_state(&mut self.totals, segment, SegmentState::Lost);
        }
    }

    pub fn is_lost(&self, seq: u64) -> bool {
        self.segments
            .get(&seq)
            .is_some_and(|s| s.state == SegmentState::Lost)
    }

    pub fn next_lost(&self) -> Option<Pending> {
        if !self.has_lost() {
            return None;
        }

        self.segments
            .iter()
            .find(|(_, s)| s.state == SegmentState::Lost)
            .map(|(&seq, s)| Pending {
                seq,
                len: s.len,
                payload: s.payload,
                fin: s.fin,
            })
    }

    pub fn mark_retransmitted(&mut self, seq: u64) {
        if let Some(segment) = self.segments.get_mut(&seq) {
            segment.ever_retransmitted = true;
            set_state(&mut self.totals, segment, SegmentState::Retransmitted);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn scoreboard_with(segments: u64, size: u32) -> TxScoreboard {
        let mut scoreboard = TxScoreboard::default();
        for i in 0..segments {
            scoreboard.push(1 + i * size as u64, size, false, SimTime::from_millis(i));
        }
        scoreboard
    }

    #[test]
    fn test_cumulative_ack() {
        let mut scoreboard = scoreboard_with(4, 100);
        assert_eq!(scoreboard.pipe(), 400);

        let summary = scoreboard.ack_up_to(201);
        assert_eq!(summary.bytes, 200);
        assert_eq!(summary.rtt_sample_sent_at, Some(SimTime::from_millis(1)));
        assert_eq!(scoreboard.pipe(), 200);
        assert_eq!(scoreboard.first_seq(), Some(201));
    }

    #[test]
    fn test_retransmitted_segments_give_no_rtt_sample() {
        let mut scoreboard = scoreboard_with(2, 100);
        scoreboard.mark_head_lost();
        scoreboard.mark_retransmitted(1);

        let summary = scoreboard.ack_up_to(101);
        assert_eq!(summary.rtt_sample_sent_at, None);
    }

    #[test]
    fn test_sack_marks_losses() {
        let mut scoreboard = scoreboard_with(5, 100);

        // Segments 2, 3 and 4 arrived, segment 1 (seq 1) did not
        let newly_sacked = scoreboard.apply_sack(&[(101, 401)]);
        assert_eq!(newly_sacked, 300);
        assert_eq!(scoreboard.pipe(), 200);

        scoreboard.mark_lost_by_sack(3);
        assert!(scoreboard.is_lost(1));
        assert!(!scoreboard.is_lost(401));
        assert_eq!(scoreboard.pipe(), 100);

        let lost = scoreboard.next_lost().unwrap();
        assert_eq!(lost.seq, 1);
        scoreboard.mark_retransmitted(1);
        assert_eq!(scoreboard.pipe(), 200);
        assert!(scoreboard.next_lost().is_none());
    }

    #[test]
    fn test_reno_sack_skips_head() {
        let mut scoreboard = scoreboard_with(3, 100);
        assert_eq!(scoreboard.reno_sack(), 100);
        assert_eq!(scoreboard.reno_sack(), 100);
        assert_eq!(scoreboard.reno_sack(), 0);
        assert_eq!(scoreboard.pipe(), 100);

        scoreboard.clear_sacks();
        assert_eq!(scoreboard.pipe(), 300);
    }

    #[test]
    fn test_partial_ack_and_fin() {
        let mut scoreboard = TxScoreboard::default();
        scoreboard.push(1, 100, false, SimTime::ZERO);
        scoreboard.push(101, 0, true, SimTime::ZERO);

        let summary = scoreboard.ack_up_to(51);
        assert_eq!(summary.bytes, 50);
        assert_eq!(scoreboard.first_seq(), Some(51));

        let summary = scoreboard.ack_up_to(102);
        assert!(summary.fin_acked);
        assert!(scoreboard.is_empty());
        assert_eq!(scoreboard.pipe(), 0);
    }

    #[test]
    fn test_timeout_marks_everything_lost() {
        let mut scoreboard = scoreboard_with(3, 100);
        scoreboard.apply_sack(&[(201, 301)]);
        scoreboard.mark_all_lost(true);
        assert_eq!(scoreboard.pipe(), 0);
        assert_eq!(scoreboard.next_lost().unwrap().seq, 1);
        assert_eq!(scoreboard.sacked_bytes(), 100);
    }
}
