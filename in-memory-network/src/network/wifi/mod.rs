//! A single 802.11 cell: one shared medium, contended for with the distributed coordination
//! function (DCF)
//!
//! All devices in the cell hear each other. A device with a frame to send waits for the medium
//! to be idle for DIFS and then counts down a random backoff, one slot at a time; the count
//! freezes while somebody else transmits. Devices whose backoff runs out in the same slot
//! collide. Every unicast frame that arrives is acknowledged after SIFS; a missing ACK doubles
//! the contention window, up to a retry limit after which the frame is dropped.
//!
//! Like the TCP socket, the cell is driven by its caller: every method pushes [`WifiAction`]s
//! describing what the network needs to schedule or account for.

pub mod phy;

use crate::error_model::RandomStream;
use crate::network::DeviceId;
use crate::network::mobility::Vector3;
use crate::network::spec::{WifiRole, WifiSpec};
use crate::packet::Packet;
use crate::queue_disc::QueueItem;
use crate::sim::SimTime;
use phy::{DIFS, SIFS, SLOT};
use serde::Serialize;
use std::net::Ipv4Addr;
use std::time::Duration;

pub const CW_MIN: u32 = 15;
pub const CW_MAX: u32 = 1023;
/// Failed attempts after which a frame is dropped
pub const RETRY_LIMIT: u32 = 7;
/// QoS MAC header, LLC/SNAP header and FCS around every IP packet
pub const DATA_FRAME_OVERHEAD: usize = 38;
pub const ACK_FRAME_BYTES: usize = 14;

const SPEED_OF_LIGHT: f64 = 299_792_458.0;

#[derive(Debug)]
pub enum WifiAction {
    /// Call [`WifiChannel::on_access`] at `at`, passing `generation`
    ScheduleAccess { at: SimTime, generation: u64 },
    /// Call [`WifiChannel::on_exchange_end`] at `at`
    ScheduleExchangeEnd { at: SimTime },
    /// A data frame went on the air (possibly to collide)
    Transmitted { device: DeviceId, packet: Packet },
    /// A data frame will be received intact by `to` at `at`
    Deliver {
        to: DeviceId,
        packet: Packet,
        at: SimTime,
    },
    AttemptFailed { device: DeviceId },
    Dropped {
        device: DeviceId,
        item: QueueItem,
        reason: WifiDropReason,
    },
    /// The device has no frame in flight and can take the next one from its queue
    ReadyForFrame { device: DeviceId },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WifiDropReason {
    RetryLimit,
    /// No device in the cell owns the next hop address
    Unreachable,
}

#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WifiChannelStats {
    pub exchanges: u64,
    pub collisions: u64,
    /// Frames that did not collide but were too weak to decode
    pub frames_lost_to_noise: u64,
}

struct WifiStation {
    device: DeviceId,
    role: WifiRole,
    position: Vector3,
    address: Option<Ipv4Addr>,
    frame: Option<QueueItem>,
    cw: u32,
    retries: u32,
    backoff: Option<u32>,
    /// When the backoff started (or resumed) counting down; `None` while frozen
    counting_since: Option<SimTime>,
}

impl WifiStation {
    fn access_time(&self) -> Option<SimTime> {
        self.frame.as_ref()?;
        let since = self.counting_since?;
        let slots = self.backoff?;
        Some(since + SLOT * slots)
    }

    fn freeze(&mut self, now: SimTime) {
        let Some(since) = self.counting_since.take() else {
            return;
        };

        if since < now {
            let elapsed = (now - since).as_nanos() / SLOT.as_nanos();
            if let Some(backoff) = &mut self.backoff {
                *backoff -= (elapsed.min(*backoff as u128)) as u32;
            }
        }
    }
}

struct Attempt {
    station: usize,
    success: bool,
}

pub struct WifiChannel {
    spec: WifiSpec,
    stations: Vec<WifiStation>,
    random: RandomStream,
    idle_since: SimTime,
    access_generation: u64,
    exchange: Option<Vec<Attempt>>,
    stats: WifiChannelStats,
}

impl WifiChannel {
    pub(crate) fn new(spec: WifiSpec, random: RandomStream) -> Self {
        Self {
            spec,
            stations: Vec::new(),
            random,
            idle_since: SimTime::ZERO,
            access_generation: 0,
            exchange: None,
            stats: WifiChannelStats::default(),
        }
    }

    pub fn spec(&self) -> &WifiSpec {
        &self.spec
    }

    pub fn stats(&self) -> &WifiChannelStats {
        &self.stats
    }

    pub fn devices(&self) -> impl Iterator<Item = DeviceId> + '_ {
        self.stations.iter().map(|s| s.device)
    }

    pub fn role_of(&self, device: DeviceId) -> Option<&WifiRole> {
        self.stations
            .iter()
            .find(|s| s.device == device)
            .map(|s| &s.role)
    }

    pub fn has_frame(&self, device: DeviceId) -> bool {
        self.station_index(device)
            .is_some_and(|i| self.stations[i].frame.is_some())
    }

    pub(crate) fn attach(&mut self, device: DeviceId, role: WifiRole) {
        self.stations.push(WifiStation {
            device,
            role,
            position: Vector3::default(),
            address: None,
            frame: None,
            cw: CW_MIN,
            retries: 0,
            backoff: None,
            counting_since: None,
        });
    }

    pub(crate) fn set_position(&mut self, device: DeviceId, position: Vector3) {
        if let Some(i) = self.station_index(device) {
            self.stations[i].position = position;
        }
    }

    pub(crate) fn set_address(&mut self, device: DeviceId, address: Ipv4Addr) {
        if let Some(i) = self.station_index(device) {
            self.stations[i].address = Some(address);
        }
    }

    /// Hands the device the next frame to send; it must not have one in flight already
    pub(crate) fn offer_frame(
        &mut self,
        device: DeviceId,
        item: QueueItem,
        now: SimTime,
        actions: &mut Vec<WifiAction>,
    ) {
        let Some(i) = self.station_index(device) else {
            actions.push(WifiAction::Dropped {
                device,
                item,
                reason: WifiDropReason::Unreachable,
            });
            return;
        };

        debug_assert!(self.stations[i].frame.is_none());
        let medium_idle = self.exchange.is_none();
        let earliest_count = self.idle_since + DIFS;
        let station = &mut self.stations[i];
        station.frame = Some(item);
        if station.backoff.is_none() {
            station.backoff = Some(self.random.next_u32(0, station.cw));
        }

        if medium_idle {
            station.counting_since = Some(now.max(earliest_count));
            self.schedule_access(actions);
        }
    }

    pub(crate) fn on_access(&mut self, generation: u64, now: SimTime, actions: &mut Vec<WifiAction>) {
        if generation != self.access_generation || self.exchange.is_some() {
            return;
        }

        let mut senders = Vec::new();
        for i in 0..self.stations.len() {
            if self.stations[i].access_time() != Some(now) {
                continue;
            }

            match self.receiver_of(i) {
                Some(receiver) => senders.push((i, receiver)),
                None => {
                    let station = &mut self.stations[i];
                    station.backoff = None;
                    station.counting_since = None;
                    if let Some(item) = station.frame.take() {
                        tracing::debug!(
                            "wifi device {} has no neighbour with address {}",
                            station.device,
                            item.next_hop
                        );
                        actions.push(WifiAction::Dropped {
                            device: station.device,
                            item,
                            reason: WifiDropReason::Unreachable,
                        });
                    }
                    actions.push(WifiAction::ReadyForFrame {
                        device: station.device,
                    });
                }
            }
        }

        if senders.is_empty() {
            self.schedule_access(actions);
            return;
        }

        // The medium turns busy for everybody
        for station in &mut self.stations {
            station.freeze(now);
        }

        let collision = senders.len() > 1;
        let ack_duration = self
            .spec
            .control_mode
            .non_ht_reference()
            .frame_duration(ACK_FRAME_BYTES);
        let ack_timeout = SIFS + SLOT + ack_duration;

        let mut attempts = Vec::with_capacity(senders.len());
        let mut exchange_end = now;
        for (sender, receiver) in senders {
            self.stations[sender].backoff = None;
            let Some(item) = &self.stations[sender].frame else {
                continue;
            };

            let packet = item.packet.clone();
            let on_air = self
                .spec
                .data_mode
                .frame_duration(packet.size() + DATA_FRAME_OVERHEAD);
            let distance = self.stations[sender]
                .position
                .distance(&self.stations[receiver].position);
            let propagation = Duration::from_secs_f64(distance / SPEED_OF_LIGHT);
            let decodable = self.decodable(distance);

            actions.push(WifiAction::Transmitted {
                device: self.stations[sender].device,
                packet: packet.clone(),
            });

            let success = !collision && decodable;
            let end = if success {
                actions.push(WifiAction::Deliver {
                    to: self.stations[receiver].device,
                    packet,
                    at: now + on_air + propagation,
                });
                now + on_air + propagation + SIFS + ack_duration + propagation
            } else {
                if !collision {
                    self.stats.frames_lost_to_noise += 1;
                }
                now + on_air + ack_timeout
            };

            exchange_end = exchange_end.max(end);
            attempts.push(Attempt {
                station: sender,
                success,
            });
        }

        self.stats.exchanges += 1;
        if collision {
            self.stats.collisions += 1;
        }

        self.exchange = Some(attempts);
        actions.push(WifiAction::ScheduleExchangeEnd { at: exchange_end });
    }

    pub(crate) fn on_exchange_end(&mut self, now: SimTime, actions: &mut Vec<WifiAction>) {
        let Some(attempts) = self.exchange.take() else {
            return;
        };

        for attempt in attempts {
            let station = &mut self.stations[attempt.station];
            if attempt.success {
                station.frame = None;
                station.cw = CW_MIN;
                station.retries = 0;
                actions.push(WifiAction::ReadyForFrame {
                    device: station.device,
                });
            } else {
                actions.push(WifiAction::AttemptFailed {
                    device: station.device,
                });

                station.retries += 1;
                if station.retries >= RETRY_LIMIT {
                    if let Some(item) = station.frame.take() {
                        actions.push(WifiAction::Dropped {
                            device: station.device,
                            item,
                            reason: WifiDropReason::RetryLimit,
                        });
                    }
                    station.cw = CW_MIN;
                    station.retries = 0;
                    actions.push(WifiAction::ReadyForFrame {
                        device: station.device,
                    });
                } else {
                    station.cw = (station.cw * 2 + 1).min(CW_MAX);
                }
            }

            // Post-transmission backoff
            station.backoff = Some(self.random.next_u32(0, station.cw));
        }

        self.idle_since = now;
        for station in &mut self.stations {
            if station.frame.is_some() {
                station.counting_since = Some(now + DIFS);
            }
        }

        self.schedule_access(actions);
    }

    fn schedule_access(&mut self, actions: &mut Vec<WifiAction>) {
        if self.exchange.is_some() {
            return;
        }

        let Some(at) = self.stations.iter().filter_map(|s| s.access_time()).min() else {
            return;
        };

        self.access_generation += 1;
        actions.push(WifiAction::ScheduleAccess {
            at,
            generation: self.access_generation,
        });
    }

    fn station_index(&self, device: DeviceId) -> Option<usize> {
        self.stations.iter().position(|s| s.device == device)
    }

    fn receiver_of(&self, sender: usize) -> Option<usize> {
        let next_hop = self.stations[sender].frame.as_ref()?.next_hop;
        self.stations
            .iter()
            .enumerate()
            .position(|(i, s)| i != sender && s.address == Some(next_hop))
    }

    fn decodable(&self, distance: f64) -> bool {
        let phy = &self.spec.phy;
        phy.rx_power_dbm(distance) >= phy.energy_detection_threshold_dbm
            && phy.snr_db(distance) >= self.spec.data_mode.min_snr_db()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::network::wifi::phy::{WifiMode, WifiPhyConfig};
    use crate::queue_disc::test_util::item_with_payload;
    use crate::sim::Scheduler;

    const AP: DeviceId = 0;
    const STA1: DeviceId = 1;
    const STA2: DeviceId = 2;
    const AP_ADDR: Ipv4Addr = Ipv4Addr::new(10, 0, 1, 4);
    const STA1_ADDR: Ipv4Addr = Ipv4Addr::new(10, 0, 1, 1);
    const STA2_ADDR: Ipv4Addr = Ipv4Addr::new(10, 0, 1, 2);

    fn cell(station_distance: f64) -> WifiChannel {
        let spec = WifiSpec {
            phy: WifiPhyConfig {
                tx_power_dbm: 10.0,
                rx_noise_figure_db: 10.0,
                cca_threshold_dbm: -79.0,
                energy_detection_threshold_dbm: -76.0,
                ..WifiPhyConfig::default()
            },
            data_mode: WifiMode::Ht(7),
            control_mode: WifiMode::Ht(0),
            ssid: "network".to_string(),
            fragmentation_threshold: 999_999,
            rts_cts_threshold: 999_999,
        };

        let mut channel = WifiChannel::new(spec, RandomStream::new(1, 200));
        for (device, address, role, x) in [
            (AP, AP_ADDR, WifiRole::AccessPoint, 0.0),
            (STA1, STA1_ADDR, WifiRole::Station { active_probing: false }, station_distance),
            (STA2, STA2_ADDR, WifiRole::Station { active_probing: false }, -station_distance),
        ] {
            channel.attach(device, role);
            channel.set_address(device, address);
            channel.set_position(device, Vector3::new(x, 0.0, 0.0));
        }
        channel
    }

    fn frame(uid: u64, next_hop: Ipv4Addr, now: SimTime) -> QueueItem {
        let mut item = item_with_payload(uid, 400, now);
        item.next_hop = next_hop;
        item
    }

    enum Step {
        Access(u64),
        ExchangeEnd,
    }

    #[derive(Default)]
    struct Outcome {
        delivered: Vec<(DeviceId, u64, SimTime)>,
        dropped: Vec<(DeviceId, WifiDropReason)>,
        failed_attempts: u64,
    }

    /// Keeps every device's frame queue topped up from `queues` and runs the cell until it is idle
    fn run(channel: &mut WifiChannel, mut queues: Vec<(DeviceId, Vec<QueueItem>)>) -> Outcome {
        let mut scheduler = Scheduler::new();
        let mut outcome = Outcome::default();
        let mut actions = Vec::new();
        let mut ready: Vec<DeviceId> = queues.iter().map(|(device, _)| *device).collect();

        loop {
            for device in ready.drain(..) {
                if let Some((_, queue)) = queues.iter_mut().find(|(d, _)| *d == device) {
                    if !queue.is_empty() {
                        let item = queue.remove(0);
                        channel.offer_frame(device, item, scheduler.now(), &mut actions);
                    }
                }
            }

            for action in actions.drain(..) {
                match action {
                    WifiAction::ScheduleAccess { at, generation } => {
                        scheduler.schedule_at(at, Step::Access(generation))
                    }
                    WifiAction::ScheduleExchangeEnd { at } => {
                        scheduler.schedule_at(at, Step::ExchangeEnd)
                    }
                    WifiAction::Deliver { to, packet, at } => {
                        outcome.delivered.push((to, packet.uid, at))
                    }
                    WifiAction::AttemptFailed { .. } => outcome.failed_attempts += 1,
                    WifiAction::Dropped { device, reason, .. } => {
                        outcome.dropped.push((device, reason))
                    }
                    WifiAction::ReadyForFrame { device } => ready.push(device),
                    WifiAction::Transmitted { .. } => {}
                }
            }

            if !ready.is_empty() {
                continue;
            }

            let Some(step) = scheduler.next_before(SimTime::MAX) else {
                break;
            };

            let now = scheduler.now();
            match step {
                Step::Access(generation) => channel.on_access(generation, now, &mut actions),
                Step::ExchangeEnd => channel.on_exchange_end(now, &mut actions),
            }
        }

        outcome
    }

    #[test]
    fn test_lone_sender_timing() {
        let mut channel = cell(10.0);
        let mut actions = Vec::new();
        channel.offer_frame(STA1, frame(1, AP_ADDR, SimTime::ZERO), SimTime::ZERO, &mut actions);

        let [WifiAction::ScheduleAccess { at, generation }] = actions.as_slice() else {
            panic!("expected a single access, got {actions:?}");
        };
        let (at, generation) = (*at, *generation);

        // DIFS plus a whole number of slots, within the initial contention window
        let backoff = at - (SimTime::ZERO + DIFS);
        assert_eq!(backoff.as_nanos() % SLOT.as_nanos(), 0);
        assert!(backoff <= SLOT * CW_MIN);

        actions.clear();
        channel.on_access(generation, at, &mut actions);

        let on_air = WifiMode::Ht(7).frame_duration(440 + DATA_FRAME_OVERHEAD);
        let propagation = Duration::from_secs_f64(10.0 / SPEED_OF_LIGHT);
        let deliver_at = actions
            .iter()
            .find_map(|a| match a {
                WifiAction::Deliver { to: AP, at, .. } => Some(*at),
                _ => None,
            })
            .expect("frame should be delivered to the access point");
        assert_eq!(deliver_at, at + on_air + propagation);

        let exchange_end = actions
            .iter()
            .find_map(|a| match a {
                WifiAction::ScheduleExchangeEnd { at } => Some(*at),
                _ => None,
            })
            .expect("exchange end should be scheduled");
        let ack = WifiMode::Ht(0).non_ht_reference().frame_duration(ACK_FRAME_BYTES);
        assert_eq!(exchange_end, deliver_at + SIFS + ack + propagation);

        actions.clear();
        channel.on_exchange_end(exchange_end, &mut actions);
        assert!(matches!(
            actions.as_slice(),
            [WifiAction::ReadyForFrame { device: STA1 }]
        ));
        assert!(!channel.has_frame(STA1));
    }

    #[test]
    fn test_contending_stations_all_get_through() {
        let mut channel = cell(10.0);
        let to_ap = |base: u64| (0..50).map(|i| frame(base + i, AP_ADDR, SimTime::ZERO)).collect();
        let to_sta1 = (0..50).map(|i| frame(200 + i, STA1_ADDR, SimTime::ZERO)).collect();

        let outcome = run(
            &mut channel,
            vec![(STA1, to_ap(0)), (STA2, to_ap(100)), (AP, to_sta1)],
        );

        assert!(outcome.dropped.is_empty());
        assert_eq!(outcome.delivered.len(), 150);
        assert_eq!(
            outcome.delivered.iter().filter(|(to, _, _)| *to == STA1).count(),
            50
        );

        // Every failed attempt was a collision, since the cell is small
        let stats = channel.stats();
        assert_eq!(stats.frames_lost_to_noise, 0);
        assert!(outcome.failed_attempts >= stats.collisions);
        assert_eq!(stats.exchanges, 150 + stats.collisions);

        // Deliveries never overlap in time
        let mut times: Vec<_> = outcome.delivered.iter().map(|(_, _, at)| *at).collect();
        times.sort();
        times.dedup();
        assert_eq!(times.len(), 150);
    }

    #[test]
    fn test_out_of_range_frames_hit_the_retry_limit() {
        // Far beyond what HtMcs7 can decode
        let mut channel = cell(5_000.0);
        let outcome = run(
            &mut channel,
            vec![(STA1, vec![frame(1, AP_ADDR, SimTime::ZERO)])],
        );

        assert!(outcome.delivered.is_empty());
        assert_eq!(outcome.dropped, vec![(STA1, WifiDropReason::RetryLimit)]);
        assert_eq!(outcome.failed_attempts, RETRY_LIMIT as u64);
        assert_eq!(channel.stats().frames_lost_to_noise, RETRY_LIMIT as u64);
    }

    #[test]
    fn test_unknown_next_hop_is_dropped() {
        let mut channel = cell(10.0);
        let outcome = run(
            &mut channel,
            vec![(STA1, vec![frame(1, Ipv4Addr::new(10, 0, 1, 99), SimTime::ZERO)])],
        );

        assert!(outcome.delivered.is_empty());
        assert_eq!(outcome.dropped, vec![(STA1, WifiDropReason::Unreachable)]);
        assert_eq!(channel.stats().exchanges, 0);
    }
}
