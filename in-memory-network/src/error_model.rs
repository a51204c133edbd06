//! Stochastic packet impairments applied on the receive path of a device

use crate::packet::Packet;
use anyhow::bail;
use fastrand::Rng;
use parking_lot::Mutex;
use std::sync::Arc;

/// Decides whether a packet arriving at a device gets corrupted (and therefore dropped)
pub trait ErrorModel: Send {
    fn name(&self) -> &'static str;

    fn is_corrupt(&mut self, packet: &Packet) -> bool;
}

/// A reproducible stream of random numbers
///
/// Streams are identified by the run seed plus a stream index, so two components drawing from
/// different streams never influence each other, and a run with the same seed is bit-identical.
#[derive(Clone)]
pub struct RandomStream {
    rng: Arc<Mutex<Rng>>,
}

impl RandomStream {
    pub fn new(seed: u64, stream: u64) -> Self {
        Self {
            rng: Arc::new(Mutex::new(Rng::with_seed(mix(seed, stream)))),
        }
    }

    /// A uniform value in `[0, 1)`
    pub fn next_f64(&self) -> f64 {
        self.rng.lock().f64()
    }

    /// A uniform integer in `[min, max]`
    pub fn next_u32(&self, min: u32, max: u32) -> u32 {
        self.rng.lock().u32(min..=max)
    }
}

// SplitMix64 finalizer, so neighbouring stream indices yield unrelated seeds
fn mix(seed: u64, stream: u64) -> u64 {
    let mut z = seed ^ stream.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Loses packets in bursts
///
/// Every packet draws a uniform number; when it falls below the burst rate a new burst starts,
/// with a uniformly distributed size. The packet that starts a burst and the following packets
/// until the burst size is reached are corrupted.
pub struct BurstErrorModel {
    burst_rate: f64,
    burst_size_min: u32,
    burst_size_max: u32,
    random: RandomStream,
    current_burst_size: u32,
    counter: u32,
    stats: BurstStats,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BurstStats {
    pub packets_seen: u64,
    pub bursts_started: u64,
    pub packets_corrupted: u64,
}

impl BurstErrorModel {
    pub const DEFAULT_BURST_SIZE_MIN: u32 = 1;
    pub const DEFAULT_BURST_SIZE_MAX: u32 = 4;

    pub fn new(burst_rate: f64, random: RandomStream) -> Self {
        Self {
            burst_rate,
            burst_size_min: Self::DEFAULT_BURST_SIZE_MIN,
            burst_size_max: Self::DEFAULT_BURST_SIZE_MAX,
            random,
            current_burst_size: 0,
            counter: 0,
            stats: BurstStats::default(),
        }
    }

    pub fn with_burst_size(mut self, min: u32, max: u32) -> anyhow::Result<Self> {
        if min == 0 || min > max {
            bail!("invalid burst size range [{min}, {max}]");
        }

        self.burst_size_min = min;
        self.burst_size_max = max;
        Ok(self)
    }

    pub fn burst_rate(&self) -> f64 {
        self.burst_rate
    }

    pub fn stats(&self) -> BurstStats {
        self.stats
    }

    /// The long-run fraction of corrupted packets implied by the burst rate and the burst size
    /// distribution
    pub fn expected_corruption_ratio(&self) -> f64 {
        let p = self.burst_rate;
        let sizes = (self.burst_size_max - self.burst_size_min + 1) as f64;

        // A packet that does not start a burst is still corrupted if the most recent burst
        // started `distance` packets ago and is longer than `distance`
        let mut continuation = 0.0;
        for distance in 1..self.burst_size_max {
            let longer = self.burst_size_max - distance.max(self.burst_size_min - 1);
            continuation += (1.0 - p).powi(distance as i32 - 1) * p * (longer as f64 / sizes);
        }

        p + (1.0 - p) * continuation
    }

    fn corrupt_next(&mut self) -> bool {
        self.stats.packets_seen += 1;

        let corrupt = if self.random.next_f64() < self.burst_rate {
            self.current_burst_size = self
                .random
                .next_u32(self.burst_size_min, self.burst_size_max);
            self.counter = 1;
            self.stats.bursts_started += 1;
            true
        } else if self.counter < self.current_burst_size {
            self.counter += 1;
            true
        } else {
            false
        };

        if corrupt {
            self.stats.packets_corrupted += 1;
        }

        corrupt
    }
}

impl ErrorModel for BurstErrorModel {
    fn name(&self) -> &'static str {
        "BurstErrorModel"
    }

    fn is_corrupt(&mut self, _packet: &Packet) -> bool {
        self.corrupt_next()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const ERROR_MODEL_STREAM: u64 = 100;

    fn corruption_sequence(seed: u64, packets: usize) -> Vec<bool> {
        let mut model = BurstErrorModel::new(0.01, RandomStream::new(seed, ERROR_MODEL_STREAM));
        (0..packets).map(|_| model.corrupt_next()).collect()
    }

    #[test]
    fn test_burst_rate_converges() {
        let rate = 0.01;
        let mut model = BurstErrorModel::new(rate, RandomStream::new(1, ERROR_MODEL_STREAM));
        for _ in 0..100_000 {
            model.corrupt_next();
        }

        let stats = model.stats();
        let burst_ratio = stats.bursts_started as f64 / stats.packets_seen as f64;
        assert!((burst_ratio - rate).abs() < 0.002, "burst ratio {burst_ratio}");

        let corruption_ratio = stats.packets_corrupted as f64 / stats.packets_seen as f64;
        let expected = model.expected_corruption_ratio();
        assert!(
            (corruption_ratio - expected).abs() < 0.004,
            "corruption ratio {corruption_ratio}, expected {expected}"
        );
    }

    #[test]
    fn test_losses_come_in_bursts() {
        let sequence = corruption_sequence(7, 50_000);
        let corrupted = sequence.iter().filter(|c| **c).count();
        let bursts = sequence
            .windows(2)
            .filter(|w| !w[0] && w[1])
            .count();

        // Bursts are 2.5 packets long on average, so there must be fewer bursts than losses
        assert!(bursts > 0);
        assert!(corrupted as f64 / bursts as f64 > 1.5);
    }

    #[test]
    fn test_same_seed_same_sequence() {
        assert_eq!(corruption_sequence(42, 20_000), corruption_sequence(42, 20_000));
        assert_ne!(corruption_sequence(42, 20_000), corruption_sequence(43, 20_000));
    }

    #[test]
    fn test_zero_rate_never_corrupts() {
        let mut model = BurstErrorModel::new(0.0, RandomStream::new(1, ERROR_MODEL_STREAM));
        assert!((0..10_000).all(|_| !model.corrupt_next()));
        assert_eq!(model.expected_corruption_ratio(), 0.0);
    }

    #[test]
    fn test_expected_ratio_for_fixed_burst_size() {
        // With bursts of exactly one packet, only the starting packet is lost
        let model = BurstErrorModel::new(0.1, RandomStream::new(1, ERROR_MODEL_STREAM))
            .with_burst_size(1, 1)
            .unwrap();
        assert!((model.expected_corruption_ratio() - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_burst_size_range() {
        let model = || BurstErrorModel::new(0.1, RandomStream::new(1, ERROR_MODEL_STREAM));
        assert!(model().with_burst_size(0, 4).is_err());
        assert!(model().with_burst_size(3, 2).is_err());
        assert!(model().with_burst_size(2, 2).is_ok());
    }

    #[test]
    fn test_streams_are_independent() {
        let a = RandomStream::new(1, 1);
        let b = RandomStream::new(1, 2);
        let a_values: Vec<_> = (0..8).map(|_| a.next_f64()).collect();
        let b_values: Vec<_> = (0..8).map(|_| b.next_f64()).collect();
        assert_ne!(a_values, b_values);
    }
}
