//! 802.11n (5 GHz) physical layer: transmission modes, frame durations and signal quality

use anyhow::bail;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

pub const SLOT: Duration = Duration::from_micros(9);
pub const SIFS: Duration = Duration::from_micros(16);
pub const DIFS: Duration = Duration::from_micros(16 + 2 * 9);

pub const CHANNEL_WIDTH_HZ: f64 = 20e6;

const SYMBOL: Duration = Duration::from_micros(4);
const LEGACY_PREAMBLE: Duration = Duration::from_micros(20);
// L-STF, L-LTF, L-SIG, HT-SIG, HT-STF and one HT-LTF
const HT_MIXED_PREAMBLE: Duration = Duration::from_micros(36);
// SERVICE field and tail bits
const PLCP_SERVICE_BITS: u64 = 16;
const PLCP_TAIL_BITS: u64 = 6;

/// A transmission mode, named as in the configuration strings (`HtMcs7`, `OfdmRate6Mbps`)
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum WifiMode {
    Ofdm(OfdmRate),
    Ht(u8),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum OfdmRate {
    Mbps6,
    Mbps9,
    Mbps12,
    Mbps18,
    Mbps24,
    Mbps36,
    Mbps48,
    Mbps54,
}

impl OfdmRate {
    const ALL: [OfdmRate; 8] = [
        OfdmRate::Mbps6,
        OfdmRate::Mbps9,
        OfdmRate::Mbps12,
        OfdmRate::Mbps18,
        OfdmRate::Mbps24,
        OfdmRate::Mbps36,
        OfdmRate::Mbps48,
        OfdmRate::Mbps54,
    ];

    fn mbps(&self) -> u32 {
        match self {
            OfdmRate::Mbps6 => 6,
            OfdmRate::Mbps9 => 9,
            OfdmRate::Mbps12 => 12,
            OfdmRate::Mbps18 => 18,
            OfdmRate::Mbps24 => 24,
            OfdmRate::Mbps36 => 36,
            OfdmRate::Mbps48 => 48,
            OfdmRate::Mbps54 => 54,
        }
    }
}

impl WifiMode {
    /// Data bits carried by one OFDM symbol
    pub fn data_bits_per_symbol(&self) -> u64 {
        match self {
            WifiMode::Ofdm(rate) => rate.mbps() as u64 * 4,
            WifiMode::Ht(mcs) => [26, 52, 78, 104, 156, 208, 234, 260][*mcs as usize],
        }
    }

    /// Nominal data rate in bits per second (800 ns guard interval)
    pub fn data_rate_bps(&self) -> u64 {
        self.data_bits_per_symbol() * 250_000
    }

    /// Minimum SNR (dB) at which frames sent in this mode are received
    pub fn min_snr_db(&self) -> f64 {
        match self {
            WifiMode::Ofdm(OfdmRate::Mbps6) | WifiMode::Ht(0) => 2.0,
            WifiMode::Ofdm(OfdmRate::Mbps9) => 4.0,
            WifiMode::Ofdm(OfdmRate::Mbps12) | WifiMode::Ht(1) => 5.0,
            WifiMode::Ofdm(OfdmRate::Mbps18) | WifiMode::Ht(2) => 9.0,
            WifiMode::Ofdm(OfdmRate::Mbps24) | WifiMode::Ht(3) => 11.0,
            WifiMode::Ofdm(OfdmRate::Mbps36) | WifiMode::Ht(4) => 15.0,
            WifiMode::Ofdm(OfdmRate::Mbps48) | WifiMode::Ht(5) => 18.0,
            WifiMode::Ofdm(OfdmRate::Mbps54) | WifiMode::Ht(6) => 20.0,
            WifiMode::Ht(_) => 25.0,
        }
    }

    /// The legacy mode used to acknowledge frames when this is the control mode
    pub fn non_ht_reference(&self) -> WifiMode {
        match self {
            WifiMode::Ofdm(_) => *self,
            WifiMode::Ht(mcs) => WifiMode::Ofdm(match mcs {
                0 => OfdmRate::Mbps6,
                1 => OfdmRate::Mbps12,
                2 => OfdmRate::Mbps18,
                3 => OfdmRate::Mbps24,
                4 => OfdmRate::Mbps36,
                5 => OfdmRate::Mbps48,
                _ => OfdmRate::Mbps54,
            }),
        }
    }

    /// Time on air of a PSDU of `bytes` bytes, preamble included
    pub fn frame_duration(&self, bytes: usize) -> Duration {
        let preamble = match self {
            WifiMode::Ofdm(_) => LEGACY_PREAMBLE,
            WifiMode::Ht(_) => HT_MIXED_PREAMBLE,
        };

        let bits = PLCP_SERVICE_BITS + 8 * bytes as u64 + PLCP_TAIL_BITS;
        let symbols = bits.div_ceil(self.data_bits_per_symbol());
        preamble + SYMBOL * symbols as u32
    }
}

impl Display for WifiMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            WifiMode::Ofdm(rate) => write!(f, "OfdmRate{}Mbps", rate.mbps()),
            WifiMode::Ht(mcs) => write!(f, "HtMcs{mcs}"),
        }
    }
}

impl FromStr for WifiMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(mcs) = s.strip_prefix("HtMcs") {
            return match mcs.parse::<u8>() {
                Ok(mcs) if mcs <= 7 => Ok(WifiMode::Ht(mcs)),
                _ => bail!("unsupported HT mode `{s}` (single spatial stream, MCS 0 to 7)"),
            };
        }

        if let Some(rate) = s
            .strip_prefix("OfdmRate")
            .and_then(|r| r.strip_suffix("Mbps"))
        {
            if let Some(rate) = OfdmRate::ALL.iter().find(|r| r.mbps().to_string() == rate) {
                return Ok(WifiMode::Ofdm(*rate));
            }
        }

        bail!("unknown Wi-Fi mode `{s}`")
    }
}

/// Radio parameters shared by every device in a Wi-Fi cell
#[derive(Clone, Debug)]
pub struct WifiPhyConfig {
    pub frequency_hz: f64,
    pub tx_power_dbm: f64,
    pub tx_gain_db: f64,
    pub rx_gain_db: f64,
    pub rx_noise_figure_db: f64,
    /// Signals weaker than this do not make the medium busy
    pub cca_threshold_dbm: f64,
    /// Signals weaker than this cannot be decoded
    pub energy_detection_threshold_dbm: f64,
}

impl Default for WifiPhyConfig {
    fn default() -> Self {
        Self {
            frequency_hz: 5e9,
            tx_power_dbm: 16.0206,
            tx_gain_db: 0.0,
            rx_gain_db: 0.0,
            rx_noise_figure_db: 7.0,
            cca_threshold_dbm: -62.0,
            energy_detection_threshold_dbm: -96.0,
        }
    }
}

impl WifiPhyConfig {
    /// Thermal noise over the channel width, including the receiver's noise figure
    pub fn noise_floor_dbm(&self) -> f64 {
        // kT at 290 K is -174 dBm/Hz
        -174.0 + 10.0 * CHANNEL_WIDTH_HZ.log10() + self.rx_noise_figure_db
    }

    pub fn rx_power_dbm(&self, distance_m: f64) -> f64 {
        self.tx_power_dbm + self.tx_gain_db + self.rx_gain_db
            - friis_loss_db(self.frequency_hz, distance_m)
    }

    pub fn snr_db(&self, distance_m: f64) -> f64 {
        self.rx_power_dbm(distance_m) - self.noise_floor_dbm()
    }
}

/// Free-space path loss
///
/// Distances below three wavelengths are considered too close for the model and yield no loss.
pub fn friis_loss_db(frequency_hz: f64, distance_m: f64) -> f64 {
    const SPEED_OF_LIGHT: f64 = 299_792_458.0;
    let lambda = SPEED_OF_LIGHT / frequency_hz;
    if distance_m < 3.0 * lambda {
        return 0.0;
    }

    20.0 * (4.0 * std::f64::consts::PI * distance_m / lambda).log10()
}
