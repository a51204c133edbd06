use crate::network::wifi::phy::{WifiMode, WifiPhyConfig};
use crate::units::DataRate;
use anyhow::bail;
use std::time::Duration;

/// Largest MAC frame the cell has to carry without fragmenting or using RTS/CTS
pub const MAX_WIFI_FRAME_BYTES: u32 = 2346;

/// Parameters of a point-to-point link, shared by both of its devices
#[derive(Clone, Debug)]
pub struct PointToPointSpec {
    pub data_rate: DataRate,
    pub delay: Duration,
}

/// Parameters of a Wi-Fi cell
#[derive(Clone, Debug)]
pub struct WifiSpec {
    pub phy: WifiPhyConfig,
    /// Mode used for data frames
    pub data_mode: WifiMode,
    /// Mode whose legacy reference rate is used for control frames (ACKs)
    pub control_mode: WifiMode,
    pub ssid: String,
    pub fragmentation_threshold: u32,
    pub rts_cts_threshold: u32,
}

impl WifiSpec {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.ssid.is_empty() {
            bail!("the Wi-Fi cell needs a non-empty SSID");
        }

        // Fragmentation and RTS/CTS are not modeled, so they must never kick in
        if self.fragmentation_threshold < MAX_WIFI_FRAME_BYTES {
            bail!(
                "fragmentation threshold {} would fragment frames, which is not supported",
                self.fragmentation_threshold
            );
        }
        if self.rts_cts_threshold < MAX_WIFI_FRAME_BYTES {
            bail!(
                "RTS/CTS threshold {} would enable RTS/CTS, which is not supported",
                self.rts_cts_threshold
            );
        }

        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WifiRole {
    AccessPoint,
    /// Stations are associated with the access point from the start
    Station { active_probing: bool },
}

impl WifiRole {
    pub fn name(&self) -> &'static str {
        match self {
            WifiRole::AccessPoint => "access point",
            WifiRole::Station { .. } => "station",
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn spec(threshold: u32) -> WifiSpec {
        WifiSpec {
            phy: WifiPhyConfig::default(),
            data_mode: WifiMode::Ht(7),
            control_mode: WifiMode::Ht(0),
            ssid: "network".to_string(),
            fragmentation_threshold: threshold,
            rts_cts_threshold: threshold,
        }
    }

    #[test]
    fn test_thresholds_must_disable_fragmentation_and_rts() {
        assert!(spec(999_999).validate().is_ok());
        assert!(spec(1500).validate().is_err());
    }
}
