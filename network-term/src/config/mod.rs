use crate::config::cli::CliOpt;
use crate::config::json::{JsonParams, load_params_file};
use crate::congestion::resolve_congestion_control;
use crate::queueing::resolve_queue_disc;
use in_memory_network::network::wifi::phy::WifiMode;
use in_memory_network::queue_disc::QueueDiscKind;
use in_memory_network::sim::SimTime;
use in_memory_network::tcp::TcpConfig;
use in_memory_network::tcp::congestion::CongestionControl;
use in_memory_network::tcp::recovery::RecoveryKind;
use in_memory_network::units::{DataRate, parse_duration};
use std::path::PathBuf;
use std::time::Duration;

pub mod cli;
pub mod json;

/// TCP send and receive buffers of every socket
pub const TCP_BUFFER_SIZE: u32 = 2 * 1024 * 1024;

/// Extra time after the transfer window, so in-flight packets can drain
pub const DRAIN_TIME: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("TypeId {type_id} not found")]
    UnknownCongestionControl { type_id: String },
    #[error("unknown queue disc type `{name}` (expected `FIFO` or `delay-based-AQM`)")]
    UnknownQueueDisc { name: String },
    #[error("invalid data rate for `{key}`: {reason}")]
    InvalidDataRate { key: &'static str, reason: String },
    #[error("invalid time for `{key}`: {reason}")]
    InvalidTime { key: &'static str, reason: String },
    #[error("unknown Wi-Fi mode: {reason}")]
    UnknownWifiMode { reason: String },
    #[error("{reason}")]
    UnknownRecovery { reason: String },
    #[error("error_p must be a probability between 0 and 1, got {value}")]
    ErrorProbability { value: f64 },
    #[error("payloadSize must be positive")]
    ZeroPayloadSize,
    #[error("simulationTime must be a positive number of seconds, got {value}")]
    NonPositiveSimulationTime { value: f64 },
}

/// Parameter values as the user gave them, before validation
#[derive(Clone, Debug, PartialEq)]
pub struct ParameterSet {
    pub payload_size: u32,
    pub data_rate: String,
    pub tcp_variant: String,
    pub phy_rate: String,
    pub pcap: bool,
    pub error_p: f64,
    pub bandwidth: String,
    pub delay: String,
    pub queue_disc_type: String,
    pub sack: bool,
    pub recovery: String,
    pub simulation_time: f64,
    pub max_bytes: u64,
    pub seed: u64,
    pub output_dir: PathBuf,
}

impl Default for ParameterSet {
    fn default() -> Self {
        Self {
            payload_size: 400,
            data_rate: "10Gbps".to_string(),
            tcp_variant: "TcpNewReno".to_string(),
            phy_rate: "HtMcs7".to_string(),
            pcap: false,
            error_p: 0.01,
            bandwidth: "10Gbps".to_string(),
            delay: "1ns".to_string(),
            queue_disc_type: "FIFO".to_string(),
            sack: false,
            recovery: "classic".to_string(),
            simulation_time: 100.0,
            max_bytes: 100_000_000,
            seed: 1,
            output_dir: PathBuf::from("."),
        }
    }
}

impl ParameterSet {
    /// Reads the parameter file named on the command line, if any, and merges it with the
    /// command line options
    pub fn load(cli: &CliOpt) -> anyhow::Result<Self> {
        let file = match &cli.params {
            Some(path) => load_params_file(path)?,
            None => JsonParams::default(),
        };

        Ok(Self::merge(cli, file))
    }

    /// Command line options win over the file, and the file wins over the defaults
    pub fn merge(cli: &CliOpt, file: JsonParams) -> Self {
        let defaults = Self::default();
        let cli = cli.clone();
        Self {
            payload_size: cli
                .payload_size
                .or(file.payload_size)
                .unwrap_or(defaults.payload_size),
            data_rate: cli
                .data_rate
                .or(file.data_rate)
                .unwrap_or(defaults.data_rate),
            tcp_variant: cli
                .tcp_variant
                .or(file.tcp_variant)
                .unwrap_or(defaults.tcp_variant),
            phy_rate: cli.phy_rate.or(file.phy_rate).unwrap_or(defaults.phy_rate),
            pcap: cli.pcap.or(file.pcap).unwrap_or(defaults.pcap),
            error_p: cli.error_p.or(file.error_p).unwrap_or(defaults.error_p),
            bandwidth: cli
                .bandwidth
                .or(file.bandwidth)
                .unwrap_or(defaults.bandwidth),
            delay: cli.delay.or(file.delay).unwrap_or(defaults.delay),
            queue_disc_type: cli
                .queue_disc_type
                .or(file.queue_disc_type)
                .unwrap_or(defaults.queue_disc_type),
            sack: cli.sack.or(file.sack).unwrap_or(defaults.sack),
            recovery: cli.recovery.or(file.recovery).unwrap_or(defaults.recovery),
            simulation_time: cli
                .simulation_time
                .or(file.simulation_time)
                .unwrap_or(defaults.simulation_time),
            max_bytes: cli
                .max_bytes
                .or(file.max_bytes)
                .unwrap_or(defaults.max_bytes),
            seed: cli.seed.or(file.seed).unwrap_or(defaults.seed),
            output_dir: cli
                .output_dir
                .or(file.output_dir)
                .unwrap_or(defaults.output_dir),
        }
    }
}

/// Validated, strongly typed scenario settings
#[derive(Clone, Debug)]
pub struct ScenarioConfig {
    pub payload_size: u32,
    pub data_rate: DataRate,
    pub congestion_control: CongestionControl,
    pub phy_rate: WifiMode,
    pub pcap: bool,
    pub error_p: f64,
    pub bandwidth: DataRate,
    pub delay: Duration,
    pub queue_disc: QueueDiscKind,
    pub sack: bool,
    pub recovery: RecoveryKind,
    pub simulation_time: Duration,
    pub max_bytes: u64,
    pub seed: u64,
    pub output_dir: PathBuf,
}

impl ScenarioConfig {
    /// Checks every parameter, without touching the network
    pub fn validate(params: &ParameterSet) -> Result<Self, ConfigError> {
        if params.payload_size == 0 {
            return Err(ConfigError::ZeroPayloadSize);
        }
        if !(0.0..=1.0).contains(&params.error_p) {
            return Err(ConfigError::ErrorProbability {
                value: params.error_p,
            });
        }

        let simulation_time = Duration::try_from_secs_f64(params.simulation_time)
            .ok()
            .filter(|d| !d.is_zero())
            .ok_or(ConfigError::NonPositiveSimulationTime {
                value: params.simulation_time,
            })?;

        Ok(Self {
            payload_size: params.payload_size,
            data_rate: parse_data_rate("dataRate", &params.data_rate)?,
            congestion_control: resolve_congestion_control(&params.tcp_variant)?,
            phy_rate: params
                .phy_rate
                .parse()
                .map_err(|e| ConfigError::UnknownWifiMode {
                    reason: format!("{e:#}"),
                })?,
            pcap: params.pcap,
            error_p: params.error_p,
            bandwidth: parse_data_rate("bandwidth", &params.bandwidth)?,
            delay: parse_duration(&params.delay).map_err(|e| ConfigError::InvalidTime {
                key: "delay",
                reason: format!("{e:#}"),
            })?,
            queue_disc: resolve_queue_disc(&params.queue_disc_type)?,
            sack: params.sack,
            recovery: params
                .recovery
                .parse()
                .map_err(|e| ConfigError::UnknownRecovery {
                    reason: format!("{e:#}"),
                })?,
            simulation_time,
            max_bytes: params.max_bytes,
            seed: params.seed,
            output_dir: params.output_dir.clone(),
        })
    }

    pub fn tcp_config(&self) -> TcpConfig {
        TcpConfig {
            congestion_control: self.congestion_control,
            recovery: self.recovery,
            segment_size: self.payload_size,
            send_buffer_size: TCP_BUFFER_SIZE,
            receive_buffer_size: TCP_BUFFER_SIZE,
            sack: self.sack,
            ..TcpConfig::default()
        }
    }

    /// When the run ends
    pub fn stop_time(&self) -> SimTime {
        SimTime::ZERO + self.simulation_time + DRAIN_TIME
    }
}

fn parse_data_rate(key: &'static str, value: &str) -> Result<DataRate, ConfigError> {
    let rate: DataRate = value.parse().map_err(|e| ConfigError::InvalidDataRate {
        key,
        reason: format!("{e:#}"),
    })?;

    if rate.bps() == 0 {
        return Err(ConfigError::InvalidDataRate {
            key,
            reason: format!("`{value}` is not a positive rate"),
        });
    }

    Ok(rate)
}
