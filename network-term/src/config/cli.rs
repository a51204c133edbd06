use clap::Parser;
use std::path::PathBuf;

/// A wireless cell bridged through a lossy bottleneck link to a wired server, carrying one bulk
/// TCP transfer
///
/// Every option can also be set in the JSON file passed with `--params`, under the same key.
/// Options given on the command line win over the file.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "network-term")]
pub struct CliOpt {
    /// Path to a JSON file with parameter values
    #[arg(long)]
    pub params: Option<PathBuf>,

    /// TCP segment size, in bytes [default: 400]
    #[arg(long = "payloadSize")]
    pub payload_size: Option<u32>,

    /// Application data rate (informational) [default: 10Gbps]
    #[arg(long = "dataRate")]
    pub data_rate: Option<String>,

    /// Congestion control algorithm, e.g. TcpNewReno or TcpWestwoodPlus [default: TcpNewReno]
    #[arg(long = "tcpVariant")]
    pub tcp_variant: Option<String>,

    /// Wi-Fi data mode, e.g. HtMcs7 [default: HtMcs7]
    #[arg(long = "phyRate")]
    pub phy_rate: Option<String>,

    /// Whether to write a packet capture per device [default: false]
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    pub pcap: Option<bool>,

    /// Burst rate of the error model on the bottleneck link [default: 0.01]
    #[arg(long = "error_p")]
    pub error_p: Option<f64>,

    /// Data rate of the bottleneck link [default: 10Gbps]
    #[arg(long)]
    pub bandwidth: Option<String>,

    /// Propagation delay of the bottleneck link [default: 1ns]
    #[arg(long)]
    pub delay: Option<String>,

    /// Queue disc on the bottleneck link: FIFO or delay-based-AQM [default: FIFO]
    #[arg(long = "queue_disc_type")]
    pub queue_disc_type: Option<String>,

    /// Whether TCP offers selective acknowledgements [default: false]
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    pub sack: Option<bool>,

    /// Loss recovery algorithm: classic or prr [default: classic]
    #[arg(long)]
    pub recovery: Option<String>,

    /// Simulated duration of the transfer, in seconds [default: 100]
    #[arg(long = "simulationTime")]
    pub simulation_time: Option<f64>,

    /// Bytes the bulk sender writes before closing the connection; 0 means no limit
    /// [default: 100000000]
    #[arg(long = "maxBytes")]
    pub max_bytes: Option<u64>,

    /// Seed of every random stream in the simulation [default: 1]
    #[arg(long)]
    pub seed: Option<u64>,

    /// Directory for the flow statistics and packet captures [default: .]
    #[arg(long = "outputDir")]
    pub output_dir: Option<PathBuf>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_camel_case_keys() {
        let opt = CliOpt::try_parse_from([
            "network-term",
            "--payloadSize",
            "1000",
            "--tcpVariant=TcpVegas",
            "--error_p",
            "0.05",
            "--queue_disc_type",
            "delay-based-AQM",
            "--simulationTime=10",
            "--pcap",
        ])
        .unwrap();

        assert_eq!(opt.payload_size, Some(1000));
        assert_eq!(opt.tcp_variant.as_deref(), Some("TcpVegas"));
        assert_eq!(opt.error_p, Some(0.05));
        assert_eq!(opt.queue_disc_type.as_deref(), Some("delay-based-AQM"));
        assert_eq!(opt.simulation_time, Some(10.0));
        assert_eq!(opt.pcap, Some(true));
        assert_eq!(opt.sack, None);
    }

    #[test]
    fn test_explicit_bool_values() {
        let opt = CliOpt::try_parse_from(["network-term", "--sack=false", "--pcap", "true"]).unwrap();
        assert_eq!(opt.sack, Some(false));
        assert_eq!(opt.pcap, Some(true));
    }
}
