use anyhow::Context;
use serde::Deserialize;
use serde_with::{DisplayFromStr, PickFirst, serde_as};
use std::fs;
use std::path::{Path, PathBuf};

/// Parameter values read from a JSON file, keyed like the command line options
///
/// Numbers and booleans may also be given as strings (e.g. `"payloadSize": "1000"`).
#[serde_as]
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct JsonParams {
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub payload_size: Option<u32>,
    pub data_rate: Option<String>,
    pub tcp_variant: Option<String>,
    pub phy_rate: Option<String>,
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub pcap: Option<bool>,
    #[serde(rename = "error_p")]
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub error_p: Option<f64>,
    pub bandwidth: Option<String>,
    pub delay: Option<String>,
    #[serde(rename = "queue_disc_type")]
    pub queue_disc_type: Option<String>,
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub sack: Option<bool>,
    pub recovery: Option<String>,
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub simulation_time: Option<f64>,
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub max_bytes: Option<u64>,
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub seed: Option<u64>,
    pub output_dir: Option<PathBuf>,
}

pub fn load_params_file(path: &Path) -> anyhow::Result<JsonParams> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("failed to read parameter file at {}", path.display()))?;
    serde_json::from_str(&json)
        .with_context(|| format!("invalid JSON in parameter file at {}", path.display()))
}
