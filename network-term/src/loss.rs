//! Burst losses on the bottleneck, in the direction carrying the bulk data
//!
//! The model sits on the receive path of the server's bottleneck device, so segments travelling
//! from the access point to the server are impaired while the returning ACKs are not.

use crate::topology::Topology;
use in_memory_network::error_model::{BurstErrorModel, RandomStream};
use in_memory_network::network::Network;

/// Random stream index shared by the burst start and burst size variables
pub const LOSS_MODEL_STREAM: u64 = 100;

pub fn burst_error_model(error_p: f64, seed: u64) -> BurstErrorModel {
    BurstErrorModel::new(error_p, RandomStream::new(seed, LOSS_MODEL_STREAM))
}

pub fn install_loss_model(
    network: &mut Network,
    topology: &Topology,
    error_p: f64,
    seed: u64,
) -> anyhow::Result<()> {
    let model = burst_error_model(error_p, seed);
    tracing::debug!(
        "expected corruption ratio on the bottleneck: {:.4}",
        model.expected_corruption_ratio()
    );
    network.set_receive_error_model(topology.server_bottleneck, Box::new(model))
}
