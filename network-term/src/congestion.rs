//! Maps user-facing congestion control names to registered TCP algorithms

use crate::config::ConfigError;
use in_memory_network::tcp::congestion::{
    CongestionAlgorithm, CongestionControl, ProtocolType, TYPE_ID_NAMESPACE,
};

/// Names that select a registered algorithm together with one of its sub-modes
const ALIASES: [(&str, CongestionAlgorithm, ProtocolType); 1] = [(
    "TcpWestwoodPlus",
    CongestionAlgorithm::Westwood,
    ProtocolType::WestwoodPlus,
)];

/// Qualifies the name with the `transport::` namespace, unless it already carries it
pub fn qualified_type_id(name: &str) -> String {
    if name.starts_with(TYPE_ID_NAMESPACE) {
        name.to_string()
    } else {
        format!("{TYPE_ID_NAMESPACE}{name}")
    }
}

/// Every accepted type id and the congestion control it selects
pub fn mapping_table() -> impl Iterator<Item = (String, CongestionControl)> {
    let registered = CongestionAlgorithm::ALL
        .into_iter()
        .map(|algorithm| (algorithm.type_id(), CongestionControl::new(algorithm)));
    let aliases = ALIASES
        .into_iter()
        .map(|(name, algorithm, protocol_type)| {
            (
                qualified_type_id(name),
                CongestionControl {
                    algorithm,
                    protocol_type: Some(protocol_type),
                },
            )
        });

    registered.chain(aliases)
}

pub fn resolve_congestion_control(name: &str) -> Result<CongestionControl, ConfigError> {
    let type_id = qualified_type_id(name);
    mapping_table()
        .find(|(id, _)| *id == type_id)
        .map(|(_, cc)| cc)
        .ok_or(ConfigError::UnknownCongestionControl { type_id })
}
