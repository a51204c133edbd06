//! Root queue discs of the two link segments

use crate::config::ConfigError;
use crate::topology::Topology;
use in_memory_network::network::Network;
use in_memory_network::queue_disc::QueueDiscKind;

pub const FIFO: &str = "FIFO";
pub const DELAY_BASED_AQM: &str = "delay-based-AQM";

pub fn resolve_queue_disc(name: &str) -> Result<QueueDiscKind, ConfigError> {
    match name {
        FIFO => Ok(QueueDiscKind::PfifoFast),
        DELAY_BASED_AQM => Ok(QueueDiscKind::CoDel),
        _ => Err(ConfigError::UnknownQueueDisc {
            name: name.to_string(),
        }),
    }
}

/// FIFO on the Wi-Fi devices, `bottleneck` on both ends of the bottleneck link
///
/// Must run before addresses are assigned, which would otherwise install the default disc.
pub fn install_queue_discs(
    network: &mut Network,
    topology: &Topology,
    bottleneck: QueueDiscKind,
) -> anyhow::Result<()> {
    for device in topology.wifi_devices() {
        network.install_queue_disc(device, QueueDiscKind::PfifoFast)?;
    }
    for device in topology.bottleneck_devices() {
        network.install_queue_disc(device, bottleneck)?;
    }

    tracing::debug!("installed {bottleneck} on the bottleneck link");
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::{ParameterSet, ScenarioConfig};

    #[test]
    fn test_names() {
        assert_eq!(resolve_queue_disc("FIFO").unwrap(), QueueDiscKind::PfifoFast);
        assert_eq!(
            resolve_queue_disc("delay-based-AQM").unwrap(),
            QueueDiscKind::CoDel
        );
        assert!(matches!(
            resolve_queue_disc("fifo"),
            Err(ConfigError::UnknownQueueDisc { .. })
        ));
    }

    #[test]
    fn test_aqm_only_on_the_bottleneck() {
        let config = ScenarioConfig::validate(&ParameterSet {
            queue_disc_type: DELAY_BASED_AQM.to_string(),
            ..ParameterSet::default()
        })
        .unwrap();
        let (mut network, topology) = Topology::build_network(&config).unwrap();
        install_queue_discs(&mut network, &topology, config.queue_disc).unwrap();

        for device in topology.wifi_devices() {
            assert_eq!(
                network.queue_disc_kind(device),
                Some(QueueDiscKind::PfifoFast)
            );
        }
        for device in topology.bottleneck_devices() {
            assert_eq!(network.queue_disc_kind(device), Some(QueueDiscKind::CoDel));
        }

        // A device refuses a second root queue disc
        assert!(install_queue_discs(&mut network, &topology, config.queue_disc).is_err());
    }
}
