use crate::network::ip::Ipv4Cidr;
use crate::network::{ChannelId, DeviceId, NodeId};
use std::collections::VecDeque;
use std::net::Ipv4Addr;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Route {
    pub destination: Ipv4Cidr,
    /// The next router on the path, or `None` if the destination is on the same link
    pub gateway: Option<Ipv4Addr>,
    pub device: DeviceId,
}

impl Route {
    pub(crate) fn next_hop_towards_destination(&self, ip: Ipv4Addr) -> Option<Ipv4Addr> {
        if self.destination.contains(ip) {
            Some(self.gateway.unwrap_or(ip))
        } else {
            None
        }
    }
}

/// The routes of a single node, consulted with longest-prefix matching
#[derive(Clone, Debug, Default)]
pub struct RoutingTable {
    routes: Vec<Route>,
}

impl RoutingTable {
    pub fn add(&mut self, route: Route) {
        self.routes.push(route);
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Returns the outgoing device and next hop for `destination`
    pub fn lookup(&self, destination: Ipv4Addr) -> Option<(DeviceId, Ipv4Addr)> {
        let mut best: Option<&Route> = None;
        for route in &self.routes {
            if !route.destination.contains(destination) {
                continue;
            }

            // Earlier routes win ties
            let better = match best {
                Some(current) => {
                    route.destination.network_prefix() > current.destination.network_prefix()
                }
                None => true,
            };
            if better {
                best = Some(route);
            }
        }

        let route = best?;
        let next_hop = route.next_hop_towards_destination(destination)?;
        Some((route.device, next_hop))
    }
}

/// A network interface as seen by route computation
#[derive(Clone, Debug)]
pub(crate) struct Attachment {
    pub node: NodeId,
    pub device: DeviceId,
    pub channel: ChannelId,
    pub address: Ipv4Cidr,
}

/// Computes the routing table of every node, assuming every hop has the same cost
///
/// Each node gets a directly connected route for the network of each of its interfaces, plus a
/// host route for every remote address that is not on one of those networks. Paths are found with
/// a breadth-first search in which nodes are adjacent when they share a channel.
pub(crate) fn compute_routing_tables(
    node_count: usize,
    attachments: &[Attachment],
) -> Vec<RoutingTable> {
    let mut tables = vec![RoutingTable::default(); node_count];

    for source in 0..node_count {
        let table = &mut tables[source];
        let local: Vec<_> = attachments.iter().filter(|a| a.node == source).collect();

        for attachment in &local {
            let network = attachment.address.network();
            if table.routes.iter().any(|r| r.destination == network) {
                continue;
            }

            table.add(Route {
                destination: network,
                gateway: None,
                device: attachment.device,
            });
        }

        let first_hops = shortest_path_first_hops(source, node_count, attachments);
        for remote in attachments.iter().filter(|a| a.node != source) {
            if local
                .iter()
                .any(|l| l.address.network().contains(remote.address.address()))
            {
                continue;
            }

            let Some(Some(first_hop)) = first_hops.get(remote.node) else {
                continue;
            };

            table.add(Route {
                destination: Ipv4Cidr {
                    address: remote.address.address(),
                    network_prefix: 32,
                },
                gateway: Some(first_hop.gateway),
                device: first_hop.device,
            });
        }
    }

    tables
}

#[derive(Copy, Clone, Debug)]
struct FirstHop {
    device: DeviceId,
    gateway: Ipv4Addr,
}

fn shortest_path_first_hops(
    source: NodeId,
    node_count: usize,
    attachments: &[Attachment],
) -> Vec<Option<FirstHop>> {
    let mut first_hops: Vec<Option<FirstHop>> = vec![None; node_count];
    let mut visited = vec![false; node_count];
    let mut queue = VecDeque::new();

    visited[source] = true;
    queue.push_back(source);

    while let Some(node) = queue.pop_front() {
        for outgoing in attachments.iter().filter(|a| a.node == node) {
            for neighbor in attachments
                .iter()
                .filter(|a| a.channel == outgoing.channel && a.node != node)
            {
                if visited[neighbor.node] {
                    continue;
                }

                visited[neighbor.node] = true;
                first_hops[neighbor.node] = if node == source {
                    Some(FirstHop {
                        device: outgoing.device,
                        gateway: neighbor.address.address(),
                    })
                } else {
                    first_hops[node]
                };
                queue.push_back(neighbor.node);
            }
        }
    }

    first_hops
}

#[cfg(test)]
mod test {
    use super::*;

    fn attachment(node: NodeId, device: DeviceId, channel: ChannelId, cidr: &str) -> Attachment {
        Attachment {
            node,
            device,
            channel,
            address: cidr.parse().unwrap(),
        }
    }

    #[test]
    fn test_routes_through_intermediate_node() {
        // 0 --(channel 0)-- 1 --(channel 1)-- 2
        let attachments = [
            attachment(0, 0, 0, "10.0.1.1/24"),
            attachment(1, 1, 0, "10.0.1.2/24"),
            attachment(1, 2, 1, "10.0.2.1/24"),
            attachment(2, 3, 1, "10.0.2.2/24"),
        ];

        let tables = compute_routing_tables(3, &attachments);

        // Directly connected
        assert_eq!(
            tables[0].lookup(Ipv4Addr::new(10, 0, 1, 2)),
            Some((0, Ipv4Addr::new(10, 0, 1, 2)))
        );

        // Through the middle node
        assert_eq!(
            tables[0].lookup(Ipv4Addr::new(10, 0, 2, 2)),
            Some((0, Ipv4Addr::new(10, 0, 1, 2)))
        );
        assert_eq!(
            tables[2].lookup(Ipv4Addr::new(10, 0, 1, 1)),
            Some((3, Ipv4Addr::new(10, 0, 2, 1)))
        );

        // The middle node reaches both sides directly
        assert_eq!(
            tables[1].lookup(Ipv4Addr::new(10, 0, 2, 2)),
            Some((2, Ipv4Addr::new(10, 0, 2, 2)))
        );

        // Unknown destination
        assert_eq!(tables[0].lookup(Ipv4Addr::new(192, 168, 0, 1)), None);
    }

    #[test]
    fn test_longest_prefix_wins() {
        let mut table = RoutingTable::default();
        table.add(Route {
            destination: "10.0.0.0/8".parse().unwrap(),
            gateway: Some(Ipv4Addr::new(10, 0, 0, 1)),
            device: 0,
        });
        table.add(Route {
            destination: "10.0.2.0/24".parse().unwrap(),
            gateway: None,
            device: 1,
        });

        assert_eq!(
            table.lookup(Ipv4Addr::new(10, 0, 2, 7)),
            Some((1, Ipv4Addr::new(10, 0, 2, 7)))
        );
        assert_eq!(
            table.lookup(Ipv4Addr::new(10, 5, 0, 1)),
            Some((0, Ipv4Addr::new(10, 0, 0, 1)))
        );
    }

    #[test]
    fn test_disconnected_nodes_have_no_route() {
        let attachments = [
            attachment(0, 0, 0, "10.0.1.1/24"),
            attachment(1, 1, 1, "10.0.2.1/24"),
        ];

        let tables = compute_routing_tables(2, &attachments);
        assert_eq!(tables[0].lookup(Ipv4Addr::new(10, 0, 2, 1)), None);
    }
}
