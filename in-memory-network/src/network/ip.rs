use anyhow::{Context, anyhow, bail};
use std::fmt::{Display, Formatter};
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

/// An IPv4 address together with the prefix length of its network (e.g. `10.0.1.4/24`)
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Ipv4Cidr {
    pub(crate) address: Ipv4Addr,
    pub(crate) network_prefix: u8,
}

impl Ipv4Cidr {
    pub fn new(address: Ipv4Addr, network_prefix: u8) -> anyhow::Result<Self> {
        if network_prefix > 32 {
            bail!("network prefix cannot be higher than 32");
        }

        Ok(Self {
            address,
            network_prefix,
        })
    }

    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    pub fn network_prefix(&self) -> u8 {
        self.network_prefix
    }

    pub fn mask(&self) -> u32 {
        match self.network_prefix {
            0 => 0,
            prefix => u32::MAX << (32 - prefix),
        }
    }

    /// The block this address belongs to, with all host bits cleared
    pub fn network(&self) -> Ipv4Cidr {
        Ipv4Cidr {
            address: Ipv4Addr::from_bits(self.address.to_bits() & self.mask()),
            network_prefix: self.network_prefix,
        }
    }

    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from_bits(self.address.to_bits() | !self.mask())
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        ip.to_bits() & self.mask() == self.address.to_bits() & self.mask()
    }

    pub fn overlaps(&self, other: &Ipv4Cidr) -> bool {
        self.contains(other.network().address) || other.contains(self.network().address)
    }
}

impl Display for Ipv4Cidr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.address, self.network_prefix)
    }
}

impl FromStr for Ipv4Cidr {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('/');
        let base_ip: IpAddr = parts
            .next()
            .ok_or(anyhow!("empty string"))?
            .parse()
            .context("invalid ip address in ip range")?;

        let IpAddr::V4(base_ip) = base_ip else {
            bail!("only IPv4 supported at the moment");
        };

        // A missing network prefix is interpreted as /32 (i.e. singleton ip range)
        let network_prefix: u8 = parts
            .next()
            .unwrap_or("32")
            .parse()
            .context("the provided network prefix is not a valid unsigned integer")?;
        if network_prefix == 0 {
            bail!("network prefix cannot be 0");
        }
        if network_prefix > 32 {
            bail!("network prefix cannot be higher than 32");
        }

        if parts.next().is_some() {
            bail!("ip range contains trailing characters");
        }

        Ok(Self {
            address: base_ip,
            network_prefix,
        })
    }
}

/// Hands out addresses block by block
///
/// Each call to [`AddressAllocator::new_network`] moves on to the next block of the same size;
/// blocks are never handed out twice. Within a block, hosts are numbered from `.1` upwards.
pub struct AddressAllocator {
    network: Ipv4Cidr,
    next_host: u32,
}

impl AddressAllocator {
    pub fn new(base: Ipv4Cidr) -> Self {
        Self {
            network: base.network(),
            next_host: 1,
        }
    }

    /// The block addresses are currently allocated from
    pub fn current_network(&self) -> Ipv4Cidr {
        self.network
    }

    /// Moves on to the next block and returns it
    pub fn new_network(&mut self) -> anyhow::Result<Ipv4Cidr> {
        let block_size = 1u64 << (32 - self.network.network_prefix);
        let next = self.network.address.to_bits() as u64 + block_size;
        if next > u32::MAX as u64 {
            bail!("address space exhausted after {}", self.network);
        }

        self.network = Ipv4Cidr {
            address: Ipv4Addr::from_bits(next as u32),
            network_prefix: self.network.network_prefix,
        };
        self.next_host = 1;
        Ok(self.network)
    }

    /// Allocates the next host address of the current block
    pub fn allocate(&mut self) -> anyhow::Result<Ipv4Cidr> {
        let host_bits = 32 - self.network.network_prefix as u32;
        let max_host = if host_bits >= 2 {
            (1u64 << host_bits) - 2
        } else {
            (1u64 << host_bits) - 1
        };
        if self.next_host as u64 > max_host {
            bail!("no addresses left in {}", self.network);
        }

        let address = Ipv4Addr::from_bits(self.network.address.to_bits() + self.next_host);
        self.next_host += 1;
        Ok(Ipv4Cidr {
            address,
            network_prefix: self.network.network_prefix,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_cidr() {
        let cidr = Ipv4Cidr::from_str("10.0.1.4/24").unwrap();
        assert_eq!(cidr.address(), Ipv4Addr::new(10, 0, 1, 4));
        assert_eq!(cidr.network().to_string(), "10.0.1.0/24");
        assert_eq!(cidr.broadcast(), Ipv4Addr::new(10, 0, 1, 255));
        assert!(cidr.contains(Ipv4Addr::new(10, 0, 1, 200)));
        assert!(!cidr.contains(Ipv4Addr::new(10, 0, 2, 1)));

        assert_eq!(Ipv4Cidr::from_str("1.2.3.4").unwrap().network_prefix(), 32);
        assert!(Ipv4Cidr::from_str("1.2.3.4/0").is_err());
        assert!(Ipv4Cidr::from_str("1.2.3.4/33").is_err());
        assert!(Ipv4Cidr::from_str("1.2.3.4/24/1").is_err());
        assert!(Ipv4Cidr::from_str("::1/64").is_err());
    }

    #[test]
    fn test_blocks_are_sequential_and_disjoint() {
        let mut allocator = AddressAllocator::new("10.0.0.0/24".parse().unwrap());

        let first = allocator.new_network().unwrap();
        let a = allocator.allocate().unwrap();
        let b = allocator.allocate().unwrap();
        let second = allocator.new_network().unwrap();
        let c = allocator.allocate().unwrap();

        assert_eq!(first.to_string(), "10.0.1.0/24");
        assert_eq!(second.to_string(), "10.0.2.0/24");
        assert!(!first.overlaps(&second));

        assert_eq!(a.to_string(), "10.0.1.1/24");
        assert_eq!(b.to_string(), "10.0.1.2/24");
        assert_eq!(c.to_string(), "10.0.2.1/24");
    }

    #[test]
    fn test_block_exhaustion() {
        let mut allocator = AddressAllocator::new("192.168.0.0/30".parse().unwrap());
        assert!(allocator.allocate().is_ok());
        assert!(allocator.allocate().is_ok());
        assert!(allocator.allocate().is_err());
    }
}
