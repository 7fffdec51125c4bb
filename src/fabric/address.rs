use crate::topology::NodeId;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("netmask {0} is not contiguous")]
    InvalidMask(Ipv4Addr),

    #[error("{network} has host bits set for mask {mask}")]
    NotNetworkAddress { network: Ipv4Addr, mask: Ipv4Addr },

    #[error("address block {network}/{mask} is exhausted")]
    Exhausted { network: Ipv4Addr, mask: Ipv4Addr },
}

/// Hands out host addresses of one IPv4 block in ascending order,
/// starting at the first host (network + 1).
#[derive(Debug, Clone)]
pub struct AddressBlock {
    network: u32,
    mask: u32,
    next_host: u32,
}

impl AddressBlock {
    pub fn new(network: Ipv4Addr, mask: Ipv4Addr) -> Result<Self, AddressError> {
        let net = u32::from(network);
        let m = u32::from(mask);

        // Contiguous masks are all ones followed by all zeros.
        if m.leading_ones() + m.trailing_zeros() != 32 {
            return Err(AddressError::InvalidMask(mask));
        }
        if net & !m != 0 {
            return Err(AddressError::NotNetworkAddress { network, mask });
        }

        Ok(Self {
            network: net,
            mask: m,
            next_host: 1,
        })
    }

    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.network)
    }

    pub fn mask(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.mask)
    }

    // without network and broadcast
    pub fn capacity(&self) -> u32 {
        (!self.mask).saturating_sub(1)
    }

    pub fn allocate(&mut self) -> Result<Ipv4Addr, AddressError> {
        if self.next_host > self.capacity() {
            return Err(AddressError::Exhausted {
                network: self.network(),
                mask: self.mask(),
            });
        }
        let address = Ipv4Addr::from(self.network | self.next_host);
        self.next_host += 1;
        Ok(address)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceAddress {
    pub node: NodeId,
    pub address: Ipv4Addr,
    pub netmask: Ipv4Addr,
}
