//! Networking primitives for cluster segment allocation.
//!
//! This library provides helpers for:
//! - CIDR segments (IPv4 and IPv6) with normalization and containment
//! - VLAN id validation
//! - Deterministic subnet pools used to carve fixed-size segments from a base

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::ops::RangeInclusive;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Networking errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    /// Invalid IP address.
    #[error("invalid IP address: {0}")]
    InvalidAddress(String),

    /// Invalid CIDR prefix.
    #[error("invalid CIDR prefix: {0}")]
    InvalidPrefix(String),

    /// Subnet pool exhausted.
    #[error("subnet pool exhausted: {0}")]
    PoolExhausted(String),

    /// VLAN id outside the 802.1Q range.
    #[error("invalid VLAN id: {value} (must be between {min} and {max})")]
    InvalidVlan { value: i64, min: u16, max: u16 },
}

// ============================================================================
// Segments
// ============================================================================

/// A network segment in CIDR notation.
///
/// The stored address is always the network address (host bits cleared).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Segment {
    address: IpAddr,
    prefix_len: u8,
}

impl Segment {
    /// Create a new segment, masking the address to the prefix.
    pub fn new(address: IpAddr, prefix_len: u8) -> Result<Self, NetworkError> {
        let max = max_prefix_len(&address);
        if prefix_len > max {
            return Err(NetworkError::InvalidPrefix(format!(
                "prefix length {} exceeds {}",
                prefix_len, max
            )));
        }

        Ok(Self {
            address: mask(address, prefix_len),
            prefix_len,
        })
    }

    /// Parse from CIDR notation (e.g., "192.168.110.0/24").
    pub fn from_cidr(s: &str) -> Result<Self, NetworkError> {
        let s = s.trim();
        let Some((addr_str, prefix_str)) = s.split_once('/') else {
            return Err(NetworkError::InvalidPrefix(format!(
                "missing '/' in CIDR: {}",
                s
            )));
        };

        let address = IpAddr::from_str(addr_str)
            .map_err(|_| NetworkError::InvalidAddress(addr_str.to_string()))?;

        let prefix_len = prefix_str
            .parse::<u8>()
            .map_err(|_| NetworkError::InvalidPrefix(prefix_str.to_string()))?;

        Self::new(address, prefix_len)
    }

    /// Network address of the segment.
    pub fn address(&self) -> IpAddr {
        self.address
    }

    /// Prefix length (e.g., 24 for /24).
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Check if an address is within this segment.
    pub fn contains(&self, addr: IpAddr) -> bool {
        if addr.is_ipv4() != self.address.is_ipv4() {
            return false;
        }
        mask(addr, self.prefix_len) == self.address
    }

    /// Number of addresses in this segment, saturating at `u128::MAX`.
    pub fn size(&self) -> u128 {
        let host_bits = u32::from(max_prefix_len(&self.address) - self.prefix_len);
        1u128.checked_shl(host_bits).unwrap_or(u128::MAX)
    }
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

impl FromStr for Segment {
    type Err = NetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_cidr(s)
    }
}

impl TryFrom<String> for Segment {
    type Error = NetworkError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_cidr(&value)
    }
}

impl From<Segment> for String {
    fn from(segment: Segment) -> Self {
        segment.to_string()
    }
}

fn max_prefix_len(addr: &IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

fn ip_to_u128(addr: IpAddr) -> u128 {
    match addr {
        IpAddr::V4(v4) => u128::from(u32::from(v4)),
        IpAddr::V6(v6) => u128::from(v6),
    }
}

fn u128_to_ip(bits: u128, v6: bool) -> IpAddr {
    if v6 {
        IpAddr::V6(Ipv6Addr::from(bits))
    } else {
        IpAddr::V4(Ipv4Addr::from(bits as u32))
    }
}

/// Mask an address to a prefix length.
fn mask(addr: IpAddr, prefix_len: u8) -> IpAddr {
    let width = u32::from(max_prefix_len(&addr));
    let bits = ip_to_u128(addr);
    let host_bits = width - u32::from(prefix_len).min(width);
    let mask = if host_bits >= 128 {
        0
    } else {
        u128::MAX << host_bits
    };
    u128_to_ip(bits & mask, addr.is_ipv6())
}

// ============================================================================
// VLAN ids
// ============================================================================

/// Lowest usable VLAN id.
pub const VLAN_ID_MIN: u16 = 1;

/// Highest usable VLAN id (4095 is reserved).
pub const VLAN_ID_MAX: u16 = 4094;

/// An 802.1Q VLAN id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u16")]
pub struct VlanId(u16);

impl VlanId {
    /// Validate a raw VLAN id.
    pub fn new(value: i64) -> Result<Self, NetworkError> {
        if value < i64::from(VLAN_ID_MIN) || value > i64::from(VLAN_ID_MAX) {
            return Err(NetworkError::InvalidVlan {
                value,
                min: VLAN_ID_MIN,
                max: VLAN_ID_MAX,
            });
        }
        Ok(Self(value as u16))
    }

    /// Map a seed into a bounded VLAN id range.
    pub fn from_seed(seed: u64, range: RangeInclusive<u16>) -> Result<Self, NetworkError> {
        let (start, end) = (*range.start(), *range.end());
        if start > end {
            return Err(NetworkError::InvalidVlan {
                value: i64::from(start),
                min: VLAN_ID_MIN,
                max: VLAN_ID_MAX,
            });
        }
        let span = u64::from(end - start) + 1;
        Self::new(i64::from(start) + (seed % span) as i64)
    }

    /// Raw value.
    pub fn get(&self) -> u16 {
        self.0
    }
}

impl std::fmt::Display for VlanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<i64> for VlanId {
    type Error = NetworkError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<VlanId> for u16 {
    fn from(id: VlanId) -> Self {
        id.0
    }
}

// ============================================================================
// Subnet pools
// ============================================================================

/// A pool of equally sized subnets carved out of a base segment.
///
/// Subnets are addressed by index, so the same index always yields the same
/// subnet.
#[derive(Debug, Clone)]
pub struct SubnetPool {
    /// Segment to carve from.
    base: Segment,

    /// Prefix length of each subnet.
    subnet_len: u8,
}

impl SubnetPool {
    /// Create a pool of `/subnet_len` subnets within `base`.
    pub fn new(base: Segment, subnet_len: u8) -> Result<Self, NetworkError> {
        let max = max_prefix_len(&base.address);
        if subnet_len < base.prefix_len || subnet_len > max {
            return Err(NetworkError::InvalidPrefix(format!(
                "subnet length /{} does not fit in {}",
                subnet_len, base
            )));
        }
        Ok(Self { base, subnet_len })
    }

    /// Number of subnets in the pool, saturating at `u128::MAX`.
    pub fn len(&self) -> u128 {
        let bits = u32::from(self.subnet_len - self.base.prefix_len);
        1u128.checked_shl(bits).unwrap_or(u128::MAX)
    }

    /// A pool always holds at least one subnet.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Get the subnet at `index`.
    pub fn nth(&self, index: u128) -> Result<Segment, NetworkError> {
        if index >= self.len() {
            return Err(NetworkError::PoolExhausted(format!(
                "index {} out of {} subnets in {}",
                index,
                self.len(),
                self.base
            )));
        }

        let host_bits = u32::from(max_prefix_len(&self.base.address) - self.subnet_len);
        let offset = index.checked_shl(host_bits).unwrap_or(0);
        let addr = ip_to_u128(self.base.address) + offset;
        Segment::new(u128_to_ip(addr, self.base.address.is_ipv6()), self.subnet_len)
    }

    /// Get the subnet selected by a seed, wrapping around the pool.
    pub fn pick(&self, seed: u64) -> Segment {
        let index = u128::from(seed) % self.len();
        // index < len, so nth cannot fail
        self.nth(index).unwrap_or(self.base)
    }

    /// The base segment.
    pub fn base(&self) -> &Segment {
        &self.base
    }
}
