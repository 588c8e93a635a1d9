//! Error types raised by table mutation and dispatch.
//!
//! Per the core's error policy, these are the only two places errors
//! surface outside of the datagram codec: originating a malformed
//! Datagram is a programming bug and propagates; conflicting or
//! already-set table state is logged and the offending call is a no-op.

use core::fmt;

/// `Router::route` was asked to originate a Datagram that violates the
/// contract for originated Datagrams (hop count must be zero, destination
/// network must be nonzero). This is a bug in the caller, not a condition
/// that can arise from untrusted wire data, so it propagates rather than
/// being swallowed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    NonZeroHopCount { hop_count: u8 },
    ZeroDestinationNetwork,
}

impl fmt::Display for RouteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonZeroHopCount { hop_count } => write!(
                f,
                "originated datagrams must have hop count 0, got {hop_count}"
            ),
            Self::ZeroDestinationNetwork => {
                write!(f, "originated datagrams must have a nonzero destination network")
            }
        }
    }
}

impl std::error::Error for RouteError {}

/// A [`crate::zone_table::ZoneInformationTable`] mutation described a
/// network range that conflicts with one already on file: the start
/// matches but the end doesn't, or the proposed range overlaps an
/// unrelated existing one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZoneTableError {
    RangeConflict {
        network_min: u16,
        network_max: u16,
        existing_min: u16,
        existing_max: u16,
    },
    BackwardsRange {
        network_min: u16,
        network_max: u16,
    },
    UnknownRange {
        network_min: u16,
    },
}

impl fmt::Display for ZoneTableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RangeConflict {
                network_min,
                network_max,
                existing_min,
                existing_max,
            } => write!(
                f,
                "network range {network_min}-{network_max} overlaps {existing_min}-{existing_max}"
            ),
            Self::BackwardsRange {
                network_min,
                network_max,
            } => write!(f, "range {network_min}-{network_max} is backwards"),
            Self::UnknownRange { network_min } => {
                write!(f, "network range {network_min}-? does not exist")
            }
        }
    }
}

impl std::error::Error for ZoneTableError {}

/// `Port::set_network_range` was called on a port that already has a
/// range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortRangeError {
    pub network_min: u16,
    pub network_max: u16,
}

impl fmt::Display for PortRangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "port already has network range {}-{} set",
            self.network_min, self.network_max
        )
    }
}

impl std::error::Error for PortRangeError {}
