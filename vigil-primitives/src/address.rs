//! On-chain identifier types.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};

use crate::MonitorError;

/// 20-byte address of an agent contract observed by the control plane.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentAddress(Address);

impl AgentAddress {
    /// Wraps an existing address.
    #[must_use]
    pub const fn from_inner(address: Address) -> Self {
        Self(address)
    }

    /// Returns the underlying address.
    #[must_use]
    pub const fn into_inner(self) -> Address {
        self.0
    }

    /// Returns the address as its raw byte slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_slice()
    }

    /// Renders the address as lowercase `0x…` hex, suitable for map keys and
    /// report identifiers.
    #[must_use]
    pub fn to_lowercase_hex(&self) -> String {
        format!("{:#x}", self.0)
    }
}

impl Display for AgentAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl From<Address> for AgentAddress {
    fn from(value: Address) -> Self {
        Self(value)
    }
}

impl From<AgentAddress> for Address {
    fn from(value: AgentAddress) -> Self {
        value.0
    }
}

impl FromStr for AgentAddress {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let address = s
            .parse::<Address>()
            .map_err(|err| MonitorError::invalid_input(format!("invalid agent address `{s}`: {err}")))?;
        Ok(Self(address))
    }
}

/// Opaque 32-byte reference to an agent's genome artifact.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenomeRef(B256);

impl GenomeRef {
    /// Wraps an existing 32-byte value.
    #[must_use]
    pub const fn from_inner(value: B256) -> Self {
        Self(value)
    }

    /// Returns the underlying 32-byte value.
    #[must_use]
    pub const fn into_inner(self) -> B256 {
        self.0
    }
}

impl Display for GenomeRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl From<B256> for GenomeRef {
    fn from(value: B256) -> Self {
        Self(value)
    }
}

/// Opaque 32-byte reference to the decision artifact recorded alongside a
/// heartbeat.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DecisionRef(B256);

impl DecisionRef {
    /// Wraps an existing 32-byte value.
    #[must_use]
    pub const fn from_inner(value: B256) -> Self {
        Self(value)
    }

    /// Returns the underlying 32-byte value.
    #[must_use]
    pub const fn into_inner(self) -> B256 {
        self.0
    }

    /// Returns `true` when the reference is all zeroes (no decision recorded).
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == B256::ZERO
    }
}

impl Display for DecisionRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl From<B256> for DecisionRef {
    fn from(value: B256) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_agent_address() {
        let addr: AgentAddress = "0x00000000000000000000000000000000deadbeef"
            .parse()
            .expect("parse");
        let rendered = addr.to_lowercase_hex();
        assert_eq!(rendered, "0x00000000000000000000000000000000deadbeef");
        let reparsed: AgentAddress = rendered.parse().expect("reparse");
        assert_eq!(addr, reparsed);
    }

    #[test]
    fn rejects_malformed_address() {
        let err = "0x1234".parse::<AgentAddress>().expect_err("too short");
        assert!(matches!(err, MonitorError::InvalidInput { .. }));
    }

    #[test]
    fn zero_decision_ref_detected() {
        assert!(DecisionRef::default().is_zero());
    }
}
