//! Topology assembly phases.

use serde::{Deserialize, Serialize};

/// Phase of a topology assembly pass.
///
/// Phases advance strictly in declaration order; each transition constructs
/// the resources belonging to the phase it enters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Empty,
    ComputeBound,
    GatewayBound,
    OriginBound,
    AccessControlled,
    Distributed,
    DomainBound,
    Finalized,
}

impl Phase {
    /// The phase a transition out of `self` enters, or `None` once finalized.
    pub fn next(self) -> Option<Phase> {
        match self {
            Phase::Empty => Some(Phase::ComputeBound),
            Phase::ComputeBound => Some(Phase::GatewayBound),
            Phase::GatewayBound => Some(Phase::OriginBound),
            Phase::OriginBound => Some(Phase::AccessControlled),
            Phase::AccessControlled => Some(Phase::Distributed),
            Phase::Distributed => Some(Phase::DomainBound),
            Phase::DomainBound => Some(Phase::Finalized),
            Phase::Finalized => None,
        }
    }

    /// The phase that must be current before `self` can be entered.
    pub fn predecessor(self) -> Option<Phase> {
        match self {
            Phase::Empty => None,
            Phase::ComputeBound => Some(Phase::Empty),
            Phase::GatewayBound => Some(Phase::ComputeBound),
            Phase::OriginBound => Some(Phase::GatewayBound),
            Phase::AccessControlled => Some(Phase::OriginBound),
            Phase::Distributed => Some(Phase::AccessControlled),
            Phase::DomainBound => Some(Phase::Distributed),
            Phase::Finalized => Some(Phase::DomainBound),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Finalized)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Empty => write!(f, "EMPTY"),
            Phase::ComputeBound => write!(f, "COMPUTE_BOUND"),
            Phase::GatewayBound => write!(f, "GATEWAY_BOUND"),
            Phase::OriginBound => write!(f, "ORIGIN_BOUND"),
            Phase::AccessControlled => write!(f, "ACCESS_CONTROLLED"),
            Phase::Distributed => write!(f, "DISTRIBUTED"),
            Phase::DomainBound => write!(f, "DOMAIN_BOUND"),
            Phase::Finalized => write!(f, "FINALIZED"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_and_predecessor_agree() {
        let mut phase = Phase::Empty;
        while let Some(next) = phase.next() {
            assert_eq!(next.predecessor(), Some(phase));
            assert!(next > phase);
            phase = next;
        }
        assert!(phase.is_terminal());
    }
}
