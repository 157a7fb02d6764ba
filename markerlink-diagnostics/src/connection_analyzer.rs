//! Connection state analysis and diagnostics

use markerlink_core::{
    Connectivity, IceConnectionState, IceGatheringState, PeerConnectionState, SignalingState,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Overall health derived from the mirrored transport states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionHealth {
    /// Nothing started yet
    Idle,
    /// Gathering, checking or connecting
    Establishing,
    /// Media path is up
    Healthy,
    /// Connectivity was lost and may come back
    Degraded,
    /// No usable path
    Failed,
    /// Torn down
    Closed,
}

impl fmt::Display for ConnectionHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionHealth::Idle => "idle",
            ConnectionHealth::Establishing => "establishing",
            ConnectionHealth::Healthy => "healthy",
            ConnectionHealth::Degraded => "degraded",
            ConnectionHealth::Failed => "failed",
            ConnectionHealth::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Connection information derived from one connectivity snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivityReport {
    /// Mirrored states
    pub connectivity: Connectivity,
    /// Derived health
    pub health: ConnectionHealth,
    /// Whether candidate gathering finished
    pub gathering_complete: bool,
    /// Whether an offer is still waiting for its answer
    pub awaiting_answer: bool,
}

impl ConnectivityReport {
    /// One-line summary for logs
    pub fn summary(&self) -> String {
        format!(
            "{} (pc={:?}, ice={:?}, gathering={:?}, signaling={:?})",
            self.health,
            self.connectivity.connection,
            self.connectivity.ice_connection,
            self.connectivity.ice_gathering,
            self.connectivity.signaling
        )
    }
}

/// Classifies connectivity snapshots
#[derive(Debug, Default, Clone, Copy)]
pub struct ConnectionAnalyzer;

impl ConnectionAnalyzer {
    /// Analyze a snapshot
    pub fn analyze(connectivity: &Connectivity) -> ConnectivityReport {
        let health = match (connectivity.connection, connectivity.ice_connection) {
            (PeerConnectionState::Closed, _) | (_, IceConnectionState::Closed) => {
                ConnectionHealth::Closed
            }
            (PeerConnectionState::Failed, _) | (_, IceConnectionState::Failed) => {
                ConnectionHealth::Failed
            }
            (PeerConnectionState::Disconnected, _) | (_, IceConnectionState::Disconnected) => {
                ConnectionHealth::Degraded
            }
            (PeerConnectionState::Connected, _)
            | (_, IceConnectionState::Connected | IceConnectionState::Completed) => {
                ConnectionHealth::Healthy
            }
            (PeerConnectionState::Connecting, _) | (_, IceConnectionState::Checking) => {
                ConnectionHealth::Establishing
            }
            _ if connectivity.ice_gathering != IceGatheringState::New
                || connectivity.signaling != SignalingState::Stable =>
            {
                ConnectionHealth::Establishing
            }
            _ => ConnectionHealth::Idle,
        };

        ConnectivityReport {
            connectivity: *connectivity,
            health,
            gathering_complete: connectivity.ice_gathering == IceGatheringState::Complete,
            awaiting_answer: connectivity.signaling == SignalingState::HaveLocalOffer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_transport_is_idle() {
        let report = ConnectionAnalyzer::analyze(&Connectivity::default());
        assert_eq!(report.health, ConnectionHealth::Idle);
        assert!(!report.gathering_complete);
    }

    #[test]
    fn test_offer_in_flight_is_establishing() {
        let connectivity = Connectivity {
            signaling: SignalingState::HaveLocalOffer,
            ice_gathering: IceGatheringState::Complete,
            ..Connectivity::default()
        };
        let report = ConnectionAnalyzer::analyze(&connectivity);
        assert_eq!(report.health, ConnectionHealth::Establishing);
        assert!(report.awaiting_answer);
        assert!(report.gathering_complete);
    }

    #[test]
    fn test_failure_outranks_connected() {
        let connectivity = Connectivity {
            connection: PeerConnectionState::Connected,
            ice_connection: IceConnectionState::Failed,
            ..Connectivity::default()
        };
        assert_eq!(
            ConnectionAnalyzer::analyze(&connectivity).health,
            ConnectionHealth::Failed
        );

        let closed = Connectivity {
            connection: PeerConnectionState::Closed,
            ..Connectivity::default()
        };
        let report = ConnectionAnalyzer::analyze(&closed);
        assert_eq!(report.health, ConnectionHealth::Closed);
        assert!(report.summary().starts_with("closed"));
    }
}
