//! Host bootstrap
//!
//! The host binds a known port, waits for a challenger's
//! HANDSHAKE_REQUEST, and on approval supplies the shared seed. It
//! moves first once both setups are exchanged, and it auto-accepts a
//! single spectator.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;

use super::{Peer, PeerError, PeerEvent};
use crate::battle::{PeerRole, Roster};
use crate::network::NetworkConfig;
use crate::protocol::CommunicationMode;

/// Everything needed to stand a host up.
#[derive(Debug, Clone)]
pub struct HostSettings {
    pub network: NetworkConfig,
    pub player_name: String,
    pub combatant_name: String,
    pub mode: CommunicationMode,
}

pub struct Host {
    peer: Peer,
}

impl Host {
    /// Bind the session socket and start listening for a challenger.
    pub async fn bind(settings: HostSettings, roster: Arc<Roster>) -> Result<Self, PeerError> {
        let combatant = roster
            .spawn(&settings.combatant_name)
            .ok_or_else(|| PeerError::UnknownCombatant(settings.combatant_name.clone()))?;

        let peer = Peer::bind(
            PeerRole::Host,
            &settings.network,
            settings.player_name,
            Some(combatant),
            roster,
            settings.mode,
        )
        .await?;

        Ok(Self { peer })
    }

    /// Accept a challenger: share the seed and enter setup. The
    /// challenger address comes from a
    /// [`PeerEvent::HandshakeRequested`] event.
    pub async fn approve_challenger(
        &self,
        challenger: SocketAddr,
        seed: u64,
    ) -> Result<(), PeerError> {
        self.peer.approve_challenger(challenger, seed).await
    }

    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    pub fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<PeerEvent>> {
        self.peer.take_event_receiver()
    }
}
