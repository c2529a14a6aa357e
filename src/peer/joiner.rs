//! Joiner bootstrap
//!
//! The joiner dials a waiting host, receives the shared seed in
//! HANDSHAKE_RESPONSE, and opens setup by sending its BATTLE_SETUP
//! first. It moves second.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;

use super::{Peer, PeerError, PeerEvent};
use crate::battle::{PeerRole, Roster};
use crate::network::NetworkConfig;
use crate::protocol::CommunicationMode;

#[derive(Debug, Clone)]
pub struct JoinerSettings {
    pub network: NetworkConfig,
    pub player_name: String,
    pub combatant_name: String,
    pub mode: CommunicationMode,
}

pub struct Joiner {
    peer: Peer,
}

impl Joiner {
    /// Bind a local socket and knock on the host's door. In broadcast
    /// mode `host_addr` is the broadcast destination.
    pub async fn connect(
        settings: JoinerSettings,
        roster: Arc<Roster>,
        host_addr: SocketAddr,
    ) -> Result<Self, PeerError> {
        let combatant = roster
            .spawn(&settings.combatant_name)
            .ok_or_else(|| PeerError::UnknownCombatant(settings.combatant_name.clone()))?;

        let peer = Peer::bind(
            PeerRole::Joiner,
            &settings.network,
            settings.player_name,
            Some(combatant),
            roster,
            settings.mode,
        )
        .await?;

        peer.request_handshake(host_addr).await?;

        Ok(Self { peer })
    }

    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    pub fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<PeerEvent>> {
        self.peer.take_event_receiver()
    }
}
