//! Spectator bootstrap
//!
//! A spectator performs only the handshake (the host accepts it
//! automatically), renders whatever the host relays, and may send
//! chat. It never originates attack-family messages; the driver
//! interface rejects those intents. It winds down when GAME_OVER
//! arrives.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;

use super::{Peer, PeerError, PeerEvent};
use crate::battle::{PeerRole, Roster};
use crate::network::NetworkConfig;
use crate::protocol::CommunicationMode;

pub struct Spectator {
    peer: Peer,
}

impl Spectator {
    pub async fn connect(
        network: NetworkConfig,
        player_name: String,
        roster: Arc<Roster>,
        host_addr: SocketAddr,
    ) -> Result<Self, PeerError> {
        let peer = Peer::bind(
            PeerRole::Spectator,
            &network,
            player_name,
            None,
            roster,
            CommunicationMode::Direct,
        )
        .await?;

        peer.request_spectate(host_addr).await?;

        Ok(Self { peer })
    }

    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    pub fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<PeerEvent>> {
        self.peer.take_event_receiver()
    }
}
