//! Peer module - Role bootstraps, the receive loop, and driver intents
//!
//! A [`Peer`] owns the session socket, the reliable channel, and the
//! session state. Incoming datagrams are handled by a single receive
//! task (decode, ACK, dedupe, dispatch); every reliable response the
//! dispatcher produces goes out on a freshly spawned task so the
//! receive loop never waits on its own ACK round-trips. The driver
//! (CLI loop) talks to the peer through intent methods and a stream of
//! [`PeerEvent`]s.

mod dispatcher;
mod host;
mod joiner;
mod spectator;


pub use host::*;
pub use joiner::*;
pub use spectator::*;

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};

use crate::battle::{
    BattlePhase, Calculation, Combatant, IntentError, PeerRole, Roster, SessionState,
};
use crate::network::{
    bind_socket, ArrivalQueue, ChannelError, NetworkConfig, ReliableChannel, BROADCAST_ADDR,
};
use crate::protocol::{self, CommunicationMode, WireMessage};

/// Peer errors
#[derive(Error, Debug)]
pub enum PeerError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Intent(#[from] IntentError),

    #[error("delivery failed: {0}")]
    Channel(#[from] ChannelError),

    #[error("unknown combatant '{0}'")]
    UnknownCombatant(String),
}

/// Chat payload kinds.
#[derive(Debug, Clone)]
pub enum ChatBody {
    Text(String),
    Sticker(String),
}

/// Events emitted to the driver.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// A challenger knocked; the driver decides whether to accept.
    HandshakeRequested { challenger: SocketAddr },
    /// A spectator attached to the battle (host side).
    SpectatorJoined { addr: SocketAddr },
    /// The host accepted us as a spectator.
    SpectatorAccepted { seed: Option<u64> },
    /// The host shared the shared-RNG seed with us.
    SeedReceived { seed: u64 },
    /// The opponent's combatant is known.
    OpponentRevealed { name: String, hp: u32 },
    /// Both setups are exchanged; the battle is on.
    BattleReady { my_turn: bool },
    /// The opponent announced an attack against us.
    AttackIncoming { attacker: String, move_name: String },
    /// A narrative line worth showing ("X used Y! ...").
    StatusLine { text: String },
    /// Both sides agreed on the round numbers.
    CalculationAgreed { damage: u32, defender_hp: u32 },
    /// The two calculations diverged; the attacker's values win.
    CalculationMismatch { ours: Calculation, theirs: Calculation },
    /// The round committed and the turn flipped.
    TurnChanged { my_turn: bool },
    ChatReceived { sender: String, body: ChatBody },
    GameOver { winner: String, loser: String },
    /// A reliable send exhausted its retries.
    TransportFailed { detail: String },
}

/// Shared state handed to the receive loop and dispatcher.
pub(crate) struct PeerContext {
    pub(crate) role: PeerRole,
    pub(crate) socket: Arc<UdpSocket>,
    pub(crate) channel: Arc<ReliableChannel>,
    pub(crate) arrival: Arc<ArrivalQueue>,
    pub(crate) session: Arc<Mutex<SessionState>>,
    pub(crate) roster: Arc<Roster>,
    pub(crate) events: mpsc::Sender<PeerEvent>,
    pub(crate) shutdown: mpsc::Sender<()>,
}

/// Compact view of the session for the `!status` command.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub role: PeerRole,
    pub phase: BattlePhase,
    pub is_my_turn: bool,
    pub seed: Option<u64>,
    pub combatant: Option<CombatantSummary>,
    pub opponent: Option<CombatantSummary>,
    pub attack_uses: u32,
    pub defense_uses: u32,
    pub defense_armed: bool,
}

#[derive(Debug, Clone)]
pub struct CombatantSummary {
    pub name: String,
    pub current_hp: u32,
    pub max_hp: u32,
    pub moves: Vec<String>,
}

fn summarize(combatant: &Combatant) -> CombatantSummary {
    CombatantSummary {
        name: combatant.name.clone(),
        current_hp: combatant.current_hp,
        max_hp: combatant.max_hp,
        moves: combatant.moves.clone(),
    }
}

/// One endpoint of a battle session.
pub struct Peer {
    context: Arc<PeerContext>,
    event_rx: Option<mpsc::Receiver<PeerEvent>>,
}

impl Peer {
    pub(crate) async fn bind(
        role: PeerRole,
        network: &NetworkConfig,
        player_name: String,
        combatant: Option<Combatant>,
        roster: Arc<Roster>,
        mode: CommunicationMode,
    ) -> Result<Self, PeerError> {
        let socket = Arc::new(bind_socket(network).await?);
        let arrival = Arc::new(ArrivalQueue::new());
        let channel = Arc::new(ReliableChannel::new(socket.clone(), arrival.clone()));
        let (event_tx, event_rx) = mpsc::channel(64);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let session = SessionState::new(role, player_name, combatant, mode);
        let context = Arc::new(PeerContext {
            role,
            socket: socket.clone(),
            channel,
            arrival,
            session: Arc::new(Mutex::new(session)),
            roster,
            events: event_tx,
            shutdown: shutdown_tx,
        });

        tokio::spawn(receive_loop(context.clone(), shutdown_rx));

        tracing::info!(
            role = role.label(),
            addr = %socket.local_addr()?,
            "peer listening"
        );

        Ok(Self {
            context,
            event_rx: Some(event_rx),
        })
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<PeerEvent>> {
        self.event_rx.take()
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.context.socket.local_addr()
    }

    /// Stop the receive loop. In-flight sends finish on their own.
    pub async fn shutdown(&self) {
        let _ = self.context.shutdown.send(()).await;
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let session = self.context.session.lock().await;
        SessionSnapshot {
            role: session.role,
            phase: session.phase,
            is_my_turn: session.is_my_turn,
            seed: session.seed,
            combatant: session.combatant.as_ref().map(summarize),
            opponent: session.opponent.as_ref().map(summarize),
            attack_uses: session.boosts.attack_uses,
            defense_uses: session.boosts.defense_uses,
            defense_armed: session.boosts.defense_armed,
        }
    }

    // ---------------------------------------------------------------
    // Driver intents
    // ---------------------------------------------------------------

    /// Announce an attack. `move_name` defaults to the combatant's
    /// first move.
    pub async fn attack(
        &self,
        move_name: Option<String>,
        use_attack_boost: bool,
    ) -> Result<(), PeerError> {
        let (message, destination) = {
            let mut session = self.context.session.lock().await;
            let chosen = match move_name {
                Some(name) => name,
                None => session
                    .combatant
                    .as_ref()
                    .and_then(Combatant::first_move)
                    .unwrap_or("Strike")
                    .to_string(),
            };
            let destination = session.remote_addr.ok_or(IntentError::NoOpponentYet)?;
            let mv = session.begin_attack(&chosen, use_attack_boost)?;
            (WireMessage::attack_announce(&mv.name), destination)
        };
        self.send_reliable(message, destination).await
    }

    /// Arm a defense boost for the next incoming attack. Returns the
    /// uses still banked (arming itself consumes nothing).
    pub async fn arm_defense_boost(&self) -> Result<u32, PeerError> {
        let mut session = self.context.session.lock().await;
        Ok(session.arm_defense()?)
    }

    pub async fn send_chat_text(&self, text: &str) -> Result<(), PeerError> {
        let sender = self.chat_sender().await?;
        self.send_chat(WireMessage::chat_text(&sender, text)).await
    }

    pub async fn send_chat_sticker(&self, sticker_data: &str) -> Result<(), PeerError> {
        let sender = self.chat_sender().await?;
        self.send_chat(WireMessage::chat_sticker(&sender, sticker_data))
            .await
    }

    async fn chat_sender(&self) -> Result<String, PeerError> {
        let session = self.context.session.lock().await;
        session.validate_chat()?;
        Ok(session.player_name.clone())
    }

    async fn send_chat(&self, message: WireMessage) -> Result<(), PeerError> {
        let destinations = {
            let session = self.context.session.lock().await;
            let mut destinations = Vec::new();
            if let Some(remote) = session.remote_addr {
                destinations.push(remote);
            }
            // The host keeps its spectator in the loop.
            if let Some(spectator) = session.spectator_addr {
                destinations.push(spectator);
            }
            destinations
        };
        if destinations.is_empty() {
            return Err(IntentError::NoOpponentYet.into());
        }
        for destination in destinations {
            self.send_reliable(message.clone(), destination).await?;
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Role-specific operations, exposed through the role wrappers
    // ---------------------------------------------------------------

    /// Host: accept the challenger and share the seed.
    pub(crate) async fn approve_challenger(
        &self,
        challenger: SocketAddr,
        seed: u64,
    ) -> Result<(), PeerError> {
        let destination = {
            let mut session = self.context.session.lock().await;
            if session.phase != BattlePhase::Handshaking {
                return Err(IntentError::WrongPhase.into());
            }
            let destination = match session.mode {
                CommunicationMode::Direct => challenger,
                CommunicationMode::Broadcast => SocketAddr::new(
                    IpAddr::V4(BROADCAST_ADDR),
                    self.context.socket.local_addr()?.port(),
                ),
            };
            session.remote_addr = Some(destination);
            session.seed_rng(seed);
            session.phase = BattlePhase::Setup;
            destination
        };
        self.send_reliable(WireMessage::handshake_response(seed), destination)
            .await
    }

    /// Joiner: knock on the host's door.
    pub(crate) async fn request_handshake(&self, host_addr: SocketAddr) -> Result<(), PeerError> {
        {
            let mut session = self.context.session.lock().await;
            session.remote_addr = Some(host_addr);
        }
        self.send_reliable(WireMessage::handshake_request(), host_addr)
            .await
    }

    /// Spectator: ask for read-only access.
    pub(crate) async fn request_spectate(&self, host_addr: SocketAddr) -> Result<(), PeerError> {
        {
            let mut session = self.context.session.lock().await;
            session.remote_addr = Some(host_addr);
        }
        self.send_reliable(WireMessage::spectator_request(), host_addr)
            .await
    }

    async fn send_reliable(
        &self,
        message: WireMessage,
        destination: SocketAddr,
    ) -> Result<(), PeerError> {
        if let Err(error) = self
            .context
            .channel
            .send_with_ack(message, destination)
            .await
        {
            let _ = self
                .context
                .events
                .send(PeerEvent::TransportFailed {
                    detail: error.to_string(),
                })
                .await;
            return Err(error.into());
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn context(&self) -> &Arc<PeerContext> {
        &self.context
    }
}

/// The single long-running receive task.
///
/// For each datagram: decode, expose it to ACK waiters, ACK it if it
/// carries a sequence number (duplicates included, so the peer's
/// retries stop), drop duplicates, and hand the rest to the
/// dispatcher.
async fn receive_loop(context: Arc<PeerContext>, mut shutdown_rx: mpsc::Receiver<()>) {
    let mut buffer = [0u8; protocol::MAX_DATAGRAM_SIZE];
    let mut last_accepted: HashMap<SocketAddr, u64> = HashMap::new();

    loop {
        let (len, from) = tokio::select! {
            received = context.socket.recv_from(&mut buffer) => match received {
                Ok(pair) => pair,
                Err(error) => {
                    tracing::error!(%error, "socket receive failed");
                    break;
                }
            },
            _ = shutdown_rx.recv() => break,
        };

        let message = match protocol::decode_datagram(&buffer[..len]) {
            Ok(message) => message,
            Err(error) => {
                tracing::warn!(%error, %from, "dropping undecodable datagram");
                continue;
            }
        };

        context.arrival.push(message.clone());

        if let Some(sequence) = message.sequence_number() {
            if let Err(error) = context.channel.send_ack(sequence, from).await {
                tracing::debug!(%error, %from, "failed to send ack");
            }

            let last = last_accepted.entry(from).or_insert(0);
            if sequence <= *last {
                tracing::debug!(sequence, %from, "dropping duplicate");
                continue;
            }
            *last = sequence;
        }

        dispatcher::dispatch(&context, message, from).await;
    }

    tracing::debug!("receive loop finished");
}
