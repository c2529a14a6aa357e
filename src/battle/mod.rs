//! Battle module - Combatant model, damage math, and session state
//!
//! Everything in here is pure game logic: no sockets, no tasks. The
//! peer layer drives these types from the dispatcher and the CLI.

mod combatant;
mod rng;
mod roster;
mod session;

pub use combatant::*;
pub use rng::*;
pub use roster::*;
pub use session::*;

/// Each side starts with this many attack boosts and this many defense
/// boosts.
pub const DEFAULT_BOOST_USES: u32 = 5;

/// Multiplier a boost applies to one stat for one round.
pub const BOOST_MULTIPLIER: f64 = 1.5;

/// The phases a session moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BattlePhase {
    /// Connection establishment; only handshake traffic is legal.
    Handshaking,
    /// Seed is known; BATTLE_SETUP messages are being exchanged.
    Setup,
    /// Between rounds. The side holding the turn may attack.
    WaitingForMove,
    /// An attack round is in flight.
    ProcessingTurn,
    /// The battle ended; nothing is dispatched any more.
    Terminated,
}

impl BattlePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            BattlePhase::Handshaking => "handshaking",
            BattlePhase::Setup => "setup",
            BattlePhase::WaitingForMove => "waiting_for_move",
            BattlePhase::ProcessingTurn => "processing_turn",
            BattlePhase::Terminated => "terminated",
        }
    }
}
