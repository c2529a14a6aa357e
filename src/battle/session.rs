//! Session state machine
//!
//! Tracks turn ownership, the boost ledger, the pending attack slot,
//! and phase transitions for one battle. All mutation happens under
//! the peer's session mutex; this module itself knows nothing about
//! sockets or tasks.

use std::net::SocketAddr;

use thiserror::Error;

use super::{
    calculate_damage, status_message, BattlePhase, BattleState, Combatant, Move, SharedRng,
    BOOST_MULTIPLIER, DEFAULT_BOOST_USES,
};
use crate::protocol::{CommunicationMode, StatBoosts, WireMessage};

/// The three roles a peer can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    /// Listens, approves the joiner, supplies the seed, moves first.
    Host,
    /// Dials the host, receives the seed, moves second.
    Joiner,
    /// Read-only observer; chat is the only thing it originates.
    Spectator,
}

impl PeerRole {
    pub fn label(&self) -> &'static str {
        match self {
            PeerRole::Host => "HOST",
            PeerRole::Joiner => "JOINER",
            PeerRole::Spectator => "SPECTATOR",
        }
    }

    pub fn originates_handshake(&self) -> bool {
        matches!(self, PeerRole::Joiner | PeerRole::Spectator)
    }

    pub fn responds_to_handshake(&self) -> bool {
        matches!(self, PeerRole::Host)
    }

    pub fn originates_setup(&self) -> bool {
        matches!(self, PeerRole::Joiner)
    }

    pub fn may_battle(&self) -> bool {
        !matches!(self, PeerRole::Spectator)
    }
}

/// Why a driver intent was rejected. Surfaced synchronously; the
/// session state is left untouched.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentError {
    #[error("not your turn")]
    NotYourTurn,

    #[error("wrong phase for that action")]
    WrongPhase,

    #[error("no boosts remaining")]
    NoBoostsRemaining,

    #[error("no opponent yet")]
    NoOpponentYet,

    #[error("session terminated")]
    SessionTerminated,
}

/// Per-side boost accounting.
///
/// Counters only ever decrease, and each decrement corresponds to
/// exactly one successful use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoostLedger {
    pub attack_uses: u32,
    pub defense_uses: u32,
    /// An attack boost was applied this turn.
    pub attack_boost_applied: bool,
    /// A defense boost was applied this turn.
    pub defense_boost_applied: bool,
    /// A defense boost is armed for the next incoming attack. Arming
    /// does not consume a use; the arrival of the attack does.
    pub defense_armed: bool,
}

impl Default for BoostLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl BoostLedger {
    pub fn new() -> Self {
        Self {
            attack_uses: DEFAULT_BOOST_USES,
            defense_uses: DEFAULT_BOOST_USES,
            attack_boost_applied: false,
            defense_boost_applied: false,
            defense_armed: false,
        }
    }

    /// Consume an attack boost for this turn. The applied flag is set
    /// before any damage computation happens.
    pub fn use_attack_boost(&mut self) -> Result<(), IntentError> {
        if self.attack_uses == 0 {
            return Err(IntentError::NoBoostsRemaining);
        }
        self.attack_uses -= 1;
        self.attack_boost_applied = true;
        Ok(())
    }

    pub fn arm_defense(&mut self) -> Result<(), IntentError> {
        if self.defense_uses == 0 {
            return Err(IntentError::NoBoostsRemaining);
        }
        self.defense_armed = true;
        Ok(())
    }

    /// Consume the armed defense boost when the incoming attack lands.
    /// Returns whether a boost was actually spent.
    pub fn consume_armed_defense(&mut self) -> bool {
        if !self.defense_armed {
            return false;
        }
        self.defense_armed = false;
        if self.defense_uses == 0 {
            return false;
        }
        self.defense_uses -= 1;
        self.defense_boost_applied = true;
        true
    }

    pub fn attack_multiplier(&self) -> f64 {
        if self.attack_boost_applied {
            BOOST_MULTIPLIER
        } else {
            1.0
        }
    }

    pub fn defense_multiplier(&self) -> f64 {
        if self.defense_boost_applied {
            BOOST_MULTIPLIER
        } else {
            1.0
        }
    }

    /// Clear the per-turn flags at round end. An armed-but-unconsumed
    /// defense boost stays armed.
    pub fn clear_turn_flags(&mut self) {
        self.attack_boost_applied = false;
        self.defense_boost_applied = false;
    }

    pub fn as_stat_boosts(&self) -> StatBoosts {
        StatBoosts {
            special_attack_uses: self.attack_uses,
            special_defense_uses: self.defense_uses,
        }
    }
}

/// Which side owns the in-flight attack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttackerSide {
    Local,
    Remote,
}

/// The slot remembering the in-flight attack-round parameters between
/// ATTACK_ANNOUNCE and round commit. Non-empty iff the phase is
/// ProcessingTurn.
#[derive(Debug, Clone)]
pub struct PendingAttack {
    pub side: AttackerSide,
    pub mv: Move,
}

/// One side's independently computed result for the round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calculation {
    pub damage: u32,
    pub defender_hp_remaining: u32,
}

/// Everything needed to emit a CALCULATION_REPORT.
#[derive(Debug, Clone)]
pub struct RoundReport {
    pub attacker_name: String,
    pub move_name: String,
    pub attacker_hp: u32,
    pub damage: u32,
    pub defender_hp_remaining: u32,
    pub status: String,
}

/// Result of committing an agreed round.
#[derive(Debug, Clone)]
pub struct RoundEnd {
    pub defender_name: String,
    pub defender_hp: u32,
    /// The defender fainted; the attacker must emit GAME_OVER.
    pub finished: bool,
    /// Valid only when `finished` is false.
    pub my_turn_next: bool,
}

/// Mutable state of one battle session.
#[derive(Debug)]
pub struct SessionState {
    pub role: PeerRole,
    pub phase: BattlePhase,
    pub is_my_turn: bool,
    pub player_name: String,
    pub mode: CommunicationMode,
    pub remote_addr: Option<SocketAddr>,
    pub spectator_addr: Option<SocketAddr>,
    pub seed: Option<u64>,
    pub rng: Option<SharedRng>,
    pub combatant: Option<Combatant>,
    pub opponent: Option<Combatant>,
    pub boosts: BoostLedger,
    pub opponent_boosts: StatBoosts,
    pub pending: Option<PendingAttack>,
    pub my_calculation: Option<Calculation>,
    /// Guards against emitting our BATTLE_SETUP twice.
    pub setup_sent: bool,
}

impl SessionState {
    pub fn new(
        role: PeerRole,
        player_name: String,
        combatant: Option<Combatant>,
        mode: CommunicationMode,
    ) -> Self {
        Self {
            role,
            phase: BattlePhase::Handshaking,
            // Initial turn ownership is the host's.
            is_my_turn: role == PeerRole::Host,
            player_name,
            mode,
            remote_addr: None,
            spectator_addr: None,
            seed: None,
            rng: None,
            combatant,
            opponent: None,
            boosts: BoostLedger::new(),
            opponent_boosts: StatBoosts::default(),
            pending: None,
            my_calculation: None,
            setup_sent: false,
        }
    }

    /// Seed the shared RNG. Must happen on both sides before any
    /// damage is computed.
    pub fn seed_rng(&mut self, seed: u64) {
        self.seed = Some(seed);
        self.rng = Some(SharedRng::seeded(seed));
        tracing::info!(seed, "shared rng initialized");
    }

    pub fn is_terminated(&self) -> bool {
        self.phase == BattlePhase::Terminated
    }

    pub fn terminate(&mut self) {
        self.phase = BattlePhase::Terminated;
    }

    /// Record the opponent revealed by BATTLE_SETUP and open the
    /// battle.
    pub fn record_opponent(&mut self, opponent: Combatant, boosts: StatBoosts) {
        self.opponent = Some(opponent);
        self.opponent_boosts = boosts;
        self.phase = BattlePhase::WaitingForMove;
    }

    /// Our own BATTLE_SETUP message, built from the session.
    pub fn setup_message(&self) -> Option<WireMessage> {
        let combatant = self.combatant.as_ref()?;
        Some(WireMessage::battle_setup(
            self.mode,
            &combatant.name,
            self.boosts.as_stat_boosts(),
        ))
    }

    // ---------------------------------------------------------------
    // Driver intents
    // ---------------------------------------------------------------

    /// Validate and stage an outgoing attack. On success the phase is
    /// ProcessingTurn, the pending slot is filled, and any requested
    /// attack boost has been consumed (flag set before the damage
    /// computation that follows DEFENSE_ANNOUNCE).
    pub fn begin_attack(
        &mut self,
        move_name: &str,
        use_attack_boost: bool,
    ) -> Result<Move, IntentError> {
        if self.is_terminated() {
            return Err(IntentError::SessionTerminated);
        }
        if !self.is_my_turn {
            return Err(IntentError::NotYourTurn);
        }
        if self.phase != BattlePhase::WaitingForMove {
            return Err(IntentError::WrongPhase);
        }
        if self.opponent.is_none() {
            return Err(IntentError::NoOpponentYet);
        }
        let attacker = self.combatant.as_ref().ok_or(IntentError::NoOpponentYet)?;

        let mv = Move::from_attacker(move_name, attacker);
        if use_attack_boost {
            self.boosts.use_attack_boost()?;
        }

        self.phase = BattlePhase::ProcessingTurn;
        self.pending = Some(PendingAttack {
            side: AttackerSide::Local,
            mv: mv.clone(),
        });
        Ok(mv)
    }

    /// Arm a defense boost for the next incoming attack.
    pub fn arm_defense(&mut self) -> Result<u32, IntentError> {
        if self.is_terminated() {
            return Err(IntentError::SessionTerminated);
        }
        if self.is_my_turn || self.phase != BattlePhase::WaitingForMove {
            return Err(IntentError::WrongPhase);
        }
        if self.opponent.is_none() {
            return Err(IntentError::NoOpponentYet);
        }
        self.boosts.arm_defense()?;
        Ok(self.boosts.defense_uses)
    }

    pub fn validate_chat(&self) -> Result<(), IntentError> {
        if self.is_terminated() {
            return Err(IntentError::SessionTerminated);
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Round bookkeeping driven by the dispatcher
    // ---------------------------------------------------------------

    /// Defender path for ATTACK_ANNOUNCE: stage the pending attack,
    /// consume any armed defense boost, and compute our calculation.
    pub fn attack_received(&mut self, move_name: &str) -> Option<RoundReport> {
        if self.opponent.is_none() || self.combatant.is_none() {
            return None;
        }

        self.phase = BattlePhase::ProcessingTurn;
        self.boosts.consume_armed_defense();
        let defense_boost = self.boosts.defense_multiplier();

        let attacker = self.opponent.as_ref()?;
        let defender = self.combatant.as_ref()?;
        let mv = Move::from_attacker(move_name, attacker);
        // The opponent's attack-boost decision is not on the wire; each
        // side folds in only its own boost, and the reconciliation step
        // settles any difference.
        let report = build_report(attacker, defender, &mv, 1.0, defense_boost);

        self.my_calculation = Some(Calculation {
            damage: report.damage,
            defender_hp_remaining: report.defender_hp_remaining,
        });
        self.pending = Some(PendingAttack {
            side: AttackerSide::Remote,
            mv,
        });
        Some(report)
    }

    /// Attacker path for DEFENSE_ANNOUNCE: compute our calculation
    /// with our attack boost folded in.
    pub fn defense_acknowledged(&mut self) -> Option<RoundReport> {
        let pending = self.pending.as_ref()?;
        if pending.side != AttackerSide::Local {
            return None;
        }

        let attack_boost = self.boosts.attack_multiplier();
        let attacker = self.combatant.as_ref()?;
        let defender = self.opponent.as_ref()?;
        let mv = pending.mv.clone();
        let report = build_report(attacker, defender, &mv, attack_boost, 1.0);

        self.phase = BattlePhase::ProcessingTurn;
        self.my_calculation = Some(Calculation {
            damage: report.damage,
            defender_hp_remaining: report.defender_hp_remaining,
        });
        Some(report)
    }

    /// True when we are the attacker of the round in flight.
    pub fn is_attacking(&self) -> bool {
        matches!(
            self.pending,
            Some(PendingAttack {
                side: AttackerSide::Local,
                ..
            })
        )
    }

    /// Winner/loser names for GAME_OVER, from the pending round.
    pub fn round_names(&self) -> Option<(String, String)> {
        let pending = self.pending.as_ref()?;
        let (attacker, defender) = match pending.side {
            AttackerSide::Local => (self.combatant.as_ref()?, self.opponent.as_ref()?),
            AttackerSide::Remote => (self.opponent.as_ref()?, self.combatant.as_ref()?),
        };
        Some((attacker.name.clone(), defender.name.clone()))
    }

    /// Write the agreed remaining HP into the round's defender and
    /// either finish the battle or flip the turn.
    pub fn commit_round(&mut self, defender_hp: u32) -> Option<RoundEnd> {
        let side = self.pending.as_ref()?.side;
        let defender = match side {
            AttackerSide::Local => self.opponent.as_mut()?,
            AttackerSide::Remote => self.combatant.as_mut()?,
        };
        defender.set_remaining_hp(defender_hp);
        let defender_name = defender.name.clone();

        if defender_hp == 0 {
            // The round that caused this must also emit GAME_OVER; the
            // attacker does so, the defender waits for it.
            return Some(RoundEnd {
                defender_name,
                defender_hp,
                finished: true,
                my_turn_next: self.is_my_turn,
            });
        }

        self.switch_turn();
        Some(RoundEnd {
            defender_name,
            defender_hp,
            finished: false,
            my_turn_next: self.is_my_turn,
        })
    }

    /// Flip turn ownership and reset per-round state.
    pub fn switch_turn(&mut self) {
        self.is_my_turn = !self.is_my_turn;
        self.phase = BattlePhase::WaitingForMove;
        self.pending = None;
        self.my_calculation = None;
        self.boosts.clear_turn_flags();
    }
}

fn build_report(
    attacker: &Combatant,
    defender: &Combatant,
    mv: &Move,
    attack_boost: f64,
    defense_boost: f64,
) -> RoundReport {
    let state = BattleState { attacker, defender };
    let damage = calculate_damage(&state, mv, attack_boost, defense_boost);
    let multiplier = defender.multiplier_against(&mv.element);
    RoundReport {
        attacker_name: attacker.name.clone(),
        move_name: mv.name.clone(),
        attacker_hp: attacker.current_hp,
        damage,
        defender_hp_remaining: defender.current_hp.saturating_sub(damage),
        status: status_message(&attacker.name, &mv.name, multiplier),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battle::Roster;

    fn battle_ready(role: PeerRole) -> SessionState {
        let roster = Roster::builtin();
        // Host plays Emberfox, the other side plays Tidecrab, so the
        // two sessions in a test mirror each other.
        let (mine, theirs) = match role {
            PeerRole::Host => ("emberfox", "tidecrab"),
            _ => ("tidecrab", "emberfox"),
        };
        let mut session = SessionState::new(
            role,
            "player".to_string(),
            roster.spawn(mine),
            CommunicationMode::Direct,
        );
        session.seed_rng(12345);
        session.record_opponent(roster.spawn(theirs).unwrap(), StatBoosts::default());
        session
    }

    #[test]
    fn test_host_holds_initial_turn() {
        assert!(battle_ready(PeerRole::Host).is_my_turn);
        assert!(!battle_ready(PeerRole::Joiner).is_my_turn);
    }

    #[test]
    fn test_begin_attack_transitions_and_stages_pending() {
        let mut session = battle_ready(PeerRole::Host);
        let mv = session.begin_attack("Flame Burst", false).unwrap();
        assert_eq!(mv.element, "fire");
        assert_eq!(session.phase, BattlePhase::ProcessingTurn);
        assert!(session.is_attacking());
    }

    #[test]
    fn test_pending_nonempty_iff_processing_turn() {
        let mut session = battle_ready(PeerRole::Host);
        assert!(session.pending.is_none());
        session.begin_attack("Flame Burst", false).unwrap();
        assert!(session.pending.is_some());
        session.switch_turn();
        assert_eq!(session.phase, BattlePhase::WaitingForMove);
        assert!(session.pending.is_none());
    }

    #[test]
    fn test_attack_rejected_off_turn() {
        let mut session = battle_ready(PeerRole::Joiner);
        assert_eq!(
            session.begin_attack("Bubble Jet", false),
            Err(IntentError::NotYourTurn)
        );
    }

    #[test]
    fn test_attack_rejected_mid_round() {
        let mut session = battle_ready(PeerRole::Host);
        session.begin_attack("Flame Burst", false).unwrap();
        // switch_turn hands us the turn back but mid-round attacks must
        // still be refused.
        session.is_my_turn = true;
        assert_eq!(
            session.begin_attack("Cinder Tail", false),
            Err(IntentError::WrongPhase)
        );
    }

    #[test]
    fn test_attack_rejected_without_opponent() {
        let roster = Roster::builtin();
        let mut session = SessionState::new(
            PeerRole::Host,
            "player".to_string(),
            roster.spawn("emberfox"),
            CommunicationMode::Direct,
        );
        session.phase = BattlePhase::WaitingForMove;
        assert_eq!(
            session.begin_attack("Flame Burst", false),
            Err(IntentError::NoOpponentYet)
        );
    }

    #[test]
    fn test_attack_rejected_after_termination() {
        let mut session = battle_ready(PeerRole::Host);
        session.terminate();
        assert_eq!(
            session.begin_attack("Flame Burst", false),
            Err(IntentError::SessionTerminated)
        );
    }

    #[test]
    fn test_attack_boost_consumed_exactly_once() {
        let mut session = battle_ready(PeerRole::Host);
        session.begin_attack("Flame Burst", true).unwrap();
        assert_eq!(session.boosts.attack_uses, DEFAULT_BOOST_USES - 1);
        assert!(session.boosts.attack_boost_applied);
        assert_eq!(session.boosts.attack_multiplier(), BOOST_MULTIPLIER);
    }

    #[test]
    fn test_defense_boost_arming_lifecycle() {
        let mut session = battle_ready(PeerRole::Joiner);

        // Arming does not consume a use.
        session.arm_defense().unwrap();
        assert_eq!(session.boosts.defense_uses, DEFAULT_BOOST_USES);
        assert!(session.boosts.defense_armed);

        // The incoming attack consumes it.
        let report = session.attack_received("Flame Burst").unwrap();
        assert_eq!(session.boosts.defense_uses, DEFAULT_BOOST_USES - 1);
        assert!(session.boosts.defense_boost_applied);
        assert!(!session.boosts.defense_armed);

        // Halved fire hit against 65 * 1.5 defense floors to minimum 1.
        assert_eq!(report.damage, 1);
    }

    #[test]
    fn test_arm_defense_rejected_when_exhausted() {
        let mut session = battle_ready(PeerRole::Joiner);
        session.boosts.defense_uses = 0;
        assert_eq!(session.arm_defense(), Err(IntentError::NoBoostsRemaining));
        assert!(!session.boosts.defense_armed);
    }

    #[test]
    fn test_arm_defense_rejected_on_own_turn() {
        let mut session = battle_ready(PeerRole::Host);
        assert_eq!(session.arm_defense(), Err(IntentError::WrongPhase));
    }

    #[test]
    fn test_boost_conservation() {
        let mut session = battle_ready(PeerRole::Joiner);
        let mut consumed = 0;
        for _ in 0..DEFAULT_BOOST_USES {
            session.arm_defense().unwrap();
            assert!(session.boosts.consume_armed_defense());
            consumed += 1;
            session.boosts.clear_turn_flags();
            assert_eq!(session.boosts.defense_uses + consumed, DEFAULT_BOOST_USES);
        }
        assert_eq!(session.arm_defense(), Err(IntentError::NoBoostsRemaining));
    }

    #[test]
    fn test_round_commit_flips_exactly_one_turn_flag() {
        let mut host = battle_ready(PeerRole::Host);
        let mut joiner = battle_ready(PeerRole::Joiner);

        host.begin_attack("Flame Burst", false).unwrap();
        let report = joiner.attack_received("Flame Burst").unwrap();
        host.defense_acknowledged().unwrap();

        let host_end = host.commit_round(report.defender_hp_remaining).unwrap();
        let joiner_end = joiner.commit_round(report.defender_hp_remaining).unwrap();

        assert!(!host_end.finished);
        assert!(!joiner_end.finished);
        assert!(host.is_my_turn ^ joiner.is_my_turn);
        assert_eq!(host.phase, BattlePhase::WaitingForMove);
        assert_eq!(joiner.phase, BattlePhase::WaitingForMove);
        assert!(joiner.is_my_turn);
    }

    #[test]
    fn test_commit_to_zero_reports_finished() {
        let mut session = battle_ready(PeerRole::Host);
        session.begin_attack("Flame Burst", false).unwrap();
        session.defense_acknowledged().unwrap();
        let end = session.commit_round(0).unwrap();
        assert!(end.finished);
        // Attacker still owns the round until GAME_OVER goes out.
        assert_eq!(session.phase, BattlePhase::ProcessingTurn);
        assert!(session.opponent.as_ref().unwrap().is_fainted());
        let (winner, loser) = session.round_names().unwrap();
        assert_eq!(winner, "Emberfox");
        assert_eq!(loser, "Tidecrab");
    }

    #[test]
    fn test_both_sides_compute_identical_reports() {
        let mut host = battle_ready(PeerRole::Host);
        let mut joiner = battle_ready(PeerRole::Joiner);

        host.begin_attack("Flame Burst", false).unwrap();
        let theirs = joiner.attack_received("Flame Burst").unwrap();
        let ours = host.defense_acknowledged().unwrap();

        assert_eq!(ours.damage, theirs.damage);
        assert_eq!(ours.defender_hp_remaining, theirs.defender_hp_remaining);
        assert_eq!(ours.status, theirs.status);
    }

    #[test]
    fn test_setup_message_carries_ledger() {
        let mut session = battle_ready(PeerRole::Host);
        session.boosts.attack_uses = 2;
        let message = session.setup_message().unwrap();
        let boosts = StatBoosts::decode(message.get("stat_boosts").unwrap());
        assert_eq!(boosts.special_attack_uses, 2);
        assert_eq!(message.get("pokemon_name"), Some("Emberfox"));
    }
}
