//! Protocol message definitions
//!
//! Defines all message kinds exchanged between duelnet peers, the
//! generic key/value carrier they travel in, and typed constructors
//! so call sites cannot misspell a field name.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Well-known field names.
pub mod fields {
    pub const MESSAGE_TYPE: &str = "message_type";
    pub const SEQUENCE_NUMBER: &str = "sequence_number";
    pub const ACK_NUMBER: &str = "ack_number";
    pub const SEED: &str = "seed";
    pub const COMMUNICATION_MODE: &str = "communication_mode";
    pub const POKEMON_NAME: &str = "pokemon_name";
    pub const STAT_BOOSTS: &str = "stat_boosts";
    pub const MOVE_NAME: &str = "move_name";
    pub const ATTACKER: &str = "attacker";
    pub const MOVE_USED: &str = "move_used";
    pub const REMAINING_HEALTH: &str = "remaining_health";
    pub const DAMAGE_DEALT: &str = "damage_dealt";
    pub const DEFENDER_HP_REMAINING: &str = "defender_hp_remaining";
    pub const STATUS_MESSAGE: &str = "status_message";
    pub const WINNER: &str = "winner";
    pub const LOSER: &str = "loser";
    pub const SENDER_NAME: &str = "sender_name";
    pub const CONTENT_TYPE: &str = "content_type";
    pub const MESSAGE_TEXT: &str = "message_text";
    pub const STICKER_DATA: &str = "sticker_data";
}

/// All message kinds in the battle protocol.
///
/// The attack round is the four-step exchange ATTACK_ANNOUNCE /
/// DEFENSE_ANNOUNCE / CALCULATION_REPORT (both directions) /
/// CALCULATION_CONFIRM or RESOLUTION_REQUEST.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Joiner asks the host for a seat in the battle.
    HandshakeRequest,
    /// Host accepts and shares the random seed.
    HandshakeResponse,
    /// A spectator asks for read-only access.
    SpectatorRequest,
    /// Each side announces its combatant and boost allocation.
    BattleSetup,
    /// Attacker announces the move it is using.
    AttackAnnounce,
    /// Defender confirms it saw the attack announcement.
    DefenseAnnounce,
    /// Each side reports its independently computed damage.
    CalculationReport,
    /// Attacker agrees with the defender's numbers.
    CalculationConfirm,
    /// Attacker disagrees; its values become authoritative.
    ResolutionRequest,
    /// One combatant fainted; the battle is over.
    GameOver,
    /// Text or sticker side-channel between players.
    ChatMessage,
    /// Reliability-layer acknowledgment.
    Ack,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::HandshakeRequest => "HANDSHAKE_REQUEST",
            MessageType::HandshakeResponse => "HANDSHAKE_RESPONSE",
            MessageType::SpectatorRequest => "SPECTATOR_REQUEST",
            MessageType::BattleSetup => "BATTLE_SETUP",
            MessageType::AttackAnnounce => "ATTACK_ANNOUNCE",
            MessageType::DefenseAnnounce => "DEFENSE_ANNOUNCE",
            MessageType::CalculationReport => "CALCULATION_REPORT",
            MessageType::CalculationConfirm => "CALCULATION_CONFIRM",
            MessageType::ResolutionRequest => "RESOLUTION_REQUEST",
            MessageType::GameOver => "GAME_OVER",
            MessageType::ChatMessage => "CHAT_MESSAGE",
            MessageType::Ack => "ACK",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "HANDSHAKE_REQUEST" => Some(MessageType::HandshakeRequest),
            "HANDSHAKE_RESPONSE" => Some(MessageType::HandshakeResponse),
            "SPECTATOR_REQUEST" => Some(MessageType::SpectatorRequest),
            "BATTLE_SETUP" => Some(MessageType::BattleSetup),
            "ATTACK_ANNOUNCE" => Some(MessageType::AttackAnnounce),
            "DEFENSE_ANNOUNCE" => Some(MessageType::DefenseAnnounce),
            "CALCULATION_REPORT" => Some(MessageType::CalculationReport),
            "CALCULATION_CONFIRM" => Some(MessageType::CalculationConfirm),
            "RESOLUTION_REQUEST" => Some(MessageType::ResolutionRequest),
            "GAME_OVER" => Some(MessageType::GameOver),
            "CHAT_MESSAGE" => Some(MessageType::ChatMessage),
            "ACK" => Some(MessageType::Ack),
            _ => None,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content kinds for CHAT_MESSAGE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Text,
    Sticker,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Text => "TEXT",
            ContentType::Sticker => "STICKER",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "TEXT" => Some(ContentType::Text),
            "STICKER" => Some(ContentType::Sticker),
            _ => None,
        }
    }
}

/// How the two endpoints address each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommunicationMode {
    /// Direct unicast to a known IP and port.
    Direct,
    /// Local-network broadcast to 255.255.255.255.
    Broadcast,
}

impl CommunicationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommunicationMode::Direct => "P2P",
            CommunicationMode::Broadcast => "BROADCAST",
        }
    }
}

/// Remaining boost counters as exchanged in BATTLE_SETUP.
///
/// Carried as a JSON object inside the `stat_boosts` field. Parsing is
/// lenient: a malformed value falls back to the defaults so a battle
/// can still start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatBoosts {
    pub special_attack_uses: u32,
    pub special_defense_uses: u32,
}

impl Default for StatBoosts {
    fn default() -> Self {
        Self {
            special_attack_uses: crate::battle::DEFAULT_BOOST_USES,
            special_defense_uses: crate::battle::DEFAULT_BOOST_USES,
        }
    }
}

impl StatBoosts {
    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }

    pub fn decode(value: &str) -> Self {
        serde_json::from_str(value).unwrap_or_default()
    }
}

/// A protocol message as a flat list of named string fields.
///
/// Insertion order is preserved so encoded messages read naturally
/// (`message_type` first). Values are always strings; numeric fields
/// are parsed at the point of use.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WireMessage {
    fields: Vec<(String, String)>,
}

impl WireMessage {
    pub fn new(kind: MessageType) -> Self {
        Self {
            fields: vec![(fields::MESSAGE_TYPE.to_string(), kind.as_str().to_string())],
        }
    }

    /// Build a message from already-decoded fields. Used by the codec;
    /// the result may legitimately lack `message_type`, which the
    /// dispatcher treats as malformed.
    pub fn from_fields(fields: Vec<(String, String)>) -> Self {
        Self { fields }
    }

    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set(name, value.into());
        self
    }

    /// Set a field, replacing any existing value under the same name.
    pub fn set(&mut self, name: &str, value: String) {
        if let Some(slot) = self.fields.iter_mut().find(|(n, _)| n == name) {
            slot.1 = value;
        } else {
            self.fields.push((name.to_string(), value));
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Parse a decimal integer field. `None` means the field is absent
    /// or unparseable, which makes a message requiring it malformed.
    pub fn int_field(&self, name: &str) -> Option<i64> {
        self.get(name)?.trim().parse().ok()
    }

    pub fn raw_type(&self) -> Option<&str> {
        self.get(fields::MESSAGE_TYPE)
    }

    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::parse(self.raw_type()?)
    }

    pub fn sequence_number(&self) -> Option<u64> {
        self.int_field(fields::SEQUENCE_NUMBER)
            .and_then(|n| u64::try_from(n).ok())
    }

    pub fn ack_number(&self) -> Option<u64> {
        self.int_field(fields::ACK_NUMBER)
            .and_then(|n| u64::try_from(n).ok())
    }

    pub fn is_ack(&self) -> bool {
        self.message_type() == Some(MessageType::Ack)
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    // ------------------------------------------------------------------
    // Typed constructors, one per registry entry
    // ------------------------------------------------------------------

    pub fn handshake_request() -> Self {
        Self::new(MessageType::HandshakeRequest)
    }

    pub fn handshake_response(seed: u64) -> Self {
        Self::new(MessageType::HandshakeResponse).with(fields::SEED, seed.to_string())
    }

    /// HANDSHAKE_RESPONSE for a spectator; the seed is included only
    /// when the host has already chosen one.
    pub fn spectator_response(seed: Option<u64>) -> Self {
        let message = Self::new(MessageType::HandshakeResponse);
        match seed {
            Some(seed) => message.with(fields::SEED, seed.to_string()),
            None => message,
        }
    }

    pub fn spectator_request() -> Self {
        Self::new(MessageType::SpectatorRequest)
    }

    pub fn battle_setup(mode: CommunicationMode, combatant: &str, boosts: StatBoosts) -> Self {
        Self::new(MessageType::BattleSetup)
            .with(fields::COMMUNICATION_MODE, mode.as_str())
            .with(fields::POKEMON_NAME, combatant)
            .with(fields::STAT_BOOSTS, boosts.encode())
    }

    pub fn attack_announce(move_name: &str) -> Self {
        Self::new(MessageType::AttackAnnounce).with(fields::MOVE_NAME, move_name)
    }

    pub fn defense_announce() -> Self {
        Self::new(MessageType::DefenseAnnounce)
    }

    pub fn calculation_report(
        attacker: &str,
        move_used: &str,
        remaining_health: u32,
        damage_dealt: u32,
        defender_hp_remaining: u32,
        status_message: &str,
    ) -> Self {
        Self::new(MessageType::CalculationReport)
            .with(fields::ATTACKER, attacker)
            .with(fields::MOVE_USED, move_used)
            .with(fields::REMAINING_HEALTH, remaining_health.to_string())
            .with(fields::DAMAGE_DEALT, damage_dealt.to_string())
            .with(
                fields::DEFENDER_HP_REMAINING,
                defender_hp_remaining.to_string(),
            )
            .with(fields::STATUS_MESSAGE, status_message)
    }

    pub fn calculation_confirm() -> Self {
        Self::new(MessageType::CalculationConfirm)
    }

    pub fn resolution_request(
        attacker: &str,
        move_used: &str,
        damage_dealt: u32,
        defender_hp_remaining: u32,
    ) -> Self {
        Self::new(MessageType::ResolutionRequest)
            .with(fields::ATTACKER, attacker)
            .with(fields::MOVE_USED, move_used)
            .with(fields::DAMAGE_DEALT, damage_dealt.to_string())
            .with(
                fields::DEFENDER_HP_REMAINING,
                defender_hp_remaining.to_string(),
            )
    }

    pub fn game_over(winner: &str, loser: &str) -> Self {
        Self::new(MessageType::GameOver)
            .with(fields::WINNER, winner)
            .with(fields::LOSER, loser)
    }

    pub fn chat_text(sender: &str, text: &str) -> Self {
        Self::new(MessageType::ChatMessage)
            .with(fields::SENDER_NAME, sender)
            .with(fields::CONTENT_TYPE, ContentType::Text.as_str())
            .with(fields::MESSAGE_TEXT, text)
    }

    pub fn chat_sticker(sender: &str, sticker_data: &str) -> Self {
        Self::new(MessageType::ChatMessage)
            .with(fields::SENDER_NAME, sender)
            .with(fields::CONTENT_TYPE, ContentType::Sticker.as_str())
            .with(fields::STICKER_DATA, sticker_data)
    }

    pub fn ack(ack_number: u64) -> Self {
        Self::new(MessageType::Ack).with(fields::ACK_NUMBER, ack_number.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_roundtrip() {
        let kinds = [
            MessageType::HandshakeRequest,
            MessageType::HandshakeResponse,
            MessageType::SpectatorRequest,
            MessageType::BattleSetup,
            MessageType::AttackAnnounce,
            MessageType::DefenseAnnounce,
            MessageType::CalculationReport,
            MessageType::CalculationConfirm,
            MessageType::ResolutionRequest,
            MessageType::GameOver,
            MessageType::ChatMessage,
            MessageType::Ack,
        ];
        for kind in kinds {
            assert_eq!(MessageType::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(MessageType::parse("ATACK_ANNOUNCE"), None);
    }

    #[test]
    fn test_set_replaces_existing_field() {
        let mut message = WireMessage::attack_announce("Tackle");
        message.set(fields::SEQUENCE_NUMBER, "4".to_string());
        message.set(fields::SEQUENCE_NUMBER, "5".to_string());
        assert_eq!(message.sequence_number(), Some(5));
        assert_eq!(
            message
                .fields()
                .iter()
                .filter(|(n, _)| n == fields::SEQUENCE_NUMBER)
                .count(),
            1
        );
    }

    #[test]
    fn test_ack_carries_no_sequence_number() {
        let ack = WireMessage::ack(9);
        assert!(ack.is_ack());
        assert_eq!(ack.ack_number(), Some(9));
        assert_eq!(ack.sequence_number(), None);
    }

    #[test]
    fn test_calculation_report_fields() {
        let report =
            WireMessage::calculation_report("Emberfox", "Flame Burst", 78, 20, 0, "hit");
        assert_eq!(report.int_field(fields::DAMAGE_DEALT), Some(20));
        assert_eq!(report.int_field(fields::DEFENDER_HP_REMAINING), Some(0));
        assert_eq!(report.get(fields::ATTACKER), Some("Emberfox"));
    }

    #[test]
    fn test_stat_boosts_json_roundtrip() {
        let boosts = StatBoosts {
            special_attack_uses: 3,
            special_defense_uses: 5,
        };
        let encoded = boosts.encode();
        assert!(!encoded.contains('\n'));
        assert_eq!(StatBoosts::decode(&encoded), boosts);
    }

    #[test]
    fn test_stat_boosts_lenient_decode() {
        let boosts = StatBoosts::decode("not json at all");
        assert_eq!(boosts, StatBoosts::default());
        assert_eq!(boosts.special_attack_uses, 5);
    }

    #[test]
    fn test_int_field_rejects_garbage() {
        let message = WireMessage::new(MessageType::CalculationReport)
            .with(fields::DAMAGE_DEALT, "twenty");
        assert_eq!(message.int_field(fields::DAMAGE_DEALT), None);
    }
}
