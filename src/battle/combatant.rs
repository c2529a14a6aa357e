//! Combatant model and the shared damage formula
//!
//! Both peers run [`calculate_damage`] independently with the same
//! inputs and must land on bit-identical integers; the reconciliation
//! step of the attack round only exists to catch the case where they
//! do not.

use std::collections::HashMap;

/// Element tags whose moves hit the physical defense stat.
pub const PHYSICAL_TYPES: [&str; 9] = [
    "normal", "fighting", "flying", "poison", "ground", "rock", "bug", "ghost", "steel",
];

/// Element tags whose moves hit the special defense stat.
pub const SPECIAL_TYPES: [&str; 9] = [
    "fire", "water", "grass", "electric", "psychic", "ice", "dragon", "dark", "fairy",
];

/// Which pair of stats an attack uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveCategory {
    Physical,
    Special,
}

impl MoveCategory {
    /// Category follows the element's side of the taxonomy partition.
    /// Tags outside the taxonomy fall to Special.
    pub fn for_element(element: &str) -> Self {
        let tag = element.to_ascii_lowercase();
        if PHYSICAL_TYPES.contains(&tag.as_str()) {
            MoveCategory::Physical
        } else {
            MoveCategory::Special
        }
    }
}

/// An attack as applied in one round.
#[derive(Debug, Clone, PartialEq)]
pub struct Move {
    pub name: String,
    /// Lowercase element tag; decides category and effectiveness.
    pub element: String,
    /// Reserved for future formulas; not consulted today.
    pub base_power: u32,
}

impl Move {
    /// Moves are constructed from the attacker's primary type tag, so
    /// both sides derive the same element without extra wire fields.
    pub fn from_attacker(name: &str, attacker: &Combatant) -> Self {
        Self {
            name: name.to_string(),
            element: attacker.primary_type.to_ascii_lowercase(),
            base_power: 1,
        }
    }

    pub fn category(&self) -> MoveCategory {
        MoveCategory::for_element(&self.element)
    }
}

/// A game piece held by a host or joiner for the life of the session.
#[derive(Debug, Clone, PartialEq)]
pub struct Combatant {
    pub name: String,
    pub max_hp: u32,
    pub current_hp: u32,
    pub physical_attack: u32,
    pub special_attack: u32,
    pub physical_defense: u32,
    pub special_defense: u32,
    pub primary_type: String,
    pub secondary_type: Option<String>,
    /// Attacking element tag (lowercase) to effectiveness factor.
    /// Missing entries mean neutral (1.0).
    pub type_multipliers: HashMap<String, f64>,
    pub moves: Vec<String>,
}

impl Combatant {
    pub fn is_fainted(&self) -> bool {
        self.current_hp == 0
    }

    /// Write an agreed remaining-HP value, clamped into [0, max_hp].
    pub fn set_remaining_hp(&mut self, remaining: u32) {
        self.current_hp = remaining.min(self.max_hp);
    }

    pub fn multiplier_against(&self, element: &str) -> f64 {
        self.type_multipliers
            .get(&element.to_ascii_lowercase())
            .copied()
            .unwrap_or(1.0)
    }

    pub fn first_move(&self) -> Option<&str> {
        self.moves.first().map(String::as_str)
    }
}

/// Snapshot pair for one attack round; does not outlive the round.
#[derive(Debug)]
pub struct BattleState<'a> {
    pub attacker: &'a Combatant,
    pub defender: &'a Combatant,
}

/// The shared damage formula.
///
/// `attack_boost` / `defense_boost` are 1.5 when the corresponding
/// boost was applied this round and 1.0 otherwise. Deterministic: no
/// randomness enters here, so equal inputs give equal integers on
/// both peers.
pub fn calculate_damage(
    state: &BattleState<'_>,
    mv: &Move,
    attack_boost: f64,
    defense_boost: f64,
) -> u32 {
    let (attack_stat, defense_stat) = match mv.category() {
        MoveCategory::Physical => (
            state.attacker.physical_attack,
            state.defender.physical_defense,
        ),
        MoveCategory::Special => (
            state.attacker.special_attack,
            state.defender.special_defense,
        ),
    };

    let attack = attack_stat as f64 * attack_boost;
    let mut defense = defense_stat as f64 * defense_boost;
    if defense <= 0.0 {
        defense = 1.0;
    }

    let multiplier = state.defender.multiplier_against(&mv.element);
    let raw = (attack * multiplier) / defense;
    let mut damage = raw.round_ties_even() as i64;

    // A move that has any effect always deals at least 1.
    if damage <= 0 && multiplier > 0.0 {
        damage = 1;
    }

    damage.max(0) as u32
}

/// Narrative line derived from the effectiveness multiplier.
pub fn status_message(attacker_name: &str, move_name: &str, multiplier: f64) -> String {
    let base = format!("{} used {}!", attacker_name, move_name);
    if multiplier == 0.0 {
        format!("{} It had no effect...", base)
    } else if multiplier < 1.0 {
        format!("{} It's not very effective...", base)
    } else if multiplier > 1.0 {
        format!("{} It was super effective!", base)
    } else {
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battle::BOOST_MULTIPLIER;

    fn combatant(name: &str, stats: [u32; 5], primary: &str) -> Combatant {
        Combatant {
            name: name.to_string(),
            max_hp: stats[0],
            current_hp: stats[0],
            physical_attack: stats[1],
            special_attack: stats[2],
            physical_defense: stats[3],
            special_defense: stats[4],
            primary_type: primary.to_string(),
            secondary_type: None,
            type_multipliers: HashMap::new(),
            moves: vec!["Strike".to_string()],
        }
    }

    #[test]
    fn test_taxonomy_partition_is_complete() {
        assert_eq!(PHYSICAL_TYPES.len() + SPECIAL_TYPES.len(), 18);
        for tag in PHYSICAL_TYPES {
            assert_eq!(MoveCategory::for_element(tag), MoveCategory::Physical);
        }
        for tag in SPECIAL_TYPES {
            assert_eq!(MoveCategory::for_element(tag), MoveCategory::Special);
        }
        // Unknown tags fall to Special.
        assert_eq!(MoveCategory::for_element("cosmic"), MoveCategory::Special);
    }

    #[test]
    fn test_move_takes_attacker_primary_type() {
        let attacker = combatant("A", [100, 50, 60, 40, 40], "Fire");
        let mv = Move::from_attacker("Flame Burst", &attacker);
        assert_eq!(mv.element, "fire");
        assert_eq!(mv.category(), MoveCategory::Special);
    }

    #[test]
    fn test_special_damage_with_multiplier() {
        let attacker = combatant("A", [100, 40, 100, 40, 40], "fire");
        let mut defender = combatant("D", [40, 40, 40, 40, 10], "grass");
        defender.type_multipliers.insert("fire".to_string(), 2.0);

        let mv = Move::from_attacker("Flame Burst", &attacker);
        let state = BattleState {
            attacker: &attacker,
            defender: &defender,
        };
        // (100 * 2.0) / 10 = 20
        assert_eq!(calculate_damage(&state, &mv, 1.0, 1.0), 20);
    }

    #[test]
    fn test_physical_uses_physical_stats() {
        let attacker = combatant("A", [100, 90, 10, 40, 40], "rock");
        let defender = combatant("D", [100, 40, 40, 30, 5], "normal");

        let mv = Move::from_attacker("Boulder Toss", &attacker);
        let state = BattleState {
            attacker: &attacker,
            defender: &defender,
        };
        // (90 * 1.0) / 30 = 3
        assert_eq!(calculate_damage(&state, &mv, 1.0, 1.0), 3);
    }

    #[test]
    fn test_round_half_to_even() {
        let attacker = combatant("A", [100, 40, 25, 40, 40], "fire");
        let defender = combatant("D", [100, 40, 40, 40, 10], "water");
        let mv = Move::from_attacker("Spark", &attacker);
        let state = BattleState {
            attacker: &attacker,
            defender: &defender,
        };
        // 25 / 10 = 2.5 rounds to 2
        assert_eq!(calculate_damage(&state, &mv, 1.0, 1.0), 2);

        let attacker = combatant("A", [100, 40, 35, 40, 40], "fire");
        let state = BattleState {
            attacker: &attacker,
            defender: &defender,
        };
        // 35 / 10 = 3.5 rounds to 4
        assert_eq!(calculate_damage(&state, &mv, 1.0, 1.0), 4);
    }

    #[test]
    fn test_boosts_scale_the_right_stat() {
        let attacker = combatant("A", [100, 40, 100, 40, 40], "fire");
        let defender = combatant("D", [100, 40, 40, 40, 50], "water");
        let mv = Move::from_attacker("Spark", &attacker);
        let state = BattleState {
            attacker: &attacker,
            defender: &defender,
        };

        // Unboosted: 100 / 50 = 2
        assert_eq!(calculate_damage(&state, &mv, 1.0, 1.0), 2);
        // Attack boost: 150 / 50 = 3
        assert_eq!(calculate_damage(&state, &mv, BOOST_MULTIPLIER, 1.0), 3);
        // Defense boost: 100 / 75 = 1.33 -> 1
        assert_eq!(calculate_damage(&state, &mv, 1.0, BOOST_MULTIPLIER), 1);
    }

    #[test]
    fn test_minimum_one_damage_when_effective() {
        let attacker = combatant("A", [100, 40, 5, 40, 40], "fire");
        let mut defender = combatant("D", [100, 40, 40, 40, 200], "water");
        defender.type_multipliers.insert("fire".to_string(), 0.5);
        let mv = Move::from_attacker("Spark", &attacker);
        let state = BattleState {
            attacker: &attacker,
            defender: &defender,
        };
        assert_eq!(calculate_damage(&state, &mv, 1.0, 1.0), 1);
    }

    #[test]
    fn test_zero_damage_when_immune() {
        let attacker = combatant("A", [100, 90, 40, 40, 40], "ground");
        let mut defender = combatant("D", [100, 40, 40, 10, 10], "flying");
        defender.type_multipliers.insert("ground".to_string(), 0.0);
        let mv = Move::from_attacker("Quake Stomp", &attacker);
        let state = BattleState {
            attacker: &attacker,
            defender: &defender,
        };
        assert_eq!(calculate_damage(&state, &mv, 1.0, 1.0), 0);
    }

    #[test]
    fn test_zero_defense_is_floored() {
        let attacker = combatant("A", [100, 40, 30, 40, 40], "fire");
        let defender = combatant("D", [100, 40, 40, 40, 0], "water");
        let mv = Move::from_attacker("Spark", &attacker);
        let state = BattleState {
            attacker: &attacker,
            defender: &defender,
        };
        // Defense floored to 1: 30 / 1 = 30
        assert_eq!(calculate_damage(&state, &mv, 1.0, 1.0), 30);
    }

    #[test]
    fn test_damage_is_symmetric_across_boost_configurations() {
        let attacker = combatant("A", [100, 73, 88, 61, 54], "ice");
        let mut defender = combatant("D", [100, 66, 59, 47, 39], "fire");
        defender.type_multipliers.insert("ice".to_string(), 0.5);
        let mv = Move::from_attacker("Glacier Bite", &attacker);

        for attack_boost in [1.0, BOOST_MULTIPLIER] {
            for defense_boost in [1.0, BOOST_MULTIPLIER] {
                let here = calculate_damage(
                    &BattleState {
                        attacker: &attacker,
                        defender: &defender,
                    },
                    &mv,
                    attack_boost,
                    defense_boost,
                );
                // The "other side" evaluates the same pure function on
                // clones of the same data.
                let there = calculate_damage(
                    &BattleState {
                        attacker: &attacker.clone(),
                        defender: &defender.clone(),
                    },
                    &mv.clone(),
                    attack_boost,
                    defense_boost,
                );
                assert_eq!(here, there);
            }
        }
    }

    #[test]
    fn test_status_messages() {
        assert_eq!(
            status_message("Emberfox", "Flame Burst", 2.0),
            "Emberfox used Flame Burst! It was super effective!"
        );
        assert_eq!(
            status_message("Emberfox", "Flame Burst", 0.5),
            "Emberfox used Flame Burst! It's not very effective..."
        );
        assert_eq!(
            status_message("Emberfox", "Flame Burst", 0.0),
            "Emberfox used Flame Burst! It had no effect..."
        );
        assert_eq!(
            status_message("Emberfox", "Flame Burst", 1.0),
            "Emberfox used Flame Burst!"
        );
    }

    #[test]
    fn test_set_remaining_hp_clamps() {
        let mut defender = combatant("D", [50, 1, 1, 1, 1], "normal");
        defender.set_remaining_hp(200);
        assert_eq!(defender.current_hp, 50);
        defender.set_remaining_hp(0);
        assert!(defender.is_fainted());
    }
}
