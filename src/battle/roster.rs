//! Combatant catalogue
//!
//! The engine looks combatants up by lowercase name. A built-in roster
//! ships with the binary; `--roster <path>` swaps in a TOML file of
//! the same shape.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::Combatant;

/// Roster errors
#[derive(Error, Debug)]
pub enum RosterError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("roster contains no combatants")]
    Empty,
}

/// One catalogue entry. `instantiate` stamps out a fresh combatant at
/// full health for a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombatantTemplate {
    pub name: String,
    pub hp: u32,
    pub physical_attack: u32,
    pub special_attack: u32,
    pub physical_defense: u32,
    pub special_defense: u32,
    pub primary_type: String,
    #[serde(default)]
    pub secondary_type: Option<String>,
    #[serde(default)]
    pub type_multipliers: HashMap<String, f64>,
    #[serde(default)]
    pub moves: Vec<String>,
}

impl CombatantTemplate {
    pub fn instantiate(&self) -> Combatant {
        Combatant {
            name: self.name.clone(),
            max_hp: self.hp,
            current_hp: self.hp,
            physical_attack: self.physical_attack,
            special_attack: self.special_attack,
            physical_defense: self.physical_defense,
            special_defense: self.special_defense,
            primary_type: self.primary_type.to_ascii_lowercase(),
            secondary_type: self
                .secondary_type
                .as_ref()
                .map(|t| t.to_ascii_lowercase()),
            type_multipliers: self
                .type_multipliers
                .iter()
                .map(|(tag, factor)| (tag.to_ascii_lowercase(), *factor))
                .collect(),
            moves: self.moves.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RosterFile {
    #[serde(rename = "combatant")]
    combatants: Vec<CombatantTemplate>,
}

/// Lowercase-name lookup over combatant templates.
#[derive(Debug, Clone)]
pub struct Roster {
    by_name: HashMap<String, CombatantTemplate>,
}

impl Roster {
    pub fn from_templates(templates: Vec<CombatantTemplate>) -> Self {
        let by_name = templates
            .into_iter()
            .map(|template| (template.name.to_ascii_lowercase(), template))
            .collect();
        Self { by_name }
    }

    /// The roster compiled into the binary.
    pub fn builtin() -> Self {
        Self::from_templates(builtin_templates())
    }

    /// Load a roster from a TOML file of `[[combatant]]` tables.
    pub fn load(path: &Path) -> Result<Self, RosterError> {
        let contents = std::fs::read_to_string(path)?;
        let file: RosterFile = toml::from_str(&contents)?;
        if file.combatants.is_empty() {
            return Err(RosterError::Empty);
        }
        Ok(Self::from_templates(file.combatants))
    }

    pub fn get(&self, name: &str) -> Option<&CombatantTemplate> {
        self.by_name.get(&name.to_ascii_lowercase())
    }

    /// Instantiate a combatant by name, if present.
    pub fn spawn(&self, name: &str) -> Option<Combatant> {
        self.get(name).map(CombatantTemplate::instantiate)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .by_name
            .values()
            .map(|template| template.name.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

fn template(
    name: &str,
    hp: u32,
    stats: [u32; 4],
    primary: &str,
    secondary: Option<&str>,
    multipliers: &[(&str, f64)],
    moves: &[&str],
) -> CombatantTemplate {
    CombatantTemplate {
        name: name.to_string(),
        hp,
        physical_attack: stats[0],
        special_attack: stats[1],
        physical_defense: stats[2],
        special_defense: stats[3],
        primary_type: primary.to_string(),
        secondary_type: secondary.map(str::to_string),
        type_multipliers: multipliers
            .iter()
            .map(|(tag, factor)| (tag.to_string(), *factor))
            .collect(),
        moves: moves.iter().map(|m| m.to_string()).collect(),
    }
}

fn builtin_templates() -> Vec<CombatantTemplate> {
    vec![
        template(
            "Emberfox",
            78,
            [52, 95, 48, 70],
            "fire",
            None,
            &[
                ("water", 2.0),
                ("ground", 2.0),
                ("rock", 2.0),
                ("fire", 0.5),
                ("grass", 0.5),
                ("ice", 0.5),
                ("bug", 0.5),
                ("steel", 0.5),
                ("fairy", 0.5),
            ],
            &["Flame Burst", "Cinder Tail", "Blazing Rush"],
        ),
        template(
            "Tidecrab",
            85,
            [80, 60, 90, 65],
            "water",
            None,
            &[
                ("electric", 2.0),
                ("grass", 2.0),
                ("fire", 0.5),
                ("water", 0.5),
                ("ice", 0.5),
                ("steel", 0.5),
            ],
            &["Bubble Jet", "Shell Slam", "Rip Current"],
        ),
        template(
            "Thornwolf",
            82,
            [88, 55, 60, 62],
            "grass",
            None,
            &[
                ("fire", 2.0),
                ("ice", 2.0),
                ("poison", 2.0),
                ("flying", 2.0),
                ("bug", 2.0),
                ("water", 0.5),
                ("electric", 0.5),
                ("grass", 0.5),
                ("ground", 0.5),
            ],
            &["Razor Vine", "Thorn Fang", "Verdant Howl"],
        ),
        template(
            "Voltwing",
            72,
            [60, 92, 55, 68],
            "electric",
            Some("flying"),
            &[
                ("ice", 2.0),
                ("rock", 2.0),
                ("ground", 0.0),
                ("electric", 0.5),
                ("flying", 0.5),
                ("fighting", 0.5),
                ("bug", 0.5),
                ("steel", 0.5),
                ("grass", 0.5),
            ],
            &["Storm Dive", "Static Gale", "Thunder Lance"],
        ),
        template(
            "Stonehorn",
            95,
            [100, 45, 105, 50],
            "rock",
            Some("ground"),
            &[
                ("water", 2.0),
                ("grass", 2.0),
                ("ice", 2.0),
                ("fighting", 2.0),
                ("ground", 2.0),
                ("steel", 2.0),
                ("electric", 0.0),
                ("fire", 0.5),
                ("normal", 0.5),
                ("flying", 0.5),
                ("poison", 0.5),
                ("rock", 0.5),
            ],
            &["Granite Ram", "Quake Stomp", "Boulder Toss"],
        ),
        template(
            "Frostmaw",
            76,
            [84, 74, 58, 64],
            "ice",
            None,
            &[
                ("fire", 2.0),
                ("fighting", 2.0),
                ("rock", 2.0),
                ("steel", 2.0),
                ("ice", 0.5),
            ],
            &["Glacier Bite", "Hail Crush", "White Out"],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_builtin_lookup_is_case_insensitive() {
        let roster = Roster::builtin();
        assert!(roster.get("emberfox").is_some());
        assert!(roster.get("EMBERFOX").is_some());
        assert!(roster.get("missingno").is_none());
    }

    #[test]
    fn test_spawn_starts_at_full_health() {
        let roster = Roster::builtin();
        let combatant = roster.spawn("tidecrab").unwrap();
        assert_eq!(combatant.current_hp, combatant.max_hp);
        assert_eq!(combatant.primary_type, "water");
        assert!(!combatant.moves.is_empty());
    }

    #[test]
    fn test_builtin_type_tags_are_lowercase() {
        let roster = Roster::builtin();
        for name in roster.names() {
            let combatant = roster.spawn(name).unwrap();
            assert_eq!(combatant.primary_type, combatant.primary_type.to_lowercase());
            for tag in combatant.type_multipliers.keys() {
                assert_eq!(tag, &tag.to_lowercase());
            }
        }
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [[combatant]]
            name = "Testling"
            hp = 40
            physical_attack = 10
            special_attack = 100
            physical_defense = 10
            special_defense = 10
            primary_type = "Fire"

            [combatant.type_multipliers]
            water = 2.0
            "#
        )
        .unwrap();

        let roster = Roster::load(file.path()).unwrap();
        assert_eq!(roster.len(), 1);
        let combatant = roster.spawn("testling").unwrap();
        assert_eq!(combatant.primary_type, "fire");
        assert_eq!(combatant.multiplier_against("water"), 2.0);
        assert_eq!(combatant.multiplier_against("grass"), 1.0);
    }

    #[test]
    fn test_empty_roster_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "combatant = []").unwrap();
        assert!(matches!(
            Roster::load(file.path()),
            Err(RosterError::Empty)
        ));
    }
}
