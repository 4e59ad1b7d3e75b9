//! Per-channel registry of characters and narrator-spawned creatures.
//!
//! Names are case-insensitive keys. Every registry operation routes the
//! caller's name through [`normalize_name`] so lookups, inserts, and
//! removals always agree on identity.

use crate::directory::ChannelId;
use crate::error::StoreError;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;

/// Status given to a player character whose HP reaches zero.
pub const INCAPACITATED_STATUS: &str = "unconscious";

/// Status summary text for an empty registry.
pub const NO_CHARACTERS: &str = "No characters are present.";

/// Normalize an entity name into its registry key.
///
/// Trims surrounding whitespace and lowercases with Unicode case mapping.
pub fn normalize_name(name: &str) -> Result<String, StoreError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(StoreError::invalid("character name cannot be empty"));
    }
    Ok(trimmed.to_lowercase())
}

/// A character or creature tracked in a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    pub class: String,
    pub hp: i32,
    pub max_hp: i32,
    #[serde(rename = "str")]
    pub strength: i32,
    #[serde(default)]
    pub status: String,
    /// Spawned by the narrator rather than owned by a player.
    #[serde(default, alias = "is_ai")]
    pub narrator_controlled: bool,
}

impl Entity {
    /// A player character at full health.
    pub fn player(
        name: impl Into<String>,
        class: impl Into<String>,
        hp: i32,
        strength: i32,
    ) -> Self {
        Self {
            name: name.into(),
            class: class.into(),
            hp,
            max_hp: hp,
            strength,
            status: String::new(),
            narrator_controlled: false,
        }
    }

    /// A narrator-controlled creature.
    pub fn npc(
        name: impl Into<String>,
        class: impl Into<String>,
        hp: i32,
        max_hp: i32,
        strength: i32,
    ) -> Self {
        Self {
            name: name.into(),
            class: class.into(),
            hp,
            max_hp,
            strength,
            status: String::new(),
            narrator_controlled: true,
        }
    }

    /// Whether the entity has been knocked out.
    pub fn is_incapacitated(&self) -> bool {
        self.hp == 0 && self.status == INCAPACITATED_STATUS
    }

    fn clamp_hp(&mut self) {
        self.hp = self.hp.clamp(0, self.max_hp);
    }

    fn summary_line(&self) -> String {
        let mut line = format!(
            "- {} ({}): HP {}/{}, STR {}",
            self.name, self.class, self.hp, self.max_hp, self.strength
        );
        if self.narrator_controlled {
            line.push_str(" [NPC]");
        }
        if !self.status.is_empty() {
            let _ = write!(line, " [{}]", self.status);
        }
        line
    }
}

/// What happened to an entity after an HP change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HpOutcome {
    /// Still above zero HP.
    Standing,
    /// A player character that just dropped to zero HP, kept with a
    /// terminal status.
    Incapacitated,
    /// A player character that was already down and took more damage.
    StillDown,
    /// A narrator creature at zero HP, removed from the registry.
    Destroyed,
}

/// Result of [`EntityRegistry::apply_hp_delta`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HpChange {
    /// The entity after the change. For `Destroyed` this is the last state
    /// before removal.
    pub entity: Entity,
    pub previous_hp: i32,
    pub delta: i32,
    pub outcome: HpOutcome,
}

/// Serializable copy of a registry's contents, keyed by normalized name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityExport {
    pub entities: BTreeMap<String, Entity>,
}

/// Characters and creatures for a single channel.
#[derive(Debug)]
pub struct EntityRegistry {
    channel_id: ChannelId,
    entities: RwLock<HashMap<String, Entity>>,
}

impl EntityRegistry {
    /// Create an empty registry for a channel.
    pub fn new(channel_id: ChannelId) -> Self {
        Self {
            channel_id,
            entities: RwLock::new(HashMap::new()),
        }
    }

    /// Rebuild a registry from an export.
    pub fn from_export(channel_id: ChannelId, export: &EntityExport) -> Result<Self, StoreError> {
        let entities = Self::rekey(export)?;
        Ok(Self {
            channel_id,
            entities: RwLock::new(entities),
        })
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    /// Insert an entity, replacing any existing one with the same name.
    pub fn add_or_replace(&self, mut entity: Entity) -> Result<(), StoreError> {
        let key = normalize_name(&entity.name)?;
        if entity.max_hp < 0 {
            return Err(StoreError::invalid(format!(
                "max HP for {} cannot be negative",
                entity.name
            )));
        }
        entity.clamp_hp();
        self.entities.write().insert(key, entity);
        Ok(())
    }

    /// Look up an entity by name.
    pub fn get(&self, name: &str) -> Result<Entity, StoreError> {
        let key = normalize_name(name)?;
        self.entities
            .read()
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::entity_not_found(name.trim()))
    }

    /// Remove an entity if present. Returns the removed entity.
    pub fn remove(&self, name: &str) -> Option<Entity> {
        let key = normalize_name(name).ok()?;
        self.entities.write().remove(&key)
    }

    pub fn len(&self) -> usize {
        self.entities.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.read().is_empty()
    }

    /// All entities, sorted by normalized name.
    pub fn list(&self) -> Vec<Entity> {
        let entities = self.entities.read();
        let mut keyed: Vec<_> = entities.iter().collect();
        keyed.sort_by(|a, b| a.0.cmp(b.0));
        keyed.into_iter().map(|(_, e)| e.clone()).collect()
    }

    /// One line per entity, sorted by name, for prompt injection.
    pub fn status_summary(&self) -> String {
        let entities = self.list();
        if entities.is_empty() {
            return NO_CHARACTERS.to_string();
        }

        let mut summary = String::from("Current characters:\n");
        for entity in &entities {
            summary.push_str(&entity.summary_line());
            summary.push('\n');
        }
        summary
    }

    /// Detailed view of a single entity.
    pub fn describe(&self, name: &str) -> Result<String, StoreError> {
        let entity = self.get(name)?;
        let mut text = format!(
            "Name: {}\nClass: {}\nHP: {}/{}\nSTR: {}",
            entity.name, entity.class, entity.hp, entity.max_hp, entity.strength
        );
        if !entity.status.is_empty() {
            let _ = write!(text, "\nStatus: {}", entity.status);
        }
        if entity.narrator_controlled {
            text.push_str("\nControlled by: narrator");
        }
        Ok(text)
    }

    /// Add `delta` to an entity's HP, clamped to `[0, max_hp]`.
    ///
    /// At zero HP a narrator creature is removed and a player character is
    /// kept with [`INCAPACITATED_STATUS`]. The whole update happens under a
    /// single write lock.
    pub fn apply_hp_delta(&self, name: &str, delta: i32) -> Result<HpChange, StoreError> {
        let key = normalize_name(name)?;
        let mut entities = self.entities.write();

        let entity = entities
            .get_mut(&key)
            .ok_or_else(|| StoreError::entity_not_found(name.trim()))?;

        let previous_hp = entity.hp;
        let was_down = entity.is_incapacitated();
        entity.hp = entity.hp.saturating_add(delta);
        entity.clamp_hp();

        if entity.hp > 0 {
            if previous_hp == 0 && entity.status == INCAPACITATED_STATUS {
                entity.status.clear();
            }
            return Ok(HpChange {
                entity: entity.clone(),
                previous_hp,
                delta,
                outcome: HpOutcome::Standing,
            });
        }

        if entity.narrator_controlled {
            let removed = entities
                .remove(&key)
                .ok_or_else(|| StoreError::entity_not_found(name.trim()))?;
            Ok(HpChange {
                entity: removed,
                previous_hp,
                delta,
                outcome: HpOutcome::Destroyed,
            })
        } else {
            entity.hp = 0;
            entity.status = INCAPACITATED_STATUS.to_string();
            Ok(HpChange {
                entity: entity.clone(),
                previous_hp,
                delta,
                outcome: if was_down {
                    HpOutcome::StillDown
                } else {
                    HpOutcome::Incapacitated
                },
            })
        }
    }

    /// Copy the current contents.
    pub fn export(&self) -> EntityExport {
        let entities = self.entities.read();
        EntityExport {
            entities: entities.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        }
    }

    /// Replace the whole contents with an export.
    ///
    /// The export is validated first; on error the registry is unchanged.
    pub fn restore(&self, export: &EntityExport) -> Result<(), StoreError> {
        let entities = Self::rekey(export)?;
        *self.entities.write() = entities;
        Ok(())
    }

    fn rekey(export: &EntityExport) -> Result<HashMap<String, Entity>, StoreError> {
        let mut entities = HashMap::with_capacity(export.entities.len());
        for entity in export.entities.values() {
            let key = normalize_name(&entity.name)?;
            let mut entity = entity.clone();
            entity.max_hp = entity.max_hp.max(0);
            entity.clamp_hp();
            entities.insert(key, entity);
        }
        Ok(entities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_rogar() -> EntityRegistry {
        let registry = EntityRegistry::new(1001);
        registry
            .add_or_replace(Entity::player("Rogar", "Fighter", 20, 14))
            .unwrap();
        registry
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("  Rogar ").unwrap(), "rogar");
        assert_eq!(normalize_name("ÉLODIE").unwrap(), "élodie");
        assert!(matches!(
            normalize_name("   "),
            Err(StoreError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_case_insensitive_lookup() {
        let registry = registry_with_rogar();
        assert_eq!(registry.get("ROGAR").unwrap().name, "Rogar");
        assert_eq!(registry.get("rogar").unwrap().class, "Fighter");
    }

    #[test]
    fn test_add_replaces_same_name() {
        let registry = registry_with_rogar();
        registry
            .add_or_replace(Entity::player("rogar", "Paladin", 30, 16))
            .unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("Rogar").unwrap().class, "Paladin");
    }

    #[test]
    fn test_add_empty_name_rejected() {
        let registry = EntityRegistry::new(1);
        let result = registry.add_or_replace(Entity::player("", "Wizard", 8, 8));
        assert!(matches!(result, Err(StoreError::InvalidArgument(_))));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_add_clamps_hp() {
        let registry = EntityRegistry::new(1);
        let mut goblin = Entity::npc("Goblin", "Humanoid", 12, 7, 8);
        registry.add_or_replace(goblin.clone()).unwrap();
        assert_eq!(registry.get("goblin").unwrap().hp, 7);

        goblin.hp = -4;
        registry.add_or_replace(goblin).unwrap();
        assert_eq!(registry.get("goblin").unwrap().hp, 0);
    }

    #[test]
    fn test_get_missing() {
        let registry = EntityRegistry::new(1);
        assert!(matches!(
            registry.get("nobody"),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn test_remove_is_noop_when_absent() {
        let registry = registry_with_rogar();
        assert!(registry.remove("ghost").is_none());
        assert!(registry.remove("ROGAR").is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_hp_delta_clamps_to_max() {
        let registry = registry_with_rogar();
        registry.apply_hp_delta("rogar", -5).unwrap();
        let change = registry.apply_hp_delta("rogar", 100).unwrap();

        assert_eq!(change.previous_hp, 15);
        assert_eq!(change.entity.hp, 20);
        assert_eq!(change.outcome, HpOutcome::Standing);
    }

    #[test]
    fn test_player_incapacitated_at_zero() {
        let registry = registry_with_rogar();
        let change = registry.apply_hp_delta("Rogar", -25).unwrap();

        assert_eq!(change.outcome, HpOutcome::Incapacitated);
        assert_eq!(change.entity.hp, 0);

        let rogar = registry.get("rogar").unwrap();
        assert_eq!(rogar.hp, 0);
        assert_eq!(rogar.status, INCAPACITATED_STATUS);
        assert!(rogar.is_incapacitated());
    }

    #[test]
    fn test_further_damage_while_down() {
        let registry = registry_with_rogar();
        registry.apply_hp_delta("rogar", -25).unwrap();

        let change = registry.apply_hp_delta("rogar", -3).unwrap();
        assert_eq!(change.outcome, HpOutcome::StillDown);
        assert_eq!(change.previous_hp, 0);
        assert!(change.entity.is_incapacitated());
    }

    #[test]
    fn test_npc_destroyed_at_zero() {
        let registry = EntityRegistry::new(1);
        registry
            .add_or_replace(Entity::npc("Goblin", "Humanoid", 7, 7, 8))
            .unwrap();

        let change = registry.apply_hp_delta("goblin", -7).unwrap();
        assert_eq!(change.outcome, HpOutcome::Destroyed);
        assert_eq!(change.entity.name, "Goblin");
        assert!(matches!(
            registry.get("goblin"),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn test_healing_revives_player() {
        let registry = registry_with_rogar();
        registry.apply_hp_delta("rogar", -30).unwrap();
        let change = registry.apply_hp_delta("rogar", 4).unwrap();

        assert_eq!(change.outcome, HpOutcome::Standing);
        assert_eq!(change.entity.hp, 4);
        assert!(change.entity.status.is_empty());
    }

    #[test]
    fn test_hp_delta_unknown_entity() {
        let registry = EntityRegistry::new(1);
        assert!(matches!(
            registry.apply_hp_delta("nobody", -1),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn test_hp_stays_in_range_over_many_deltas() {
        let registry = registry_with_rogar();
        let deltas = [-3, 50, -100, 7, i32::MAX, -1, i32::MIN, 12, -19, 3];
        for delta in deltas {
            let change = registry.apply_hp_delta("rogar", delta).unwrap();
            assert!((0..=20).contains(&change.entity.hp));
        }
    }

    #[test]
    fn test_status_summary_empty() {
        let registry = EntityRegistry::new(1);
        assert_eq!(registry.status_summary(), NO_CHARACTERS);
    }

    #[test]
    fn test_status_summary_lists_everyone() {
        let registry = registry_with_rogar();
        registry
            .add_or_replace(Entity::npc("Goblin", "Humanoid", 7, 7, 8))
            .unwrap();

        let summary = registry.status_summary();
        assert!(summary.contains("- Rogar (Fighter): HP 20/20, STR 14"));
        assert!(summary.contains("- Goblin (Humanoid): HP 7/7, STR 8 [NPC]"));
    }

    #[test]
    fn test_describe() {
        let registry = registry_with_rogar();
        let text = registry.describe("ROGAR").unwrap();
        assert!(text.contains("Name: Rogar"));
        assert!(text.contains("HP: 20/20"));
        assert!(registry.describe("nobody").is_err());
    }

    #[test]
    fn test_export_restore() {
        let registry = registry_with_rogar();
        let export = registry.export();
        assert!(export.entities.contains_key("rogar"));

        let other = EntityRegistry::new(1001);
        other
            .add_or_replace(Entity::player("Stale", "Rogue", 5, 5))
            .unwrap();
        other.restore(&export).unwrap();

        assert_eq!(other.export(), export);
    }

    #[test]
    fn test_restore_rejects_bad_export_without_change() {
        let registry = registry_with_rogar();
        let mut export = EntityExport::default();
        export
            .entities
            .insert("blank".to_string(), Entity::player(" ", "Rogue", 5, 5));

        assert!(registry.restore(&export).is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_entity_json_field_names() {
        let json = serde_json::to_value(Entity::player("Rogar", "Fighter", 20, 14)).unwrap();
        assert_eq!(json["str"], 14);
        assert_eq!(json["max_hp"], 20);

        let npc: Entity = serde_json::from_str(
            r#"{"name":"Orc","class":"Brute","hp":15,"max_hp":15,"str":16,"is_ai":true}"#,
        )
        .unwrap();
        assert!(npc.narrator_controlled);
        assert!(npc.status.is_empty());
    }
}
