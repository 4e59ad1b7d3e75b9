//! Narrator actions embedded in model replies.
//!
//! The narrator requests state changes by ending its reply with a block
//!
//! ```text
//! <dnd_action>[{"type": "hp", "target": "Rogar", "value": -5}]</dnd_action>
//! ```
//!
//! holding either a JSON array of actions or a single action object.
//! Actions are applied in order; each one that takes effect appends a
//! system message to the channel's conversation and yields a log line for
//! the players. Malformed or unknown actions are skipped.

use crate::conversation::{ConversationStore, Role};
use crate::dice;
use crate::entity::{Entity, EntityRegistry, HpOutcome};
use serde::Deserialize;

const ACTION_OPEN: &str = "<dnd_action>";
const ACTION_CLOSE: &str = "</dnd_action>";

/// A state change requested by the narrator.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NarratorAction {
    /// Roll dice on the narrator's behalf.
    Roll {
        expr: String,
        #[serde(default)]
        reason: String,
    },
    /// Change an entity's HP by `value`.
    Hp { target: String, value: i32 },
    /// Bring a new narrator-controlled creature into the scene.
    SpawnNpc {
        name: String,
        #[serde(default)]
        class: String,
        hp: i32,
        #[serde(default)]
        max_hp: i32,
        #[serde(default, rename = "str")]
        strength: i32,
    },
}

/// Extract the actions from a narrator reply.
///
/// Returns an empty list when there is no action block or it cannot be
/// parsed at all. Individual entries that fail to parse are dropped.
pub fn parse_actions(reply: &str) -> Vec<NarratorAction> {
    let Some(block) = action_block(reply) else {
        return Vec::new();
    };

    let values = match serde_json::from_str::<serde_json::Value>(block) {
        Ok(serde_json::Value::Array(values)) => values,
        Ok(value) => vec![value],
        Err(err) => {
            tracing::warn!(error = %err, "Unparseable narrator action block");
            return Vec::new();
        }
    };

    values
        .into_iter()
        .filter_map(|value| match serde_json::from_value(value) {
            Ok(action) => Some(action),
            Err(err) => {
                tracing::warn!(error = %err, "Skipping narrator action");
                None
            }
        })
        .collect()
}

/// The reply text with the action block removed, for display.
pub fn strip_actions(reply: &str) -> String {
    match (reply.find(ACTION_OPEN), reply.find(ACTION_CLOSE)) {
        (Some(start), Some(end)) if end > start => {
            let mut text = reply[..start].to_string();
            text.push_str(&reply[end + ACTION_CLOSE.len()..]);
            text.trim().to_string()
        }
        _ => reply.trim().to_string(),
    }
}

fn action_block(reply: &str) -> Option<&str> {
    let start = reply.find(ACTION_OPEN)? + ACTION_OPEN.len();
    let len = reply[start..].find(ACTION_CLOSE)?;
    Some(reply[start..start + len].trim())
}

/// Apply narrator actions to a channel, returning one log line per event.
pub fn apply_actions(
    actions: &[NarratorAction],
    registry: &EntityRegistry,
    conversation: &ConversationStore,
) -> Vec<String> {
    let mut logs = Vec::new();

    for action in actions {
        match action {
            NarratorAction::Roll { expr, reason } => {
                if expr.trim().is_empty() {
                    continue;
                }
                match dice::roll(expr) {
                    Ok(result) => {
                        let reason = if reason.is_empty() { "Roll" } else { reason.as_str() };
                        record(&mut logs, conversation, format!("{reason}: {result}"));
                    }
                    Err(err) => tracing::warn!(expr = %expr, error = %err, "Narrator roll failed"),
                }
            }
            NarratorAction::Hp { target, value } => {
                if target.trim().is_empty() {
                    continue;
                }
                let change = match registry.apply_hp_delta(target, *value) {
                    Ok(change) => change,
                    Err(err) => {
                        logs.push(format!(
                            "Warning: narrator tried to change HP of unknown character '{target}'"
                        ));
                        tracing::warn!(character = %target, error = %err, "HP change skipped");
                        continue;
                    }
                };

                let name = &change.entity.name;
                record(
                    &mut logs,
                    conversation,
                    format!(
                        "{name} HP changes by {value} ({} -> {})",
                        change.previous_hp, change.entity.hp
                    ),
                );
                match change.outcome {
                    HpOutcome::Standing | HpOutcome::StillDown => {}
                    HpOutcome::Destroyed => {
                        record(&mut logs, conversation, format!("{name} has been slain."));
                    }
                    HpOutcome::Incapacitated => {
                        record(
                            &mut logs,
                            conversation,
                            format!(
                                "{name} falls unconscious (HP: 0) and needs healing or a death save."
                            ),
                        );
                    }
                }
            }
            NarratorAction::SpawnNpc {
                name,
                class,
                hp,
                max_hp,
                strength,
            } => {
                let max_hp = if *max_hp == 0 { *hp } else { *max_hp };
                let npc = Entity::npc(name.clone(), class.clone(), *hp, max_hp, *strength);
                match registry.add_or_replace(npc) {
                    Ok(()) => record(
                        &mut logs,
                        conversation,
                        format!("New creature appears: {name} ({class}) HP {hp}/{max_hp}"),
                    ),
                    Err(err) => tracing::warn!(error = %err, "Spawn skipped"),
                }
            }
        }
    }

    logs
}

fn record(logs: &mut Vec<String>, conversation: &ConversationStore, line: String) {
    conversation.append(Role::System, format!("System: {line}"));
    logs.push(line);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::INCAPACITATED_STATUS;

    fn channel() -> (EntityRegistry, ConversationStore) {
        (EntityRegistry::new(1), ConversationStore::new(1, 50))
    }

    #[test]
    fn test_parse_array() {
        let reply = r#"The goblin lunges!
<dnd_action>
[{"type": "hp", "target": "Rogar", "value": -5},
 {"type": "roll", "expr": "1d20", "reason": "Goblin attack"}]
</dnd_action>"#;

        let actions = parse_actions(reply);
        assert_eq!(
            actions,
            vec![
                NarratorAction::Hp {
                    target: "Rogar".to_string(),
                    value: -5
                },
                NarratorAction::Roll {
                    expr: "1d20".to_string(),
                    reason: "Goblin attack".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_parse_single_object() {
        let reply = r#"<dnd_action>{"type": "spawn_npc", "name": "Goblin", "class": "Humanoid", "hp": 7, "str": 8}</dnd_action>"#;
        let actions = parse_actions(reply);
        assert_eq!(
            actions,
            vec![NarratorAction::SpawnNpc {
                name: "Goblin".to_string(),
                class: "Humanoid".to_string(),
                hp: 7,
                max_hp: 0,
                strength: 8,
            }]
        );
    }

    #[test]
    fn test_parse_skips_unknown_and_garbage() {
        assert!(parse_actions("No actions here.").is_empty());
        assert!(parse_actions("<dnd_action>not json</dnd_action>").is_empty());

        let reply = r#"<dnd_action>[{"type": "teleport"}, {"type": "hp", "target": "A", "value": 1}]</dnd_action>"#;
        assert_eq!(parse_actions(reply).len(), 1);
    }

    #[test]
    fn test_strip_actions() {
        let reply = "You win.\n<dnd_action>[]</dnd_action>\n";
        assert_eq!(strip_actions(reply), "You win.");
        assert_eq!(strip_actions("  plain  "), "plain");
    }

    #[test]
    fn test_spawn_then_slay() {
        let (registry, conversation) = channel();
        let actions = vec![
            NarratorAction::SpawnNpc {
                name: "Goblin".to_string(),
                class: "Humanoid".to_string(),
                hp: 7,
                max_hp: 0,
                strength: 8,
            },
            NarratorAction::Hp {
                target: "goblin".to_string(),
                value: -10,
            },
        ];

        let logs = apply_actions(&actions, &registry, &conversation);

        assert_eq!(logs.len(), 3);
        assert!(logs[0].contains("Goblin (Humanoid) HP 7/7"));
        assert!(logs[1].contains("(7 -> 0)"));
        assert!(logs[2].contains("slain"));
        assert!(registry.get("goblin").is_err());
        assert_eq!(conversation.len(), 3);
        assert!(conversation
            .history()
            .iter()
            .all(|m| m.role == Role::System));
    }

    #[test]
    fn test_player_falls_unconscious() {
        let (registry, conversation) = channel();
        registry
            .add_or_replace(Entity::player("Rogar", "Fighter", 20, 14))
            .unwrap();

        let logs = apply_actions(
            &[NarratorAction::Hp {
                target: "Rogar".to_string(),
                value: -25,
            }],
            &registry,
            &conversation,
        );

        assert_eq!(logs.len(), 2);
        assert!(logs[1].contains("unconscious"));
        let rogar = registry.get("rogar").unwrap();
        assert_eq!(rogar.hp, 0);
        assert_eq!(rogar.status, INCAPACITATED_STATUS);
    }

    #[test]
    fn test_unconscious_announced_once() {
        let (registry, conversation) = channel();
        registry
            .add_or_replace(Entity::player("Rogar", "Fighter", 20, 14))
            .unwrap();
        let hit = |value| NarratorAction::Hp {
            target: "Rogar".to_string(),
            value,
        };

        apply_actions(&[hit(-25)], &registry, &conversation);
        let logs = apply_actions(&[hit(-4)], &registry, &conversation);

        assert_eq!(logs, vec!["Rogar HP changes by -4 (0 -> 0)"]);
        let announcements = conversation
            .history()
            .iter()
            .filter(|m| m.content.contains("falls unconscious"))
            .count();
        assert_eq!(announcements, 1);
    }

    #[test]
    fn test_unknown_target_warns_without_history() {
        let (registry, conversation) = channel();
        let logs = apply_actions(
            &[NarratorAction::Hp {
                target: "Nobody".to_string(),
                value: -1,
            }],
            &registry,
            &conversation,
        );

        assert_eq!(logs.len(), 1);
        assert!(logs[0].starts_with("Warning"));
        assert!(conversation.is_empty());
    }

    #[test]
    fn test_roll_logged() {
        let (registry, conversation) = channel();
        let logs = apply_actions(
            &[
                NarratorAction::Roll {
                    expr: "1d6".to_string(),
                    reason: "Trap damage".to_string(),
                },
                NarratorAction::Roll {
                    expr: "bogus".to_string(),
                    reason: String::new(),
                },
            ],
            &registry,
            &conversation,
        );

        assert_eq!(logs.len(), 1);
        assert!(logs[0].starts_with("Trap damage: 1d6: ["));
        assert_eq!(conversation.len(), 1);
    }
}
