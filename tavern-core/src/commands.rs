//! Dot-commands typed into a channel.
//!
//! | Command | Effect |
//! |---|---|
//! | `.st name class hp str` | create a player character |
//! | `.show name` | show one character |
//! | `.bg text` | change the scene |
//! | `.r [expr]` | roll dice (default `1d20`) |
//! | `.reset` | clear the channel's conversation memory |
//! | `.snapshot` | save a snapshot of every channel |
//! | `.delsnapshot` | delete the latest snapshot |
//! | `.introduce` | have the narrator introduce the world |
//! | `.check` | check the model connection |
//!
//! `.introduce` and `.check` call the model, so they are run by the
//! narrator rather than by [`execute`].

use crate::conversation::Role;
use crate::dice;
use crate::directory::ChannelId;
use crate::entity::Entity;
use crate::error::StoreError;
use crate::store::GameStore;

const DEFAULT_ROLL: &str = "1d20";

/// A parsed dot-command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    CreateCharacter {
        name: String,
        class: String,
        hp: i32,
        strength: i32,
    },
    Show {
        name: String,
    },
    SetScenario(String),
    Roll(String),
    Reset,
    Snapshot,
    DeleteSnapshot,
    Introduce,
    Check,
}

impl Command {
    /// Whether running this command needs a model call.
    pub fn needs_narrator(&self) -> bool {
        matches!(self, Command::Introduce | Command::Check)
    }
}

impl Command {
    /// Parse a line of channel input.
    ///
    /// Returns `Ok(None)` for ordinary chat (anything not starting with
    /// `.`), and `InvalidArgument` carrying a usage hint for malformed or
    /// unknown commands.
    pub fn parse(input: &str) -> Result<Option<Self>, StoreError> {
        let input = input.trim();
        if !input.starts_with('.') {
            return Ok(None);
        }

        let mut parts = input.split_whitespace();
        let name = parts.next().unwrap_or_default();
        let args: Vec<&str> = parts.collect();

        let command = match name {
            ".st" => {
                let [name, class, hp, strength] = args.as_slice() else {
                    return Err(StoreError::invalid("Usage: .st [name] [class] [hp] [str]"));
                };
                let (Ok(hp), Ok(strength)) = (hp.parse::<i32>(), strength.parse::<i32>()) else {
                    return Err(StoreError::invalid("HP and STR must be numbers."));
                };
                Command::CreateCharacter {
                    name: name.to_string(),
                    class: class.to_string(),
                    hp,
                    strength,
                }
            }
            ".show" => match args.first() {
                Some(name) => Command::Show {
                    name: name.to_string(),
                },
                None => return Err(StoreError::invalid("Usage: .show [name]")),
            },
            ".bg" => {
                if args.is_empty() {
                    return Err(StoreError::invalid("Usage: .bg [description]"));
                }
                Command::SetScenario(args.join(" "))
            }
            ".r" => Command::Roll(if args.is_empty() {
                DEFAULT_ROLL.to_string()
            } else {
                args.concat()
            }),
            ".reset" => Command::Reset,
            ".snapshot" => Command::Snapshot,
            ".delsnapshot" => Command::DeleteSnapshot,
            ".introduce" => Command::Introduce,
            ".check" => Command::Check,
            other => return Err(StoreError::invalid(format!("Unknown command: {other}"))),
        };

        Ok(Some(command))
    }
}

/// Run a command against a channel and return the reply for the players.
///
/// Commands that need the model are rejected with `InvalidArgument`.
pub async fn execute(
    store: &GameStore,
    channel_id: ChannelId,
    speaker: &str,
    command: Command,
) -> Result<String, StoreError> {
    match command {
        Command::CreateCharacter {
            name,
            class,
            hp,
            strength,
        } => {
            let character = Entity::player(name, class, hp, strength);
            store
                .entity_registry(channel_id)
                .add_or_replace(character.clone())?;

            store.conversation(channel_id).append(
                Role::User,
                format!(
                    "[System] {speaker} created a new character: {} (class: {}, HP: {}, STR: {})",
                    character.name, character.class, character.hp, character.strength
                ),
            );
            Ok(format!(
                "Character created\nName: {}\nClass: {}\nHP: {}/{}\nSTR: {}",
                character.name, character.class, character.hp, character.max_hp, character.strength
            ))
        }
        Command::Show { name } => store.entity_registry(channel_id).describe(&name),
        Command::SetScenario(scenario) => {
            store.set_scenario(scenario.clone());
            store.conversation(channel_id).append(
                Role::System,
                format!("System: The DM changed the scene to: {scenario}"),
            );
            Ok(format!("Scene updated: {scenario}"))
        }
        Command::Roll(expression) => {
            let result =
                dice::roll(&expression).map_err(|err| StoreError::invalid(err.to_string()))?;
            store.conversation(channel_id).append(
                Role::User,
                format!(
                    "[System] {speaker} rolled {}, final result: {}",
                    result.expression, result.total
                ),
            );
            Ok(format!("{speaker} rolls {result}"))
        }
        Command::Reset => {
            store.conversation(channel_id).clear();
            Ok("Memory cleared.".to_string())
        }
        Command::Snapshot => {
            let file_name = store.save_snapshot(store.scenario()).await?;
            Ok(format!("Snapshot saved: {file_name}"))
        }
        Command::DeleteSnapshot => {
            let file_name = store.delete_latest_snapshot().await?;
            Ok(format!("Deleted latest snapshot: {file_name}"))
        }
        Command::Introduce | Command::Check => Err(StoreError::invalid(
            "This command must be run by the narrator.",
        )),
    }
}
