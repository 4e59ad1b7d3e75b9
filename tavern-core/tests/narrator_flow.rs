//! End-to-end narrator turns with a scripted model.

use std::sync::Arc;
use tavern_core::testing::DEFAULT_REPLY;
use tavern_core::{GameStore, Message, Narrator, Role, ScriptedCompletion, StoreConfig};
use tempfile::TempDir;

fn shared_store(dir: &std::path::Path, trigger: usize, keep: usize) -> Arc<GameStore> {
    GameStore::shared(
        StoreConfig::new()
            .with_snapshot_dir(dir)
            .with_summary_trigger(trigger)
            .with_summary_keep(keep),
    )
    .unwrap()
}

#[tokio::test]
async fn test_append_during_model_call_is_kept() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let store = shared_store(temp_dir.path(), 20, 5);
    let (completion, gate) = ScriptedCompletion::gated(["You slip past the guard."]);
    let narrator = Arc::new(Narrator::new(store.clone(), Arc::new(completion)));

    let turn = tokio::spawn({
        let narrator = narrator.clone();
        async move { narrator.respond(1, "Alice", "I sneak past").await }
    });

    gate.wait_started().await;
    // The channel must stay writable while the model is thinking.
    store.conversation(1).append(Role::User, "Bob: wait for me");
    gate.release();

    let reply = turn.await.unwrap().unwrap();
    assert_eq!(reply.narrative, "You slip past the guard.");
    assert_eq!(
        store.conversation(1).history(),
        vec![
            Message::user("Alice: I sneak past"),
            Message::user("Bob: wait for me"),
            Message::assistant("You slip past the guard."),
        ]
    );
}

#[tokio::test]
async fn test_long_conversation_is_summarized() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let store = shared_store(temp_dir.path(), 4, 2);
    let completion = Arc::new(ScriptedCompletion::new([
        "The innkeeper nods.",
        "A hooded figure watches you.",
        "The party met a hooded stranger at the inn.",
    ]));
    let narrator = Narrator::new(store.clone(), completion.clone());

    let first = narrator.respond(9, "Alice", "I order an ale").await.unwrap();
    assert!(first.summary_job.is_none());

    let second = narrator.respond(9, "Alice", "I look around").await.unwrap();
    let job = second.summary_job.expect("fourth message should trigger a summary");
    job.await.unwrap();

    let conversation = store.conversation(9);
    assert_eq!(
        conversation.summary(),
        "The party met a hooded stranger at the inn."
    );
    assert_eq!(
        conversation.history(),
        vec![
            Message::user("Alice: I look around"),
            Message::assistant("A hooded figure watches you."),
        ]
    );

    // The next turn carries the summary in its system prompt.
    narrator.respond(9, "Alice", "I approach").await.unwrap();
    let requests = completion.requests();
    let turn = requests
        .iter()
        .find(|r| r.last() == Some(&Message::user("Alice: I approach")))
        .unwrap();
    assert!(turn[0]
        .content
        .contains("The party met a hooded stranger at the inn."));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_channels_progress_independently() {
    const CHANNELS: i64 = 8;
    const TURNS: usize = 5;

    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let store = shared_store(temp_dir.path(), 20, 5);
    let narrator = Arc::new(Narrator::new(
        store.clone(),
        Arc::new(ScriptedCompletion::default()),
    ));

    let tasks: Vec<_> = (0..CHANNELS)
        .map(|channel| {
            let narrator = narrator.clone();
            tokio::spawn(async move {
                for turn in 0..TURNS {
                    narrator
                        .respond(channel, "Player", &format!("turn {turn}"))
                        .await
                        .unwrap();
                }
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    for channel in 0..CHANNELS {
        let history = store.conversation(channel).history();
        assert_eq!(history.len(), TURNS * 2);
        for (turn, pair) in history.chunks(2).enumerate() {
            assert_eq!(pair[0], Message::user(format!("Player: turn {turn}")));
            assert_eq!(pair[1], Message::assistant(DEFAULT_REPLY));
        }
    }
}

#[tokio::test]
async fn test_commands_and_snapshot_through_handle() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let store = shared_store(temp_dir.path(), 20, 5);
    let completion = Arc::new(ScriptedCompletion::new([
        "The goblin strikes!\n<dnd_action>[{\"type\": \"spawn_npc\", \"name\": \"Goblin\", \"class\": \"Humanoid\", \"hp\": 7, \"str\": 8}, {\"type\": \"hp\", \"target\": \"Rogar\", \"value\": -4}]</dnd_action>",
    ]));
    let narrator = Narrator::new(store.clone(), completion);

    narrator
        .handle(1, "Alice", ".st Rogar Fighter 20 14")
        .await
        .unwrap();
    narrator.handle(1, "DM", ".bg A goblin camp").await.unwrap();
    let text = narrator.handle(1, "Alice", "I attack").await.unwrap();
    assert!(text.contains("New creature appears: Goblin (Humanoid) HP 7/7"));
    assert!(text.contains("Rogar HP changes by -4 (20 -> 16)"));

    let saved = narrator.handle(1, "DM", ".snapshot").await.unwrap();
    assert!(saved.starts_with("Snapshot saved: "));

    let restored = shared_store(temp_dir.path(), 20, 5);
    restored.restore_latest().await.unwrap();
    assert_eq!(restored.scenario(), "A goblin camp");
    assert_eq!(restored.entity_registry(1).get("rogar").unwrap().hp, 16);
    assert_eq!(restored.entity_registry(1).len(), 2);
}
