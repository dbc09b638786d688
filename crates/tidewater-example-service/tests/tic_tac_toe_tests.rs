//! Component tests for the tic-tac-toe engine: command submission over the
//! in-memory stores, and snapshot maintenance from the change stream.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tidewater_cdc::{ChangeRecord, EventRow, LogReader, Offset, ReaderConfig};
use tidewater_core::{AggregateEvent, DomainError, InMemoryEventStore};
use tidewater_example_service::engine::{CommandRequest, Engine, event_registry};
use tidewater_example_service::tic_tac_toe::{Board, Player, TIC_TAC_TOE};
use tidewater_test_support::{RecordingSnapshotStore, ScriptedChangeStream};

const GAME: &str = "game-1";

fn request(command: &str, data: serde_json::Value) -> CommandRequest {
    CommandRequest {
        command: command.to_owned(),
        data,
    }
}

fn turn(player: &str, i: i32, j: i32) -> CommandRequest {
    request("TakeTurn", json!({ "player": player, "i": i, "j": j }))
}

/// Plays a game that X wins on the anti-diagonal, returning every event.
async fn play_winning_game(engine: &Engine) -> Vec<AggregateEvent> {
    let mut events = engine
        .submit(TIC_TAC_TOE, GAME, None, &request("StartGame", json!(null)))
        .await
        .unwrap();
    for (version, (player, i, j)) in [("X", 2, 0), ("O", 1, 0), ("X", 1, 1), ("X", 0, 2)]
        .into_iter()
        .enumerate()
    {
        let expected = u64::try_from(version).unwrap() + 1;
        events.extend(
            engine
                .submit(TIC_TAC_TOE, GAME, Some(expected), &turn(player, i, j))
                .await
                .unwrap(),
        );
    }
    events
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_game_is_played_to_a_win() {
    // Arrange
    let engine = Engine::in_memory().unwrap();

    // Act
    let events = play_winning_game(&engine).await;
    let rendered = engine.render_game(GAME).await.unwrap();

    // Assert
    let versions: Vec<u64> = events.iter().map(|e| e.info().version).collect();
    assert_eq!(versions, vec![1, 2, 3, 4, 5]);
    assert_eq!(
        rendered,
        "   |   | X\n---+---+---\n O | X |  \n---+---+---\n X |   |  \n\nWinner: X"
    );
}

#[tokio::test]
async fn test_move_after_win_is_rejected() {
    // Arrange
    let engine = Engine::in_memory().unwrap();
    play_winning_game(&engine).await;

    // Act
    let result = engine
        .submit(TIC_TAC_TOE, GAME, Some(5), &turn("O", 2, 2))
        .await;

    // Assert
    assert!(
        matches!(result, Err(DomainError::RejectedCommand(ref m)) if m == "Game is over, X has won")
    );
}

#[tokio::test]
async fn test_stale_expected_version_is_a_conflict() {
    // Arrange
    let engine = Engine::in_memory().unwrap();
    engine
        .submit(TIC_TAC_TOE, GAME, None, &request("StartGame", json!(null)))
        .await
        .unwrap();
    engine
        .submit(TIC_TAC_TOE, GAME, Some(1), &turn("X", 0, 0))
        .await
        .unwrap();

    // Act
    let result = engine
        .submit(TIC_TAC_TOE, GAME, Some(1), &turn("O", 1, 1))
        .await;

    // Assert
    assert!(matches!(
        result,
        Err(DomainError::AggregateVersionConflict {
            expected: 1,
            actual: Some(2),
            ..
        })
    ));
}

#[tokio::test]
async fn test_starting_an_existing_game_is_an_id_conflict() {
    // Arrange
    let engine = Engine::in_memory().unwrap();
    engine
        .submit(TIC_TAC_TOE, GAME, None, &request("StartGame", json!(null)))
        .await
        .unwrap();

    // Act
    let result = engine
        .submit(TIC_TAC_TOE, GAME, None, &request("StartGame", json!(null)))
        .await;

    // Assert
    assert!(matches!(result, Err(DomainError::AggregateIdConflict { .. })));
}

#[tokio::test]
async fn test_unknown_command_and_type_are_reported() {
    // Arrange
    let engine = Engine::in_memory().unwrap();

    // Act
    let unknown_command = engine
        .submit(TIC_TAC_TOE, GAME, None, &request("Resign", json!(null)))
        .await;
    let unknown_type = engine
        .submit("Chess", GAME, None, &request("StartGame", json!(null)))
        .await;

    // Assert
    assert!(matches!(unknown_command, Err(DomainError::NoSuchCommand(ref n)) if n == "Resign"));
    assert!(matches!(unknown_type, Err(DomainError::NoSuchAggregateType(ref t)) if t == "Chess"));
}

#[tokio::test]
async fn test_turn_on_missing_game_is_reported() {
    // Arrange
    let engine = Engine::in_memory().unwrap();

    // Act
    let submitted = engine
        .submit(TIC_TAC_TOE, GAME, None, &turn("X", 0, 0))
        .await;
    let rendered = engine.render_game(GAME).await;

    // Assert
    assert!(matches!(submitted, Err(DomainError::NoSuchAggregate { .. })));
    assert!(matches!(rendered, Err(DomainError::NoSuchAggregate { .. })));
}

#[tokio::test]
async fn test_change_stream_keeps_a_second_engine_current() {
    // Arrange
    let events = Arc::new(event_registry().unwrap());
    let store = Arc::new(InMemoryEventStore::new());
    let writer = Engine::new(
        events.clone(),
        store.clone(),
        Arc::new(RecordingSnapshotStore::<Board>::new()),
    )
    .unwrap();
    let reader_snapshots = Arc::new(RecordingSnapshotStore::<Board>::new());
    let reader = Engine::new(events.clone(), store, reader_snapshots.clone()).unwrap();

    let written = play_winning_game(&writer).await;
    let records: Vec<ChangeRecord> = written
        .iter()
        .zip(1u64..)
        .map(|(event, n)| {
            let (name, data) = events.encode(event.event().unwrap()).unwrap();
            let row = EventRow {
                aggregate_type: event.info().aggregate_type.clone(),
                aggregate_id: event.info().id.clone(),
                aggregate_version: event.info().version,
                event: name.to_owned(),
                data,
            };
            ChangeRecord::insert(Offset::new("0", n * 16), row)
        })
        .collect();

    let dir = tempfile::tempdir().unwrap();
    let offset_file = dir.path().join("offset");
    let config = ReaderConfig {
        starting_offset: Some(Offset::new("0", 0)),
        offset_file: offset_file.clone(),
        ..ReaderConfig::default()
    };

    // Act
    let handle = LogReader::new(
        ScriptedChangeStream::new(vec![records]),
        Arc::new(reader.router()),
        config,
    )
    .spawn();
    wait_until(|| handle.current_offset() == Some(Offset::new("0", 80))).await;
    handle.stop().await.unwrap();

    // Assert
    let puts = reader_snapshots.puts();
    let (version, board) = puts.last().unwrap();
    assert_eq!(*version, 5);
    assert_eq!(board.winner(), Some(Player::X));
    assert_eq!(puts.len(), 1);
    assert_eq!(std::fs::read_to_string(&offset_file).unwrap(), "0/80\n");
}
