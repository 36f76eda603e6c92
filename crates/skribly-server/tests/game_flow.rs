#[allow(dead_code)]
mod common;

use common::{
    TestServer, WsStream, create_room, create_session, join_room, ws_join, ws_read_until, ws_send,
};

struct TwoPlayerGame {
    /// Keeps the server task alive for the duration of the test.
    _server: TestServer,
    alice: String,
    bob: String,
    room_id: String,
    alice_ws: WsStream,
    bob_ws: WsStream,
}

/// Two sessions, one room, both sockets attached, ready to start.
async fn two_player_room(settings: serde_json::Value) -> TwoPlayerGame {
    let server = TestServer::with_fast_timers().await;
    let alice = create_session(&server, "alice").await;
    let bob = create_session(&server, "bob").await;
    let room = create_room(&server, &alice, settings).await;
    let room_id = room["id"].as_str().unwrap().to_string();
    join_room(&server, &bob, &room_id).await;

    let alice_ws = ws_join(&server, &alice, &room_id).await;
    let bob_ws = ws_join(&server, &bob, &room_id).await;
    TwoPlayerGame {
        _server: server,
        alice,
        bob,
        room_id,
        alice_ws,
        bob_ws,
    }
}

#[tokio::test]
async fn full_two_player_game_with_guess() {
    let mut game = two_player_room(serde_json::json!({
        "rounds": 1,
        "draw_time": 60,
        "word_difficulty": "easy",
        "max_players": 2,
    }))
    .await;

    ws_send(&mut game.alice_ws, "start_game", serde_json::json!({})).await;

    // The startup sequence, in order, on bob's socket
    let started = ws_read_until(&mut game.bob_ws, "game_started").await;
    assert_eq!(started["data"]["room_id"], game.room_id.as_str());
    assert_eq!(started["data"]["total_rounds"], 1);

    let round = ws_read_until(&mut game.bob_ws, "round_started").await;
    assert_eq!(round["data"]["round"], 1);
    let drawer_id = round["data"]["drawer"].as_str().unwrap().to_string();

    let selection = ws_read_until(&mut game.bob_ws, "word_selection_started").await;
    let words: Vec<String> = selection["data"]["words"]
        .as_array()
        .unwrap()
        .iter()
        .map(|w| w.as_str().unwrap().to_string())
        .collect();
    assert_eq!(words.len(), 3);
    assert_eq!(selection["data"]["phase"], "word_selection");

    // Route drawer/guesser roles onto the right sockets
    let (drawer_ws, guesser_ws, guesser_name) = if drawer_id == game.alice {
        (&mut game.alice_ws, &mut game.bob_ws, "bob")
    } else {
        (&mut game.bob_ws, &mut game.alice_ws, "alice")
    };

    let word = words[0].clone();
    ws_send(
        drawer_ws,
        "select_word",
        serde_json::json!({ "word": word }),
    )
    .await;

    // Drawer sees the word, the guesser only its shape
    let to_drawer = ws_read_until(drawer_ws, "word_selected").await;
    assert_eq!(to_drawer["data"]["word"], word.as_str());
    assert_eq!(to_drawer["data"]["phase"], "drawing");

    let to_guesser = ws_read_until(guesser_ws, "word_selected").await;
    assert!(to_guesser["data"].get("word").is_none());
    let hint = to_guesser["data"]["word_hint"].as_str().unwrap();
    assert_eq!(hint.chars().filter(|c| *c == '_').count(), hint.len());

    let drawing = ws_read_until(guesser_ws, "drawing_started").await;
    assert_eq!(drawing["data"]["drawer_id"], drawer_id.as_str());
    assert_eq!(drawing["data"]["time_limit"], 60);

    // A wrong guess surfaces as chat for everyone
    ws_send(
        guesser_ws,
        "submit_guess",
        serde_json::json!({ "guess": "definitely wrong" }),
    )
    .await;
    let chat = ws_read_until(drawer_ws, "chat_message").await;
    assert_eq!(chat["data"]["type"], "guess");
    assert_eq!(chat["data"]["message"], "definitely wrong");

    // The correct guess scores and ends the turn (everyone guessed)
    ws_send(
        guesser_ws,
        "submit_guess",
        serde_json::json!({ "guess": word.to_uppercase() }),
    )
    .await;
    let correct = ws_read_until(guesser_ws, "correct_guess").await;
    assert_eq!(correct["data"]["player"], guesser_name);
    let score = correct["data"]["score"].as_i64().unwrap();
    assert_eq!(
        score,
        100 + correct["data"]["speed_bonus"].as_i64().unwrap()
    );
    assert!((100..=400).contains(&score));

    let private = ws_read_until(guesser_ws, "guess_correct").await;
    assert_eq!(private["data"]["score"], score);
    assert_eq!(private["data"]["word"], word.to_lowercase());

    let ended = ws_read_until(guesser_ws, "turn_ended").await;
    assert_eq!(ended["data"]["all_guessed"], true);
    assert_eq!(ended["data"]["timeout"], false);
    assert_eq!(ended["data"]["word"], word.as_str());
    // The drawer bonus is already in the broadcast snapshot
    assert_eq!(ended["data"]["scores"][&drawer_id], 50);

    // One round only: after the results pause the game is over
    let over = ws_read_until(guesser_ws, "game_ended").await;
    assert_eq!(over["data"]["winner"]["username"], guesser_name);
    assert_eq!(over["data"]["winner"]["score"], score);
    let final_results = over["data"]["final_results"].as_array().unwrap();
    assert_eq!(final_results.len(), 2);
    assert_eq!(final_results[0]["score"], score);
    assert_eq!(final_results[1]["score"], 50);
}

#[tokio::test]
async fn word_selection_timeout_auto_selects() {
    let mut game = two_player_room(serde_json::json!({
        "rounds": 1,
        "draw_time": 60,
        "word_difficulty": "easy",
    }))
    .await;

    ws_send(&mut game.alice_ws, "start_game", serde_json::json!({})).await;
    ws_read_until(&mut game.bob_ws, "word_selection_started").await;

    // Nobody selects; the 2 s test timer auto-picks
    let selected = ws_read_until(&mut game.bob_ws, "word_selected").await;
    assert_eq!(selected["data"]["auto_selected"], true);
    assert_eq!(selected["data"]["phase"], "drawing");
    ws_read_until(&mut game.bob_ws, "drawing_started").await;
}

#[tokio::test]
async fn timer_updates_tick_during_drawing() {
    let mut game = two_player_room(serde_json::json!({
        "rounds": 1,
        "draw_time": 60,
    }))
    .await;

    ws_send(&mut game.alice_ws, "start_game", serde_json::json!({})).await;
    ws_read_until(&mut game.bob_ws, "drawing_started").await;

    let tick = ws_read_until(&mut game.bob_ws, "timer_update").await;
    assert_eq!(tick["data"]["phase"], "drawing");
    assert_eq!(tick["data"]["room_id"], game.room_id.as_str());
    assert!(tick["data"]["time_remaining"].as_u64().unwrap() < 60);
}

#[tokio::test]
async fn drawing_events_relay_to_other_players_only() {
    let mut game = two_player_room(serde_json::json!({
        "rounds": 1,
        "draw_time": 60,
    }))
    .await;

    ws_send(&mut game.alice_ws, "start_game", serde_json::json!({})).await;
    let round = ws_read_until(&mut game.bob_ws, "round_started").await;
    let drawer_id = round["data"]["drawer"].as_str().unwrap().to_string();
    ws_read_until(&mut game.bob_ws, "drawing_started").await;

    let (drawer_ws, guesser_ws) = if drawer_id == game.alice {
        (&mut game.alice_ws, &mut game.bob_ws)
    } else {
        (&mut game.bob_ws, &mut game.alice_ws)
    };

    ws_send(
        drawer_ws,
        "draw_start",
        serde_json::json!({ "x": 12.5, "y": 40.0, "color": "#ff0000", "size": 8, "tool": "brush" }),
    )
    .await;
    let data = ws_read_until(guesser_ws, "draw_data").await;
    assert_eq!(data["data"]["type"], "start");
    assert_eq!(data["data"]["x"], 12.5);
    assert_eq!(data["data"]["color"], "#ff0000");

    ws_send(drawer_ws, "draw_move", serde_json::json!({ "x": 13.0, "y": 41.0 })).await;
    let data = ws_read_until(guesser_ws, "draw_data").await;
    assert_eq!(data["data"]["type"], "move");

    ws_send(drawer_ws, "draw_end", serde_json::json!({})).await;
    let data = ws_read_until(guesser_ws, "draw_data").await;
    assert_eq!(data["data"]["type"], "end");

    // A guesser may not draw while a drawer is active
    ws_send(
        guesser_ws,
        "draw_start",
        serde_json::json!({ "x": 1.0, "y": 1.0 }),
    )
    .await;
    let err = ws_read_until(guesser_ws, "error").await;
    assert_eq!(err["data"]["message"], "Not your turn to draw");

    // Oversize brush is rejected
    ws_send(
        drawer_ws,
        "draw_start",
        serde_json::json!({ "x": 1.0, "y": 1.0, "size": 99 }),
    )
    .await;
    let err = ws_read_until(drawer_ws, "error").await;
    assert_eq!(err["data"]["message"], "Invalid brush size");

    // The drawer can clear the canvas for everyone
    ws_send(drawer_ws, "clear_canvas", serde_json::json!({})).await;
    let cleared = ws_read_until(guesser_ws, "canvas_cleared").await;
    assert!(cleared["data"]["cleared_by"].as_str().is_some());

    // Tool changes reach the other players
    ws_send(
        drawer_ws,
        "change_tool",
        serde_json::json!({ "tool": "eraser", "size": 20 }),
    )
    .await;
    let changed = ws_read_until(guesser_ws, "tool_changed").await;
    assert_eq!(changed["data"]["tool"], "eraser");
}

/// Read frames until the drawer's `word_selected` (the one carrying the
/// actual word) arrives; stale hint-shaped frames from earlier turns are
/// skipped.
async fn read_drawer_word(stream: &mut WsStream) -> String {
    for _ in 0..100 {
        let frame = common::ws_read(stream).await;
        if frame["event"] == "word_selected" && frame["data"]["word"].is_string() {
            return frame["data"]["word"].as_str().unwrap().to_string();
        }
    }
    panic!("Drawer word_selected never arrived");
}

#[tokio::test]
async fn multi_round_game_rotates_and_announces_rounds() {
    let mut game = two_player_room(serde_json::json!({
        "rounds": 2,
        "draw_time": 60,
        "word_difficulty": "easy",
    }))
    .await;

    ws_send(&mut game.alice_ws, "start_game", serde_json::json!({})).await;

    let mut drawers = Vec::new();
    // Round 1 has two turns; finish each by guessing correctly
    for _ in 0..2 {
        let round = ws_read_until(&mut game.bob_ws, "round_started").await;
        assert_eq!(round["data"]["round"], 1);
        let drawer_id = round["data"]["drawer"].as_str().unwrap().to_string();
        drawers.push(drawer_id.clone());

        // Auto-selection (2 s fast timer) carries us into drawing. The
        // drawer's private payload tells us the word to guess with.
        let (drawer_ws, guesser_ws) = if drawer_id == game.alice {
            (&mut game.alice_ws, &mut game.bob_ws)
        } else {
            (&mut game.bob_ws, &mut game.alice_ws)
        };
        let word = read_drawer_word(drawer_ws).await;
        ws_send(guesser_ws, "submit_guess", serde_json::json!({ "guess": word })).await;
        ws_read_until(&mut game.bob_ws, "turn_ended").await;
    }

    // Both players drew in round 1
    assert_eq!(drawers.len(), 2);
    assert_ne!(drawers[0], drawers[1]);

    // Round boundary: round_complete announces the intermission
    let complete = ws_read_until(&mut game.bob_ws, "round_complete").await;
    assert_eq!(complete["data"]["next_round"], 2);

    let round = ws_read_until(&mut game.bob_ws, "round_started").await;
    assert_eq!(round["data"]["round"], 2);
}
