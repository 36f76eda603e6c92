use serde::{Deserialize, Serialize};

/// Base points for any correct guess.
pub const GUESS_BASE_SCORE: i64 = 100;
/// Bonus points per whole second left on the drawing clock.
pub const SPEED_BONUS_PER_SEC: i64 = 5;
/// Bonus awarded to the drawer when every guesser got the word.
pub const DRAWER_BONUS: i64 = 50;

/// Score a correct guess from the time remaining on the drawing clock.
/// Returns `(total, speed_bonus)`.
pub fn guess_score(time_remaining: f64) -> (i64, i64) {
    let speed_bonus = time_remaining.max(0.0).floor() as i64 * SPEED_BONUS_PER_SEC;
    (GUESS_BASE_SCORE + speed_bonus, speed_bonus)
}

/// One row of a turn-results or final-results table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEntry {
    pub player_id: String,
    pub username: String,
    pub score: i64,
}

/// Sort results by score descending. Stable, so ties keep player order.
pub fn ranked(mut entries: Vec<ResultEntry>) -> Vec<ResultEntry> {
    entries.sort_by(|a, b| b.score.cmp(&a.score));
    entries
}
