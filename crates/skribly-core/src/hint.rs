//! Progressive hint generation for the drawing phase.
//!
//! Letters are revealed on a fixed schedule (10 s, 20 s, 30 s into the
//! turn) in a deterministic order: first letter, last letter, middle
//! letter. At most three letters are ever revealed.

/// Seconds before the first reveal.
pub const FIRST_REVEAL_SECS: f64 = 10.0;
/// Seconds between subsequent reveals.
pub const REVEAL_INTERVAL_SECS: f64 = 10.0;
/// Hard cap on revealed letters per word.
pub const MAX_REVEALS: usize = 3;

/// A fully masked hint: one `_` per non-space letter, no separators.
/// Used for `word_hint` in `word_selected` / `drawing_started`.
pub fn masked(word: &str) -> String {
    word.chars().filter(|c| *c != ' ').map(|_| '_').collect()
}

/// Number of letters revealed after `elapsed` seconds of drawing.
pub fn reveal_count(elapsed: f64) -> usize {
    if elapsed < FIRST_REVEAL_SECS {
        return 0;
    }
    let steps = ((elapsed - FIRST_REVEAL_SECS) / REVEAL_INTERVAL_SECS) as usize + 1;
    steps.min(MAX_REVEALS)
}

/// Char positions to reveal for `count` reveals, in reveal order.
/// Positions index into the word's chars; spaces are never revealed.
pub fn revealed_positions(word: &str, count: usize) -> Vec<usize> {
    let letters: Vec<usize> = word
        .chars()
        .enumerate()
        .filter(|(_, c)| *c != ' ')
        .map(|(i, _)| i)
        .collect();

    let mut revealed = Vec::new();
    if count >= 1 && !letters.is_empty() {
        revealed.push(letters[0]);
    }
    if count >= 2 && letters.len() >= 2 {
        revealed.push(letters[letters.len() - 1]);
    }
    if count >= 3 && letters.len() >= 3 {
        revealed.push(letters[letters.len() / 2]);
    }
    revealed
}

/// Render a hint string: revealed letters uppercased in place, `_` for the
/// rest, all cells joined by single spaces (`"cat"` + `[0, 2]` → `"C _ T"`).
pub fn render(word: &str, revealed: &[usize]) -> String {
    word.chars()
        .enumerate()
        .map(|(i, c)| {
            if c == ' ' {
                " ".to_string()
            } else if revealed.contains(&i) {
                c.to_uppercase().to_string()
            } else {
                "_".to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
