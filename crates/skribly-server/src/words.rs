use std::collections::HashMap;
use std::path::Path;

use rand::seq::IndexedRandom;

use skribly_core::room::Difficulty;

/// Word picked when a list is somehow empty.
const LAST_RESORT_WORD: &str = "drawing";

/// Read-only word lists, one per difficulty. Loaded once at startup from
/// `<words_dir>/<difficulty>.json` (a JSON array of strings), falling back
/// to compiled-in lists when a file is missing or unreadable.
pub struct WordList {
    words: HashMap<Difficulty, Vec<String>>,
}

impl WordList {
    pub fn load(dir: &str) -> Self {
        let mut words = HashMap::new();
        for difficulty in Difficulty::ALL {
            let path = Path::new(dir).join(format!("{difficulty}.json"));
            let list = match std::fs::read_to_string(&path) {
                Ok(content) => match serde_json::from_str::<Vec<String>>(&content) {
                    Ok(list) if !list.is_empty() => {
                        tracing::info!(
                            difficulty = difficulty.as_str(),
                            count = list.len(),
                            "Loaded word list"
                        );
                        list
                    },
                    Ok(_) => {
                        tracing::warn!(path = %path.display(), "Word list is empty, using fallback");
                        fallback_words(difficulty)
                    },
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "Bad word list, using fallback");
                        fallback_words(difficulty)
                    },
                },
                Err(_) => {
                    tracing::info!(
                        path = %path.display(),
                        difficulty = difficulty.as_str(),
                        "Word file not found, using fallback list"
                    );
                    fallback_words(difficulty)
                },
            };
            words.insert(difficulty, list);
        }
        Self { words }
    }

    /// Construct directly from lists (tests).
    #[cfg(test)]
    pub fn from_lists(lists: HashMap<Difficulty, Vec<String>>) -> Self {
        Self { words: lists }
    }

    /// Random distinct words for the drawer to choose between.
    pub fn random_words(&self, difficulty: Difficulty, count: usize) -> Vec<String> {
        let Some(list) = self.words.get(&difficulty) else {
            return Vec::new();
        };
        if list.len() <= count {
            return list.clone();
        }
        list.choose_multiple(&mut rand::rng(), count)
            .cloned()
            .collect()
    }

    /// A single random word, for the auto-select timeout path.
    pub fn random_word(&self, difficulty: Difficulty) -> String {
        self.random_words(difficulty, 1)
            .into_iter()
            .next()
            .unwrap_or_else(|| LAST_RESORT_WORD.to_string())
    }

    /// Case-insensitive membership check against the difficulty's list.
    pub fn is_valid(&self, word: &str, difficulty: Difficulty) -> bool {
        let Some(list) = self.words.get(&difficulty) else {
            return false;
        };
        list.iter().any(|w| w.eq_ignore_ascii_case(word))
    }

    /// Loaded word counts per difficulty, for health/stats.
    pub fn counts(&self) -> HashMap<&'static str, usize> {
        Difficulty::ALL
            .iter()
            .map(|d| (d.as_str(), self.words.get(d).map_or(0, Vec::len)))
            .collect()
    }
}

fn fallback_words(difficulty: Difficulty) -> Vec<String> {
    let words: &[&str] = match difficulty {
        Difficulty::Easy => &[
            "cat", "dog", "fish", "bird", "car", "tree", "house", "sun", "moon", "star", "ball",
            "book", "pen", "cup", "hat", "cake", "apple", "egg", "bee", "key",
        ],
        Difficulty::Medium => &[
            "elephant",
            "giraffe",
            "butterfly",
            "dinosaur",
            "rainbow",
            "mountain",
            "guitar",
            "piano",
            "bicycle",
            "airplane",
            "sandwich",
            "pizza",
            "teacher",
            "doctor",
            "castle",
        ],
        Difficulty::Hard => &[
            "cryptocurrency",
            "photosynthesis",
            "metamorphosis",
            "constellation",
            "entrepreneur",
            "procrastination",
            "refrigerator",
            "democracy",
            "philosophy",
            "magnificent",
        ],
    };
    words.iter().map(|w| w.to_string()).collect()
}
