//! Text-level wake phrase detection over short passive transcripts.

/// Fuzzy wake phrase matcher.
#[derive(Debug, Clone)]
pub struct WakeDetector {
    phrase: String,
    words: Vec<String>,
    max_distance: usize,
}

impl WakeDetector {
    /// `max_distance` caps the per-word edit distance; short words tolerate
    /// less (about a third of their length, at least one edit).
    pub fn new(phrase: &str, max_distance: usize) -> Self {
        Self {
            phrase: phrase.to_owned(),
            words: phrase.split_whitespace().map(normalize).collect(),
            max_distance,
        }
    }

    pub fn phrase(&self) -> &str {
        &self.phrase
    }

    /// Find the wake phrase anywhere in `text`.
    ///
    /// Returns the words spoken after it (possibly empty) when matched.
    pub fn detect(&self, text: &str) -> Option<String> {
        if self.words.is_empty() {
            return None;
        }
        let spoken: Vec<&str> = text.split_whitespace().collect();
        if spoken.len() < self.words.len() {
            return None;
        }

        let start = (0..=spoken.len() - self.words.len()).find(|&offset| {
            self.words
                .iter()
                .zip(&spoken[offset..])
                .all(|(expected, actual)| self.word_matches(expected, &normalize(actual)))
        })?;

        let rest = spoken[start + self.words.len()..].join(" ");
        Some(rest.trim_start_matches([',', '!', '.', ' ']).to_owned())
    }

    fn word_matches(&self, expected: &str, actual: &str) -> bool {
        if expected == actual {
            return true;
        }
        if actual.is_empty() {
            return false;
        }
        let budget = (expected.chars().count() / 3).max(1).min(self.max_distance);
        levenshtein(expected, actual) <= budget
    }
}

fn normalize(word: &str) -> String {
    word.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0; b.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        cur[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            cur[j + 1] = (prev[j + 1] + 1).min(cur[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}
