//! File name screening.

const BLOCKED_WORDS: [&str; 4] = ["porn", "xxx", "adult", "nsfw"];

/// Whether a file name looks like adult content.
#[must_use]
pub fn is_flagged_name(name: &str) -> bool {
    let name = name.to_lowercase();
    BLOCKED_WORDS.iter().any(|word| name.contains(word))
}
