//! Banned-word matching.
//!
//! The matcher itself is pure; the bot layer wraps it with the 30-second
//! cached view of the banned-words table. Matching is case-insensitive.
//! `partial` entries match anywhere in the text; whole-word entries match
//! only at word boundaries, with the stored literal regex-escaped.

use regex::Regex;

/// One banned-word entry as stored: original casing preserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BannedEntry {
    pub word: String,
    pub partial: bool,
}

/// Return the entries that match `text`, in entry order.
///
/// Entries are unique by word, so the result contains no duplicates.
pub fn find_matches<'a>(entries: &'a [BannedEntry], text: &str) -> Vec<&'a BannedEntry> {
    let haystack = text.to_lowercase();
    entries
        .iter()
        .filter(|entry| {
            let needle = entry.word.to_lowercase();
            if entry.partial {
                haystack.contains(&needle)
            } else {
                matches_whole_word(&haystack, &needle)
            }
        })
        .collect()
}

fn matches_whole_word(haystack: &str, needle: &str) -> bool {
    let pattern = format!(r"\b{}\b", regex::escape(needle));
    match Regex::new(&pattern) {
        Ok(re) => re.is_match(haystack),
        Err(e) => {
            // regex::escape produces valid patterns; this is unreachable in
            // practice but must not take the guard down.
            tracing::error!(word = %needle, error = %e, "Banned-word pattern failed to compile");
            haystack.contains(needle)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(word: &str, partial: bool) -> BannedEntry {
        BannedEntry {
            word: word.to_string(),
            partial,
        }
    }

    fn words(matches: Vec<&BannedEntry>) -> Vec<String> {
        matches.iter().map(|m| m.word.clone()).collect()
    }

    // -- Whole-word semantics --

    #[test]
    fn whole_word_matches_at_boundaries() {
        let entries = [entry("foo", false)];
        assert_eq!(words(find_matches(&entries, "foo bar")), vec!["foo"]);
        assert_eq!(words(find_matches(&entries, "BAR FOO!")), vec!["foo"]);
    }

    #[test]
    fn whole_word_does_not_match_inside_words() {
        let entries = [entry("foo", false)];
        assert!(find_matches(&entries, "foobar").is_empty());
        assert!(find_matches(&entries, "a foody snack").is_empty());
    }

    // -- Partial semantics --

    #[test]
    fn partial_matches_substrings() {
        let entries = [entry("foo", true)];
        assert_eq!(words(find_matches(&entries, "foo bar")), vec!["foo"]);
        assert_eq!(words(find_matches(&entries, "BAR FOO!")), vec!["foo"]);
        assert_eq!(words(find_matches(&entries, "foobar")), vec!["foo"]);
    }

    // -- Case handling --

    #[test]
    fn matching_is_case_insensitive_and_preserves_stored_casing() {
        let entries = [entry("BadTerm", false)];
        let matches = find_matches(&entries, "this has a badterm!");
        assert_eq!(words(matches), vec!["BadTerm"]);
    }

    // -- Regex metacharacters in entries --

    #[test]
    fn metacharacters_are_matched_literally() {
        let entries = [entry("c.a", false)];
        assert!(find_matches(&entries, "cba").is_empty());
        assert_eq!(words(find_matches(&entries, "see c.a here")), vec!["c.a"]);
    }

    // -- Multiple entries --

    #[test]
    fn all_matching_entries_returned() {
        let entries = [entry("foo", false), entry("bar", true), entry("baz", false)];
        let matches = find_matches(&entries, "foo rebarbative");
        assert_eq!(words(matches), vec!["foo", "bar"]);
    }

    #[test]
    fn no_matches_on_clean_text() {
        let entries = [entry("badterm", false)];
        assert!(find_matches(&entries, "this has badtermy!").is_empty());
    }
}
