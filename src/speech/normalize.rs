//! Text rewrites applied before segmentation.
//!
//! Two literal, case-sensitive substring passes run in order:
//! contraction expansion, then pronunciation substitution. The second
//! pass sees already-decontracted text, so its table only carries words
//! the synthesizer still gets wrong afterwards.

use once_cell::sync::Lazy;
use regex::Regex;

/// Contractions expanded to their full form. Longer keys sharing a
/// prefix come first ("St. Patrick's" before "St. Patrick").
const CONTRACTIONS: &[(&str, &str)] = &[
    ("St. Patrick's", "Saint Patricks"),
    ("St. Patrick", "Saint Patrick"),
    ("I'm", "I am"),
    ("I'd", "I would"),
    ("I’d", "I would"),
    ("I'll", "I will"),
    ("I’ve", "I have"),
    ("isn't", "is not"),
    ("aren't", "are not"),
    ("wasn't", "was not"),
    ("weren't", "were not"),
    ("haven't", "have not"),
    ("hasn't", "has not"),
    ("hadn't", "had not"),
    ("won't", "will not"),
    ("wouldn't", "would not"),
    ("don't", "do not"),
    ("doesn’t", "does not"),
    ("didn't", "did not"),
    ("can't", "cannot"),
    ("couldn’t", "could not"),
    ("shouldn't", "should not"),
    ("mightn't", "might not"),
    ("mustn't", "must not"),
    ("you'd", "you would"),
    ("you've", "you have"),
];

/// Spellings that make the synthesizer pronounce a word correctly.
const PRONUNCIATIONS: &[(&str, &str)] = &[
    ("St. Patrick's", "Saint Patricks"),
    ("St. Patrick", "Saint Patrick"),
    ("would've", "wouldove"),
    ("could've", "couldove"),
    ("should've", "shouldove"),
    ("might've", "mightove"),
    ("must've", "mustove"),
    ("you'd", "yewd"),
    ("I'd", "eyed"),
    ("we'd", "weed"),
    ("they'd", "thade"),
    ("she'd", "sheed"),
    ("he'd", "heed"),
    ("it'd", "itid"),
    ("I'm", "I am"),
    ("don't", "dont"),
    ("AI", "eh eye"),
    ("Dr.", "Doctor"),
];

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

fn apply_table(text: &str, table: &[(&str, &str)]) -> String {
    let mut out = text.to_string();
    for (from, to) in table {
        if out.contains(from) {
            out = out.replace(from, to);
        }
    }
    out
}

/// Expand contractions ("I'm" → "I am").
pub fn expand_contractions(text: &str) -> String {
    apply_table(text, CONTRACTIONS)
}

/// Replace words the synthesizer mispronounces ("AI" → "eh eye").
pub fn substitute_pronunciations(text: &str) -> String {
    apply_table(text, PRONUNCIATIONS)
}

/// Both rewrite passes, in the required order.
pub fn rewrite(text: &str) -> String {
    substitute_pronunciations(&expand_contractions(text))
}

/// Tidy a single clause for the engine: split stray `I'`/`I’` elisions
/// into words, collapse whitespace, and trim.
pub fn normalize_clause(clause: &str) -> String {
    let spaced = clause.replace("I'", "I ").replace("I’", "I ");
    WHITESPACE_RUN.replace_all(spaced.trim(), " ").into_owned()
}
