//! Lightweight text heuristics shared by quality analysis and consolidation.
//!
//! English keywords match on word boundaries; Chinese keywords match as
//! substrings, since Chinese text has no whitespace word breaks.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

const CONFLICT_WORDS_EN: &[&str] = &["but", "however", "actually", "not", "no", "incorrect", "wrong"];
const CONFLICT_WORDS_ZH: &[&str] = &["但是", "然而", "其实", "不", "没有", "错误"];

/// Jaccard similarity of the case-folded whitespace word sets.
/// Zero when either side has no words.
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    let set_a: HashSet<&str> = a.split_whitespace().collect();
    let set_b: HashSet<&str> = b.split_whitespace().collect();
    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.len() + set_b.len() - intersection;
    intersection as f64 / union as f64
}

/// First `max_chars` characters followed by `...` when longer.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

fn conflict_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        let alternation = CONFLICT_WORDS_EN.join("|");
        Regex::new(&format!(r"(?i)\b(?:{alternation})\b")).ok()
    })
    .as_ref()
}

/// Whether the text carries a correction or negation marker.
pub fn has_conflict_marker(text: &str) -> bool {
    if CONFLICT_WORDS_ZH.iter().any(|w| text.contains(w)) {
        return true;
    }
    match conflict_regex() {
        Some(re) => re.is_match(text),
        None => {
            let lower = text.to_lowercase();
            lower
                .split(|c: char| !c.is_alphanumeric())
                .any(|w| CONFLICT_WORDS_EN.contains(&w))
        }
    }
}

// ---------------------------------------------------------------------------
// Contradiction patterns
// ---------------------------------------------------------------------------

enum Marker {
    Word(Regex),
    Substring(&'static str),
}

impl Marker {
    fn word(phrase: &str) -> Option<Self> {
        let escaped = regex::escape(phrase).replace(' ', r"\s+");
        Regex::new(&format!(r"(?i)\b{escaped}\b")).ok().map(Self::Word)
    }

    fn matches(&self, text: &str) -> bool {
        match self {
            Self::Word(re) => re.is_match(text),
            Self::Substring(s) => text.contains(s),
        }
    }
}

struct Polarity {
    positive: Marker,
    negative: Marker,
}

impl Polarity {
    /// +1 affirms, -1 negates, 0 neither.
    fn sign(&self, text: &str) -> i8 {
        if self.negative.matches(text) {
            -1
        } else if self.positive.matches(text) {
            1
        } else {
            0
        }
    }
}

fn polarities() -> &'static [Polarity] {
    static PATTERNS: OnceLock<Vec<Polarity>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let english = [
            ("is", "is not"),
            ("has", "does not have"),
            ("can", "cannot"),
            ("will", "will not"),
        ];
        let chinese = [("是", "不是"), ("有", "没有"), ("能", "不能"), ("会", "不会")];

        let mut patterns: Vec<Polarity> = english
            .iter()
            .filter_map(|(pos, neg)| {
                Some(Polarity {
                    positive: Marker::word(pos)?,
                    negative: Marker::word(neg)?,
                })
            })
            .collect();
        patterns.extend(chinese.iter().map(|(pos, neg)| Polarity {
            positive: Marker::Substring(pos),
            negative: Marker::Substring(neg),
        }));
        patterns
    })
}

/// Minimum topic overlap for two opposite-polarity texts to contradict.
pub const CONTRADICTION_MIN_OVERLAP: f64 = 0.4;

fn is_cjk(c: char) -> bool {
    matches!(c, '\u{3400}'..='\u{4DBF}' | '\u{4E00}'..='\u{9FFF}' | '\u{F900}'..='\u{FAFF}')
}

/// Case-folded words with edge punctuation stripped; CJK runs split into
/// single characters.
fn topic_units(text: &str) -> HashSet<String> {
    let mut units = HashSet::new();
    for word in text.to_lowercase().split_whitespace() {
        let word = word.trim_matches(|c: char| !c.is_alphanumeric());
        if word.chars().any(is_cjk) {
            units.extend(word.chars().filter(|c| c.is_alphanumeric()).map(String::from));
        } else if !word.is_empty() {
            units.insert(word.to_string());
        }
    }
    units
}

/// Jaccard similarity of [`topic_units`]. Unlike [`jaccard_similarity`] this
/// sees overlap inside unsegmented Chinese text.
pub fn topic_overlap(a: &str, b: &str) -> f64 {
    let (set_a, set_b) = (topic_units(a), topic_units(b));
    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.len() + set_b.len() - intersection;
    intersection as f64 / union as f64
}

/// Whether the texts talk about the same thing and one affirms a pattern
/// the other negates ("is" / "is not", "有" / "没有", ...).
pub fn are_contradictory(a: &str, b: &str) -> bool {
    let opposed = polarities().iter().any(|p| {
        let (sa, sb) = (p.sign(a), p.sign(b));
        sa != 0 && sb != 0 && sa != sb
    });
    opposed && topic_overlap(a, b) >= CONTRADICTION_MIN_OVERLAP
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jaccard_properties() {
        let a = "The quick brown fox";
        let b = "the lazy brown dog";
        assert!((jaccard_similarity(a, b) - jaccard_similarity(b, a)).abs() < f64::EPSILON);
        assert!((jaccard_similarity(a, a) - 1.0).abs() < f64::EPSILON);
        assert_eq!(jaccard_similarity("", ""), 0.0);
        assert_eq!(jaccard_similarity("word", "   "), 0.0);
        // {the, brown} / {the, quick, brown, fox, lazy, dog}
        assert!((jaccard_similarity(a, b) - 2.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_truncate_chars_is_char_safe() {
        assert_eq!(truncate_chars("short", 50), "short");
        assert_eq!(truncate_chars("abcdef", 3), "abc...");
        assert_eq!(truncate_chars("用户喜欢蓝色", 2), "用户...");
    }

    #[test]
    fn test_conflict_markers() {
        assert!(has_conflict_marker("Actually, the meeting moved"));
        assert!(has_conflict_marker("That is wrong"));
        assert!(has_conflict_marker("他其实住在上海"));
        assert!(!has_conflict_marker("The meeting is on Monday"));
        // "nothing" and "note" are not the word "no"/"not"
        assert!(!has_conflict_marker("nothing to note here"));
    }

    #[test]
    fn test_contradictions() {
        assert!(are_contradictory(
            "The system is running",
            "The system is not running"
        ));
        assert!(are_contradictory("用户有一只猫", "用户没有猫"));
        assert!(are_contradictory("She can swim", "She cannot swim"));
        assert!(!are_contradictory(
            "The door is not locked",
            "The window is not open"
        ));
        assert!(!are_contradictory("The sky is blue", "Grass is green"));
    }

    #[test]
    fn test_opposite_polarity_on_unrelated_topics_is_not_a_contradiction() {
        assert!(!are_contradictory("The sky is blue", "The door is not locked"));
        assert!(!are_contradictory("用户有一只猫", "天气没有变冷"));
        assert!(are_contradictory("The cat is black.", "the cat is not black"));
    }

    #[test]
    fn test_topic_overlap_sees_chinese_characters() {
        assert_eq!(jaccard_similarity("用户有一只猫", "用户没有猫"), 0.0);
        // {用, 户, 有, 猫} / {用, 户, 有, 一, 只, 猫, 没}
        assert!((topic_overlap("用户有一只猫", "用户没有猫") - 4.0 / 7.0).abs() < 1e-9);
        assert_eq!(topic_overlap("", "anything"), 0.0);
    }
}
