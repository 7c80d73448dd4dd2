//! Message heuristics.
//!
//! Every rule is a pure function of the incoming message and the two "preceding message" lookups;
//! the message's delta is the sum of all of them. An empty message skips the rules entirely.

use chrono::Duration;

use crate::constants::{
    BIG_VALUE, IDLE_GAP_HOURS, LONG_MESSAGE_WORDS, MID_VALUE, MIN_VALUE, PLACEHOLDER_BALANCE,
    PRIME_LETTER_FLOOR, RAPID_GAP_MILLIS, SENTENCE_ENDINGS, SHORT_MESSAGE_WORDS, SMALL_VALUE,
    VOWEL_RATIO_FLOOR,
};
use crate::db::models::message::Message;

/// Everything the rules are allowed to look at.
#[derive(Debug, Clone, Copy)]
pub struct RuleInput<'a> {
    pub message: &'a Message,
    /// Latest message in the channel before this one, from anyone.
    pub preceding: Option<&'a Message>,
    /// Latest message in the channel before this one, from the same author.
    pub preceding_by_author: Option<&'a Message>,
}

/// Per-rule contributions, mostly for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Breakdown {
    pub repetition: i64,
    pub composition: i64,
    pub timing: i64,
    pub length: i64,
}

impl Breakdown {
    pub fn total(&self) -> i64 {
        self.repetition + self.composition + self.timing + self.length
    }
}

pub fn evaluate(input: &RuleInput<'_>) -> i64 {
    breakdown(input).total()
}

pub fn breakdown(input: &RuleInput<'_>) -> Breakdown {
    let content = input.message.content.as_str();
    if content.is_empty() {
        return Breakdown {
            composition: -SMALL_VALUE,
            ..Breakdown::default()
        };
    }

    Breakdown {
        repetition: repetition(input),
        composition: composition(content),
        timing: timing(input),
        length: length(content),
    }
}

/// Double posting and copy-pasting.
pub fn repetition(input: &RuleInput<'_>) -> i64 {
    let Some(prev) = input.preceding else {
        return SMALL_VALUE;
    };

    let mut respec = if prev.author_id == input.message.author_id {
        -MIN_VALUE
    } else {
        SMALL_VALUE
    };

    if prev.content == input.message.content {
        respec -= BIG_VALUE;
    }

    respec
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LetterCounts {
    pub vowels: u64,
    pub consonants: u64,
    pub caps: u64,
    pub other: u64,
}

impl LetterCounts {
    pub fn count(content: &str) -> Self {
        let mut counts = Self::default();

        for c in content.chars() {
            if !c.is_ascii_alphabetic() {
                counts.other += 1;
                continue;
            }

            if c.is_ascii_uppercase() {
                counts.caps += 1;
            }

            match c.to_ascii_lowercase() {
                'a' | 'e' | 'i' | 'o' | 'u' => counts.vowels += 1,
                _ => counts.consonants += 1,
            }
        }

        counts
    }

    pub fn letters(&self) -> u64 {
        self.vowels + self.consonants
    }
}

/// Letter makeup, shouting and punctuation.
pub fn composition(content: &str) -> i64 {
    let counts = LetterCounts::count(content);
    let total = counts.letters();
    let mut respec = 0;

    if total > PRIME_LETTER_FLOOR && is_prime(total) {
        respec += BIG_VALUE;
    }

    if total > 0 && counts.caps == total {
        respec -= BIG_VALUE;
    }

    if counts.vowels > counts.consonants {
        respec += MIN_VALUE;
    } else if (counts.vowels as f64) < counts.consonants as f64 * VOWEL_RATIO_FLOOR {
        respec -= SMALL_VALUE;
    }

    if counts.other > total {
        respec -= MID_VALUE;
    }

    if counts.caps == 0 && total > 0 {
        respec -= SMALL_VALUE;
    } else {
        respec += MIN_VALUE;
    }

    if content
        .chars()
        .last()
        .is_some_and(|c| SENTENCE_ENDINGS.contains(&c))
    {
        respec += MIN_VALUE;
    }

    respec
}

/// Spamming and coming back from a long silence.
pub fn timing(input: &RuleInput<'_>) -> i64 {
    let Some(prev) = input.preceding_by_author else {
        return 0;
    };

    let gap = input.message.sent_at - prev.sent_at;
    if gap < Duration::milliseconds(RAPID_GAP_MILLIS) {
        return -SMALL_VALUE;
    }

    if gap > Duration::hours(IDLE_GAP_HOURS) {
        let respec = -gap.num_hours() * MIN_VALUE;
        return clamp_to_balance(respec, PLACEHOLDER_BALANCE);
    }

    0
}

/// Keeps a penalty from taking more than `available` away.
fn clamp_to_balance(respec: i64, available: i64) -> i64 {
    if available < 0 {
        0
    } else if available + respec < 0 {
        -available
    } else {
        respec
    }
}

/// One-word replies and walls of text.
pub fn length(content: &str) -> i64 {
    let words = content.split_whitespace().count();

    if words < SHORT_MESSAGE_WORDS {
        -SMALL_VALUE
    } else if words > LONG_MESSAGE_WORDS {
        -BIG_VALUE
    } else {
        0
    }
}

pub fn is_prime(n: u64) -> bool {
    if n < 2 {
        return false;
    }
    if n % 2 == 0 {
        return n == 2;
    }

    let mut d = 3;
    while d * d <= n {
        if n % d == 0 {
            return false;
        }
        d += 2;
    }

    true
}

#[cfg(test)]
mod test {
    use chrono::{DateTime, Utc};

    use super::*;

    fn message(author: &str, content: &str, at: DateTime<Utc>) -> Message {
        Message {
            id: format!("{author}-{}", at.timestamp_millis()),
            author_id: author.into(),
            channel_id: "test:general".into(),
            content: content.to_string(),
            sent_at: at,
        }
    }

    fn input<'a>(
        message: &'a Message,
        preceding: Option<&'a Message>,
        preceding_by_author: Option<&'a Message>,
    ) -> RuleInput<'a> {
        RuleInput {
            message,
            preceding,
            preceding_by_author,
        }
    }

    #[test]
    fn test_hello_world_composition() {
        let counts = LetterCounts::count("Hello World!");
        assert_eq!(
            counts,
            LetterCounts {
                vowels: 3,
                consonants: 7,
                caps: 2,
                other: 2
            }
        );

        assert_eq!(composition("Hello World!"), 0);
    }

    #[test]
    fn test_composition_branches() {
        // 11 letters (prime), all caps, vowels < 0.45 consonants, ends with '!'
        // +5 -5 -2 +1 +1
        assert_eq!(composition("STRNGTHS XYZ!"), 0);

        // no caps: -2, vowel-heavy: +1
        assert_eq!(composition("aaa eee iou"), -1);

        // punctuation soup: no letters, other > 0 -> -3, then +1 for "caps" branch
        assert_eq!(composition("?!?!"), -3 + 1 + 1);
    }

    #[test]
    fn test_primes() {
        let primes: Vec<u64> = (0..30).filter(|n| is_prime(*n)).collect();
        assert_eq!(primes, vec![2, 3, 5, 7, 11, 13, 17, 19, 23, 29]);
    }

    #[test]
    fn test_repetition() {
        let now = Utc::now();
        let first = message("test:alice", "same thing", now);
        let second_same_author = message("test:alice", "same thing", now);
        let other_author = message("test:bob", "different", now);

        assert_eq!(repetition(&input(&first, None, None)), 2);
        assert_eq!(repetition(&input(&second_same_author, Some(&first), None)), -1 - 5);
        assert_eq!(repetition(&input(&other_author, Some(&first), None)), 2);

        let copycat = message("test:bob", "same thing", now);
        assert_eq!(repetition(&input(&copycat, Some(&first), None)), 2 - 5);
    }

    #[test]
    fn test_timing_gaps() {
        let now = Utc::now();
        let prev = message("test:alice", "earlier", now);

        let rapid = message("test:alice", "again", now + Duration::milliseconds(1_200));
        assert_eq!(timing(&input(&rapid, None, Some(&prev))), -2);

        let normal = message("test:alice", "again", now + Duration::minutes(10));
        assert_eq!(timing(&input(&normal, None, Some(&prev))), 0);

        let seven_hours = message("test:alice", "again", now + Duration::hours(7));
        assert_eq!(timing(&input(&seven_hours, None, Some(&prev))), -PLACEHOLDER_BALANCE);

        assert_eq!(timing(&input(&normal, None, None)), 0);
    }

    #[test]
    fn test_balance_clamp() {
        assert_eq!(clamp_to_balance(-3, 5), -3);
        assert_eq!(clamp_to_balance(-9, 5), -5);
        assert_eq!(clamp_to_balance(-9, -1), 0);
    }

    #[test]
    fn test_length() {
        assert_eq!(length("hi"), -2);
        assert_eq!(length("hello there"), 0);
        assert_eq!(length(&"word ".repeat(31)), -5);
    }

    #[test]
    fn test_empty_message_short_circuits() {
        let now = Utc::now();
        let prev = message("test:alice", "", now);
        let empty = message("test:alice", "", now + Duration::milliseconds(10));

        let result = breakdown(&input(&empty, Some(&prev), Some(&prev)));
        assert_eq!(result.total(), -2);
        assert_eq!(result.repetition, 0);
        assert_eq!(result.timing, 0);
    }

    #[test]
    fn test_full_evaluation() {
        let now = Utc::now();
        let hello = message("test:alice", "Hello World!", now);

        // repetition +2 (no prior), composition 0, timing 0, length 0
        assert_eq!(evaluate(&input(&hello, None, None)), 2);
    }
}
