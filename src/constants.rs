// RULE WEIGHTS
//
// Shared by the message rules and the side-effect dispatcher.
pub const BIG_VALUE: i64 = 5;
pub const MID_VALUE: i64 = 3;
pub const SMALL_VALUE: i64 = 2;
pub const MIN_VALUE: i64 = 1;

pub const MENTION_VALUE: i64 = MID_VALUE;
pub const SELF_MENTION_VALUE: i64 = -MID_VALUE;
pub const REACTION_VALUE: i64 = SMALL_VALUE;

// COMPOSITION RULE
pub const PRIME_LETTER_FLOOR: u64 = 10;
pub const VOWEL_RATIO_FLOOR: f64 = 0.45;
pub const SENTENCE_ENDINGS: [char; 3] = ['.', '?', '!'];

// LENGTH RULE
pub const SHORT_MESSAGE_WORDS: usize = 2;
pub const LONG_MESSAGE_WORDS: usize = 30;

// TIMING RULE
pub const RAPID_GAP_MILLIS: i64 = 1_500;
pub const IDLE_GAP_HOURS: i64 = 6;

/// Stand-in for the author's spendable balance when an idle penalty is clamped. This is a fixed
/// value and not a lookup of the author's real score.
pub const PLACEHOLDER_BALANCE: i64 = 5;

// DAMPENING
pub const FLIP_SCALE: f64 = 0.65;
pub const FLIP_FLOOR: f64 = 0.01;
pub const FLIP_CEILING: f64 = 0.15;
pub const CAP_FLOOR: i64 = 100;

// DEFAULTS (overridable from env)
pub const DEFAULT_COOLDOWN_SECS: u64 = 300;
pub const DEFAULT_LEADERBOARD_SIZE: usize = 15;
pub const DEFAULT_WORKER_COUNT: usize = 4;
pub const DEFAULT_SERVICE_NAME: &str = "respec";
pub const DEFAULT_LOG_FILTER: &str = "respec=debug,sqlx=info,info";

pub const TOP_ROLE_NAME: &str = "Supreme Ruler";
pub const RULING_ROLE_NAME: &str = "Ruling Class";
pub const LOSER_ROLE_NAME: &str = "Losers";

pub const LEADERBOARD_PADDING: usize = 3;

/// Upper bound on a single role resolve/grant/revoke round trip.
pub const ROLE_CALL_TIMEOUT_SECS: u64 = 10;
