pub mod adjust;
pub mod effects;
pub mod random;
pub mod rules;

pub mod prelude {
    pub use crate::rate::adjust::{Adjustment, Polarity, apply, cap, dampen, flip_probability};
    pub use crate::rate::effects::{CooldownGate, Effect, apply_effect};
    pub use crate::rate::random::{FixedDraw, RandomSource, WyRandom};
    pub use crate::rate::rules::{Breakdown, RuleInput, breakdown, evaluate};
}
