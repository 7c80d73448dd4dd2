//! Channel-scoped reputation scoring for chat communities, with leaderboards and tier roles
//! derived from the standings.

pub mod constants;
pub mod db;
pub mod engine;
pub mod rank;
pub mod rate;
pub mod roles;
pub mod util;
