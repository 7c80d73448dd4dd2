pub mod channel;
pub mod message;
pub mod reputation;
pub mod user;
