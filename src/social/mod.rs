pub mod announce;
pub mod client;
pub mod mentions;
pub mod twitter;
