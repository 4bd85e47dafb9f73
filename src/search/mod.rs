pub mod client;
pub mod tavily;
