pub mod generator;

pub use generator::{IdeaGenerator, LlmIdeaGenerator, PoolIdea};
