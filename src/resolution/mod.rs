pub mod actor;
pub mod scheduler;
pub mod settlement;

pub use actor::ResolutionActor;
pub use scheduler::{BatchReport, ResolutionScheduler};
pub use settlement::{Settlement, SettlementReport};
