pub mod pool;

pub use pool::PoolLifecycleManager;
