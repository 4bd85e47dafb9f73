pub mod client;
pub mod evm;
pub mod simulator;
pub mod subgraph;
