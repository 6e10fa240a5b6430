mod chain;
mod chain_set;
mod pending;

pub use chain::DependentSendChain;
pub use chain_set::{ChainSet, ChainSetLayout};
pub use pending::PendingSend;
