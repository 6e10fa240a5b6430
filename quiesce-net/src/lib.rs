mod envelope;
mod node;
mod transport;

pub mod mock;

pub use envelope::Envelope;
pub use node::NodeId;
pub use transport::{CollectiveOps, Transport};
