//! Re-exports the subsystem crates under one name for downstream users who
//! want the whole runtime (core, chains, scheduler, test harness) without
//! pinning each path dependency individually. The binary in `src/bin.rs` is
//! an illustrative demo, not the only intended caller -- see SPEC_FULL.md §1.

pub use quiesce_chain as chain;
pub use quiesce_epoch as epoch;
pub use quiesce_harness as harness;
pub use quiesce_net as net;
pub use quiesce_sched as sched;
