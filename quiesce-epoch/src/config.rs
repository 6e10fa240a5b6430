/// Runtime-wide knobs for the termination core. None of these affect
/// correctness, only overhead/diagnostics (§5, §7).
#[derive(Clone, Copy, Debug)]
pub struct RuntimeConfig {
    /// Soft threshold `K` from §5: once a node has more than this many live
    /// rooted epochs, newly-created rooted epochs use the DS detector
    /// regardless of the caller's `use_ds` preference, to bound
    /// wave-collective overhead. Implementation-defined, not observable to
    /// correctness.
    pub ds_backpressure_threshold: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            ds_backpressure_threshold: 64,
        }
    }
}
