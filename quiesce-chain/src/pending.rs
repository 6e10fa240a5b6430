use quiesce_epoch::EpochId;

/// A deferred side-effecting action (typically an active-message send)
/// stamped with the epoch it belongs to. `release` performs the action
/// exactly once; dropping an unreleased `PendingSend` performs it too, so
/// at-least-once delivery holds even if a caller forgets to release.
pub struct PendingSend {
    action: Option<Box<dyn FnOnce() + 'static>>,
    target: EpochId,
    released: bool,
}

impl PendingSend {
    pub fn new(target: EpochId, action: impl FnOnce() + 'static) -> Self {
        PendingSend {
            action: Some(Box::new(action)),
            target,
            released: false,
        }
    }

    pub fn target(&self) -> EpochId {
        self.target
    }

    /// Consume `self` and run the deferred action exactly once.
    pub fn release(mut self) {
        self.fire();
    }

    fn fire(&mut self) {
        if let Some(action) = self.action.take() {
            action();
        }
        self.released = true;
    }
}

impl Drop for PendingSend {
    fn drop(&mut self) {
        if !self.released {
            self.fire();
        }
    }
}
