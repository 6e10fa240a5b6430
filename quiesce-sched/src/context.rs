use crate::scheduler::Scheduler;
use quiesce_epoch::{EpochId, EpochManager, TermStatus};
use quiesce_net::{CollectiveOps, Transport};

/// One simulated node's runtime: the termination-detection core plus the
/// scheduler that drains its runnable work. Deliberately owns both directly
/// rather than behind an `Rc<RefCell<_>>` -- the whole point of the §5
/// single-threaded cooperative model is that one driver (a test, or the
/// top-level binary's main loop) has exclusive access at a time.
///
/// The per-node current-epoch stack is the one `EpochManager` already keeps
/// (`push_epoch`/`pop_epoch`/`current_epoch`); `RuntimeContext` delegates to
/// it rather than duplicating a second stack.
pub struct RuntimeContext<T, S> {
    manager: EpochManager<T>,
    scheduler: S,
}

impl<T, S> RuntimeContext<T, S>
where
    T: Transport + CollectiveOps,
    S: Scheduler,
{
    pub fn new(manager: EpochManager<T>, scheduler: S) -> Self {
        RuntimeContext { manager, scheduler }
    }

    pub fn manager(&self) -> &EpochManager<T> {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut EpochManager<T> {
        &mut self.manager
    }

    pub fn scheduler_mut(&mut self) -> &mut S {
        &mut self.scheduler
    }

    pub fn push_epoch(&mut self, id: EpochId) {
        self.manager.push_epoch(id);
    }

    pub fn pop_epoch(&mut self, id: EpochId) {
        self.manager.pop_epoch(id);
    }

    pub fn current_epoch(&self) -> EpochId {
        self.manager.current_epoch()
    }

    /// Run the scheduler until `pred` says stop or there's no work left.
    pub fn run_scheduler_while(&mut self, mut pred: impl FnMut(&EpochManager<T>) -> bool) {
        while pred(&self.manager) {
            if !self.scheduler.run_one() {
                break;
            }
        }
    }

    /// Run the scheduler until `epoch` is observed terminated (or the window
    /// already shows it ran to completion), or there's no work left.
    pub fn run_scheduler_through(&mut self, epoch: EpochId) {
        self.run_scheduler_while(|mgr| !matches!(mgr.is_epoch_terminated(epoch), TermStatus::Terminated | TermStatus::WindowTerminated));
    }
}
