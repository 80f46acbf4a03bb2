use std::future::Future;
use std::sync::Arc;

use crate::invoke::{CommandLine, Invoker, SyncRun};
use crate::notify::{self, Notifier};
use crate::store::ConfigStore;
use crate::validate::{self, ValidationError};

/// What happened when a sync was requested
#[derive(Debug)]
pub enum Triggered {
    /// Settings failed validation; nothing was spawned
    Rejected(ValidationError),
    /// Another sync against the same store was still in flight; nothing was spawned
    AlreadyRunning,
    /// Settings are valid; this is what would have run
    DryRun(CommandLine),
    Completed(SyncRun),
}

impl Triggered {
    pub fn is_success(&self) -> bool {
        match self {
            Triggered::DryRun(_) => true,
            Triggered::Completed(run) => run.is_success(),
            Triggered::Rejected(_) | Triggered::AlreadyRunning => false,
        }
    }
}

/// Entry point for a user-requested sync.
///
/// Runs are claimed from the [ConfigStore], so triggers sharing a store never overlap
pub struct Trigger {
    store: Arc<ConfigStore>,
    notifier: Arc<dyn Notifier>,
}

impl Trigger {
    pub fn new(store: Arc<ConfigStore>, notifier: Arc<dyn Notifier>) -> Trigger {
        Trigger { store, notifier }
    }

    pub fn is_running(&self) -> bool {
        self.store.is_running()
    }

    /// Validate the current settings and run a sync to completion
    pub async fn on_triggered(&self) -> Triggered {
        self.on_triggered_until(std::future::pending()).await
    }

    /// As [Trigger::on_triggered], killing the sync if `cancel` resolves first
    pub async fn on_triggered_until<F>(&self, cancel: F) -> Triggered
    where
        F: Future<Output = ()>,
    {
        let triggered = match self.store.begin_run() {
            Some(_guard) => {
                // settings are copied here; later edits only affect later runs
                let settings = self.store.snapshot();

                match validate::validate(&settings.sync) {
                    Ok(()) => {
                        let invoker = Invoker::new(settings.tool);
                        Triggered::Completed(invoker.run_until(&settings.sync, cancel).await)
                    }
                    Err(e) => {
                        log::warn!("sync rejected: {e}");
                        Triggered::Rejected(e)
                    }
                }
            }

            None => {
                log::warn!("sync requested while another is in progress");
                Triggered::AlreadyRunning
            }
        };

        self.notifier.notify(&notify::describe(&triggered));
        triggered
    }

    /// Validate the current settings and report the command without running it
    pub fn dry_run(&self) -> Triggered {
        let settings = self.store.snapshot();

        let triggered = match validate::validate(&settings.sync) {
            Ok(()) => Triggered::DryRun(Invoker::new(settings.tool).command(&settings.sync)),
            Err(e) => Triggered::Rejected(e),
        };

        self.notifier.notify(&notify::describe(&triggered));
        triggered
    }
}
