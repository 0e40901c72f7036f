/*!
 * Manager Faults
 * Failures that happen off the caller's thread or after it has moved on
 */

use crate::core::types::{EventTypeId, SubscriptionId};
use crate::events::errors::PublishError;
use crate::ipc::IpcError;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{error, warn};

/// Background failure observed by a subscription manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerFault {
    /// Withdrawal could not be published; the entry was still removed
    UnsubscribeFailed {
        event_type: EventTypeId,
        subscription_id: SubscriptionId,
        error: PublishError,
    },
    /// Periodic republish failed; the entry stays and is retried next round
    RefreshFailed {
        event_type: EventTypeId,
        subscription_id: SubscriptionId,
        error: PublishError,
    },
    /// Listener could not read its queue
    ListenerFault { error: IpcError },
    /// Application callback panicked
    CallbackPanicked { event_type: EventTypeId },
}

/// Observer for manager faults
pub type FaultHook = Arc<dyn Fn(&ManagerFault) + Send + Sync>;

/// Logs every fault and forwards it to the installed hook, if any
#[derive(Clone, Default)]
pub(crate) struct FaultReporter {
    hook: Arc<RwLock<Option<FaultHook>>>,
}

impl FaultReporter {
    pub fn set_hook(&self, hook: Option<FaultHook>) {
        *self.hook.write() = hook;
    }

    pub fn report(&self, fault: ManagerFault) {
        match &fault {
            ManagerFault::UnsubscribeFailed {
                event_type, error, ..
            } => warn!(%event_type, %error, "Unsubscribe publish failed"),
            ManagerFault::RefreshFailed {
                event_type, error, ..
            } => warn!(%event_type, %error, "Subscription refresh failed"),
            ManagerFault::ListenerFault { error } => error!(%error, "Listener queue fault"),
            ManagerFault::CallbackPanicked { event_type } => {
                error!(%event_type, "Event callback panicked")
            }
        }

        let hook = self.hook.read().clone();
        if let Some(hook) = hook {
            hook(&fault);
        }
    }
}
