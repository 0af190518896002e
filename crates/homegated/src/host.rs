//! Enforcement host that hands blocks to subscribed platform agents

use async_trait::async_trait;
use homegate_api::{BlockNotice, Event, EventPayload};
use homegate_host_api::{EnforcementHost, HostError, HostResult};
use homegate_ipc::IpcServer;
use std::sync::Arc;

/// The restricted app is taken away by an agent on the device, not by the
/// service itself. This host publishes `blocked` on the event stream and
/// reports [`HostError::NoAgent`] when nobody is listening.
pub struct BroadcastHost {
    ipc: Arc<IpcServer>,
}

impl BroadcastHost {
    pub fn new(ipc: Arc<IpcServer>) -> Self {
        Self { ipc }
    }
}

#[async_trait]
impl EnforcementHost for BroadcastHost {
    async fn enforce_block(&self, notice: &BlockNotice) -> HostResult<()> {
        self.ipc
            .broadcast_event(Event::new(EventPayload::Blocked(notice.clone())));

        if self.ipc.subscriber_count().await == 0 {
            return Err(HostError::NoAgent);
        }
        Ok(())
    }

    async fn notify(&self, message: &str) -> HostResult<()> {
        self.ipc.broadcast_event(Event::new(EventPayload::Notification {
            message: message.to_string(),
        }));
        Ok(())
    }
}
