//! Mock enforcement host for testing

use async_trait::async_trait;
use homegate_api::BlockNotice;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::{EnforcementHost, HostError, HostResult};

/// Records everything it is asked to do
#[derive(Debug, Default)]
pub struct MockHost {
    blocks: Mutex<Vec<BlockNotice>>,
    notifications: Mutex<Vec<String>>,

    /// Configure enforcement to fail
    pub fail_enforce: AtomicBool,
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notices passed to `enforce_block`, oldest first
    pub fn blocks(&self) -> Vec<BlockNotice> {
        lock(&self.blocks).clone()
    }

    /// Messages passed to `notify`, oldest first
    pub fn notifications(&self) -> Vec<String> {
        lock(&self.notifications).clone()
    }

    pub fn set_fail_enforce(&self, fail: bool) {
        self.fail_enforce.store(fail, Ordering::SeqCst);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl EnforcementHost for MockHost {
    async fn enforce_block(&self, notice: &BlockNotice) -> HostResult<()> {
        if self.fail_enforce.load(Ordering::SeqCst) {
            return Err(HostError::DeliveryFailed("Mock enforcement failure".into()));
        }
        lock(&self.blocks).push(notice.clone());
        Ok(())
    }

    async fn notify(&self, message: &str) -> HostResult<()> {
        lock(&self.notifications).push(message.to_string());
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        !self.fail_enforce.load(Ordering::SeqCst)
    }
}
