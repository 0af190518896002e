//! Write-behind persistence for the service loop

use homegate_store::{AuditEvent, PersistedState, Store, StoreError, StoreResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, warn};

enum WriteOp {
    Save(Box<PersistedState>),
    Audit(AuditEvent),
    Flush(oneshot::Sender<bool>),
}

/// [`Store`] whose writes are carried out by a background task.
///
/// `save_state` and `append_audit` only queue the write, so the engine never
/// waits on SQLite while the service holds its lock. The writer keeps the
/// newest state snapshot, retries failed writes every `retry_interval`, and
/// answers [`flush`](Self::flush) once everything queued before it was tried.
/// Reads go straight to the inner store; they only happen at startup.
pub struct WriteBehindStore {
    inner: Arc<dyn Store>,
    tx: mpsc::UnboundedSender<WriteOp>,
    healthy: Arc<AtomicBool>,
}

impl WriteBehindStore {
    /// Start the writer task; it exits once the store is dropped
    pub fn spawn(inner: Arc<dyn Store>, retry_interval: Duration) -> (Arc<Self>, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let healthy = Arc::new(AtomicBool::new(true));
        let writer = tokio::spawn(run_writer(
            inner.clone(),
            rx,
            healthy.clone(),
            retry_interval,
        ));

        (
            Arc::new(Self {
                inner,
                tx,
                healthy,
            }),
            writer,
        )
    }

    /// Wait for every queued write to be attempted. Returns true if nothing
    /// is left waiting for a retry.
    pub async fn flush(&self) -> bool {
        let (done, wait) = oneshot::channel();
        if self.tx.send(WriteOp::Flush(done)).is_err() {
            return false;
        }
        wait.await.unwrap_or(false)
    }

    fn enqueue(&self, op: WriteOp) -> StoreResult<()> {
        self.tx.send(op).map_err(|_| StoreError::WriterStopped)
    }
}

impl Store for WriteBehindStore {
    fn load_state(&self) -> StoreResult<Option<PersistedState>> {
        self.inner.load_state()
    }

    fn save_state(&self, state: &PersistedState) -> StoreResult<()> {
        self.enqueue(WriteOp::Save(Box::new(state.clone())))
    }

    fn append_audit(&self, event: AuditEvent) -> StoreResult<()> {
        self.enqueue(WriteOp::Audit(event))
    }

    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>> {
        self.inner.get_recent_audits(limit)
    }

    /// Outcome of the last write; never touches the database
    fn is_healthy(&self) -> bool {
        !self.tx.is_closed() && self.healthy.load(Ordering::Relaxed)
    }
}

/// Writes not yet on disk
#[derive(Default)]
struct Pending {
    state: Option<PersistedState>,
    audits: Vec<AuditEvent>,
}

impl Pending {
    fn absorb(&mut self, op: WriteOp, waiters: &mut Vec<oneshot::Sender<bool>>) {
        match op {
            WriteOp::Save(state) => self.state = Some(*state),
            WriteOp::Audit(event) => self.audits.push(event),
            WriteOp::Flush(done) => waiters.push(done),
        }
    }

    fn is_empty(&self) -> bool {
        self.state.is_none() && self.audits.is_empty()
    }

    async fn write(&mut self, store: &Arc<dyn Store>, healthy: &AtomicBool) {
        if self.is_empty() {
            return;
        }

        let batch = std::mem::take(self);
        let store = store.clone();
        *self = match tokio::task::spawn_blocking(move || batch.write_blocking(store.as_ref()))
            .await
        {
            Ok(leftover) => leftover,
            Err(e) => {
                error!(error = %e, "Store write task failed");
                Pending::default()
            }
        };
        healthy.store(self.is_empty(), Ordering::Relaxed);
    }

    /// Returns whatever could not be written
    fn write_blocking(self, store: &dyn Store) -> Pending {
        let mut leftover = Pending::default();

        let mut audits = self.audits.into_iter();
        while let Some(event) = audits.next() {
            if let Err(e) = store.append_audit(event.clone()) {
                warn!(error = %e, "Failed to append audit event, will retry");
                leftover.audits.push(event);
                leftover.audits.extend(audits);
                break;
            }
        }

        if let Some(state) = self.state
            && let Err(e) = store.save_state(&state)
        {
            warn!(error = %e, "Failed to persist policy state, will retry");
            leftover.state = Some(state);
        }

        leftover
    }
}

async fn run_writer(
    store: Arc<dyn Store>,
    mut rx: mpsc::UnboundedReceiver<WriteOp>,
    healthy: Arc<AtomicBool>,
    retry_interval: Duration,
) {
    let mut pending = Pending::default();
    let mut retry_at: Option<Instant> = None;

    loop {
        let mut waiters = Vec::new();
        let retry = tokio::time::sleep_until(retry_at.unwrap_or_else(Instant::now));

        tokio::select! {
            op = rx.recv() => match op {
                Some(op) => pending.absorb(op, &mut waiters),
                None => break,
            },
            _ = retry, if retry_at.is_some() => {
                debug!("Retrying failed store writes");
            }
        }

        // Coalesce everything already queued into one write
        while let Ok(op) = rx.try_recv() {
            pending.absorb(op, &mut waiters);
        }

        pending.write(&store, &healthy).await;
        retry_at = (!pending.is_empty()).then(|| Instant::now() + retry_interval);

        let clean = pending.is_empty();
        for done in waiters {
            let _ = done.send(clean);
        }
    }

    pending.write(&store, &healthy).await;
    if !pending.is_empty() {
        warn!("Store writer stopped with unsaved changes");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use homegate_config::Policy;
    use homegate_core::PolicyEngine;
    use homegate_store::{AuditEventType, SqliteStore};
    use homegate_util::ManualClock;
    use std::sync::Mutex;

    const RETRY: Duration = Duration::from_millis(20);

    /// Store whose writes fail while `failing` is set
    #[derive(Default)]
    struct FlakyStore {
        failing: AtomicBool,
        saved: Mutex<Option<PersistedState>>,
        audits: Mutex<Vec<AuditEvent>>,
    }

    impl FlakyStore {
        fn check(&self) -> StoreResult<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(StoreError::Database("database is locked".into()));
            }
            Ok(())
        }
    }

    impl Store for FlakyStore {
        fn load_state(&self) -> StoreResult<Option<PersistedState>> {
            Ok(self.saved.lock().unwrap().clone())
        }

        fn save_state(&self, state: &PersistedState) -> StoreResult<()> {
            self.check()?;
            *self.saved.lock().unwrap() = Some(state.clone());
            Ok(())
        }

        fn append_audit(&self, event: AuditEvent) -> StoreResult<()> {
            self.check()?;
            self.audits.lock().unwrap().push(event);
            Ok(())
        }

        fn get_recent_audits(&self, _limit: usize) -> StoreResult<Vec<AuditEvent>> {
            Ok(self.audits.lock().unwrap().clone())
        }

        fn is_healthy(&self) -> bool {
            true
        }
    }

    /// Store whose saves wait until the test lets them through
    struct GatedStore {
        gate: Mutex<std::sync::mpsc::Receiver<()>>,
        saved: Mutex<Option<PersistedState>>,
    }

    impl Store for GatedStore {
        fn load_state(&self) -> StoreResult<Option<PersistedState>> {
            Ok(None)
        }

        fn save_state(&self, state: &PersistedState) -> StoreResult<()> {
            let _ = self.gate.lock().unwrap().recv();
            *self.saved.lock().unwrap() = Some(state.clone());
            Ok(())
        }

        fn append_audit(&self, _event: AuditEvent) -> StoreResult<()> {
            Ok(())
        }

        fn get_recent_audits(&self, _limit: usize) -> StoreResult<Vec<AuditEvent>> {
            Ok(Vec::new())
        }

        fn is_healthy(&self) -> bool {
            true
        }
    }

    fn state_with_limit(minutes: u32) -> PersistedState {
        PersistedState {
            daily_limit_minutes: minutes,
            ..PersistedState::default()
        }
    }

    #[tokio::test]
    async fn queued_writes_land_after_flush() {
        let inner = Arc::new(SqliteStore::in_memory().unwrap());
        let (store, _writer) = WriteBehindStore::spawn(inner.clone(), RETRY);

        store.save_state(&state_with_limit(60)).unwrap();
        store.save_state(&state_with_limit(90)).unwrap();
        store
            .append_audit(AuditEvent::new(AuditEventType::ServiceStarted))
            .unwrap();

        assert!(store.flush().await);
        assert_eq!(inner.load_state().unwrap(), Some(state_with_limit(90)));
        assert_eq!(inner.get_recent_audits(10).unwrap().len(), 1);
        assert!(store.is_healthy());
    }

    #[tokio::test]
    async fn failed_writes_are_retried() {
        let inner = Arc::new(FlakyStore::default());
        inner.failing.store(true, Ordering::SeqCst);
        let (store, _writer) = WriteBehindStore::spawn(inner.clone(), RETRY);

        store.save_state(&state_with_limit(45)).unwrap();
        store
            .append_audit(AuditEvent::new(AuditEventType::ServiceStarted))
            .unwrap();
        assert!(!store.flush().await);
        assert!(!store.is_healthy());
        assert!(inner.saved.lock().unwrap().is_none());

        // The retry timer picks the writes up without new traffic
        inner.failing.store(false, Ordering::SeqCst);
        tokio::time::sleep(RETRY * 10).await;

        assert_eq!(*inner.saved.lock().unwrap(), Some(state_with_limit(45)));
        assert_eq!(inner.audits.lock().unwrap().len(), 1);
        assert!(store.is_healthy());
        assert!(store.flush().await);
    }

    #[tokio::test]
    async fn engine_mutations_do_not_wait_for_the_store() {
        let (open, gate) = std::sync::mpsc::channel();
        let inner = Arc::new(GatedStore {
            gate: Mutex::new(gate),
            saved: Mutex::new(None),
        });
        let (store, _writer) = WriteBehindStore::spawn(inner.clone(), RETRY);

        let clock = Arc::new(ManualClock::at(2024, 3, 4, 9, 0));
        let mut engine = PolicyEngine::new(&Policy::default(), store.clone(), clock).unwrap();

        // Returns while the database write is still held up
        assert_eq!(engine.set_daily_limit(75), 75);
        assert!(inner.saved.lock().unwrap().is_none());

        open.send(()).unwrap();
        assert!(store.flush().await);
        assert_eq!(
            inner.saved.lock().unwrap().as_ref().map(|s| s.daily_limit_minutes),
            Some(75)
        );
    }

    #[tokio::test]
    async fn dropping_the_store_drains_the_queue() {
        let inner = Arc::new(SqliteStore::in_memory().unwrap());
        let (store, writer) = WriteBehindStore::spawn(inner.clone(), RETRY);

        store.save_state(&state_with_limit(150)).unwrap();
        drop(store);
        writer.await.unwrap();

        assert_eq!(inner.load_state().unwrap(), Some(state_with_limit(150)));
    }
}
