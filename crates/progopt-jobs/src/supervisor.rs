//! Bounded worker admission
//!
//! At most `capacity` workers run at once; everything past the cap waits in
//! a FIFO queue and is admitted in arrival order as slots free up. A
//! background task drains completion notices, so admission needs no polling
//! and no lock is ever held across an await.

use crate::error::JobError;
use crate::snapshot::ControlFlags;
use dashmap::DashMap;
use futures::future::BoxFuture;
use progopt_store::JobId;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

struct QueuedJob {
    id: JobId,
    flags: Arc<ControlFlags>,
    work: BoxFuture<'static, ()>,
}

struct ActiveJob {
    flags: Arc<ControlFlags>,
    #[allow(dead_code)]
    join: Option<JoinHandle<()>>,
}

struct Inner {
    capacity: usize,
    active: DashMap<JobId, ActiveJob>,
    queue: parking_lot::Mutex<VecDeque<QueuedJob>>,
    done_tx: mpsc::UnboundedSender<JobId>,
    shutting_down: AtomicBool,
}

/// Admission control for job workers
#[derive(Clone)]
pub struct JobSupervisor {
    inner: Arc<Inner>,
}

impl JobSupervisor {
    /// Supervisor admitting at most `capacity` workers at once
    ///
    /// Must be created inside a tokio runtime; a background task handles
    /// completion notices and admits queued jobs in arrival order.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            capacity: capacity.max(1),
            active: DashMap::new(),
            queue: parking_lot::Mutex::new(VecDeque::new()),
            done_tx,
            shutting_down: AtomicBool::new(false),
        });

        let weak: Weak<Inner> = Arc::downgrade(&inner);
        tokio::spawn(async move {
            while let Some(id) = done_rx.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                inner.on_finished(id);
            }
        });

        Self { inner }
    }

    /// Workers currently admitted
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.inner.active.len()
    }

    /// Jobs waiting for a slot
    #[must_use]
    pub fn queued_count(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Whether the job is admitted or waiting for admission
    #[must_use]
    pub fn is_tracked(&self, id: JobId) -> bool {
        self.inner.active.contains_key(&id) || self.inner.queue.lock().iter().any(|q| q.id == id)
    }

    /// Admit the worker now if a slot is free, else queue it FIFO
    pub(crate) fn submit(
        &self,
        id: JobId,
        flags: Arc<ControlFlags>,
        work: BoxFuture<'static, ()>,
    ) -> Result<(), JobError> {
        if self.is_tracked(id) {
            return Err(JobError::AlreadyRunning(id));
        }
        // Admission decisions happen under the queue lock, so two concurrent
        // submits cannot both claim the last free slot.
        let mut queue = self.inner.queue.lock();
        if self.inner.active.len() < self.inner.capacity && queue.is_empty() {
            self.inner.activate(id, flags, work);
        } else {
            tracing::debug!(job_id = %id, position = queue.len(), "concurrency cap reached, queueing job");
            queue.push_back(QueuedJob { id, flags, work });
        }
        Ok(())
    }

    /// Request cancellation of every tracked job and wait for active workers
    /// to finish parking their state
    pub async fn shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::SeqCst);
        for entry in self.inner.active.iter() {
            entry.value().flags.request_cancel();
        }
        let drained: Vec<QueuedJob> = {
            let mut queue = self.inner.queue.lock();
            queue.drain(..).collect()
        };
        for queued in &drained {
            queued.flags.request_cancel();
        }
        while !self.inner.active.is_empty() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

impl Inner {
    fn activate(self: &Arc<Self>, id: JobId, flags: Arc<ControlFlags>, work: BoxFuture<'static, ()>) {
        // Insert before spawn so a worker that finishes instantly still
        // finds its entry to remove.
        self.active.insert(id, ActiveJob { flags, join: None });
        let done = self.done_tx.clone();
        let join = tokio::spawn(async move {
            work.await;
            let _ = done.send(id);
        });
        if let Some(mut entry) = self.active.get_mut(&id) {
            entry.join = Some(join);
        }
        tracing::debug!(job_id = %id, "worker admitted");
    }

    fn on_finished(self: &Arc<Self>, id: JobId) {
        self.active.remove(&id);
        if self.shutting_down.load(Ordering::SeqCst) {
            return;
        }
        // Same lock discipline as submit: slot check and activation are one
        // atomic step.
        let mut queue = self.queue.lock();
        while self.active.len() < self.capacity {
            match queue.pop_front() {
                Some(queued) => self.activate(queued.id, queued.flags, queued.work),
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Notify;

    fn gated_work() -> (Arc<Notify>, BoxFuture<'static, ()>) {
        let gate = Arc::new(Notify::new());
        let waiter = gate.clone();
        (
            gate,
            Box::pin(async move {
                waiter.notified().await;
            }),
        )
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn cap_is_enforced_with_fifo_overflow() {
        let supervisor = JobSupervisor::new(1);
        let (gate1, work1) = gated_work();
        let (gate2, work2) = gated_work();
        let id1 = JobId::new();
        let id2 = JobId::new();

        supervisor
            .submit(id1, Arc::new(ControlFlags::default()), work1)
            .unwrap();
        supervisor
            .submit(id2, Arc::new(ControlFlags::default()), work2)
            .unwrap();

        assert_eq!(supervisor.active_count(), 1);
        assert_eq!(supervisor.queued_count(), 1);
        assert!(supervisor.is_tracked(id1));
        assert!(supervisor.is_tracked(id2));

        // Finishing the first admits the second, in order.
        gate1.notify_one();
        let s = supervisor.clone();
        wait_until(move || s.inner.active.contains_key(&id2)).await;
        assert_eq!(supervisor.queued_count(), 0);

        gate2.notify_one();
        let s = supervisor.clone();
        wait_until(move || s.active_count() == 0).await;
        assert!(!supervisor.is_tracked(id2));
    }

    #[tokio::test]
    async fn duplicate_submit_is_rejected() {
        let supervisor = JobSupervisor::new(2);
        let (_gate, work) = gated_work();
        let (_gate2, work2) = gated_work();
        let id = JobId::new();

        supervisor
            .submit(id, Arc::new(ControlFlags::default()), work)
            .unwrap();
        let err = supervisor
            .submit(id, Arc::new(ControlFlags::default()), work2)
            .unwrap_err();
        assert!(matches!(err, JobError::AlreadyRunning(other) if other == id));
    }

    #[tokio::test]
    async fn queue_preserves_arrival_order() {
        let supervisor = JobSupervisor::new(1);
        let (gate1, work1) = gated_work();
        let (gate2, work2) = gated_work();
        let (gate3, work3) = gated_work();
        let ids: Vec<JobId> = (0..3).map(|_| JobId::new()).collect();

        supervisor
            .submit(ids[0], Arc::new(ControlFlags::default()), work1)
            .unwrap();
        supervisor
            .submit(ids[1], Arc::new(ControlFlags::default()), work2)
            .unwrap();
        supervisor
            .submit(ids[2], Arc::new(ControlFlags::default()), work3)
            .unwrap();

        gate1.notify_one();
        let (s, second) = (supervisor.clone(), ids[1]);
        wait_until(move || s.inner.active.contains_key(&second)).await;
        // Third is still waiting while second runs.
        assert_eq!(supervisor.queued_count(), 1);

        gate2.notify_one();
        let (s, third) = (supervisor.clone(), ids[2]);
        wait_until(move || s.inner.active.contains_key(&third)).await;
        gate3.notify_one();

        let s = supervisor.clone();
        wait_until(move || s.active_count() == 0).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_submits_never_exceed_capacity() {
        let supervisor = JobSupervisor::new(2);
        let mut gates = Vec::new();
        let mut submits = Vec::new();

        for _ in 0..16 {
            let (gate, work) = gated_work();
            gates.push(gate);
            let s = supervisor.clone();
            submits.push(tokio::spawn(async move {
                s.submit(JobId::new(), Arc::new(ControlFlags::default()), work)
                    .is_ok()
            }));
        }
        for submit in submits {
            assert!(submit.await.unwrap());
        }

        assert!(supervisor.active_count() <= 2);
        assert_eq!(supervisor.active_count() + supervisor.queued_count(), 16);

        // Notify stores a permit, so jobs admitted later still get released.
        for gate in &gates {
            gate.notify_one();
        }
        let s = supervisor.clone();
        wait_until(move || s.active_count() == 0 && s.queued_count() == 0).await;
    }

    #[tokio::test]
    async fn shutdown_cancels_queued_jobs() {
        let supervisor = JobSupervisor::new(1);
        let (gate1, work1) = gated_work();
        let (_gate2, work2) = gated_work();
        let queued_flags = Arc::new(ControlFlags::default());

        supervisor
            .submit(JobId::new(), Arc::new(ControlFlags::default()), work1)
            .unwrap();
        supervisor
            .submit(JobId::new(), queued_flags.clone(), work2)
            .unwrap();

        gate1.notify_one();
        supervisor.shutdown().await;

        assert_eq!(supervisor.active_count(), 0);
        assert_eq!(supervisor.queued_count(), 0);
        assert!(queued_flags.cancel_requested());
    }
}
