//! Three-queue capture pipeline
//!
//! Buffers cycle through three SPSC rings:
//!
//! ```text
//!            kickstart / completion callback          network thread
//!  FreeQ ──────────────────────────────▶ PendingQ ──▶ ReadyQ ──────────▶ send
//!    ▲       (submit to driver intake)   (driver     (captured,               │
//!    │                                    filling)    unsent)                 │
//!    └────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The completion side ([`CaptureStage`]) runs on the driver's realtime
//! thread and only ever performs non-blocking ring operations plus one
//! intake call per buffer. The network side ([`NetworkStage`]) is the only
//! party that waits. The two share no lock: FreeQ and ReadyQ are the only
//! meeting points, and each has exactly one producer and one consumer.
//!
//! At every instant `free + pending + ready + in_flight == buffer_count`.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::audio::driver::BufferIntake;
use crate::audio::pool::{BufferHandle, BufferPool};
use crate::audio::ring::{ring, Consumer, Producer};
use crate::constants::SAMPLE_SIZE;
use crate::error::DriverError;
use crate::session::SessionCounters;

/// Snapshot of how many handles sit in each queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueDepths {
    pub free: usize,
    pub pending: usize,
    pub ready: usize,
}

impl QueueDepths {
    pub fn total(&self) -> usize {
        self.free + self.pending + self.ready
    }
}

/// Completion-callback side of the pipeline.
///
/// Owned by the capture backend once the session is running.
pub struct CaptureStage<I> {
    pool: Arc<BufferPool>,
    free: Consumer<BufferHandle>,
    pending_in: Producer<BufferHandle>,
    pending_out: Consumer<BufferHandle>,
    ready: Producer<BufferHandle>,
    intake: I,
    /// A free buffer the intake refused; retried before FreeQ.
    deferred: Option<BufferHandle>,
    /// Bytes already written into the buffer at the head of PendingQ.
    fill: usize,
    counters: Arc<SessionCounters>,
}

/// Network-thread side of the pipeline.
pub struct NetworkStage {
    pool: Arc<BufferPool>,
    ready: Consumer<BufferHandle>,
    free: Producer<BufferHandle>,
}

/// Allocate the pool and queues, then prime the driver.
///
/// The first `kickstart_count` buffers are submitted to `intake` and recorded
/// in PendingQ, in order; the rest seed FreeQ. This must happen before
/// recording is enabled so the driver never starts with an empty queue.
pub fn kickstart<I: BufferIntake>(
    buffer_count: usize,
    buffer_size: usize,
    kickstart_count: usize,
    mut intake: I,
    counters: Arc<SessionCounters>,
) -> Result<(CaptureStage<I>, NetworkStage), DriverError> {
    let (pool, handles) = BufferPool::new(buffer_count, buffer_size);
    let pool = Arc::new(pool);

    let (mut free_in, free_out) = ring(buffer_count);
    let (mut pending_in, pending_out) = ring(buffer_count);
    let (ready_in, ready_out) = ring(buffer_count);

    for handle in handles {
        if handle.index() < kickstart_count {
            intake.enqueue(handle.index())?;
            hand_over(&mut pending_in, handle);
        } else {
            hand_over(&mut free_in, handle);
        }
    }

    tracing::debug!(
        buffer_count,
        buffer_size,
        kickstart_count,
        "Capture pipeline kickstarted"
    );

    let capture = CaptureStage {
        pool: pool.clone(),
        free: free_out,
        pending_in,
        pending_out,
        ready: ready_in,
        intake,
        deferred: None,
        fill: 0,
        counters,
    };
    let network = NetworkStage {
        pool,
        ready: ready_out,
        free: free_in,
    };

    Ok((capture, network))
}

/// Move a handle into a ring that by construction has room for it.
fn hand_over(queue: &mut Producer<BufferHandle>, handle: BufferHandle) {
    if let Err(handle) = queue.push(handle) {
        panic!("{handle:?} does not fit its ring: more live handles than pool buffers");
    }
}

impl<I: BufferIntake> CaptureStage<I> {
    /// Completion callback: the oldest submitted buffer has been filled.
    ///
    /// Moves it from PendingQ to ReadyQ, then submits every free buffer to
    /// the intake. If the intake refuses one, that buffer stays on the free
    /// side and the callback returns early. Never blocks.
    ///
    /// Returns how many buffers were submitted.
    pub fn complete(&mut self) -> usize {
        match self.pending_out.pop() {
            Some(filled) => {
                hand_over(&mut self.ready, filled);
                self.counters.buffers_captured.fetch_add(1, Ordering::Relaxed);
            }
            None => {
                self.counters
                    .spurious_completions
                    .fetch_add(1, Ordering::Relaxed);
            }
        }
        self.fill = 0;
        self.submit_free()
    }

    fn submit_free(&mut self) -> usize {
        let mut submitted = 0;
        while let Some(handle) = self.deferred.take().or_else(|| self.free.pop()) {
            if self.intake.enqueue(handle.index()).is_err() {
                self.deferred = Some(handle);
                self.counters.submit_failures.fetch_add(1, Ordering::Relaxed);
                break;
            }
            hand_over(&mut self.pending_in, handle);
            submitted += 1;
        }
        submitted
    }

    /// Resubmit free buffers when the driver has nothing left to fill.
    ///
    /// Completions are the only other place buffers get submitted, and none
    /// arrive while PendingQ is empty.
    fn refill_if_dry(&mut self) {
        if self.pending_out.is_empty() {
            self.submit_free();
        }
    }

    /// Copy captured samples into the buffer the driver is filling.
    ///
    /// Samples are stored little-endian. Each time the head buffer becomes
    /// full, [`complete`](Self::complete) runs and filling moves on to the
    /// next submitted buffer. If nothing is submitted, free buffers are
    /// submitted first; samples that still find no buffer are dropped and
    /// their count is returned.
    pub fn write_samples(&mut self, samples: impl IntoIterator<Item = i16>) -> usize {
        let mut samples = samples.into_iter().peekable();

        while samples.peek().is_some() {
            self.refill_if_dry();
            let pool = &self.pool;
            let Some(handle) = self.pending_out.peek_mut() else {
                let dropped = samples.count();
                self.counters
                    .overrun_samples
                    .fetch_add(dropped as u64, Ordering::Relaxed);
                return dropped;
            };

            let buffer = pool.bytes_mut(handle);
            for (slot, sample) in buffer[self.fill..]
                .chunks_exact_mut(SAMPLE_SIZE)
                .zip(&mut samples)
            {
                slot.copy_from_slice(&sample.to_le_bytes());
                self.fill += SAMPLE_SIZE;
            }

            let full = self.fill >= buffer.len();
            if full {
                self.complete();
            }
        }
        0
    }

    /// The buffer at the head of PendingQ, i.e. the one the driver fills next.
    ///
    /// Submits free buffers first if PendingQ has run dry.
    pub fn filling_mut(&mut self) -> Option<&mut [u8]> {
        self.refill_if_dry();
        let pool = &self.pool;
        self.pending_out
            .peek_mut()
            .map(|handle| pool.bytes_mut(handle))
    }

    /// Forget any partially written samples in the head buffer.
    pub fn reset_fill(&mut self) {
        self.fill = 0;
    }

    pub fn depths(&self) -> QueueDepths {
        QueueDepths {
            free: self.free.len() + usize::from(self.deferred.is_some()),
            pending: self.pending_out.len(),
            ready: self.ready.len(),
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.pool.buffer_size()
    }

    pub fn intake(&self) -> &I {
        &self.intake
    }

    pub fn intake_mut(&mut self) -> &mut I {
        &mut self.intake
    }
}

impl NetworkStage {
    /// Take the oldest captured buffer if one is ready.
    pub fn try_take_ready(&mut self) -> Option<BufferHandle> {
        self.ready.pop()
    }

    /// Wait for the next captured buffer while `keep_waiting` says so.
    pub fn take_ready_while(
        &mut self,
        keep_waiting: impl FnMut() -> bool,
    ) -> Option<BufferHandle> {
        self.ready.pop_while(keep_waiting)
    }

    pub fn bytes<'a>(&'a self, handle: &'a BufferHandle) -> &'a [u8] {
        self.pool.bytes(handle)
    }

    /// Return a sent (or dropped) buffer to FreeQ.
    pub fn release(&mut self, handle: BufferHandle) {
        hand_over(&mut self.free, handle);
    }

    pub fn buffer_size(&self) -> usize {
        self.pool.buffer_size()
    }

    pub fn buffer_count(&self) -> usize {
        self.pool.len()
    }
}
