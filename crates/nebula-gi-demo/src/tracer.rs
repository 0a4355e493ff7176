//! Simulated probe tracer: a worker pool that "traces" probes off the main
//! thread and reports through the cache's completion channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;

use nebula_clipmap::UpdateRequest;
use nebula_gi::{CompletionSender, ProbeTraceBackend};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;

struct TraceJob {
    frame_index: u64,
    request: UpdateRequest,
    completions: CompletionSender,
}

/// Thread-pool trace backend with seeded, reproducible failures.
///
/// Whether a probe fails depends only on the seed, the frame, and the probe,
/// so runs are repeatable regardless of worker scheduling.
pub struct SimulatedTracer {
    job_sender: Option<crossbeam_channel::Sender<TraceJob>>,
    worker_handles: Vec<JoinHandle<()>>,
    in_flight: Arc<AtomicUsize>,
}

impl SimulatedTracer {
    /// Spawn `worker_count` tracing threads.
    ///
    /// `failure_rate` is the probability that a single trace reports failure.
    pub fn new(worker_count: usize, failure_rate: f64, seed: u64) -> Self {
        let (job_tx, job_rx) = crossbeam_channel::unbounded::<TraceJob>();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let failure_rate = failure_rate.clamp(0.0, 1.0);

        let mut handles = Vec::with_capacity(worker_count);
        for worker in 0..worker_count.max(1) {
            let rx = job_rx.clone();
            let flight = Arc::clone(&in_flight);
            let spawned = std::thread::Builder::new()
                .name(format!("probe-trace-{worker}"))
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        let success = !trace_fails(seed, &job, failure_rate);
                        let _ = job.completions.send(job.request, success);
                        flight.fetch_sub(1, Ordering::Relaxed);
                    }
                });
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(err) => tracing::warn!(worker, error = %err, "failed to spawn trace worker"),
            }
        }
        tracing::info!(workers = handles.len(), failure_rate, "simulated tracer started");

        Self {
            job_sender: Some(job_tx),
            worker_handles: handles,
            in_flight,
        }
    }

    /// Jobs queued or being traced.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Number of live worker threads.
    pub fn worker_count(&self) -> usize {
        self.worker_handles.len()
    }

    /// Finish queued jobs and join every worker.
    pub fn shutdown(&mut self) {
        self.job_sender.take();
        for handle in self.worker_handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl ProbeTraceBackend for SimulatedTracer {
    fn dispatch(
        &mut self,
        frame_index: u64,
        requests: Vec<UpdateRequest>,
        completions: &CompletionSender,
    ) {
        for request in requests {
            let job = TraceJob {
                frame_index,
                request,
                completions: completions.clone(),
            };
            let queued = match (&self.job_sender, self.worker_handles.is_empty()) {
                (Some(sender), false) => {
                    self.in_flight.fetch_add(1, Ordering::Relaxed);
                    match sender.send(job) {
                        Ok(()) => true,
                        Err(crossbeam_channel::SendError(job)) => {
                            self.in_flight.fetch_sub(1, Ordering::Relaxed);
                            let _ = job.completions.send(job.request, false);
                            false
                        }
                    }
                }
                _ => {
                    // No workers: fail fast so the probe returns to dirty.
                    let _ = job.completions.send(job.request, false);
                    false
                }
            };
            if !queued {
                tracing::warn!(level = request.level, "trace job rejected");
            }
        }
    }
}

impl Drop for SimulatedTracer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn trace_fails(seed: u64, job: &TraceJob, failure_rate: f64) -> bool {
    let key = seed
        ^ job.frame_index.wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ (u64::from(job.request.level) << 56)
        ^ job.request.storage_linear_index as u64;
    Xoshiro256StarStar::seed_from_u64(key).gen_bool(failure_rate)
}
