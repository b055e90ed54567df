//! `OracleClient`: background worker pool with ticket-based submit/poll.
//!
//! The search thread submits an oracle operation and gets a `Ticket` back;
//! worker threads run the blocking `Oracle` call and deliver the result
//! through the ticket. Caps:
//! - `max_inflight_total` bounds submitted-but-not-yet-executed operations
//!   (backpressure error on submit, never a block); a slot frees when the
//!   worker finishes the call, not when the ticket is consumed;
//! - the job queue itself is bounded to `queue_capacity`.
//!
//! A coalesced progress signal lets outer loops sleep until some response
//! (or error) has arrived instead of polling on a fixed interval.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use ds_core::DialogueState;

use crate::oracle::Oracle;
use crate::OracleError;

#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Worker threads executing oracle calls.
    pub workers: usize,
    /// Maximum submitted-but-not-yet-executed operations across this
    /// client; a slot frees when the worker finishes the call, before the
    /// ticket is consumed.
    pub max_inflight_total: usize,
    /// Bounded job queue capacity.
    pub queue_capacity: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            max_inflight_total: 64,
            queue_capacity: 256,
        }
    }
}

/// Handle for one in-flight oracle operation.
#[derive(Debug)]
pub struct Ticket<T> {
    rx: mpsc::Receiver<Result<T, OracleError>>,
}

impl<T> Ticket<T> {
    pub fn recv(&self) -> Result<T, OracleError> {
        match self.rx.recv() {
            Ok(r) => r,
            Err(_) => Err(OracleError::Disconnected),
        }
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<T, OracleError> {
        match self.rx.recv_timeout(timeout) {
            Ok(r) => r,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(OracleError::Timeout),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(OracleError::Disconnected),
        }
    }

    /// Non-blocking poll: `Ok(None)` while the operation is still running.
    pub fn try_recv(&self) -> Result<Option<T>, OracleError> {
        match self.rx.try_recv() {
            Ok(r) => Ok(Some(r?)),
            Err(mpsc::TryRecvError::Empty) => Ok(None),
            Err(mpsc::TryRecvError::Disconnected) => Err(OracleError::Disconnected),
        }
    }
}

enum Job {
    Propose {
        state: DialogueState,
        count: usize,
        tx: mpsc::Sender<Result<Vec<String>, OracleError>>,
    },
    Priors {
        state: DialogueState,
        actions: Vec<String>,
        tx: mpsc::Sender<Result<Vec<f32>, OracleError>>,
    },
    Evaluate {
        state: DialogueState,
        tx: mpsc::Sender<Result<f32, OracleError>>,
    },
}

#[derive(Debug, Default)]
struct Stats {
    sent: u64,
    received: u64,
    errors: u64,
    hist: LatencyHistogram,
}

const HIST_BUCKETS: usize = 32;

/// Log2 latency histogram over microseconds: bucket `b` covers `[2^b, 2^(b+1))`.
#[derive(Debug)]
struct LatencyHistogram {
    buckets: [u64; HIST_BUCKETS],
    count: u64,
    sum_us: u64,
    min_us: u64,
    max_us: u64,
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self {
            buckets: [0; HIST_BUCKETS],
            count: 0,
            sum_us: 0,
            min_us: u64::MAX,
            max_us: 0,
        }
    }
}

impl LatencyHistogram {
    fn record(&mut self, us: u64) {
        let b = if us == 0 {
            0
        } else {
            (63 - us.leading_zeros() as usize).min(HIST_BUCKETS - 1)
        };
        self.buckets[b] += 1;
        self.count += 1;
        self.sum_us = self.sum_us.saturating_add(us);
        self.min_us = self.min_us.min(us);
        self.max_us = self.max_us.max(us);
    }

    fn percentile(&self, q: f64) -> u64 {
        if self.count == 0 {
            return 0;
        }
        let target = ((self.count as f64) * q).ceil() as u64;
        let mut seen = 0u64;
        for (b, &n) in self.buckets.iter().enumerate() {
            seen += n;
            if seen >= target {
                // Bucket midpoint as the representative value.
                let lo = 1u64 << b;
                return lo + (lo >> 1);
            }
        }
        self.max_us
    }

    fn snapshot(&self) -> LatencyHistogramSnapshot {
        LatencyHistogramSnapshot {
            buckets: self.buckets.to_vec(),
            summary: LatencySummary {
                count: self.count,
                min_us: if self.count == 0 { 0 } else { self.min_us },
                max_us: self.max_us,
                mean_us: if self.count == 0 {
                    0.0
                } else {
                    self.sum_us as f64 / self.count as f64
                },
                p50_us: self.percentile(0.50),
                p95_us: self.percentile(0.95),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct LatencySummary {
    pub count: u64,
    pub min_us: u64,
    pub max_us: u64,
    pub mean_us: f64,
    /// Approximate percentiles (computed from buckets).
    pub p50_us: u64,
    pub p95_us: u64,
}

#[derive(Debug, Clone)]
pub struct LatencyHistogramSnapshot {
    pub buckets: Vec<u64>,
    pub summary: LatencySummary,
}

#[derive(Debug, Clone)]
pub struct ClientStatsSnapshot {
    pub inflight: usize,
    pub sent: u64,
    pub received: u64,
    pub errors: u64,
    pub latency_us: LatencyHistogramSnapshot,
}

pub struct OracleClient {
    job_tx: Option<mpsc::SyncSender<Job>>,
    inflight: Arc<AtomicUsize>,
    opts: ClientOptions,
    stats: Arc<Mutex<Stats>>,
    progress_rx: Mutex<mpsc::Receiver<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl OracleClient {
    /// Spawn worker threads over `oracle`.
    pub fn spawn(oracle: Arc<dyn Oracle + Send + Sync>, opts: ClientOptions) -> Self {
        let (job_tx, job_rx) = mpsc::sync_channel::<Job>(opts.queue_capacity.max(1));
        let (progress_tx, progress_rx) = mpsc::sync_channel::<()>(1);
        let job_rx = Arc::new(Mutex::new(job_rx));
        let inflight = Arc::new(AtomicUsize::new(0));
        let stats = Arc::new(Mutex::new(Stats::default()));

        let mut workers = Vec::with_capacity(opts.workers.max(1));
        for i in 0..opts.workers.max(1) {
            let oracle = Arc::clone(&oracle);
            let job_rx = Arc::clone(&job_rx);
            let inflight = Arc::clone(&inflight);
            let stats = Arc::clone(&stats);
            let progress_tx = progress_tx.clone();
            let handle = thread::Builder::new()
                .name(format!("ds-oracle-worker-{i}"))
                .spawn(move || worker_loop(oracle, job_rx, inflight, stats, progress_tx))
                .expect("spawn oracle worker");
            workers.push(handle);
        }

        Self {
            job_tx: Some(job_tx),
            inflight,
            opts,
            stats,
            progress_rx: Mutex::new(progress_rx),
            workers,
        }
    }

    pub fn submit_propose(
        &self,
        state: &DialogueState,
        count: usize,
    ) -> Result<Ticket<Vec<String>>, OracleError> {
        let (tx, rx) = mpsc::channel();
        self.submit(Job::Propose {
            state: state.clone(),
            count,
            tx,
        })?;
        Ok(Ticket { rx })
    }

    pub fn submit_priors(
        &self,
        state: &DialogueState,
        actions: Vec<String>,
    ) -> Result<Ticket<Vec<f32>>, OracleError> {
        let (tx, rx) = mpsc::channel();
        self.submit(Job::Priors {
            state: state.clone(),
            actions,
            tx,
        })?;
        Ok(Ticket { rx })
    }

    pub fn submit_evaluate(&self, state: &DialogueState) -> Result<Ticket<f32>, OracleError> {
        let (tx, rx) = mpsc::channel();
        self.submit(Job::Evaluate {
            state: state.clone(),
            tx,
        })?;
        Ok(Ticket { rx })
    }

    fn submit(&self, job: Job) -> Result<(), OracleError> {
        if !self.try_acquire_inflight() {
            self.stats.lock().expect("stats lock").errors += 1;
            return Err(OracleError::Backpressure("max_inflight_total exceeded"));
        }
        let tx = self.job_tx.as_ref().ok_or(OracleError::Disconnected)?;
        match tx.try_send(job) {
            Ok(()) => {
                self.stats.lock().expect("stats lock").sent += 1;
                Ok(())
            }
            Err(mpsc::TrySendError::Full(_)) => {
                self.inflight.fetch_sub(1, Ordering::AcqRel);
                self.stats.lock().expect("stats lock").errors += 1;
                Err(OracleError::Backpressure("job queue full"))
            }
            Err(mpsc::TrySendError::Disconnected(_)) => {
                self.inflight.fetch_sub(1, Ordering::AcqRel);
                self.stats.lock().expect("stats lock").errors += 1;
                Err(OracleError::Disconnected)
            }
        }
    }

    fn try_acquire_inflight(&self) -> bool {
        let cap = self.opts.max_inflight_total;
        self.inflight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                if n < cap {
                    Some(n + 1)
                } else {
                    None
                }
            })
            .is_ok()
    }

    /// Block until at least one operation has completed since the last wake,
    /// or `timeout` elapses. Coalesced: many completions collapse into one
    /// wake-up token.
    pub fn wait_for_progress(&self, timeout: Duration) {
        let rx = self.progress_rx.lock().expect("progress lock");
        let _ = rx.recv_timeout(timeout);
    }

    pub fn stats_snapshot(&self) -> ClientStatsSnapshot {
        let g = self.stats.lock().expect("stats lock");
        ClientStatsSnapshot {
            inflight: self.inflight.load(Ordering::Acquire),
            sent: g.sent,
            received: g.received,
            errors: g.errors,
            latency_us: g.hist.snapshot(),
        }
    }
}

impl Drop for OracleClient {
    fn drop(&mut self) {
        // Closing the job channel ends the worker loops.
        self.job_tx = None;
        for h in self.workers.drain(..) {
            let _ = h.join();
        }
    }
}

fn worker_loop(
    oracle: Arc<dyn Oracle + Send + Sync>,
    job_rx: Arc<Mutex<mpsc::Receiver<Job>>>,
    inflight: Arc<AtomicUsize>,
    stats: Arc<Mutex<Stats>>,
    progress_tx: mpsc::SyncSender<()>,
) {
    loop {
        let job = {
            let rx = job_rx.lock().expect("job queue lock");
            rx.recv()
        };
        let Ok(job) = job else {
            return;
        };

        let start = Instant::now();
        // A panicking oracle must only fail the submitting simulation, never
        // take the worker (or the whole search) down with it.
        let failed = match job {
            Job::Propose { state, count, tx } => {
                match catch_unwind(AssertUnwindSafe(|| oracle.propose_actions(&state, count))) {
                    Ok(v) => {
                        let _ = tx.send(Ok(v));
                        false
                    }
                    Err(_) => {
                        let _ = tx.send(Err(OracleError::Transport("oracle panicked".into())));
                        true
                    }
                }
            }
            Job::Priors { state, actions, tx } => {
                match catch_unwind(AssertUnwindSafe(|| oracle.score_priors(&state, &actions))) {
                    Ok(v) => {
                        let _ = tx.send(Ok(v));
                        false
                    }
                    Err(_) => {
                        let _ = tx.send(Err(OracleError::Transport("oracle panicked".into())));
                        true
                    }
                }
            }
            Job::Evaluate { state, tx } => {
                match catch_unwind(AssertUnwindSafe(|| oracle.evaluate(&state))) {
                    Ok(v) => {
                        let _ = tx.send(Ok(v));
                        false
                    }
                    Err(_) => {
                        let _ = tx.send(Err(OracleError::Transport("oracle panicked".into())));
                        true
                    }
                }
            }
        };

        let us = start.elapsed().as_micros() as u64;
        inflight.fetch_sub(1, Ordering::AcqRel);
        {
            let mut g = stats.lock().expect("stats lock");
            g.received += 1;
            if failed {
                g.errors += 1;
            }
            g.hist.record(us);
        }
        let _ = progress_tx.try_send(());
    }
}
