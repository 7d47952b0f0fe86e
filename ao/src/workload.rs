//! Synthetic workload for exercising a scheduler end to end
//!
//! Periodic tickers re-arm themselves through the timer queue. Requesters
//! arm in-call and hand a completer to a pool of provider threads, which
//! complete the request cross-thread after a random latency. A countdown
//! stops the loop once every object has finished its rounds.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clock::Tick;
use crate::error::{SchedulerError, TaskError};
use crate::object::{ActiveObject, ActiveTask, Completer, Priority, Rearm, RequestStatus, RunContext};
use crate::scheduler::{
    ObjectStats, Scheduler, SchedulerConfig, SchedulerControl, SchedulerObserver, SchedulerStats,
};

/// How the scheduler is driven
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostMode {
    /// `start_scheduler` owns the thread until stopped
    #[default]
    Blocking,
    /// An external loop calls `run_non_blocking` when woken by the observer
    NonBlocking,
}

impl std::str::FromStr for HostMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "blocking" => Ok(Self::Blocking),
            "non-blocking" | "nonblocking" | "poll" => Ok(Self::NonBlocking),
            _ => Err(format!("Unknown mode: {}. Use: blocking or non-blocking", s)),
        }
    }
}

impl std::fmt::Display for HostMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Blocking => write!(f, "blocking"),
            Self::NonBlocking => write!(f, "non-blocking"),
        }
    }
}

/// Workload shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadConfig {
    /// Number of periodic timer objects
    #[serde(default = "default_tickers")]
    pub tickers: usize,

    /// Ticks between ticker runs
    #[serde(default = "default_ticker_period")]
    pub ticker_period: Tick,

    /// Runs per ticker
    #[serde(default = "default_ticker_rounds")]
    pub ticker_rounds: u32,

    /// Number of objects issuing cross-thread requests
    #[serde(default = "default_requesters")]
    pub requesters: usize,

    /// Requests issued by each requester
    #[serde(default = "default_requests")]
    pub requests: u32,

    /// Provider threads completing requests
    #[serde(default = "default_providers")]
    pub providers: usize,

    /// Lower bound of provider latency in milliseconds
    #[serde(default = "default_min_latency_ms")]
    pub min_latency_ms: u64,

    /// Upper bound of provider latency in milliseconds
    #[serde(default = "default_max_latency_ms")]
    pub max_latency_ms: u64,

    #[serde(default)]
    pub mode: HostMode,

    /// Seed for provider latencies (random when absent)
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_tickers() -> usize {
    3
}

fn default_ticker_period() -> Tick {
    5
}

fn default_ticker_rounds() -> u32 {
    10
}

fn default_requesters() -> usize {
    4
}

fn default_requests() -> u32 {
    8
}

fn default_providers() -> usize {
    2
}

fn default_min_latency_ms() -> u64 {
    1
}

fn default_max_latency_ms() -> u64 {
    5
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            tickers: default_tickers(),
            ticker_period: default_ticker_period(),
            ticker_rounds: default_ticker_rounds(),
            requesters: default_requesters(),
            requests: default_requests(),
            providers: default_providers(),
            min_latency_ms: default_min_latency_ms(),
            max_latency_ms: default_max_latency_ms(),
            mode: HostMode::default(),
            seed: None,
        }
    }
}

impl WorkloadConfig {
    fn latency_range(&self) -> (u64, u64) {
        let lo = self.min_latency_ms.min(self.max_latency_ms);
        let hi = self.min_latency_ms.max(self.max_latency_ms);
        (lo, hi)
    }

    fn object_count(&self) -> usize {
        self.tickers + self.requesters
    }
}

/// Result of one workload run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadReport {
    pub mode: HostMode,
    pub elapsed_ms: u64,
    pub ticker_runs: u64,
    pub requests_completed: u64,
    /// Times the external loop called `run_non_blocking`
    pub host_iterations: u64,
    pub stats: SchedulerStats,
    pub objects: Vec<ObjectStats>,
}

/// Stops the scheduler when the last object finishes
#[derive(Clone)]
struct Countdown {
    remaining: Arc<AtomicUsize>,
    control: SchedulerControl,
}

impl Countdown {
    fn new(count: usize, control: SchedulerControl) -> Self {
        Self {
            remaining: Arc::new(AtomicUsize::new(count)),
            control,
        }
    }

    fn finish(&self, name: &str) {
        let left = self.remaining.fetch_sub(1, Ordering::AcqRel) - 1;
        debug!(name, left, "Countdown::finish: called");
        if left == 0 {
            info!("All workload objects finished, stopping scheduler");
            self.control.stop_scheduler();
        }
    }

    fn is_done(&self) -> bool {
        self.remaining.load(Ordering::Acquire) == 0
    }
}

struct Ticker {
    name: String,
    period: Tick,
    rounds_left: u32,
    runs: u64,
    countdown: Countdown,
}

impl ActiveTask for Ticker {
    fn run(&mut self, _cx: &mut RunContext<'_>) -> Result<Rearm, TaskError> {
        self.runs += 1;
        self.rounds_left = self.rounds_left.saturating_sub(1);
        if self.rounds_left == 0 {
            self.countdown.finish(&self.name);
            return Ok(Rearm::Done);
        }
        Ok(Rearm::After(self.period))
    }
}

/// Request handed to a provider thread
struct Job {
    completer: Completer,
    gate: Arc<Mutex<bool>>,
}

struct Requester {
    name: String,
    remaining: u32,
    issued: u64,
    completed: u64,
    jobs: Sender<Job>,
    /// Set while a request may still be completed by a provider
    gate: Arc<Mutex<bool>>,
    countdown: Countdown,
}

impl ActiveTask for Requester {
    fn run(&mut self, cx: &mut RunContext<'_>) -> Result<Rearm, TaskError> {
        if self.issued > self.completed {
            self.completed += 1;
        }
        if cx.status().is_error() {
            return Err(TaskError::Code(cx.status().code()));
        }
        if self.remaining == 0 {
            self.countdown.finish(&self.name);
            return Ok(Rearm::Done);
        }

        self.remaining -= 1;
        self.issued += 1;
        *self.gate.lock() = true;
        let completer = cx.set_busy();
        self.jobs
            .send(Job {
                completer,
                gate: Arc::clone(&self.gate),
            })
            .map_err(|_| TaskError::from("provider pool has shut down"))?;
        Ok(Rearm::Done)
    }

    fn do_cancel(&mut self) {
        debug!(name = %self.name, "Requester::do_cancel: called");
        *self.gate.lock() = false;
    }
}

fn spawn_providers(config: &WorkloadConfig, jobs: Receiver<Job>) -> std::io::Result<Vec<JoinHandle<()>>> {
    let jobs = Arc::new(Mutex::new(jobs));
    let (lo, hi) = config.latency_range();

    (0..config.providers.max(1))
        .map(|n| {
            let jobs = Arc::clone(&jobs);
            let mut rng = match config.seed {
                Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(n as u64)),
                None => StdRng::from_os_rng(),
            };
            thread::Builder::new()
                .name(format!("provider-{}", n))
                .spawn(move || {
                    loop {
                        let job = jobs.lock().recv();
                        let Ok(job) = job else {
                            break;
                        };
                        thread::sleep(Duration::from_millis(rng.random_range(lo..=hi)));
                        let open = job.gate.lock();
                        if *open {
                            job.completer.complete(RequestStatus::None);
                        }
                    }
                    debug!("provider thread exiting");
                })
        })
        .collect()
}

/// Wakes the external host loop from observer callbacks
#[derive(Default)]
struct HostWaker {
    woken: Mutex<bool>,
    signal: Condvar,
    wakeups: AtomicU64,
}

impl HostWaker {
    fn wake(&self) {
        *self.woken.lock() = true;
        self.wakeups.fetch_add(1, Ordering::Relaxed);
        self.signal.notify_one();
    }

    fn wait(&self, timeout: Option<Duration>) {
        let mut woken = self.woken.lock();
        if !*woken {
            match timeout {
                Some(timeout) => {
                    self.signal.wait_for(&mut woken, timeout);
                }
                None => self.signal.wait(&mut woken),
            }
        }
        *woken = false;
    }
}

impl SchedulerObserver for HostWaker {
    fn ready_callback(&self) {
        self.wake();
    }

    fn timer_callback(&self, _delay: Tick) {
        self.wake();
    }
}

const TICKER_PRIORITIES: [Priority; 3] = [Priority::HIGH, Priority::NOMINAL, Priority::LOW];
const REQUESTER_PRIORITIES: [Priority; 3] = [Priority::HIGHEST, Priority::NOMINAL, Priority::IDLE];

/// Run a workload on the calling thread with a fresh scheduler
pub fn run_workload(scheduler: &SchedulerConfig, workload: &WorkloadConfig) -> Result<WorkloadReport, SchedulerError> {
    debug!(?workload, "run_workload: called");
    let sched = Scheduler::builder("workload").config(scheduler.clone()).init()?;
    let countdown = Countdown::new(workload.object_count(), sched.control());
    let (tx, rx) = mpsc::channel();
    let providers = spawn_providers(workload, rx)?;

    let tickers: Vec<_> = (0..workload.tickers)
        .map(|n| {
            let name = format!("ticker-{}", n);
            ActiveObject::new(
                name.clone(),
                TICKER_PRIORITIES[n % TICKER_PRIORITIES.len()],
                Ticker {
                    name,
                    period: workload.ticker_period,
                    rounds_left: workload.ticker_rounds.max(1),
                    runs: 0,
                    countdown: countdown.clone(),
                },
            )
        })
        .collect();

    let requesters: Vec<_> = (0..workload.requesters)
        .map(|n| {
            let name = format!("requester-{}", n);
            ActiveObject::new(
                name.clone(),
                REQUESTER_PRIORITIES[n % REQUESTER_PRIORITIES.len()],
                Requester {
                    name,
                    remaining: workload.requests,
                    issued: 0,
                    completed: 0,
                    jobs: tx.clone(),
                    gate: Arc::new(Mutex::new(false)),
                    countdown: countdown.clone(),
                },
            )
        })
        .collect();
    drop(tx);

    let started = Instant::now();
    let outcome = drive(&sched, workload, &countdown, &tickers, &requesters);
    let elapsed = started.elapsed();

    let stats = sched.stats();
    let objects = sched.object_stats();
    for ticker in &tickers {
        if ticker.is_added() {
            ticker.remove_from_scheduler();
        }
    }
    for requester in &requesters {
        if requester.is_added() {
            requester.remove_from_scheduler();
        }
    }
    sched.cleanup();

    let ticker_runs = tickers.iter().map(|t| t.task().runs).sum();
    let requests_completed = requesters.iter().map(|r| r.task().completed).sum();

    // Dropping the requesters closes the job channel
    drop(requesters);
    for provider in providers {
        if provider.join().is_err() {
            debug!("provider thread panicked");
        }
    }

    let host_iterations = outcome?;
    let report = WorkloadReport {
        mode: workload.mode,
        elapsed_ms: elapsed.as_millis() as u64,
        ticker_runs,
        requests_completed,
        host_iterations,
        stats,
        objects,
    };
    info!(
        mode = %report.mode,
        elapsed_ms = report.elapsed_ms,
        runs = report.stats.total_runs,
        "Workload finished"
    );
    Ok(report)
}

fn drive<A: ActiveTask, B: ActiveTask>(
    sched: &Scheduler,
    workload: &WorkloadConfig,
    countdown: &Countdown,
    tickers: &[ActiveObject<A>],
    requesters: &[ActiveObject<B>],
) -> Result<u64, SchedulerError> {
    for ticker in tickers {
        ticker.add_to_scheduler(sched)?;
        ticker.after(workload.ticker_period)?;
    }
    for requester in requesters {
        requester.add_to_scheduler(sched)?;
        requester.run_if_not_ready(0)?;
    }
    if countdown.is_done() {
        debug!("drive: empty workload");
        return Ok(0);
    }

    match workload.mode {
        HostMode::Blocking => {
            sched.start_scheduler()?;
            Ok(0)
        }
        HostMode::NonBlocking => host_loop(sched, countdown),
    }
}

/// External event loop woken through the scheduler's one-shot observer
fn host_loop(sched: &Scheduler, countdown: &Countdown) -> Result<u64, SchedulerError> {
    let waker = Arc::new(HostWaker::default());
    let batch = sched.config().non_blocking_batch.max(1);
    let mut iterations = 0;

    loop {
        sched.register_for_callback(waker.clone());
        let report = sched.run_non_blocking(batch)?;
        iterations += 1;
        if countdown.is_done() {
            break;
        }
        if report.has_ready() {
            continue;
        }
        let timeout = report.next_delay.map(|delay| sched.clock().ticks_to_duration(delay));
        waker.wait(timeout);
    }

    sched.unregister_callback();
    debug!(
        iterations,
        wakeups = waker.wakeups.load(Ordering::Relaxed),
        "host_loop: finished"
    );
    Ok(iterations)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small(mode: HostMode) -> WorkloadConfig {
        WorkloadConfig {
            tickers: 2,
            ticker_period: 2,
            ticker_rounds: 3,
            requesters: 3,
            requests: 4,
            providers: 2,
            min_latency_ms: 0,
            max_latency_ms: 2,
            mode,
            seed: Some(7),
        }
    }

    #[test]
    fn test_default_workload_config() {
        let config = WorkloadConfig::default();
        assert_eq!(config.tickers, 3);
        assert_eq!(config.requesters, 4);
        assert_eq!(config.mode, HostMode::Blocking);
        assert_eq!(config.seed, None);
    }

    #[test]
    fn test_host_mode_parse() {
        assert_eq!("blocking".parse::<HostMode>().unwrap(), HostMode::Blocking);
        assert_eq!("Non-Blocking".parse::<HostMode>().unwrap(), HostMode::NonBlocking);
        assert!("eager".parse::<HostMode>().is_err());
        assert_eq!(HostMode::NonBlocking.to_string(), "non-blocking");
    }

    #[test]
    fn test_latency_range_is_ordered() {
        let config = WorkloadConfig {
            min_latency_ms: 9,
            max_latency_ms: 3,
            ..Default::default()
        };
        assert_eq!(config.latency_range(), (3, 9));
    }

    #[test]
    fn test_blocking_workload_runs_to_completion() {
        let report = run_workload(&SchedulerConfig::default(), &small(HostMode::Blocking)).unwrap();
        assert_eq!(report.ticker_runs, 6);
        assert_eq!(report.requests_completed, 12);
        // Each requester runs once per completion plus the initial kick
        assert_eq!(report.stats.total_runs, 6 + 3 * 5);
        assert_eq!(report.objects.len(), 5);
        assert!(!Scheduler::is_installed());
    }

    #[test]
    fn test_non_blocking_workload_runs_to_completion() {
        let report = run_workload(&SchedulerConfig::default(), &small(HostMode::NonBlocking)).unwrap();
        assert_eq!(report.ticker_runs, 6);
        assert_eq!(report.requests_completed, 12);
        assert!(report.host_iterations >= 1);
    }

    #[test]
    fn test_empty_workload() {
        let config = WorkloadConfig {
            tickers: 0,
            requesters: 0,
            ..Default::default()
        };
        let report = run_workload(&SchedulerConfig::default(), &config).unwrap();
        assert_eq!(report.stats.total_runs, 0);
    }
}
