//! Integration tests for the scheduler run loops and the object contract

use std::sync::{Arc, mpsc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use serial_test::serial;

use aosched::{
    ActiveObject, ActiveTask, Allocator, BoundedAllocator, ErrorDisposition, ManualClock, ObjectId, ObjectState,
    Priority, QueuePresence, Rearm, RequestStatus, RunContext, Scheduler, SchedulerError, SchedulerObserver,
    SystemAllocator, TaskError, Tick,
};

type Body = Box<dyn FnMut(&mut RunContext<'_>) -> Result<Rearm, TaskError> + Send>;

/// Records the order in which task bodies run
#[derive(Clone, Default)]
struct Trace(Arc<Mutex<Vec<&'static str>>>);

impl Trace {
    fn body(&self, label: &'static str) -> Body {
        let trace = self.clone();
        Box::new(move |_cx: &mut RunContext<'_>| {
            trace.0.lock().push(label);
            Ok(Rearm::Done)
        })
    }

    fn take(&self) -> Vec<&'static str> {
        std::mem::take(&mut *self.0.lock())
    }
}

fn manual_scheduler(name: &str) -> (Scheduler, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let sched = Scheduler::builder(name).clock(clock.clone()).init().unwrap();
    (sched, clock)
}

#[test]
fn test_basic_run() {
    let trace = Trace::default();
    let a = ActiveObject::new("a", Priority::NOMINAL, trace.body("a"));
    let (sched, _clock) = manual_scheduler("basic");
    a.add_to_scheduler(&sched).unwrap();

    a.set_busy();
    a.complete(0);
    let report = sched.run_non_blocking(1).unwrap();

    assert_eq!(report.ran, 1);
    assert_eq!(report.ready, 0);
    assert_eq!(trace.take(), vec!["a"]);
    assert_eq!(a.state(), ObjectState::Idle);
    a.remove_from_scheduler();
}

#[test]
fn test_priority_decides_over_completion_order() {
    let trace = Trace::default();
    let a = ActiveObject::new("a", Priority::new(10), trace.body("a"));
    let b = ActiveObject::new("b", Priority::new(-10), trace.body("b"));
    let (sched, _clock) = manual_scheduler("priority");
    a.add_to_scheduler(&sched).unwrap();
    b.add_to_scheduler(&sched).unwrap();

    a.set_busy();
    b.set_busy();
    b.complete(0);
    a.complete(0);

    assert_eq!(sched.run_non_blocking(2).unwrap().ran, 2);
    assert_eq!(trace.take(), vec!["a", "b"]);
    a.remove_from_scheduler();
    b.remove_from_scheduler();
}

#[test]
fn test_equal_priority_runs_in_completion_order() {
    let trace = Trace::default();
    let labels = ["first", "second", "third"];
    let objects: Vec<_> = labels
        .iter()
        .map(|label| ActiveObject::new(*label, Priority::HIGH, trace.body(*label)))
        .collect();
    let (sched, _clock) = manual_scheduler("fifo");
    for obj in &objects {
        obj.add_to_scheduler(&sched).unwrap();
        obj.set_busy();
    }

    objects[1].complete(0);
    objects[0].complete(0);
    objects[2].complete(0);

    sched.run_non_blocking(10).unwrap();
    assert_eq!(trace.take(), vec!["second", "first", "third"]);
    sched.cleanup();
}

#[test]
fn test_timers_expire_by_deadline_then_compete_by_priority() {
    let trace = Trace::default();
    let late = ActiveObject::new("late", Priority::HIGHEST, trace.body("late"));
    let early = ActiveObject::new("early", Priority::LOW, trace.body("early"));
    let ready = ActiveObject::new("ready", Priority::HIGH, trace.body("ready"));
    let (sched, clock) = manual_scheduler("timers");
    for obj in [&late, &early, &ready] {
        obj.add_to_scheduler(&sched).unwrap();
    }

    late.after(100).unwrap();
    early.after(50).unwrap();
    assert_eq!(sched.timer_len(), 2);

    clock.advance(60);
    // The expired low-priority timer must not jump ahead of a ready object
    ready.set_busy();
    ready.complete(0);
    let report = sched.run_non_blocking(10).unwrap();
    assert_eq!(report.ran, 2);
    assert_eq!(report.next_delay, Some(40));
    assert_eq!(trace.take(), vec!["ready", "early"]);

    clock.advance(40);
    sched.run_non_blocking(10).unwrap();
    assert_eq!(trace.take(), vec!["late"]);
    sched.cleanup();
}

#[test]
fn test_equal_deadlines_expire_in_arming_order() {
    let trace = Trace::default();
    let a = ActiveObject::new("a", Priority::NOMINAL, trace.body("a"));
    let b = ActiveObject::new("b", Priority::NOMINAL, trace.body("b"));
    let (sched, clock) = manual_scheduler("deadline-tie");
    a.add_to_scheduler(&sched).unwrap();
    b.add_to_scheduler(&sched).unwrap();

    b.after(30).unwrap();
    a.after(30).unwrap();
    clock.advance(30);
    sched.run_non_blocking(2).unwrap();
    assert_eq!(trace.take(), vec!["b", "a"]);
    sched.cleanup();
}

#[test]
fn test_timer_then_cancel() {
    let trace = Trace::default();
    let a = ActiveObject::new("a", Priority::NOMINAL, trace.body("a"));
    let (sched, clock) = manual_scheduler("cancel");
    a.add_to_scheduler(&sched).unwrap();

    a.after(100).unwrap();
    clock.advance(40);
    a.cancel();

    assert_eq!(a.state(), ObjectState::Idle);
    assert_eq!(a.status(), RequestStatus::Cancelled);
    assert_eq!(sched.queue_presence(a.id()), QueuePresence::default());

    clock.advance(100);
    let report = sched.run_non_blocking(5).unwrap();
    assert_eq!(report.ran, 0);
    assert_eq!(report.next_delay, None);
    assert!(trace.take().is_empty());
    assert_eq!(a.status(), RequestStatus::Cancelled);
    a.remove_from_scheduler();
}

#[test]
fn test_cancel_ready_object_removes_it() {
    let trace = Trace::default();
    let a = ActiveObject::new("a", Priority::NOMINAL, trace.body("a"));
    let (sched, _clock) = manual_scheduler("cancel-ready");
    a.add_to_scheduler(&sched).unwrap();

    a.set_busy();
    a.complete(3);
    assert!(sched.queue_presence(a.id()).ready);
    a.cancel();

    assert_eq!(sched.ready_len(), 0);
    assert_eq!(sched.run_non_blocking(1).unwrap().ran, 0);
    assert!(trace.take().is_empty());
    a.remove_from_scheduler();
}

/// Counts `do_cancel` calls
#[derive(Default)]
struct Cancellable {
    cancels: usize,
}

impl ActiveTask for Cancellable {
    fn run(&mut self, _cx: &mut RunContext<'_>) -> Result<Rearm, TaskError> {
        Ok(Rearm::Done)
    }

    fn do_cancel(&mut self) {
        self.cancels += 1;
    }
}

#[test]
#[serial]
fn test_cancel_waits_for_task_guard_held_elsewhere() {
    let obj = ActiveObject::new("guarded", Priority::NOMINAL, Cancellable::default());
    let (sched, _clock) = manual_scheduler("cancel-guard");
    obj.add_to_scheduler(&sched).unwrap();
    obj.set_busy();

    let (held_tx, held_rx) = mpsc::channel();
    let shared_obj = &obj;
    thread::scope(|s| {
        s.spawn(move || {
            let guard = shared_obj.task();
            held_tx.send(()).unwrap();
            thread::sleep(Duration::from_millis(30));
            assert_eq!(guard.cancels, 0);
        });
        held_rx.recv().unwrap();
        obj.cancel();
    });

    assert_eq!(obj.task().cancels, 1);
    assert_eq!(obj.state(), ObjectState::Idle);
    assert_eq!(obj.status(), RequestStatus::Cancelled);
    obj.remove_from_scheduler();
}

/// Arms in-call, lets a provider complete, then abandons the request
struct SelfCancelling {
    runs: usize,
    cancels: Arc<AtomicUsize>,
    cancels_seen_in_body: Vec<usize>,
}

impl ActiveTask for SelfCancelling {
    fn run(&mut self, cx: &mut RunContext<'_>) -> Result<Rearm, TaskError> {
        self.runs += 1;
        let completer = cx.set_busy();
        thread::spawn(move || completer.complete(0))
            .join()
            .map_err(|_| TaskError::from("provider panicked"))?;
        cx.cancel();
        self.cancels_seen_in_body.push(self.cancels.load(Ordering::SeqCst));
        Ok(if self.runs == 1 { Rearm::Done } else { Rearm::After(5) })
    }

    fn do_cancel(&mut self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_body_cancelling_its_own_request_runs_do_cancel_after_return() {
    let cancels = Arc::new(AtomicUsize::new(0));
    let obj = ActiveObject::new(
        "self-cancel",
        Priority::NOMINAL,
        SelfCancelling {
            runs: 0,
            cancels: cancels.clone(),
            cancels_seen_in_body: Vec::new(),
        },
    );
    let (sched, _clock) = manual_scheduler("self-cancel");
    obj.add_to_scheduler(&sched).unwrap();

    obj.run_if_not_ready(0).unwrap();
    let report = sched.run_non_blocking(5).unwrap();
    assert_eq!(report.ran, 1);
    assert_eq!(obj.state(), ObjectState::Idle);
    assert_eq!(obj.status(), RequestStatus::Cancelled);
    assert_eq!(sched.queue_presence(obj.id()), QueuePresence::default());
    assert_eq!(sched.ready_len(), 0);
    assert_eq!(cancels.load(Ordering::SeqCst), 1);
    assert_eq!(sched.stats().total_cancels, 1);

    // After cancelling, the body may re-arm with any Rearm
    obj.run_if_not_ready(0).unwrap();
    assert_eq!(sched.run_non_blocking(1).unwrap().ran, 1);
    assert_eq!(obj.state(), ObjectState::Pending);
    assert!(sched.queue_presence(obj.id()).timer);
    assert_eq!(cancels.load(Ordering::SeqCst), 2);
    // do_cancel never ran while the body held the task
    assert_eq!(obj.task().cancels_seen_in_body, vec![0, 1]);
    obj.remove_from_scheduler();
}

struct Failing {
    runs: Arc<AtomicUsize>,
    disposition: ErrorDisposition,
}

impl ActiveTask for Failing {
    fn run(&mut self, _cx: &mut RunContext<'_>) -> Result<Rearm, TaskError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Err(TaskError::Code(-42))
    }

    fn run_error(&mut self, error: &TaskError) -> ErrorDisposition {
        assert_eq!(error.code(), -42);
        self.disposition
    }
}

#[test]
fn test_unhandled_error_stops_loop_and_leaves_others_ready() {
    let trace = Trace::default();
    let runs = Arc::new(AtomicUsize::new(0));
    let bad = ActiveObject::new(
        "bad",
        Priority::HIGH,
        Failing {
            runs: runs.clone(),
            disposition: ErrorDisposition::Unhandled,
        },
    );
    let other = ActiveObject::new("other", Priority::LOW, trace.body("other"));
    let (sched, _clock) = manual_scheduler("unhandled");
    bad.add_to_scheduler(&sched).unwrap();
    other.add_to_scheduler(&sched).unwrap();

    other.set_busy();
    other.complete(0);
    bad.set_busy();
    bad.complete(0);

    let err = sched.run_non_blocking(2).unwrap_err();
    match &err {
        SchedulerError::TaskFailed { name, source } => {
            assert_eq!(name, "bad");
            assert!(matches!(source, TaskError::Code(-42)));
        }
        unexpected => panic!("unexpected error {:?}", unexpected),
    }
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(bad.state(), ObjectState::Idle);
    assert_eq!(other.state(), ObjectState::Ready);
    assert!(trace.take().is_empty());
    assert_eq!(sched.stats().total_errors_unhandled, 1);

    // Restarting drains the untouched object
    assert_eq!(sched.run_non_blocking(2).unwrap().ran, 1);
    assert_eq!(trace.take(), vec!["other"]);
    sched.cleanup();
}

#[test]
fn test_unhandled_error_from_blocking_loop() {
    let runs = Arc::new(AtomicUsize::new(0));
    let bad = ActiveObject::new(
        "bad",
        Priority::NOMINAL,
        Failing {
            runs: runs.clone(),
            disposition: ErrorDisposition::Unhandled,
        },
    );
    let (sched, _clock) = manual_scheduler("blocking-error");
    bad.add_to_scheduler(&sched).unwrap();
    bad.run_if_not_ready(0).unwrap();

    let err = sched.start_scheduler().unwrap_err();
    assert!(err.is_task_failure());
    assert!(!sched.is_running());
    sched.cleanup();
}

#[test]
fn test_rearm_ready_now_runs_again_in_same_batch() {
    let count = Arc::new(AtomicUsize::new(0));
    let seen = count.clone();
    let obj = ActiveObject::new(
        "looper",
        Priority::NOMINAL,
        move |_cx: &mut RunContext<'_>| -> Result<Rearm, TaskError> {
            let n = seen.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(if n < 3 { Rearm::ReadyNow } else { Rearm::Done })
        },
    );
    let (sched, _clock) = manual_scheduler("ready-now");
    obj.add_to_scheduler(&sched).unwrap();
    obj.run_if_not_ready(0).unwrap();

    let report = sched.run_non_blocking(10).unwrap();
    assert_eq!(report.ran, 3);
    assert_eq!(count.load(Ordering::SeqCst), 3);
    obj.remove_from_scheduler();
}

#[test]
fn test_rearm_pend_waits_for_completion() {
    let count = Arc::new(AtomicUsize::new(0));
    let seen = count.clone();
    let obj = ActiveObject::new(
        "pender",
        Priority::NOMINAL,
        move |_cx: &mut RunContext<'_>| -> Result<Rearm, TaskError> {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(Rearm::Pend)
        },
    );
    let (sched, _clock) = manual_scheduler("pend");
    obj.add_to_scheduler(&sched).unwrap();
    obj.run_if_not_ready(0).unwrap();

    sched.run_non_blocking(10).unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(obj.state(), ObjectState::Pending);

    obj.complete(RequestStatus::Code(9));
    sched.run_non_blocking(10).unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 2);
    obj.cancel();
    obj.remove_from_scheduler();
}

#[test]
#[serial]
fn test_cross_thread_completion_wakes_blocking_loop() {
    let seen = Arc::new(Mutex::new(None));
    let (sched, _clock) = manual_scheduler("cross-thread");
    let control = sched.control();

    let record = seen.clone();
    let obj = ActiveObject::new(
        "remote",
        Priority::NOMINAL,
        move |cx: &mut RunContext<'_>| -> Result<Rearm, TaskError> {
            *record.lock() = Some((cx.id(), cx.status(), thread::current().id()));
            control.stop_scheduler();
            Ok(Rearm::Done)
        },
    );
    obj.add_to_scheduler(&sched).unwrap();
    obj.set_busy();

    let completer = obj.completer();
    let provider = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        completer.complete(5);
    });

    sched.start_scheduler().unwrap();
    provider.join().unwrap();

    let (id, status, thread_id) = seen.lock().take().unwrap();
    assert_eq!(id, obj.id());
    assert_eq!(status, RequestStatus::Code(5));
    assert_eq!(thread_id, thread::current().id());
    obj.remove_from_scheduler();
}

#[test]
#[serial]
fn test_in_call_arm_completed_immediately_from_other_thread() {
    let rounds = Arc::new(AtomicUsize::new(0));
    let (sched, _clock) = manual_scheduler("in-call");
    let control = sched.control();

    let counter = rounds.clone();
    let obj = ActiveObject::new(
        "eager",
        Priority::NOMINAL,
        move |cx: &mut RunContext<'_>| -> Result<Rearm, TaskError> {
            if counter.fetch_add(1, Ordering::SeqCst) + 1 == 5 {
                control.stop_scheduler();
                return Ok(Rearm::Done);
            }
            let completer = cx.set_busy();
            // The provider may complete before this body returns
            thread::spawn(move || completer.complete(0))
                .join()
                .map_err(|_| TaskError::from("provider panicked"))?;
            Ok(Rearm::Done)
        },
    );
    obj.add_to_scheduler(&sched).unwrap();
    obj.run_if_not_ready(0).unwrap();

    sched.start_scheduler().unwrap();
    assert_eq!(rounds.load(Ordering::SeqCst), 5);
    obj.remove_from_scheduler();
}

#[test]
#[serial]
fn test_stop_from_other_thread_interrupts_idle_wait() {
    let (sched, _clock) = manual_scheduler("idle-stop");
    let control = sched.control();
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        control.stop_scheduler();
    });

    sched.start_scheduler().unwrap();
    stopper.join().unwrap();
    assert!(sched.control().is_stop_requested());

    // A stale stop does not prevent the next start
    let again = sched.control();
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        again.stop_scheduler();
    });
    sched.start_scheduler().unwrap();
    stopper.join().unwrap();
}

#[test]
#[serial]
fn test_suspend_holds_ready_objects_until_resume() {
    let runs = Arc::new(AtomicUsize::new(0));
    let (sched, _clock) = manual_scheduler("suspend");
    let control = sched.control();

    let counter = runs.clone();
    let stop = control.clone();
    let obj = ActiveObject::new(
        "held",
        Priority::NOMINAL,
        move |_cx: &mut RunContext<'_>| -> Result<Rearm, TaskError> {
            counter.fetch_add(1, Ordering::SeqCst);
            stop.stop_scheduler();
            Ok(Rearm::Done)
        },
    );
    obj.add_to_scheduler(&sched).unwrap();
    obj.set_busy();

    let completer = obj.completer();
    let observed = runs.clone();
    let driver = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        control.suspend_scheduler();
        thread::sleep(Duration::from_millis(10));
        completer.complete(0);
        thread::sleep(Duration::from_millis(30));
        let before_resume = observed.load(Ordering::SeqCst);
        control.resume_scheduler();
        before_resume
    });

    sched.start_scheduler().unwrap();
    assert_eq!(driver.join().unwrap(), 0);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    obj.remove_from_scheduler();
}

#[test]
#[serial]
fn test_blocking_loop_waits_for_timer() {
    let sched = Scheduler::builder("wall-clock").init().unwrap();
    let control = sched.control();
    let started = std::time::Instant::now();
    let obj = ActiveObject::new(
        "timer",
        Priority::NOMINAL,
        move |_cx: &mut RunContext<'_>| -> Result<Rearm, TaskError> {
            control.stop_scheduler();
            Ok(Rearm::Done)
        },
    );
    obj.add_to_scheduler(&sched).unwrap();
    // One tick is a millisecond by default
    obj.after(25).unwrap();

    sched.start_scheduler().unwrap();
    assert!(started.elapsed() >= Duration::from_millis(20));
    obj.remove_from_scheduler();
}

#[derive(Default)]
struct RecordingObserver {
    ready: AtomicUsize,
    timers: Mutex<Vec<Tick>>,
}

impl SchedulerObserver for RecordingObserver {
    fn ready_callback(&self) {
        self.ready.fetch_add(1, Ordering::SeqCst);
    }

    fn timer_callback(&self, delay: Tick) {
        self.timers.lock().push(delay);
    }
}

#[test]
fn test_observer_is_one_shot() {
    let trace = Trace::default();
    let a = ActiveObject::new("a", Priority::NOMINAL, trace.body("a"));
    let b = ActiveObject::new("b", Priority::NOMINAL, trace.body("b"));
    let (sched, _clock) = manual_scheduler("observer");
    a.add_to_scheduler(&sched).unwrap();
    b.add_to_scheduler(&sched).unwrap();

    let observer = Arc::new(RecordingObserver::default());
    sched.register_for_callback(observer.clone());
    a.set_busy();
    b.set_busy();
    a.complete(0);
    b.complete(0);
    assert_eq!(observer.ready.load(Ordering::SeqCst), 1);
    sched.run_non_blocking(2).unwrap();

    sched.register_for_callback(observer.clone());
    a.after(50).unwrap();
    assert_eq!(*observer.timers.lock(), vec![50]);

    // Registered again, but 80 is not a new earliest deadline
    sched.register_for_callback(observer.clone());
    b.after(80).unwrap();
    assert_eq!(*observer.timers.lock(), vec![50]);

    // The registration is still armed for the next earliest deadline
    a.cancel();
    b.cancel();
    a.after(10).unwrap();
    assert_eq!(*observer.timers.lock(), vec![50, 10]);

    sched.unregister_callback();
    a.cancel();
    b.cancel();
    a.run_if_not_ready(0).unwrap();
    assert_eq!(observer.ready.load(Ordering::SeqCst), 1);
    sched.cleanup();
}

#[test]
fn test_after_reports_out_of_memory() {
    // Measure one reserved ready slot
    let probe = Arc::new(SystemAllocator::new());
    let slot = {
        let sched = Scheduler::init("probe", probe.clone(), 1).unwrap();
        let bytes = probe.in_use();
        sched.cleanup();
        bytes
    };
    assert_eq!(probe.in_use(), 0);

    let trace = Trace::default();
    let a = ActiveObject::new("a", Priority::NOMINAL, trace.body("a"));
    let b = ActiveObject::new("b", Priority::NOMINAL, trace.body("b"));
    let alloc = Arc::new(BoundedAllocator::new(slot));
    let sched = Scheduler::init("bounded", alloc.clone(), 1).unwrap();

    a.add_to_scheduler(&sched).unwrap();
    let err = b.add_to_scheduler(&sched).unwrap_err();
    assert!(matches!(err, SchedulerError::OutOfMemory(_)));
    assert!(!b.is_added());

    let err = a.after(10).unwrap_err();
    assert!(matches!(err, SchedulerError::OutOfMemory(_)));
    assert_eq!(a.state(), ObjectState::Idle);
    assert_eq!(sched.timer_len(), 0);

    a.remove_from_scheduler();
    sched.cleanup();
    assert_eq!(alloc.in_use(), 0);
}

#[test]
fn test_affinity_violations_panic_without_mutation() {
    let trace = Trace::default();
    let a = ActiveObject::new("a", Priority::NOMINAL, trace.body("a"));
    let (sched, _clock) = manual_scheduler("affinity");
    a.add_to_scheduler(&sched).unwrap();

    thread::scope(|scope| {
        let set_busy = scope.spawn(|| a.set_busy()).join();
        assert!(set_busy.is_err());

        let run = scope.spawn(|| sched.run_non_blocking(1)).join();
        assert!(run.is_err());
    });
    assert_eq!(a.state(), ObjectState::Idle);

    // Completion is the one cross-thread operation
    a.set_busy();
    thread::scope(|scope| {
        scope.spawn(|| a.complete(0)).join().unwrap();
    });
    assert_eq!(a.state(), ObjectState::Ready);
    sched.cleanup();
}

#[test]
#[should_panic(expected = "already has an outstanding request")]
fn test_double_arm_panics() {
    let trace = Trace::default();
    let a = ActiveObject::new("a", Priority::NOMINAL, trace.body("a"));
    let (sched, _clock) = manual_scheduler("double-arm");
    a.add_to_scheduler(&sched).unwrap();
    a.set_busy();
    a.after(10).unwrap();
}

#[test]
#[should_panic(expected = "dropped while attached")]
fn test_dropping_attached_object_panics() {
    let trace = Trace::default();
    let (sched, _clock) = manual_scheduler("drop");
    let a = ActiveObject::new("a", Priority::NOMINAL, trace.body("a"));
    a.add_to_scheduler(&sched).unwrap();
    drop(a);
}

#[test]
fn test_object_outliving_scheduler_is_detached() {
    let trace = Trace::default();
    let a = ActiveObject::new("a", Priority::NOMINAL, trace.body("a"));
    {
        let (sched, _clock) = manual_scheduler("short-lived");
        a.add_to_scheduler(&sched).unwrap();
        a.set_busy();
    }
    assert!(!a.is_added());
    assert!(!Scheduler::is_installed());
}

#[test]
fn test_object_ids_in_stats_are_stable() {
    let trace = Trace::default();
    let a = ActiveObject::new("a", Priority::NOMINAL, trace.body("a"));
    let (sched, _clock) = manual_scheduler("ids");
    a.add_to_scheduler(&sched).unwrap();
    let ids: Vec<ObjectId> = sched.object_stats().iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![a.id()]);
    sched.cleanup();
}
