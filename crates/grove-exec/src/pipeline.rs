//! Staged concurrent pipeline with one dedicated worker per stage.
//!
//! Each stage owns a one-slot inbox. Items fed into the pipeline flow through
//! the stages in order; within a stage items are processed in feed order,
//! while different stages overlap on different items. A shared in-flight
//! counter makes quiescence observable: it is zero exactly when the waiting
//! list and every stage slot are empty.

use crate::stage::{BoxedItem, Stage};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

enum SlotState {
    /// Nothing addressed to the stage.
    Idle,
    /// One datum waiting for the stage's worker.
    Ready(BoxedItem),
    /// The worker is transforming the datum outside the slot mutex.
    Running,
}

struct StageSlot {
    state: Mutex<SlotState>,
    /// Signaled on every state change and on stop.
    changed: Condvar,
}

struct Shared<T> {
    /// Queue feeding stage 0.
    waiting: Mutex<VecDeque<T>>,
    feed_cv: Condvar,
    /// One slot per stage; grows while the pipeline runs.
    slots: RwLock<Vec<Arc<StageSlot>>>,
    stage_count: AtomicUsize,
    /// Continue flag: cleared once to stop every worker.
    run: AtomicBool,
    /// Items fed but not yet completed past the final stage.
    in_flight: Mutex<usize>,
    end_cv: Condvar,
}

impl<T> Shared<T> {
    fn slot(&self, index: usize) -> Arc<StageSlot> {
        Arc::clone(&self.slots.read()[index])
    }

    fn set_idle(&self, index: usize) {
        let slot = self.slot(index);
        *slot.state.lock() = SlotState::Idle;
        slot.changed.notify_all();
    }

    /// One item completed past the final stage.
    fn complete_one(&self) {
        let mut in_flight = self.in_flight.lock();
        *in_flight = in_flight.saturating_sub(1);
        if *in_flight == 0 {
            self.end_cv.notify_all();
        }
    }
}

/// Multi-stage producer/consumer pipeline.
///
/// `T` is the type fed into the first stage; downstream types are the
/// stages' own business.
///
/// ```
/// use grove_exec::{Pipeline, Sink, Transform};
/// use std::sync::atomic::{AtomicI64, Ordering};
/// use std::sync::Arc;
///
/// let total = Arc::new(AtomicI64::new(0));
/// let sink_total = Arc::clone(&total);
///
/// let mut pipeline = Pipeline::new();
/// pipeline.add_stage(Transform::new(|n: i64| n * 10));
/// pipeline.add_stage(Sink::new(move |n: i64| {
///     sink_total.fetch_add(n, Ordering::SeqCst);
/// }));
///
/// for n in 1..=4 {
///     pipeline.feed(n);
/// }
/// pipeline.wait_end();
/// assert_eq!(total.load(Ordering::SeqCst), 100);
/// ```
pub struct Pipeline<T: Send + 'static> {
    shared: Arc<Shared<T>>,
    workers: Vec<JoinHandle<()>>,
}

impl<T: Send + 'static> Default for Pipeline<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> Pipeline<T> {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                waiting: Mutex::new(VecDeque::new()),
                feed_cv: Condvar::new(),
                slots: RwLock::new(Vec::new()),
                stage_count: AtomicUsize::new(0),
                run: AtomicBool::new(true),
                in_flight: Mutex::new(0),
                end_cv: Condvar::new(),
            }),
            workers: Vec::new(),
        }
    }

    /// Number of stages appended so far.
    pub fn stage_count(&self) -> usize {
        self.shared.stage_count.load(Ordering::Acquire)
    }

    /// Items fed but not yet completed past the final stage.
    pub fn pending(&self) -> usize {
        *self.shared.in_flight.lock()
    }

    /// Appends a stage backed by a dedicated long-running worker.
    ///
    /// Permitted while feeding and running.
    pub fn add_stage<S: Stage + 'static>(&mut self, stage: S) {
        let slot = Arc::new(StageSlot {
            state: Mutex::new(SlotState::Idle),
            changed: Condvar::new(),
        });
        let index = {
            let mut slots = self.shared.slots.write();
            slots.push(slot);
            slots.len() - 1
        };
        self.shared.stage_count.store(index + 1, Ordering::Release);

        let shared = Arc::clone(&self.shared);
        let handle =
            std::thread::spawn(move || run_stage_worker(shared, Box::new(stage), index));
        self.workers.push(handle);
    }

    /// Enqueues an input for stage 0.
    ///
    /// Returns false once the pipeline is stopping; the item is refused.
    pub fn feed(&self, input: T) -> bool {
        if !self.shared.run.load(Ordering::Acquire) {
            return false;
        }
        *self.shared.in_flight.lock() += 1;
        self.shared.waiting.lock().push_back(input);
        self.shared.feed_cv.notify_one();
        true
    }

    /// Blocks until no work remains anywhere, then stops the pipeline.
    pub fn wait_end(&mut self) {
        {
            let mut in_flight = self.shared.in_flight.lock();
            while *in_flight > 0 {
                self.shared.end_cv.wait(&mut in_flight);
            }
        }
        self.stop();
    }

    /// Clears the continue flag, wakes every stage, and joins all workers.
    ///
    /// Transforms already running finish their current item; workers observe
    /// the flag at their next wait or handoff.
    pub fn stop(&mut self) {
        self.shared.run.store(false, Ordering::Release);
        // The flag is not covered by the waiters' mutexes, so each notify
        // takes the matching mutex first; otherwise a worker between its
        // flag check and its wait would miss the wakeup.
        {
            let _queue = self.shared.waiting.lock();
            self.shared.feed_cv.notify_all();
        }
        for slot in self.shared.slots.read().iter() {
            let _state = slot.state.lock();
            slot.changed.notify_all();
        }
        {
            let _in_flight = self.shared.in_flight.lock();
            self.shared.end_cv.notify_all();
        }

        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        tracing::debug!("pipeline stopped");
    }
}

impl<T: Send + 'static> Drop for Pipeline<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Writes `item` into the downstream slot once it is idle.
///
/// Returns false when the pipeline stopped before the slot freed up; the
/// item is dropped in that case. At most one slot mutex is held at any
/// moment, so the handoff chain cannot deadlock.
fn push_downstream<T>(shared: &Shared<T>, index: usize, item: BoxedItem) -> bool {
    let next = shared.slot(index + 1);
    let mut state = next.state.lock();
    loop {
        if !shared.run.load(Ordering::Acquire) {
            return false;
        }
        if matches!(*state, SlotState::Idle) {
            *state = SlotState::Ready(item);
            drop(state);
            next.changed.notify_all();
            return true;
        }
        next.changed.wait(&mut state);
    }
}

fn run_stage_worker<T: Send + 'static>(
    shared: Arc<Shared<T>>,
    mut stage: Box<dyn Stage>,
    index: usize,
) {
    tracing::debug!(stage = index, "stage worker started");
    loop {
        // Claim the next input: the waiting-list head for stage 0, the slot
        // datum otherwise. Waits include the continue flag in the predicate.
        let input: BoxedItem = if index == 0 {
            let mut queue = shared.waiting.lock();
            loop {
                if !shared.run.load(Ordering::Acquire) {
                    return;
                }
                if let Some(item) = queue.pop_front() {
                    break Box::new(item) as BoxedItem;
                }
                shared.feed_cv.wait(&mut queue);
            }
        } else {
            let slot = shared.slot(index);
            let mut state = slot.state.lock();
            loop {
                if !shared.run.load(Ordering::Acquire) {
                    return;
                }
                if matches!(*state, SlotState::Ready(_)) {
                    match std::mem::replace(&mut *state, SlotState::Running) {
                        SlotState::Ready(item) => break item,
                        _ => unreachable!("state checked under the slot mutex"),
                    }
                }
                slot.changed.wait(&mut state);
            }
        };

        // The transform runs outside every slot mutex.
        let output = stage.process(input);
        let stages = shared.stage_count.load(Ordering::Acquire);

        match output {
            Err(error) => {
                // An invariant violation or a type mismatch is fatal to this
                // worker; other stages keep running.
                tracing::error!(stage = index, %error, "stage failed, worker stopping");
                if index > 0 {
                    shared.set_idle(index);
                }
                shared.complete_one();
                return;
            }
            Ok(Some(item)) if index + 1 < stages => {
                let delivered = push_downstream(&shared, index, item);
                if index > 0 {
                    shared.set_idle(index);
                }
                if !delivered {
                    return;
                }
            }
            Ok(_) => {
                // Final stage, or the stage consumed the item.
                if index > 0 {
                    shared.set_idle(index);
                }
                shared.complete_one();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::{Sink, Transform};
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_single_sink_stage() {
        let count = Arc::new(AtomicUsize::new(0));
        let sink_count = Arc::clone(&count);

        let mut pipeline = Pipeline::new();
        pipeline.add_stage(Sink::new(move |_: u32| {
            sink_count.fetch_add(1, Ordering::SeqCst);
        }));

        for n in 0..3 {
            assert!(pipeline.feed(n));
        }
        pipeline.wait_end();

        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(pipeline.pending(), 0);
    }

    #[test]
    fn test_two_stage_order_preserved() {
        let collected = Arc::new(Mutex::new(Vec::new()));
        let sink_collected = Arc::clone(&collected);

        let mut pipeline = Pipeline::new();
        pipeline.add_stage(Transform::new(|n: i32| n * 2));
        pipeline.add_stage(Sink::new(move |n: i32| sink_collected.lock().push(n)));

        for n in 1..=4 {
            pipeline.feed(n);
        }
        pipeline.wait_end();

        assert_eq!(*collected.lock(), vec![2, 4, 6, 8]);
    }

    #[test]
    fn test_feed_refused_after_stop() {
        let mut pipeline = Pipeline::new();
        pipeline.add_stage(Sink::new(|_: u32| {}));
        assert!(pipeline.feed(1));
        pipeline.wait_end();
        assert!(!pipeline.feed(2));
    }

    #[test]
    fn test_wait_end_without_items() {
        let mut pipeline: Pipeline<u32> = Pipeline::new();
        pipeline.add_stage(Sink::new(|_: u32| {}));
        pipeline.wait_end();
        assert_eq!(pipeline.pending(), 0);
    }

    #[test]
    fn test_stage_count_grows_while_running() {
        let mut pipeline: Pipeline<u32> = Pipeline::new();
        assert_eq!(pipeline.stage_count(), 0);
        pipeline.add_stage(Transform::new(|n: u32| n));
        pipeline.add_stage(Sink::new(|_: u32| {}));
        assert_eq!(pipeline.stage_count(), 2);
    }

    #[test]
    fn test_type_mismatch_fatal_to_one_worker() {
        let reached = Arc::new(AtomicUsize::new(0));
        let sink_reached = Arc::clone(&reached);

        let mut pipeline = Pipeline::new();
        pipeline.add_stage(Transform::new(|n: i32| n));
        // Expects a String but receives an i32 box.
        pipeline.add_stage(Sink::new(move |_: String| {
            sink_reached.fetch_add(1, Ordering::SeqCst);
        }));

        pipeline.feed(1);
        // The failed item still counts as completed, so this returns.
        pipeline.wait_end();
        assert_eq!(reached.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_drop_stops_and_joins() {
        let pipeline = {
            let mut p = Pipeline::new();
            p.add_stage(Sink::new(|_: u32| {
                std::thread::sleep(std::time::Duration::from_millis(2));
            }));
            p.feed(1);
            p
        };
        drop(pipeline);
        // Reaching this point without hanging is the assertion.
    }
}
