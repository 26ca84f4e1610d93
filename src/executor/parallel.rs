//! Parallel driver.
//!
//! Three roles share one scoped thread group:
//!
//! - **scheduler**: computes the ready set, marks units in flight and hands
//!   them to the workers through a bounded job channel.
//! - **workers**: a fixed pool pulling from the job channel. They execute
//!   units and post each result on the message channel. They never print.
//! - **consumer**: the calling thread. It alone touches the reporter, marks
//!   units completed and collects results in completion order.
//!
//! A stall (work left, nothing running, nothing ready) is fatal: scheduling
//! stops, in-flight units finish and their results are still drained.

use super::worker::{execute_unit, ExecutionEnv};
use super::Plan;
use crate::errors::{Result, SnapbookError};
use crate::report::{Reporter, UnitReport};
use std::collections::HashSet;
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

enum Message {
    Completed(UnitReport),
    Fatal(SnapbookError),
    Done,
}

#[derive(Default)]
struct Progress {
    completed: HashSet<String>,
    in_flight: HashSet<String>,
}

pub(crate) fn run(
    env: &ExecutionEnv<'_>,
    plan: &Plan<'_>,
    threads: usize,
    idle_sleep: Duration,
    reporter: &mut Reporter,
) -> Result<Vec<UnitReport>> {
    let progress = Mutex::new(Progress::default());
    let (job_tx, job_rx) = mpsc::sync_channel::<usize>(threads);
    let job_rx = Mutex::new(job_rx);
    let (msg_tx, msg_rx) = mpsc::channel::<Message>();

    thread::scope(|scope| {
        for worker in 0..threads {
            let jobs = &job_rx;
            let messages = msg_tx.clone();
            scope.spawn(move || work(worker, env, plan, jobs, messages));
        }
        {
            let progress = &progress;
            let messages = msg_tx.clone();
            scope.spawn(move || schedule(plan, progress, job_tx, messages, idle_sleep));
        }
        drop(msg_tx);
        consume(&msg_rx, &progress, reporter)
    })
}

fn work(
    worker: usize,
    env: &ExecutionEnv<'_>,
    plan: &Plan<'_>,
    jobs: &Mutex<Receiver<usize>>,
    messages: Sender<Message>,
) {
    loop {
        let next = lock(jobs).recv();
        let Ok(index) = next else {
            break;
        };
        let Some(job) = plan.job_at(index) else {
            continue;
        };
        tracing::trace!(worker, unit = %job.path(), "picked up unit");
        let report = execute_unit(env, job);
        if messages.send(Message::Completed(report)).is_err() {
            break;
        }
    }
}

fn schedule(
    plan: &Plan<'_>,
    progress: &Mutex<Progress>,
    jobs: SyncSender<usize>,
    messages: Sender<Message>,
    idle_sleep: Duration,
) {
    let scheduler = plan.scheduler();
    loop {
        let ready = {
            let mut state = lock(progress);
            if state.completed.len() >= scheduler.len() {
                let _ = messages.send(Message::Done);
                return;
            }
            if let Err(e) = scheduler.check_progress(&state.completed, &state.in_flight) {
                tracing::error!(error = %e, "scheduler stalled");
                let _ = messages.send(Message::Fatal(e));
                return;
            }
            let ready = scheduler.ready_set(&state.completed, &state.in_flight);
            state.in_flight.extend(ready.iter().cloned());
            ready
        };
        if ready.is_empty() {
            thread::sleep(idle_sleep);
            continue;
        }
        for path in ready {
            let Some(index) = plan.index_of(&path) else {
                continue;
            };
            tracing::trace!(unit = %path, "submitting unit");
            if jobs.send(index).is_err() {
                return;
            }
        }
    }
}

fn consume(
    messages: &Receiver<Message>,
    progress: &Mutex<Progress>,
    reporter: &mut Reporter,
) -> Result<Vec<UnitReport>> {
    let mut results = Vec::new();
    let mut fatal = None;
    for message in messages.iter() {
        match message {
            Message::Completed(report) => {
                {
                    let mut state = lock(progress);
                    state.in_flight.remove(&report.path);
                    state.completed.insert(report.path.clone());
                }
                reporter.unit_finished(&report);
                results.push(report);
            }
            Message::Fatal(e) => fatal = Some(e),
            Message::Done => break,
        }
    }
    match fatal {
        Some(e) => Err(e),
        None => Ok(results),
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
