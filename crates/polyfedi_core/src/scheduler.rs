/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Runs queued commands one at a time.
//!
//! One control loop owns every start/stop decision. A ticker posts heartbeats
//! and retry promotions to it. At most one executor task drains the main
//! queue; its `JoinHandle` is the cancellation handle.

use anyhow::Result;
use async_trait::async_trait;
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::command::{CommandData, CommandKind, Disposition};
use crate::command_queue::{CommandQueues, QueueCounts, QueueStore};
use crate::config::SchedulerSettings;
use crate::error::ConnectionError;
use crate::events::{EventBus, ServiceEvent, ServiceState};
use crate::now_ms;

/// Executes one command and returns it with its result filled in.
/// Errors are recorded in `cmd.result`, never returned.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, cmd: CommandData) -> CommandData;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Queued,
    /// An equal command is already queued or executing.
    Duplicate,
    /// Handled at once, nothing was queued.
    Immediate,
    Rejected,
}

#[derive(Debug)]
enum ControlMsg {
    Reevaluate,
    Heartbeat,
    PromoteRetries,
    ExecutorDone,
}

struct Lifecycle {
    state: ServiceState,
    stopping: bool,
    forced_to_stop: bool,
    in_foreground: bool,
    last_decision: Instant,
}

#[derive(Default)]
struct ExecutorSlot {
    handle: Option<JoinHandle<()>>,
    current: Option<CommandData>,
    started: Option<Instant>,
}

impl ExecutorSlot {
    fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub struct SchedulerState {
    settings: SchedulerSettings,
    queues: Mutex<CommandQueues>,
    lifecycle: Mutex<Lifecycle>,
    executor: Mutex<ExecutorSlot>,
    store: QueueStore,
    runner: Arc<dyn CommandRunner>,
    events: EventBus,
    control: mpsc::UnboundedSender<ControlMsg>,
    shutdown: watch::Sender<bool>,
    runtime: tokio::runtime::Handle,
}

impl SchedulerState {
    fn poke(&self) {
        let _ = self.control.send(ControlMsg::Reevaluate);
    }

    fn foreground_only(&self) -> bool {
        !self.settings.sync_while_in_foreground && lock(&self.lifecycle).in_foreground
    }

    fn set_state(&self, state: ServiceState) {
        {
            let mut lc = lock(&self.lifecycle);
            if lc.state == state {
                return;
            }
            lc.state = state;
            lc.last_decision = Instant::now();
        }
        debug!(?state, "service state");
        self.events.emit(ServiceEvent::StateChanged(state));
    }

    fn emit_progress(&self) {
        let counts = lock(&self.queues).counts();
        self.events.emit(ServiceEvent::QueueProgress(counts));
    }

    async fn flush(&self) -> Result<usize> {
        let snapshot = lock(&self.queues).snapshot();
        self.store.save(snapshot).await
    }

    fn flush_blocking(&self) {
        let snapshot = lock(&self.queues).snapshot();
        if let Err(e) = self.store.save_blocking(&snapshot) {
            warn!("queue flush failed: {e:#}");
        }
    }

    fn run_immediate(&self, cmd: &CommandData) {
        match cmd.kind {
            CommandKind::DropQueues => {
                lock(&self.queues).clear();
                info!("all queues dropped");
            }
            CommandKind::DeleteCommand => {
                if let Some(target) = cmd.params.target.as_deref() {
                    let removed = lock(&self.queues).remove_equal(target);
                    info!(command = %target, removed, "queued command deleted");
                }
            }
            _ => {}
        }
    }

    async fn evaluate(self: &Arc<Self>) {
        if lock(&self.lifecycle).stopping {
            return;
        }
        let foreground_only = self.foreground_only();
        let runnable = {
            let q = lock(&self.queues);
            if foreground_only {
                q.has_foreground()
            } else {
                q.has_runnable()
            }
        };
        if runnable {
            self.set_state(ServiceState::Running);
            self.spawn_executor();
            return;
        }
        if lock(&self.executor).is_running() {
            return;
        }
        let may_stop = {
            let lc = lock(&self.lifecycle);
            lc.state == ServiceState::Running && lc.last_decision.elapsed() >= self.settings.min_dwell()
        };
        if may_stop {
            self.set_state(ServiceState::Stopping);
            if let Err(e) = self.flush().await {
                warn!("queue flush failed: {e:#}");
            }
            self.set_state(ServiceState::Stopped);
        }
    }

    fn spawn_executor(self: &Arc<Self>) {
        let mut slot = lock(&self.executor);
        if slot.is_running() {
            return;
        }
        let state = Arc::clone(self);
        slot.handle = Some(self.runtime.spawn(async move { state.executor_loop().await }));
    }

    async fn executor_loop(self: Arc<Self>) {
        debug!("executor started");
        loop {
            if lock(&self.lifecycle).stopping {
                break;
            }
            let foreground_only = self.foreground_only();
            // Lock order is queues, then executor: a command is never out of
            // the queues without being the current one.
            let cmd = {
                let mut queues = lock(&self.queues);
                let Some(mut cmd) = queues.pop_next(foreground_only) else {
                    break;
                };
                cmd.result.prepare_for_launch(self.settings.max_retries, cmd.manually_launched);
                cmd.manually_launched = false;
                let mut slot = lock(&self.executor);
                slot.current = Some(cmd.clone());
                slot.started = Some(Instant::now());
                cmd
            };
            self.events.emit(ServiceEvent::BeforeExecuting(cmd.clone()));
            debug!(command = %cmd, "executing");

            let done = self.execute(cmd).await;
            self.dispose(done);
        }
        debug!("executor idle");
        let _ = self.control.send(ControlMsg::ExecutorDone);
    }

    async fn execute(&self, cmd: CommandData) -> CommandData {
        let backup = cmd.clone();
        match AssertUnwindSafe(self.runner.run(cmd)).catch_unwind().await {
            Ok(done) => done,
            Err(panic) => {
                let mut failed = backup;
                let msg = panic_message(panic.as_ref());
                warn!(command = %failed, "command panicked: {msg}");
                failed.result.record_hard_failure(format!("command panicked: {msg}"));
                failed
            }
        }
    }

    /// Files the executing command into the retry or error queue and clears
    /// the executor slot. Does nothing when `cmd` is no longer the current
    /// command, e.g. after the watchdog gave up on it.
    fn dispose(&self, mut cmd: CommandData) {
        let now = now_ms();
        let disposition = {
            let mut q = lock(&self.queues);
            {
                let mut slot = lock(&self.executor);
                if !slot.current.as_ref().is_some_and(|c| c.id == cmd.id) {
                    return;
                }
                slot.current = None;
                slot.started = None;
            }
            let disposition = cmd.result.after_execution(now);
            match disposition {
                Disposition::Succeeded => {}
                Disposition::Retry => q.push_retry(cmd.clone()),
                Disposition::Failed => q.push_error(cmd.clone(), now),
            }
            disposition
        };
        match disposition {
            Disposition::Succeeded => debug!(command = %cmd, "succeeded"),
            Disposition::Retry => info!(command = %cmd, retries_left = cmd.result.retries_left, "will retry: {}", cmd.result.message),
            Disposition::Failed => warn!(command = %cmd, "failed: {}", cmd.result.message),
        }
        self.events.emit(ServiceEvent::AfterExecuting(cmd));
        self.emit_progress();
    }

    /// Discards an executor stuck on one command for longer than allowed.
    fn check_stall(&self) {
        let stalled = {
            let mut slot = lock(&self.executor);
            let overdue = slot
                .started
                .is_some_and(|t| t.elapsed() > self.settings.max_command_execution());
            if !(slot.is_running() && overdue) {
                return;
            }
            if let Some(handle) = slot.handle.take() {
                handle.abort();
            }
            slot.current.clone()
        };
        if let Some(mut cmd) = stalled {
            warn!(command = %cmd, "executor stalled, discarding it");
            cmd.result.record_error(&ConnectionError::soft("command stalled"));
            self.dispose(cmd);
        }
    }

    fn promote_retries(&self) -> usize {
        let now = now_ms();
        let (promoted, purged) = {
            let mut q = lock(&self.queues);
            (q.promote_retries(now), q.purge_errors(now))
        };
        if promoted > 0 || purged > 0 {
            info!(promoted, purged, "retry queue promoted");
            self.emit_progress();
        }
        promoted
    }
}

async fn control_loop(
    state: Arc<SchedulerState>,
    mut rx: mpsc::UnboundedReceiver<ControlMsg>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let msg = tokio::select! {
            msg = rx.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
            _ = shutdown.changed() => break,
        };
        match msg {
            ControlMsg::Heartbeat => state.check_stall(),
            ControlMsg::PromoteRetries => {
                state.promote_retries();
            }
            ControlMsg::Reevaluate | ControlMsg::ExecutorDone => {}
        }
        state.evaluate().await;
    }
    debug!("control loop stopped");
}

fn spawn_ticker(
    control: mpsc::UnboundedSender<ControlMsg>,
    settings: &SchedulerSettings,
    mut shutdown: watch::Receiver<bool>,
) {
    let heartbeat_every = settings.heartbeat();
    let promotion_every = settings.retry_promotion();
    tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(heartbeat_every);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut promotion =
            tokio::time::interval_at(tokio::time::Instant::now() + promotion_every, promotion_every);
        promotion.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            let msg = tokio::select! {
                _ = shutdown.changed() => break,
                _ = heartbeat.tick() => ControlMsg::Heartbeat,
                _ = promotion.tick() => ControlMsg::PromoteRetries,
            };
            if control.send(msg).is_err() {
                break;
            }
        }
    });
}

/// Handle to a running scheduler.
pub struct Scheduler {
    state: Arc<SchedulerState>,
}

impl Scheduler {
    /// Restores the persisted queues and starts the control loop.
    pub async fn start(
        settings: SchedulerSettings,
        store: QueueStore,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self> {
        let restored = store.load().await?;
        let restored_count = restored.len();
        let mut queues = CommandQueues::new(&settings);
        queues.restore(restored, now_ms());

        let (control, rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);
        spawn_ticker(control.clone(), &settings, shutdown_rx.clone());
        info!(
            restored = restored_count,
            db = %store.db_path().display(),
            "scheduler started"
        );
        let state = Arc::new(SchedulerState {
            settings,
            queues: Mutex::new(queues),
            lifecycle: Mutex::new(Lifecycle {
                state: ServiceState::Stopped,
                stopping: false,
                forced_to_stop: false,
                in_foreground: false,
                last_decision: Instant::now(),
            }),
            executor: Mutex::new(ExecutorSlot::default()),
            store,
            runner,
            events: EventBus::default(),
            control,
            shutdown,
            runtime: tokio::runtime::Handle::current(),
        });
        tokio::spawn(control_loop(Arc::clone(&state), rx, shutdown_rx));
        state.poke();
        Ok(Self { state })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.state.events.subscribe()
    }

    /// Accepts a command. Immediate kinds act at once. After a stop the
    /// command is still queued and persisted, but not executed.
    pub fn submit(&self, cmd: CommandData) -> Admission {
        let s = &self.state;
        if cmd.kind == CommandKind::Empty || (cmd.kind.needs_account() && cmd.account.is_empty()) {
            warn!(command = %cmd, "rejected command without an account");
            return Admission::Rejected;
        }
        let admission = if cmd.kind.is_immediate() {
            s.run_immediate(&cmd);
            Admission::Immediate
        } else {
            let mut queues = lock(&s.queues);
            if lock(&s.executor).current.as_ref().is_some_and(|c| *c == cmd) {
                debug!(command = %cmd, "duplicate of the executing command");
                return Admission::Duplicate;
            }
            if queues.admit(cmd, now_ms()) {
                Admission::Queued
            } else {
                Admission::Duplicate
            }
        };
        s.emit_progress();
        let forced = {
            let lc = lock(&s.lifecycle);
            if lc.stopping && lc.forced_to_stop {
                Some(true)
            } else if lc.stopping {
                Some(false)
            } else {
                None
            }
        };
        match forced {
            Some(forced) => {
                debug!(forced, "accepted while stopped, flushing again");
                s.flush_blocking();
            }
            None => s.poke(),
        }
        admission
    }

    /// While in foreground with background sync disabled, only foreground
    /// commands run.
    pub fn set_in_foreground(&self, yes: bool) {
        lock(&self.state.lifecycle).in_foreground = yes;
        self.state.poke();
    }

    /// Moves retry entries past their back-off to the main queue now.
    pub fn promote_retries(&self) -> usize {
        let promoted = self.state.promote_retries();
        self.state.poke();
        promoted
    }

    pub fn counts(&self) -> QueueCounts {
        lock(&self.state.queues).counts()
    }

    pub fn state(&self) -> ServiceState {
        lock(&self.state.lifecycle).state
    }

    pub fn queued(&self, cmd: &CommandData) -> Option<crate::command_queue::QueueType> {
        lock(&self.state.queues).find(cmd)
    }

    /// Stops execution and persists the queues. A forced stop cancels the
    /// executing command and puts it back in the main queue.
    pub async fn stop(&self, force: bool) -> Result<()> {
        let s = &self.state;
        {
            let mut lc = lock(&s.lifecycle);
            lc.stopping = true;
            lc.forced_to_stop |= force;
        }
        s.set_state(ServiceState::Stopping);
        let _ = s.shutdown.send(true);

        let handle = lock(&s.executor).handle.take();
        if let Some(mut handle) = handle {
            if force {
                handle.abort();
                let _ = handle.await;
            } else if tokio::time::timeout(s.settings.max_command_execution(), &mut handle)
                .await
                .is_err()
            {
                warn!("executor did not finish in time, cancelling it");
                handle.abort();
                let _ = handle.await;
            }
        }
        {
            let mut queues = lock(&s.queues);
            let interrupted = {
                let mut slot = lock(&s.executor);
                slot.started = None;
                slot.current.take()
            };
            if let Some(cmd) = interrupted {
                info!(command = %cmd, "requeued interrupted command");
                queues.admit(cmd, now_ms());
            }
        }

        let saved = s.flush().await?;
        s.set_state(ServiceState::Stopped);
        info!(saved, force, "scheduler stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::TimelineType;
    use crate::command_queue::QueueType;
    use crate::error::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::timeout;

    #[derive(Default)]
    struct FakeRunner {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CommandRunner for FakeRunner {
        async fn run(&self, mut cmd: CommandData) -> CommandData {
            self.calls.lock().unwrap().push(cmd.params.text.clone());
            match cmd.params.text.as_str() {
                "soft" => cmd.result.record_error(&ConnectionError::soft("timeout")),
                "hard" => cmd
                    .result
                    .record_error(&ConnectionError::from_status(StatusCode::NotFound, "gone")),
                "panic" => panic!("boom"),
                "slow" => tokio::time::sleep(Duration::from_millis(400)).await,
                "hang" => tokio::time::sleep(Duration::from_secs(60)).await,
                _ => {}
            }
            cmd
        }
    }

    fn settings() -> SchedulerSettings {
        SchedulerSettings {
            heartbeat_secs: 1,
            retry_min_backoff_secs: 0,
            max_retries: 2,
            max_command_execution_secs: 1,
            min_dwell_ms: 0,
            ..SchedulerSettings::default()
        }
    }

    fn post(text: &str) -> CommandData {
        CommandData::update_status("alice@social", text)
    }

    async fn start(
        dir: &tempfile::TempDir,
        settings: SchedulerSettings,
    ) -> (Scheduler, Arc<FakeRunner>, broadcast::Receiver<ServiceEvent>) {
        let runner = Arc::new(FakeRunner::default());
        let store = QueueStore::open(dir.path().join("queues.db")).unwrap();
        let scheduler = Scheduler::start(settings, store, runner.clone()).await.unwrap();
        let rx = scheduler.subscribe();
        (scheduler, runner, rx)
    }

    async fn next_before(rx: &mut broadcast::Receiver<ServiceEvent>) -> CommandData {
        loop {
            let event = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
            if let ServiceEvent::BeforeExecuting(cmd) = event {
                return cmd;
            }
        }
    }

    async fn next_after(rx: &mut broadcast::Receiver<ServiceEvent>) -> CommandData {
        loop {
            let event = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
            if let ServiceEvent::AfterExecuting(cmd) = event {
                return cmd;
            }
        }
    }

    #[tokio::test]
    async fn duplicates_of_queued_and_executing_commands_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let (scheduler, runner, mut rx) = start(&dir, settings()).await;
        assert_eq!(scheduler.submit(post("slow")), Admission::Queued);
        assert_eq!(next_before(&mut rx).await.params.text, "slow");

        assert_eq!(scheduler.submit(post("slow")), Admission::Duplicate);
        assert_eq!(scheduler.submit(post("x")), Admission::Queued);
        assert_eq!(scheduler.submit(post("x").in_foreground(true)), Admission::Duplicate);
        assert_eq!(scheduler.counts().main, 1);

        next_after(&mut rx).await;
        let done = next_after(&mut rx).await;
        assert_eq!(done.params.text, "x");
        assert!(done.in_foreground);
        assert_eq!(*runner.calls.lock().unwrap(), vec!["slow", "x"]);
        scheduler.stop(false).await.unwrap();
    }

    /// Counts runs during which an equal command was also queued.
    #[derive(Default)]
    struct ExclusiveRunner {
        state: std::sync::OnceLock<Arc<SchedulerState>>,
        runs: AtomicUsize,
        overlaps: AtomicUsize,
    }

    impl ExclusiveRunner {
        fn check(&self, cmd: &CommandData) {
            if let Some(state) = self.state.get() {
                if lock(&state.queues).find(cmd).is_some() {
                    self.overlaps.fetch_add(1, Ordering::SeqCst);
                }
            }
        }
    }

    #[async_trait]
    impl CommandRunner for ExclusiveRunner {
        async fn run(&self, cmd: CommandData) -> CommandData {
            self.check(&cmd);
            tokio::time::sleep(Duration::from_millis(1)).await;
            self.check(&cmd);
            self.runs.fetch_add(1, Ordering::SeqCst);
            cmd
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn executing_command_is_never_queued_twice_under_contention() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ExclusiveRunner::default());
        let store = QueueStore::open(dir.path().join("queues.db")).unwrap();
        let scheduler = Arc::new(Scheduler::start(settings(), store, runner.clone()).await.unwrap());
        assert!(runner.state.set(Arc::clone(&scheduler.state)).is_ok());

        let mut submitters = Vec::new();
        for _ in 0..4 {
            let scheduler = Arc::clone(&scheduler);
            submitters.push(tokio::spawn(async move {
                for _ in 0..300 {
                    scheduler.submit(post("x"));
                    tokio::task::yield_now().await;
                }
            }));
        }
        for s in submitters {
            s.await.unwrap();
        }
        timeout(Duration::from_secs(5), async {
            while scheduler.counts().main > 0 || lock(&scheduler.state.executor).current.is_some() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert!(runner.runs.load(Ordering::SeqCst) > 0);
        assert_eq!(runner.overlaps.load(Ordering::SeqCst), 0);
        scheduler.stop(true).await.unwrap();
    }

    #[tokio::test]
    async fn hard_errors_park_and_soft_errors_retry_until_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let (scheduler, runner, mut rx) = start(&dir, settings()).await;

        scheduler.submit(post("hard"));
        let hard = next_after(&mut rx).await;
        assert_eq!(hard.result.num_hard_errors, 1);
        assert_eq!(scheduler.queued(&hard), Some(QueueType::Error));

        scheduler.submit(post("soft"));
        let first = next_after(&mut rx).await;
        assert_eq!(first.result.retries_left, 1);
        assert_eq!(scheduler.queued(&first), Some(QueueType::Retry));

        assert_eq!(scheduler.promote_retries(), 1);
        let second = next_after(&mut rx).await;
        assert_eq!(second.result.retries_left, 0);
        assert_eq!(second.result.execution_count, 2);
        assert_eq!(scheduler.queued(&second), Some(QueueType::Retry));

        scheduler.promote_retries();
        let last = next_after(&mut rx).await;
        assert_eq!(last.result.execution_count, 3);
        assert_eq!(scheduler.queued(&last), Some(QueueType::Error));
        assert_eq!(runner.calls.lock().unwrap().iter().filter(|t| *t == "soft").count(), 3);
        assert_eq!(runner.calls.lock().unwrap().iter().filter(|t| *t == "hard").count(), 1);
        scheduler.stop(false).await.unwrap();
    }

    #[tokio::test]
    async fn panic_is_recorded_and_execution_continues() {
        let dir = tempfile::tempdir().unwrap();
        let (scheduler, _runner, mut rx) = start(&dir, settings()).await;
        scheduler.submit(post("panic"));
        scheduler.submit(post("after"));
        let panicked = next_after(&mut rx).await;
        assert_eq!(panicked.result.num_hard_errors, 1);
        assert!(panicked.result.message.contains("boom"));
        assert_eq!(next_after(&mut rx).await.params.text, "after");
        scheduler.stop(false).await.unwrap();
    }

    #[tokio::test]
    async fn stalled_executor_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let (scheduler, _runner, mut rx) = start(&dir, settings()).await;
        scheduler.submit(post("hang"));
        scheduler.submit(post("next"));
        let stalled = next_after(&mut rx).await;
        assert_eq!(stalled.params.text, "hang");
        assert_eq!(stalled.result.num_io_errors, 1);
        assert_eq!(next_after(&mut rx).await.params.text, "next");
        scheduler.stop(true).await.unwrap();
    }

    #[tokio::test]
    async fn background_waits_while_in_foreground() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = settings();
        s.sync_while_in_foreground = false;
        let (scheduler, runner, mut rx) = start(&dir, s).await;
        scheduler.set_in_foreground(true);
        scheduler.submit(CommandData::fetch_timeline("alice@social", TimelineType::Home, 0));
        scheduler.submit(post("fg").in_foreground(true));
        assert_eq!(next_after(&mut rx).await.params.text, "fg");
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(scheduler.counts().main, 1);

        scheduler.set_in_foreground(false);
        assert_eq!(next_after(&mut rx).await.kind, CommandKind::FetchTimeline);
        assert_eq!(runner.calls.lock().unwrap().len(), 2);
        scheduler.stop(false).await.unwrap();
    }

    #[tokio::test]
    async fn immediate_commands_edit_the_queues() {
        let dir = tempfile::tempdir().unwrap();
        let (scheduler, _runner, _rx) = start(&dir, settings()).await;
        scheduler.stop(false).await.unwrap();

        scheduler.submit(post("a"));
        scheduler.submit(post("b"));
        assert_eq!(scheduler.submit(CommandData::delete_command(post("a"))), Admission::Immediate);
        assert_eq!(scheduler.counts().main, 1);
        assert_eq!(scheduler.submit(CommandData::drop_queues()), Admission::Immediate);
        assert_eq!(scheduler.counts(), QueueCounts::default());
        assert_eq!(scheduler.submit(CommandData::new(CommandKind::Like, "")), Admission::Rejected);
    }

    #[tokio::test]
    async fn accepted_after_forced_stop_and_restored_on_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let (scheduler, runner, _rx) = start(&dir, settings()).await;
            scheduler.stop(true).await.unwrap();
            assert_eq!(scheduler.state(), ServiceState::Stopped);
            assert_eq!(scheduler.submit(post("later")), Admission::Queued);
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert!(runner.calls.lock().unwrap().is_empty());
        }
        let (scheduler, runner, mut rx) = start(&dir, settings()).await;
        assert_eq!(next_after(&mut rx).await.params.text, "later");
        assert_eq!(*runner.calls.lock().unwrap(), vec!["later"]);
        scheduler.stop(false).await.unwrap();
    }

    #[tokio::test]
    async fn forced_stop_requeues_the_executing_command() {
        let dir = tempfile::tempdir().unwrap();
        let (scheduler, _runner, mut rx) = start(&dir, settings()).await;
        scheduler.submit(post("slow"));
        next_before(&mut rx).await;
        scheduler.stop(true).await.unwrap();
        assert_eq!(scheduler.queued(&post("slow")), Some(QueueType::Main));
        let saved = QueueStore::open(dir.path().join("queues.db"))
            .unwrap()
            .load()
            .await
            .unwrap();
        assert_eq!(saved.len(), 1);
    }
}
