//! Applies a finalized patch to its destination.
//!
//! A run is split between two futures joined on the caller's task: a
//! driver that walks the patch phase by phase and a coordinator that
//! consumes the resulting event stream together with the command stream.
//! Sequential operations are applied inline by the coordinator; parallel
//! ones are spawned behind a semaphore and joined at the end of each phase.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Semaphore, broadcast, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use treesync_core::{
    CommandBus, Operation, OperationType, Patch, ProcessStatus, SessionId, SyncCommand,
};
use uuid::Uuid;

use super::apply::{ApplyError, OperationApplier, ProgressSender};
use super::backoff::Backoff;
use crate::config::ProcessorConfig;
use crate::lock::ProcessorLocker;

const SESSION_ROOT: &str = "/";
const PROGRESS_STEP: f32 = 0.01;
/// Patch-level status text of a run stopped by an interrupt command.
pub const INTERRUPTED_STATUS: &str = "Patch interrupted by user";
const INTERRUPTED_ERROR: &str = "patch interrupted by user";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    CreateFolders,
    MoveFolders,
    MoveFiles,
    Files,
    Deletes,
}

impl Phase {
    const ORDER: [Phase; 5] = [
        Phase::CreateFolders,
        Phase::MoveFolders,
        Phase::MoveFiles,
        Phase::Files,
        Phase::Deletes,
    ];

    fn types(self) -> &'static [OperationType] {
        match self {
            Phase::CreateFolders => &[OperationType::CreateFolder],
            Phase::MoveFolders => &[OperationType::MoveFolder],
            Phase::MoveFiles => &[OperationType::MoveFile],
            Phase::Files => &[OperationType::CreateFile, OperationType::UpdateFile],
            Phase::Deletes => &[OperationType::Delete],
        }
    }

    fn name(self) -> &'static str {
        match self {
            Phase::CreateFolders => "create-folders",
            Phase::MoveFolders => "move-folders",
            Phase::MoveFiles => "move-files",
            Phase::Files => "files",
            Phase::Deletes => "deletes",
        }
    }

    fn is_last(self) -> bool {
        self == Phase::Deletes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dispatch {
    Sequential,
    Parallel,
}

enum ProcessorEvent {
    Operation {
        op: Arc<Operation>,
        dispatch: Dispatch,
    },
    Interrupt,
    PhaseDone(Phase),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Handler {
    CreateFolder,
    PutFile,
    Move,
    Delete,
}

/// Handler and wording selected for one operation.
#[derive(Debug)]
struct Plan {
    handler: Handler,
    progress: String,
    complete: String,
    error: String,
    details: Vec<String>,
}

impl Plan {
    fn for_operation(op: &Operation, transfers: bool) -> Option<Plan> {
        let path = op.ref_path().to_string();
        let moved = || {
            vec![
                op.move_origin_path().unwrap_or_default().to_string(),
                op.ref_path().to_string(),
            ]
        };
        let (handler, progress, complete, error, mut details) = match op.op_type() {
            OperationType::CreateFolder => (
                Handler::CreateFolder,
                "Creating folder".to_string(),
                "Created folder".to_string(),
                "Error while creating folder".to_string(),
                vec![path],
            ),
            OperationType::CreateFile | OperationType::UpdateFile if transfers => (
                Handler::PutFile,
                "Transferring file".to_string(),
                "Transferred file".to_string(),
                "Error while transferring file".to_string(),
                vec![path],
            ),
            OperationType::CreateFile | OperationType::UpdateFile => (
                Handler::PutFile,
                "Indexing file".to_string(),
                "Indexed file".to_string(),
                "Error while indexing file".to_string(),
                vec![path],
            ),
            OperationType::MoveFolder => (
                Handler::Move,
                "Moving folder".to_string(),
                "Moved folder".to_string(),
                "Error while moving folder".to_string(),
                moved(),
            ),
            OperationType::MoveFile => (
                Handler::Move,
                "Moving file".to_string(),
                "Moved file".to_string(),
                "Error while moving file".to_string(),
                moved(),
            ),
            OperationType::Delete => {
                let kind = if op.node()?.is_leaf() { "file" } else { "folder" };
                (
                    Handler::Delete,
                    format!("Deleting {kind}"),
                    format!("Deleted {kind}"),
                    format!("Error while deleting {kind}"),
                    vec![path],
                )
            }
            OperationType::RefreshUuid | OperationType::Unknown => return None,
        };
        if !op.target().uri.is_empty() {
            details.push(op.target().uri.clone());
        }
        Some(Plan {
            handler,
            progress,
            complete,
            error,
            details,
        })
    }

    fn describe(&self, message: &str) -> String {
        let mut out = message.to_string();
        for detail in &self.details {
            out.push_str(" - ");
            out.push_str(detail);
        }
        out
    }
}

/// Operations sharing a class are written in one session batch.
fn batch_class(op_type: OperationType) -> OperationType {
    match op_type {
        OperationType::UpdateFile => OperationType::CreateFile,
        other => other,
    }
}

pub struct Processor {
    applier: Arc<dyn OperationApplier>,
    locker: Option<Arc<dyn ProcessorLocker>>,
    config: ProcessorConfig,
}

impl Processor {
    pub fn new(applier: Arc<dyn OperationApplier>) -> Self {
        Self::with_config(applier, ProcessorConfig::default())
    }

    pub fn with_config(applier: Arc<dyn OperationApplier>, config: ProcessorConfig) -> Self {
        Self {
            applier,
            locker: None,
            config,
        }
    }

    pub fn with_locker(mut self, locker: Arc<dyn ProcessorLocker>) -> Self {
        self.locker = Some(locker);
        self
    }

    fn backoff(&self) -> Backoff {
        let backoff = Backoff::new(self.config.retry_base, self.config.retry_max);
        if self.config.retry_jitter {
            backoff.with_jitter()
        } else {
            backoff
        }
    }

    /// Applies every operation of `patch`, returning once all of them were
    /// attempted or an interrupt arrived on `commands`. `patch.done()` is
    /// called exactly once before returning.
    pub async fn process(&self, patch: Arc<dyn Patch>, commands: Option<&CommandBus>) {
        let mut guard = DoneGuard {
            patch: Arc::clone(&patch),
            interrupted: false,
        };
        let mut commands = commands.map(CommandBus::subscribe);

        if !self.config.skip_filter_to_target
            && let Err(err) = patch.filter_to_target().await
        {
            warn!(error = %err, "failed to filter patch against target");
        }
        if patch.size() == 0 {
            debug!("patch is empty, nothing to process");
            return;
        }

        let total = patch.progress_total();
        let operation_id: Arc<str> = Uuid::new_v4().to_string().into();
        info!(
            operation_id = %operation_id,
            operations = patch.size(),
            total_bytes = total,
            "processing patch"
        );
        patch.status(ProcessStatus::info(format!(
            "Start processing patch (total bytes {total})"
        )));

        let session = match patch.start_session(SESSION_ROOT).await {
            Ok(session) => Some(session),
            Err(err) => {
                warn!(error = %err, "could not start indexation session");
                None
            }
        };

        let coordinator = Coordinator {
            patch: Arc::clone(&patch),
            session: session.clone(),
            pending: patch.pending_by_type(),
            limit: Arc::new(Semaphore::new(self.config.concurrency.max(1))),
            runner: OperationRunner {
                applier: Arc::clone(&self.applier),
                locker: self.locker.clone(),
                operation_id,
                cursor: Arc::new(AtomicU64::new(0)),
                total,
                transfers: patch.has_transfers(),
                backoff: self.backoff(),
                attempts: self.config.retry_attempts.max(1),
                silent: self.config.silent,
            },
        };

        let (events_tx, events_rx) = mpsc::channel(1);
        let ((), interrupted) = tokio::join!(
            drive_phases(Arc::clone(&patch), events_tx),
            coordinator.run(events_rx, commands.as_mut()),
        );
        drop(commands);

        if let Some(session) = session
            && let Err(err) = patch.finish_session(&session).await
        {
            warn!(session = %session, error = %err, "could not finish indexation session");
        }

        if interrupted {
            guard.interrupted = true;
        } else {
            self.spawn_uuid_refresh(patch.as_ref());
        }
    }

    fn spawn_uuid_refresh(&self, patch: &dyn Patch) {
        let operations = patch.operations_by_type(&[OperationType::RefreshUuid]);
        if operations.is_empty() {
            return;
        }
        let applier = Arc::clone(&self.applier);
        tokio::spawn(async move {
            let mut refreshed = 0usize;
            for op in operations {
                if op.is_processed() {
                    continue;
                }
                match applier.refresh_uuid(&op).await {
                    Ok(()) => {
                        op.set_processed();
                        refreshed += 1;
                    }
                    Err(err) => {
                        warn!(path = op.ref_path(), error = %err, "failed to refresh node uuid")
                    }
                }
            }
            debug!(refreshed, "uuid refresh pass finished");
        });
    }
}

/// Reports the terminal patch state when the run ends, whichever way.
struct DoneGuard {
    patch: Arc<dyn Patch>,
    interrupted: bool,
}

impl Drop for DoneGuard {
    fn drop(&mut self) {
        if self.interrupted {
            self.patch.status(ProcessStatus::failed(
                INTERRUPTED_STATUS,
                &INTERRUPTED_ERROR,
                0.0,
            ));
        }
        self.patch.done();
    }
}

async fn drive_phases(patch: Arc<dyn Patch>, events: mpsc::Sender<ProcessorEvent>) {
    let parallel_files = patch.has_transfers();
    for phase in Phase::ORDER {
        let dispatch = if phase == Phase::Files && parallel_files {
            Dispatch::Parallel
        } else {
            Dispatch::Sequential
        };
        let mut batch = Vec::new();
        patch.walk_operations(phase.types(), &mut |op| batch.push(Arc::clone(op)));
        debug!(phase = phase.name(), operations = batch.len(), "dispatching phase");
        for op in batch {
            if phase == Phase::Deletes && op.node().is_none() {
                debug!(path = op.ref_path(), "skipping delete already consumed by a move");
                continue;
            }
            if events
                .send(ProcessorEvent::Operation { op, dispatch })
                .await
                .is_err()
            {
                return;
            }
        }
        if events.send(ProcessorEvent::PhaseDone(phase)).await.is_err() {
            return;
        }
    }
}

struct Coordinator {
    patch: Arc<dyn Patch>,
    session: Option<SessionId>,
    pending: HashMap<OperationType, usize>,
    limit: Arc<Semaphore>,
    runner: OperationRunner,
}

impl Coordinator {
    /// Returns whether the run was interrupted.
    async fn run(
        self,
        mut events: mpsc::Receiver<ProcessorEvent>,
        mut commands: Option<&mut broadcast::Receiver<SyncCommand>>,
    ) -> bool {
        let mut previous = OperationType::Unknown;
        let mut interrupted = false;
        let mut in_flight = JoinSet::new();

        while let Some(event) = next_event(&mut events, &mut commands).await {
            match event {
                ProcessorEvent::Interrupt => {
                    if !interrupted {
                        info!("interrupt received, no further operations will be dispatched");
                    }
                    interrupted = true;
                }
                ProcessorEvent::Operation { op, dispatch } => {
                    let op_type = op.op_type();
                    if previous != OperationType::Unknown
                        && batch_class(op_type) != batch_class(previous)
                    {
                        self.flush_leaving(previous).await;
                    }
                    previous = op_type;
                    if interrupted || op.is_processed() {
                        continue;
                    }
                    match dispatch {
                        Dispatch::Sequential => self.runner.run(op, false).await,
                        Dispatch::Parallel => match Arc::clone(&self.limit).acquire_owned().await {
                            Ok(_) if take_interrupt(&mut commands) => {
                                info!(operation = %op, "interrupt received while waiting for a worker");
                                interrupted = true;
                            }
                            Ok(permit) => {
                                let runner = self.runner.clone();
                                in_flight.spawn(async move {
                                    let _permit = permit;
                                    runner.run(op, true).await;
                                });
                            }
                            Err(_) => {
                                error!("worker pool closed, applying operation inline");
                                self.runner.run(op, true).await;
                            }
                        },
                    }
                }
                ProcessorEvent::PhaseDone(phase) => {
                    join_all(&mut in_flight).await;
                    debug!(phase = phase.name(), "phase finished");
                    if phase.is_last() {
                        break;
                    }
                }
            }
        }
        join_all(&mut in_flight).await;
        interrupted
    }

    async fn flush_leaving(&self, previous: OperationType) {
        let Some(session) = &self.session else {
            return;
        };
        let class = batch_class(previous);
        let pending: usize = self
            .pending
            .iter()
            .filter(|(op_type, _)| batch_class(**op_type) == class)
            .map(|(_, count)| *count)
            .sum();
        if pending == 0 {
            return;
        }
        debug!(left = %previous, "flushing indexation session");
        if let Err(err) = self.patch.flush_session(session).await {
            warn!(session = %session, error = %err, "could not flush indexation session");
        }
    }
}

/// Next event for the coordinator. Commands win over queued operations so
/// that an interrupt is seen before the next dispatch.
async fn next_event(
    events: &mut mpsc::Receiver<ProcessorEvent>,
    commands: &mut Option<&mut broadcast::Receiver<SyncCommand>>,
) -> Option<ProcessorEvent> {
    loop {
        let command = match commands.as_deref_mut() {
            None => return events.recv().await,
            Some(rx) => tokio::select! {
                biased;
                command = rx.recv() => command,
                event = events.recv() => return event,
            },
        };
        match command {
            Ok(SyncCommand::Interrupt) => return Some(ProcessorEvent::Interrupt),
            Ok(other) => debug!(command = ?other, "ignoring command while processing patch"),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "command stream lagged behind");
            }
            Err(broadcast::error::RecvError::Closed) => *commands = None,
        }
    }
}

/// Consumes commands already queued without waiting. Returns whether one
/// of them was an interrupt.
fn take_interrupt(commands: &mut Option<&mut broadcast::Receiver<SyncCommand>>) -> bool {
    let mut interrupt = false;
    while let Some(rx) = commands.as_deref_mut() {
        match rx.try_recv() {
            Ok(SyncCommand::Interrupt) => interrupt = true,
            Ok(other) => debug!(command = ?other, "ignoring command while processing patch"),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                warn!(skipped, "command stream lagged behind");
            }
            Err(broadcast::error::TryRecvError::Empty) => break,
            Err(broadcast::error::TryRecvError::Closed) => *commands = None,
        }
    }
    interrupt
}

async fn join_all(in_flight: &mut JoinSet<()>) {
    while let Some(result) = in_flight.join_next().await {
        if let Err(err) = result {
            error!(error = %err, "parallel operation task failed");
        }
    }
}

/// Everything a worker needs to apply one operation; cloned into each
/// parallel task.
#[derive(Clone)]
struct OperationRunner {
    applier: Arc<dyn OperationApplier>,
    locker: Option<Arc<dyn ProcessorLocker>>,
    operation_id: Arc<str>,
    cursor: Arc<AtomicU64>,
    total: u64,
    transfers: bool,
    backoff: Backoff,
    attempts: u32,
    silent: bool,
}

impl OperationRunner {
    async fn run(&self, op: Arc<Operation>, with_retries: bool) {
        let Some(plan) = Plan::for_operation(&op, self.transfers) else {
            warn!(operation = %op, "no handler for operation, skipping");
            return;
        };
        let attempts = if with_retries { self.attempts } else { 1 };
        let mut last_emitted = 0.0_f32;
        let mut attempt = 0;
        let result = loop {
            let result = self.attempt(&op, &plan, &mut last_emitted).await;
            attempt += 1;
            match result {
                Err(err) if attempt < attempts => {
                    let delay = self.backoff.delay(attempt - 1);
                    warn!(
                        operation = %op,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "operation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => break other,
            }
        };
        self.finish(&op, &plan, result);
    }

    async fn attempt(
        &self,
        op: &Operation,
        plan: &Plan,
        last_emitted: &mut f32,
    ) -> Result<(), ApplyError> {
        let (progress, mut reports) = ProgressSender::channel();
        let apply = self.apply(op, plan.handler, progress);
        let track = async {
            let mut reported = 0u64;
            while let Some(bytes) = reports.recv().await {
                reported += bytes;
                let cursor = self.cursor.fetch_add(bytes, Ordering::SeqCst) + bytes;
                if let Some(fraction) = self.fraction(cursor)
                    && fraction - *last_emitted > PROGRESS_STEP
                {
                    op.status(ProcessStatus::progress(
                        plan.describe(&plan.progress),
                        fraction,
                    ));
                    *last_emitted = fraction;
                }
            }
            reported
        };
        let (result, reported) = tokio::join!(apply, track);
        if result.is_err() && reported > 0 {
            self.cursor.fetch_sub(reported, Ordering::SeqCst);
        }
        result
    }

    async fn apply(
        &self,
        op: &Operation,
        handler: Handler,
        progress: ProgressSender,
    ) -> Result<(), ApplyError> {
        let locked = self.lock_paths(op);
        let id = self.operation_id.as_ref();
        let result = match handler {
            Handler::CreateFolder => self.applier.create_folder(op, id, progress).await,
            Handler::PutFile => self.applier.put_file(op, id, progress).await,
            Handler::Move => self.applier.move_node(op, id, progress).await,
            Handler::Delete => self.applier.delete_node(op, id, progress).await,
        };
        if let Some(locker) = &self.locker {
            for path in &locked {
                locker.unlock_file(op, path);
            }
        }
        result
    }

    fn lock_paths(&self, op: &Operation) -> Vec<String> {
        let Some(locker) = &self.locker else {
            return Vec::new();
        };
        let mut paths = vec![op.ref_path().to_string()];
        if let Some(origin) = op.move_origin_path() {
            paths.push(origin.to_string());
        }
        for path in &paths {
            locker.lock_file(op, path, &self.operation_id);
        }
        paths
    }

    fn finish(&self, op: &Operation, plan: &Plan, result: Result<(), ApplyError>) {
        let progress = self
            .fraction(self.cursor.load(Ordering::SeqCst))
            .unwrap_or(0.0);
        match result {
            Ok(()) => {
                op.set_processed();
                let message = plan.describe(&plan.complete);
                if !self.silent {
                    info!(operation_id = %self.operation_id, "{message}");
                }
                op.status(ProcessStatus::progress(message, progress));
            }
            Err(err) => {
                let message = plan.describe(&plan.error);
                if !self.silent {
                    error!(operation_id = %self.operation_id, error = %err, "{message}");
                }
                op.status(ProcessStatus::failed(message, &err, progress));
            }
        }
    }

    fn fraction(&self, cursor: u64) -> Option<f32> {
        if self.total == 0 {
            return None;
        }
        Some((cursor as f64 / self.total as f64).min(1.0) as f32)
    }
}

#[cfg(test)]
#[path = "processor_tests.rs"]
mod tests;
