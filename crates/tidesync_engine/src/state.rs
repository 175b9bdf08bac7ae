//! Sync session state machine.

use crate::apply::{ApplyEngine, ApplyOutcome};
use crate::config::{SyncConfig, TidemarkPolicy};
use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tidesync_core::{
    now_millis, ChangeId, CursorAdvance, ObjectStore, SyncStore, ValueCipher,
};
use tidesync_protocol::{GroupChanges, GroupPoll, Operation, SyncRequest, WireChange};

/// Where the current session is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session running.
    Idle,
    /// Collecting outbound changes and groups.
    BuildingRequest,
    /// Waiting for the coordinator.
    AwaitingResponse,
    /// Applying the response.
    ApplyingResponse,
    /// The session failed; the engine returns to idle right after.
    Failed,
}

impl SessionState {
    /// Returns true while a session is running.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionState::BuildingRequest
                | SessionState::AwaitingResponse
                | SessionState::ApplyingResponse
        )
    }

    /// Returns true if a new session may start.
    pub fn can_start_sync(&self) -> bool {
        matches!(self, SessionState::Idle | SessionState::Failed)
    }
}

/// Counters accumulated over the engine's lifetime.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Ticks that started a session.
    pub sessions_attempted: u64,
    /// Sessions that finished applying a successful response.
    pub sessions_succeeded: u64,
    /// Sessions that ended in an error.
    pub sessions_failed: u64,
    /// Ticks dropped because a session was already running.
    pub sessions_skipped: u64,
    /// Local changes acknowledged by the coordinator.
    pub changes_uploaded: u64,
    /// Inbound field writes committed.
    pub inbound_applied: u64,
    /// Inbound deletes processed.
    pub inbound_deleted: u64,
    /// Inbound writes dropped for tombstoned records.
    pub inbound_discarded: u64,
    /// Inbound changes parked in the deferred cache.
    pub inbound_deferred: u64,
    /// Inbound changes that could not be applied.
    pub inbound_failed: u64,
    /// Group tidemarks held back after a failed apply.
    pub tidemarks_held: u64,
    /// Whether the last session succeeded. `None` before the first one.
    pub last_success: Option<bool>,
    /// Errors of the last session; empty after a success.
    pub last_errors: Vec<String>,
    /// When the last session ended.
    pub last_session_at: Option<Instant>,
}

/// Result of one completed session.
#[derive(Debug, Clone, Default)]
pub struct SessionReport {
    /// Local changes sent and acknowledged.
    pub uploaded: usize,
    /// Groups polled.
    pub groups_polled: usize,
    /// Groups present in the response.
    pub groups_received: usize,
    /// Inbound field writes committed.
    pub applied: usize,
    /// Inbound deletes processed.
    pub deleted: usize,
    /// Inbound writes dropped for tombstoned records.
    pub discarded: usize,
    /// Inbound changes parked in the deferred cache.
    pub deferred: usize,
    /// Inbound changes that could not be applied.
    pub failed: usize,
    /// Groups whose tidemark was held back.
    pub tidemarks_held: usize,
    /// Whether the journal was compacted afterwards.
    pub compacted: bool,
    /// Wall time of the session.
    pub duration: Duration,
}

impl SessionReport {
    fn record(&mut self, outcome: &ApplyOutcome) {
        match outcome {
            ApplyOutcome::Applied => self.applied += 1,
            ApplyOutcome::Deleted => self.deleted += 1,
            ApplyOutcome::Discarded => self.discarded += 1,
            ApplyOutcome::Deferred => self.deferred += 1,
            ApplyOutcome::Failed(_) => self.failed += 1,
        }
    }
}

/// Result of replaying the deferred cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Entries applied and removed from the cache.
    pub applied: usize,
    /// Entries dropped because their record is tombstoned.
    pub discarded: usize,
    /// Entries whose apply failed; they stay cached.
    pub failed: usize,
    /// Entries still waiting for their property to exist.
    pub remaining: usize,
}

/// Drives sync sessions against the coordinator.
///
/// At most one session runs at a time. A tick that finds a session in
/// flight is dropped and counted, never queued.
pub struct SyncEngine<T: SyncTransport> {
    config: SyncConfig,
    transport: T,
    store: Arc<SyncStore>,
    objects: Arc<dyn ObjectStore>,
    cipher: Arc<dyn ValueCipher>,
    state: RwLock<SessionState>,
    stats: RwLock<SyncStats>,
    session: Mutex<()>,
}

impl<T: SyncTransport> SyncEngine<T> {
    /// Creates a new sync engine.
    pub fn new(
        config: SyncConfig,
        transport: T,
        store: Arc<SyncStore>,
        objects: Arc<dyn ObjectStore>,
        cipher: Arc<dyn ValueCipher>,
    ) -> Self {
        Self {
            config,
            transport,
            store,
            objects,
            cipher,
            state: RwLock::new(SessionState::Idle),
            stats: RwLock::new(SyncStats::default()),
            session: Mutex::new(()),
        }
    }

    /// Gets the current state.
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Returns the sync store.
    pub fn store(&self) -> &Arc<SyncStore> {
        &self.store
    }

    /// Returns true while a session is running.
    pub fn is_syncing(&self) -> bool {
        self.session.is_locked()
    }

    fn set_state(&self, state: SessionState) {
        *self.state.write() = state;
    }

    /// Runs a session unless one is already in flight.
    ///
    /// Returns `Ok(None)` for a skipped tick.
    pub fn tick(&self) -> SyncResult<Option<SessionReport>> {
        match self.sync_now() {
            Ok(report) => Ok(Some(report)),
            Err(SyncError::SessionInProgress) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Runs one session now.
    ///
    /// Fails with [`SyncError::SessionInProgress`] if another session is
    /// running.
    pub fn sync_now(&self) -> SyncResult<SessionReport> {
        let Some(_session) = self.session.try_lock() else {
            self.stats.write().sessions_skipped += 1;
            tracing::debug!("sync tick skipped, session in flight");
            return Err(SyncError::SessionInProgress);
        };

        let start = Instant::now();
        self.stats.write().sessions_attempted += 1;

        match self.run_session(start) {
            Ok(report) => {
                self.set_state(SessionState::Idle);
                tracing::info!(
                    uploaded = report.uploaded,
                    groups = report.groups_received,
                    applied = report.applied,
                    deleted = report.deleted,
                    deferred = report.deferred,
                    failed = report.failed,
                    elapsed_ms = report.duration.as_millis() as u64,
                    "sync session complete"
                );
                self.record_success(&report);
                Ok(report)
            }
            Err(e) => {
                self.handle_error(&e);
                Err(e)
            }
        }
    }

    fn run_session(&self, start: Instant) -> SyncResult<SessionReport> {
        let mut report = SessionReport::default();

        self.set_state(SessionState::BuildingRequest);
        let (request, sent) = self.build_request();
        report.groups_polled = request.groups.len();

        self.set_state(SessionState::AwaitingResponse);
        tracing::debug!(
            changes = request.changes.len(),
            groups = request.groups.len(),
            "sending sync request"
        );
        let response = self.transport.send(&request)?;

        self.set_state(SessionState::ApplyingResponse);
        if !response.success {
            return Err(SyncError::Application {
                errors: response.errors,
            });
        }

        report.uploaded = self.store.remove_changes(&sent)?;
        report.groups_received = response.groups.len();
        for group in &response.groups {
            self.apply_group(group, &mut report)?;
        }

        match self.store.maybe_compact() {
            Ok(compacted) => report.compacted = compacted.is_some(),
            Err(e) => tracing::warn!(error = %e, "journal compaction failed"),
        }

        report.duration = start.elapsed();
        Ok(report)
    }

    fn build_request(&self) -> (SyncRequest, Vec<ChangeId>) {
        let now = now_millis();
        let changes = self.store.drain_oldest(self.config.change_batch_size);
        let groups = self.store.poll_groups(self.config.group_batch_size);

        let mut request = SyncRequest::new(
            &self.config.app_id,
            &self.config.device_id,
            &self.config.api_access_key,
        );
        request.changes = changes.iter().map(|c| c.to_wire(now)).collect();
        request.groups = groups
            .into_iter()
            .map(|g| GroupPoll {
                group: g.encoded,
                tidemark: g.tidemark,
            })
            .collect();

        (request, changes.iter().map(|c| c.id).collect())
    }

    fn apply_group(&self, group: &GroupChanges, report: &mut SessionReport) -> SyncResult<()> {
        self.store.resolve_group(&group.group)?;

        let apply = self.apply_engine();
        let mut failures = 0usize;
        for change in &group.changes {
            let target = if change.group.is_empty() {
                group.group.as_str()
            } else {
                change.group.as_str()
            };
            let outcome = apply.apply(target, change)?;
            report.record(&outcome);
            if outcome.is_settled() {
                continue;
            }
            failures += 1;
            tracing::warn!(
                group = %group.group,
                entity = %change.entity,
                record = %change.record_id,
                property = %change.property,
                ?outcome,
                "inbound change not applied"
            );
        }

        let now = now_millis();
        let hold = failures > 0 && self.config.tidemark_policy == TidemarkPolicy::AfterFullApply;
        if hold {
            report.tidemarks_held += 1;
            tracing::warn!(group = %group.group, failures, "holding tidemark");
            self.store.advance_group(&group.group, None, now)?;
            return Ok(());
        }

        if self.store.advance_group(&group.group, group.tidemark.clone(), now)?
            == CursorAdvance::Regressed
        {
            tracing::warn!(
                group = %group.group,
                tidemark = ?group.tidemark,
                "ignoring numeric tidemark below the stored one"
            );
        }
        Ok(())
    }

    fn apply_engine(&self) -> ApplyEngine<'_> {
        ApplyEngine::new(
            &self.store,
            self.objects.as_ref(),
            self.cipher.as_ref(),
            self.config.tidemark_policy,
        )
    }

    /// Re-applies deferred changes whose property now exists locally.
    ///
    /// Call after a schema migration. Waits for a running session.
    pub fn replay_deferred(&self) -> SyncResult<ReplayReport> {
        let _session = self.session.lock();
        let apply = self.apply_engine();
        let mut report = ReplayReport::default();

        for parked in self.store.deferred_changes() {
            if !self
                .objects
                .field_names(&parked.entity)
                .contains(&parked.property)
            {
                report.remaining += 1;
                continue;
            }

            let wire = WireChange {
                group: parked.group.clone(),
                entity: parked.entity.clone(),
                record_id: parked.record_id.clone(),
                property: parked.property.clone(),
                value: parked.raw_value.clone(),
                seconds_ago: 0,
                operation: Operation::Set,
                modified: String::new(),
            };
            match apply.apply(&parked.group, &wire)? {
                ApplyOutcome::Applied => report.applied += 1,
                ApplyOutcome::Discarded | ApplyOutcome::Deleted => {
                    self.store.clear_deferred(&parked.key())?;
                    report.discarded += 1;
                }
                ApplyOutcome::Deferred => report.remaining += 1,
                ApplyOutcome::Failed(reason) => {
                    tracing::warn!(record = %parked.record_id, %reason, "deferred change replay failed");
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            applied = report.applied,
            discarded = report.discarded,
            remaining = report.remaining,
            "replayed deferred changes"
        );
        Ok(report)
    }

    fn record_success(&self, report: &SessionReport) {
        let mut stats = self.stats.write();
        stats.sessions_succeeded += 1;
        stats.changes_uploaded += report.uploaded as u64;
        stats.inbound_applied += report.applied as u64;
        stats.inbound_deleted += report.deleted as u64;
        stats.inbound_discarded += report.discarded as u64;
        stats.inbound_deferred += report.deferred as u64;
        stats.inbound_failed += report.failed as u64;
        stats.tidemarks_held += report.tidemarks_held as u64;
        stats.last_success = Some(true);
        stats.last_errors.clear();
        stats.last_session_at = Some(Instant::now());
    }

    fn handle_error(&self, error: &SyncError) {
        self.set_state(SessionState::Failed);
        tracing::warn!(error = %error, retryable = error.is_retryable(), "sync session failed");
        let mut stats = self.stats.write();
        stats.sessions_failed += 1;
        stats.last_success = Some(false);
        stats.last_errors = error.messages();
        stats.last_session_at = Some(Instant::now());
        drop(stats);
        self.set_state(SessionState::Idle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use tidesync_core::{
        EntitySchema, FieldType, MemoryObjectStore, PlaintextCipher, Record, SchemaRegistry,
    };
    use tidesync_protocol::SyncResponse;

    fn engine() -> (SyncEngine<Arc<MockTransport>>, Arc<MockTransport>, Arc<MemoryObjectStore>) {
        let schema = Arc::new(SchemaRegistry::new());
        schema.register(EntitySchema::builder("Person").field("name", FieldType::Text).build());
        let objects = Arc::new(MemoryObjectStore::new(schema));
        let transport = Arc::new(MockTransport::new());
        let engine = SyncEngine::new(
            SyncConfig::new("app", "device", "key", "http://localhost"),
            Arc::clone(&transport),
            Arc::new(SyncStore::open_in_memory().unwrap()),
            objects.clone(),
            Arc::new(PlaintextCipher),
        );
        (engine, transport, objects)
    }

    #[test]
    fn session_state_checks() {
        assert!(!SessionState::Idle.is_active());
        assert!(SessionState::AwaitingResponse.is_active());
        assert!(SessionState::ApplyingResponse.is_active());
        assert!(SessionState::Idle.can_start_sync());
        assert!(SessionState::Failed.can_start_sync());
        assert!(!SessionState::BuildingRequest.can_start_sync());
    }

    #[test]
    fn sync_engine_initial_state() {
        let (engine, _, _) = engine();
        assert_eq!(engine.state(), SessionState::Idle);
        assert!(!engine.is_syncing());
        let stats = engine.stats();
        assert_eq!(stats.sessions_attempted, 0);
        assert_eq!(stats.last_success, None);
    }

    #[test]
    fn successful_session_uploads_and_clears() {
        let (engine, transport, objects) = engine();
        let mut person = Record::new("Person", "P1").with_field("name", "Bob");
        engine
            .store()
            .commit_tracked(&*objects, &mut person, &PlaintextCipher)
            .unwrap();
        transport.push_response(SyncResponse::success(vec![]));

        let report = engine.sync_now().unwrap();
        assert_eq!(report.uploaded, 1);
        assert_eq!(engine.store().pending_changes(), 0);
        assert_eq!(engine.state(), SessionState::Idle);

        let sent = transport.last_request().unwrap();
        assert_eq!(sent.changes.len(), 1);
        assert_eq!(sent.changes[0].record_id, "P1");
        assert_eq!(engine.stats().changes_uploaded, 1);
    }

    #[test]
    fn failed_exchange_keeps_changes() {
        let (engine, transport, objects) = engine();
        let mut person = Record::new("Person", "P1").with_field("name", "Bob");
        engine
            .store()
            .commit_tracked(&*objects, &mut person, &PlaintextCipher)
            .unwrap();
        transport.push_error(SyncError::Timeout);

        assert!(matches!(engine.sync_now(), Err(SyncError::Timeout)));
        assert_eq!(engine.state(), SessionState::Idle);
        assert_eq!(engine.store().pending_changes(), 1);

        let stats = engine.stats();
        assert_eq!(stats.sessions_failed, 1);
        assert_eq!(stats.last_success, Some(false));
        assert_eq!(stats.last_errors, vec!["exchange timed out".to_string()]);
    }

    #[test]
    fn rejected_exchange_reports_errors() {
        let (engine, transport, _) = engine();
        transport.push_response(SyncResponse::failure(vec!["invalid key".into()]));

        let err = engine.sync_now().unwrap_err();
        assert!(matches!(err, SyncError::Application { .. }));
        assert_eq!(engine.stats().last_errors, vec!["invalid key".to_string()]);
    }

    #[test]
    fn success_clears_last_errors() {
        let (engine, transport, _) = engine();
        transport.push_error(SyncError::transport_retryable("offline"));
        transport.push_response(SyncResponse::success(vec![]));

        assert!(engine.tick().is_err());
        assert!(engine.tick().unwrap().is_some());
        let stats = engine.stats();
        assert_eq!(stats.sessions_attempted, 2);
        assert_eq!(stats.sessions_succeeded, 1);
        assert_eq!(stats.last_success, Some(true));
        assert!(stats.last_errors.is_empty());
    }
}
