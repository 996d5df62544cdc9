//! Per-unit event dispatch.
//!
//! Events are handled one at a time to completion. Every failure is
//! classified: transient ones are queued for replay, anything else is
//! reported and, where the operator must act, shown as a blocked status.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, instrument, warn};

use shoal_backup::{format_backup_table, BackupCoordinator};
use shoal_credentials::{parse_scope, CredentialManager};
use shoal_membership::{ReconcileOutcome, Reconfigurator, RequestOutcome};
use shoal_provision::{ProvisionOutcome, RelationUserProvisioner, ShardingCoordinator};
use shoal_tls::{CertificateCoordinator, FallbackPolicy};
use shoal_topology::{LeaderLease, TopologyStore};
use shoal_types::{
    CertScope, CertificateDelivery, DataBag, ErrorClass, EventSource, RelationId,
    RelationPayload, RelationUser, S3Credentials, Secret, ShoalEvent, UnitId, UnitStatus,
};

use crate::audit::EventAggregator;
use crate::error::{ControlError, Result};
use crate::event::{
    ActionFailure, ActionRequest, ActionResponse, EventOutcome, LifecycleEvent, Publication,
    RelationChange, RelationEvent,
};
use crate::retry::{Deferral, RetryQueue};
use crate::status::{Condition, StatusBoard};

const WAITING_FOR_RECONFIGURE: &str = "waiting to reconfigure replica set";

fn publications(bags: impl IntoIterator<Item = (RelationId, DataBag)>) -> Vec<Publication> {
    bags.into_iter()
        .map(|(relation_id, data)| Publication { relation_id, data })
        .collect()
}

/// Status slot a failed event reports into.
fn condition_for(event: &LifecycleEvent) -> Condition {
    match event {
        LifecycleEvent::LeaderElected
        | LifecycleEvent::PeerJoined { .. }
        | LifecycleEvent::PeerDeparted { .. }
        | LifecycleEvent::StorageDetaching => Condition::Membership,
        LifecycleEvent::Relation(ev) => match ev.payload {
            RelationPayload::TlsCertificates(_) => Condition::Certificates,
            RelationPayload::S3(_) => Condition::Backup,
            _ => Condition::ClientRelations,
        },
        LifecycleEvent::Start | LifecycleEvent::UpdateStatus | LifecycleEvent::Action(_) => {
            Condition::Retries
        }
    }
}

/// One member's control loop.
pub struct UnitAgent {
    pub(crate) unit: UnitId,
    pub(crate) address: String,
    pub(crate) store: Arc<dyn TopologyStore>,
    pub(crate) membership: Reconfigurator,
    pub(crate) credentials: Arc<CredentialManager>,
    pub(crate) provisioner: RelationUserProvisioner,
    pub(crate) sharding: ShardingCoordinator,
    pub(crate) certificates: CertificateCoordinator,
    pub(crate) backups: BackupCoordinator,
    pub(crate) events: EventAggregator,
    pub(crate) retries: Mutex<RetryQueue>,
    pub(crate) board: Mutex<StatusBoard>,
}

impl UnitAgent {
    pub fn unit(&self) -> &UnitId {
        &self.unit
    }

    pub fn events(&self) -> &EventAggregator {
        &self.events
    }

    pub fn status(&self) -> UnitStatus {
        self.board().current()
    }

    pub fn pending_retries(&self) -> usize {
        self.queue().len()
    }

    fn board(&self) -> MutexGuard<'_, StatusBoard> {
        self.board.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn queue(&self) -> MutexGuard<'_, RetryQueue> {
        self.retries.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn emit(&self, source: EventSource, event: ShoalEvent) {
        self.events.emit_info(&self.unit, source, event);
    }

    /// The current lease, if this unit holds it.
    async fn lease(&self) -> Result<Option<LeaderLease>> {
        Ok(self
            .store
            .current_lease()
            .await?
            .filter(|lease| lease.holder == self.unit))
    }

    /// Handle one event to completion.
    pub async fn handle(&self, event: LifecycleEvent) -> EventOutcome {
        self.run(event, 1, Utc::now()).await
    }

    /// Replay deferred events that are due at `now`.
    pub async fn process_retries(&self, now: DateTime<Utc>) -> Vec<EventOutcome> {
        let due = self.queue().due(now);
        let mut outcomes = Vec::with_capacity(due.len());
        for pending in due {
            debug!(
                event = %pending.event.name(),
                attempt = pending.attempt + 1,
                "Replaying deferred event"
            );
            outcomes.push(self.run(pending.event, pending.attempt + 1, now).await);
        }
        outcomes
    }

    #[instrument(skip(self, event, now), fields(unit = %self.unit, event = %event.name()))]
    async fn run(&self, event: LifecycleEvent, attempt: u32, now: DateTime<Utc>) -> EventOutcome {
        if let LifecycleEvent::Action(request) = &event {
            let result = self.act(request).await.map_err(|err| {
                warn!(error = %err, "Action failed");
                ActionFailure {
                    class: err.class(),
                    message: err.to_string(),
                }
            });
            return EventOutcome::Action(result);
        }

        match self.dispatch(&event).await {
            Ok(publications) => {
                if attempt > 1 {
                    info!(attempt, "Deferred event handled");
                    self.board().clear(Condition::Retries);
                }
                EventOutcome::Handled { publications }
            }
            Err(err) => self.fail(event, attempt, err, now),
        }
    }

    fn fail(
        &self,
        event: LifecycleEvent,
        attempt: u32,
        err: ControlError,
        now: DateTime<Utc>,
    ) -> EventOutcome {
        let class = err.class();
        let message = err.to_string();
        let name = event.name();

        if class.is_retryable() {
            let condition = condition_for(&event);
            let deferral = self.queue().defer(event, attempt, message.clone(), now);
            match deferral {
                Deferral::Scheduled { attempt, retry_at } => {
                    info!(attempt, %retry_at, reason = %message, "Event deferred");
                    self.events.emit_warning(
                        &self.unit,
                        EventSource::Control,
                        ShoalEvent::EventDeferred {
                            event: name,
                            attempt,
                            reason: message.clone(),
                        },
                    );
                    return EventOutcome::Deferred {
                        reason: message,
                        attempt,
                        retry_at,
                    };
                }
                Deferral::Exhausted { attempts } => {
                    error!(attempts, reason = %message, "Event dropped after repeated deferrals");
                    self.board().set(
                        condition,
                        UnitStatus::Blocked(format!("{} failed after {} attempts", name, attempts)),
                    );
                }
            }
        } else {
            warn!(class = ?class, reason = %message, "Event failed");
            if matches!(
                class,
                ErrorClass::SafetyViolation | ErrorClass::MissingDependency
            ) {
                self.board()
                    .set(condition_for(&event), UnitStatus::Blocked(message.clone()));
            }
        }

        self.events.emit_error(
            &self.unit,
            EventSource::Control,
            ShoalEvent::EventFailed {
                event: name,
                reason: message.clone(),
            },
        );
        EventOutcome::Failed { class, message }
    }

    async fn dispatch(&self, event: &LifecycleEvent) -> Result<Vec<Publication>> {
        let lease = self.lease().await?;
        let lease = lease.as_ref();
        match event {
            LifecycleEvent::LeaderElected => self.on_leader_elected(lease).await,
            LifecycleEvent::Start => self.on_start().await,
            LifecycleEvent::PeerJoined { unit, address } => {
                self.on_peer_joined(lease, unit, address).await
            }
            LifecycleEvent::PeerDeparted { unit } => self.on_peer_departed(lease, unit).await,
            LifecycleEvent::StorageDetaching => {
                self.membership.prepare_departure().await?;
                Ok(Vec::new())
            }
            LifecycleEvent::Relation(ev) => self.on_relation(lease, ev).await,
            LifecycleEvent::UpdateStatus => self.on_update_status(lease).await,
            LifecycleEvent::Action(_) => Ok(Vec::new()),
        }
    }

    async fn on_leader_elected(&self, lease: Option<&LeaderLease>) -> Result<Vec<Publication>> {
        let Some(lease) = lease else {
            debug!("Leadership is elsewhere");
            return Ok(Vec::new());
        };
        self.emit(
            EventSource::Control,
            ShoalEvent::LeaderElected {
                unit: self.unit.clone(),
                epoch: lease.epoch,
            },
        );

        self.credentials.ensure_generated(lease).await?;
        if self.membership.bootstrap(lease, &self.address).await? {
            let name = self
                .store
                .load()
                .await?
                .value
                .replica_set
                .map(|rs| rs.name)
                .unwrap_or_default();
            self.emit(EventSource::Membership, ShoalEvent::ReplicaSetInitiated { name });
        }
        let count = self.credentials.bootstrap_users(lease).await?;
        if count > 0 {
            self.emit(EventSource::Credentials, ShoalEvent::InternalUsersCreated { count });
        }

        self.reconcile(lease).await?;
        Ok(publications(self.provisioner.refresh_endpoints(lease).await?))
    }

    async fn on_start(&self) -> Result<Vec<Publication>> {
        let mut data = self.store.load_unit(&self.unit).await?.unwrap_or_default();
        if data.address != self.address {
            data.address = self.address.clone();
            self.store.commit_unit(&self.unit, &data).await?;
            info!(address = %self.address, "Unit address recorded");
        }
        Ok(Vec::new())
    }

    fn record_reconcile(&self, outcome: ReconcileOutcome) {
        match outcome {
            ReconcileOutcome::Converged { version } => {
                let was_pending = self.board().get(Condition::Membership).is_some();
                self.board().clear(Condition::Membership);
                if was_pending {
                    self.emit(
                        EventSource::Membership,
                        ShoalEvent::MembershipConverged { version },
                    );
                }
            }
            ReconcileOutcome::Pending { reason } => {
                debug!(reason = %reason, "Membership not converged");
                self.board().set(
                    Condition::Membership,
                    UnitStatus::Waiting(WAITING_FOR_RECONFIGURE.into()),
                );
                self.emit(
                    EventSource::Membership,
                    ShoalEvent::ReconfigurationPending { reason },
                );
            }
        }
    }

    fn record_request(&self, outcome: RequestOutcome) {
        match outcome {
            RequestOutcome::Queued { position } => {
                info!(position, "Membership change queued");
                self.board().set(
                    Condition::Membership,
                    UnitStatus::Waiting(WAITING_FOR_RECONFIGURE.into()),
                );
            }
            RequestOutcome::Reconciled(outcome) => self.record_reconcile(outcome),
        }
    }

    async fn reconcile(&self, lease: &LeaderLease) -> Result<()> {
        let outcome = self.membership.reconcile(lease).await?;
        self.record_reconcile(outcome);
        Ok(())
    }

    async fn on_peer_joined(
        &self,
        lease: Option<&LeaderLease>,
        unit: &UnitId,
        address: &str,
    ) -> Result<Vec<Publication>> {
        let Some(lease) = lease else {
            return Ok(Vec::new());
        };
        let outcome = self.membership.request_join(lease, unit, address, true).await?;
        self.record_request(outcome);
        Ok(publications(self.provisioner.refresh_endpoints(lease).await?))
    }

    async fn on_peer_departed(
        &self,
        lease: Option<&LeaderLease>,
        unit: &UnitId,
    ) -> Result<Vec<Publication>> {
        let Some(lease) = lease else {
            return Ok(Vec::new());
        };
        let units = BTreeSet::from([unit.clone()]);
        let outcome = self.membership.request_leave(lease, &units, true).await?;
        if matches!(
            outcome,
            RequestOutcome::Reconciled(ReconcileOutcome::Converged { .. })
        ) {
            self.store.remove_unit(unit).await?;
        }
        self.record_request(outcome);
        Ok(publications(self.provisioner.refresh_endpoints(lease).await?))
    }

    async fn on_relation(
        &self,
        lease: Option<&LeaderLease>,
        ev: &RelationEvent,
    ) -> Result<Vec<Publication>> {
        let id = ev.relation_id;
        // Relations every unit acts on.
        match &ev.payload {
            RelationPayload::TlsCertificates(delivery) => {
                return self.on_certificates(lease, ev.change, delivery.as_ref()).await;
            }
            RelationPayload::S3(credentials) => {
                return self.on_storage(lease, ev.change, credentials.clone()).await;
            }
            RelationPayload::CosAgent => {
                debug!(relation = %id, "Metrics relation acknowledged");
                return Ok(Vec::new());
            }
            _ => {}
        }

        let Some(lease) = lease else {
            debug!(relation = %id, "Not the leader, ignoring relation event");
            return Ok(Vec::new());
        };
        let broken = ev.change == RelationChange::Broken;
        match &ev.payload {
            RelationPayload::MongodbClient(_) if broken => {
                let username = RelationUser::username_for(id);
                if self.provisioner.on_relation_broken(lease, id).await? {
                    self.emit(
                        EventSource::Provisioner,
                        ShoalEvent::RelationUserRevoked {
                            relation_id: id,
                            username,
                        },
                    );
                }
                self.board().clear(Condition::ClientRelations);
                Ok(Vec::new())
            }
            RelationPayload::MongodbClient(request) => {
                let existed = self
                    .store
                    .load()
                    .await?
                    .value
                    .relation_users
                    .contains_key(&id);
                let outcome = self.provisioner.on_relation_joined(lease, id, request).await?;
                self.board().clear(Condition::ClientRelations);
                match outcome {
                    ProvisionOutcome::Provisioned(info) => {
                        if !existed {
                            self.emit(
                                EventSource::Provisioner,
                                ShoalEvent::RelationUserCreated {
                                    relation_id: id,
                                    username: info.username.clone(),
                                },
                            );
                        }
                        Ok(vec![Publication {
                            relation_id: id,
                            data: info.to_databag(),
                        }])
                    }
                    ProvisionOutcome::Waiting => Ok(Vec::new()),
                }
            }
            RelationPayload::LegacyClient { .. } if broken => {
                self.provisioner.on_legacy_broken(lease, id).await?;
                self.board().clear(Condition::ClientRelations);
                Ok(Vec::new())
            }
            RelationPayload::LegacyClient { database } => {
                let info = self
                    .provisioner
                    .on_legacy_joined(lease, id, database.as_deref())
                    .await?;
                self.board().clear(Condition::ClientRelations);
                self.emit(
                    EventSource::Provisioner,
                    ShoalEvent::LegacyRelationJoined { relation_id: id },
                );
                Ok(vec![Publication {
                    relation_id: id,
                    data: info.to_databag(),
                }])
            }
            RelationPayload::Shard(_) if broken => {
                if let Some(name) = self.sharding.on_shard_broken(lease, id).await? {
                    self.emit(EventSource::Provisioner, ShoalEvent::ShardRemoved { name });
                }
                Ok(Vec::new())
            }
            RelationPayload::Shard(announcement) => {
                let handshake = self.sharding.handshake_for(lease, id).await?;
                if let Some(announcement) = announcement {
                    if self.sharding.on_shard_announced(lease, id, announcement).await? {
                        self.emit(
                            EventSource::Provisioner,
                            ShoalEvent::ShardAdded {
                                name: announcement.shard_name.clone(),
                            },
                        );
                    }
                }
                let mut data = DataBag::new();
                data.insert(
                    "operator-password".into(),
                    handshake.operator_password.expose().to_string(),
                );
                data.insert("key-file".into(), handshake.keyfile.expose().to_string());
                Ok(vec![Publication { relation_id: id, data }])
            }
            RelationPayload::ConfigServer(_) if broken => Ok(Vec::new()),
            RelationPayload::ConfigServer(handshake) => {
                if let Some(handshake) = handshake {
                    self.sharding.adopt_handshake(lease, handshake).await?;
                }
                let Some(announcement) = self.sharding.announcement().await? else {
                    return Ok(Vec::new());
                };
                let mut data = DataBag::new();
                data.insert("shard-name".into(), announcement.shard_name);
                data.insert("hosts".into(), announcement.hosts.join(","));
                Ok(vec![Publication { relation_id: id, data }])
            }
            RelationPayload::TlsCertificates(_)
            | RelationPayload::S3(_)
            | RelationPayload::CosAgent => Ok(Vec::new()),
        }
    }

    async fn on_certificates(
        &self,
        lease: Option<&LeaderLease>,
        change: RelationChange,
        delivery: Option<&CertificateDelivery>,
    ) -> Result<Vec<Publication>> {
        if change == RelationChange::Broken {
            let policy = self.certificates.on_certificates_removed(lease).await?;
            self.emit(
                EventSource::Certificates,
                ShoalEvent::CertificateRemoved {
                    scope: CertScope::External,
                },
            );
            match policy {
                FallbackPolicy::Block => self.board().set(
                    Condition::Certificates,
                    UnitStatus::Blocked("certificates relation removed".into()),
                ),
                FallbackPolicy::Unsecured => self.board().clear(Condition::Certificates),
            }
            return Ok(Vec::new());
        }

        self.board().clear(Condition::Certificates);
        for scope in self.certificates.on_relation_available(lease).await? {
            self.emit(EventSource::Certificates, ShoalEvent::CertificateRequested { scope });
        }
        if let Some(delivery) = delivery {
            if let Some(scope) = self
                .certificates
                .on_certificate_available(lease, delivery)
                .await?
            {
                self.emit(EventSource::Certificates, ShoalEvent::CertificateIssued { scope });
            }
        }
        Ok(Vec::new())
    }

    async fn on_storage(
        &self,
        lease: Option<&LeaderLease>,
        change: RelationChange,
        credentials: Option<S3Credentials>,
    ) -> Result<Vec<Publication>> {
        let broken = change == RelationChange::Broken;
        if let Some(lease) = lease {
            let credentials = if broken { None } else { credentials };
            self.backups.set_storage_credentials(lease, credentials).await?;
        }
        if !broken {
            self.backups.sync_storage().await?;
        }
        self.board().clear(Condition::Backup);
        Ok(Vec::new())
    }

    async fn on_update_status(&self, lease: Option<&LeaderLease>) -> Result<Vec<Publication>> {
        let mut published = Vec::new();
        if let Some(lease) = lease {
            for unit in self.membership.remove_departing(lease).await? {
                self.emit(EventSource::Membership, ShoalEvent::MemberDeparting { unit });
            }
            self.reconcile(lease).await?;
            let completed = self.backups.refresh(lease).await?;
            if !completed.is_empty() {
                let state = self.store.load().await?.value;
                for id in completed {
                    if let Some(record) = state.backups.get(&id) {
                        self.emit(
                            EventSource::Backup,
                            ShoalEvent::BackupCompleted {
                                id,
                                status: record.status,
                            },
                        );
                    }
                }
            }
            published = publications(self.provisioner.refresh_endpoints(lease).await?);
        }

        for scope in self.certificates.check_expiry(lease, Utc::now()).await? {
            self.emit(EventSource::Certificates, ShoalEvent::CertificateRequested { scope });
        }
        self.backups.sync_storage().await?;

        match self.membership.primary().await? {
            Some(primary) if primary == self.unit => self.board().set(
                Condition::Role,
                UnitStatus::Active("Replica set primary".into()),
            ),
            _ => self.board().clear(Condition::Role),
        }
        Ok(published)
    }

    async fn act(&self, request: &ActionRequest) -> Result<ActionResponse> {
        let lease = self.lease().await?;
        let leader = || lease.as_ref().ok_or(ControlError::NotLeader);

        match request {
            ActionRequest::GetPrimary => {
                let primary = self.membership.primary().await?;
                Ok(ActionResponse::new().with(
                    "replica-set-primary",
                    primary.map_or_else(|| "None".to_string(), |u| u.to_string()),
                ))
            }
            ActionRequest::GetPassword { username } => {
                let secret = self
                    .credentials
                    .get(username.as_deref().unwrap_or("operator"))
                    .await?;
                Ok(ActionResponse::new().with("password", secret.expose()))
            }
            ActionRequest::SetPassword { username, password } => {
                let lease = leader()?;
                let scope = parse_scope(username.as_deref().unwrap_or("operator"))?;
                let rotated = self
                    .credentials
                    .rotate(lease, scope, password.clone().map(Secret::new))
                    .await?;
                self.emit(
                    EventSource::Credentials,
                    ShoalEvent::CredentialRotated {
                        scope,
                        generation: rotated.generation,
                    },
                );
                Ok(ActionResponse::new()
                    .with("password", rotated.secret.expose())
                    .with("generation", rotated.generation.to_string()))
            }
            ActionRequest::CreateBackup => {
                let id = self.backups.create(leader()?).await?;
                self.emit(EventSource::Backup, ShoalEvent::BackupStarted { id: id.clone() });
                Ok(ActionResponse::new()
                    .with("backup-status", "backup started")
                    .with("backup-id", id.to_string()))
            }
            ActionRequest::ListBackups => {
                let records = self.backups.list().await?;
                Ok(ActionResponse::new().with("backups", format_backup_table(&records)))
            }
            ActionRequest::Restore {
                backup_id,
                remap_pattern,
            } => {
                let record = self
                    .backups
                    .restore(leader()?, backup_id, remap_pattern.as_deref())
                    .await?;
                self.emit(
                    EventSource::Backup,
                    ShoalEvent::RestoreStarted {
                        id: record.backup_id,
                    },
                );
                Ok(ActionResponse::new().with("restore-status", "restore started"))
            }
            ActionRequest::SetTlsPrivateKey {
                external_key,
                internal_key,
            } => {
                if internal_key.is_some() {
                    leader()?;
                }
                let lease = lease.as_ref();
                let external = self
                    .certificates
                    .set_private_key(
                        lease,
                        CertScope::External,
                        external_key.clone().map(Secret::new),
                    )
                    .await?;
                self.emit(
                    EventSource::Certificates,
                    ShoalEvent::CertificateRequested {
                        scope: CertScope::External,
                    },
                );
                let mut response =
                    ActionResponse::new().with("external", external.state.to_string());
                if lease.is_some() {
                    let internal = self
                        .certificates
                        .set_private_key(
                            lease,
                            CertScope::Internal,
                            internal_key.clone().map(Secret::new),
                        )
                        .await?;
                    self.emit(
                        EventSource::Certificates,
                        ShoalEvent::CertificateRequested {
                            scope: CertScope::Internal,
                        },
                    );
                    response = response.with("internal", internal.state.to_string());
                }
                Ok(response)
            }
        }
    }
}
