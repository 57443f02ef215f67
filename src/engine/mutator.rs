use std::sync::Arc;

use uuid::Uuid;

use super::apply::{apply_shorthand, plan_embedded};
use super::options::{
    DeltaCallback, DismissOutcome, MutateOptions, MutationCallbacks, MutationOutcome, MutationReport,
    RevertOutcome,
};
use super::MutationError;
use crate::authority::{Capability, ChangeKind, ChangeSet, PermissionCheck, RemoteAuthority};
use crate::config::WorkflowOverrides;
use crate::diff::{invert, Shorthand, Validators};
use crate::document::{DocumentStore, Instance, InstanceId, PeerId, StoreError, Subject};
use crate::events::{Event, EventKind};
use crate::protocol::{DismissRequest, Message, MutateRequest, RevertRequest};
use crate::queue::UpdateQueue;
use crate::rollback::{RollbackEntry, RollbackStack};

/// Capabilities needed to apply `shorthand`.
pub fn required_capabilities(shorthand: &Shorthand) -> Vec<Capability> {
    let mut required = Vec::new();
    if !shorthand.root.is_empty() {
        required.push(Capability::EditSubject);
    }
    if !shorthand.placement.is_empty() {
        required.push(Capability::EditPlacement);
    }
    if shorthand.embedded.values().any(|changes| !changes.is_empty()) {
        required.push(Capability::EditEmbedded);
    }
    required
}

fn generate_name() -> String {
    format!("mutation-{}", Uuid::new_v4().simple())
}

/// What a queued commit needs to record a mutation.
struct PendingEntry {
    user: PeerId,
    name: String,
    options: MutateOptions,
    edit: Option<DeltaCallback>,
}

fn build_entry(
    user: PeerId,
    name: &str,
    delta: Shorthand,
    options: &MutateOptions,
) -> Option<RollbackEntry> {
    if options.permanent {
        return None;
    }
    Some(
        RollbackEntry::new(user, name, delta)
            .with_update_options(options.update_options.clone())
            .with_overrides(options.overrides.clone())
            .with_description(options.description.clone()),
    )
}

/// Applies, records and reverts mutations for one peer.
pub struct MutationEngine {
    store: Arc<dyn DocumentStore>,
    stack: RollbackStack,
    queue: UpdateQueue,
    authority: Arc<RemoteAuthority>,
    permissions: Arc<dyn PermissionCheck>,
    validators: Validators,
}

impl MutationEngine {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        queue: UpdateQueue,
        authority: Arc<RemoteAuthority>,
        permissions: Arc<dyn PermissionCheck>,
    ) -> Self {
        let stack = RollbackStack::new(Arc::clone(&store), authority.settings().flag_key.clone());
        Self {
            store,
            stack,
            queue,
            authority,
            permissions,
            validators: Validators::new(),
        }
    }

    pub fn with_validators(mut self, validators: Validators) -> Self {
        self.validators = validators;
        self
    }

    pub fn authority(&self) -> &Arc<RemoteAuthority> {
        &self.authority
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn queue(&self) -> &UpdateQueue {
        &self.queue
    }

    fn local(&self) -> PeerId {
        self.authority.local_peer()
    }

    fn default_comparison_key(&self) -> &str {
        &self.authority.settings().default_comparison_key
    }

    /// The rollback stack of the Subject behind `instance`, bottom first.
    pub async fn stack(&self, instance: InstanceId) -> Result<Vec<RollbackEntry>, MutationError> {
        let instance = self.store.instance(instance).await?;
        Ok(self.stack.entries(instance.subject_id).await?)
    }

    fn check_permissions(&self, required: &[Capability]) -> Result<(), MutationError> {
        let missing = self.permissions.check(self.local(), required);
        if missing.is_empty() {
            Ok(())
        } else {
            log::info!("{} lacks {:?}", self.local(), missing);
            Err(MutationError::Permission { missing })
        }
    }

    async fn load(&self, instance: InstanceId) -> Result<(Instance, Subject), MutationError> {
        let instance = self.store.instance(instance).await?;
        let subject = self.store.subject(instance.subject_id).await?;
        Ok((instance, subject))
    }

    /// Load the instance if this peer knows it. Unknown instances are not
    /// an error for request handlers; some other peer owns them.
    async fn load_known(&self, instance: InstanceId) -> Result<Option<(Instance, Subject)>, MutationError> {
        match self.load(instance).await {
            Ok(loaded) => Ok(Some(loaded)),
            Err(MutationError::Store(StoreError::InstanceNotFound(_))) => Ok(None),
            Err(e) => Err(e),
        }
    }

    // ------------------------------------------------------------------
    // Mutate
    // ------------------------------------------------------------------

    /// Mutate through a copy of `shorthand`; the caller's value is untouched.
    pub async fn mutate_copy(
        &self,
        instance: InstanceId,
        shorthand: &Shorthand,
        callbacks: MutationCallbacks,
        options: MutateOptions,
    ) -> Result<MutationOutcome, MutationError> {
        let mut owned = shorthand.clone();
        self.mutate_owned(instance, &mut owned, callbacks, options).await
    }

    /// Mutate using `shorthand` in place. Edits made by the `pre` callback
    /// and resolved comparison keys remain visible to the caller.
    pub async fn mutate_owned(
        &self,
        instance_id: InstanceId,
        shorthand: &mut Shorthand,
        callbacks: MutationCallbacks,
        mut options: MutateOptions,
    ) -> Result<MutationOutcome, MutationError> {
        self.check_permissions(&required_capabilities(shorthand))?;

        let (instance, subject) = self.load(instance_id).await?;
        if let Some(pre) = callbacks.pre {
            pre(shorthand, &subject);
        }
        self.fill_comparison_keys(shorthand);

        let name = options.name.get_or_insert_with(generate_name).clone();
        let authority = self.authority.require_authority(&subject, instance_id)?;

        if !options.permanent && self.stack.contains(subject.id, &name).await? {
            return Err(MutationError::DuplicateName(name));
        }

        if authority == self.local() {
            let pending = PendingEntry {
                user: self.local(),
                name: name.clone(),
                options,
                edit: callbacks.delta,
            };
            let report = match self.commit_mutation(&instance, shorthand.clone(), pending).await? {
                Some(report) => report,
                None => return Ok(MutationOutcome::Aborted),
            };
            if let Some(post) = callbacks.post {
                post(report.entry.as_ref());
            }
            self.emit_lifecycle(EventKind::Mutate, &instance, self.local(), &name, report.entry.as_ref())
                .await;
            return Ok(MutationOutcome::Committed(report));
        }

        // The authority records what this peer observed
        let mut delta = match options.delta.take() {
            Some(delta) => delta,
            None => invert(&subject, &instance, shorthand, self.default_comparison_key()),
        };
        if let Some(edit) = callbacks.delta {
            if !edit(&mut delta, &subject) {
                log::info!("Mutation {} on {} aborted by delta callback", name, instance_id);
                return Ok(MutationOutcome::Aborted);
            }
        }

        log::debug!("Forwarding {} on {} to {}", name, instance_id, authority);
        options.delta = Some(delta);
        let request = MutateRequest {
            scene_id: instance.scene_id,
            user_id: self.local(),
            instance_id,
            name: name.clone(),
            shorthand: shorthand.clone(),
            options,
        };
        let response = self
            .authority
            .request(
                Message::RequestMutate(request),
                EventKind::MutateResponse,
                instance_id,
                &name,
            )
            .await?;

        if response.accepted {
            if let Some(post) = callbacks.post {
                post(response.entry.as_ref());
            }
        } else {
            log::info!("{} rejected {} on {}", response.responder, name, instance_id);
        }
        Ok(MutationOutcome::Remote(response))
    }

    fn fill_comparison_keys(&self, shorthand: &mut Shorthand) {
        let default = self.default_comparison_key().to_string();
        let collections: Vec<String> = shorthand.embedded.keys().cloned().collect();
        for collection in collections {
            shorthand
                .config
                .comparison_keys
                .entry(collection)
                .or_insert_with(|| default.clone());
        }
    }

    /// Derive the delta, write the shorthand and push the entry as one job
    /// on the Subject's lane. `None` means the delta callback declined.
    ///
    /// The Subject and Instance are re-read inside the job, so a delta
    /// derived here always describes the state this write replaces. The
    /// entry is pushed only once every write has landed.
    async fn commit_mutation(
        &self,
        instance: &Instance,
        shorthand: Shorthand,
        pending: PendingEntry,
    ) -> Result<Option<MutationReport>, MutationError> {
        let store = Arc::clone(&self.store);
        let stack = self.stack.clone();
        let validators = self.validators.clone();
        let default_key = self.default_comparison_key().to_string();
        let instance_id = instance.id;
        let subject_id = instance.subject_id;

        self.queue
            .run(&subject_id.to_string(), async move {
                let PendingEntry {
                    user,
                    name,
                    mut options,
                    edit,
                } = pending;
                let subject = store.subject(subject_id).await?;
                let instance = store.instance(instance_id).await?;

                if !options.permanent && stack.contains(subject.id, &name).await? {
                    return Err(MutationError::DuplicateName(name));
                }

                let mut delta = match options.delta.take() {
                    Some(delta) => delta,
                    None => invert(&subject, &instance, &shorthand, &default_key),
                };
                if let Some(edit) = edit {
                    if !edit(&mut delta, &subject) {
                        log::info!("Mutation {} on {} aborted by delta callback", name, instance_id);
                        return Ok(None);
                    }
                }

                let plan = plan_embedded(&subject, &shorthand, &validators, &default_key);
                let mut entry = build_entry(user, &name, delta, &options);
                if let Some(entry) = entry.as_mut() {
                    entry
                        .delta
                        .embedded
                        .retain(|collection, _| !plan.is_skipped(collection));
                }

                let skipped_collections = plan.skipped.clone();
                apply_shorthand(store.as_ref(), &instance, &shorthand, plan).await?;
                if let Some(entry) = &entry {
                    stack.push(subject.id, entry.clone()).await?;
                }
                Ok::<_, MutationError>(Some(MutationReport {
                    entry,
                    skipped_collections,
                }))
            })
            .await?
    }

    // ------------------------------------------------------------------
    // Revert
    // ------------------------------------------------------------------

    /// Revert the named entry, or the most recent one.
    pub async fn revert(
        &self,
        instance: InstanceId,
        name: Option<&str>,
    ) -> Result<RevertOutcome, MutationError> {
        self.revert_with(instance, name, WorkflowOverrides::default()).await
    }

    pub async fn revert_with(
        &self,
        instance_id: InstanceId,
        name: Option<&str>,
        overrides: WorkflowOverrides,
    ) -> Result<RevertOutcome, MutationError> {
        self.check_permissions(&[Capability::Revert])?;

        let (instance, subject) = self.load(instance_id).await?;
        let authority = self.authority.require_authority(&subject, instance_id)?;

        if authority == self.local() {
            return match self.commit_revert(&instance, name.map(str::to_string)).await? {
                Some(report) => {
                    if let Some(entry) = &report.entry {
                        self.emit_lifecycle(EventKind::Revert, &instance, self.local(), &entry.name, Some(entry))
                            .await;
                    }
                    Ok(RevertOutcome::Reverted(report))
                }
                None => Ok(RevertOutcome::NothingToRevert),
            };
        }

        // Responses are correlated by name, so resolve "most recent" here
        let target = match name {
            Some(name) => self.stack.find(subject.id, name).await?,
            None => self.stack.entries(subject.id).await?.pop(),
        };
        let target = match target {
            Some(entry) => entry.name,
            None => return Ok(RevertOutcome::NothingToRevert),
        };

        log::debug!("Forwarding revert of {} on {} to {}", target, instance_id, authority);
        let request = RevertRequest {
            scene_id: instance.scene_id,
            user_id: self.local(),
            instance_id,
            name: target.clone(),
            overrides,
        };
        let response = self
            .authority
            .request(
                Message::RequestRevert(request),
                EventKind::RevertResponse,
                instance_id,
                &target,
            )
            .await?;
        Ok(RevertOutcome::Remote(response))
    }

    /// Pop and apply an entry as one job on the Subject's lane.
    async fn commit_revert(
        &self,
        instance: &Instance,
        name: Option<String>,
    ) -> Result<Option<MutationReport>, MutationError> {
        let store = Arc::clone(&self.store);
        let stack = self.stack.clone();
        let validators = self.validators.clone();
        let default_key = self.default_comparison_key().to_string();
        let job_instance = instance.clone();

        self.queue
            .run(&instance.subject_id.to_string(), async move {
                let subject_id = job_instance.subject_id;
                let entry = match stack.pop(subject_id, name.as_deref()).await? {
                    Some(entry) => entry,
                    None => return Ok(None),
                };

                let subject = store.subject(subject_id).await?;
                let shorthand = entry.revert_shorthand();
                let plan = plan_embedded(&subject, &shorthand, &validators, &default_key);
                let skipped_collections = plan.skipped.clone();
                apply_shorthand(store.as_ref(), &job_instance, &shorthand, plan).await?;

                log::debug!("Reverted {} on {}", entry.name, subject.name);
                Ok::<_, MutationError>(Some(MutationReport {
                    entry: Some(entry),
                    skipped_collections,
                }))
            })
            .await?
    }

    // ------------------------------------------------------------------
    // Dismiss
    // ------------------------------------------------------------------

    /// Remove a placement, locally or through its authority.
    ///
    /// A dismissal owned by another peer is broadcast without a correlated
    /// answer. `Forwarded` only means the request was sent; watch for the
    /// `Dismiss` event to learn when the authority removed it.
    pub async fn dismiss(&self, instance_id: InstanceId) -> Result<DismissOutcome, MutationError> {
        self.check_permissions(&[Capability::Dismiss])?;

        let (instance, subject) = self.load(instance_id).await?;
        let authority = self.authority.require_authority(&subject, instance_id)?;
        if authority == self.local() {
            self.dismiss_local(&instance, self.local()).await?;
            return Ok(DismissOutcome::Dismissed);
        }

        let request = DismissRequest {
            scene_id: instance.scene_id,
            user_id: self.local(),
            instance_id,
        };
        self.authority.broadcast(&Message::Dismiss(request)).await?;
        Ok(DismissOutcome::Forwarded(authority))
    }

    async fn dismiss_local(&self, instance: &Instance, user: PeerId) -> Result<(), MutationError> {
        let store = Arc::clone(&self.store);
        let id = instance.id;
        self.queue
            .run(&instance.subject_id.to_string(), async move {
                store.delete_instance(id).await
            })
            .await??;

        let event = Event::new(EventKind::Dismiss, instance.scene_id, user).with_instance(instance.id);
        if let Err(e) = self.authority.emit(event).await {
            log::warn!("Failed to announce dismissal of {}: {}", instance.id, e);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Authority-side request handling
    // ------------------------------------------------------------------

    /// Act on a forwarded mutation if this peer is its authority.
    pub async fn handle_mutate_request(&self, request: MutateRequest) -> Result<(), MutationError> {
        let (instance, subject) = match self.load_known(request.instance_id).await? {
            Some(loaded) => loaded,
            None => return Ok(()),
        };
        if !self.authority.is_local_authority(&subject) {
            log::debug!("Ignoring {} on {}: not the authority", request.name, instance.id);
            return Ok(());
        }

        let change = ChangeSet {
            kind: ChangeKind::Mutate,
            instance_id: instance.id,
            subject_name: subject.name.clone(),
            requester: request.user_id,
            mutation: request.name.clone(),
            description: request.options.description.clone(),
            shorthand: request.shorthand.clone(),
        };
        if !self.authority.decide(&change, &request.options.overrides).await {
            log::info!("Rejected {} on {} from {}", request.name, instance.id, request.user_id);
            return self
                .respond(EventKind::MutateResponse, &instance, &request.name, false, None)
                .await;
        }

        let mut options = request.options;
        options.name = Some(request.name.clone());
        let pending = PendingEntry {
            user: request.user_id,
            name: request.name.clone(),
            options,
            edit: None,
        };

        match self.commit_mutation(&instance, request.shorthand, pending).await {
            Ok(Some(report)) => {
                self.emit_lifecycle(
                    EventKind::Mutate,
                    &instance,
                    request.user_id,
                    &request.name,
                    report.entry.as_ref(),
                )
                .await;
                self.respond(
                    EventKind::MutateResponse,
                    &instance,
                    &request.name,
                    true,
                    report.entry.as_ref(),
                )
                .await
            }
            Ok(None) => {
                self.respond(EventKind::MutateResponse, &instance, &request.name, false, None)
                    .await
            }
            Err(e) => {
                log::error!("Failed to commit {} on {}: {}", request.name, instance.id, e);
                self.respond(EventKind::MutateResponse, &instance, &request.name, false, None)
                    .await?;
                Err(e)
            }
        }
    }

    /// Act on a forwarded revert if this peer is its authority.
    pub async fn handle_revert_request(&self, request: RevertRequest) -> Result<(), MutationError> {
        let (instance, subject) = match self.load_known(request.instance_id).await? {
            Some(loaded) => loaded,
            None => return Ok(()),
        };
        if !self.authority.is_local_authority(&subject) {
            log::debug!("Ignoring revert of {} on {}: not the authority", request.name, instance.id);
            return Ok(());
        }

        let entry = match self.stack.find(subject.id, &request.name).await? {
            Some(entry) => entry,
            None => {
                log::info!("No entry {} on {} to revert", request.name, subject.name);
                return self
                    .respond(EventKind::RevertResponse, &instance, &request.name, false, None)
                    .await;
            }
        };

        let change = ChangeSet {
            kind: ChangeKind::Revert,
            instance_id: instance.id,
            subject_name: subject.name.clone(),
            requester: request.user_id,
            mutation: request.name.clone(),
            description: entry.description.clone(),
            shorthand: entry.delta.clone(),
        };
        if !self.authority.decide(&change, &request.overrides).await {
            return self
                .respond(EventKind::RevertResponse, &instance, &request.name, false, None)
                .await;
        }

        match self.commit_revert(&instance, Some(request.name.clone())).await {
            Ok(Some(report)) => {
                self.emit_lifecycle(
                    EventKind::Revert,
                    &instance,
                    request.user_id,
                    &request.name,
                    report.entry.as_ref(),
                )
                .await;
                self.respond(
                    EventKind::RevertResponse,
                    &instance,
                    &request.name,
                    true,
                    report.entry.as_ref(),
                )
                .await
            }
            Ok(None) => {
                self.respond(EventKind::RevertResponse, &instance, &request.name, false, None)
                    .await
            }
            Err(e) => {
                log::error!("Failed to revert {} on {}: {}", request.name, instance.id, e);
                self.respond(EventKind::RevertResponse, &instance, &request.name, false, None)
                    .await?;
                Err(e)
            }
        }
    }

    /// Remove a placement on behalf of another peer if this peer is its authority.
    pub async fn handle_dismiss_request(&self, request: DismissRequest) -> Result<(), MutationError> {
        let (instance, subject) = match self.load_known(request.instance_id).await? {
            Some(loaded) => loaded,
            None => return Ok(()),
        };
        if !self.authority.is_local_authority(&subject) {
            return Ok(());
        }
        self.dismiss_local(&instance, request.user_id).await
    }

    async fn respond(
        &self,
        kind: EventKind,
        instance: &Instance,
        name: &str,
        accepted: bool,
        entry: Option<&RollbackEntry>,
    ) -> Result<(), MutationError> {
        self.authority
            .respond(kind, instance.scene_id, instance.id, name, accepted, entry)
            .await?;
        Ok(())
    }

    async fn emit_lifecycle(
        &self,
        kind: EventKind,
        instance: &Instance,
        user: PeerId,
        name: &str,
        entry: Option<&RollbackEntry>,
    ) {
        let data = entry
            .and_then(|entry| serde_json::to_value(entry).ok())
            .unwrap_or_default();
        let event = Event::new(kind.clone(), instance.scene_id, user)
            .with_instance(instance.id)
            .with_mutation(name)
            .with_data(data);
        if let Err(e) = self.authority.emit(event).await {
            log::warn!("Failed to announce {:?} {} on {}: {}", kind, name, instance.id, e);
        }
    }
}
