//! Bulk mutate and revert across many placements

use std::collections::{BTreeMap, HashMap};
use std::future::Future;

use futures_util::future::join_all;
use uuid::Uuid;

use super::mutator::MutationEngine;
use super::options::{MutateOptions, MutationCallbacks, MutationOutcome, RevertOutcome};
use super::MutationError;
use crate::authority::RemoteResponse;
use crate::config::WorkflowOverrides;
use crate::diff::Shorthand;
use crate::document::{InstanceId, PeerId, SubjectId};

/// Per-instance results of a batch, in the order the instances were given.
#[derive(Debug)]
pub struct BatchOutcome<T> {
    pub results: Vec<(InstanceId, Result<T, MutationError>)>,
}

impl<T: BatchResult> BatchOutcome<T> {
    pub fn accepted_count(&self) -> usize {
        self.results
            .iter()
            .filter(|(_, result)| matches!(result, Ok(outcome) if outcome.accepted()))
            .count()
    }

    pub fn all_accepted(&self) -> bool {
        self.accepted_count() == self.results.len()
    }

    pub fn get(&self, instance: InstanceId) -> Option<&Result<T, MutationError>> {
        self.results
            .iter()
            .find(|(id, _)| *id == instance)
            .map(|(_, result)| result)
    }
}

/// Outcomes a batch can short-circuit on.
pub trait BatchResult {
    fn accepted(&self) -> bool;
    /// Outcome recorded for requests never sent because the authority
    /// already rejected the first one.
    fn rejected_by(peer: PeerId) -> Self;
}

impl BatchResult for MutationOutcome {
    fn accepted(&self) -> bool {
        MutationOutcome::accepted(self)
    }

    fn rejected_by(peer: PeerId) -> Self {
        MutationOutcome::Remote(RemoteResponse::rejected(peer))
    }
}

impl BatchResult for RevertOutcome {
    fn accepted(&self) -> bool {
        RevertOutcome::accepted(self)
    }

    fn rejected_by(peer: PeerId) -> Self {
        RevertOutcome::Remote(RemoteResponse::rejected(peer))
    }
}

impl MutationEngine {
    /// Apply one shorthand to many placements.
    ///
    /// Every instance gets its own delta. Without a name in `options`, one
    /// is generated and shared so the whole batch can be reverted by name.
    /// Placements sharing a Subject share its stack, so the second and later
    /// placements of one Subject get the generated name with `-2`, `-3`...
    /// appended. An explicit name is used as given and a repeated Subject
    /// fails with `DuplicateName`.
    pub async fn batch_mutate(
        &self,
        instances: &[InstanceId],
        shorthand: &Shorthand,
        mut options: MutateOptions,
    ) -> BatchOutcome<MutationOutcome> {
        options.delta = None;
        let names = match options.name.take() {
            Some(name) => instances.iter().map(|_| name.clone()).collect(),
            None => {
                self.names_per_subject(instances, &format!("batch-{}", Uuid::new_v4().simple()))
                    .await
            }
        };
        let names: HashMap<InstanceId, String> = instances.iter().copied().zip(names).collect();

        self.run_batch(instances, |instance, overrides| {
            let mut options = if overrides == WorkflowOverrides::default() {
                options.clone()
            } else {
                options.clone().with_overrides(overrides)
            };
            options.name = names.get(&instance).cloned();
            async move {
                self.mutate_copy(instance, shorthand, MutationCallbacks::new(), options)
                    .await
            }
        })
        .await
    }

    /// `base` for each instance, suffixed for repeat visits to one Subject.
    async fn names_per_subject(&self, instances: &[InstanceId], base: &str) -> Vec<String> {
        let mut seen: HashMap<SubjectId, usize> = HashMap::new();
        let mut names = Vec::with_capacity(instances.len());
        for instance in instances {
            let visits = match self.store().instance(*instance).await {
                Ok(instance) => {
                    let count = seen.entry(instance.subject_id).or_insert(0);
                    *count += 1;
                    *count
                }
                // run_batch reports the lookup failure for this instance
                Err(_) => 1,
            };
            names.push(if visits == 1 {
                base.to_string()
            } else {
                format!("{base}-{visits}")
            });
        }
        names
    }

    /// Revert the entry called `name` on many placements.
    pub async fn batch_revert(&self, instances: &[InstanceId], name: &str) -> BatchOutcome<RevertOutcome> {
        self.run_batch(instances, |instance, overrides| async move {
            self.revert_with(instance, Some(name), overrides).await
        })
        .await
    }

    /// Partition by authority, then run each peer's share. Local work runs
    /// one by one; each remote peer's share runs concurrently with the
    /// others, gated on that peer's answer to the first request.
    async fn run_batch<T, F, Fut>(&self, instances: &[InstanceId], run: F) -> BatchOutcome<T>
    where
        T: BatchResult,
        F: Fn(InstanceId, WorkflowOverrides) -> Fut,
        Fut: Future<Output = Result<T, MutationError>>,
    {
        let mut slots: Vec<Option<Result<T, MutationError>>> =
            instances.iter().map(|_| None).collect();
        let mut groups: BTreeMap<PeerId, Vec<usize>> = BTreeMap::new();

        for (index, instance) in instances.iter().enumerate() {
            match self.authority_of(*instance).await {
                Ok(peer) => groups.entry(peer).or_default().push(index),
                Err(e) => slots[index] = Some(Err(e)),
            }
        }

        let local = self.authority().local_peer();
        let run = &run;
        let shares = groups.into_iter().map(|(peer, indices)| async move {
            let remote = peer != local;
            let mut overrides = WorkflowOverrides::default();
            let mut first_accepted: Option<bool> = None;
            let mut results = Vec::with_capacity(indices.len());

            for index in indices {
                if remote && first_accepted == Some(false) {
                    results.push((index, Ok(T::rejected_by(peer))));
                    continue;
                }

                let result = run(instances[index], overrides.clone()).await;
                if remote && first_accepted.is_none() {
                    let accepted = matches!(&result, Ok(outcome) if outcome.accepted());
                    if accepted {
                        overrides = WorkflowOverrides::forced();
                    } else {
                        log::info!("{} declined the first request of a batch; skipping the rest", peer);
                    }
                    first_accepted = Some(accepted);
                }
                results.push((index, result));
            }
            results
        });

        for (index, result) in join_all(shares).await.into_iter().flatten() {
            slots[index] = Some(result);
        }

        BatchOutcome {
            results: instances
                .iter()
                .zip(slots)
                .filter_map(|(instance, slot)| slot.map(|result| (*instance, result)))
                .collect(),
        }
    }

    async fn authority_of(&self, instance: InstanceId) -> Result<PeerId, MutationError> {
        let instance = self.store().instance(instance).await?;
        let subject = self.store().subject(instance.subject_id).await?;
        Ok(self.authority().require_authority(&subject, instance.id)?)
    }
}
