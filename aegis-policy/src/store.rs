//! In-memory, copy-on-write policy store.

use std::sync::{Arc, RwLock};

use aegis_primitives::{Applicability, PolicyId};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{PolicyError, PolicyResult};
use crate::integrations::PolicyStore;
use crate::policy::{LifecycleEvent, Policy, PolicyBuilder, PolicyStatus};
use crate::rule::Rule;

/// Policy store holding every policy in memory.
///
/// Writers replace the whole policy list, so snapshots handed out earlier are
/// never affected by later edits.
#[derive(Debug, Default)]
pub struct InMemoryPolicyStore {
    policies: RwLock<Arc<Vec<Policy>>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PolicyDocument {
    Wrapped { policies: Vec<Policy> },
    List(Vec<Policy>),
}

impl InMemoryPolicyStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store from existing policies, keeping their order.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::DuplicatePolicy`] when identifiers collide and
    /// [`PolicyError::MalformedPolicy`] when an active policy fails validation.
    pub fn from_policies<I>(policies: I) -> PolicyResult<Self>
    where
        I: IntoIterator<Item = Policy>,
    {
        let store = Self::new();
        for policy in policies {
            store.insert(policy)?;
        }
        Ok(store)
    }

    /// Loads a JSON policy document: either an array of policies or an object
    /// with a `policies` array.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Document`] when the JSON cannot be decoded
    /// (including malformed rules) and the errors of
    /// [`InMemoryPolicyStore::from_policies`].
    pub fn from_json_slice(bytes: &[u8]) -> PolicyResult<Self> {
        let policies = match serde_json::from_slice::<PolicyDocument>(bytes) {
            Ok(PolicyDocument::Wrapped { policies } | PolicyDocument::List(policies)) => policies,
            // Untagged decoding hides the underlying reason, so decode again
            // as a plain list to surface it.
            Err(_) => serde_json::from_slice::<Vec<Policy>>(bytes)?,
        };
        let store = Self::from_policies(policies)?;
        info!(policies = store.len()?, "policy document loaded");
        Ok(store)
    }

    /// Returns a consistent snapshot of every policy, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::StoreUnavailable`] if the store lock is poisoned.
    pub fn snapshot(&self) -> PolicyResult<Arc<Vec<Policy>>> {
        self.policies
            .read()
            .map(|guard| Arc::clone(&guard))
            .map_err(|_| PolicyError::store_unavailable("policy store lock poisoned"))
    }

    /// Returns the number of stored policies.
    ///
    /// # Errors
    ///
    /// See [`InMemoryPolicyStore::snapshot`].
    pub fn len(&self) -> PolicyResult<usize> {
        Ok(self.snapshot()?.len())
    }

    /// Returns `true` when the store holds no policies.
    ///
    /// # Errors
    ///
    /// See [`InMemoryPolicyStore::snapshot`].
    pub fn is_empty(&self) -> PolicyResult<bool> {
        Ok(self.snapshot()?.is_empty())
    }

    /// Returns a copy of the policy with `id`.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::UnknownPolicy`] when no such policy exists.
    pub fn get(&self, id: &PolicyId) -> PolicyResult<Policy> {
        self.snapshot()?
            .iter()
            .find(|policy| policy.id() == id)
            .cloned()
            .ok_or_else(|| PolicyError::UnknownPolicy(id.clone()))
    }

    /// Returns copies of every stored policy, optionally restricted to one status.
    ///
    /// # Errors
    ///
    /// See [`InMemoryPolicyStore::snapshot`].
    pub fn list(&self, status: Option<PolicyStatus>) -> PolicyResult<Vec<Policy>> {
        Ok(self
            .snapshot()?
            .iter()
            .filter(|policy| status.is_none_or(|wanted| policy.status() == wanted))
            .cloned()
            .collect())
    }

    /// Adds a policy as-is. Active policies are validated first.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::DuplicatePolicy`] or
    /// [`PolicyError::MalformedPolicy`].
    pub fn insert(&self, policy: Policy) -> PolicyResult<PolicyId> {
        if policy.status().is_active() {
            policy.validate()?;
        }
        self.mutate(|policies| {
            if policies.iter().any(|existing| existing.id() == policy.id()) {
                return Err(PolicyError::DuplicatePolicy(policy.id().clone()));
            }
            let id = policy.id().clone();
            debug!(policy_id = %id, status = ?policy.status(), "policy stored");
            policies.push(policy);
            Ok(id)
        })
    }

    /// Builds a draft policy and stores it.
    ///
    /// # Errors
    ///
    /// Propagates builder validation errors and the errors of
    /// [`InMemoryPolicyStore::insert`].
    pub fn create(&self, builder: PolicyBuilder) -> PolicyResult<PolicyId> {
        self.insert(builder.build()?)
    }

    /// Promotes a policy to active after validating it.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::UnknownPolicy`] or [`PolicyError::MalformedPolicy`].
    pub fn activate(&self, id: &PolicyId) -> PolicyResult<PolicyStatus> {
        self.update(id, |policy| policy.transition(LifecycleEvent::Activate))
    }

    /// Soft-disables a policy.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::UnknownPolicy`] or
    /// [`PolicyError::InvalidTransition`] for drafts.
    pub fn deactivate(&self, id: &PolicyId) -> PolicyResult<PolicyStatus> {
        self.update(id, |policy| policy.transition(LifecycleEvent::Deactivate))
    }

    /// Replaces a policy's rule list wholesale.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::UnknownPolicy`] or, for active policies,
    /// [`PolicyError::MalformedPolicy`].
    pub fn replace_rules(&self, id: &PolicyId, rules: Vec<Rule>) -> PolicyResult<u32> {
        self.update(id, |policy| {
            policy.replace_rules(rules)?;
            Ok(policy.version())
        })
    }

    /// Replaces a policy's role and activity applicability.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::UnknownPolicy`].
    pub fn set_applicability(
        &self,
        id: &PolicyId,
        roles: Applicability,
        activities: Applicability,
    ) -> PolicyResult<()> {
        self.update(id, |policy| {
            policy.set_applicability(roles, activities);
            Ok(())
        })
    }

    /// Removes a policy and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::UnknownPolicy`].
    pub fn delete(&self, id: &PolicyId) -> PolicyResult<Policy> {
        self.mutate(|policies| {
            let index = policies
                .iter()
                .position(|policy| policy.id() == id)
                .ok_or_else(|| PolicyError::UnknownPolicy(id.clone()))?;
            debug!(policy_id = %id, "policy deleted");
            Ok(policies.remove(index))
        })
    }

    fn update<T>(
        &self,
        id: &PolicyId,
        f: impl FnOnce(&mut Policy) -> PolicyResult<T>,
    ) -> PolicyResult<T> {
        self.mutate(|policies| {
            let policy = policies
                .iter_mut()
                .find(|policy| policy.id() == id)
                .ok_or_else(|| PolicyError::UnknownPolicy(id.clone()))?;
            f(policy)
        })
    }

    fn mutate<T>(&self, f: impl FnOnce(&mut Vec<Policy>) -> PolicyResult<T>) -> PolicyResult<T> {
        let mut guard = self
            .policies
            .write()
            .map_err(|_| PolicyError::store_unavailable("policy store lock poisoned"))?;
        let mut next = Vec::clone(&guard);
        let output = f(&mut next)?;
        *guard = Arc::new(next);
        Ok(output)
    }
}

#[async_trait]
impl PolicyStore for InMemoryPolicyStore {
    async fn active_policies(&self) -> PolicyResult<Arc<[Policy]>> {
        let snapshot = self.snapshot()?;
        Ok(snapshot
            .iter()
            .filter(|policy| policy.status().is_active())
            .cloned()
            .collect())
    }
}
