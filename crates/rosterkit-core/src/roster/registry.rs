//! Via registry and group scopes
//!
//! Every group owns a [`Scope`]: the set of vias claimed by its direct
//! children plus an index of its subgroups by label. A scope is only mutated
//! through check-then-register, so a failed registration never leaves a
//! partial claim behind.

use std::collections::HashMap;

use crate::error::{RosterError, RosterResult};
use crate::types::{NodeId, Via};

/// Mapping from via to the node that currently claims it
#[derive(Debug, Default)]
pub struct ViaRegistry {
    entries: HashMap<Via, NodeId>,
}

impl ViaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Node claiming `via`, if any
    pub fn lookup(&self, via: &Via) -> Option<NodeId> {
        self.entries.get(via).copied()
    }

    pub fn contains(&self, via: &Via) -> bool {
        self.entries.contains_key(via)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Via, &NodeId)> {
        self.entries.iter()
    }

    /// Check that every via in `vias` could be registered.
    ///
    /// Duplicates inside `vias` count as conflicts. Entries owned by
    /// `ignore_owner` are treated as free.
    pub fn check(
        &self,
        vias: &[Via],
        scope: NodeId,
        ignore_owner: Option<NodeId>,
    ) -> RosterResult<()> {
        for (i, via) in vias.iter().enumerate() {
            let taken = match self.entries.get(via) {
                Some(owner) => Some(*owner) != ignore_owner,
                None => false,
            };
            if taken || vias[..i].contains(via) {
                return Err(RosterError::ViaConflict {
                    via: via.clone(),
                    scope,
                });
            }
        }
        Ok(())
    }

    /// Register all vias for `owner`, or none of them
    pub fn register_all(&mut self, vias: &[Via], owner: NodeId, scope: NodeId) -> RosterResult<()> {
        self.check(vias, scope, Some(owner))?;
        for via in vias {
            self.entries.insert(via.clone(), owner);
        }
        Ok(())
    }

    /// Remove the vias that are registered to `owner`; returns how many were removed
    pub fn unregister_all(&mut self, vias: &[Via], owner: NodeId) -> usize {
        let mut removed = 0;
        for via in vias {
            if self.entries.get(via) == Some(&owner) {
                self.entries.remove(via);
                removed += 1;
            }
        }
        removed
    }
}

/// What a node takes from its parent's scope when attached
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Claims {
    pub vias: Vec<Via>,
    /// Subgroup label (groups only)
    pub label: Option<String>,
}

impl Claims {
    pub fn vias(vias: Vec<Via>) -> Self {
        Self { vias, label: None }
    }

    pub fn is_empty(&self) -> bool {
        self.vias.is_empty() && self.label.is_none()
    }
}

/// Uniqueness scope of one group
#[derive(Debug, Default)]
pub struct Scope {
    vias: ViaRegistry,
    subgroups: HashMap<String, NodeId>,
}

impl Scope {
    pub fn vias(&self) -> &ViaRegistry {
        &self.vias
    }

    /// Subgroup carrying `label`
    pub fn subgroup(&self, label: &str) -> Option<NodeId> {
        self.subgroups.get(label).copied()
    }

    pub(crate) fn check(
        &self,
        claims: &Claims,
        scope: NodeId,
        ignore_owner: Option<NodeId>,
    ) -> RosterResult<()> {
        self.vias.check(&claims.vias, scope, ignore_owner)?;
        if let Some(label) = &claims.label {
            if let Some(owner) = self.subgroups.get(label) {
                if Some(*owner) != ignore_owner {
                    return Err(RosterError::DuplicateGroup {
                        label: label.clone(),
                        scope,
                    });
                }
            }
        }
        Ok(())
    }

    /// Register claims for `owner`; fails without changes if any claim is taken
    pub(crate) fn register(&mut self, claims: &Claims, owner: NodeId, scope: NodeId) -> RosterResult<()> {
        self.check(claims, scope, Some(owner))?;
        // cannot fail after the check above
        self.vias.register_all(&claims.vias, owner, scope)?;
        if let Some(label) = &claims.label {
            self.subgroups.insert(label.clone(), owner);
        }
        Ok(())
    }

    pub(crate) fn unregister(&mut self, claims: &Claims, owner: NodeId) {
        self.vias.unregister_all(&claims.vias, owner);
        if let Some(label) = &claims.label {
            if self.subgroups.get(label) == Some(&owner) {
                self.subgroups.remove(label);
            }
        }
    }

    /// Move a subgroup's label claim from `old` to `new`
    pub(crate) fn relabel(
        &mut self,
        owner: NodeId,
        old: Option<&str>,
        new: Option<&str>,
        scope: NodeId,
    ) -> RosterResult<()> {
        if let Some(new) = new {
            if let Some(existing) = self.subgroups.get(new) {
                if *existing != owner {
                    return Err(RosterError::DuplicateGroup {
                        label: new.to_string(),
                        scope,
                    });
                }
            }
        }
        if let Some(old) = old {
            if self.subgroups.get(old) == Some(&owner) {
                self.subgroups.remove(old);
            }
        }
        if let Some(new) = new {
            self.subgroups.insert(new.to_string(), owner);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn via(peer: &str) -> Via {
        Via::new("me@example.org", peer).unwrap()
    }

    #[test]
    fn test_register_and_lookup() {
        let mut reg = ViaRegistry::new();
        let scope = NodeId::next();
        let owner = NodeId::next();

        reg.register_all(&[via("a@x"), via("b@x")], owner, scope).unwrap();
        assert_eq!(reg.lookup(&via("a@x")), Some(owner));
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn test_conflict_leaves_registry_unchanged() {
        let mut reg = ViaRegistry::new();
        let scope = NodeId::next();
        let first = NodeId::next();
        let second = NodeId::next();

        reg.register_all(&[via("a@x")], first, scope).unwrap();
        let err = reg
            .register_all(&[via("b@x"), via("a@x")], second, scope)
            .unwrap_err();

        assert!(matches!(err, RosterError::ViaConflict { .. }));
        assert!(!reg.contains(&via("b@x")));
        assert_eq!(reg.lookup(&via("a@x")), Some(first));
    }

    #[test]
    fn test_duplicates_within_one_claim_conflict() {
        let mut reg = ViaRegistry::new();
        let err = reg
            .register_all(&[via("a@x"), via("a@x")], NodeId::next(), NodeId::next())
            .unwrap_err();
        assert!(matches!(err, RosterError::ViaConflict { .. }));
        assert!(reg.is_empty());
    }

    #[test]
    fn test_unregister_only_removes_own_entries() {
        let mut reg = ViaRegistry::new();
        let scope = NodeId::next();
        let owner = NodeId::next();
        let other = NodeId::next();

        reg.register_all(&[via("a@x")], owner, scope).unwrap();
        assert_eq!(reg.unregister_all(&[via("a@x")], other), 0);
        assert_eq!(reg.unregister_all(&[via("a@x")], owner), 1);
        assert!(reg.is_empty());
    }

    #[test]
    fn test_scope_subgroup_labels() {
        let mut scope = Scope::default();
        let scope_id = NodeId::next();
        let friends = NodeId::next();
        let other = NodeId::next();

        let claims = Claims {
            vias: vec![],
            label: Some("Friends".into()),
        };
        scope.register(&claims, friends, scope_id).unwrap();
        let err = scope.register(&claims, other, scope_id).unwrap_err();
        assert!(matches!(err, RosterError::DuplicateGroup { .. }));

        scope
            .relabel(friends, Some("Friends"), Some("Family"), scope_id)
            .unwrap();
        assert_eq!(scope.subgroup("Family"), Some(friends));
        assert_eq!(scope.subgroup("Friends"), None);

        scope.register(&claims, other, scope_id).unwrap();
        let err = scope
            .relabel(friends, Some("Family"), Some("Friends"), scope_id)
            .unwrap_err();
        assert!(matches!(err, RosterError::DuplicateGroup { .. }));
        assert_eq!(scope.subgroup("Family"), Some(friends));
    }
}
