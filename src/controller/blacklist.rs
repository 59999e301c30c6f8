//! Registry of objects left over from a previous backup attempt
//!
//! The first listing of each kind is taken before the current attempt has had
//! a chance to move any data, so anything already completed at that point
//! belongs to an earlier attempt and must never count toward this one.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use super::watched::{ObjectIdentity, Phase, WatchedKind, WatchedObject};

#[derive(Debug, Default)]
pub struct BlacklistRegistry {
    entries: HashMap<WatchedKind, HashSet<ObjectIdentity>>,
}

impl BlacklistRegistry {
    /// Seed the blacklist for `kind` from its first listing.
    ///
    /// Only the first call per kind has any effect; returns whether this call
    /// built the entry set.
    pub fn record_initial(&mut self, kind: WatchedKind, listing: &[WatchedObject]) -> bool {
        if self.entries.contains_key(&kind) {
            return false;
        }
        let leftovers: HashSet<ObjectIdentity> = listing
            .iter()
            .filter(|obj| obj.kind == kind && obj.phase == Phase::Completed)
            .map(|obj| obj.identity.clone())
            .collect();
        debug!(
            kind = %kind,
            listed = listing.len(),
            blacklisted = leftovers.len(),
            "Built blacklist from initial listing"
        );
        self.entries.insert(kind, leftovers);
        true
    }

    pub fn is_built(&self, kind: WatchedKind) -> bool {
        self.entries.contains_key(&kind)
    }

    pub fn is_blacklisted(&self, kind: WatchedKind, identity: &ObjectIdentity) -> bool {
        self.entries
            .get(&kind)
            .is_some_and(|set| set.contains(identity))
    }

    pub fn len(&self, kind: WatchedKind) -> usize {
        self.entries.get(&kind).map_or(0, HashSet::len)
    }
}
