//! Tracks which `new-instance` sites and which-constructor-call have run:
//! a `new-instance` result is unusable except as a constructor receiver
//! until the matching `invoke-direct <init>` executes, at which point
//! every register (and every register line still holding that same
//! uninitialized value) must be updated in lockstep.

use std::collections::HashMap;

use dexprep_types::{InsnAddr, RegisterId};

/// Identifies one `new-instance` occurrence by the address of the
/// instruction that produced it; two different `new obj` sites for the
/// same class are tracked separately since only one may be uninitialized
/// at a time per the verifier's single-registers-line view, but a method
/// may have several live simultaneously across different registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UninitSite(pub InsnAddr);

/// Per-method uninitialized-instance tracking table.
///
/// Records which `new-instance` addresses are still pending
/// initialization, and resolves which registers must be simultaneously
/// upgraded when the matching `<init>` call commits.
#[derive(Debug, Default, Clone)]
pub struct UninitMap {
    pending: HashMap<UninitSite, ()>,
}

impl UninitMap {
    pub fn new() -> Self {
        UninitMap {
            pending: HashMap::new(),
        }
    }

    /// Records a fresh `new-instance` site as pending initialization.
    pub fn mark_pending(&mut self, site: UninitSite) {
        self.pending.insert(site, ());
    }

    /// True if `site` is still awaiting its constructor call.
    pub fn is_pending(&self, site: UninitSite) -> bool {
        self.pending.contains_key(&site)
    }

    /// Marks a site as initialized; it is no longer tracked as pending.
    /// Calling this for a site that was never pending (or already
    /// resolved) is a no-op, matching the verifier's tolerance for
    /// redundant `<init>` calls reached along different merged paths.
    pub fn mark_initialized(&mut self, site: UninitSite) {
        self.pending.remove(&site);
    }

    /// Finds every register in `regs` whose value is the pending
    /// uninitialized instance from `site`; used by the `invoke-direct
    /// <init>` transfer function to upgrade every alias of the same
    /// `new-instance` result at once, not just the invoked register.
    pub fn aliases_of<'a>(
        &self,
        site: UninitSite,
        regs: impl Iterator<Item = (RegisterId, Option<UninitSite>)> + 'a,
    ) -> Vec<RegisterId> {
        regs.filter_map(|(id, occupant)| if occupant == Some(site) { Some(id) } else { None })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freshly_marked_site_is_pending() {
        let mut map = UninitMap::new();
        let site = UninitSite(10);
        map.mark_pending(site);
        assert!(map.is_pending(site));
    }

    #[test]
    fn initializing_clears_pending() {
        let mut map = UninitMap::new();
        let site = UninitSite(10);
        map.mark_pending(site);
        map.mark_initialized(site);
        assert!(!map.is_pending(site));
    }

    #[test]
    fn aliases_of_finds_every_matching_register() {
        let map = UninitMap::new();
        let site = UninitSite(4);
        let other = UninitSite(8);
        let regs = vec![(0u16, Some(site)), (1, Some(other)), (2, Some(site))];
        let aliases = map.aliases_of(site, regs.into_iter());
        assert_eq!(aliases, vec![0, 2]);
    }

    #[test]
    fn redundant_initialize_is_a_no_op() {
        let mut map = UninitMap::new();
        let site = UninitSite(1);
        map.mark_initialized(site);
        assert!(!map.is_pending(site));
    }
}
