//! The sparse table of saved register lines the work-list verifier keeps
//! one entry per "interesting" address: branch targets and
//! exception-handler entries at minimum, every address when register maps
//! are being generated.

use std::collections::BTreeMap;

use dexprep_types::InsnAddr;

use crate::regline::RegisterLine;

/// Which addresses get a saved [`RegisterLine`] slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterestingAddressPolicy {
    /// Only branch targets and exception-handler entries (the minimum the
    /// merge algorithm needs).
    BranchTargetsAndHandlers,
    /// Every address in the method, used when register maps are being
    /// generated for precise GC.
    Every,
}

/// The verifier's register-line storage for one method: a sparse map from
/// "interesting" address to its saved line, plus the one scratch `work`
/// line mutated in place while walking a basic block.
#[derive(Debug)]
pub struct RegisterTable {
    register_count: usize,
    policy: InterestingAddressPolicy,
    saved: BTreeMap<InsnAddr, RegisterLine>,
    work: RegisterLine,
}

impl RegisterTable {
    pub fn new(register_count: usize, policy: InterestingAddressPolicy) -> Self {
        RegisterTable {
            register_count,
            policy,
            saved: BTreeMap::new(),
            work: RegisterLine::new(register_count),
        }
    }

    /// Whether `addr` should have a saved line under the current policy.
    pub fn is_interesting(&self, addr: InsnAddr, is_branch_target_or_handler: bool) -> bool {
        match self.policy {
            InterestingAddressPolicy::Every => true,
            InterestingAddressPolicy::BranchTargetsAndHandlers => is_branch_target_or_handler,
        }
    }

    /// The mutable scratch line the verifier steps instructions through.
    pub fn work_mut(&mut self) -> &mut RegisterLine {
        &mut self.work
    }

    pub fn work(&self) -> &RegisterLine {
        &self.work
    }

    /// Resets the scratch line to `line`'s contents, used when starting a
    /// new basic block from a saved predecessor.
    pub fn load_into_work(&mut self, line: &RegisterLine) {
        self.work = line.clone();
    }

    /// Returns the saved line at `addr`, if any.
    pub fn saved(&self, addr: InsnAddr) -> Option<&RegisterLine> {
        self.saved.get(&addr)
    }

    /// Merges the current `work` line into whatever is saved at `addr`,
    /// creating a fresh entry (seeded as `Unknown` everywhere) on first
    /// visit. Returns `true` if the saved line changed, which is the
    /// work-list algorithm's signal to re-enqueue `addr`.
    pub fn merge_into(&mut self, addr: InsnAddr) -> bool {
        let work = self.work.clone();
        self.merge_line_into(addr, &work)
    }

    /// Merges an arbitrary line into whatever is saved at `addr`, without
    /// disturbing the scratch `work` line. Used for exception successors,
    /// which merge the pre-instruction snapshot rather than `work`.
    pub fn merge_line_into(&mut self, addr: InsnAddr, line: &RegisterLine) -> bool {
        let entry = self
            .saved
            .entry(addr)
            .or_insert_with(|| RegisterLine::new(self.register_count));
        let before = entry.clone();
        entry.merge_from(line);
        *entry != before
    }

    /// Overwrites the saved line at `addr` with the current `work` line
    /// unconditionally — used to snapshot registers before executing a
    /// potentially-throwing instruction in a try range, so the handler
    /// merges against pre-instruction state.
    pub fn snapshot_work_at(&mut self, addr: InsnAddr) {
        self.saved.insert(addr, self.work.clone());
    }

    pub fn register_count(&self) -> usize {
        self.register_count
    }

    /// Every saved line, in address order — the source data for building a
    /// register-liveness map once verification of a method has finished.
    pub fn saved_entries(&self) -> impl Iterator<Item = (InsnAddr, &RegisterLine)> {
        self.saved.iter().map(|(&addr, line)| (addr, line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lattice::RegisterType;

    #[test]
    fn merge_into_creates_entry_on_first_visit() {
        let mut table = RegisterTable::new(2, InterestingAddressPolicy::BranchTargetsAndHandlers);
        table.work_mut().set(0, RegisterType::Integer);
        assert!(table.merge_into(10));
        assert_eq!(table.saved(10).unwrap().get(0), Some(&RegisterType::Integer));
    }

    #[test]
    fn merge_into_reports_no_change_when_stable() {
        let mut table = RegisterTable::new(1, InterestingAddressPolicy::BranchTargetsAndHandlers);
        table.work_mut().set(0, RegisterType::Integer);
        assert!(table.merge_into(5));
        assert!(!table.merge_into(5));
    }

    #[test]
    fn merge_into_reports_change_on_widening() {
        let mut table = RegisterTable::new(1, InterestingAddressPolicy::BranchTargetsAndHandlers);
        table.work_mut().set(0, RegisterType::Integer);
        assert!(table.merge_into(5));
        table.work_mut().set(0, RegisterType::Float);
        assert!(table.merge_into(5));
        assert_eq!(table.saved(5).unwrap().get(0), Some(&RegisterType::Conflict));
    }

    #[test]
    fn every_policy_marks_all_addresses_interesting() {
        let table = RegisterTable::new(1, InterestingAddressPolicy::Every);
        assert!(table.is_interesting(3, false));
    }
}
