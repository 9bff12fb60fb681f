use std::num::NonZeroUsize;
use std::sync::Arc;

use super::{Planner, WakeupState};
use crate::system::SystemMeta;

/// The dependency structure of one group, built once per registration
/// change and shared by every cycle.
pub(in crate::scheduler) struct Topology {
    /// If `dependents[a].contains(b)`, `b` depends on `a` and is a wakeup
    /// candidate when `a` completes.
    dependents: Vec<Vec<usize>>,

    /// The planner state every cycle starts from.
    initial: Planner,
}

impl Topology {
    /// Builds the DAG over `metas`, which are in registration order.
    /// Only earlier systems can be depended on, so cycles cannot form.
    pub(in crate::scheduler) fn build(metas: &[Arc<SystemMeta>]) -> Self {
        let count = metas.len();
        let mut dependents = vec![Vec::new(); count];
        let mut blockers = vec![0usize; count];

        for (after, meta) in metas.iter().enumerate() {
            for (before, earlier) in metas[..after].iter().enumerate() {
                warn_conflicting_writers(meta, earlier);
                if meta.depends_on(earlier) {
                    dependents[before].push(after);
                    blockers[after] += 1;
                }
            }
        }

        let runnable = blockers
            .iter()
            .enumerate()
            .filter(|&(_, &blocked_by)| blocked_by == 0)
            .map(|(node, _)| node)
            .collect();
        let wakeup = blockers
            .iter()
            .map(|&blocked_by| match NonZeroUsize::new(blocked_by) {
                Some(count) => WakeupState::Blocked { count },
                None => WakeupState::Pending,
            })
            .collect();

        Self {
            dependents,
            initial: Planner::new(wakeup, runnable, count),
        }
    }

    pub(in crate::scheduler) fn dependents_of(&self, node: usize) -> &[usize] {
        &self.dependents[node]
    }

    pub(in crate::scheduler) fn initial_planner(&self) -> &Planner { &self.initial }
}

/// Two writers of one component type in the same group are legal (they are
/// serialized in registration order) but usually indicate a mistake, so
/// surface them.
fn warn_conflicting_writers(a: &SystemMeta, b: &SystemMeta) {
    if !a.writes_any() || !b.writes_any() {
        return;
    }
    for &hash in &a.hashes {
        if a.writes_to(hash) && b.writes_to(hash) {
            log::warn!(
                "systems `{}` and `{}` both write {hash} in group {}; they run serialized in \
                 registration order",
                b.name,
                a.name,
                a.group,
            );
        }
    }
}
