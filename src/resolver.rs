//! Dependency resolver: picks the next tree an asset should answer.

use tracing::debug;

use crate::catalog::Catalog;
use crate::results::{record_once, AssetResults};

/// Index of the first tree after `after` (or the first tree, for `None`)
/// whose dependencies are not blocked for this asset.
///
/// A dependency blocks when its recorded outcome is FAIL or NOT_APPLICABLE.
/// A dependency with no recorded outcome, including one naming a tree that
/// does not exist, does not block. Every tree skipped on the way is stamped
/// with the catalog's NOT_APPLICABLE result in `results`, which is the
/// caller's authoritative bucket for the asset; stamped trees therefore
/// block their own dependents further down the catalog.
pub fn next_eligible_tree(
    catalog: &Catalog,
    after: Option<usize>,
    results: &mut AssetResults,
) -> Option<usize> {
    let start = after.map_or(0, |i| i + 1);

    for index in start..catalog.len() {
        let tree = &catalog.trees()[index];
        let blocker = tree.dependencies.iter().find(|dep| {
            results
                .get(dep.as_str())
                .is_some_and(|outcome| outcome.status.is_blocking())
        });

        match blocker {
            Some(dep) => {
                debug!(tree_id = %tree.id, blocked_by = %dep, "tree skipped");
                record_once(results, &tree.id, catalog.not_applicable());
            }
            None => return Some(index),
        }
    }

    None
}
