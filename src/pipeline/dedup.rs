use crate::ai::{decode, DedupReply, Deduplicator};
use crate::models::ContentItem;

/// Items judged to cover the same story. Indices point into the candidate pool.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateGroup {
    pub primary: usize,
    pub duplicates: Vec<usize>,
    pub rationale: String,
}

/// A partition of the candidate pool: every index is either unique, a
/// group primary, or a duplicate in exactly one group.
#[derive(Debug, Clone, PartialEq)]
pub struct DedupOutcome {
    pub groups: Vec<DuplicateGroup>,
    pub unique: Vec<usize>,
}

impl DedupOutcome {
    pub fn all_unique(pool_len: usize) -> Self {
        Self {
            groups: Vec::new(),
            unique: (0..pool_len).collect(),
        }
    }

    /// Indices that may be selected: unique items and group primaries.
    pub fn eligible(&self) -> Vec<usize> {
        let mut eligible: Vec<usize> = self
            .unique
            .iter()
            .copied()
            .chain(self.groups.iter().map(|g| g.primary))
            .collect();
        eligible.sort_unstable();
        eligible
    }

    pub fn excluded(&self) -> Vec<usize> {
        let mut excluded: Vec<usize> = self
            .groups
            .iter()
            .flat_map(|g| g.duplicates.iter().copied())
            .collect();
        excluded.sort_unstable();
        excluded
    }
}

/// Turns a model reply into a valid partition of `0..pool_len`.
///
/// Out-of-range indices are dropped. A group whose primary already belongs
/// to an earlier group is folded into that group. An index can only be
/// claimed once; later claims are ignored. Groups left without duplicates
/// dissolve, and everything unclaimed is unique.
pub fn normalize(reply: DedupReply, pool_len: usize) -> DedupOutcome {
    let mut owner: Vec<Option<usize>> = vec![None; pool_len];
    let mut groups: Vec<DuplicateGroup> = Vec::new();

    for group in reply.groups {
        let primary = group.primary_index;
        if primary >= pool_len {
            continue;
        }
        let target = match owner[primary] {
            Some(existing) => existing,
            None => {
                groups.push(DuplicateGroup {
                    primary,
                    duplicates: Vec::new(),
                    rationale: group.rationale.clone(),
                });
                owner[primary] = Some(groups.len() - 1);
                groups.len() - 1
            }
        };
        for dup in group.duplicate_indices {
            if dup < pool_len && owner[dup].is_none() {
                owner[dup] = Some(target);
                groups[target].duplicates.push(dup);
            }
        }
    }

    let groups: Vec<DuplicateGroup> = groups
        .into_iter()
        .filter(|g| !g.duplicates.is_empty())
        .map(|mut g| {
            g.duplicates.sort_unstable();
            g
        })
        .collect();

    let mut grouped = vec![false; pool_len];
    for group in &groups {
        grouped[group.primary] = true;
        for &dup in &group.duplicates {
            grouped[dup] = true;
        }
    }
    let unique = (0..pool_len).filter(|i| !grouped[*i]).collect();

    DedupOutcome { groups, unique }
}

/// Groups the pool through the model. If the call or its reply fails,
/// every item is treated as unique.
pub async fn group_candidates(dedup: &dyn Deduplicator, items: &[ContentItem]) -> DedupOutcome {
    if items.len() < 2 {
        return DedupOutcome::all_unique(items.len());
    }

    let reply = match dedup.group(items).await {
        Ok(raw) => decode::<DedupReply>(&raw),
        Err(e) => Err(e),
    };

    match reply {
        Ok(reply) => {
            let outcome = normalize(reply, items.len());
            tracing::info!(
                pool = items.len(),
                groups = outcome.groups.len(),
                excluded = outcome.excluded().len(),
                "Grouped duplicate stories"
            );
            outcome
        }
        Err(e) => {
            tracing::warn!(error = %e, "Deduplication failed, treating all items as unique");
            DedupOutcome::all_unique(items.len())
        }
    }
}
