use crate::core::{Subgraph, SubjectKey};
use serde::Serialize;
use std::collections::HashSet;

/// How nested subject references count towards distinct subjects.
///
/// `Reference` reproduces the long-standing behavior of the ingest service:
/// a nested reference re-checks the identity set with the enclosing triple's
/// key, so it never adds a new entry. `IncludeNested` keys it by its own
/// (type, tuid) identity instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DistinctSubjectMode {
    #[default]
    Reference,
    IncludeNested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SubgraphStats {
    pub num_of_triples: usize,
    pub num_of_distinct_subjects: usize,
}

impl SubgraphStats {
    pub fn of(subgraph: &Subgraph, mode: DistinctSubjectMode) -> Self {
        Self {
            num_of_triples: subgraph.len(),
            num_of_distinct_subjects: count_distinct_subjects(subgraph, mode),
        }
    }
}

pub fn count_distinct_subjects(subgraph: &Subgraph, mode: DistinctSubjectMode) -> usize {
    let mut seen: HashSet<SubjectKey<'_>> = HashSet::with_capacity(2 * subgraph.len());
    for triple in &subgraph.triples {
        let key = triple.subject.key();
        seen.insert(key);

        let Some(nested) = triple.object.as_subject() else {
            continue;
        };
        match mode {
            DistinctSubjectMode::Reference => {
                seen.insert(key);
            }
            DistinctSubjectMode::IncludeNested => {
                seen.insert(nested.key());
            }
        }
    }
    seen.len()
}
