use std::collections::HashSet;

/// Identities allowed to run privileged commands. Fixed for the process lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperatorSet {
    ids: HashSet<u64>,
}

impl OperatorSet {
    pub fn new(ids: impl IntoIterator<Item = u64>) -> Self {
        OperatorSet {
            ids: ids.into_iter().collect(),
        }
    }

    pub fn is_authorized(&self, user_id: u64) -> bool {
        self.ids.contains(&user_id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
