use std::collections::BTreeSet;

/// Models known to be exhausted for the lifetime of a single run.
///
/// Owned by exactly one run and dropped with it; never shared across runs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QuotaState {
    exhausted: BTreeSet<String>,
}

impl QuotaState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `model_id` as exhausted. Returns `false` when it already was.
    pub fn mark_exhausted(&mut self, model_id: &str) -> bool {
        self.exhausted.insert(model_id.to_string())
    }

    pub fn is_exhausted(&self, model_id: &str) -> bool {
        self.exhausted.contains(model_id)
    }

    pub fn exhausted(&self) -> impl Iterator<Item = &str> {
        self.exhausted.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.exhausted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exhausted.is_empty()
    }
}

impl<S: AsRef<str>> FromIterator<S> for QuotaState {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self {
            exhausted: iter.into_iter().map(|id| id.as_ref().to_string()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::QuotaState;

    #[test]
    fn marking_twice_is_idempotent() {
        let mut quota = QuotaState::new();
        assert!(quota.mark_exhausted("flash"));
        let after_first = quota.clone();
        assert!(!quota.mark_exhausted("flash"));
        assert_eq!(quota, after_first);
        assert_eq!(quota.len(), 1);
    }

    #[test]
    fn separate_states_do_not_leak() {
        let mut first = QuotaState::new();
        let second = QuotaState::new();
        first.mark_exhausted("pro");
        assert!(first.is_exhausted("pro"));
        assert!(!second.is_exhausted("pro"));
    }
}
