//! Named event counters

use std::collections::HashMap;

/// Counters keyed by static names so incrementing never allocates after the first hit.
#[derive(Default)]
pub struct Counter {
    counters: HashMap<&'static str, u64>,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&mut self, name: &'static str, value: u64) {
        *self.counters.entry(name).or_insert(0) += value;
    }

    pub fn get(&self, name: &'static str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    /// Zero every counter, keeping the keys.
    pub fn reset_all(&mut self) {
        self.counters.values_mut().for_each(|value| *value = 0);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, u64)> + '_ {
        self.counters.iter().map(|(name, value)| (*name, *value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_and_resets() {
        let mut counter = Counter::new();
        counter.increment("steps", 3);
        counter.increment("steps", 2);
        counter.increment("renders", 1);
        assert_eq!(counter.get("steps"), 5);
        assert_eq!(counter.get("captures"), 0);

        counter.reset_all();
        assert_eq!(counter.get("steps"), 0);
        assert_eq!(counter.iter().count(), 2);
    }
}
