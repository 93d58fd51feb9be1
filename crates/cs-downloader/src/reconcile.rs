use std::collections::HashSet;
use std::hash::Hash;

/// What has to change for the running set to match the desired set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan<T> {
    pub to_stop: Vec<T>,
    pub to_start: Vec<T>,
}

impl<T> Plan<T> {
    pub fn is_empty(&self) -> bool {
        self.to_stop.is_empty() && self.to_start.is_empty()
    }
}

/// Diffs a desired set against whatever is currently running. Pure, so every
/// level (wire subscriptions, relay downloads, key trackers) shares it.
pub fn plan<'a, T>(desired: &'a HashSet<T>, running: impl IntoIterator<Item = &'a T>) -> Plan<T>
where
    T: Eq + Hash + Clone + 'a,
{
    let running: HashSet<&T> = running.into_iter().collect();

    let to_stop = running
        .iter()
        .filter(|item| !desired.contains(**item))
        .map(|item| (*item).clone())
        .collect();
    let to_start = desired
        .iter()
        .filter(|item| !running.contains(item))
        .cloned()
        .collect();

    Plan { to_stop, to_start }
}
