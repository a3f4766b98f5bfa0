//! Map diffs for reconciliation.
//!
//! The reconciler compares the old and new configuration maps by key and
//! value: new or changed entries register, deleted entries deregister.

use std::collections::BTreeMap;

/// Entries present in `new` that are absent from `old` or changed.
pub fn updated_items<T>(old: &BTreeMap<String, T>, new: &BTreeMap<String, T>) -> Vec<(String, T)>
where
    T: PartialEq + Clone,
{
    new.iter()
        .filter(|(key, value)| old.get(*key) != Some(value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Entries present in `old` that are absent from `new`.
pub fn deleted_items<T>(old: &BTreeMap<String, T>, new: &BTreeMap<String, T>) -> Vec<(String, T)>
where
    T: PartialEq + Clone,
{
    old.iter()
        .filter(|(key, _)| !new.contains_key(*key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Convenience pair of [`updated_items`] and [`deleted_items`].
pub fn changed_items<T>(
    old: &BTreeMap<String, T>,
    new: &BTreeMap<String, T>,
) -> (Vec<(String, T)>, Vec<(String, T)>)
where
    T: PartialEq + Clone,
{
    (updated_items(old, new), deleted_items(old, new))
}
