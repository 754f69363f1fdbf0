use std::collections::HashMap;
use std::num::NonZeroU64;

use super::Rid;

struct Entry<T> {
    resource: T,
    dependencies: Vec<Rid>,
}

/// Rid allocation plus the dependency graph that drives cascading frees.
pub(crate) struct ResourceRegistry<T> {
    next_id: NonZeroU64,
    entries: HashMap<Rid, Entry<T>>,
    dependents: HashMap<Rid, Vec<Rid>>,
}

impl<T> ResourceRegistry<T> {
    pub(crate) fn new() -> Self {
        Self {
            next_id: NonZeroU64::MIN,
            entries: HashMap::new(),
            dependents: HashMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, resource: T, dependencies: &[Rid]) -> Rid {
        let rid = Rid(self.next_id);
        self.next_id = self.next_id.saturating_add(1);

        let mut deps = dependencies.to_vec();
        deps.sort_unstable();
        deps.dedup();
        for dep in &deps {
            self.dependents.entry(*dep).or_default().push(rid);
        }

        self.entries.insert(
            rid,
            Entry {
                resource,
                dependencies: deps,
            },
        );
        rid
    }

    pub(crate) fn get(&self, rid: Rid) -> Option<&T> {
        self.entries.get(&rid).map(|e| &e.resource)
    }

    pub(crate) fn get_mut(&mut self, rid: Rid) -> Option<&mut T> {
        self.entries.get_mut(&rid).map(|e| &mut e.resource)
    }

    pub(crate) fn contains(&self, rid: Rid) -> bool {
        self.entries.contains_key(&rid)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn values(&self) -> impl Iterator<Item = &T> {
        self.entries.values().map(|e| &e.resource)
    }

    /// Removes `rid` and, transitively, everything that was built from it.
    /// Returned in removal order, dependents after the resource they used.
    pub(crate) fn remove(&mut self, rid: Rid) -> Vec<(Rid, T)> {
        let mut removed = Vec::new();
        let mut pending = vec![rid];

        while let Some(current) = pending.pop() {
            let Some(entry) = self.entries.remove(&current) else {
                continue;
            };

            for dep in &entry.dependencies {
                if let Some(list) = self.dependents.get_mut(dep) {
                    list.retain(|r| *r != current);
                    if list.is_empty() {
                        self.dependents.remove(dep);
                    }
                }
            }

            if let Some(children) = self.dependents.remove(&current) {
                pending.extend(children);
            }

            removed.push((current, entry.resource));
        }

        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removing_a_resource_cascades_to_dependents() {
        let mut registry = ResourceRegistry::new();
        let texture = registry.insert("texture", &[]);
        let sampler = registry.insert("sampler", &[]);
        let set = registry.insert("set", &[texture, sampler]);
        let unrelated = registry.insert("other set", &[sampler]);

        let removed: Vec<_> = registry.remove(texture).into_iter().map(|(r, _)| r).collect();
        assert_eq!(removed, vec![texture, set]);
        assert!(!registry.contains(set));
        assert!(registry.contains(unrelated));

        // The sampler no longer lists the freed set as a dependent.
        let removed = registry.remove(sampler);
        assert_eq!(removed.len(), 2);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn ids_are_never_reused() {
        let mut registry = ResourceRegistry::new();
        let a = registry.insert(1, &[]);
        registry.remove(a);
        let b = registry.insert(2, &[]);
        assert_ne!(a, b);
    }
}
