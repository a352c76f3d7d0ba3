//! Collection that records which elements were added, updated and removed since it was
//! built, hydrated or last committed. Elements are matched by `Tracked::tracking_key`.

use std::fmt;
use std::future::Future;

/// Identity used to match collection elements.
pub trait Tracked: Clone {
    type Key: PartialEq + fmt::Debug;

    fn tracking_key(&self) -> Self::Key;
}

impl Tracked for serde_json::Value {
    type Key = serde_json::Value;

    fn tracking_key(&self) -> Self::Key {
        self.clone()
    }
}

impl Tracked for String {
    type Key = String;

    fn tracking_key(&self) -> Self::Key {
        self.clone()
    }
}

impl Tracked for i64 {
    type Key = i64;

    fn tracking_key(&self) -> Self::Key {
        *self
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum View {
    #[default]
    Current,
    Added,
    Updated,
    Removed,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TrackedCollection<T> {
    current: Vec<T>,
    added: Vec<T>,
    updated: Vec<T>,
    removed: Vec<T>,
}

impl<T> Default for TrackedCollection<T> {
    fn default() -> Self {
        TrackedCollection {
            current: Vec::new(),
            added: Vec::new(),
            updated: Vec::new(),
            removed: Vec::new(),
        }
    }
}

fn position<T: Tracked>(items: &[T], key: &T::Key) -> Option<usize> {
    items.iter().position(|x| x.tracking_key() == *key)
}

impl<T: Tracked> TrackedCollection<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the element with the same identity, or append a new one.
    /// A replaced element is logged once in `updated`; a later replace overwrites that entry.
    pub fn add(&mut self, item: T) {
        let key = item.tracking_key();
        match position(&self.current, &key) {
            Some(pos) => {
                self.current[pos] = item.clone();
                match position(&self.updated, &key) {
                    Some(i) => self.updated[i] = item,
                    None => self.updated.push(item),
                }
            }
            None => {
                self.current.push(item.clone());
                self.added.push(item);
            }
        }
    }

    /// Drop the element from `current` and log it in `removed` (once per identity).
    /// Logging happens even when the element is not currently held, so a persisted element
    /// that was never loaded can still be scheduled for deletion. Returns whether `current`
    /// held it.
    pub fn remove(&mut self, item: &T) -> bool {
        let key = item.tracking_key();
        let held = match position(&self.current, &key) {
            Some(pos) => {
                self.current.remove(pos);
                true
            }
            None => false,
        };
        if position(&self.removed, &key).is_none() {
            self.removed.push(item.clone());
        }
        held
    }

    /// Converge `current` to exactly `items`, logging the diff.
    pub fn update(&mut self, items: impl IntoIterator<Item = T>) {
        let items: Vec<T> = items.into_iter().collect();
        let keys: Vec<T::Key> = items.iter().map(Tracked::tracking_key).collect();
        for item in items {
            self.add(item);
        }
        let stale: Vec<T> = self
            .current
            .iter()
            .filter(|x| !keys.contains(&x.tracking_key()))
            .cloned()
            .collect();
        for item in &stale {
            self.remove(item);
        }
    }

    /// Hydrate from storage: `current` becomes `items` and every log is reset.
    pub fn set(&mut self, items: impl IntoIterator<Item = T>) {
        self.current.clear();
        for item in items {
            let key = item.tracking_key();
            match position(&self.current, &key) {
                Some(pos) => self.current[pos] = item,
                None => self.current.push(item),
            }
        }
        self.commit();
    }

    /// Move every current element into `removed`.
    pub fn clear(&mut self) {
        let drained = std::mem::take(&mut self.current);
        self.removed.extend(drained);
    }

    /// Synchronization point: forget the logged deltas, keep `current`.
    pub fn commit(&mut self) {
        self.added.clear();
        self.updated.clear();
        self.removed.clear();
    }

    pub fn view(&self, view: View) -> &[T] {
        match view {
            View::Current => &self.current,
            View::Added => &self.added,
            View::Updated => &self.updated,
            View::Removed => &self.removed,
        }
    }

    pub fn to_vec(&self, view: View) -> Vec<T> {
        self.view(view).to_vec()
    }

    pub fn has_changes(&self) -> bool {
        !(self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty())
    }

    pub fn len(&self) -> usize {
        self.current.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.current.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.current.iter_mut()
    }

    pub fn get(&self, key: &T::Key) -> Option<&T> {
        position(&self.current, key).map(|i| &self.current[i])
    }

    pub(crate) fn get_mut(&mut self, key: &T::Key) -> Option<&mut T> {
        position(&self.current, key).map(|i| &mut self.current[i])
    }

    pub fn contains(&self, item: &T) -> bool {
        position(&self.current, &item.tracking_key()).is_some()
    }

    pub fn map<U: Tracked>(&self, f: impl FnMut(&T) -> U) -> TrackedCollection<U> {
        self.current.iter().map(f).collect()
    }

    pub fn filter(&self, mut pred: impl FnMut(&T) -> bool) -> TrackedCollection<T> {
        self.current.iter().filter(|x| pred(x)).cloned().collect()
    }

    pub fn for_each(&self, f: impl FnMut(&T)) {
        self.current.iter().for_each(f);
    }

    pub async fn map_async<U, F, Fut>(&self, mut f: F) -> TrackedCollection<U>
    where
        U: Tracked,
        F: FnMut(&T) -> Fut,
        Fut: Future<Output = U>,
    {
        let mut out = TrackedCollection::new();
        for item in &self.current {
            out.add(f(item).await);
        }
        out
    }

    pub async fn filter_async<F, Fut>(&self, mut pred: F) -> TrackedCollection<T>
    where
        F: FnMut(&T) -> Fut,
        Fut: Future<Output = bool>,
    {
        let mut out = TrackedCollection::new();
        for item in &self.current {
            if pred(item).await {
                out.add(item.clone());
            }
        }
        out
    }

    pub async fn for_each_async<F, Fut>(&self, mut f: F)
    where
        F: FnMut(&T) -> Fut,
        Fut: Future<Output = ()>,
    {
        for item in &self.current {
            f(item).await;
        }
    }
}

impl<T: Tracked> FromIterator<T> for TrackedCollection<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut out = TrackedCollection::new();
        for item in iter {
            out.add(item);
        }
        out
    }
}

impl<'a, T> IntoIterator for &'a TrackedCollection<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.current.iter()
    }
}
