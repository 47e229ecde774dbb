//! Array with O(1) removal of arbitrary elements.
//!
//! Each element's owner records the position returned by [`IndexedList::push`].
//! Removal swaps the tail into the freed slot and reports the move through a
//! callback so the owner of the moved element can update its stored position.
//!
//! Removing while scanning forward skips the element swapped in from the tail,
//! so callers that remove during traversal iterate back-to-front.

/// A list whose elements know their own index.
#[derive(Debug, Clone)]
pub struct IndexedList<T> {
    items: Vec<T>,
}

impl<T> Default for IndexedList<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T> IndexedList<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an item, returning its index.
    pub fn push(&mut self, item: T) -> usize {
        self.items.push(item);
        self.items.len() - 1
    }

    /// Remove the item at `index`.
    ///
    /// If the item was not the last one, the former tail now lives at `index`
    /// and `reindex(moved, index)` is called for it.
    pub fn remove_at(&mut self, index: usize, mut reindex: impl FnMut(&T, usize)) -> Option<T> {
        if index >= self.items.len() {
            return None;
        }
        let removed = self.items.swap_remove(index);
        if let Some(moved) = self.items.get(index) {
            reindex(moved, index);
        }
        Some(removed)
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }
}

impl<'a, T> IntoIterator for &'a IndexedList<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Owner-side bookkeeping: item -> recorded index.
    fn build(items: &[&'static str]) -> (IndexedList<&'static str>, HashMap<&'static str, usize>) {
        let mut list = IndexedList::new();
        let mut index = HashMap::new();
        for item in items {
            let i = list.push(*item);
            index.insert(*item, i);
        }
        (list, index)
    }

    fn assert_consistent(list: &IndexedList<&'static str>, index: &HashMap<&'static str, usize>) {
        for (i, item) in list.iter().enumerate() {
            assert_eq!(index[item], i, "stale index for {}", item);
        }
    }

    #[test]
    fn test_push_returns_positions() {
        let mut list = IndexedList::new();
        assert_eq!(list.push('a'), 0);
        assert_eq!(list.push('b'), 1);
        assert_eq!(list.push('c'), 2);
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn test_remove_middle_moves_tail() {
        let (mut list, mut index) = build(&["a", "b", "c", "d"]);

        let removed = list.remove_at(index["b"], |moved, i| {
            index.insert(*moved, i);
        });

        assert_eq!(removed, Some("b"));
        index.remove("b");
        assert_eq!(list.as_slice(), &["a", "d", "c"]);
        assert_consistent(&list, &index);
    }

    #[test]
    fn test_remove_last_does_not_reindex() {
        let (mut list, _) = build(&["a", "b"]);
        let mut calls = 0;

        list.remove_at(1, |_, _| calls += 1);

        assert_eq!(calls, 0);
        assert_eq!(list.as_slice(), &["a"]);
    }

    #[test]
    fn test_remove_only_element() {
        let (mut list, _) = build(&["a"]);
        assert_eq!(list.remove_at(0, |_, _| panic!("nothing to move")), Some("a"));
        assert!(list.is_empty());
    }

    #[test]
    fn test_remove_out_of_bounds() {
        let (mut list, _) = build(&["a"]);
        assert_eq!(list.remove_at(3, |_, _| {}), None);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_back_to_front_removal_visits_everything() {
        let (mut list, mut index) = build(&["a", "b", "c", "d", "e"]);
        let mut removed = Vec::new();

        for i in (0..list.len()).rev() {
            let item = list.remove_at(i, |moved, at| {
                index.insert(*moved, at);
            });
            removed.extend(item);
        }

        assert!(list.is_empty());
        assert_eq!(removed, vec!["e", "d", "c", "b", "a"]);
    }

    #[test]
    fn test_indices_stay_consistent_under_mixed_removal() {
        let (mut list, mut index) = build(&["a", "b", "c", "d", "e", "f"]);

        for victim in ["a", "e", "c"] {
            let at = index.remove(victim).unwrap();
            list.remove_at(at, |moved, i| {
                index.insert(*moved, i);
            });
            assert_consistent(&list, &index);
        }

        let g = list.push("g");
        index.insert("g", g);
        assert_consistent(&list, &index);
        assert_eq!(list.len(), 4);
    }
}
