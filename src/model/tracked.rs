use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;

use super::event::Event;

/// Where [`TrackedList::move_to`] places the moved item relative to its target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placement {
    Before,
    After,
}

/// Ordered list that announces every change.
///
/// Mutation happens first and the event fires after, so observers always see
/// the new state. Nothing here fails for a missing item; callers check the
/// returned `bool`/`Option`.
pub struct TrackedList<T> {
    items: RefCell<Vec<T>>,
    item_added: Event<T>,
    item_removed: Event<T>,
    order_changed: Event<()>,
}

impl<T: Clone + PartialEq> TrackedList<T> {
    pub fn new() -> Self {
        Self::from_vec(Vec::new())
    }

    /// Seeds the list without raising events.
    pub fn from_vec(items: Vec<T>) -> Self {
        Self {
            items: RefCell::new(items),
            item_added: Event::new(),
            item_removed: Event::new(),
            order_changed: Event::new(),
        }
    }

    pub fn item_added(&self) -> &Event<T> {
        &self.item_added
    }

    pub fn item_removed(&self) -> &Event<T> {
        &self.item_removed
    }

    pub fn order_changed(&self) -> &Event<()> {
        &self.order_changed
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<T> {
        self.items.borrow().get(index).cloned()
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.items.borrow().clone()
    }

    pub fn contains(&self, item: &T) -> bool {
        self.items.borrow().contains(item)
    }

    pub fn index_of(&self, item: &T) -> Option<usize> {
        self.items.borrow().iter().position(|i| i == item)
    }

    pub fn add(&self, item: T) {
        self.items.borrow_mut().push(item.clone());
        self.item_added.emit(&item);
    }

    /// Inserts at `index`, clamped to the end of the list.
    pub fn insert(&self, index: usize, item: T) {
        {
            let mut items = self.items.borrow_mut();
            let index = index.min(items.len());
            items.insert(index, item.clone());
        }
        self.item_added.emit(&item);
    }

    pub fn remove(&self, item: &T) -> bool {
        match self.index_of(item) {
            Some(index) => self.remove_at(index).is_some(),
            None => false,
        }
    }

    pub fn remove_at(&self, index: usize) -> Option<T> {
        let removed = {
            let mut items = self.items.borrow_mut();
            if index >= items.len() {
                return None;
            }
            items.remove(index)
        };
        self.item_removed.emit(&removed);
        Some(removed)
    }

    /// Moves `item` to sit directly before or after `target`.
    pub fn move_to(&self, item: &T, target: &T, placement: Placement) -> bool {
        if item == target {
            return false;
        }
        {
            let mut items = self.items.borrow_mut();
            let Some(from) = items.iter().position(|i| i == item) else {
                return false;
            };
            if !items.iter().any(|i| i == target) {
                return false;
            }
            let moved = items.remove(from);
            let Some(target_index) = items.iter().position(|i| i == target) else {
                return false;
            };
            let to = match placement {
                Placement::Before => target_index,
                Placement::After => target_index + 1,
            };
            items.insert(to, moved);
        }
        self.order_changed.emit(&());
        true
    }

    /// Moves the item at `from` so that it ends up at index `to`.
    pub fn move_index(&self, from: usize, to: usize) -> bool {
        {
            let mut items = self.items.borrow_mut();
            if from >= items.len() || from == to {
                return false;
            }
            let moved = items.remove(from);
            let to = to.min(items.len());
            items.insert(to, moved);
        }
        self.order_changed.emit(&());
        true
    }

    pub fn find_index(&self, start: usize, pred: impl Fn(&T) -> bool) -> Option<usize> {
        self.items
            .borrow()
            .iter()
            .enumerate()
            .skip(start)
            .find(|(_, item)| pred(item))
            .map(|(i, _)| i)
    }

    /// Scans backwards from `start` (inclusive), or from the end when `None`.
    pub fn find_last_index(&self, start: Option<usize>, pred: impl Fn(&T) -> bool) -> Option<usize> {
        let items = self.items.borrow();
        if items.is_empty() {
            return None;
        }
        let last = start.unwrap_or(items.len() - 1).min(items.len() - 1);
        (0..=last).rev().find(|&i| pred(&items[i]))
    }

    /// Replaces the whole contents.
    ///
    /// Raises `item_removed` for dropped items, `item_added` for new ones and a
    /// single `order_changed`.
    pub fn reset(&self, new_items: Vec<T>) {
        let old = self.items.replace(new_items.clone());
        for item in old.iter().filter(|i| !new_items.contains(i)) {
            self.item_removed.emit(item);
        }
        for item in new_items.iter().filter(|i| !old.contains(i)) {
            self.item_added.emit(item);
        }
        self.order_changed.emit(&());
    }

    /// Starts a stable multi-key sort. Nothing changes until
    /// [`PendingSort::save`] commits it.
    pub fn sort_by_key<'a, K: Ord + 'a>(&'a self, key: impl Fn(&T) -> K + 'a) -> PendingSort<'a, T> {
        PendingSort {
            list: self,
            comparators: vec![Box::new(move |a: &T, b: &T| key(a).cmp(&key(b)))],
        }
    }
}

impl<T: Clone + PartialEq> Default for TrackedList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for TrackedList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.items.borrow().iter()).finish()
    }
}

type Comparator<'a, T> = Box<dyn Fn(&T, &T) -> Ordering + 'a>;

/// A sort being assembled over a [`TrackedList`].
pub struct PendingSort<'a, T> {
    list: &'a TrackedList<T>,
    comparators: Vec<Comparator<'a, T>>,
}

impl<'a, T: Clone + PartialEq> PendingSort<'a, T> {
    pub fn then_by_key<K: Ord + 'a>(mut self, key: impl Fn(&T) -> K + 'a) -> Self {
        self.comparators
            .push(Box::new(move |a: &T, b: &T| key(a).cmp(&key(b))));
        self
    }

    /// Applies the sort and raises exactly one `order_changed`.
    ///
    /// Ties keep their current relative order.
    pub fn save(self) {
        let mut items = self.list.to_vec();
        items.sort_by(|a, b| {
            self.comparators
                .iter()
                .map(|cmp| cmp(a, b))
                .find(|o| *o != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });
        *self.list.items.borrow_mut() = items;
        self.list.order_changed.emit(&());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    fn counters(list: &TrackedList<&'static str>) -> (Rc<Cell<u32>>, Rc<Cell<u32>>, Rc<Cell<u32>>) {
        let added = Rc::new(Cell::new(0));
        let removed = Rc::new(Cell::new(0));
        let reordered = Rc::new(Cell::new(0));
        let a = Rc::clone(&added);
        list.item_added().subscribe(move |_| a.set(a.get() + 1));
        let r = Rc::clone(&removed);
        list.item_removed().subscribe(move |_| r.set(r.get() + 1));
        let o = Rc::clone(&reordered);
        list.order_changed().subscribe(move |_| o.set(o.get() + 1));
        (added, removed, reordered)
    }

    #[test]
    fn test_add_insert_remove_raise_events() {
        let list = TrackedList::new();
        let (added, removed, _) = counters(&list);
        list.add("a");
        list.insert(0, "b");
        list.insert(99, "c");
        assert_eq!(list.to_vec(), vec!["b", "a", "c"]);
        assert_eq!(added.get(), 3);

        assert!(list.remove(&"a"));
        assert_eq!(list.remove_at(0), Some("b"));
        assert_eq!(removed.get(), 2);
        assert_eq!(list.to_vec(), vec!["c"]);
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let list = TrackedList::from_vec(vec!["a"]);
        let (_, removed, _) = counters(&list);
        assert!(!list.remove(&"z"));
        assert_eq!(list.remove_at(5), None);
        assert_eq!(removed.get(), 0);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_move_to() {
        let list = TrackedList::from_vec(vec!["a", "b", "c", "d"]);
        let (_, _, reordered) = counters(&list);

        assert!(list.move_to(&"a", &"c", Placement::After));
        assert_eq!(list.to_vec(), vec!["b", "c", "a", "d"]);
        assert!(list.move_to(&"d", &"b", Placement::Before));
        assert_eq!(list.to_vec(), vec!["d", "b", "c", "a"]);
        assert_eq!(reordered.get(), 2);

        assert!(!list.move_to(&"b", &"b", Placement::After));
        assert!(!list.move_to(&"x", &"b", Placement::After));
        assert_eq!(reordered.get(), 2);
    }

    #[test]
    fn test_sort_is_stable_and_fires_once() {
        let list = TrackedList::from_vec(vec!["bb", "a", "cc", "d", "aa"]);
        let (added, removed, reordered) = counters(&list);
        list.sort_by_key(|s| s.len()).save();
        assert_eq!(list.to_vec(), vec!["a", "d", "bb", "cc", "aa"]);
        assert_eq!(reordered.get(), 1);
        assert_eq!(added.get() + removed.get(), 0);

        list.sort_by_key(|s| s.len()).then_by_key(|s| s.to_string()).save();
        assert_eq!(list.to_vec(), vec!["a", "d", "aa", "bb", "cc"]);
        assert_eq!(reordered.get(), 2);
    }

    #[test]
    fn test_sort_empty_still_fires_once() {
        let list = TrackedList::<&'static str>::new();
        let (_, _, reordered) = counters(&list);
        list.sort_by_key(|s| s.len()).save();
        assert_eq!(reordered.get(), 1);
    }

    #[test]
    fn test_find_index_and_last_index() {
        let list = TrackedList::from_vec(vec![1, 5, 2, 6, 3]);
        assert_eq!(list.find_index(0, |v| *v > 4), Some(1));
        assert_eq!(list.find_index(2, |v| *v > 4), Some(3));
        assert_eq!(list.find_index(4, |v| *v > 4), None);
        assert_eq!(list.find_last_index(None, |v| *v > 4), Some(3));
        assert_eq!(list.find_last_index(Some(2), |v| *v > 4), Some(1));
        assert_eq!(list.find_last_index(None, |v| *v > 10), None);
    }

    #[test]
    fn test_reset_reports_membership_changes() {
        let list = TrackedList::from_vec(vec!["a", "b"]);
        let (added, removed, reordered) = counters(&list);
        list.reset(vec!["b", "c"]);
        assert_eq!(list.to_vec(), vec!["b", "c"]);
        assert_eq!((added.get(), removed.get(), reordered.get()), (1, 1, 1));
    }

    #[test]
    fn test_move_index() {
        let list = TrackedList::from_vec(vec!["a", "b", "c"]);
        assert!(list.move_index(0, 2));
        assert_eq!(list.to_vec(), vec!["b", "c", "a"]);
        assert!(!list.move_index(1, 1));
        assert!(!list.move_index(7, 0));
    }
}
