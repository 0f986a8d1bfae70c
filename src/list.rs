use core::fmt;
use core::marker::PhantomData;
use core::mem;
use core::ptr::{self, NonNull};

/// A node in the doubly linked list.
///
/// Contains a value and pointers to the previous and next entries.
/// This structure is not meant to be used directly by users of the `List`.
pub(crate) struct Entry<T> {
    /// The value stored in this entry. Uses MaybeUninit to allow for sigil nodes.
    val: mem::MaybeUninit<T>,
    /// Pointer to the previous entry in the list.
    prev: *mut Entry<T>,
    /// Pointer to the next entry in the list.
    next: *mut Entry<T>,
}

impl<T> Entry<T> {
    /// Creates a new entry with the given value.
    fn new(val: T) -> Self {
        Entry {
            val: mem::MaybeUninit::new(val),
            prev: ptr::null_mut(),
            next: ptr::null_mut(),
        }
    }

    /// Creates a new sigil (sentinel) entry without initializing the value.
    ///
    /// Sigil entries are used as head and tail markers in the list.
    fn new_sigil() -> Self {
        Entry {
            val: mem::MaybeUninit::uninit(),
            prev: ptr::null_mut(),
            next: ptr::null_mut(),
        }
    }

    /// Returns a reference to the value held by this entry.
    ///
    /// # Safety
    ///
    /// The entry must not be a sigil node.
    pub(crate) unsafe fn get_value(&self) -> &T {
        // SAFETY: the caller guarantees this is a non-sigil entry, so `val` is initialized
        unsafe { self.val.assume_init_ref() }
    }

    /// Consumes a detached entry and returns its value.
    ///
    /// Values are held in `MaybeUninit`, so an entry that is dropped without
    /// going through this method leaks its value.
    pub(crate) fn into_value(self: Box<Self>) -> T {
        // SAFETY: only non-sigil entries are ever handed out of a list, and those
        // are always created through `Entry::new`
        unsafe { self.val.assume_init_read() }
    }
}

/// An unbounded doubly linked list with stable node addresses.
///
/// The front of the list holds the eldest entry and the back holds the most
/// recently appended one, so an LRU queue evicts from the front and refreshes
/// by moving an entry to the back. Callers keep the raw entry pointer returned
/// by [`List::push_back`] to unlink or move the entry in O(1).
///
/// The list owns every value it holds. Entries removed with [`List::remove`] or
/// [`List::remove_first`] are returned boxed; the caller must either re-attach
/// them to a list or consume them with [`Entry::into_value`].
pub(crate) struct List<T> {
    /// Current number of items in the list.
    len: usize,
    /// Pointer to the head sentinel node.
    head: *mut Entry<T>,
    /// Pointer to the tail sentinel node.
    tail: *mut Entry<T>,
}

// SAFETY: the list exclusively owns its entries; moving it to another thread
// moves ownership of every `T` with it.
unsafe impl<T: Send> Send for List<T> {}

// SAFETY: every operation that touches entry links requires `&mut self`.
unsafe impl<T: Sync> Sync for List<T> {}

impl<T> List<T> {
    /// Creates a new, empty list.
    pub(crate) fn new() -> List<T> {
        let head = Box::into_raw(Box::new(Entry::new_sigil()));
        let tail = Box::into_raw(Box::new(Entry::new_sigil()));

        // SAFETY: head and tail are newly allocated and valid pointers
        unsafe {
            (*head).next = tail;
            (*tail).prev = head;
        }

        List { len: 0, head, tail }
    }

    /// Returns the current number of items in the list.
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the list contains no items.
    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns a reference to the eldest value without removing it.
    pub(crate) fn front(&self) -> Option<&T> {
        if self.is_empty() {
            return None;
        }
        // SAFETY: the list is not empty, so head.next is a live non-sigil entry
        unsafe { Some((*(*self.head).next).get_value()) }
    }

    /// Returns a pointer to the eldest entry, or null if the list is empty.
    pub(crate) fn front_ptr(&self) -> *mut Entry<T> {
        if self.is_empty() {
            return ptr::null_mut();
        }
        // SAFETY: head is valid for the lifetime of the list
        unsafe { (*self.head).next }
    }

    /// Returns a pointer to the entry following `node`, or null at the end.
    ///
    /// # Safety
    ///
    /// `node` must be a live entry of this list.
    pub(crate) unsafe fn next_ptr(&self, node: *mut Entry<T>) -> *mut Entry<T> {
        // SAFETY: the caller guarantees node is linked into this list
        let next = unsafe { (*node).next };
        if next == self.tail {
            ptr::null_mut()
        } else {
            next
        }
    }

    /// Appends a value at the back of the list and returns its entry pointer.
    pub(crate) fn push_back(&mut self, v: T) -> *mut Entry<T> {
        let node = NonNull::from(Box::leak(Box::new(Entry::new(v)))).as_ptr();
        // SAFETY: node is a newly allocated entry that is not part of any list yet
        unsafe { self.attach_last(node) };
        self.len += 1;
        node
    }

    /// Removes the eldest entry of the list.
    pub(crate) fn remove_first(&mut self) -> Option<Box<Entry<T>>> {
        if self.is_empty() {
            return None;
        }
        // SAFETY: the list is not empty, so head.next is a live non-sigil entry
        unsafe {
            let first = (*self.head).next;
            self.detach(first);
            self.len -= 1;
            Some(Box::from_raw(first))
        }
    }

    /// Detaches a node from the list and returns it as a Box.
    ///
    /// # Safety
    ///
    /// The caller must ensure that `node` is a valid pointer to a node in this list
    /// (not null, not freed, and actually part of this list).
    pub(crate) unsafe fn remove(&mut self, node: *mut Entry<T>) -> Option<Box<Entry<T>>> {
        if self.is_empty() || node.is_null() || node == self.head || node == self.tail {
            return None;
        }

        // SAFETY: the caller guarantees node is a member of this list
        unsafe {
            self.detach(node);
            self.len -= 1;
            Some(Box::from_raw(node))
        }
    }

    /// Moves a node to the back of the list.
    ///
    /// # Safety
    ///
    /// The caller must ensure that `node` points to a valid entry in this list.
    pub(crate) unsafe fn move_to_back(&mut self, node: *mut Entry<T>) {
        if node.is_null() || node == self.head || node == self.tail {
            return;
        }

        // SAFETY: the caller guarantees node is linked into this list
        unsafe {
            if (*self.tail).prev == node {
                return;
            }
            self.detach(node);
            self.attach_last(node);
        }
    }

    /// Attaches a node taken from another list at the back of this one.
    ///
    /// # Safety
    ///
    /// `node` must come from [`Box::into_raw`] on an entry previously removed from a
    /// list, and must not currently be linked anywhere.
    pub(crate) unsafe fn attach_last_from_other_list(&mut self, node: *mut Entry<T>) {
        // SAFETY: forwarded from the caller's contract
        unsafe { self.attach_last(node) };
        self.len += 1;
    }

    /// Clears the list, dropping all values.
    pub(crate) fn clear(&mut self) {
        while let Some(entry) = self.remove_first() {
            drop(entry.into_value());
        }
    }

    /// Returns an iterator over the values from eldest to newest.
    pub(crate) fn iter(&self) -> Iter<'_, T> {
        Iter {
            next: self.front_ptr(),
            list: self,
            _marker: PhantomData,
        }
    }

    /// Unlinks a node from its neighbours without touching the length.
    ///
    /// # Safety
    ///
    /// `node` must be a valid, linked, non-sigil entry of this list.
    unsafe fn detach(&mut self, node: *mut Entry<T>) {
        // SAFETY: node is linked, so its neighbours are valid entries
        unsafe {
            (*(*node).prev).next = (*node).next;
            (*(*node).next).prev = (*node).prev;
            (*node).prev = ptr::null_mut();
            (*node).next = ptr::null_mut();
        }
    }

    /// Links a node just before the tail sentinel without touching the length.
    ///
    /// # Safety
    ///
    /// `node` must be valid and not linked into any list.
    unsafe fn attach_last(&mut self, node: *mut Entry<T>) {
        // SAFETY: tail is valid for the lifetime of the list and node is unlinked
        unsafe {
            (*node).next = self.tail;
            (*node).prev = (*self.tail).prev;
            (*self.tail).prev = node;
            (*(*node).prev).next = node;
        }
    }
}

impl<T> Default for List<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for List<T> {
    fn drop(&mut self) {
        self.clear();

        // SAFETY: head and tail were allocated in `new` and are freed exactly once here
        unsafe {
            drop(Box::from_raw(self.head));
            drop(Box::from_raw(self.tail));
        }
    }
}

impl<T> fmt::Debug for List<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("List").field("length", &self.len).finish()
    }
}

/// Iterator over the values of a [`List`], eldest first.
pub(crate) struct Iter<'a, T> {
    next: *mut Entry<T>,
    list: &'a List<T>,
    _marker: PhantomData<&'a T>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        if self.next.is_null() {
            return None;
        }
        let current = self.next;
        // SAFETY: the shared borrow of the list keeps every entry alive and linked
        unsafe {
            self.next = self.list.next_ptr(current);
            Some((*current).get_value())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(list: &mut List<u32>) -> Vec<u32> {
        let mut out = Vec::new();
        while let Some(entry) = list.remove_first() {
            out.push(entry.into_value());
        }
        out
    }

    #[test]
    fn test_push_back_keeps_insertion_order() {
        let mut list = List::new();
        list.push_back(10);
        list.push_back(20);
        list.push_back(30);
        assert_eq!(list.len(), 3);
        assert_eq!(list.front(), Some(&10));
        assert_eq!(drain(&mut list), vec![10, 20, 30]);
        assert!(list.is_empty());
    }

    #[test]
    fn test_move_to_back() {
        let mut list = List::new();
        let first = list.push_back(10);
        list.push_back(20);
        let last = list.push_back(30);

        unsafe {
            list.move_to_back(first);
            // Already at the back: no-op
            list.move_to_back(first);
            list.move_to_back(last);
        }
        assert_eq!(list.len(), 3, "Length should remain constant after moves");
        assert_eq!(drain(&mut list), vec![20, 10, 30]);
    }

    #[test]
    fn test_remove_middle() {
        let mut list = List::new();
        list.push_back(1);
        let middle = list.push_back(2);
        list.push_back(3);

        let removed = unsafe { list.remove(middle) }.unwrap();
        assert_eq!(removed.into_value(), 2);
        assert_eq!(list.len(), 2);
        assert_eq!(drain(&mut list), vec![1, 3]);
    }

    #[test]
    fn test_remove_null_is_none() {
        let mut list = List::<u32>::new();
        list.push_back(1);
        assert!(unsafe { list.remove(ptr::null_mut()) }.is_none());
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_cross_list_node_transfer() {
        let mut list1 = List::new();
        let mut list2 = List::new();

        let node1 = list1.push_back(10);
        list1.push_back(20);

        let removed = unsafe { list1.remove(node1) }.unwrap();
        let raw = Box::into_raw(removed);
        unsafe { list2.attach_last_from_other_list(raw) };

        assert_eq!(list1.len(), 1);
        assert_eq!(list2.len(), 1);
        // The entry keeps its address across lists
        assert_eq!(list2.front_ptr(), node1);

        assert_eq!(drain(&mut list1), vec![20]);
        assert_eq!(drain(&mut list2), vec![10]);
    }

    #[test]
    fn test_iter_and_next_ptr() {
        let mut list = List::new();
        for i in 0..5 {
            list.push_back(i);
        }
        let seen: Vec<u32> = list.iter().copied().collect();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);

        let mut cursor = list.front_ptr();
        let mut count = 0;
        while !cursor.is_null() {
            count += 1;
            cursor = unsafe { list.next_ptr(cursor) };
        }
        assert_eq!(count, 5);
    }

    #[test]
    fn test_clear_drops_values() {
        use std::sync::Arc;

        let shared = Arc::new(());
        let mut list = List::new();
        for _ in 0..4 {
            list.push_back(Arc::clone(&shared));
        }
        assert_eq!(Arc::strong_count(&shared), 5);
        list.clear();
        assert_eq!(Arc::strong_count(&shared), 1);

        list.push_back(Arc::clone(&shared));
        drop(list);
        assert_eq!(Arc::strong_count(&shared), 1);
    }
}
