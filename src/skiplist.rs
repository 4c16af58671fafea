use std::{
    cell::RefCell,
    cmp::Ordering,
    mem::size_of,
    ptr,
    sync::{
        atomic::{
            AtomicPtr, AtomicUsize,
            Ordering::{Acquire, Relaxed, Release},
        },
        Arc,
    },
};

use rand::{rngs::StdRng, RngCore, SeedableRng};

use crate::{arena::Arena, cmp::Comparator};

pub const MAX_HEIGHT: usize = 12;
const BRANCHING_FACTOR: u32 = 4;

// The tower is declared at full height but nodes are allocated truncated:
// a node of height h owns exactly tower[0..h]. repr(C) keeps the tower as
// the trailing field so the unused slots fall off the end of the region.
#[repr(C)]
struct Node<K> {
    key: K,
    tower: [AtomicPtr<Node<K>>; MAX_HEIGHT],
}

impl<K> Node<K> {
    /// Acquire load, so a successor observed through this link is fully
    /// initialized, key and tower included.
    fn next(&self, level: usize) -> *mut Node<K> {
        self.tower[level].load(Acquire)
    }

    /// Release store: the publication point for `node` at `level`.
    fn set_next(&self, level: usize, node: *mut Node<K>) {
        self.tower[level].store(node, Release);
    }

    fn no_barrier_next(&self, level: usize) -> *mut Node<K> {
        self.tower[level].load(Relaxed)
    }

    fn no_barrier_set_next(&self, level: usize, node: *mut Node<K>) {
        self.tower[level].store(node, Relaxed);
    }
}

/// Ordered index over keys living in an arena.
///
/// Any number of threads may read concurrently with a single inserting
/// writer; serializing writers is the caller's job. Readers must keep the
/// list (and with it the arena) alive for the duration of a traversal.
/// Nodes are never unlinked; everything is released with the arena.
///
/// Keys are dropped with the arena's raw bytes, so the key type should not
/// own heap storage of its own. Views and integers are the intended keys.
pub struct SkipList<K, C> {
    comparator: C,
    arena: Arc<Arena>,
    head: *mut Node<K>,
    // Height of the entire list. Modified only by insert; read racily by
    // readers, for whom a stale value is fine.
    max_height: AtomicUsize,
    rnd: RefCell<StdRng>,
}

unsafe impl<K: Send, C: Send> Send for SkipList<K, C> {}
unsafe impl<K: Send + Sync, C: Sync> Sync for SkipList<K, C> {}

impl<K, C: Comparator<K>> SkipList<K, C> {
    pub fn new(comparator: C, arena: Arc<Arena>) -> Self
    where
        K: Default,
    {
        // The head key is never compared against.
        let head = Self::new_node(&arena, K::default(), MAX_HEIGHT);
        SkipList {
            comparator,
            arena,
            head,
            max_height: AtomicUsize::new(1),
            rnd: RefCell::new(StdRng::seed_from_u64(0xdeadbeef)),
        }
    }

    /// Insert `key` into the list.
    ///
    /// Requires external serialization against other inserts, and that no
    /// key comparing equal is already present.
    pub fn insert(&self, key: K) {
        let mut prev: [*mut Node<K>; MAX_HEIGHT] = [ptr::null_mut(); MAX_HEIGHT];
        let x = self.find_greater_or_equal(&key, Some(&mut prev));

        // Duplicate insertion is a caller bug.
        assert!(
            x.is_null() || unsafe { self.comparator.compare(&(*x).key, &key) != Ordering::Equal }
        );

        let height = self.random_height();
        let max_height = self.get_max_height();
        if height > max_height {
            for item in prev.iter_mut().take(height).skip(max_height) {
                *item = self.head;
            }
            // The height can move without synchronizing with readers. A
            // reader that sees the new value finds either head's still-null
            // link at that level (null sorts after every key, so it drops
            // a level) or the new node once it is published below.
            self.max_height.store(height, Relaxed);
        }

        let x = Self::new_node(&self.arena, key, height);
        for level in 0..height {
            unsafe {
                // The node is invisible until the release store below, so
                // its own links need no barriers.
                (*x).no_barrier_set_next(level, (*prev[level]).no_barrier_next(level));
                (*prev[level]).set_next(level, x);
            }
        }
    }

    /// True iff an entry comparing equal to `key` is in the list.
    pub fn contains(&self, key: &K) -> bool {
        let x = self.find_greater_or_equal(key, None);
        !x.is_null() && unsafe { self.comparator.compare(&(*x).key, key) == Ordering::Equal }
    }

    pub fn iter(&self) -> SkipListIter<'_, K, C> {
        SkipListIter {
            list: self,
            node: ptr::null_mut(),
        }
    }

    fn new_node(arena: &Arena, key: K, height: usize) -> *mut Node<K> {
        let unused = (MAX_HEIGHT - height) * size_of::<AtomicPtr<Node<K>>>();
        let size = size_of::<Node<K>>() - unused;
        let node = arena.allocate_aligned(size) as *mut Node<K>;
        unsafe {
            ptr::write(ptr::addr_of_mut!((*node).key), key);
            let tower = ptr::addr_of_mut!((*node).tower) as *mut AtomicPtr<Node<K>>;
            for level in 0..height {
                ptr::write(tower.add(level), AtomicPtr::new(ptr::null_mut()));
            }
        }
        node
    }

    fn get_max_height(&self) -> usize {
        self.max_height.load(Relaxed)
    }

    fn random_height(&self) -> usize {
        let mut rnd = self.rnd.borrow_mut();
        let mut height = 1;
        while height < MAX_HEIGHT && rnd.next_u32() % BRANCHING_FACTOR == 0 {
            height += 1;
        }
        height
    }

    /// True if `key` sorts strictly after the key in `node`. A null node
    /// acts as an infinite key.
    fn key_is_after_node(&self, key: &K, node: *mut Node<K>) -> bool {
        !node.is_null() && unsafe { self.comparator.compare(&(*node).key, key) == Ordering::Less }
    }

    /// The earliest node at or after `key`, or null if there is none. When
    /// `prev` is given, it is filled with the blocking node per level.
    fn find_greater_or_equal(
        &self,
        key: &K,
        mut prev: Option<&mut [*mut Node<K>; MAX_HEIGHT]>,
    ) -> *mut Node<K> {
        let mut x = self.head;
        let mut level = self.get_max_height() - 1;
        loop {
            let next = unsafe { (*x).next(level) };
            if self.key_is_after_node(key, next) {
                // Keep searching in this list.
                x = next;
            } else {
                if let Some(prev) = prev.as_mut() {
                    prev[level] = x;
                }
                if level == 0 {
                    return next;
                }
                // Switch to next list.
                level -= 1;
            }
        }
    }

    /// The latest node before `key`, or head if there is none.
    fn find_less_than(&self, key: &K) -> *mut Node<K> {
        let mut x = self.head;
        let mut level = self.get_max_height() - 1;
        loop {
            let next = unsafe { (*x).next(level) };
            if next.is_null()
                || unsafe { self.comparator.compare(&(*next).key, key) != Ordering::Less }
            {
                if level == 0 {
                    return x;
                }
                level -= 1;
            } else {
                x = next;
            }
        }
    }

    /// The last node in the list, or head if it is empty.
    fn find_last(&self) -> *mut Node<K> {
        let mut x = self.head;
        let mut level = self.get_max_height() - 1;
        loop {
            let next = unsafe { (*x).next(level) };
            if next.is_null() {
                if level == 0 {
                    return x;
                }
                level -= 1;
            } else {
                x = next;
            }
        }
    }
}

/// Cursor over the level-0 chain. Head never leaks out: positions at head
/// are normalized to the invalid state.
pub struct SkipListIter<'a, K, C> {
    list: &'a SkipList<K, C>,
    node: *mut Node<K>,
}

impl<'a, K, C: Comparator<K>> SkipListIter<'a, K, C> {
    pub fn valid(&self) -> bool {
        !self.node.is_null()
    }

    pub fn key(&self) -> &K {
        assert!(self.valid());
        unsafe { &(*self.node).key }
    }

    pub fn next(&mut self) {
        assert!(self.valid());
        self.node = unsafe { (*self.node).next(0) };
    }

    /// Step back to the previous entry. There are no back links; this costs
    /// a fresh descent from the top.
    pub fn prev(&mut self) {
        assert!(self.valid());
        let node = self.list.find_less_than(self.key());
        self.node = if node == self.list.head {
            ptr::null_mut()
        } else {
            node
        };
    }

    /// Position at the first entry with a key >= target.
    pub fn seek(&mut self, target: &K) {
        self.node = self.list.find_greater_or_equal(target, None);
    }

    pub fn seek_to_first(&mut self) {
        self.node = unsafe { (*self.list.head).next(0) };
    }

    pub fn seek_to_last(&mut self) {
        let node = self.list.find_last();
        self.node = if node == self.list.head {
            ptr::null_mut()
        } else {
            node
        };
    }
}
