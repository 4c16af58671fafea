use std::{io::Write, slice::from_raw_parts_mut, sync::Arc};

use crate::{
    arena::Arena,
    cmp::{get_length_prefixed, Comparator, InternalKeyComparator, MemtableKeyComparator},
    codec::{varint_length, NumberWriter, VarIntReader, VarIntWriter},
    format::{extract_tag, extract_user_key, pack_sequence_and_type, SequenceNumber, ValueType},
    skiplist::{SkipList, SkipListIter},
    slice::Slice,
};

/// In-memory write buffer: entries are encoded into arena storage and
/// indexed by a skip list under the memtable key order. `add` needs the
/// same external serialization as skip-list inserts; reads may run
/// concurrently.
pub struct MemTable {
    comparator: InternalKeyComparator,
    arena: Arc<Arena>,
    table: SkipList<Slice, MemtableKeyComparator>,
}

impl MemTable {
    pub fn new(user_comparator: Arc<dyn Comparator<Slice> + Send + Sync>) -> MemTable {
        let comparator = InternalKeyComparator::new(user_comparator);
        let arena = Arc::new(Arena::new());
        let table = SkipList::new(
            MemtableKeyComparator::new(comparator.clone()),
            arena.clone(),
        );
        MemTable {
            comparator,
            arena,
            table,
        }
    }

    pub fn is_empty(&self) -> bool {
        let mut iter = self.table.iter();
        iter.seek_to_first();
        !iter.valid()
    }

    pub fn approximate_memory_usage(&self) -> usize {
        self.arena.memory_usage()
    }

    pub fn add(&self, seq: SequenceNumber, t: ValueType, key: &[u8], value: &[u8]) {
        // Format of an entry is concatenation of:
        //  key_size     : varint32 of internal_key.size()
        //  key bytes    : char[internal_key.size()]
        //  tag          : uint64((sequence << 8) | type)
        //  value_size   : varint32 of value.size()
        //  value bytes  : char[value.size()]
        let key_size = key.len() + 8;
        let value_size = value.len();
        let size = varint_length(key_size as u64)
            + key_size
            + varint_length(value_size as u64)
            + value_size;

        let p = self.arena.allocate(size);
        let mut buf = unsafe { from_raw_parts_mut(p, size) };
        buf.write_var_u32(key_size as u32).unwrap();
        buf.write_all(key).unwrap();
        buf.write_u64_le(pack_sequence_and_type(seq, t)).unwrap();
        buf.write_var_u32(value_size as u32).unwrap();
        buf.write_all(value).unwrap();
        assert!(buf.is_empty());

        self.table.insert(Slice::new(p, size));
    }

    /// Look up the freshest entry for the key at or below the snapshot
    /// carried by `key`. Returns `(value, deleted)`: a live value, or
    /// `(None, true)` when the freshest entry is a tombstone, or
    /// `(None, false)` when the user key is absent.
    pub fn get(&self, key: &LookupKey) -> (Option<Vec<u8>>, bool) {
        let mut iter = self.table.iter();
        iter.seek(&Slice::from(key.memtable_key()));
        if !iter.valid() {
            return (None, false);
        }

        // The entry found is the earliest at or after the lookup key; it is
        // a hit only if its user key actually matches.
        let entry = unsafe { iter.key().as_bytes() };
        let internal_key = get_length_prefixed(entry);
        let user_key = Slice::from(extract_user_key(internal_key));
        if self
            .comparator
            .user_comparator()
            .compare(&user_key, &Slice::from(key.user_key()))
            != std::cmp::Ordering::Equal
        {
            return (None, false);
        }

        let tag = extract_tag(internal_key);
        match ValueType::try_from((tag & 0xff) as u8).unwrap() {
            ValueType::Value => {
                let mut rest = &entry[varint_length(internal_key.len() as u64) + internal_key.len()..];
                let (value_size, _) = rest.read_var_u32().unwrap();
                (Some(rest[..value_size as usize].to_vec()), false)
            }
            ValueType::Deletion => (None, true),
        }
    }

    pub fn iter(&self) -> MemTableIter<'_> {
        MemTableIter {
            iter: self.table.iter(),
        }
    }
}

/// Cursor over decoded memtable entries in internal-key order.
pub struct MemTableIter<'a> {
    iter: SkipListIter<'a, Slice, MemtableKeyComparator>,
}

impl<'a> MemTableIter<'a> {
    pub fn valid(&self) -> bool {
        self.iter.valid()
    }

    pub fn seek_to_first(&mut self) {
        self.iter.seek_to_first();
    }

    pub fn seek(&mut self, key: &LookupKey) {
        self.iter.seek(&Slice::from(key.memtable_key()));
    }

    pub fn next(&mut self) {
        self.iter.next();
    }

    /// The internal key of the current entry.
    pub fn key(&self) -> &[u8] {
        let entry = unsafe { self.iter.key().as_bytes() };
        get_length_prefixed(entry)
    }

    pub fn value(&self) -> &[u8] {
        let entry = unsafe { self.iter.key().as_bytes() };
        let internal_key = get_length_prefixed(entry);
        let rest = &entry[varint_length(internal_key.len() as u64) + internal_key.len()..];
        get_length_prefixed(rest)
    }
}

/// A key for reading the memtable at a point in time: the encoded form is a
/// memtable key whose tag makes it sort just before the freshest entry
/// visible at its sequence number, and after everything newer.
pub struct LookupKey {
    key: Vec<u8>,
    key_offset: usize,
}

impl LookupKey {
    pub fn new(user_key: &[u8], seq: SequenceNumber, t: ValueType) -> Self {
        let key_size = user_key.len() + 8;
        let size = key_size + varint_length(key_size as u64);

        let mut buf = Vec::with_capacity(size);
        buf.write_var_u32(key_size as u32).unwrap();
        buf.write_all(user_key).unwrap();
        buf.write_u64_le(pack_sequence_and_type(seq, t)).unwrap();

        LookupKey {
            key: buf,
            key_offset: varint_length(key_size as u64),
        }
    }

    pub fn memtable_key(&self) -> &[u8] {
        self.key.as_slice()
    }

    pub fn internal_key(&self) -> &[u8] {
        &self.key[self.key_offset..]
    }

    pub fn user_key(&self) -> &[u8] {
        &self.key[self.key_offset..self.key.len() - 8]
    }
}
