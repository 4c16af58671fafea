//! In-memory core of a log-structured key-value engine: an arena-backed
//! skip list used as the write buffer, plus the byte-slice view and the
//! fixed/varint codec its encoded entries rely on.
//!
//! Writers to a given skip list or memtable must be serialized externally;
//! readers run lock-free alongside the single writer.

mod arena;
mod cmp;
mod codec;
mod error;
mod format;
mod memtable;
mod skiplist;
mod slice;

pub use arena::{Arena, BLOCK_SIZE};
pub use cmp::{
    get_length_prefixed, BitwiseComparator, Comparator, InternalKeyComparator,
    MemtableKeyComparator,
};
pub use codec::{
    read_length_prefixed_slice, varint_length, write_length_prefixed_slice, NumberReader,
    NumberWriter, VarIntReader, VarIntWriter,
};
pub use error::{Error, Result};
pub use format::{
    extract_tag, extract_user_key, pack_sequence_and_type, SequenceNumber, ValueType,
    MAX_SEQUENCE_NUMBER,
};
pub use memtable::{LookupKey, MemTable, MemTableIter};
pub use skiplist::{SkipList, SkipListIter, MAX_HEIGHT};
pub use slice::Slice;
