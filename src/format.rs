use crate::codec::NumberReader;
use crate::error::Error;

pub type SequenceNumber = u64;
pub const MAX_SEQUENCE_NUMBER: SequenceNumber = (1 << 56) - 1;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ValueType {
    Deletion = 0,
    Value = 1,
}

impl TryFrom<u8> for ValueType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0u8 => Ok(ValueType::Deletion),
            1u8 => Ok(ValueType::Value),
            _ => Err(Error::Corruption("unknown value type tag".into())),
        }
    }
}

// An internal key is the user key followed by a fixed64 tag that packs the
// sequence number with the entry's value type.

pub fn pack_sequence_and_type(seq: SequenceNumber, t: ValueType) -> u64 {
    assert!(seq <= MAX_SEQUENCE_NUMBER);
    (seq << 8) | t as u64
}

pub fn extract_user_key(internal_key: &[u8]) -> &[u8] {
    assert!(internal_key.len() >= 8);
    &internal_key[..internal_key.len() - 8]
}

pub fn extract_tag(internal_key: &[u8]) -> u64 {
    assert!(internal_key.len() >= 8);
    let mut buf = &internal_key[internal_key.len() - 8..];
    buf.read_u64_le().unwrap()
}
