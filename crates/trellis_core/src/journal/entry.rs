//! Journal entry types and serialization.

use crate::component::{ComponentId, TOKEN_LEN};
use crate::error::{CoreError, CoreResult};

/// Size of the fixed part of an entry header: type (1) + component id length (1).
pub const ENTRY_PREFIX_SIZE: usize = 2;

/// Size of the payload length field.
pub const PAYLOAD_LEN_SIZE: usize = 4;

/// CRC size.
pub const CRC_SIZE: usize = 4;

/// Type of journal entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EntryType {
    /// Opaque redo bytes for a component.
    Object = 1,
    /// A block index plus full block contents.
    Block = 2,
    /// A whole replacement value.
    Buffer = 3,
    /// The preceding entries form a committed transaction.
    Commit = 4,
    /// The preceding entries are abandoned.
    Abort = 5,
    /// Everything before this point has been enacted.
    Checkpoint = 6,
}

impl EntryType {
    /// Converts a byte to an entry type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Object),
            2 => Some(Self::Block),
            3 => Some(Self::Buffer),
            4 => Some(Self::Commit),
            5 => Some(Self::Abort),
            6 => Some(Self::Checkpoint),
            _ => None,
        }
    }

    /// Converts the entry type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Returns true for the payload-free boundary entries.
    #[must_use]
    pub const fn is_marker(self) -> bool {
        matches!(self, Self::Commit | Self::Abort | Self::Checkpoint)
    }

    /// Returns the upper-case name used in logs and dumps.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Object => "OBJECT",
            Self::Block => "BLOCK",
            Self::Buffer => "BUFFER",
            Self::Commit => "COMMIT",
            Self::Abort => "ABORT",
            Self::Checkpoint => "CHECKPOINT",
        }
    }
}

impl std::fmt::Display for EntryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Start and end offsets of an entry written to the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryHandle {
    /// Offset of the first byte of the entry.
    pub start: u64,
    /// Offset just past the last byte of the entry.
    pub end: u64,
}

impl EntryHandle {
    /// Returns the encoded length of the entry.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.end - self.start
    }

    /// Returns true if the handle covers no bytes.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// One entry in the journal.
///
/// On disk, little-endian:
///
/// ```text
/// | type (1) | cid len (1) | cid (cid len) | payload len (4) | payload | crc32 (4) |
/// ```
///
/// The CRC covers every byte before it. Markers carry neither a component id
/// nor a payload; data entries always carry a component id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    entry_type: EntryType,
    component: Option<ComponentId>,
    payload: Vec<u8>,
}

impl JournalEntry {
    /// Maximum payload size (the length field is 4 bytes).
    pub const MAX_PAYLOAD_SIZE: usize = u32::MAX as usize;

    /// Creates a data entry.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `entry_type` is a marker.
    pub fn data(
        entry_type: EntryType,
        component: ComponentId,
        payload: Vec<u8>,
    ) -> CoreResult<Self> {
        if entry_type.is_marker() {
            return Err(CoreError::invalid_argument(format!(
                "{entry_type} is a marker and cannot carry component data"
            )));
        }
        Ok(Self {
            entry_type,
            component: Some(component),
            payload,
        })
    }

    /// Creates a marker entry.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `entry_type` is not a marker.
    pub fn marker(entry_type: EntryType) -> CoreResult<Self> {
        if !entry_type.is_marker() {
            return Err(CoreError::invalid_argument(format!(
                "{entry_type} is not a marker"
            )));
        }
        Ok(Self {
            entry_type,
            component: None,
            payload: Vec::new(),
        })
    }

    /// Creates an OBJECT entry.
    #[must_use]
    pub fn object(component: ComponentId, payload: Vec<u8>) -> Self {
        Self {
            entry_type: EntryType::Object,
            component: Some(component),
            payload,
        }
    }

    /// Creates a BUFFER entry.
    #[must_use]
    pub fn buffer(component: ComponentId, payload: Vec<u8>) -> Self {
        Self {
            entry_type: EntryType::Buffer,
            component: Some(component),
            payload,
        }
    }

    /// Creates a BLOCK entry for one block of a component.
    #[must_use]
    pub fn block(component: ComponentId, index: u64, contents: &[u8]) -> Self {
        Self {
            entry_type: EntryType::Block,
            component: Some(component),
            payload: encode_block(index, contents),
        }
    }

    /// Returns the entry type.
    #[must_use]
    pub fn entry_type(&self) -> EntryType {
        self.entry_type
    }

    /// Returns the component this entry belongs to, if it is a data entry.
    #[must_use]
    pub fn component(&self) -> Option<&ComponentId> {
        self.component.as_ref()
    }

    /// Returns the payload.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Returns true for COMMIT, ABORT and CHECKPOINT.
    #[must_use]
    pub fn is_marker(&self) -> bool {
        self.entry_type.is_marker()
    }

    /// Splits a BLOCK payload into its block index and contents.
    pub fn block_parts(&self) -> CoreResult<(u64, &[u8])> {
        if self.entry_type != EntryType::Block {
            return Err(CoreError::invalid_argument(format!(
                "expected BLOCK entry, got {}",
                self.entry_type
            )));
        }
        decode_block(&self.payload)
    }

    /// Returns the number of bytes this entry occupies in the journal.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        let cid_len = if self.component.is_some() { TOKEN_LEN } else { 0 };
        ENTRY_PREFIX_SIZE + cid_len + PAYLOAD_LEN_SIZE + self.payload.len() + CRC_SIZE
    }

    /// Serializes the entry, CRC included.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload exceeds [`Self::MAX_PAYLOAD_SIZE`].
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        encode_entry(self.entry_type, self.component.as_ref(), &self.payload)
    }

    /// Builds an entry from parts the decoder has already validated.
    pub(crate) fn from_parts(
        entry_type: EntryType,
        component: Option<ComponentId>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            entry_type,
            component,
            payload,
        }
    }
}

/// Serializes one entry without building a [`JournalEntry`] first.
pub(crate) fn encode_entry(
    entry_type: EntryType,
    component: Option<&ComponentId>,
    payload: &[u8],
) -> CoreResult<Vec<u8>> {
    match (entry_type.is_marker(), component) {
        (true, Some(_)) => {
            return Err(CoreError::invalid_argument(format!(
                "{entry_type} marker cannot name a component"
            )))
        }
        (false, None) => {
            return Err(CoreError::invalid_argument(format!(
                "{entry_type} entry needs a component id"
            )))
        }
        _ => {}
    }
    if entry_type.is_marker() && !payload.is_empty() {
        return Err(CoreError::invalid_argument(format!(
            "{entry_type} marker cannot carry a payload"
        )));
    }
    let len = u32::try_from(payload.len()).map_err(|_| {
        CoreError::invalid_argument(format!(
            "journal payload too large: {} bytes",
            payload.len()
        ))
    })?;

    let cid: &[u8] = match component {
        Some(id) => id.as_bytes(),
        None => &[],
    };
    let mut buf = Vec::with_capacity(
        ENTRY_PREFIX_SIZE + cid.len() + PAYLOAD_LEN_SIZE + payload.len() + CRC_SIZE,
    );
    buf.push(entry_type.as_byte());
    // cid is either empty or TOKEN_LEN bytes
    buf.push(cid.len() as u8);
    buf.extend_from_slice(cid);
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(payload);

    let crc = compute_crc32(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    Ok(buf)
}

/// Encodes a BLOCK payload: `[index:u64 LE][contents]`.
#[must_use]
pub fn encode_block(index: u64, contents: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + contents.len());
    buf.extend_from_slice(&index.to_le_bytes());
    buf.extend_from_slice(contents);
    buf
}

/// Decodes a BLOCK payload.
pub fn decode_block(payload: &[u8]) -> CoreResult<(u64, &[u8])> {
    if payload.len() < 8 {
        return Err(CoreError::invalid_argument(format!(
            "BLOCK payload too short: {} bytes",
            payload.len()
        )));
    }
    let (index, contents) = payload.split_at(8);
    let mut raw = [0u8; 8];
    raw.copy_from_slice(index);
    Ok((u64::from_le_bytes(raw), contents))
}

/// Computes CRC32 checksum.
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    // IEEE polynomial, reflected
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cid() -> ComponentId {
        ComponentId::new("test", [9; TOKEN_LEN])
    }

    #[test]
    fn entry_type_bytes() {
        for t in [
            EntryType::Object,
            EntryType::Block,
            EntryType::Buffer,
            EntryType::Commit,
            EntryType::Abort,
            EntryType::Checkpoint,
        ] {
            assert_eq!(EntryType::from_byte(t.as_byte()), Some(t));
        }
        assert_eq!(EntryType::from_byte(0), None);
        assert_eq!(EntryType::from_byte(7), None);
        assert_eq!(EntryType::Commit.as_byte(), 4);
    }

    #[test]
    fn marker_layout() {
        let commit = JournalEntry::marker(EntryType::Commit).unwrap();
        let bytes = commit.encode().unwrap();
        assert_eq!(bytes.len(), commit.encoded_len());
        assert_eq!(&bytes[..6], &[4, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn data_layout() {
        let entry = JournalEntry::object(cid(), b"abc".to_vec());
        let bytes = entry.encode().unwrap();
        assert_eq!(bytes.len(), 2 + 16 + 4 + 3 + 4);
        assert_eq!(bytes[0], 1);
        assert_eq!(bytes[1], 16);
        assert_eq!(&bytes[2..18], &[9; 16]);
        assert_eq!(&bytes[18..22], &3u32.to_le_bytes());
        assert_eq!(&bytes[22..25], b"abc");
        let crc = compute_crc32(&bytes[..25]);
        assert_eq!(&bytes[25..], &crc.to_le_bytes());
    }

    #[test]
    fn marker_and_data_rules() {
        assert!(JournalEntry::marker(EntryType::Object).is_err());
        assert!(JournalEntry::data(EntryType::Commit, cid(), vec![]).is_err());
        assert!(encode_entry(EntryType::Buffer, None, b"x").is_err());
        assert!(encode_entry(EntryType::Abort, Some(&cid()), b"").is_err());
        assert!(encode_entry(EntryType::Commit, None, b"x").is_err());
    }

    #[test]
    fn block_payload() {
        let entry = JournalEntry::block(cid(), 42, b"slot");
        let (index, contents) = entry.block_parts().unwrap();
        assert_eq!(index, 42);
        assert_eq!(contents, b"slot");

        let object = JournalEntry::object(cid(), vec![1]);
        assert!(object.block_parts().is_err());
        assert!(decode_block(&[1, 2]).is_err());
    }

    #[test]
    fn crc32_known_value() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(compute_crc32(b""), 0);
    }

    #[test]
    fn handle_len() {
        let h = EntryHandle { start: 10, end: 36 };
        assert_eq!(h.len(), 26);
        assert!(!h.is_empty());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn data_type() -> impl Strategy<Value = EntryType> {
            prop_oneof![
                Just(EntryType::Object),
                Just(EntryType::Block),
                Just(EntryType::Buffer),
            ]
        }

        proptest! {
            #[test]
            fn header_describes_encoding(
                entry_type in data_type(),
                payload in prop::collection::vec(any::<u8>(), 0..256),
            ) {
                let entry = JournalEntry::data(entry_type, cid(), payload.clone()).unwrap();
                let bytes = entry.encode().unwrap();
                prop_assert_eq!(bytes.len(), entry.encoded_len());
                prop_assert_eq!(bytes[0], entry_type.as_byte());
                prop_assert_eq!(bytes[1] as usize, TOKEN_LEN);
                let len_at = ENTRY_PREFIX_SIZE + TOKEN_LEN;
                let declared = &bytes[len_at..len_at + PAYLOAD_LEN_SIZE];
                prop_assert_eq!(declared, &(payload.len() as u32).to_le_bytes()[..]);
            }

            #[test]
            fn single_byte_change_breaks_checksum(
                payload in prop::collection::vec(any::<u8>(), 0..64),
                at in any::<prop::sample::Index>(),
                flip in 1u8..=255,
            ) {
                let mut bytes = encode_entry(EntryType::Buffer, Some(&cid()), &payload).unwrap();
                let at = at.index(bytes.len());
                bytes[at] ^= flip;
                let (body, crc) = bytes.split_at(bytes.len() - CRC_SIZE);
                prop_assert_ne!(&compute_crc32(body).to_le_bytes()[..], crc);
            }
        }
    }
}
