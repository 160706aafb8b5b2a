//! Component identifiers.

use crate::error::{CoreError, CoreResult};
use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU32, Ordering};
use uuid::Uuid;

/// Length of a component identity token in bytes.
pub const TOKEN_LEN: usize = 16;

/// Base token used by [`ComponentIdAllocator::stable`].
const STABLE_BASE: [u8; TOKEN_LEN] = *b"trellis-componen";

/// Names a transaction participant so journal entries can be routed back to it.
///
/// The label is for humans; identity is the 16-byte token. Two ids with the
/// same token are equal whatever their labels.
#[derive(Clone)]
pub struct ComponentId {
    label: String,
    token: [u8; TOKEN_LEN],
}

impl ComponentId {
    /// Creates an id from a label and a token.
    #[must_use]
    pub fn new(label: impl Into<String>, token: [u8; TOKEN_LEN]) -> Self {
        Self {
            label: label.into(),
            token,
        }
    }

    /// Reconstructs an id read back from a journal entry.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `bytes` is not exactly [`TOKEN_LEN`] long.
    pub fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        let token: [u8; TOKEN_LEN] = bytes.try_into().map_err(|_| {
            CoreError::invalid_argument(format!(
                "component id must be {TOKEN_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self::new("journal", token))
    }

    /// Returns the label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Returns the identity token.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; TOKEN_LEN] {
        &self.token
    }
}

impl PartialEq for ComponentId {
    fn eq(&self, other: &Self) -> bool {
        self.token == other.token
    }
}

impl Eq for ComponentId {}

impl Hash for ComponentId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.token.hash(state);
    }
}

impl PartialOrd for ComponentId {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for ComponentId {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.token.cmp(&other.token)
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.label)?;
        for byte in &self.token[TOKEN_LEN - 4..] {
            write!(f, "{byte:02x}")?;
        }
        f.write_str("]")
    }
}

impl fmt::Debug for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentId({self})")
    }
}

/// Hands out component ids.
///
/// Each coordinator owns one allocator. The i-th id is the allocator's base
/// token with `i` added into its last four bytes, so allocators with the same
/// base produce the same sequence. A store that registers its components in
/// the same order on every start therefore gets the same ids back, which is
/// what lets recovery match journal entries written by a previous process.
#[derive(Debug)]
pub struct ComponentIdAllocator {
    base: [u8; TOKEN_LEN],
    next: AtomicU32,
}

impl ComponentIdAllocator {
    /// An allocator with a fixed, well-known base. Ids repeat across restarts.
    #[must_use]
    pub fn stable() -> Self {
        Self::with_base(STABLE_BASE)
    }

    /// An allocator with a random base. Ids are unique to this process run.
    #[must_use]
    pub fn local() -> Self {
        Self::with_base(Uuid::new_v4().into_bytes())
    }

    /// An allocator over an explicit base token.
    #[must_use]
    pub fn with_base(base: [u8; TOKEN_LEN]) -> Self {
        Self {
            base,
            next: AtomicU32::new(0),
        }
    }

    /// Allocates the next id.
    pub fn alloc_local(&self, label: impl Into<String>) -> ComponentId {
        let index = self.next.fetch_add(1, Ordering::SeqCst);
        let mut token = self.base;
        let tail = [token[12], token[13], token[14], token[15]];
        let folded = u32::from_be_bytes(tail).wrapping_add(index);
        token[12..].copy_from_slice(&folded.to_be_bytes());
        ComponentId::new(label, token)
    }

    /// Returns how many ids have been allocated.
    #[must_use]
    pub fn allocated(&self) -> u32 {
        self.next.load(Ordering::SeqCst)
    }
}

impl Default for ComponentIdAllocator {
    fn default() -> Self {
        Self::stable()
    }
}
