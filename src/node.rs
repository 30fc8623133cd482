//! Opaque commit identifiers.
//!
//! A `Node` is the content address of a commit: a fixed-width 20-byte hash.
//! Nodes are stored raw in the state file and rendered as 40-char hex
//! everywhere the user sees them. `short()` gives the 12-char form used in
//! messages, matching what the default plan lines show.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Width of a node in bytes.
pub const NODE_LEN: usize = 20;

/// Content address of a commit.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Node([u8; NODE_LEN]);

impl Node {
    pub fn from_bytes(bytes: [u8; NODE_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; NODE_LEN] {
        &self.0
    }

    /// Parse a full 40-char hex node.
    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() != NODE_LEN * 2 {
            return None;
        }
        let mut bytes = [0u8; NODE_LEN];
        for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
            let hi = (chunk[0] as char).to_digit(16)?;
            let lo = (chunk[1] as char).to_digit(16)?;
            bytes[i] = (hi * 16 + lo) as u8;
        }
        Some(Self(bytes))
    }

    pub fn hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Abbreviated form for user-facing messages.
    pub fn short(&self) -> String {
        self.hex()[..12].to_string()
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex())
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({})", self.short())
    }
}

impl From<Node> for String {
    fn from(n: Node) -> Self {
        n.hex()
    }
}

impl TryFrom<String> for Node {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Node::from_hex(&s).ok_or_else(|| format!("invalid node '{}'", s))
    }
}
