use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use cask_types::BlobRef;

use crate::error::{TreeError, TreeResult};

/// The `data` key holding the full-content digest of a file node.
pub const FULL_HASH_KEY: &str = "blake2b-hash";

/// A scalar metadata value on a node.
///
/// Bounded on purpose: canonical JSON has no raw-bytes type, so binary
/// metadata (digests) travels hex-encoded in `Str`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Int(i64),
    Str(String),
}

/// Node classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Dir,
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::Dir => write!(f, "dir"),
        }
    }
}

/// A `(offset, hash)` reference to a chunk or child node.
///
/// For file nodes the offset is the cumulative byte offset after the
/// referenced chunk, so the last offset equals the file size. For
/// directory nodes the offset is always zero and the hash names a child
/// node. Serializes as a two-element JSON array.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRef(pub u64, pub String);

impl NodeRef {
    pub fn offset(&self) -> u64 {
        self.0
    }

    /// Parse the referenced hash.
    pub fn hash(&self) -> TreeResult<BlobRef> {
        BlobRef::from_hex(&self.1).map_err(|e| TreeError::BadRef(e.to_string()))
    }
}

/// Tree metadata node.
///
/// A node is itself a blob: its identity is the hash of its canonical
/// JSON encoding. Canonical means sorted keys (field declaration order
/// below is alphabetical, and `data` is a sorted map), no whitespace,
/// UTF-8, integer numbers. Identical logical content always encodes to
/// identical bytes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawNode {
    /// Free-form scalar metadata (e.g. the full-content digest).
    #[serde(default)]
    pub data: BTreeMap<String, Scalar>,
    /// File or directory basename.
    pub name: String,
    /// Ordered chunk or child references.
    #[serde(default)]
    pub refs: Vec<NodeRef>,
    /// File size in bytes; for a directory, the total size beneath it.
    pub size: u64,
    /// Node classification.
    #[serde(rename = "type")]
    pub kind: NodeKind,

    /// The node's own blob hash, set once encoded or fetched. Not part of
    /// the encoding (the hash cannot contain itself).
    #[serde(skip)]
    pub hash: Option<BlobRef>,
}

impl RawNode {
    pub fn new_file(name: impl Into<String>) -> Self {
        Self {
            data: BTreeMap::new(),
            name: name.into(),
            refs: Vec::new(),
            size: 0,
            kind: NodeKind::File,
            hash: None,
        }
    }

    pub fn new_dir(name: impl Into<String>) -> Self {
        Self {
            data: BTreeMap::new(),
            name: name.into(),
            refs: Vec::new(),
            size: 0,
            kind: NodeKind::Dir,
            hash: None,
        }
    }

    pub fn is_file(&self) -> bool {
        self.kind == NodeKind::File
    }

    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Dir
    }

    /// Append an indexed chunk reference (cumulative offset).
    pub fn add_indexed_ref(&mut self, offset: u64, hash: &BlobRef) {
        self.refs.push(NodeRef(offset, hash.to_hex()));
    }

    /// Append a child-node reference (directory nodes).
    pub fn add_child_ref(&mut self, hash: &BlobRef) {
        self.refs.push(NodeRef(0, hash.to_hex()));
    }

    /// Set a metadata value.
    pub fn add_data(&mut self, key: impl Into<String>, value: Scalar) {
        self.data.insert(key.into(), value);
    }

    /// The recorded full-content digest, if present.
    pub fn full_hash(&self) -> Option<&str> {
        match self.data.get(FULL_HASH_KEY) {
            Some(Scalar::Str(s)) => Some(s),
            _ => None,
        }
    }

    /// Canonically encode the node and return `(hash, bytes)`.
    pub fn encode(&self) -> TreeResult<(BlobRef, Vec<u8>)> {
        let bytes =
            serde_json::to_vec(self).map_err(|e| TreeError::Serialization(e.to_string()))?;
        Ok((BlobRef::from_data(&bytes), bytes))
    }

    /// Decode a node fetched as blob `hash`.
    pub fn decode(hash: BlobRef, bytes: &[u8]) -> TreeResult<Self> {
        let mut node: RawNode =
            serde_json::from_slice(bytes).map_err(|e| TreeError::Serialization(e.to_string()))?;
        node.hash = Some(hash);
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_encoding_is_exact() {
        let chunk = BlobRef::from_data(b"chunk");
        let mut node = RawNode::new_file("hello.txt");
        node.add_indexed_ref(5, &chunk);
        node.size = 5;
        node.add_data(FULL_HASH_KEY, Scalar::Str("aa11".into()));

        let (_, bytes) = node.encode().unwrap();
        let expected = format!(
            "{{\"data\":{{\"blake2b-hash\":\"aa11\"}},\"name\":\"hello.txt\",\"refs\":[[5,\"{}\"]],\"size\":5,\"type\":\"file\"}}",
            chunk.to_hex()
        );
        assert_eq!(String::from_utf8(bytes).unwrap(), expected);
    }

    #[test]
    fn encoding_is_deterministic_across_insert_order() {
        let mut a = RawNode::new_file("f");
        a.add_data("alpha", Scalar::Int(1));
        a.add_data("beta", Scalar::Str("x".into()));

        let mut b = RawNode::new_file("f");
        b.add_data("beta", Scalar::Str("x".into()));
        b.add_data("alpha", Scalar::Int(1));

        assert_eq!(a.encode().unwrap(), b.encode().unwrap());
    }

    #[test]
    fn decode_roundtrip_sets_hash() {
        let mut node = RawNode::new_dir("subdir");
        node.add_child_ref(&BlobRef::from_data(b"child"));
        node.size = 42;

        let (hash, bytes) = node.encode().unwrap();
        let decoded = RawNode::decode(hash, &bytes).unwrap();

        assert_eq!(decoded.hash, Some(hash));
        assert_eq!(decoded.name, "subdir");
        assert!(decoded.is_dir());
        assert_eq!(decoded.refs, node.refs);
        assert_eq!(decoded.size, 42);
    }

    #[test]
    fn different_content_different_hash() {
        let a = RawNode::new_file("same-name");
        let mut b = RawNode::new_file("same-name");
        b.size = 1;
        assert_ne!(a.encode().unwrap().0, b.encode().unwrap().0);
    }

    #[test]
    fn node_ref_is_a_json_pair() {
        let r = NodeRef(1024, "abcd".into());
        assert_eq!(serde_json::to_string(&r).unwrap(), "[1024,\"abcd\"]");
        let back: NodeRef = serde_json::from_str("[1024,\"abcd\"]").unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn node_ref_hash_parses() {
        let hash = BlobRef::from_data(b"target");
        let r = NodeRef(0, hash.to_hex());
        assert_eq!(r.hash().unwrap(), hash);
        assert!(NodeRef(0, "not-hex".into()).hash().is_err());
    }

    #[test]
    fn scalar_untagged_roundtrip() {
        let int = Scalar::Int(-5);
        let s = Scalar::Str("text".into());
        assert_eq!(serde_json::to_string(&int).unwrap(), "-5");
        assert_eq!(serde_json::to_string(&s).unwrap(), "\"text\"");
        assert_eq!(serde_json::from_str::<Scalar>("-5").unwrap(), int);
        assert_eq!(serde_json::from_str::<Scalar>("\"text\"").unwrap(), s);
    }

    #[test]
    fn full_hash_accessor() {
        let mut node = RawNode::new_file("f");
        assert_eq!(node.full_hash(), None);
        node.add_data(FULL_HASH_KEY, Scalar::Str("cafe".into()));
        assert_eq!(node.full_hash(), Some("cafe"));
    }

    #[test]
    fn decode_rejects_malformed_json() {
        let err = RawNode::decode(BlobRef::from_data(b"x"), b"{not json").unwrap_err();
        assert!(matches!(err, TreeError::Serialization(_)));
    }
}
