//! Exact nearest-neighbour index over document embeddings.
//!
//! A [`VectorIndex`] owns a document list and a parallel vector list:
//! document `i` is described by vector `i`. The constructor rejects
//! mismatched lengths and dimensions, so every index in existence is
//! consistent. Search is a brute-force scan under Euclidean distance, which
//! is exact and fast enough for the few thousand rows a billing export
//! produces.
//!
//! The vector half of an index serializes to a small binary format:
//!
//! ```text
//! "FOCV" | version: u32 | dims: u32 | count: u32 | count × dims × f32
//! ```
//!
//! with all integers and floats little-endian.

use thiserror::Error;

use crate::embedding::{blob_to_vec, fnv1a_64, l2_distance, squared_l2, vec_to_blob};
use crate::models::IndexedDocument;

const MAGIC: &[u8; 4] = b"FOCV";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IndexError {
    #[error("document count {documents} does not match vector count {vectors}")]
    LengthMismatch { documents: usize, vectors: usize },
    #[error("vector {position} has {actual} dimensions, expected {expected}")]
    DimensionMismatch {
        position: usize,
        expected: usize,
        actual: usize,
    },
    #[error("vector file is corrupt: {0}")]
    Corrupt(String),
}

/// One search hit: the document position, the document, and its distance.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor<'a> {
    pub position: usize,
    pub document: &'a IndexedDocument,
    pub distance: f32,
}

/// Documents plus their embeddings, searchable by Euclidean distance.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    dims: usize,
    documents: Vec<IndexedDocument>,
    vectors: Vec<Vec<f32>>,
}

impl VectorIndex {
    /// Builds an index, validating that both lists line up.
    pub fn new(
        dims: usize,
        documents: Vec<IndexedDocument>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<Self, IndexError> {
        if documents.len() != vectors.len() {
            return Err(IndexError::LengthMismatch {
                documents: documents.len(),
                vectors: vectors.len(),
            });
        }
        if let Some((position, v)) = vectors.iter().enumerate().find(|(_, v)| v.len() != dims) {
            return Err(IndexError::DimensionMismatch {
                position,
                expected: dims,
                actual: v.len(),
            });
        }
        Ok(Self {
            dims,
            documents,
            vectors,
        })
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn documents(&self) -> &[IndexedDocument] {
        &self.documents
    }

    pub fn vectors(&self) -> &[Vec<f32>] {
        &self.vectors
    }

    /// Returns up to `k` nearest documents, nearest first.
    ///
    /// Equal distances keep insertion order. `k` larger than the index
    /// returns every document.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<Neighbor<'_>> {
        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, squared_l2(query, v)))
            .collect();

        scored.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);

        scored
            .into_iter()
            .map(|(position, _)| Neighbor {
                position,
                document: &self.documents[position],
                distance: l2_distance(query, &self.vectors[position]),
            })
            .collect()
    }

    /// Serializes the vectors to the binary vector-file format.
    ///
    /// Pair with [`checksum`] when the vectors are stored apart from their
    /// documents.
    pub fn encode_vectors(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.len() * self.dims * 4);
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(self.dims as u32).to_le_bytes());
        bytes.extend_from_slice(&(self.len() as u32).to_le_bytes());
        for v in &self.vectors {
            bytes.extend_from_slice(&vec_to_blob(v));
        }
        bytes
    }
}

/// FNV-1a digest of an encoded vector file.
///
/// Stored next to the documents so a vector file from another build is
/// detected on load.
pub fn checksum(bytes: &[u8]) -> u64 {
    fnv1a_64(bytes)
}

/// Parses a vector file, returning `(dims, vectors)`.
pub fn decode_vectors(bytes: &[u8]) -> Result<(usize, Vec<Vec<f32>>), IndexError> {
    if bytes.len() < HEADER_LEN || &bytes[..4] != MAGIC {
        return Err(IndexError::Corrupt("missing header".to_string()));
    }
    let read_u32 =
        |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);

    let version = read_u32(4);
    if version != FORMAT_VERSION {
        return Err(IndexError::Corrupt(format!(
            "unsupported format version {}",
            version
        )));
    }
    let dims = read_u32(8) as usize;
    let count = read_u32(12) as usize;

    let body = &bytes[HEADER_LEN..];
    let expected = count
        .checked_mul(dims)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| IndexError::Corrupt("header overflow".to_string()))?;
    if body.len() != expected {
        return Err(IndexError::Corrupt(format!(
            "expected {} bytes of vectors, found {}",
            expected,
            body.len()
        )));
    }

    let vectors = if dims == 0 {
        vec![Vec::new(); count]
    } else {
        body.chunks_exact(dims * 4).map(blob_to_vec).collect()
    };
    Ok((dims, vectors))
}
