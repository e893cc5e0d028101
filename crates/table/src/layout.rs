//! Row layout computation.
//!
//! A row packs every declared field contiguously, each padded to a machine-word
//! boundary. Offsets are assigned in declaration order, so every participant
//! must declare the same fields in the same order; the layout fingerprint
//! exchanged at rendezvous time catches divergence before any row is
//! misinterpreted.

use rowsync_types::SchemaFingerprint;
use thiserror::Error;

/// Alignment unit for field placement, in bytes.
pub const ALIGN: usize = 8;

/// Round a field length up to the next alignment boundary.
pub(crate) fn padded_len(len: usize) -> usize {
    len.div_ceil(ALIGN).max(1) * ALIGN
}

/// Errors from row layout construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    /// Two fields were declared with the same name.
    #[error("duplicate field name {0:?}")]
    DuplicateField(String),

    /// A vector field was declared with zero elements.
    #[error("vector field {0:?} declared with zero elements")]
    EmptyVector(String),
}

/// A field as declared on the builder, before placement.
#[derive(Debug, Clone)]
pub(crate) struct FieldSpec {
    pub name: String,
    pub type_tag: &'static str,
    pub elem_size: usize,
    pub elem_count: usize,
}

/// Placement of one declared field within a row.
#[derive(Debug, Clone)]
pub struct FieldInfo {
    /// Name given at declaration time.
    pub name: String,
    /// Stable tag of the element type, mixed into the fingerprint.
    pub type_tag: &'static str,
    /// Size of one element in bytes.
    pub elem_size: usize,
    /// Number of elements (1 for scalars).
    pub elem_count: usize,
    /// Byte offset of the field within a row.
    pub offset: usize,
    /// Unpadded length in bytes (`elem_size * elem_count`).
    pub len: usize,
}

/// The packed, aligned byte layout of a table row.
///
/// Deterministic: the same ordered declarations always produce the same
/// offsets and stride. The layout is computed once at table construction and
/// never changes.
#[derive(Debug, Clone)]
pub struct RowLayout {
    fields: Vec<FieldInfo>,
    stride: usize,
}

impl RowLayout {
    pub(crate) fn new(specs: Vec<FieldSpec>) -> Result<Self, LayoutError> {
        let mut fields: Vec<FieldInfo> = Vec::with_capacity(specs.len());
        let mut offset = 0;
        for spec in specs {
            if fields.iter().any(|f| f.name == spec.name) {
                return Err(LayoutError::DuplicateField(spec.name));
            }
            if spec.elem_count == 0 {
                return Err(LayoutError::EmptyVector(spec.name));
            }
            let len = spec.elem_size * spec.elem_count;
            fields.push(FieldInfo {
                name: spec.name,
                type_tag: spec.type_tag,
                elem_size: spec.elem_size,
                elem_count: spec.elem_count,
                offset,
                len,
            });
            offset += padded_len(len);
        }
        Ok(Self {
            fields,
            stride: offset,
        })
    }

    /// Length of one row in bytes: the sum of all padded field lengths.
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Placement record for a field, by declaration index.
    ///
    /// # Panics
    ///
    /// Panics if `index` does not correspond to a declared field.
    pub fn field(&self, index: usize) -> &FieldInfo {
        &self.fields[index]
    }

    /// All placement records in declaration order.
    pub fn fields(&self) -> &[FieldInfo] {
        &self.fields
    }

    /// Digest of the ordered declarations, for construction-time agreement.
    pub fn fingerprint(&self) -> SchemaFingerprint {
        let mut encoded = Vec::new();
        encoded.extend_from_slice(&(ALIGN as u64).to_le_bytes());
        for field in &self.fields {
            encoded.extend_from_slice(field.name.as_bytes());
            encoded.push(0);
            encoded.extend_from_slice(field.type_tag.as_bytes());
            encoded.push(0);
            encoded.extend_from_slice(&(field.elem_size as u64).to_le_bytes());
            encoded.extend_from_slice(&(field.elem_count as u64).to_le_bytes());
        }
        SchemaFingerprint::compute(&encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, tag: &'static str, elem_size: usize, elem_count: usize) -> FieldSpec {
        FieldSpec {
            name: name.to_owned(),
            type_tag: tag,
            elem_size,
            elem_count,
        }
    }

    #[test]
    fn test_padded_len_rounds_up() {
        assert_eq!(padded_len(1), 8);
        assert_eq!(padded_len(8), 8);
        assert_eq!(padded_len(9), 16);
        assert_eq!(padded_len(16), 16);
        // Zero-length still occupies one alignment unit.
        assert_eq!(padded_len(0), 8);
    }

    #[test]
    fn test_offsets_monotonic_and_stride_is_padded_sum() {
        let layout = RowLayout::new(vec![
            spec("flag", "bool", 1, 1),
            spec("round", "u64", 8, 1),
            spec("window", "u32", 4, 5),
        ])
        .unwrap();

        assert_eq!(layout.field(0).offset, 0);
        assert_eq!(layout.field(1).offset, 8);
        // 5 * 4 = 20 bytes, padded to 24.
        assert_eq!(layout.field(2).offset, 16);
        assert_eq!(layout.stride(), 40);

        let mut last = None;
        for field in layout.fields() {
            if let Some(prev) = last {
                assert!(field.offset > prev);
            }
            last = Some(field.offset);
        }
    }

    #[test]
    fn test_layout_deterministic() {
        let build = || {
            RowLayout::new(vec![
                spec("a", "u64", 8, 1),
                spec("b", "i32", 4, 3),
                spec("c", "u8", 1, 1),
            ])
            .unwrap()
        };
        let first = build();
        let second = build();
        for (x, y) in first.fields().iter().zip(second.fields()) {
            assert_eq!(x.offset, y.offset);
            assert_eq!(x.len, y.len);
        }
        assert_eq!(first.stride(), second.stride());
        assert_eq!(first.fingerprint(), second.fingerprint());
    }

    #[test]
    fn test_fingerprint_sensitive_to_order() {
        let forward = RowLayout::new(vec![spec("a", "u64", 8, 1), spec("b", "u64", 8, 1)]).unwrap();
        let reversed = RowLayout::new(vec![spec("b", "u64", 8, 1), spec("a", "u64", 8, 1)]).unwrap();
        assert_eq!(forward.stride(), reversed.stride());
        assert_ne!(forward.fingerprint(), reversed.fingerprint());
    }

    #[test]
    fn test_fingerprint_sensitive_to_type() {
        let wide = RowLayout::new(vec![spec("a", "u64", 8, 1)]).unwrap();
        let narrow = RowLayout::new(vec![spec("a", "u32", 4, 1)]).unwrap();
        assert_ne!(wide.fingerprint(), narrow.fingerprint());
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let err = RowLayout::new(vec![spec("x", "u64", 8, 1), spec("x", "u32", 4, 1)]).unwrap_err();
        assert_eq!(err, LayoutError::DuplicateField("x".to_owned()));
    }

    #[test]
    fn test_empty_vector_rejected() {
        let err = RowLayout::new(vec![spec("v", "u64", 8, 0)]).unwrap_err();
        assert_eq!(err, LayoutError::EmptyVector("v".to_owned()));
    }

    #[test]
    fn test_empty_layout_has_zero_stride() {
        let layout = RowLayout::new(Vec::new()).unwrap();
        assert_eq!(layout.stride(), 0);
        assert!(layout.fields().is_empty());
    }
}
