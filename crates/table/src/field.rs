//! Typed field views over table rows.
//!
//! A view is a thin window into the table's arena: it carries the field's
//! offset, the row stride, and a handle on the shared byte region, never its
//! own copy of data. Reads are allowed for any row; writes address the local
//! row only. The write APIs take no row index at all, so writing another
//! participant's row is unrepresentable rather than merely forbidden.

use rowsync_types::SharedBytes;
use std::marker::PhantomData;

mod sealed {
    pub trait Sealed {}
}

/// Plain-old-data element types that can live in a table field.
///
/// Values are stored little-endian so row bytes mean the same thing on every
/// participant. The trait is sealed: field elements are fixed-width machine
/// scalars, nothing else.
pub trait FieldValue: sealed::Sealed + Copy + Send + Sync + 'static {
    /// Size of one element in bytes.
    const SIZE: usize;
    /// Stable tag mixed into the schema fingerprint.
    const TAG: &'static str;

    /// Store the value at `offset` in `region`.
    fn store(self, region: &SharedBytes, offset: usize);
    /// Load a value from `offset` in `region`.
    fn load(region: &SharedBytes, offset: usize) -> Self;
}

macro_rules! impl_field_value {
    ($($ty:ty => $tag:literal),* $(,)?) => {$(
        impl sealed::Sealed for $ty {}

        impl FieldValue for $ty {
            const SIZE: usize = std::mem::size_of::<$ty>();
            const TAG: &'static str = $tag;

            fn store(self, region: &SharedBytes, offset: usize) {
                region.write_from(offset, &self.to_le_bytes());
            }

            fn load(region: &SharedBytes, offset: usize) -> Self {
                let mut buf = [0u8; std::mem::size_of::<$ty>()];
                region.read_into(offset, &mut buf);
                <$ty>::from_le_bytes(buf)
            }
        }
    )*};
}

impl_field_value! {
    u8 => "u8",
    u16 => "u16",
    u32 => "u32",
    u64 => "u64",
    i8 => "i8",
    i16 => "i16",
    i32 => "i32",
    i64 => "i64",
    f32 => "f32",
    f64 => "f64",
}

impl sealed::Sealed for bool {}

impl FieldValue for bool {
    const SIZE: usize = 1;
    const TAG: &'static str = "bool";

    fn store(self, region: &SharedBytes, offset: usize) {
        region.store(offset, self as u8);
    }

    fn load(region: &SharedBytes, offset: usize) -> Self {
        region.load(offset) != 0
    }
}

/// Handle for a declared scalar field, redeemable for a view once the table
/// is built.
pub struct ScalarDecl<T> {
    pub(crate) field: usize,
    pub(crate) _ty: PhantomData<T>,
}

impl<T> Clone for ScalarDecl<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ScalarDecl<T> {}

/// Handle for a declared fixed-length vector field.
pub struct VectorDecl<T> {
    pub(crate) field: usize,
    pub(crate) _ty: PhantomData<T>,
}

impl<T> Clone for VectorDecl<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for VectorDecl<T> {}

/// Typed view over one scalar column of every row.
#[derive(Clone)]
pub struct ScalarField<T: FieldValue> {
    arena: SharedBytes,
    offset: usize,
    stride: usize,
    rows: usize,
    local_row: usize,
    _ty: PhantomData<T>,
}

impl<T: FieldValue> ScalarField<T> {
    pub(crate) fn new(
        arena: SharedBytes,
        offset: usize,
        stride: usize,
        rows: usize,
        local_row: usize,
    ) -> Self {
        Self {
            arena,
            offset,
            stride,
            rows,
            local_row,
            _ty: PhantomData,
        }
    }

    /// Read the value at `row`.
    ///
    /// Remote rows are eventually consistent: the value is whatever the peer's
    /// last landed write put there.
    ///
    /// # Panics
    ///
    /// Panics if `row` is out of range.
    pub fn get(&self, row: usize) -> T {
        assert!(
            row < self.rows,
            "row {} out of range for table of {} rows",
            row,
            self.rows
        );
        T::load(&self.arena, row * self.stride + self.offset)
    }

    /// Read the local row's value.
    pub fn local(&self) -> T {
        self.get(self.local_row)
    }

    /// Write the local row's slot. Remote rows cannot be addressed.
    pub fn set(&self, value: T) {
        value.store(&self.arena, self.local_row * self.stride + self.offset);
    }

    /// Row-relative byte range of this field, for ranged puts.
    pub fn byte_range(&self) -> (usize, usize) {
        (self.offset, T::SIZE)
    }
}

/// Typed view over one fixed-length vector column of every row.
#[derive(Clone)]
pub struct VectorField<T: FieldValue> {
    arena: SharedBytes,
    offset: usize,
    stride: usize,
    rows: usize,
    local_row: usize,
    elems: usize,
    _ty: PhantomData<T>,
}

impl<T: FieldValue> VectorField<T> {
    pub(crate) fn new(
        arena: SharedBytes,
        offset: usize,
        stride: usize,
        rows: usize,
        local_row: usize,
        elems: usize,
    ) -> Self {
        Self {
            arena,
            offset,
            stride,
            rows,
            local_row,
            elems,
            _ty: PhantomData,
        }
    }

    /// Number of elements per row. Fixed at declaration time.
    pub fn len(&self) -> usize {
        self.elems
    }

    /// True if the vector was declared with zero elements. Construction
    /// rejects that, so this is always false on a bound view.
    pub fn is_empty(&self) -> bool {
        self.elems == 0
    }

    /// Read element `elem` of `row`.
    ///
    /// # Panics
    ///
    /// Panics if `row` or `elem` is out of range.
    pub fn get(&self, row: usize, elem: usize) -> T {
        assert!(
            row < self.rows,
            "row {} out of range for table of {} rows",
            row,
            self.rows
        );
        assert!(
            elem < self.elems,
            "element {} out of range for vector of {} elements",
            elem,
            self.elems
        );
        T::load(
            &self.arena,
            row * self.stride + self.offset + elem * T::SIZE,
        )
    }

    /// Write element `elem` of the local row. Remote rows cannot be addressed.
    ///
    /// # Panics
    ///
    /// Panics if `elem` is out of range.
    pub fn set(&self, elem: usize, value: T) {
        assert!(
            elem < self.elems,
            "element {} out of range for vector of {} elements",
            elem,
            self.elems
        );
        value.store(
            &self.arena,
            self.local_row * self.stride + self.offset + elem * T::SIZE,
        );
    }

    /// Row-relative byte range of the whole vector, for ranged puts.
    pub fn byte_range(&self) -> (usize, usize) {
        (self.offset, self.elems * T::SIZE)
    }

    /// Row-relative byte range of a single element.
    ///
    /// # Panics
    ///
    /// Panics if `elem` is out of range.
    pub fn elem_range(&self, elem: usize) -> (usize, usize) {
        assert!(
            elem < self.elems,
            "element {} out of range for vector of {} elements",
            elem,
            self.elems
        );
        (self.offset + elem * T::SIZE, T::SIZE)
    }
}
