//! Strongly typed, strided array codec used by mesh and shape payloads.
//!
//! A [`DataBuffer`] views an array of scalars as elements of
//! `component_count` components (positions are 3, colours 1 or 4, UVs 2)
//! with an element stride that may exceed the component count to allow
//! alignment padding. Buffers either own their storage or share an
//! immutable array, so resources can hand the same vertex data to several
//! connections without copying.
//!
//! Float buffers may be transmitted packed: values are quantised to small
//! integers as `round(v / unit)` with the unit prepended to the payload.
//! A value outside the packed integer range fails the write rather than
//! clamping.

use std::sync::Arc;

use crate::errors::{ProtocolError, Result};
use crate::reader::PacketReader;
use crate::writer::PacketWriter;

/// Data stream element types as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ElementType {
    /// 8-bit signed integers.
    Int8 = 1,
    /// 8-bit unsigned integers.
    UInt8 = 2,
    /// 16-bit signed integers.
    Int16 = 3,
    /// 16-bit unsigned integers.
    UInt16 = 4,
    /// 32-bit signed integers.
    Int32 = 5,
    /// 32-bit unsigned integers.
    UInt32 = 6,
    /// 64-bit signed integers.
    Int64 = 7,
    /// 64-bit unsigned integers.
    UInt64 = 8,
    /// Single precision floats.
    Float32 = 9,
    /// Double precision floats.
    Float64 = 10,
    /// Single precision floats quantised to 16-bit integers; a 32-bit float
    /// quantisation unit precedes the data.
    PackedFloat16 = 11,
    /// Double precision floats quantised to 32-bit integers; a 64-bit float
    /// quantisation unit precedes the data.
    PackedFloat32 = 12,
}

impl ElementType {
    /// The raw wire value.
    #[must_use]
    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    /// Map a wire value back to an element type.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Int8),
            2 => Some(Self::UInt8),
            3 => Some(Self::Int16),
            4 => Some(Self::UInt16),
            5 => Some(Self::Int32),
            6 => Some(Self::UInt32),
            7 => Some(Self::Int64),
            8 => Some(Self::UInt64),
            9 => Some(Self::Float32),
            10 => Some(Self::Float64),
            11 => Some(Self::PackedFloat16),
            12 => Some(Self::PackedFloat32),
            _ => None,
        }
    }

    /// Bytes per scalar as transmitted (packed forms count the integer).
    #[must_use]
    pub fn byte_size(self) -> usize {
        match self {
            Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 | Self::PackedFloat16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 | Self::PackedFloat32 => 4,
            Self::Int64 | Self::UInt64 | Self::Float64 => 8,
        }
    }

    /// Whether this is one of the quantised transmission forms.
    #[must_use]
    pub fn is_packed(self) -> bool {
        matches!(self, Self::PackedFloat16 | Self::PackedFloat32)
    }
}

/// Owned or shared backing array for one scalar type.
#[derive(Debug, Clone)]
pub enum Store<T> {
    /// Uniquely owned storage.
    Owned(Vec<T>),
    /// Immutable storage shared between buffers (and threads).
    Shared(Arc<[T]>),
}

impl<T: Copy> Store<T> {
    fn as_slice(&self) -> &[T] {
        match self {
            Self::Owned(values) => values,
            Self::Shared(values) => values,
        }
    }

    fn make_owned(&mut self) {
        if let Self::Shared(values) = self {
            *self = Self::Owned(values.to_vec());
        }
    }
}

/// Backing storage of a [`DataBuffer`], tagged by scalar type.
///
/// Packed element types never appear here; they exist only on the wire and
/// decode back to their float forms.
#[derive(Debug, Clone)]
pub enum Storage {
    /// 8-bit signed elements.
    Int8(Store<i8>),
    /// 8-bit unsigned elements.
    UInt8(Store<u8>),
    /// 16-bit signed elements.
    Int16(Store<i16>),
    /// 16-bit unsigned elements.
    UInt16(Store<u16>),
    /// 32-bit signed elements.
    Int32(Store<i32>),
    /// 32-bit unsigned elements.
    UInt32(Store<u32>),
    /// 64-bit signed elements.
    Int64(Store<i64>),
    /// 64-bit unsigned elements.
    UInt64(Store<u64>),
    /// Single precision float elements.
    Float32(Store<f32>),
    /// Double precision float elements.
    Float64(Store<f64>),
}

macro_rules! impl_storage_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<Vec<$ty>> for Storage {
                fn from(values: Vec<$ty>) -> Self {
                    Self::$variant(Store::Owned(values))
                }
            }

            impl From<Arc<[$ty]>> for Storage {
                fn from(values: Arc<[$ty]>) -> Self {
                    Self::$variant(Store::Shared(values))
                }
            }
        )*
    };
}

impl_storage_from!(
    i8 => Int8,
    u8 => UInt8,
    i16 => Int16,
    u16 => UInt16,
    i32 => Int32,
    u32 => UInt32,
    i64 => Int64,
    u64 => UInt64,
    f32 => Float32,
    f64 => Float64,
);

/// Expand `$body` once per storage variant with `$slice` bound to the typed
/// scalar slice.
macro_rules! with_slice {
    ($storage:expr, $slice:ident => $body:expr) => {
        match $storage {
            Storage::Int8(store) => {
                let $slice = store.as_slice();
                $body
            }
            Storage::UInt8(store) => {
                let $slice = store.as_slice();
                $body
            }
            Storage::Int16(store) => {
                let $slice = store.as_slice();
                $body
            }
            Storage::UInt16(store) => {
                let $slice = store.as_slice();
                $body
            }
            Storage::Int32(store) => {
                let $slice = store.as_slice();
                $body
            }
            Storage::UInt32(store) => {
                let $slice = store.as_slice();
                $body
            }
            Storage::Int64(store) => {
                let $slice = store.as_slice();
                $body
            }
            Storage::UInt64(store) => {
                let $slice = store.as_slice();
                $body
            }
            Storage::Float32(store) => {
                let $slice = store.as_slice();
                $body
            }
            Storage::Float64(store) => {
                let $slice = store.as_slice();
                $body
            }
        }
    };
}

/// Copy `count` elements from `src` into `dst` at element `element_offset`,
/// growing `dst` as needed. Destination indices are computed explicitly per
/// element and component.
fn copy_block<T: Copy + Default>(
    dst: &mut Vec<T>,
    src: &[T],
    dst_stride: usize,
    src_stride: usize,
    components: usize,
    element_offset: usize,
    count: usize,
) {
    let needed = (element_offset + count) * dst_stride;
    if dst.len() < needed {
        dst.resize(needed, T::default());
    }
    for element in 0..count {
        for component in 0..components {
            let at = (element_offset + element) * dst_stride + component;
            dst[at] = src[element * src_stride + component];
        }
    }
}

/// Fixed wire prefix of a data buffer block:
/// `offset: u32, count: u16, component_count: u8, element_type: u8`.
pub const BLOCK_OVERHEAD: usize = 8;

/// A typed, strided view over an array of scalars.
#[derive(Debug, Clone)]
pub struct DataBuffer {
    storage: Storage,
    component_count: u8,
    element_stride: u8,
}

impl DataBuffer {
    /// Maximum components per element.
    pub const MAX_COMPONENTS: u8 = 16;

    /// Wrap `storage` as elements of `component_count` scalars, tightly
    /// packed. The component count is clamped to `1..=16`.
    pub fn new(storage: impl Into<Storage>, component_count: u8) -> Self {
        let component_count = component_count.clamp(1, Self::MAX_COMPONENTS);
        Self { storage: storage.into(), component_count, element_stride: component_count }
    }

    /// Set the element stride in scalar units. Strides below the component
    /// count are raised to it.
    #[must_use]
    pub fn with_stride(mut self, element_stride: u8) -> Self {
        self.element_stride = element_stride.max(self.component_count);
        self
    }

    /// The scalar type held by this buffer.
    #[must_use]
    pub fn element_type(&self) -> ElementType {
        match &self.storage {
            Storage::Int8(_) => ElementType::Int8,
            Storage::UInt8(_) => ElementType::UInt8,
            Storage::Int16(_) => ElementType::Int16,
            Storage::UInt16(_) => ElementType::UInt16,
            Storage::Int32(_) => ElementType::Int32,
            Storage::UInt32(_) => ElementType::UInt32,
            Storage::Int64(_) => ElementType::Int64,
            Storage::UInt64(_) => ElementType::UInt64,
            Storage::Float32(_) => ElementType::Float32,
            Storage::Float64(_) => ElementType::Float64,
        }
    }

    /// Components per element.
    #[must_use]
    pub fn component_count(&self) -> u8 {
        self.component_count
    }

    /// Element stride in scalar units.
    #[must_use]
    pub fn element_stride(&self) -> u8 {
        self.element_stride
    }

    /// Total scalars in the backing storage.
    #[must_use]
    pub fn scalar_len(&self) -> usize {
        with_slice!(&self.storage, slice => slice.len())
    }

    /// Number of whole elements.
    #[must_use]
    pub fn count(&self) -> u32 {
        (self.scalar_len() / usize::from(self.element_stride)) as u32
    }

    /// Whether the buffer holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// An empty buffer of the given element type and component count.
    /// Packed types map to their decoded float forms.
    #[must_use]
    pub fn empty(element_type: ElementType, component_count: u8) -> Self {
        match element_type {
            ElementType::Int8 => Self::new(Vec::<i8>::new(), component_count),
            ElementType::UInt8 => Self::new(Vec::<u8>::new(), component_count),
            ElementType::Int16 => Self::new(Vec::<i16>::new(), component_count),
            ElementType::UInt16 => Self::new(Vec::<u16>::new(), component_count),
            ElementType::Int32 => Self::new(Vec::<i32>::new(), component_count),
            ElementType::UInt32 => Self::new(Vec::<u32>::new(), component_count),
            ElementType::Int64 => Self::new(Vec::<i64>::new(), component_count),
            ElementType::UInt64 => Self::new(Vec::<u64>::new(), component_count),
            ElementType::Float32 | ElementType::PackedFloat16 => {
                Self::new(Vec::<f32>::new(), component_count)
            }
            ElementType::Float64 | ElementType::PackedFloat32 => {
                Self::new(Vec::<f64>::new(), component_count)
            }
        }
    }

    /// Copy `block` into this buffer at element `element_offset`, growing
    /// the storage as needed (gaps fill with zeros). Used to accumulate
    /// chunked component streams on the read side.
    ///
    /// # Errors
    ///
    /// `ProtocolError::BadComponentType` when the element types or
    /// component counts disagree.
    pub fn splice(&mut self, element_offset: u32, block: &Self) -> Result<()> {
        if self.element_type() != block.element_type()
            || self.component_count != block.component_count
        {
            return Err(ProtocolError::BadComponentType { component: "spliced block" });
        }

        self.duplicate();
        let dst_stride = usize::from(self.element_stride);
        let src_stride = usize::from(block.element_stride);
        let components = usize::from(self.component_count);
        let offset = element_offset as usize;
        let count = block.count() as usize;

        match (&mut self.storage, &block.storage) {
            (Storage::Int8(Store::Owned(dst)), Storage::Int8(src)) => {
                copy_block(dst, src.as_slice(), dst_stride, src_stride, components, offset, count);
            }
            (Storage::UInt8(Store::Owned(dst)), Storage::UInt8(src)) => {
                copy_block(dst, src.as_slice(), dst_stride, src_stride, components, offset, count);
            }
            (Storage::Int16(Store::Owned(dst)), Storage::Int16(src)) => {
                copy_block(dst, src.as_slice(), dst_stride, src_stride, components, offset, count);
            }
            (Storage::UInt16(Store::Owned(dst)), Storage::UInt16(src)) => {
                copy_block(dst, src.as_slice(), dst_stride, src_stride, components, offset, count);
            }
            (Storage::Int32(Store::Owned(dst)), Storage::Int32(src)) => {
                copy_block(dst, src.as_slice(), dst_stride, src_stride, components, offset, count);
            }
            (Storage::UInt32(Store::Owned(dst)), Storage::UInt32(src)) => {
                copy_block(dst, src.as_slice(), dst_stride, src_stride, components, offset, count);
            }
            (Storage::Int64(Store::Owned(dst)), Storage::Int64(src)) => {
                copy_block(dst, src.as_slice(), dst_stride, src_stride, components, offset, count);
            }
            (Storage::UInt64(Store::Owned(dst)), Storage::UInt64(src)) => {
                copy_block(dst, src.as_slice(), dst_stride, src_stride, components, offset, count);
            }
            (Storage::Float32(Store::Owned(dst)), Storage::Float32(src)) => {
                copy_block(dst, src.as_slice(), dst_stride, src_stride, components, offset, count);
            }
            (Storage::Float64(Store::Owned(dst)), Storage::Float64(src)) => {
                copy_block(dst, src.as_slice(), dst_stride, src_stride, components, offset, count);
            }
            // The type equality check above rules out mixed pairs.
            _ => return Err(ProtocolError::BadComponentType { component: "spliced block" }),
        }
        Ok(())
    }

    /// Ensure the storage is uniquely owned, copying shared data if needed.
    pub fn duplicate(&mut self) {
        match &mut self.storage {
            Storage::Int8(store) => store.make_owned(),
            Storage::UInt8(store) => store.make_owned(),
            Storage::Int16(store) => store.make_owned(),
            Storage::UInt16(store) => store.make_owned(),
            Storage::Int32(store) => store.make_owned(),
            Storage::UInt32(store) => store.make_owned(),
            Storage::Int64(store) => store.make_owned(),
            Storage::UInt64(store) => store.make_owned(),
            Storage::Float32(store) => store.make_owned(),
            Storage::Float64(store) => store.make_owned(),
        }
    }

    /// Read one component as `f64`, converting from the storage type.
    #[must_use]
    pub fn f64_at(&self, element: usize, component: usize) -> Option<f64> {
        if element >= self.count() as usize || component >= usize::from(self.component_count) {
            return None;
        }
        let at = element * usize::from(self.element_stride) + component;
        Some(with_slice!(&self.storage, slice => slice[at] as f64))
    }

    /// Read one component as `u32`, truncating from wider integer storage.
    #[must_use]
    pub fn u32_at(&self, element: usize, component: usize) -> Option<u32> {
        if element >= self.count() as usize || component >= usize::from(self.component_count) {
            return None;
        }
        let at = element * usize::from(self.element_stride) + component;
        Some(with_slice!(&self.storage, slice => slice[at] as u32))
    }

    /// Write a block of elements starting at `offset` in this buffer's
    /// native element type, honouring `byte_limit` (zero = unbounded) and
    /// the packet capacity. Returns the number of whole elements written;
    /// zero when nothing fits.
    ///
    /// # Errors
    ///
    /// `ProtocolError::OffsetOutOfRange` when `offset` exceeds the element
    /// count.
    pub fn write(
        &self,
        packet: &mut PacketWriter<'_>,
        offset: u32,
        byte_limit: u32,
    ) -> Result<u32> {
        let element_bytes =
            usize::from(self.component_count) * self.element_type().byte_size();
        let count = self.window(packet, offset, byte_limit, BLOCK_OVERHEAD, element_bytes)?;

        packet.write(offset)?;
        packet.write(count as u16)?;
        packet.write(self.component_count)?;
        packet.write(self.element_type().to_u8())?;
        self.emit_elements(packet, offset, count)?;
        Ok(count)
    }

    /// Write a block of float elements in packed (quantised) form. The
    /// quantisation unit must be positive; values that do not fit the packed
    /// integer range fail the write before any payload is emitted.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::PackedTypeUnsupported` for non-float storage
    /// - `ProtocolError::InvalidQuantisationUnit` for a non-positive unit
    /// - `ProtocolError::QuantisationOverflow` for unrepresentable values
    /// - `ProtocolError::OffsetOutOfRange` as for [`DataBuffer::write`]
    pub fn write_packed(
        &self,
        packet: &mut PacketWriter<'_>,
        offset: u32,
        quantisation_unit: f64,
        byte_limit: u32,
    ) -> Result<u32> {
        if quantisation_unit.is_nan() || quantisation_unit <= 0.0 {
            return Err(ProtocolError::InvalidQuantisationUnit { unit: quantisation_unit });
        }
        let packed = match self.element_type() {
            ElementType::Float32 => ElementType::PackedFloat16,
            ElementType::Float64 => ElementType::PackedFloat32,
            _ => return Err(ProtocolError::PackedTypeUnsupported),
        };

        let unit_bytes = match packed {
            ElementType::PackedFloat16 => 4,
            _ => 8,
        };
        let element_bytes = usize::from(self.component_count) * packed.byte_size();
        let count =
            self.window(packet, offset, byte_limit, BLOCK_OVERHEAD + unit_bytes, element_bytes)?;

        // Validate the whole window before any of it is written.
        let (min, max) = match packed {
            ElementType::PackedFloat16 => (f64::from(i16::MIN), f64::from(i16::MAX)),
            _ => (f64::from(i32::MIN), f64::from(i32::MAX)),
        };
        for element in offset..offset + count {
            for component in 0..usize::from(self.component_count) {
                let value = self.f64_at(element as usize, component).unwrap_or(0.0);
                let quantised = (value / quantisation_unit).round();
                if quantised < min || quantised > max {
                    return Err(ProtocolError::QuantisationOverflow {
                        value,
                        unit: quantisation_unit,
                    });
                }
            }
        }

        packet.write(offset)?;
        packet.write(count as u16)?;
        packet.write(self.component_count)?;
        packet.write(packed.to_u8())?;
        match packed {
            ElementType::PackedFloat16 => {
                packet.write(quantisation_unit as f32)?;
                for element in offset..offset + count {
                    for component in 0..usize::from(self.component_count) {
                        let value = self.f64_at(element as usize, component).unwrap_or(0.0);
                        packet.write((value / quantisation_unit).round() as i16)?;
                    }
                }
            }
            _ => {
                packet.write(quantisation_unit)?;
                for element in offset..offset + count {
                    for component in 0..usize::from(self.component_count) {
                        let value = self.f64_at(element as usize, component).unwrap_or(0.0);
                        packet.write((value / quantisation_unit).round() as i32)?;
                    }
                }
            }
        }
        Ok(count)
    }

    /// Read a block written by [`DataBuffer::write`] or
    /// [`DataBuffer::write_packed`]. Packed forms decode back to their float
    /// type. Returns the element offset of the block and the decoded buffer.
    pub fn read(packet: &mut PacketReader<'_>) -> Result<(u32, Self)> {
        let offset = packet.read::<u32>()?;
        let count = packet.read::<u16>()?;
        let component_count = packet.read::<u8>()?;
        let type_raw = packet.read::<u8>()?;
        let element_type = ElementType::from_u8(type_raw)
            .ok_or(ProtocolError::UnknownElementType { value: u16::from(type_raw) })?;
        let buffer = Self::read_elements(packet, element_type, component_count, count)?;
        Ok((offset, buffer))
    }

    /// Read `count` elements of `element_type` with `component_count`
    /// components, including the quantisation unit for packed forms.
    pub(crate) fn read_elements(
        packet: &mut PacketReader<'_>,
        element_type: ElementType,
        component_count: u8,
        count: u16,
    ) -> Result<Self> {
        let scalars = usize::from(count) * usize::from(component_count.max(1));
        let buffer = match element_type {
            ElementType::Int8 => Self::new(packet.read_vec::<i8>(scalars)?, component_count),
            ElementType::UInt8 => Self::new(packet.read_vec::<u8>(scalars)?, component_count),
            ElementType::Int16 => Self::new(packet.read_vec::<i16>(scalars)?, component_count),
            ElementType::UInt16 => Self::new(packet.read_vec::<u16>(scalars)?, component_count),
            ElementType::Int32 => Self::new(packet.read_vec::<i32>(scalars)?, component_count),
            ElementType::UInt32 => Self::new(packet.read_vec::<u32>(scalars)?, component_count),
            ElementType::Int64 => Self::new(packet.read_vec::<i64>(scalars)?, component_count),
            ElementType::UInt64 => Self::new(packet.read_vec::<u64>(scalars)?, component_count),
            ElementType::Float32 => Self::new(packet.read_vec::<f32>(scalars)?, component_count),
            ElementType::Float64 => Self::new(packet.read_vec::<f64>(scalars)?, component_count),
            ElementType::PackedFloat16 => {
                let unit = packet.read::<f32>()?;
                let quantised = packet.read_vec::<i16>(scalars)?;
                let values: Vec<f32> =
                    quantised.into_iter().map(|q| f32::from(q) * unit).collect();
                Self::new(values, component_count)
            }
            ElementType::PackedFloat32 => {
                let unit = packet.read::<f64>()?;
                let quantised = packet.read_vec::<i32>(scalars)?;
                let values: Vec<f64> =
                    quantised.into_iter().map(|q| f64::from(q) * unit).collect();
                Self::new(values, component_count)
            }
        };
        Ok(buffer)
    }

    /// Write `count` elements starting at `offset` as tightly packed
    /// scalars, no prefix.
    pub(crate) fn emit_elements(
        &self,
        packet: &mut PacketWriter<'_>,
        offset: u32,
        count: u32,
    ) -> Result<()> {
        let stride = usize::from(self.element_stride);
        let components = usize::from(self.component_count);
        with_slice!(&self.storage, slice => {
            for element in offset as usize..(offset + count) as usize {
                let base = element * stride;
                for value in &slice[base..base + components] {
                    packet.write(*value)?;
                }
            }
        });
        Ok(())
    }

    /// Clamp a write window to the remaining elements, the byte budget and
    /// the packet capacity.
    fn window(
        &self,
        packet: &PacketWriter<'_>,
        offset: u32,
        byte_limit: u32,
        overhead: usize,
        element_bytes: usize,
    ) -> Result<u32> {
        let total = self.count();
        if offset > total {
            return Err(ProtocolError::OffsetOutOfRange { offset, count: total });
        }
        let capacity =
            (usize::from(packet.bytes_remaining()).saturating_sub(overhead) / element_bytes) as u32;
        let budget = if byte_limit == 0 {
            u32::MAX
        } else {
            (byte_limit as usize).saturating_sub(overhead) as u32 / element_bytes as u32
        };
        Ok((total - offset).min(capacity).min(budget).min(u32::from(u16::MAX)))
    }
}

impl PartialEq for DataBuffer {
    fn eq(&self, other: &Self) -> bool {
        if self.element_type() != other.element_type()
            || self.component_count != other.component_count
            || self.count() != other.count()
        {
            return false;
        }
        let components = usize::from(self.component_count);
        for element in 0..self.count() as usize {
            for component in 0..components {
                let a = self.f64_at(element, component);
                let b = other.f64_at(element, component);
                match (a, b) {
                    (Some(a), Some(b)) if a.to_bits() == b.to_bits() => {}
                    _ => return false,
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::RoutingId;

    fn write_block(buffer: &DataBuffer, byte_limit: u32) -> (u32, Vec<u8>) {
        let mut raw = vec![0u8; 0xFFFF];
        let mut writer = PacketWriter::new(&mut raw, RoutingId::Mesh.to_u16(), 0).unwrap();
        let written = buffer.write(&mut writer, 0, byte_limit).unwrap();
        writer.finalise().unwrap();
        (written, writer.data().to_vec())
    }

    #[test]
    fn integer_round_trip() {
        let buffer = DataBuffer::new(vec![1u32, 2, 3, 4, 5, 6], 1);
        let (written, bytes) = write_block(&buffer, 0);
        assert_eq!(written, 6);

        let mut reader = PacketReader::new(&bytes).unwrap();
        let (offset, decoded) = DataBuffer::read(&mut reader).unwrap();
        assert_eq!(offset, 0);
        assert_eq!(decoded, buffer);
    }

    #[test]
    fn strided_storage_writes_tight() {
        // xyz_ xyz_ layout with a pad scalar per element.
        let buffer =
            DataBuffer::new(vec![1.0f32, 2.0, 3.0, 0.0, 4.0, 5.0, 6.0, 0.0], 3).with_stride(4);
        assert_eq!(buffer.count(), 2);
        let (written, bytes) = write_block(&buffer, 0);
        assert_eq!(written, 2);

        let mut reader = PacketReader::new(&bytes).unwrap();
        let (_, decoded) = DataBuffer::read(&mut reader).unwrap();
        assert_eq!(decoded.count(), 2);
        assert_eq!(decoded.f64_at(1, 2), Some(6.0));
    }

    #[test]
    fn byte_limit_bounds_the_block() {
        let values: Vec<f32> = (0..300).map(|i| i as f32).collect();
        let buffer = DataBuffer::new(values, 3);
        // 100 elements of 12 bytes; a 128 byte budget fits 10 elements.
        let (written, _) = write_block(&buffer, 128);
        assert_eq!(written, 10);
    }

    #[test]
    fn packed_round_trip_within_half_unit() {
        let values: Vec<f64> = vec![0.0, 0.05, -1.275, 3.15, 100.0, -99.99];
        let buffer = DataBuffer::new(values.clone(), 3);
        let unit = 0.1;

        let mut raw = vec![0u8; 1024];
        let mut writer = PacketWriter::new(&mut raw, RoutingId::Mesh.to_u16(), 0).unwrap();
        let written = buffer.write_packed(&mut writer, 0, unit, 0).unwrap();
        assert_eq!(written, 2);
        writer.finalise().unwrap();
        let bytes = writer.data().to_vec();

        let mut reader = PacketReader::new(&bytes).unwrap();
        let (_, decoded) = DataBuffer::read(&mut reader).unwrap();
        assert_eq!(decoded.element_type(), ElementType::Float64);
        for (i, expected) in values.iter().enumerate() {
            let got = decoded.f64_at(i / 3, i % 3).unwrap();
            assert!((got - expected).abs() <= unit / 2.0 + 1e-12, "{got} vs {expected}");
        }
    }

    #[test]
    fn packed_overflow_fails_not_clamps() {
        let buffer = DataBuffer::new(vec![1.0e9f32, 0.0, 0.0], 3);
        let mut raw = vec![0u8; 1024];
        let mut writer = PacketWriter::new(&mut raw, RoutingId::Mesh.to_u16(), 0).unwrap();
        let result = buffer.write_packed(&mut writer, 0, 0.001, 0);
        assert!(matches!(result, Err(ProtocolError::QuantisationOverflow { .. })));
        // Nothing was committed to the payload.
        assert_eq!(writer.payload_size(), 0);
    }

    #[test]
    fn splice_accumulates_chunks_out_of_order() {
        let mut target = DataBuffer::empty(ElementType::Float32, 3);
        let tail = DataBuffer::new(vec![4.0f32, 5.0, 6.0], 3);
        let head = DataBuffer::new(vec![1.0f32, 2.0, 3.0], 3);
        target.splice(1, &tail).unwrap();
        target.splice(0, &head).unwrap();
        assert_eq!(target.count(), 2);
        assert_eq!(target.f64_at(0, 0), Some(1.0));
        assert_eq!(target.f64_at(1, 2), Some(6.0));
    }

    #[test]
    fn splice_rejects_type_mismatch() {
        let mut target = DataBuffer::empty(ElementType::Float32, 3);
        let block = DataBuffer::new(vec![1u32, 2, 3], 3);
        assert!(matches!(
            target.splice(0, &block),
            Err(ProtocolError::BadComponentType { .. })
        ));
    }

    #[test]
    fn duplicate_detaches_shared_storage() {
        let shared: Arc<[u32]> = vec![1u32, 2, 3].into();
        let mut buffer = DataBuffer::new(Arc::clone(&shared), 1);
        buffer.duplicate();
        assert_eq!(buffer.u32_at(0, 0), Some(1));
        assert_eq!(Arc::strong_count(&shared), 1);
    }
}
