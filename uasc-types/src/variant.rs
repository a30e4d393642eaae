// UASC for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Contains the implementation of `Variant` and the `Array` type used for
//! single and multi dimensional variant arrays.

use std::{
    fmt,
    io::{Read, Write},
};

use crate::{
    byte_string::ByteString,
    data_value::DataValue,
    date_time::DateTime,
    diagnostic_info::DiagnosticInfo,
    encoding::{
        read_u8, write_i32, write_u8, BinaryDecodable, BinaryEncodable, EncodingResult, Error,
    },
    expanded_node_id::ExpandedNodeId,
    extension_object::ExtensionObject,
    guid::Guid,
    localized_text::LocalizedText,
    node_id::NodeId,
    qualified_name::QualifiedName,
    read_i32,
    status_code::StatusCode,
    string::{UAString, XmlElement},
    Context,
};

/// The scalar type carried in the low six bits of a variant encoding mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum VariantScalarTypeId {
    /// Boolean
    Boolean = 1,
    /// Signed byte
    SByte = 2,
    /// Unsigned byte
    Byte = 3,
    /// Signed 16-bit integer
    Int16 = 4,
    /// Unsigned 16-bit integer
    UInt16 = 5,
    /// Signed 32-bit integer
    Int32 = 6,
    /// Unsigned 32-bit integer
    UInt32 = 7,
    /// Signed 64-bit integer
    Int64 = 8,
    /// Unsigned 64-bit integer
    UInt64 = 9,
    /// 32-bit float
    Float = 10,
    /// 64-bit float
    Double = 11,
    /// String
    String = 12,
    /// DateTime
    DateTime = 13,
    /// Guid
    Guid = 14,
    /// ByteString
    ByteString = 15,
    /// XmlElement
    XmlElement = 16,
    /// NodeId
    NodeId = 17,
    /// ExpandedNodeId
    ExpandedNodeId = 18,
    /// StatusCode
    StatusCode = 19,
    /// QualifiedName
    QualifiedName = 20,
    /// LocalizedText
    LocalizedText = 21,
    /// ExtensionObject
    ExtensionObject = 22,
    /// DataValue
    DataValue = 23,
    /// Nested variant, only valid inside an array
    Variant = 24,
    /// DiagnosticInfo
    DiagnosticInfo = 25,
}

impl VariantScalarTypeId {
    /// Parse a scalar type id out of the low bits of an encoding mask.
    pub fn from_encoding_mask(mask: u8) -> Option<Self> {
        Some(match mask & !EncodingMask::ARRAY_MASK {
            1 => Self::Boolean,
            2 => Self::SByte,
            3 => Self::Byte,
            4 => Self::Int16,
            5 => Self::UInt16,
            6 => Self::Int32,
            7 => Self::UInt32,
            8 => Self::Int64,
            9 => Self::UInt64,
            10 => Self::Float,
            11 => Self::Double,
            12 => Self::String,
            13 => Self::DateTime,
            14 => Self::Guid,
            15 => Self::ByteString,
            16 => Self::XmlElement,
            17 => Self::NodeId,
            18 => Self::ExpandedNodeId,
            19 => Self::StatusCode,
            20 => Self::QualifiedName,
            21 => Self::LocalizedText,
            22 => Self::ExtensionObject,
            23 => Self::DataValue,
            24 => Self::Variant,
            25 => Self::DiagnosticInfo,
            _ => return None,
        })
    }

    /// The encoding mask value for this scalar type.
    pub fn encoding_mask(&self) -> u8 {
        *self as u8
    }
}

/// Bits of the variant encoding mask beyond the scalar type.
pub struct EncodingMask;

impl EncodingMask {
    /// Bit set when the variant holds an array of values.
    pub const ARRAY_VALUES_BIT: u8 = 0x80;
    /// Bit set when an array of dimensions follows the values.
    pub const ARRAY_DIMENSIONS_BIT: u8 = 0x40;
    /// Both array bits.
    pub const ARRAY_MASK: u8 = Self::ARRAY_VALUES_BIT | Self::ARRAY_DIMENSIONS_BIT;
}

/// A single or multi dimensional array of variants, all scalars of the same
/// type. The values of a multi dimensional array are stored flattened in
/// row-major order together with the dimension vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Array {
    /// The scalar type of every element.
    pub value_type: VariantScalarTypeId,
    /// The elements, flattened row-major for multi dimensional arrays.
    pub values: Vec<Variant>,
    /// The dimensions, `None` for a single dimensional array.
    pub dimensions: Option<Vec<u32>>,
}

impl Array {
    /// Create a single dimension array, validating the element types.
    pub fn new(
        value_type: VariantScalarTypeId,
        values: impl Into<Vec<Variant>>,
    ) -> Result<Array, String> {
        let values = values.into();
        Self::validate_values(value_type, &values)?;
        Ok(Array {
            value_type,
            values,
            dimensions: None,
        })
    }

    /// Create a multi dimensional array, validating element types and that
    /// the dimensions multiply out to the number of values.
    pub fn new_multi(
        value_type: VariantScalarTypeId,
        values: impl Into<Vec<Variant>>,
        dimensions: impl Into<Vec<u32>>,
    ) -> Result<Array, String> {
        let values = values.into();
        let dimensions = dimensions.into();
        Self::validate_values(value_type, &values)?;

        let mut length = 1u32;
        for d in &dimensions {
            if *d == 0 {
                return Err("Array dimension is zero".to_string());
            }
            length = length
                .checked_mul(*d)
                .ok_or_else(|| "Array dimensions overflow".to_string())?;
        }
        if length as usize != values.len() {
            return Err(format!(
                "Array dimensions {:?} do not match number of values {}",
                dimensions,
                values.len()
            ));
        }
        Ok(Array {
            value_type,
            values,
            dimensions: Some(dimensions),
        })
    }

    fn validate_values(
        value_type: VariantScalarTypeId,
        values: &[Variant],
    ) -> Result<(), String> {
        if values
            .iter()
            .any(|v| v.scalar_type_id() != Some(value_type))
        {
            Err("Array contains values of the wrong type, or nested arrays".to_string())
        } else {
            Ok(())
        }
    }

    /// True if a dimension vector is present.
    pub fn is_multi_dimensional(&self) -> bool {
        self.dimensions.is_some()
    }
}

/// A `Variant` holds any of the built-in OPC UA data types, including single
/// and multi dimensional arrays of them.
///
/// Larger types are boxed to keep the size of the enum down, variants get
/// passed around on the stack a lot.
#[derive(PartialEq, Debug, Clone, Default)]
pub enum Variant {
    /// Empty type has no value, it is the null variant.
    #[default]
    Empty,
    /// Boolean
    Boolean(bool),
    /// Signed byte
    SByte(i8),
    /// Unsigned byte
    Byte(u8),
    /// Signed 16-bit int
    Int16(i16),
    /// Unsigned 16-bit int
    UInt16(u16),
    /// Signed 32-bit int
    Int32(i32),
    /// Unsigned 32-bit int
    UInt32(u32),
    /// Signed 64-bit int
    Int64(i64),
    /// Unsigned 64-bit int
    UInt64(u64),
    /// Float
    Float(f32),
    /// Double
    Double(f64),
    /// String
    String(UAString),
    /// DateTime
    DateTime(Box<DateTime>),
    /// Guid
    Guid(Box<Guid>),
    /// StatusCode
    StatusCode(StatusCode),
    /// ByteString
    ByteString(ByteString),
    /// XmlElement
    XmlElement(XmlElement),
    /// QualifiedName
    QualifiedName(Box<QualifiedName>),
    /// LocalizedText
    LocalizedText(Box<LocalizedText>),
    /// NodeId
    NodeId(Box<NodeId>),
    /// ExpandedNodeId
    ExpandedNodeId(Box<ExpandedNodeId>),
    /// ExtensionObject
    ExtensionObject(ExtensionObject),
    /// Nested variant, only valid as an array element
    Variant(Box<Variant>),
    /// DataValue
    DataValue(Box<DataValue>),
    /// DiagnosticInfo
    DiagnosticInfo(Box<DiagnosticInfo>),
    /// A single or multi dimensional array
    Array(Box<Array>),
}

macro_rules! from_scalar {
    ($t:ty, $variant:ident) => {
        impl From<$t> for Variant {
            fn from(value: $t) -> Self {
                Variant::$variant(value)
            }
        }
    };
}

macro_rules! from_boxed {
    ($t:ty, $variant:ident) => {
        impl From<$t> for Variant {
            fn from(value: $t) -> Self {
                Variant::$variant(Box::new(value))
            }
        }
    };
}

from_scalar!(bool, Boolean);
from_scalar!(i8, SByte);
from_scalar!(u8, Byte);
from_scalar!(i16, Int16);
from_scalar!(u16, UInt16);
from_scalar!(i32, Int32);
from_scalar!(u32, UInt32);
from_scalar!(i64, Int64);
from_scalar!(u64, UInt64);
from_scalar!(f32, Float);
from_scalar!(f64, Double);
from_scalar!(UAString, String);
from_scalar!(StatusCode, StatusCode);
from_scalar!(ByteString, ByteString);
from_scalar!(ExtensionObject, ExtensionObject);
from_boxed!(DateTime, DateTime);
from_boxed!(Guid, Guid);
from_boxed!(QualifiedName, QualifiedName);
from_boxed!(LocalizedText, LocalizedText);
from_boxed!(NodeId, NodeId);
from_boxed!(ExpandedNodeId, ExpandedNodeId);
from_boxed!(DataValue, DataValue);
from_boxed!(DiagnosticInfo, DiagnosticInfo);

impl From<&str> for Variant {
    fn from(value: &str) -> Self {
        Variant::String(UAString::from(value))
    }
}

impl From<String> for Variant {
    fn from(value: String) -> Self {
        Variant::String(UAString::from(value))
    }
}

impl From<Array> for Variant {
    fn from(array: Array) -> Self {
        Variant::Array(Box::new(array))
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Variant::Boolean(v) => write!(f, "{}", v),
            Variant::SByte(v) => write!(f, "{}", v),
            Variant::Byte(v) => write!(f, "{}", v),
            Variant::Int16(v) => write!(f, "{}", v),
            Variant::UInt16(v) => write!(f, "{}", v),
            Variant::Int32(v) => write!(f, "{}", v),
            Variant::UInt32(v) => write!(f, "{}", v),
            Variant::Int64(v) => write!(f, "{}", v),
            Variant::UInt64(v) => write!(f, "{}", v),
            Variant::Float(v) => write!(f, "{}", v),
            Variant::Double(v) => write!(f, "{}", v),
            Variant::String(v) => write!(f, "{}", v),
            Variant::DateTime(v) => write!(f, "{}", v),
            Variant::Guid(v) => write!(f, "{}", v),
            Variant::NodeId(v) => write!(f, "{}", v),
            Variant::ExpandedNodeId(v) => write!(f, "{}", v),
            Variant::Variant(v) => write!(f, "Variant({})", v),
            value => write!(f, "{:?}", value),
        }
    }
}

impl Variant {
    /// True if this is the empty variant.
    pub fn is_empty(&self) -> bool {
        matches!(self, Variant::Empty)
    }

    /// The scalar type id of this value, `None` for Empty and arrays.
    pub fn scalar_type_id(&self) -> Option<VariantScalarTypeId> {
        match self {
            Variant::Empty => None,
            Variant::Boolean(_) => Some(VariantScalarTypeId::Boolean),
            Variant::SByte(_) => Some(VariantScalarTypeId::SByte),
            Variant::Byte(_) => Some(VariantScalarTypeId::Byte),
            Variant::Int16(_) => Some(VariantScalarTypeId::Int16),
            Variant::UInt16(_) => Some(VariantScalarTypeId::UInt16),
            Variant::Int32(_) => Some(VariantScalarTypeId::Int32),
            Variant::UInt32(_) => Some(VariantScalarTypeId::UInt32),
            Variant::Int64(_) => Some(VariantScalarTypeId::Int64),
            Variant::UInt64(_) => Some(VariantScalarTypeId::UInt64),
            Variant::Float(_) => Some(VariantScalarTypeId::Float),
            Variant::Double(_) => Some(VariantScalarTypeId::Double),
            Variant::String(_) => Some(VariantScalarTypeId::String),
            Variant::DateTime(_) => Some(VariantScalarTypeId::DateTime),
            Variant::Guid(_) => Some(VariantScalarTypeId::Guid),
            Variant::StatusCode(_) => Some(VariantScalarTypeId::StatusCode),
            Variant::ByteString(_) => Some(VariantScalarTypeId::ByteString),
            Variant::XmlElement(_) => Some(VariantScalarTypeId::XmlElement),
            Variant::QualifiedName(_) => Some(VariantScalarTypeId::QualifiedName),
            Variant::LocalizedText(_) => Some(VariantScalarTypeId::LocalizedText),
            Variant::NodeId(_) => Some(VariantScalarTypeId::NodeId),
            Variant::ExpandedNodeId(_) => Some(VariantScalarTypeId::ExpandedNodeId),
            Variant::ExtensionObject(_) => Some(VariantScalarTypeId::ExtensionObject),
            Variant::Variant(_) => Some(VariantScalarTypeId::Variant),
            Variant::DataValue(_) => Some(VariantScalarTypeId::DataValue),
            Variant::DiagnosticInfo(_) => Some(VariantScalarTypeId::DiagnosticInfo),
            Variant::Array(_) => None,
        }
    }

    /// The encoding mask for this variant, including the array bits.
    pub fn encoding_mask(&self) -> u8 {
        match self {
            Variant::Empty => 0,
            Variant::Array(array) => {
                let mut mask =
                    array.value_type.encoding_mask() | EncodingMask::ARRAY_VALUES_BIT;
                if array.dimensions.is_some() {
                    mask |= EncodingMask::ARRAY_DIMENSIONS_BIT;
                }
                mask
            }
            other => other
                .scalar_type_id()
                .map(|t| t.encoding_mask())
                .unwrap_or(0),
        }
    }

    /// The byte length of just the value, without the encoding mask.
    fn value_byte_len(&self, ctx: &Context<'_>) -> usize {
        match self {
            Variant::Empty => 0,
            Variant::Boolean(v) => v.byte_len(ctx),
            Variant::SByte(v) => v.byte_len(ctx),
            Variant::Byte(v) => v.byte_len(ctx),
            Variant::Int16(v) => v.byte_len(ctx),
            Variant::UInt16(v) => v.byte_len(ctx),
            Variant::Int32(v) => v.byte_len(ctx),
            Variant::UInt32(v) => v.byte_len(ctx),
            Variant::Int64(v) => v.byte_len(ctx),
            Variant::UInt64(v) => v.byte_len(ctx),
            Variant::Float(v) => v.byte_len(ctx),
            Variant::Double(v) => v.byte_len(ctx),
            Variant::String(v) => v.byte_len(ctx),
            Variant::DateTime(v) => v.byte_len(ctx),
            Variant::Guid(v) => v.byte_len(ctx),
            Variant::StatusCode(v) => v.byte_len(ctx),
            Variant::ByteString(v) => v.byte_len(ctx),
            Variant::XmlElement(v) => v.byte_len(ctx),
            Variant::QualifiedName(v) => v.byte_len(ctx),
            Variant::LocalizedText(v) => v.byte_len(ctx),
            Variant::NodeId(v) => v.byte_len(ctx),
            Variant::ExpandedNodeId(v) => v.byte_len(ctx),
            Variant::ExtensionObject(v) => v.byte_len(ctx),
            Variant::Variant(v) => v.byte_len(ctx),
            Variant::DataValue(v) => v.byte_len(ctx),
            Variant::DiagnosticInfo(v) => v.byte_len(ctx),
            Variant::Array(array) => {
                // Array length prefix plus each value
                let mut size = 4;
                size += array
                    .values
                    .iter()
                    .map(|v| v.value_byte_len(ctx))
                    .sum::<usize>();
                if let Some(ref dimensions) = array.dimensions {
                    size += 4 + dimensions.len() * 4;
                }
                size
            }
        }
    }

    /// Encode just the value without the encoding mask.
    fn encode_value<S: Write + ?Sized>(
        &self,
        stream: &mut S,
        ctx: &Context<'_>,
    ) -> EncodingResult<()> {
        match self {
            Variant::Empty => Ok(()),
            Variant::Boolean(v) => v.encode(stream, ctx),
            Variant::SByte(v) => v.encode(stream, ctx),
            Variant::Byte(v) => v.encode(stream, ctx),
            Variant::Int16(v) => v.encode(stream, ctx),
            Variant::UInt16(v) => v.encode(stream, ctx),
            Variant::Int32(v) => v.encode(stream, ctx),
            Variant::UInt32(v) => v.encode(stream, ctx),
            Variant::Int64(v) => v.encode(stream, ctx),
            Variant::UInt64(v) => v.encode(stream, ctx),
            Variant::Float(v) => v.encode(stream, ctx),
            Variant::Double(v) => v.encode(stream, ctx),
            Variant::String(v) => v.encode(stream, ctx),
            Variant::DateTime(v) => v.encode(stream, ctx),
            Variant::Guid(v) => v.encode(stream, ctx),
            Variant::StatusCode(v) => v.encode(stream, ctx),
            Variant::ByteString(v) => v.encode(stream, ctx),
            Variant::XmlElement(v) => v.encode(stream, ctx),
            Variant::QualifiedName(v) => v.encode(stream, ctx),
            Variant::LocalizedText(v) => v.encode(stream, ctx),
            Variant::NodeId(v) => v.encode(stream, ctx),
            Variant::ExpandedNodeId(v) => v.encode(stream, ctx),
            Variant::ExtensionObject(v) => v.encode(stream, ctx),
            Variant::Variant(v) => v.encode(stream, ctx),
            Variant::DataValue(v) => v.encode(stream, ctx),
            Variant::DiagnosticInfo(v) => v.encode(stream, ctx),
            Variant::Array(array) => {
                write_i32(stream, array.values.len() as i32)?;
                for value in array.values.iter() {
                    if matches!(value, Variant::Array(_)) {
                        return Err(Error::encoding("Nested arrays are not permitted"));
                    }
                    value.encode_value(stream, ctx)?;
                }
                if let Some(ref dimensions) = array.dimensions {
                    // Dimensions go out as Int32 even though they are
                    // presented as UInt32 in attributes.
                    write_i32(stream, dimensions.len() as i32)?;
                    for dimension in dimensions {
                        write_i32(stream, *dimension as i32)?;
                    }
                }
                Ok(())
            }
        }
    }

    /// Decode a single value of the type named by the scalar bits of the mask.
    fn decode_value<S: Read + ?Sized>(
        stream: &mut S,
        encoding_mask: u8,
        ctx: &Context<'_>,
    ) -> EncodingResult<Self> {
        let Some(type_id) = VariantScalarTypeId::from_encoding_mask(encoding_mask) else {
            return if encoding_mask & !EncodingMask::ARRAY_MASK == 0 {
                Ok(Variant::Empty)
            } else {
                Err(Error::decoding(format!(
                    "Unrecognized variant encoding mask {:#04x}",
                    encoding_mask
                )))
            };
        };
        Ok(match type_id {
            VariantScalarTypeId::Boolean => Variant::from(bool::decode(stream, ctx)?),
            VariantScalarTypeId::SByte => Variant::from(i8::decode(stream, ctx)?),
            VariantScalarTypeId::Byte => Variant::from(u8::decode(stream, ctx)?),
            VariantScalarTypeId::Int16 => Variant::from(i16::decode(stream, ctx)?),
            VariantScalarTypeId::UInt16 => Variant::from(u16::decode(stream, ctx)?),
            VariantScalarTypeId::Int32 => Variant::from(i32::decode(stream, ctx)?),
            VariantScalarTypeId::UInt32 => Variant::from(u32::decode(stream, ctx)?),
            VariantScalarTypeId::Int64 => Variant::from(i64::decode(stream, ctx)?),
            VariantScalarTypeId::UInt64 => Variant::from(u64::decode(stream, ctx)?),
            VariantScalarTypeId::Float => Variant::from(f32::decode(stream, ctx)?),
            VariantScalarTypeId::Double => Variant::from(f64::decode(stream, ctx)?),
            VariantScalarTypeId::String => Variant::from(UAString::decode(stream, ctx)?),
            VariantScalarTypeId::DateTime => Variant::from(DateTime::decode(stream, ctx)?),
            VariantScalarTypeId::Guid => Variant::from(Guid::decode(stream, ctx)?),
            VariantScalarTypeId::StatusCode => Variant::from(StatusCode::decode(stream, ctx)?),
            VariantScalarTypeId::ByteString => Variant::from(ByteString::decode(stream, ctx)?),
            VariantScalarTypeId::XmlElement => {
                // XmlElement is a typedef for UAString, force the variant kind
                Variant::XmlElement(XmlElement::decode(stream, ctx)?)
            }
            VariantScalarTypeId::QualifiedName => {
                Variant::from(QualifiedName::decode(stream, ctx)?)
            }
            VariantScalarTypeId::LocalizedText => {
                Variant::from(LocalizedText::decode(stream, ctx)?)
            }
            VariantScalarTypeId::NodeId => Variant::from(NodeId::decode(stream, ctx)?),
            VariantScalarTypeId::ExpandedNodeId => {
                Variant::from(ExpandedNodeId::decode(stream, ctx)?)
            }
            VariantScalarTypeId::ExtensionObject => {
                // Extension objects do their own depth checking
                Variant::from(ExtensionObject::decode(stream, ctx)?)
            }
            VariantScalarTypeId::Variant => {
                // Nested variant is depth checked to prevent deep recursion
                let _depth_lock = ctx.options().depth_lock()?;
                Variant::Variant(Box::new(Variant::decode(stream, ctx)?))
            }
            VariantScalarTypeId::DataValue => Variant::from(DataValue::decode(stream, ctx)?),
            VariantScalarTypeId::DiagnosticInfo => {
                Variant::from(DiagnosticInfo::decode(stream, ctx)?)
            }
        })
    }
}

impl BinaryEncodable for Variant {
    fn byte_len(&self, ctx: &Context<'_>) -> usize {
        // Encoding mask plus the value itself
        1 + self.value_byte_len(ctx)
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S, ctx: &Context<'_>) -> EncodingResult<()> {
        write_u8(stream, self.encoding_mask())?;
        self.encode_value(stream, ctx)
    }
}

impl BinaryDecodable for Variant {
    fn decode<S: Read + ?Sized>(stream: &mut S, ctx: &Context<'_>) -> EncodingResult<Self> {
        let encoding_mask = read_u8(stream)?;
        let element_mask = encoding_mask & !EncodingMask::ARRAY_MASK;

        if encoding_mask & EncodingMask::ARRAY_VALUES_BIT == 0 {
            if encoding_mask & EncodingMask::ARRAY_DIMENSIONS_BIT != 0 {
                return Err(Error::decoding(
                    "Array dimensions bit set without the array values bit",
                ));
            }
            return Self::decode_value(stream, element_mask, ctx);
        }

        let value_type = VariantScalarTypeId::from_encoding_mask(element_mask)
            .ok_or_else(|| {
                Error::decoding(format!("Unrecognized encoding mask {:#04x}", element_mask))
            })?;

        let array_length = read_i32(stream)?;
        if array_length < -1 {
            return Err(Error::decoding(format!(
                "Invalid array length {}",
                array_length
            )));
        }
        // Null and empty arrays decode to an empty array of the type
        if array_length <= 0 {
            return Array::new(value_type, Vec::new())
                .map(Variant::from)
                .map_err(Error::decoding);
        }

        let array_length = array_length as usize;
        if array_length > ctx.options().max_array_length {
            return Err(Error::new(
                StatusCode::BadEncodingLimitsExceeded,
                format!(
                    "Variant array length {} exceeds array length limit {}",
                    array_length,
                    ctx.options().max_array_length
                ),
            ));
        }

        let mut values: Vec<Variant> = Vec::with_capacity(array_length);
        for _ in 0..array_length {
            values.push(Variant::decode_value(stream, element_mask, ctx)?);
        }

        if encoding_mask & EncodingMask::ARRAY_DIMENSIONS_BIT != 0 {
            let Some(dimensions) = <Option<Vec<i32>>>::decode(stream, ctx)? else {
                return Err(Error::decoding(
                    "No array dimensions despite the bit flag being set",
                ));
            };
            if dimensions.iter().any(|d| *d <= 0) {
                return Err(Error::decoding(
                    "Invalid array dimensions, one or more dimensions are zero or negative",
                ));
            }
            let dimensions: Vec<u32> = dimensions.into_iter().map(|d| d as u32).collect();
            Array::new_multi(value_type, values, dimensions)
                .map(Variant::from)
                .map_err(Error::decoding)
        } else {
            Array::new(value_type, values)
                .map(Variant::from)
                .map_err(Error::decoding)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ContextOwned;

    fn round_trip(v: &Variant) -> Vec<u8> {
        let ctx_owned = ContextOwned::default();
        let ctx = ctx_owned.context();
        let buf = v.encode_to_vec(&ctx);
        assert_eq!(buf.len(), v.byte_len(&ctx));
        let mut c = std::io::Cursor::new(&buf);
        assert_eq!(&Variant::decode(&mut c, &ctx).unwrap(), v);
        buf
    }

    #[test]
    fn scalars() {
        round_trip(&Variant::Empty);
        round_trip(&Variant::Boolean(true));
        round_trip(&Variant::SByte(-5));
        round_trip(&Variant::Byte(0xff));
        round_trip(&Variant::Int16(-20000));
        round_trip(&Variant::UInt16(55000));
        round_trip(&Variant::Int32(-5));
        round_trip(&Variant::UInt32(88));
        round_trip(&Variant::Int64(-1i64 << 40));
        round_trip(&Variant::UInt64(1u64 << 62));
        round_trip(&Variant::Float(2.5));
        round_trip(&Variant::Double(-11.75));
        round_trip(&Variant::from("text"));
        round_trip(&Variant::from(DateTime::now()));
        round_trip(&Variant::from(Guid::new()));
        round_trip(&Variant::from(StatusCode::BadDecodingError));
        round_trip(&Variant::from(ByteString::from(&[1u8, 2][..])));
        round_trip(&Variant::from(QualifiedName::new(1, "qn")));
        round_trip(&Variant::from(LocalizedText::new("en", "hi")));
        round_trip(&Variant::from(NodeId::new(2, 300u32)));
        round_trip(&Variant::from(ExpandedNodeId::new(NodeId::new(0, 5u32))));
        round_trip(&Variant::from(DataValue::from(Variant::Int32(3))));
        round_trip(&Variant::from(DiagnosticInfo {
            symbolic_id: Some(1),
            ..Default::default()
        }));
    }

    #[test]
    fn single_dimension_array() {
        let array = Array::new(
            VariantScalarTypeId::UInt32,
            vec![Variant::UInt32(1), Variant::UInt32(2)],
        )
        .unwrap();
        let buf = round_trip(&Variant::from(array));
        assert_eq!(buf[0], 0x80 | 0x07);
    }

    #[test]
    fn matrix_wire_format() {
        // A 2x3 Int32 matrix [[1,2,3],[4,5,6]], flattened row-major with a
        // trailing dimensions vector.
        let array = Array::new_multi(
            VariantScalarTypeId::Int32,
            (1..=6).map(Variant::Int32).collect::<Vec<_>>(),
            vec![2u32, 3],
        )
        .unwrap();
        let buf = round_trip(&Variant::from(array));
        let expected: Vec<u8> = vec![
            0xc6, // Int32 | array values | array dimensions
            0x06, 0x00, 0x00, 0x00, // 6 values
            0x01, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0x03, 0x00, 0x00, 0x00, 0x04, 0x00,
            0x00, 0x00, 0x05, 0x00, 0x00, 0x00, 0x06, 0x00, 0x00, 0x00, // 1..6
            0x02, 0x00, 0x00, 0x00, // 2 dimensions
            0x02, 0x00, 0x00, 0x00, 0x03, 0x00, 0x00, 0x00, // [2, 3]
        ];
        assert_eq!(buf, expected);

        let ctx_owned = ContextOwned::default();
        let mut c = std::io::Cursor::new(&buf);
        let Variant::Array(decoded) = Variant::decode(&mut c, &ctx_owned.context()).unwrap()
        else {
            panic!("expected array");
        };
        assert_eq!(decoded.dimensions, Some(vec![2, 3]));
        assert_eq!(
            decoded.values,
            (1..=6).map(Variant::Int32).collect::<Vec<_>>()
        );
    }

    #[test]
    fn dimension_mismatch_fails() {
        assert!(Array::new_multi(
            VariantScalarTypeId::Int32,
            vec![Variant::Int32(1)],
            vec![2u32, 3]
        )
        .is_err());
    }

    #[test]
    fn mixed_type_array_fails() {
        assert!(
            Array::new(
                VariantScalarTypeId::Int32,
                vec![Variant::Int32(1), Variant::Boolean(false)]
            )
            .is_err()
        );
    }

    #[test]
    fn nested_variant_depth_is_bounded() {
        // Each 0x18 asks for another nested variant
        let buf = vec![0x18u8; 64];
        let ctx_owned = ContextOwned::default();
        let mut c = std::io::Cursor::new(&buf);
        assert!(Variant::decode(&mut c, &ctx_owned.context()).is_err());
    }

    #[test]
    fn unknown_mask_fails() {
        let ctx_owned = ContextOwned::default();
        let mut c = std::io::Cursor::new(vec![0x3fu8]);
        assert!(Variant::decode(&mut c, &ctx_owned.context()).is_err());
    }
}
