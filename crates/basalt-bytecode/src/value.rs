//! Value representation using NaN-boxing (64-bit)
//!
//! # Encoding Strategy
//!
//! ```text
//! f64:        any bit pattern below 0xFFF8_0000_0000_0000 (NaNs canonicalized)
//! tagged:     1111111111111 ttt pppppppppppppppppppppppppppppppppppppppppppppppp
//!                           tag           48-bit payload
//! ```
//!
//! | tag | kind      | payload              |
//! |-----|-----------|----------------------|
//! | 0   | object    | u32 host handle      |
//! | 1   | int32     | i32 bits             |
//! | 2   | boolean   | 0 or 1               |
//! | 3   | string    | atom index           |
//! | 4   | undefined | 0                    |
//! | 5   | magic     | 0 (array hole)       |
//! | 6   | null      | 0                    |

use crate::atoms::Atom;
use std::fmt;

/// Base bit pattern of every tagged value
pub const NAN_BOX_BASE: u64 = 0xFFF8_0000_0000_0000;
/// Position of the 3-bit tag
pub const TAG_SHIFT: u64 = 48;
/// Low 48 bits
pub const PAYLOAD_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;

pub const TAG_OBJECT: u64 = 0x0;
pub const TAG_I32: u64 = 0x1;
pub const TAG_BOOL: u64 = 0x2;
pub const TAG_STRING: u64 = 0x3;
pub const TAG_UNDEFINED: u64 = 0x4;
pub const TAG_MAGIC: u64 = 0x5;
pub const TAG_NULL: u64 = 0x6;

const CANONICAL_NAN: u64 = 0x7FF8_0000_0000_0000;

/// NaN-boxed value
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Value(u64);

/// Dynamic type of a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Double,
    Int32,
    Boolean,
    String,
    Undefined,
    Null,
    Object,
    Magic,
}

impl ValueType {
    /// Int32 or Double
    pub fn is_number(self) -> bool {
        matches!(self, ValueType::Int32 | ValueType::Double)
    }
}

impl Value {
    #[inline]
    const fn tagged(tag: u64, payload: u64) -> Self {
        Value(NAN_BOX_BASE | (tag << TAG_SHIFT) | (payload & PAYLOAD_MASK))
    }

    /// Create the undefined value
    #[inline]
    pub const fn undefined() -> Self {
        Self::tagged(TAG_UNDEFINED, 0)
    }

    /// Create a null value
    #[inline]
    pub const fn null() -> Self {
        Self::tagged(TAG_NULL, 0)
    }

    /// Create a boolean value
    #[inline]
    pub const fn bool(b: bool) -> Self {
        Self::tagged(TAG_BOOL, b as u64)
    }

    /// Create an int32 value
    #[inline]
    pub const fn int32(i: i32) -> Self {
        Self::tagged(TAG_I32, i as u32 as u64)
    }

    /// Create a double value (NaN is canonicalized)
    #[inline]
    pub fn double(d: f64) -> Self {
        if d.is_nan() {
            Value(CANONICAL_NAN)
        } else {
            Value(d.to_bits())
        }
    }

    /// Create a number, preferring int32 when exactly representable
    pub fn number(d: f64) -> Self {
        let i = d as i32;
        if i as f64 == d && !(d == 0.0 && d.is_sign_negative()) {
            Self::int32(i)
        } else {
            Self::double(d)
        }
    }

    /// Create a string value from an interned atom
    #[inline]
    pub const fn string(atom: Atom) -> Self {
        Self::tagged(TAG_STRING, atom.0 as u64)
    }

    /// Create an opaque host object handle
    #[inline]
    pub const fn object(handle: u32) -> Self {
        Self::tagged(TAG_OBJECT, handle as u64)
    }

    /// The array-hole magic marker
    #[inline]
    pub const fn hole() -> Self {
        Self::tagged(TAG_MAGIC, 0)
    }

    /// Raw bits
    #[inline]
    pub const fn to_bits(self) -> u64 {
        self.0
    }

    /// Rebuild from raw bits
    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        Value(bits)
    }

    #[inline]
    const fn is_tagged(self) -> bool {
        self.0 & NAN_BOX_BASE == NAN_BOX_BASE
    }

    #[inline]
    const fn tag(self) -> u64 {
        (self.0 >> TAG_SHIFT) & 0x7
    }

    #[inline]
    const fn payload(self) -> u64 {
        self.0 & PAYLOAD_MASK
    }

    /// Dynamic type of this value
    pub const fn value_type(self) -> ValueType {
        if !self.is_tagged() {
            return ValueType::Double;
        }
        match self.tag() {
            TAG_OBJECT => ValueType::Object,
            TAG_I32 => ValueType::Int32,
            TAG_BOOL => ValueType::Boolean,
            TAG_STRING => ValueType::String,
            TAG_UNDEFINED => ValueType::Undefined,
            TAG_MAGIC => ValueType::Magic,
            _ => ValueType::Null,
        }
    }

    /// Check if this value is undefined
    #[inline]
    pub fn is_undefined(self) -> bool {
        self == Self::undefined()
    }

    /// Check if this value is null
    #[inline]
    pub fn is_null(self) -> bool {
        self == Self::null()
    }

    /// Check if this value is null or undefined
    #[inline]
    pub fn is_nullish(self) -> bool {
        self.is_null() || self.is_undefined()
    }

    /// Check if this value is a boolean
    #[inline]
    pub const fn is_bool(self) -> bool {
        self.is_tagged() && self.tag() == TAG_BOOL
    }

    /// Check if this value is an int32
    #[inline]
    pub const fn is_int32(self) -> bool {
        self.is_tagged() && self.tag() == TAG_I32
    }

    /// Check if this value is a double
    #[inline]
    pub const fn is_double(self) -> bool {
        !self.is_tagged()
    }

    /// Check if this value is an int32 or double
    #[inline]
    pub const fn is_number(self) -> bool {
        self.is_double() || self.is_int32()
    }

    /// Check if this value is a string
    #[inline]
    pub const fn is_string(self) -> bool {
        self.is_tagged() && self.tag() == TAG_STRING
    }

    /// Check if this value is a host object
    #[inline]
    pub const fn is_object(self) -> bool {
        self.is_tagged() && self.tag() == TAG_OBJECT
    }

    /// Check if this value is the array hole
    #[inline]
    pub const fn is_hole(self) -> bool {
        self.is_tagged() && self.tag() == TAG_MAGIC
    }

    /// Extract boolean value
    #[inline]
    pub const fn as_bool(self) -> Option<bool> {
        if self.is_bool() {
            Some(self.payload() != 0)
        } else {
            None
        }
    }

    /// Extract int32 value
    #[inline]
    pub const fn as_int32(self) -> Option<i32> {
        if self.is_int32() {
            Some(self.payload() as u32 as i32)
        } else {
            None
        }
    }

    /// Extract double value
    #[inline]
    pub fn as_double(self) -> Option<f64> {
        if self.is_double() {
            Some(f64::from_bits(self.0))
        } else {
            None
        }
    }

    /// Numeric value of an int32 or double
    #[inline]
    pub fn as_number(self) -> Option<f64> {
        match self.as_int32() {
            Some(i) => Some(i as f64),
            None => self.as_double(),
        }
    }

    /// Extract string atom
    #[inline]
    pub const fn as_string(self) -> Option<Atom> {
        if self.is_string() {
            Some(Atom(self.payload() as u32))
        } else {
            None
        }
    }

    /// Extract host object handle
    #[inline]
    pub const fn as_object(self) -> Option<u32> {
        if self.is_object() {
            Some(self.payload() as u32)
        } else {
            None
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::undefined()
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::int32(i)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Self::double(d)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value_type() {
            ValueType::Double => write!(f, "Double({})", f64::from_bits(self.0)),
            ValueType::Int32 => write!(f, "Int32({})", self.payload() as u32 as i32),
            ValueType::Boolean => write!(f, "Bool({})", self.payload() != 0),
            ValueType::String => write!(f, "String({})", Atom(self.payload() as u32)),
            ValueType::Undefined => f.write_str("Undefined"),
            ValueType::Null => f.write_str("Null"),
            ValueType::Object => write!(f, "Object({})", self.payload() as u32),
            ValueType::Magic => f.write_str("Hole"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value_type() {
            ValueType::Double => write!(f, "{}", f64::from_bits(self.0)),
            ValueType::Int32 => write!(f, "{}", self.payload() as u32 as i32),
            ValueType::Boolean => write!(f, "{}", self.payload() != 0),
            ValueType::String => write!(f, "{}", Atom(self.payload() as u32)),
            ValueType::Undefined => f.write_str("undefined"),
            ValueType::Null => f.write_str("null"),
            ValueType::Object => write!(f, "[object #{}]", self.payload() as u32),
            ValueType::Magic => f.write_str("<hole>"),
        }
    }
}
