//! Data identifier codecs
//!
//! A codec describes the record layout behind one DID with a compact format
//! string: an optional byte-order prefix (`<` little-endian, the default, or
//! `>` / `!` big-endian) followed by one or more fields. Each field is a type
//! letter with an optional repeat count:
//!
//! | letter | type |
//! |---|---|
//! | `B` / `b` | u8 / i8 |
//! | `H` / `h` | u16 / i16 |
//! | `I` / `i` | u32 / i32 |
//! | `Q` / `q` | u64 / i64 |
//!
//! `"20B"` is twenty unsigned bytes, `">HB"` a big-endian u16 followed by a
//! byte. Decoding yields a [`DidValue`], the tuple of integers in field order.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Invalid codec format '{format}': {reason}")]
    InvalidFormat { format: String, reason: String },

    #[error("Record length mismatch: codec expects {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Value count mismatch: codec has {expected} fields, got {actual} values")]
    ValueCount { expected: usize, actual: usize },

    #[error("Value {value} out of range for field {field}")]
    OutOfRange { value: i128, field: char },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
}

impl Field {
    fn from_letter(letter: char) -> Option<Self> {
        Some(match letter {
            'B' => Field::U8,
            'b' => Field::I8,
            'H' => Field::U16,
            'h' => Field::I16,
            'I' => Field::U32,
            'i' => Field::I32,
            'Q' => Field::U64,
            'q' => Field::I64,
            _ => return None,
        })
    }

    fn letter(self) -> char {
        match self {
            Field::U8 => 'B',
            Field::I8 => 'b',
            Field::U16 => 'H',
            Field::I16 => 'h',
            Field::U32 => 'I',
            Field::I32 => 'i',
            Field::U64 => 'Q',
            Field::I64 => 'q',
        }
    }

    fn size(self) -> usize {
        match self {
            Field::U8 | Field::I8 => 1,
            Field::U16 | Field::I16 => 2,
            Field::U32 | Field::I32 => 4,
            Field::U64 | Field::I64 => 8,
        }
    }

    fn signed(self) -> bool {
        matches!(self, Field::I8 | Field::I16 | Field::I32 | Field::I64)
    }

    fn range(self) -> (i128, i128) {
        let bits = self.size() as u32 * 8;
        if self.signed() {
            (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)
        } else {
            (0, (1i128 << bits) - 1)
        }
    }
}

/// Upper bound on expanded fields; no DID record can exceed an ISO-TP message
const MAX_FIELDS: usize = 4095;

/// Record layout of one data identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DidCodec {
    format: String,
    big_endian: bool,
    fields: Vec<Field>,
}

impl DidCodec {
    pub fn parse(format: &str) -> Result<Self, CodecError> {
        let invalid = |reason: &str| CodecError::InvalidFormat {
            format: format.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = format.trim();
        let (big_endian, body) = match trimmed.chars().next() {
            Some('<') | Some('=') | Some('@') => (false, &trimmed[1..]),
            Some('>') | Some('!') => (true, &trimmed[1..]),
            _ => (false, trimmed),
        };

        let mut fields = Vec::new();
        let mut count: Option<usize> = None;
        for c in body.chars() {
            if c.is_whitespace() {
                continue;
            }
            if let Some(digit) = c.to_digit(10) {
                let next = count.unwrap_or(0) * 10 + digit as usize;
                if next > MAX_FIELDS {
                    return Err(invalid("repeat count too large"));
                }
                count = Some(next);
                continue;
            }
            let field = Field::from_letter(c)
                .ok_or_else(|| invalid(&format!("unknown field type '{}'", c)))?;
            let repeat = count.take().unwrap_or(1);
            if fields.len() + repeat > MAX_FIELDS {
                return Err(invalid("too many fields"));
            }
            fields.extend(std::iter::repeat(field).take(repeat));
        }

        if count.is_some() {
            return Err(invalid("repeat count without a field type"));
        }
        if fields.is_empty() {
            return Err(invalid("no fields"));
        }

        Ok(Self {
            format: format.to_string(),
            big_endian,
            fields,
        })
    }

    /// Format string this codec was parsed from
    pub fn format(&self) -> &str {
        &self.format
    }

    /// Encoded record size in bytes
    pub fn len(&self) -> usize {
        self.fields.iter().map(|f| f.size()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn decode(&self, data: &[u8]) -> Result<DidValue, CodecError> {
        if data.len() != self.len() {
            return Err(CodecError::LengthMismatch {
                expected: self.len(),
                actual: data.len(),
            });
        }

        let mut values = Vec::with_capacity(self.fields.len());
        let mut offset = 0;
        for field in &self.fields {
            let size = field.size();
            let mut raw = [0u8; 8];
            if self.big_endian {
                raw[8 - size..].copy_from_slice(&data[offset..offset + size]);
                raw.reverse();
            } else {
                raw[..size].copy_from_slice(&data[offset..offset + size]);
            }
            let unsigned = u64::from_le_bytes(raw);
            let value = if field.signed() {
                let shift = 64 - size as u32 * 8;
                (((unsigned << shift) as i64) >> shift) as i128
            } else {
                unsigned as i128
            };
            values.push(value);
            offset += size;
        }

        Ok(DidValue(values))
    }

    pub fn encode(&self, values: &[i128]) -> Result<Vec<u8>, CodecError> {
        if values.len() != self.fields.len() {
            return Err(CodecError::ValueCount {
                expected: self.fields.len(),
                actual: values.len(),
            });
        }

        let mut out = Vec::with_capacity(self.len());
        for (field, &value) in self.fields.iter().zip(values) {
            let (min, max) = field.range();
            if value < min || value > max {
                return Err(CodecError::OutOfRange {
                    value,
                    field: field.letter(),
                });
            }
            let size = field.size();
            let bytes = (value as i64 as u64).to_le_bytes();
            if self.big_endian {
                out.extend(bytes[..size].iter().rev());
            } else {
                out.extend_from_slice(&bytes[..size]);
            }
        }
        Ok(out)
    }
}

impl FromStr for DidCodec {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Decoded DID record: integers in field order
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DidValue(pub Vec<i128>);

impl DidValue {
    pub fn values(&self) -> &[i128] {
        &self.0
    }

    /// The single value of a one-field record
    pub fn scalar(&self) -> Option<i128> {
        match self.0.as_slice() {
            [value] => Some(*value),
            _ => None,
        }
    }
}

impl<const N: usize> From<[i128; N]> for DidValue {
    fn from(values: [i128; N]) -> Self {
        Self(values.to_vec())
    }
}

/// Renders like a tuple: `(3,)`, `(1, 2)`
impl fmt::Display for DidValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", v)?;
        }
        if self.0.len() == 1 {
            write!(f, ",")?;
        }
        write!(f, ")")
    }
}
