//! # Runtime Value Representation
//!
//! `Value` is the dynamic representation of one attribute value: what a
//! record holds per attribute, what criteria compare against and what index
//! maps use as keys.
//!
//! ## Value Variants
//!
//! | Variant | Rust Type  | Declared type        |
//! |---------|------------|----------------------|
//! | Null    | -          | any nullable         |
//! | Bool    | bool       | `AttributeType::Bool`|
//! | Byte    | i8         | `Byte`               |
//! | Short   | i16        | `Short`              |
//! | Int     | i32        | `Int`                |
//! | Long    | i64        | `Long`               |
//! | Float   | f32        | `Float`              |
//! | Double  | f64        | `Double`             |
//! | Char    | char       | `Char`               |
//! | Text    | String     | `Text`               |
//! | Bytes   | Vec<u8>    | `Bytes`              |
//! | Date    | i64 millis | `Date`               |
//! | List    | Vec<Value> | `List`               |
//!
//! ## Comparison Semantics
//!
//! - Null compared to anything returns None
//! - Integers compare as i64; once a float is involved both sides compare as f64
//! - Dates compare with dates and with integers (epoch milliseconds)
//! - Char and Text compare as strings
//! - Values of unrelated types are incomparable (None)

use std::cmp::Ordering;
use std::fmt;

use super::AttributeType;

/// Dynamic attribute value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Char(char),
    Text(String),
    Bytes(Vec<u8>),
    Date(i64),
    List(Vec<Value>),
}

/// 2^63, the first float above every i64. Exact as an f64.
const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;

/// Orders an integer against a float without rounding the integer through
/// `f64`. `None` for NaN.
fn compare_integer_to_float(integer: i64, float: f64) -> Option<Ordering> {
    if float.is_nan() {
        return None;
    }
    if float >= I64_BOUND {
        return Some(Ordering::Less);
    }
    if float < -I64_BOUND {
        return Some(Ordering::Greater);
    }
    let floor = float.floor();
    match integer.cmp(&(floor as i64)) {
        Ordering::Equal if float > floor => Some(Ordering::Less),
        ordering => Some(ordering),
    }
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Type of the value, `None` for null.
    pub fn attribute_type(&self) -> Option<AttributeType> {
        Some(match self {
            Value::Null => return None,
            Value::Bool(_) => AttributeType::Bool,
            Value::Byte(_) => AttributeType::Byte,
            Value::Short(_) => AttributeType::Short,
            Value::Int(_) => AttributeType::Int,
            Value::Long(_) => AttributeType::Long,
            Value::Float(_) => AttributeType::Float,
            Value::Double(_) => AttributeType::Double,
            Value::Char(_) => AttributeType::Char,
            Value::Text(_) => AttributeType::Text,
            Value::Bytes(_) => AttributeType::Bytes,
            Value::Date(_) => AttributeType::Date,
            Value::List(_) => AttributeType::List,
        })
    }

    pub fn type_name(&self) -> &'static str {
        self.attribute_type().map(AttributeType::name).unwrap_or("null")
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Byte(v) => Some(*v as i64),
            Value::Short(v) => Some(*v as i64),
            Value::Int(v) => Some(*v as i64),
            Value::Long(v) | Value::Date(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            _ => self.as_i64().map(|v| v as f64),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Text form used by string operators. Chars count as one-character strings.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::Text(s) => Some(s.clone()),
            Value::Char(c) => Some(c.to_string()),
            _ => None,
        }
    }

    fn is_float(&self) -> bool {
        matches!(self, Value::Float(_) | Value::Double(_))
    }

    /// Widens the value into `target` when its type allows it. Null is
    /// compatible with every type; nullability is checked elsewhere.
    pub fn widen_to(&self, target: AttributeType) -> Option<Value> {
        let Some(source) = self.attribute_type() else {
            return Some(Value::Null);
        };

        if source == target {
            return Some(self.clone());
        }

        if !source.widens_to(target) {
            return None;
        }

        Some(match target {
            AttributeType::Short => Value::Short(self.as_i64()? as i16),
            AttributeType::Int => Value::Int(self.as_i64()? as i32),
            AttributeType::Long => Value::Long(self.as_i64()?),
            AttributeType::Double => Value::Double(self.as_f64()?),
            _ => return None,
        })
    }

    /// Converts the value into `target` when the conversion is exact in
    /// either direction, e.g. `Long(5)` into `Int(5)` or `Double(2.0)` into
    /// `Long(2)`. Used to turn criteria values into index keys.
    pub fn convert_exact(&self, target: AttributeType) -> Option<Value> {
        if let Some(widened) = self.widen_to(target) {
            return Some(widened);
        }

        match target {
            AttributeType::Byte | AttributeType::Short | AttributeType::Int | AttributeType::Long => {
                let v = match self {
                    Value::Float(_) | Value::Double(_) => {
                        let f = self.as_f64()?;
                        if f.fract() != 0.0 || !(-I64_BOUND..I64_BOUND).contains(&f) {
                            return None;
                        }
                        f as i64
                    }
                    _ => self.as_i64()?,
                };
                Some(match target {
                    AttributeType::Byte => Value::Byte(i8::try_from(v).ok()?),
                    AttributeType::Short => Value::Short(i16::try_from(v).ok()?),
                    AttributeType::Int => Value::Int(i32::try_from(v).ok()?),
                    _ => Value::Long(v),
                })
            }
            AttributeType::Float => {
                let narrowed = match self.as_i64() {
                    Some(v) => v as f32,
                    None => self.as_f64()? as f32,
                };
                (self.compare(&Value::Float(narrowed)) == Some(Ordering::Equal)).then_some(Value::Float(narrowed))
            }
            AttributeType::Double => {
                let converted = self.as_f64()?;
                (self.compare(&Value::Double(converted)) == Some(Ordering::Equal)).then_some(Value::Double(converted))
            }
            AttributeType::Date => self.as_i64().map(Value::Date),
            AttributeType::Char => {
                let s = self.as_str()?;
                let mut chars = s.chars();
                let c = chars.next()?;
                chars.next().is_none().then_some(Value::Char(c))
            }
            AttributeType::Text => self.to_text().map(Value::Text),
            _ => None,
        }
    }

    /// Compares two values. Returns None when either side is null or the
    /// types are unrelated.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Char(a), Value::Char(b)) => Some(a.cmp(b)),
            (Value::Char(_), Value::Text(_)) | (Value::Text(_), Value::Char(_)) => {
                Some(self.to_text()?.cmp(&other.to_text()?))
            }
            (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
            (Value::List(a), Value::List(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    match x.compare(y)? {
                        Ordering::Equal => continue,
                        other => return Some(other),
                    }
                }
                Some(a.len().cmp(&b.len()))
            }
            _ => match (self.is_float(), other.is_float()) {
                (true, true) => self.as_f64()?.partial_cmp(&other.as_f64()?),
                (false, true) => compare_integer_to_float(self.as_i64()?, other.as_f64()?),
                (true, false) => compare_integer_to_float(other.as_i64()?, self.as_f64()?).map(Ordering::reverse),
                (false, false) => Some(self.as_i64()?.cmp(&other.as_i64()?)),
            },
        }
    }

    /// Equality under `compare`, so `Int(1)` equals `Long(1)`.
    pub fn loosely_equals(&self, other: &Value) -> bool {
        self.compare(other) == Some(Ordering::Equal)
    }

    /// Total order used for sorting: null sorts after every non-null value,
    /// incomparable pairs are treated as equal so a stable sort keeps their
    /// relative order.
    pub fn compare_for_sort(&self, other: &Value) -> Ordering {
        match (self.is_null(), other.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => self.compare(other).unwrap_or(Ordering::Equal),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Byte(v) => write!(f, "{}", v),
            Value::Short(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Long(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Char(v) => write!(f, "{}", v),
            Value::Text(v) => write!(f, "{:?}", v),
            Value::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            Value::Date(v) => write!(f, "date({})", v),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    i8 => Byte,
    i16 => Short,
    i32 => Int,
    i64 => Long,
    f32 => Float,
    f64 => Double,
    char => Char,
    String => Text,
    Vec<u8> => Bytes,
    Vec<Value> => List,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}
