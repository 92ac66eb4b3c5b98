//! Cell value type shared by sources, cache dictionaries and record streams.

use std::cmp::Ordering;
use std::fmt;

/// An enum to represent all different errors that can appear as
/// a value in a worksheet cell
#[derive(Debug, Clone, PartialEq)]
pub enum CellErrorType {
    /// Division by 0 error
    Div0,
    /// Unavailable value error
    NA,
    /// Invalid name error
    Name,
    /// Null value error
    Null,
    /// Number error
    Num,
    /// Invalid cell reference error
    Ref,
    /// Value error
    Value,
}

impl fmt::Display for CellErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            CellErrorType::Div0 => write!(f, "#DIV/0!"),
            CellErrorType::NA => write!(f, "#N/A"),
            CellErrorType::Name => write!(f, "#NAME?"),
            CellErrorType::Null => write!(f, "#NULL!"),
            CellErrorType::Num => write!(f, "#NUM!"),
            CellErrorType::Ref => write!(f, "#REF!"),
            CellErrorType::Value => write!(f, "#VALUE!"),
        }
    }
}

/// An enum to represent all different data types that can appear as
/// a value in a worksheet cell
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Data {
    /// Signed integer
    Int(i64),
    /// Float
    Float(f64),
    /// String
    String(String),
    /// Boolean
    Bool(bool),
    /// Error
    Error(CellErrorType),
    /// Empty cell
    #[default]
    Empty,
}

impl Data {
    /// Whether the value is an empty cell
    pub fn is_empty(&self) -> bool {
        *self == Data::Empty
    }

    /// Numeric view of the value, unifying `Int` and `Float`
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Data::Int(v) => Some(*v as f64),
            Data::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// String view of the value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Data::String(v) => Some(v),
            _ => None,
        }
    }

    // Numbers < strings < booleans < errors < empty. Dictionary sorting
    // relies on this being total, so floats go through `total_cmp`.
    fn kind_rank(&self) -> u8 {
        match self {
            Data::Int(_) | Data::Float(_) => 0,
            Data::String(_) => 1,
            Data::Bool(_) => 2,
            Data::Error(_) => 3,
            Data::Empty => 4,
        }
    }

    /// Deterministic total order over cell values, used to sort shared-item
    /// dictionaries.
    pub fn total_cmp(&self, other: &Data) -> Ordering {
        match self.kind_rank().cmp(&other.kind_rank()) {
            Ordering::Equal => (),
            ord => return ord,
        }
        match (self, other) {
            (Data::String(a), Data::String(b)) => a.cmp(b),
            (Data::Bool(a), Data::Bool(b)) => a.cmp(b),
            (Data::Error(a), Data::Error(b)) => a.to_string().cmp(&b.to_string()),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.total_cmp(&y),
                _ => Ordering::Equal,
            },
        }
    }
}

impl fmt::Display for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Data::Int(v) => write!(f, "{v}"),
            Data::Float(v) => write!(f, "{v}"),
            Data::String(v) => write!(f, "{v}"),
            Data::Bool(v) => write!(f, "{v}"),
            Data::Error(v) => write!(f, "{v}"),
            Data::Empty => Ok(()),
        }
    }
}

impl From<&str> for Data {
    fn from(v: &str) -> Self {
        Data::String(v.to_string())
    }
}

impl From<String> for Data {
    fn from(v: String) -> Self {
        Data::String(v)
    }
}

impl From<f64> for Data {
    fn from(v: f64) -> Self {
        Data::Float(v)
    }
}

impl From<i64> for Data {
    fn from(v: i64) -> Self {
        Data::Int(v)
    }
}

impl From<bool> for Data {
    fn from(v: bool) -> Self {
        Data::Bool(v)
    }
}
