//! Element flag filters.
//!
//! Every collection element may carry an auxiliary byte string, the element
//! flag. A filter selects elements by comparing a slice of that flag,
//! starting at a byte offset, against a value, optionally after applying a
//! bitwise operation to the slice:
//!
//! ```text
//! <offset> [<bitop> <operand>] <compop> <value>
//! ```

use std::cmp::Ordering;
use std::fmt::{self, Display, Write};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::TypesError;

/// Maximum element flag length in bytes.
pub const MAX_EFLAG_LENGTH: usize = 31;

/// Comparison applied to the (possibly masked) flag slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompOp {
    fn as_str(self) -> &'static str {
        match self {
            CompOp::Eq => "EQ",
            CompOp::Ne => "NE",
            CompOp::Lt => "LT",
            CompOp::Le => "LE",
            CompOp::Gt => "GT",
            CompOp::Ge => "GE",
        }
    }

    fn holds(self, ordering: Ordering) -> bool {
        match self {
            CompOp::Eq => ordering == Ordering::Equal,
            CompOp::Ne => ordering != Ordering::Equal,
            CompOp::Lt => ordering == Ordering::Less,
            CompOp::Le => ordering != Ordering::Greater,
            CompOp::Gt => ordering == Ordering::Greater,
            CompOp::Ge => ordering != Ordering::Less,
        }
    }
}

/// Bitwise operation applied to the flag slice before comparing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BitOp {
    And,
    Or,
    Xor,
}

impl BitOp {
    fn as_str(self) -> &'static str {
        match self {
            BitOp::And => "&",
            BitOp::Or => "|",
            BitOp::Xor => "^",
        }
    }

    fn apply(self, a: u8, b: u8) -> u8 {
        match self {
            BitOp::And => a & b,
            BitOp::Or => a | b,
            BitOp::Xor => a ^ b,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
struct Predicate {
    offset: usize,
    bitwise: Option<(BitOp, Bytes)>,
    op: CompOp,
    value: Bytes,
}

/// Predicate over element flags used to include or exclude elements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementFlagFilter {
    predicate: Option<Predicate>,
}

impl ElementFlagFilter {
    /// A filter that accepts every element.
    pub const DO_NOT_FILTER: ElementFlagFilter = ElementFlagFilter { predicate: None };

    /// Creates a filter comparing the flag prefix against `value`.
    pub fn new(op: CompOp, value: impl Into<Bytes>) -> Result<Self, TypesError> {
        let value = value.into();
        check_length(value.len())?;
        Ok(Self {
            predicate: Some(Predicate {
                offset: 0,
                bitwise: None,
                op,
                value,
            }),
        })
    }

    /// Compares the flag starting at byte `offset` instead of at 0.
    ///
    /// The compared slice must end within [`MAX_EFLAG_LENGTH`].
    pub fn at_offset(mut self, offset: usize) -> Result<Self, TypesError> {
        if let Some(predicate) = self.predicate.as_mut() {
            let length = predicate.value.len();
            if offset
                .checked_add(length)
                .is_none_or(|end| end > MAX_EFLAG_LENGTH)
            {
                return Err(TypesError::InvalidFlagOffset { offset, length });
            }
            predicate.offset = offset;
        }
        Ok(self)
    }

    /// Masks the flag slice with `operand` before comparing.
    pub fn with_bitwise(mut self, op: BitOp, operand: impl Into<Bytes>) -> Result<Self, TypesError> {
        let operand = operand.into();
        if let Some(predicate) = self.predicate.as_mut() {
            if operand.len() != predicate.value.len() {
                return Err(TypesError::OperandLengthMismatch {
                    operand: operand.len(),
                    value: predicate.value.len(),
                });
            }
            predicate.bitwise = Some((op, operand));
        }
        Ok(self)
    }

    /// Returns true if this filter accepts every element.
    pub fn is_pass_through(&self) -> bool {
        self.predicate.is_none()
    }

    /// Evaluates the filter against an element's flag.
    ///
    /// Elements without a flag, or whose flag is too short to cover the
    /// compared slice, never match an active filter.
    pub fn matches(&self, eflag: Option<&[u8]>) -> bool {
        let Some(predicate) = &self.predicate else {
            return true;
        };
        let Some(eflag) = eflag else {
            return false;
        };

        let Some(end) = predicate.offset.checked_add(predicate.value.len()) else {
            return false;
        };
        let Some(slice) = eflag.get(predicate.offset..end) else {
            return false;
        };

        let ordering = match &predicate.bitwise {
            Some((op, operand)) => {
                let masked: Vec<u8> = slice
                    .iter()
                    .zip(operand.iter())
                    .map(|(a, b)| op.apply(*a, *b))
                    .collect();
                masked.as_slice().cmp(predicate.value.as_ref())
            }
            None => slice.cmp(predicate.value.as_ref()),
        };

        predicate.op.holds(ordering)
    }

    /// Renders the filter as protocol arguments; empty when pass-through.
    pub fn stringify(&self) -> String {
        self.to_string()
    }
}

impl Display for ElementFlagFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(predicate) = &self.predicate else {
            return Ok(());
        };

        write!(f, "{}", predicate.offset)?;
        if let Some((op, operand)) = &predicate.bitwise {
            write!(f, " {} {}", op.as_str(), hex(operand))?;
        }
        write!(f, " {} {}", predicate.op.as_str(), hex(&predicate.value))
    }
}

fn check_length(len: usize) -> Result<(), TypesError> {
    if len == 0 || len > MAX_EFLAG_LENGTH {
        return Err(TypesError::InvalidFlagLength(len));
    }
    Ok(())
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("0x");
    for b in bytes {
        let _ = write!(out, "{b:02X}");
    }
    out
}
