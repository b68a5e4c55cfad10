//! Arithmetic, comparison and conversion on runtime values.
//!
//! - [`BinaryOp`] - `add`, `sub`, `mul`, `div`, `rem`, bitwise and shift instructions
//! - [`UnaryOp`] - `neg`, `not`
//! - [`CompareOp`] - `ceq`, `cgt`, `clt` and the comparisons fused into branches
//! - [`ConversionType`] - The `conv.*` family
//!
//! Operands are first promoted to a common stack type following ECMA-335 III.1.5: two
//! `int32`s, two `int64`s, `native int` with `int32` or `native int`, or two floats. Any
//! other combination is a type mismatch. Unchecked arithmetic wraps, checked arithmetic
//! reports [`EmulationError::ArithmeticOverflow`].

#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss,
    clippy::cast_lossless
)]

use std::{fmt, sync::Arc};

use crate::{error::EmulationError, runtime::value::Value, Result};

/// Binary arithmetic and bitwise operations
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    /// `add`
    Add,
    /// `add.ovf`
    AddOvf,
    /// `add.ovf.un`
    AddOvfUn,
    /// `sub`
    Sub,
    /// `sub.ovf`
    SubOvf,
    /// `sub.ovf.un`
    SubOvfUn,
    /// `mul`
    Mul,
    /// `mul.ovf`
    MulOvf,
    /// `mul.ovf.un`
    MulOvfUn,
    /// `div`
    Div,
    /// `div.un`
    DivUn,
    /// `rem`
    Rem,
    /// `rem.un`
    RemUn,
    /// `and`
    And,
    /// `or`
    Or,
    /// `xor`
    Xor,
    /// `shl`
    Shl,
    /// `shr`
    Shr,
    /// `shr.un`
    ShrUn,
}

impl BinaryOp {
    /// True for the overflow checking variants
    #[must_use]
    pub fn is_checked(&self) -> bool {
        matches!(
            self,
            BinaryOp::AddOvf
                | BinaryOp::AddOvfUn
                | BinaryOp::SubOvf
                | BinaryOp::SubOvfUn
                | BinaryOp::MulOvf
                | BinaryOp::MulOvfUn
        )
    }

    /// True for the variants treating operands as unsigned
    #[must_use]
    pub fn is_unsigned(&self) -> bool {
        matches!(
            self,
            BinaryOp::AddOvfUn
                | BinaryOp::SubOvfUn
                | BinaryOp::MulOvfUn
                | BinaryOp::DivUn
                | BinaryOp::RemUn
                | BinaryOp::ShrUn
        )
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BinaryOp::Add => "add",
            BinaryOp::AddOvf => "add.ovf",
            BinaryOp::AddOvfUn => "add.ovf.un",
            BinaryOp::Sub => "sub",
            BinaryOp::SubOvf => "sub.ovf",
            BinaryOp::SubOvfUn => "sub.ovf.un",
            BinaryOp::Mul => "mul",
            BinaryOp::MulOvf => "mul.ovf",
            BinaryOp::MulOvfUn => "mul.ovf.un",
            BinaryOp::Div => "div",
            BinaryOp::DivUn => "div.un",
            BinaryOp::Rem => "rem",
            BinaryOp::RemUn => "rem.un",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Xor => "xor",
            BinaryOp::Shl => "shl",
            BinaryOp::Shr => "shr",
            BinaryOp::ShrUn => "shr.un",
        };
        f.write_str(name)
    }
}

/// Unary operations
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// `neg`
    Neg,
    /// `not`
    Not,
}

/// Comparisons, both the `c*` instructions and the ones fused into branches
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CompareOp {
    /// Equal
    Eq,
    /// Not equal, unordered for floats (`bne.un`)
    Ne,
    /// Greater than
    Gt,
    /// Greater than, unsigned or unordered
    GtUn,
    /// Greater or equal
    Ge,
    /// Greater or equal, unsigned or unordered
    GeUn,
    /// Less than
    Lt,
    /// Less than, unsigned or unordered
    LtUn,
    /// Less or equal
    Le,
    /// Less or equal, unsigned or unordered
    LeUn,
}

impl CompareOp {
    /// True for the unsigned / unordered variants
    #[must_use]
    pub fn is_unsigned(&self) -> bool {
        matches!(
            self,
            CompareOp::GtUn | CompareOp::GeUn | CompareOp::LtUn | CompareOp::LeUn | CompareOp::Ne
        )
    }
}

/// Target of a `conv.*` instruction
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ConversionType {
    I1,
    I2,
    I4,
    I8,
    U1,
    U2,
    U4,
    U8,
    R4,
    R8,
    I,
    U,
    RUn,
    I1Ovf,
    I2Ovf,
    I4Ovf,
    I8Ovf,
    U1Ovf,
    U2Ovf,
    U4Ovf,
    U8Ovf,
    IOvf,
    UOvf,
    I1OvfUn,
    I2OvfUn,
    I4OvfUn,
    I8OvfUn,
    U1OvfUn,
    U2OvfUn,
    U4OvfUn,
    U8OvfUn,
    IOvfUn,
    UOvfUn,
}

impl ConversionType {
    /// True for the overflow checking variants
    #[must_use]
    pub fn is_checked(&self) -> bool {
        !matches!(
            self,
            ConversionType::I1
                | ConversionType::I2
                | ConversionType::I4
                | ConversionType::I8
                | ConversionType::U1
                | ConversionType::U2
                | ConversionType::U4
                | ConversionType::U8
                | ConversionType::R4
                | ConversionType::R8
                | ConversionType::I
                | ConversionType::U
                | ConversionType::RUn
        )
    }

    /// True if the source is interpreted as unsigned
    #[must_use]
    pub fn is_unsigned_source(&self) -> bool {
        matches!(
            self,
            ConversionType::RUn
                | ConversionType::I1OvfUn
                | ConversionType::I2OvfUn
                | ConversionType::I4OvfUn
                | ConversionType::I8OvfUn
                | ConversionType::U1OvfUn
                | ConversionType::U2OvfUn
                | ConversionType::U4OvfUn
                | ConversionType::U8OvfUn
                | ConversionType::IOvfUn
                | ConversionType::UOvfUn
        )
    }

    /// The representable range of the target, `None` for floats
    fn range(&self) -> Option<(i128, i128)> {
        Some(match self {
            ConversionType::I1 | ConversionType::I1Ovf | ConversionType::I1OvfUn => {
                (i128::from(i8::MIN), i128::from(i8::MAX))
            }
            ConversionType::I2 | ConversionType::I2Ovf | ConversionType::I2OvfUn => {
                (i128::from(i16::MIN), i128::from(i16::MAX))
            }
            ConversionType::I4 | ConversionType::I4Ovf | ConversionType::I4OvfUn => {
                (i128::from(i32::MIN), i128::from(i32::MAX))
            }
            ConversionType::I8
            | ConversionType::I8Ovf
            | ConversionType::I8OvfUn
            | ConversionType::I
            | ConversionType::IOvf
            | ConversionType::IOvfUn => (i128::from(i64::MIN), i128::from(i64::MAX)),
            ConversionType::U1 | ConversionType::U1Ovf | ConversionType::U1OvfUn => {
                (0, i128::from(u8::MAX))
            }
            ConversionType::U2 | ConversionType::U2Ovf | ConversionType::U2OvfUn => {
                (0, i128::from(u16::MAX))
            }
            ConversionType::U4 | ConversionType::U4Ovf | ConversionType::U4OvfUn => {
                (0, i128::from(u32::MAX))
            }
            ConversionType::U8
            | ConversionType::U8Ovf
            | ConversionType::U8OvfUn
            | ConversionType::U
            | ConversionType::UOvf
            | ConversionType::UOvfUn => (0, i128::from(u64::MAX)),
            ConversionType::R4 | ConversionType::R8 | ConversionType::RUn => return None,
        })
    }

    /// Wraps an in-range integer into the stack representation of the target
    fn store(&self, value: i128) -> Value {
        match self {
            ConversionType::I1 | ConversionType::I1Ovf | ConversionType::I1OvfUn => {
                Value::I32(i32::from(value as i8))
            }
            ConversionType::I2 | ConversionType::I2Ovf | ConversionType::I2OvfUn => {
                Value::I32(i32::from(value as i16))
            }
            ConversionType::I4 | ConversionType::I4Ovf | ConversionType::I4OvfUn => {
                Value::I32(value as i32)
            }
            ConversionType::U1 | ConversionType::U1Ovf | ConversionType::U1OvfUn => {
                Value::I32(i32::from(value as u8))
            }
            ConversionType::U2 | ConversionType::U2Ovf | ConversionType::U2OvfUn => {
                Value::I32(i32::from(value as u16))
            }
            ConversionType::U4 | ConversionType::U4Ovf | ConversionType::U4OvfUn => {
                Value::I32(value as u32 as i32)
            }
            ConversionType::I8
            | ConversionType::I8Ovf
            | ConversionType::I8OvfUn
            | ConversionType::U8
            | ConversionType::U8Ovf
            | ConversionType::U8OvfUn => Value::I64(value as i64),
            ConversionType::I
            | ConversionType::IOvf
            | ConversionType::IOvfUn
            | ConversionType::U
            | ConversionType::UOvf
            | ConversionType::UOvfUn => Value::NativeInt(value as i64),
            ConversionType::R4 | ConversionType::R8 | ConversionType::RUn => {
                Value::F64(value as f64)
            }
        }
    }
}

/// Operands promoted to a common stack type
enum Promoted {
    Int32(i32, i32),
    Int64(i64, i64),
    Native(i64, i64),
    Float(f64, f64),
}

fn promote(a: &Value, b: &Value, operation: &'static str) -> Result<Promoted> {
    Ok(match (a, b) {
        (Value::I32(a), Value::I32(b)) => Promoted::Int32(*a, *b),
        (Value::I64(a), Value::I64(b)) => Promoted::Int64(*a, *b),
        (Value::NativeInt(a), Value::NativeInt(b)) => Promoted::Native(*a, *b),
        (Value::NativeInt(a), Value::I32(b)) => Promoted::Native(*a, i64::from(*b)),
        (Value::I32(a), Value::NativeInt(b)) => Promoted::Native(i64::from(*a), *b),
        (Value::F64(a), Value::F64(b)) => Promoted::Float(*a, *b),
        _ => {
            return Err(EmulationError::TypeMismatch {
                operation,
                expected: "matching numeric operands",
                found: if matches!(a, Value::I32(_) | Value::I64(_) | Value::NativeInt(_) | Value::F64(_)) {
                    b.kind()
                } else {
                    a.kind()
                },
            }
            .into())
        }
    })
}

/// Applies an integer operation at the given width, 32 or 64 bits
fn integer_op(a: i64, b: i64, op: BinaryOp, bits: u32) -> Result<i64> {
    let unsigned = |value: i64| -> i128 {
        if bits == 32 {
            i128::from(value as u32)
        } else {
            i128::from(value as u64)
        }
    };
    let (min, max) = if bits == 32 {
        (i128::from(i32::MIN), i128::from(i32::MAX))
    } else {
        (i128::from(i64::MIN), i128::from(i64::MAX))
    };
    let umax = if bits == 32 {
        i128::from(u32::MAX)
    } else {
        i128::from(u64::MAX)
    };
    let wrap = |value: i128| -> i64 {
        if bits == 32 {
            i64::from(value as i32)
        } else {
            value as i64
        }
    };
    let checked = |value: i128, lo: i128, hi: i128| -> Result<i64> {
        if value < lo || value > hi {
            Err(EmulationError::ArithmeticOverflow.into())
        } else {
            Ok(wrap(value))
        }
    };

    let (wa, wb) = (i128::from(a), i128::from(b));
    match op {
        BinaryOp::Add => Ok(wrap(wa + wb)),
        BinaryOp::Sub => Ok(wrap(wa - wb)),
        BinaryOp::Mul => Ok(wrap(wa.wrapping_mul(wb))),
        BinaryOp::AddOvf => checked(wa + wb, min, max),
        BinaryOp::SubOvf => checked(wa - wb, min, max),
        BinaryOp::MulOvf => checked(wa * wb, min, max),
        BinaryOp::AddOvfUn => checked(unsigned(a) + unsigned(b), 0, umax),
        BinaryOp::SubOvfUn => checked(unsigned(a) - unsigned(b), 0, umax),
        BinaryOp::MulOvfUn => match unsigned(a).checked_mul(unsigned(b)) {
            Some(product) => checked(product, 0, umax),
            None => Err(EmulationError::ArithmeticOverflow.into()),
        },
        BinaryOp::Div | BinaryOp::Rem => {
            if b == 0 {
                return Err(EmulationError::DivisionByZero.into());
            }
            if wa == min && b == -1 {
                return Err(EmulationError::ArithmeticOverflow.into());
            }
            Ok(wrap(if op == BinaryOp::Div { wa / wb } else { wa % wb }))
        }
        BinaryOp::DivUn | BinaryOp::RemUn => {
            if b == 0 {
                return Err(EmulationError::DivisionByZero.into());
            }
            let (ua, ub) = (unsigned(a), unsigned(b));
            Ok(wrap(if op == BinaryOp::DivUn { ua / ub } else { ua % ub }))
        }
        BinaryOp::And => Ok(a & b),
        BinaryOp::Or => Ok(a | b),
        BinaryOp::Xor => Ok(a ^ b),
        BinaryOp::Shl => Ok(wrap(wa << (b as u32 & (bits - 1)))),
        BinaryOp::Shr => Ok(a >> (b as u32 & (bits - 1))),
        BinaryOp::ShrUn => Ok(wrap(unsigned(a) >> (b as u32 & (bits - 1)))),
    }
}

impl Value {
    /// Performs a binary operation
    ///
    /// # Arguments
    /// * `other` - The right hand operand
    /// * `op` - The operation
    ///
    /// # Errors
    /// Returns [`EmulationError::TypeMismatch`] for operand combinations the instruction
    /// does not accept, [`EmulationError::DivisionByZero`] and
    /// [`EmulationError::ArithmeticOverflow`] as the instruction would throw them.
    pub fn binary_op(&self, other: &Self, op: BinaryOp) -> Result<Self> {
        // Shifts accept an int32 or native int amount for any integer value
        if matches!(op, BinaryOp::Shl | BinaryOp::Shr | BinaryOp::ShrUn) {
            let amount = match other {
                Value::I32(amount) => i64::from(*amount),
                Value::NativeInt(amount) => *amount,
                _ => {
                    return Err(EmulationError::TypeMismatch {
                        operation: "shift",
                        expected: "int32 or native int amount",
                        found: other.kind(),
                    }
                    .into())
                }
            };
            return match self {
                Value::I32(value) => Ok(Value::I32(integer_op(i64::from(*value), amount, op, 32)? as i32)),
                Value::I64(value) => Ok(Value::I64(integer_op(*value, amount, op, 64)?)),
                Value::NativeInt(value) => Ok(Value::NativeInt(integer_op(*value, amount, op, 64)?)),
                _ => Err(EmulationError::TypeMismatch {
                    operation: "shift",
                    expected: "integer",
                    found: self.kind(),
                }
                .into()),
            };
        }

        match promote(self, other, "binary operation")? {
            Promoted::Int32(a, b) => Ok(Value::I32(
                integer_op(i64::from(a), i64::from(b), op, 32)? as i32,
            )),
            Promoted::Int64(a, b) => Ok(Value::I64(integer_op(a, b, op, 64)?)),
            Promoted::Native(a, b) => Ok(Value::NativeInt(integer_op(a, b, op, 64)?)),
            Promoted::Float(a, b) => Ok(Value::F64(match op {
                BinaryOp::Add | BinaryOp::AddOvf => a + b,
                BinaryOp::Sub | BinaryOp::SubOvf => a - b,
                BinaryOp::Mul | BinaryOp::MulOvf => a * b,
                BinaryOp::Div => a / b,
                BinaryOp::Rem => a % b,
                _ => {
                    return Err(EmulationError::TypeMismatch {
                        operation: "binary operation",
                        expected: "integer",
                        found: "F",
                    }
                    .into())
                }
            })),
        }
    }

    /// Performs a unary operation
    ///
    /// # Errors
    /// Returns [`EmulationError::TypeMismatch`] for non numeric operands and for `not` on
    /// floats.
    pub fn unary_op(&self, op: UnaryOp) -> Result<Self> {
        match (self, op) {
            (Value::I32(value), UnaryOp::Neg) => Ok(Value::I32(value.wrapping_neg())),
            (Value::I64(value), UnaryOp::Neg) => Ok(Value::I64(value.wrapping_neg())),
            (Value::NativeInt(value), UnaryOp::Neg) => Ok(Value::NativeInt(value.wrapping_neg())),
            (Value::F64(value), UnaryOp::Neg) => Ok(Value::F64(-value)),
            (Value::I32(value), UnaryOp::Not) => Ok(Value::I32(!value)),
            (Value::I64(value), UnaryOp::Not) => Ok(Value::I64(!value)),
            (Value::NativeInt(value), UnaryOp::Not) => Ok(Value::NativeInt(!value)),
            _ => Err(EmulationError::TypeMismatch {
                operation: "unary operation",
                expected: "integer",
                found: self.kind(),
            }
            .into()),
        }
    }

    /// Compares two values, returning `int32` 1 or 0
    ///
    /// References compare by identity, strings by content, `null` equals only `null`.
    ///
    /// # Errors
    /// Returns [`EmulationError::TypeMismatch`] for ordering comparisons of non numeric
    /// operands.
    pub fn compare(&self, other: &Self, op: CompareOp) -> Result<Self> {
        if matches!(op, CompareOp::Eq | CompareOp::Ne) && !self.is_numeric() {
            let equal = match (self, other) {
                (Value::String(a), Value::String(b)) => Arc::ptr_eq(a, b) || a == b,
                (a, b) => a == b,
            };
            return Ok(Value::from(equal == (op == CompareOp::Eq)));
        }
        // cgt.un doubles as the `!= null` test
        if op == CompareOp::GtUn && !self.is_numeric() {
            return Ok(Value::from(!self.is_null() && other.is_null()));
        }

        let result = match promote(self, other, "comparison")? {
            Promoted::Int32(a, b) => {
                if op.is_unsigned() {
                    compare_ordered(u64::from(a as u32), u64::from(b as u32), op)
                } else {
                    compare_ordered(i64::from(a), i64::from(b), op)
                }
            }
            Promoted::Int64(a, b) | Promoted::Native(a, b) => {
                if op.is_unsigned() {
                    compare_ordered(a as u64, b as u64, op)
                } else {
                    compare_ordered(a, b, op)
                }
            }
            Promoted::Float(a, b) => {
                if a.is_nan() || b.is_nan() {
                    op.is_unsigned()
                } else {
                    match op {
                        CompareOp::Eq => a == b,
                        CompareOp::Ne => a != b,
                        CompareOp::Gt | CompareOp::GtUn => a > b,
                        CompareOp::Ge | CompareOp::GeUn => a >= b,
                        CompareOp::Lt | CompareOp::LtUn => a < b,
                        CompareOp::Le | CompareOp::LeUn => a <= b,
                    }
                }
            }
        };
        Ok(Value::from(result))
    }

    /// Converts a value, as the `conv.*` instructions do
    ///
    /// # Errors
    /// Returns [`EmulationError::ArithmeticOverflow`] when a checked conversion does not fit
    /// and [`EmulationError::TypeMismatch`] for non numeric sources.
    pub fn convert(&self, conv: ConversionType) -> Result<Self> {
        // Unchecked conversions to unsigned targets zero-extend
        let zero_extend = conv.is_unsigned_source()
            || matches!(
                conv,
                ConversionType::U1
                    | ConversionType::U2
                    | ConversionType::U4
                    | ConversionType::U8
                    | ConversionType::U
            );
        let source: i128 = match self {
            Value::I32(value) => {
                if zero_extend {
                    i128::from(*value as u32)
                } else {
                    i128::from(*value)
                }
            }
            Value::I64(value) | Value::NativeInt(value) => {
                if zero_extend {
                    i128::from(*value as u64)
                } else {
                    i128::from(*value)
                }
            }
            Value::F64(value) => {
                return match conv {
                    ConversionType::R4 => Ok(Value::F64(f64::from(*value as f32))),
                    ConversionType::R8 | ConversionType::RUn => Ok(Value::F64(*value)),
                    _ => {
                        if conv.is_checked() {
                            let truncated = value.trunc();
                            let (lo, hi) = conv.range().unwrap_or((0, 0));
                            if value.is_nan() || truncated < lo as f64 || truncated > hi as f64 {
                                return Err(EmulationError::ArithmeticOverflow.into());
                            }
                            Ok(conv.store(truncated as i128))
                        } else {
                            Ok(conv.store(*value as i128))
                        }
                    }
                };
            }
            _ => {
                return Err(EmulationError::TypeMismatch {
                    operation: "conversion",
                    expected: "numeric",
                    found: self.kind(),
                }
                .into())
            }
        };

        match conv.range() {
            None => Ok(match conv {
                ConversionType::R4 => Value::F64(f64::from(source as f32)),
                _ => Value::F64(source as f64),
            }),
            Some((lo, hi)) => {
                if conv.is_checked() && (source < lo || source > hi) {
                    return Err(EmulationError::ArithmeticOverflow.into());
                }
                Ok(conv.store(source))
            }
        }
    }

    fn is_numeric(&self) -> bool {
        matches!(
            self,
            Value::I32(_) | Value::I64(_) | Value::NativeInt(_) | Value::F64(_)
        )
    }
}

fn compare_ordered<T: PartialOrd>(a: T, b: T, op: CompareOp) -> bool {
    match op {
        CompareOp::Eq => a == b,
        CompareOp::Ne => a != b,
        CompareOp::Gt | CompareOp::GtUn => a > b,
        CompareOp::Ge | CompareOp::GeUn => a >= b,
        CompareOp::Lt | CompareOp::LtUn => a < b,
        CompareOp::Le | CompareOp::LeUn => a <= b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_int32_arithmetic() {
        let a = Value::I32(10);
        let b = Value::I32(3);
        assert_eq!(a.binary_op(&b, BinaryOp::Add).unwrap(), Value::I32(13));
        assert_eq!(a.binary_op(&b, BinaryOp::Sub).unwrap(), Value::I32(7));
        assert_eq!(a.binary_op(&b, BinaryOp::Div).unwrap(), Value::I32(3));
        assert_eq!(a.binary_op(&b, BinaryOp::Rem).unwrap(), Value::I32(1));
        assert_eq!(
            Value::I32(i32::MAX).binary_op(&Value::I32(1), BinaryOp::Add).unwrap(),
            Value::I32(i32::MIN)
        );
    }

    #[test]
    fn test_checked_arithmetic() {
        let result = Value::I32(i32::MAX).binary_op(&Value::I32(1), BinaryOp::AddOvf);
        assert!(matches!(
            result,
            Err(Error::Emulation(EmulationError::ArithmeticOverflow))
        ));
        assert_eq!(
            Value::I32(-1).binary_op(&Value::I32(1), BinaryOp::AddOvf).unwrap(),
            Value::I32(0)
        );
        // -1 is u32::MAX when unsigned
        assert!(Value::I32(-1)
            .binary_op(&Value::I32(1), BinaryOp::AddOvfUn)
            .is_err());
    }

    #[test]
    fn test_division_by_zero() {
        let result = Value::I64(1).binary_op(&Value::I64(0), BinaryOp::Div);
        assert!(matches!(
            result,
            Err(Error::Emulation(EmulationError::DivisionByZero))
        ));
        assert!(Value::F64(1.0)
            .binary_op(&Value::F64(0.0), BinaryOp::Div)
            .unwrap()
            .as_f64()
            .unwrap()
            .is_infinite());
    }

    #[test]
    fn test_shifts() {
        assert_eq!(
            Value::I32(1).binary_op(&Value::I32(33), BinaryOp::Shl).unwrap(),
            Value::I32(2)
        );
        assert_eq!(
            Value::I32(-8).binary_op(&Value::I32(1), BinaryOp::Shr).unwrap(),
            Value::I32(-4)
        );
        assert_eq!(
            Value::I32(-8).binary_op(&Value::I32(28), BinaryOp::ShrUn).unwrap(),
            Value::I32(15)
        );
        assert_eq!(
            Value::I64(1).binary_op(&Value::I32(40), BinaryOp::Shl).unwrap(),
            Value::I64(1 << 40)
        );
    }

    #[test]
    fn test_mixed_operands() {
        assert_eq!(
            Value::NativeInt(5).binary_op(&Value::I32(2), BinaryOp::Mul).unwrap(),
            Value::NativeInt(10)
        );
        assert!(Value::I32(1).binary_op(&Value::I64(1), BinaryOp::Add).is_err());
        assert!(Value::Null.binary_op(&Value::I32(1), BinaryOp::Add).is_err());
    }

    #[test]
    fn test_compare() {
        let a = Value::I32(-1);
        let b = Value::I32(1);
        assert_eq!(a.compare(&b, CompareOp::Lt).unwrap(), Value::I32(1));
        assert_eq!(a.compare(&b, CompareOp::LtUn).unwrap(), Value::I32(0));
        assert_eq!(
            Value::string("ab").compare(&Value::string("ab"), CompareOp::Eq).unwrap(),
            Value::I32(1)
        );
        assert_eq!(
            Value::Null.compare(&Value::Null, CompareOp::Eq).unwrap(),
            Value::I32(1)
        );
        assert_eq!(
            Value::string("x").compare(&Value::Null, CompareOp::GtUn).unwrap(),
            Value::I32(1)
        );
        assert_eq!(
            Value::F64(f64::NAN).compare(&Value::F64(1.0), CompareOp::LtUn).unwrap(),
            Value::I32(1)
        );
    }

    #[test]
    fn test_conversions() {
        assert_eq!(Value::I32(300).convert(ConversionType::U1).unwrap(), Value::I32(44));
        assert_eq!(Value::I32(-1).convert(ConversionType::I8).unwrap(), Value::I64(-1));
        assert_eq!(
            Value::I32(-1).convert(ConversionType::U8).unwrap(),
            Value::I64(0xFFFF_FFFF)
        );
        assert_eq!(Value::I64(1 << 32).convert(ConversionType::I4).unwrap(), Value::I32(0));
        assert_eq!(Value::F64(3.9).convert(ConversionType::I4).unwrap(), Value::I32(3));
        assert_eq!(Value::I32(2).convert(ConversionType::R8).unwrap(), Value::F64(2.0));
        assert!(Value::I32(300).convert(ConversionType::U1Ovf).is_err());
        assert!(Value::I32(-1).convert(ConversionType::U4Ovf).is_err());
        assert!(Value::I32(-1).convert(ConversionType::I4OvfUn).is_err());
        assert!(Value::F64(f64::NAN).convert(ConversionType::I4Ovf).is_err());
    }
}
