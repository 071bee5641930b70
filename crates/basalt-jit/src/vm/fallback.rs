//! Generic fallback stubs
//!
//! Each IC chain ends in one of these. They implement the full, unspecialized
//! semantics of their operation and read what they need from the IC frame:
//! operands in R0/R1, staged values in the scratch slot, call operands on the
//! machine stack.

use basalt_bytecode::{Opcode, Value, ValueType};

use super::{CallResult, IcFrame, Machine, VmError};
use crate::ic::{FallbackFactory, IcKind, StubCode, StubResult};
use crate::masm::ValueReg;

/// Fallback factory covering every IC kind
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFallbacks;

impl FallbackFactory for DefaultFallbacks {
    fn create(&self, kind: &IcKind) -> Option<StubCode> {
        use Opcode::*;
        let code: StubCode = match *kind {
            IcKind::ToBool => to_bool_fallback,
            IcKind::ToNumber => to_number_fallback,
            IcKind::BinaryArith(Add | Sub | Mul | Div | Mod | BitAnd | BitOr | BitXor | Lsh
            | Rsh | Ursh) => binary_arith_fallback,
            IcKind::Unary(Neg | BitNot) => unary_fallback,
            IcKind::Compare(Eq | Ne | StrictEq | StrictNe | Lt | Le | Gt | Ge) => {
                compare_fallback
            }
            IcKind::BinaryArith(_) | IcKind::Unary(_) | IcKind::Compare(_) => return None,
            IcKind::GetName(_) => get_name_fallback,
            IcKind::SetName(_) => set_name_fallback,
            IcKind::GetGlobal(_) => get_global_fallback,
            IcKind::SetGlobal(_) => set_global_fallback,
            IcKind::GetProp(_) => get_prop_fallback,
            IcKind::SetProp(_) => set_prop_fallback,
            IcKind::GetElem => get_elem_fallback,
            IcKind::SetElem => set_elem_fallback,
            IcKind::Call(_) => call_fallback,
        };
        Some(code)
    }
}

// ===== Stub bodies =====

fn to_bool_fallback(frame: &mut IcFrame<'_>) -> Result<StubResult, VmError> {
    let value = frame.reg(ValueReg::R0);
    let b = truthy(frame.vm, value);
    frame.set_reg(ValueReg::R0, Value::bool(b));
    Ok(StubResult::Done)
}

fn to_number_fallback(frame: &mut IcFrame<'_>) -> Result<StubResult, VmError> {
    let value = frame.reg(ValueReg::R0);
    let n = to_number(frame.vm, value);
    frame.set_reg(ValueReg::R0, Value::number(n));
    Ok(StubResult::Done)
}

fn binary_arith_fallback(frame: &mut IcFrame<'_>) -> Result<StubResult, VmError> {
    let IcKind::BinaryArith(op) = frame.entry.kind else {
        return Ok(StubResult::Next);
    };
    let (lhs, rhs) = (frame.reg(ValueReg::R0), frame.reg(ValueReg::R1));
    let result = binary_arith(frame.vm, op, lhs, rhs)?;
    frame.set_reg(ValueReg::R0, result);
    Ok(StubResult::Done)
}

fn unary_fallback(frame: &mut IcFrame<'_>) -> Result<StubResult, VmError> {
    let IcKind::Unary(op) = frame.entry.kind else {
        return Ok(StubResult::Next);
    };
    let value = frame.reg(ValueReg::R0);
    let result = match op {
        Opcode::Neg => match value.as_int32() {
            Some(0) => Value::double(-0.0),
            Some(i) if i != i32::MIN => Value::int32(-i),
            _ => Value::number(-to_number(frame.vm, value)),
        },
        _ => Value::int32(!to_int32(to_number(frame.vm, value))),
    };
    frame.set_reg(ValueReg::R0, result);
    Ok(StubResult::Done)
}

fn compare_fallback(frame: &mut IcFrame<'_>) -> Result<StubResult, VmError> {
    let IcKind::Compare(op) = frame.entry.kind else {
        return Ok(StubResult::Next);
    };
    let (lhs, rhs) = (frame.reg(ValueReg::R0), frame.reg(ValueReg::R1));
    let b = compare(frame.vm, op, lhs, rhs);
    frame.set_reg(ValueReg::R0, Value::bool(b));
    Ok(StubResult::Done)
}

fn get_name_fallback(frame: &mut IcFrame<'_>) -> Result<StubResult, VmError> {
    let IcKind::GetName(name) = frame.entry.kind else {
        return Ok(StubResult::Next);
    };
    let value = frame.vm.host_mut().get_name(name)?;
    frame.set_reg(ValueReg::R0, value);
    Ok(StubResult::Done)
}

fn set_name_fallback(frame: &mut IcFrame<'_>) -> Result<StubResult, VmError> {
    let IcKind::SetName(name) = frame.entry.kind else {
        return Ok(StubResult::Next);
    };
    let value = *frame.scratch;
    frame.vm.host_mut().set_name(name, value)?;
    Ok(StubResult::Done)
}

fn get_global_fallback(frame: &mut IcFrame<'_>) -> Result<StubResult, VmError> {
    let IcKind::GetGlobal(name) = frame.entry.kind else {
        return Ok(StubResult::Next);
    };
    let value = frame.vm.host_mut().get_global(name)?;
    frame.set_reg(ValueReg::R0, value);
    Ok(StubResult::Done)
}

fn set_global_fallback(frame: &mut IcFrame<'_>) -> Result<StubResult, VmError> {
    let IcKind::SetGlobal(name) = frame.entry.kind else {
        return Ok(StubResult::Next);
    };
    let value = *frame.scratch;
    frame.vm.host_mut().set_global(name, value)?;
    Ok(StubResult::Done)
}

fn get_prop_fallback(frame: &mut IcFrame<'_>) -> Result<StubResult, VmError> {
    let IcKind::GetProp(name) = frame.entry.kind else {
        return Ok(StubResult::Next);
    };
    let obj = frame.reg(ValueReg::R0);
    let value = frame.vm.host_mut().get_property(obj, Value::string(name))?;
    frame.set_reg(ValueReg::R0, value);
    Ok(StubResult::Done)
}

fn set_prop_fallback(frame: &mut IcFrame<'_>) -> Result<StubResult, VmError> {
    let IcKind::SetProp(name) = frame.entry.kind else {
        return Ok(StubResult::Next);
    };
    let obj = frame.reg(ValueReg::R0);
    let value = *frame.scratch;
    frame
        .vm
        .host_mut()
        .set_property(obj, Value::string(name), value)?;
    Ok(StubResult::Done)
}

fn get_elem_fallback(frame: &mut IcFrame<'_>) -> Result<StubResult, VmError> {
    let (obj, key) = (frame.reg(ValueReg::R0), frame.reg(ValueReg::R1));
    let value = frame.vm.host_mut().get_property(obj, key)?;
    frame.set_reg(ValueReg::R0, value);
    Ok(StubResult::Done)
}

fn set_elem_fallback(frame: &mut IcFrame<'_>) -> Result<StubResult, VmError> {
    let (obj, key) = (frame.reg(ValueReg::R0), frame.reg(ValueReg::R1));
    let value = *frame.scratch;
    frame.vm.host_mut().set_property(obj, key, value)?;
    Ok(StubResult::Done)
}

/// Callee, `this` and the arguments are the top `argc + 2` machine stack
/// values; they stay there for the caller to free
fn call_fallback(frame: &mut IcFrame<'_>) -> Result<StubResult, VmError> {
    let argc = frame.argc as usize;
    let stack = frame.vm.stack();
    let base = stack
        .len()
        .checked_sub(argc + 2)
        .ok_or(VmError::StackUnderflow)?;
    let (callee, this) = (stack[base], stack[base + 1]);
    let args = stack[base + 2..].to_vec();

    let result = match frame.vm.host_mut().call(callee, this, &args)? {
        CallResult::Return(value) => value,
        CallResult::Invoke(script) => frame.vm.execute(&script, &args)?,
    };
    frame.set_reg(ValueReg::R0, result);
    Ok(StubResult::Done)
}

// ===== Conversions =====

pub(crate) fn truthy(vm: &Machine, value: Value) -> bool {
    match value.value_type() {
        ValueType::Boolean => value.as_bool() == Some(true),
        ValueType::Int32 => value.as_int32() != Some(0),
        ValueType::Double => value.as_double().is_some_and(|d| d != 0.0 && !d.is_nan()),
        ValueType::String => value
            .as_string()
            .and_then(|atom| vm.atom_text(atom))
            .is_some_and(|text| !text.is_empty()),
        ValueType::Object => true,
        ValueType::Undefined | ValueType::Null | ValueType::Magic => false,
    }
}

pub(crate) fn to_number(vm: &Machine, value: Value) -> f64 {
    match value.value_type() {
        ValueType::Int32 | ValueType::Double => value.as_number().unwrap_or(f64::NAN),
        ValueType::Boolean => {
            if value.as_bool() == Some(true) {
                1.0
            } else {
                0.0
            }
        }
        ValueType::Null => 0.0,
        ValueType::String => value
            .as_string()
            .and_then(|atom| vm.atom_text(atom))
            .map_or(f64::NAN, |text| parse_number(&text)),
        ValueType::Undefined | ValueType::Object | ValueType::Magic => f64::NAN,
    }
}

fn parse_number(text: &str) -> f64 {
    let trimmed = text.trim();
    match trimmed {
        "" => 0.0,
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ => trimmed.parse().unwrap_or(f64::NAN),
    }
}

/// Modular conversion to a signed 32-bit integer
pub(crate) fn to_int32(n: f64) -> i32 {
    if !n.is_finite() {
        return 0;
    }
    n.trunc().rem_euclid(4_294_967_296.0) as u32 as i32
}

fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n == f64::INFINITY {
        "Infinity".to_string()
    } else if n == f64::NEG_INFINITY {
        "-Infinity".to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{n:.0}")
    } else {
        n.to_string()
    }
}

pub(crate) fn to_display_string(vm: &Machine, value: Value) -> String {
    match value.value_type() {
        ValueType::String => value
            .as_string()
            .and_then(|atom| vm.atom_text(atom))
            .map(|text| text.to_string())
            .unwrap_or_default(),
        ValueType::Int32 | ValueType::Double => {
            number_to_string(value.as_number().unwrap_or(f64::NAN))
        }
        ValueType::Boolean => (value.as_bool() == Some(true)).to_string(),
        ValueType::Undefined | ValueType::Magic => "undefined".to_string(),
        ValueType::Null => "null".to_string(),
        ValueType::Object => "[object Object]".to_string(),
    }
}

// ===== Operators =====

fn binary_arith(vm: &Machine, op: Opcode, lhs: Value, rhs: Value) -> Result<Value, VmError> {
    if op == Opcode::Add && (lhs.is_string() || rhs.is_string()) {
        let mut text = to_display_string(vm, lhs);
        text.push_str(&to_display_string(vm, rhs));
        return Ok(Value::string(vm.atoms().intern(&text)));
    }

    if let (Some(a), Some(b)) = (lhs.as_int32(), rhs.as_int32()) {
        let fast = match op {
            Opcode::Add => a.checked_add(b),
            Opcode::Sub => a.checked_sub(b),
            // A zero product with a negative factor is -0
            Opcode::Mul => a.checked_mul(b).filter(|&p| p != 0 || (a >= 0 && b >= 0)),
            _ => None,
        };
        if let Some(result) = fast {
            return Ok(Value::int32(result));
        }
    }

    let (a, b) = (to_number(vm, lhs), to_number(vm, rhs));
    let result = match op {
        Opcode::Add => Value::number(a + b),
        Opcode::Sub => Value::number(a - b),
        Opcode::Mul => Value::number(a * b),
        Opcode::Div => Value::number(a / b),
        Opcode::Mod => Value::number(a % b),
        Opcode::BitAnd => Value::int32(to_int32(a) & to_int32(b)),
        Opcode::BitOr => Value::int32(to_int32(a) | to_int32(b)),
        Opcode::BitXor => Value::int32(to_int32(a) ^ to_int32(b)),
        Opcode::Lsh => Value::int32(to_int32(a).wrapping_shl(to_int32(b) as u32 & 31)),
        Opcode::Rsh => Value::int32(to_int32(a) >> (to_int32(b) as u32 & 31)),
        Opcode::Ursh => {
            Value::number(((to_int32(a) as u32) >> (to_int32(b) as u32 & 31)) as f64)
        }
        op => return Err(VmError::TypeError(format!("{op} is not an arithmetic operator"))),
    };
    Ok(result)
}

fn compare(vm: &Machine, op: Opcode, lhs: Value, rhs: Value) -> bool {
    match op {
        Opcode::Eq => loose_equals(vm, lhs, rhs),
        Opcode::Ne => !loose_equals(vm, lhs, rhs),
        Opcode::StrictEq => strict_equals(lhs, rhs),
        Opcode::StrictNe => !strict_equals(lhs, rhs),
        _ => relational(vm, op, lhs, rhs),
    }
}

fn relational(vm: &Machine, op: Opcode, lhs: Value, rhs: Value) -> bool {
    if lhs.is_string() && rhs.is_string() {
        let (a, b) = (to_display_string(vm, lhs), to_display_string(vm, rhs));
        return match op {
            Opcode::Lt => a < b,
            Opcode::Le => a <= b,
            Opcode::Gt => a > b,
            _ => a >= b,
        };
    }
    // Every comparison involving NaN is false
    let (a, b) = (to_number(vm, lhs), to_number(vm, rhs));
    match op {
        Opcode::Lt => a < b,
        Opcode::Le => a <= b,
        Opcode::Gt => a > b,
        _ => a >= b,
    }
}

pub(crate) fn strict_equals(lhs: Value, rhs: Value) -> bool {
    match (lhs.as_number(), rhs.as_number()) {
        (Some(a), Some(b)) => a == b,
        (None, None) => lhs == rhs,
        _ => false,
    }
}

pub(crate) fn loose_equals(vm: &Machine, lhs: Value, rhs: Value) -> bool {
    let (lt, rt) = (lhs.value_type(), rhs.value_type());
    if lt == rt || (lt.is_number() && rt.is_number()) {
        return strict_equals(lhs, rhs);
    }
    if lhs.is_nullish() || rhs.is_nullish() {
        return lhs.is_nullish() && rhs.is_nullish();
    }
    if lhs.is_object() || rhs.is_object() {
        return false;
    }
    // Remaining mixes of number, string and boolean compare numerically
    to_number(vm, lhs) == to_number(vm, rhs)
}
