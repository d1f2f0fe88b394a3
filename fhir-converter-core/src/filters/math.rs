// Math Filters
//
// Integer arithmetic stays integral when both operands are integers; any
// decimal operand promotes the result to a decimal.

use super::{arg, invalid_argument, FilterContext, FilterRegistry};
use crate::errors::Result;
use crate::model::Value;

pub fn register(registry: &mut FilterRegistry) {
    registry.register("plus", plus);
    registry.register("minus", minus);
    registry.register("times", times);
    registry.register("divided_by", divided_by);
    registry.register("modulo", modulo);
    registry.register("abs", abs);
    registry.register("round", round);
    registry.register("ceil", ceil);
    registry.register("floor", floor);
    registry.register("pow", pow);
    registry.register("sign", sign);
    registry.register("is_nan", is_nan);
}

#[derive(Debug, Clone, Copy)]
enum Number {
    Integer(i64),
    Decimal(f64),
}

impl Number {
    fn from_value(filter: &str, value: &Value) -> Result<Number> {
        match value {
            Value::Integer(i) => Ok(Number::Integer(*i)),
            Value::Decimal(d) => Ok(Number::Decimal(*d)),
            Value::Nil => Ok(Number::Integer(0)),
            other => {
                let text = other.to_output_string();
                let text = text.trim();
                if let Ok(i) = text.parse::<i64>() {
                    Ok(Number::Integer(i))
                } else if let Ok(d) = text.parse::<f64>() {
                    Ok(Number::Decimal(d))
                } else {
                    Err(invalid_argument(filter, format!("'{}' is not a number", text)))
                }
            }
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Number::Integer(i) => i as f64,
            Number::Decimal(d) => d,
        }
    }

    fn into_value(self) -> Value {
        match self {
            Number::Integer(i) => Value::Integer(i),
            Number::Decimal(d) => Value::Decimal(d),
        }
    }
}

fn operands(filter: &str, input: &Value, args: &[Value]) -> Result<(Number, Number)> {
    Ok((
        Number::from_value(filter, input)?,
        Number::from_value(filter, arg(args, 0))?,
    ))
}

fn binary(
    filter: &str,
    input: &Value,
    args: &[Value],
    int_op: fn(i64, i64) -> Option<i64>,
    dec_op: fn(f64, f64) -> f64,
) -> Result<Value> {
    let result = match operands(filter, input, args)? {
        (Number::Integer(a), Number::Integer(b)) => match int_op(a, b) {
            Some(i) => Number::Integer(i),
            None => return Err(invalid_argument(filter, "integer overflow")),
        },
        (a, b) => Number::Decimal(dec_op(a.as_f64(), b.as_f64())),
    };
    Ok(result.into_value())
}

fn plus(_: &FilterContext, input: &Value, args: &[Value]) -> Result<Value> {
    binary("plus", input, args, i64::checked_add, |a, b| a + b)
}

fn minus(_: &FilterContext, input: &Value, args: &[Value]) -> Result<Value> {
    binary("minus", input, args, i64::checked_sub, |a, b| a - b)
}

fn times(_: &FilterContext, input: &Value, args: &[Value]) -> Result<Value> {
    binary("times", input, args, i64::checked_mul, |a, b| a * b)
}

/// Integer division for two integers, otherwise decimal division
fn divided_by(_: &FilterContext, input: &Value, args: &[Value]) -> Result<Value> {
    let (a, b) = operands("divided_by", input, args)?;
    if b.as_f64() == 0.0 {
        return Err(invalid_argument("divided_by", "division by zero"));
    }
    Ok(match (a, b) {
        (Number::Integer(a), Number::Integer(b)) => Value::Integer(
            a.checked_div_euclid(b)
                .ok_or_else(|| invalid_argument("divided_by", "integer overflow"))?,
        ),
        (a, b) => Value::Decimal(a.as_f64() / b.as_f64()),
    })
}

fn modulo(_: &FilterContext, input: &Value, args: &[Value]) -> Result<Value> {
    let (a, b) = operands("modulo", input, args)?;
    if b.as_f64() == 0.0 {
        return Err(invalid_argument("modulo", "division by zero"));
    }
    Ok(match (a, b) {
        (Number::Integer(a), Number::Integer(b)) => Value::Integer(
            a.checked_rem_euclid(b)
                .ok_or_else(|| invalid_argument("modulo", "integer overflow"))?,
        ),
        (a, b) => Value::Decimal(a.as_f64().rem_euclid(b.as_f64())),
    })
}

fn abs(_: &FilterContext, input: &Value, _: &[Value]) -> Result<Value> {
    Ok(match Number::from_value("abs", input)? {
        Number::Integer(i) => Value::Integer(i.saturating_abs()),
        Number::Decimal(d) => Value::Decimal(d.abs()),
    })
}

/// Rounds half away from zero to the given number of places
fn round(_: &FilterContext, input: &Value, args: &[Value]) -> Result<Value> {
    let places = arg(args, 0).as_i64().unwrap_or(0);
    Ok(match Number::from_value("round", input)? {
        Number::Integer(i) => Value::Integer(i),
        Number::Decimal(d) if places <= 0 => Value::Integer(d.round() as i64),
        Number::Decimal(d) => {
            let factor = 10f64.powi(places.min(15) as i32);
            Value::Decimal((d * factor).round() / factor)
        }
    })
}

fn ceil(_: &FilterContext, input: &Value, _: &[Value]) -> Result<Value> {
    Ok(Value::Integer(Number::from_value("ceil", input)?.as_f64().ceil() as i64))
}

fn floor(_: &FilterContext, input: &Value, _: &[Value]) -> Result<Value> {
    Ok(Value::Integer(Number::from_value("floor", input)?.as_f64().floor() as i64))
}

fn pow(_: &FilterContext, input: &Value, args: &[Value]) -> Result<Value> {
    Ok(match operands("pow", input, args)? {
        (Number::Integer(a), Number::Integer(b)) if (0..=u32::MAX as i64).contains(&b) => a
            .checked_pow(b as u32)
            .map(Value::Integer)
            .unwrap_or_else(|| Value::Decimal((a as f64).powf(b as f64))),
        (a, b) => Value::Decimal(a.as_f64().powf(b.as_f64())),
    })
}

fn sign(_: &FilterContext, input: &Value, _: &[Value]) -> Result<Value> {
    let n = Number::from_value("sign", input)?.as_f64();
    Ok(Value::Integer(if n > 0.0 {
        1
    } else if n < 0.0 {
        -1
    } else {
        0
    }))
}

/// True when the input does not read as a number
fn is_nan(_: &FilterContext, input: &Value, _: &[Value]) -> Result<Value> {
    Ok(Value::Bool(match Number::from_value("is_nan", input) {
        Ok(n) => n.as_f64().is_nan(),
        Err(_) => true,
    }))
}
