// String Filters

use super::{arg, arg_string, invalid_argument, FilterContext, FilterRegistry};
use crate::errors::Result;
use crate::model::Value;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use once_cell::sync::Lazy;
use regex::Regex;

static SPECIAL_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(["\\])"#).expect("static regex is valid"));
static ESCAPED_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\(.)").expect("static regex is valid"));

pub fn register(registry: &mut FilterRegistry) {
    registry.register("upcase", upcase);
    registry.register("downcase", downcase);
    registry.register("capitalize", capitalize);
    registry.register("strip", strip);
    registry.register("lstrip", lstrip);
    registry.register("rstrip", rstrip);
    registry.register("append", append);
    registry.register("prepend", prepend);
    registry.register("replace", replace);
    registry.register("replace_first", replace_first);
    registry.register("remove", remove);
    registry.register("split", split);
    registry.register("truncate", truncate);
    registry.register("char_at", char_at);
    registry.register("contains", contains);
    registry.register("starts_with", starts_with);
    registry.register("escape_special_chars", escape_special_chars);
    registry.register("unescape_special_chars", unescape_special_chars);
    registry.register("match", match_regex);
    registry.register("gsub", gsub);
    registry.register("base64_encode", base64_encode);
    registry.register("base64_decode", base64_decode);
    registry.register("to_json_string", to_json_string);
    registry.register("to_double", to_double);
    registry.register("size", size);
}

fn text(input: &Value) -> String {
    input.to_output_string()
}

fn upcase(_: &FilterContext, input: &Value, _: &[Value]) -> Result<Value> {
    Ok(Value::String(text(input).to_uppercase()))
}

fn downcase(_: &FilterContext, input: &Value, _: &[Value]) -> Result<Value> {
    Ok(Value::String(text(input).to_lowercase()))
}

fn capitalize(_: &FilterContext, input: &Value, _: &[Value]) -> Result<Value> {
    let s = text(input);
    let mut chars = s.chars();
    Ok(Value::String(match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }))
}

fn strip(_: &FilterContext, input: &Value, _: &[Value]) -> Result<Value> {
    Ok(Value::String(text(input).trim().to_string()))
}

fn lstrip(_: &FilterContext, input: &Value, _: &[Value]) -> Result<Value> {
    Ok(Value::String(text(input).trim_start().to_string()))
}

fn rstrip(_: &FilterContext, input: &Value, _: &[Value]) -> Result<Value> {
    Ok(Value::String(text(input).trim_end().to_string()))
}

fn append(_: &FilterContext, input: &Value, args: &[Value]) -> Result<Value> {
    Ok(Value::String(text(input) + &arg_string(args, 0, "")))
}

fn prepend(_: &FilterContext, input: &Value, args: &[Value]) -> Result<Value> {
    Ok(Value::String(arg_string(args, 0, "") + &text(input)))
}

fn replace(_: &FilterContext, input: &Value, args: &[Value]) -> Result<Value> {
    let from = arg_string(args, 0, "");
    if from.is_empty() {
        return Ok(Value::String(text(input)));
    }
    Ok(Value::String(text(input).replace(&from, &arg_string(args, 1, ""))))
}

fn replace_first(_: &FilterContext, input: &Value, args: &[Value]) -> Result<Value> {
    let from = arg_string(args, 0, "");
    if from.is_empty() {
        return Ok(Value::String(text(input)));
    }
    Ok(Value::String(text(input).replacen(&from, &arg_string(args, 1, ""), 1)))
}

fn remove(_: &FilterContext, input: &Value, args: &[Value]) -> Result<Value> {
    let pattern = arg_string(args, 0, "");
    if pattern.is_empty() {
        return Ok(Value::String(text(input)));
    }
    Ok(Value::String(text(input).replace(&pattern, "")))
}

fn split(_: &FilterContext, input: &Value, args: &[Value]) -> Result<Value> {
    let s = text(input);
    let separator = arg_string(args, 0, " ");
    let parts: Vec<Value> = if separator.is_empty() {
        s.chars().map(|c| Value::String(c.to_string())).collect()
    } else {
        s.split(separator.as_str())
            .map(|part| Value::String(part.to_string()))
            .collect()
    };
    Ok(Value::array(parts))
}

fn truncate(_: &FilterContext, input: &Value, args: &[Value]) -> Result<Value> {
    let s = text(input);
    let length = arg(args, 0).as_i64().unwrap_or(50).max(0) as usize;
    let ellipsis = arg_string(args, 1, "...");
    if s.chars().count() <= length {
        return Ok(Value::String(s));
    }
    let keep = length.saturating_sub(ellipsis.chars().count());
    Ok(Value::String(s.chars().take(keep).collect::<String>() + &ellipsis))
}

fn char_at(_: &FilterContext, input: &Value, args: &[Value]) -> Result<Value> {
    let index = arg(args, 0)
        .as_i64()
        .ok_or_else(|| invalid_argument("char_at", "index must be an integer"))?;
    if index < 0 {
        return Ok(Value::Nil);
    }
    Ok(text(input)
        .chars()
        .nth(index as usize)
        .map(|c| Value::String(c.to_string()))
        .unwrap_or_default())
}

fn contains(_: &FilterContext, input: &Value, args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(text(input).contains(&arg_string(args, 0, ""))))
}

fn starts_with(_: &FilterContext, input: &Value, args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(text(input).starts_with(&arg_string(args, 0, ""))))
}

/// Escapes `"` and `\` so the text can sit inside a JSON string literal
fn escape_special_chars(_: &FilterContext, input: &Value, _: &[Value]) -> Result<Value> {
    if input.is_nil() {
        return Ok(Value::Nil);
    }
    Ok(Value::String(
        SPECIAL_CHARS.replace_all(&text(input), r"\$1").into_owned(),
    ))
}

fn unescape_special_chars(_: &FilterContext, input: &Value, _: &[Value]) -> Result<Value> {
    if input.is_nil() {
        return Ok(Value::Nil);
    }
    Ok(Value::String(
        ESCAPED_CHARS.replace_all(&text(input), "$1").into_owned(),
    ))
}

fn compile(filter: &str, pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| invalid_argument(filter, format!("invalid pattern: {}", e)))
}

/// All matches of a regular expression
fn match_regex(_: &FilterContext, input: &Value, args: &[Value]) -> Result<Value> {
    let regex = compile("match", &arg_string(args, 0, ""))?;
    let s = text(input);
    Ok(Value::array(
        regex
            .find_iter(&s)
            .map(|m| Value::String(m.as_str().to_string()))
            .collect(),
    ))
}

/// Regular-expression replace of every match
fn gsub(_: &FilterContext, input: &Value, args: &[Value]) -> Result<Value> {
    let regex = compile("gsub", &arg_string(args, 0, ""))?;
    let replacement = arg_string(args, 1, "");
    Ok(Value::String(
        regex.replace_all(&text(input), replacement.as_str()).into_owned(),
    ))
}

fn base64_encode(_: &FilterContext, input: &Value, _: &[Value]) -> Result<Value> {
    Ok(Value::String(STANDARD.encode(text(input))))
}

fn base64_decode(_: &FilterContext, input: &Value, _: &[Value]) -> Result<Value> {
    let bytes = STANDARD
        .decode(text(input).trim())
        .map_err(|e| invalid_argument("base64_decode", e.to_string()))?;
    Ok(Value::String(String::from_utf8_lossy(&bytes).into_owned()))
}

fn to_json_string(_: &FilterContext, input: &Value, _: &[Value]) -> Result<Value> {
    if input.is_nil() {
        return Ok(Value::Nil);
    }
    Ok(Value::String(input.to_json().to_string()))
}

fn to_double(_: &FilterContext, input: &Value, _: &[Value]) -> Result<Value> {
    input
        .as_f64()
        .map(Value::Decimal)
        .ok_or_else(|| invalid_argument("to_double", format!("'{}' is not a number", text(input))))
}

fn size(_: &FilterContext, input: &Value, _: &[Value]) -> Result<Value> {
    Ok(match input {
        Value::Nil => Value::Integer(0),
        Value::String(s) => Value::Integer(s.chars().count() as i64),
        other => other.get_property("size"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(filter: crate::filters::FilterFn, input: Value, args: &[Value]) -> Value {
        filter(&FilterContext::default(), &input, args).unwrap()
    }

    #[test]
    fn json_escaping_round_trips() {
        let raw = Value::from(r#"say "hi" \ bye"#);
        let escaped = call(escape_special_chars, raw.clone(), &[]);
        assert_eq!(escaped.as_str(), Some(r#"say \"hi\" \\ bye"#));
        assert_eq!(call(unescape_special_chars, escaped, &[]).as_str(), raw.as_str());
    }

    #[test]
    fn truncate_and_split() {
        assert_eq!(
            call(truncate, Value::from("abcdefgh"), &[Value::Integer(5)]).as_str(),
            Some("ab...")
        );
        let parts = call(split, Value::from("a^b^c"), &[Value::from("^")]);
        assert_eq!(parts.get_property("size").as_i64(), Some(3));
    }

    #[test]
    fn regex_filters() {
        let out = call(gsub, Value::from("a1b22c"), &[Value::from(r"\d+"), Value::from("#")]);
        assert_eq!(out.as_str(), Some("a#b#c"));
        let bad = gsub(&FilterContext::default(), &Value::from("x"), &[Value::from("(")]);
        assert!(bad.is_err());
    }

    #[test]
    fn base64_round_trip() {
        let encoded = call(base64_encode, Value::from("hello"), &[]);
        assert_eq!(encoded.as_str(), Some("aGVsbG8="));
        assert_eq!(call(base64_decode, encoded, &[]).as_str(), Some("hello"));
    }
}
