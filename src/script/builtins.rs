use std::{collections::BTreeMap, rc::Rc};

use crate::error::ScriptError;

use super::{
    interp::Interpreter,
    value::{RegexValue, Value, format_number, string_to_number},
};

type Result<T> = std::result::Result<T, ScriptError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Builtin {
    ParseInt,
    ParseFloat,
    NumberFn,
    StringFn,
    BooleanFn,
    IsNaN,
    MathMin,
    MathMax,
    MathAbs,
    MathFloor,
    MathCeil,
    MathRound,
    JsonStringify,
    ArrayIsArray,
}

impl Builtin {
    pub fn name(self) -> &'static str {
        match self {
            Builtin::ParseInt => "parseInt",
            Builtin::ParseFloat => "parseFloat",
            Builtin::NumberFn => "Number",
            Builtin::StringFn => "String",
            Builtin::BooleanFn => "Boolean",
            Builtin::IsNaN => "isNaN",
            Builtin::MathMin => "min",
            Builtin::MathMax => "max",
            Builtin::MathAbs => "abs",
            Builtin::MathFloor => "floor",
            Builtin::MathCeil => "ceil",
            Builtin::MathRound => "round",
            Builtin::JsonStringify => "stringify",
            Builtin::ArrayIsArray => "isArray",
        }
    }
}

fn namespace_object(members: &[Builtin]) -> Value {
    let map: BTreeMap<String, Value> = members
        .iter()
        .map(|b| (b.name().to_string(), Value::Builtin(*b)))
        .collect();
    Value::Object(Rc::new(map))
}

/// Global names available to every snippet.
pub fn global(name: &str) -> Option<Value> {
    let value = match name {
        "parseInt" => Value::Builtin(Builtin::ParseInt),
        "parseFloat" => Value::Builtin(Builtin::ParseFloat),
        "Number" => Value::Builtin(Builtin::NumberFn),
        "String" => Value::Builtin(Builtin::StringFn),
        "Boolean" => Value::Builtin(Builtin::BooleanFn),
        "isNaN" => Value::Builtin(Builtin::IsNaN),
        "NaN" => Value::Number(f64::NAN),
        "Infinity" => Value::Number(f64::INFINITY),
        "Math" => namespace_object(&[
            Builtin::MathMin,
            Builtin::MathMax,
            Builtin::MathAbs,
            Builtin::MathFloor,
            Builtin::MathCeil,
            Builtin::MathRound,
        ]),
        "JSON" => namespace_object(&[Builtin::JsonStringify]),
        "Array" => namespace_object(&[Builtin::ArrayIsArray]),
        _ => return None,
    };
    Some(value)
}

fn arg(args: &[Value], idx: usize) -> Value {
    args.get(idx).cloned().unwrap_or_default()
}

pub fn call(_interp: &mut Interpreter<'_>, builtin: Builtin, args: Vec<Value>) -> Result<Value> {
    let first = arg(&args, 0);
    Ok(match builtin {
        Builtin::ParseInt => {
            let radix = match arg(&args, 1) {
                Value::Undefined => None,
                other => {
                    let r = other.to_number();
                    (r.is_finite() && r != 0.0).then_some(r.trunc() as u32)
                }
            };
            Value::Number(parse_int(&first.to_display(), radix))
        }
        Builtin::ParseFloat => Value::Number(parse_float(&first.to_display())),
        Builtin::NumberFn => Value::Number(if args.is_empty() {
            0.0
        } else {
            first.to_number()
        }),
        Builtin::StringFn => Value::str(if args.is_empty() {
            String::new()
        } else {
            first.to_display()
        }),
        Builtin::BooleanFn => Value::Bool(first.truthy()),
        Builtin::IsNaN => Value::Bool(first.to_number().is_nan()),
        Builtin::MathMin => Value::Number(
            args.iter()
                .map(Value::to_number)
                .fold(f64::INFINITY, |acc, n| if n.is_nan() || acc.is_nan() { f64::NAN } else { acc.min(n) }),
        ),
        Builtin::MathMax => Value::Number(
            args.iter()
                .map(Value::to_number)
                .fold(f64::NEG_INFINITY, |acc, n| if n.is_nan() || acc.is_nan() { f64::NAN } else { acc.max(n) }),
        ),
        Builtin::MathAbs => Value::Number(first.to_number().abs()),
        Builtin::MathFloor => Value::Number(first.to_number().floor()),
        Builtin::MathCeil => Value::Number(first.to_number().ceil()),
        Builtin::MathRound => Value::Number((first.to_number() + 0.5).floor()),
        Builtin::JsonStringify => match first {
            Value::Undefined | Value::Function(_) | Value::Builtin(_) => Value::Undefined,
            other => Value::str(other.to_json().to_string()),
        },
        Builtin::ArrayIsArray => Value::Bool(matches!(first, Value::Array(_))),
    })
}

pub fn call_method(
    interp: &mut Interpreter<'_>,
    target: &Value,
    name: &str,
    args: Vec<Value>,
) -> Result<Value> {
    match target {
        Value::Str(s) => string_method(interp, s, name, args),
        Value::Array(items) => array_method(interp, items, name, args),
        Value::Number(n) => match name {
            "toFixed" => {
                let digits = arg(&args, 0).to_number();
                let digits = if digits.is_finite() { digits.clamp(0.0, 100.0) as usize } else { 0 };
                Ok(Value::str(format!("{n:.digits$}")))
            }
            "toString" => Ok(Value::str(format_number(*n))),
            _ => Err(not_a_function(target, name)),
        },
        Value::Bool(b) if name == "toString" => Ok(Value::str(b.to_string())),
        Value::Regex(re) => match name {
            "test" => Ok(Value::Bool(re.regex.is_match(&arg(&args, 0).to_display()))),
            "exec" => Ok(exec(re, &arg(&args, 0).to_display())),
            _ => Err(not_a_function(target, name)),
        },
        _ => Err(not_a_function(target, name)),
    }
}

fn not_a_function(target: &Value, name: &str) -> ScriptError {
    ScriptError::type_error(format!("{}.{name} is not a function", target.type_name()))
}

fn to_regex(pattern: &Value) -> Result<Rc<RegexValue>> {
    match pattern {
        Value::Regex(re) => Ok(Rc::clone(re)),
        other => RegexValue::new(&regex::escape(&other.to_display()), "")
            .map(Rc::new)
            .map_err(ScriptError::Type),
    }
}

fn exec(re: &RegexValue, haystack: &str) -> Value {
    match re.regex.captures(haystack) {
        None => Value::Null,
        Some(caps) => Value::array(
            caps.iter()
                .map(|m| m.map(|m| Value::str(m.as_str())).unwrap_or_default())
                .collect(),
        ),
    }
}

/// Resolves a JS relative index (negative counts from the end) into `0..=len`.
fn relative_index(value: &Value, len: usize, default: usize) -> usize {
    if matches!(value, Value::Undefined) {
        return default;
    }
    let n = value.to_number();
    if n.is_nan() {
        return 0;
    }
    let n = n.trunc();
    if n < 0.0 {
        (len as f64 + n).max(0.0) as usize
    } else {
        n.min(len as f64) as usize
    }
}

fn string_method(
    interp: &mut Interpreter<'_>,
    s: &Rc<str>,
    name: &str,
    args: Vec<Value>,
) -> Result<Value> {
    let first = arg(&args, 0);
    Ok(match name {
        "match" => {
            let re = to_regex(&first)?;
            if re.global() {
                let found: Vec<Value> = re
                    .regex
                    .find_iter(s)
                    .map(|m| Value::str(m.as_str()))
                    .collect();
                if found.is_empty() {
                    Value::Null
                } else {
                    Value::array(found)
                }
            } else {
                exec(&re, s)
            }
        }
        "split" => {
            let limit = match arg(&args, 1) {
                Value::Undefined => usize::MAX,
                other => other.to_number().max(0.0) as usize,
            };
            let parts: Vec<Value> = match &first {
                Value::Undefined => vec![Value::Str(Rc::clone(s))],
                Value::Regex(re) => re.regex.split(s).map(Value::str).collect(),
                other => {
                    let sep = other.to_display();
                    if sep.is_empty() {
                        s.chars().map(|c| Value::str(c.to_string())).collect()
                    } else {
                        s.split(sep.as_str()).map(Value::str).collect()
                    }
                }
            };
            Value::array(parts.into_iter().take(limit).collect())
        }
        "trim" => Value::str(s.trim()),
        "trimStart" => Value::str(s.trim_start()),
        "trimEnd" => Value::str(s.trim_end()),
        "toLowerCase" => Value::str(s.to_lowercase()),
        "toUpperCase" => Value::str(s.to_uppercase()),
        "toString" => Value::Str(Rc::clone(s)),
        "includes" => Value::Bool(s.contains(first.to_display().as_str())),
        "startsWith" => Value::Bool(s.starts_with(first.to_display().as_str())),
        "endsWith" => Value::Bool(s.ends_with(first.to_display().as_str())),
        "indexOf" => {
            let needle = first.to_display();
            Value::Number(match s.find(needle.as_str()) {
                Some(byte_idx) => s[..byte_idx].chars().count() as f64,
                None => -1.0,
            })
        }
        "charAt" => {
            let idx = first.to_number();
            let idx = if idx.is_nan() { 0 } else { idx.max(0.0) as usize };
            Value::str(s.chars().nth(idx).map(String::from).unwrap_or_default())
        }
        "slice" | "substring" => {
            let chars: Vec<char> = s.chars().collect();
            let len = chars.len();
            let (start, end) = if name == "slice" {
                (
                    relative_index(&first, len, 0),
                    relative_index(&arg(&args, 1), len, len),
                )
            } else {
                let clamp = |v: &Value, default: usize| match v {
                    Value::Undefined => default,
                    other => {
                        let n = other.to_number();
                        if n.is_nan() { 0 } else { n.clamp(0.0, len as f64) as usize }
                    }
                };
                let a = clamp(&first, 0);
                let b = clamp(&arg(&args, 1), len);
                (a.min(b), a.max(b))
            };
            let out: String = if start < end {
                chars[start..end].iter().collect()
            } else {
                String::new()
            };
            Value::str(out)
        }
        "replace" | "replaceAll" => {
            let replacement = arg(&args, 1);
            let re = to_regex(&first)?;
            let all = name == "replaceAll" || re.global();
            replace(interp, s, &re, &replacement, all)?
        }
        _ => return Err(not_a_function(&Value::Str(Rc::clone(s)), name)),
    })
}

fn replace(
    interp: &mut Interpreter<'_>,
    s: &str,
    re: &RegexValue,
    replacement: &Value,
    all: bool,
) -> Result<Value> {
    let mut out = String::new();
    let mut last = 0;
    for caps in re.regex.captures_iter(s) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        out.push_str(&s[last..whole.start()]);
        if replacement.is_callable() {
            let args = caps
                .iter()
                .map(|m| m.map(|m| Value::str(m.as_str())).unwrap_or_default())
                .collect();
            out.push_str(&interp.call(replacement, args)?.to_display());
        } else {
            caps.expand(&replacement.to_display(), &mut out);
        }
        last = whole.end();
        if !all {
            break;
        }
    }
    out.push_str(&s[last..]);
    Ok(Value::str(out))
}

fn array_method(
    interp: &mut Interpreter<'_>,
    items: &Rc<Vec<Value>>,
    name: &str,
    args: Vec<Value>,
) -> Result<Value> {
    let first = arg(&args, 0);
    let callback = |interp: &mut Interpreter<'_>, item: &Value, idx: usize| -> Result<Value> {
        interp.tick()?;
        interp.call(&first, vec![item.clone(), Value::Number(idx as f64)])
    };
    let needs_callback = matches!(
        name,
        "map" | "filter" | "some" | "every" | "find" | "findIndex" | "reduce"
    );
    if needs_callback && !first.is_callable() {
        return Err(ScriptError::type_error(format!(
            "{} is not a function",
            first.type_name()
        )));
    }
    Ok(match name {
        "map" => {
            let mut out = Vec::with_capacity(items.len());
            for (idx, item) in items.iter().enumerate() {
                out.push(callback(interp, item, idx)?);
            }
            Value::array(out)
        }
        "filter" => {
            let mut out = Vec::new();
            for (idx, item) in items.iter().enumerate() {
                if callback(interp, item, idx)?.truthy() {
                    out.push(item.clone());
                }
            }
            Value::array(out)
        }
        "some" => {
            for (idx, item) in items.iter().enumerate() {
                if callback(interp, item, idx)?.truthy() {
                    return Ok(Value::Bool(true));
                }
            }
            Value::Bool(false)
        }
        "every" => {
            for (idx, item) in items.iter().enumerate() {
                if !callback(interp, item, idx)?.truthy() {
                    return Ok(Value::Bool(false));
                }
            }
            Value::Bool(true)
        }
        "find" | "findIndex" => {
            for (idx, item) in items.iter().enumerate() {
                if callback(interp, item, idx)?.truthy() {
                    return Ok(if name == "find" {
                        item.clone()
                    } else {
                        Value::Number(idx as f64)
                    });
                }
            }
            if name == "find" {
                Value::Undefined
            } else {
                Value::Number(-1.0)
            }
        }
        "reduce" => {
            let mut iter = items.iter().enumerate();
            let mut acc = match args.get(1) {
                Some(init) => init.clone(),
                None => match iter.next() {
                    Some((_, item)) => item.clone(),
                    None => {
                        return Err(ScriptError::type_error(
                            "reduce of empty array with no initial value",
                        ));
                    }
                },
            };
            for (idx, item) in iter {
                interp.tick()?;
                acc = interp.call(
                    &first,
                    vec![acc, item.clone(), Value::Number(idx as f64)],
                )?;
            }
            acc
        }
        "includes" => Value::Bool(items.iter().any(|item| {
            item.strict_eq(&first)
                || matches!((item, &first), (Value::Number(a), Value::Number(b)) if a.is_nan() && b.is_nan())
        })),
        "indexOf" => Value::Number(
            items
                .iter()
                .position(|item| item.strict_eq(&first))
                .map_or(-1.0, |idx| idx as f64),
        ),
        "join" => {
            let sep = match first {
                Value::Undefined => ",".to_string(),
                other => other.to_display(),
            };
            Value::str(
                items
                    .iter()
                    .map(|v| match v {
                        Value::Undefined | Value::Null => String::new(),
                        other => other.to_display(),
                    })
                    .collect::<Vec<_>>()
                    .join(&sep),
            )
        }
        "slice" => {
            let len = items.len();
            let start = relative_index(&first, len, 0);
            let end = relative_index(&arg(&args, 1), len, len);
            Value::array(if start < end {
                items[start..end].to_vec()
            } else {
                Vec::new()
            })
        }
        "concat" => {
            let mut out = items.as_ref().clone();
            for extra in args {
                match extra {
                    Value::Array(more) => out.extend(more.iter().cloned()),
                    other => out.push(other),
                }
            }
            Value::array(out)
        }
        "at" => {
            let n = first.to_number();
            let n = if n.is_nan() { 0.0 } else { n.trunc() };
            let idx = if n < 0.0 { items.len() as f64 + n } else { n };
            if idx < 0.0 {
                Value::Undefined
            } else {
                items.get(idx as usize).cloned().unwrap_or_default()
            }
        }
        "toString" => Value::str(Value::Array(Rc::clone(items)).to_display()),
        _ => return Err(not_a_function(&Value::Array(Rc::clone(items)), name)),
    })
}

/// `parseInt` semantics: optional sign, optional `0x` prefix, then the
/// longest run of digits valid in the radix.
pub fn parse_int(input: &str, radix: Option<u32>) -> f64 {
    let s = input.trim_start();
    let (negative, s) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let mut radix = radix.unwrap_or(0);
    let mut s = s;
    if (radix == 0 || radix == 16) && (s.starts_with("0x") || s.starts_with("0X")) {
        s = &s[2..];
        radix = 16;
    }
    if radix == 0 {
        radix = 10;
    }
    if !(2..=36).contains(&radix) {
        return f64::NAN;
    }
    let mut value = 0f64;
    let mut any = false;
    for c in s.chars() {
        let Some(d) = c.to_digit(radix) else {
            break;
        };
        value = value * f64::from(radix) + f64::from(d);
        any = true;
    }
    if !any {
        return f64::NAN;
    }
    if negative { -value } else { value }
}

/// `parseFloat` semantics: the longest decimal prefix.
pub fn parse_float(input: &str) -> f64 {
    let s = input.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        end = 1;
    }
    if s[end..].starts_with("Infinity") {
        return if s.starts_with('-') {
            f64::NEG_INFINITY
        } else {
            f64::INFINITY
        };
    }
    let digits_start = end;
    while bytes.get(end).is_some_and(u8::is_ascii_digit) {
        end += 1;
    }
    let mut saw_digit = end > digits_start;
    if bytes.get(end) == Some(&b'.') {
        let frac_start = end + 1;
        let mut frac_end = frac_start;
        while bytes.get(frac_end).is_some_and(u8::is_ascii_digit) {
            frac_end += 1;
        }
        if saw_digit || frac_end > frac_start {
            saw_digit = saw_digit || frac_end > frac_start;
            end = frac_end;
        }
    }
    if !saw_digit {
        return f64::NAN;
    }
    if matches!(bytes.get(end), Some(b'e') | Some(b'E')) {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'+') | Some(b'-')) {
            exp_end += 1;
        }
        let exp_digits = exp_end;
        while bytes.get(exp_end).is_some_and(u8::is_ascii_digit) {
            exp_end += 1;
        }
        if exp_end > exp_digits {
            end = exp_end;
        }
    }
    let text = s[..end].trim_end_matches('.');
    if text.is_empty() || text == "-" || text == "+" {
        return f64::NAN;
    }
    string_to_number(text)
}
