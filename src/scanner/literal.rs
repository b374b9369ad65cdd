//! Evaluation of Python literal syntax into plain JSON data.
//!
//! Only values with an exact JSON representation are accepted: strings,
//! finite numbers, booleans, `None`, lists and string-keyed dicts. Tuples,
//! sets, bytes, f-strings and anything computed are rejected with a reason.

#![allow(missing_docs)]

use serde_json::{Map, Number, Value};
use tree_sitter::Node;

/// Evaluate a literal expression node. `Err` carries a human-readable reason.
pub fn evaluate(node: Node<'_>, source: &str) -> Result<Value, String> {
    match node.kind() {
        "true" => Ok(Value::Bool(true)),
        "false" => Ok(Value::Bool(false)),
        "none" => Ok(Value::Null),
        "integer" => parse_integer(node_text(node, source), false),
        "float" => parse_float(node_text(node, source), false),
        "string" => parse_string(node_text(node, source)).map(Value::String),
        "concatenated_string" => {
            let mut joined = String::new();
            for part in code_children(node) {
                joined.push_str(&parse_string(node_text(part, source))?);
            }
            Ok(Value::String(joined))
        }
        "unary_operator" => evaluate_unary(node, source),
        "parenthesized_expression" => match code_children(node).as_slice() {
            [inner] => evaluate(*inner, source),
            _ => Err("unsupported parenthesized expression".to_string()),
        },
        "list" => code_children(node)
            .into_iter()
            .map(|item| evaluate(item, source))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        "dictionary" => {
            let mut map = Map::new();
            for entry in code_children(node) {
                if entry.kind() != "pair" {
                    return Err(format!("unsupported dict entry `{}`", entry.kind()));
                }
                let (Some(key), Some(value)) = (
                    entry.child_by_field_name("key"),
                    entry.child_by_field_name("value"),
                ) else {
                    return Err("incomplete dict entry".to_string());
                };
                let Value::String(key) = evaluate(key, source)? else {
                    return Err("dict key is not a string".to_string());
                };
                map.insert(key, evaluate(value, source)?);
            }
            Ok(Value::Object(map))
        }
        "tuple" => Err("tuple has no JSON form".to_string()),
        "set" => Err("set has no JSON form".to_string()),
        other => Err(format!("`{other}` is not a literal")),
    }
}

/// Named children excluding comments.
pub fn code_children(node: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor)
        .filter(|child| child.kind() != "comment")
        .collect()
}

/// Source text spanned by `node`.
pub fn node_text<'s>(node: Node<'_>, source: &'s str) -> &'s str {
    source.get(node.byte_range()).unwrap_or("")
}

fn evaluate_unary(node: Node<'_>, source: &str) -> Result<Value, String> {
    let operator = node
        .child_by_field_name("operator")
        .map_or("", |op| node_text(op, source));
    let Some(argument) = node.child_by_field_name("argument") else {
        return Err("incomplete unary expression".to_string());
    };
    let negative = match operator {
        "-" => true,
        "+" => false,
        other => return Err(format!("unsupported unary operator `{other}`")),
    };
    match argument.kind() {
        "integer" => parse_integer(node_text(argument, source), negative),
        "float" => parse_float(node_text(argument, source), negative),
        other => Err(format!("unary operator on `{other}`")),
    }
}

fn parse_integer(text: &str, negative: bool) -> Result<Value, String> {
    let cleaned = text.replace('_', "").to_ascii_lowercase();
    if cleaned.ends_with('j') {
        return Err("complex number has no JSON form".to_string());
    }
    let (digits, radix) = if let Some(rest) = cleaned.strip_prefix("0x") {
        (rest, 16)
    } else if let Some(rest) = cleaned.strip_prefix("0o") {
        (rest, 8)
    } else if let Some(rest) = cleaned.strip_prefix("0b") {
        (rest, 2)
    } else {
        (cleaned.as_str(), 10)
    };
    let magnitude = i128::from_str_radix(digits, radix)
        .map_err(|_| format!("integer `{text}` out of range"))?;
    let signed = if negative { -magnitude } else { magnitude };
    if let Ok(small) = i64::try_from(signed) {
        return Ok(Value::from(small));
    }
    u64::try_from(signed)
        .map(Value::from)
        .map_err(|_| format!("integer `{text}` out of range"))
}

fn parse_float(text: &str, negative: bool) -> Result<Value, String> {
    let cleaned = text.replace('_', "");
    if cleaned.ends_with(['j', 'J']) {
        return Err("complex number has no JSON form".to_string());
    }
    let parsed: f64 = cleaned
        .parse()
        .map_err(|_| format!("unparsable float `{text}`"))?;
    let value = if negative { -parsed } else { parsed };
    Number::from_f64(value)
        .map(Value::Number)
        .ok_or_else(|| format!("float `{text}` is not finite"))
}

/// Decode one Python string token, prefix and quotes included.
pub fn parse_string(text: &str) -> Result<String, String> {
    let quote_pos = text
        .find(['\'', '"'])
        .ok_or_else(|| "missing string quote".to_string())?;
    let prefix = text[..quote_pos].to_ascii_lowercase();
    if prefix.contains('f') {
        return Err("f-string is computed at run time".to_string());
    }
    if prefix.contains('b') {
        return Err("bytes literal has no JSON form".to_string());
    }

    let body = &text[quote_pos..];
    let quote = if body.starts_with("\"\"\"") || body.starts_with("'''") {
        &body[..3]
    } else {
        &body[..1]
    };
    let inner = body
        .strip_prefix(quote)
        .and_then(|rest| rest.strip_suffix(quote))
        .ok_or_else(|| "unterminated string".to_string())?;

    if prefix.contains('r') {
        Ok(inner.replace("\r\n", "\n"))
    } else {
        unescape(inner)
    }
}

fn unescape(inner: &str) -> Result<String, String> {
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();

    while let Some(c) = chars.next() {
        // Source newlines read as `\n`, whatever the file's line endings.
        if c == '\r' && chars.peek() == Some(&'\n') {
            continue;
        }
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some(escaped) = chars.next() else {
            return Err("dangling backslash".to_string());
        };
        match escaped {
            '\n' => {}
            '\r' if chars.peek() == Some(&'\n') => {
                chars.next();
            }
            '\\' | '\'' | '"' => out.push(escaped),
            'a' => out.push('\u{07}'),
            'b' => out.push('\u{08}'),
            'f' => out.push('\u{0c}'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            'v' => out.push('\u{0b}'),
            '0'..='7' => {
                let mut code = escaped.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match chars.peek().and_then(|next| next.to_digit(8)) {
                        Some(digit) => {
                            code = code * 8 + digit;
                            chars.next();
                        }
                        None => break,
                    }
                }
                out.push(char::from_u32(code).ok_or("invalid octal escape")?);
            }
            'x' => out.push(hex_escape(&mut chars, 2)?),
            'u' => out.push(hex_escape(&mut chars, 4)?),
            'U' => out.push(hex_escape(&mut chars, 8)?),
            'N' => return Err("named unicode escapes are not supported".to_string()),
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }

    Ok(out)
}

fn hex_escape(chars: &mut impl Iterator<Item = char>, width: usize) -> Result<char, String> {
    let digits: String = chars.take(width).collect();
    if digits.len() != width {
        return Err("truncated hex escape".to_string());
    }
    u32::from_str_radix(&digits, 16)
        .ok()
        .and_then(char::from_u32)
        .ok_or_else(|| format!("invalid hex escape `{digits}`"))
}
