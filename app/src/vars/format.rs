//! printf-style display hints for records.
//!
//! Supports one conversion per hint, `%[-+0][width][.prec](d|i|u|x|X|o|e|f|g|s)`,
//! with literal text around it and `%%` for a percent sign.

use crate::vars::value::Value;

struct Conversion {
    left: bool,
    plus: bool,
    zero: bool,
    width: usize,
    precision: Option<usize>,
    conv: char,
}

/// Render `value` through `hint`. `None` when the hint is malformed or
/// its conversion does not fit the value.
pub fn apply(hint: &str, value: &Value) -> Option<String> {
    let (prefix, conv, suffix) = split_hint(hint)?;
    let body = convert(&conv, value)?;
    Some(format!("{}{}{}", prefix, pad(&conv, body), suffix))
}

fn split_hint(hint: &str) -> Option<(String, Conversion, String)> {
    let mut prefix = String::new();
    let mut chars = hint.chars().peekable();
    loop {
        match chars.next()? {
            '%' if chars.peek() == Some(&'%') => {
                chars.next();
                prefix.push('%');
            }
            '%' => break,
            c => prefix.push(c),
        }
    }

    let mut conv = Conversion {
        left: false,
        plus: false,
        zero: false,
        width: 0,
        precision: None,
        conv: 's',
    };
    while let Some(&c) = chars.peek() {
        match c {
            '-' => conv.left = true,
            '+' => conv.plus = true,
            '0' => conv.zero = true,
            _ => break,
        }
        chars.next();
    }
    conv.width = take_number(&mut chars).unwrap_or(0);
    if chars.peek() == Some(&'.') {
        chars.next();
        conv.precision = Some(take_number(&mut chars).unwrap_or(0));
    }
    conv.conv = chars.next()?;
    if !"diuxXoefgs".contains(conv.conv) {
        return None;
    }
    let suffix = chars.collect::<String>().replace("%%", "%");
    Some((prefix, conv, suffix))
}

fn take_number(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Option<usize> {
    let mut digits = String::new();
    while let Some(&c) = chars.peek() {
        if !c.is_ascii_digit() {
            break;
        }
        digits.push(c);
        chars.next();
    }
    digits.parse().ok()
}

fn convert(c: &Conversion, value: &Value) -> Option<String> {
    let signed = |n: i128| {
        if c.plus && n >= 0 {
            format!("+{}", n)
        } else {
            n.to_string()
        }
    };
    match (c.conv, value) {
        ('d' | 'i', Value::Int(n)) => Some(signed(*n as i128)),
        ('d' | 'i' | 'u', Value::Unsigned(n)) => Some(signed(*n as i128)),
        ('u', Value::Int(n)) if *n >= 0 => Some(n.to_string()),
        ('x' | 'X' | 'o', v) => {
            let n = match v {
                Value::Int(n) if *n >= 0 => *n as u64,
                Value::Unsigned(n) => *n,
                _ => return None,
            };
            Some(match c.conv {
                'x' => format!("{:x}", n),
                'X' => format!("{:X}", n),
                _ => format!("{:o}", n),
            })
        }
        ('e' | 'f' | 'g', v) => {
            let x = match v {
                Value::Float(x) => *x,
                Value::Int(n) => *n as f64,
                Value::Unsigned(n) => *n as f64,
                _ => return None,
            };
            let prec = c.precision.unwrap_or(6);
            let mut s = match c.conv {
                'f' => format!("{:.*}", prec, x),
                'e' => c_exponent(&format!("{:.*e}", prec, x)),
                _ => x.to_string(),
            };
            if c.plus && x >= 0.0 {
                s.insert(0, '+');
            }
            Some(s)
        }
        ('s', v) => {
            let s = v.render();
            Some(match c.precision {
                Some(p) => s.chars().take(p).collect(),
                None => s,
            })
        }
        _ => None,
    }
}

// Rust prints `1.5e2`; C prints `1.5e+02`.
fn c_exponent(rust: &str) -> String {
    match rust.split_once('e') {
        Some((mantissa, exp)) => {
            let exp: i32 = exp.parse().unwrap_or(0);
            let sign = if exp < 0 { '-' } else { '+' };
            format!("{}e{}{:02}", mantissa, sign, exp.abs())
        }
        None => rust.to_string(),
    }
}

fn pad(c: &Conversion, body: String) -> String {
    let len = body.chars().count();
    if len >= c.width {
        return body;
    }
    let fill = c.width - len;
    if c.left {
        return format!("{}{}", body, " ".repeat(fill));
    }
    if c.zero && c.conv != 's' {
        let (sign, digits) = match body.strip_prefix(['-', '+']) {
            Some(rest) => (&body[..1], rest),
            None => ("", body.as_str()),
        };
        return format!("{}{}{}", sign, "0".repeat(fill), digits);
    }
    format!("{}{}", " ".repeat(fill), body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_conversions() {
        assert_eq!(apply("%05d", &Value::Int(-42)).as_deref(), Some("-0042"));
        assert_eq!(apply("%+d", &Value::Int(7)).as_deref(), Some("+7"));
        assert_eq!(apply("0x%04x", &Value::Unsigned(255)).as_deref(), Some("0x00ff"));
        assert_eq!(apply("%8.3f", &Value::Float(3.14159)).as_deref(), Some("   3.142"));
        assert_eq!(apply("%.2e", &Value::Float(1234.5)).as_deref(), Some("1.23e+03"));
    }

    #[test]
    fn text_and_literals() {
        assert_eq!(apply("[%-5s]", &Value::Text("ab".into())).as_deref(), Some("[ab   ]"));
        assert_eq!(apply("%.3s", &Value::Text("abcdef".into())).as_deref(), Some("abc"));
        assert_eq!(apply("%d%%", &Value::Int(50)).as_deref(), Some("50%"));
    }

    #[test]
    fn mismatched_or_malformed_hints_do_not_apply() {
        assert_eq!(apply("%d", &Value::Text("x".into())), None);
        assert_eq!(apply("%q", &Value::Int(1)), None);
        assert_eq!(apply("no conversion", &Value::Int(1)), None);
        assert_eq!(apply("%x", &Value::Int(-1)), None);
    }
}
