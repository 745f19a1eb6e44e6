//! 键值字面量解析
//!
//! 读取参数（如 `{'nrows': 100, 'filters': [('level', '==', 'ERROR')]}`）按固定文法解析为 JSON：
//! 字典（字符串键）、字符串（单/双引号）、整数、浮点、布尔、空值、列表、元组（转为列表），允许尾逗号。
//! 其余任何内容（标识符、调用、运算符、尾随垃圾）一律失败，调用方回退为空映射。

use serde_json::{Map, Number, Value};

/// 解析字典字面量；失败或非字典时返回空映射
pub fn parse_mapping(text: &str) -> Map<String, Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Map::new();
    }
    match parse_value(trimmed) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            tracing::warn!(target: "triage::tool", kind = kind_of(&other), "mapping literal is not a dict");
            Map::new()
        }
        Err(e) => {
            tracing::warn!(target: "triage::tool", error = %e, "mapping literal rejected");
            Map::new()
        }
    }
}

/// 解析任意字面量；整段必须恰好是一个值
pub fn parse_value(text: &str) -> Result<Value, String> {
    let mut p = Parser {
        chars: text.chars().collect(),
        pos: 0,
    };
    let value = p.value(0)?;
    p.skip_ws();
    if p.pos != p.chars.len() {
        return Err(format!("unexpected trailing input at {}", p.pos));
    }
    Ok(value)
}

const MAX_DEPTH: usize = 32;

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, c: char) -> Result<(), String> {
        self.skip_ws();
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(format!("expected '{}' at {}", c, self.pos))
        }
    }

    fn value(&mut self, depth: usize) -> Result<Value, String> {
        if depth > MAX_DEPTH {
            return Err("literal nested too deeply".to_string());
        }
        self.skip_ws();
        match self.peek() {
            Some('{') => self.dict(depth),
            Some('[') => self.sequence('[', ']', depth),
            Some('(') => self.sequence('(', ')', depth),
            Some('\'') | Some('"') => self.string().map(Value::String),
            Some(c) if c == '-' || c == '+' || c.is_ascii_digit() || c == '.' => self.number(),
            Some(c) if c.is_ascii_alphabetic() => self.keyword(),
            Some(c) => Err(format!("unexpected '{}' at {}", c, self.pos)),
            None => Err("unexpected end of input".to_string()),
        }
    }

    fn dict(&mut self, depth: usize) -> Result<Value, String> {
        self.expect('{')?;
        let mut map = Map::new();
        loop {
            self.skip_ws();
            if self.peek() == Some('}') {
                self.pos += 1;
                return Ok(Value::Object(map));
            }
            let key = match self.peek() {
                Some('\'') | Some('"') => self.string()?,
                _ => return Err(format!("dict key must be a quoted string at {}", self.pos)),
            };
            self.expect(':')?;
            let value = self.value(depth + 1)?;
            map.insert(key, value);
            self.skip_ws();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some('}') => {}
                _ => return Err(format!("expected ',' or '}}' at {}", self.pos)),
            }
        }
    }

    fn sequence(&mut self, open: char, close: char, depth: usize) -> Result<Value, String> {
        self.expect(open)?;
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() == Some(close) {
                self.pos += 1;
                return Ok(Value::Array(items));
            }
            items.push(self.value(depth + 1)?);
            self.skip_ws();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some(c) if c == close => {}
                _ => return Err(format!("expected ',' or '{}' at {}", close, self.pos)),
            }
        }
    }

    fn string(&mut self) -> Result<String, String> {
        let quote = self.peek().ok_or("unexpected end of input")?;
        self.pos += 1;
        let mut out = String::new();
        while let Some(c) = self.peek() {
            self.pos += 1;
            if c == quote {
                return Ok(out);
            }
            if c != '\\' {
                out.push(c);
                continue;
            }
            let esc = self.peek().ok_or("unterminated escape")?;
            self.pos += 1;
            match esc {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                'r' => out.push('\r'),
                '0' => out.push('\0'),
                '\\' | '\'' | '"' | '/' => out.push(esc),
                'u' => {
                    let hex: String = self.chars.iter().skip(self.pos).take(4).collect();
                    let code = u32::from_str_radix(&hex, 16)
                        .map_err(|_| format!("bad \\u escape at {}", self.pos))?;
                    out.push(char::from_u32(code).ok_or("invalid code point")?);
                    self.pos += 4;
                }
                other => {
                    out.push('\\');
                    out.push(other);
                }
            }
        }
        Err("unterminated string".to_string())
    }

    fn number(&mut self) -> Result<Value, String> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E' | '_'))
        {
            self.pos += 1;
        }
        let raw: String = self.chars[start..self.pos].iter().filter(|c| **c != '_').collect();
        if let Ok(i) = raw.parse::<i64>() {
            return Ok(Value::Number(i.into()));
        }
        raw.parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| format!("invalid number '{}'", raw))
    }

    fn keyword(&mut self) -> Result<Value, String> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        let word: String = self.chars[start..self.pos].iter().collect();
        match word.as_str() {
            "true" | "True" => Ok(Value::Bool(true)),
            "false" | "False" => Ok(Value::Bool(false)),
            "null" | "None" => Ok(Value::Null),
            _ => Err(format!("identifier '{}' is not a literal", word)),
        }
    }
}

fn kind_of(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_python_style_dict() {
        let m = parse_mapping(
            "{'nrows': 100, 'columns': ['@timestamp', 'message'], \
             'filters': [('level', '==', 'ERROR'), ('k8_pod', 'in', ['a', 'b'])],}",
        );
        assert_eq!(m["nrows"], json!(100));
        assert_eq!(m["columns"], json!(["@timestamp", "message"]));
        assert_eq!(
            m["filters"],
            json!([["level", "==", "ERROR"], ["k8_pod", "in", ["a", "b"]]])
        );
    }

    #[test]
    fn test_json_dict_and_keywords() {
        let m = parse_mapping(r#"{"a": true, "b": None, "c": -1.5, "d": "x\"y"}"#);
        assert_eq!(m["a"], json!(true));
        assert_eq!(m["b"], Value::Null);
        assert_eq!(m["c"], json!(-1.5));
        assert_eq!(m["d"], json!("x\"y"));
    }

    #[test]
    fn test_fails_closed() {
        assert!(parse_mapping("__import__('os').system('rm -rf /')").is_empty());
        assert!(parse_mapping("{'nrows': 10 + 5}").is_empty());
        assert!(parse_mapping("{'nrows': 10").is_empty());
        assert!(parse_mapping("{nrows: 10}").is_empty());
        assert!(parse_mapping("[1, 2]").is_empty());
        assert!(parse_mapping("{'a': 1} extra").is_empty());
        assert!(parse_mapping("").is_empty());
    }

    #[test]
    fn test_deep_nesting_rejected() {
        let text = format!("{{'a': {}1{}}}", "[".repeat(64), "]".repeat(64));
        assert!(parse_mapping(&text).is_empty());
    }
}
