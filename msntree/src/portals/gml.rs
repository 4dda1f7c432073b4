//! GML encoding of trees.
//!
//! GML attributes must be scalars, so list-, mapping-, boolean- and null-valued
//! attributes are written as literal text and the keys known to carry them are
//! decoded again on load.
use std::io::{self, prelude::*};
use std::iter::Peekable;
use std::str::Chars;

use indexmap::IndexMap;

use super::{TreeIOError, ORDER_KEY};
use crate::attributes::{AttrValue, Attributes, FORMULA_KEY};
use crate::literal::write_float;
use crate::tree::MsnTree;

/// Attribute keys whose text values hold literal-encoded structures
const LITERAL_KEYS: &[&str] = &["scanids", "ioninjectiontimes", FORMULA_KEY, "template"];

/// Attribute key whose text value `None` means no value
const NULLABLE_KEY: &str = "coltype";

fn escape_string(value: &str) -> String {
    let mut buffer = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => buffer.push_str("&amp;"),
            '"' => buffer.push_str("&quot;"),
            c if c.is_ascii() && !c.is_ascii_control() => buffer.push(c),
            c => buffer.push_str(&format!("&#{};", c as u32)),
        }
    }
    buffer
}

fn unescape_string(value: &str) -> String {
    if !value.contains('&') {
        return value.to_string();
    }
    let mut buffer = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find('&') {
        buffer.push_str(&rest[..start]);
        rest = &rest[start..];
        let decoded = rest.find(';').and_then(|end| {
            let entity = &rest[1..end];
            let c = match entity {
                "amp" => Some('&'),
                "quot" => Some('"'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "apos" => Some('\''),
                _ => {
                    if let Some(hex) = entity.strip_prefix("#x").or_else(|| entity.strip_prefix("#X")) {
                        u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
                    } else if let Some(dec) = entity.strip_prefix('#') {
                        dec.parse::<u32>().ok().and_then(char::from_u32)
                    } else {
                        None
                    }
                }
            };
            c.map(|c| (c, end))
        });
        match decoded {
            Some((c, end)) => {
                buffer.push(c);
                rest = &rest[end + 1..];
            }
            None => {
                buffer.push('&');
                rest = &rest[1..];
            }
        }
    }
    buffer.push_str(rest);
    buffer
}

fn write_gml_float<W: Write>(writer: &mut W, value: f64) -> io::Result<()> {
    if value.is_nan() {
        writer.write_all(b"NAN")
    } else if value.is_infinite() {
        let text: &[u8] = if value > 0.0 { b"INF" } else { b"-INF" };
        writer.write_all(text)
    } else {
        let mut text = String::new();
        write_float(&mut text, value).map_err(io::Error::other)?;
        writer.write_all(text.as_bytes())
    }
}

fn write_attributes<W: Write>(
    writer: &mut W,
    attributes: &Attributes,
    reserved: &[&str],
) -> io::Result<()> {
    for (key, value) in attributes.iter() {
        if reserved.contains(&key.as_str()) {
            continue;
        }
        write!(writer, "    {key} ")?;
        match value {
            AttrValue::Integer(i) => write!(writer, "{i}")?,
            AttrValue::Float(x) => write_gml_float(writer, *x)?,
            AttrValue::Text(s) if !LITERAL_KEYS.contains(&key.as_str()) => {
                write!(writer, "\"{}\"", escape_string(s))?
            }
            other => write!(writer, "\"{}\"", escape_string(&other.to_literal().to_string()))?,
        }
        writer.write_all(b"\n")?;
    }
    Ok(())
}

/// Write a single `graph [ ... ]` block. Nodes are numbered by position and
/// carry their identifier as `label`.
pub fn write_gml<W: Write>(writer: &mut W, tree: &MsnTree) -> io::Result<()> {
    let mut tree = tree.clone();
    tree.stamp_order(ORDER_KEY);
    let index: IndexMap<&str, usize> = tree
        .nodes()
        .enumerate()
        .map(|(i, (k, _))| (k.as_str(), i))
        .collect();

    writeln!(writer, "graph [")?;
    writeln!(writer, "  directed 1")?;
    writeln!(writer, "  id \"{}\"", escape_string(&tree.id))?;
    for (i, (node_id, attrs)) in tree.nodes().enumerate() {
        writeln!(writer, "  node [")?;
        writeln!(writer, "    id {i}")?;
        writeln!(writer, "    label \"{}\"", escape_string(node_id))?;
        write_attributes(writer, attrs, &["id", "label"])?;
        writeln!(writer, "  ]")?;
    }
    for ((source, target), attrs) in tree.edges() {
        writeln!(writer, "  edge [")?;
        writeln!(writer, "    source {}", index[source.as_str()])?;
        writeln!(writer, "    target {}", index[target.as_str()])?;
        write_attributes(writer, attrs, &["source", "target"])?;
        writeln!(writer, "  ]")?;
    }
    writeln!(writer, "]")?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
enum GmlValue {
    Int(i64),
    Real(f64),
    Str(String),
    List(Vec<(String, GmlValue)>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Key(String),
    Int(i64),
    Real(f64),
    Str(String),
    Open,
    Close,
}

struct Tokenizer<'a> {
    chars: Peekable<Chars<'a>>,
    line: usize,
}

impl<'a> Tokenizer<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            chars: text.chars().peekable(),
            line: 1,
        }
    }

    fn error(&self, message: impl Into<String>) -> TreeIOError {
        TreeIOError::ParseError {
            line: self.line,
            message: message.into(),
        }
    }

    fn skip_trivia(&mut self) {
        while let Some(c) = self.chars.peek().copied() {
            if c == '\n' {
                self.line += 1;
                self.chars.next();
            } else if c.is_whitespace() {
                self.chars.next();
            } else if c == '#' {
                while let Some(c) = self.chars.peek() {
                    if *c == '\n' {
                        break;
                    }
                    self.chars.next();
                }
            } else {
                break;
            }
        }
    }

    fn next_token(&mut self) -> Result<Option<(Token, usize)>, TreeIOError> {
        self.skip_trivia();
        let line = self.line;
        let Some(c) = self.chars.peek().copied() else {
            return Ok(None);
        };
        let token = match c {
            '[' => {
                self.chars.next();
                Token::Open
            }
            ']' => {
                self.chars.next();
                Token::Close
            }
            '"' => {
                self.chars.next();
                let mut buffer = String::new();
                loop {
                    match self.chars.next() {
                        Some('"') => break,
                        Some(c) => {
                            if c == '\n' {
                                self.line += 1;
                            }
                            buffer.push(c);
                        }
                        None => return Err(self.error("unterminated string")),
                    }
                }
                Token::Str(unescape_string(&buffer))
            }
            c if c.is_ascii_digit() || matches!(c, '-' | '+' | '.') => {
                let mut buffer = String::new();
                while let Some(c) = self.chars.peek().copied() {
                    if c.is_ascii_alphanumeric() || matches!(c, '-' | '+' | '.') {
                        buffer.push(c);
                        self.chars.next();
                    } else {
                        break;
                    }
                }
                match buffer.as_str() {
                    "-INF" => Token::Real(f64::NEG_INFINITY),
                    "+INF" => Token::Real(f64::INFINITY),
                    "-NAN" | "+NAN" => Token::Real(f64::NAN),
                    _ => {
                        if let Ok(i) = buffer.parse::<i64>() {
                            Token::Int(i)
                        } else if let Ok(x) = buffer.parse::<f64>() {
                            Token::Real(x)
                        } else {
                            return Err(self.error(format!("malformed number {buffer:?}")));
                        }
                    }
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut buffer = String::new();
                while let Some(c) = self.chars.peek().copied() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        buffer.push(c);
                        self.chars.next();
                    } else {
                        break;
                    }
                }
                Token::Key(buffer)
            }
            c => return Err(self.error(format!("unexpected character {c:?}"))),
        };
        Ok(Some((token, line)))
    }
}

struct GmlParser<'a> {
    tokens: Tokenizer<'a>,
}

impl<'a> GmlParser<'a> {
    /// Parse key-value pairs until the end of input, or until a closing bracket
    /// when `nested` is set.
    fn parse_list(&mut self, nested: bool) -> Result<Vec<(String, GmlValue)>, TreeIOError> {
        let mut entries = Vec::new();
        loop {
            let key = match self.tokens.next_token()? {
                None if nested => return Err(self.tokens.error("unexpected end of input")),
                None => return Ok(entries),
                Some((Token::Close, _)) if nested => return Ok(entries),
                Some((Token::Key(key), _)) => key,
                Some((token, line)) => {
                    return Err(TreeIOError::ParseError {
                        line,
                        message: format!("expected a key, found {token:?}"),
                    })
                }
            };
            let value = match self.tokens.next_token()? {
                Some((Token::Int(i), _)) => GmlValue::Int(i),
                Some((Token::Real(x), _)) => GmlValue::Real(x),
                Some((Token::Str(s), _)) => GmlValue::Str(s),
                Some((Token::Open, _)) => GmlValue::List(self.parse_list(true)?),
                Some((Token::Key(word), _)) if word == "INF" => GmlValue::Real(f64::INFINITY),
                Some((Token::Key(word), _)) if word == "NAN" => GmlValue::Real(f64::NAN),
                Some((token, line)) => {
                    return Err(TreeIOError::ParseError {
                        line,
                        message: format!("expected a value for {key:?}, found {token:?}"),
                    })
                }
                None => return Err(self.tokens.error(format!("missing value for {key:?}"))),
            };
            entries.push((key, value));
        }
    }
}

fn decode_attribute(key: &str, value: GmlValue, line: usize) -> Result<AttrValue, TreeIOError> {
    let attribute_error = |source| TreeIOError::AttributeError { line, source };
    match value {
        GmlValue::Int(i) => Ok(AttrValue::Integer(i)),
        GmlValue::Real(x) => Ok(AttrValue::Float(x)),
        GmlValue::Str(s) if key == NULLABLE_KEY && s == "None" => Ok(AttrValue::Null),
        GmlValue::Str(s) if LITERAL_KEYS.contains(&key) => {
            AttrValue::from_literal_text(key, &s).map_err(attribute_error)
        }
        GmlValue::Str(s) => Ok(AttrValue::Text(s)),
        GmlValue::List(_) => Err(TreeIOError::ParseError {
            line,
            message: format!("nested attribute {key:?} is not supported"),
        }),
    }
}

fn gml_identifier(value: &GmlValue) -> Option<String> {
    match value {
        GmlValue::Int(i) => Some(i.to_string()),
        GmlValue::Str(s) => Some(s.clone()),
        _ => None,
    }
}

fn graph_from_gml(entries: Vec<(String, GmlValue)>, line: usize) -> Result<MsnTree, TreeIOError> {
    let parse_error = |message: &str| TreeIOError::ParseError {
        line,
        message: message.to_string(),
    };
    let id = entries
        .iter()
        .find(|(k, _)| k == "id")
        .and_then(|(_, v)| gml_identifier(v))
        .ok_or(TreeIOError::MissingTreeId { line })?;

    let mut tree = MsnTree::new(id);
    // GML node ids are positional, labels are the node identifiers
    let mut labels: IndexMap<String, String> = IndexMap::new();
    let mut edges = Vec::new();
    for (key, value) in entries {
        match (key.as_str(), value) {
            ("node", GmlValue::List(fields)) => {
                let mut gml_id = None;
                let mut label = None;
                let mut attributes = Attributes::new();
                for (field, value) in fields {
                    match field.as_str() {
                        "id" => gml_id = gml_identifier(&value),
                        "label" => label = gml_identifier(&value),
                        _ => {
                            let value = decode_attribute(&field, value, line)?;
                            attributes.insert(field, value);
                        }
                    }
                }
                let gml_id = gml_id.ok_or_else(|| parse_error("node without an id"))?;
                let label = label.unwrap_or_else(|| gml_id.clone());
                labels.insert(gml_id, label.clone());
                tree.add_node(label, attributes);
            }
            ("edge", GmlValue::List(fields)) => edges.push(fields),
            _ => {}
        }
    }

    for fields in edges {
        let mut source = None;
        let mut target = None;
        let mut attributes = Attributes::new();
        for (field, value) in fields {
            match field.as_str() {
                "source" => source = gml_identifier(&value),
                "target" => target = gml_identifier(&value),
                _ => {
                    let value = decode_attribute(&field, value, line)?;
                    attributes.insert(field, value);
                }
            }
        }
        let source = source.ok_or_else(|| parse_error("edge without a source"))?;
        let target = target.ok_or_else(|| parse_error("edge without a target"))?;
        match (labels.get(&source), labels.get(&target)) {
            (Some(s), Some(t)) => {
                let (s, t) = (s.clone(), t.clone());
                tree.add_edge(s, t, attributes);
            }
            _ => {
                return Err(TreeIOError::UnknownNode {
                    tree: tree.id.clone(),
                    source_node: source,
                    target_node: target,
                })
            }
        }
    }

    tree.restore_order(ORDER_KEY);
    Ok(tree)
}

/// Read every `graph [ ... ]` block in the stream
pub fn read_gml<R: BufRead>(mut reader: R) -> Result<Vec<MsnTree>, TreeIOError> {
    let mut text = String::new();
    reader.read_to_string(&mut text)?;
    let mut parser = GmlParser {
        tokens: Tokenizer::new(&text),
    };

    let mut trees = Vec::new();
    let mut line = 1;
    loop {
        match parser.tokens.next_token()? {
            None => break,
            Some((Token::Key(key), start)) => {
                line = start;
                match parser.tokens.next_token()? {
                    Some((Token::Open, _)) => {
                        let entries = parser.parse_list(true)?;
                        if key == "graph" {
                            trees.push(graph_from_gml(entries, line)?);
                        }
                    }
                    Some(_) => {}
                    None => return Err(parser.tokens.error(format!("missing value for {key:?}"))),
                }
            }
            Some((token, at)) => {
                return Err(TreeIOError::ParseError {
                    line: at,
                    message: format!("expected a key, found {token:?}"),
                })
            }
        }
    }
    tracing::trace!("Parsed {} GML graphs, last starting on line {line}", trees.len());
    Ok(trees)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_escaping() {
        let text = "a \"b\" & c µ";
        let escaped = escape_string(text);
        assert_eq!(escaped, "a &quot;b&quot; &amp; c &#181;");
        assert_eq!(unescape_string(&escaped), text);
        assert_eq!(unescape_string("&#34;x&bogus"), "\"x&bogus");
    }

    #[test]
    fn test_read_foreign_gml() -> Result<(), TreeIOError> {
        let text = r#"
# produced elsewhere
graph [
  directed 1
  id "tree_9"
  node [
    id 0
    label "150.1_1"
    mz 150.1
    mslevel 1
    coltype "None"
    scanids "[1, 2]"
    order 1
  ]
  node [
    id 1
    label "121.05_2"
    intensity INF
    order 0
  ]
  edge [
    source 0
    target 1
    mzdiff 29.05
  ]
]
"#;
        let trees = read_gml(Cursor::new(text))?;
        assert_eq!(trees.len(), 1);
        let tree = &trees[0];
        assert_eq!(tree.id, "tree_9");
        let ids: Vec<_> = tree.nodes().map(|(k, _)| k.as_str()).collect();
        assert_eq!(ids, vec!["121.05_2", "150.1_1"]);
        let root = tree.node("150.1_1").unwrap();
        assert_eq!(root.get("coltype"), Some(&AttrValue::Null));
        assert_eq!(root.get("scanids"), Some(&AttrValue::IntegerList(vec![1, 2])));
        assert_eq!(root.get("mslevel"), Some(&AttrValue::Integer(1)));
        assert_eq!(
            tree.node("121.05_2").and_then(|a| a.get("intensity")),
            Some(&AttrValue::Float(f64::INFINITY))
        );
        assert_eq!(
            tree.edge("150.1_1", "121.05_2").and_then(|a| a.get("mzdiff")),
            Some(&AttrValue::Float(29.05))
        );
        Ok(())
    }

    #[test]
    fn test_write_shape() -> io::Result<()> {
        let mut tree = MsnTree::new("t");
        let mut attrs = Attributes::new();
        attrs.insert("intensity".into(), AttrValue::Float(10.0));
        attrs.insert("flag".into(), AttrValue::Bool(true));
        tree.add_node("n", attrs);
        let mut buffer = Vec::new();
        write_gml(&mut buffer, &tree)?;
        let text = String::from_utf8_lossy(&buffer);
        assert!(text.contains("    label \"n\"\n"));
        assert!(text.contains("    intensity 10.0\n"));
        assert!(text.contains("    flag \"True\"\n"));
        assert!(text.contains("    order 0\n"));
        Ok(())
    }

    #[test]
    fn test_text_under_literal_key_round_trip() -> Result<(), TreeIOError> {
        let mut tree = MsnTree::new("t");
        let mut attrs = Attributes::new();
        attrs.insert("template".into(), AttrValue::Text("150.10@cid20.00".into()));
        attrs.insert("header".into(), AttrValue::Text("Full ms2 150.10@cid20.00".into()));
        tree.add_node("n", attrs);
        let mut buffer = Vec::new();
        write_gml(&mut buffer, &tree)?;
        let text = String::from_utf8_lossy(&buffer).to_string();
        assert!(text.contains("    template \"'150.10@cid20.00'\"\n"), "{text}");
        assert!(text.contains("    header \"Full ms2 150.10@cid20.00\"\n"), "{text}");

        let trees = read_gml(Cursor::new(text))?;
        assert_eq!(trees, vec![tree]);
        Ok(())
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            read_gml(Cursor::new("graph [\n id \"t\"\n node [ id 0 ")),
            Err(TreeIOError::ParseError { .. })
        ));
        assert!(matches!(
            read_gml(Cursor::new("graph [\n  id \"t\"\n  edge [ source 0 target 1 ]\n]")),
            Err(TreeIOError::UnknownNode { .. })
        ));
        assert!(matches!(
            read_gml(Cursor::new("graph [ directed 1 ]")),
            Err(TreeIOError::MissingTreeId { .. })
        ));
    }
}
