use std::io::{self, prelude::*};

use serde_json::{json, Map, Value};

use super::{TreeIOError, ORDER_KEY};
use crate::attributes::{AttrValue, Attributes};
use crate::tree::MsnTree;

fn attributes_to_json(object: &mut Map<String, Value>, attributes: &Attributes, reserved: &[&str]) {
    for (key, value) in attributes.iter() {
        if reserved.contains(&key.as_str()) {
            continue;
        }
        object.insert(key.clone(), value.to_json());
    }
}

/// Encode a tree as a node-link document
pub fn tree_to_json(tree: &MsnTree) -> Value {
    let mut tree = tree.clone();
    tree.stamp_order(ORDER_KEY);

    let nodes: Vec<Value> = tree
        .nodes()
        .map(|(id, attrs)| {
            let mut object = Map::with_capacity(attrs.len() + 1);
            object.insert("id".into(), Value::String(id.clone()));
            attributes_to_json(&mut object, attrs, &["id"]);
            Value::Object(object)
        })
        .collect();

    let links: Vec<Value> = tree
        .edges()
        .map(|((source, target), attrs)| {
            let mut object = Map::with_capacity(attrs.len() + 2);
            object.insert("source".into(), Value::String(source.clone()));
            object.insert("target".into(), Value::String(target.clone()));
            attributes_to_json(&mut object, attrs, &["source", "target"]);
            Value::Object(object)
        })
        .collect();

    json!({
        "directed": true,
        "multigraph": false,
        "graph": {"id": tree.id},
        "nodes": nodes,
        "links": links,
    })
}

/// Write `tree` as a single line of JSON
pub fn write_json_lines<W: Write>(writer: &mut W, tree: &MsnTree) -> io::Result<()> {
    let doc = tree_to_json(tree);
    serde_json::to_writer(&mut *writer, &doc)?;
    writer.write_all(b"\n")
}

fn identifier(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn attributes_from_json(
    object: &Map<String, Value>,
    reserved: &[&str],
    line: usize,
) -> Result<Attributes, TreeIOError> {
    let mut attributes = Attributes::with_capacity(object.len());
    for (key, value) in object.iter() {
        if reserved.contains(&key.as_str()) {
            continue;
        }
        let value = AttrValue::from_json(key, value)
            .map_err(|source| TreeIOError::AttributeError { line, source })?;
        attributes.insert(key.clone(), value);
    }
    Ok(attributes)
}

fn parse_error(line: usize, message: &str) -> TreeIOError {
    TreeIOError::ParseError {
        line,
        message: message.to_string(),
    }
}

/// Decode a node-link document. `line` is only used to report errors.
pub fn tree_from_json(doc: &Value, line: usize) -> Result<MsnTree, TreeIOError> {
    let id = doc
        .get("graph")
        .and_then(|g| g.get("id"))
        .or_else(|| doc.get("id"))
        .and_then(identifier)
        .ok_or(TreeIOError::MissingTreeId { line })?;

    let nodes = doc
        .get("nodes")
        .and_then(|v| v.as_array())
        .ok_or_else(|| parse_error(line, "missing \"nodes\" array"))?;
    let links = doc
        .get("links")
        .or_else(|| doc.get("edges"))
        .and_then(|v| v.as_array())
        .map(|v| v.as_slice())
        .unwrap_or_default();

    let mut tree = MsnTree::with_capacity(id, nodes.len(), links.len());
    for node in nodes {
        let object = node
            .as_object()
            .ok_or_else(|| parse_error(line, "node is not an object"))?;
        let node_id = object
            .get("id")
            .and_then(identifier)
            .ok_or_else(|| parse_error(line, "node without an id"))?;
        let attributes = attributes_from_json(object, &["id"], line)?;
        tree.add_node(node_id, attributes);
    }

    for link in links {
        let object = link
            .as_object()
            .ok_or_else(|| parse_error(line, "link is not an object"))?;
        let source = object
            .get("source")
            .and_then(identifier)
            .ok_or_else(|| parse_error(line, "link without a source"))?;
        let target = object
            .get("target")
            .and_then(identifier)
            .ok_or_else(|| parse_error(line, "link without a target"))?;
        if !tree.contains_node(&source) || !tree.contains_node(&target) {
            return Err(TreeIOError::UnknownNode {
                tree: tree.id.clone(),
                source_node: source,
                target_node: target,
            });
        }
        let attributes = attributes_from_json(object, &["source", "target"], line)?;
        tree.add_edge(source, target, attributes);
    }

    tree.restore_order(ORDER_KEY);
    Ok(tree)
}

/// Read one tree per non-blank line
pub fn read_json_lines<R: BufRead>(reader: R) -> Result<Vec<MsnTree>, TreeIOError> {
    let mut trees = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let line_number = i + 1;
        if line.trim().is_empty() {
            continue;
        }
        let doc: Value = serde_json::from_str(&line).map_err(|source| TreeIOError::JsonError {
            line: line_number,
            source,
        })?;
        trees.push(tree_from_json(&doc, line_number)?);
    }
    Ok(trees)
}
