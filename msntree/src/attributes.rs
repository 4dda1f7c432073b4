//! Typed attribute values for tree nodes and edges, and the rules for moving them
//! in and out of JSON values and GML literal text.
use std::fmt::Display;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use thiserror::Error;

use crate::literal::{Literal, LiteralError};

/// The attribute key holding a node's formula candidate set
pub const FORMULA_KEY: &str = "mf";

/// A single hypothesized molecular formula for a peak
#[derive(Debug, Clone, PartialEq)]
pub struct FormulaCandidate {
    pub mass: f64,
    pub adduct: String,
    pub mf: String,
}

impl FormulaCandidate {
    pub fn new(mass: f64, adduct: impl Into<String>, mf: impl Into<String>) -> Self {
        Self {
            mass,
            adduct: adduct.into(),
            mf: mf.into(),
        }
    }
}

/// Formula candidates keyed by candidate identifier, in the order they were produced
pub type CandidateSet = IndexMap<String, FormulaCandidate>;

/// The single-record reduction of a [`CandidateSet`] attached to peak lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormulaSummary {
    /// The median candidate mass
    pub mass: f64,
    /// Candidate adduct labels joined by `,`
    pub adduct: String,
    /// Candidate formulae joined by `,`
    pub mf: String,
}

impl FormulaSummary {
    /// Summarize a candidate set, returning `None` when it is empty
    pub fn from_candidates(candidates: &CandidateSet) -> Option<Self> {
        if candidates.is_empty() {
            return None;
        }
        let masses: Vec<f64> = candidates.values().map(|c| c.mass).collect();
        let adduct = candidates
            .values()
            .map(|c| c.adduct.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let mf = candidates
            .values()
            .map(|c| c.mf.as_str())
            .collect::<Vec<_>>()
            .join(",");
        Some(Self {
            mass: median(&masses),
            adduct,
            mf,
        })
    }
}

/// The median of `values`, averaging the two central values of an even-length
/// sequence. `NaN` for an empty slice.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AttributeError {
    #[error("Attribute {0:?} has an unsupported value: {1}")]
    Unsupported(String, String),
    #[error("Attribute {0:?} has a malformed formula candidate: {1}")]
    MalformedCandidate(String, String),
    #[error("Attribute {0:?} could not be parsed: {1}")]
    Literal(String, #[source] LiteralError),
}

/// A node or edge attribute value.
///
/// Empty lists carry no element type once encoded, so every empty list variant
/// compares equal to the others.
#[derive(Debug, Clone)]
pub enum AttrValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    IntegerList(Vec<i64>),
    FloatList(Vec<f64>),
    TextList(Vec<String>),
    Candidates(CandidateSet),
}

impl AttrValue {
    fn is_empty_list(&self) -> bool {
        match self {
            AttrValue::IntegerList(v) => v.is_empty(),
            AttrValue::FloatList(v) => v.is_empty(),
            AttrValue::TextList(v) => v.is_empty(),
            _ => false,
        }
    }
}

impl PartialEq for AttrValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (AttrValue::Null, AttrValue::Null) => true,
            (AttrValue::Bool(a), AttrValue::Bool(b)) => a == b,
            (AttrValue::Integer(a), AttrValue::Integer(b)) => a == b,
            (AttrValue::Float(a), AttrValue::Float(b)) => a == b,
            (AttrValue::Text(a), AttrValue::Text(b)) => a == b,
            (AttrValue::IntegerList(a), AttrValue::IntegerList(b)) => a == b,
            (AttrValue::FloatList(a), AttrValue::FloatList(b)) => a == b,
            (AttrValue::TextList(a), AttrValue::TextList(b)) => a == b,
            (AttrValue::Candidates(a), AttrValue::Candidates(b)) => a == b,
            (a, b) => a.is_empty_list() && b.is_empty_list(),
        }
    }
}

/// An ordered attribute mapping
pub type Attributes = IndexMap<String, AttrValue>;

impl AttrValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            AttrValue::Null => "null",
            AttrValue::Bool(_) => "bool",
            AttrValue::Integer(_) => "integer",
            AttrValue::Float(_) => "float",
            AttrValue::Text(_) => "text",
            AttrValue::IntegerList(_) => "integer list",
            AttrValue::FloatList(_) => "float list",
            AttrValue::TextList(_) => "text list",
            AttrValue::Candidates(_) => "formula candidates",
        }
    }

    /// Whether the value can be stored directly as a GML attribute
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            AttrValue::Integer(_) | AttrValue::Float(_) | AttrValue::Text(_)
        )
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Integer(i) => Some(*i as f64),
            AttrValue::Float(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttrValue::Integer(i) => Some(*i),
            AttrValue::Float(x) if x.fract() == 0.0 => Some(*x as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_candidates(&self) -> Option<&CandidateSet> {
        match self {
            AttrValue::Candidates(c) => Some(c),
            _ => None,
        }
    }

    /// Decode a JSON value. `key` is used for error reporting and to recognize
    /// formula candidate mappings.
    pub fn from_json(key: &str, value: &Value) -> Result<Self, AttributeError> {
        let unsupported = || AttributeError::Unsupported(key.to_string(), value.to_string());
        match value {
            Value::Null => Ok(Self::Null),
            Value::Bool(b) => Ok(Self::Bool(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Self::Integer(i))
                } else {
                    n.as_f64().map(Self::Float).ok_or_else(unsupported)
                }
            }
            Value::String(s) => Ok(Self::Text(s.clone())),
            Value::Array(items) => {
                if items.iter().all(|v| v.is_i64()) {
                    Ok(Self::IntegerList(
                        items.iter().filter_map(|v| v.as_i64()).collect(),
                    ))
                } else if items.iter().all(|v| v.is_number()) {
                    Ok(Self::FloatList(
                        items.iter().filter_map(|v| v.as_f64()).collect(),
                    ))
                } else if items.iter().all(|v| v.is_string()) {
                    Ok(Self::TextList(
                        items
                            .iter()
                            .filter_map(|v| v.as_str().map(String::from))
                            .collect(),
                    ))
                } else {
                    Err(unsupported())
                }
            }
            Value::Object(entries) => {
                let mut candidates = CandidateSet::with_capacity(entries.len());
                for (cid, entry) in entries {
                    candidates.insert(cid.clone(), candidate_from_json(key, entry)?);
                }
                Ok(Self::Candidates(candidates))
            }
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            AttrValue::Null => Value::Null,
            AttrValue::Bool(b) => Value::Bool(*b),
            AttrValue::Integer(i) => Value::Number((*i).into()),
            AttrValue::Float(x) => float_to_json(*x),
            AttrValue::Text(s) => Value::String(s.clone()),
            AttrValue::IntegerList(v) => Value::Array(v.iter().map(|i| (*i).into()).collect()),
            AttrValue::FloatList(v) => Value::Array(v.iter().map(|x| float_to_json(*x)).collect()),
            AttrValue::TextList(v) => {
                Value::Array(v.iter().map(|s| Value::String(s.clone())).collect())
            }
            AttrValue::Candidates(c) => {
                let mut entries = Map::new();
                for (cid, candidate) in c.iter() {
                    let mut entry = Map::new();
                    entry.insert("mass".into(), float_to_json(candidate.mass));
                    entry.insert("adduct".into(), Value::String(candidate.adduct.clone()));
                    entry.insert("mf".into(), Value::String(candidate.mf.clone()));
                    entries.insert(cid.clone(), Value::Object(entry));
                }
                Value::Object(entries)
            }
        }
    }

    /// Encode the value as literal text for a scalar-only format
    pub fn to_literal(&self) -> Literal {
        match self {
            AttrValue::Null => Literal::None,
            AttrValue::Bool(b) => Literal::Bool(*b),
            AttrValue::Integer(i) => Literal::Int(*i),
            AttrValue::Float(x) => Literal::Float(*x),
            AttrValue::Text(s) => Literal::Str(s.clone()),
            AttrValue::IntegerList(v) => Literal::List(v.iter().map(|i| Literal::Int(*i)).collect()),
            AttrValue::FloatList(v) => {
                Literal::List(v.iter().map(|x| Literal::Float(*x)).collect())
            }
            AttrValue::TextList(v) => {
                Literal::List(v.iter().map(|s| Literal::Str(s.clone())).collect())
            }
            AttrValue::Candidates(c) => Literal::Dict(
                c.iter()
                    .map(|(cid, candidate)| {
                        (
                            Literal::Str(cid.clone()),
                            Literal::Dict(vec![
                                (Literal::Str("mass".into()), Literal::Float(candidate.mass)),
                                (
                                    Literal::Str("adduct".into()),
                                    Literal::Str(candidate.adduct.clone()),
                                ),
                                (Literal::Str("mf".into()), Literal::Str(candidate.mf.clone())),
                            ]),
                        )
                    })
                    .collect(),
            ),
        }
    }

    /// Decode literal text produced by [`AttrValue::to_literal`] or by the original tree
    /// producers.
    pub fn from_literal_text(key: &str, text: &str) -> Result<Self, AttributeError> {
        let literal =
            Literal::parse(text).map_err(|e| AttributeError::Literal(key.to_string(), e))?;
        Self::from_literal(key, &literal)
    }

    pub fn from_literal(key: &str, literal: &Literal) -> Result<Self, AttributeError> {
        let unsupported = || AttributeError::Unsupported(key.to_string(), literal.to_string());
        match literal {
            Literal::None => Ok(Self::Null),
            Literal::Bool(b) => Ok(Self::Bool(*b)),
            Literal::Int(i) => Ok(Self::Integer(*i)),
            Literal::Float(x) => Ok(Self::Float(*x)),
            Literal::Str(s) => Ok(Self::Text(s.clone())),
            Literal::List(items) => {
                if items.iter().all(|v| matches!(v, Literal::Int(_))) {
                    Ok(Self::IntegerList(
                        items
                            .iter()
                            .filter_map(|v| match v {
                                Literal::Int(i) => Some(*i),
                                _ => None,
                            })
                            .collect(),
                    ))
                } else if items
                    .iter()
                    .all(|v| matches!(v, Literal::Int(_) | Literal::Float(_)))
                {
                    Ok(Self::FloatList(
                        items
                            .iter()
                            .filter_map(|v| match v {
                                Literal::Int(i) => Some(*i as f64),
                                Literal::Float(x) => Some(*x),
                                _ => None,
                            })
                            .collect(),
                    ))
                } else if items.iter().all(|v| matches!(v, Literal::Str(_))) {
                    Ok(Self::TextList(
                        items
                            .iter()
                            .filter_map(|v| match v {
                                Literal::Str(s) => Some(s.clone()),
                                _ => None,
                            })
                            .collect(),
                    ))
                } else {
                    Err(unsupported())
                }
            }
            Literal::Dict(entries) => {
                let mut candidates = CandidateSet::with_capacity(entries.len());
                for (cid, entry) in entries {
                    let cid = literal_key(cid).ok_or_else(unsupported)?;
                    candidates.insert(cid, candidate_from_literal(key, entry)?);
                }
                Ok(Self::Candidates(candidates))
            }
        }
    }
}

impl Display for AttrValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttrValue::Text(s) => f.write_str(s),
            other => write!(f, "{}", other.to_literal()),
        }
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<CandidateSet> for AttrValue {
    fn from(value: CandidateSet) -> Self {
        Self::Candidates(value)
    }
}

fn float_to_json(value: f64) -> Value {
    Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn candidate_from_json(key: &str, entry: &Value) -> Result<FormulaCandidate, AttributeError> {
    let malformed = || AttributeError::MalformedCandidate(key.to_string(), entry.to_string());
    let fields = entry.as_object().ok_or_else(malformed)?;
    let mass = fields
        .get("mass")
        .and_then(|v| v.as_f64())
        .ok_or_else(malformed)?;
    let mf = fields
        .get("mf")
        .and_then(|v| v.as_str())
        .ok_or_else(malformed)?;
    let adduct = fields
        .get("adduct")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    Ok(FormulaCandidate::new(mass, adduct, mf))
}

fn literal_key(literal: &Literal) -> Option<String> {
    match literal {
        Literal::Str(s) => Some(s.clone()),
        Literal::Int(i) => Some(i.to_string()),
        _ => None,
    }
}

fn candidate_from_literal(key: &str, entry: &Literal) -> Result<FormulaCandidate, AttributeError> {
    let malformed = || AttributeError::MalformedCandidate(key.to_string(), entry.to_string());
    let Literal::Dict(fields) = entry else {
        return Err(malformed());
    };
    let lookup = |name: &str| {
        fields
            .iter()
            .find(|(k, _)| matches!(k, Literal::Str(s) if s == name))
            .map(|(_, v)| v)
    };
    let mass = match lookup("mass") {
        Some(Literal::Float(x)) => *x,
        Some(Literal::Int(i)) => *i as f64,
        _ => return Err(malformed()),
    };
    let mf = match lookup("mf") {
        Some(Literal::Str(s)) => s.clone(),
        _ => return Err(malformed()),
    };
    let adduct = match lookup("adduct") {
        Some(Literal::Str(s)) => s.clone(),
        _ => String::new(),
    };
    Ok(FormulaCandidate {
        mass,
        adduct,
        mf,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn candidates() -> CandidateSet {
        let mut c = CandidateSet::new();
        c.insert("1".into(), FormulaCandidate::new(180.06, "[M+H]+", "C6H12O6"));
        c.insert("2".into(), FormulaCandidate::new(180.08, "[M+Na]+", "C7H16O5"));
        c.insert("3".into(), FormulaCandidate::new(180.02, "[M+K]+", "C5H8O7"));
        c
    }

    #[test]
    fn test_empty_lists_round_trip() -> Result<(), AttributeError> {
        let empty = AttrValue::TextList(Vec::new());
        let from_json = AttrValue::from_json("scanids", &empty.to_json())?;
        assert_eq!(from_json, empty);
        let from_literal = AttrValue::from_literal_text("scanids", &empty.to_literal().to_string())?;
        assert_eq!(from_literal, empty);
        assert_eq!(AttrValue::FloatList(vec![]), AttrValue::IntegerList(vec![]));
        assert_ne!(AttrValue::TextList(vec!["a".into()]), empty);
        assert_ne!(AttrValue::Null, empty);
        Ok(())
    }

    #[test]
    fn test_summary() {
        let summary = FormulaSummary::from_candidates(&candidates()).unwrap();
        assert_eq!(summary.mass, 180.06);
        assert_eq!(summary.adduct, "[M+H]+,[M+Na]+,[M+K]+");
        assert_eq!(summary.mf, "C6H12O6,C7H16O5,C5H8O7");
        assert!(FormulaSummary::from_candidates(&CandidateSet::new()).is_none());
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), 2.5);
        assert!(median(&[]).is_nan());
    }

    #[test]
    fn test_json_typing() -> Result<(), AttributeError> {
        assert_eq!(AttrValue::from_json("k", &json!(5))?, AttrValue::Integer(5));
        assert_eq!(AttrValue::from_json("k", &json!(5.5))?, AttrValue::Float(5.5));
        assert_eq!(
            AttrValue::from_json("k", &json!([1, 2]))?,
            AttrValue::IntegerList(vec![1, 2])
        );
        assert_eq!(
            AttrValue::from_json("k", &json!([1, 2.5]))?,
            AttrValue::FloatList(vec![1.0, 2.5])
        );
        assert_eq!(
            AttrValue::from_json("k", &json!(["a", "b"]))?,
            AttrValue::TextList(vec!["a".into(), "b".into()])
        );
        assert!(AttrValue::from_json("k", &json!([1, "b"])).is_err());

        let value = AttrValue::Candidates(candidates());
        assert_eq!(AttrValue::from_json(FORMULA_KEY, &value.to_json())?, value);
        Ok(())
    }

    #[test]
    fn test_literal_typing() -> Result<(), AttributeError> {
        let value = AttrValue::Candidates(candidates());
        let text = value.to_literal().to_string();
        assert!(text.starts_with("{'1': {'mass': 180.06, 'adduct': '[M+H]+', 'mf': 'C6H12O6'}"));
        assert_eq!(AttrValue::from_literal_text(FORMULA_KEY, &text)?, value);

        assert_eq!(
            AttrValue::from_literal_text("ioninjectiontimes", "[12.5, 30]")?,
            AttrValue::FloatList(vec![12.5, 30.0])
        );
        assert_eq!(
            AttrValue::from_literal_text("coltype", "None")?,
            AttrValue::Null
        );
        assert!(matches!(
            AttrValue::from_literal_text(FORMULA_KEY, "{'1': {'adduct': 'x'}}"),
            Err(AttributeError::MalformedCandidate(..))
        ));
        Ok(())
    }
}
