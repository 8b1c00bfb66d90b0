// Copyright Kani Contributors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Boogie attributes, e.g. `{:captureState "check_state_0"}` or
//! `{:resource "$M.0"}`. Attributes are kept as an ordered list because both
//! their order and repeated keys are meaningful to the verifier.

use super::Expr;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single attribute parameter
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttrValue {
    Str(String),
    Expr(Expr),
}

impl AttrValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s),
            AttrValue::Expr(_) => None,
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Str(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Str(value)
    }
}

impl From<Expr> for AttrValue {
    fn from(value: Expr) -> Self {
        AttrValue::Expr(value)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Attribute {
    pub key: String,
    #[serde(default)]
    pub values: Vec<AttrValue>,
}

impl Attribute {
    pub fn new(key: impl Into<String>, values: Vec<AttrValue>) -> Self {
        Attribute { key: key.into(), values }
    }

    /// An attribute with no parameters, e.g. `{:checker}`.
    pub fn flag(key: impl Into<String>) -> Self {
        Attribute::new(key, Vec::new())
    }

    /// String parameters in order; expression parameters are skipped.
    pub fn strings(&self) -> impl Iterator<Item = &str> {
        self.values.iter().filter_map(AttrValue::as_str)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes(Vec<Attribute>);

impl Attributes {
    pub fn new() -> Self {
        Attributes(Vec::new())
    }

    pub fn push(&mut self, attribute: Attribute) {
        self.0.push(attribute);
    }

    /// Builder variant of [`Attributes::push`].
    pub fn with(mut self, attribute: Attribute) -> Self {
        self.0.push(attribute);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Attribute> {
        self.0.iter()
    }

    pub fn has(&self, key: &str) -> bool {
        self.0.iter().any(|a| a.key == key)
    }

    /// First attribute with the given key.
    pub fn get(&self, key: &str) -> Option<&Attribute> {
        self.0.iter().find(|a| a.key == key)
    }

    /// First string parameter of the first attribute with the given key.
    pub fn string(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|a| a.strings().next())
    }

    pub fn remove(&mut self, key: &str) {
        self.0.retain(|a| a.key != key);
    }
}

impl FromIterator<Attribute> for Attributes {
    fn from_iter<I: IntoIterator<Item = Attribute>>(iter: I) -> Self {
        Attributes(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Attributes {
    type Item = &'a Attribute;
    type IntoIter = std::slice::Iter<'a, Attribute>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Str(s) => write!(f, "\"{s}\""),
            AttrValue::Expr(e) => write!(f, "{e}"),
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{:{}", self.key)?;
        for (i, v) in self.values.iter().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            write!(f, "{sep}{v}")?;
        }
        write!(f, "}}")
    }
}

/// Attributes print with a trailing space so they can prefix a name.
impl fmt::Display for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for a in &self.0 {
            write!(f, "{a} ")?;
        }
        Ok(())
    }
}
