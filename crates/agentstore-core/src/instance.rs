//! In-memory representation of an entity instance.
//!
//! An instance is a transient, per-request value: the entity it names, its
//! attribute map, and the query shape (operators, aggregates, ordering)
//! attached to it by the caller. It is never persisted as-is. Instances are
//! immutable to the resolver except through [`Instance::merge_attributes`],
//! which returns a new value; this discipline makes it safe to pass one
//! through permission checks and then through the query builder.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::catalog::{FQ_SEP, PATH_ATTR, TENANT_ATTR};
use crate::query::{Aggregate, QueryOp};

pub type AttrMap = BTreeMap<String, Value>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Instance {
    pub module: String,
    pub name: String,
    #[serde(default)]
    pub attributes: AttrMap,
    /// Predicate operator per attribute, parallel to `query_vals`.
    #[serde(default)]
    pub query_ops: BTreeMap<String, QueryOp>,
    #[serde(default)]
    pub query_vals: AttrMap,
    #[serde(default)]
    pub aggregates: BTreeMap<String, Aggregate>,
    #[serde(default)]
    pub group_by: Vec<String>,
    #[serde(default)]
    pub order_by: Vec<String>,
    #[serde(default)]
    pub order_desc: bool,
    #[serde(default)]
    pub distinct: bool,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

impl Instance {
    pub fn new(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_attrs(mut self, attrs: AttrMap) -> Self {
        self.attributes = attrs;
        self
    }

    pub fn set_attr(mut self, name: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    pub fn attr(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn attr_str(&self, name: &str) -> Option<&str> {
        self.attr(name).and_then(Value::as_str)
    }

    /// Canonical path identity, when the instance has been persisted.
    pub fn path(&self) -> Option<&str> {
        self.attr_str(PATH_ATTR)
    }

    pub fn tenant(&self) -> Option<&str> {
        self.attr_str(TENANT_ATTR)
    }

    pub fn fq_name(&self) -> String {
        format!("{}{}{}", self.module, FQ_SEP, self.name)
    }

    /// Record one where-clause predicate.
    pub fn add_query(&mut self, attr: impl Into<String>, op: QueryOp, val: Value) {
        let attr = attr.into();
        self.query_ops.insert(attr.clone(), op);
        self.query_vals.insert(attr, val);
    }

    pub fn query(mut self, attr: impl Into<String>, op: QueryOp, val: Value) -> Self {
        self.add_query(attr, op, val);
        self
    }

    pub fn query_attributes(&self) -> &BTreeMap<String, QueryOp> {
        &self.query_ops
    }

    pub fn query_attribute_values(&self) -> &AttrMap {
        &self.query_vals
    }

    /// Attribute map ready for row insert: nested structured values are
    /// JSON-encoded strings in SQL storage.
    pub fn attributes_with_stringified_objects(&self) -> AttrMap {
        self.attributes
            .iter()
            .map(|(k, v)| {
                let v = match v {
                    Value::Object(_) | Value::Array(_) => Value::String(v.to_string()),
                    other => other.clone(),
                };
                (k.clone(), v)
            })
            .collect()
    }

    /// New instance with `new_attrs` overlaid on this one's attributes.
    /// Query shape is not carried over; the result is a plain value.
    pub fn merge_attributes(&self, new_attrs: AttrMap) -> Self {
        let mut attributes = self.attributes.clone();
        attributes.extend(new_attrs);
        Self {
            module: self.module.clone(),
            name: self.name.clone(),
            attributes,
            ..Self::default()
        }
    }

    /// Strip the named attributes; used to mask write-only columns on read.
    pub fn without_attributes(mut self, names: &[&str]) -> Self {
        for name in names {
            self.attributes.remove(*name);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fq_name_joins_module_and_entity() {
        assert_eq!(Instance::new("acme", "Person").fq_name(), "acme/Person");
    }

    #[test]
    fn add_query_keeps_parallel_maps() {
        let mut inst = Instance::new("acme", "Person");
        inst.add_query("age", QueryOp::Gt, json!(21));
        inst.add_query("name", QueryOp::Like, json!("Jo%"));
        assert_eq!(inst.query_attributes().len(), 2);
        assert_eq!(inst.query_attribute_values().get("age"), Some(&json!(21)));
    }

    #[test]
    fn nested_values_are_stringified_for_insert() {
        let inst = Instance::new("acme", "Person")
            .set_attr("name", json!("Joe"))
            .set_attr("tags", json!(["a", "b"]))
            .set_attr("profile", json!({"city": "Oslo"}));
        let attrs = inst.attributes_with_stringified_objects();
        assert_eq!(attrs.get("name"), Some(&json!("Joe")));
        assert_eq!(attrs.get("tags"), Some(&json!("[\"a\",\"b\"]")));
        assert_eq!(attrs.get("profile"), Some(&json!("{\"city\":\"Oslo\"}")));
    }

    #[test]
    fn merge_returns_fresh_instance() {
        let base = Instance::new("acme", "Person")
            .set_attr("name", json!("Joe"))
            .set_attr("age", json!(23));
        let merged = base.merge_attributes(BTreeMap::from([
            ("age".to_string(), json!(24)),
            ("city".to_string(), json!("Oslo")),
        ]));
        assert_eq!(merged.attr("age"), Some(&json!(24)));
        assert_eq!(merged.attr("city"), Some(&json!("Oslo")));
        // original untouched
        assert_eq!(base.attr("age"), Some(&json!(23)));
    }

    #[test]
    fn write_only_masking() {
        let inst = Instance::new("acme", "User")
            .set_attr("name", json!("Joe"))
            .set_attr("password", json!("s3cret"));
        let masked = inst.without_attributes(&["password"]);
        assert!(masked.attr("password").is_none());
        assert_eq!(masked.attr("name"), Some(&json!("Joe")));
    }
}
