//! Deferred references between resources and their resolution.
//!
//! A property that depends on another resource's provider-assigned attribute
//! (a generated domain name, an assigned id) is written as a [`DeferredValue`].
//! The [`AttributeTable`] records each node's attributes as the node is
//! constructed; resolving a deferred value before its producer is in the
//! table fails loudly.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::{Error, Result};

/// Placeholder for `producer.attribute`, bound once the producer is constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeferredValue {
    pub producer: String,
    pub attribute: String,
}

impl std::fmt::Display for DeferredValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "${{{}.{}}}", self.producer, self.attribute)
    }
}

/// Create a deferred reference to `producer`'s `attribute`.
pub fn defer(producer: impl Into<String>, attribute: impl Into<String>) -> DeferredValue {
    DeferredValue {
        producer: producer.into(),
        attribute: attribute.into(),
    }
}

/// A resource property that may contain deferred references at any depth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyValue {
    /// Known at description time.
    Literal(serde_json::Value),
    /// Known once the producer is constructed.
    Deferred(DeferredValue),
    List(Vec<PropertyValue>),
    Map(BTreeMap<String, PropertyValue>),
    /// String concatenation of the resolved parts.
    Join(Vec<PropertyValue>),
}

impl PropertyValue {
    pub fn string(value: impl Into<String>) -> Self {
        Self::Literal(serde_json::Value::String(value.into()))
    }

    pub fn join(parts: impl IntoIterator<Item = PropertyValue>) -> Self {
        Self::Join(parts.into_iter().collect())
    }

    pub fn list(items: impl IntoIterator<Item = PropertyValue>) -> Self {
        Self::List(items.into_iter().collect())
    }

    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, PropertyValue)>) -> Self {
        Self::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Every deferred reference contained in this value, in traversal order.
    pub fn references(&self) -> Vec<&DeferredValue> {
        let mut refs = Vec::new();
        self.collect_references(&mut refs);
        refs
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a DeferredValue>) {
        match self {
            PropertyValue::Literal(_) => {}
            PropertyValue::Deferred(d) => out.push(d),
            PropertyValue::List(items) | PropertyValue::Join(items) => {
                for item in items {
                    item.collect_references(out);
                }
            }
            PropertyValue::Map(entries) => {
                for value in entries.values() {
                    value.collect_references(out);
                }
            }
        }
    }
}

impl From<DeferredValue> for PropertyValue {
    fn from(value: DeferredValue) -> Self {
        Self::Deferred(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::string(value)
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::string(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Literal(serde_json::Value::Bool(value))
    }
}

impl From<u32> for PropertyValue {
    fn from(value: u32) -> Self {
        Self::Literal(serde_json::Value::from(value))
    }
}

impl From<serde_json::Value> for PropertyValue {
    fn from(value: serde_json::Value) -> Self {
        Self::Literal(value)
    }
}

/// Provider-assigned attributes of every constructed node.
#[derive(Debug, Clone, Default)]
pub struct AttributeTable {
    resolved: HashMap<String, BTreeMap<String, String>>,
}

impl AttributeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a node as constructed along with the attributes it publishes.
    ///
    /// Attributes are write-once: publishing a node twice is rejected so a
    /// resolved value stays stable for the rest of the pass.
    pub fn publish(&mut self, node: &str, attributes: BTreeMap<String, String>) -> Result<()> {
        if self.resolved.contains_key(node) {
            return Err(Error::configuration(node, "node was already constructed"));
        }
        self.resolved.insert(node.to_string(), attributes);
        Ok(())
    }

    pub fn is_constructed(&self, node: &str) -> bool {
        self.resolved.contains_key(node)
    }

    /// Attributes a constructed node published.
    pub fn attributes(&self, node: &str) -> Option<&BTreeMap<String, String>> {
        self.resolved.get(node)
    }

    /// Resolve a single deferred reference.
    pub fn lookup(&self, value: &DeferredValue) -> Result<&str> {
        let attrs = self.resolved.get(&value.producer).ok_or_else(|| {
            Error::unresolved(
                &value.producer,
                &value.attribute,
                "producer has not been constructed yet",
            )
        })?;
        attrs
            .get(&value.attribute)
            .map(String::as_str)
            .ok_or_else(|| {
                Error::unresolved(
                    &value.producer,
                    &value.attribute,
                    "producer does not publish this attribute",
                )
            })
    }

    /// Resolve a property value into concrete JSON.
    pub fn resolve(&self, value: &PropertyValue) -> Result<serde_json::Value> {
        match value {
            PropertyValue::Literal(v) => Ok(v.clone()),
            PropertyValue::Deferred(d) => Ok(serde_json::Value::String(self.lookup(d)?.to_string())),
            PropertyValue::List(items) => items
                .iter()
                .map(|i| self.resolve(i))
                .collect::<Result<Vec<_>>>()
                .map(serde_json::Value::Array),
            PropertyValue::Map(entries) => {
                let mut map = serde_json::Map::new();
                for (key, v) in entries {
                    map.insert(key.clone(), self.resolve(v)?);
                }
                Ok(serde_json::Value::Object(map))
            }
            PropertyValue::Join(parts) => {
                let mut joined = String::new();
                for part in parts {
                    match self.resolve(part)? {
                        serde_json::Value::String(s) => joined.push_str(&s),
                        other => joined.push_str(&other.to_string()),
                    }
                }
                Ok(serde_json::Value::String(joined))
            }
        }
    }

    /// Resolve a property value that must produce a string.
    pub fn resolve_string(&self, value: &PropertyValue) -> Result<String> {
        match self.resolve(value)? {
            serde_json::Value::String(s) => Ok(s),
            other => Ok(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with_distribution() -> AttributeTable {
        let mut table = AttributeTable::new();
        table
            .publish(
                "Distribution",
                BTreeMap::from([("DomainName".to_string(), "d123.cloudfront.net".to_string())]),
            )
            .unwrap();
        table
    }

    #[test]
    fn test_resolve_before_producer_fails() {
        let table = AttributeTable::new();
        let err = table
            .resolve(&defer("Distribution", "DomainName").into())
            .unwrap_err();
        match err {
            Error::UnresolvedReference {
                producer,
                attribute,
                ..
            } => {
                assert_eq!(producer, "Distribution");
                assert_eq!(attribute, "DomainName");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_resolve_after_producer_is_stable() {
        let table = table_with_distribution();
        let value: PropertyValue = defer("Distribution", "DomainName").into();
        let first = table.resolve(&value).unwrap();
        let second = table.resolve(&value).unwrap();
        assert_eq!(first, "d123.cloudfront.net");
        assert_eq!(first, second);
    }

    #[test]
    fn test_republish_rejected() {
        let mut table = table_with_distribution();
        assert!(table.publish("Distribution", BTreeMap::new()).is_err());
        assert_eq!(
            table.lookup(&defer("Distribution", "DomainName")).unwrap(),
            "d123.cloudfront.net"
        );
    }

    #[test]
    fn test_unknown_attribute_fails() {
        let table = table_with_distribution();
        assert!(matches!(
            table.lookup(&defer("Distribution", "Nope")),
            Err(Error::UnresolvedReference { .. })
        ));
    }

    #[test]
    fn test_join_and_nested_resolution() {
        let table = table_with_distribution();
        let value = PropertyValue::map([
            (
                "Url",
                PropertyValue::join(["https://".into(), defer("Distribution", "DomainName").into()]),
            ),
            ("Aliases", PropertyValue::list(["app.example.com".into()])),
        ]);
        let resolved = table.resolve(&value).unwrap();
        assert_eq!(resolved["Url"], "https://d123.cloudfront.net");
        assert_eq!(resolved["Aliases"][0], "app.example.com");
    }

    #[test]
    fn test_references_collected_in_order() {
        let value = PropertyValue::map([
            ("A", defer("Bucket", "Arn").into()),
            (
                "B",
                PropertyValue::join(["x".into(), defer("Api", "ApiId").into()]),
            ),
        ]);
        let refs: Vec<_> = value.references().into_iter().map(|d| d.producer.as_str()).collect();
        assert_eq!(refs, vec!["Bucket", "Api"]);
    }
}
