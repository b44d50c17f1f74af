use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::ser::{Serialize, Serializer};

/// Format used whenever a timestamp crosses the template boundary. The
/// date-consuming helpers parse this same shape back.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

pub type MetaMap = BTreeMap<String, MetaValue>;

/// A normalized metadata value. Date-like keys are promoted to `Timestamp`
/// during metadata reading; everything else mirrors the JSON input.
#[derive(Debug, Clone, PartialEq)]
pub enum MetaValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Timestamp(NaiveDateTime),
    Seq(Vec<MetaValue>),
    Map(MetaMap),
}

impl MetaValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::String(value) => Some(value),
            _ => None,
        }
    }
}

impl Serialize for MetaValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            MetaValue::Null => serializer.serialize_unit(),
            MetaValue::Bool(value) => serializer.serialize_bool(*value),
            MetaValue::Int(value) => serializer.serialize_i64(*value),
            MetaValue::Float(value) => serializer.serialize_f64(*value),
            MetaValue::String(value) => serializer.serialize_str(value),
            MetaValue::Timestamp(value) => {
                serializer.serialize_str(&value.format(TIMESTAMP_FORMAT).to_string())
            }
            MetaValue::Seq(values) => values.serialize(serializer),
            MetaValue::Map(map) => map.serialize(serializer),
        }
    }
}

/// One source directory: its normalized metadata and its Markdown fragments,
/// each fragment keyed by file stem and already rendered to HTML.
#[derive(Debug, Default, Clone)]
pub struct ContentItem {
    pub meta: MetaMap,
    pub fragments: BTreeMap<String, String>,
}

impl ContentItem {
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.meta.get(key).and_then(MetaValue::as_str)
    }
}

impl Serialize for ContentItem {
    // Items travel through templates as `[meta, fragments]` pairs so that
    // date discovery can walk into the metadata of a nested item.
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (&self.meta, &self.fragments).serialize(serializer)
    }
}

/// The full content graph keyed by item id (POSIX-style path relative to the
/// source root, `.` for the root itself). Read-only once populated.
#[derive(Debug, Default)]
pub struct ContentGraph {
    pub items: BTreeMap<String, ContentItem>,
}

impl ContentGraph {
    pub fn get(&self, item_id: &str) -> Option<&ContentItem> {
        self.items.get(item_id)
    }

    /// Descendants of `item_id`: ids that extend it. The root id `.` is a
    /// prefix of every other id.
    pub fn children_of(&self, item_id: &str) -> BTreeMap<&str, &ContentItem> {
        self.items
            .iter()
            .filter(|(id, _)| {
                if item_id == "." {
                    id.as_str() != "."
                } else {
                    id.starts_with(item_id) && id.len() > item_id.len()
                }
            })
            .map(|(id, item)| (id.as_str(), item))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{ContentGraph, ContentItem};

    #[test]
    fn children_of_root_cover_all_other_items() {
        let mut graph = ContentGraph::default();
        graph.items.insert(".".to_string(), ContentItem::default());
        graph.items.insert("a".to_string(), ContentItem::default());
        graph.items.insert("a/b".to_string(), ContentItem::default());
        let children = graph.children_of(".");
        assert_eq!(children.keys().copied().collect::<Vec<_>>(), ["a", "a/b"]);
    }

    #[test]
    fn children_exclude_the_item_itself() {
        let mut graph = ContentGraph::default();
        graph.items.insert(".".to_string(), ContentItem::default());
        graph.items.insert("a".to_string(), ContentItem::default());
        graph.items.insert("a/b".to_string(), ContentItem::default());
        graph.items.insert("b".to_string(), ContentItem::default());
        let children = graph.children_of("a");
        assert_eq!(children.keys().copied().collect::<Vec<_>>(), ["a/b"]);
    }
}
