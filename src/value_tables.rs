use std::collections::HashMap;

use serde::{Deserialize, Deserializer};

use crate::ordered::OrderedMap;

/// A named enumeration: raw code (as written in the catalog) to display label, in catalog order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValueTable {
    entries: Vec<(String, String)>,
}

impl ValueTable {
    /// Build a table from `(code, label)` pairs. Repeated codes keep their first label.
    pub fn from_entries<C, L>(entries: impl IntoIterator<Item = (C, L)>) -> Self
    where
        C: Into<String>,
        L: Into<String>,
    {
        let mut table = Self::default();
        for (code, label) in entries {
            let code = code.into();
            if table.label_of(&code).is_none() {
                table.entries.push((code, label.into()));
            }
        }
        table
    }

    pub fn label_of(&self, code: &str) -> Option<&str> {
        self.entries.iter().find(|(c, _)| c == code).map(|(_, l)| l.as_str())
    }

    /// The first code carrying `label`.
    pub fn code_of(&self, label: &str) -> Option<&str> {
        self.entries.iter().find(|(_, l)| l == label).map(|(c, _)| c.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(c, l)| (c.as_str(), l.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'de> Deserialize<'de> for ValueTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Generated catalogs occasionally carry numeric labels; keep them as their JSON text.
        let OrderedMap(entries) = OrderedMap::<serde_json::Value>::deserialize(deserializer)?;
        Ok(Self::from_entries(entries.into_iter().map(|(code, label)| {
            let label = match label {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            (code, label)
        })))
    }
}

/// Every value table of one catalog location. Read-only once loaded.
#[derive(Clone, Debug, Default)]
pub struct ValueTables {
    tables: HashMap<String, ValueTable>,
}

impl ValueTables {
    pub fn lookup(&self, name: &str) -> Option<&ValueTable> {
        self.tables.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }
}

impl FromIterator<(String, ValueTable)> for ValueTables {
    fn from_iter<I: IntoIterator<Item = (String, ValueTable)>>(iter: I) -> Self {
        Self { tables: iter.into_iter().collect() }
    }
}

/// On-disk shape of `value_tables.json`.
#[derive(Deserialize)]
pub(crate) struct ValueTablesDocument {
    #[serde(default)]
    value_tables: HashMap<String, ValueTable>,
}

impl From<ValueTablesDocument> for ValueTables {
    fn from(document: ValueTablesDocument) -> Self {
        Self { tables: document.value_tables }
    }
}
