//! Display names for linked records, and the board query built on them.
//!
//! Review records link to other tables (customers, technicians, branches…)
//! by record id. A [`NameDirectory`] maps those ids to human names so the
//! board can show, search and filter by them. Ids missing from the directory
//! are shown as-is.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use reviewsync_core::{BoardConfig, FieldValue, Record, RecordId};

/// Human label for a record of a linked table.
///
/// The first non-blank `name_fields` text wins, then the first non-blank
/// text field, then the first entry of a text list, then the record id.
pub fn display_name(record: &Record, name_fields: &[String]) -> String {
    let preferred = name_fields
        .iter()
        .filter_map(|name| record.text(name))
        .map(str::trim)
        .find(|text| !text.is_empty());
    if let Some(name) = preferred {
        return name.to_string();
    }

    let any_text = record
        .fields
        .values()
        .filter_map(FieldValue::as_text)
        .map(str::trim)
        .find(|text| !text.is_empty());
    if let Some(name) = any_text {
        return name.to_string();
    }

    let first_listed = record.fields.values().find_map(|value| match value {
        FieldValue::Links(items) => items
            .first()
            .map(|item| item.as_str().trim())
            .filter(|item| !item.is_empty()),
        _ => None,
    });
    match first_listed {
        Some(name) => name.to_string(),
        None => record.id.to_string(),
    }
}

/// Linked-record names plus the board's filter fields.
#[derive(Debug, Clone, Default)]
pub struct NameDirectory {
    /// Link field → linked table.
    field_tables: HashMap<String, String>,
    /// Linked table → record id → display name.
    names: HashMap<String, HashMap<RecordId, String>>,
    tech_fields: Vec<String>,
    branch_fields: Vec<String>,
}

impl NameDirectory {
    /// Empty directory wired to `board`'s link fields.
    pub fn new(board: &BoardConfig) -> Self {
        let field_tables = board
            .links
            .iter()
            .flat_map(|link| {
                link.fields
                    .iter()
                    .map(move |field| (field.clone(), link.table_id.clone()))
            })
            .collect();
        Self {
            field_tables,
            names: HashMap::new(),
            tech_fields: board.tech_fields.clone(),
            branch_fields: board.branch_fields.clone(),
        }
    }

    /// Replace the names of one linked table.
    pub fn insert_table(&mut self, table_id: &str, records: &[Record], name_fields: &[String]) {
        let names = records
            .iter()
            .map(|record| (record.id.clone(), display_name(record, name_fields)))
            .collect();
        self.names.insert(table_id.to_string(), names);
    }

    /// Keep `table_id`'s names from `previous`, if it had any.
    pub fn carry_table(&mut self, table_id: &str, previous: &NameDirectory) {
        if let Some(names) = previous.names.get(table_id) {
            self.names.insert(table_id.to_string(), names.clone());
        }
    }

    /// Total resolvable ids.
    pub fn len(&self) -> usize {
        self.names.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Name of `id` as linked from `field`.
    pub fn name(&self, field: &str, id: &RecordId) -> Option<&str> {
        let table = self.field_tables.get(field)?;
        self.names.get(table)?.get(id).map(String::as_str)
    }

    /// Display strings for one field value. Ids in a link field become names
    /// (the id itself when unknown); text lists and text pass through.
    pub fn resolve(&self, field: &str, value: &FieldValue) -> Vec<String> {
        match value {
            FieldValue::Links(ids) => ids
                .iter()
                .map(|id| self.name(field, id).unwrap_or(id.as_str()).to_string())
                .collect(),
            FieldValue::Text(text) if text.trim().is_empty() => Vec::new(),
            other => vec![other.to_string()],
        }
    }

    /// Resolved names of every non-blank link field on `record`.
    pub fn linked_names(&self, record: &Record) -> BTreeMap<String, Vec<String>> {
        record
            .fields
            .iter()
            .filter(|(field, value)| self.field_tables.contains_key(*field) && !value.is_blank())
            .map(|(field, value)| (field.clone(), self.resolve(field, value)))
            .collect()
    }

    /// Names from the first non-blank of `fields`.
    pub fn names_in(&self, record: &Record, fields: &[String]) -> Vec<String> {
        fields
            .iter()
            .find_map(|field| {
                record
                    .field(field)
                    .filter(|value| !value.is_blank())
                    .map(|value| self.resolve(field, value))
            })
            .unwrap_or_default()
    }

    pub fn tech_names(&self, record: &Record) -> Vec<String> {
        self.names_in(record, &self.tech_fields)
    }

    pub fn branch_names(&self, record: &Record) -> Vec<String> {
        self.names_in(record, &self.branch_fields)
    }

    /// Whether `record` passes every filter in `query`.
    pub fn matches(&self, record: &Record, query: &BoardQuery) -> bool {
        if let Some(tech) = query.tech() {
            if !self.tech_names(record).iter().any(|name| same_name(name, tech)) {
                return false;
            }
        }
        if let Some(branch) = query.branch() {
            if !self.branch_names(record).iter().any(|name| same_name(name, branch)) {
                return false;
            }
        }
        match query.search() {
            Some(needle) => self.contains_text(record, &needle.to_lowercase()),
            None => true,
        }
    }

    /// Case-insensitive substring match over the id, every field value and
    /// every resolved linked name. `needle` is already lowercase.
    fn contains_text(&self, record: &Record, needle: &str) -> bool {
        if record.id.as_str().to_lowercase().contains(needle) {
            return true;
        }
        record.fields.iter().any(|(field, value)| {
            value.to_string().to_lowercase().contains(needle)
                || self
                    .resolve(field, value)
                    .iter()
                    .any(|name| name.to_lowercase().contains(needle))
        })
    }

    pub fn view(&self, record: Record) -> ResolvedRecord {
        let names = self.linked_names(&record);
        ResolvedRecord { record, names }
    }
}

fn same_name(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// Filters for a board listing. Blank values are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    /// Exact technician name, case-insensitive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tech: Option<String>,
    /// Exact branch name, case-insensitive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

impl BoardQuery {
    fn search(&self) -> Option<&str> {
        non_blank(&self.search)
    }

    fn tech(&self) -> Option<&str> {
        non_blank(&self.tech)
    }

    fn branch(&self) -> Option<&str> {
        non_blank(&self.branch)
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// A record with the names behind its link fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedRecord {
    #[serde(flatten)]
    pub record: Record,
    /// Link field → display names, in link order.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub names: BTreeMap<String, Vec<String>>,
}
