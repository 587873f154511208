// src/normalize/mod.rs
//! # Normalizer
//!
//! Maps one successful `FetchResult` into a `NormalizedRecord` using the mapping
//! table registered for its (source, category) pair. Pure: the only side effects
//! are a debug log and a skip counter when a payload lacks the minimum fields.
//!
//! A record may carry fields outside the requested category's group when the
//! payload provides them (a buoy reports air temperature next to sea state).

pub mod fields;
pub mod tables;
pub mod text;

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};

use crate::types::{Category, FetchResult, Location, Priority};
pub use fields::{Field, FieldKind, FieldValue, Group};
pub use tables::{MappingTable, TimeFormat};

/// One source's observation in the common schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub category: Category,
    pub source_id: String,
    pub priority: Priority,
    pub fields: BTreeMap<Field, FieldValue>,
    pub coordinates: Option<Location>,
    pub observed_at: DateTime<Utc>,
    pub quality_hint: Option<f64>,
    /// The provider answered for the queried point itself; a record without its
    /// own coordinates is then located on the target.
    #[serde(default)]
    pub point_scoped: bool,
}

impl NormalizedRecord {
    pub fn get(&self, field: Field) -> Option<&FieldValue> {
        self.fields.get(&field)
    }

    pub fn number(&self, field: Field) -> Option<f64> {
        self.get(field).and_then(FieldValue::as_number)
    }
}

/// Whether a field set is enough to stand as a record of `category`.
pub fn has_minimum_fields(category: Category, fields: &BTreeMap<Field, FieldValue>) -> bool {
    let has = |f: Field| fields.contains_key(&f);
    match category {
        Category::Weather => has(Field::Temperature),
        Category::Ocean => has(Field::SeaSurfaceTemperature) || has(Field::WaveHeight),
        Category::Satellite => has(Field::ImageUrl),
        Category::Events => {
            let non_empty = |f: Field| {
                fields
                    .get(&f)
                    .and_then(FieldValue::as_list)
                    .is_some_and(|l| !l.is_empty())
            };
            non_empty(Field::Events) || non_empty(Field::Alerts)
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    tables: HashMap<(String, Category), MappingTable>,
    fallback: MappingTable,
}

impl Normalizer {
    /// Built-in tables for the seeded providers plus the canonical fallback.
    pub fn builtin() -> Self {
        let mut n = Self {
            tables: HashMap::new(),
            fallback: MappingTable::canonical(),
        };
        for (source, category, table) in tables::builtin() {
            n.tables.insert((source.to_string(), category), table);
        }
        n
    }

    /// Add or replace the table for one (source, category) pair.
    pub fn with_table(mut self, source: &str, category: Category, table: MappingTable) -> Self {
        self.tables.insert((source.to_string(), category), table);
        self
    }

    pub fn table_for(&self, source: &str, category: Category) -> &MappingTable {
        self.tables
            .get(&(source.to_string(), category))
            .unwrap_or(&self.fallback)
    }

    /// `None` when the fetch failed or the payload lacks the category's minimum fields.
    pub fn normalize(&self, res: &FetchResult, category: Category) -> Option<NormalizedRecord> {
        let payload = match (&res.payload, res.success) {
            (Some(p), true) => p,
            _ => return None,
        };
        let table = self.table_for(&res.source_id, category);

        let fields: BTreeMap<Field, FieldValue> = table.extract_fields(payload).into_iter().collect();
        if !has_minimum_fields(category, &fields) {
            tracing::debug!(
                target: "normalize",
                source = %res.source_id,
                category = %category,
                present = fields.len(),
                "payload lacks minimum fields; skipping"
            );
            counter!("fusion_normalization_skipped_total", "source" => res.source_id.clone()).increment(1);
            return None;
        }

        Some(NormalizedRecord {
            category,
            source_id: res.source_id.clone(),
            priority: res.priority,
            fields,
            coordinates: table.extract_coordinates(payload),
            observed_at: table.extract_time(payload).unwrap_or(res.fetched_at),
            quality_hint: table.extract_quality_hint(payload),
            point_scoped: table.point_scoped,
        })
    }
}
