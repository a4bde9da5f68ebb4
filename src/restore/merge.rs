//! Domain-aware merge rules used during conflict resolution.
//!
//! Products merge field-wise by id; history merges as an append-only set.
//! Local stock is authoritative because it reflects sales taken after the
//! snapshot being restored.

use chrono::Utc;
use serde_json::{json, Map, Value};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashSet};

/// Fields ignored when deciding whether two product records conflict.
const VOLATILE_FIELDS: &[&str] = &["last_modified", "updated_at"];

/// True when any product id present on both sides differs outside the
/// volatile fields. One-sided ids are not conflicts.
pub fn products_conflict(current: &Value, restore: &Value) -> bool {
    let (Some(current), Some(restore)) = (current.as_array(), restore.as_array()) else {
        return true;
    };
    let current_by_id = by_id(current);
    let restore_by_id = by_id(restore);

    current_by_id.iter().any(|(id, cur)| {
        restore_by_id
            .get(id)
            .is_some_and(|res| strip_volatile(cur) != strip_volatile(res))
    })
}

/// Merge the two product lists into a union. Ids on both sides merge
/// field-wise; restore-only ids are added and current-only ids kept as-is.
pub fn merge_products(current: &Value, restore: &Value) -> Value {
    let current_list = current.as_array().cloned().unwrap_or_default();
    let restore_list = restore.as_array().cloned().unwrap_or_default();
    let current_by_id = by_id(&current_list);

    let mut merged = Vec::new();
    let mut processed: HashSet<String> = HashSet::new();

    for product in &restore_list {
        let Some(obj) = product.as_object() else {
            continue;
        };
        let Some(id) = obj
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
        else {
            continue;
        };
        processed.insert(id.to_string());

        match current_by_id.get(id) {
            Some(cur) => {
                merged.push(Value::Object(merge_product(cur, obj)));
                tracing::info!(id, "Merged conflicting product");
            }
            None => merged.push(product.clone()),
        }
    }

    for (id, product) in &current_by_id {
        if !processed.contains(id) {
            merged.push(Value::Object((*product).clone()));
            tracing::info!(id = %id, "Kept current-only product");
        }
    }

    Value::Array(merged)
}

/// Merge one conflicting product pair: current `stock` always wins, current
/// `precio` wins when it numerically differs (annotated on the record),
/// everything else comes from the restore side.
fn merge_product(current: &Map<String, Value>, restore: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = restore.clone();

    if let Some(stock) = current.get("stock") {
        merged.insert("stock".into(), stock.clone());
    }

    if let (Some(cur), Some(res)) = (price_of(current), price_of(restore)) {
        if cur != res {
            if let Some(price) = current.get("precio") {
                merged.insert("precio".into(), price.clone());
            }
            merged.insert(
                "_conflict_note".into(),
                json!(format!(
                    "price conflict resolved: kept current {cur} over restored {res}"
                )),
            );
        }
    }

    merged.insert("_last_merged".into(), json!(Utc::now().to_rfc3339()));
    merged
}

/// Prices are stored as strings in the catalog; compare numerically so
/// "100" and "100.0" do not count as a conflict.
fn price_of(record: &Map<String, Value>) -> Option<f64> {
    match record.get("precio")? {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

fn strip_volatile(record: &Map<String, Value>) -> Map<String, Value> {
    record
        .iter()
        .filter(|(key, _)| !VOLATILE_FIELDS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

fn by_id(products: &[Value]) -> BTreeMap<String, &Map<String, Value>> {
    let mut map = BTreeMap::new();
    for product in products {
        if let Some(obj) = product.as_object() {
            if let Some(id) = obj.get("id").and_then(Value::as_str) {
                if !id.is_empty() {
                    map.insert(id.to_string(), obj);
                }
            }
        }
    }
    map
}

/// History conflicts only when the local list has entries the snapshot
/// predates; a shorter local list is covered by the restore side outright.
pub fn history_conflict(current: &Value, restore: &Value) -> bool {
    match (current.as_array(), restore.as_array()) {
        (Some(cur), Some(res)) => cur.len() > res.len(),
        _ => true,
    }
}

/// Union of both histories de-duplicated by entry signature, newest first.
pub fn merge_history(current: &Value, restore: &Value) -> Value {
    let mut merged: Vec<Value> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for side in [current, restore] {
        let Some(entries) = side.as_array() else {
            continue;
        };
        for entry in entries {
            let Some(obj) = entry.as_object() else {
                continue;
            };
            let signature = format!(
                "{}-{}-{}",
                text(obj, "fecha"),
                text(obj, "accion"),
                text(obj, "producto")
            );
            if seen.insert(signature) {
                merged.push(entry.clone());
            }
        }
    }

    merged.sort_by_key(|entry| {
        Reverse(
            entry
                .get("fecha")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        )
    });
    Value::Array(merged)
}

fn text(obj: &Map<String, Value>, key: &str) -> String {
    match obj.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_stock_and_fields_do_not_conflict() {
        let current = json!([{"id": "p1", "stock": 5, "precio": "100"}]);
        let restore = json!([{"id": "p1", "stock": 5, "precio": "100"}]);
        assert!(!products_conflict(&current, &restore));
    }

    #[test]
    fn volatile_fields_are_ignored_for_conflicts() {
        let current = json!([{"id": "p1", "stock": 5, "last_modified": "2024-02-01"}]);
        let restore = json!([{"id": "p1", "stock": 5, "last_modified": "2024-01-01"}]);
        assert!(!products_conflict(&current, &restore));
    }

    #[test]
    fn one_sided_ids_are_not_conflicts() {
        let current = json!([{"id": "p1", "stock": 5}]);
        let restore = json!([{"id": "p1", "stock": 5}, {"id": "p2", "stock": 1}]);
        assert!(!products_conflict(&current, &restore));
    }

    #[test]
    fn stock_difference_is_a_conflict_and_current_wins() {
        let current = json!([{"id": "p1", "stock": 5, "precio": "100"}]);
        let restore = json!([{"id": "p1", "stock": 10, "precio": "100"}]);
        assert!(products_conflict(&current, &restore));

        let merged = merge_products(&current, &restore);
        let record = merged[0].as_object().unwrap();
        assert_eq!(record["stock"], json!(5));
        assert!(record.get("_conflict_note").is_none());
        assert!(record.contains_key("_last_merged"));
    }

    #[test]
    fn differing_price_keeps_current_and_annotates() {
        let current = json!([{"id": "p1", "stock": 5, "precio": "120"}]);
        let restore = json!([{"id": "p1", "stock": 5, "precio": "100", "nombre": "Pelota"}]);

        let merged = merge_products(&current, &restore);
        let record = merged[0].as_object().unwrap();
        assert_eq!(record["precio"], json!("120"));
        assert_eq!(record["nombre"], json!("Pelota"));
        assert!(record["_conflict_note"]
            .as_str()
            .unwrap()
            .contains("kept current 120"));
    }

    #[test]
    fn equivalent_prices_do_not_annotate() {
        let current = json!([{"id": "p1", "stock": 5, "precio": "100.0"}]);
        let restore = json!([{"id": "p1", "stock": 3, "precio": "100"}]);

        let merged = merge_products(&current, &restore);
        let record = merged[0].as_object().unwrap();
        assert_eq!(record["precio"], json!("100"));
        assert!(record.get("_conflict_note").is_none());
    }

    #[test]
    fn union_keeps_both_one_sided_products() {
        let current = json!([{"id": "p1", "stock": 5}, {"id": "p2", "stock": 2}]);
        let restore = json!([{"id": "p1", "stock": 5}, {"id": "p3", "stock": 9}]);

        let merged = merge_products(&current, &restore);
        let ids: Vec<_> = merged
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(ids, ["p1", "p3", "p2"]);
    }

    #[test]
    fn longer_current_history_conflicts() {
        let current = json!([{"fecha": "2024-01-02"}, {"fecha": "2024-01-01"}]);
        let restore = json!([{"fecha": "2024-01-01"}]);
        assert!(history_conflict(&current, &restore));
        assert!(!history_conflict(&restore, &current));
    }

    #[test]
    fn history_merge_dedups_and_sorts_newest_first() {
        let current = json!([
            {"fecha": "2024-01-03", "accion": "venta", "producto": "p1"},
            {"fecha": "2024-01-01", "accion": "alta", "producto": "p1"},
        ]);
        let restore = json!([
            {"fecha": "2024-01-01", "accion": "alta", "producto": "p1"},
            {"fecha": "2024-01-02", "accion": "venta", "producto": "p2"},
        ]);

        let merged = merge_history(&current, &restore);
        let fechas: Vec<_> = merged
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["fecha"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(fechas, ["2024-01-03", "2024-01-02", "2024-01-01"]);
    }
}
