//! Merge algorithms over JSON values.
//!
//! All functions are total: every combination of null, bool, number, string,
//! array and object input produces a value. Where the two sides cannot be
//! reconciled field by field the server value is taken.

use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::sync::types::ArrayMergeStrategy;

/// Structural equality used by the merge algorithms.
///
/// Numbers compare by numeric value, so `1` equals `1.0`.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => {
            if x == y {
                return true;
            }
            match (x.as_f64(), y.as_f64()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            }
        }
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| values_equal(a, b))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).map_or(false, |other| values_equal(v, other)))
        }
        _ => false,
    }
}

fn options_equal(a: Option<&Value>, b: Option<&Value>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => values_equal(a, b),
        (None, None) => true,
        _ => false,
    }
}

/// Field union of two objects, server fields winning on collision.
///
/// When either side is not an object the server value is returned.
pub fn shallow_merge(client: &Value, server: &Value) -> Value {
    match (client, server) {
        (Value::Object(c), Value::Object(s)) => {
            let mut merged = c.clone();
            for (key, value) in s {
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        }
        _ => server.clone(),
    }
}

/// Three-way merge of `client` and `server` against their common ancestor.
///
/// Per field: equal on both sides keeps it, a change on one side only takes
/// that side, and a change on both sides recurses into nested objects or
/// otherwise takes the server value. Missing fields count as values, so a
/// one-sided deletion is honoured.
pub fn three_way_merge(client: &Value, server: &Value, base: &Value) -> Value {
    merge_field(Some(client), Some(server), Some(base)).unwrap_or(Value::Null)
}

fn merge_field(client: Option<&Value>, server: Option<&Value>, base: Option<&Value>) -> Option<Value> {
    if options_equal(client, server) {
        return client.cloned();
    }
    if options_equal(client, base) {
        return server.cloned();
    }
    if options_equal(server, base) {
        return client.cloned();
    }

    match (client, server) {
        (Some(Value::Object(c)), Some(Value::Object(s))) => {
            let base = base.and_then(Value::as_object);
            Some(Value::Object(merge_objects_three_way(c, s, base)))
        }
        _ => server.cloned(),
    }
}

fn merge_objects_three_way(
    client: &Map<String, Value>,
    server: &Map<String, Value>,
    base: Option<&Map<String, Value>>,
) -> Map<String, Value> {
    let mut keys: BTreeSet<&String> = client.keys().chain(server.keys()).collect();
    if let Some(base) = base {
        keys.extend(base.keys());
    }

    let mut merged = Map::new();
    for key in keys {
        let field = merge_field(
            client.get(key),
            server.get(key),
            base.and_then(|b| b.get(key)),
        );
        if let Some(value) = field {
            merged.insert(key.clone(), value);
        }
    }
    merged
}

/// Custom combination of one field: `(client, server) -> merged`.
pub type FieldMergeFn = Arc<dyn Fn(&Value, &Value) -> Value + Send + Sync>;

/// Settings for [`structural_merge`].
///
/// Field mergers are keyed by dotted path (`"meta.tags"`); items of an array
/// at `path` are addressed as `"path[]"`.
#[derive(Clone, Default)]
pub struct StructuralMergeOptions {
    pub array_strategy: ArrayMergeStrategy,
    field_mergers: HashMap<String, FieldMergeFn>,
}

impl StructuralMergeOptions {
    pub fn new(array_strategy: ArrayMergeStrategy) -> Self {
        Self {
            array_strategy,
            field_mergers: HashMap::new(),
        }
    }

    pub fn with_field_merger<F>(mut self, path: impl Into<String>, merge: F) -> Self
    where
        F: Fn(&Value, &Value) -> Value + Send + Sync + 'static,
    {
        self.field_mergers.insert(path.into(), Arc::new(merge));
        self
    }

    pub fn set_field_merger(&mut self, path: impl Into<String>, merge: FieldMergeFn) {
        self.field_mergers.insert(path.into(), merge);
    }

    fn merger_for(&self, path: &str) -> Option<&FieldMergeFn> {
        if path.is_empty() {
            None
        } else {
            self.field_mergers.get(path)
        }
    }
}

impl fmt::Debug for StructuralMergeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut paths: Vec<&String> = self.field_mergers.keys().collect();
        paths.sort();
        f.debug_struct("StructuralMergeOptions")
            .field("array_strategy", &self.array_strategy)
            .field("field_mergers", &paths)
            .finish()
    }
}

/// Recursive merge honouring per-field merge functions and the array mode.
///
/// Objects are merged key by key (keys present on one side only are kept);
/// scalars and mismatched types take the server value.
pub fn structural_merge(client: &Value, server: &Value, options: &StructuralMergeOptions) -> Value {
    merge_at(client, server, options, "")
}

fn child_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", path, key)
    }
}

fn merge_at(client: &Value, server: &Value, options: &StructuralMergeOptions, path: &str) -> Value {
    if let Some(merge) = options.merger_for(path) {
        return merge(client, server);
    }

    match (client, server) {
        (Value::Object(c), Value::Object(s)) => {
            let mut merged = c.clone();
            for (key, server_value) in s {
                let value = match c.get(key) {
                    Some(client_value) => {
                        merge_at(client_value, server_value, options, &child_path(path, key))
                    }
                    None => server_value.clone(),
                };
                merged.insert(key.clone(), value);
            }
            Value::Object(merged)
        }
        (Value::Array(c), Value::Array(s)) => Value::Array(merge_arrays(c, s, options, path)),
        _ => server.clone(),
    }
}

fn item_id(item: &Value) -> Option<&Value> {
    item.as_object().and_then(|o| o.get("id"))
}

fn merge_arrays(
    client: &[Value],
    server: &[Value],
    options: &StructuralMergeOptions,
    path: &str,
) -> Vec<Value> {
    match options.array_strategy {
        ArrayMergeStrategy::Replace => server.to_vec(),
        ArrayMergeStrategy::Append => {
            let mut merged: Vec<Value> = Vec::with_capacity(client.len() + server.len());
            for item in client.iter().chain(server) {
                if !merged.iter().any(|existing| values_equal(existing, item)) {
                    merged.push(item.clone());
                }
            }
            merged
        }
        ArrayMergeStrategy::Merge => {
            let item_path = format!("{}[]", path);
            let keyed = client.iter().chain(server).all(|item| item_id(item).is_some());
            if keyed {
                merge_arrays_by_id(client, server, options, &item_path)
            } else {
                merge_arrays_positionally(client, server, options, &item_path)
            }
        }
    }
}

fn merge_arrays_by_id(
    client: &[Value],
    server: &[Value],
    options: &StructuralMergeOptions,
    item_path: &str,
) -> Vec<Value> {
    let mut merged: Vec<Value> = Vec::with_capacity(client.len().max(server.len()));
    let mut seen: Vec<&Value> = Vec::new();

    for server_item in server {
        let Some(id) = item_id(server_item) else {
            continue;
        };
        if seen.iter().any(|s| values_equal(s, id)) {
            continue;
        }
        seen.push(id);

        let matched = client
            .iter()
            .find(|c| item_id(c).map_or(false, |cid| values_equal(cid, id)));
        merged.push(match matched {
            Some(client_item) => merge_at(client_item, server_item, options, item_path),
            None => server_item.clone(),
        });
    }

    for client_item in client {
        let Some(id) = item_id(client_item) else {
            continue;
        };
        if seen.iter().any(|s| values_equal(s, id)) {
            continue;
        }
        seen.push(id);
        merged.push(client_item.clone());
    }

    merged
}

fn merge_arrays_positionally(
    client: &[Value],
    server: &[Value],
    options: &StructuralMergeOptions,
    item_path: &str,
) -> Vec<Value> {
    let len = client.len().max(server.len());
    (0..len)
        .filter_map(|i| match (client.get(i), server.get(i)) {
            (Some(c), Some(s)) => Some(merge_at(c, s, options, item_path)),
            (Some(c), None) => Some(c.clone()),
            (None, Some(s)) => Some(s.clone()),
            (None, None) => None,
        })
        .collect()
}

/// One change between two JSON documents.
#[derive(Debug, Clone, PartialEq)]
pub enum Patch {
    Set { path: Vec<String>, value: Value },
    Remove { path: Vec<String> },
}

impl Patch {
    pub fn path(&self) -> &[String] {
        match self {
            Patch::Set { path, .. } | Patch::Remove { path } => path,
        }
    }
}

/// Changes turning `base` into `target`.
///
/// Objects are diffed key by key; arrays and scalars are replaced whole.
pub fn diff(base: &Value, target: &Value) -> Vec<Patch> {
    let mut patches = Vec::new();
    let mut path = Vec::new();
    diff_into(base, target, &mut path, &mut patches);
    patches
}

fn diff_into(base: &Value, target: &Value, path: &mut Vec<String>, patches: &mut Vec<Patch>) {
    match (base, target) {
        (Value::Object(b), Value::Object(t)) => {
            for (key, target_value) in t {
                path.push(key.clone());
                match b.get(key) {
                    Some(base_value) => diff_into(base_value, target_value, path, patches),
                    None => patches.push(Patch::Set {
                        path: path.clone(),
                        value: target_value.clone(),
                    }),
                }
                path.pop();
            }
            for key in b.keys().filter(|k| !t.contains_key(*k)) {
                let mut removed = path.clone();
                removed.push(key.clone());
                patches.push(Patch::Remove { path: removed });
            }
        }
        _ if values_equal(base, target) => {}
        _ => patches.push(Patch::Set {
            path: path.clone(),
            value: target.clone(),
        }),
    }
}

/// Applies a patch, creating intermediate objects as needed.
pub fn apply_patch(document: &mut Value, patch: &Patch) {
    let path = patch.path();
    let Some((last, parents)) = path.split_last() else {
        *document = match patch {
            Patch::Set { value, .. } => value.clone(),
            Patch::Remove { .. } => Value::Null,
        };
        return;
    };

    let mut node = document;
    for key in parents {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        let Some(map) = node.as_object_mut() else {
            return;
        };
        node = map
            .entry(key.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    if !node.is_object() {
        if matches!(patch, Patch::Remove { .. }) {
            return;
        }
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        match patch {
            Patch::Set { value, .. } => {
                map.insert(last.clone(), value.clone());
            }
            Patch::Remove { .. } => {
                map.remove(last);
            }
        }
    }
}

fn lookup<'a>(document: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(document, |node, key| node.get(key))
}

/// Differential merge: applies base→client then base→server onto the base.
///
/// Server changes therefore win wherever both sides touched the same field,
/// except for string fields changed differently on both sides, which get a
/// line-based merge instead of an overwrite.
pub fn differential_merge(client: &Value, server: &Value, base: &Value) -> Value {
    let client_patches = diff(base, client);
    let server_patches = diff(base, server);

    let mut merged = base.clone();
    for patch in client_patches.iter().chain(&server_patches) {
        apply_patch(&mut merged, patch);
    }

    for patch in &client_patches {
        let Patch::Set {
            path,
            value: Value::String(client_text),
        } = patch
        else {
            continue;
        };
        let server_text = server_patches.iter().find_map(|p| match p {
            Patch::Set {
                path: p_path,
                value: Value::String(text),
            } if p_path == path => Some(text),
            _ => None,
        });
        let Some(server_text) = server_text else {
            continue;
        };
        if client_text == server_text {
            continue;
        }

        let base_text = lookup(base, path).and_then(Value::as_str).unwrap_or("");
        let text = merge_text_lines(base_text, client_text, server_text);
        apply_patch(
            &mut merged,
            &Patch::Set {
                path: path.clone(),
                value: Value::String(text),
            },
        );
    }

    merged
}

/// Line union of a text edited on both sides.
///
/// Keeps the base lines, then appends lines the client added, then lines
/// the server added, skipping lines already present.
pub fn merge_text_lines(base: &str, client: &str, server: &str) -> String {
    let base_lines: Vec<&str> = base.lines().collect();
    let mut merged = base_lines.clone();

    for line in client.lines().chain(server.lines()) {
        if !base_lines.contains(&line) && !merged.contains(&line) {
            merged.push(line);
        }
    }

    merged.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_values_equal_semantics() {
        assert!(values_equal(&json!(1), &json!(1.0)));
        assert!(values_equal(&json!([1, {"a": "x"}]), &json!([1, {"a": "x"}])));
        assert!(!values_equal(&json!([1, 2]), &json!([2, 1])));
        assert!(!values_equal(&json!({"a": 1}), &json!({"a": 1, "b": 2})));
        assert!(!values_equal(&json!(null), &json!(false)));
        assert!(!values_equal(&json!("1"), &json!(1)));
    }

    #[test]
    fn test_shallow_merge_server_wins() {
        let merged = shallow_merge(
            &json!({"title": "A", "count": 5, "local": true}),
            &json!({"title": "B", "count": 5}),
        );
        assert_eq!(merged, json!({"title": "B", "count": 5, "local": true}));
    }

    #[test]
    fn test_three_way_single_sided_changes() {
        let base = json!({"title": "Old", "status": "open", "points": 1});
        let client = json!({"title": "New", "status": "open", "points": 1});
        let server = json!({"title": "Old", "status": "done", "points": 1});

        assert_eq!(
            three_way_merge(&client, &server, &base),
            json!({"title": "New", "status": "done", "points": 1})
        );
    }

    #[test]
    fn test_three_way_conflicting_scalar_takes_server() {
        let base = json!({"title": "Old"});
        let merged = three_way_merge(&json!({"title": "Mine"}), &json!({"title": "Theirs"}), &base);
        assert_eq!(merged, json!({"title": "Theirs"}));
    }

    #[test]
    fn test_three_way_recurses_into_nested_objects() {
        let base = json!({"meta": {"color": "red", "size": 1}});
        let client = json!({"meta": {"color": "blue", "size": 1}});
        let server = json!({"meta": {"color": "red", "size": 2}});

        assert_eq!(
            three_way_merge(&client, &server, &base),
            json!({"meta": {"color": "blue", "size": 2}})
        );
    }

    #[test]
    fn test_three_way_does_not_recurse_into_arrays() {
        let base = json!({"tags": ["a"]});
        let merged = three_way_merge(&json!({"tags": ["a", "b"]}), &json!({"tags": ["a", "c"]}), &base);
        assert_eq!(merged, json!({"tags": ["a", "c"]}));
    }

    #[test]
    fn test_three_way_honours_one_sided_deletion() {
        let base = json!({"title": "x", "note": "remove me"});
        let client = json!({"title": "x"});
        let server = json!({"title": "x", "note": "remove me", "extra": 1});

        assert_eq!(three_way_merge(&client, &server, &base), json!({"title": "x", "extra": 1}));
    }

    #[test]
    fn test_structural_append_dedupes() {
        let options = StructuralMergeOptions::new(ArrayMergeStrategy::Append);
        let merged = structural_merge(
            &json!({"tags": ["a", "b"]}),
            &json!({"tags": ["b", "c"]}),
            &options,
        );
        assert_eq!(merged, json!({"tags": ["a", "b", "c"]}));
    }

    #[test]
    fn test_structural_replace_takes_server_array() {
        let options = StructuralMergeOptions::new(ArrayMergeStrategy::Replace);
        let merged = structural_merge(&json!({"tags": ["a"]}), &json!({"tags": ["z"]}), &options);
        assert_eq!(merged, json!({"tags": ["z"]}));
    }

    #[test]
    fn test_structural_merge_by_id() {
        let options = StructuralMergeOptions::new(ArrayMergeStrategy::Merge);
        let client = json!({"items": [
            {"id": 1, "name": "client-one", "done": true},
            {"id": 3, "name": "client-only"}
        ]});
        let server = json!({"items": [
            {"id": 2, "name": "server-only"},
            {"id": 1, "name": "server-one"}
        ]});

        let merged = structural_merge(&client, &server, &options);
        assert_eq!(
            merged,
            json!({"items": [
                {"id": 2, "name": "server-only"},
                {"id": 1, "name": "server-one", "done": true},
                {"id": 3, "name": "client-only"}
            ]})
        );
    }

    #[test]
    fn test_structural_merge_every_id_once() {
        let options = StructuralMergeOptions::default();
        let client: Vec<Value> = (0..6).map(|i| json!({"id": i, "v": "c"})).collect();
        let server: Vec<Value> = (3..9).map(|i| json!({"id": i, "v": "s"})).collect();

        let merged = structural_merge(&Value::Array(client), &Value::Array(server), &options);
        let items = merged.as_array().unwrap();
        let mut ids: Vec<i64> = items.iter().map(|i| i["id"].as_i64().unwrap()).collect();
        ids.sort_unstable();
        assert_eq!(ids, (0..9).collect::<Vec<_>>());
        for item in items {
            let id = item["id"].as_i64().unwrap();
            let expected = if id >= 3 { "s" } else { "c" };
            assert_eq!(item["v"], json!(expected));
        }
    }

    #[test]
    fn test_structural_merge_positional_without_ids() {
        let options = StructuralMergeOptions::default();
        let merged = structural_merge(
            &json!([{"a": 1}, {"b": 2}, "extra"]),
            &json!([{"a": 9, "c": 3}]),
            &options,
        );
        assert_eq!(merged, json!([{"a": 9, "c": 3}, {"b": 2}, "extra"]));
    }

    #[test]
    fn test_structural_field_merger() {
        let options = StructuralMergeOptions::default().with_field_merger("stats.views", |c, s| {
            json!(c.as_i64().unwrap_or(0).max(s.as_i64().unwrap_or(0)))
        });
        let merged = structural_merge(
            &json!({"stats": {"views": 10, "likes": 1}}),
            &json!({"stats": {"views": 7, "likes": 2}}),
            &options,
        );
        assert_eq!(merged, json!({"stats": {"views": 10, "likes": 2}}));
    }

    #[test]
    fn test_diff_and_apply() {
        let base = json!({"a": 1, "b": {"c": 2, "d": 3}, "gone": true});
        let target = json!({"a": 1, "b": {"c": 5, "d": 3}, "new": [1]});
        let patches = diff(&base, &target);

        assert_eq!(
            patches,
            vec![
                Patch::Set {
                    path: vec!["b".to_string(), "c".to_string()],
                    value: json!(5)
                },
                Patch::Set {
                    path: vec!["new".to_string()],
                    value: json!([1])
                },
                Patch::Remove {
                    path: vec!["gone".to_string()]
                },
            ]
        );

        let mut doc = base.clone();
        for patch in &patches {
            apply_patch(&mut doc, patch);
        }
        assert_eq!(doc, target);
    }

    #[test]
    fn test_differential_server_wins_on_overlap() {
        let base = json!({"priority": 1, "estimate": 3, "done": false});
        let client = json!({"priority": 2, "estimate": 5, "done": false});
        let server = json!({"priority": 4, "estimate": 3, "done": true});

        assert_eq!(
            differential_merge(&client, &server, &base),
            json!({"priority": 4, "estimate": 5, "done": true})
        );
    }

    #[test]
    fn test_differential_line_merges_text() {
        let base = json!({"body": "line one\nline two"});
        let client = json!({"body": "line one\nline two\nclient line"});
        let server = json!({"body": "line one\nserver line\nline two"});

        assert_eq!(
            differential_merge(&client, &server, &base),
            json!({"body": "line one\nline two\nclient line\nserver line"})
        );
    }

    #[test]
    fn test_merge_text_lines_without_base() {
        assert_eq!(merge_text_lines("", "a\nb", "b\nc"), "a\nb\nc");
    }
}
