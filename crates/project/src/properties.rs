//! Helpers for the nested key/value trees carried by nodes and edges.
//! 節點與連線所攜帶之巢狀屬性樹的輔助函式。

use std::collections::BTreeSet;

use serde_json::{Map, Value};

/// Arbitrary nested key/value tree attached to a node or edge.
pub type Properties = Map<String, Value>;

const PATH_SEPARATOR: char = '.';

/// Collects every leaf path (`a.b.c`) across the given property trees, sorted and
/// de-duplicated. Arrays count as leaves; empty objects contribute nothing.
/// 蒐集所有屬性樹的葉節點路徑（已排序且去重）。
pub fn flatten_property_keys<'a, I>(trees: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a Properties>,
{
    let mut keys = BTreeSet::new();
    for tree in trees {
        collect_leaves(tree, None, &mut keys);
    }
    keys.into_iter().collect()
}

fn collect_leaves(tree: &Properties, prefix: Option<&str>, keys: &mut BTreeSet<String>) {
    for (key, value) in tree {
        let path = match prefix {
            Some(prefix) => format!("{prefix}{PATH_SEPARATOR}{key}"),
            None => key.clone(),
        };
        match value {
            Value::Object(child) => collect_leaves(child, Some(&path), keys),
            _ => {
                keys.insert(path);
            }
        }
    }
}

/// Reads the value stored at a dotted path.
/// 讀取點分路徑上的值。
pub fn property_at<'a>(tree: &'a Properties, path: &str) -> Option<&'a Value> {
    let mut segments = path.split(PATH_SEPARATOR);
    let first = segments.next()?;
    let mut current = tree.get(first)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Writes `value` at a dotted path, creating intermediate objects as needed.
/// Intermediate scalars on the path are replaced by objects.
/// 依點分路徑寫入值，必要時建立中間物件。
pub fn set_property_path(tree: &mut Properties, path: &str, value: Value) {
    let segments: Vec<&str> = path.split(PATH_SEPARATOR).collect();
    let Some((last, parents)) = segments.split_last() else {
        return;
    };

    let mut current = tree;
    for segment in parents {
        let slot = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        current = match slot {
            Value::Object(map) => map,
            _ => return,
        };
    }
    current.insert(last.to_string(), value);
}
