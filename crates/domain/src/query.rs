//! Generic named-field filters and updates shared by every store adapter.
//!
//! Adapters that cannot push a filter down to their backend evaluate it
//! in-process with [`Filter::matches`] and apply writes with
//! [`Update::apply`], so all stores agree on one semantics.

mod filter;
mod key;
mod template;
mod update;

pub use filter::{Comparison, FieldPredicate, Filter};
pub use key::{DocumentKey, KEY_FIELD};
pub use template::{FilterTemplate, TemplatePredicate, TemplateValue};
pub use update::{Update, UpdateOperation};

use serde_json::Value;

/// Resolves a dot-separated path inside a JSON document.
///
/// Numeric segments index into arrays, so `partitions.2.status` reads the
/// status of the third partition.
#[must_use]
pub fn lookup_path<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(document, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment
            .parse::<usize>()
            .ok()
            .and_then(|index| items.get(index)),
        _ => None,
    })
}
