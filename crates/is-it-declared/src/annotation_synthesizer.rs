//! Builds the corrected declared-exceptions annotation for the annotate fix.
//!
//! Synthesis is pure: it returns a new [`ThrowsAnnotation`] and leaves substituting it into the source to the
//! editing boundary. Existing entries are never dropped, including ones that are not class literals.

use crate::throws_annotation::{ThrowsAnnotation, ThrowsEntry};
use crate::type_resolver::ExceptionType;

pub const DEFAULT_ANNOTATION_NAME: &str = "Throws";

/// Existing entries in first-occurrence order, deduplicated by simple name, with `new_simple_name` appended
/// when it is not already present.
pub fn synthesize_annotation(existing: Option<&ThrowsAnnotation>, new_simple_name: &str) -> ThrowsAnnotation {
  synthesize_all(existing, [new_simple_name])
}

pub fn synthesize_for_type(existing: Option<&ThrowsAnnotation>, new_type: &ExceptionType) -> ThrowsAnnotation {
  synthesize_annotation(existing, &new_type.simple_name)
}

/// Same as [`synthesize_annotation`] for several names at once, appended in the given order.
pub fn synthesize_all<'n>(
  existing: Option<&ThrowsAnnotation>,
  new_simple_names: impl IntoIterator<Item = &'n str>,
) -> ThrowsAnnotation {
  let name = existing.map_or(DEFAULT_ANNOTATION_NAME, |a| a.name.as_str());
  let carried = existing.into_iter().flat_map(|a| a.entries.iter().cloned());
  let added = new_simple_names
    .into_iter()
    .filter(|n| !n.is_empty())
    .map(ThrowsEntry::class_ref);
  let mut annotation = ThrowsAnnotation::new(name, carried.chain(added));
  if let Some(existing) = existing {
    annotation.span = existing.span;
    annotation.form = existing.form;
  }
  annotation
}
