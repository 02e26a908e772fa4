//! The declared-exceptions annotation (`@Throws(A::class, B::class)`) as an ordered unique list of entries.
//!
//! A Java `throws A, B` clause is read into the same shape so Java callers are checked the same way.

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::AnnotationError;
use crate::settings::UserSettings;
use crate::syntax::{NodeId, NodeKind, Span, SyntaxTree};

/// One argument of the annotation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ThrowsEntry {
  /// A class literal `Name::class`; holds `Name` as written (possibly qualified).
  ClassRef(String),
  /// Argument text that is not a class literal, carried forward untouched.
  Raw(String),
}

impl ThrowsEntry {
  pub fn class_ref(name: impl Into<String>) -> Self {
    ThrowsEntry::ClassRef(name.into())
  }

  /// Parses a single argument such as `IOException::class` or `java.io.IOException::class`.
  pub fn parse(argument: &str) -> Result<Self, AnnotationError> {
    let trimmed = argument.trim();
    let reference = trimmed
      .strip_suffix("::class")
      .map(str::trim_end)
      .filter(|r| is_dotted_identifier(r))
      .ok_or_else(|| AnnotationError::Malformed { text: trimmed.to_string() })?;
    Ok(ThrowsEntry::ClassRef(reference.to_string()))
  }

  /// The reference as written, without `::class`.
  pub fn text(&self) -> &str {
    match self {
      ThrowsEntry::ClassRef(name) => name,
      ThrowsEntry::Raw(raw) => raw,
    }
  }

  pub fn simple_name(&self) -> &str {
    match self {
      ThrowsEntry::ClassRef(name) => name.rsplit('.').next().unwrap_or(name),
      ThrowsEntry::Raw(raw) => raw,
    }
  }

  pub fn is_raw(&self) -> bool {
    matches!(self, ThrowsEntry::Raw(_))
  }

  pub fn render(&self) -> String {
    match self {
      ThrowsEntry::ClassRef(name) => format!("{}::class", name),
      ThrowsEntry::Raw(raw) => raw.clone(),
    }
  }

  fn dedup_key(&self) -> &str {
    self.simple_name()
  }
}

fn is_dotted_identifier(text: &str) -> bool {
  !text.is_empty()
    && text.split('.').all(|segment| {
      let segment = segment.trim_matches('`');
      let mut chars = segment.chars();
      matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
    })
}

/// Where the declared exceptions were written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeclarationForm {
  #[default]
  Annotation,
  ThrowsClause,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrowsAnnotation {
  /// Annotation name as written, e.g. `Throws` or `kotlin.jvm.Throws`; `throws` for a clause.
  pub name: String,
  pub entries: Vec<ThrowsEntry>,
  /// Location of the annotation in its source, absent for synthesized values.
  pub span: Option<Span>,
  #[serde(default)]
  pub form: DeclarationForm,
}

impl ThrowsAnnotation {
  pub fn new(name: impl Into<String>, entries: impl IntoIterator<Item = ThrowsEntry>) -> Self {
    let mut annotation = Self {
      name: name.into(),
      entries: Vec::new(),
      span: None,
      form: DeclarationForm::Annotation,
    };
    for entry in entries {
      annotation.push(entry);
    }
    annotation
  }

  /// Reads an annotation node; `None` when it is not one of the recognized throws annotations.
  pub fn from_node(tree: &SyntaxTree, node: NodeId, settings: &UserSettings) -> Option<Self> {
    if tree.kind(node) != NodeKind::Annotation {
      return None;
    }
    let invocation = tree.first_child_of_kind(node, NodeKind::ConstructorInvocation);
    let type_ref = invocation
      .and_then(|inv| tree.first_child_of_kind(inv, NodeKind::TypeRef))
      .or_else(|| tree.first_child_of_kind(node, NodeKind::TypeRef))?;
    let name = tree.compact_text(type_ref);
    if !settings.is_throws_annotation(&name) {
      return None;
    }

    let mut annotation = ThrowsAnnotation::new(name, Vec::new());
    annotation.span = Some(tree.span(node));
    let arguments = invocation.and_then(|inv| tree.first_child_of_kind(inv, NodeKind::ValueArguments));
    if let Some(arguments) = arguments {
      for argument in tree.children(arguments) {
        if tree.kind(*argument) == NodeKind::ValueArgument {
          for entry in parse_argument(tree.text(*argument)) {
            annotation.push(entry);
          }
        }
      }
    }
    Some(annotation)
  }

  /// Reads a Java `throws` clause. Every listed type becomes a class reference.
  pub fn from_throws_clause(tree: &SyntaxTree, node: NodeId) -> Option<Self> {
    if tree.kind(node) != NodeKind::ThrowsClause {
      return None;
    }
    let entries = tree
      .named_children(node)
      .filter(|t| tree.kind(*t) == NodeKind::TypeRef)
      .map(|t| ThrowsEntry::class_ref(tree.compact_text(t)));
    let mut clause = ThrowsAnnotation::new("throws", entries);
    clause.span = Some(tree.span(node));
    clause.form = DeclarationForm::ThrowsClause;
    Some(clause)
  }

  pub fn is_annotation(&self) -> bool {
    self.form == DeclarationForm::Annotation
  }

  /// Appends `entry` unless an entry with the same simple name is already present.
  pub fn push(&mut self, entry: ThrowsEntry) -> bool {
    if self.contains_simple_name(entry.dedup_key()) {
      return false;
    }
    self.entries.push(entry);
    true
  }

  pub fn contains_simple_name(&self, simple_name: &str) -> bool {
    self.entries.iter().any(|e| e.dedup_key() == simple_name)
  }

  pub fn simple_names(&self) -> Vec<&str> {
    self.entries.iter().map(ThrowsEntry::simple_name).collect()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  /// `@Name(A::class, B::class)`, or `@Name` when there are no entries. A clause renders as `throws A, B`.
  pub fn render(&self) -> String {
    if self.form == DeclarationForm::ThrowsClause {
      let types: Vec<&str> = self.entries.iter().map(ThrowsEntry::text).collect();
      return format!("throws {}", types.join(", "));
    }
    if self.entries.is_empty() {
      return format!("@{}", self.name);
    }
    let arguments: Vec<String> = self.entries.iter().map(ThrowsEntry::render).collect();
    format!("@{}({})", self.name, arguments.join(", "))
  }
}

/// Splits the text between the annotation's parentheses into entries.
pub fn parse_arguments(arguments: &str) -> Vec<ThrowsEntry> {
  let mut seen = FxHashSet::default();
  split_top_level(arguments)
    .into_iter()
    .flat_map(parse_argument)
    .filter(|entry| seen.insert(entry.dedup_key().to_string()))
    .collect()
}

/// One value argument may be a named argument or an array literal holding several class literals.
fn parse_argument(argument: &str) -> Vec<ThrowsEntry> {
  let mut value = argument.trim();
  if let Some((name, rest)) = value.split_once('=') {
    if is_dotted_identifier(name.trim()) && !rest.starts_with('=') {
      value = rest.trim();
    }
  }
  let inner = value
    .strip_prefix('[')
    .and_then(|v| v.strip_suffix(']'))
    .or_else(|| value.strip_prefix("arrayOf(").and_then(|v| v.strip_suffix(')')));
  if let Some(inner) = inner {
    return split_top_level(inner).into_iter().flat_map(parse_argument).collect();
  }
  if value.is_empty() {
    return Vec::new();
  }
  match ThrowsEntry::parse(value) {
    Ok(entry) => vec![entry],
    Err(err) => {
      debug!(%err, "keeping annotation argument as raw text");
      vec![ThrowsEntry::Raw(value.to_string())]
    }
  }
}

fn split_top_level(text: &str) -> Vec<&str> {
  let mut parts = Vec::new();
  let mut depth = 0usize;
  let mut start = 0;
  for (at, c) in text.char_indices() {
    match c {
      '(' | '[' | '<' | '{' => depth += 1,
      ')' | ']' | '>' | '}' => depth = depth.saturating_sub(1),
      ',' if depth == 0 => {
        parts.push(text[start..at].trim());
        start = at + 1;
      }
      _ => {}
    }
  }
  parts.push(text[start..].trim());
  parts.into_iter().filter(|p| !p.is_empty()).collect()
}
