//! Read-only syntax model the analysis runs over.
//!
//! A [`SyntaxTree`] is an arena of nodes for one source file. Nodes carry a closed [`NodeKind`], an upward
//! parent link, their children in document order and a byte/line span. Trees are produced by the grammar
//! lowerings in [`crate::lowering`] or by a host through [`TreeBuilder`].

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
  pub fn index(self) -> usize {
    self.0 as usize
  }
}

/// Zero-based line and column.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
  pub line: usize,
  pub column: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
  pub start: usize,
  pub end: usize,
  pub start_pos: Position,
  pub end_pos: Position,
}

impl Span {
  /// Builds a span from byte offsets, computing line/column by scanning `source`.
  pub fn from_offsets(source: &str, start: usize, end: usize) -> Self {
    Span {
      start,
      end,
      start_pos: position_at(source, start),
      end_pos: position_at(source, end),
    }
  }

  pub fn contains(&self, other: &Span) -> bool {
    self.start <= other.start && other.end <= self.end
  }

  pub fn len(&self) -> usize {
    self.end.saturating_sub(self.start)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

fn position_at(source: &str, offset: usize) -> Position {
  let offset = offset.min(source.len());
  let before = &source.as_bytes()[..offset];
  let line = before.iter().filter(|b| **b == b'\n').count();
  let line_start = before.iter().rposition(|b| *b == b'\n').map(|i| i + 1).unwrap_or(0);
  Position { line, column: offset - line_start }
}

/// Language a tree was lowered from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceLanguage {
  #[default]
  Kotlin,
  Java,
}

impl SourceLanguage {
  /// `.java` files are Java, everything else is read as Kotlin.
  pub fn from_file_name(file: &str) -> Self {
    if file.ends_with(".java") {
      SourceLanguage::Java
    } else {
      SourceLanguage::Kotlin
    }
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
  File,
  PackageHeader,
  Import,
  Class,
  Object,
  ClassBody,
  ClassInitializer,
  TypeAlias,
  Function,
  /// A Java `throws A, B` clause on a method or constructor.
  ThrowsClause,
  Parameters,
  Parameter,
  Lambda,
  Modifiers,
  Annotation,
  ConstructorInvocation,
  ValueArguments,
  ValueArgument,
  /// A `val`/`var` or local/field variable declaration.
  Property,
  CallableReference,
  DelegationSpecifier,
  TypeRef,
  NullableType,
  Block,
  TryBlock,
  CatchClause,
  FinallyBlock,
  ThrowExpr,
  JumpExpr,
  CallExpr,
  CallSuffix,
  NavigationExpr,
  NavigationSuffix,
  Identifier,
  StringLiteral,
  Keyword,
  Punctuation,
  Comment,
  Error,
  Other,
}

impl NodeKind {
  /// Leaf tokens that never carry structure of their own.
  pub fn is_token(self) -> bool {
    matches!(self, NodeKind::Keyword | NodeKind::Punctuation | NodeKind::Comment)
  }

  /// Kinds where an upward search for an enclosing function or try stops.
  pub fn is_scope_boundary(self) -> bool {
    matches!(
      self,
      NodeKind::Function | NodeKind::ClassInitializer | NodeKind::Class | NodeKind::Object | NodeKind::File
    )
  }

  pub fn name(self) -> &'static str {
    match self {
      NodeKind::File => "file",
      NodeKind::PackageHeader => "package header",
      NodeKind::Import => "import",
      NodeKind::Class => "class",
      NodeKind::Object => "object",
      NodeKind::ClassBody => "class body",
      NodeKind::ClassInitializer => "class initializer",
      NodeKind::TypeAlias => "type alias",
      NodeKind::Function => "function",
      NodeKind::ThrowsClause => "throws clause",
      NodeKind::Parameters => "parameters",
      NodeKind::Parameter => "parameter",
      NodeKind::Lambda => "lambda",
      NodeKind::Modifiers => "modifiers",
      NodeKind::Annotation => "annotation",
      NodeKind::ConstructorInvocation => "constructor invocation",
      NodeKind::ValueArguments => "value arguments",
      NodeKind::ValueArgument => "value argument",
      NodeKind::Property => "property",
      NodeKind::CallableReference => "callable reference",
      NodeKind::DelegationSpecifier => "delegation specifier",
      NodeKind::TypeRef => "type reference",
      NodeKind::NullableType => "nullable type",
      NodeKind::Block => "block",
      NodeKind::TryBlock => "try",
      NodeKind::CatchClause => "catch",
      NodeKind::FinallyBlock => "finally",
      NodeKind::ThrowExpr => "throw",
      NodeKind::JumpExpr => "jump",
      NodeKind::CallExpr => "call",
      NodeKind::CallSuffix => "call suffix",
      NodeKind::NavigationExpr => "navigation",
      NodeKind::NavigationSuffix => "navigation suffix",
      NodeKind::Identifier => "identifier",
      NodeKind::StringLiteral => "string",
      NodeKind::Keyword => "keyword",
      NodeKind::Punctuation => "punctuation",
      NodeKind::Comment => "comment",
      NodeKind::Error => "error",
      NodeKind::Other => "other",
    }
  }
}

#[derive(Clone, Debug)]
struct NodeData {
  kind: NodeKind,
  parent: Option<NodeId>,
  children: Vec<NodeId>,
  span: Span,
}

#[derive(Clone, Debug)]
pub struct SyntaxTree {
  file: String,
  source: String,
  language: SourceLanguage,
  package: Option<String>,
  nodes: Vec<NodeData>,
}

impl SyntaxTree {
  pub fn file(&self) -> &str {
    &self.file
  }

  pub fn source(&self) -> &str {
    &self.source
  }

  pub fn language(&self) -> SourceLanguage {
    self.language
  }

  pub fn package(&self) -> Option<&str> {
    self.package.as_deref()
  }

  pub fn root(&self) -> NodeId {
    NodeId(0)
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  pub fn kind(&self, id: NodeId) -> NodeKind {
    self.nodes[id.index()].kind
  }

  pub fn parent(&self, id: NodeId) -> Option<NodeId> {
    self.nodes[id.index()].parent
  }

  pub fn children(&self, id: NodeId) -> &[NodeId] {
    &self.nodes[id.index()].children
  }

  /// Children that are not keywords, punctuation or comments.
  pub fn named_children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
    self.children(id).iter().copied().filter(move |c| !self.kind(*c).is_token())
  }

  pub fn span(&self, id: NodeId) -> Span {
    self.nodes[id.index()].span
  }

  pub fn text(&self, id: NodeId) -> &str {
    let span = self.span(id);
    self.source.get(span.start..span.end).unwrap_or("")
  }

  /// Node text with all whitespace removed, used for comparing type references as written.
  pub fn compact_text(&self, id: NodeId) -> String {
    self.text(id).chars().filter(|c| !c.is_whitespace()).collect()
  }

  /// Strict ancestors, nearest first.
  pub fn ancestors(&self, id: NodeId) -> Ancestors<'_> {
    Ancestors { tree: self, next: self.parent(id) }
  }

  /// Pre-order walk of `id` and everything below it, without recursion.
  pub fn descendants(&self, id: NodeId) -> Descendants<'_> {
    Descendants { tree: self, stack: vec![id] }
  }

  pub fn first_child_of_kind(&self, id: NodeId, kind: NodeKind) -> Option<NodeId> {
    self.children(id).iter().copied().find(|c| self.kind(*c) == kind)
  }

  /// Whether a direct keyword or punctuation child reads `token`.
  pub fn has_token(&self, id: NodeId, token: &str) -> bool {
    self
      .children(id)
      .iter()
      .any(|c| self.kind(*c).is_token() && self.text(*c) == token)
  }

  /// First named child that comes after the direct token `token`.
  pub fn named_child_after_token(&self, id: NodeId, token: &str) -> Option<NodeId> {
    let children = self.children(id);
    let at = children
      .iter()
      .position(|c| self.kind(*c).is_token() && self.text(*c) == token)?;
    children[at + 1..].iter().copied().find(|c| !self.kind(*c).is_token())
  }

  /// Text of the first direct identifier child.
  pub fn name_of(&self, id: NodeId) -> Option<&str> {
    self
      .first_child_of_kind(id, NodeKind::Identifier)
      .map(|ident| self.text(ident))
  }
}

pub struct Ancestors<'t> {
  tree: &'t SyntaxTree,
  next: Option<NodeId>,
}

impl Iterator for Ancestors<'_> {
  type Item = NodeId;

  fn next(&mut self) -> Option<NodeId> {
    let current = self.next?;
    self.next = self.tree.parent(current);
    Some(current)
  }
}

pub struct Descendants<'t> {
  tree: &'t SyntaxTree,
  stack: Vec<NodeId>,
}

impl Iterator for Descendants<'_> {
  type Item = NodeId;

  fn next(&mut self) -> Option<NodeId> {
    let current = self.stack.pop()?;
    self.stack.extend(self.tree.children(current).iter().rev().copied());
    Some(current)
  }
}

/// Builds a [`SyntaxTree`] node by node. Children must be added in document order.
pub struct TreeBuilder {
  file: String,
  source: String,
  language: SourceLanguage,
  package: Option<String>,
  nodes: Vec<NodeData>,
}

impl TreeBuilder {
  /// Starts a tree whose root is a [`NodeKind::File`] spanning the whole source.
  pub fn new(file: impl Into<String>, source: impl Into<String>) -> Self {
    let file = file.into();
    let source = source.into();
    let span = Span::from_offsets(&source, 0, source.len());
    Self {
      language: SourceLanguage::from_file_name(&file),
      file,
      source,
      package: None,
      nodes: vec![NodeData { kind: NodeKind::File, parent: None, children: Vec::new(), span }],
    }
  }

  pub fn root(&self) -> NodeId {
    NodeId(0)
  }

  pub fn set_language(&mut self, language: SourceLanguage) {
    self.language = language;
  }

  pub fn set_package(&mut self, package: impl Into<String>) {
    self.package = Some(package.into());
  }

  pub fn add_with_span(&mut self, parent: NodeId, kind: NodeKind, span: Span) -> NodeId {
    let id = NodeId(self.nodes.len() as u32);
    self.nodes.push(NodeData { kind, parent: Some(parent), children: Vec::new(), span });
    self.nodes[parent.index()].children.push(id);
    id
  }

  pub fn add(&mut self, parent: NodeId, kind: NodeKind, start: usize, end: usize) -> NodeId {
    let span = Span::from_offsets(&self.source, start, end);
    self.add_with_span(parent, kind, span)
  }

  /// Adds a node covering the `nth` occurrence (zero-based) of `needle` in the source.
  pub fn add_text(&mut self, parent: NodeId, kind: NodeKind, needle: &str, nth: usize) -> Option<NodeId> {
    let start = self.source.match_indices(needle).nth(nth).map(|(at, _)| at)?;
    Some(self.add(parent, kind, start, start + needle.len()))
  }

  pub fn finish(self) -> SyntaxTree {
    SyntaxTree {
      file: self.file,
      source: self.source,
      language: self.language,
      package: self.package,
      nodes: self.nodes,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample() -> SyntaxTree {
    let src = "fun f() { g() }";
    let mut b = TreeBuilder::new("sample.kt", src);
    let root = b.root();
    let function = b.add(root, NodeKind::Function, 0, src.len());
    b.add(function, NodeKind::Keyword, 0, 3);
    b.add(function, NodeKind::Identifier, 4, 5);
    let block = b.add(function, NodeKind::Block, 8, src.len());
    let call = b.add(block, NodeKind::CallExpr, 10, 13);
    b.add(call, NodeKind::Identifier, 10, 11);
    b.finish()
  }

  #[test]
  fn test_ancestors_are_nearest_first() {
    let tree = sample();
    let call = tree.descendants(tree.root()).find(|n| tree.kind(*n) == NodeKind::CallExpr).unwrap();
    let kinds: Vec<NodeKind> = tree.ancestors(call).map(|n| tree.kind(n)).collect();
    assert_eq!(kinds, vec![NodeKind::Block, NodeKind::Function, NodeKind::File]);
  }

  #[test]
  fn test_descendants_are_in_document_order() {
    let tree = sample();
    let texts: Vec<&str> = tree
      .descendants(tree.root())
      .filter(|n| tree.kind(*n) == NodeKind::Identifier)
      .map(|n| tree.text(n))
      .collect();
    assert_eq!(texts, vec!["f", "g"]);
  }

  #[test]
  fn test_name_and_tokens() {
    let tree = sample();
    let function = tree.children(tree.root())[0];
    assert_eq!(tree.name_of(function), Some("f"));
    assert!(tree.has_token(function, "fun"));
    assert_eq!(tree.named_children(function).count(), 2);
  }

  #[test]
  fn test_span_positions() {
    let span = Span::from_offsets("ab\ncd\nef", 4, 7);
    assert_eq!(span.start_pos, Position { line: 1, column: 1 });
    assert_eq!(span.end_pos, Position { line: 2, column: 1 });
    assert_eq!(span.len(), 3);
  }

  #[test]
  fn test_add_text_finds_nth_occurrence() {
    let mut b = TreeBuilder::new("t.kt", "a().b().a()");
    let root = b.root();
    let second = b.add_text(root, NodeKind::Identifier, "a", 1).unwrap();
    let tree = b.finish();
    assert_eq!(tree.span(second).start, 8);
  }
}
