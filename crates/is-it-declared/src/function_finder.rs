use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::settings::UserSettings;
use crate::syntax::{NodeId, NodeKind, SourceLanguage, SyntaxTree};
use crate::throws_annotation::ThrowsAnnotation;

/// Nearest function declaration around `node`.
///
/// Lambdas are transparent. A class initializer, class, object or the file itself ends the
/// search without a function: code there cannot carry a declared-exceptions annotation.
pub fn enclosing_function(tree: &SyntaxTree, node: NodeId) -> Option<NodeId> {
  for ancestor in tree.ancestors(node) {
    match tree.kind(ancestor) {
      NodeKind::Function => return Some(ancestor),
      kind if kind.is_scope_boundary() => return None,
      _ => {}
    }
  }
  None
}

/// How many arguments a function accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Arity {
  pub required: usize,
  /// `None` for a vararg parameter list.
  pub max: Option<usize>,
}

impl Arity {
  pub fn exactly(count: usize) -> Self {
    Arity { required: count, max: Some(count) }
  }

  pub fn accepts(&self, count: usize) -> bool {
    count >= self.required && self.max.map_or(true, |max| count <= max)
  }
}

/// Read-only view of a function declaration node.
#[derive(Clone, Copy)]
pub struct FunctionDecl<'t> {
  tree: &'t SyntaxTree,
  node: NodeId,
}

impl<'t> FunctionDecl<'t> {
  pub fn new(tree: &'t SyntaxTree, node: NodeId) -> Option<Self> {
    (tree.kind(node) == NodeKind::Function).then_some(Self { tree, node })
  }

  pub fn node(&self) -> NodeId {
    self.node
  }

  pub fn name(&self) -> Option<&'t str> {
    self.tree.name_of(self.node)
  }

  /// Annotation nodes written on the declaration, in source order.
  pub fn annotations(&self) -> Vec<NodeId> {
    let tree = self.tree;
    let mut found = Vec::new();
    for child in tree.children(self.node) {
      match tree.kind(*child) {
        NodeKind::Annotation => found.push(*child),
        NodeKind::Modifiers => found.extend(
          tree
            .children(*child)
            .iter()
            .copied()
            .filter(|m| tree.kind(*m) == NodeKind::Annotation),
        ),
        _ => {}
      }
    }
    found
  }

  /// The declared-exceptions annotation, if any. Only the first recognized one counts.
  ///
  /// A Java method declares through its `throws` clause instead.
  pub fn throws_annotation(&self, settings: &UserSettings) -> Option<ThrowsAnnotation> {
    if self.tree.language() == SourceLanguage::Java {
      return self
        .tree
        .first_child_of_kind(self.node, NodeKind::ThrowsClause)
        .and_then(|clause| ThrowsAnnotation::from_throws_clause(self.tree, clause));
    }
    let mut recognized = self
      .annotations()
      .into_iter()
      .filter_map(|node| ThrowsAnnotation::from_node(self.tree, node, settings));
    let first = recognized.next()?;
    if recognized.next().is_some() {
      warn!(
        file = self.tree.file(),
        function = self.name().unwrap_or("<anonymous>"),
        "function carries more than one throws annotation, using the first"
      );
    }
    Some(first)
  }

  pub fn arity(&self) -> Arity {
    let tree = self.tree;
    let Some(parameters) = tree.first_child_of_kind(self.node, NodeKind::Parameters) else {
      return Arity::exactly(0);
    };
    let children = tree.children(parameters);
    let mut total: usize = 0;
    let mut required: usize = 0;
    let mut variadic = false;
    for (at, child) in children.iter().enumerate() {
      match tree.kind(*child) {
        NodeKind::Parameter if tree.has_token(*child, "...") => {
          total += 1;
          required += 1;
          variadic = true;
        }
        NodeKind::Parameter => {
          total += 1;
          let has_default = children
            .get(at + 1)
            .is_some_and(|next| tree.kind(*next) == NodeKind::Punctuation && tree.text(*next) == "=");
          if !has_default {
            required += 1;
          }
        }
        NodeKind::Other if tree.text(*child).split_whitespace().any(|w| w == "vararg") => {
          variadic = true;
        }
        _ => {}
      }
    }
    if variadic {
      required = required.saturating_sub(1);
    }
    Arity { required, max: (!variadic).then_some(total) }
  }
}

/// Number of arguments passed by a call, counting a trailing lambda.
pub fn call_arity(tree: &SyntaxTree, call: NodeId) -> Option<usize> {
  let suffix = tree.first_child_of_kind(call, NodeKind::CallSuffix)?;
  if tree.language() == SourceLanguage::Java {
    return Some(tree.named_children(suffix).count());
  }
  let mut count = 0;
  for child in tree.named_children(suffix) {
    match tree.kind(child) {
      NodeKind::ValueArguments => {
        count += tree
          .children(child)
          .iter()
          .filter(|a| tree.kind(**a) == NodeKind::ValueArgument)
          .count();
      }
      NodeKind::Lambda => count += 1,
      _ if tree.first_child_of_kind(child, NodeKind::Lambda).is_some() => count += 1,
      _ => {}
    }
  }
  Some(count)
}
