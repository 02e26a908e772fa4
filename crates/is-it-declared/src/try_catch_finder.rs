use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::StructuralError;
use crate::program_model::normalize_type_name;
use crate::syntax::{NodeId, NodeKind, SourceLanguage, SyntaxTree};

/// The handlers of one try expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TryScope {
  pub node: NodeId,
  /// Catch parameter types as written, in clause order.
  pub caught: Vec<String>,
  pub has_finally: bool,
}

impl TryScope {
  pub fn from_node(tree: &SyntaxTree, node: NodeId) -> Self {
    let mut caught = Vec::new();
    let mut has_finally = false;
    for child in tree.children(node) {
      match tree.kind(*child) {
        NodeKind::CatchClause => match catch_types(tree, *child) {
          Ok(names) => caught.extend(names),
          Err(err) => warn!(file = tree.file(), line = tree.span(*child).start_pos.line + 1, %err, "skipping catch clause"),
        },
        NodeKind::FinallyBlock => has_finally = true,
        _ => {}
      }
    }
    Self { node, caught, has_finally }
  }
}

/// Types a catch clause handles. A Java multi-catch `catch (A | B e)` handles several.
fn catch_types(tree: &SyntaxTree, clause: NodeId) -> Result<Vec<String>, StructuralError> {
  let missing = StructuralError::UnexpectedShape { kind: "catch", expected: "parameter type" };
  if tree.language() == SourceLanguage::Java {
    let names: Vec<String> = tree
      .first_child_of_kind(clause, NodeKind::Parameter)
      .and_then(|parameter| tree.first_child_of_kind(parameter, NodeKind::Other))
      .map(|union| {
        tree
          .named_children(union)
          .filter(|t| tree.kind(*t) == NodeKind::TypeRef)
          .map(|t| normalize_type_name(tree.text(t)))
          .collect()
      })
      .unwrap_or_default();
    return if names.is_empty() { Err(missing) } else { Ok(names) };
  }
  tree
    .named_child_after_token(clause, ":")
    .filter(|t| matches!(tree.kind(*t), NodeKind::TypeRef | NodeKind::NullableType | NodeKind::Other))
    .map(|t| normalize_type_name(tree.text(t)))
    .filter(|name| !name.is_empty())
    .map(|name| vec![name])
    .ok_or(missing)
}

/// Try expressions whose protected body contains `node`, nearest first, inside the enclosing function.
///
/// A node inside a catch or finally block is not protected by that block's own try, so the ascent skips
/// the owning try and continues outward.
pub fn enclosing_tries(tree: &SyntaxTree, node: NodeId) -> Vec<NodeId> {
  let mut tries = Vec::new();
  let mut skip_owner = false;
  for ancestor in tree.ancestors(node) {
    match tree.kind(ancestor) {
      NodeKind::CatchClause | NodeKind::FinallyBlock => skip_owner = true,
      NodeKind::TryBlock if skip_owner => skip_owner = false,
      NodeKind::TryBlock => tries.push(ancestor),
      kind if kind.is_scope_boundary() => break,
      _ => {}
    }
  }
  tries
}

/// Whether a throw is lexically protected by a try.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TryProtection {
  Guarded(NodeId),
  Unguarded,
}

/// A throw is guarded by the nearest try whose body holds it, whatever that try's clauses are.
pub fn throw_protection(tree: &SyntaxTree, throw: NodeId) -> TryProtection {
  enclosing_tries(tree, throw)
    .into_iter()
    .next()
    .map_or(TryProtection::Unguarded, TryProtection::Guarded)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::kotlin_parser::parse_kotlin;

  fn nodes(tree: &SyntaxTree, kind: NodeKind) -> Vec<NodeId> {
    tree.descendants(tree.root()).filter(|n| tree.kind(*n) == kind).collect()
  }

  #[test]
  fn test_scope_collects_catch_types() {
    let tree = parse_kotlin(
      "t.kt",
      "fun f() { try { g() } catch (e: IOException) { } catch (e: java.util.concurrent.TimeoutException) { } finally { } }",
    )
    .unwrap();
    let scope = TryScope::from_node(&tree, nodes(&tree, NodeKind::TryBlock)[0]);
    assert_eq!(scope.caught, vec!["IOException", "java.util.concurrent.TimeoutException"]);
    assert!(scope.has_finally);
  }

  #[test]
  fn test_throw_in_try_body_is_guarded() {
    let tree = parse_kotlin("t.kt", "fun f() { try { throw X() } catch (e: Y) { } }").unwrap();
    let throw = nodes(&tree, NodeKind::ThrowExpr)[0];
    let try_node = nodes(&tree, NodeKind::TryBlock)[0];
    assert_eq!(throw_protection(&tree, throw), TryProtection::Guarded(try_node));
  }

  #[test]
  fn test_throw_in_catch_is_not_guarded_by_own_try() {
    let tree = parse_kotlin("t.kt", "fun f() { try { g() } catch (e: Y) { throw X() } }").unwrap();
    let throw = nodes(&tree, NodeKind::ThrowExpr)[0];
    assert_eq!(throw_protection(&tree, throw), TryProtection::Unguarded);
  }

  #[test]
  fn test_throw_in_catch_is_guarded_by_outer_try() {
    let tree = parse_kotlin(
      "t.kt",
      "fun f() { try { try { g() } catch (e: Y) { throw X() } } catch (e: X) { } }",
    )
    .unwrap();
    let throw = nodes(&tree, NodeKind::ThrowExpr)[0];
    let outer = nodes(&tree, NodeKind::TryBlock)[0];
    assert_eq!(throw_protection(&tree, throw), TryProtection::Guarded(outer));
  }

  #[test]
  fn test_finally_only_try_guards_its_body() {
    let tree = parse_kotlin("t.kt", "fun f() { try { throw X() } finally { } }").unwrap();
    let throw = nodes(&tree, NodeKind::ThrowExpr)[0];
    let try_node = nodes(&tree, NodeKind::TryBlock)[0];
    assert_eq!(throw_protection(&tree, throw), TryProtection::Guarded(try_node));
  }

  #[test]
  fn test_throw_in_finally_is_not_guarded_by_own_try() {
    let tree = parse_kotlin("t.kt", "fun f() { try { g() } finally { throw X() } }").unwrap();
    let throw = nodes(&tree, NodeKind::ThrowExpr)[0];
    assert_eq!(throw_protection(&tree, throw), TryProtection::Unguarded);
  }

  #[test]
  fn test_java_multi_catch_types() {
    let tree = crate::java_parser::parse_java(
      "T.java",
      "class T { void f() { try { g(); } catch (IllegalStateException | java.io.IOException e) { } catch (Exception e) { } } }",
    )
    .unwrap();
    let scope = TryScope::from_node(&tree, nodes(&tree, NodeKind::TryBlock)[0]);
    assert_eq!(scope.caught, vec!["IllegalStateException", "java.io.IOException", "Exception"]);
    assert!(!scope.has_finally);
  }

  #[test]
  fn test_try_outside_function_does_not_count() {
    let tree = parse_kotlin("t.kt", "fun outer() { try { fun inner() { throw X() } } catch (e: X) { } }").unwrap();
    let throw = nodes(&tree, NodeKind::ThrowExpr)[0];
    assert!(enclosing_tries(&tree, throw).is_empty());
  }
}
