//! Lowers a tree-sitter Kotlin parse into a [`SyntaxTree`].

use tree_sitter::Node;

use crate::errors::ParseError;
use crate::lowering::{parse_with, text_of, token_kind};
use crate::syntax::{NodeKind, SourceLanguage, SyntaxTree};

pub fn parse_kotlin(file: &str, source: &str) -> Result<SyntaxTree, ParseError> {
  parse_with(file, source, SourceLanguage::Kotlin, &tree_sitter_kotlin_sg::LANGUAGE.into(), kind_of)
}

fn kind_of(node: Node<'_>, source: &str) -> NodeKind {
  if !node.is_named() {
    return token_kind(node);
  }
  match node.kind() {
    "source_file" => NodeKind::File,
    "package_header" => NodeKind::PackageHeader,
    "import_header" => NodeKind::Import,
    "class_declaration" => NodeKind::Class,
    "object_declaration" | "companion_object" => NodeKind::Object,
    "class_body" | "enum_class_body" => NodeKind::ClassBody,
    "anonymous_initializer" => NodeKind::ClassInitializer,
    "type_alias" => NodeKind::TypeAlias,
    "function_declaration" => NodeKind::Function,
    "function_value_parameters" => NodeKind::Parameters,
    "parameter" | "class_parameter" => NodeKind::Parameter,
    "lambda_literal" | "anonymous_function" => NodeKind::Lambda,
    "modifiers" => NodeKind::Modifiers,
    "annotation" => NodeKind::Annotation,
    "constructor_invocation" => NodeKind::ConstructorInvocation,
    "value_arguments" => NodeKind::ValueArguments,
    "value_argument" => NodeKind::ValueArgument,
    "property_declaration" => NodeKind::Property,
    "callable_reference" => NodeKind::CallableReference,
    "delegation_specifier" => NodeKind::DelegationSpecifier,
    "user_type" => NodeKind::TypeRef,
    "nullable_type" => NodeKind::NullableType,
    "function_body" | "control_structure_body" | "statements" | "block" => NodeKind::Block,
    "try_expression" => NodeKind::TryBlock,
    "catch_block" => NodeKind::CatchClause,
    "finally_block" => NodeKind::FinallyBlock,
    "jump_expression" => {
      if text_of(node, source).trim_start().starts_with("throw") {
        NodeKind::ThrowExpr
      } else {
        NodeKind::JumpExpr
      }
    }
    "call_expression" => NodeKind::CallExpr,
    "call_suffix" => NodeKind::CallSuffix,
    "navigation_expression" => NodeKind::NavigationExpr,
    "navigation_suffix" => NodeKind::NavigationSuffix,
    "simple_identifier" | "type_identifier" => NodeKind::Identifier,
    "string_literal" | "line_string_literal" | "multi_line_string_literal" => NodeKind::StringLiteral,
    "line_comment" | "multiline_comment" | "comment" => NodeKind::Comment,
    _ => NodeKind::Other,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::syntax::NodeId;

  fn kinds_in(tree: &SyntaxTree, kind: NodeKind) -> Vec<&str> {
    tree
      .descendants(tree.root())
      .filter(|n| tree.kind(*n) == kind)
      .map(|n| tree.text(n))
      .collect()
  }

  #[test]
  fn test_lowers_functions_and_throws() {
    let source = r#"
package com.acme.io

class Reader {
  fun read() {
    throw IllegalStateException("closed")
  }
}
"#;
    let tree = parse_kotlin("Reader.kt", source).unwrap();
    assert_eq!(tree.package(), Some("com.acme.io"));
    assert_eq!(kinds_in(&tree, NodeKind::Class).len(), 1);
    let functions: Vec<NodeId> = tree
      .descendants(tree.root())
      .filter(|n| tree.kind(*n) == NodeKind::Function)
      .collect();
    assert_eq!(functions.len(), 1);
    assert_eq!(tree.name_of(functions[0]), Some("read"));
    let throws = kinds_in(&tree, NodeKind::ThrowExpr);
    assert_eq!(throws, vec!["throw IllegalStateException(\"closed\")"]);
  }

  #[test]
  fn test_lowers_try_catch_and_return_is_not_a_throw() {
    let source = r#"
fun f(): Int {
  try {
    g()
  } catch (e: IOException) {
    return 1
  } finally {
    h()
  }
  return 0
}
"#;
    let tree = parse_kotlin("f.kt", source).unwrap();
    assert_eq!(kinds_in(&tree, NodeKind::TryBlock).len(), 1);
    assert_eq!(kinds_in(&tree, NodeKind::CatchClause).len(), 1);
    assert_eq!(kinds_in(&tree, NodeKind::FinallyBlock).len(), 1);
    assert!(kinds_in(&tree, NodeKind::ThrowExpr).is_empty());
    assert_eq!(kinds_in(&tree, NodeKind::JumpExpr).len(), 2);
  }

  #[test]
  fn test_lowers_properties() {
    let tree = parse_kotlin("p.kt", "val db: Db = Db()\nfun f() { val local = 1 }").unwrap();
    assert_eq!(kinds_in(&tree, NodeKind::Property), vec!["val db: Db = Db()", "val local = 1"]);
    assert_eq!(tree.language(), SourceLanguage::Kotlin);
  }

  #[test]
  fn test_deep_nesting_does_not_overflow() {
    let depth = 2_000;
    let source = format!("val x = {}1{}", "(".repeat(depth), ")".repeat(depth));
    let tree = parse_kotlin("deep.kt", &source).unwrap();
    assert!(tree.len() > depth);
  }

  #[test]
  fn test_syntax_errors_do_not_abort_lowering() {
    let source = "fun f( { throw X() ";
    let tree = parse_kotlin("broken.kt", source).unwrap();
    assert!(tree.len() > 1);
    assert_eq!(tree.span(tree.root()).end, source.len());
  }
}
