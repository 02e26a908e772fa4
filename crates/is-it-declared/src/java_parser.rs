//! Lowers a tree-sitter Java parse into a [`SyntaxTree`].
//!
//! Java sources take part as callers of Kotlin declarations: their method calls, try statements and
//! `throws` clauses are kept. Java `throw` statements are not sites, javac checks those itself.

use tree_sitter::Node;

use crate::errors::ParseError;
use crate::lowering::{parse_with, token_kind};
use crate::syntax::{NodeKind, SourceLanguage, SyntaxTree};

pub fn parse_java(file: &str, source: &str) -> Result<SyntaxTree, ParseError> {
  parse_with(file, source, SourceLanguage::Java, &tree_sitter_java::LANGUAGE.into(), kind_of)
}

fn kind_of(node: Node<'_>, _source: &str) -> NodeKind {
  if !node.is_named() {
    return token_kind(node);
  }
  match node.kind() {
    "program" => NodeKind::File,
    "package_declaration" => NodeKind::PackageHeader,
    "import_declaration" => NodeKind::Import,
    "class_declaration" | "interface_declaration" | "enum_declaration" | "record_declaration" => NodeKind::Class,
    "class_body" | "interface_body" | "enum_body" => NodeKind::ClassBody,
    "static_initializer" => NodeKind::ClassInitializer,
    "method_declaration" | "constructor_declaration" | "compact_constructor_declaration" => NodeKind::Function,
    "throws" => NodeKind::ThrowsClause,
    "formal_parameters" => NodeKind::Parameters,
    "formal_parameter" | "spread_parameter" | "catch_formal_parameter" => NodeKind::Parameter,
    "lambda_expression" => NodeKind::Lambda,
    "modifiers" => NodeKind::Modifiers,
    "marker_annotation" | "annotation" => NodeKind::Annotation,
    "object_creation_expression" => NodeKind::ConstructorInvocation,
    "local_variable_declaration" | "field_declaration" => NodeKind::Property,
    "superclass" => NodeKind::DelegationSpecifier,
    "type_identifier" | "scoped_type_identifier" | "generic_type" => NodeKind::TypeRef,
    "block" | "constructor_body" => NodeKind::Block,
    "try_statement" | "try_with_resources_statement" => NodeKind::TryBlock,
    "catch_clause" => NodeKind::CatchClause,
    "finally_clause" => NodeKind::FinallyBlock,
    "throw_statement" | "return_statement" | "break_statement" | "continue_statement" => NodeKind::JumpExpr,
    "method_invocation" => NodeKind::CallExpr,
    "argument_list" => NodeKind::CallSuffix,
    "identifier" => NodeKind::Identifier,
    "string_literal" => NodeKind::StringLiteral,
    "line_comment" | "block_comment" => NodeKind::Comment,
    _ => NodeKind::Other,
  }
}
