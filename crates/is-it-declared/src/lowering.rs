//! Shared tree-sitter lowering: walks a parse tree with an explicit stack and copies it into a
//! [`SyntaxTree`], classifying each node with a grammar-specific function.

use tracing::{debug, warn};
use tree_sitter::{Language, Node, Parser};

use crate::errors::ParseError;
use crate::java_parser::parse_java;
use crate::kotlin_parser::parse_kotlin;
use crate::syntax::{NodeId, NodeKind, Position, SourceLanguage, Span, SyntaxTree, TreeBuilder};

/// Maps one grammar node onto the closed node kinds.
pub(crate) type Classify = fn(Node<'_>, &str) -> NodeKind;

/// Parses `source` with the parser its file name calls for.
pub fn parse_source(file: &str, source: &str) -> Result<SyntaxTree, ParseError> {
  match SourceLanguage::from_file_name(file) {
    SourceLanguage::Kotlin => parse_kotlin(file, source),
    SourceLanguage::Java => parse_java(file, source),
  }
}

pub(crate) fn parse_with(
  file: &str,
  source: &str,
  source_language: SourceLanguage,
  grammar: &Language,
  classify: Classify,
) -> Result<SyntaxTree, ParseError> {
  let mut parser = Parser::new();
  parser.set_language(grammar).map_err(|e| ParseError::LanguageInit {
    language: match source_language {
      SourceLanguage::Kotlin => "Kotlin",
      SourceLanguage::Java => "Java",
    },
    message: e.to_string(),
  })?;
  let parsed = parser
    .parse(source, None)
    .ok_or_else(|| ParseError::NoTree { file: file.to_string() })?;
  Ok(lower(file, source, source_language, parsed.root_node(), classify))
}

fn lower(file: &str, source: &str, source_language: SourceLanguage, root: Node<'_>, classify: Classify) -> SyntaxTree {
  let mut builder = TreeBuilder::new(file, source);
  builder.set_language(source_language);
  let root_id = builder.root();
  let mut cursor = root.walk();
  let top_level: Vec<Node<'_>> = root.children(&mut cursor).collect();
  let mut stack: Vec<(Node<'_>, NodeId)> = top_level.into_iter().rev().map(|child| (child, root_id)).collect();
  let mut syntax_errors = 0usize;

  while let Some((node, parent)) = stack.pop() {
    let kind = if node.is_error() { NodeKind::Error } else { classify(node, source) };
    if kind == NodeKind::Error || node.is_missing() {
      syntax_errors += 1;
      warn!(
        file,
        line = node.start_position().row + 1,
        column = node.start_position().column + 1,
        missing = node.is_missing(),
        "syntax error in source"
      );
    }
    let id = builder.add_with_span(parent, kind, span_of(node));

    if kind == NodeKind::PackageHeader {
      let package = text_of(node, source)
        .trim()
        .trim_start_matches("package")
        .trim()
        .trim_end_matches(';')
        .trim()
        .to_string();
      if !package.is_empty() {
        builder.set_package(package);
      }
    }

    let mut cursor = node.walk();
    let children: Vec<Node<'_>> = node.children(&mut cursor).collect();
    stack.extend(children.into_iter().rev().map(|child| (child, id)));
  }

  if syntax_errors > 0 {
    debug!(file, syntax_errors, "lowered tree contains error nodes");
  }
  builder.finish()
}

fn span_of(node: Node<'_>) -> Span {
  let start = node.start_position();
  let end = node.end_position();
  Span {
    start: node.start_byte(),
    end: node.end_byte(),
    start_pos: Position { line: start.row, column: start.column },
    end_pos: Position { line: end.row, column: end.column },
  }
}

pub(crate) fn text_of<'s>(node: Node<'_>, source: &'s str) -> &'s str {
  source.get(node.start_byte()..node.end_byte()).unwrap_or("")
}

/// Anonymous grammar tokens: words are keywords, everything else punctuation.
pub(crate) fn token_kind(node: Node<'_>) -> NodeKind {
  if node.kind().chars().next().is_some_and(|c| c.is_alphabetic()) {
    NodeKind::Keyword
  } else {
    NodeKind::Punctuation
  }
}
