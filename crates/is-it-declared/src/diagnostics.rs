//! Turns uncovered sites into findings with their corrective actions.

use serde::{Deserialize, Serialize};

use crate::annotation_synthesizer::synthesize_all;
use crate::coverage::Verdict;
use crate::function_finder::FunctionDecl;
use crate::settings::UserSettings;
use crate::site_finder::{Site, SiteKind};
use crate::syntax::{NodeId, NodeKind, SourceLanguage, Span, SyntaxTree};
use crate::throws_annotation::{DeclarationForm, ThrowsAnnotation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FixAction {
  AnnotateThrows,
  WrapTryCatch,
}

impl FixAction {
  /// Stable identifier an editor can key its handler on.
  pub fn id(&self) -> &'static str {
    match self {
      FixAction::AnnotateThrows => "annotate-throws",
      FixAction::WrapTryCatch => "wrap-try-catch",
    }
  }

  pub fn title(&self, kind: SiteKind) -> &'static str {
    match (self, kind) {
      (FixAction::AnnotateThrows, _) => "Add exception reference to @Throws annotation",
      (FixAction::WrapTryCatch, SiteKind::Call) => "Surround call expression with try/catch",
      (FixAction::WrapTryCatch, SiteKind::Throw) => "Surround throw expression with try/catch",
    }
  }
}

/// The function a finding belongs to, with what the annotate action needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionContext {
  pub node: NodeId,
  pub name: String,
  pub span: Span,
  /// The annotation as it is now, if the function has one.
  pub throws: Option<ThrowsAnnotation>,
  /// The annotation after adding every uncovered exception.
  pub suggested: ThrowsAnnotation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
  pub kind: SiteKind,
  /// Language of the file the finding is in.
  #[serde(default)]
  pub language: SourceLanguage,
  pub location: NodeId,
  pub span: Span,
  pub message: String,
  pub exceptions: Vec<String>,
  /// At most two, `AnnotateThrows` first and only when there is an enclosing Kotlin function.
  pub actions: Vec<FixAction>,
  pub function: Option<FunctionContext>,
  pub wrap_target: NodeId,
  pub wrap_span: Span,
}

/// Builds a finding for an uncovered site; covered sites produce none.
pub fn report(tree: &SyntaxTree, site: &Site<'_>, verdict: &Verdict, settings: &UserSettings) -> Option<Finding> {
  let Verdict::Uncovered { exceptions } = verdict else {
    return None;
  };
  let node = site.node();
  let function = site
    .function()
    .and_then(|f| FunctionDecl::new(tree, f))
    .map(|decl| function_context(tree, decl, exceptions, settings));

  let language = tree.language();
  let mut actions = Vec::with_capacity(2);
  if function.is_some() && language == SourceLanguage::Kotlin {
    actions.push(FixAction::AnnotateThrows);
  }
  actions.push(FixAction::WrapTryCatch);

  let wrap_target = choose_wrap_target(tree, node);
  Some(Finding {
    kind: site.kind(),
    language,
    location: node,
    span: tree.span(node),
    message: message(site, exceptions, function.as_ref()),
    exceptions: exceptions.clone(),
    actions,
    function,
    wrap_target,
    wrap_span: tree.span(wrap_target),
  })
}

fn function_context(
  tree: &SyntaxTree,
  decl: FunctionDecl<'_>,
  exceptions: &[String],
  settings: &UserSettings,
) -> FunctionContext {
  let throws = decl.throws_annotation(settings);
  let mut suggested = synthesize_all(throws.as_ref(), exceptions.iter().map(String::as_str));
  if throws.is_none() {
    match tree.language() {
      SourceLanguage::Kotlin => suggested.name = settings.preferred_annotation_name().to_string(),
      SourceLanguage::Java => {
        suggested.name = "throws".to_string();
        suggested.form = DeclarationForm::ThrowsClause;
      }
    }
  }
  FunctionContext {
    node: decl.node(),
    name: decl.name().unwrap_or("<anonymous>").to_string(),
    span: tree.span(decl.node()),
    throws,
    suggested,
  }
}

fn message(site: &Site<'_>, exceptions: &[String], function: Option<&FunctionContext>) -> String {
  let listed = exceptions.iter().map(|e| format!("`{}`", e)).collect::<Vec<_>>().join(", ");
  let declaration = |function: &FunctionContext| match function.suggested.form {
    DeclarationForm::Annotation => format!("@Throws of `{}`", function.name),
    DeclarationForm::ThrowsClause => format!("the throws clause of `{}`", function.name),
  };
  match (site, function) {
    (Site::Throw(_), Some(function)) => format!(
      "{} is thrown but neither caught nor declared in {}",
      listed,
      declaration(function)
    ),
    (Site::Throw(_), None) => format!("{} is thrown outside any function and is not caught", listed),
    (Site::Call(call), Some(function)) => format!(
      "call to `{}` may throw {}, which is neither caught nor declared in {}",
      call.callee.name,
      listed,
      declaration(function)
    ),
    (Site::Call(call), None) => format!(
      "call to `{}` may throw {} outside any function and is not caught",
      call.callee.name, listed
    ),
  }
}

/// The expression a try/catch should surround: the node itself, or the outermost link of the call
/// chain it is the receiver of, so `x().y().z()` is wrapped whole when `y()` is flagged.
///
/// Java only allows try as a statement, so there the whole statement holding the node is wrapped.
pub fn choose_wrap_target(tree: &SyntaxTree, node: NodeId) -> NodeId {
  let mut current = node;
  if tree.language() == SourceLanguage::Java {
    while let Some(parent) = tree.parent(current) {
      let kind = tree.kind(parent);
      if matches!(kind, NodeKind::Block | NodeKind::Lambda | NodeKind::ClassBody) || kind.is_scope_boundary() {
        break;
      }
      current = parent;
    }
    return current;
  }
  while let Some(parent) = tree.parent(current) {
    match tree.kind(parent) {
      NodeKind::NavigationExpr => current = parent,
      NodeKind::CallExpr if tree.kind(current) == NodeKind::NavigationExpr => current = parent,
      _ => break,
    }
  }
  current
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::coverage::CoverageChecker;
  use crate::kotlin_parser::parse_kotlin;
  use crate::program_model::ProgramModel;
  use crate::site_finder::SiteFinder;
  use crate::syntax::TreeBuilder;

  fn findings(source: &str) -> (SyntaxTree, Vec<Finding>) {
    let settings = UserSettings::default();
    let tree = parse_kotlin("Report.kt", source).unwrap();
    let model = ProgramModel::from_trees([&tree], &settings);
    let checker = CoverageChecker::new(&tree, &model, &settings);
    let findings = SiteFinder::new(&tree, &model, &settings)
      .filter_map(|site| report(&tree, &site, &checker.check(&site), &settings))
      .collect();
    (tree, findings)
  }

  #[test]
  fn test_unannotated_throw_offers_both_actions() {
    let (tree, findings) = findings("fun f() {\n  throw SomeError()\n}");
    assert_eq!(findings.len(), 1);
    let finding = &findings[0];
    assert_eq!(finding.actions, vec![FixAction::AnnotateThrows, FixAction::WrapTryCatch]);
    assert_eq!(finding.exceptions, vec!["SomeError"]);
    assert_eq!(tree.text(finding.location), "throw SomeError()");
    let function = finding.function.as_ref().unwrap();
    assert_eq!(function.name, "f");
    assert_eq!(function.suggested.render(), "@Throws(SomeError::class)");
  }

  #[test]
  fn test_top_level_finding_only_wraps() {
    let (_, findings) = findings("@Throws(IOException::class)\nfun g() {}\nval x = g()");
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].actions, vec![FixAction::WrapTryCatch]);
    assert!(findings[0].function.is_none());
  }

  #[test]
  fn test_suggestion_extends_existing_annotation() {
    let (_, findings) = findings(
      "@Throws(IOException::class)\nfun f() { throw IllegalStateException() }",
    );
    let function = findings[0].function.as_ref().unwrap();
    assert_eq!(function.suggested.render(), "@Throws(IOException::class, IllegalStateException::class)");
    assert!(function.throws.as_ref().unwrap().span.is_some());
  }

  #[test]
  fn test_chained_call_wraps_whole_chain() {
    let source = "class Builder {\n  @Throws(IOException::class)\n  fun y(): Builder = this\n  fun z() {}\n}\nfun x(): Builder = Builder()\nfun f() { x().y().z() }";
    let (tree, findings) = findings(source);
    assert_eq!(findings.len(), 1);
    assert_eq!(tree.text(findings[0].wrap_target), "x().y().z()");
    assert_eq!(tree.text(findings[0].location), "x().y()");
  }

  #[test]
  fn test_wrap_target_on_built_tree() {
    // call(nav(call(nav(call(x), .y)), .z)) for `x().y().z()`
    let src = "x().y().z()";
    let mut b = TreeBuilder::new("chain.kt", src);
    let root = b.root();
    let outer = b.add(root, NodeKind::CallExpr, 0, 11);
    let nav_z = b.add(outer, NodeKind::NavigationExpr, 0, 9);
    let call_y = b.add(nav_z, NodeKind::CallExpr, 0, 7);
    let nav_y = b.add(call_y, NodeKind::NavigationExpr, 0, 5);
    let call_x = b.add(nav_y, NodeKind::CallExpr, 0, 3);
    b.add(call_x, NodeKind::Identifier, 0, 1);
    b.add(call_x, NodeKind::CallSuffix, 1, 3);
    b.add(nav_y, NodeKind::NavigationSuffix, 3, 5);
    b.add(call_y, NodeKind::CallSuffix, 5, 7);
    b.add(nav_z, NodeKind::NavigationSuffix, 7, 9);
    b.add(outer, NodeKind::CallSuffix, 9, 11);
    let tree = b.finish();
    assert_eq!(choose_wrap_target(&tree, call_y), outer);
    assert_eq!(choose_wrap_target(&tree, call_x), outer);
    assert_eq!(tree.span(outer).len(), src.len());
  }

  #[test]
  fn test_java_finding_wraps_statement_and_suggests_throws_clause() {
    let settings = UserSettings::default();
    let kotlin = parse_kotlin("Api.kt", "class Api {\n  @Throws(java.io.IOException::class)\n  fun read(): String = \"\"\n}\n").unwrap();
    let java = crate::java_parser::parse_java(
      "Client.java",
      "class Client {\n    String load(Api api) {\n        String text = api.read().trim();\n        return text;\n    }\n}\n",
    )
    .unwrap();
    let model = ProgramModel::from_trees([&kotlin, &java], &settings);
    let checker = CoverageChecker::new(&java, &model, &settings);
    let findings: Vec<Finding> = SiteFinder::new(&java, &model, &settings)
      .filter_map(|site| report(&java, &site, &checker.check(&site), &settings))
      .collect();
    assert_eq!(findings.len(), 1);
    let finding = &findings[0];
    assert_eq!(finding.language, SourceLanguage::Java);
    assert_eq!(finding.actions, vec![FixAction::WrapTryCatch]);
    assert_eq!(java.text(finding.location), "api.read()");
    assert_eq!(java.text(finding.wrap_target), "String text = api.read().trim();");
    assert!(finding.message.contains("the throws clause of `load`"));
    let function = finding.function.as_ref().unwrap();
    assert_eq!(function.suggested.render(), "throws IOException");
  }

  #[test]
  fn test_action_ids_and_titles() {
    assert_eq!(FixAction::AnnotateThrows.id(), "annotate-throws");
    assert_eq!(FixAction::WrapTryCatch.id(), "wrap-try-catch");
    assert_eq!(FixAction::WrapTryCatch.title(SiteKind::Throw), "Surround throw expression with try/catch");
  }
}
