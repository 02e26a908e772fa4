//! Checks that every Kotlin `throw` and every call to a `@Throws`-annotated function is either caught by
//! an enclosing try or declared in the enclosing function's `@Throws`.
//!
//! Java sources analyzed alongside are checked for calls into annotated Kotlin functions, which must be
//! caught or listed in the calling method's `throws` clause.

pub mod annotation_synthesizer;
pub mod cancellation;
pub mod coverage;
pub mod diagnostics;
pub mod errors;
pub mod function_finder;
pub mod java_parser;
pub mod kotlin_parser;
pub mod lowering;
pub mod program_model;
pub mod settings;
pub mod site_finder;
pub mod syntax;
pub mod throws_annotation;
pub mod try_catch_finder;
pub mod type_resolver;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub use annotation_synthesizer::{synthesize_annotation, synthesize_for_type};
pub use cancellation::{Cancellable, CancellationToken};
pub use coverage::{CoverageChecker, MatchPolicy, Verdict};
pub use diagnostics::{choose_wrap_target, report, Finding, FixAction};
pub use errors::AnalysisError;
pub use java_parser::parse_java;
pub use kotlin_parser::parse_kotlin;
pub use lowering::parse_source;
pub use program_model::{CallReceiver, ProgramModel};
pub use settings::UserSettings;
pub use site_finder::{Site, SiteFinder, SiteKind};
pub use syntax::{SourceLanguage, SyntaxTree};
pub use throws_annotation::{ThrowsAnnotation, ThrowsEntry};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
  pub file: String,
  pub package: Option<String>,
  pub findings: Vec<Finding>,
}

/// Checks every site in `tree` against `model`, in document order.
pub fn analyze_file(tree: &SyntaxTree, model: &ProgramModel, settings: &UserSettings) -> Vec<Finding> {
  let checker = CoverageChecker::new(tree, model, settings);
  let mut sites = 0usize;
  let findings: Vec<Finding> = SiteFinder::new(tree, model, settings)
    .inspect(|_| sites += 1)
    .filter_map(|site| report(tree, &site, &checker.check(&site), settings))
    .collect();
  debug!(file = tree.file(), sites, findings = findings.len(), "analyzed file");
  findings
}

/// Parses one Kotlin or Java source, indexes it on top of the built-in exception hierarchy and analyzes it.
pub fn analyze_code(content: &str, file_name: &str, settings: &UserSettings) -> Result<AnalysisResult, AnalysisError> {
  settings.validate()?;
  let tree = parse_source(file_name, content)?;
  let model = ProgramModel::from_trees([&tree], settings);
  Ok(AnalysisResult {
    file: file_name.to_string(),
    package: tree.package().map(str::to_string),
    findings: analyze_file(&tree, &model, settings),
  })
}

/// Analyzes several sources against one shared model, so calls across files resolve.
///
/// `cancel` is checked before each file; a cancelled run returns [`AnalysisError::Cancelled`].
pub fn analyze_sources(
  sources: &[(String, String)],
  settings: &UserSettings,
  cancel: &impl Cancellable,
) -> Result<Vec<AnalysisResult>, AnalysisError> {
  settings.validate()?;
  let mut trees = Vec::with_capacity(sources.len());
  for (name, content) in sources {
    if cancel.is_cancelled() {
      return Err(AnalysisError::Cancelled);
    }
    trees.push(parse_source(name, content)?);
  }
  let model = ProgramModel::from_trees(&trees, settings);
  info!(
    files = trees.len(),
    classes = model.class_count(),
    functions = model.function_count(),
    "program model ready"
  );

  let mut results = Vec::with_capacity(trees.len());
  for tree in &trees {
    if cancel.is_cancelled() {
      return Err(AnalysisError::Cancelled);
    }
    results.push(AnalysisResult {
      file: tree.file().to_string(),
      package: tree.package().map(str::to_string),
      findings: analyze_file(tree, &model, settings),
    });
  }
  Ok(results)
}
