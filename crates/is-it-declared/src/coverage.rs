//! Decides whether a site is covered: caught by an enclosing try, or declared by the enclosing
//! function's throws annotation.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::errors::ResolutionFailure;
use crate::function_finder::FunctionDecl;
use crate::program_model::{normalize_type_name, simple_name, ProgramModel};
use crate::settings::UserSettings;
use crate::site_finder::{CallSite, Site, ThrowSite};
use crate::syntax::{NodeId, SyntaxTree};
use crate::throws_annotation::{ThrowsAnnotation, ThrowsEntry};
use crate::try_catch_finder::TryProtection;
use crate::type_resolver::TypeResolver;

/// How a thrown or declared exception is compared against caught or annotated ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchPolicy {
  /// Any type in the exception's ancestor chain, compared by simple name.
  #[default]
  AncestorChain,
  /// The exception's own simple name (after alias resolution), no supertypes.
  SimpleName,
  /// The reference text as written, no resolution.
  Exact,
}

impl std::str::FromStr for MatchPolicy {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "ancestor-chain" => Ok(MatchPolicy::AncestorChain),
      "simple-name" => Ok(MatchPolicy::SimpleName),
      "exact" => Ok(MatchPolicy::Exact),
      other => Err(format!("unknown match policy `{}`", other)),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoverageReason {
  Caught,
  Declared,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
  Covered(CoverageReason),
  /// Best-effort simple names of the exceptions that escape, in declaration order.
  Uncovered { exceptions: Vec<String> },
}

impl Verdict {
  pub fn is_covered(&self) -> bool {
    matches!(self, Verdict::Covered(_))
  }
}

/// Stand-in name for a throw whose type cannot be read off the expression.
pub const UNKNOWN_THROWN_TYPE: &str = "Throwable";

pub struct CoverageChecker<'a> {
  tree: &'a SyntaxTree,
  settings: &'a UserSettings,
  resolver: TypeResolver<'a>,
}

impl<'a> CoverageChecker<'a> {
  pub fn new(tree: &'a SyntaxTree, model: &'a ProgramModel, settings: &'a UserSettings) -> Self {
    Self {
      tree,
      settings,
      resolver: TypeResolver::new(model, settings),
    }
  }

  pub fn is_covered(&self, site: &Site<'_>) -> bool {
    self.check(site).is_covered()
  }

  pub fn check(&self, site: &Site<'_>) -> Verdict {
    match site {
      Site::Throw(throw) => self.check_throw(throw),
      Site::Call(call) => self.check_call(call),
    }
  }

  fn check_throw(&self, site: &ThrowSite) -> Verdict {
    if let TryProtection::Guarded(_) = site.protection {
      return Verdict::Covered(CoverageReason::Caught);
    }
    let written = match self.resolver.thrown_reference(self.tree, site.node) {
      Ok(reference) => reference,
      Err(err) => {
        debug!(file = self.tree.file(), %err, "thrown type unknown");
        UNKNOWN_THROWN_TYPE.to_string()
      }
    };
    let uncovered = || Verdict::Uncovered { exceptions: vec![self.display_name(&written)] };

    let Some(annotation) = self.declared_by(site.function) else {
      return uncovered();
    };
    if self.accepts(&written, annotation.entries.iter().map(ThrowsEntry::text)) {
      Verdict::Covered(CoverageReason::Declared)
    } else {
      uncovered()
    }
  }

  fn check_call(&self, site: &CallSite<'_>) -> Verdict {
    let declared_here = self.declared_by(site.function);
    let mut uncovered = Vec::new();
    let mut any_declared = false;

    for entry in site.declared() {
      if entry.is_raw() {
        trace!(entry = entry.text(), "ignoring non-class-literal entry of callee annotation");
        continue;
      }
      let written = entry.text();
      if site
        .handlers
        .iter()
        .any(|scope| self.accepts(written, scope.caught.iter().map(String::as_str)))
      {
        continue;
      }
      if let Some(annotation) = &declared_here {
        if self.accepts(written, annotation.entries.iter().map(ThrowsEntry::text)) {
          any_declared = true;
          continue;
        }
      }
      uncovered.push(self.display_name(written));
    }

    if !uncovered.is_empty() {
      Verdict::Uncovered { exceptions: uncovered }
    } else if any_declared {
      Verdict::Covered(CoverageReason::Declared)
    } else {
      Verdict::Covered(CoverageReason::Caught)
    }
  }

  fn declared_by(&self, function: Option<NodeId>) -> Option<ThrowsAnnotation> {
    FunctionDecl::new(self.tree, function?)?.throws_annotation(self.settings)
  }

  /// Whether the exception written as `written` is one of `accepted` under the configured policy.
  ///
  /// Accepted entries stand for their written simple name and, when it resolves, the class they
  /// name after aliases. A textual match is tried first; resolving `written` is only needed to widen
  /// the comparison to its resolved type or its ancestors. A failed resolution never covers.
  pub fn accepts<'n>(&self, written: &str, accepted: impl IntoIterator<Item = &'n str>) -> bool {
    let accepted: Vec<String> = accepted.into_iter().map(normalize_type_name).collect();
    let written = normalize_type_name(written);
    match self.settings.match_policy {
      MatchPolicy::Exact => accepted.iter().any(|a| *a == written),
      MatchPolicy::SimpleName | MatchPolicy::AncestorChain => {
        let mut accepted_simple: Vec<String> = accepted.iter().map(|a| simple_name(a).to_string()).collect();
        for entry in &accepted {
          match self.resolver.resolve_class_name(entry) {
            Ok(resolved) if !accepted_simple.contains(&resolved) => accepted_simple.push(resolved),
            Ok(_) => {}
            Err(err) => trace!(entry = entry.as_str(), %err, "accepted entry kept as written"),
          }
        }
        if accepted_simple.iter().any(|a| a == simple_name(&written)) {
          return true;
        }
        let resolved = match self.resolver.resolve_reference(&written) {
          Ok(resolved) => resolved,
          Err(err) => {
            self.log_failure(&written, &err);
            return false;
          }
        };
        if self.settings.match_policy == MatchPolicy::SimpleName {
          return accepted_simple.contains(&resolved.simple_name);
        }
        resolved.ancestors.iter().any(|a| accepted_simple.contains(&a.simple))
      }
    }
  }

  fn display_name(&self, written: &str) -> String {
    match self.resolver.resolve_reference(written) {
      Ok(resolved) => resolved.simple_name,
      Err(_) => simple_name(&normalize_type_name(written)).to_string(),
    }
  }

  fn log_failure(&self, written: &str, err: &ResolutionFailure) {
    debug!(file = self.tree.file(), reference = written, %err, "cannot widen match through resolution");
  }
}
