use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::errors::ResolutionFailure;
use crate::function_finder::enclosing_function;
use crate::program_model::{normalize_type_name, ClassDecl, ProgramModel, Resolution, TypeSymbol};
use crate::settings::UserSettings;
use crate::syntax::{NodeId, NodeKind, SyntaxTree};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeName {
  pub simple: String,
  pub qualified: String,
}

impl From<&ClassDecl> for TypeName {
  fn from(class: &ClassDecl) -> Self {
    TypeName { simple: class.name.clone(), qualified: class.qualified_name.clone() }
  }
}

/// A resolved exception type with its linearized ancestor chain (itself first).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionType {
  pub simple_name: String,
  pub qualified_name: String,
  pub ancestors: Vec<TypeName>,
}

impl ExceptionType {
  pub fn is_subtype_of(&self, simple_name: &str) -> bool {
    self.ancestors.iter().any(|a| a.simple == simple_name)
  }
}

/// Resolves thrown expressions and annotation references to [`ExceptionType`]s.
pub struct TypeResolver<'m> {
  model: &'m ProgramModel,
  max_ancestor_depth: usize,
  max_alias_hops: usize,
}

impl<'m> TypeResolver<'m> {
  pub fn new(model: &'m ProgramModel, settings: &UserSettings) -> Self {
    Self {
      model,
      max_ancestor_depth: settings.max_ancestor_depth,
      max_alias_hops: settings.max_alias_hops,
    }
  }

  /// Resolves a type reference as written, following aliases.
  pub fn resolve_reference(&self, name: &str) -> Result<ExceptionType, ResolutionFailure> {
    let class = self.model.resolve_class(name, self.max_alias_hops)?;
    Ok(ExceptionType {
      simple_name: class.name.clone(),
      qualified_name: class.qualified_name.clone(),
      ancestors: self.ancestor_chain(class)?,
    })
  }

  /// Simple name of the class `name` denotes once aliases are followed.
  pub fn resolve_class_name(&self, name: &str) -> Result<String, ResolutionFailure> {
    Ok(self.model.resolve_class(name, self.max_alias_hops)?.name.clone())
  }

  /// Resolves the type a `throw` expression throws.
  pub fn resolve_thrown(&self, tree: &SyntaxTree, throw: NodeId) -> Result<ExceptionType, ResolutionFailure> {
    let reference = self.thrown_reference(tree, throw)?;
    self.resolve_reference(&reference)
  }

  /// The type name a `throw` refers to, before resolution.
  ///
  /// `throw Foo(..)` names `Foo`. `throw e` names the declared type of the catch or function
  /// parameter `e`, or the object `e` when one is declared. Anything else is not a constructor call.
  pub fn thrown_reference(&self, tree: &SyntaxTree, throw: NodeId) -> Result<String, ResolutionFailure> {
    let expression = tree
      .named_children(throw)
      .next()
      .ok_or_else(|| ResolutionFailure::NotAConstructorCall { text: tree.text(throw).to_string() })?;
    match tree.kind(expression) {
      NodeKind::CallExpr => {
        let callee = tree.named_children(expression).next();
        match callee.map(|c| (c, tree.kind(c))) {
          Some((callee, NodeKind::Identifier | NodeKind::NavigationExpr)) => Ok(normalize_type_name(tree.text(callee))),
          _ => Err(ResolutionFailure::NotAConstructorCall { text: tree.text(expression).to_string() }),
        }
      }
      NodeKind::Identifier => {
        let name = tree.text(expression);
        if let Some(caught) = catch_parameter_type(tree, throw, name) {
          trace!(name, caught = %caught, "rethrow of catch parameter");
          return Ok(caught);
        }
        if let Some(declared) = function_parameter_type(tree, throw, name) {
          return Ok(declared);
        }
        match self.model.resolve_type(name) {
          Resolution::Resolved(TypeSymbol::Class(_)) => Ok(name.to_string()),
          _ => Err(ResolutionFailure::NotAConstructorCall { text: name.to_string() }),
        }
      }
      _ => Err(ResolutionFailure::NotAConstructorCall { text: tree.text(expression).to_string() }),
    }
  }

  /// Itself first, then each superclass, ending at the root or at the first superclass that cannot be resolved.
  pub fn ancestor_chain(&self, class: &ClassDecl) -> Result<Vec<TypeName>, ResolutionFailure> {
    let mut chain = vec![TypeName::from(class)];
    let mut visited: FxHashSet<&str> = FxHashSet::default();
    visited.insert(class.qualified_name.as_str());
    let mut current = class;
    while let Some(parent) = self.model.superclass_of(current, self.max_alias_hops) {
      if !visited.insert(parent.qualified_name.as_str()) {
        return Err(ResolutionFailure::AncestorCycle { name: class.qualified_name.clone() });
      }
      if chain.len() >= self.max_ancestor_depth {
        return Err(ResolutionFailure::DepthExceeded {
          name: class.qualified_name.clone(),
          limit: self.max_ancestor_depth,
        });
      }
      chain.push(TypeName::from(parent));
      current = parent;
    }
    Ok(chain)
  }
}

/// Declared type of the catch parameter `name` visible at `node`, if any.
fn catch_parameter_type(tree: &SyntaxTree, node: NodeId, name: &str) -> Option<String> {
  tree
    .ancestors(node)
    .take_while(|a| !tree.kind(*a).is_scope_boundary())
    .filter(|a| tree.kind(*a) == NodeKind::CatchClause)
    .find(|clause| tree.name_of(*clause) == Some(name))
    .and_then(|clause| tree.named_child_after_token(clause, ":"))
    .map(|type_ref| normalize_type_name(tree.text(type_ref)))
}

fn function_parameter_type(tree: &SyntaxTree, node: NodeId, name: &str) -> Option<String> {
  let function = enclosing_function(tree, node)?;
  let parameters = tree.first_child_of_kind(function, NodeKind::Parameters)?;
  tree
    .children(parameters)
    .iter()
    .copied()
    .filter(|p| tree.kind(*p) == NodeKind::Parameter)
    .find(|p| tree.name_of(*p) == Some(name))
    .and_then(|p| tree.named_child_after_token(p, ":"))
    .map(|type_ref| normalize_type_name(tree.text(type_ref)))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::kotlin_parser::parse_kotlin;
  use crate::program_model::SuperTypeRef;

  fn setup(source: &str) -> (SyntaxTree, ProgramModel) {
    let tree = parse_kotlin("Types.kt", source).unwrap();
    let model = ProgramModel::from_trees([&tree], &UserSettings::default());
    (tree, model)
  }

  fn throws_of(tree: &SyntaxTree) -> Vec<NodeId> {
    tree
      .descendants(tree.root())
      .filter(|n| tree.kind(*n) == NodeKind::ThrowExpr)
      .collect()
  }

  #[test]
  fn test_chain_ends_at_root() {
    let (tree, model) = setup("open class BaseError : Exception()\nclass DerivedError : BaseError()\nfun f() { throw DerivedError() }");
    let settings = UserSettings::default();
    let resolver = TypeResolver::new(&model, &settings);
    let thrown = resolver.resolve_thrown(&tree, throws_of(&tree)[0]).unwrap();
    let names: Vec<&str> = thrown.ancestors.iter().map(|a| a.simple.as_str()).collect();
    assert_eq!(names, vec!["DerivedError", "BaseError", "Exception", "Throwable", "Any"]);
    assert!(thrown.is_subtype_of("BaseError"));
  }

  #[test]
  fn test_alias_is_followed() {
    let (tree, model) = setup("typealias Boom = IllegalStateException\nfun f() { throw Boom(\"x\") }");
    let settings = UserSettings::default();
    let resolver = TypeResolver::new(&model, &settings);
    let thrown = resolver.resolve_thrown(&tree, throws_of(&tree)[0]).unwrap();
    assert_eq!(thrown.simple_name, "IllegalStateException");
  }

  #[test]
  fn test_class_name_through_alias() {
    let (_, model) = setup("typealias Boom = IllegalStateException");
    let settings = UserSettings::default();
    let resolver = TypeResolver::new(&model, &settings);
    assert_eq!(resolver.resolve_class_name("Boom").unwrap(), "IllegalStateException");
    assert!(resolver.resolve_class_name("Mystery").is_err());
  }

  #[test]
  fn test_qualified_constructor() {
    let (tree, model) = setup("fun f() { throw java.io.IOException(\"x\") }");
    let settings = UserSettings::default();
    let resolver = TypeResolver::new(&model, &settings);
    assert_eq!(resolver.thrown_reference(&tree, throws_of(&tree)[0]).unwrap(), "java.io.IOException");
    assert_eq!(resolver.resolve_thrown(&tree, throws_of(&tree)[0]).unwrap().simple_name, "IOException");
  }

  #[test]
  fn test_rethrow_uses_catch_type() {
    let (tree, model) = setup("fun f() { try { g() } catch (e: IOException) { throw e } }");
    let settings = UserSettings::default();
    let resolver = TypeResolver::new(&model, &settings);
    assert_eq!(resolver.thrown_reference(&tree, throws_of(&tree)[0]).unwrap(), "IOException");
  }

  #[test]
  fn test_parameter_throw_uses_declared_type() {
    let (tree, model) = setup("fun f(err: IllegalArgumentException) { throw err }");
    let settings = UserSettings::default();
    let resolver = TypeResolver::new(&model, &settings);
    assert_eq!(resolver.resolve_thrown(&tree, throws_of(&tree)[0]).unwrap().simple_name, "IllegalArgumentException");
  }

  #[test]
  fn test_variable_throw_is_not_a_constructor_call() {
    let (tree, model) = setup("fun f() { val err = build()\n throw err }");
    let settings = UserSettings::default();
    let resolver = TypeResolver::new(&model, &settings);
    assert!(matches!(
      resolver.resolve_thrown(&tree, throws_of(&tree)[0]),
      Err(ResolutionFailure::NotAConstructorCall { .. })
    ));
  }

  #[test]
  fn test_unresolved_type() {
    let (tree, model) = setup("fun f() { throw MysteryError() }");
    let settings = UserSettings::default();
    let resolver = TypeResolver::new(&model, &settings);
    assert!(matches!(
      resolver.resolve_thrown(&tree, throws_of(&tree)[0]),
      Err(ResolutionFailure::Unresolved { .. })
    ));
  }

  fn class(name: &str, superclass: &str) -> ClassDecl {
    ClassDecl {
      name: name.to_string(),
      qualified_name: name.to_string(),
      supertypes: vec![SuperTypeRef { name: superclass.to_string(), invokes_constructor: true }],
      is_interface: false,
      file: Some("x.kt".to_string()),
    }
  }

  #[test]
  fn test_ancestor_cycle_fails() {
    let mut model = ProgramModel::new();
    model.add_class(class("A", "B"));
    model.add_class(class("B", "A"));
    let settings = UserSettings::default();
    let resolver = TypeResolver::new(&model, &settings);
    assert!(matches!(resolver.resolve_reference("A"), Err(ResolutionFailure::AncestorCycle { .. })));
  }

  #[test]
  fn test_depth_bound() {
    let mut model = ProgramModel::new();
    for i in 0..10 {
      model.add_class(class(&format!("E{}", i), &format!("E{}", i + 1)));
    }
    let settings = UserSettings { max_ancestor_depth: 5, ..UserSettings::default() };
    let resolver = TypeResolver::new(&model, &settings);
    assert!(matches!(
      resolver.resolve_reference("E0"),
      Err(ResolutionFailure::DepthExceeded { limit: 5, .. })
    ));
    let settings = UserSettings::default();
    let resolver = TypeResolver::new(&model, &settings);
    assert_eq!(resolver.resolve_reference("E0").unwrap().ancestors.len(), 10);
  }
}
