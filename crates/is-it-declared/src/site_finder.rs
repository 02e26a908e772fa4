//! Walks one file and yields every throw and every call to a function that declares exceptions.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::errors::StructuralError;
use crate::function_finder::{call_arity, enclosing_function};
use crate::program_model::{normalize_type_name, CallReceiver, FunctionSummary, ProgramModel, Resolution, TypeSymbol};
use crate::settings::UserSettings;
use crate::syntax::{NodeId, NodeKind, SourceLanguage, SyntaxTree};
use crate::throws_annotation::ThrowsEntry;
use crate::try_catch_finder::{enclosing_tries, throw_protection, TryProtection, TryScope};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteKind {
  Throw,
  Call,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrowSite {
  pub node: NodeId,
  pub function: Option<NodeId>,
  pub protection: TryProtection,
}

#[derive(Debug, Clone)]
pub struct CallSite<'m> {
  pub node: NodeId,
  pub function: Option<NodeId>,
  pub callee: &'m FunctionSummary,
  /// Enclosing try scopes inside the same function, nearest first.
  pub handlers: Vec<TryScope>,
}

impl CallSite<'_> {
  /// Exceptions the callee declares, in annotation order.
  pub fn declared(&self) -> &[ThrowsEntry] {
    self.callee.throws.as_ref().map(|t| t.entries.as_slice()).unwrap_or_default()
  }
}

#[derive(Debug, Clone)]
pub enum Site<'m> {
  Throw(ThrowSite),
  Call(CallSite<'m>),
}

impl Site<'_> {
  pub fn node(&self) -> NodeId {
    match self {
      Site::Throw(site) => site.node,
      Site::Call(site) => site.node,
    }
  }

  pub fn function(&self) -> Option<NodeId> {
    match self {
      Site::Throw(site) => site.function,
      Site::Call(site) => site.function,
    }
  }

  pub fn kind(&self) -> SiteKind {
    match self {
      Site::Throw(_) => SiteKind::Throw,
      Site::Call(_) => SiteKind::Call,
    }
  }
}

/// How far receiver typing follows initializers and call results.
const MAX_INFERENCE_DEPTH: usize = 8;

/// The parts of a call expression resolution looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallShape<'t> {
  pub name: &'t str,
  /// The expression before the `.`, absent for a bare call.
  pub receiver: Option<NodeId>,
  pub arguments: usize,
}

/// Reads the callee name, receiver and argument count off a call. `None` when the callee is not a
/// named reference, e.g. `f()()` or `(g)()`.
pub fn call_shape(tree: &SyntaxTree, call: NodeId) -> Result<Option<CallShape<'_>>, StructuralError> {
  let suffix = tree
    .first_child_of_kind(call, NodeKind::CallSuffix)
    .ok_or(StructuralError::UnexpectedShape { kind: "call", expected: "argument list" })?;
  let arguments = call_arity(tree, call).unwrap_or(0);

  if tree.language() == SourceLanguage::Java {
    let children = tree.children(call);
    let at = children.iter().position(|c| *c == suffix).unwrap_or(children.len());
    let name = children[..at]
      .iter()
      .rev()
      .copied()
      .find(|c| !tree.kind(*c).is_token())
      .filter(|c| tree.kind(*c) == NodeKind::Identifier)
      .ok_or(StructuralError::UnexpectedShape { kind: "call", expected: "method name" })?;
    let receiver = if tree.has_token(call, ".") {
      tree.named_children(call).next().filter(|r| *r != name)
    } else {
      None
    };
    return Ok(Some(CallShape { name: tree.text(name), receiver, arguments }));
  }

  let callee = tree
    .named_children(call)
    .next()
    .filter(|c| *c != suffix)
    .ok_or(StructuralError::UnexpectedShape { kind: "call", expected: "callee" })?;
  match tree.kind(callee) {
    NodeKind::Identifier => Ok(Some(CallShape { name: tree.text(callee), receiver: None, arguments })),
    NodeKind::NavigationExpr => {
      let name = tree
        .children(callee)
        .iter()
        .rev()
        .find(|c| tree.kind(**c) == NodeKind::NavigationSuffix)
        .and_then(|s| tree.name_of(*s))
        .ok_or(StructuralError::UnexpectedShape { kind: "navigation", expected: "member name" })?;
      let receiver = tree
        .named_children(callee)
        .next()
        .filter(|r| tree.kind(*r) != NodeKind::NavigationSuffix)
        .ok_or(StructuralError::UnexpectedShape { kind: "navigation", expected: "receiver" })?;
      Ok(Some(CallShape { name, receiver: Some(receiver), arguments }))
    }
    _ => {
      trace!(file = tree.file(), callee = tree.text(callee), "callee is not a named reference");
      Ok(None)
    }
  }
}

/// Named classes and objects lexically around `node`, nearest first.
pub fn enclosing_classes(tree: &SyntaxTree, node: NodeId) -> Vec<String> {
  tree
    .ancestors(node)
    .filter(|a| matches!(tree.kind(*a), NodeKind::Class | NodeKind::Object))
    .filter_map(|a| tree.name_of(a))
    .map(str::to_string)
    .collect()
}

/// Type written on a parameter or declarator: after `:` in Kotlin, before the name in Java.
fn written_type(tree: &SyntaxTree, node: NodeId) -> Option<String> {
  tree
    .named_child_after_token(node, ":")
    .filter(|t| matches!(tree.kind(*t), NodeKind::TypeRef | NodeKind::NullableType))
    .or_else(|| tree.first_child_of_kind(node, NodeKind::TypeRef))
    .map(|t| normalize_type_name(tree.text(t)))
    .filter(|t| t != "var")
}

/// Parameter `name` of a function, or of a class's primary constructor.
fn parameter_named(tree: &SyntaxTree, owner: NodeId, name: &str) -> Option<NodeId> {
  let mut stack: Vec<NodeId> = tree.children(owner).to_vec();
  while let Some(node) = stack.pop() {
    match tree.kind(node) {
      NodeKind::Parameter if tree.name_of(node) == Some(name) => return Some(node),
      NodeKind::Parameters | NodeKind::Other => stack.extend(tree.children(node).iter().copied()),
      _ => {}
    }
  }
  None
}

/// Lazy, single-pass, document-order walk over a tree.
///
/// The walk uses an explicit stack, so nesting depth is bounded only by memory. Try scopes are
/// recorded as the walk enters each try and live only as long as the finder.
pub struct SiteFinder<'a> {
  tree: &'a SyntaxTree,
  model: &'a ProgramModel,
  max_alias_hops: usize,
  stack: Vec<NodeId>,
  scopes: FxHashMap<NodeId, TryScope>,
}

impl<'a> SiteFinder<'a> {
  pub fn new(tree: &'a SyntaxTree, model: &'a ProgramModel, settings: &UserSettings) -> Self {
    Self {
      tree,
      model,
      max_alias_hops: settings.max_alias_hops,
      stack: vec![tree.root()],
      scopes: FxHashMap::default(),
    }
  }

  fn throw_site(&self, node: NodeId) -> ThrowSite {
    ThrowSite {
      node,
      function: enclosing_function(self.tree, node),
      protection: throw_protection(self.tree, node),
    }
  }

  fn call_site(&self, node: NodeId) -> Result<Option<CallSite<'a>>, StructuralError> {
    let tree = self.tree;
    let Some(shape) = call_shape(tree, node)? else {
      return Ok(None);
    };
    let callee = match self.resolve_call(node, &shape, MAX_INFERENCE_DEPTH) {
      Resolution::Resolved(summary) => summary,
      Resolution::Unresolved => {
        trace!(
          file = tree.file(),
          name = shape.name,
          arguments = shape.arguments,
          "call target not resolvable, skipping"
        );
        return Ok(None);
      }
    };
    if callee.throws.as_ref().map_or(true, |t| t.is_empty()) {
      return Ok(None);
    }

    let handlers = enclosing_tries(tree, node)
      .into_iter()
      .filter_map(|t| self.scopes.get(&t).cloned())
      .collect();
    Ok(Some(CallSite {
      node,
      function: enclosing_function(tree, node),
      callee,
      handlers,
    }))
  }

  fn resolve_call(&self, call: NodeId, shape: &CallShape<'_>, depth: usize) -> Resolution<&'a FunctionSummary> {
    let receiver = match shape.receiver {
      None => CallReceiver::Implicit {
        enclosing: enclosing_classes(self.tree, call),
        top_level: self.tree.language() == SourceLanguage::Kotlin,
      },
      Some(expression) => self
        .value_type(expression, depth)
        .map_or(CallReceiver::Unknown, CallReceiver::Typed),
    };
    self
      .model
      .resolve_function(shape.name, shape.arguments, &receiver, self.max_alias_hops)
  }

  /// Best-effort static type of an expression used as a call receiver.
  fn value_type(&self, expression: NodeId, depth: usize) -> Option<String> {
    if depth == 0 {
      return None;
    }
    let tree = self.tree;
    match tree.kind(expression) {
      NodeKind::Identifier => {
        let name = tree.text(expression);
        if let Some(declared) = self.declared_type_of(expression, name, depth) {
          return declared;
        }
        match self.model.resolve_type(name) {
          Resolution::Resolved(TypeSymbol::Class(class)) => Some(class.name.clone()),
          // `UtilsKt.load()` or a library class: a static reference to a type the model does not know.
          _ if name.starts_with(|c: char| c.is_uppercase()) => Some(name.to_string()),
          _ => None,
        }
      }
      NodeKind::StringLiteral => Some("String".to_string()),
      NodeKind::ConstructorInvocation => tree
        .first_child_of_kind(expression, NodeKind::TypeRef)
        .map(|t| normalize_type_name(tree.text(t))),
      NodeKind::CallExpr => {
        let shape = call_shape(tree, expression).ok().flatten()?;
        if shape.receiver.is_none() {
          if let Resolution::Resolved(TypeSymbol::Class(class)) = self.model.resolve_type(shape.name) {
            return Some(class.name.clone());
          }
        }
        self.resolve_call(expression, &shape, depth - 1).ok()?.returns.clone()
      }
      NodeKind::Other if matches!(tree.text(expression), "this" | "super") => {
        enclosing_classes(tree, expression).into_iter().next()
      }
      _ => None,
    }
  }

  /// Type of the variable or parameter `name` visible at `at`. The outer `Some` means a declaration
  /// was found, even when its type could not be told.
  fn declared_type_of(&self, at: NodeId, name: &str, depth: usize) -> Option<Option<String>> {
    let tree = self.tree;
    let before = tree.span(at).start;
    for scope in tree.ancestors(at) {
      match tree.kind(scope) {
        NodeKind::Block | NodeKind::ClassBody | NodeKind::File => {
          let ordered = tree.kind(scope) == NodeKind::Block;
          let declared = tree
            .children(scope)
            .iter()
            .rev()
            .copied()
            .filter(|c| tree.kind(*c) == NodeKind::Property)
            .filter(|c| !ordered || tree.span(*c).end <= before)
            .find_map(|property| self.property_type(property, name, depth));
          if declared.is_some() {
            return declared;
          }
        }
        NodeKind::Function | NodeKind::Class => {
          if let Some(parameter) = parameter_named(tree, scope, name) {
            return Some(written_type(tree, parameter));
          }
        }
        _ => {}
      }
    }
    None
  }

  fn property_type(&self, property: NodeId, name: &str, depth: usize) -> Option<Option<String>> {
    let tree = self.tree;
    let declarator = tree
      .children(property)
      .iter()
      .copied()
      .find(|c| tree.kind(*c) == NodeKind::Other && tree.name_of(*c) == Some(name))?;
    let written = written_type(tree, declarator).or_else(|| written_type(tree, property));
    if written.is_some() {
      return Some(written);
    }
    let initializer = tree
      .named_child_after_token(property, "=")
      .or_else(|| tree.named_child_after_token(declarator, "="));
    Some(initializer.and_then(|value| self.value_type(value, depth.saturating_sub(1))))
  }
}

impl<'a> Iterator for SiteFinder<'a> {
  type Item = Site<'a>;

  fn next(&mut self) -> Option<Site<'a>> {
    while let Some(node) = self.stack.pop() {
      let tree = self.tree;
      self.stack.extend(tree.children(node).iter().rev().copied());
      match tree.kind(node) {
        NodeKind::TryBlock => {
          self.scopes.insert(node, TryScope::from_node(tree, node));
        }
        NodeKind::ThrowExpr => return Some(Site::Throw(self.throw_site(node))),
        NodeKind::CallExpr => match self.call_site(node) {
          Ok(Some(site)) => return Some(Site::Call(site)),
          Ok(None) => {}
          Err(err) => warn!(
            file = tree.file(),
            line = tree.span(node).start_pos.line + 1,
            %err,
            "skipping call site"
          ),
        },
        _ => {}
      }
    }
    None
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::java_parser::parse_java;
  use crate::kotlin_parser::parse_kotlin;

  fn sites_of(source: &str) -> (SyntaxTree, ProgramModel) {
    let tree = parse_kotlin("Sites.kt", source).unwrap();
    let model = ProgramModel::from_trees([&tree], &UserSettings::default());
    (tree, model)
  }

  /// Callee names of the dangerous calls found in `tree`, in document order.
  fn callees(tree: &SyntaxTree, model: &ProgramModel) -> Vec<String> {
    SiteFinder::new(tree, model, &UserSettings::default())
      .filter_map(|s| match s {
        Site::Call(call) => Some(call.callee.name.clone()),
        Site::Throw(_) => None,
      })
      .collect()
  }

  fn kotlin_callees(source: &str) -> Vec<String> {
    let (tree, model) = sites_of(source);
    callees(&tree, &model)
  }

  #[test]
  fn test_collects_throws_and_dangerous_calls_in_order() {
    let (tree, model) = sites_of(
      r#"
@Throws(IOException::class)
fun load() { throw IOException("x") }
fun safe() {}
fun main() {
  safe()
  load()
  throw IllegalStateException()
}
"#,
    );
    let sites: Vec<Site> = SiteFinder::new(&tree, &model, &UserSettings::default()).collect();
    let kinds: Vec<SiteKind> = sites.iter().map(Site::kind).collect();
    assert_eq!(kinds, vec![SiteKind::Throw, SiteKind::Call, SiteKind::Throw]);
    match &sites[1] {
      Site::Call(call) => {
        assert_eq!(call.callee.name, "load");
        assert_eq!(call.declared(), &[ThrowsEntry::class_ref("IOException")]);
        assert!(call.handlers.is_empty());
        assert_eq!(tree.name_of(call.function.unwrap()), Some("main"));
      }
      other => panic!("expected a call site, got {:?}", other),
    }
  }

  #[test]
  fn test_call_records_enclosing_handlers() {
    let (tree, model) = sites_of(
      r#"
@Throws(TimeoutException::class)
fun fetch() {}
fun main() {
  try {
    try { fetch() } catch (e: IOException) { }
  } catch (e: TimeoutException) { }
}
"#,
    );
    let call = SiteFinder::new(&tree, &model, &UserSettings::default())
      .find_map(|s| match s {
        Site::Call(call) => Some(call),
        Site::Throw(_) => None,
      })
      .unwrap();
    let caught: Vec<&str> = call.handlers.iter().flat_map(|h| h.caught.iter().map(String::as_str)).collect();
    assert_eq!(caught, vec!["IOException", "TimeoutException"]);
  }

  #[test]
  fn test_member_call_resolves_through_parameter_type() {
    let found = kotlin_callees(
      r#"
class Client {
  @Throws(IOException::class)
  fun send(payload: String) {}
}
fun main(client: Client) { client.send("x") }
"#,
    );
    assert_eq!(found, vec!["send"]);
  }

  #[test]
  fn test_same_name_on_unrelated_receiver_is_skipped() {
    let found = kotlin_callees(
      r#"
class Db {
  @Throws(java.io.IOException::class)
  fun get(key: String): Int = 0
}
fun lookup(m: Map<String, Int>) {
  m.get("x")
  listOf(1, 2).get(0)
  unknownThing.get("y")
}
"#,
    );
    assert!(found.is_empty(), "unexpected calls {:?}", found);
  }

  #[test]
  fn test_argument_count_applies_to_a_lone_candidate() {
    let found = kotlin_callees(
      r#"
@Throws(IOException::class)
fun send(a: Int) {}
fun main(s: Socket) {
  send(1, 2, 3)
  s.send(1)
}
"#,
    );
    assert!(found.is_empty(), "unexpected calls {:?}", found);
  }

  #[test]
  fn test_receiver_typed_from_locals_and_constructor_parameters() {
    let found = kotlin_callees(
      r#"
open class Store {
  @Throws(IOException::class)
  fun get(key: String): Int = 0
}
class Db : Store()
fun connect(): Db = Db()
class Service(private val db: Db) {
  val cache = Db()
  fun run() {
    db.get("a")
    cache.get("b")
    val local: Store = Db()
    local.get("c")
    connect().get("d")
    Db().get("e")
    get("f")
  }
}
"#,
    );
    assert_eq!(found, vec!["get", "get", "get", "get", "get"]);
  }

  #[test]
  fn test_implicit_receiver_inside_the_owning_class() {
    let found = kotlin_callees(
      r#"
class Db {
  @Throws(IOException::class)
  fun get(key: String): Int = 0
  fun first(): Int = this.get("a") + get("b")
}
"#,
    );
    assert_eq!(found, vec!["get", "get"]);
  }

  #[test]
  fn test_extension_and_object_receivers() {
    let found = kotlin_callees(
      r#"
object Registry {
  @Throws(IOException::class)
  fun load(name: String) {}
}
@Throws(IOException::class)
fun String.parseStrict(): Int = 0
fun main() {
  Registry.load("x")
  "12".parseStrict()
}
"#,
    );
    assert_eq!(found, vec!["load", "parseStrict"]);
  }

  #[test]
  fn test_java_calls_into_kotlin_members() {
    let kotlin = parse_kotlin(
      "api.kt",
      "class Api {\n  @Throws(java.io.IOException::class)\n  fun read(path: String): String = path\n}\n\n@Throws(java.io.IOException::class)\nfun fetch(): String = \"\"\n",
    )
    .unwrap();
    let java = parse_java(
      "Client.java",
      r#"
class Client {
    private final Api api = new Api();

    String load(Api other) {
        Api local = new Api();
        local.read("a");
        other.read("b");
        api.read("c");
        new Api().read("d");
        ApiKt.fetch();
        fetch();
        return "";
    }
}
"#,
    )
    .unwrap();
    let model = ProgramModel::from_trees([&kotlin, &java], &UserSettings::default());
    assert_eq!(callees(&java, &model), vec!["read", "read", "read", "read", "fetch"]);
  }

  #[test]
  fn test_java_throws_clause_is_not_a_dangerous_declaration() {
    let java = parse_java(
      "Io.java",
      "class Io { void read() throws java.io.IOException {} void run() { read(); } }",
    )
    .unwrap();
    let model = ProgramModel::from_trees([&java], &UserSettings::default());
    assert!(callees(&java, &model).is_empty());
  }

  #[test]
  fn test_call_shape() {
    let tree = parse_kotlin("t.kt", "fun f() { a.b.c(1, 2) }").unwrap();
    let call = tree.descendants(tree.root()).find(|n| tree.kind(*n) == NodeKind::CallExpr).unwrap();
    let shape = call_shape(&tree, call).unwrap().unwrap();
    assert_eq!(shape.name, "c");
    assert_eq!(tree.text(shape.receiver.unwrap()), "a.b");
    assert_eq!(shape.arguments, 2);

    let tree = parse_java("T.java", "class T { void f() { a.b.c(1, 2); } }").unwrap();
    let call = tree.descendants(tree.root()).find(|n| tree.kind(*n) == NodeKind::CallExpr).unwrap();
    let shape = call_shape(&tree, call).unwrap().unwrap();
    assert_eq!(shape.name, "c");
    assert_eq!(tree.text(shape.receiver.unwrap()), "a.b");
    assert_eq!(shape.arguments, 2);
  }

  #[test]
  fn test_unresolved_callee_is_skipped() {
    let (tree, model) = sites_of("fun main() { unknown(); println(\"x\") }");
    assert_eq!(SiteFinder::new(&tree, &model, &UserSettings::default()).count(), 0);
  }
}
