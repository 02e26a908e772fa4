//! Declarations the analysis resolves against: classes, type aliases and functions from every indexed
//! source, plus the standard exception hierarchy.

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::errors::ResolutionFailure;
use crate::function_finder::{Arity, FunctionDecl};
use crate::settings::UserSettings;
use crate::syntax::{NodeId, NodeKind, SourceLanguage, Span, SyntaxTree};
use crate::throws_annotation::ThrowsAnnotation;

/// Outcome of looking a reference up. Every consumer handles `Unresolved` explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution<T> {
  Resolved(T),
  Unresolved,
}

impl<T> Resolution<T> {
  pub fn ok(self) -> Option<T> {
    match self {
      Resolution::Resolved(value) => Some(value),
      Resolution::Unresolved => None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuperTypeRef {
  pub name: String,
  /// Written as `Base()`, which only a class (never an interface) can be.
  pub invokes_constructor: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassDecl {
  pub name: String,
  pub qualified_name: String,
  pub supertypes: Vec<SuperTypeRef>,
  pub is_interface: bool,
  /// Source file, `None` for the built-in hierarchy.
  pub file: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasDecl {
  pub name: String,
  pub qualified_name: String,
  pub target: String,
  pub file: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSummary {
  pub name: String,
  pub qualified_name: String,
  /// Nearest named class or object around the declaration.
  pub owner: Option<String>,
  /// Receiver type of an extension function, `fun Db.load()`.
  pub extension_of: Option<String>,
  /// Declared return type, normalized.
  pub returns: Option<String>,
  pub arity: Arity,
  /// Only a Kotlin declared-exceptions annotation is recorded here; a Java `throws` clause never makes
  /// a call dangerous.
  pub throws: Option<ThrowsAnnotation>,
  pub file: String,
  pub span: Span,
}

impl FunctionSummary {
  /// The type a call must be made on, explicitly or through `this`.
  pub fn member_of(&self) -> Option<&str> {
    self.extension_of.as_deref().or(self.owner.as_deref())
  }

  /// Name of the class the JVM puts top-level functions of this file in, `utils.kt` -> `UtilsKt`.
  pub fn file_facade(&self) -> String {
    let file_name = self.file.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(&self.file);
    let stem = file_name.strip_suffix(".kt").unwrap_or(file_name);
    let mut chars = stem.chars();
    match chars.next() {
      Some(first) => format!("{}{}Kt", first.to_uppercase(), chars.as_str()),
      None => String::new(),
    }
  }
}

/// What a call is made on, as far as the caller can tell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallReceiver {
  /// A bare `f()`. Holds the named classes lexically around the call, nearest first, and whether
  /// top-level functions are reachable without qualification.
  Implicit { enclosing: Vec<String>, top_level: bool },
  /// `x.f()` where `x` has the named type.
  Typed(String),
  /// `x.f()` where the type of `x` cannot be told.
  Unknown,
}

#[derive(Debug, Clone, Copy)]
pub enum TypeSymbol<'m> {
  Class(&'m ClassDecl),
  Alias(&'m AliasDecl),
}

const PRELUDE: &[(&str, &str, Option<&str>)] = &[
  ("Any", "kotlin.Any", None),
  ("Throwable", "kotlin.Throwable", Some("Any")),
  ("Exception", "kotlin.Exception", Some("Throwable")),
  ("Error", "kotlin.Error", Some("Throwable")),
  ("RuntimeException", "kotlin.RuntimeException", Some("Exception")),
  ("IOException", "java.io.IOException", Some("Exception")),
  ("FileNotFoundException", "java.io.FileNotFoundException", Some("IOException")),
  ("UncheckedIOException", "java.io.UncheckedIOException", Some("RuntimeException")),
  ("IllegalArgumentException", "kotlin.IllegalArgumentException", Some("RuntimeException")),
  ("IllegalStateException", "kotlin.IllegalStateException", Some("RuntimeException")),
  ("NumberFormatException", "kotlin.NumberFormatException", Some("IllegalArgumentException")),
  ("IndexOutOfBoundsException", "kotlin.IndexOutOfBoundsException", Some("RuntimeException")),
  ("NullPointerException", "kotlin.NullPointerException", Some("RuntimeException")),
  ("ArithmeticException", "kotlin.ArithmeticException", Some("RuntimeException")),
  ("ClassCastException", "kotlin.ClassCastException", Some("RuntimeException")),
  ("UnsupportedOperationException", "kotlin.UnsupportedOperationException", Some("RuntimeException")),
  ("NoSuchElementException", "kotlin.NoSuchElementException", Some("RuntimeException")),
  ("ConcurrentModificationException", "kotlin.ConcurrentModificationException", Some("RuntimeException")),
  ("InterruptedException", "java.lang.InterruptedException", Some("Exception")),
  ("TimeoutException", "java.util.concurrent.TimeoutException", Some("Exception")),
  ("CancellationException", "java.util.concurrent.CancellationException", Some("IllegalStateException")),
  ("NotImplementedError", "kotlin.NotImplementedError", Some("Error")),
];

#[derive(Debug, Clone, Default)]
pub struct ProgramModel {
  classes: FxHashMap<String, Vec<ClassDecl>>,
  aliases: FxHashMap<String, Vec<AliasDecl>>,
  functions: FxHashMap<String, Vec<FunctionSummary>>,
}

impl ProgramModel {
  /// An empty model without the built-in hierarchy.
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_prelude() -> Self {
    let mut model = Self::new();
    for (name, qualified_name, superclass) in PRELUDE {
      model.add_class(ClassDecl {
        name: name.to_string(),
        qualified_name: qualified_name.to_string(),
        supertypes: superclass
          .iter()
          .map(|s| SuperTypeRef { name: s.to_string(), invokes_constructor: true })
          .collect(),
        is_interface: false,
        file: None,
      });
    }
    model
  }

  pub fn from_trees<'t>(trees: impl IntoIterator<Item = &'t SyntaxTree>, settings: &UserSettings) -> Self {
    let mut model = Self::with_prelude();
    for tree in trees {
      model.index(tree, settings);
    }
    model
  }

  pub fn add_class(&mut self, class: ClassDecl) {
    self.classes.entry(class.name.clone()).or_default().push(class);
  }

  pub fn add_alias(&mut self, alias: AliasDecl) {
    self.aliases.entry(alias.name.clone()).or_default().push(alias);
  }

  pub fn add_function(&mut self, function: FunctionSummary) {
    self.functions.entry(function.name.clone()).or_default().push(function);
  }

  /// Records every class, object, type alias and function declared in `tree`.
  pub fn index(&mut self, tree: &SyntaxTree, settings: &UserSettings) {
    let mut counts = (0usize, 0usize, 0usize);
    for node in tree.descendants(tree.root()) {
      match tree.kind(node) {
        NodeKind::Class | NodeKind::Object => {
          if let Some(class) = class_decl(tree, node) {
            self.add_class(class);
            counts.0 += 1;
          }
        }
        NodeKind::TypeAlias => {
          if let Some(alias) = alias_decl(tree, node) {
            self.add_alias(alias);
            counts.1 += 1;
          }
        }
        NodeKind::Function => {
          if let Some(function) = function_summary(tree, node, settings) {
            self.add_function(function);
            counts.2 += 1;
          }
        }
        _ => {}
      }
    }
    debug!(
      file = tree.file(),
      classes = counts.0,
      aliases = counts.1,
      functions = counts.2,
      "indexed declarations"
    );
  }

  /// Looks a type name up; `name` may be simple or qualified and may carry type arguments.
  pub fn resolve_type(&self, name: &str) -> Resolution<TypeSymbol<'_>> {
    let name = normalize_type_name(name);
    let simple = simple_name(&name);
    let qualified = name.contains('.');
    let matches = |candidate: &str| !qualified || candidate == name || candidate.ends_with(&format!(".{}", name));

    if let Some(alias) = self
      .aliases
      .get(simple)
      .and_then(|all| all.iter().rev().find(|a| matches(&a.qualified_name)))
    {
      return Resolution::Resolved(TypeSymbol::Alias(alias));
    }
    match self
      .classes
      .get(simple)
      .and_then(|all| all.iter().rev().find(|c| matches(&c.qualified_name)))
    {
      Some(class) => Resolution::Resolved(TypeSymbol::Class(class)),
      None => Resolution::Unresolved,
    }
  }

  /// Resolves `name` to a class, following type aliases for at most `max_alias_hops` hops.
  pub fn resolve_class(&self, name: &str, max_alias_hops: usize) -> Result<&ClassDecl, ResolutionFailure> {
    let mut current = name.to_string();
    let mut visited: FxHashSet<String> = FxHashSet::default();
    loop {
      match self.resolve_type(&current) {
        Resolution::Resolved(TypeSymbol::Class(class)) => return Ok(class),
        Resolution::Resolved(TypeSymbol::Alias(alias)) => {
          if !visited.insert(alias.qualified_name.clone()) || visited.len() > max_alias_hops {
            return Err(ResolutionFailure::AliasCycle { name: name.to_string() });
          }
          trace!(alias = %alias.qualified_name, target = %alias.target, "following type alias");
          current = alias.target.clone();
        }
        Resolution::Unresolved => {
          return Err(ResolutionFailure::Unresolved { name: current });
        }
      }
    }
  }

  /// The single superclass of `class`: the supertype written with a constructor call, otherwise the first
  /// supertype that resolves to a class rather than an interface.
  pub fn superclass_of(&self, class: &ClassDecl, max_alias_hops: usize) -> Option<&ClassDecl> {
    if let Some(invoked) = class.supertypes.iter().find(|s| s.invokes_constructor) {
      return self.resolve_class(&invoked.name, max_alias_hops).ok();
    }
    class
      .supertypes
      .iter()
      .filter_map(|s| self.resolve_class(&s.name, max_alias_hops).ok())
      .find(|c| !c.is_interface)
  }

  /// Simple names of `name` and of every type it transitively extends or implements, `Any` included.
  ///
  /// A type that does not resolve contributes only itself.
  pub fn supertypes_of(&self, name: &str, max_alias_hops: usize) -> FxHashSet<String> {
    let mut seen: FxHashSet<String> = FxHashSet::default();
    seen.insert("Any".to_string());
    let mut queue = vec![normalize_type_name(name)];
    let mut visited: FxHashSet<String> = FxHashSet::default();
    while let Some(current) = queue.pop() {
      match self.resolve_class(&current, max_alias_hops) {
        Ok(class) => {
          if !visited.insert(class.qualified_name.clone()) {
            continue;
          }
          seen.insert(class.name.clone());
          queue.extend(class.supertypes.iter().map(|s| s.name.clone()));
        }
        Err(_) => {
          seen.insert(simple_name(&current).to_string());
        }
      }
    }
    seen
  }

  /// Resolves a call by the callee's simple name, what it is called on and its argument count.
  ///
  /// Candidates are first narrowed to the ones reachable from `receiver`: a typed receiver reaches
  /// members and extensions of its type and supertypes, a bare call reaches top-level functions and
  /// members of the classes around it, an unknown receiver reaches nothing. The rest are filtered by
  /// arity; if several still remain they resolve only when they all declare the same exceptions,
  /// since then the choice does not matter.
  pub fn resolve_function(
    &self,
    name: &str,
    argument_count: usize,
    receiver: &CallReceiver,
    max_alias_hops: usize,
  ) -> Resolution<&FunctionSummary> {
    let Some(candidates) = self.functions.get(name) else {
      return Resolution::Unresolved;
    };
    let reachable: Vec<&FunctionSummary> = match receiver {
      CallReceiver::Unknown => {
        trace!(name, "receiver type unknown");
        return Resolution::Unresolved;
      }
      CallReceiver::Implicit { enclosing, top_level } => {
        let mut around: FxHashSet<String> = FxHashSet::default();
        for class in enclosing {
          around.extend(self.supertypes_of(class, max_alias_hops));
        }
        candidates
          .iter()
          .filter(|f| match f.member_of() {
            Some(member_of) => !enclosing.is_empty() && around.contains(simple_name(member_of)),
            None => *top_level,
          })
          .collect()
      }
      CallReceiver::Typed(receiver_type) => {
        let supertypes = self.supertypes_of(receiver_type, max_alias_hops);
        let facade = simple_name(receiver_type);
        candidates
          .iter()
          .filter(|f| match f.member_of() {
            Some(member_of) => supertypes.contains(simple_name(member_of)),
            None => f.file_facade() == facade,
          })
          .collect()
      }
    };
    let fitting: Vec<&FunctionSummary> = reachable
      .into_iter()
      .filter(|f| f.arity.accepts(argument_count))
      .collect();
    match fitting.as_slice() {
      [] => Resolution::Unresolved,
      [only] => Resolution::Resolved(only),
      [first, rest @ ..] => {
        let declared = |f: &FunctionSummary| f.throws.as_ref().map(|t| t.simple_names().join(","));
        if rest.iter().all(|f| declared(f) == declared(first)) {
          Resolution::Resolved(first)
        } else {
          trace!(name, candidates = fitting.len(), "ambiguous overloads");
          Resolution::Unresolved
        }
      }
    }
  }

  pub fn class_count(&self) -> usize {
    self.classes.values().map(Vec::len).sum()
  }

  pub fn function_count(&self) -> usize {
    self.functions.values().map(Vec::len).sum()
  }
}

/// Drops nullability, type arguments, backticks and whitespace.
pub fn normalize_type_name(name: &str) -> String {
  let mut depth = 0usize;
  let mut out = String::with_capacity(name.len());
  for c in name.chars() {
    match c {
      '<' => depth += 1,
      '>' => depth = depth.saturating_sub(1),
      '?' | '`' => {}
      c if c.is_whitespace() => {}
      c if depth == 0 => out.push(c),
      _ => {}
    }
  }
  out
}

pub fn simple_name(name: &str) -> &str {
  name.rsplit('.').next().unwrap_or(name)
}

/// `package.Outer.name` for a declaration nested in classes/objects.
fn qualify(tree: &SyntaxTree, node: NodeId, name: &str) -> String {
  let mut segments: Vec<&str> = tree
    .ancestors(node)
    .filter(|a| matches!(tree.kind(*a), NodeKind::Class | NodeKind::Object))
    .filter_map(|a| tree.name_of(a))
    .collect();
  segments.reverse();
  segments.push(name);
  match tree.package() {
    Some(package) => format!("{}.{}", package, segments.join(".")),
    None => segments.join("."),
  }
}

fn class_decl(tree: &SyntaxTree, node: NodeId) -> Option<ClassDecl> {
  let name = tree.name_of(node)?;
  let mut supertypes = Vec::new();
  let mut stack: Vec<NodeId> = tree.children(node).iter().rev().copied().collect();
  while let Some(current) = stack.pop() {
    match tree.kind(current) {
      NodeKind::DelegationSpecifier => {
        if let Some(super_type) = super_type_ref(tree, current) {
          supertypes.push(super_type);
        }
      }
      NodeKind::ClassBody | NodeKind::Block | NodeKind::Lambda | NodeKind::Modifiers => {}
      _ => stack.extend(tree.children(current).iter().rev().copied()),
    }
  }
  Some(ClassDecl {
    name: name.to_string(),
    qualified_name: qualify(tree, node, name),
    supertypes,
    is_interface: tree.has_token(node, "interface"),
    file: Some(tree.file().to_string()),
  })
}

fn super_type_ref(tree: &SyntaxTree, specifier: NodeId) -> Option<SuperTypeRef> {
  if let Some(invocation) = tree.first_child_of_kind(specifier, NodeKind::ConstructorInvocation) {
    let type_ref = tree.first_child_of_kind(invocation, NodeKind::TypeRef)?;
    return Some(SuperTypeRef {
      name: normalize_type_name(tree.text(type_ref)),
      invokes_constructor: true,
    });
  }
  let type_ref = tree
    .first_child_of_kind(specifier, NodeKind::TypeRef)
    .or_else(|| tree.named_children(specifier).next())?;
  Some(SuperTypeRef {
    name: normalize_type_name(tree.text(type_ref)),
    invokes_constructor: false,
  })
}

fn alias_decl(tree: &SyntaxTree, node: NodeId) -> Option<AliasDecl> {
  let name = tree.name_of(node)?;
  let target = tree.named_child_after_token(node, "=")?;
  Some(AliasDecl {
    name: name.to_string(),
    qualified_name: qualify(tree, node, name),
    target: normalize_type_name(tree.text(target)),
    file: Some(tree.file().to_string()),
  })
}

fn function_summary(tree: &SyntaxTree, node: NodeId, settings: &UserSettings) -> Option<FunctionSummary> {
  let function = FunctionDecl::new(tree, node)?;
  let name = function.name()?;
  let owner = tree
    .ancestors(node)
    .filter(|a| matches!(tree.kind(*a), NodeKind::Class | NodeKind::Object))
    .find_map(|a| tree.name_of(a))
    .map(str::to_string);
  let (extension_of, returns) = signature_types(tree, node);
  Some(FunctionSummary {
    name: name.to_string(),
    qualified_name: qualify(tree, node, name),
    owner,
    extension_of,
    returns,
    arity: function.arity(),
    throws: function.throws_annotation(settings).filter(ThrowsAnnotation::is_annotation),
    file: tree.file().to_string(),
    span: tree.span(node),
  })
}

/// Extension receiver and return type of a declaration.
///
/// A type written before the name is the receiver in Kotlin (`fun Db.load()`) and the return type
/// in Java (`Db load()`). A Kotlin return type follows the `:` after the parameters.
fn signature_types(tree: &SyntaxTree, node: NodeId) -> (Option<String>, Option<String>) {
  let before_name = tree
    .children(node)
    .iter()
    .copied()
    .take_while(|c| tree.kind(*c) != NodeKind::Identifier)
    .filter(|c| matches!(tree.kind(*c), NodeKind::TypeRef | NodeKind::NullableType))
    .last()
    .map(|t| normalize_type_name(tree.text(t)));
  match tree.language() {
    SourceLanguage::Java => (None, before_name),
    SourceLanguage::Kotlin => {
      let returns = tree
        .named_child_after_token(node, ":")
        .filter(|t| matches!(tree.kind(*t), NodeKind::TypeRef | NodeKind::NullableType))
        .map(|t| normalize_type_name(tree.text(t)));
      (before_name, returns)
    }
  }
}
