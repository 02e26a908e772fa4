//! Error types for the analysis.
//!
//! Resolution, annotation and structural failures are local: the finders log them and fold them into a
//! verdict. Only parse, config and cancellation errors are ever handed back to a caller.

/// A reference that could not be turned into a declaration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolutionFailure {
  #[error("unresolved symbol `{name}`")]
  Unresolved { name: String },

  #[error("thrown expression `{text}` is not a constructor call")]
  NotAConstructorCall { text: String },

  #[error("type alias cycle through `{name}`")]
  AliasCycle { name: String },

  #[error("superclass cycle through `{name}`")]
  AncestorCycle { name: String },

  #[error("ancestor chain of `{name}` exceeds {limit} links")]
  DepthExceeded { name: String, limit: usize },
}

/// Existing annotation content that does not have the `(A::class, B::class)` shape.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnnotationError {
  #[error("malformed annotation argument `{text}`")]
  Malformed { text: String },
}

/// A node that does not have the shape the walker relies on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StructuralError {
  #[error("{kind} node is missing its {expected}")]
  UnexpectedShape { kind: &'static str, expected: &'static str },
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
  #[error("failed to load the {language} grammar: {message}")]
  LanguageInit { language: &'static str, message: String },

  #[error("parser produced no tree for {file}")]
  NoTree { file: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("config file not found: {path}")]
  FileNotFound { path: String },

  #[error("could not read config file {path}: {message}")]
  Io { path: String, message: String },

  #[error("invalid TOML in {path}: {message}")]
  ParseError { path: String, message: String },

  #[error("invalid value for {field}: {message}")]
  ValidationFailed { field: String, message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
  #[error("parse error: {0}")]
  Parse(#[from] ParseError),

  #[error("configuration error: {0}")]
  Config(#[from] ConfigError),

  #[error("analysis cancelled")]
  Cancelled,
}
