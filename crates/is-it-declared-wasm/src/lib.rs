use std::cell::Cell;
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use serde::{Deserialize, Serialize, Serializer};
use wasm_bindgen::prelude::*;

use is_it_declared::annotation_synthesizer::DEFAULT_ANNOTATION_NAME;
use is_it_declared::throws_annotation::parse_arguments;
use is_it_declared::{
  analyze_sources, synthesize_annotation, AnalysisResult, CancellationToken, Finding, FixAction, MatchPolicy,
  SiteKind, SourceLanguage, ThrowsAnnotation, UserSettings,
};

// Console bindings for leveled logging
#[cfg(target_arch = "wasm32")]
#[wasm_bindgen]
extern "C" {
  #[wasm_bindgen(js_namespace = console)]
  fn info(s: &str);
  #[wasm_bindgen(js_namespace = console)]
  fn error(s: &str);
  #[wasm_bindgen(js_namespace = console)]
  fn debug(s: &str);
  #[wasm_bindgen(js_namespace = console)]
  fn warn(s: &str);
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum LogLevel {
  Error = 0,
  Warn = 1,
  Info = 2,
  Debug = 3,
}

thread_local! {
  static CURRENT_LOG_LEVEL: Cell<LogLevel> = const { Cell::new(LogLevel::Info) };
}

fn should_log(level: LogLevel) -> bool {
  if level == LogLevel::Error {
    return true;
  }
  CURRENT_LOG_LEVEL.with(|cell| (level as u8) <= (cell.get() as u8))
}

// "error" | "warn" | "info" | "debug"; anything else means info
#[wasm_bindgen]
pub fn set_log_level(level: &str) {
  let new_level = match level.to_ascii_lowercase().as_str() {
    "error" => LogLevel::Error,
    "warn" | "warning" => LogLevel::Warn,
    "debug" => LogLevel::Debug,
    _ => LogLevel::Info,
  };
  CURRENT_LOG_LEVEL.with(|cell| cell.set(new_level));
}

#[cfg(target_arch = "wasm32")]
fn colorize(level: LogLevel, message: &str) -> String {
  let code = match level {
    LogLevel::Error => "31",
    LogLevel::Warn => "33",
    LogLevel::Info => "34",
    LogLevel::Debug => "90",
  };
  format!("\u{001b}[{}m{}\u{001b}[0m", code, message)
}

#[cfg(target_arch = "wasm32")]
fn emit(level: LogLevel, message: &str) {
  let colored = colorize(level, message);
  match level {
    LogLevel::Error => error(&colored),
    LogLevel::Warn => warn(&colored),
    LogLevel::Info => info(&colored),
    LogLevel::Debug => debug(&colored),
  }
}

// Outside the browser the host owns a tracing subscriber.
#[cfg(not(target_arch = "wasm32"))]
fn emit(level: LogLevel, message: &str) {
  match level {
    LogLevel::Error => tracing::error!("{}", message),
    LogLevel::Warn => tracing::warn!("{}", message),
    LogLevel::Info => tracing::info!("{}", message),
    LogLevel::Debug => tracing::debug!("{}", message),
  }
}

fn logger_info(message: &str) {
  if should_log(LogLevel::Info) {
    emit(LogLevel::Info, message);
  }
}
fn logger_debug(message: &str) {
  if should_log(LogLevel::Debug) {
    emit(LogLevel::Debug, message);
  }
}
fn logger_warn(message: &str) {
  if should_log(LogLevel::Warn) {
    emit(LogLevel::Warn, message);
  }
}
fn logger_error(message: &str) {
  emit(LogLevel::Error, message);
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
  pub severity: DiagnosticSeverity,
  pub range: DiagnosticRange,
  pub message: String,
  pub source: String,
  /// `throw` or `call`.
  pub code: String,
  /// Quick fixes for this diagnostic, in the order they should be offered.
  pub data: Vec<CodeAction>,
}

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct DiagnosticRange {
  pub start: DiagnosticPosition,
  pub end: DiagnosticPosition,
}

/// Zero-based line, and character counted in UTF-16 code units as editors expect.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct DiagnosticPosition {
  pub line: usize,
  pub character: usize,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DiagnosticSeverity {
  Error = 0,
  Warning = 1,
  Information = 2,
  Hint = 3,
}

impl Serialize for DiagnosticSeverity {
  fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
  where
    S: Serializer,
  {
    serializer.serialize_i32(*self as i32)
  }
}

#[derive(Deserialize, Debug, Clone)]
pub struct DiagnosticSeverityInput(String);

impl FromStr for DiagnosticSeverity {
  type Err = ();

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "Error" => Ok(DiagnosticSeverity::Error),
      "Warning" => Ok(DiagnosticSeverity::Warning),
      "Information" => Ok(DiagnosticSeverity::Information),
      "Hint" => Ok(DiagnosticSeverity::Hint),
      _ => Err(()),
    }
  }
}

impl From<DiagnosticSeverityInput> for DiagnosticSeverity {
  fn from(input: DiagnosticSeverityInput) -> Self {
    DiagnosticSeverity::from_str(&input.0).unwrap_or(DiagnosticSeverity::Hint)
  }
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct TextEdit {
  pub range: DiagnosticRange,
  pub new_text: String,
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct CodeAction {
  pub id: String,
  pub title: String,
  pub edit: TextEdit,
}

#[derive(Serialize, Clone, Debug, Default)]
pub struct ParseResult {
  pub diagnostics: Vec<Diagnostic>,
  /// Files that took part in building the program model.
  pub files: Vec<String>,
  /// Input or analysis failures; the diagnostics are empty when this is not.
  pub errors: Vec<String>,
}

#[wasm_bindgen(typescript_custom_section)]
const InputDataType: &'static str = r#"
interface InputData {
  file_content: string;
  file_name?: string;
  files?: FileSystemTree;
  debug?: boolean;
  throw_severity?: DiagnosticSeverityInput;
  call_severity?: DiagnosticSeverityInput;
  throws_annotations?: Record<string, string>;
  match_policy?: "ancestor-chain" | "simple-name" | "exact";
  max_ancestor_depth?: number;
  max_alias_hops?: number;
}

type DiagnosticSeverityInput = "Error" | "Warning" | "Information" | "Hint";

interface FileSystemTree {
  [name: string]: { file?: { contents: string }; directory?: FileSystemTree };
}

interface TextEdit {
  range: { start: { line: number; character: number }; end: { line: number; character: number } };
  new_text: string;
}

interface CodeAction {
  id: "annotate-throws" | "wrap-try-catch";
  title: string;
  edit: TextEdit;
}

interface Diagnostic {
  severity: number;
  range: TextEdit["range"];
  message: string;
  source: string;
  code: "throw" | "call";
  data: CodeAction[];
}

interface ParseResult {
  diagnostics: Diagnostic[];
  files: string[];
  errors: string[];
}
"#;

#[wasm_bindgen(typescript_custom_section)]
const ParseKtFunction: &'static str = r#"
export function parse_kt(data: InputData): ParseResult;
"#;

#[derive(Deserialize, Debug, Clone)]
pub struct FileNodeFile {
  pub contents: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct FileNode {
  pub file: Option<FileNodeFile>,
  pub directory: Option<HashMap<String, FileNode>>,
}

pub type FileSystemTree = HashMap<String, FileNode>;

#[derive(Deserialize, Debug, Default)]
pub struct InputData {
  pub file_content: String,
  pub file_name: Option<String>,
  /// Other sources of the project, so calls into them resolve.
  pub files: Option<FileSystemTree>,
  pub debug: Option<bool>,
  pub throw_severity: Option<DiagnosticSeverityInput>,
  pub call_severity: Option<DiagnosticSeverityInput>,
  pub throws_annotations: Option<BTreeMap<String, String>>,
  pub match_policy: Option<String>,
  pub max_ancestor_depth: Option<usize>,
  pub max_alias_hops: Option<usize>,
}

impl InputData {
  fn user_settings(&self) -> UserSettings {
    let mut settings = UserSettings::default();
    if let Some(annotations) = &self.throws_annotations {
      settings.throws_annotations = annotations.clone();
    }
    if let Some(policy) = &self.match_policy {
      match MatchPolicy::from_str(policy) {
        Ok(policy) => settings.match_policy = policy,
        Err(message) => logger_warn(&format!("{}, using the default", message)),
      }
    }
    if let Some(depth) = self.max_ancestor_depth {
      settings.max_ancestor_depth = depth;
    }
    if let Some(hops) = self.max_alias_hops {
      settings.max_alias_hops = hops;
    }
    settings
  }
}

fn flatten(prefix: &str, tree: &FileSystemTree, out: &mut Vec<(String, String)>) {
  for (name, node) in tree {
    let path = if prefix.is_empty() { name.clone() } else { format!("{}/{}", prefix, name) };
    if let Some(file) = &node.file {
      out.push((path.clone(), file.contents.clone()));
    }
    if let Some(directory) = &node.directory {
      flatten(&path, directory, out);
    }
  }
}

/// The entry file first, then every other Kotlin or Java source of `files` in path order. The entry's
/// editor buffer replaces a stale copy of it in `files`.
fn collect_sources(input: &InputData, entry: &str) -> Vec<(String, String)> {
  let mut others = Vec::new();
  if let Some(files) = &input.files {
    flatten("", files, &mut others);
  }
  others.retain(|(path, _)| path != entry && (path.ends_with(".kt") || path.ends_with(".java")));
  others.sort_by(|a, b| a.0.cmp(&b.0));

  let mut sources = Vec::with_capacity(others.len() + 1);
  sources.push((entry.to_string(), input.file_content.clone()));
  sources.extend(others);
  sources
}

/// Runs the analysis for the entry file of `input` and converts its findings into editor diagnostics.
pub fn analyze_input(input: &InputData) -> ParseResult {
  let entry = input.file_name.clone().unwrap_or_else(|| "input.kt".to_string());
  let settings = input.user_settings();
  let sources = collect_sources(input, &entry);
  let files: Vec<String> = sources.iter().map(|(path, _)| path.clone()).collect();

  let results = match analyze_sources(&sources, &settings, &CancellationToken::new()) {
    Ok(results) => results,
    Err(err) => {
      logger_error(&format!("analysis of {} failed: {}", entry, err));
      return ParseResult { diagnostics: Vec::new(), files, errors: vec![err.to_string()] };
    }
  };
  let Some(result) = results.into_iter().find(|r| r.file == entry) else {
    return ParseResult { files, ..ParseResult::default() };
  };

  let throw_severity = severity_or(&input.throw_severity, DiagnosticSeverity::Warning);
  let call_severity = severity_or(&input.call_severity, DiagnosticSeverity::Warning);
  let diagnostics = to_diagnostics(&input.file_content, &result, throw_severity, call_severity);
  if input.debug.unwrap_or(false) {
    for diagnostic in &diagnostics {
      logger_debug(&format!(
        "{}:{}:{} {}",
        entry, diagnostic.range.start.line, diagnostic.range.start.character, diagnostic.message
      ));
    }
  }
  logger_info(&format!("{}: {} diagnostics over {} files", entry, diagnostics.len(), files.len()));
  ParseResult { diagnostics, files, errors: Vec::new() }
}

fn severity_or(input: &Option<DiagnosticSeverityInput>, default: DiagnosticSeverity) -> DiagnosticSeverity {
  input.clone().map(DiagnosticSeverity::from).unwrap_or(default)
}

fn to_diagnostics(
  source: &str,
  result: &AnalysisResult,
  throw_severity: DiagnosticSeverity,
  call_severity: DiagnosticSeverity,
) -> Vec<Diagnostic> {
  result
    .findings
    .iter()
    .map(|finding| Diagnostic {
      severity: match finding.kind {
        SiteKind::Throw => throw_severity,
        SiteKind::Call => call_severity,
      },
      range: range_of(source, finding.span.start, finding.span.end),
      message: finding.message.clone(),
      source: "Is It Declared".to_string(),
      code: match finding.kind {
        SiteKind::Throw => "throw".to_string(),
        SiteKind::Call => "call".to_string(),
      },
      data: code_actions(source, finding),
    })
    .collect()
}

fn code_actions(source: &str, finding: &Finding) -> Vec<CodeAction> {
  finding
    .actions
    .iter()
    .filter_map(|action| {
      let edit = match action {
        FixAction::AnnotateThrows => annotate_edit(source, finding)?,
        FixAction::WrapTryCatch => wrap_edit(source, finding),
      };
      Some(CodeAction { id: action.id().to_string(), title: action.title(finding.kind).to_string(), edit })
    })
    .collect()
}

/// Replaces the function's annotation with the suggested one, or inserts it on its own line above the
/// function with the same indentation.
fn annotate_edit(source: &str, finding: &Finding) -> Option<TextEdit> {
  let function = finding.function.as_ref()?;
  let rendered = function.suggested.render();
  if let Some(span) = function.throws.as_ref().and_then(|t| t.span) {
    return Some(TextEdit { range: range_of(source, span.start, span.end), new_text: rendered });
  }
  let line_start = source[..floor_char_boundary(source, function.span.start)]
    .rfind('\n')
    .map_or(0, |newline| newline + 1);
  let indent: String = source[line_start..].chars().take_while(|c| *c == ' ' || *c == '\t').collect();
  Some(TextEdit {
    range: range_of(source, line_start, line_start),
    new_text: format!("{}{}\n", indent, rendered),
  })
}

fn wrap_edit(source: &str, finding: &Finding) -> TextEdit {
  let span = finding.wrap_span;
  let text = source
    .get(span.start..span.end)
    .unwrap_or_default();
  let caught = match finding.exceptions.as_slice() {
    [single] => single.as_str(),
    _ => "Exception",
  };
  let new_text = match finding.language {
    SourceLanguage::Kotlin => format!("try {{ {} }} catch (e: {}) {{ }}", text, caught),
    SourceLanguage::Java => format!("try {{ {} }} catch ({} e) {{ }}", text, caught),
  };
  TextEdit { range: range_of(source, span.start, span.end), new_text }
}

fn floor_char_boundary(source: &str, offset: usize) -> usize {
  let mut at = offset.min(source.len());
  while !source.is_char_boundary(at) {
    at -= 1;
  }
  at
}

fn position_at(source: &str, offset: usize) -> DiagnosticPosition {
  let before = &source[..floor_char_boundary(source, offset)];
  let line_start = before.rfind('\n').map_or(0, |newline| newline + 1);
  DiagnosticPosition {
    line: before.matches('\n').count(),
    character: before[line_start..].encode_utf16().count(),
  }
}

fn range_of(source: &str, start: usize, end: usize) -> DiagnosticRange {
  DiagnosticRange { start: position_at(source, start), end: position_at(source, end) }
}

#[wasm_bindgen(skip_typescript)]
pub fn parse_kt(data: JsValue) -> JsValue {
  let input: InputData = match serde_wasm_bindgen::from_value(data) {
    Ok(input) => input,
    Err(e) => {
      logger_error(&format!("Failed to parse input data: {:?}", e));
      let result = ParseResult { errors: vec![e.to_string()], ..ParseResult::default() };
      return serde_wasm_bindgen::to_value(&result).unwrap_or(JsValue::NULL);
    }
  };
  let result = analyze_input(&input);
  serde_wasm_bindgen::to_value(&result).unwrap_or(JsValue::NULL)
}

/// Corrected annotation text for the annotate fix when the host builds the edit itself.
///
/// `existing_arguments` is the text between the parentheses of the current annotation, if there is one.
#[wasm_bindgen]
pub fn synthesize_throws_annotation(
  existing_arguments: Option<String>,
  annotation_name: Option<String>,
  new_exception: &str,
) -> String {
  let name = annotation_name.unwrap_or_else(|| DEFAULT_ANNOTATION_NAME.to_string());
  let existing = existing_arguments.map(|arguments| ThrowsAnnotation::new(name.clone(), parse_arguments(&arguments)));
  let mut annotation = synthesize_annotation(existing.as_ref(), new_exception);
  annotation.name = name;
  annotation.render()
}
