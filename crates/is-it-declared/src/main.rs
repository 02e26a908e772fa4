use std::path::Path;
use std::process::ExitCode;
use std::{env, fs};

use is_it_declared::{analyze_sources, AnalysisResult, CancellationToken, MatchPolicy, UserSettings};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const USAGE: &str =
  "usage: is-it-declared [--json] [--config <file.toml>] [--policy ancestor-chain|simple-name|exact] <file.kt|file.java>...";

struct Options {
  json: bool,
  config: Option<String>,
  policy: Option<MatchPolicy>,
  files: Vec<String>,
}

fn parse_args(args: &[String]) -> Result<Options, String> {
  let mut options = Options { json: false, config: None, policy: None, files: Vec::new() };
  let mut iter = args.iter();
  while let Some(arg) = iter.next() {
    match arg.as_str() {
      "--json" => options.json = true,
      "--config" => {
        let path = iter.next().ok_or("--config needs a file")?;
        options.config = Some(path.clone());
      }
      "--policy" => {
        let policy = iter.next().ok_or("--policy needs a value")?;
        options.policy = Some(policy.parse()?);
      }
      "-h" | "--help" => return Err(USAGE.to_string()),
      flag if flag.starts_with("--") => return Err(format!("unknown flag {}", flag)),
      file => options.files.push(file.to_string()),
    }
  }
  if options.files.is_empty() {
    return Err("no input files".to_string());
  }
  Ok(options)
}

fn init_tracing() {
  let filter = EnvFilter::try_from_env("IS_IT_DECLARED_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
  tracing_subscriber::registry()
    .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
    .with(filter)
    .init();
}

fn print_text(results: &[AnalysisResult]) {
  for result in results {
    for finding in &result.findings {
      let actions: Vec<&str> = finding.actions.iter().map(|a| a.id()).collect();
      println!(
        "{}:{}:{}: {} [{}]",
        result.file,
        finding.span.start_pos.line + 1,
        finding.span.start_pos.column + 1,
        finding.message,
        actions.join(", ")
      );
    }
  }
}

pub fn main() -> ExitCode {
  init_tracing();
  let args: Vec<String> = env::args().skip(1).collect();
  let options = match parse_args(&args) {
    Ok(options) => options,
    Err(message) => {
      eprintln!("{}\n{}", message, USAGE);
      return ExitCode::from(2);
    }
  };

  let mut settings = match &options.config {
    Some(path) => match UserSettings::load(Path::new(path)) {
      Ok(settings) => settings,
      Err(err) => {
        eprintln!("{}", err);
        return ExitCode::from(2);
      }
    },
    None => UserSettings::default(),
  };
  if let Some(policy) = options.policy {
    settings.match_policy = policy;
  }

  let mut sources = Vec::with_capacity(options.files.len());
  for file in &options.files {
    match fs::read_to_string(file) {
      Ok(content) => sources.push((file.clone(), content)),
      Err(err) => {
        eprintln!("could not read {}: {}", file, err);
        return ExitCode::from(2);
      }
    }
  }

  let results = match analyze_sources(&sources, &settings, &CancellationToken::new()) {
    Ok(results) => results,
    Err(err) => {
      eprintln!("{}", err);
      return ExitCode::from(2);
    }
  };

  if options.json {
    match serde_json::to_string_pretty(&results) {
      Ok(json) => println!("{}", json),
      Err(err) => {
        eprintln!("could not serialize results: {}", err);
        return ExitCode::from(2);
      }
    }
  } else {
    print_text(&results);
  }

  if results.iter().any(|r| !r.findings.is_empty()) {
    ExitCode::from(1)
  } else {
    ExitCode::SUCCESS
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
  }

  #[test]
  fn test_parse_args() {
    let options = parse_args(&args(&["--json", "--policy", "exact", "a.kt", "b.kt"])).unwrap();
    assert!(options.json);
    assert_eq!(options.policy, Some(MatchPolicy::Exact));
    assert_eq!(options.files, vec!["a.kt", "b.kt"]);
  }

  #[test]
  fn test_parse_args_errors() {
    assert!(parse_args(&args(&[])).is_err());
    assert!(parse_args(&args(&["--policy", "loose", "a.kt"])).is_err());
    assert!(parse_args(&args(&["--config"])).is_err());
    assert!(parse_args(&args(&["--verbose", "a.kt"])).is_err());
  }
}
