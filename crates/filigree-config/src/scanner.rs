//! Discovery of `.filigree/scanners/*.toml` scanner definitions.
//!
//! This module only parses and lists scanner definitions and builds their
//! command lines; it never spawns a process. Invocation belongs to an
//! external collaborator (a CLI or server wrapping this core).

use serde::Deserialize;
use std::path::Path;

/// One scanner definition loaded from a TOML file's `[scanner]` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ScannerConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub file_types: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ScannerFile {
    scanner: ScannerConfig,
}

/// Template tokens substituted when building a command line.
pub struct CommandContext<'a> {
    pub file_path: &'a str,
    pub api_url: &'a str,
    pub project_root: &'a str,
    pub scan_run_id: &'a str,
}

impl Default for CommandContext<'_> {
    fn default() -> Self {
        Self {
            file_path: "",
            api_url: "http://localhost:8377",
            project_root: ".",
            scan_run_id: "",
        }
    }
}

impl ScannerConfig {
    /// Substitutes `{file}`, `{api_url}`, `{project_root}`, `{scan_run_id}`
    /// tokens into the command and its args, returning the full argv.
    ///
    /// # Errors
    ///
    /// Returns an error if `command` cannot be tokenized (e.g. unmatched
    /// quotes).
    pub fn build_command(&self, ctx: &CommandContext<'_>) -> Result<Vec<String>, String> {
        let base = shell_split(&self.command).map_err(|e| format!("malformed command string in scanner {:?}: {e}", self.name))?;
        let substitute = |token: &str| -> String {
            token
                .replace("{file}", ctx.file_path)
                .replace("{api_url}", ctx.api_url)
                .replace("{project_root}", ctx.project_root)
                .replace("{scan_run_id}", ctx.scan_run_id)
        };
        let mut out: Vec<String> = base.iter().map(|t| substitute(t)).collect();
        out.extend(self.args.iter().map(|a| substitute(a)));
        Ok(out)
    }
}

/// Minimal POSIX-shell-style word splitting (quotes and backslash escapes),
/// enough for the small one-line scanner commands this format expects.
fn shell_split(input: &str) -> Result<Vec<String>, String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = input.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        match quote {
            Some(q) if c == q => quote = None,
            Some('\'') => current.push(c),
            Some('"') => {
                if c == '\\' {
                    if let Some(&next) = chars.peek() {
                        if next == '"' || next == '\\' {
                            current.push(chars.next().unwrap());
                            continue;
                        }
                    }
                    current.push(c);
                } else {
                    current.push(c);
                }
            }
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    in_word = true;
                }
                c if c.is_whitespace() => {
                    if in_word {
                        words.push(std::mem::take(&mut current));
                        in_word = false;
                    }
                }
                '\\' => {
                    if let Some(next) = chars.next() {
                        current.push(next);
                        in_word = true;
                    }
                }
                _ => {
                    current.push(c);
                    in_word = true;
                }
            },
            _ => unreachable!(),
        }
    }

    if quote.is_some() {
        return Err("unmatched quote".to_string());
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

fn is_safe_scanner_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn parse_scanner_file(path: &Path) -> Option<ScannerConfig> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str::<ScannerFile>(&content) {
        Ok(parsed) => Some(parsed.scanner),
        Err(_) => {
            tracing::warn!(path = %path.display(), "failed to parse scanner definition");
            None
        }
    }
}

/// Reads all `*.toml` files from `scanners_dir`, skipping `*.toml.example`
/// files and anything that fails to parse. Returns an empty list if the
/// directory does not exist.
pub fn list_scanners(scanners_dir: &Path) -> Vec<ScannerConfig> {
    if !scanners_dir.is_dir() {
        return Vec::new();
    }
    let Ok(entries) = std::fs::read_dir(scanners_dir) else {
        return Vec::new();
    };
    let mut paths: Vec<_> = entries.filter_map(|e| e.ok()).map(|e| e.path()).collect();
    paths.sort();

    paths
        .into_iter()
        .filter(|p| {
            let name = p.file_name().and_then(|n| n.to_str()).unwrap_or("");
            p.extension().and_then(|e| e.to_str()) == Some("toml") && !name.ends_with(".toml.example")
        })
        .filter_map(|p| parse_scanner_file(&p))
        .collect()
}

/// Loads a single scanner by name, rejecting names that could escape
/// `scanners_dir` (path separators, leading dots).
pub fn load_scanner(scanners_dir: &Path, name: &str) -> Option<ScannerConfig> {
    if !is_safe_scanner_name(name) {
        return None;
    }
    let path = scanners_dir.join(format!("{name}.toml"));
    if !path.is_file() {
        return None;
    }
    parse_scanner_file(&path)
}

/// Checks that the first token of `command` resolves to an executable,
/// either on `PATH` or, for path-like tokens, relative to `project_root`.
/// Returns `None` if valid, `Some(reason)` if not.
pub fn validate_scanner_command(command: &str, project_root: Option<&Path>) -> Option<String> {
    let tokens = match shell_split(command) {
        Ok(t) => t,
        Err(e) => return Some(format!("malformed command string: {e}")),
    };
    let Some(binary) = tokens.first() else {
        return Some("empty command".to_string());
    };

    if binary.contains('/') || binary.contains('\\') {
        let binary_path = Path::new(binary);
        let mut candidates = Vec::new();
        if binary_path.is_absolute() {
            candidates.push(binary_path.to_path_buf());
        } else {
            if let Some(root) = project_root {
                candidates.push(root.join(binary_path));
            }
            candidates.push(binary_path.to_path_buf());
        }
        if candidates.iter().any(|c| is_executable_file(c)) {
            return None;
        }
    }

    if which(binary).is_none() {
        return Some(format!("command {binary:?} not found on PATH"));
    }
    None
}

fn is_executable_file(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path).map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0).unwrap_or(false)
}

fn which(binary: &str) -> Option<std::path::PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var).map(|dir| dir.join(binary)).find(|candidate| is_executable_file(candidate))
}
