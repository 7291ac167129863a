use std::{
    env, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use tunneld_types::ConfigFile;

/// Environment variable holding the config path when `--config` is absent.
pub const CONFIG_PATH_ENV: &str = "TUNNELD_CONFIG_PATH";

/// Load and parse the configuration file. The file is JSON with `//` and
/// `/* */` comments tolerated.
pub fn load(flag: Option<&Path>) -> Result<ConfigFile> {
    let path = resolve_path(flag)?;
    let raw = fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&strip_comments(&raw)).with_context(|| format!("failed to parse {}", path.display()))
}

fn resolve_path(flag: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = flag {
        return Ok(path.to_path_buf());
    }
    if let Ok(value) = env::var(CONFIG_PATH_ENV)
        && !value.is_empty()
    {
        return Ok(PathBuf::from(value));
    }
    bail!("no configuration file; pass --config or set {CONFIG_PATH_ENV}")
}

/// Remove `//` and `/* */` comments outside of string literals.
fn strip_comments(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    let mut in_string = false;
    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            match c {
                '\\' => {
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                }
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '/' if chars.peek() == Some(&'/') => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
            }
            _ => out.push(c),
        }
    }
    out
}
