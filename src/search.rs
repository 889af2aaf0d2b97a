/*============================================================
  Synavera Project: Dev-Mgr
  Module: devmgr_core::search
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Parse AUR helper search output and pacman foreign-package
    listings into structured records.

  Security / Safety Notes:
    Pure text transforms; nothing here touches the system.

  Dependencies:
    regex for vote and popularity markers, serde for output.

  Operational Scope:
    Fed by the AUR helper manager; records are produced per
    call and never persisted.

  Revision History:
    2025-11-02 COD  Authored search output parser.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Malformed entries are skipped, never fatal
    - Deterministic, order-preserving output
============================================================*/

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

/// Repository marker used by yay, paru and trizen for AUR results.
pub const DEFAULT_REPOSITORY_MARKER: &str = "aur/";

/// One search hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PackageRecord {
    pub name: String,
    pub version: String,
    pub description: String,
    pub votes: u64,
    pub popularity: f64,
    pub installed: bool,
}

/// Installed package that belongs to no sync repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignPackage {
    pub name: String,
    pub version: String,
}

fn vote_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\(\+(\d+)").ok()).as_ref()
}

fn popularity_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^(\d+(?:\.\d+)?)%").ok())
        .as_ref()
}

fn capture<'t>(pattern: Option<&Regex>, token: &'t str) -> Option<&'t str> {
    pattern?.captures(token)?.get(1).map(|found| found.as_str())
}

/// Parse `<helper> -Ss` output.
///
/// A line starting with `marker` opens a record; the following line, when it
/// is not itself a marker line, is taken as the description. Everything else
/// is skipped.
pub fn parse_search_output(raw: &str, marker: &str) -> Vec<PackageRecord> {
    let mut records = Vec::new();
    let mut lines = raw.lines().peekable();

    while let Some(line) = lines.next() {
        if !line.starts_with(marker) {
            continue;
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 2 {
            continue;
        }

        let description = match lines.peek() {
            Some(next) if !next.starts_with(marker) => {
                let text = next.trim().to_string();
                lines.next();
                text
            }
            _ => String::new(),
        };

        let mut votes = 0;
        let mut popularity = 0.0;
        let mut installed = false;
        for token in &tokens[2..] {
            if let Some(found) = capture(vote_pattern(), token) {
                votes = found.parse().unwrap_or(0);
            } else if let Some(found) = capture(popularity_pattern(), token) {
                popularity = found.parse().unwrap_or(0.0);
            } else if token.to_ascii_lowercase().contains("installed") {
                installed = true;
            }
        }

        records.push(PackageRecord {
            name: tokens[0].strip_prefix(marker).unwrap_or(tokens[0]).to_string(),
            version: tokens[1].to_string(),
            description,
            votes,
            popularity,
            installed,
        });
    }

    records
}

/// Parse `pacman -Qm` output (`name version` per line).
pub fn parse_foreign_packages(raw: &str) -> Vec<ForeignPackage> {
    raw.lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let name = parts.next()?;
            let version = parts.next()?;
            Some(ForeignPackage {
                name: name.to_string(),
                version: version.to_string(),
            })
        })
        .collect()
}
