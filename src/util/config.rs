use std::{
    fs,
    num::ParseIntError,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::obj::{Symbol, SymbolKind, SymbolTable};

/// Top-level project configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SplitConfig {
    pub name: String,
    #[serde(default)]
    pub options: Options,
    pub segments: Vec<SegmentDef>,
    #[serde(default)]
    pub symbol_addrs: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Which artifact families to materialize ("code", "bin", or "all").
    pub modes: Vec<String>,
    pub compiler: Compiler,
    pub mnemonic_ljust: usize,
    /// Print suggested extra split points for functions that end in padding.
    pub find_file_boundaries: bool,
    /// Linker script file name, defaulting to the project name.
    pub ld_script: Option<String>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            modes: vec!["all".to_string()],
            compiler: Compiler::Ido,
            mnemonic_ljust: 11,
            find_file_boundaries: false,
            ld_script: None,
        }
    }
}

impl Options {
    pub fn mode_active(&self, mode: &str) -> bool {
        self.modes.iter().any(|m| m == mode || m == "all")
    }
}

/// Selects the companion-source stub syntax.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compiler {
    Gcc,
    Ido,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SegmentDef {
    pub name: String,
    pub start: u32,
    pub end: u32,
    pub vram: u32,
    #[serde(default)]
    pub vram_lock: bool,
    #[serde(default)]
    pub files: Vec<FileEntry>,
}

/// A declared sub-range, in either the compact tuple form
/// (`[start, type]` / `[start, type, name]`) or the explicit map form.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FileEntry {
    Full {
        start: u32,
        end: u32,
        #[serde(rename = "type")]
        kind: String,
        #[serde(default)]
        name: Option<String>,
    },
    Named(u32, String, String),
    Compact(u32, String),
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<SplitConfig> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config '{}'", path.display()))?;
    serde_yaml::from_str(&text)
        .with_context(|| format!("Failed to parse config '{}'", path.display()))
}

fn parse_hex(s: &str) -> Result<u32, ParseIntError> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else {
        s.parse::<u32>()
    }
}

static SYMBOL_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        "^\\s*(?P<name>[A-Za-z_][A-Za-z0-9_]*)\\s*=\\s*(?P<addr>0[xX][0-9A-Fa-f]+|[0-9]+);(?:\\s*//\\s*(?P<attrs>.*))?$",
    )
    .unwrap()
});
static COMMENT_LINE: Lazy<Regex> = Lazy::new(|| Regex::new("^\\s*(?://|#).*$").unwrap());

/// Parses one `NAME = 0xADDR; // kind` line. Returns `None` for blank and
/// comment lines.
pub fn parse_symbol_line(line: &str) -> Result<Option<Symbol>> {
    if let Some(captures) = SYMBOL_LINE.captures(line) {
        let name = captures["name"].to_string();
        let address = parse_hex(&captures["addr"])
            .map_err(|e| anyhow!("Bad address in symbol line '{line}': {e}"))?;
        let mut kind = SymbolKind::Data;
        if let Some(attrs) = captures.name("attrs") {
            for attr in attrs.as_str().split_whitespace() {
                match attr {
                    "func" => kind = SymbolKind::Function,
                    "data" => kind = SymbolKind::Data,
                    "jtbl" => kind = SymbolKind::JumpTable,
                    _ => bail!("Unknown symbol attribute '{attr}'"),
                }
            }
        }
        Ok(Some(Symbol { name, address, kind }))
    } else if line.trim().is_empty() || COMMENT_LINE.is_match(line) {
        Ok(None)
    } else {
        Err(anyhow!("Failed to parse symbol line '{line}'"))
    }
}

/// Loads the frozen global symbol table. A config without `symbol_addrs`
/// yields an empty table.
pub fn load_symbols<P: AsRef<Path>>(path: P) -> Result<SymbolTable> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read symbols file '{}'", path.display()))?;
    let mut table = SymbolTable::default();
    for line in text.lines() {
        if let Some(symbol) = parse_symbol_line(line)? {
            table.add(symbol);
        }
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_config_with_both_file_entry_forms() {
        let yaml = "\
name: mygame
options:
  compiler: gcc
  find_file_boundaries: true
segments:
  - name: main
    start: 0x1000
    end: 0x4000
    vram: 0x80000400
    files:
      - [0x1000, c, main]
      - [0x2000, asm]
      - {start: 0x3000, end: 0x4000, type: bin}
symbol_addrs: symbol_addrs.txt
";
        let config: SplitConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.name, "mygame");
        assert_eq!(config.options.compiler, Compiler::Gcc);
        assert!(config.options.find_file_boundaries);
        // Unset options keep their defaults.
        assert_eq!(config.options.mnemonic_ljust, 11);
        assert!(config.options.mode_active("bin"));

        let seg = &config.segments[0];
        assert_eq!((seg.start, seg.end, seg.vram), (0x1000, 0x4000, 0x80000400));
        assert_eq!(seg.files.len(), 3);
        assert!(matches!(&seg.files[0], FileEntry::Named(0x1000, t, n) if t == "c" && n == "main"));
        assert!(matches!(&seg.files[1], FileEntry::Compact(0x2000, t) if t == "asm"));
        assert!(
            matches!(&seg.files[2], FileEntry::Full { start: 0x3000, end: 0x4000, kind, name: None } if kind == "bin")
        );
    }

    #[test]
    fn mode_selection() {
        let options = Options { modes: vec!["code".to_string()], ..Options::default() };
        assert!(options.mode_active("code"));
        assert!(!options.mode_active("bin"));
        assert!(Options::default().mode_active("bin"));
    }

    #[test]
    fn parses_symbol_lines() {
        let sym = parse_symbol_line("D_80123450 = 0x80123450; // data").unwrap().unwrap();
        assert_eq!(sym.name, "D_80123450");
        assert_eq!(sym.address, 0x80123450);
        assert_eq!(sym.kind, SymbolKind::Data);

        let sym = parse_symbol_line("osInit = 0x80002000; // func").unwrap().unwrap();
        assert_eq!(sym.kind, SymbolKind::Function);

        let sym = parse_symbol_line("jtbl_800CC9F0 = 0x800CC9F0; // jtbl").unwrap().unwrap();
        assert_eq!(sym.kind, SymbolKind::JumpTable);

        // Kind defaults to data.
        let sym = parse_symbol_line("D_1 = 16;").unwrap().unwrap();
        assert_eq!((sym.address, sym.kind), (16, SymbolKind::Data));
    }

    #[test]
    fn symbol_line_comments_and_errors() {
        assert!(parse_symbol_line("").unwrap().is_none());
        assert!(parse_symbol_line("// a comment").unwrap().is_none());
        assert!(parse_symbol_line("# also a comment").unwrap().is_none());
        assert!(parse_symbol_line("not a symbol").is_err());
        assert!(parse_symbol_line("D_1 = 0x10; // gadget").is_err());
    }
}
