use std::{collections::BTreeSet, fs, path::Path};

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static STRIP_C_COMMENTS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?ms)//.*?$|/\*.*?\*/|'(?:\\.|[^\\'])*'|"(?:\\.|[^\\"])*""#).unwrap()
});

static C_FUNC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^(static\s+)?[^\s]+\s+([^\s(]+)\(([^;)]*)\)[^;]+?\{").unwrap());

/// Blanks out comments while leaving string and character literals alone, so
/// a `{` inside a literal can't fake a function body.
fn strip_c_comments(text: &str) -> String {
    STRIP_C_COMMENTS
        .replace_all(text, |caps: &Captures| {
            let matched = caps.get(0).unwrap().as_str();
            if matched.starts_with('/') {
                " ".to_string()
            } else {
                matched.to_string()
            }
        })
        .into_owned()
}

/// Names of functions defined (not merely declared) in C source text.
pub fn funcs_defined_in_c(text: &str) -> BTreeSet<String> {
    let stripped = strip_c_comments(text);
    C_FUNC.captures_iter(&stripped).map(|caps| caps[2].to_string()).collect()
}

/// Scans a companion source file. A missing file means no functions are
/// defined yet, which is the normal starting state of a split.
pub fn scan_companion<P: AsRef<Path>>(path: P) -> Result<BTreeSet<String>> {
    let path = path.as_ref();
    if !path.is_file() {
        return Ok(BTreeSet::new());
    }
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read companion source '{}'", path.display()))?;
    Ok(funcs_defined_in_c(&text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_definitions() {
        let text = "\
s32 func_80001234(s32 arg0) {\n    return arg0;\n}\n\n\
static void helper(void)\n{\n}\n";
        let funcs = funcs_defined_in_c(text);
        assert!(funcs.contains("func_80001234"));
        assert!(funcs.contains("helper"));
        assert_eq!(funcs.len(), 2);
    }

    #[test]
    fn ignores_prototypes_and_stubs() {
        let text = "\
void later(void);\n\
INCLUDE_ASM(s32, \"main\", func_80001234);\n";
        assert!(funcs_defined_in_c(text).is_empty());
    }

    #[test]
    fn ignores_commented_out_definitions() {
        let text = "\
// s32 old_func(void) {\n\
/*\nvoid dead_func(void) {\n}\n*/\n\
s32 live_func(void) {\n    return 0;\n}\n";
        let funcs = funcs_defined_in_c(text);
        assert!(funcs.contains("live_func"));
        assert!(!funcs.contains("old_func"));
        assert!(!funcs.contains("dead_func"));
    }

    #[test]
    fn ignores_definitions_inside_string_literals() {
        let text = "const char* s = \"void fake(void) {\";\nchar c = '{';\n";
        assert!(funcs_defined_in_c(text).is_empty());
    }

    #[test]
    fn missing_companion_scans_empty() {
        let funcs = scan_companion("/nonexistent/path/main.c").unwrap();
        assert!(funcs.is_empty());
    }
}
