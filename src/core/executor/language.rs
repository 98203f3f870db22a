use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Languages the engine knows how to run. Adding a variant means adding a
/// row to [`DISPATCH`]; nothing else looks interpreters up dynamically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    #[serde(alias = "javascript", alias = "js")]
    Node,
    Lua,
    #[serde(alias = "shell", alias = "sh")]
    Bash,
    Zsh,
    Fish,
}

#[derive(Debug)]
pub struct LanguageSpec {
    pub language: Language,
    pub name: &'static str,
    pub interpreter: &'static str,
    pub extension: &'static str,
    pub executable: bool,
}

pub const DISPATCH: &[LanguageSpec] = &[
    LanguageSpec {
        language: Language::Python,
        name: "python",
        interpreter: "python3",
        extension: "py",
        executable: false,
    },
    LanguageSpec {
        language: Language::Node,
        name: "node",
        interpreter: "node",
        extension: "js",
        executable: false,
    },
    LanguageSpec {
        language: Language::Lua,
        name: "lua",
        interpreter: "lua",
        extension: "lua",
        executable: false,
    },
    LanguageSpec {
        language: Language::Bash,
        name: "bash",
        interpreter: "bash",
        extension: "sh",
        executable: true,
    },
    LanguageSpec {
        language: Language::Zsh,
        name: "zsh",
        interpreter: "zsh",
        extension: "zsh",
        executable: true,
    },
    LanguageSpec {
        language: Language::Fish,
        name: "fish",
        interpreter: "fish",
        extension: "fish",
        executable: true,
    },
];

impl Language {
    pub fn spec(self) -> &'static LanguageSpec {
        DISPATCH
            .iter()
            .find(|s| s.language == self)
            .unwrap_or(&DISPATCH[3])
    }

    pub fn as_str(self) -> &'static str {
        self.spec().name
    }

    pub fn is_shell(self) -> bool {
        matches!(self, Language::Bash | Language::Zsh | Language::Fish)
    }

    /// Resolve a client-supplied language. `auto` (or nothing) falls back to
    /// detection over the code itself.
    pub fn resolve(requested: Option<&str>, code: &str) -> Result<Language, String> {
        match requested.map(|s| s.trim().to_lowercase()) {
            None => Ok(Language::detect(code)),
            Some(s) if s.is_empty() || s == "auto" => Ok(Language::detect(code)),
            Some(s) => s.parse(),
        }
    }

    /// Shebang first, then cheap content heuristics; bash when nothing matches.
    pub fn detect(code: &str) -> Language {
        let first = code.lines().next().unwrap_or_default().trim();
        if let Some(shebang) = first.strip_prefix("#!") {
            let interp = shebang
                .split_whitespace()
                .map(|part| part.rsplit('/').next().unwrap_or(part))
                .find(|part| *part != "env")
                .unwrap_or_default();
            let detected = match interp {
                p if p.starts_with("python") => Some(Language::Python),
                "node" | "nodejs" => Some(Language::Node),
                p if p.starts_with("lua") => Some(Language::Lua),
                "zsh" => Some(Language::Zsh),
                "fish" => Some(Language::Fish),
                "bash" | "sh" | "dash" => Some(Language::Bash),
                _ => None,
            };
            if let Some(lang) = detected {
                return lang;
            }
        }

        let has = |needle: &str| code.contains(needle);
        if has("def ") || (has("import ") && !has("import {")) || (has("print(") && has(":\n")) {
            Language::Python
        } else if has("console.log") || has("require(") || has("=>") || has("const ") {
            Language::Node
        } else if has("local ")
            || (has("function") && has("end"))
            || code.trim_start().starts_with("--")
        {
            Language::Lua
        } else {
            Language::Bash
        }
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "python" | "python3" | "py" => Ok(Language::Python),
            "node" | "javascript" | "js" => Ok(Language::Node),
            "lua" => Ok(Language::Lua),
            "bash" | "shell" | "sh" => Ok(Language::Bash),
            "zsh" => Ok(Language::Zsh),
            "fish" => Ok(Language::Fish),
            other => Err(format!(
                "unsupported language '{}' (expected python, node, lua, shell, bash, zsh, fish or auto)",
                other
            )),
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_variant_has_a_dispatch_row() {
        for lang in [
            Language::Python,
            Language::Node,
            Language::Lua,
            Language::Bash,
            Language::Zsh,
            Language::Fish,
        ] {
            assert_eq!(lang.spec().language, lang);
            assert_eq!(lang.as_str().parse::<Language>().unwrap(), lang);
        }
    }

    #[test]
    fn shell_alias_maps_to_bash() {
        assert_eq!("shell".parse::<Language>().unwrap(), Language::Bash);
        assert!(Language::Bash.spec().executable);
        assert!(!Language::Python.spec().executable);
    }

    #[test]
    fn detect_prefers_shebang() {
        assert_eq!(
            Language::detect("#!/usr/bin/env python3\nprint('x')"),
            Language::Python
        );
        assert_eq!(Language::detect("#!/bin/zsh\necho hi"), Language::Zsh);
        assert_eq!(
            Language::detect("#!/usr/bin/env node\nconsole.log(1)"),
            Language::Node
        );
    }

    #[test]
    fn detect_falls_back_to_heuristics() {
        assert_eq!(Language::detect("import os\nprint(os.getcwd())"), Language::Python);
        assert_eq!(Language::detect("console.log('hi')"), Language::Node);
        assert_eq!(Language::detect("local x = 1\nprint(x)"), Language::Lua);
        assert_eq!(Language::detect("echo \"hi\""), Language::Bash);
    }

    #[test]
    fn resolve_rejects_unknown_language() {
        assert!(Language::resolve(Some("cobol"), "x").is_err());
        assert_eq!(
            Language::resolve(Some("auto"), "echo hi").unwrap(),
            Language::Bash
        );
    }
}
