//! Grammar loading for the AST engine.
//!
//! Grammars are converted once into `tree_sitter::Language` handles and
//! memoised; parsers are cheap and created per parse call.

use std::sync::LazyLock;

use anyhow::{Result, anyhow};
use tree_sitter::{Parser, Tree};

/// Languages the AST engine can parse. JSX and CJS map to `Js`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Js,
    Ts,
    Tsx,
    Python,
    Java,
    Go,
    C,
}

static JS: LazyLock<tree_sitter::Language> =
    LazyLock::new(|| tree_sitter_javascript::LANGUAGE.into());
static TS: LazyLock<tree_sitter::Language> =
    LazyLock::new(|| tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into());
static TSX: LazyLock<tree_sitter::Language> =
    LazyLock::new(|| tree_sitter_typescript::LANGUAGE_TSX.into());
static PYTHON: LazyLock<tree_sitter::Language> =
    LazyLock::new(|| tree_sitter_python::LANGUAGE.into());
static JAVA: LazyLock<tree_sitter::Language> =
    LazyLock::new(|| tree_sitter_java::LANGUAGE.into());
static GO: LazyLock<tree_sitter::Language> = LazyLock::new(|| tree_sitter_go::LANGUAGE.into());
static C: LazyLock<tree_sitter::Language> = LazyLock::new(|| tree_sitter_c::LANGUAGE.into());

impl Language {
    pub fn id(&self) -> &'static str {
        match self {
            Self::Js => "js",
            Self::Ts => "ts",
            Self::Tsx => "tsx",
            Self::Python => "python",
            Self::Java => "java",
            Self::Go => "go",
            Self::C => "c",
        }
    }

    /// Resolve a language from a file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "js" | "jsx" | "cjs" | "mjs" => Some(Self::Js),
            "ts" | "mts" | "cts" => Some(Self::Ts),
            "tsx" => Some(Self::Tsx),
            "py" => Some(Self::Python),
            "java" => Some(Self::Java),
            "go" => Some(Self::Go),
            "c" | "h" => Some(Self::C),
            _ => None,
        }
    }

    /// Resolve a language from a file name.
    pub fn from_filename(name: &str) -> Option<Self> {
        let ext = name.rsplit('.').next()?;
        if ext == name {
            return None;
        }
        Self::from_extension(&ext.to_ascii_lowercase())
    }

    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "js" | "javascript" => Some(Self::Js),
            "ts" | "typescript" => Some(Self::Ts),
            "tsx" => Some(Self::Tsx),
            "python" | "py" => Some(Self::Python),
            "java" => Some(Self::Java),
            "go" => Some(Self::Go),
            "c" => Some(Self::C),
            _ => None,
        }
    }

    /// The memoised tree-sitter grammar handle.
    pub fn grammar(&self) -> tree_sitter::Language {
        match self {
            Self::Js => JS.clone(),
            Self::Ts => TS.clone(),
            Self::Tsx => TSX.clone(),
            Self::Python => PYTHON.clone(),
            Self::Java => JAVA.clone(),
            Self::Go => GO.clone(),
            Self::C => C.clone(),
        }
    }

    pub const ALL: [Language; 7] = [
        Language::Js,
        Language::Ts,
        Language::Tsx,
        Language::Python,
        Language::Java,
        Language::Go,
        Language::C,
    ];
}

/// Parse source into a tree. The returned `Tree` releases its resources on
/// drop.
pub fn parse(source: &str, language: Language) -> Result<Tree> {
    let mut parser = Parser::new();
    parser
        .set_language(&language.grammar())
        .map_err(|e| anyhow!("failed to load {} grammar: {}", language.id(), e))?;
    parser
        .parse(source, None)
        .ok_or_else(|| anyhow!("parser returned no tree for {}", language.id()))
}
