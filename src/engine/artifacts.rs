//! Code artifact extraction from meeting transcripts.
//!
//! Parses, in priority order:
//! 1. JSON manifests `[{"path": ..., "language": ..., "code": ...}]` emitted
//!    by agents instructed to do so (optionally inside a fenced block)
//! 2. Markdown fenced code blocks, with a filename inference chain: hint
//!    lines above the block, path-like tokens collected across the whole
//!    transcript, content-based inference, then a `code_N.ext` fallback.
//!
//! Extraction is a pure function of the transcript: running it twice on the
//! same messages yields the same artifacts.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};

use crate::models::MeetingMessage;

/// A code block extracted from a message, before persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedCode {
    pub language: String,
    pub content: String,
    pub source_agent: Option<String>,
    pub suggested_filename: String,
}

/// Language → file extension mapping.
static LANG_EXTENSIONS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    [
        ("python", ".py"),
        ("py", ".py"),
        ("javascript", ".js"),
        ("js", ".js"),
        ("typescript", ".ts"),
        ("ts", ".ts"),
        ("java", ".java"),
        ("cpp", ".cpp"),
        ("c++", ".cpp"),
        ("c", ".c"),
        ("go", ".go"),
        ("rust", ".rs"),
        ("ruby", ".rb"),
        ("bash", ".sh"),
        ("shell", ".sh"),
        ("sh", ".sh"),
        ("sql", ".sql"),
        ("html", ".html"),
        ("css", ".css"),
        ("json", ".json"),
        ("yaml", ".yaml"),
        ("yml", ".yaml"),
        ("markdown", ".md"),
        ("r", ".R"),
    ]
    .into_iter()
    .collect()
});

/// Fenced code blocks: ```lang\ncode\n```
static CODE_BLOCK_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(\w+)?[ \t]*\n(.*?)```").expect("code block regex"));

/// Path-like tokens in prose, e.g. `src/main.py`.
static PATH_IN_TEXT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[\s,，、:(\[\)\]\n])((?:[\w.-]+/)+[\w.-]+\.\w+)").expect("path token regex")
});

/// Filepath hints in the lines above a code block.
static FILEPATH_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        // # filename: path/to/file.py
        Regex::new(r"#\s*[Ff]ilename:\s*`?([^\s`]+)`?").expect("filename hint regex"),
        // Save as `path/to/file.py`
        Regex::new(r"[Ss]ave\s+(?:as|to)\s+`([^`]+)`").expect("save-as hint regex"),
        // File: path/to/file.py
        Regex::new(r"[Ff]ile:\s*`?([^\s`]+\.\w+)`?").expect("file hint regex"),
        // ### path/to/file.py
        Regex::new(r"###\s+`?([^\s`]+\.\w+)`?").expect("heading hint regex"),
        // **path/to/file.py**
        Regex::new(r"\*\*([^\s*]+\.\w+)\*\*").expect("bold hint regex"),
    ]
});

static FENCED_JSON_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*\n?(.*?)\n?```").expect("fenced json regex"));

static RAW_JSON_ARRAY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)\[\s*\{[^\]]*"path"[^\]]*"code"[^\]]*\}[^\]]*\]"#).expect("raw json regex")
});

static PYTHON_IMPORT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^(?:from|import)\s+(\w+)").expect("import regex"));

static PYTHON_CLASS_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^class\s+(\w+)").expect("class regex"));

static PYTHON_DEF_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^def\s+(\w+)").expect("def regex"));

static JS_EXPORT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"export\s+(?:default\s+)?(?:class|function)\s+(\w+)").expect("export regex")
});

/// Python standard library modules that must not appear in requirements.
static PYTHON_STDLIB: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "os", "sys", "re", "json", "math", "random", "datetime", "time", "collections",
        "itertools", "functools", "typing", "pathlib", "io", "csv", "copy", "hashlib",
        "base64", "uuid", "logging", "argparse", "unittest", "dataclasses", "abc", "enum",
        "string", "textwrap", "struct", "operator", "contextlib", "warnings", "subprocess",
        "shutil", "tempfile", "glob", "fnmatch", "stat", "fileinput", "pprint", "dis",
        "inspect", "traceback", "pickle", "shelve", "sqlite3", "gzip", "zipfile", "tarfile",
        "socket", "http", "urllib", "email", "html", "xml", "threading", "multiprocessing",
        "concurrent", "asyncio", "signal", "queue", "heapq", "bisect", "array", "weakref",
        "types", "codecs", "unicodedata", "locale", "gettext", "platform", "ctypes",
        "decimal", "fractions", "statistics", "secrets", "hmac",
    ]
    .into_iter()
    .collect()
});

/// Import name → PyPI package name for the common mismatches.
static IMPORT_TO_PACKAGE: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    [
        ("numpy", "numpy"),
        ("np", "numpy"),
        ("pandas", "pandas"),
        ("pd", "pandas"),
        ("sklearn", "scikit-learn"),
        ("scipy", "scipy"),
        ("matplotlib", "matplotlib"),
        ("plt", "matplotlib"),
        ("seaborn", "seaborn"),
        ("sns", "seaborn"),
        ("torch", "torch"),
        ("torchvision", "torchvision"),
        ("tensorflow", "tensorflow"),
        ("tf", "tensorflow"),
        ("keras", "keras"),
        ("cv2", "opencv-python"),
        ("PIL", "Pillow"),
        ("flask", "Flask"),
        ("fastapi", "fastapi"),
        ("uvicorn", "uvicorn"),
        ("requests", "requests"),
        ("httpx", "httpx"),
        ("bs4", "beautifulsoup4"),
        ("lxml", "lxml"),
        ("yaml", "pyyaml"),
        ("dotenv", "python-dotenv"),
        ("pydantic", "pydantic"),
        ("sqlalchemy", "sqlalchemy"),
        ("alembic", "alembic"),
        ("celery", "celery"),
        ("redis", "redis"),
        ("boto3", "boto3"),
        ("botocore", "botocore"),
        ("jwt", "PyJWT"),
        ("cryptography", "cryptography"),
        ("paramiko", "paramiko"),
        ("tqdm", "tqdm"),
        ("click", "click"),
        ("typer", "typer"),
        ("rich", "rich"),
        ("pytest", "pytest"),
        ("transformers", "transformers"),
        ("datasets", "datasets"),
        ("tokenizers", "tokenizers"),
        ("openai", "openai"),
        ("anthropic", "anthropic"),
        ("langchain", "langchain"),
        ("streamlit", "streamlit"),
        ("gradio", "gradio"),
        ("plotly", "plotly"),
        ("networkx", "networkx"),
        ("sympy", "sympy"),
        ("biopython", "biopython"),
        ("Bio", "biopython"),
        ("rdkit", "rdkit"),
    ]
    .into_iter()
    .collect()
});

fn extension_for(language: &str) -> &'static str {
    LANG_EXTENSIONS.get(language).copied().unwrap_or(".txt")
}

fn has_extension(path: &str) -> bool {
    path.rsplit('/').next().map(|f| f.contains('.')).unwrap_or(false)
}

/// Collect path-like filenames from text in encounter order, deduplicated.
fn collect_path_candidates(text: &str) -> Vec<String> {
    let mut candidates = Vec::new();
    for caps in PATH_IN_TEXT_PATTERN.captures_iter(text) {
        let path = caps[1].trim().to_string();
        if !path.is_empty() && has_extension(&path) && !candidates.contains(&path) {
            candidates.push(path);
        }
    }
    candidates
}

/// Search the last five lines before a code block for a filepath hint.
fn detect_filepath_hint(text_before_block: &str) -> Option<String> {
    let lines: Vec<&str> = text_before_block.trim().lines().collect();
    let start = lines.len().saturating_sub(5);
    let search_text = lines[start..].join("\n");

    for pattern in FILEPATH_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(&search_text) {
            let filepath = caps[1].trim_matches('`').trim().to_string();
            if has_extension(&filepath) {
                return Some(filepath);
            }
        }
    }
    None
}

/// Strictly decoded entry of the agent-emitted code manifest.
#[derive(Debug, Deserialize)]
struct ManifestEntry {
    path: String,
    #[serde(default = "default_manifest_language")]
    language: String,
    code: String,
}

fn default_manifest_language() -> String {
    "python".to_string()
}

fn manifest_to_blocks(entries: Vec<ManifestEntry>, source_agent: Option<&str>) -> Vec<ExtractedCode> {
    let mut results = Vec::new();
    for entry in entries {
        let mut path = entry.path.trim().to_string();
        let language = entry.language.trim().to_lowercase();
        let code = entry.code.trim().to_string();
        if path.is_empty() || code.is_empty() {
            continue;
        }
        if !has_extension(&path) {
            path = format!("{}{}", path.trim_end_matches('/'), extension_for(&language));
        }
        results.push(ExtractedCode {
            language,
            content: code,
            source_agent: source_agent.map(str::to_string),
            suggested_filename: path,
        });
    }
    results
}

/// Extract code from the JSON manifest format, either inside a fenced block
/// or as a raw array in the text.
fn extract_json_code_blocks(text: &str, source_agent: Option<&str>) -> Vec<ExtractedCode> {
    let mut results = Vec::new();

    for caps in FENCED_JSON_PATTERN.captures_iter(text) {
        let block = caps[1].trim();
        if let Ok(entries) = serde_json::from_str::<Vec<ManifestEntry>>(block) {
            results.extend(manifest_to_blocks(entries, source_agent));
        }
    }

    if results.is_empty() {
        if let Some(m) = RAW_JSON_ARRAY_PATTERN.find(text) {
            if let Ok(entries) = serde_json::from_str::<Vec<ManifestEntry>>(m.as_str()) {
                results.extend(manifest_to_blocks(entries, source_agent));
            }
        }
    }

    results
}

/// Convert CamelCase to snake_case.
fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for ch in name.chars() {
        if ch.is_ascii_uppercase() {
            out.push('_');
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out.trim_start_matches('_').to_string()
}

/// Infer a filename from block content, falling back to `code_N.ext`.
fn suggest_filename(content: &str, language: &str, ext: &str, index: usize) -> String {
    if language == "python" || language == "py" {
        if let Some(caps) = PYTHON_CLASS_PATTERN.captures(content) {
            return format!("{}{ext}", to_snake_case(&caps[1]));
        }
        if let Some(caps) = PYTHON_DEF_PATTERN.captures(content) {
            return format!("{}{ext}", &caps[1]);
        }
    }
    if matches!(language, "javascript" | "js" | "typescript" | "ts") {
        if let Some(caps) = JS_EXPORT_PATTERN.captures(content) {
            return format!("{}{ext}", &caps[1]);
        }
    }
    format!("code_{}{ext}", index + 1)
}

/// Extract all code blocks from one message.
///
/// JSON manifests take priority; otherwise fenced blocks are walked with the
/// filename inference chain. `path_candidates` is the transcript-wide ordered
/// list of path-like tokens; `block_start_index` is the global index of this
/// message's first block within that assignment.
pub fn extract_code_blocks(
    text: &str,
    source_agent: Option<&str>,
    path_candidates: Option<&[String]>,
    block_start_index: usize,
) -> Vec<ExtractedCode> {
    let json_blocks = extract_json_code_blocks(text, source_agent);
    if !json_blocks.is_empty() {
        return json_blocks;
    }

    let mut blocks = Vec::new();
    let mut index = 0usize;
    for caps in CODE_BLOCK_PATTERN.captures_iter(text) {
        let language = caps
            .get(1)
            .map(|m| m.as_str().to_lowercase())
            .unwrap_or_else(|| "text".to_string());
        let content = caps[2].trim().to_string();
        if content.is_empty() {
            continue;
        }

        let ext = extension_for(&language);
        let text_before = &text[..caps.get(0).map(|m| m.start()).unwrap_or(0)];

        let filename = if let Some(hint) = detect_filepath_hint(text_before) {
            hint
        } else if let Some(candidate) = path_candidates
            .and_then(|c| c.get(block_start_index + index))
        {
            candidate.clone()
        } else {
            suggest_filename(&content, &language, ext, index)
        };

        blocks.push(ExtractedCode {
            language,
            content,
            source_agent: source_agent.map(str::to_string),
            suggested_filename: filename,
        });
        index += 1;
    }

    blocks
}

/// Extract code blocks from the assistant messages of a meeting, preserving
/// the folder structure described anywhere in the transcript.
pub fn extract_from_meeting_messages(messages: &[MeetingMessage]) -> Vec<ExtractedCode> {
    let full_text: String = messages
        .iter()
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    let path_candidates = collect_path_candidates(&full_text);
    let candidates = if path_candidates.is_empty() { None } else { Some(path_candidates.as_slice()) };

    let mut all_blocks = Vec::new();
    let mut block_start = 0usize;
    for msg in messages {
        let blocks = extract_code_blocks(
            &msg.content,
            msg.agent_name.as_deref(),
            candidates,
            block_start,
        );
        block_start += blocks.len();
        all_blocks.extend(blocks);
    }
    all_blocks
}

/// Scan Python artifacts for imports and produce `requirements.txt` content:
/// stdlib modules dropped, known aliases mapped to PyPI names, sorted unique
/// lines. Empty string when nothing third-party is imported.
pub fn generate_requirements(artifacts: &[ExtractedCode]) -> String {
    let mut packages: HashSet<String> = HashSet::new();

    for artifact in artifacts {
        if artifact.language != "python" && artifact.language != "py" {
            continue;
        }
        for caps in PYTHON_IMPORT_PATTERN.captures_iter(&artifact.content) {
            let module = &caps[1];
            if PYTHON_STDLIB.contains(module) {
                continue;
            }
            if let Some(pkg) = IMPORT_TO_PACKAGE.get(module) {
                packages.insert(pkg.to_string());
            } else if !module.starts_with('_') {
                packages.insert(module.to_string());
            }
        }
    }

    let mut sorted: Vec<String> = packages.into_iter().collect();
    sorted.sort();
    sorted.join("\n")
}
