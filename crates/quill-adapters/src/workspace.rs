//! Read-only workspace scan that feeds related files into edit prompts.

use anyhow::Result;
use quill_core::util::truncate_str;
use quill_core::{BoxFuture, ContextProvider, GatheredContext};
use regex::Regex;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use walkdir::WalkDir;

const MAX_FILE_BYTES: u64 = 256 * 1024;
const MAX_FILES_SCANNED: usize = 5_000;
const MAX_SCAN_DEPTH: usize = 12;
/// Smallest remainder worth adding as a truncated file.
const MIN_EXCERPT_CHARS: usize = 200;

const IGNORED_DIRS: &[&str] = &[
    "target",
    "node_modules",
    ".git",
    ".svn",
    ".hg",
    "dist",
    "build",
    "out",
    ".next",
    ".venv",
    "venv",
    "__pycache__",
    "vendor",
    "coverage",
];

const TEXT_EXTENSIONS: &[&str] = &[
    "rs", "js", "mjs", "cjs", "ts", "tsx", "jsx", "vue", "svelte", "astro", "html", "htm", "css",
    "scss", "sass", "less", "json", "toml", "yaml", "yml", "md", "py", "go", "java", "kt", "c",
    "h", "cc", "cpp", "hpp", "cs", "swift", "php", "rb", "dart", "scala", "sh", "sql", "xml",
    "svg",
];

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "with", "this", "that", "from", "into", "add", "make", "use", "new",
    "change", "update", "fix", "should", "please", "all", "can", "are", "was", "but", "not",
];

#[derive(Debug, Clone)]
pub struct WorkspaceContext {
    root: PathBuf,
    exclude: HashSet<PathBuf>,
}

#[derive(Debug)]
struct Candidate {
    rel_path: String,
    content: String,
    score: usize,
}

impl WorkspaceContext {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            exclude: HashSet::new(),
        }
    }

    /// Never include `path` (usually the document being edited).
    pub fn excluding(mut self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let path = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        self.exclude.insert(path);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Most relevant files for `query`, concatenated up to `char_budget`.
    pub fn gather_blocking(&self, query: &str, char_budget: usize) -> Result<GatheredContext> {
        let terms = query_terms(query);
        if terms.is_empty() || char_budget == 0 {
            return Ok(GatheredContext::default());
        }

        let mut candidates = self.scan(&terms);
        candidates.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.rel_path.cmp(&b.rel_path)));

        let mut context = GatheredContext::default();
        let mut remaining = char_budget;
        for candidate in candidates {
            let header = format!("// {}\n", candidate.rel_path);
            let needed = header.chars().count() + candidate.content.chars().count() + 1;
            if needed <= remaining {
                context.text.push_str(&header);
                context.text.push_str(&candidate.content);
                context.text.push('\n');
                remaining -= needed;
            } else {
                let room = remaining.saturating_sub(header.chars().count() + 1);
                if room >= MIN_EXCERPT_CHARS {
                    context.text.push_str(&header);
                    context.text.push_str(truncate_str(&candidate.content, room));
                    context.text.push('\n');
                    context.file_count += 1;
                }
                break;
            }
            context.file_count += 1;
        }

        tracing::debug!(
            root = %self.root.display(),
            files = context.file_count,
            chars = context.text.chars().count(),
            "workspace context gathered"
        );
        Ok(context)
    }

    fn scan(&self, terms: &[String]) -> Vec<Candidate> {
        let mut candidates = Vec::new();
        for entry in WalkDir::new(&self.root)
            .max_depth(MAX_SCAN_DEPTH)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_ignored_path(e.path()))
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .take(MAX_FILES_SCANNED)
        {
            let path = entry.path();
            if !has_text_extension(path) || self.is_excluded(path) {
                continue;
            }
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if metadata.len() > MAX_FILE_BYTES {
                continue;
            }
            let Ok(content) = fs::read_to_string(path) else {
                continue;
            };

            let rel_path = path
                .strip_prefix(&self.root)
                .unwrap_or(path)
                .display()
                .to_string();
            let score = relevance(&rel_path, &content, terms);
            if score > 0 {
                candidates.push(Candidate {
                    rel_path,
                    content,
                    score,
                });
            }
        }
        candidates
    }

    fn is_excluded(&self, path: &Path) -> bool {
        if self.exclude.is_empty() {
            return false;
        }
        let canonical = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        self.exclude.contains(&canonical)
    }
}

impl ContextProvider for WorkspaceContext {
    fn gather<'a>(
        &'a self,
        query: &'a str,
        char_budget: usize,
    ) -> BoxFuture<'a, Result<GatheredContext>> {
        let this = self.clone();
        let query = query.to_string();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || this.gather_blocking(&query, char_budget)).await?
        })
    }
}

static IDENTIFIER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_\-]{2,}").ok());

fn query_terms(query: &str) -> Vec<String> {
    let Some(re) = IDENTIFIER.as_ref() else {
        return Vec::new();
    };
    let mut seen = HashSet::new();
    re.find_iter(query)
        .map(|m| m.as_str().to_ascii_lowercase())
        .filter(|t| !STOP_WORDS.contains(&t.as_str()))
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// Path hits weigh more than content hits; content hits are capped per term.
fn relevance(rel_path: &str, content: &str, terms: &[String]) -> usize {
    let path = rel_path.to_ascii_lowercase();
    let content = content.to_ascii_lowercase();
    terms
        .iter()
        .map(|term| {
            let in_path = if path.contains(term.as_str()) { 5 } else { 0 };
            in_path + content.matches(term.as_str()).count().min(5)
        })
        .sum()
}

fn has_text_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| TEXT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

fn is_ignored_path(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    IGNORED_DIRS.contains(&name) || (name.starts_with('.') && name.len() > 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn workspace() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/footer.js", "export const footerLinks = ['about', 'contact'];\n");
        write(dir.path(), "src/header.js", "export const title = 'Shop';\n");
        write(dir.path(), "src/index.html", "<footer></footer>\n");
        write(dir.path(), "node_modules/lib/footer.js", "module.exports = 'footer';\n");
        write(dir.path(), ".git/footer.txt", "footer\n");
        dir
    }

    #[test]
    fn test_query_terms_drop_short_and_stop_words() {
        assert_eq!(
            query_terms("Add the footerLinks to the footer, fix it"),
            vec!["footerlinks".to_string(), "footer".to_string()]
        );
    }

    #[test]
    fn test_gather_prefers_matching_files_and_skips_ignored_dirs() {
        let dir = workspace();
        let context = WorkspaceContext::new(dir.path())
            .gather_blocking("add a newsletter link to the footer", 10_000)
            .unwrap();

        assert_eq!(context.file_count, 2);
        assert!(context.text.starts_with("// src/footer.js\n"));
        assert!(context.text.contains("// src/index.html\n"));
        assert!(!context.text.contains("node_modules"));
        assert!(!context.text.contains("header.js"));
    }

    #[test]
    fn test_gather_respects_budget_and_exclusion() {
        let dir = workspace();
        let excluded = dir.path().join("src/footer.js");
        let context = WorkspaceContext::new(dir.path())
            .excluding(&excluded)
            .gather_blocking("footer", 10_000)
            .unwrap();
        assert_eq!(context.file_count, 1);
        assert!(context.text.contains("src/index.html"));

        let tiny = WorkspaceContext::new(dir.path())
            .gather_blocking("footer", 30)
            .unwrap();
        assert!(tiny.text.chars().count() <= 30);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_provider_runs_scan_off_the_async_thread() {
        let dir = workspace();
        let provider: Box<dyn ContextProvider> = Box::new(WorkspaceContext::new(dir.path()));
        let context = provider.gather("contact footerLinks", 10_000).await.unwrap();
        assert!(context.text.contains("footerLinks"));
    }
}
