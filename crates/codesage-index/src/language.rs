//! Language detection by file extension.

use std::path::Path;

/// Language tag for a path, or `"unknown"`.
pub fn detect_language(path: &Path) -> &'static str {
    let ext = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => ext.to_ascii_lowercase(),
        None => return "unknown",
    };

    match ext.as_str() {
        "rs" => "rust",
        "py" => "python",
        "js" | "jsx" | "mjs" | "cjs" => "javascript",
        "ts" | "tsx" => "typescript",
        "go" => "go",
        "java" => "java",
        "kt" => "kotlin",
        "rb" => "ruby",
        "php" => "php",
        "swift" => "swift",
        "scala" => "scala",
        "c" | "h" => "c",
        "cpp" | "hpp" | "cc" => "cpp",
        "cs" => "csharp",
        "sh" => "shell",
        "sql" => "sql",
        "md" => "markdown",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        _ => "unknown",
    }
}

const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "pdf", "zip", "gz", "tar", "tgz", "bz2",
    "xz", "7z", "exe", "dll", "so", "dylib", "a", "o", "class", "jar", "wasm", "woff", "woff2",
    "ttf", "otf", "eot", "mp3", "mp4", "mov", "avi", "bin", "dat", "db", "sqlite", "pyc",
];

/// True when the extension alone marks the file as binary.
pub fn has_binary_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            BINARY_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_language() {
        assert_eq!(detect_language(Path::new("src/main.rs")), "rust");
        assert_eq!(detect_language(Path::new("app/index.JSX")), "javascript");
        assert_eq!(detect_language(Path::new("lib/util.ts")), "typescript");
        assert_eq!(detect_language(Path::new("include/x.hpp")), "cpp");
        assert_eq!(detect_language(Path::new("Makefile")), "unknown");
    }

    #[test]
    fn test_binary_extensions() {
        assert!(has_binary_extension(Path::new("logo.PNG")));
        assert!(has_binary_extension(Path::new("lib/libfoo.so")));
        assert!(!has_binary_extension(Path::new("src/lib.rs")));
        assert!(!has_binary_extension(Path::new("README")));
    }
}
