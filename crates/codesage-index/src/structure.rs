//! Structural hints for chunks.
//!
//! Each language gets an ordered list of regexes; the first pattern that
//! matches anywhere in a chunk decides whether it is tagged as a function or
//! a class. The hints feed payload metadata only, never chunk boundaries.

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructureKind {
    Function,
    Class,
}

impl StructureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Class => "class",
        }
    }
}

/// A detected definition inside a chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Structure {
    pub kind: StructureKind,
    pub name: String,
    /// Zero-based line within the chunk text
    pub line: usize,
}

/// Pluggable structure detection, one per language.
pub trait StructureDetector: Send + Sync {
    fn language(&self) -> &str;

    /// Matches in pattern order; the first element is the winning tag.
    fn detect(&self, text: &str) -> Vec<Structure>;
}

/// Regex-based detector. Patterns must capture the definition name in group 1.
pub struct RegexStructureDetector {
    language: String,
    patterns: Vec<(StructureKind, Regex)>,
}

impl RegexStructureDetector {
    pub fn new(language: impl Into<String>, patterns: Vec<(StructureKind, Regex)>) -> Self {
        Self {
            language: language.into(),
            patterns,
        }
    }

    /// Build from pattern sources. Invalid regexes are reported, not skipped.
    pub fn from_sources(
        language: impl Into<String>,
        sources: &[(StructureKind, &str)],
    ) -> Result<Self, regex::Error> {
        let patterns = sources
            .iter()
            .map(|(kind, src)| Ok((*kind, Regex::new(&format!("(?m){}", src))?)))
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Self::new(language, patterns))
    }
}

impl StructureDetector for RegexStructureDetector {
    fn language(&self) -> &str {
        &self.language
    }

    fn detect(&self, text: &str) -> Vec<Structure> {
        self.patterns
            .iter()
            .filter_map(|(kind, regex)| {
                let caps = regex.captures(text)?;
                let name = caps.get(1)?;
                let line = text[..name.start()].matches('\n').count();
                Some(Structure {
                    kind: *kind,
                    name: name.as_str().to_string(),
                    line,
                })
            })
            .collect()
    }
}

use StructureKind::{Class, Function};

const JS_PATTERNS: &[(StructureKind, &str)] = &[
    (Class, r"^\s*(?:export\s+)?(?:default\s+)?class\s+([A-Za-z_$][\w$]*)"),
    (Function, r"^\s*(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*([A-Za-z_$][\w$]*)"),
    (Function, r"^\s*(?:export\s+)?(?:const|let|var)\s+([A-Za-z_$][\w$]*)\s*=\s*(?:async\s+)?(?:function\b|\([^)]*\)\s*=>|[A-Za-z_$][\w$]*\s*=>)"),
    (Function, r"^\s*(?:module\.)?exports\.([A-Za-z_$][\w$]*)\s*=\s*(?:async\s+)?(?:function\b|\()"),
];

const TS_EXTRA_PATTERNS: &[(StructureKind, &str)] = &[
    (Class, r"^\s*(?:export\s+)?interface\s+([A-Za-z_$][\w$]*)"),
];

const PYTHON_PATTERNS: &[(StructureKind, &str)] = &[
    (Class, r"^\s*class\s+([A-Za-z_]\w*)"),
    (Function, r"^\s*(?:async\s+)?def\s+([A-Za-z_]\w*)"),
];

const RUST_PATTERNS: &[(StructureKind, &str)] = &[
    (Class, r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:struct|enum|trait)\s+([A-Za-z_]\w*)"),
    (Function, r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:const\s+)?(?:async\s+)?(?:unsafe\s+)?fn\s+([A-Za-z_]\w*)"),
];

const GO_PATTERNS: &[(StructureKind, &str)] = &[
    (Class, r"^type\s+([A-Za-z_]\w*)\s+(?:struct|interface)\b"),
    (Function, r"^func\s+(?:\([^)]*\)\s*)?([A-Za-z_]\w*)"),
];

const JVM_PATTERNS: &[(StructureKind, &str)] = &[
    (Class, r"^\s*(?:(?:public|private|protected|internal|abstract|final|static|sealed|data|open)\s+)*(?:class|interface|enum|object|record)\s+([A-Za-z_]\w*)"),
    (Function, r"^\s*(?:(?:public|private|protected|static|final|synchronized|abstract|override|suspend)\s+)+[\w<>\[\],.?]+\s+([A-Za-z_]\w*)\s*\("),
    (Function, r"^\s*(?:(?:private|internal|override|suspend|inline)\s+)*fun\s+(?:<[^>]*>\s*)?([A-Za-z_]\w*)"),
];

const CSHARP_PATTERNS: &[(StructureKind, &str)] = &[
    (Class, r"^\s*(?:(?:public|private|protected|internal|abstract|sealed|static|partial)\s+)*(?:class|interface|struct|record)\s+([A-Za-z_]\w*)"),
    (Function, r"^\s*(?:(?:public|private|protected|internal|static|virtual|override|async|sealed)\s+)+[\w<>\[\],.?]+\s+([A-Za-z_]\w*)\s*\("),
];

const RUBY_PATTERNS: &[(StructureKind, &str)] = &[
    (Class, r"^\s*(?:class|module)\s+([A-Z]\w*)"),
    (Function, r"^\s*def\s+(?:self\.)?([A-Za-z_]\w*[?!]?)"),
];

const PHP_PATTERNS: &[(StructureKind, &str)] = &[
    (Class, r"^\s*(?:abstract\s+|final\s+)?(?:class|interface|trait)\s+([A-Za-z_]\w*)"),
    (Function, r"^\s*(?:(?:public|private|protected|static)\s+)*function\s+&?([A-Za-z_]\w*)"),
];

const C_PATTERNS: &[(StructureKind, &str)] = &[
    (Class, r"^\s*(?:typedef\s+)?(?:class|struct)\s+([A-Za-z_]\w*)\s*(?:[:{]|$)"),
    (Function, r"^(?:[A-Za-z_][\w:<>*&]*\s+)+\**([A-Za-z_]\w*)\s*\([^;]*\)\s*(?:const\s*)?\{?\s*$"),
];

const SWIFT_PATTERNS: &[(StructureKind, &str)] = &[
    (Class, r"^\s*(?:(?:public|private|internal|open|final)\s+)*(?:class|struct|protocol|enum)\s+([A-Za-z_]\w*)"),
    (Function, r"^\s*(?:(?:public|private|internal|open|static|override)\s+)*func\s+([A-Za-z_]\w*)"),
];

const SCALA_PATTERNS: &[(StructureKind, &str)] = &[
    (Class, r"^\s*(?:(?:case|abstract|sealed|final)\s+)*(?:class|trait|object)\s+([A-Za-z_]\w*)"),
    (Function, r"^\s*(?:(?:private|protected|override)\s+)*def\s+([A-Za-z_]\w*)"),
];

const SHELL_PATTERNS: &[(StructureKind, &str)] = &[
    (Function, r"^\s*(?:function\s+)?([A-Za-z_][\w-]*)\s*\(\)\s*\{?"),
];

/// Language tag to detector lookup.
pub struct DetectorRegistry {
    detectors: HashMap<String, Arc<dyn StructureDetector>>,
}

impl DetectorRegistry {
    pub fn empty() -> Self {
        Self {
            detectors: HashMap::new(),
        }
    }

    /// Detectors for every language the scanner recognises as code.
    pub fn with_defaults() -> Result<Self, regex::Error> {
        let mut registry = Self::empty();

        let typescript: Vec<(StructureKind, &str)> = TS_EXTRA_PATTERNS
            .iter()
            .chain(JS_PATTERNS.iter())
            .copied()
            .collect();

        let table: [(&str, &[(StructureKind, &str)]); 12] = [
            ("javascript", JS_PATTERNS),
            ("typescript", &typescript),
            ("python", PYTHON_PATTERNS),
            ("rust", RUST_PATTERNS),
            ("go", GO_PATTERNS),
            ("java", JVM_PATTERNS),
            ("kotlin", JVM_PATTERNS),
            ("csharp", CSHARP_PATTERNS),
            ("ruby", RUBY_PATTERNS),
            ("php", PHP_PATTERNS),
            ("swift", SWIFT_PATTERNS),
            ("scala", SCALA_PATTERNS),
        ];
        for (language, sources) in table {
            registry.register(Arc::new(RegexStructureDetector::from_sources(language, sources)?));
        }
        for language in ["c", "cpp"] {
            registry.register(Arc::new(RegexStructureDetector::from_sources(language, C_PATTERNS)?));
        }
        registry.register(Arc::new(RegexStructureDetector::from_sources(
            "shell",
            SHELL_PATTERNS,
        )?));

        Ok(registry)
    }

    pub fn register(&mut self, detector: Arc<dyn StructureDetector>) {
        self.detectors
            .insert(detector.language().to_string(), detector);
    }

    pub fn get(&self, language: &str) -> Option<&Arc<dyn StructureDetector>> {
        self.detectors.get(language)
    }

    /// The winning structure for a chunk, if any pattern matches.
    pub fn detect_first(&self, language: &str, text: &str) -> Option<Structure> {
        self.get(language)?.detect(text).into_iter().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> DetectorRegistry {
        DetectorRegistry::with_defaults().unwrap()
    }

    #[test]
    fn test_javascript_function_and_arrow() {
        let r = registry();
        let hit = r
            .detect_first("javascript", "// util\nfunction formatDate(d) {\n  return d;\n}\n")
            .unwrap();
        assert_eq!(hit.kind, StructureKind::Function);
        assert_eq!(hit.name, "formatDate");
        assert_eq!(hit.line, 1);

        let arrow = r
            .detect_first("javascript", "const add = (a, b) => a + b;\n")
            .unwrap();
        assert_eq!(arrow.name, "add");
    }

    #[test]
    fn test_class_pattern_wins_over_function() {
        let source = "function helper() {}\nclass Cache {\n  get(k) { return k; }\n}\n";
        let hit = registry().detect_first("javascript", source).unwrap();
        assert_eq!(hit.kind, StructureKind::Class);
        assert_eq!(hit.name, "Cache");
    }

    #[test]
    fn test_python_and_rust() {
        let r = registry();
        let py = r
            .detect_first("python", "import os\n\nasync def fetch(url):\n    pass\n")
            .unwrap();
        assert_eq!((py.kind, py.name.as_str()), (StructureKind::Function, "fetch"));

        let rs = r
            .detect_first("rust", "pub(crate) struct Store {\n    items: Vec<u8>,\n}\n")
            .unwrap();
        assert_eq!((rs.kind, rs.name.as_str()), (StructureKind::Class, "Store"));
    }

    #[test]
    fn test_go_method_receiver() {
        let hit = registry()
            .detect_first("go", "func (s *Server) Start() error {\n\treturn nil\n}\n")
            .unwrap();
        assert_eq!(hit.name, "Start");
    }

    #[test]
    fn test_no_match_and_unknown_language() {
        let r = registry();
        assert!(r.detect_first("javascript", "const x = 1;\nx + 2;\n").is_none());
        assert!(r.detect_first("markdown", "# Title\n").is_none());
    }

    #[test]
    fn test_custom_detector_registration() {
        let mut r = DetectorRegistry::empty();
        r.register(Arc::new(
            RegexStructureDetector::from_sources("lua", &[(Function, r"^\s*function\s+(\w+)")])
                .unwrap(),
        ));
        assert_eq!(
            r.detect_first("lua", "function greet()\nend\n").unwrap().name,
            "greet"
        );
    }
}
