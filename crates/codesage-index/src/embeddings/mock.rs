use async_trait::async_trait;

use super::{EmbeddingError, EmbeddingProvider};

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "do", "does", "for", "from", "how", "in",
    "is", "it", "of", "on", "or", "the", "this", "that", "to", "what", "where", "which", "with",
];

/// Stems folded onto one shared concept, so a question phrased in prose
/// lands near code that spells the same idea differently.
const CONCEPTS: &[(&str, &[&str])] = &[
    (
        "error",
        &[
            "err", "error", "exception", "except", "handl", "catch", "throw", "fail", "failur",
            "rais", "panic", "fault",
        ],
    ),
    ("config", &["config", "configur", "setting", "option"]),
];

/// Deterministic bag-of-words embedder.
///
/// Tokens (split on non-alphanumerics and camelCase humps, lowercased,
/// crudely stemmed, folded onto [`CONCEPTS`]) are hashed into buckets and
/// the counts are L2-normalised, so texts sharing vocabulary have high
/// cosine similarity.
#[derive(Debug, Clone)]
pub struct MockEmbeddings {
    dimensions: usize,
}

impl MockEmbeddings {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in tokens(text) {
            let token = concept(&token);
            let bucket = (fnv1a(token.as_bytes()) % self.dimensions as u64) as usize;
            vector[bucket] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm == 0.0 {
            vector[0] = 1.0;
        } else {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddings {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.vectorize(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        "mock-bow"
    }
}

fn tokens(text: &str) -> Vec<String> {
    let mut words = Vec::new();
    for raw in text.split(|c: char| !c.is_alphanumeric()) {
        let mut current = String::new();
        let mut prev_lower = false;
        for ch in raw.chars() {
            if ch.is_uppercase() && prev_lower && !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
            current.extend(ch.to_lowercase());
        }
        if !current.is_empty() {
            words.push(current);
        }
    }

    words
        .into_iter()
        .filter(|w| w.len() > 1 && !STOPWORDS.contains(&w.as_str()))
        .map(|w| stem(&w))
        .collect()
}

fn stem(word: &str) -> String {
    for suffix in ["ing", "ers", "er", "ed", "es", "s", "e"] {
        if let Some(base) = word.strip_suffix(suffix) {
            if base.len() >= 3 {
                return base.to_string();
            }
        }
    }
    word.to_string()
}

fn concept(stem: &str) -> &str {
    CONCEPTS
        .iter()
        .find(|(_, members)| members.contains(&stem))
        .map(|(name, _)| *name)
        .unwrap_or(stem)
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn test_tokens_split_camel_case_and_stem() {
        assert_eq!(tokens("handleErrors in the parser"), vec!["handl", "error", "pars"]);
        assert_eq!(tokens("How are errors handled?"), vec!["error", "handl"]);
    }

    #[tokio::test]
    async fn test_vectors_are_normalized_and_deterministic() {
        let embedder = MockEmbeddings::new(64);
        let a = embedder.embed("function handleError(err) {}").await.unwrap();
        let b = embedder.embed("function handleError(err) {}").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!((cosine(&a, &a) - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_shared_vocabulary_scores_higher() {
        let embedder = MockEmbeddings::new(256);
        let query = embedder.embed("how are errors handled").await.unwrap();
        let related = embedder
            .embed("function handleError(error) { logError(error); }")
            .await
            .unwrap();
        let unrelated = embedder
            .embed("function formatDate(date) { return date.toISOString(); }")
            .await
            .unwrap();
        assert!(cosine(&query, &related) > cosine(&query, &unrelated));
    }

    #[test]
    fn test_concepts_fold_related_stems() {
        assert_eq!(concept("handl"), "error");
        assert_eq!(concept("catch"), "error");
        assert_eq!(concept("setting"), "config");
        assert_eq!(concept("date"), "date");

        let embedder = MockEmbeddings::new(128);
        let query = embedder.vectorize("How is error handling implemented?");
        let spelled_differently = embedder.vectorize("try { run(); } catch (err) { throw new AppException(err); }");
        let unrelated = embedder.vectorize("return date.toISOString().slice(0, 10);");
        assert!(cosine(&query, &spelled_differently) > 0.5);
        assert!(cosine(&query, &unrelated) < 0.1);
    }

    #[test]
    fn test_empty_text_is_unit_vector() {
        let v = MockEmbeddings::new(8).vectorize("  ");
        assert_eq!(v[0], 1.0);
        assert_eq!(v.iter().sum::<f32>(), 1.0);
    }
}
