//! Text stages built from configuration.
//!
//! Every configured [`StageConfig`] maps to one operation on a
//! [`ProcessChain`] over strings:
//!
//! ```text
//! lines ──► normalize ──► split_words ──► parallel ──► drop_stopwords ──► sort ──► output
//!           (trim, drop     (explode)      (pool)       (filter)
//!            blank lines)
//! ```

use crate::config::{PipelineConfig, StageConfig};
use crate::error::Outcome;
use crate::processing::{ProcessChain, ProcessingEnv};
use std::collections::HashSet;

/// Split a line into words, stripping punctuation around each word.
///
/// Inner punctuation is kept, so `multi-line` stays a single word.
pub fn split_words(line: &str) -> Vec<String> {
    line.split_whitespace()
        .map(|w| w.trim_matches(|c: char| c.is_ascii_punctuation()))
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Case-insensitive stopword test.
pub fn is_stopword(stopwords: &HashSet<String>, word: &str) -> bool {
    stopwords.contains(&word.to_lowercase())
}

/// Remove repeated values, keeping the first occurrence. Failures are kept.
pub fn dedup(items: Vec<Outcome<String>>) -> Vec<Outcome<String>> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| match item {
            Ok(value) => seen.insert(value.clone()),
            Err(_) => true,
        })
        .collect()
}

/// Trims input lines and drops blank ones.
pub fn normalize(env: &ProcessingEnv) -> ProcessChain<String> {
    ProcessChain::new(env)
        .map(|line: String| line.trim().to_string())
        .filter(|line| !line.is_empty())
}

/// Build the chain for the configured stages.
pub fn build_chain(env: &ProcessingEnv, config: &PipelineConfig) -> ProcessChain<String> {
    let mut chain = normalize(env);
    for stage in &config.stages {
        chain = match stage {
            StageConfig::SplitWords => chain.explode(|line: String| split_words(&line)),
            StageConfig::Lowercase => chain.map(|w: String| w.to_lowercase()),
            StageConfig::Trim => chain.map(|w: String| w.trim().to_string()),
            StageConfig::DropStopwords { words } => {
                let stopwords: HashSet<String> = words.iter().map(|w| w.to_lowercase()).collect();
                chain.filter(move |w| !is_stopword(&stopwords, w))
            }
            StageConfig::MinLength { length } => {
                let length = *length;
                chain.filter(move |w| w.chars().count() >= length)
            }
            StageConfig::Sort { descending: false } => chain.sort(|a, b| a.cmp(b)),
            StageConfig::Sort { descending: true } => chain.sort(|a, b| b.cmp(a)),
            StageConfig::Dedup => chain.transform(dedup),
            StageConfig::Parallel { workers } => chain.parallel(*workers),
            StageConfig::Unordered => chain.unordered(),
            StageConfig::Synchronously => chain.synchronously(),
            StageConfig::Asynchronously => chain.asynchronously(),
        };
    }
    tracing::debug!("built chain with {} stages", chain.len());
    chain
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_stopwords;
    use crate::error::StageError;

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_split_words() {
        assert_eq!(
            split_words("  text with some words. "),
            vec!["text", "with", "some", "words"]
        );
        assert_eq!(split_words("this is a multi-line"), vec!["this", "is", "a", "multi-line"]);
        assert_eq!(split_words("... -- !"), Vec::<String>::new());
        assert_eq!(split_words("\"quoted\", (paren)"), vec!["quoted", "paren"]);
    }

    #[test]
    fn test_is_stopword() {
        let stopwords: HashSet<String> = default_stopwords().into_iter().collect();
        assert!(is_stopword(&stopwords, "a"));
        assert!(is_stopword(&stopwords, "The"));
        assert!(!is_stopword(&stopwords, "this"));
        assert!(!is_stopword(&stopwords, "with"));
    }

    #[test]
    fn test_dedup_keeps_first_and_failures() {
        let err = StageError::Aborted {
            message: "x".to_string(),
        };
        let items = vec![
            Ok("b".to_string()),
            Ok("a".to_string()),
            Err(err.clone()),
            Ok("b".to_string()),
        ];
        assert_eq!(
            dedup(items),
            vec![Ok("b".to_string()), Ok("a".to_string()), Err(err)]
        );
    }

    #[test]
    fn test_default_pipeline() {
        let env = ProcessingEnv::with_workers(2);
        let chain = build_chain(&env, &PipelineConfig::default());
        let out = chain
            .process(lines(&["this is a multi-line", "", "text with some words."]))
            .values()
            .unwrap();
        assert_eq!(out, vec!["is", "multi-line", "some", "text", "this", "with", "words"]);
    }

    #[test]
    fn test_configured_stages() {
        let env = ProcessingEnv::with_workers(2);
        let config = PipelineConfig {
            stages: vec![
                StageConfig::SplitWords,
                StageConfig::Lowercase,
                StageConfig::Parallel { workers: 3 },
                StageConfig::MinLength { length: 3 },
                StageConfig::Dedup,
                StageConfig::Sort { descending: true },
            ],
        };
        let out = build_chain(&env, &config)
            .process(lines(&["The cat and THE dog", "a cat"]))
            .values()
            .unwrap();
        assert_eq!(out, vec!["the", "dog", "cat", "and"]);
    }

    #[test]
    fn test_empty_stage_list_only_normalizes() {
        let env = ProcessingEnv::default();
        let config = PipelineConfig { stages: vec![] };
        let out = build_chain(&env, &config)
            .process(lines(&["  keep me ", "   ", "x"]))
            .values()
            .unwrap();
        assert_eq!(out, vec!["keep me", "x"]);
    }
}
