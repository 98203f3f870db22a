//! Term-weighted similarity index over command metadata.
//!
//! Each active command contributes one document built from its name,
//! description and tags. The index is rebuilt wholesale whenever the command
//! set changes; corpora here are hundreds to a few thousand documents.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use unicode_segmentation::UnicodeSegmentation;

use crate::core::store::CommandRecord;

#[derive(Debug, Clone, Serialize)]
pub struct ScoredCommand {
    pub command: CommandRecord,
    pub score: f64,
}

#[derive(Debug, Clone)]
struct Document {
    command: CommandRecord,
    /// L2-normalised tf-idf weights keyed by vocabulary index.
    vector: HashMap<usize, f64>,
}

#[derive(Debug, Clone, Default)]
pub struct SimilarityIndex {
    vocabulary: HashMap<String, usize>,
    idf: Vec<f64>,
    documents: Vec<Document>,
}

const SUFFIXES: &[&str] = &["ing", "ed", "s"];

/// Lucene's default English stopword set.
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "if", "in", "into", "is", "it",
    "no", "not", "of", "on", "or", "such", "that", "the", "their", "then", "there", "these",
    "they", "this", "to", "was", "will", "with",
];

fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(&token)
}

fn strip_possessive(word: &str) -> &str {
    word.strip_suffix("'s")
        .or_else(|| word.strip_suffix("\u{2019}s"))
        .unwrap_or(word)
}

/// Terms for indexing and querying.
///
/// UAX#29 words, possessives stripped, then split on `_` so identifiers like
/// `process_data` contribute both halves. Remaining punctuation is dropped,
/// tokens are lowercased, one-letter tokens and stopwords are discarded, and
/// a light suffix is stripped so `processing` and `process` meet.
pub fn tokenize(text: &str) -> Vec<String> {
    text.unicode_words()
        .map(strip_possessive)
        .flat_map(|w| w.split('_'))
        .map(|w| {
            w.chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|t| t.chars().count() >= 2)
        .filter(|t| !is_stopword(t))
        .map(|t| stem(&t))
        .collect()
}

fn stem(token: &str) -> String {
    if token.ends_with("ss") {
        return token.to_string();
    }
    for suffix in SUFFIXES {
        if let Some(base) = token.strip_suffix(suffix)
            && base.chars().count() >= 3
        {
            return base.to_string();
        }
    }
    token.to_string()
}

fn document_text(cmd: &CommandRecord) -> String {
    format!("{} {} {}", cmd.name, cmd.description, cmd.tags.join(" "))
}

fn term_counts(tokens: &[String]) -> HashMap<&str, f64> {
    let mut counts = HashMap::new();
    for t in tokens {
        *counts.entry(t.as_str()).or_insert(0.0) += 1.0;
    }
    counts
}

fn normalise(vector: &mut HashMap<usize, f64>) {
    let norm = vector.values().map(|w| w * w).sum::<f64>().sqrt();
    if norm > 0.0 {
        for w in vector.values_mut() {
            *w /= norm;
        }
    }
}

fn cosine(a: &HashMap<usize, f64>, b: &HashMap<usize, f64>) -> f64 {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    small
        .iter()
        .filter_map(|(k, w)| large.get(k).map(|v| w * v))
        .sum()
}

impl SimilarityIndex {
    /// Build from scratch. Inactive commands are ignored.
    pub fn build(commands: &[CommandRecord]) -> Self {
        let active: Vec<&CommandRecord> = commands.iter().filter(|c| c.is_active).collect();
        let tokenised: Vec<Vec<String>> = active
            .iter()
            .map(|c| tokenize(&document_text(c)))
            .collect();

        let mut vocabulary: HashMap<String, usize> = HashMap::new();
        let mut df: Vec<f64> = Vec::new();
        for tokens in &tokenised {
            for term in term_counts(tokens).keys() {
                let next = vocabulary.len();
                let idx = *vocabulary.entry(term.to_string()).or_insert(next);
                if idx == df.len() {
                    df.push(0.0);
                }
                df[idx] += 1.0;
            }
        }

        let n = active.len() as f64;
        let idf: Vec<f64> = df
            .iter()
            .map(|d| ((1.0 + n) / (1.0 + d)).ln() + 1.0)
            .collect();

        let documents = active
            .into_iter()
            .zip(tokenised.iter())
            .map(|(command, tokens)| {
                let mut vector: HashMap<usize, f64> = term_counts(tokens)
                    .into_iter()
                    .filter_map(|(term, tf)| vocabulary.get(term).map(|&i| (i, tf * idf[i])))
                    .collect();
                normalise(&mut vector);
                Document {
                    command: command.clone(),
                    vector,
                }
            })
            .collect();

        Self {
            vocabulary,
            idf,
            documents,
        }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    fn query_vector(&self, query: &str) -> HashMap<usize, f64> {
        let tokens = tokenize(query);
        let mut vector: HashMap<usize, f64> = term_counts(&tokens)
            .into_iter()
            .filter_map(|(term, tf)| {
                self.vocabulary
                    .get(term)
                    .map(|&i| (i, tf * self.idf[i]))
            })
            .collect();
        normalise(&mut vector);
        vector
    }

    fn rank<'a>(
        candidates: impl Iterator<Item = (&'a CommandRecord, f64)>,
        top_k: usize,
    ) -> Vec<ScoredCommand> {
        let mut scored: Vec<(&CommandRecord, f64)> =
            candidates.filter(|(_, score)| *score > 0.0).collect();
        scored.sort_by(|(a, sa), (b, sb)| {
            sb.total_cmp(sa)
                .then_with(|| newer_first(a.updated_at, b.updated_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        scored
            .into_iter()
            .take(top_k)
            .map(|(command, score)| ScoredCommand {
                command: command.clone(),
                score,
            })
            .collect()
    }

    /// Cosine similarity against every document. Empty index or a query with
    /// no known terms gives an empty result.
    pub fn search(&self, query: &str, top_k: usize) -> Vec<ScoredCommand> {
        let q = self.query_vector(query);
        if q.is_empty() {
            return Vec::new();
        }
        Self::rank(
            self.documents
                .iter()
                .map(|d| (&d.command, cosine(&q, &d.vector))),
            top_k,
        )
    }

    /// Commands most similar to the indexed command `id`, excluding itself.
    pub fn similar_to(&self, id: &str, top_k: usize) -> Option<Vec<ScoredCommand>> {
        let anchor = self.documents.iter().find(|d| d.command.id == id)?;
        Some(Self::rank(
            self.documents
                .iter()
                .filter(|d| d.command.id != id)
                .map(|d| (&d.command, cosine(&anchor.vector, &d.vector))),
            top_k,
        ))
    }

    /// Case-insensitive substring match on name, description and tags.
    /// Name hits score 1.0, description 0.5, tag 0.25; a command takes its
    /// best field.
    pub fn text_search(&self, query: &str, top_k: usize) -> Vec<ScoredCommand> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        Self::rank(
            self.documents.iter().map(|d| {
                let c = &d.command;
                let score = if c.name.to_lowercase().contains(&needle) {
                    1.0
                } else if c.description.to_lowercase().contains(&needle) {
                    0.5
                } else if c.tags.iter().any(|t| t.to_lowercase().contains(&needle)) {
                    0.25
                } else {
                    0.0
                };
                (c, score)
            }),
            top_k,
        )
    }
}

fn newer_first(a: DateTime<Utc>, b: DateTime<Utc>) -> std::cmp::Ordering {
    b.cmp(&a)
}
