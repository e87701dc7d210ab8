//! Station lookup by free text over the live table.

use std::collections::HashMap;

use crate::model::{AskResponse, AskResult, Snapshot};

/// Which [`TextMatcher`] the service ranks with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatcherKind {
    Lexical,
    Tfidf,
}

impl MatcherKind {
    pub fn build(self) -> Box<dyn TextMatcher> {
        match self {
            MatcherKind::Lexical => Box::new(LexicalMatcher),
            MatcherKind::Tfidf => Box::new(TfidfMatcher),
        }
    }
}

pub trait TextMatcher: Send + Sync {
    /// Indices of `docs`, best match first. Every index appears once.
    fn rank(&self, query: &str, docs: &[&str]) -> Vec<usize>;
}

/// Scores a document by how often the query occurs in it.
pub struct LexicalMatcher;

impl TextMatcher for LexicalMatcher {
    fn rank(&self, query: &str, docs: &[&str]) -> Vec<usize> {
        let q = query.to_lowercase();
        let scores: Vec<usize> = docs
            .iter()
            .map(|d| if q.is_empty() { 0 } else { d.to_lowercase().matches(&q).count() })
            .collect();
        let mut order: Vec<usize> = (0..docs.len()).collect();
        order.sort_by(|&a, &b| scores[b].cmp(&scores[a]));
        order
    }
}

/// Cosine similarity of smoothed TF-IDF vectors, vocabulary taken from the
/// documents.
pub struct TfidfMatcher;

fn tokenize(s: &str) -> Vec<String> {
    s.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| t.chars().count() >= 2)
        .map(str::to_string)
        .collect()
}

fn tf_idf(tokens: &[String], idf: &HashMap<String, f64>) -> HashMap<String, f64> {
    let mut v: HashMap<String, f64> = HashMap::new();
    for tok in tokens {
        if let Some(w) = idf.get(tok) {
            *v.entry(tok.clone()).or_default() += w;
        }
    }
    let norm = v.values().map(|x| x * x).sum::<f64>().sqrt();
    if norm > 0.0 {
        v.values_mut().for_each(|x| *x /= norm);
    }
    v
}

impl TextMatcher for TfidfMatcher {
    fn rank(&self, query: &str, docs: &[&str]) -> Vec<usize> {
        let doc_tokens: Vec<Vec<String>> = docs.iter().map(|d| tokenize(d)).collect();

        let mut df: HashMap<&str, usize> = HashMap::new();
        for toks in &doc_tokens {
            let mut seen: Vec<&str> = toks.iter().map(String::as_str).collect();
            seen.sort_unstable();
            seen.dedup();
            for t in seen {
                *df.entry(t).or_default() += 1;
            }
        }
        let n = docs.len() as f64;
        let idf: HashMap<String, f64> = df
            .into_iter()
            .map(|(t, d)| (t.to_string(), ((1.0 + n) / (1.0 + d as f64)).ln() + 1.0))
            .collect();

        let qv = tf_idf(&tokenize(query), &idf);
        let scores: Vec<f64> = doc_tokens
            .iter()
            .map(|toks| {
                let dv = tf_idf(toks, &idf);
                qv.iter()
                    .map(|(t, w)| w * dv.get(t).copied().unwrap_or(0.0))
                    .sum::<f64>()
            })
            .collect();

        let mut order: Vec<usize> = (0..docs.len()).collect();
        order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
        order
    }
}

/// Top `k` live stations for `query`.
pub fn ask(matcher: &dyn TextMatcher, stations: &[Snapshot], query: &str, k: usize) -> AskResponse {
    if stations.is_empty() {
        return AskResponse {
            answer: "No station data yet.".to_string(),
            results: Vec::new(),
        };
    }
    let names: Vec<&str> = stations.iter().map(|s| s.station_name.as_str()).collect();
    let results = matcher
        .rank(query, &names)
        .into_iter()
        .take(k)
        .map(|i| AskResult::from(&stations[i]))
        .collect();
    AskResponse {
        answer: format!("Stations best matching \u{201c}{}\u{201d}.", query),
        results,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NAMES: [&str; 4] = [
        "Plac Grunwaldzki",
        "Wrocław Główny, dworzec",
        "Dworzec Nadodrze",
        "Rynek",
    ];

    #[test]
    fn lexical_ranks_by_occurrences_and_keeps_ties_in_order() {
        let order = LexicalMatcher.rank("dworzec", &NAMES);
        assert_eq!(order, vec![1, 2, 0, 3]);
    }

    #[test]
    fn tfidf_prefers_rarer_shared_terms() {
        let order = TfidfMatcher.rank("dworzec nadodrze", &NAMES);
        assert_eq!(order[0], 2);
        assert_eq!(order[1], 1);
        assert_eq!(order.len(), NAMES.len());
    }

    #[test]
    fn tokenize_drops_single_chars() {
        assert_eq!(tokenize("Plac a, Rynek-2"), vec!["plac", "rynek"]);
    }

    #[test]
    fn ask_returns_top_k() {
        let stations: Vec<Snapshot> = NAMES
            .iter()
            .enumerate()
            .map(|(i, n)| Snapshot {
                station_id: i.to_string(),
                station_name: n.to_string(),
                lat: None,
                lon: None,
                racks: 10,
                bikes: i as u32,
                timestamp: 0,
            })
            .collect();
        let resp = ask(&LexicalMatcher, &stations, "dworzec", 2);
        assert_eq!(resp.results.len(), 2);
        assert_eq!(resp.results[0].station_id, "1");
        assert!(resp.answer.contains("dworzec"));

        let empty = ask(&LexicalMatcher, &[], "dworzec", 5);
        assert!(empty.results.is_empty());
    }
}
