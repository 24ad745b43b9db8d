// src/analyze/keywords.rs
//! Local, model-free keyword extraction and extractive summary for article text.

use std::collections::{HashMap, HashSet};

use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;

static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "a", "about", "after", "again", "against", "all", "also", "an", "and", "any", "are", "as",
        "at", "be", "because", "been", "before", "being", "between", "both", "but", "by", "can",
        "could", "did", "do", "does", "during", "each", "for", "from", "had", "has", "have",
        "he", "her", "here", "his", "how", "i", "if", "in", "into", "is", "it", "its", "just",
        "last", "more", "most", "mr", "ms", "new", "no", "not", "now", "of", "on", "one", "only",
        "or", "other", "our", "out", "over", "said", "says", "she", "so", "some", "than", "that",
        "the", "their", "them", "then", "there", "these", "they", "this", "those", "through",
        "to", "under", "up", "us", "very", "was", "we", "were", "what", "when", "where", "which",
        "while", "who", "will", "with", "would", "year", "you", "your",
    ]
    .into_iter()
    .collect()
});

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    static RE_WORD: OnceCell<Regex> = OnceCell::new();
    let re = RE_WORD.get_or_init(|| Regex::new(r"[\p{L}][\p{L}\p{N}'-]*").unwrap());
    re.find_iter(text)
        .map(|m| m.as_str().trim_matches(|c| c == '\'' || c == '-').to_lowercase())
        .filter(|w| w.chars().count() >= 3 && !STOPWORDS.contains(w.as_str()))
}

/// Up to `n` most frequent content words; ties break on first appearance.
pub fn top_keywords(text: &str, n: usize) -> Vec<String> {
    let mut freq: HashMap<String, (usize, usize)> = HashMap::new();
    for (pos, w) in words(text).enumerate() {
        freq.entry(w).or_insert((0, pos)).0 += 1;
    }
    let mut ranked: Vec<(String, (usize, usize))> = freq.into_iter().collect();
    ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));
    ranked.into_iter().take(n).map(|(w, _)| w).collect()
}

fn sentences(text: &str) -> Vec<&str> {
    static RE_SENT: OnceCell<Regex> = OnceCell::new();
    let re = RE_SENT.get_or_init(|| Regex::new(r"[^.!?]+[.!?]*").unwrap());
    re.find_iter(text)
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Pick the `n` sentences with the highest keyword density and return them in text order.
pub fn extractive_summary(text: &str, n: usize) -> String {
    let sents = sentences(text);
    if sents.len() <= n {
        return sents.join(" ");
    }
    let mut freq: HashMap<String, usize> = HashMap::new();
    for w in words(text) {
        *freq.entry(w).or_default() += 1;
    }

    let mut scored: Vec<(usize, f64)> = sents
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let ws: Vec<String> = words(s).collect();
            if ws.is_empty() {
                return (i, 0.0);
            }
            let total: usize = ws.iter().map(|w| freq.get(w).copied().unwrap_or(0)).sum();
            (i, total as f64 / ws.len() as f64)
        })
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

    let mut picked: Vec<usize> = scored.into_iter().take(n).map(|(i, _)| i).collect();
    picked.sort_unstable();
    picked.into_iter().map(|i| sents[i]).collect::<Vec<_>>().join(" ")
}
