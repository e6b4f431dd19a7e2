// src/enrich/lexical.rs
//
// Compact lexicon-based sentiment analyzer for social-media text. Valences
// follow the VADER conventions: word scores in [-4, 4], a negation window,
// degree boosters, exclamation emphasis, and the same compound
// normalization, so the standard +-0.05 thresholds apply.

use crate::error::AppResult;
use crate::model::Sentiment;
use async_trait::async_trait;
use super::SentimentBackend;

/// Valence normalization constant.
const ALPHA: f64 = 15.0;
/// Scalar applied to a valence inside a negation window.
const NEGATION_SCALAR: f64 = -0.74;
/// Increment contributed by a degree booster directly before a scored word.
const BOOST_INCR: f64 = 0.293;
/// Per-exclamation emphasis, capped at 4.
const EXCLAIM_INCR: f64 = 0.292;
/// How many preceding tokens a negator reaches.
const NEGATION_WINDOW: usize = 3;

#[rustfmt::skip]
static LEXICON: &[(&str, f64)] = &[
    // positive
    ("love", 3.2), ("loved", 2.9), ("loves", 2.7), ("adore", 2.9),
    ("like", 1.5), ("liked", 1.8), ("likes", 1.6),
    ("best", 3.2), ("better", 1.9), ("good", 1.9), ("great", 3.1),
    ("awesome", 3.1), ("amazing", 2.8), ("wonderful", 2.7), ("excellent", 2.7),
    ("fantastic", 2.6), ("brilliant", 2.8), ("superb", 3.0), ("perfect", 2.7),
    ("happy", 2.7), ("glad", 2.0), ("excited", 2.2), ("beautiful", 2.9),
    ("win", 2.8), ("winning", 2.4), ("won", 2.7), ("success", 2.7),
    ("successful", 2.6), ("thanks", 1.9), ("thank", 1.9), ("grateful", 2.3),
    ("helpful", 1.8), ("fun", 2.3), ("nice", 1.8), ("cool", 1.3),
    ("enjoy", 2.0), ("enjoyed", 2.3), ("impressive", 2.3), ("recommend", 1.6),
    ("delight", 2.9), ("delighted", 2.8), ("smooth", 1.3), ("solid", 1.5),
    // negative
    ("hate", -2.7), ("hated", -3.2), ("hates", -2.6), ("despise", -2.6),
    ("awful", -2.0), ("terrible", -2.1), ("horrible", -2.5), ("worst", -3.1),
    ("bad", -2.5), ("worse", -2.1), ("sucks", -1.5), ("suck", -1.5),
    ("annoying", -1.7), ("angry", -2.3), ("sad", -2.1), ("upset", -1.9),
    ("disappointed", -2.3), ("disappointing", -2.2), ("useless", -1.8),
    ("fail", -2.5), ("failed", -2.3), ("failure", -2.4), ("broken", -1.4),
    ("crash", -1.7), ("ugly", -2.3), ("boring", -1.3), ("scam", -2.2),
    ("garbage", -2.2), ("trash", -2.0), ("wrong", -1.4), ("problem", -1.7),
    ("problems", -1.7), ("pain", -1.9), ("painful", -2.0), ("fake", -1.8),
    ("lie", -1.8), ("lies", -1.7), ("stupid", -2.4), ("dumb", -2.3),
    ("mess", -1.5), ("worried", -1.6), ("worry", -1.5), ("fear", -2.2),
    ("scared", -1.9), ("disaster", -3.1), ("nightmare", -2.7),
];

#[rustfmt::skip]
static NEGATORS: &[&str] = &[
    "not", "no", "never", "none", "nothing", "neither", "nor", "cannot",
    "cant", "can't", "wont", "won't", "isnt", "isn't", "dont", "don't",
    "doesnt", "doesn't", "didnt", "didn't", "wasnt", "wasn't", "arent",
    "aren't", "aint", "ain't", "without",
];

#[rustfmt::skip]
static BOOSTERS: &[(&str, f64)] = &[
    ("very", BOOST_INCR), ("really", BOOST_INCR), ("extremely", BOOST_INCR),
    ("absolutely", BOOST_INCR), ("totally", BOOST_INCR), ("incredibly", BOOST_INCR),
    ("super", BOOST_INCR), ("so", BOOST_INCR),
    ("slightly", -BOOST_INCR), ("somewhat", -BOOST_INCR), ("kinda", -BOOST_INCR),
    ("barely", -BOOST_INCR), ("marginally", -BOOST_INCR),
];

/// Lightweight sentiment backend. Suitable for development and
/// low-resource deployments; no model download, no inference service.
#[derive(Debug, Default, Clone)]
pub struct LexicalAnalyzer;

impl LexicalAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Compound score in [-1, 1].
    pub fn compound(&self, text: &str) -> f64 {
        let tokens: Vec<String> = text
            .split_whitespace()
            .map(normalize_token)
            .filter(|t| !t.is_empty())
            .collect();

        let mut sum = 0.0;
        for (i, token) in tokens.iter().enumerate() {
            let Some(mut valence) = lexicon_valence(token) else {
                continue;
            };

            if i > 0 {
                if let Some(boost) = booster_incr(&tokens[i - 1]) {
                    // Boosters push away from zero, dampeners pull toward it.
                    valence += if valence >= 0.0 { boost } else { -boost };
                }
            }

            let window_start = i.saturating_sub(NEGATION_WINDOW);
            if tokens[window_start..i].iter().any(|t| is_negator(t)) {
                valence *= NEGATION_SCALAR;
            }

            sum += valence;
        }

        if sum != 0.0 {
            let exclaims = text.chars().filter(|c| *c == '!').count().min(4);
            sum += (exclaims as f64 * EXCLAIM_INCR).copysign(sum);
        }

        sum / (sum * sum + ALPHA).sqrt()
    }
}

#[async_trait]
impl SentimentBackend for LexicalAnalyzer {
    async fn analyze(&self, text: &str) -> AppResult<(Sentiment, f64)> {
        let compound = self.compound(text);

        let (label, confidence) = if compound > 0.05 {
            (Sentiment::Positive, compound.abs())
        } else if compound < -0.05 {
            (Sentiment::Negative, compound.abs())
        } else {
            (Sentiment::Neutral, 1.0 - compound.abs())
        };

        Ok((label, confidence))
    }

    fn name(&self) -> &'static str {
        "lexical"
    }
}

fn normalize_token(token: &str) -> String {
    token
        .trim_matches(|c: char| !c.is_alphanumeric() && c != '\'')
        .to_lowercase()
}

fn lexicon_valence(token: &str) -> Option<f64> {
    LEXICON.iter().find(|(w, _)| *w == token).map(|(_, v)| *v)
}

fn is_negator(token: &str) -> bool {
    NEGATORS.contains(&token) || token.ends_with("n't")
}

fn booster_incr(token: &str) -> Option<f64> {
    BOOSTERS.iter().find(|(w, _)| *w == token).map(|(_, v)| *v)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn label_of(text: &str) -> (Sentiment, f64) {
        LexicalAnalyzer::new().analyze(text).await.unwrap()
    }

    #[tokio::test]
    async fn positive_text_scores_positive() {
        let (label, confidence) = label_of("I love this!").await;
        assert_eq!(label, Sentiment::Positive);
        assert!(confidence > 0.5, "confidence {confidence} too low");
    }

    #[tokio::test]
    async fn negative_text_scores_negative() {
        let (label, confidence) = label_of("this update is terrible and the app keeps crashing, awful").await;
        assert_eq!(label, Sentiment::Negative);
        assert!(confidence > 0.5);
    }

    #[tokio::test]
    async fn unscored_text_is_neutral_with_high_confidence() {
        let (label, confidence) = label_of("the table in the kitchen is brown").await;
        assert_eq!(label, Sentiment::Neutral);
        assert!(confidence > 0.9);
    }

    #[tokio::test]
    async fn negation_flips_polarity() {
        let positive = LexicalAnalyzer::new().compound("I love this library");
        let negated = LexicalAnalyzer::new().compound("I do not love this library");

        assert!(positive > 0.05);
        assert!(negated < -0.05);
    }

    #[tokio::test]
    async fn boosters_raise_intensity() {
        let plain = LexicalAnalyzer::new().compound("a good release");
        let boosted = LexicalAnalyzer::new().compound("a really good release");
        assert!(boosted > plain);
    }

    #[tokio::test]
    async fn exclamation_adds_emphasis() {
        let calm = LexicalAnalyzer::new().compound("I love this");
        let loud = LexicalAnalyzer::new().compound("I love this!!!");
        assert!(loud > calm);
    }

    #[test]
    fn compound_stays_in_unit_range() {
        let analyzer = LexicalAnalyzer::new();
        let c = analyzer.compound(
            "love love love amazing wonderful excellent fantastic brilliant superb perfect",
        );
        assert!(c > 0.9 && c <= 1.0);
    }
}
