//! Rule-based polarity scoring over a fixed valence lexicon.
//!
//! Word valences range roughly -4..4. Per-word valences are adjusted for
//! preceding intensifiers, negations and ALL-CAPS emphasis, a contrastive
//! "but" shifts weight to the clause after it, and `!`/`?` runs amplify the
//! sum. The sum is squashed into [-1, 1] as `s / sqrt(s^2 + ALPHA)`.

use std::collections::HashMap;
use std::sync::OnceLock;

use async_trait::async_trait;
use senti_core::text::{fold_word, is_apostrophe};
use senti_core::{Analysis, SentimentLabel};

use crate::summarize::summarize_or_fallback;
use crate::{AnalysisError, Analyzer};

pub const POSITIVE_THRESHOLD: f64 = 0.05;
pub const NEGATIVE_THRESHOLD: f64 = -0.05;

const ALPHA: f64 = 15.0;
const BOOST_INCR: f64 = 0.293;
const BOOST_DECR: f64 = -0.293;
const CAPS_INCR: f64 = 0.733;
const NEGATION_SCALAR: f64 = -0.74;
const EXCLAIM_STEP: f64 = 0.292;
const QUESTION_STEP: f64 = 0.18;

const LEXICON: &[(&str, f64)] = &[
    ("abandon", -1.9), ("abuse", -3.2), ("accept", 1.6), ("accident", -2.1),
    ("admire", 2.1), ("adorable", 2.2), ("afraid", -2.2), ("aggressive", -0.6),
    ("agree", 1.5), ("alarm", -1.4), ("amazing", 2.8), ("angry", -2.3),
    ("annoyed", -1.6), ("annoying", -1.7), ("anxious", -1.0), ("appreciate", 1.7),
    ("approve", 1.6), ("awesome", 3.1), ("awful", -2.0), ("awkward", -0.6),
    ("bad", -2.5), ("beautiful", 2.9), ("best", 3.2), ("better", 1.9),
    ("bitter", -1.8), ("blame", -1.4), ("bliss", 2.7), ("bored", -1.1),
    ("boring", -1.3), ("brilliant", 2.8), ("broken", -2.1), ("bug", -1.0),
    ("buggy", -1.8), ("calm", 1.3), ("care", 2.2), ("cheap", -0.4),
    ("cheerful", 2.5), ("clean", 1.7), ("clever", 2.0), ("comfortable", 1.5),
    ("complain", -1.5), ("confused", -1.3), ("confusing", -1.3), ("cool", 1.3),
    ("crap", -1.6), ("crash", -1.7), ("crashes", -1.7), ("cruel", -2.8),
    ("cry", -2.1), ("damage", -2.2), ("damaged", -1.9), ("dead", -3.3),
    ("defective", -1.9), ("delay", -1.3), ("delight", 2.9), ("delighted", 3.0),
    ("depressed", -2.3), ("desperate", -1.3), ("destroy", -2.5), ("difficult", -1.5),
    ("dirty", -1.9), ("disappoint", -1.7), ("disappointed", -1.9), ("disappointing", -2.2),
    ("disaster", -3.1), ("disgusting", -2.4), ("dislike", -1.6), ("dumb", -2.3),
    ("easy", 1.9), ("effective", 2.1), ("efficient", 1.8), ("enjoy", 2.2),
    ("enjoyed", 2.3), ("excellent", 2.7), ("excited", 2.3), ("exciting", 2.2),
    ("fail", -2.5), ("failed", -2.3), ("failure", -2.3), ("fair", 1.3),
    ("fake", -2.1), ("fan", 1.3), ("fantastic", 2.6), ("fast", 0.6),
    ("faulty", -1.6), ("favorite", 2.0), ("fear", -2.2), ("fine", 0.8),
    ("fix", 0.9), ("flawless", 2.3), ("fraud", -2.8), ("free", 2.3),
    ("friendly", 2.2), ("frustrated", -2.4), ("frustrating", -1.9), ("fun", 2.3),
    ("funny", 1.9), ("garbage", -1.5), ("generous", 2.3), ("gift", 1.9),
    ("glad", 2.0), ("good", 1.9), ("gorgeous", 3.0), ("grateful", 2.0),
    ("great", 3.1), ("greatest", 3.2), ("happy", 2.7), ("hard", -0.4),
    ("harm", -2.5), ("hate", -2.7), ("hated", -3.2), ("helpful", 1.8),
    ("hope", 1.9), ("hopeless", -2.0), ("horrible", -2.5), ("hurt", -2.4),
    ("ideal", 2.4), ("ignore", -1.5), ("ill", -1.8), ("impressed", 2.5),
    ("impressive", 2.3), ("improve", 1.9), ("improved", 2.1), ("inferior", -1.7),
    ("insult", -2.3), ("interesting", 1.7), ("issue", -0.6), ("issues", -0.8),
    ("joy", 2.8), ("kind", 2.4), ("lame", -1.8), ("late", -0.4),
    ("lazy", -1.5), ("like", 1.5), ("liked", 1.8), ("love", 3.2),
    ("loved", 2.9), ("lovely", 2.8), ("loves", 2.7), ("loving", 2.9),
    ("mad", -2.2), ("mess", -1.5), ("miserable", -2.2), ("miss", -0.6),
    ("mistake", -1.4), ("nasty", -2.6), ("neat", 2.0), ("negative", -2.7),
    ("nice", 1.8), ("noisy", -0.7), ("ok", 1.2), ("okay", 0.9),
    ("outstanding", 3.0), ("overpriced", -1.5), ("pain", -2.3), ("painful", -1.9),
    ("perfect", 2.7), ("pleasant", 2.3), ("pleased", 1.9), ("poor", -2.1),
    ("positive", 2.6), ("pretty", 2.2), ("problem", -1.7), ("problems", -1.7),
    ("proud", 2.1), ("quality", 1.2), ("recommend", 1.5), ("recommended", 0.8),
    ("refund", -0.5), ("regret", -1.9), ("reliable", 1.7), ("rude", -2.0),
    ("ruined", -2.4), ("sad", -2.1), ("safe", 1.9), ("satisfied", 1.8),
    ("scam", -2.7), ("scared", -1.9), ("secure", 1.4), ("shame", -2.1),
    ("shit", -2.6), ("sick", -2.3), ("slow", -1.2), ("smart", 1.7),
    ("smooth", 1.4), ("solid", 1.3), ("sorry", -0.3), ("stable", 1.2),
    ("stress", -1.8), ("stressful", -2.3), ("stupid", -2.4), ("success", 2.7),
    ("successful", 2.8), ("suck", -1.9), ("sucks", -1.5), ("super", 2.9),
    ("superb", 3.1), ("support", 1.7), ("sweet", 2.0), ("terrible", -2.1),
    ("thank", 1.5), ("thanks", 1.9), ("thrilled", 2.8), ("tired", -1.9),
    ("trouble", -1.7), ("trust", 2.3), ("ugly", -2.3), ("unhappy", -1.8),
    ("unreliable", -1.5), ("unusable", -2.1), ("upset", -1.6), ("useful", 1.9),
    ("useless", -1.8), ("waste", -1.8), ("wasted", -2.2), ("weak", -1.9),
    ("welcome", 2.0), ("win", 2.8), ("wonderful", 2.7), ("works", 0.8),
    ("worried", -1.2), ("worse", -2.1), ("worst", -3.1), ("worthless", -1.9),
    ("worth", 0.9), ("wow", 2.8), ("wrong", -2.1),
];

const NEGATIONS: &[&str] = &[
    "aint", "aren't", "arent", "can't", "cannot", "cant", "couldn't", "couldnt", "didn't",
    "didnt", "doesn't", "doesnt", "don't", "dont", "hadn't", "hadnt", "hasn't", "hasnt",
    "haven't", "havent", "isn't", "isnt", "neither", "never", "no", "nobody", "none", "nope",
    "nor", "not", "nothing", "nowhere", "shouldn't", "shouldnt", "wasn't", "wasnt", "weren't",
    "werent", "without", "won't", "wont", "wouldn't", "wouldnt",
];

const BOOSTERS: &[(&str, f64)] = &[
    ("absolutely", BOOST_INCR), ("amazingly", BOOST_INCR), ("completely", BOOST_INCR),
    ("considerably", BOOST_INCR), ("deeply", BOOST_INCR), ("enormously", BOOST_INCR),
    ("entirely", BOOST_INCR), ("especially", BOOST_INCR), ("extremely", BOOST_INCR),
    ("fully", BOOST_INCR), ("greatly", BOOST_INCR), ("highly", BOOST_INCR),
    ("hugely", BOOST_INCR), ("incredibly", BOOST_INCR), ("most", BOOST_INCR),
    ("particularly", BOOST_INCR), ("purely", BOOST_INCR), ("quite", BOOST_INCR),
    ("really", BOOST_INCR), ("remarkably", BOOST_INCR), ("so", BOOST_INCR),
    ("substantially", BOOST_INCR), ("thoroughly", BOOST_INCR), ("totally", BOOST_INCR),
    ("tremendously", BOOST_INCR), ("truly", BOOST_INCR), ("unbelievably", BOOST_INCR),
    ("utterly", BOOST_INCR), ("very", BOOST_INCR), ("almost", BOOST_DECR),
    ("barely", BOOST_DECR), ("hardly", BOOST_DECR), ("kinda", BOOST_DECR),
    ("less", BOOST_DECR), ("little", BOOST_DECR), ("marginally", BOOST_DECR),
    ("occasionally", BOOST_DECR), ("partly", BOOST_DECR), ("scarcely", BOOST_DECR),
    ("slightly", BOOST_DECR), ("somewhat", BOOST_DECR), ("sorta", BOOST_DECR),
];

fn lexicon() -> &'static HashMap<&'static str, f64> {
    static TABLE: OnceLock<HashMap<&'static str, f64>> = OnceLock::new();
    TABLE.get_or_init(|| LEXICON.iter().copied().collect())
}

fn booster(word: &str) -> Option<f64> {
    BOOSTERS.iter().find(|(w, _)| *w == word).map(|(_, v)| *v)
}

fn is_negation(word: &str) -> bool {
    NEGATIONS.contains(&word) || word.ends_with("n't")
}

pub fn label_for_compound(score: f64) -> SentimentLabel {
    if score >= POSITIVE_THRESHOLD {
        SentimentLabel::Positive
    } else if score <= NEGATIVE_THRESHOLD {
        SentimentLabel::Negative
    } else {
        SentimentLabel::Neutral
    }
}

struct Token<'a> {
    raw: &'a str,
    lower: String,
}

impl Token<'_> {
    fn is_shouted(&self) -> bool {
        self.raw.chars().any(char::is_alphabetic)
            && !self.raw.chars().any(char::is_lowercase)
    }
}

fn tokenize(text: &str) -> Vec<Token<'_>> {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !(c.is_alphanumeric() || is_apostrophe(c))))
        .filter(|w| w.chars().count() > 1)
        .map(|raw| Token {
            raw,
            lower: fold_word(raw),
        })
        .collect()
}

fn with_sign(amount: f64, valence: f64) -> f64 {
    if valence < 0.0 {
        -amount
    } else {
        amount
    }
}

/// Compound polarity of `text` in [-1, 1].
pub fn compound_score(text: &str) -> f64 {
    let tokens = tokenize(text);
    if tokens.is_empty() {
        return 0.0;
    }
    // Emphasis only counts when the text is not shouted as a whole.
    let mixed_case = tokens.iter().any(|t| !t.is_shouted());
    let table = lexicon();

    let mut valences = Vec::with_capacity(tokens.len());
    for (i, token) in tokens.iter().enumerate() {
        let Some(&base) = table.get(token.lower.as_str()) else {
            valences.push(0.0);
            continue;
        };
        if booster(&token.lower).is_some() {
            valences.push(0.0);
            continue;
        }

        let mut valence = base;
        if mixed_case && token.is_shouted() {
            valence += with_sign(CAPS_INCR, valence);
        }

        let mut negated = false;
        for distance in 1..=3usize {
            let Some(prev) = i.checked_sub(distance).map(|j| &tokens[j]) else {
                break;
            };
            if let Some(boost) = booster(&prev.lower) {
                let mut scalar = with_sign(boost, valence);
                if mixed_case && prev.is_shouted() {
                    scalar += with_sign(CAPS_INCR, valence);
                }
                scalar *= match distance {
                    1 => 1.0,
                    2 => 0.95,
                    _ => 0.9,
                };
                valence += scalar;
            }
            if is_negation(&prev.lower) {
                negated = true;
            }
        }
        if negated {
            valence *= NEGATION_SCALAR;
        }
        valences.push(valence);
    }

    if let Some(pivot) = tokens.iter().position(|t| t.lower == "but") {
        for (i, valence) in valences.iter_mut().enumerate() {
            if i < pivot {
                *valence *= 0.5;
            } else if i > pivot {
                *valence *= 1.5;
            }
        }
    }

    let mut sum: f64 = valences.iter().sum();
    if sum != 0.0 {
        sum += with_sign(punctuation_emphasis(text), sum);
    }

    let compound = sum / (sum * sum + ALPHA).sqrt();
    (compound.clamp(-1.0, 1.0) * 10_000.0).round() / 10_000.0
}

fn punctuation_emphasis(text: &str) -> f64 {
    let exclaims = text.matches('!').count().min(4) as f64;
    let questions = text.matches('?').count();
    let question_boost = match questions {
        0 | 1 => 0.0,
        2 | 3 => questions as f64 * QUESTION_STEP,
        _ => 0.96,
    };
    exclaims * EXCLAIM_STEP + question_boost
}

#[derive(Debug, Clone, Default)]
pub struct LexiconAnalyzer;

impl LexiconAnalyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze_sync(&self, text: &str) -> Result<Analysis, AnalysisError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AnalysisError::EmptyInput);
        }
        let score = compound_score(text);
        Ok(Analysis {
            label: label_for_compound(score),
            score,
            summary: summarize_or_fallback(text),
        })
    }
}

#[async_trait]
impl Analyzer for LexiconAnalyzer {
    fn name(&self) -> &'static str {
        "lexicon"
    }

    async fn analyze(&self, text: &str) -> Result<Analysis, AnalysisError> {
        self.analyze_sync(text)
    }
}
