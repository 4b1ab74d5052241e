//! # Alinhamento Palavra → Sub-palavra
//!
//! Converte um [`Record`] em uma [`SubwordSequence`]:
//!
//! - **Texto livre**: o texto inteiro é tokenizado de uma vez, sem labels.
//! - **Palavras + labels**: cada palavra é tokenizada isoladamente. A primeira
//!   sub-palavra herda o label original; as demais recebem a forma "inside"
//!   (`B-ORG` → `I-ORG`).
//!
//! ```text
//! palavras:  ["Petrobras",          "lucrou"]
//! labels:    ["B-ORG",              "O"]
//! sub-pal.:  ["Pet", "##ro", "##bras", "lu", "##crou"]
//! labels:    ["B-ORG","I-ORG","I-ORG", "O",  "O"]
//! ```
//!
//! Uma palavra que não gera nenhuma sub-palavra não pode deslocar os labels
//! seguintes; o que acontece com ela é decidido pela [`ZeroSubwordPolicy`].

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{NerError, Result};
use crate::labels::inside_form;
use crate::tokenizer::SubwordTokenizer;

/// Conteúdo de um registro de entrada.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordContent {
    /// Apenas o texto bruto.
    FreeText,
    /// Texto pré-segmentado com um label por palavra.
    WordsWithLabels { words: Vec<String>, labels: Vec<String> },
}

/// Um registro do chamador. Imutável durante todo o pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub text: String,
    #[serde(default = "free_text_content")]
    pub content: RecordContent,
}

fn free_text_content() -> RecordContent {
    RecordContent::FreeText
}

impl Record {
    pub fn free_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            content: RecordContent::FreeText,
        }
    }

    /// Registro pré-segmentado; o texto é a junção das palavras com um espaço.
    pub fn labeled(words: Vec<String>, labels: Vec<String>) -> Self {
        Self {
            text: words.join(" "),
            content: RecordContent::WordsWithLabels { words, labels },
        }
    }

    /// Mesmo registro com o texto normalizado (espaços colapsados, sem bordas).
    pub fn normalized(&self) -> Self {
        Self {
            text: normalize_whitespace(&self.text),
            content: self.content.clone(),
        }
    }
}

/// Colapsa qualquer sequência de espaços em branco em um único espaço e remove as bordas.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Sequência de sub-palavras de um registro.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubwordSequence {
    /// Ids no vocabulário do tokenizador (sem sentinelas).
    pub ids: Vec<u32>,
    /// As sub-palavras como strings (com marcadores `##`/`▁`).
    pub subwords: Vec<String>,
    /// Labels propagados (só no modo palavras + labels).
    pub subword_labels: Option<Vec<String>>,
}

impl SubwordSequence {
    pub fn len(&self) -> usize {
        self.subwords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subwords.is_empty()
    }

    /// Mantém apenas as primeiras `max_len` sub-palavras (truncamento pelo fim).
    pub fn truncated(&self, max_len: usize) -> Self {
        let keep = max_len.min(self.len());
        Self {
            ids: self.ids[..keep].to_vec(),
            subwords: self.subwords[..keep].to_vec(),
            subword_labels: self
                .subword_labels
                .as_ref()
                .map(|labels| labels[..keep.min(labels.len())].to_vec()),
        }
    }
}

/// O que fazer com uma palavra que o tokenizador transforma em zero sub-palavras.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZeroSubwordPolicy {
    /// Descarta a palavra e o seu label (com aviso no log).
    #[default]
    Drop,
    /// Falha com erro de alinhamento.
    Reject,
}

/// Alinhador de palavras/labels para sub-palavras.
pub struct SubwordAligner<'a> {
    tokenizer: &'a dyn SubwordTokenizer,
    policy: ZeroSubwordPolicy,
}

impl<'a> SubwordAligner<'a> {
    pub fn new(tokenizer: &'a dyn SubwordTokenizer, policy: ZeroSubwordPolicy) -> Self {
        Self { tokenizer, policy }
    }

    /// Alinha um registro de acordo com o seu conteúdo.
    pub fn align(&self, record: &Record) -> Result<SubwordSequence> {
        match &record.content {
            RecordContent::FreeText => Ok(self.align_text(&record.text)),
            RecordContent::WordsWithLabels { words, labels } => self.align_words(words, labels),
        }
    }

    /// Modo texto livre: tokeniza tudo, sem propagação de labels.
    pub fn align_text(&self, text: &str) -> SubwordSequence {
        let ids = self.tokenizer.encode_without_sentinels(text);
        let subwords = self.tokenizer.convert_ids_to_tokens(&ids);
        SubwordSequence {
            ids,
            subwords,
            subword_labels: None,
        }
    }

    /// Modo palavras + labels, com propagação para a forma "inside".
    pub fn align_words(&self, words: &[String], labels: &[String]) -> Result<SubwordSequence> {
        if words.len() != labels.len() {
            return Err(NerError::alignment(format!(
                "{} words but {} labels",
                words.len(),
                labels.len()
            )));
        }

        let mut ids = Vec::new();
        let mut subword_labels = Vec::new();
        for (position, (word, label)) in words.iter().zip(labels).enumerate() {
            let run = self.tokenizer.encode_without_sentinels(word);
            if run.is_empty() {
                match self.policy {
                    ZeroSubwordPolicy::Drop => {
                        warn!(
                            position,
                            word = %word,
                            label = %label,
                            "word produced no subwords, dropping its label"
                        );
                        continue;
                    }
                    ZeroSubwordPolicy::Reject => {
                        return Err(NerError::alignment(format!(
                            "word {position} ({word:?}) produced no subwords"
                        )));
                    }
                }
            }
            let run_labels = propagate_label(label, run.len());
            if run_labels.len() != run.len() {
                return Err(NerError::alignment(format!(
                    "word {position}: {} subwords but {} propagated labels",
                    run.len(),
                    run_labels.len()
                )));
            }
            ids.extend(run);
            subword_labels.extend(run_labels);
        }

        let subwords = self.tokenizer.convert_ids_to_tokens(&ids);
        Ok(SubwordSequence {
            ids,
            subwords,
            subword_labels: Some(subword_labels),
        })
    }
}

/// Propaga o label de uma palavra para as suas `count` sub-palavras.
pub fn propagate_label(label: &str, count: usize) -> Vec<String> {
    (0..count)
        .map(|j| if j == 0 { label.to_string() } else { inside_form(label) })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::WordPieceTokenizer;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn tokenizer() -> WordPieceTokenizer {
        WordPieceTokenizer::new(strings(&[
            "[PAD]", "[UNK]", "[CLS]", "[SEP]", "Pet", "##ro", "##bras", "lu", "##crou", "em",
            "Rio",
        ]))
        .unwrap()
    }

    #[test]
    fn test_propagate_begin_label() {
        assert_eq!(propagate_label("B-ORG", 3), strings(&["B-ORG", "I-ORG", "I-ORG"]));
        assert_eq!(propagate_label("I-LOC", 2), strings(&["I-LOC", "I-LOC"]));
        assert_eq!(propagate_label("O", 2), strings(&["O", "O"]));
        assert!(propagate_label("B-PER", 0).is_empty());
    }

    #[test]
    fn test_align_words_propagates_inside_form() {
        let tok = tokenizer();
        let aligner = SubwordAligner::new(&tok, ZeroSubwordPolicy::Drop);
        let seq = aligner
            .align_words(&strings(&["Petrobras", "lucrou"]), &strings(&["B-ORG", "O"]))
            .unwrap();
        assert_eq!(seq.subwords, strings(&["Pet", "##ro", "##bras", "lu", "##crou"]));
        assert_eq!(
            seq.subword_labels.unwrap(),
            strings(&["B-ORG", "I-ORG", "I-ORG", "O", "O"])
        );
    }

    #[test]
    fn test_run_lengths_sum_to_subword_count() {
        let tok = tokenizer();
        let aligner = SubwordAligner::new(&tok, ZeroSubwordPolicy::Drop);
        let words = strings(&["Petrobras", "em", "Rio", "lucrou"]);
        let labels = strings(&["B-ORG", "O", "B-LOC", "O"]);
        let seq = aligner.align_words(&words, &labels).unwrap();
        let labels = seq.subword_labels.clone().unwrap();
        assert_eq!(labels.len(), seq.len());
        assert_eq!(seq.ids.len(), seq.len());
    }

    #[test]
    fn test_length_mismatch_is_alignment_error() {
        let tok = tokenizer();
        let aligner = SubwordAligner::new(&tok, ZeroSubwordPolicy::Drop);
        let err = aligner
            .align_words(&strings(&["Rio", "em"]), &strings(&["B-LOC"]))
            .unwrap_err();
        assert!(matches!(err, NerError::Alignment(_)));
    }

    #[test]
    fn test_zero_subword_word_drops_label_without_shifting() {
        let tok = tokenizer();
        let aligner = SubwordAligner::new(&tok, ZeroSubwordPolicy::Drop);
        // "   " não gera nenhuma sub-palavra
        let words = strings(&["Rio", "   ", "Pet"]);
        let labels = strings(&["B-LOC", "O", "B-ORG"]);
        let seq = aligner.align_words(&words, &labels).unwrap();
        assert_eq!(seq.subwords, strings(&["Rio", "Pet"]));
        assert_eq!(seq.subword_labels.unwrap(), strings(&["B-LOC", "B-ORG"]));
    }

    #[test]
    fn test_zero_subword_word_rejected_by_policy() {
        let tok = tokenizer();
        let aligner = SubwordAligner::new(&tok, ZeroSubwordPolicy::Reject);
        let err = aligner
            .align_words(&strings(&["Rio", ""]), &strings(&["B-LOC", "O"]))
            .unwrap_err();
        assert!(matches!(err, NerError::Alignment(_)));
    }

    #[test]
    fn test_free_text_has_no_labels() {
        let tok = tokenizer();
        let aligner = SubwordAligner::new(&tok, ZeroSubwordPolicy::Drop);
        let seq = aligner.align(&Record::free_text("Rio em")).unwrap();
        assert_eq!(seq.subwords, strings(&["Rio", "em"]));
        assert!(seq.subword_labels.is_none());
    }

    #[test]
    fn test_truncated_keeps_prefix() {
        let tok = tokenizer();
        let aligner = SubwordAligner::new(&tok, ZeroSubwordPolicy::Drop);
        let seq = aligner
            .align_words(&strings(&["Petrobras", "lucrou"]), &strings(&["B-ORG", "O"]))
            .unwrap();
        let cut = seq.truncated(2);
        assert_eq!(cut.subwords, strings(&["Pet", "##ro"]));
        assert_eq!(cut.subword_labels.unwrap(), strings(&["B-ORG", "I-ORG"]));
        assert_eq!(seq.truncated(99), seq);
    }

    #[test]
    fn test_normalize_whitespace_and_labeled_text() {
        assert_eq!(normalize_whitespace("  New \t York\n is "), "New York is");
        assert_eq!(normalize_whitespace(""), "");
        let record = Record::labeled(strings(&["Anna", "Lee"]), strings(&["B-PER", "B-PER"]));
        assert_eq!(record.text, "Anna Lee");
    }

    #[test]
    fn test_record_serde_defaults_to_free_text() {
        let record: Record = serde_json::from_str(r#"{"text":"Rio"}"#).unwrap();
        assert_eq!(record.content, RecordContent::FreeText);
        let json = r#"{"text":"Rio","content":{"kind":"words_with_labels",
            "words":["Rio"],"labels":["B-LOC"]}}"#;
        let labeled: Record = serde_json::from_str(json).unwrap();
        assert!(matches!(labeled.content, RecordContent::WordsWithLabels { .. }));
    }
}
