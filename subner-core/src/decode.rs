//! # Decodificação dos Scores do Tagger
//!
//! Transforma os logits `[registros × (max_length+2) × |labels|]` em labels:
//!
//! 1. **Softmax** por posição (estável numericamente: subtrai o máximo).
//! 2. **Top-N** labels por posição, em ordem decrescente de probabilidade;
//!    empates ficam com o menor índice do vocabulário.
//! 3. **Remoção dos sentinelas**: descarta a posição 0 (START) e tudo depois das
//!    sub-palavras mantidas do registro (END + PAD).
//!
//! ```text
//! posição:   0      1      2      3     4
//! token:   [CLS]   New   York   [SEP] [PAD]
//! top-1:     O    B-LOC  I-LOC    O     O
//!                 └─────────┘
//!                  mantidos (2 sub-palavras)
//! ```

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::batch::Batch;
use crate::error::Result;
use crate::labels::LabelVocabulary;
use crate::tagger::{validate_scores, ScoreTensor};

/// Número padrão de candidatos por posição.
pub const DEFAULT_TOP_N: usize = 5;

/// Um label candidato e sua probabilidade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub label: String,
    pub probability: f32,
}

/// Resultado decodificado de um registro: um item por sub-palavra mantida.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecodedSequence {
    /// Label mais provável de cada posição.
    pub labels: Vec<String>,
    /// Candidatos de cada posição (tamanho `min(top_n, |labels|)`).
    pub candidates: Vec<Vec<Candidate>>,
}

impl DecodedSequence {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Softmax de um vetor de logits.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if !max.is_finite() {
        // tudo -inf (ou vazio): distribuição uniforme
        let n = logits.len().max(1) as f32;
        return vec![1.0 / n; logits.len()];
    }
    let exps: Vec<f32> = logits.iter().map(|x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Índices dos `n` maiores valores, em ordem decrescente (empate → menor índice).
pub fn top_n_indices(probabilities: &[f32], n: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..probabilities.len()).collect();
    order.sort_by(|&a, &b| {
        probabilities[b]
            .partial_cmp(&probabilities[a])
            .unwrap_or(Ordering::Equal)
            .then(a.cmp(&b))
    });
    order.truncate(n);
    order
}

/// Decodificador de scores.
#[derive(Debug, Clone)]
pub struct TagDecoder<'a> {
    vocab: &'a LabelVocabulary,
    top_n: usize,
}

impl<'a> TagDecoder<'a> {
    pub fn new(vocab: &'a LabelVocabulary, top_n: usize) -> Self {
        Self { vocab, top_n }
    }

    /// Decodifica todos os registros do lote.
    pub fn decode_batch(
        &self,
        batch: &Batch,
        scores: &ScoreTensor,
    ) -> Result<Vec<DecodedSequence>> {
        validate_scores(scores, batch, self.vocab.len())?;
        Ok((0..batch.records())
            .map(|r| self.decode_record(scores, r, batch.kept_len(r)))
            .collect())
    }

    /// Decodifica as posições `1..=kept_len` de uma linha.
    ///
    /// O chamador garante que os scores já foram validados contra o lote.
    pub fn decode_record(
        &self,
        scores: &ScoreTensor,
        record: usize,
        kept_len: usize,
    ) -> DecodedSequence {
        let take = kept_len.min(scores.positions().saturating_sub(1));
        let n = self.top_n.max(1);
        let mut decoded = DecodedSequence {
            labels: Vec::with_capacity(take),
            candidates: Vec::with_capacity(take),
        };
        for position in 1..=take {
            let probabilities = softmax(scores.cell(record, position));
            let candidates: Vec<Candidate> = top_n_indices(&probabilities, n)
                .into_iter()
                .filter_map(|k| {
                    self.vocab.label(k).map(|label| Candidate {
                        label: label.to_string(),
                        probability: probabilities[k],
                    })
                })
                .collect();
            let top1 = candidates
                .first()
                .map(|c| c.label.clone())
                .unwrap_or_else(|| "O".to_string());
            decoded.labels.push(top1);
            decoded.candidates.push(candidates);
        }
        decoded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::align::SubwordSequence;
    use crate::batch::{BatchBuilder, SentinelIds};
    use crate::tagger::Tensor3;

    fn vocab3() -> LabelVocabulary {
        LabelVocabulary::new(vec!["O".into(), "B-LOC".into(), "I-LOC".into()]).unwrap()
    }

    fn batch(lens: &[usize]) -> Batch {
        let seqs: Vec<SubwordSequence> = lens
            .iter()
            .map(|&n| SubwordSequence {
                ids: vec![7; n],
                subwords: vec!["x".into(); n],
                subword_labels: None,
            })
            .collect();
        BatchBuilder::new(SentinelIds { start: 101, end: 102, pad: 0 })
            .build(&seqs)
            .unwrap()
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let p = softmax(&[1.0, 2.0, 3.0]);
        assert!((p.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        assert!(p[2] > p[1] && p[1] > p[0]);
        let big = softmax(&[1000.0, 1000.0]);
        assert!((big[0] - 0.5).abs() < 1e-6);
        assert_eq!(softmax(&[f32::NEG_INFINITY, f32::NEG_INFINITY]), vec![0.5, 0.5]);
    }

    #[test]
    fn test_top_n_ties_by_index() {
        assert_eq!(top_n_indices(&[0.2, 0.4, 0.4], 3), vec![1, 2, 0]);
        assert_eq!(top_n_indices(&[0.25; 4], 2), vec![0, 1]);
        assert_eq!(top_n_indices(&[0.1, 0.9], 5), vec![1, 0]);
    }

    #[test]
    fn test_candidates_capped_by_vocabulary_size() {
        let vocab = vocab3();
        let b = batch(&[2]);
        let scores = Tensor3::zeros(1, b.width(), 3);
        let decoded = TagDecoder::new(&vocab, 5).decode_batch(&b, &scores).unwrap();
        assert_eq!(decoded[0].len(), 2);
        for candidates in &decoded[0].candidates {
            assert_eq!(candidates.len(), 3);
        }
        // uniforme → empate → menor índice
        assert_eq!(decoded[0].labels, vec!["O", "O"]);
    }

    #[test]
    fn test_strips_start_end_and_padding() {
        let vocab = vocab3();
        let b = batch(&[3, 1]);
        let mut scores = Tensor3::zeros(2, b.width(), 3);
        scores.cell_mut(0, 0)[1] = 9.0; // START: ignorado
        scores.cell_mut(0, 1)[1] = 5.0;
        scores.cell_mut(0, 2)[2] = 5.0;
        scores.cell_mut(0, 4)[2] = 9.0; // END: ignorado
        scores.cell_mut(1, 1)[2] = 5.0;
        scores.cell_mut(1, 2)[1] = 9.0; // PAD: ignorado
        let decoded = TagDecoder::new(&vocab, 2).decode_batch(&b, &scores).unwrap();
        assert_eq!(decoded[0].labels, vec!["B-LOC", "I-LOC", "O"]);
        assert_eq!(decoded[1].labels, vec!["I-LOC"]);
        assert_eq!(decoded[1].candidates[0].len(), 2);
        assert_eq!(decoded[1].candidates[0][0].label, "I-LOC");
        assert!(decoded[1].candidates[0][0].probability > 0.9);
    }

    #[test]
    fn test_shape_mismatch_is_tagger_error() {
        let vocab = vocab3();
        let b = batch(&[2]);
        let scores = Tensor3::zeros(1, b.width(), 4);
        assert!(TagDecoder::new(&vocab, 5).decode_batch(&b, &scores).is_err());
    }

    #[test]
    fn test_empty_record_decodes_to_nothing() {
        let vocab = vocab3();
        let b = batch(&[0]);
        let scores = Tensor3::zeros(1, 2, 3);
        let decoded = TagDecoder::new(&vocab, 5).decode_batch(&b, &scores).unwrap();
        assert!(decoded[0].is_empty());
    }
}
