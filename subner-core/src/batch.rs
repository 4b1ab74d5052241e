//! # Montagem de Lotes (Batch)
//!
//! Junta várias [`SubwordSequence`]s em grades retangulares que o tagger consome.
//!
//! ```text
//! max_length = min(cap, maior sequência)
//!
//! input_ids     [START] s1 s2 s3 [PAD] [PAD] [END]
//! padding_mask     0    0  0  0    1     1     0
//! attention       0    1  1  1    0     0     0      (só classificação)
//! label_ids       -1    3  4  0   -1    -1    -1      (só treino)
//! ```
//!
//! Cada linha tem exatamente `max_length + 2` posições. Sequências maiores que
//! o limite perdem a cauda: uma entidade cortada no limite é simplesmente
//! truncada, sem reparo.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::align::SubwordSequence;
use crate::error::{NerError, Result};
use crate::labels::LabelVocabulary;

/// Limite padrão de sub-palavras por registro.
pub const DEFAULT_MAX_LENGTH: usize = 500;

/// Label ignorado pela função de perda.
pub const IGNORE_INDEX: i64 = -1;

/// Viés aditivo aplicado às posições de padding.
pub const MASK_BIAS: f32 = -1e9;

/// Ids dos sentinelas inseridos em cada linha.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentinelIds {
    pub start: u32,
    pub end: u32,
    pub pad: u32,
}

/// Um lote pronto para o tagger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    /// Sequências já truncadas para `max_length`.
    pub sequences: Vec<SubwordSequence>,
    pub max_length: usize,
    pub input_ids: Vec<Vec<u32>>,
    /// 1.0 nas posições de PAD, 0.0 no resto.
    pub padding_mask: Vec<Vec<f32>>,
    /// 0.0 em START/END/PAD, 1.0 no resto (classificação de sequência inteira).
    pub attention_mask: Option<Vec<Vec<f32>>>,
    /// Índices de label com [`IGNORE_INDEX`] fora do texto (treino).
    pub label_ids: Option<Vec<Vec<i64>>>,
}

impl Batch {
    /// Número de registros (linhas).
    pub fn records(&self) -> usize {
        self.input_ids.len()
    }

    /// Largura de cada linha: `max_length + 2`.
    pub fn width(&self) -> usize {
        self.max_length + 2
    }

    /// Quantas sub-palavras do registro `row` sobreviveram ao truncamento.
    pub fn kept_len(&self, row: usize) -> usize {
        self.sequences.get(row).map_or(0, SubwordSequence::len)
    }

    /// A máscara de padding como viés aditivo (0 ou [`MASK_BIAS`]).
    pub fn padding_bias(&self) -> Vec<Vec<f32>> {
        self.padding_mask
            .iter()
            .map(|row| row.iter().map(|m| m * MASK_BIAS).collect())
            .collect()
    }
}

/// Construtor de lotes.
#[derive(Debug, Clone)]
pub struct BatchBuilder {
    cap: usize,
    sentinels: SentinelIds,
    with_attention_mask: bool,
}

impl BatchBuilder {
    pub fn new(sentinels: SentinelIds) -> Self {
        Self {
            cap: DEFAULT_MAX_LENGTH,
            sentinels,
            with_attention_mask: false,
        }
    }

    /// Limite de sub-palavras por registro.
    pub fn with_cap(mut self, cap: usize) -> Self {
        self.cap = cap;
        self
    }

    /// Também emite a máscara de atenção (classificação de sequência inteira).
    pub fn with_attention_mask(mut self, enabled: bool) -> Self {
        self.with_attention_mask = enabled;
        self
    }

    pub fn sentinels(&self) -> SentinelIds {
        self.sentinels
    }

    /// Monta o lote de inferência.
    pub fn build(&self, sequences: &[SubwordSequence]) -> Result<Batch> {
        if sequences.is_empty() {
            return Err(NerError::EmptyBatch);
        }
        let longest = sequences.iter().map(SubwordSequence::len).max().unwrap_or(0);
        let max_length = self.cap.min(longest);
        let width = max_length + 2;

        let kept: Vec<SubwordSequence> =
            sequences.iter().map(|s| s.truncated(max_length)).collect();
        let truncated = sequences.iter().filter(|s| s.len() > max_length).count();

        let mut input_ids = Vec::with_capacity(kept.len());
        let mut padding_mask = Vec::with_capacity(kept.len());
        let mut attention_mask = Vec::with_capacity(kept.len());
        for seq in &kept {
            let mut row = Vec::with_capacity(width);
            let mut pad_row = Vec::with_capacity(width);
            let mut attn_row = Vec::with_capacity(width);

            row.push(self.sentinels.start);
            pad_row.push(0.0);
            attn_row.push(0.0);
            for &id in &seq.ids {
                row.push(id);
                pad_row.push(0.0);
                attn_row.push(1.0);
            }
            for _ in seq.len()..max_length {
                row.push(self.sentinels.pad);
                pad_row.push(1.0);
                attn_row.push(0.0);
            }
            row.push(self.sentinels.end);
            pad_row.push(0.0);
            attn_row.push(0.0);

            input_ids.push(row);
            padding_mask.push(pad_row);
            attention_mask.push(attn_row);
        }

        debug!(records = kept.len(), max_length, truncated, "batch built");
        Ok(Batch {
            sequences: kept,
            max_length,
            input_ids,
            padding_mask,
            attention_mask: self.with_attention_mask.then_some(attention_mask),
            label_ids: None,
        })
    }

    /// Monta o lote de treino: igual ao de inferência mais a grade de labels.
    ///
    /// Sequências sem labels propagados só têm posições ignoradas.
    pub fn build_training(
        &self,
        sequences: &[SubwordSequence],
        vocab: &LabelVocabulary,
    ) -> Result<Batch> {
        let mut batch = self.build(sequences)?;
        let width = batch.width();
        let mut label_ids = Vec::with_capacity(batch.records());
        for seq in &batch.sequences {
            let mut row = vec![IGNORE_INDEX; width];
            if let Some(labels) = &seq.subword_labels {
                for (i, label) in labels.iter().enumerate().take(batch.max_length) {
                    row[i + 1] = vocab.require_index(label)? as i64;
                }
            }
            label_ids.push(row);
        }
        batch.label_ids = Some(label_ids);
        Ok(batch)
    }
}
