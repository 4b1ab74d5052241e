//! Contrato de treino: perda de entropia cruzada que ignora posições marcadas
//! com [`IGNORE_INDEX`] (sentinelas, padding e registros sem labels).
//!
//! O motor de otimização fica fora deste crate; ele recebe os lotes de
//! [`NerPipeline::build_training_batches`](crate::pipeline::NerPipeline::build_training_batches)
//! e usa esta perda.

use crate::batch::IGNORE_INDEX;
use crate::error::{NerError, Result};
use crate::tagger::ScoreTensor;

fn log_softmax_at(logits: &[f32], target: usize) -> f32 {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let log_sum = logits.iter().map(|x| (x - max).exp()).sum::<f32>().ln();
    logits[target] - max - log_sum
}

/// Média de `-log p(label)` sobre as posições não ignoradas.
///
/// Sem nenhuma posição válida a perda é 0.
pub fn masked_cross_entropy(scores: &ScoreTensor, label_ids: &[Vec<i64>]) -> Result<f32> {
    let (records, positions, channels) = scores.shape();
    if label_ids.len() != records || label_ids.iter().any(|row| row.len() != positions) {
        return Err(NerError::tagger(format!(
            "label grid does not match scores of shape {:?}",
            scores.shape()
        )));
    }

    let mut total = 0.0f32;
    let mut counted = 0usize;
    for (r, row) in label_ids.iter().enumerate() {
        for (p, &label) in row.iter().enumerate() {
            if label == IGNORE_INDEX {
                continue;
            }
            let target = usize::try_from(label)
                .ok()
                .filter(|&k| k < channels)
                .ok_or_else(|| {
                    NerError::tagger(format!("label id {label} out of range at ({r}, {p})"))
                })?;
            total -= log_softmax_at(scores.cell(r, p), target);
            counted += 1;
        }
    }
    Ok(if counted == 0 { 0.0 } else { total / counted as f32 })
}
