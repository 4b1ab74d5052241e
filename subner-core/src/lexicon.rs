//! # Tagger de Gazetteers
//!
//! Um [`Tagger`] determinístico baseado em listas de entidades conhecidas.
//! Serve para rodar o pipeline de ponta a ponta sem um modelo neural (servidor
//! de demonstração, testes de integração).
//!
//! ## Como funciona
//!
//! 1. Converte os ids de cada linha de volta em sub-palavras (via tokenizador).
//! 2. Reagrupa as sub-palavras em palavras usando os marcadores (`##`, `▁`).
//! 3. Procura, a partir de cada palavra, a **maior** entrada do gazetteer que
//!    casa (sem diferenciar maiúsculas), ex: "rio de janeiro" antes de "rio".
//! 4. Emite logits: `B-TIPO` na primeira sub-palavra, `I-TIPO` nas demais e
//!    `O` fora das entidades. Sentinelas e padding ficam com scores uniformes.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::batch::Batch;
use crate::error::Result;
use crate::labels::LabelVocabulary;
use crate::tagger::{ScoreTensor, Tagger, Tensor3};
use crate::tokenizer::SubwordTokenizer;

/// Logit atribuído ao label escolhido (os demais ficam em 0).
const DEFAULT_STRENGTH: f32 = 4.0;

/// Listas de entidades conhecidas por tipo.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "HashMap<String, Vec<String>>", into = "HashMap<String, Vec<String>>")]
pub struct Gazetteer {
    /// (palavras em minúsculas, tipo), ordenado da entrada mais longa para a mais curta.
    entries: Vec<(Vec<String>, String)>,
}

impl Gazetteer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adiciona uma entidade (pode ter várias palavras, ex: "Rio de Janeiro").
    pub fn add(&mut self, entity_type: &str, name: &str) {
        let parts: Vec<String> = name.split_whitespace().map(str::to_lowercase).collect();
        if parts.is_empty() || self.entries.iter().any(|(p, _)| *p == parts) {
            return;
        }
        self.entries.push((parts, entity_type.to_string()));
        self.entries.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
    }

    /// Carrega `{"TIPO": ["nome", ...]}` de um arquivo JSON.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let lists: HashMap<String, Vec<String>> = serde_json::from_str(&raw)?;
        Ok(Self::from(lists))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maior entrada que casa com `words[start..]`: (número de palavras, tipo).
    pub fn longest_match(&self, words: &[String], start: usize) -> Option<(usize, &str)> {
        self.entries.iter().find_map(|(parts, kind)| {
            let end = start + parts.len();
            let matches = end <= words.len()
                && parts
                    .iter()
                    .zip(&words[start..end])
                    .all(|(part, word)| *part == word.to_lowercase());
            matches.then_some((parts.len(), kind.as_str()))
        })
    }
}

impl From<HashMap<String, Vec<String>>> for Gazetteer {
    fn from(lists: HashMap<String, Vec<String>>) -> Self {
        let mut kinds: Vec<_> = lists.into_iter().collect();
        // ordem determinística entre tipos
        kinds.sort_by(|a, b| a.0.cmp(&b.0));
        let mut gazetteer = Gazetteer::new();
        for (kind, names) in kinds {
            for name in names {
                gazetteer.add(&kind, &name);
            }
        }
        gazetteer
    }
}

impl From<Gazetteer> for HashMap<String, Vec<String>> {
    fn from(gazetteer: Gazetteer) -> Self {
        let mut lists: HashMap<String, Vec<String>> = HashMap::new();
        for (parts, kind) in gazetteer.entries {
            lists.entry(kind).or_default().push(parts.join(" "));
        }
        lists
    }
}

/// Tagger baseado em gazetteers.
pub struct LexiconTagger {
    tokenizer: Arc<dyn SubwordTokenizer>,
    vocab: LabelVocabulary,
    gazetteer: Gazetteer,
    strength: f32,
}

impl LexiconTagger {
    pub fn new(
        tokenizer: Arc<dyn SubwordTokenizer>,
        vocab: LabelVocabulary,
        gazetteer: Gazetteer,
    ) -> Self {
        Self {
            tokenizer,
            vocab,
            gazetteer,
            strength: DEFAULT_STRENGTH,
        }
    }

    /// Logit do label escolhido; valores maiores deixam as probabilidades mais concentradas.
    pub fn with_strength(mut self, strength: f32) -> Self {
        self.strength = strength;
        self
    }

    /// Labels (por posição da linha, sem sentinelas) de uma linha de sub-palavras.
    fn label_row(&self, subwords: &[String]) -> Vec<String> {
        let markers = self.tokenizer.markers();

        // agrupa sub-palavras em palavras: (texto, posições)
        let mut words: Vec<String> = Vec::new();
        let mut positions: Vec<Vec<usize>> = Vec::new();
        for (i, token) in subwords.iter().enumerate() {
            let visible = markers.visible_text(token);
            if markers.starts_word(token) || words.is_empty() {
                words.push(visible.to_string());
                positions.push(vec![i]);
            } else if let (Some(word), Some(pos)) = (words.last_mut(), positions.last_mut()) {
                word.push_str(visible);
                pos.push(i);
            }
        }

        let mut labels = vec!["O".to_string(); subwords.len()];
        let mut w = 0;
        while w < words.len() {
            let Some((span, kind)) = self.gazetteer.longest_match(&words, w) else {
                w += 1;
                continue;
            };
            let begin = format!("B-{kind}");
            let inside = format!("I-{kind}");
            if self.vocab.index_of(&begin).is_none() {
                w += span;
                continue;
            }
            let mut first = true;
            for pos in positions[w..w + span].iter().flatten() {
                labels[*pos] = if first { begin.clone() } else { inside.clone() };
                first = false;
            }
            w += span;
        }
        labels
    }
}

impl Tagger for LexiconTagger {
    fn score(&self, batch: &Batch) -> Result<ScoreTensor> {
        let width = batch.width();
        let mut scores = Tensor3::zeros(batch.records(), width, self.vocab.len());
        for (r, row) in batch.input_ids.iter().enumerate() {
            // posições reais: entre START e END, sem padding
            let real: Vec<usize> = (1..width.saturating_sub(1))
                .filter(|&p| batch.padding_mask[r][p] == 0.0)
                .collect();
            let ids: Vec<u32> = real.iter().map(|&p| row[p]).collect();
            let subwords = self.tokenizer.convert_ids_to_tokens(&ids);
            for (label, &p) in self.label_row(&subwords).iter().zip(&real) {
                if let Some(k) = self.vocab.index_of(label) {
                    scores.cell_mut(r, p)[k] = self.strength;
                }
            }
        }
        Ok(scores)
    }

    fn name(&self) -> &str {
        "lexicon"
    }
}
