//! # Tagger: Interface Única para os Modelos de Sequência
//!
//! O modelo neural é externo ao crate. O pipeline só conhece o contrato
//! [`Tagger`]: recebe um [`Batch`] (ids + máscara) e devolve um score por
//! label para cada posição, no formato `[registros × (max_length+2) × |labels|]`.
//!
//! ## Variantes
//!
//! | Variante                      | Composição                                               |
//! |-------------------------------|----------------------------------------------------------|
//! | [`EmbeddingRecurrentTagger`]  | embedding pré-treinado → encoder recorrente → ReLU → linear |
//! | [`TokenClassifierTagger`]     | classificador de tokens pré-treinado (logits diretos)    |
//! | [`crate::lexicon::LexiconTagger`] | gazetteers determinísticos (demonstração e testes)   |
//!
//! Tanto o embedding quanto o encoder são *plugáveis* ([`EmbeddingEncoder`],
//! [`SequenceEncoder`]): o crate só implementa a cola entre eles e a cabeça
//! linear de classificação.
//!
//! ## Compartilhamento entre threads
//!
//! O pipeline exige `Send + Sync`. Um modelo que não pode ser compartilhado
//! deve ser envolvido em [`SerializedTagger`], que serializa o acesso com um mutex.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::batch::Batch;
use crate::error::{NerError, Result};

/// Tensor denso de 3 dimensões `[registros × posições × canais]`, em ordem row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor3 {
    records: usize,
    positions: usize,
    channels: usize,
    data: Vec<f32>,
}

/// Scores do tagger (logits, um canal por label).
pub type ScoreTensor = Tensor3;

impl Tensor3 {
    pub fn new(records: usize, positions: usize, channels: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != records * positions * channels {
            return Err(NerError::tagger(format!(
                "tensor data has {} values, expected {records}x{positions}x{channels}",
                data.len()
            )));
        }
        Ok(Self { records, positions, channels, data })
    }

    pub fn zeros(records: usize, positions: usize, channels: usize) -> Self {
        Self {
            records,
            positions,
            channels,
            data: vec![0.0; records * positions * channels],
        }
    }

    /// Constrói a partir de vetores aninhados (precisam ser retangulares).
    pub fn from_nested(nested: Vec<Vec<Vec<f32>>>) -> Result<Self> {
        let records = nested.len();
        let positions = nested.first().map_or(0, Vec::len);
        let channels = nested
            .first()
            .and_then(|r| r.first())
            .map_or(0, Vec::len);
        let mut data = Vec::with_capacity(records * positions * channels);
        for row in nested {
            if row.len() != positions {
                return Err(NerError::tagger("ragged tensor: rows differ in length"));
            }
            for cell in row {
                if cell.len() != channels {
                    return Err(NerError::tagger("ragged tensor: cells differ in length"));
                }
                data.extend(cell);
            }
        }
        Ok(Self { records, positions, channels, data })
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        (self.records, self.positions, self.channels)
    }

    pub fn records(&self) -> usize {
        self.records
    }

    pub fn positions(&self) -> usize {
        self.positions
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Vetor de canais de uma posição.
    pub fn cell(&self, record: usize, position: usize) -> &[f32] {
        let start = (record * self.positions + position) * self.channels;
        &self.data[start..start + self.channels]
    }

    pub fn cell_mut(&mut self, record: usize, position: usize) -> &mut [f32] {
        let start = (record * self.positions + position) * self.channels;
        &mut self.data[start..start + self.channels]
    }
}

/// Confere se os scores têm o formato esperado para o lote.
pub fn validate_scores(scores: &ScoreTensor, batch: &Batch, labels: usize) -> Result<()> {
    let expected = (batch.records(), batch.width(), labels);
    if scores.shape() != expected {
        return Err(NerError::tagger(format!(
            "tagger returned shape {:?}, expected {:?}",
            scores.shape(),
            expected
        )));
    }
    Ok(())
}

/// Contrato do modelo de sequência.
pub trait Tagger {
    /// Scores não normalizados (logits) por posição e label.
    fn score(&self, batch: &Batch) -> Result<ScoreTensor>;

    /// Nome curto para logs.
    fn name(&self) -> &str {
        "tagger"
    }
}

/// Arquitetura do modelo (como registrada em `param.json`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaggerArchitecture {
    /// Embedding pré-treinado + encoder recorrente + cabeça linear.
    #[default]
    EmbeddingRecurrent,
    /// Classificador de tokens pré-treinado.
    TokenClassifier,
}

/// Estágio de embedding (ex: BERT, XLM-R) de um [`EmbeddingRecurrentTagger`].
pub trait EmbeddingEncoder: Send + Sync {
    /// Estados ocultos `[registros × largura × dim]`; o padding chega via
    /// [`Batch::padding_bias`].
    fn embed(&self, batch: &Batch) -> Result<Tensor3>;
}

/// Encoder de sequência (ex: LSTM/GRU bidirecional) sobre os embeddings.
pub trait SequenceEncoder: Send + Sync {
    fn encode(&self, hidden: &Tensor3) -> Result<Tensor3>;
}

/// Camada linear `logits = W · relu(h) + b`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearHead {
    /// Pesos `[labels][dim]`.
    weights: Vec<Vec<f32>>,
    bias: Vec<f32>,
}

impl LinearHead {
    pub fn new(weights: Vec<Vec<f32>>, bias: Vec<f32>) -> Result<Self> {
        if weights.len() != bias.len() {
            return Err(NerError::config(format!(
                "linear head has {} weight rows but {} biases",
                weights.len(),
                bias.len()
            )));
        }
        let dim = weights.first().map_or(0, Vec::len);
        if weights.iter().any(|row| row.len() != dim) {
            return Err(NerError::config("linear head weight rows differ in length"));
        }
        Ok(Self { weights, bias })
    }

    pub fn labels(&self) -> usize {
        self.weights.len()
    }

    pub fn input_dim(&self) -> usize {
        self.weights.first().map_or(0, Vec::len)
    }

    /// Aplica ReLU e a projeção linear em cada posição (dropout é identidade na inferência).
    pub fn apply(&self, hidden: &Tensor3) -> Result<Tensor3> {
        let (records, positions, dim) = hidden.shape();
        if dim != self.input_dim() {
            return Err(NerError::tagger(format!(
                "encoder produced dim {dim}, linear head expects {}",
                self.input_dim()
            )));
        }
        let mut out = Tensor3::zeros(records, positions, self.labels());
        for r in 0..records {
            for p in 0..positions {
                let h = hidden.cell(r, p);
                let logits = out.cell_mut(r, p);
                for (k, (row, b)) in self.weights.iter().zip(&self.bias).enumerate() {
                    logits[k] = row.iter().zip(h).map(|(w, x)| w * x.max(0.0)).sum::<f32>() + b;
                }
            }
        }
        Ok(out)
    }
}

/// Embedding + encoder recorrente + cabeça linear.
pub struct EmbeddingRecurrentTagger<E, S> {
    embedding: E,
    encoder: S,
    head: LinearHead,
}

impl<E: EmbeddingEncoder, S: SequenceEncoder> EmbeddingRecurrentTagger<E, S> {
    pub fn new(embedding: E, encoder: S, head: LinearHead) -> Self {
        Self { embedding, encoder, head }
    }
}

impl<E: EmbeddingEncoder, S: SequenceEncoder> Tagger for EmbeddingRecurrentTagger<E, S> {
    fn score(&self, batch: &Batch) -> Result<ScoreTensor> {
        let embedded = self.embedding.embed(batch)?;
        let encoded = self.encoder.encode(&embedded)?;
        self.head.apply(&encoded)
    }

    fn name(&self) -> &str {
        "embedding_recurrent"
    }
}

/// Modelo pré-treinado de classificação de tokens.
pub trait TokenClassifier: Send + Sync {
    fn logits(&self, batch: &Batch) -> Result<ScoreTensor>;
}

/// Adapta um [`TokenClassifier`] ao contrato [`Tagger`].
pub struct TokenClassifierTagger<M> {
    model: M,
}

impl<M: TokenClassifier> TokenClassifierTagger<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }
}

impl<M: TokenClassifier> Tagger for TokenClassifierTagger<M> {
    fn score(&self, batch: &Batch) -> Result<ScoreTensor> {
        let logits = self.model.logits(batch)?;
        if logits.records() != batch.records() || logits.positions() != batch.width() {
            return Err(NerError::tagger(format!(
                "token classifier returned {:?} for a {}x{} batch",
                logits.shape(),
                batch.records(),
                batch.width()
            )));
        }
        Ok(logits)
    }

    fn name(&self) -> &str {
        "token_classifier"
    }
}

/// Serializa o acesso a um tagger que não pode ser usado por várias threads ao mesmo tempo.
pub struct SerializedTagger<T> {
    inner: Mutex<T>,
}

impl<T: Tagger> SerializedTagger<T> {
    pub fn new(tagger: T) -> Self {
        Self { inner: Mutex::new(tagger) }
    }
}

impl<T: Tagger> Tagger for SerializedTagger<T> {
    fn score(&self, batch: &Batch) -> Result<ScoreTensor> {
        let guard = self
            .inner
            .lock()
            .map_err(|_| NerError::tagger("serialized tagger mutex poisoned"))?;
        guard.score(batch)
    }

    fn name(&self) -> &str {
        "serialized"
    }
}
