//! # Configuração e Diretório do Modelo
//!
//! Um diretório de modelo tem o layout:
//!
//! ```text
//! modelo/
//! ├── labels.json          # ["O", "B-PER", "I-PER", ...] (ordem = saída do tagger)
//! ├── param.json           # PipelineConfig (campos opcionais)
//! ├── gazetteer.json       # opcional: {"LOC": ["São Paulo", ...]} para o LexiconTagger
//! └── tokenizer/
//!     └── vocab.txt        # um token por linha
//! ```
//!
//! Os pesos da rede neural não são lidos aqui: o tagger é fornecido pelo chamador.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::align::ZeroSubwordPolicy;
use crate::batch::{SentinelIds, DEFAULT_MAX_LENGTH};
use crate::decode::DEFAULT_TOP_N;
use crate::error::{NerError, Result};
use crate::labels::LabelVocabulary;
use crate::lexicon::Gazetteer;
use crate::tagger::TaggerArchitecture;
use crate::tokenizer::{SentencePieceTokenizer, SubwordTokenizer, WordPieceTokenizer};

/// Número padrão de registros por lote.
pub const DEFAULT_BATCH_SIZE: usize = 20;

/// Família do modelo pré-treinado: define o tokenizador. Os sentinelas vêm
/// do vocabulário carregado.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    /// BERT: WordPiece (`##`), sentinelas `[CLS]`, `[SEP]`, `[PAD]`.
    Bert,
    /// XLM-RoBERTa: SentencePiece (`▁`), sentinelas `<s>`, `</s>`, `<pad>`.
    #[default]
    #[serde(alias = "xlmroberta")]
    XlmRoberta,
}

impl ModelFamily {
    /// Carrega o tokenizador da família a partir de um `vocab.txt`.
    pub fn load_tokenizer(
        &self,
        vocab_path: impl AsRef<Path>,
    ) -> Result<Arc<dyn SubwordTokenizer>> {
        Ok(match self {
            ModelFamily::Bert => Arc::new(WordPieceTokenizer::from_vocab_file(vocab_path)?),
            ModelFamily::XlmRoberta => {
                Arc::new(SentencePieceTokenizer::from_vocab_file(vocab_path)?)
            }
        })
    }
}

/// Parâmetros do pipeline (lidos de `param.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Limite de sub-palavras por registro.
    pub max_length: usize,
    /// Registros por lote.
    pub batch_size: usize,
    /// Candidatos por posição.
    pub top_n: usize,
    #[serde(alias = "plm")]
    pub model_family: ModelFamily,
    pub architecture: TaggerArchitecture,
    pub zero_subword_policy: ZeroSubwordPolicy,
    /// Processa lotes em paralelo (ordem da saída é preservada).
    pub parallel_batches: bool,
    /// Sobrescreve os sentinelas vindos do tokenizador.
    pub sentinels: Option<SentinelIds>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_length: DEFAULT_MAX_LENGTH,
            batch_size: DEFAULT_BATCH_SIZE,
            top_n: DEFAULT_TOP_N,
            model_family: ModelFamily::default(),
            architecture: TaggerArchitecture::default(),
            zero_subword_policy: ZeroSubwordPolicy::default(),
            parallel_batches: false,
            sentinels: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(NerError::config("batch_size must be at least 1"));
        }
        if self.top_n == 0 {
            return Err(NerError::config("top_n must be at least 1"));
        }
        Ok(())
    }
}

/// Diretório com os artefatos de um modelo.
#[derive(Debug, Clone)]
pub struct ModelDirectory {
    root: PathBuf,
}

impl ModelDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn labels_path(&self) -> PathBuf {
        self.root.join("labels.json")
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("param.json")
    }

    pub fn vocab_path(&self) -> PathBuf {
        self.root.join("tokenizer").join("vocab.txt")
    }

    pub fn gazetteer_path(&self) -> PathBuf {
        self.root.join("gazetteer.json")
    }

    pub fn labels(&self) -> Result<LabelVocabulary> {
        LabelVocabulary::from_json_file(self.labels_path())
    }

    /// `param.json` é opcional: sem ele valem os padrões.
    pub fn config(&self) -> Result<PipelineConfig> {
        let path = self.config_path();
        if path.exists() {
            PipelineConfig::from_json_file(path)
        } else {
            Ok(PipelineConfig::default())
        }
    }

    pub fn tokenizer(&self, family: ModelFamily) -> Result<Arc<dyn SubwordTokenizer>> {
        family.load_tokenizer(self.vocab_path())
    }

    pub fn gazetteer(&self) -> Result<Option<Gazetteer>> {
        let path = self.gazetteer_path();
        if path.exists() {
            Ok(Some(Gazetteer::from_json_file(path)?))
        } else {
            Ok(None)
        }
    }

    /// Carrega vocabulário de labels, configuração e tokenizador de uma vez.
    pub fn load(&self) -> Result<(LabelVocabulary, PipelineConfig, Arc<dyn SubwordTokenizer>)> {
        let labels = self.labels()?;
        let config = self.config()?;
        let tokenizer = self.tokenizer(config.model_family)?;
        info!(
            root = %self.root.display(),
            labels = labels.len(),
            family = ?config.model_family,
            "model directory loaded"
        );
        Ok((labels, config, tokenizer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_length, 500);
        assert_eq!(config.batch_size, 20);
        assert_eq!(config.top_n, 5);
        assert_eq!(config.zero_subword_policy, ZeroSubwordPolicy::Drop);
    }

    #[test]
    fn test_partial_param_json() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"plm": "bert", "top_n": 3}"#).unwrap();
        assert_eq!(config.model_family, ModelFamily::Bert);
        assert_eq!(config.top_n, 3);
        assert_eq!(config.batch_size, 20);
        let xlm: PipelineConfig =
            serde_json::from_str(r#"{"model_family": "xlmroberta"}"#).unwrap();
        assert_eq!(xlm.model_family, ModelFamily::XlmRoberta);
    }

    #[test]
    fn test_validate_rejects_zero_batch() {
        let config = PipelineConfig { batch_size: 0, ..Default::default() };
        assert!(matches!(config.validate(), Err(NerError::Config(_))));
    }

    #[test]
    fn test_family_tokenizer_takes_sentinels_from_vocab() {
        let dir = tempfile::tempdir().unwrap();
        let bert_vocab = dir.path().join("bert.txt");
        std::fs::write(&bert_vocab, "[UNK]\nRio\n[PAD]\n[SEP]\n[CLS]\n").unwrap();
        let bert = ModelFamily::Bert.load_tokenizer(&bert_vocab).unwrap();
        assert_eq!(bert.sentinels(), SentinelIds { start: 4, end: 3, pad: 2 });

        let xlm_vocab = dir.path().join("xlm.txt");
        std::fs::write(&xlm_vocab, "<s>\n<pad>\n</s>\n<unk>\n\u{2581}Rio\n").unwrap();
        let xlm = ModelFamily::XlmRoberta.load_tokenizer(&xlm_vocab).unwrap();
        assert_eq!(xlm.sentinels(), SentinelIds { start: 0, end: 2, pad: 1 });
        assert_eq!(xlm.encode_without_sentinels("Rio"), vec![4]);
    }

    #[test]
    fn test_load_model_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("labels.json"), r#"["O", "B-LOC", "I-LOC"]"#).unwrap();
        std::fs::write(
            dir.path().join("param.json"),
            r#"{"plm": "bert", "max_length": 64}"#,
        )
        .unwrap();
        std::fs::create_dir(dir.path().join("tokenizer")).unwrap();
        std::fs::write(
            dir.path().join("tokenizer").join("vocab.txt"),
            "[PAD]\n[UNK]\n[CLS]\n[SEP]\nRio\n",
        )
        .unwrap();

        let model_dir = ModelDirectory::new(dir.path());
        let (labels, config, tokenizer) = model_dir.load().unwrap();
        assert_eq!(labels.len(), 3);
        assert_eq!(config.max_length, 64);
        assert_eq!(tokenizer.encode_without_sentinels("Rio"), vec![4]);
        assert!(model_dir.gazetteer().unwrap().is_none());
    }

    #[test]
    fn test_missing_labels_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ModelDirectory::new(dir.path()).labels().unwrap_err();
        assert!(matches!(err, NerError::Io(_)));
    }
}
