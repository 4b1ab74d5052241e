//! # Esquema de Tags BIO e Vocabulário de Labels
//!
//! Define o esquema de anotação **BIO** (Beginning-Inside-Outside) e o
//! vocabulário ordenado de labels do modelo.
//!
//! ## Esquema BIO
//!
//! - `B-TIPO`: Begin, primeiro token de uma entidade
//! - `I-TIPO`: Inside, tokens subsequentes da mesma entidade
//! - `O`: Outside, não é parte de nenhuma entidade
//!
//! Diferente de um conjunto fixo de categorias, aqui os tipos vêm do arquivo
//! `labels.json` do modelo: qualquer string depois de `B-`/`I-` é um tipo válido.
//!
//! ## Vocabulário
//!
//! A posição de cada label no vocabulário é exatamente o índice da classe na
//! saída do tagger. Por isso o vocabulário é imutável depois de carregado.

use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{NerError, Result};

/// Convenção `O | B-x | I-x`.
static LABEL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:O|[BI]-\S+)$").expect("static label pattern"));

/// Tag BIO de uma posição.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tag {
    /// **Begin**: início de uma entidade. Ex: **New** (B-LOC) York.
    Begin(String),
    /// **Inside**: continuação de uma entidade. Ex: New **York** (I-LOC).
    Inside(String),
    /// **Outside**: fora de qualquer entidade.
    Outside,
}

impl Tag {
    /// Parseia uma tag a partir de string (ex: "B-PER" → Begin("PER")).
    ///
    /// Retorna `None` para labels fora da convenção (ex: "PER", "X-LOC", "B-").
    pub fn from_label(s: &str) -> Option<Self> {
        if s == "O" {
            return Some(Tag::Outside);
        }
        let (prefix, kind) = s.split_once('-')?;
        if kind.is_empty() {
            return None;
        }
        match prefix {
            "B" => Some(Tag::Begin(kind.to_string())),
            "I" => Some(Tag::Inside(kind.to_string())),
            _ => None,
        }
    }

    /// Representação textual (ex: "B-PER", "I-ORG", "O").
    pub fn label(&self) -> String {
        match self {
            Tag::Begin(kind) => format!("B-{kind}"),
            Tag::Inside(kind) => format!("I-{kind}"),
            Tag::Outside => "O".to_string(),
        }
    }

    /// Tipo da entidade (se for B- ou I-).
    pub fn entity_type(&self) -> Option<&str> {
        match self {
            Tag::Begin(kind) | Tag::Inside(kind) => Some(kind),
            Tag::Outside => None,
        }
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Forma "inside" de um label, usada nas sub-palavras depois da primeira.
///
/// `B-x` → `I-x`; `I-x`, `O` e labels malformados ficam como estão.
pub fn inside_form(label: &str) -> String {
    match label.strip_prefix("B-") {
        Some(kind) if !kind.is_empty() => format!("I-{kind}"),
        _ => label.to_string(),
    }
}

/// Vocabulário ordenado de labels (índice = classe do tagger).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct LabelVocabulary {
    labels: Vec<String>,
    index: HashMap<String, usize>,
}

impl LabelVocabulary {
    /// Constrói o vocabulário, rejeitando listas vazias ou com duplicatas.
    ///
    /// Labels fora da convenção BIO são aceitos (o decodificador é tolerante),
    /// mas geram um aviso.
    pub fn new(labels: Vec<String>) -> Result<Self> {
        if labels.is_empty() {
            return Err(NerError::InvalidVocabulary("vocabulary is empty".into()));
        }
        let mut index = HashMap::with_capacity(labels.len());
        for (i, label) in labels.iter().enumerate() {
            if index.insert(label.clone(), i).is_some() {
                return Err(NerError::InvalidVocabulary(format!(
                    "duplicate label {label:?}"
                )));
            }
            if !LABEL_PATTERN.is_match(label) {
                warn!(label = %label, "label outside the O/B-x/I-x convention");
            }
        }
        Ok(Self { labels, index })
    }

    /// Carrega um `labels.json` (array JSON de strings).
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let labels: Vec<String> = serde_json::from_str(&raw)?;
        Self::new(labels)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Label na posição `index` da saída do tagger.
    pub fn label(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.index.get(label).copied()
    }

    /// Como [`index_of`](Self::index_of), mas com erro para labels desconhecidos.
    pub fn require_index(&self, label: &str) -> Result<usize> {
        self.index_of(label)
            .ok_or_else(|| NerError::UnknownLabel(label.to_string()))
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Tipos de entidade distintos, na ordem em que aparecem.
    pub fn entity_types(&self) -> Vec<String> {
        let mut kinds: Vec<String> = Vec::new();
        for label in &self.labels {
            let kind = Tag::from_label(label).and_then(|t| t.entity_type().map(str::to_string));
            if let Some(kind) = kind {
                if !kinds.contains(&kind) {
                    kinds.push(kind);
                }
            }
        }
        kinds
    }
}

impl TryFrom<Vec<String>> for LabelVocabulary {
    type Error = NerError;

    fn try_from(labels: Vec<String>) -> Result<Self> {
        Self::new(labels)
    }
}

impl From<LabelVocabulary> for Vec<String> {
    fn from(vocab: LabelVocabulary) -> Self {
        vocab.labels
    }
}
