//! # Erros do Pipeline
//!
//! Todos os estágios retornam [`Result`], com um único enum de erro para o crate.
//!
//! | Variante             | Quando ocorre                                   | Escopo           |
//! |----------------------|-------------------------------------------------|------------------|
//! | `Alignment`          | palavras/labels de tamanhos diferentes          | aborta a chamada |
//! | `EmptyBatch`         | nenhum registro para montar o lote              | aborta a chamada |
//! | `SpanReconstruction` | cursor passou do fim (texto e tokens divergem)  | só o registro    |
//! | `Tagger`             | saída do modelo com formato inesperado          | aborta a chamada |
//!
//! Tags malformadas (fora da convenção `O`/`B-x`/`I-x`) **não** são erro: o
//! decodificador BIO as trata como início de entidade.

use thiserror::Error;

/// Resultado padrão do crate.
pub type Result<T> = std::result::Result<T, NerError>;

/// Erro do pipeline de alinhamento e decodificação.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum NerError {
    /// Palavras e labels não se alinham (tamanhos diferentes ou run de
    /// sub-palavras inconsistente).
    #[error("alignment error: {0}")]
    Alignment(String),

    /// Tentativa de montar um lote sem nenhuma sequência.
    #[error("cannot build a batch from zero sequences")]
    EmptyBatch,

    /// O cursor de caracteres passou do fim do texto.
    #[error(
        "token {token_index} ({token:?}) overruns the text: {cursor} + {visible_len} > {text_len}"
    )]
    SpanReconstruction {
        token_index: usize,
        token: String,
        cursor: usize,
        visible_len: usize,
        text_len: usize,
    },

    /// Vocabulário de labels inválido (vazio, duplicado...).
    #[error("invalid label vocabulary: {0}")]
    InvalidVocabulary(String),

    /// Label de treino que não existe no vocabulário.
    #[error("label {0:?} is not in the label vocabulary")]
    UnknownLabel(String),

    /// Falha do tagger externo ou saída com formato incompatível.
    #[error("tagger error: {0}")]
    Tagger(String),

    /// Configuração inválida.
    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl NerError {
    pub fn alignment(msg: impl Into<String>) -> Self {
        NerError::Alignment(msg.into())
    }

    pub fn tagger(msg: impl Into<String>) -> Self {
        NerError::Tagger(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        NerError::Config(msg.into())
    }

    /// Erros que afetam apenas um registro; o restante do lote continua.
    pub fn is_record_local(&self) -> bool {
        matches!(self, NerError::SpanReconstruction { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_span_errors_are_record_local() {
        let span = NerError::SpanReconstruction {
            token_index: 2,
            token: "##x".into(),
            cursor: 4,
            visible_len: 1,
            text_len: 4,
        };
        assert!(span.is_record_local());
        assert!(!NerError::EmptyBatch.is_record_local());
        assert!(!NerError::alignment("x").is_record_local());
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            NerError::UnknownLabel("B-FOO".into()).to_string(),
            "label \"B-FOO\" is not in the label vocabulary"
        );
        assert!(NerError::EmptyBatch.to_string().contains("zero sequences"));
    }
}
