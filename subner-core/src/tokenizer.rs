//! # Tokenizadores de Sub-palavras
//!
//! O pipeline não depende de um algoritmo de tokenização específico: ele só
//! precisa do contrato [`SubwordTokenizer`], que devolve ids (com os sentinelas
//! do próprio tokenizador), converte ids em strings e expõe as **convenções de
//! marcadores** usadas para reconstruir offsets de caracteres depois.
//!
//! ## Convenções de Marcadores
//!
//! - **WordPiece** (BERT): sub-palavras de continuação começam com `##`
//!   ("playing" → "play", "##ing"). Nunca há espaço antes de um `##`.
//! - **SentencePiece** (XLM-R): sub-palavras que iniciam uma palavra começam
//!   com `▁` ("New York" → "▁New", "▁York"). O `▁` pode "consumir" o espaço.
//!
//! ## Implementações
//!
//! Duas implementações leves, guiadas por vocabulário (um token por linha):
//! - [`WordPieceTokenizer`]: pré-tokeniza por fronteiras de palavra Unicode e
//!   aplica *greedy longest-match-first*.
//! - [`SentencePieceTokenizer`]: separa por espaços, prefixa `▁` e aplica
//!   *greedy longest-match*.
//!
//! ## Exemplo de Uso
//!
//! ```rust
//! use subner_core::tokenizer::{SubwordTokenizer, WordPieceTokenizer};
//!
//! let vocab = ["[PAD]", "[UNK]", "[CLS]", "[SEP]", "play", "##ing", "New"];
//! let tokenizer = WordPieceTokenizer::new(vocab.iter().map(|s| s.to_string()).collect()).unwrap();
//!
//! let ids = tokenizer.encode("New playing");
//! let tokens = tokenizer.convert_ids_to_tokens(&ids);
//! assert_eq!(tokens, vec!["[CLS]", "New", "play", "##ing", "[SEP]"]);
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

use crate::batch::SentinelIds;
use crate::error::{NerError, Result};

/// Palavras com mais caracteres que isso viram um único token desconhecido.
const MAX_CHARS_PER_WORD: usize = 100;

/// Quanto texto um token desconhecido cobre na reconstrução de offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownExtent {
    /// O segmento de palavra (UAX #29) no cursor: a mesma unidade que o
    /// WordPiece transforma em um único desconhecido.
    WordSegment,
    /// Tudo até o próximo espaço em branco.
    UntilWhitespace,
}

/// Convenções de marcadores de um tokenizador carregado.
///
/// Configurável por instância: modelos com vocabulários exóticos podem usar
/// outros prefixos.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerConvention {
    /// Prefixo de sub-palavra de continuação (ex: `##`).
    pub continuation: Option<String>,
    /// Prefixo de início de palavra (ex: `▁`).
    pub word_start: Option<String>,
    /// String do token desconhecido (ex: `[UNK]`).
    pub unknown: Option<String>,
    pub unknown_extent: UnknownExtent,
}

impl MarkerConvention {
    /// Convenção WordPiece (BERT).
    pub fn word_piece() -> Self {
        Self {
            continuation: Some("##".to_string()),
            word_start: None,
            unknown: Some("[UNK]".to_string()),
            unknown_extent: UnknownExtent::WordSegment,
        }
    }

    /// Convenção SentencePiece (XLM-R).
    pub fn sentence_piece() -> Self {
        Self {
            continuation: None,
            word_start: Some("\u{2581}".to_string()),
            unknown: Some("<unk>".to_string()),
            unknown_extent: UnknownExtent::UntilWhitespace,
        }
    }

    /// Texto visível de um token: sem o marcador de continuação ou de início de palavra.
    pub fn visible_text<'a>(&self, token: &'a str) -> &'a str {
        if let Some(rest) = self.continuation.as_deref().and_then(|m| token.strip_prefix(m)) {
            return rest;
        }
        if let Some(rest) = self.word_start.as_deref().and_then(|m| token.strip_prefix(m)) {
            return rest;
        }
        token
    }

    pub fn is_continuation(&self, token: &str) -> bool {
        self.continuation
            .as_deref()
            .is_some_and(|m| token.starts_with(m))
    }

    pub fn is_word_start(&self, token: &str) -> bool {
        self.word_start.as_deref().is_some_and(|m| token.starts_with(m))
    }

    pub fn is_unknown(&self, token: &str) -> bool {
        self.unknown.as_deref() == Some(token)
    }

    /// Se `token` começa uma nova palavra (e portanto é precedido por espaço no texto).
    ///
    /// Com a convenção `##`, qualquer token sem o marcador inicia palavra; com a
    /// convenção `▁`, apenas os que carregam o marcador.
    pub fn starts_word(&self, token: &str) -> bool {
        if self.continuation.is_some() {
            !self.is_continuation(token)
        } else {
            self.is_word_start(token)
        }
    }
}

/// Contrato do tokenizador de sub-palavras externo.
pub trait SubwordTokenizer: Send + Sync {
    /// Codifica o texto em ids, **incluindo** os sentinelas do próprio tokenizador.
    fn encode(&self, text: &str) -> Vec<u32>;

    fn convert_ids_to_tokens(&self, ids: &[u32]) -> Vec<String>;

    fn markers(&self) -> &MarkerConvention;

    /// Ids de START/END/PAD do vocabulário.
    fn sentinels(&self) -> SentinelIds;

    /// Como [`encode`](Self::encode), mas sem o START inicial e o END final.
    fn encode_without_sentinels(&self, text: &str) -> Vec<u32> {
        let sentinels = self.sentinels();
        let mut ids = self.encode(text);
        if ids.last() == Some(&sentinels.end) {
            ids.pop();
        }
        if ids.first() == Some(&sentinels.start) {
            ids.remove(0);
        }
        ids
    }

    /// Reconstrói texto legível a partir de ids (ignora sentinelas).
    fn decode(&self, ids: &[u32]) -> String {
        let sentinels = self.sentinels();
        let kept: Vec<u32> = ids
            .iter()
            .copied()
            .filter(|id| *id != sentinels.start && *id != sentinels.end && *id != sentinels.pad)
            .collect();
        let markers = self.markers();
        let mut out = String::new();
        for token in self.convert_ids_to_tokens(&kept) {
            if markers.starts_word(&token) && !out.is_empty() {
                out.push(' ');
            }
            out.push_str(markers.visible_text(&token));
        }
        out
    }
}

/// Vocabulário de sub-palavras: token ↔ id (id = número da linha).
#[derive(Debug, Clone)]
struct SubwordVocab {
    tokens: Vec<String>,
    ids: HashMap<String, u32>,
}

impl SubwordVocab {
    fn new(tokens: Vec<String>) -> Result<Self> {
        let mut ids = HashMap::with_capacity(tokens.len());
        for (i, token) in tokens.iter().enumerate() {
            let id = u32::try_from(i)
                .map_err(|_| NerError::config("subword vocabulary too large"))?;
            // primeira ocorrência vence, como nos vocab.txt do HuggingFace
            ids.entry(token.clone()).or_insert(id);
        }
        Ok(Self { tokens, ids })
    }

    fn id(&self, token: &str) -> Option<u32> {
        self.ids.get(token).copied()
    }

    fn require(&self, token: &str) -> Result<u32> {
        self.id(token).ok_or_else(|| {
            NerError::config(format!("special token {token:?} missing from vocabulary"))
        })
    }

    fn token(&self, id: u32) -> Option<&str> {
        self.tokens.get(id as usize).map(String::as_str)
    }
}

/// Lê um arquivo de vocabulário (um token por linha, sem linhas finais vazias).
pub fn read_vocab_file(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(raw
        .lines()
        .map(|line| line.trim_end_matches('\r').to_string())
        .collect())
}

/// Limites de caracteres (em bytes) de `s`, incluindo `s.len()`.
fn char_boundaries(s: &str) -> Vec<usize> {
    s.char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(s.len()))
        .collect()
}

/// Tokenizador WordPiece (convenção `##`).
#[derive(Debug, Clone)]
pub struct WordPieceTokenizer {
    vocab: SubwordVocab,
    markers: MarkerConvention,
    sentinels: SentinelIds,
    unk: u32,
}

impl WordPieceTokenizer {
    /// Cria o tokenizador; o vocabulário precisa conter `[CLS]`, `[SEP]`, `[PAD]` e `[UNK]`.
    pub fn new(tokens: Vec<String>) -> Result<Self> {
        let vocab = SubwordVocab::new(tokens)?;
        let sentinels = SentinelIds {
            start: vocab.require("[CLS]")?,
            end: vocab.require("[SEP]")?,
            pad: vocab.require("[PAD]")?,
        };
        let unk = vocab.require("[UNK]")?;
        Ok(Self {
            vocab,
            markers: MarkerConvention::word_piece(),
            sentinels,
            unk,
        })
    }

    pub fn from_vocab_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(read_vocab_file(path)?)
    }

    /// Substitui a convenção de marcadores (ex: vocabulário com outro prefixo).
    pub fn with_markers(mut self, markers: MarkerConvention) -> Self {
        self.markers = markers;
        self
    }

    /// Greedy longest-match-first de uma palavra já pré-tokenizada.
    fn tokenize_word(&self, word: &str, out: &mut Vec<u32>) {
        let bounds = char_boundaries(word);
        let n_chars = bounds.len() - 1;
        if n_chars > MAX_CHARS_PER_WORD {
            out.push(self.unk);
            return;
        }
        let prefix = self.markers.continuation.as_deref().unwrap_or("");
        let mut pieces = Vec::new();
        let mut start = 0;
        while start < n_chars {
            let mut found = None;
            let mut end = n_chars;
            while end > start {
                let sub = &word[bounds[start]..bounds[end]];
                let id = if start > 0 {
                    self.vocab.id(&format!("{prefix}{sub}"))
                } else {
                    self.vocab.id(sub)
                };
                if let Some(id) = id {
                    found = Some(id);
                    break;
                }
                end -= 1;
            }
            match found {
                Some(id) => {
                    pieces.push(id);
                    start = end;
                }
                None => {
                    // uma peça sem match invalida a palavra inteira
                    out.push(self.unk);
                    return;
                }
            }
        }
        out.extend(pieces);
    }
}

impl SubwordTokenizer for WordPieceTokenizer {
    fn encode(&self, text: &str) -> Vec<u32> {
        let mut ids = vec![self.sentinels.start];
        for word in text.split_word_bounds().filter(|w| !w.trim().is_empty()) {
            self.tokenize_word(word, &mut ids);
        }
        ids.push(self.sentinels.end);
        ids
    }

    fn convert_ids_to_tokens(&self, ids: &[u32]) -> Vec<String> {
        ids.iter()
            .map(|id| self.vocab.token(*id).unwrap_or("[UNK]").to_string())
            .collect()
    }

    fn markers(&self) -> &MarkerConvention {
        &self.markers
    }

    fn sentinels(&self) -> SentinelIds {
        self.sentinels
    }
}

/// Tokenizador estilo SentencePiece (convenção `▁`).
#[derive(Debug, Clone)]
pub struct SentencePieceTokenizer {
    vocab: SubwordVocab,
    markers: MarkerConvention,
    sentinels: SentinelIds,
    unk: u32,
}

impl SentencePieceTokenizer {
    /// Cria o tokenizador; o vocabulário precisa conter `<s>`, `</s>`, `<pad>` e `<unk>`.
    pub fn new(tokens: Vec<String>) -> Result<Self> {
        let vocab = SubwordVocab::new(tokens)?;
        let sentinels = SentinelIds {
            start: vocab.require("<s>")?,
            end: vocab.require("</s>")?,
            pad: vocab.require("<pad>")?,
        };
        let unk = vocab.require("<unk>")?;
        Ok(Self {
            vocab,
            markers: MarkerConvention::sentence_piece(),
            sentinels,
            unk,
        })
    }

    pub fn from_vocab_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(read_vocab_file(path)?)
    }

    pub fn with_markers(mut self, markers: MarkerConvention) -> Self {
        self.markers = markers;
        self
    }

    fn tokenize_word(&self, word: &str, out: &mut Vec<u32>) {
        let marker = self.markers.word_start.as_deref().unwrap_or("");
        let piece = format!("{marker}{word}");
        let bounds = char_boundaries(&piece);
        let n_chars = bounds.len() - 1;
        let mut start = 0;
        while start < n_chars {
            let mut matched = None;
            let mut end = n_chars;
            while end > start {
                if let Some(id) = self.vocab.id(&piece[bounds[start]..bounds[end]]) {
                    matched = Some((id, end));
                    break;
                }
                end -= 1;
            }
            match matched {
                Some((id, end)) => {
                    out.push(id);
                    start = end;
                }
                None => {
                    // o resto da palavra vira um único desconhecido
                    out.push(self.unk);
                    return;
                }
            }
        }
    }
}

impl SubwordTokenizer for SentencePieceTokenizer {
    fn encode(&self, text: &str) -> Vec<u32> {
        let mut ids = vec![self.sentinels.start];
        for word in text.split_whitespace() {
            self.tokenize_word(word, &mut ids);
        }
        ids.push(self.sentinels.end);
        ids
    }

    fn convert_ids_to_tokens(&self, ids: &[u32]) -> Vec<String> {
        ids.iter()
            .map(|id| self.vocab.token(*id).unwrap_or("<unk>").to_string())
            .collect()
    }

    fn markers(&self) -> &MarkerConvention {
        &self.markers
    }

    fn sentinels(&self) -> SentinelIds {
        self.sentinels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn word_piece() -> WordPieceTokenizer {
        WordPieceTokenizer::new(strings(&[
            "[PAD]", "[UNK]", "[CLS]", "[SEP]", "New", "York", "is", "big", "play", "##ing",
            "##s", "Ann", "##a", ".",
        ]))
        .unwrap()
    }

    fn sentence_piece() -> SentencePieceTokenizer {
        SentencePieceTokenizer::new(strings(&[
            "<s>", "<pad>", "</s>", "<unk>", "\u{2581}New", "\u{2581}York", "\u{2581}Yo", "rk",
            "\u{2581}", "\u{2581}is", "big", ".",
        ]))
        .unwrap()
    }

    #[test]
    fn test_word_piece_greedy_longest_match() {
        let tok = word_piece();
        let ids = tok.encode_without_sentinels("New playings.");
        assert_eq!(
            tok.convert_ids_to_tokens(&ids),
            vec!["New", "play", "##ing", "##s", "."]
        );
    }

    #[test]
    fn test_word_piece_sentinels_come_from_vocab() {
        let tok = word_piece();
        assert_eq!(tok.sentinels(), SentinelIds { start: 2, end: 3, pad: 0 });
        let ids = tok.encode("is");
        assert_eq!(ids.first(), Some(&2));
        assert_eq!(ids.last(), Some(&3));
    }

    #[test]
    fn test_word_piece_unknown_word_is_single_unk() {
        let tok = word_piece();
        let ids = tok.encode_without_sentinels("Zyx is");
        assert_eq!(tok.convert_ids_to_tokens(&ids), vec!["[UNK]", "is"]);
    }

    #[test]
    fn test_word_piece_missing_specials() {
        assert!(matches!(
            WordPieceTokenizer::new(strings(&["[PAD]", "a"])),
            Err(NerError::Config(_))
        ));
    }

    #[test]
    fn test_sentence_piece_word_start_marker() {
        let tok = sentence_piece();
        let ids = tok.encode_without_sentinels("New York is big.");
        assert_eq!(
            tok.convert_ids_to_tokens(&ids),
            vec!["\u{2581}New", "\u{2581}York", "\u{2581}is", "\u{2581}", "big", "."]
        );
    }

    #[test]
    fn test_sentence_piece_unknown_remainder() {
        let tok = sentence_piece();
        let ids = tok.encode_without_sentinels("Newzz");
        assert_eq!(tok.convert_ids_to_tokens(&ids), vec!["\u{2581}New", "<unk>"]);
    }

    #[test]
    fn test_decode_respects_markers() {
        let wp = word_piece();
        assert_eq!(wp.decode(&wp.encode("New playing")), "New playing");
        let sp = sentence_piece();
        assert_eq!(sp.decode(&sp.encode("New York big.")), "New York big.");
    }

    #[test]
    fn test_visible_text() {
        let wp = MarkerConvention::word_piece();
        assert_eq!(wp.visible_text("##ing"), "ing");
        assert_eq!(wp.visible_text("play"), "play");
        let sp = MarkerConvention::sentence_piece();
        assert_eq!(sp.visible_text("\u{2581}New"), "New");
        assert_eq!(sp.visible_text("\u{2581}"), "");
        assert!(sp.starts_word("\u{2581}is"));
        assert!(!sp.starts_word("rk"));
    }

    #[test]
    fn test_read_vocab_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vocab.txt");
        std::fs::write(&path, "[PAD]\r\n[UNK]\n[CLS]\n[SEP]\nola\n").unwrap();
        let tok = WordPieceTokenizer::from_vocab_file(&path).unwrap();
        let ids = tok.encode_without_sentinels("ola");
        assert_eq!(ids, vec![4]);
    }
}
