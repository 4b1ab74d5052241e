//! # subner-core: Reconhecimento de Entidades sobre Sub-palavras
//!
//! Este crate implementa a parte "em volta" de um modelo de rotulagem de sequência
//! sobre sub-palavras (WordPiece / SentencePiece): tudo o que acontece antes e
//! depois do tagger neural, que é fornecido pelo chamador.
//!
//! ## Arquitetura do Sistema
//!
//! 1.  **Entrada**: registros de texto livre ou palavras já rotuladas ([`align::Record`]).
//! 2.  **Alinhamento** ([`align`]): palavras → sub-palavras, propagando labels BIO.
//! 3.  **Lotes** ([`batch`]): linhas retangulares com START/END/PAD e máscaras.
//! 4.  **Tagger** ([`tagger`]): contrato `lote → logits`; o [`lexicon`] oferece um
//!     tagger de gazetteers para demonstração.
//! 5.  **Decodificação** ([`decode`]): softmax, top-N e remoção dos sentinelas.
//! 6.  **Entidades** ([`entities`]): máquina de estados BIO e offsets de caractere.
//! 7.  **Saída**: [`Prediction`] com `{ text, named_entities }` por registro.
//!
//! ## Exemplo de Uso
//!
//! ```rust
//! use subner_core::{NerPipeline, Record};
//!
//! let pipeline = NerPipeline::demo().unwrap();
//! let results = pipeline
//!     .predict(&[Record::free_text("Machado de Assis viveu no Rio de Janeiro")], 3)
//!     .unwrap();
//!
//! for entity in &results[0].as_ref().unwrap().named_entities {
//!     println!("{} ({}) em {:?}", entity.text, entity.label, entity.span());
//! }
//! ```
//!
//! ## Módulos Principais
//!
//! - [`pipeline`]: orquestrador, com modo síncrono e modo com eventos (`mpsc`).
//! - [`config`]: `param.json` e o layout do diretório de modelo.
//! - [`corpus`]: corpus anotado (BIO) e os artefatos do modelo de demonstração.

pub mod align;
pub mod batch;
pub mod config;
pub mod corpus;
pub mod decode;
pub mod entities;
pub mod error;
pub mod labels;
pub mod lexicon;
pub mod pipeline;
pub mod tagger;
pub mod tokenizer;
pub mod training;

pub use align::{Record, RecordContent, SubwordAligner, SubwordSequence, ZeroSubwordPolicy};
pub use batch::{Batch, BatchBuilder, SentinelIds};
pub use config::{ModelDirectory, ModelFamily, PipelineConfig};
pub use decode::{Candidate, TagDecoder};
pub use entities::{Entity, TokenSpan};
pub use error::{NerError, Result};
pub use labels::{LabelVocabulary, Tag};
pub use lexicon::{Gazetteer, LexiconTagger};
pub use pipeline::{AnnotatedRecord, NerPipeline, PipelineEvent, Prediction, RecordResult};
pub use tagger::{ScoreTensor, Tagger, TaggerArchitecture, Tensor3};
pub use tokenizer::{MarkerConvention, SentencePieceTokenizer, SubwordTokenizer, WordPieceTokenizer};
