//! # Pipeline NER: Orquestrador com Eventos Observáveis
//!
//! O pipeline coordena os módulos (alinhamento, lotes, tagger, decodificação,
//! extração) e pode emitir eventos a cada passo via um canal Rust (`mpsc`),
//! permitindo que o servidor WebSocket transmita o progresso em tempo real.
//!
//! ```text
//! registros ─► normaliza ─► alinha ─► lote (≤ batch_size) ─► tagger
//!                                                              │
//!   entidades ◄── offsets ◄── BIO ◄── top-N ◄── softmax ◄──────┘
//!                 (por registro, em paralelo)
//! ```
//!
//! ## Erros
//!
//! - Falha de reconstrução de offsets afeta **só o registro** (os demais seguem).
//! - Alinhamento, lote vazio e erros do tagger abortam a chamada inteira.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::align::{Record, SubwordAligner};
use crate::batch::{Batch, BatchBuilder, SentinelIds};
use crate::config::{ModelDirectory, ModelFamily, PipelineConfig};
use crate::corpus;
use crate::decode::{Candidate, DecodedSequence, TagDecoder};
use crate::entities::{extract_entities, Entity, TokenSpan};
use crate::error::{NerError, Result};
use crate::labels::LabelVocabulary;
use crate::lexicon::LexiconTagger;
use crate::tagger::{validate_scores, Tagger, TaggerArchitecture};
use crate::tokenizer::{MarkerConvention, SubwordTokenizer};

/// Saída de um registro: `{ text, named_entities }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// O texto normalizado ao qual os offsets se referem.
    pub text: String,
    pub named_entities: Vec<Entity>,
}

/// Resultado por registro: um erro de offsets não derruba os vizinhos.
pub type RecordResult = std::result::Result<Prediction, NerError>;

/// Forma diagnóstica de um registro: tudo o que o pipeline viu.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedRecord {
    pub text: String,
    /// Sub-palavras mantidas (após truncamento).
    pub tokens: Vec<String>,
    /// Cada sub-palavra ancorada no texto, com o seu label.
    pub token_classes: Vec<TokenSpan>,
    /// Top-N por sub-palavra.
    pub candidates: Vec<Vec<Candidate>>,
    pub named_entities: Vec<Entity>,
}

impl AnnotatedRecord {
    pub fn into_prediction(self) -> Prediction {
        Prediction {
            text: self.text,
            named_entities: self.named_entities,
        }
    }
}

/// Eventos emitidos pelo pipeline durante o processamento.
///
/// Com `parallel_batches` os eventos de lotes diferentes podem chegar
/// intercalados; os índices identificam a origem de cada um.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PipelineEvent {
    /// Lote montado: quantos registros e qual largura efetiva.
    BatchBuilt {
        batch_index: usize,
        records: usize,
        max_length: usize,
    },
    /// O tagger devolveu os scores do lote.
    BatchScored {
        batch_index: usize,
        tagger: String,
    },
    /// Um registro foi anotado com sucesso.
    RecordAnnotated {
        record_index: usize,
        record: AnnotatedRecord,
    },
    /// Os offsets de um registro não puderam ser reconstruídos.
    RecordFailed {
        record_index: usize,
        message: String,
    },
    /// **Conclusão**: todos os lotes processados.
    Done {
        records: usize,
        failed: usize,
        entities: usize,
        processing_ms: u64,
    },
    /// **Falha**: erro que abortou a chamada.
    Error { message: String },
}

type Emit<'a> = dyn Fn(PipelineEvent) + Sync + 'a;

/// O pipeline NER principal.
///
/// # Modos de Uso
/// - **Sync**: [`predict`](Self::predict) e [`annotate`](Self::annotate).
/// - **Streaming**: [`predict_streaming`](Self::predict_streaming) para UIs reativas.
pub struct NerPipeline {
    config: PipelineConfig,
    labels: LabelVocabulary,
    tokenizer: Arc<dyn SubwordTokenizer>,
    tagger: Arc<dyn Tagger + Send + Sync>,
    builder: BatchBuilder,
}

impl NerPipeline {
    pub fn new(
        config: PipelineConfig,
        labels: LabelVocabulary,
        tokenizer: Arc<dyn SubwordTokenizer>,
        tagger: Arc<dyn Tagger + Send + Sync>,
    ) -> Result<Self> {
        config.validate()?;
        let sentinels: SentinelIds = config.sentinels.unwrap_or_else(|| tokenizer.sentinels());
        let builder = BatchBuilder::new(sentinels)
            .with_cap(config.max_length)
            .with_attention_mask(config.architecture == TaggerArchitecture::TokenClassifier);
        Ok(Self {
            config,
            labels,
            tokenizer,
            tagger,
            builder,
        })
    }

    /// Monta o pipeline a partir de um diretório de modelo e de um tagger.
    pub fn from_model_dir(
        dir: &ModelDirectory,
        tagger: Arc<dyn Tagger + Send + Sync>,
    ) -> Result<Self> {
        let (labels, config, tokenizer) = dir.load()?;
        Self::new(config, labels, tokenizer, tagger)
    }

    /// Monta o pipeline com um [`LexiconTagger`] usando o gazetteer do diretório.
    pub fn lexicon_from_model_dir(dir: &ModelDirectory) -> Result<Self> {
        let (labels, config, tokenizer) = dir.load()?;
        let gazetteer = dir.gazetteer()?.ok_or_else(|| {
            NerError::config(format!("{} not found", dir.gazetteer_path().display()))
        })?;
        let tagger = LexiconTagger::new(tokenizer.clone(), labels.clone(), gazetteer);
        Self::new(config, labels, tokenizer, Arc::new(tagger))
    }

    /// Pipeline de demonstração: vocabulário, labels e gazetteer do corpus embutido.
    pub fn demo() -> Result<Self> {
        let tokenizer: Arc<dyn SubwordTokenizer> = Arc::new(corpus::demo_tokenizer()?);
        let labels = corpus::demo_labels()?;
        let tagger =
            LexiconTagger::new(tokenizer.clone(), labels.clone(), corpus::demo_gazetteer());
        let config = PipelineConfig {
            model_family: ModelFamily::Bert,
            ..PipelineConfig::default()
        };
        Self::new(config, labels, tokenizer, Arc::new(tagger))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn labels(&self) -> &LabelVocabulary {
        &self.labels
    }

    pub fn tokenizer(&self) -> &dyn SubwordTokenizer {
        self.tokenizer.as_ref()
    }

    /// Reconhece entidades em cada registro.
    ///
    /// A saída tem um item por registro de entrada, na mesma ordem.
    pub fn predict(&self, records: &[Record], top_n: usize) -> Result<Vec<RecordResult>> {
        let annotated = self.run(records, top_n, &|_| {})?;
        Ok(annotated
            .into_iter()
            .map(|r| r.map(AnnotatedRecord::into_prediction))
            .collect())
    }

    /// Como [`predict`](Self::predict), mas devolvendo a forma diagnóstica.
    pub fn annotate(
        &self,
        records: &[Record],
        top_n: usize,
    ) -> Result<Vec<std::result::Result<AnnotatedRecord, NerError>>> {
        self.run(records, top_n, &|_| {})
    }

    /// Processa os registros emitindo eventos no canal.
    ///
    /// Termina sempre com `Done` ou `Error`.
    pub fn predict_streaming(
        &self,
        records: &[Record],
        top_n: usize,
        tx: mpsc::Sender<PipelineEvent>,
    ) {
        let start = Instant::now();
        let emit = |event: PipelineEvent| {
            // receptor fechado: o cliente foi embora, nada a fazer
            let _ = tx.send(event);
        };
        match self.run(records, top_n, &emit) {
            Ok(results) => {
                let failed = results.iter().filter(|r| r.is_err()).count();
                let entities = results
                    .iter()
                    .flatten()
                    .map(|r| r.named_entities.len())
                    .sum();
                emit(PipelineEvent::Done {
                    records: results.len(),
                    failed,
                    entities,
                    processing_ms: start.elapsed().as_millis() as u64,
                });
            }
            Err(e) => emit(PipelineEvent::Error { message: e.to_string() }),
        }
    }

    fn run(
        &self,
        records: &[Record],
        top_n: usize,
        emit: &Emit<'_>,
    ) -> Result<Vec<std::result::Result<AnnotatedRecord, NerError>>> {
        if records.is_empty() {
            return Err(NerError::EmptyBatch);
        }
        let start = Instant::now();
        let batch_size = self.config.batch_size;
        let chunks: Vec<(usize, &[Record])> = records.chunks(batch_size).enumerate().collect();
        let process = |&(batch_index, chunk): &(usize, &[Record])| {
            self.run_batch(batch_index, batch_index * batch_size, chunk, top_n, emit)
        };

        let per_batch: Vec<Result<Vec<_>>> = if self.config.parallel_batches {
            chunks.par_iter().map(process).collect()
        } else {
            // sequencial: para no primeiro lote com erro
            let mut done = Vec::with_capacity(chunks.len());
            for chunk in &chunks {
                let result = process(chunk);
                let failed = result.is_err();
                done.push(result);
                if failed {
                    break;
                }
            }
            done
        };

        let mut out = Vec::with_capacity(records.len());
        for batch in per_batch {
            out.extend(batch?);
        }
        info!(
            records = records.len(),
            batches = chunks.len(),
            tagger = self.tagger.name(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "prediction finished"
        );
        Ok(out)
    }

    fn run_batch(
        &self,
        batch_index: usize,
        offset: usize,
        chunk: &[Record],
        top_n: usize,
        emit: &Emit<'_>,
    ) -> Result<Vec<std::result::Result<AnnotatedRecord, NerError>>> {
        let normalized: Vec<Record> = chunk.iter().map(Record::normalized).collect();
        let aligner = SubwordAligner::new(self.tokenizer.as_ref(), self.config.zero_subword_policy);
        let sequences = normalized
            .iter()
            .map(|record| aligner.align(record))
            .collect::<Result<Vec<_>>>()?;

        let batch = self.builder.build(&sequences)?;
        emit(PipelineEvent::BatchBuilt {
            batch_index,
            records: batch.records(),
            max_length: batch.max_length,
        });

        let scores = self.tagger.score(&batch)?;
        validate_scores(&scores, &batch, self.labels.len())?;
        emit(PipelineEvent::BatchScored {
            batch_index,
            tagger: self.tagger.name().to_string(),
        });
        debug!(batch_index, records = batch.records(), "batch scored");

        let decoder = TagDecoder::new(&self.labels, top_n);
        let markers = self.tokenizer.markers();
        let results = (0..batch.records())
            .into_par_iter()
            .map(|row| {
                let decoded = decoder.decode_record(&scores, row, batch.kept_len(row));
                let record_index = offset + row;
                let result = annotate_record(&normalized[row].text, &batch, row, decoded, markers);
                match &result {
                    Ok(record) => emit(PipelineEvent::RecordAnnotated {
                        record_index,
                        record: record.clone(),
                    }),
                    Err(e) => {
                        warn!(record_index, error = %e, "record failed");
                        emit(PipelineEvent::RecordFailed {
                            record_index,
                            message: e.to_string(),
                        });
                    }
                }
                result
            })
            .collect();
        Ok(results)
    }

    /// Lotes de treino (com `label_ids`) a partir de registros rotulados.
    ///
    /// Registros de texto livre entram com todas as posições ignoradas.
    pub fn build_training_batches(
        &self,
        records: &[Record],
        batch_size: usize,
    ) -> Result<Vec<Batch>> {
        if records.is_empty() {
            return Err(NerError::EmptyBatch);
        }
        if batch_size == 0 {
            return Err(NerError::config("batch_size must be at least 1"));
        }
        let aligner = SubwordAligner::new(self.tokenizer.as_ref(), self.config.zero_subword_policy);
        records
            .chunks(batch_size)
            .map(|chunk| {
                let sequences = chunk
                    .iter()
                    .map(|record| aligner.align(&record.normalized()))
                    .collect::<Result<Vec<_>>>()?;
                self.builder.build_training(&sequences, &self.labels)
            })
            .collect()
    }
}

fn annotate_record(
    text: &str,
    batch: &Batch,
    row: usize,
    decoded: DecodedSequence,
    markers: &MarkerConvention,
) -> std::result::Result<AnnotatedRecord, NerError> {
    let tokens = batch.sequences[row].subwords.clone();
    let (named_entities, token_classes) =
        extract_entities(text, &tokens, &decoded.labels, markers)?;
    Ok(AnnotatedRecord {
        text: text.to_string(),
        tokens,
        token_classes,
        candidates: decoded.candidates,
        named_entities,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tagger::{ScoreTensor, Tensor3};

    #[test]
    fn test_demo_pipeline_finds_locations() {
        let pipeline = NerPipeline::demo().unwrap();
        let results = pipeline
            .predict(&[Record::free_text("Rio de Janeiro fica no Brasil")], 5)
            .unwrap();
        let prediction = results[0].as_ref().unwrap();
        let found: Vec<(&str, &str)> = prediction
            .named_entities
            .iter()
            .map(|e| (e.label.as_str(), e.text.as_str()))
            .collect();
        assert_eq!(found, vec![("LOC", "Rio de Janeiro"), ("LOC", "Brasil")]);
        assert_eq!(prediction.named_entities[0].span(), [0, 14]);
    }

    #[test]
    fn test_empty_input_is_error() {
        let pipeline = NerPipeline::demo().unwrap();
        assert!(matches!(pipeline.predict(&[], 5), Err(NerError::EmptyBatch)));
    }

    #[test]
    fn test_whitespace_is_normalized() {
        let pipeline = NerPipeline::demo().unwrap();
        let results = pipeline
            .predict(&[Record::free_text("  visitei   São  Paulo ")], 5)
            .unwrap();
        let prediction = results[0].as_ref().unwrap();
        assert_eq!(prediction.text, "visitei São Paulo");
        assert_eq!(prediction.named_entities[0].span(), [8, 17]);
        assert_eq!(prediction.named_entities[0].text, "São Paulo");
    }

    #[test]
    fn test_streaming_ends_with_done() {
        let pipeline = NerPipeline::demo().unwrap();
        let (tx, rx) = mpsc::channel();
        let records = vec![
            Record::free_text("A Petrobras fica no Rio de Janeiro"),
            Record::free_text("nada aqui"),
        ];
        pipeline.predict_streaming(&records, 3, tx);
        let events: Vec<PipelineEvent> = rx.iter().collect();
        assert!(matches!(events.first(), Some(PipelineEvent::BatchBuilt { records: 2, .. })));
        let annotated = events
            .iter()
            .filter(|e| matches!(e, PipelineEvent::RecordAnnotated { .. }))
            .count();
        assert_eq!(annotated, 2);
        match events.last() {
            Some(PipelineEvent::Done { records, failed, entities, .. }) => {
                assert_eq!((*records, *failed, *entities), (2, 0, 2));
            }
            other => panic!("unexpected last event: {other:?}"),
        }
    }

    #[test]
    fn test_streaming_reports_errors() {
        let pipeline = NerPipeline::demo().unwrap();
        let (tx, rx) = mpsc::channel();
        pipeline.predict_streaming(&[], 3, tx);
        let events: Vec<PipelineEvent> = rx.iter().collect();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], PipelineEvent::Error { .. }));
    }

    struct WrongShape;

    impl Tagger for WrongShape {
        fn score(&self, batch: &Batch) -> Result<ScoreTensor> {
            Ok(Tensor3::zeros(batch.records(), batch.width(), 1))
        }
    }

    #[test]
    fn test_tagger_shape_mismatch_aborts() {
        let demo = NerPipeline::demo().unwrap();
        let pipeline = NerPipeline::new(
            demo.config().clone(),
            demo.labels().clone(),
            demo.tokenizer.clone(),
            Arc::new(WrongShape),
        )
        .unwrap();
        let err = pipeline.predict(&[Record::free_text("Brasil")], 5).unwrap_err();
        assert!(matches!(err, NerError::Tagger(_)));
    }

    #[test]
    fn test_training_batches_carry_labels() {
        let pipeline = NerPipeline::demo().unwrap();
        let records = vec![
            Record::labeled(vec!["Brasil".into(), "é".into()], vec!["B-LOC".into(), "O".into()]),
            Record::free_text("Brasil"),
            Record::labeled(vec!["Petrobras".into()], vec!["B-ORG".into()]),
        ];
        let batches = pipeline.build_training_batches(&records, 2).unwrap();
        assert_eq!(batches.len(), 2);
        let label_ids = batches[0].label_ids.as_ref().unwrap();
        let b_loc = pipeline.labels().index_of("B-LOC").unwrap() as i64;
        assert_eq!(label_ids[0][1], b_loc);
        assert!(label_ids[1].iter().all(|&id| id == crate::batch::IGNORE_INDEX));
    }
}
