//! # Extração de Entidades e Reconstrução de Offsets
//!
//! Duas etapas independentes que juntas levam labels de sub-palavras de volta
//! para trechos exatos do texto original.
//!
//! ## Etapa A: Máquina de estados BIO
//!
//! Estados `FORA` e `DENTRO(tipo)`, começando em `FORA`:
//!
//! | Estado        | Label lido       | Ação                                          |
//! |---------------|------------------|-----------------------------------------------|
//! | qualquer      | `O`              | fecha a entidade aberta (em i-1), vai p/ FORA |
//! | FORA          | `B-x` ou `I-x`   | abre DENTRO(x) em i (`I-` inicial é tolerado) |
//! | DENTRO(x)     | `I-x`            | estende                                       |
//! | DENTRO(x)     | `B-x` ou `?-y`   | fecha em i-1 e abre uma nova em i             |
//! | fim da seq.   |                  | fecha no último índice                        |
//!
//! Um `B-` **sempre** inicia uma nova entidade: `[B-PER, B-PER]` são duas pessoas.
//! Labels malformados (ex: "PER") são tratados como início de uma entidade cujo
//! tipo é o label inteiro.
//!
//! ## Etapa B: Cursor de caracteres
//!
//! Um único cursor anda pelo texto, sempre para frente, em sincronia com os tokens:
//!
//! ```text
//! texto:   N e w _ Y o r k _ i s
//! índice:  0 1 2 3 4 5 6 7 8 9 10
//! tokens:  "New" → [0,3)   "York" → [4,8)   "is" → [9,11)
//! ```
//!
//! Para cada token: remove o marcador (`##`/`▁`), pula espaços, registra
//! `[cursor, cursor + tamanho_visível)` e avança. Os offsets são índices de
//! **caracteres** (não bytes).
//!
//! O token desconhecido não tem texto visível; ele cobre a mesma unidade que o
//! tokenizador trocou por ele (ver [`UnknownExtent`]):
//!
//! - WordPiece: o segmento de palavra UAX #29 no cursor (`d'água`, `3.14`,
//!   `café` com acento combinante, emoji com modificador de tom).
//! - SentencePiece: o resto da palavra até o próximo espaço.
//!
//! **Exceção à ordem estrita:** um `▁` isolado (o SentencePiece emite o
//! marcador sozinho quando `▁palavra` não está no vocabulário) tem largura
//! zero e começa no mesmo caractere que o token seguinte. Os spans continuam
//! sem sobreposição; só os spans não vazios são estritamente crescentes.

use serde::{Deserialize, Serialize};
use tracing::debug;
use unicode_segmentation::UnicodeSegmentation;

use crate::error::{NerError, Result};
use crate::labels::Tag;
use crate::tokenizer::{MarkerConvention, UnknownExtent};

/// Intervalo de sub-palavras de uma entidade (índices inclusivos).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BioInterval {
    pub label: String,
    pub start: usize,
    pub end: usize,
}

/// Uma sub-palavra ancorada no texto.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSpan {
    pub token: String,
    pub char_start: usize,
    /// Exclusivo.
    pub char_end: usize,
    pub label: String,
}

/// Entidade final, ancorada no texto.
///
/// Em JSON: `{"label": "LOC", "text": "New York", "span": [0, 8]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "EntityJson", from = "EntityJson")]
pub struct Entity {
    pub label: String,
    pub char_start: usize,
    /// Exclusivo.
    pub char_end: usize,
    pub text: String,
}

#[derive(Serialize, Deserialize)]
struct EntityJson {
    label: String,
    text: String,
    span: [usize; 2],
}

impl From<Entity> for EntityJson {
    fn from(e: Entity) -> Self {
        EntityJson { span: [e.char_start, e.char_end], label: e.label, text: e.text }
    }
}

impl From<EntityJson> for Entity {
    fn from(e: EntityJson) -> Self {
        Entity { label: e.label, char_start: e.span[0], char_end: e.span[1], text: e.text }
    }
}

impl Entity {
    /// O par `[início, fim)` como no formato JSON de saída.
    pub fn span(&self) -> [usize; 2] {
        [self.char_start, self.char_end]
    }
}

/// Como um label é interpretado pela máquina de estados.
enum Reading<'a> {
    Outside,
    Begin(&'a str),
    Inside(&'a str),
}

fn read_label(label: &str) -> Reading<'_> {
    match Tag::from_label(label) {
        Some(Tag::Outside) => Reading::Outside,
        Some(_) => {
            // B-x / I-x: o tipo é tudo depois do primeiro '-'
            let kind = &label[2..];
            if label.starts_with('B') {
                Reading::Begin(kind)
            } else {
                Reading::Inside(kind)
            }
        }
        None => {
            debug!(label = %label, "malformed tag, treating it as a begin tag");
            Reading::Begin(label)
        }
    }
}

/// Etapa A: agrupa uma sequência de labels BIO em intervalos de entidade.
pub fn collect_bio_intervals<S: AsRef<str>>(labels: &[S]) -> Vec<BioInterval> {
    let mut intervals = Vec::new();
    let mut open: Option<(&str, usize)> = None;

    for (i, label) in labels.iter().enumerate() {
        match read_label(label.as_ref()) {
            Reading::Outside => {
                if let Some((kind, start)) = open.take() {
                    intervals.push(BioInterval { label: kind.to_string(), start, end: i - 1 });
                }
            }
            Reading::Inside(kind) if open.is_some_and(|(current, _)| current == kind) => {}
            Reading::Begin(kind) | Reading::Inside(kind) => {
                if let Some((current, start)) = open.take() {
                    intervals.push(BioInterval { label: current.to_string(), start, end: i - 1 });
                }
                open = Some((kind, i));
            }
        }
    }
    if let Some((kind, start)) = open {
        intervals.push(BioInterval {
            label: kind.to_string(),
            start,
            end: labels.len() - 1,
        });
    }
    intervals
}

/// Quantos caracteres do texto um token cobre a partir do cursor.
fn visible_len(token: &str, markers: &MarkerConvention, rest: &[char]) -> usize {
    if markers.is_unknown(token) {
        let extent = match markers.unknown_extent {
            UnknownExtent::WordSegment => {
                let word: String = rest.iter().take_while(|c| !c.is_whitespace()).collect();
                word.split_word_bounds().next().map_or(0, |segment| segment.chars().count())
            }
            UnknownExtent::UntilWhitespace => {
                rest.iter().take_while(|c| !c.is_whitespace()).count()
            }
        };
        return extent.max(1);
    }
    markers.visible_text(token).chars().count()
}

/// Etapa B: ancora cada token no texto com um cursor que só anda para frente.
///
/// `labels` pode ser menor que `tokens` (posições sem label recebem "O").
pub fn reconstruct_token_spans<S: AsRef<str>>(
    text: &str,
    tokens: &[S],
    labels: &[S],
    markers: &MarkerConvention,
) -> Result<Vec<TokenSpan>> {
    let chars: Vec<char> = text.chars().collect();
    let mut cursor = 0;
    let mut spans = Vec::with_capacity(tokens.len());

    for (i, token) in tokens.iter().enumerate() {
        let token = token.as_ref();
        while cursor < chars.len() && chars[cursor].is_whitespace() {
            cursor += 1;
        }
        let len = visible_len(token, markers, &chars[cursor..]);
        if cursor + len > chars.len() {
            return Err(NerError::SpanReconstruction {
                token_index: i,
                token: token.to_string(),
                cursor,
                visible_len: len,
                text_len: chars.len(),
            });
        }
        spans.push(TokenSpan {
            token: token.to_string(),
            char_start: cursor,
            char_end: cursor + len,
            label: labels.get(i).map_or("O", |l| l.as_ref()).to_string(),
        });
        cursor += len;
    }
    Ok(spans)
}

/// Fatia `[start, end)` em índices de caractere.
pub fn char_slice(text: &str, start: usize, end: usize) -> String {
    text.chars().skip(start).take(end.saturating_sub(start)).collect()
}

/// Converte intervalos BIO em entidades usando os spans dos tokens.
pub fn intervals_to_entities(
    text: &str,
    intervals: &[BioInterval],
    spans: &[TokenSpan],
) -> Vec<Entity> {
    intervals
        .iter()
        .filter_map(|interval| {
            let first = spans.get(interval.start)?;
            let last = spans.get(interval.end)?;
            Some(Entity {
                label: interval.label.clone(),
                char_start: first.char_start,
                char_end: last.char_end,
                text: char_slice(text, first.char_start, last.char_end),
            })
        })
        .collect()
}

/// Etapas A + B: entidades de um registro e os spans de cada token.
pub fn extract_entities<S: AsRef<str>>(
    text: &str,
    tokens: &[S],
    labels: &[S],
    markers: &MarkerConvention,
) -> Result<(Vec<Entity>, Vec<TokenSpan>)> {
    let spans = reconstruct_token_spans(text, tokens, labels, markers)?;
    let intervals = collect_bio_intervals(labels);
    Ok((intervals_to_entities(text, &intervals, &spans), spans))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interval(label: &str, start: usize, end: usize) -> BioInterval {
        BioInterval { label: label.into(), start, end }
    }

    #[test]
    fn test_bio_basic() {
        let labels = ["B-PER", "I-PER", "O", "B-LOC"];
        assert_eq!(
            collect_bio_intervals(&labels),
            vec![interval("PER", 0, 1), interval("LOC", 3, 3)]
        );
    }

    #[test]
    fn test_repeated_begin_never_merges() {
        let labels = ["B-PER", "B-PER", "O"];
        assert_eq!(
            collect_bio_intervals(&labels),
            vec![interval("PER", 0, 0), interval("PER", 1, 1)]
        );
    }

    #[test]
    fn test_leading_inside_and_type_change() {
        let labels = ["I-ORG", "I-ORG", "I-LOC", "B-LOC", "I-LOC"];
        assert_eq!(
            collect_bio_intervals(&labels),
            vec![interval("ORG", 0, 1), interval("LOC", 2, 2), interval("LOC", 3, 4)]
        );
    }

    #[test]
    fn test_malformed_tag_treated_as_begin() {
        let labels = ["B-PER", "PER", "PER", "O"];
        assert_eq!(
            collect_bio_intervals(&labels),
            vec![interval("PER", 0, 0), interval("PER", 1, 1), interval("PER", 2, 2)]
        );
    }

    #[test]
    fn test_bio_decode_is_idempotent() {
        let labels = ["O", "B-MISC", "I-MISC", "I-PER", "O", "I-LOC"];
        assert_eq!(collect_bio_intervals(&labels), collect_bio_intervals(&labels));
        let empty: [&str; 0] = [];
        assert!(collect_bio_intervals(&empty).is_empty());
    }

    #[test]
    fn test_new_york_scenario() {
        let text = "New York is big";
        let tokens = ["New", "York", "is", "big"];
        let labels = ["B-LOC", "I-LOC", "O", "O"];
        let markers = MarkerConvention::word_piece();
        let (entities, _) = extract_entities(text, &tokens, &labels, &markers).unwrap();
        let expected = Entity {
            label: "LOC".into(),
            char_start: 0,
            char_end: 8,
            text: "New York".into(),
        };
        assert_eq!(entities, vec![expected]);
        assert_eq!(entities[0].span(), [0, 8]);
    }

    #[test]
    fn test_two_persons_scenario() {
        let text = "Anna Lee.";
        let tokens = ["Anna", "Lee", "."];
        let labels = ["B-PER", "B-PER", "O"];
        let markers = MarkerConvention::word_piece();
        let (entities, spans) = extract_entities(text, &tokens, &labels, &markers).unwrap();
        assert_eq!(entities.len(), 2);
        assert_eq!((entities[0].text.as_str(), entities[0].span()), ("Anna", [0, 4]));
        assert_eq!((entities[1].text.as_str(), entities[1].span()), ("Lee", [5, 8]));
        assert_eq!((spans[2].char_start, spans[2].char_end), (8, 9));
    }

    #[test]
    fn test_continuation_marker_spans() {
        let text = "Petrobras lucrou";
        let tokens = ["Pet", "##ro", "##bras", "lu", "##crou"];
        let labels = ["B-ORG", "I-ORG", "I-ORG", "O", "O"];
        let markers = MarkerConvention::word_piece();
        let (entities, spans) = extract_entities(text, &tokens, &labels, &markers).unwrap();
        assert_eq!(entities[0].text, "Petrobras");
        assert_eq!(entities[0].span(), [0, 9]);
        assert_eq!((spans[3].char_start, spans[3].char_end), (10, 12));
    }

    #[test]
    fn test_word_start_marker_spans() {
        let text = "São Paulo é big.";
        let tokens = ["\u{2581}São", "\u{2581}Paulo", "\u{2581}é", "\u{2581}", "big", "."];
        let labels = ["B-LOC", "I-LOC", "O", "O", "O", "O"];
        let (entities, spans) =
            extract_entities(text, &tokens, &labels, &MarkerConvention::sentence_piece()).unwrap();
        assert_eq!(entities[0].text, "São Paulo");
        assert_eq!(entities[0].span(), [0, 9]);
        assert_eq!((spans[3].char_start, spans[3].char_end), (12, 12));
        assert_eq!((spans[4].char_start, spans[4].char_end), (12, 15));
    }

    #[test]
    fn test_bare_word_start_marker_is_the_only_order_exception() {
        let text = "big ok";
        let tokens = ["\u{2581}", "big", "\u{2581}ok"];
        let labels = ["O", "O", "O"];
        let spans =
            reconstruct_token_spans(text, &tokens, &labels, &MarkerConvention::sentence_piece())
                .unwrap();
        // o marcador isolado tem largura zero e divide o início com "big"
        assert_eq!((spans[0].char_start, spans[0].char_end), (0, 0));
        assert_eq!(spans[0].char_start, spans[1].char_start);
        let non_empty: Vec<&TokenSpan> =
            spans.iter().filter(|s| s.char_end > s.char_start).collect();
        for pair in non_empty.windows(2) {
            assert!(pair[0].char_end <= pair[1].char_start);
            assert!(pair[0].char_start < pair[1].char_start);
        }
        for pair in spans.windows(2) {
            assert!(pair[0].char_end <= pair[1].char_start);
        }
    }

    #[test]
    fn test_unknown_token_consumes_word() {
        let text = "Zyx. ok";
        let tokens = ["[UNK]", ".", "ok"];
        let labels = ["B-MISC", "O", "O"];
        let markers = MarkerConvention::word_piece();
        let (entities, spans) = extract_entities(text, &tokens, &labels, &markers).unwrap();
        assert_eq!(entities[0].text, "Zyx");
        assert_eq!((spans[1].char_start, spans[2].char_start), (3, 5));
    }

    #[test]
    fn test_unknown_covers_whole_word_segment() {
        let markers = MarkerConvention::word_piece();
        let cases = [
            ("d'água Paris", 7),
            ("3.14 Paris", 5),
            ("cafe\u{301} em Paris", 9),
            ("vi \u{1F44D}\u{1F3FD} em Paris", 9),
        ];
        for (text, paris_start) in cases {
            let mut tokens = vec!["[UNK]", "Paris"];
            let mut labels = vec!["O", "B-LOC"];
            if text.contains(" em ") {
                tokens.insert(1, "em");
                labels.insert(1, "O");
            }
            if text.starts_with("vi") {
                tokens.insert(0, "vi");
                labels.insert(0, "O");
            }
            let (entities, _) = extract_entities(text, &tokens, &labels, &markers).unwrap();
            assert_eq!(entities[0].text, "Paris", "text: {text}");
            assert_eq!(entities[0].span(), [paris_start, paris_start + 5], "text: {text}");
        }
    }

    #[test]
    fn test_sentence_piece_unknown_runs_to_whitespace() {
        let text = "Newzz York";
        let tokens = ["\u{2581}New", "<unk>", "\u{2581}York"];
        let labels = ["B-LOC", "I-LOC", "I-LOC"];
        let (entities, spans) =
            extract_entities(text, &tokens, &labels, &MarkerConvention::sentence_piece()).unwrap();
        assert_eq!((spans[1].char_start, spans[1].char_end), (3, 5));
        assert_eq!((spans[2].char_start, spans[2].char_end), (6, 10));
        assert_eq!(entities[0].text, "Newzz York");
    }

    #[test]
    fn test_spans_strictly_increasing_and_bounded() {
        let text = "Rio de Janeiro , Brasil";
        let tokens = ["Ri", "##o", "de", "Jan", "##eiro", ",", "Brasil"];
        let labels: Vec<&str> = vec!["O"; tokens.len()];
        let markers = MarkerConvention::word_piece();
        let spans = reconstruct_token_spans(text, &tokens, &labels, &markers).unwrap();
        for pair in spans.windows(2) {
            assert!(pair[0].char_end <= pair[1].char_start);
            assert!(pair[0].char_start < pair[1].char_start);
        }
        assert!(spans.last().unwrap().char_end <= text.chars().count());
    }

    #[test]
    fn test_cursor_overrun_is_error() {
        let text = "New";
        let tokens = ["New", "York"];
        let labels = ["O", "O"];
        let markers = MarkerConvention::word_piece();
        let err = reconstruct_token_spans(text, &tokens, &labels, &markers).unwrap_err();
        assert!(matches!(err, NerError::SpanReconstruction { token_index: 1, .. }));
    }

    #[test]
    fn test_empty_text() {
        let tokens: [&str; 0] = [];
        let markers = MarkerConvention::word_piece();
        let (entities, spans) = extract_entities("", &tokens, &tokens, &markers).unwrap();
        assert!(entities.is_empty());
        assert!(spans.is_empty());
    }

    #[test]
    fn test_entity_json_shape() {
        let entity = Entity {
            label: "LOC".into(),
            char_start: 0,
            char_end: 8,
            text: "New York".into(),
        };
        let json = serde_json::to_value(&entity).unwrap();
        assert_eq!(json, serde_json::json!({"label": "LOC", "text": "New York", "span": [0, 8]}));
        let back: Entity = serde_json::from_value(json).unwrap();
        assert_eq!(back, entity);
    }

    #[test]
    fn test_char_slice_multibyte() {
        assert_eq!(char_slice("ação já", 0, 4), "ação");
        assert_eq!(char_slice("ação já", 5, 7), "já");
    }
}
