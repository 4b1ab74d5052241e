//! # Corpus de Demonstração com Anotações BIO
//!
//! Pequeno corpus anotado (português e inglês) que alimenta o pipeline de
//! demonstração e os testes de ponta a ponta:
//!
//! - **Gazetteer**: as entidades anotadas viram entradas do [`Gazetteer`].
//! - **Vocabulário WordPiece**: tokens especiais, as palavras do corpus e um
//!   alfabeto de caracteres (com e sem `##`), de modo que qualquer texto latino
//!   pode ser tokenizado.
//! - **Labels**: `O` mais `B-`/`I-` para `PER`, `ORG`, `LOC` e `MISC`.

use std::collections::HashSet;

use crate::entities::collect_bio_intervals;
use crate::error::Result;
use crate::labels::LabelVocabulary;
use crate::lexicon::Gazetteer;
use crate::tokenizer::WordPieceTokenizer;

/// Tipos de entidade do corpus, na ordem do vocabulário de labels.
pub const ENTITY_TYPES: [&str; 4] = ["PER", "ORG", "LOC", "MISC"];

const SPECIAL_TOKENS: [&str; 5] = ["[PAD]", "[UNK]", "[CLS]", "[SEP]", "[MASK]"];

/// Caracteres cobertos pelo vocabulário de demonstração.
const ALPHABET: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789\
                        áàâãéêíóôõúüçÁÀÂÃÉÊÍÓÔÕÚÜÇñÑ.,;:!?()[]{}-/'\"%$@&*+=#_";

/// Sufixos frequentes, para que palavras fora do corpus não virem só caracteres.
const SUFFIXES: [&str; 12] = [
    "##s", "##es", "##ing", "##ed", "##ly", "##ção", "##ções", "##mente", "##ado", "##ada",
    "##ista", "##al",
];

/// Uma sentença anotada no formato BIO.
pub struct AnnotatedSentence {
    /// Domínio temático.
    pub domain: &'static str,
    /// Pares (palavra, tag BIO).
    pub annotations: &'static [(&'static str, &'static str)],
}

impl AnnotatedSentence {
    pub fn words(&self) -> Vec<String> {
        self.annotations.iter().map(|(w, _)| w.to_string()).collect()
    }

    pub fn labels(&self) -> Vec<String> {
        self.annotations.iter().map(|(_, t)| t.to_string()).collect()
    }

    /// Texto da sentença: palavras unidas por um espaço.
    pub fn text(&self) -> String {
        self.words().join(" ")
    }

    /// Entidades anotadas como pares (tipo, texto).
    pub fn entities(&self) -> Vec<(String, String)> {
        let words = self.words();
        collect_bio_intervals(&self.labels())
            .into_iter()
            .map(|interval| (interval.label, words[interval.start..=interval.end].join(" ")))
            .collect()
    }
}

/// Retorna o corpus completo.
pub fn get_corpus() -> Vec<AnnotatedSentence> {
    vec![
        AnnotatedSentence {
            domain: "saúde",
            annotations: &[
                ("A", "O"), ("Fiocruz", "B-ORG"), ("desenvolveu", "O"), ("a", "O"),
                ("vacina", "O"), ("contra", "O"), ("a", "O"), ("dengue", "B-MISC"),
                ("aprovada", "O"), ("pela", "O"), ("Anvisa", "B-ORG"), ("em", "O"),
                ("2023", "O"), (".", "O"),
            ],
        },
        AnnotatedSentence {
            domain: "saúde",
            annotations: &[
                ("O", "O"), ("Hospital", "B-ORG"), ("Albert", "I-ORG"), ("Einstein", "I-ORG"),
                ("em", "O"), ("São", "B-LOC"), ("Paulo", "I-LOC"), ("é", "O"),
                ("referência", "O"), ("em", "O"), ("cardiologia", "O"), ("no", "O"),
                ("Brasil", "B-LOC"), (".", "O"),
            ],
        },
        AnnotatedSentence {
            domain: "história",
            annotations: &[
                ("Machado", "B-PER"), ("de", "I-PER"), ("Assis", "I-PER"), ("fundou", "O"),
                ("a", "O"), ("Academia", "B-ORG"), ("Brasileira", "I-ORG"), ("de", "I-ORG"),
                ("Letras", "I-ORG"), ("no", "O"), ("Rio", "B-LOC"), ("de", "I-LOC"),
                ("Janeiro", "I-LOC"), (".", "O"),
            ],
        },
        AnnotatedSentence {
            domain: "economia",
            annotations: &[
                ("A", "O"), ("Petrobras", "B-ORG"), ("anunciou", "O"), ("investimentos", "O"),
                ("na", "O"), ("Bacia", "B-LOC"), ("de", "I-LOC"), ("Santos", "I-LOC"),
                ("com", "O"), ("a", "O"), ("Shell", "B-ORG"), (".", "O"),
            ],
        },
        AnnotatedSentence {
            domain: "economia",
            annotations: &[
                ("O", "O"), ("Banco", "B-ORG"), ("Central", "I-ORG"), ("do", "I-ORG"),
                ("Brasil", "I-ORG"), ("manteve", "O"), ("a", "O"), ("taxa", "O"),
                ("Selic", "B-MISC"), ("estável", "O"), (".", "O"),
            ],
        },
        AnnotatedSentence {
            domain: "esportes",
            annotations: &[
                ("Marta", "B-PER"), ("jogou", "O"), ("a", "O"), ("Copa", "B-MISC"),
                ("do", "I-MISC"), ("Mundo", "I-MISC"), ("pela", "O"), ("seleção", "O"),
                ("em", "O"), ("Paris", "B-LOC"), (".", "O"),
            ],
        },
        AnnotatedSentence {
            domain: "geography",
            annotations: &[
                ("New", "B-LOC"), ("York", "I-LOC"), ("is", "O"), ("big", "O"), (".", "O"),
            ],
        },
        AnnotatedSentence {
            domain: "business",
            annotations: &[
                ("Anna", "B-PER"), ("Lee", "I-PER"), ("joined", "O"), ("Acme", "B-ORG"),
                ("Corp", "I-ORG"), ("in", "O"), ("London", "B-LOC"), ("last", "O"),
                ("year", "O"), (".", "O"),
            ],
        },
        AnnotatedSentence {
            domain: "sports",
            annotations: &[
                ("The", "O"), ("Olympic", "B-MISC"), ("Games", "I-MISC"), ("were", "O"),
                ("held", "O"), ("in", "O"), ("Tokyo", "B-LOC"), ("after", "O"), ("a", "O"),
                ("delay", "O"), (".", "O"),
            ],
        },
        AnnotatedSentence {
            domain: "science",
            annotations: &[
                ("Researchers", "O"), ("at", "O"), ("Oxford", "B-ORG"), ("University", "I-ORG"),
                ("worked", "O"), ("with", "O"), ("the", "O"), ("Instituto", "B-ORG"),
                ("Butantan", "I-ORG"), ("on", "O"), ("vaccines", "O"), (".", "O"),
            ],
        },
    ]
}

/// Vocabulário de labels do corpus: `O`, depois `B-`/`I-` de cada tipo.
pub fn demo_labels() -> Result<LabelVocabulary> {
    let mut labels = vec!["O".to_string()];
    for kind in ENTITY_TYPES {
        labels.push(format!("B-{kind}"));
        labels.push(format!("I-{kind}"));
    }
    LabelVocabulary::new(labels)
}

/// Gazetteer com todas as entidades anotadas no corpus.
pub fn demo_gazetteer() -> Gazetteer {
    let mut gazetteer = Gazetteer::new();
    for sentence in get_corpus() {
        for (kind, name) in sentence.entities() {
            gazetteer.add(&kind, &name);
        }
    }
    gazetteer
}

/// Vocabulário WordPiece: especiais, palavras do corpus, sufixos e caracteres.
pub fn demo_vocab() -> Vec<String> {
    let mut seen = HashSet::new();
    let mut vocab = Vec::new();
    let mut push = |token: String| {
        if seen.insert(token.clone()) {
            vocab.push(token);
        }
    };

    for token in SPECIAL_TOKENS {
        push(token.to_string());
    }
    for sentence in get_corpus() {
        for (word, _) in sentence.annotations {
            push(word.to_string());
        }
    }
    for suffix in SUFFIXES {
        push(suffix.to_string());
    }
    for c in ALPHABET.chars() {
        push(c.to_string());
        push(format!("##{c}"));
    }
    vocab
}

pub fn demo_tokenizer() -> Result<WordPieceTokenizer> {
    WordPieceTokenizer::new(demo_vocab())
}

/// Textos de demonstração para a interface web: (título, texto).
pub fn demo_texts() -> Vec<(&'static str, &'static str)> {
    vec![
        (
            "Saúde",
            "O Hospital Albert Einstein, em São Paulo, trabalha com o Instituto Butantan \
             e a Fiocruz. A Anvisa aprovou novos protocolos contra a dengue.",
        ),
        (
            "História",
            "Machado de Assis nasceu no Rio de Janeiro e presidiu a Academia Brasileira de Letras.",
        ),
        (
            "Economia",
            "O Banco Central do Brasil manteve a Selic. A Petrobras e a Shell exploram \
             petróleo na Bacia de Santos.",
        ),
        (
            "English",
            "Anna Lee left Acme Corp and moved from London to New York before the \
             Olympic Games in Tokyo.",
        ),
        (
            "Subpalavras",
            "Researchers at Oxford University   studied    the Copa do Mundo in Paris with Marta.",
        ),
    ]
}
