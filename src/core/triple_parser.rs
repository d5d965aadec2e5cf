//! Reconstruction of typed triples from an mREBEL-style decoded token stream.
//!
//! The model emits sequences like
//! `<triplet> Monstera deliciosa <plant> Mexico <loc> native to`, i.e. a
//! head span, the head's type tag, a tail span, the tail's type tag and the
//! relation text. Several tails may follow one head, each introduced by a
//! new head-type tag after the previous relation.

use serde::{Deserialize, Serialize};

/// Tokens stripped from the decoded text before scanning.
const NOISE_TOKENS: [&str; 5] = ["<s>", "<pad>", "</s>", "tp_XX", "__en__"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedTriple {
    pub head: String,
    pub head_type: String,
    pub relation: String,
    pub tail: String,
    pub tail_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Span {
    None,
    Head,
    Tail,
    Relation,
}

#[derive(Default)]
struct Accumulator {
    head: String,
    head_type: String,
    relation: String,
    tail: String,
    tail_type: String,
}

impl Accumulator {
    fn snapshot(&self) -> TypedTriple {
        TypedTriple {
            head: self.head.trim().to_string(),
            head_type: self.head_type.clone(),
            relation: self.relation.trim().to_string(),
            tail: self.tail.trim().to_string(),
            tail_type: self.tail_type.clone(),
        }
    }

    fn is_complete(&self) -> bool {
        !self.head.is_empty()
            && !self.relation.is_empty()
            && !self.tail.is_empty()
            && !self.tail_type.is_empty()
            && !self.head_type.is_empty()
    }
}

fn push_word(span: &mut String, token: &str) {
    span.push(' ');
    span.push_str(token);
}

fn type_tag(token: &str) -> Option<&str> {
    token.strip_prefix('<').and_then(|t| t.strip_suffix('>'))
}

/// Parse a decoded token stream into typed triples, in emission order.
///
/// A triple is flushed when a new `<triplet>`/`<relation>` marker or a new
/// head-type tag arrives while a relation has been accumulated. A trailing
/// triple is kept only if all five fields are non-empty.
pub fn parse_typed_triples(text: &str) -> Vec<TypedTriple> {
    let mut cleaned = text.trim().to_string();
    for noise in NOISE_TOKENS {
        cleaned = cleaned.replace(noise, "");
    }

    let mut triples = Vec::new();
    let mut span = Span::None;
    let mut acc = Accumulator::default();

    for token in cleaned.split_whitespace() {
        if token == "<triplet>" || token == "<relation>" {
            span = Span::Head;
            if !acc.relation.is_empty() {
                triples.push(acc.snapshot());
                acc.relation.clear();
            }
            acc.head.clear();
        } else if let Some(tag) = type_tag(token) {
            match span {
                Span::Head | Span::Relation => {
                    span = Span::Tail;
                    if !acc.relation.is_empty() {
                        triples.push(acc.snapshot());
                    }
                    acc.tail.clear();
                    acc.head_type = tag.to_string();
                }
                Span::None | Span::Tail => {
                    span = Span::Relation;
                    acc.tail_type = tag.to_string();
                    acc.relation.clear();
                }
            }
        } else {
            match span {
                Span::Head => push_word(&mut acc.head, token),
                Span::Tail => push_word(&mut acc.tail, token),
                Span::Relation => push_word(&mut acc.relation, token),
                Span::None => {}
            }
        }
    }

    if acc.is_complete() {
        triples.push(acc.snapshot());
    }

    triples
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triple(head: &str, head_type: &str, relation: &str, tail: &str, tail_type: &str) -> TypedTriple {
        TypedTriple {
            head: head.to_string(),
            head_type: head_type.to_string(),
            relation: relation.to_string(),
            tail: tail.to_string(),
            tail_type: tail_type.to_string(),
        }
    }

    #[test]
    fn test_single_triple_with_model_noise() {
        let decoded = "<s>tp_XX<triplet> Monstera deliciosa <plant> Mexico <loc> native to</s><pad><pad>";
        assert_eq!(
            parse_typed_triples(decoded),
            vec![triple("Monstera deliciosa", "plant", "native to", "Mexico", "loc")]
        );
    }

    #[test]
    fn test_multiple_triplets_flush_in_order() {
        let decoded = "<triplet> Paris <loc> France <loc> country \
                       <triplet> Emmanuel Macron <per> France <loc> country of citizenship";
        assert_eq!(
            parse_typed_triples(decoded),
            vec![
                triple("Paris", "loc", "country", "France", "loc"),
                triple("Emmanuel Macron", "per", "country of citizenship", "France", "loc"),
            ]
        );
    }

    #[test]
    fn test_several_tails_share_a_head() {
        let decoded = "<triplet> Monstera deliciosa <plant> Mexico <loc> native to \
                       <plant> flowering plant <concept> instance of";
        assert_eq!(
            parse_typed_triples(decoded),
            vec![
                triple("Monstera deliciosa", "plant", "native to", "Mexico", "loc"),
                triple("Monstera deliciosa", "plant", "instance of", "flowering plant", "concept"),
            ]
        );
    }

    #[test]
    fn test_relation_marker_starts_new_triple() {
        let decoded = "<relation> Ada Lovelace <per> London <loc> place of birth";
        assert_eq!(
            parse_typed_triples(decoded),
            vec![triple("Ada Lovelace", "per", "place of birth", "London", "loc")]
        );
    }

    #[test]
    fn test_trailing_partial_triple_is_dropped() {
        // Head and head type only.
        assert!(parse_typed_triples("<triplet> Ada Lovelace <per> London").is_empty());
        // Missing relation text.
        assert!(parse_typed_triples("<triplet> Ada Lovelace <per> London <loc>").is_empty());

        let decoded = "<triplet> Paris <loc> France <loc> country <triplet> Berlin <loc>";
        assert_eq!(
            parse_typed_triples(decoded),
            vec![triple("Paris", "loc", "country", "France", "loc")]
        );
    }

    #[test]
    fn test_tokens_before_first_marker_are_ignored() {
        let decoded = "stray words <triplet> Paris <loc> France <loc> country";
        assert_eq!(
            parse_typed_triples(decoded),
            vec![triple("Paris", "loc", "country", "France", "loc")]
        );
    }

    #[test]
    fn test_type_tag_before_first_marker_opens_a_relation() {
        // The leading tag sets the tail type and starts a relation span, so
        // the next marker flushes a triple with no head or tail.
        let decoded = "<loc> foo <triplet> Paris <loc> France <loc> capital of";
        assert_eq!(
            parse_typed_triples(decoded),
            vec![
                triple("", "", "foo", "", "loc"),
                triple("Paris", "loc", "capital of", "France", "loc"),
            ]
        );
    }

    #[test]
    fn test_stale_relation_carries_into_untyped_tail() {
        // A second tail without its own type tag is flushed with the previous
        // relation and tail type still in place.
        let decoded = "<triplet> A <per> B <org> works for <per> C <triplet>";
        assert_eq!(
            parse_typed_triples(decoded),
            vec![
                triple("A", "per", "works for", "B", "org"),
                triple("A", "per", "works for", "C", "org"),
            ]
        );
    }

    #[test]
    fn test_empty_and_noise_only_input() {
        assert!(parse_typed_triples("").is_empty());
        assert!(parse_typed_triples("  <s> </s> <pad> __en__ ").is_empty());
    }

    #[test]
    fn test_whitespace_is_normalized() {
        let decoded = "<triplet>\n  Swiss   cheese plant <plant>\tPanama <loc>  native   to ";
        assert_eq!(
            parse_typed_triples(decoded),
            vec![triple("Swiss cheese plant", "plant", "native to", "Panama", "loc")]
        );
    }
}
