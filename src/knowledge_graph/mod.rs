use anyhow::{Context, Result};
use rio_api::model as rio;
use rio_api::parser::TriplesParser;
use rio_turtle::{NTriplesParser, TurtleError, TurtleParser};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, info};

pub mod namespace;

use namespace::rdf;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Literal {
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datatype: Option<String>,
}

impl Literal {
    pub fn simple(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            language: None,
            datatype: None,
        }
    }

    pub fn lang(value: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            language: Some(language.into()),
            datatype: None,
        }
    }

    pub fn typed(value: impl Into<String>, datatype: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            language: None,
            datatype: Some(datatype.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    Iri { iri: String },
    Blank { id: String },
    Literal(Literal),
}

impl Node {
    pub fn iri(iri: impl Into<String>) -> Self {
        Node::Iri { iri: iri.into() }
    }

    pub fn blank(id: impl Into<String>) -> Self {
        Node::Blank { id: id.into() }
    }

    pub fn literal(value: impl Into<String>) -> Self {
        Node::Literal(Literal::simple(value))
    }

    pub fn as_iri(&self) -> Option<&str> {
        match self {
            Node::Iri { iri } => Some(iri),
            _ => None,
        }
    }

    pub fn as_literal(&self) -> Option<&Literal> {
        match self {
            Node::Literal(literal) => Some(literal),
            _ => None,
        }
    }

    fn from_rio_subject(subject: &rio::Subject<'_>) -> Option<Self> {
        match subject {
            rio::Subject::NamedNode(n) => Some(Node::iri(n.iri)),
            rio::Subject::BlankNode(b) => Some(Node::blank(b.id)),
            _ => None,
        }
    }

    fn from_rio_term(term: &rio::Term<'_>) -> Option<Self> {
        match term {
            rio::Term::NamedNode(n) => Some(Node::iri(n.iri)),
            rio::Term::BlankNode(b) => Some(Node::blank(b.id)),
            rio::Term::Literal(rio::Literal::Simple { value }) => Some(Node::literal(*value)),
            rio::Term::Literal(rio::Literal::LanguageTaggedString { value, language }) => {
                Some(Node::Literal(Literal::lang(*value, *language)))
            }
            rio::Term::Literal(rio::Literal::Typed { value, datatype }) => {
                Some(Node::Literal(Literal::typed(*value, datatype.iri)))
            }
            _ => None,
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Iri { iri } => write!(f, "<{}>", iri),
            Node::Blank { id } => write!(f, "_:{}", id),
            Node::Literal(literal) => {
                write!(f, "\"{}\"", literal.value.replace('"', "\\\""))?;
                if let Some(language) = &literal.language {
                    write!(f, "@{}", language)
                } else if let Some(datatype) = &literal.datatype {
                    write!(f, "^^<{}>", datatype)
                } else {
                    Ok(())
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Statement {
    pub subject: Node,
    pub predicate: String,
    pub object: Node,
}

impl Statement {
    pub fn new(subject: Node, predicate: impl Into<String>, object: Node) -> Self {
        Self {
            subject,
            predicate: predicate.into(),
            object,
        }
    }

    fn from_rio(triple: &rio::Triple<'_>) -> Option<Self> {
        Some(Self {
            subject: Node::from_rio_subject(&triple.subject)?,
            predicate: triple.predicate.iri.to_string(),
            object: Node::from_rio_term(&triple.object)?,
        })
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}> {} .", self.subject, self.predicate, self.object)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RdfInputFormat {
    Turtle,
    NTriples,
}

impl RdfInputFormat {
    /// Guess the format from a file extension, defaulting to Turtle.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("nt") | Some("ntriples") => RdfInputFormat::NTriples,
            _ => RdfInputFormat::Turtle,
        }
    }
}

/// An insertion-ordered set of statements.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    statements: Vec<Statement>,
    seen: HashSet<Statement>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse<R: BufRead>(reader: R, format: RdfInputFormat) -> Result<Self> {
        let mut graph = Graph::new();
        let mut skipped = 0usize;

        let mut on_triple = |triple: rio::Triple<'_>| -> std::result::Result<(), TurtleError> {
            match Statement::from_rio(&triple) {
                Some(statement) => {
                    graph.insert(statement);
                }
                None => skipped += 1,
            }
            Ok(())
        };

        match format {
            RdfInputFormat::Turtle => TurtleParser::new(reader, None).parse_all(&mut on_triple),
            RdfInputFormat::NTriples => NTriplesParser::new(reader).parse_all(&mut on_triple),
        }
        .context("Failed to parse RDF input")?;

        if skipped > 0 {
            debug!("Skipped {} quoted-triple statements", skipped);
        }

        Ok(graph)
    }

    pub fn from_file<P: AsRef<Path>>(path: P, format: Option<RdfInputFormat>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open graph file: {}", path.display()))?;
        let format = format.unwrap_or_else(|| RdfInputFormat::from_path(path));

        let graph = Self::parse(BufReader::new(file), format)
            .with_context(|| format!("Failed to load graph from: {}", path.display()))?;

        info!("Loaded {} statements from: {}", graph.len(), path.display());
        Ok(graph)
    }

    /// Add a statement; returns false if it was already present.
    pub fn insert(&mut self, statement: Statement) -> bool {
        if self.seen.contains(&statement) {
            return false;
        }
        self.seen.insert(statement.clone());
        self.statements.push(statement);
        true
    }

    pub fn add(&mut self, subject: Node, predicate: impl Into<String>, object: Node) -> bool {
        self.insert(Statement::new(subject, predicate, object))
    }

    pub fn extend(&mut self, other: Graph) -> usize {
        other
            .statements
            .into_iter()
            .filter(|s| self.insert(s.clone()))
            .count()
    }

    pub fn contains(&self, subject: &Node, predicate: &str, object: &Node) -> bool {
        self.seen.contains(&Statement::new(subject.clone(), predicate, object.clone()))
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Statement> {
        self.statements.iter()
    }

    /// First object of `(subject, predicate)`, in insertion order.
    pub fn value(&self, subject: &Node, predicate: &str) -> Option<&Node> {
        self.statements
            .iter()
            .find(|s| &s.subject == subject && s.predicate == predicate)
            .map(|s| &s.object)
    }

    /// Subjects typed with `class`, in first-seen order.
    pub fn subjects_of_type(&self, class: &str) -> Vec<Node> {
        let class = Node::iri(class);
        self.unique_subjects(|s| s.predicate == rdf::TYPE && s.object == class)
    }

    /// Subjects carrying at least one of `predicates`, in first-seen order.
    pub fn subjects_with_any(&self, predicates: &[&str]) -> Vec<Node> {
        self.unique_subjects(|s| predicates.contains(&s.predicate.as_str()))
    }

    fn unique_subjects<F>(&self, predicate: F) -> Vec<Node>
    where
        F: Fn(&Statement) -> bool,
    {
        let mut seen = HashSet::new();
        self.statements
            .iter()
            .filter(|s| predicate(s))
            .filter(|s| seen.insert(s.subject.clone()))
            .map(|s| s.subject.clone())
            .collect()
    }

    /// The statements whose subject is `subject`.
    pub fn describe(&self, subject: &Node) -> Graph {
        let mut graph = Graph::new();
        for statement in self.statements.iter().filter(|s| &s.subject == subject) {
            graph.insert(statement.clone());
        }
        graph
    }

    pub fn get_statistics(&self) -> KnowledgeGraphStats {
        let mut unique_subjects = HashSet::new();
        let mut unique_predicates = HashSet::new();
        let mut unique_objects = HashSet::new();

        for statement in &self.statements {
            unique_subjects.insert(&statement.subject);
            unique_predicates.insert(&statement.predicate);
            unique_objects.insert(&statement.object);
        }

        KnowledgeGraphStats {
            total_triples: self.statements.len(),
            unique_subjects: unique_subjects.len(),
            unique_predicates: unique_predicates.len(),
            unique_objects: unique_objects.len(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeGraphStats {
    pub total_triples: usize,
    pub unique_subjects: usize,
    pub unique_predicates: usize,
    pub unique_objects: usize,
}

impl fmt::Display for KnowledgeGraphStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f,
            "Graph Statistics:\n\
             Total Triples: {}\n\
             Unique Subjects: {}\n\
             Unique Predicates: {}\n\
             Unique Objects: {}",
            self.total_triples,
            self.unique_subjects,
            self.unique_predicates,
            self.unique_objects
        )
    }
}
