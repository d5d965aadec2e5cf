use anyhow::{Context, Result};
use rio_api::formatter::TriplesFormatter;
use rio_api::model as rio;
use rio_turtle::{NTriplesFormatter, TurtleFormatter};

use crate::config::OutputFormat;
use crate::knowledge_graph::{Graph, Node, Statement};

pub struct RdfSerializer;

impl RdfSerializer {
    pub fn new() -> Self {
        Self
    }

    pub fn serialize(&self, graph: &Graph, format: &OutputFormat) -> Result<String> {
        let bytes = match format {
            OutputFormat::Turtle => {
                let mut formatter = TurtleFormatter::new(Vec::new());
                Self::write_all(&mut formatter, graph)?;
                formatter.finish().context("Failed to finish Turtle output")?
            }
            OutputFormat::NTriples => {
                let mut formatter = NTriplesFormatter::new(Vec::new());
                Self::write_all(&mut formatter, graph)?;
                formatter.finish().context("Failed to finish N-Triples output")?
            }
            OutputFormat::Json => {
                let statements: Vec<&Statement> = graph.iter().collect();
                return serde_json::to_string_pretty(&statements)
                    .context("Failed to serialize to JSON");
            }
        };

        String::from_utf8(bytes).context("Serialized graph is not valid UTF-8")
    }

    fn write_all<F>(formatter: &mut F, graph: &Graph) -> Result<()>
    where
        F: TriplesFormatter,
        F::Error: std::error::Error + Send + Sync + 'static,
    {
        for statement in graph.iter() {
            let subject = match &statement.subject {
                Node::Iri { iri } => rio::Subject::NamedNode(rio::NamedNode { iri }),
                Node::Blank { id } => rio::Subject::BlankNode(rio::BlankNode { id }),
                Node::Literal(_) => {
                    anyhow::bail!("Literal in subject position: {}", statement)
                }
            };

            let object = match &statement.object {
                Node::Iri { iri } => rio::Term::NamedNode(rio::NamedNode { iri }),
                Node::Blank { id } => rio::Term::BlankNode(rio::BlankNode { id }),
                Node::Literal(literal) => {
                    let value = literal.value.as_str();
                    rio::Term::Literal(match (&literal.language, &literal.datatype) {
                        (Some(language), _) => rio::Literal::LanguageTaggedString { value, language },
                        (None, Some(iri)) => rio::Literal::Typed {
                            value,
                            datatype: rio::NamedNode { iri },
                        },
                        (None, None) => rio::Literal::Simple { value },
                    })
                }
            };

            let triple = rio::Triple {
                subject,
                predicate: rio::NamedNode { iri: &statement.predicate },
                object,
            };

            formatter
                .format(&triple)
                .with_context(|| format!("Failed to write statement: {}", statement))?;
        }

        Ok(())
    }
}

impl Default for RdfSerializer {
    fn default() -> Self {
        Self::new()
    }
}

/// Report statements that a strict RDF store would reject.
pub fn validate_graph(graph: &Graph) -> Vec<String> {
    let mut issues = Vec::new();

    for (i, statement) in graph.iter().enumerate() {
        if let Node::Iri { iri } = &statement.subject {
            if url::Url::parse(iri).is_err() {
                issues.push(format!("Statement {}: Invalid subject IRI: {}", i, iri));
            }
        }

        if url::Url::parse(&statement.predicate).is_err() {
            issues.push(format!("Statement {}: Invalid predicate IRI: {}", i, statement.predicate));
        }

        if let Node::Literal(literal) = &statement.object {
            if literal.value.is_empty() {
                issues.push(format!("Statement {}: Empty literal", i));
            }
        }
    }

    issues
}
