use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::knowledge_graph::namespace::{self, prov, rdf, xsd};
use crate::knowledge_graph::{Graph, Literal, Node};

/// An input resource together with the statements describing it.
#[derive(Debug, Clone)]
pub struct Resource {
    pub identifier: String,
    pub graph: Graph,
}

impl Resource {
    pub fn new(identifier: impl Into<String>, graph: Graph) -> Self {
        Self {
            identifier: identifier.into(),
            graph,
        }
    }

    pub fn value(&self, predicate: &str) -> Option<&Node> {
        self.graph.iter()
            .find(|s| s.predicate == predicate && s.subject.as_iri() == Some(self.identifier.as_str()))
            .map(|s| &s.object)
    }

    pub fn objects(&self, predicate: &str) -> Vec<&Node> {
        self.graph.iter()
            .filter(|s| s.predicate == predicate && s.subject.as_iri() == Some(self.identifier.as_str()))
            .map(|s| &s.object)
            .collect()
    }

    /// Literal values for each predicate in turn, predicates in the order given.
    pub fn literal_values(&self, predicates: &[&str]) -> Vec<&Literal> {
        predicates
            .iter()
            .flat_map(|p| self.objects(p))
            .filter_map(|n| n.as_literal())
            .collect()
    }
}

/// Output mutations produced while processing one resource.
#[derive(Debug, Clone)]
pub struct OutputResource {
    pub identifier: String,
    pub graph: Graph,
}

impl OutputResource {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            graph: Graph::new(),
        }
    }

    pub fn node(&self) -> Node {
        Node::iri(self.identifier.clone())
    }

    /// Assert `(self, predicate, object)`.
    pub fn add(&mut self, predicate: &str, object: Node) -> bool {
        let subject = self.node();
        self.graph.add(subject, predicate, object)
    }
}

/// An agent driven by the host's change detection: it declares which
/// resources it consumes and turns each one into graph mutations.
#[async_trait]
pub trait UpdateChangeAgent: Send + Sync {
    fn name(&self) -> &str;

    fn activity_class(&self) -> String;

    fn input_class(&self) -> String;

    fn output_class(&self) -> String;

    /// SPARQL selecting the agent's inputs, as registered with the host.
    fn query(&self) -> &str;

    /// Evaluate the pattern of [`query`](Self::query) over `graph`.
    fn select_inputs(&self, graph: &Graph) -> Vec<Node>;

    async fn process(&self, input: &Resource, output: &mut OutputResource) -> Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub id: String,
    pub input: String,
    pub activity_class: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub statements_added: usize,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl ActivityRecord {
    pub fn succeeded(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub output: Graph,
    pub activities: Vec<ActivityRecord>,
    pub skipped: Vec<String>,
}

impl RunReport {
    pub fn failures(&self) -> impl Iterator<Item = &ActivityRecord> {
        self.activities.iter().filter(|a| !a.succeeded())
    }
}

pub struct AgentRunner {
    lod_prefix: String,
    force: bool,
}

impl AgentRunner {
    pub fn new(lod_prefix: impl Into<String>) -> Self {
        Self {
            lod_prefix: lod_prefix.into(),
            force: false,
        }
    }

    /// Also process inputs already typed with the agent's output class.
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    fn mint_activity(&self) -> String {
        namespace::join(&format!("{}/activity", self.lod_prefix.trim_end_matches('/')), &Uuid::new_v4().to_string())
    }

    pub async fn run(&self, agent: &dyn UpdateChangeAgent, graph: &Graph) -> RunReport {
        let mut report = RunReport::default();
        let output_class = Node::iri(agent.output_class());
        let inputs = agent.select_inputs(graph);

        info!("{}: {} candidate inputs", agent.name(), inputs.len());

        for input in inputs {
            let Some(identifier) = input.as_iri().map(str::to_string) else {
                debug!("{}: skipping non-IRI input {}", agent.name(), input);
                continue;
            };

            if !self.force && graph.contains(&input, rdf::TYPE, &output_class) {
                debug!("{}: {} already processed", agent.name(), identifier);
                report.skipped.push(identifier);
                continue;
            }

            let record = self.run_one(agent, graph, &identifier, &mut report.output).await;
            report.activities.push(record);
        }

        info!(
            "{}: {} processed, {} failed, {} skipped, {} statements",
            agent.name(),
            report.activities.len(),
            report.failures().count(),
            report.skipped.len(),
            report.output.len()
        );

        report
    }

    pub async fn run_one(
        &self,
        agent: &dyn UpdateChangeAgent,
        graph: &Graph,
        identifier: &str,
        sink: &mut Graph,
    ) -> ActivityRecord {
        let started_at = Utc::now();
        let activity = self.mint_activity();
        let resource = Resource::new(identifier, graph.describe(&Node::iri(identifier)));
        let mut output = OutputResource::new(identifier);

        let mut errors = Vec::new();
        match agent.process(&resource, &mut output).await {
            Ok(()) => {
                let ended_at = Utc::now();
                let activity_node = Node::iri(activity.clone());

                output.add(rdf::TYPE, Node::iri(agent.output_class()));
                output.add(prov::WAS_GENERATED_BY, activity_node.clone());

                let provenance = &mut output.graph;
                provenance.add(activity_node.clone(), rdf::TYPE, Node::iri(agent.activity_class()));
                provenance.add(activity_node.clone(), prov::USED, Node::iri(identifier));
                provenance.add(activity_node.clone(), prov::STARTED_AT_TIME, date_time(started_at));
                provenance.add(activity_node, prov::ENDED_AT_TIME, date_time(ended_at));
            }
            Err(e) => {
                warn!("{}: failed to process {}: {:#}", agent.name(), identifier, e);
                errors.push(format!("{:#}", e));
            }
        }

        let statements_added = if errors.is_empty() {
            sink.extend(output.graph)
        } else {
            0
        };

        ActivityRecord {
            id: activity,
            input: identifier.to_string(),
            activity_class: agent.activity_class(),
            started_at,
            ended_at: Utc::now(),
            statements_added,
            errors,
        }
    }
}

fn date_time(at: DateTime<Utc>) -> Node {
    Node::Literal(Literal::typed(at.to_rfc3339(), xsd::DATE_TIME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge_graph::namespace::schema;

    struct EchoAgent;

    #[async_trait]
    impl UpdateChangeAgent for EchoAgent {
        fn name(&self) -> &str {
            "echo"
        }

        fn activity_class(&self) -> String {
            "http://example.org/Echo".to_string()
        }

        fn input_class(&self) -> String {
            schema::MEDIA_OBJECT.to_string()
        }

        fn output_class(&self) -> String {
            "http://example.org/Echoed".to_string()
        }

        fn query(&self) -> &str {
            "select ?resource where { ?resource a <http://schema.org/MediaObject> }"
        }

        fn select_inputs(&self, graph: &Graph) -> Vec<Node> {
            graph.subjects_of_type(schema::MEDIA_OBJECT)
        }

        async fn process(&self, input: &Resource, output: &mut OutputResource) -> Result<()> {
            let text = input
                .value(schema::TEXT)
                .and_then(|n| n.as_literal())
                .ok_or_else(|| anyhow::anyhow!("no text"))?;
            output.add(schema::CAPTION, Node::literal(text.value.to_uppercase()));
            Ok(())
        }
    }

    fn input_graph() -> Graph {
        let mut graph = Graph::new();
        let a = Node::iri("http://example.org/a");
        let b = Node::iri("http://example.org/b");
        let c = Node::iri("http://example.org/c");
        graph.add(a.clone(), rdf::TYPE, Node::iri(schema::MEDIA_OBJECT));
        graph.add(a, schema::TEXT, Node::literal("hello"));
        graph.add(b.clone(), rdf::TYPE, Node::iri(schema::MEDIA_OBJECT));
        graph.add(c.clone(), rdf::TYPE, Node::iri(schema::MEDIA_OBJECT));
        graph.add(c.clone(), schema::TEXT, Node::literal("done"));
        graph.add(c, rdf::TYPE, Node::iri("http://example.org/Echoed"));
        graph
    }

    #[test]
    fn test_resource_accessors() {
        let mut graph = Graph::new();
        let a = Node::iri("http://example.org/a");
        graph.add(a.clone(), schema::TEXT, Node::literal("one"));
        graph.add(a.clone(), schema::CAPTION, Node::literal("two"));
        graph.add(a.clone(), schema::TEXT, Node::literal("three"));
        graph.add(a, schema::ABOUT, Node::iri("http://example.org/x"));

        let resource = Resource::new("http://example.org/a", graph);
        let values: Vec<&str> = resource
            .literal_values(&[schema::TEXT, schema::DESCRIPTION, schema::CAPTION, schema::ABOUT])
            .into_iter()
            .map(|l| l.value.as_str())
            .collect();
        assert_eq!(values, vec!["one", "three", "two"]);
        assert_eq!(resource.objects(schema::TEXT).len(), 2);
    }

    #[tokio::test]
    async fn test_runner_processes_and_records_failures() {
        let graph = input_graph();
        let report = AgentRunner::new("http://example.org/").run(&EchoAgent, &graph).await;

        assert_eq!(report.activities.len(), 2);
        assert_eq!(report.skipped, vec!["http://example.org/c".to_string()]);

        let ok = &report.activities[0];
        assert!(ok.succeeded());
        assert!(ok.id.starts_with("http://example.org/activity/"));

        let failed = &report.activities[1];
        assert_eq!(failed.input, "http://example.org/b");
        assert_eq!(failed.errors, vec!["no text".to_string()]);
        assert_eq!(failed.statements_added, 0);

        let a = Node::iri("http://example.org/a");
        assert!(report.output.contains(&a, schema::CAPTION, &Node::literal("HELLO")));
        assert!(report.output.contains(&a, rdf::TYPE, &Node::iri("http://example.org/Echoed")));

        let activity = Node::iri(ok.id.clone());
        assert!(report.output.contains(&activity, prov::USED, &a));
        assert!(report.output.contains(&a, prov::WAS_GENERATED_BY, &activity));
        assert!(report.output.value(&activity, prov::STARTED_AT_TIME).is_some());
        assert!(!report.output.iter().any(|s| s.subject == Node::iri("http://example.org/b")));
    }

    #[tokio::test]
    async fn test_force_reprocesses() {
        let graph = input_graph();
        let report = AgentRunner::new("http://example.org")
            .with_force(true)
            .run(&EchoAgent, &graph)
            .await;

        assert!(report.skipped.is_empty());
        assert_eq!(report.activities.len(), 3);
        let c = Node::iri("http://example.org/c");
        assert!(report.output.contains(&c, schema::CAPTION, &Node::literal("DONE")));
    }
}
