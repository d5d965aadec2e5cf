use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::ExtractionSettings;
use crate::core::agent::{OutputResource, Resource, UpdateChangeAgent};
use crate::core::rebel_client::{GenerationRequest, TripletGenerator};
use crate::core::triple_parser::{parse_typed_triples, TypedTriple};
use crate::knowledge_graph::namespace::{self, rdf, rdfs, schema, skos, whyis};
use crate::knowledge_graph::{Graph, Node};

/// Wikidata: knowledge extraction
const ACTIVITY_CLASS: &str = "Q1582085";

const QUERY: &str = "select distinct ?resource where { ?resource schema:text|schema:caption|schema:description [].}";

/// Text-bearing properties, in the order they are read.
const TEXT_PROPERTIES: [&str; 3] = [schema::TEXT, schema::DESCRIPTION, schema::CAPTION];

/// Entity type tags emitted by the model and the classes they map to.
pub fn default_types() -> HashMap<String, String> {
    let wd = namespace::wd;
    [
        ("per", wd("Q215627")),        // person
        ("loc", wd("Q2221906")),       // geographic location
        ("org", wd("Q43229")),         // organization
        ("eve", wd("Q1190554")),       // occurrence
        ("bio", wd("Q28845870")),      // biological component
        ("concept", skos::CONCEPT.to_string()),
        ("anim", wd("Q16521")),        // taxon
        ("misc", wd("Q35120")),        // entity
        ("dis", wd("Q12136")),         // disease
        ("food", wd("Q2095")),
        ("inst", wd("Q39546")),        // tool
        ("media", wd("Q17537576")),    // creative work
        ("mon", wd("Q1499548")),       // monetary value
        ("num", wd("Q11563")),
        ("phys", wd("Q1293220")),      // physical phenomenon
        ("plant", wd("Q16521")),       // taxon
        ("super", wd("Q28855038")),    // supernatural being
        ("date", wd("Q205892")),       // calendar date
        ("time", wd("Q1260524")),      // time of day
        ("vehi", wd("Q29048322")),     // vehicle model
    ]
    .into_iter()
    .map(|(tag, class)| (tag.to_string(), class))
    .collect()
}

/// Relations that map onto core RDF vocabulary instead of minted properties.
pub fn default_properties() -> HashMap<String, String> {
    [
        ("instance_of", rdf::TYPE),
        ("subclass_of", rdfs::SUB_CLASS_OF),
    ]
    .into_iter()
    .map(|(local, iri)| (local.to_string(), iri.to_string()))
    .collect()
}

pub struct OpenKnowledgeExtractor {
    generator: Box<dyn TripletGenerator>,
    lod_prefix: String,
    language: String,
    target_token: String,
    decoder_start_token_id: u32,
    types: HashMap<String, String>,
    properties: HashMap<String, String>,
}

impl OpenKnowledgeExtractor {
    pub fn new(generator: Box<dyn TripletGenerator>, lod_prefix: &str) -> Self {
        let defaults = GenerationRequest::new("");
        Self {
            generator,
            lod_prefix: lod_prefix.trim_end_matches('/').to_string(),
            language: defaults.source_language,
            target_token: defaults.target_token,
            decoder_start_token_id: defaults.decoder_start_token_id,
            types: default_types(),
            properties: default_properties(),
        }
    }

    pub fn from_settings(
        generator: Box<dyn TripletGenerator>,
        lod_prefix: &str,
        settings: &ExtractionSettings,
    ) -> Self {
        let mut extractor = Self::new(generator, lod_prefix);
        extractor.language = settings.source_language.clone();
        extractor.target_token = settings.target_token.clone();
        extractor.decoder_start_token_id = settings.decoder_start_token_id;
        extractor.types.extend(settings.type_mappings.clone());
        extractor.properties.extend(settings.property_mappings.clone());
        extractor
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    fn entity_namespace(&self) -> String {
        format!("{}/entity/", self.lod_prefix)
    }

    fn property_namespace(&self) -> String {
        format!("{}/property/", self.lod_prefix)
    }

    fn class_namespace(&self) -> String {
        format!("{}/class/", self.lod_prefix)
    }

    /// Class IRI for an entity type tag.
    pub fn class_for(&self, tag: &str) -> String {
        self.types
            .get(tag)
            .cloned()
            .unwrap_or_else(|| namespace::join(&self.class_namespace(), &namespace::local_name(tag)))
    }

    /// Property IRI for a relation label.
    pub fn property_for(&self, relation: &str) -> String {
        let local = relation.replace(' ', "_");
        self.properties
            .get(&local)
            .cloned()
            .unwrap_or_else(|| namespace::join(&self.property_namespace(), &namespace::local_name(relation)))
    }

    /// Run the model over `text` and parse its typed triples.
    pub async fn extract(&self, text: &str, language: &str) -> Result<Vec<TypedTriple>> {
        let start_time = Instant::now();
        let request = GenerationRequest::new(text)
            .with_language(language)
            .with_target_token(self.target_token.clone())
            .with_decoder_start_token_id(self.decoder_start_token_id);

        let decoded = self.generator
            .generate(&request)
            .await
            .context("Triple generation failed")?;
        debug!("Decoded model output: {}", decoded);

        let triples = parse_typed_triples(&decoded);
        debug!(
            "Extracted {} triples from {} chars in {:.2}s",
            triples.len(),
            request.max_length,
            start_time.elapsed().as_secs_f64()
        );
        Ok(triples)
    }

    fn entity(&self, label: &str, entities: &mut HashMap<String, String>) -> Node {
        let iri = entities
            .entry(label.to_string())
            .or_insert_with(|| format!("{}{}", self.entity_namespace(), Uuid::new_v4()));
        Node::iri(iri.clone())
    }

    /// Materialize one triple: labeled, typed endpoints about the input, a
    /// labeled property, and the relation itself.
    fn assert_triple(
        &self,
        triple: &TypedTriple,
        entities: &mut HashMap<String, String>,
        output: &mut OutputResource,
    ) {
        let subject = self.entity(&triple.head, entities);
        self.describe_entity(&subject, &triple.head, &triple.head_type, output);

        let object = self.entity(&triple.tail, entities);
        self.describe_entity(&object, &triple.tail, &triple.tail_type, output);

        let property = self.property_for(&triple.relation);
        output.graph.add(
            Node::iri(property.clone()),
            rdfs::LABEL,
            Node::literal(triple.relation.clone()),
        );
        output.graph.add(subject, property, object);
    }

    fn describe_entity(&self, entity: &Node, label: &str, tag: &str, output: &mut OutputResource) {
        let graph: &mut Graph = &mut output.graph;
        graph.add(entity.clone(), rdfs::LABEL, Node::literal(label));
        graph.add(entity.clone(), rdf::TYPE, Node::iri(self.class_for(tag)));
        output.add(schema::ABOUT, entity.clone());
    }
}

#[async_trait]
impl UpdateChangeAgent for OpenKnowledgeExtractor {
    fn name(&self) -> &str {
        "extract"
    }

    fn activity_class(&self) -> String {
        namespace::wd(ACTIVITY_CLASS)
    }

    fn input_class(&self) -> String {
        schema::MEDIA_OBJECT.to_string()
    }

    fn output_class(&self) -> String {
        whyis::KNOWLEDGE_EXTRACTED_MEDIA.to_string()
    }

    fn query(&self) -> &str {
        QUERY
    }

    fn select_inputs(&self, graph: &Graph) -> Vec<Node> {
        graph.subjects_with_any(&TEXT_PROPERTIES)
    }

    async fn process(&self, input: &Resource, output: &mut OutputResource) -> Result<()> {
        // Entity IRIs are shared within one input only.
        let mut entities: HashMap<String, String> = HashMap::new();
        let mut count = 0usize;

        for literal in input.literal_values(&TEXT_PROPERTIES) {
            for paragraph in literal.value.split("\n\n") {
                if paragraph.trim().is_empty() {
                    continue;
                }

                let triples = self.extract(paragraph, &self.language).await?;
                for triple in &triples {
                    self.assert_triple(triple, &mut entities, output);
                }
                count += triples.len();
            }
        }

        info!(
            "Extracted {} triples about {} entities from {}",
            count,
            entities.len(),
            input.identifier
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::agent::AgentRunner;
    use std::sync::{Arc, Mutex};

    struct FakeGenerator {
        responses: HashMap<String, String>,
        requests: Arc<Mutex<Vec<GenerationRequest>>>,
    }

    #[async_trait]
    impl TripletGenerator for FakeGenerator {
        async fn generate(&self, request: &GenerationRequest) -> Result<String> {
            self.requests.lock().unwrap().push(request.clone());
            self.responses
                .get(&request.text)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("model unavailable"))
        }
    }

    fn extractor(responses: &[(&str, &str)]) -> (OpenKnowledgeExtractor, Arc<Mutex<Vec<GenerationRequest>>>) {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let generator = FakeGenerator {
            responses: responses
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            requests: Arc::clone(&requests),
        };
        (OpenKnowledgeExtractor::new(Box::new(generator), "http://example.org/"), requests)
    }

    fn labeled(graph: &Graph, label: &str) -> Vec<Node> {
        graph
            .iter()
            .filter(|s| s.predicate == rdfs::LABEL && s.object == Node::literal(label))
            .map(|s| s.subject.clone())
            .collect()
    }

    const PARIS: &str = "Paris is the capital of France.";
    const MACRON: &str = "Emmanuel Macron is president of France.";

    fn responses() -> Vec<(&'static str, &'static str)> {
        vec![
            (PARIS, "<s><triplet> Paris <loc> France <loc> capital of</s>"),
            (MACRON, "<s><triplet> Emmanuel Macron <per> France <loc> country of citizenship \
                      <per> president <concept> instance of</s>"),
        ]
    }

    #[test]
    fn test_type_and_property_tables() {
        let (extractor, _) = extractor(&[]);
        assert_eq!(extractor.class_for("per"), "http://www.wikidata.org/entity/Q215627");
        assert_eq!(extractor.class_for("concept"), skos::CONCEPT);
        assert_eq!(extractor.class_for("plant"), extractor.class_for("anim"));
        assert_eq!(extractor.class_for("gene"), "http://example.org/class/gene");

        assert_eq!(extractor.property_for("instance of"), rdf::TYPE);
        assert_eq!(extractor.property_for("subclass of"), rdfs::SUB_CLASS_OF);
        assert_eq!(
            extractor.property_for("country of citizenship"),
            "http://example.org/property/country_of_citizenship"
        );
    }

    #[test]
    fn test_settings_override_tables() {
        let (base, _) = extractor(&[]);
        let mut settings = ExtractionSettings::default();
        settings.source_language = "fr_XX".to_string();
        settings.type_mappings.insert("gene".to_string(), "http://example.org/Gene".to_string());
        settings.property_mappings.insert("capital_of".to_string(), "http://example.org/capitalOf".to_string());

        let extractor = OpenKnowledgeExtractor::from_settings(base.generator, "http://kg.example", &settings);
        assert_eq!(extractor.language(), "fr_XX");
        assert_eq!(extractor.class_for("gene"), "http://example.org/Gene");
        assert_eq!(extractor.class_for("per"), "http://www.wikidata.org/entity/Q215627");
        assert_eq!(extractor.property_for("capital of"), "http://example.org/capitalOf");
        assert_eq!(extractor.property_for("located in"), "http://kg.example/property/located_in");
    }

    #[tokio::test]
    async fn test_extract_builds_request() {
        let (extractor, requests) = extractor(&responses());
        let triples = extractor.extract(PARIS, "en_XX").await.unwrap();

        assert_eq!(triples.len(), 1);
        assert_eq!(triples[0].head, "Paris");
        assert_eq!(triples[0].relation, "capital of");

        let requests = requests.lock().unwrap();
        assert_eq!(requests[0].max_length, PARIS.chars().count());
        assert_eq!(requests[0].source_language, "en_XX");
        assert_eq!(requests[0].target_token, "<triplet>");
        assert_eq!(requests[0].decoder_start_token_id, 250058);
    }

    #[tokio::test]
    async fn test_process_materializes_triples() {
        let (extractor, requests) = extractor(&responses());

        let mut graph = Graph::new();
        let doc = Node::iri("http://example.org/doc");
        graph.add(doc.clone(), schema::TEXT, Node::literal(format!("{}\n\n{}", PARIS, MACRON)));

        let resource = Resource::new("http://example.org/doc", graph);
        let mut output = OutputResource::new("http://example.org/doc");
        extractor.process(&resource, &mut output).await.unwrap();

        assert_eq!(requests.lock().unwrap().len(), 2);
        let out = &output.graph;

        // France appears in both paragraphs but is minted once.
        let france = labeled(out, "France");
        assert_eq!(france.len(), 1);
        let france = &france[0];
        assert!(france.as_iri().unwrap().starts_with("http://example.org/entity/"));
        assert!(out.contains(france, rdf::TYPE, &Node::iri(namespace::wd("Q2221906"))));

        let paris = &labeled(out, "Paris")[0];
        let capital_of = Node::iri("http://example.org/property/capital_of");
        assert!(out.contains(paris, "http://example.org/property/capital_of", france));
        assert!(out.contains(&capital_of, rdfs::LABEL, &Node::literal("capital of")));

        let macron = &labeled(out, "Emmanuel Macron")[0];
        let president = &labeled(out, "president")[0];
        assert!(out.contains(macron, rdf::TYPE, &Node::iri(namespace::wd("Q215627"))));
        assert!(out.contains(macron, rdf::TYPE, president));
        assert!(out.contains(president, rdf::TYPE, &Node::iri(skos::CONCEPT)));

        for entity in [paris, france, macron, president] {
            assert!(out.contains(&doc, schema::ABOUT, entity));
        }
    }

    #[tokio::test]
    async fn test_entities_are_not_shared_between_inputs() {
        let (extractor, _) = extractor(&responses());
        let mut graph = Graph::new();
        graph.add(Node::iri("http://example.org/a"), schema::TEXT, Node::literal(PARIS));
        graph.add(Node::iri("http://example.org/b"), schema::CAPTION, Node::literal(PARIS));
        graph.add(Node::iri("http://example.org/c"), schema::ABOUT, Node::literal(PARIS));

        assert_eq!(
            extractor.select_inputs(&graph),
            vec![Node::iri("http://example.org/a"), Node::iri("http://example.org/b")]
        );

        let report = AgentRunner::new("http://example.org").run(&extractor, &graph).await;
        assert_eq!(report.activities.len(), 2);
        assert_eq!(labeled(&report.output, "Paris").len(), 2);
        assert!(report.output.contains(
            &Node::iri("http://example.org/b"),
            rdf::TYPE,
            &Node::iri(whyis::KNOWLEDGE_EXTRACTED_MEDIA)
        ));
    }

    #[tokio::test]
    async fn test_process_reads_all_text_properties_and_skips_blank_paragraphs() {
        let (extractor, requests) = extractor(&responses());
        let mut graph = Graph::new();
        let doc = Node::iri("http://example.org/doc");
        graph.add(doc.clone(), schema::CAPTION, Node::literal(MACRON));
        graph.add(doc.clone(), schema::DESCRIPTION, Node::literal(format!("{}\n\n  \n\n", PARIS)));

        let mut output = OutputResource::new("http://example.org/doc");
        extractor
            .process(&Resource::new("http://example.org/doc", graph), &mut output)
            .await
            .unwrap();

        let texts: Vec<String> = requests.lock().unwrap().iter().map(|r| r.text.clone()).collect();
        assert_eq!(texts, vec![PARIS.to_string(), MACRON.to_string()]);
    }

    #[tokio::test]
    async fn test_generation_failure_fails_the_input() {
        let (extractor, _) = extractor(&[]);
        let mut graph = Graph::new();
        graph.add(Node::iri("http://example.org/doc"), schema::TEXT, Node::literal("unknown text"));

        let report = AgentRunner::new("http://example.org").run(&extractor, &graph).await;
        assert_eq!(report.failures().count(), 1);
        assert!(report.activities[0].errors[0].contains("model unavailable"));
        assert!(report.output.is_empty());
    }

    #[tokio::test]
    async fn test_no_triples_still_succeeds() {
        let (extractor, _) = extractor(&[("Nothing here.", "<s></s>")]);
        let mut output = OutputResource::new("http://example.org/doc");
        let mut graph = Graph::new();
        graph.add(Node::iri("http://example.org/doc"), schema::TEXT, Node::literal("Nothing here."));

        extractor
            .process(&Resource::new("http://example.org/doc", graph), &mut output)
            .await
            .unwrap();
        assert!(output.graph.is_empty());
    }
}
