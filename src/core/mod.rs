pub mod agent;
pub mod extractor;
pub mod ocr;
pub mod rebel_client;
pub mod triple_parser;

pub use agent::{ActivityRecord, AgentRunner, OutputResource, Resource, RunReport, UpdateChangeAgent};
pub use extractor::OpenKnowledgeExtractor;
pub use ocr::{OcrCaptioner, OcrEngine, TesseractEngine};
pub use rebel_client::{GenerationRequest, RebelClient, TripletGenerator};
pub use triple_parser::{parse_typed_triples, TypedTriple};
