pub mod config;
pub mod core;
pub mod handlers;
pub mod utils;
pub mod knowledge_graph;

pub use config::Configuration;
pub use core::{AgentRunner, OcrCaptioner, OpenKnowledgeExtractor, UpdateChangeAgent};
pub use handlers::ImageLoader;
pub use knowledge_graph::Graph;
