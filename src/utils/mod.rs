pub mod serialization;

pub use serialization::{validate_graph, RdfSerializer};
