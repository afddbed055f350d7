pub mod confidence;
pub mod embedding;
pub mod extract;
pub mod orchestrator;
pub mod reference;
pub mod resolver;
pub mod types;

pub use embedding::{Embedder, EncoderEmbedder};
pub use extract::{ExtractionProtocol, RepresentativeExtractor};
pub use orchestrator::{PipelineOrchestrator, RunSummary};
pub use reference::ReferenceData;
pub use resolver::EntityResolver;
pub use types::{Category, ClassificationRow, MacroPayload, Payload};
