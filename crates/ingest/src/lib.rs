pub mod loader;
pub mod normalizer;
pub mod record;
pub mod schema;

pub use loader::RawDocumentLoader;
pub use normalizer::{
    CenturyPivot, DroppedField, MetadataNormalizer, NormalizationError, NormalizedDocument,
};
pub use record::{DocumentRecord, MetadataValue, RawDocument};
pub use schema::{AttributeSchema, AttributeSpec, AttributeType};
