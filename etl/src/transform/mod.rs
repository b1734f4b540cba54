mod base;
pub mod mapping;

pub use base::Transformer;
pub use mapping::MappingTransformer;
