// NLP module for pii-ner
pub mod flatten;
pub mod label;
pub mod locate;
pub mod ner;
pub mod text;
pub mod train;

pub use flatten::convert_json_to_lines;
pub use locate::{build_jsonp, map_entities, MappedEntity};
