// Data Parsers
//
// Each input format is turned into a `Value` tree the renderer can navigate.

pub mod ccda;
pub mod hl7v2;
pub mod json;

use crate::errors::Result;
use crate::model::Value;

pub use ccda::CcdaDataParser;
pub use hl7v2::Hl7v2DataParser;
pub use json::JsonDataParser;

/// Turns raw input text into a navigable value tree
pub trait DataParser: Send + Sync {
    fn parse(&self, input: &str) -> Result<Value>;
}
