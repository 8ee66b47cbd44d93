pub mod analysis;
pub mod cache;
mod coerce;
pub mod error;
pub mod gemini;
pub mod json_recovery;
pub mod ocr_space;
pub mod pipeline;
pub mod product;
pub mod redis;
mod template;

#[cfg(test)]
pub(crate) mod testing;
