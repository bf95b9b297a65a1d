//! One sentence-sized unit of payload plus metadata -- the granularity of
//! the outbound queue (spec.md Glossary: "senblk").

use std::time::SystemTime;

/// A single sentence record moving through the multiplexer.
#[derive(Debug, Clone)]
pub struct Senblk {
    /// Raw sentence bytes, including any trailing CR/LF the source supplied.
    pub data: Vec<u8>,
    /// When this record was read or synthesized, for tag rendering.
    pub timestamp: SystemTime,
    /// Numeric id of the interface that originated this record, for filters
    /// and tags that need to know the source.
    pub source_id: u32,
}

impl Senblk {
    #[must_use]
    pub fn new(data: Vec<u8>, source_id: u32) -> Self {
        Senblk { data, timestamp: SystemTime::now(), source_id }
    }
}
