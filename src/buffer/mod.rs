//! Byte buffering for the connection I/O pipeline: a pooled ring buffer for
//! the steady state, a linked chunk buffer for overflow, and the elastic
//! composite the connections actually use.

pub mod elastic;
pub mod linked;
pub mod ring;

pub use elastic::ElasticBuffer;
pub use linked::LinkedBuffer;
pub use ring::RingBuffer;
