//! Lock-Free Ring Buffer
//!
//! Provides a fixed-capacity SPSC ring buffer that can live in a `static`
//! and be shared between an interrupt handler (producer) and a polling
//! loop (consumer).

mod buffer;

pub use buffer::RingBuffer;
