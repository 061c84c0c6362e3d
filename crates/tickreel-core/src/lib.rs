pub mod codec;
pub mod error;
pub mod meta;

pub use codec::{Compression, JsonCodec, PayloadCodec, SegmentData};
pub use error::{Error, Result};
pub use meta::{ReplayMeta, TickMeta};
