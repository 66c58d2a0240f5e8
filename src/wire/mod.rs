//! Wire codec: typed netstrings and the frames built from them.

pub mod context;
pub mod netstring;
pub mod packet;

pub use context::Context;
pub use netstring::{NetString, NetStringParser, NetStringWriter};
pub use packet::{DecodedPacket, PacketDecoder, RequestHeader, assemble_request, assemble_response};
