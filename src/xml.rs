//! Inner XML format for the decrypted vault payload

mod decoders;
pub(crate) mod parse;
pub(crate) mod serialize;

pub use crate::stream::random::InnerStreamError;
pub use parse::{parse_xml, Error as ParseError};
pub use serialize::{write_xml, Error as SerializeError};
