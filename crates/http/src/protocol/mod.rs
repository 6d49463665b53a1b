//! Protocol types shared by the codec and the connection layer.
//!
//! - **Message framing** ([`Message`], [`PayloadItem`], [`PayloadSize`]): a decoded
//!   or encoded HTTP message is a head followed by payload items and an EOF marker
//! - **Requests** ([`ParsedRequest`]): the immutable result of parsing a request head
//! - **Responses** ([`ResponseHead`], [`ReasonPhrase`]): the head written before a body
//! - **Bodies** ([`body`]): streaming access to a request body while the connection
//!   keeps ownership of the underlying reader
//! - **Errors** ([`ParseError`] while reading, [`SendError`] while writing)

mod message;
pub use message::Message;
pub use message::PayloadItem;
pub use message::PayloadSize;

mod request;
pub use request::ParsedRequest;

mod response;
pub use response::ReasonPhrase;
pub use response::ResponseHead;

mod error;
pub use error::ParseError;
pub use error::SendError;

pub mod body;
