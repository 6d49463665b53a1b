//! Streaming access to request bodies.
//!
//! The connection owns the framed reader, yet the application needs to pull body
//! chunks while it runs. The two sides are connected by channels:
//!
//! - [`ReqBody`] is the consumer. It implements `http_body::Body` and is what the
//!   application reads from. Every poll sends a request signal to the producer.
//! - [`BodySender`] is the producer. It borrows the payload stream and answers each
//!   signal with the next [`PayloadItem`](crate::protocol::PayloadItem). Once the
//!   consumer goes away it drains the rest of the body so the next request on the
//!   connection starts at the right byte.
//!
//! The producer only reads when asked, so an application that never touches the
//! body costs one drain pass after it returns.

mod body_channel;

pub use body_channel::BodySender;
pub use body_channel::ReqBody;
