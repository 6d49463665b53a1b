//! The response side of the calling convention: `start_response` and the body.

mod body;
mod collector;

pub use body::ResponseBody;
pub use collector::BodyWriter;
pub use collector::StartResponse;
pub use collector::Started;
