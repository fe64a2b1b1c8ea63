//! MQTT module - packet codec, transport session, and publisher

mod codec;
mod publisher;
mod session;

pub use codec::LengthMode;
pub use publisher::Publisher;
pub use session::{Connection, SessionOptions, SessionState};
