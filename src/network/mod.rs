//! Network subsystem for raw PCM datagram transport

pub mod relay;
pub mod sender;
pub mod udp;

pub use relay::{ReceiveRelay, RelayStats, RelayStep};
pub use sender::{EndpointResolver, StreamSender};
pub use udp::{bind_relay, bind_sender, create_socket};
