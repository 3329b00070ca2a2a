pub mod channels;
pub mod error;
pub mod portal;
pub mod protocol;
pub mod requests;
pub mod tcp;

pub use channels::{PortalChannel, PortalRx, PortalTx};
pub use error::PortalError;
pub use portal::{portal_pair, Outbound, PortalEnd, PortalEvent, PortalLink};
pub use protocol::{ParseModeError, PortalToServer, RestartMode, ServerToPortal};
pub use requests::RequestTracker;
pub use tcp::TcpPortalLink;
