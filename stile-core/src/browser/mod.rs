mod error;
mod headers;
mod proxy;
mod session;

pub use error::{SessionError, SessionResult};
pub use headers::{HeaderProfile, HeaderProfilePool};
pub use proxy::ProxyPool;
pub use session::{BrowserSession, SessionLauncher};
