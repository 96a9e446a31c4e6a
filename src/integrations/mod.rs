//! External service integrations.

pub mod oracle {
    pub use crate::oracle::*;
}

pub mod services {
    pub use crate::services::*;
}
