// Domain-layer modules and shared errors/models
pub mod detection {
    pub use crate::detection::*;
}

pub mod enrichment {
    pub use crate::enrichment::*;
}

pub mod qualification {
    pub use crate::qualification::*;
}

pub mod scoring {
    pub use crate::scoring::*;
}

pub mod models {
    pub use crate::models::*;
}

pub mod errors {
    pub use crate::errors::*;
}
