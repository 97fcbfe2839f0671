//! API Routes

pub mod health;
pub mod vault;

pub use health::health_router;
pub use vault::{vault_router, SharedOrchestrator};
