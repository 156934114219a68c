pub mod backend;
pub mod noop;
pub mod notifier;
pub mod router;
pub mod teams;

pub use backend::{AlertSummary, Digest, NotifyBackend};
pub use noop::NoopBackend;
pub use notifier::{FlushStats, Notifier};
pub use router::NotifyRouter;
pub use teams::TeamsWebhook;
