// libs/emergency-cell/src/services/mod.rs

pub mod billing;
pub mod clock;
pub mod directory;
pub mod ledger;
pub mod lifecycle;
pub mod registry;
pub mod rooms;
pub mod store;

pub use billing::{project_billing, BillingPolicy, BillingProjection};
pub use clock::{Clock, ManualClock, SystemClock};
pub use directory::{InMemoryDirectory, SupabaseDirectory, UserDirectory};
pub use ledger::CreditLedger;
pub use lifecycle::{EmergencyBackends, EmergencyHealth, EmergencyService, EmergencySettings};
pub use registry::{InMemoryNotificationRegistry, NotificationRegistry, RedisNotificationRegistry};
pub use rooms::{ReadinessPolicy, RoomProviderClient, RoomProvisioner};
pub use store::{
    ClaimOutcome, FinishOutcome, InMemorySessionStore, SessionStore, SupabaseSessionStore,
};
