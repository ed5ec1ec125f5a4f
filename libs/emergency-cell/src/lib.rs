// libs/emergency-cell/src/lib.rs
//! # Emergency Consultation Cell
//!
//! On-demand emergency video consultations: a patient with emergency credits
//! asks a specific available doctor for help, the doctor is offered the
//! request, claims it, and the two meet in a freshly provisioned video room.
//! One credit is charged once the consultation has run past the billing
//! threshold.
//!
//! ## Architecture
//!
//! ```text
//! +-----------------------------------------------------+
//! |                 Emergency Cell                      |
//! +-----------------------------------------------------+
//! |  handlers.rs     |  HTTP endpoint handlers          |
//! |  router.rs       |  Route definitions               |
//! |  models.rs       |  Sessions, DTOs, errors          |
//! |  services/       |  Business logic layer            |
//! |    lifecycle.rs  |  Session lifecycle controller    |
//! |    store.rs      |  Session store (memory/Supabase) |
//! |    registry.rs   |  Doctor offers (memory/Redis)    |
//! |    ledger.rs     |  Emergency credit ledger         |
//! |    directory.rs  |  Patient/doctor profiles         |
//! |    rooms.rs      |  Video room provider client      |
//! |    billing.rs    |  Time-gated billing rule         |
//! |    clock.rs      |  Injectable time source          |
//! +-----------------------------------------------------+
//! ```
//!
//! ## API Endpoints
//!
//! - `POST /emergency/start` - Patient starts a session with `{ doctor_id }`
//! - `GET /emergency/notifications/{doctor_id}` - Doctor polls for an offer
//! - `POST /emergency/join/{session_id}` - Doctor claims the session
//! - `GET /emergency/consultation/{session_id}` - Role-filtered session detail
//! - `POST /emergency/end/{session_id}` - Either participant ends the session
//! - `GET /emergency/status/{session_id}` - Billing countdown, read-only
//! - `POST /emergency/check-time/{session_id}` - Charge once past the threshold
//! - `POST /emergency/complete/{session_id}` - Doctor marks it concluded
//! - `GET /emergency/verify-room/{room_name}` - Room existence for participants
//! - `GET /emergency/health` - Backend health (public)
//! - `POST /emergency/admin/cleanup` - Cancel unclaimed sessions (admin)
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use emergency_cell::{emergency_routes, EmergencyState};
//! use shared_config::AppConfig;
//!
//! # async fn example() {
//! let config = Arc::new(AppConfig::from_env());
//! let state = EmergencyState::from_config(config).await;
//! let routes = emergency_routes(state);
//! # }
//! ```
//!
//! ## Configuration
//!
//! - `ROOM_PROVIDER_API_KEY` / `ROOM_PROVIDER_BASE_URL` - video room provider
//! - `EMERGENCY_STORAGE_BACKEND` - `memory` (default) or `supabase`
//! - `REDIS_URL` - shares doctor offers across API instances
//! - `EMERGENCY_BILLING_THRESHOLD_MINUTES`, `EMERGENCY_BILLING_ANCHOR`,
//!   `EMERGENCY_NOTIFICATION_TTL_MINUTES`, `EMERGENCY_ROOM_DURATION_MINUTES`

pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use handlers::EmergencyState;
pub use models::{EmergencyError, EmergencySession, Notification, SessionStatus};
pub use router::emergency_routes;
pub use services::EmergencyService;
