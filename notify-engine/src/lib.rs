//! Notification dispatch: accepting sends, rendering templates, enforcing
//! user preferences, and driving each notification through its delivery
//! lifecycle with retries and an audit trail.

pub mod audit;
pub mod engine;
pub mod preferences;
pub mod queue;
pub mod request;
pub mod templates;

pub use audit::{AuditDetail, AuditLog};
pub use engine::{retry_delay, DispatchEngine};
pub use preferences::{PreferenceDecision, PreferenceService, PreferenceUpdate};
pub use queue::{delivery_queue, DeliveryHandler, DeliveryQueue, DeliveryReceiver, WorkerPool};
pub use request::{
    BatchRecipient, BatchRequest, BatchResult, RejectedRecipient, SendRequest, TemplateSendRequest,
};
pub use templates::{NewTemplate, RenderedContent, TemplateRenderer, TemplateService, TemplateUpdate};
