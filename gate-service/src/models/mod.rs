pub mod check;
pub mod identity;
pub mod login_attempt;
pub mod security_event;
pub mod session;

pub use check::{CheckId, CheckReport, CheckResult, CheckStatus};
pub use identity::{AdminIdentity, Capability, Identity, Role, TwoFactorMethod};
pub use login_attempt::LoginAttempt;
pub use security_event::{SecurityEvent, SecurityEventType, Severity};
pub use session::Session;
