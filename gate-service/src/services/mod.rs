pub mod console;
pub mod database;
pub mod email;
pub mod error;
pub mod identity;
pub mod memory;
pub mod metrics;
pub mod mirror;
pub mod origin;
pub mod policy;
pub mod session;
pub mod store;
pub mod totp;

pub use console::{ConsoleHost, ConsoleRegistry, CONSOLE_COOKIE};
pub use database::PgStore;
pub use email::{CodeSender, OutboxCodeSender, SmtpCodeSender};
pub use error::{
    AuthError, AuthorizationError, ChallengeError, DirectoryError, GateError, PolicyError,
    SessionError, StorageDegraded, StoreError,
};
pub use identity::StaticIdentity;
pub use memory::MemoryStore;
pub use mirror::{FileMirror, MemoryMirror, MirrorEntry, SessionMirror};
pub use origin::{FixedOrigin, OriginResolver, TrustedProxies, UNKNOWN_ORIGIN};
pub use policy::{DefaultSecurityPolicy, LockoutPolicy, OriginAllowList, OriginDecision, SecurityPolicy};
pub use session::{SessionManager, SessionRequest, SessionSettings, SessionSignal, SessionValidity};
pub use store::{AdminDirectory, IdentityProvider, SecurityLedger, SessionStore};
pub use totp::TotpVerifier;
