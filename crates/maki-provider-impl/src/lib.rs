pub mod client;
pub mod families;
pub mod oauth;
pub mod registry;
pub mod store;

pub use client::{HttpRequest, HttpResponse, UpstreamClient, WreqClient};
pub use oauth::manager::{AuthManager, AuthStart, PendingPoll};
pub use registry::{FamilyRegistry, ProviderEndpoints};
pub use store::CredentialStore;
