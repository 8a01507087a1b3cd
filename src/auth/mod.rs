// Authentication module
// Manages the credential lifecycle: JWT, authorization code and refresh grants

mod types;
mod token_endpoint;
mod code_grant;
mod manager;

pub mod browser;
pub mod callback;
pub mod consent;
pub mod jwt;
pub mod refresh;

pub use browser::{BrowserLauncher, PrintUrl, SystemBrowser};
#[cfg(any(test, feature = "test-utils"))]
pub use browser::RecordingBrowser;
pub use callback::CallbackListener;
pub use code_grant::exchange_code;
pub use manager::{AuthState, CredentialManager, ManagerOptions};
pub use refresh::refresh_access_token;
pub use token_endpoint::basic_authorization;
pub use types::{Credential, GrantKind, IdentityConfig, CONSENT_REQUIRED};
