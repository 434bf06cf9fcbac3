//! Services layer for the identity service.
//!
//! Business logic over the store and the external collaborators; transport
//! concerns stay in the handlers.

mod accounts;
pub mod audit;
mod certificates;
pub mod collaborators;
mod context;
pub mod error;
mod login;
pub mod password;
mod tokens;
pub mod two_factor;

pub use accounts::AccountService;
pub use audit::AuditRecorder;
pub use certificates::{CertificateService, IssuedCredential};
pub use collaborators::{
    CertificateAuthority, CollaboratorError, Communicator, Directory, DirectoryUser,
    FederatedClaims, FederatedIdentityProvider, IssuedCertificate, MockCertificateAuthority,
    MockCommunicator, MockDirectory, MockIdentityProvider,
};
pub use context::RequestContext;
pub use error::ServiceError;
pub use login::{LoginOutcome, LoginService, LoginStatus};
pub use tokens::{AccessTokenClaims, TokenIssuer};
pub use two_factor::{TwoFactorService, TwoFactorVerdict};
