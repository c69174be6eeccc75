pub mod soft_authenticator;

pub use fixtures::*;
pub use soft_authenticator::SoftAuthenticator;
