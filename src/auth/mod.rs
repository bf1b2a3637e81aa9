pub mod claims;
pub mod cookies;
pub mod extractors;
pub mod jwt;
pub mod password;
pub mod tokens;

pub use extractors::AuthUser;
pub use jwt::JwtKeys;
pub use tokens::{TokenPair, TokenService};
