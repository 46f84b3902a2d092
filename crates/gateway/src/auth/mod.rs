pub mod token;

pub use token::{token_from_cookie_header, Claims, TokenVerifier};
