pub mod jwt;
pub mod pkce;
