//! Domain types shared by the authority and its stores.

pub mod principal;
pub mod refresh_token;

pub use principal::{
    DEFAULT_ROLE, DEFAULT_SCOPES, MIN_PASSWORD_LEN, MIN_USERNAME_LEN, NewUser, Principal, UserView,
};
pub use refresh_token::RefreshToken;
