//! D365 Web API service-to-service client
//!
//! Acquires app-only tokens from Azure AD with the client credentials grant
//! and performs create/read/update calls against the Dynamics 365 Web API.

pub mod auth;
pub mod config;
pub mod odata;

pub use auth::{AccessToken, AuthError, AzureAdAuth, Credentials, TokenProvider};
pub use config::{Config, ConfigError, RuntimeConfig};
pub use odata::{ODataClient, ODataError, ODataRequest, ProtocolError, RequestBuilder};
