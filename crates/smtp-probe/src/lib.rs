pub mod client;
pub mod client_types;
mod tls;
mod traits;

pub use client::*;
pub use client_types::*;
pub use tls::TlsOptions;
pub use traits::{AsyncReadAndWrite, BoxedAsyncReadAndWrite};
