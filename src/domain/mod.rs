pub mod error;
pub mod model;

pub use error::AppError;
pub use model::{
    ConnectionState, Cookie, DownloadRecord, InterceptPolicy, PendingInterceptContext,
    ServerCredentials,
};
