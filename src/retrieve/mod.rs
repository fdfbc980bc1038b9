pub mod ky_http;

pub use ky_http::{ApiResponse, KyHttp, KyOptions, RawResponse};
