pub mod decode;
pub mod executor;
pub mod paginate;
pub mod request;
pub mod retry;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use decode::PageResult;
pub use executor::{Exchange, RequestExecutor};
pub use paginate::PaginatingFetcher;
pub use request::{Endpoint, FetchRequest, OutputFormat, Right, ALL_EXPIRATIONS};
pub use retry::{Backoff, RetryPolicy};
pub use transport::{LimitedTransport, RawResponse, ReqwestTransport, Transport};

/// Status the service uses for "nothing to return for this slice".
pub const NO_DATA_STATUS: u16 = 472;

/// Continuation header (`Next-Page` on the wire; header names are case-insensitive).
pub const NEXT_PAGE_HEADER: &str = "next-page";

/// `Next-Page` value meaning the current page is the last one.
pub const NO_MORE_PAGES: &str = "null";
