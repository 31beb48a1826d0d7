//! Platform-A adapter: Redmine over JSON REST.

mod redmine;

pub use redmine::{
    RedmineClient, RedmineConfig, RedmineTransport, ReqwestRedmineTransport, RestMethod,
    RestRequest, RestResponse, DEFAULT_PAGE_SIZE,
};
