//! Platform-B adapter: GitLab over JSON REST (API v4).

mod gitlab;

pub use gitlab::{
    GitlabClient, GitlabConfig, GitlabTransport, ReqwestGitlabTransport, RestMethod, RestRequest,
    RestResponse, DEFAULT_PAGE_SIZE,
};
