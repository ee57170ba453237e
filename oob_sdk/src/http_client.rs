use std::time::Duration;

use once_cell::sync::OnceCell;

/// Short links are expected to resolve quickly
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_REDIRECTS: usize = 5;

#[derive(Debug)]
pub(crate) struct ReqwestClientError {
    pub(crate) context: &'static str,
    pub(crate) source: reqwest::Error,
}

/// Shared client used to follow invitation short links
pub(crate) fn reqwest_client() -> Result<&'static reqwest::Client, ReqwestClientError> {
    static CLIENT: OnceCell<reqwest::Client> = OnceCell::new();

    CLIENT.get_or_try_init(|| {
        reqwest::Client::builder()
            .user_agent(concat!("oob_sdk/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ReqwestClientError {
                context: "Client build error",
                source: e,
            })
    })
}
