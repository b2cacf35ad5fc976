//! HTTP clients for services the fleet manager depends on.

pub mod ams;

use url::Url;

/// Makes sure a url has a trailing slash, so that `join` appends to its path instead of replacing the last segment.
pub(crate) fn ensure_slash(url: &Url) -> Url {
    if url.path().ends_with('/') {
        url.clone()
    } else {
        let mut new_url = url.clone();
        let path = format!("{}/", url.path());
        new_url.set_path(&path);
        new_url
    }
}
