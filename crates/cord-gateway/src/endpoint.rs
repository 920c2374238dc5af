//! Gateway connection URL

use url::Url;

use crate::error::GatewayError;

/// Build the socket URL: `v`, `encoding` and, when enabled,
/// `compress=zlib-stream` are set on `base`; other query parameters it
/// already carries are kept.
pub fn gateway_url(
    base: &str,
    version: u8,
    encoding: &str,
    compress: bool,
) -> Result<Url, GatewayError> {
    let mut url = Url::parse(base)?;

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !matches!(key.as_ref(), "v" | "encoding" | "compress"))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    {
        let mut query = url.query_pairs_mut();
        query.clear();
        query.extend_pairs(kept);
        query.append_pair("v", &version.to_string());
        query.append_pair("encoding", encoding);
        if compress {
            query.append_pair("compress", "zlib-stream");
        }
    }

    Ok(url)
}
