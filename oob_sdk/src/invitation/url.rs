//! Transport-agnostic invitation URLs: the invitation JSON, base64url encoded,
//! appended as a query parameter to an arbitrary base URL.

use base64ct::{Base64UrlUnpadded, Encoding};
use serde::Serialize;
use url::Url;

use super::{
    AnyInvitation, ConnectionInvitation, InvitationError, OutOfBandInvitation,
    OutOfBandInvitationV2, decode_base64,
};
use crate::messages::AgentMessage;

pub const OUT_OF_BAND_PARAM: &str = "oob";
pub const OUT_OF_BAND_V2_PARAM: &str = "_oob";
pub const CONNECTION_INVITATION_PARAM: &str = "c_i";
pub const CONNECTIONLESS_PARAM: &str = "d_m";

const PARAMS: [&str; 4] = [
    OUT_OF_BAND_PARAM,
    OUT_OF_BAND_V2_PARAM,
    CONNECTION_INVITATION_PARAM,
    CONNECTIONLESS_PARAM,
];

fn encode_param(domain: &Url, param: &str, document: &impl Serialize) -> Result<Url, InvitationError> {
    let json = serde_json::to_string(document)?;

    let mut url = domain.clone();
    url.query_pairs_mut()
        .append_pair(param, &Base64UrlUnpadded::encode_string(json.as_bytes()));

    Ok(url)
}

impl OutOfBandInvitation {
    pub fn to_url(&self, domain: &Url) -> Result<Url, InvitationError> {
        encode_param(domain, OUT_OF_BAND_PARAM, self)
    }
}

impl OutOfBandInvitationV2 {
    pub fn to_url(&self, domain: &Url) -> Result<Url, InvitationError> {
        encode_param(domain, OUT_OF_BAND_V2_PARAM, self)
    }
}

impl ConnectionInvitation {
    pub fn to_url(&self, domain: &Url) -> Result<Url, InvitationError> {
        encode_param(domain, CONNECTION_INVITATION_PARAM, self)
    }
}

/// Find the first known invitation parameter in `url`
fn find_param(url: &Url) -> Option<(String, String)> {
    url.query_pairs()
        .find(|(name, _)| PARAMS.contains(&name.as_ref()))
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
}

fn decode_param(param: &str, value: &str) -> Result<AnyInvitation, InvitationError> {
    let bytes = decode_base64(value).ok_or_else(|| InvitationError::InvalidEncoding(param.to_string()))?;
    let json = std::str::from_utf8(&bytes)
        .map_err(|_| InvitationError::InvalidEncoding(param.to_string()))?;

    if param == CONNECTIONLESS_PARAM {
        let message: AgentMessage = serde_json::from_str(json)?;
        return Ok(AnyInvitation::Connectionless(message));
    }

    AnyInvitation::from_json(json)
}

/// Decode an invitation URL that carries the invitation in its query
pub fn parse_invitation_url(invitation_url: &str) -> Result<AnyInvitation, InvitationError> {
    let url = Url::parse(invitation_url)?;

    match find_param(&url) {
        Some((param, value)) => decode_param(&param, &value),
        None => Err(InvitationError::MissingParameter(invitation_url.to_string())),
    }
}

/// Decode an invitation URL, following short links.
///
/// When the URL does not carry an invitation itself it is fetched: either the
/// link redirects to a URL carrying the invitation, or it serves the
/// invitation as a JSON document.
#[cfg(feature = "resolve")]
pub async fn fetch_invitation(invitation_url: &str) -> Result<AnyInvitation, InvitationError> {
    let url = Url::parse(invitation_url)?;

    if let Some((param, value)) = find_param(&url) {
        return decode_param(&param, &value);
    }

    let client = crate::http_client::reqwest_client()
        .map_err(|e| InvitationError::Http(e.context.to_string(), e.source))?;

    tracing::debug!("fetching short link {url}");

    let response = client
        .get(url.clone())
        .header(reqwest::header::ACCEPT, "application/json")
        .send()
        .await
        .map_err(|e| InvitationError::Http(url.to_string(), e))?
        .error_for_status()
        .map_err(|e| InvitationError::Http(url.to_string(), e))?;

    if let Some((param, value)) = find_param(response.url()) {
        return decode_param(&param, &value);
    }

    let is_json = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|content_type| content_type.contains("json"));

    if !is_json {
        return Err(InvitationError::MissingParameter(invitation_url.to_string()));
    }

    let body = response
        .text()
        .await
        .map_err(|e| InvitationError::Http(url.to_string(), e))?;

    AnyInvitation::from_json(&body)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::invitation::{InlineService, OutOfBandService};
    use crate::key::Key;

    fn domain() -> Url {
        Url::parse("https://example.com/ssi").unwrap()
    }

    fn invitation() -> OutOfBandInvitation {
        let key = Key::from_fingerprint("z6MkhaXgBZDvotDkL5257faiztiGiC2QtKLGpbnnEGta2doK").unwrap();
        let mut invitation = OutOfBandInvitation::new("Faber");
        invitation.handshake_protocols = Some(vec!["https://didcomm.org/didexchange/1.1".into()]);
        invitation.services = vec![OutOfBandService::Inline(InlineService::new(
            "#inline-0",
            &[key],
            &[],
            "https://faber.example",
        ))];

        invitation
    }

    #[test]
    fn test_encode_decode_url() {
        let invitation = invitation();
        let url = invitation.to_url(&domain()).unwrap();

        assert!(url.as_str().starts_with("https://example.com/ssi?oob="));

        let AnyInvitation::OutOfBand(decoded) = parse_invitation_url(url.as_str()).unwrap() else {
            panic!("expected an out-of-band invitation");
        };
        assert_eq!(decoded, invitation);
    }

    #[test]
    fn test_legacy_url() {
        let legacy = ConnectionInvitation::from_out_of_band(&invitation()).unwrap();
        let url = legacy.to_url(&domain()).unwrap();

        assert!(url.query().unwrap().starts_with("c_i="));
        assert!(matches!(
            parse_invitation_url(url.as_str()).unwrap(),
            AnyInvitation::Connection(decoded) if decoded == legacy
        ));
    }

    #[test]
    fn test_padded_parameter() {
        let json = serde_json::to_string(&invitation()).unwrap();
        let padded = base64ct::Base64Url::encode_string(json.as_bytes());
        let url = format!("https://example.com?oob={padded}");

        assert!(matches!(
            parse_invitation_url(&url).unwrap(),
            AnyInvitation::OutOfBand(_)
        ));
    }

    /// Serves canned responses by path over plain HTTP/1.1
    #[cfg(feature = "resolve")]
    async fn serve(routes: Vec<(&'static str, String)>) -> Url {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = Url::parse(&format!("http://{}", listener.local_addr().unwrap())).unwrap();

        tokio::spawn(async move {
            loop {
                let (mut stream, _) = listener.accept().await.unwrap();

                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = stream.read(&mut buf).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..n]);
                }

                let request = String::from_utf8_lossy(&request);
                let path = request.split_whitespace().nth(1).unwrap_or("/");

                let response = routes
                    .iter()
                    .find(|(route, _)| path.starts_with(route))
                    .map(|(_, response)| response.clone())
                    .unwrap_or_else(|| {
                        "HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                            .to_string()
                    });

                stream.write_all(response.as_bytes()).await.unwrap();
                stream.shutdown().await.unwrap();
            }
        });

        base
    }

    #[cfg(feature = "resolve")]
    fn ok(content_type: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 200 OK\r\ncontent-type: {content_type}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    #[cfg(feature = "resolve")]
    #[tokio::test]
    async fn test_fetch_short_links() {
        let invitation = invitation();
        let json = serde_json::to_string(&invitation).unwrap();
        let landing = invitation.to_url(&domain()).unwrap();
        let redirect = format!(
            "HTTP/1.1 302 Found\r\nlocation: /landing?{}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
            landing.query().unwrap()
        );

        let base = serve(vec![
            ("/redirect", redirect),
            ("/landing", ok("text/html", "<html></html>")),
            ("/json", ok("application/json; charset=utf-8", &json)),
            ("/page", ok("text/html", "<html>no invitation here</html>")),
        ])
        .await;

        // a known parameter is decoded without a request
        assert!(matches!(
            fetch_invitation(landing.as_str()).await.unwrap(),
            AnyInvitation::OutOfBand(decoded) if decoded == invitation
        ));

        // the redirect target carries the invitation
        let url = base.join("/redirect").unwrap();
        assert!(matches!(
            fetch_invitation(url.as_str()).await.unwrap(),
            AnyInvitation::OutOfBand(decoded) if decoded == invitation
        ));

        // the link serves the invitation document
        let url = base.join("/json").unwrap();
        assert!(matches!(
            fetch_invitation(url.as_str()).await.unwrap(),
            AnyInvitation::OutOfBand(decoded) if decoded == invitation
        ));

        let url = base.join("/page").unwrap();
        assert!(matches!(
            fetch_invitation(url.as_str()).await,
            Err(InvitationError::MissingParameter(_))
        ));

        let url = base.join("/gone").unwrap();
        assert!(matches!(
            fetch_invitation(url.as_str()).await,
            Err(InvitationError::Http(failed, _)) if failed == url.as_str()
        ));
    }

    #[test]
    fn test_missing_parameter() {
        assert!(matches!(
            parse_invitation_url("https://example.com?foo=bar"),
            Err(InvitationError::MissingParameter(_))
        ));
        assert!(matches!(
            parse_invitation_url("https://example.com?oob=%%%"),
            Err(InvitationError::InvalidEncoding(_))
        ));
        assert!(matches!(
            parse_invitation_url("not a url"),
            Err(InvitationError::Url(_))
        ));
    }
}
