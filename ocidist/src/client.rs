use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use log::{error, info, trace, warn};
use moka::{Expiry, future::Cache};
use oci_spec::{
    OciSpecError,
    image::{Digest, DigestAlgorithm, ImageIndex, ImageManifest},
};
use reqwest::{Method, Response, StatusCode, header, header::HeaderValue};
use serde::Deserialize;
use sha2::Sha256;

const DOCKER_CONTENT_DIGEST_HEADER: &str = "docker-content-digest";
const OCI_IMAGE_INDEX_V1: &str = "application/vnd.oci.image.index.v1+json";
const OCI_IMAGE_MANIFEST_V1: &str = "application/vnd.oci.image.manifest.v1+json";
const DOCKER_IMAGE_MANIFEST_V1: &str = "application/vnd.docker.distribution.manifest.v1+json";
const DOCKER_IMAGE_MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
const DOCKER_IMAGE_MANIFEST_LIST_V2: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";

// the four-way union spec.md 4.1 asks for, plus the legacy schema-1 type so the projector can
// classify it itself instead of us rejecting it here
const ACCEPTED_ANY_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json, application/vnd.docker.distribution.manifest.v2+json, application/vnd.oci.image.index.v1+json, application/vnd.docker.distribution.manifest.list.v2+json, application/vnd.docker.distribution.manifest.v1+json";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    Reqwest(#[from] reqwest::Error),
    OciSpecError(#[from] OciSpecError),
    Json(#[from] serde_json::Error),
    DigestMismatch,
    BadDigest,
    BadDockerContentDigest,
    InvalidAuth,
    Unknown,
    RatelimitExceeded,
    BadContentType(String),
    DigestAlgorithmNotHandled(DigestAlgorithm),
    StatusNotOk(StatusCode),
}

// how wrong is this? kept from the upstream client this facade is adapted from
impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

// NOTES
// the client is Clone, modeled after moka::Cache being Clone and relying on interior mutability
// so call sites can take &self instead of threading a mutable handle through every request.

#[derive(PartialEq, Eq, Hash, Debug, Clone)]
struct TokenCacheKey {
    registry: String,
    scope: String,
}

#[derive(Clone)]
struct Token {
    token: String,
    expires_in: Duration,
}

#[derive(Default)]
struct ExpireToken;

impl Expiry<TokenCacheKey, Token> for ExpireToken {
    fn expire_after_create(
        &self,
        _key: &TokenCacheKey,
        value: &Token,
        _current_time: Instant,
    ) -> Option<Duration> {
        trace!("{_key:?} expires in {:?}", value.expires_in);
        Some(value.expires_in)
    }
}

/// Per-backend credential configuration. `Anonymous` still completes the bearer challenge
/// (most registries, public ones included, require a token even for unauthenticated pulls);
/// `UserPass` attempts the exchange with Basic auth at the token endpoint.
#[derive(Debug, Clone)]
pub enum Auth {
    Anonymous,
    UserPass(String, String),
}

type UtcInstant = DateTime<Utc>;

pub type AuthMap = BTreeMap<String, Auth>;
pub type RatelimitMap = BTreeMap<String, UtcInstant>;

/// One OCI manifest or index, with classification already applied from the response's
/// content type. Schema-1 (legacy Docker) manifests are handed back as raw JSON since
/// oci-spec has no typed model for them.
pub enum Manifest {
    Index(ImageIndex),
    Image(ImageManifest),
    Schema1(serde_json::Value),
}

pub struct RawManifest {
    pub content_type: String,
    pub digest: Option<Digest>,
    pub data: Bytes,
}

impl RawManifest {
    pub fn classify(&self) -> Result<Manifest, Error> {
        match self.content_type.as_str() {
            OCI_IMAGE_INDEX_V1 | DOCKER_IMAGE_MANIFEST_LIST_V2 => Ok(Manifest::Index(
                ImageIndex::from_reader(std::io::Cursor::new(&self.data))?,
            )),
            OCI_IMAGE_MANIFEST_V1 | DOCKER_IMAGE_MANIFEST_V2 => Ok(Manifest::Image(
                ImageManifest::from_reader(std::io::Cursor::new(&self.data))?,
            )),
            DOCKER_IMAGE_MANIFEST_V1 => Ok(Manifest::Schema1(serde_json::from_slice(&self.data)?)),
            other => Err(Error::BadContentType(other.to_string())),
        }
    }
}

#[derive(Clone)]
pub struct Client {
    client: reqwest::Client,
    token_cache: Cache<TokenCacheKey, Token>,
    ratelimit: std::sync::Arc<tokio::sync::RwLock<RatelimitMap>>,
}

impl Client {
    pub fn new() -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(2))
            .https_only(true)
            .timeout(Duration::from_secs(30))
            .build()?;

        let token_cache = Cache::builder()
            .max_capacity(10_000_000)
            .weigher(|k: &TokenCacheKey, v: &Token| {
                (k.registry.len() + k.scope.len() + v.token.len())
                    .try_into()
                    .unwrap_or(u32::MAX)
            })
            .eviction_listener(move |k, _v, reason| {
                trace!("token eviction {k:?} {reason:?}");
            })
            .expire_after(ExpireToken)
            .build();

        Ok(Client {
            client,
            token_cache,
            ratelimit: std::sync::Arc::new(tokio::sync::RwLock::new(BTreeMap::new())),
        })
    }

    /// `GET /v2/{repo}/manifests/{tag_or_digest}` with the full manifest/index accept union.
    /// Returns `None` on 404. Caller classifies the content type via `RawManifest::classify`.
    pub async fn get_manifest(
        &self,
        registry: &str,
        repo: &str,
        tag_or_digest: &str,
        auth: &Auth,
    ) -> Result<Option<RawManifest>, Error> {
        let url = format!("https://{registry}/v2/{repo}/manifests/{tag_or_digest}");
        trace!("GET {url}");
        let request = self
            .client
            .request(Method::GET, &url)
            .header(header::ACCEPT, ACCEPTED_ANY_MANIFEST);

        let response = self
            .auth_and_retry(registry, &scope_for_repo(repo), auth, request)
            .await?;

        match response.status() {
            StatusCode::OK => {
                let digest = get_docker_content_digest(&response)?;
                let content_type = response
                    .headers()
                    .get(header::CONTENT_TYPE)
                    .map(|x| x.to_str().unwrap_or("").to_string())
                    .unwrap_or_default();
                let data = response.bytes().await?;
                check_data_matches_digest(digest.as_ref(), &data)?;
                Ok(Some(RawManifest {
                    content_type,
                    digest,
                    data,
                }))
            }
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(status_not_ok(response).await),
        }
    }

    /// `GET /v2/{repo}/blobs/{digest}`. Used for the image config blob; this facade never
    /// streams layer blobs to a client.
    pub async fn get_blob(
        &self,
        registry: &str,
        repo: &str,
        digest: &Digest,
        auth: &Auth,
    ) -> Result<Option<Bytes>, Error> {
        let url = format!(
            "https://{registry}/v2/{repo}/blobs/{}:{}",
            digest.algorithm().as_ref(),
            digest.digest()
        );
        trace!("GET {url}");
        let request = self.client.request(Method::GET, &url);
        let response = self
            .auth_and_retry(registry, &scope_for_repo(repo), auth, request)
            .await?;

        match response.status() {
            StatusCode::OK => {
                let data = response.bytes().await?;
                match digest.algorithm() {
                    DigestAlgorithm::Sha256 => {
                        use sha2::Digest as _;
                        let mut hasher = Sha256::new();
                        hasher.update(&data);
                        check_digest_matches(digest, hasher)?;
                    }
                    algo => {
                        error!("blob algo not handled {}", algo);
                        return Err(Error::DigestAlgorithmNotHandled(algo.clone()));
                    }
                }
                Ok(Some(data))
            }
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(status_not_ok(response).await),
        }
    }

    /// `GET /v2/_catalog?n=..[&last=..]`. Returns the repository names on this page and the
    /// `last` cursor to pass for the next page (`None` once the upstream stops paginating).
    pub async fn get_catalog(
        &self,
        registry: &str,
        catalog_path: &str,
        n: u32,
        last: Option<&str>,
        auth: &Auth,
    ) -> Result<(Vec<String>, Option<String>), Error> {
        #[derive(Deserialize)]
        struct CatalogResponse {
            repositories: Vec<String>,
        }

        let mut url = format!("https://{registry}{catalog_path}?n={n}");
        if let Some(last) = last {
            url.push_str(&format!("&last={last}"));
        }
        trace!("GET {url}");
        let request = self.client.request(Method::GET, &url);
        let response = self
            .auth_and_retry(registry, CATALOG_SCOPE, auth, request)
            .await?;

        match response.status() {
            StatusCode::OK => {
                let next = parse_link_next(response.headers());
                let body: CatalogResponse = response.json().await?;
                Ok((body.repositories, next))
            }
            StatusCode::NOT_FOUND => Ok((Vec::new(), None)),
            _ => Err(status_not_ok(response).await),
        }
    }

    /// `GET /v2/{repo}/tags/list`.
    pub async fn get_tags_list(
        &self,
        registry: &str,
        repo: &str,
        auth: &Auth,
    ) -> Result<Vec<String>, Error> {
        #[derive(Deserialize)]
        struct TagsResponse {
            tags: Vec<String>,
        }

        let url = format!("https://{registry}/v2/{repo}/tags/list");
        trace!("GET {url}");
        let request = self.client.request(Method::GET, &url);
        let response = self
            .auth_and_retry(registry, &scope_for_repo(repo), auth, request)
            .await?;

        match response.status() {
            StatusCode::OK => {
                let body: TagsResponse = response.json().await?;
                Ok(body.tags)
            }
            StatusCode::NOT_FOUND => Ok(Vec::new()),
            _ => Err(status_not_ok(response).await),
        }
    }

    async fn get_token_for(
        &self,
        registry: &str,
        scope: &str,
        auth: &Auth,
        www_auth: &WWWAuthenticateBearerRealmService<'_>,
    ) -> Result<Token, Error> {
        let key = TokenCacheKey {
            registry: registry.to_string(),
            scope: scope.to_string(),
        };
        let entry = match auth {
            Auth::Anonymous => {
                self.token_cache
                    .entry(key)
                    .or_try_insert_with(retreive_token_anonymous(
                        self.client.clone(),
                        www_auth,
                        scope,
                    ))
                    .await
            }
            Auth::UserPass(user, pass) => {
                self.token_cache
                    .entry(key)
                    .or_try_insert_with(retreive_token_user_pass(
                        self.client.clone(),
                        www_auth,
                        scope,
                        user,
                        pass,
                    ))
                    .await
            }
        }
        .map_err(|e| {
            error!("error acquiring token {:?}", e);
            Error::Unknown
        })?;
        if entry.is_fresh() {
            trace!("got new token for {}/{}", registry, scope);
        }
        Ok(entry.into_value())
    }

    // when sending a request, we first check the token cache for a (registry,scope) token and
    // add it if present. We then send the request and (even with a cached token that could have
    // expired) there is a possibility we get 401. If so, we look at the WWW-Authenticate header
    // for the realm+service, fetch (or refresh) a token, and retry once.
    async fn auth_and_retry(
        &self,
        registry: &str,
        scope: &str,
        auth: &Auth,
        mut req: reqwest::RequestBuilder,
    ) -> Result<Response, Error> {
        self.check_ratelimit(registry).await?;

        let req_copy = req.try_clone().unwrap();

        let key = TokenCacheKey {
            registry: registry.to_string(),
            scope: scope.to_string(),
        };
        if let Some(token) = self.token_cache.get(&key).await {
            req = req.bearer_auth(token.token);
        }

        let res = req.send().await?;
        self.handle_ratelimit(registry, &res).await?;

        if res.status() != StatusCode::UNAUTHORIZED {
            return Ok(res);
        }

        let www_auth = res
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .and_then(parse_www_authenticate_bearer_header)
            .ok_or_else(|| {
                error!(
                    "bad auth but couldn't get www-authenticate header {:?}",
                    res.headers().get(header::WWW_AUTHENTICATE)
                );
                Error::StatusNotOk(StatusCode::UNAUTHORIZED)
            })?;

        let token = self.get_token_for(registry, scope, auth, &www_auth).await?;

        let res = req_copy.bearer_auth(token.token).send().await?;
        self.handle_ratelimit(registry, &res).await?;
        Ok(res)
    }

    async fn check_ratelimit(&self, registry: &str) -> Result<(), Error> {
        let mut remove = false;
        if let Some(ratelimit_end) = self.ratelimit.read().await.get(registry) {
            if Utc::now() < *ratelimit_end {
                warn!("still in ratelimit reset period for {registry}");
                return Err(Error::RatelimitExceeded);
            } else {
                remove = true;
            }
        }
        if remove {
            self.ratelimit.write().await.remove(registry);
        }
        Ok(())
    }

    async fn handle_ratelimit(&self, registry: &str, res: &Response) -> Result<(), Error> {
        // ghcr apparently returns either 403 or 429
        if !matches!(
            res.status(),
            StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS
        ) {
            return Ok(());
        }

        if let Some(remaining) = get_ratelimit_remaining_header(res.headers()) {
            info!("parsed ratelimit header {:?}", remaining);
        }

        let end: UtcInstant = if let Some(reset) = get_ratelimit_reset_header(res.headers()) {
            let now = Utc::now();
            let time = reset
                .try_into()
                .ok()
                .and_then(|x| DateTime::<Utc>::from_timestamp(x, 0))
                .unwrap_or_else(|| {
                    error!("bad reset timestamp");
                    now + Duration::from_secs(DEFAULT_RATELIMIT_RESET)
                });
            if now > time {
                warn!("got ratelimit reset in past, assuming it is a duration");
                now + Duration::from_secs(reset)
            } else {
                time
            }
        } else {
            warn!(
                "got res status {} from {} but no ratelimit-reset",
                res.status(),
                registry
            );
            Utc::now() + Duration::from_secs(DEFAULT_RATELIMIT_RESET)
        };

        warn!("hit ratelimit for registry={}", registry);
        self.ratelimit
            .write()
            .await
            .insert(registry.to_string(), end);

        Err(Error::RatelimitExceeded)
    }
}

fn scope_for_repo(repo: &str) -> String {
    format!("repository:{repo}:pull")
}

const CATALOG_SCOPE: &str = "registry:catalog:*";

async fn status_not_ok(res: Response) -> Error {
    let status = res.status();
    if log::log_enabled!(log::Level::Trace) {
        match res.text().await {
            Ok(body) => trace!("status={}, body={}", status, body),
            Err(e) => trace!("unhandled error getting body, status={status}, error={e:?}"),
        }
    }
    Error::StatusNotOk(status)
}

async fn retreive_token_anonymous(
    client: reqwest::Client,
    www_auth: &WWWAuthenticateBearerRealmService<'_>,
    scope: &str,
) -> Result<Token, Error> {
    #[derive(Deserialize)]
    struct JsonToken {
        token: Option<String>,
        access_token: Option<String>,
        expires_in: Option<u64>,
    }

    let token = client
        .request(Method::GET, www_auth.realm)
        .query(&[("scope", scope), ("service", www_auth.service)])
        .send()
        .await?
        .json::<JsonToken>()
        .await?;

    let expires_in = Duration::from_secs(token.expires_in.unwrap_or(60));
    let token = token
        .token
        .or(token.access_token)
        .ok_or(Error::InvalidAuth)?;
    Ok(Token { token, expires_in })
}

async fn retreive_token_user_pass(
    client: reqwest::Client,
    www_auth: &WWWAuthenticateBearerRealmService<'_>,
    scope: &str,
    user: &str,
    pass: &str,
) -> Result<Token, Error> {
    #[derive(Deserialize)]
    struct JsonToken {
        token: Option<String>,
        access_token: Option<String>,
        expires_in: Option<u64>,
    }

    let token = client
        .request(Method::GET, www_auth.realm)
        .query(&[("scope", scope), ("service", www_auth.service)])
        .basic_auth(user, Some(pass))
        .send()
        .await?
        .json::<JsonToken>()
        .await?;

    // https://distribution.github.io/distribution/spec/auth/token/#token-response-fields
    // gives the default as 60 seconds
    let expires_in = Duration::from_secs(token.expires_in.unwrap_or(60));
    let token = token
        .token
        .or(token.access_token)
        .ok_or(Error::InvalidAuth)?;
    Ok(Token { token, expires_in })
}

fn get_docker_content_digest(response: &reqwest::Response) -> Result<Option<Digest>, Error> {
    response
        .headers()
        .get(DOCKER_CONTENT_DIGEST_HEADER)
        .map(|header_value| -> Result<Digest, Error> {
            header_value
                .to_str()
                .map_err(|_| Error::BadDockerContentDigest)?
                .try_into()
                .map_err(|_| Error::BadDockerContentDigest)
        })
        .transpose()
}

fn check_digest_matches(expected: &Digest, digest: impl sha2::Digest) -> Result<(), Error> {
    if digest_eq(expected.digest(), digest) {
        Ok(())
    } else {
        Err(Error::DigestMismatch)
    }
}

fn check_data_matches_digest(expected: Option<&Digest>, data: &[u8]) -> Result<(), Error> {
    if let Some(expected) = expected {
        if data_matches_digest(expected, data)? {
            Ok(())
        } else {
            Err(Error::DigestMismatch)
        }
    } else {
        Ok(())
    }
}

fn data_matches_digest(expected: &Digest, data: &[u8]) -> Result<bool, Error> {
    match expected.algorithm() {
        DigestAlgorithm::Sha256 => {
            use sha2::Digest as _;
            let mut hasher = Sha256::new();
            hasher.update(data);
            Ok(digest_eq(expected.digest(), hasher))
        }
        algo => {
            error!("manifest algo not handled {}", algo);
            Err(Error::DigestAlgorithmNotHandled(algo.clone()))
        }
    }
}

// is this too weird? it checks without allocating.
// oci_spec::image::Digest guarantees the format of the digest string (length, lower hex), so
// instead of decoding the digest string into bytes we encode the computed digest bytes into
// ASCII one nibble at a time and compare byte-for-byte.
fn digest_eq(digest_lower_hex_str: &str, digest: impl sha2::Digest) -> bool {
    let digest_bytes = digest.finalize();
    let l = digest_lower_hex_str.len();
    if l != 2 * digest_bytes.len() {
        return false;
    }

    #[rustfmt::skip]
    const LUT: [u8; 16] = [
        48, 49, 50, 51, 52, 53, 54, 55, 56, 57,
        97, 98, 99, 100, 101, 102,
    ];
    let as_byte_pairs = <str as AsRef<[u8]>>::as_ref(digest_lower_hex_str).chunks_exact(2);

    as_byte_pairs.zip(digest_bytes).all(|(pair, byte)| {
        LUT[(byte >> 4) as usize] == pair[0] && LUT[(byte & 0xf) as usize] == pair[1]
    })
}

#[derive(Default)]
struct WWWAuthenticateBearer<'a> {
    realm: Option<&'a str>,
    service: Option<&'a str>,
    scope: Option<&'a str>,
}

struct WWWAuthenticateBearerRealmService<'a> {
    realm: &'a str,
    service: &'a str,
}

fn parse_www_authenticate_bearer_header(
    input: &HeaderValue,
) -> Option<WWWAuthenticateBearerRealmService<'_>> {
    let res = parse_www_authenticate_bearer_str(input.to_str().ok()?)?;
    Some(WWWAuthenticateBearerRealmService {
        realm: res.realm?,
        service: res.service?,
    })
}

fn parse_www_authenticate_bearer_str(input: &str) -> Option<WWWAuthenticateBearer<'_>> {
    use nom::{
        IResult, Parser,
        bytes::{complete::tag, take_until1},
        character::complete::{alpha1, char},
        multi::{many0, many1, separated_list0},
        sequence::{delimited, preceded, separated_pair, terminated},
    };
    fn parser(input: &str) -> IResult<&str, Vec<(&str, &str)>> {
        let (input, matches) = preceded(
            terminated(tag("Bearer"), many1(tag(" "))),
            separated_list0(
                terminated(tag(","), many0(tag(" "))),
                separated_pair(
                    alpha1,
                    tag("="),
                    delimited(char('"'), take_until1("\""), char('"')),
                ),
            ),
        )
        .parse(input)?;
        Ok((input, matches))
    }
    let (_, matches) = parser(input).ok()?;
    let mut ret = WWWAuthenticateBearer::default();
    for (k, v) in matches.into_iter() {
        match k {
            "realm" => ret.realm = Some(v),
            "service" => ret.service = Some(v),
            "scope" => ret.scope = Some(v),
            _ => {}
        }
    }
    Some(ret)
}

#[allow(dead_code)]
const DEFAULT_RATELIMIT_WINDOW: u32 = 60 * 60;
const DEFAULT_RATELIMIT_RESET: u64 = 60;

#[derive(Debug, PartialEq, Eq)]
struct RatelimitRemaining {
    quota: u32,
    window: Option<u32>,
}

fn get_ratelimit_remaining_header(map: &reqwest::header::HeaderMap) -> Option<RatelimitRemaining> {
    map.get("ratelimit-remaining")
        .or_else(|| map.get("x-ratelimit-remaining"))
        .and_then(|v| parse_ratelimit_remaining_str(v.to_str().ok()?))
}

fn parse_ratelimit_remaining_str(input: &str) -> Option<RatelimitRemaining> {
    if let Some((l, r)) = input.split_once(";w=") {
        let quota = l.parse().ok()?;
        let window = Some(r.parse().ok()?);
        Some(RatelimitRemaining { quota, window })
    } else {
        let quota = input.parse().ok()?;
        Some(RatelimitRemaining {
            quota,
            window: None,
        })
    }
}

// https://www.ietf.org/archive/id/draft-polli-ratelimit-headers-02.html#section-3.3
// RFC draft says seconds-until-reset, but github/docker both send an absolute epoch timestamp.
fn get_ratelimit_reset_header(map: &reqwest::header::HeaderMap) -> Option<u64> {
    map.get("ratelimit-reset")
        .or_else(|| map.get("x-ratelimit-reset"))
        .and_then(|v| v.to_str().ok()?.parse().ok())
}

// RFC 5988: `<url>; rel="next"`
fn parse_link_next(map: &reqwest::header::HeaderMap) -> Option<String> {
    let value = map.get(header::LINK)?.to_str().ok()?;
    for part in value.split(',') {
        let part = part.trim();
        if part.contains("rel=\"next\"") {
            let start = part.find('<')? + 1;
            let end = part.find('>')?;
            if let Some(qs) = part.get(start..end)?.rsplit_once("last=") {
                return Some(qs.1.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_eq() {
        fn sha256_digest(data: impl AsRef<[u8]>) -> impl sha2::Digest {
            use sha2::Digest;
            let mut hasher = Sha256::new();
            hasher.update(data);
            hasher
        }
        assert!(digest_eq(
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad",
            sha256_digest("abc"),
        ));
        assert!(!digest_eq(
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015a",
            sha256_digest("abc"),
        ));
        assert!(!digest_eq(
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ae",
            sha256_digest("abc"),
        ));
    }

    #[test]
    fn test_www_authenticate() {
        let cases = [
            r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:samalba/my-app:pull,push""#,
            r#"Bearer realm="https://auth.docker.io/token", service="registry.docker.io",scope="repository:samalba/my-app:pull,push""#,
            r#"Bearer realm="https://auth.docker.io/token", service="registry.docker.io", scope="repository:samalba/my-app:pull,push""#,
            r#"Bearer    realm="https://auth.docker.io/token",   service="registry.docker.io", scope="repository:samalba/my-app:pull,push""#,
            r#"Bearer   service="registry.docker.io", scope="repository:samalba/my-app:pull,push",realm="https://auth.docker.io/token""#,
        ];
        for case in cases.iter() {
            let x = parse_www_authenticate_bearer_str(case).unwrap();
            assert_eq!(x.realm, Some("https://auth.docker.io/token"), "{}", case);
            assert_eq!(x.service, Some("registry.docker.io"), "{}", case);
            assert_eq!(
                x.scope,
                Some("repository:samalba/my-app:pull,push"),
                "{}",
                case
            );
        }
    }

    #[test]
    fn test_ratelimit_remaining() {
        assert_eq!(
            RatelimitRemaining {
                quota: 100,
                window: None
            },
            parse_ratelimit_remaining_str("100").unwrap()
        );
        assert_eq!(
            RatelimitRemaining {
                quota: 100,
                window: Some(3600)
            },
            parse_ratelimit_remaining_str("100;w=3600").unwrap()
        );
        assert_eq!(None, parse_ratelimit_remaining_str("x100;w=3600"));
        assert_eq!(None, parse_ratelimit_remaining_str("100x;w=3600"));
    }
}
