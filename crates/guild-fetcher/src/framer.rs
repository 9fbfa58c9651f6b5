//! Request framing.
//!
//! Resolves a resource against the configured API locations and lays out the
//! method, headers and body of the wire request. A signature travels in the
//! `x-guild-params` / `x-guild-sig` headers for GET requests, which carry no
//! body, and inside the JSON body for everything else. `x-guild-auth-location`
//! tells the backend which of the two to read.

use crate::FetchError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use guild_config::ApiConfig;
use guild_types::SignatureBundle;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Method;
use serde_json::Value;
use std::fmt;

pub const SIG_HEADER: HeaderName = HeaderName::from_static("x-guild-sig");
pub const PARAMS_HEADER: HeaderName = HeaderName::from_static("x-guild-params");
pub const AUTH_LOCATION_HEADER: HeaderName = HeaderName::from_static("x-guild-auth-location");

/// Where the backend finds the signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthLocation {
	Header,
	Body,
}

impl AuthLocation {
	pub fn as_str(&self) -> &'static str {
		match self {
			AuthLocation::Header => "header",
			AuthLocation::Body => "body",
		}
	}
}

impl fmt::Display for AuthLocation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A resolved request target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
	pub url: String,
	/// Whether the target is the platform API, whose errors are normalized.
	pub platform: bool,
}

fn is_version_segment(segment: &str) -> bool {
	segment
		.strip_prefix('v')
		.is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

/// Collapses the run of version segments at the start of the path to its last
/// one, so that a versioned resource under a versioned base (`/v1/v2/guilds`)
/// addresses `/v2/guilds`. Version-like segments further down are kept.
pub fn collapse_versions(url: &str) -> String {
	let (head, query) = url.split_at(url.find('?').unwrap_or(url.len()));
	let (origin, path) = match head.find("://") {
		Some(scheme_end) => {
			let host_start = scheme_end + 3;
			let path_start = head[host_start..]
				.find('/')
				.map_or(head.len(), |i| host_start + i);
			head.split_at(path_start)
		},
		None => ("", head),
	};

	let segments: Vec<&str> = path.split('/').collect();
	// segments[0] is the empty string before the leading '/'
	let leading = segments
		.iter()
		.skip(1)
		.take_while(|segment| is_version_segment(segment))
		.count();
	if leading < 2 {
		return url.to_string();
	}

	let mut kept = vec![segments[0]];
	kept.extend_from_slice(&segments[leading..]);
	format!("{}{}{}", origin, kept.join("/"), query)
}

/// Joins `resource` onto `base` and collapses doubled version segments.
pub fn resolve_endpoint(base: &str, resource: &str) -> String {
	let base = base.trim_end_matches('/');
	if resource.starts_with('/') || resource.is_empty() {
		collapse_versions(&format!("{}{}", base, resource))
	} else {
		collapse_versions(&format!("{}/{}", base, resource))
	}
}

/// Maps resources onto the platform API, the web application or external
/// absolute URLs.
#[derive(Debug, Clone)]
pub struct EndpointResolver {
	base_url: String,
	app_url: Option<String>,
}

impl EndpointResolver {
	pub fn new(base_url: impl Into<String>, app_url: Option<String>) -> Self {
		Self {
			base_url: base_url.into().trim_end_matches('/').to_string(),
			app_url: app_url.map(|url| url.trim_end_matches('/').to_string()),
		}
	}

	pub fn from_config(config: &ApiConfig) -> Self {
		Self::new(config.base_url.clone(), config.app_url.clone())
	}

	pub fn base_url(&self) -> &str {
		&self.base_url
	}

	/// Resolves `resource`.
	///
	/// - absolute URLs are used as given, and count as platform requests when
	///   they point below the API base URL
	/// - `/api/...` resources belong to the web application
	/// - anything else is a platform resource below the API base URL
	pub fn resolve(&self, resource: &str) -> Result<Endpoint, FetchError> {
		if resource.starts_with("http") {
			return Ok(Endpoint {
				url: collapse_versions(resource),
				platform: resource.contains(&self.base_url),
			});
		}

		if resource.starts_with("/api") {
			let app_url = self.app_url.as_deref().ok_or_else(|| {
				FetchError::InvalidRequest(format!(
					"'{}' targets the web application but api.app_url is not configured",
					resource
				))
			})?;
			return Ok(Endpoint {
				url: resolve_endpoint(app_url, resource),
				platform: false,
			});
		}

		Ok(Endpoint {
			url: resolve_endpoint(&self.base_url, resource),
			platform: true,
		})
	}
}

/// A request ready for the transport.
#[derive(Debug, Clone)]
pub struct FramedRequest {
	pub method: Method,
	pub url: String,
	pub headers: HeaderMap,
	pub body: Option<String>,
	pub platform: bool,
	pub auth_location: Option<AuthLocation>,
}

/// Lays out a request.
///
/// With a body or a signature the method defaults to POST and the content
/// type to JSON. A signed body is `{ "payload": <signed payload>, "params",
/// "sig" }`; the unsigned body is dropped in that case since the signed
/// payload already embeds it. Caller `headers` override the defaults.
pub fn frame(
	endpoint: Endpoint,
	method: Option<Method>,
	body: Option<&Value>,
	signature: Option<&SignatureBundle>,
	headers: &HeaderMap,
) -> Result<FramedRequest, FetchError> {
	let has_content = body.is_some() || signature.is_some();
	let method = method.unwrap_or(if has_content { Method::POST } else { Method::GET });

	let mut framed_headers = HeaderMap::new();
	if has_content {
		framed_headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
	}
	for (name, value) in headers {
		framed_headers.insert(name.clone(), value.clone());
	}

	let mut framed_body = match (signature, body) {
		(Some(bundle), _) => Some(bundle.body().to_string()),
		(None, Some(body)) => Some(body.to_string()),
		(None, None) => None,
	};

	let auth_location = match signature {
		Some(bundle) if method == Method::GET => {
			framed_body = None;

			let params = serde_json::to_string(&bundle.validation.params)
				.map_err(|e| FetchError::InvalidRequest(format!("Unserializable params: {}", e)))?;
			let sig = bundle.validation.signature_bytes().map_err(|e| {
				FetchError::InvalidRequest(format!("Signature is not valid hex: {}", e))
			})?;

			framed_headers.insert(PARAMS_HEADER, header_value(BASE64.encode(params))?);
			framed_headers.insert(SIG_HEADER, header_value(BASE64.encode(sig))?);
			framed_headers.insert(
				AUTH_LOCATION_HEADER,
				HeaderValue::from_static(AuthLocation::Header.as_str()),
			);
			Some(AuthLocation::Header)
		},
		Some(_) => {
			framed_headers.insert(
				AUTH_LOCATION_HEADER,
				HeaderValue::from_static(AuthLocation::Body.as_str()),
			);
			Some(AuthLocation::Body)
		},
		None => None,
	};

	Ok(FramedRequest {
		method,
		url: endpoint.url,
		headers: framed_headers,
		body: framed_body,
		platform: endpoint.platform,
		auth_location,
	})
}

fn header_value(value: String) -> Result<HeaderValue, FetchError> {
	HeaderValue::from_str(&value).map_err(|e| FetchError::InvalidRequest(e.to_string()))
}

#[cfg(test)]
mod tests {
	use super::*;
	use guild_types::{SignedPayload, Validation, ValidationParams};
	use serde_json::json;

	fn bundle() -> SignatureBundle {
		let params = ValidationParams {
			addr: "0xabc".to_string(),
			method: 1,
			chain_id: Some("1".to_string()),
			hash: "0x11".to_string(),
			nonce: "0x22".to_string(),
			ts: "1700000000000".to_string(),
			msg: "Please sign this message".to_string(),
		};
		SignatureBundle {
			signed_payload: SignedPayload::bind(r#"{"roleId":3}"#, 1_700_000_000_000),
			validation: Validation::new(&params, "0xdeadbeef".to_string()).unwrap(),
		}
	}

	fn platform(url: &str) -> Endpoint {
		Endpoint {
			url: url.to_string(),
			platform: true,
		}
	}

	#[test]
	fn test_double_version_collapse() {
		assert_eq!(
			resolve_endpoint("https://api.guild.xyz", "/v1/v2/guilds/5/pin"),
			"https://api.guild.xyz/v2/guilds/5/pin"
		);
		assert_eq!(
			resolve_endpoint("https://api.guild.xyz/v1", "/v2/guilds/5/pin"),
			"https://api.guild.xyz/v2/guilds/5/pin"
		);
		assert_eq!(
			resolve_endpoint("https://api.guild.xyz/v1/", "guilds?x=/v1/v2/"),
			"https://api.guild.xyz/v1/guilds?x=/v1/v2/"
		);
		assert_eq!(collapse_versions("/v1/v2/"), "/v2/");
		assert_eq!(collapse_versions("/v1/v1/v2/guilds"), "/v2/guilds");
		assert_eq!(collapse_versions("/vault/v2/x"), "/vault/v2/x");
	}

	#[test]
	fn test_version_segments_inside_path_are_kept() {
		assert_eq!(
			collapse_versions("https://api.guild.xyz/v2/guilds/v1/v2/roles"),
			"https://api.guild.xyz/v2/guilds/v1/v2/roles"
		);
		assert_eq!(
			resolve_endpoint("https://api.guild.xyz/v1", "/guilds/v1/v2/x"),
			"https://api.guild.xyz/v1/guilds/v1/v2/x"
		);
		assert_eq!(collapse_versions("https://api.guild.xyz"), "https://api.guild.xyz");
	}

	#[test]
	fn test_resolver_targets() {
		let resolver = EndpointResolver::new(
			"https://api.guild.xyz/v1/",
			Some("https://guild.xyz".to_string()),
		);

		let endpoint = resolver.resolve("/guilds/5").unwrap();
		assert_eq!(endpoint.url, "https://api.guild.xyz/v1/guilds/5");
		assert!(endpoint.platform);

		let endpoint = resolver.resolve("/api/timestamp").unwrap();
		assert_eq!(endpoint.url, "https://guild.xyz/api/timestamp");
		assert!(!endpoint.platform);

		let endpoint = resolver.resolve("https://example.com/data").unwrap();
		assert!(!endpoint.platform);
		let endpoint = resolver.resolve("https://api.guild.xyz/v1/users/1").unwrap();
		assert!(endpoint.platform);
	}

	#[test]
	fn test_app_resource_needs_app_url() {
		let resolver = EndpointResolver::new("https://api.guild.xyz/v1", None);
		assert!(matches!(
			resolver.resolve("/api/timestamp"),
			Err(FetchError::InvalidRequest(_))
		));
	}

	#[test]
	fn test_plain_get_has_no_body_or_content_type() {
		let framed = frame(platform("https://x/v1/a"), None, None, None, &HeaderMap::new()).unwrap();
		assert_eq!(framed.method, Method::GET);
		assert!(framed.body.is_none());
		assert!(framed.headers.get(CONTENT_TYPE).is_none());
		assert!(framed.auth_location.is_none());
	}

	#[test]
	fn test_body_defaults_to_json_post() {
		let body = json!({ "name": "guild" });
		let framed = frame(platform("https://x/v1/a"), None, Some(&body), None, &HeaderMap::new()).unwrap();
		assert_eq!(framed.method, Method::POST);
		assert_eq!(framed.headers[CONTENT_TYPE], "application/json");
		assert_eq!(framed.body.as_deref(), Some(r#"{"name":"guild"}"#));
	}

	#[test]
	fn test_signed_get_uses_headers() {
		let bundle = bundle();
		let framed = frame(
			platform("https://x/v1/a"),
			Some(Method::GET),
			None,
			Some(&bundle),
			&HeaderMap::new(),
		)
		.unwrap();

		assert!(framed.body.is_none());
		assert_eq!(framed.auth_location, Some(AuthLocation::Header));
		assert_eq!(framed.headers[&AUTH_LOCATION_HEADER], "header");

		let params = BASE64.decode(framed.headers[&PARAMS_HEADER].as_bytes()).unwrap();
		assert_eq!(params, serde_json::to_vec(&bundle.validation.params).unwrap());
		let sig = BASE64.decode(framed.headers[&SIG_HEADER].as_bytes()).unwrap();
		assert_eq!(sig, vec![0xde, 0xad, 0xbe, 0xef]);
	}

	#[test]
	fn test_signed_post_uses_body() {
		let bundle = bundle();
		let ignored = json!({ "ignored": true });
		let framed = frame(
			platform("https://x/v1/a"),
			None,
			Some(&ignored),
			Some(&bundle),
			&HeaderMap::new(),
		)
		.unwrap();

		assert_eq!(framed.method, Method::POST);
		assert_eq!(framed.headers[&AUTH_LOCATION_HEADER], "body");
		assert!(framed.headers.get(&PARAMS_HEADER).is_none());
		assert!(framed.headers.get(&SIG_HEADER).is_none());

		let body: Value = serde_json::from_str(framed.body.as_deref().unwrap()).unwrap();
		assert_eq!(body["payload"], bundle.signed_payload.as_str());
		assert_eq!(body["params"], bundle.validation.params);
		assert_eq!(body["sig"], "0xdeadbeef");
	}

	#[test]
	fn test_caller_headers_override_defaults() {
		let mut headers = HeaderMap::new();
		headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
		headers.insert("x-extra", HeaderValue::from_static("1"));
		let body = json!("raw");
		let framed = frame(
			platform("https://x/v1/a"),
			Some(Method::PUT),
			Some(&body),
			None,
			&headers,
		)
		.unwrap();
		assert_eq!(framed.method, Method::PUT);
		assert_eq!(framed.headers[CONTENT_TYPE], "text/plain");
		assert_eq!(framed.headers["x-extra"], "1");
	}

	#[test]
	fn test_invalid_signature_hex_rejected() {
		let mut bundle = bundle();
		bundle.validation.sig = "0xnothex".to_string();
		let result = frame(
			platform("https://x/v1/a"),
			Some(Method::GET),
			None,
			Some(&bundle),
			&HeaderMap::new(),
		);
		assert!(matches!(result, Err(FetchError::InvalidRequest(_))));
	}
}
