//! The HTTP request pipeline: throttle, sign, encode, dispatch,
//! classify, parse, unwrap — in that order, for every adapter.

use hyper::client::HttpConnector;
use hyper::{Body, Client, Method, Request, Uri};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use mmb_domain::error::ExchangeError;
use serde_json::Value;
use std::sync::Arc;

use crate::config::ExchangeConfig;
use crate::events::EventEmitter;
use crate::throttle::Throttle;
use crate::venue::{emit_rate_limit_warning, BodyEncoding, HttpMethod, RequestSpec, SignedRequest, VenueAdapter};

const KEEP_ALIVE: &str = "keep-alive";

fn create_client() -> Client<HttpsConnector<HttpConnector>> {
    let https = HttpsConnectorBuilder::new()
        .with_native_roots()
        .https_only()
        .enable_http1()
        .enable_http2()
        .build();
    Client::builder().build::<_, Body>(https)
}

fn to_hyper_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Delete => Method::DELETE,
    }
}

fn encode_query(params: &[(String, String)]) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in params {
        serializer.append_pair(key, value);
    }
    serializer.finish()
}

pub struct RestClient {
    client: Client<HttpsConnector<HttpConnector>>,
}

impl Default for RestClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RestClient {
    pub fn new() -> Self {
        Self { client: create_client() }
    }

    /// Runs one call through the full pipeline for any adapter.
    pub async fn request<A: VenueAdapter>(
        &self,
        adapter: &A,
        config: &ExchangeConfig,
        throttle: &Throttle,
        events: Arc<EventEmitter>,
        spec: RequestSpec,
    ) -> Result<Value, ExchangeError> {
        let venue_id = adapter.describe().id;

        let signed: SignedRequest = if spec.signed {
            adapter.sign(&spec.path, spec.method, spec.params.clone(), config)?
        } else {
            SignedRequest {
                params: spec.params.clone(),
                headers: Vec::new(),
                url_override: None,
            }
        };

        let base = adapter.base_url(spec.signed, config);
        let url = signed
            .url_override
            .clone()
            .unwrap_or_else(|| format!("{base}{}", spec.path));

        let encoding = adapter.body_encoding(spec.method);
        let (uri, body) = build_request_parts(&url, &signed.params, spec.method, encoding, venue_id)?;

        let mut builder = Request::builder()
            .method(to_hyper_method(spec.method))
            .uri(uri)
            .header(hyper::header::CONNECTION, KEEP_ALIVE);

        let query_goes_in_url = matches!(encoding, BodyEncoding::QueryInUrl)
            || matches!(spec.method, HttpMethod::Get | HttpMethod::Delete);

        match encoding {
            BodyEncoding::JsonBody if !query_goes_in_url => {
                builder = builder.header(hyper::header::CONTENT_TYPE, "application/json");
            }
            BodyEncoding::FormBody if !query_goes_in_url => {
                builder = builder.header(
                    hyper::header::CONTENT_TYPE,
                    "application/x-www-form-urlencoded",
                );
            }
            _ => {}
        }

        for (key, value) in &signed.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }

        let request = builder
            .body(body)
            .map_err(|e| ExchangeError::bad_request(venue_id, e.to_string()))?;

        let dispatched = tokio::time::timeout(config.timeout(), self.client.request(request)).await;

        let response = match dispatched {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(ExchangeError::network(venue_id, e.to_string())),
            Err(_) => return Err(ExchangeError::timeout(venue_id, "request deadline exceeded")),
        };

        let status = response.status();
        adapter.on_headers(response.headers(), throttle);

        let bytes = hyper::body::to_bytes(response.into_body())
            .await
            .map_err(|e| ExchangeError::network(venue_id, e.to_string()))?;
        let text = String::from_utf8_lossy(&bytes).into_owned();

        if !status.is_success() {
            let code = status.as_u16();
            if code == 429 || code == 418 {
                let retry_after_ms = parse_retry_after_ms(&text);
                let mut err = ExchangeError::new(
                    mmb_domain::error::ExchangeErrorKind::RateLimitExceeded,
                    venue_id,
                    None,
                    text,
                );
                if let Some(ms) = retry_after_ms {
                    err = err.with_retry_after(ms);
                }
                return Err(err);
            }
            return Err(adapter.on_http_error(code, &text));
        }

        let status = throttle.get_status();
        if status.capacity > 0.0 && status.available / status.capacity < 0.1 {
            emit_rate_limit_warning(&events, status.capacity - status.available, status.capacity);
        }

        let body = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        adapter.unwrap_envelope(body)
    }
}

fn build_request_parts(
    url: &str,
    params: &[(String, String)],
    method: HttpMethod,
    encoding: BodyEncoding,
    venue_id: &str,
) -> Result<(Uri, Body), ExchangeError> {
    let query_goes_in_url = matches!(encoding, BodyEncoding::QueryInUrl)
        || matches!(method, HttpMethod::Get | HttpMethod::Delete);

    if query_goes_in_url {
        let uri = if params.is_empty() {
            url.to_owned()
        } else {
            let separator = if url.contains('?') { '&' } else { '?' };
            format!("{url}{separator}{}", encode_query(params))
        };
        let uri: Uri = uri
            .parse()
            .map_err(|e: hyper::http::uri::InvalidUri| ExchangeError::bad_request(venue_id, e.to_string()))?;
        return Ok((uri, Body::empty()));
    }

    let uri: Uri = url
        .parse()
        .map_err(|e: hyper::http::uri::InvalidUri| ExchangeError::bad_request(venue_id, e.to_string()))?;

    let body = match encoding {
        BodyEncoding::JsonBody => {
            let object: serde_json::Map<String, Value> = params
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            Body::from(Value::Object(object).to_string())
        }
        BodyEncoding::FormBody => Body::from(encode_query(params)),
        BodyEncoding::QueryInUrl => Body::empty(),
    };

    Ok((uri, body))
}

fn parse_retry_after_ms(body: &str) -> Option<u64> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .get("retryAfter")
        .or_else(|| value.get("retry_after"))
        .and_then(Value::as_u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_query_preserves_pair_order() {
        let params = vec![
            ("symbol".to_owned(), "BTCUSDT".to_owned()),
            ("side".to_owned(), "BUY".to_owned()),
        ];
        assert_eq!(encode_query(&params), "symbol=BTCUSDT&side=BUY");
    }

    #[test]
    fn query_in_url_appends_to_path_without_existing_query() {
        let params = vec![("a".to_owned(), "1".to_owned())];
        let (uri, _) = build_request_parts(
            "https://api.example.com/v1/order",
            &params,
            HttpMethod::Get,
            BodyEncoding::QueryInUrl,
            "example",
        )
        .expect("in test");
        assert_eq!(uri.to_string(), "https://api.example.com/v1/order?a=1");
    }

    #[test]
    fn json_body_encoding_leaves_query_empty() {
        let params = vec![("a".to_owned(), "1".to_owned())];
        let (uri, _) = build_request_parts(
            "https://api.example.com/v1/order",
            &params,
            HttpMethod::Post,
            BodyEncoding::JsonBody,
            "example",
        )
        .expect("in test");
        assert_eq!(uri.to_string(), "https://api.example.com/v1/order");
    }
}
