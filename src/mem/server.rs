//! HTTP surface of the in-memory facade
//!
//! Serves [`MemoryStore`] over the same REST shapes the client emits:
//! path-style URLs, the multipart query triad (`?uploads`,
//! `?partNumber=…&uploadId=…`, `?uploadId=…`), and `<Error>` documents
//! for storage failures. Signature verification is intentionally absent;
//! signed requests are accepted as-is.

use anyhow::{Context, Result};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{body::Incoming, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::mem::{MemoryStore, StoreError};
use crate::s3::xml;

type Body = Full<Bytes>;

/// Accept loop: serve the store until the listener dies.
pub async fn serve(listener: TcpListener, store: MemoryStore) -> Result<()> {
    let addr = listener.local_addr().context("listener has no local addr")?;
    info!("in-memory S3 facade listening on {}", addr);

    loop {
        let (stream, _remote) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                error!("Failed to accept connection: {}", e);
                continue;
            }
        };

        let store = store.clone();
        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let service = service_fn(move |req| {
                let store = store.clone();
                async move { handle_request(store, req).await }
            });

            if let Err(e) = http1::Builder::new()
                .keep_alive(true)
                .serve_connection(io, service)
                .await
            {
                let err_str = format!("{}", e);
                if !err_str.contains("connection reset") && !err_str.contains("broken pipe") {
                    error!("Error serving connection: {}", e);
                }
            }
        });
    }
}

async fn handle_request(store: MemoryStore, req: Request<Incoming>) -> Result<Response<Body>> {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let path = uri.path().to_string();
    let query = uri.query().unwrap_or("").to_string();
    let range_header = req
        .headers()
        .get("range")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    debug!("{} {}", method, uri);

    let body = req
        .collect()
        .await
        .context("failed to read request body")?
        .to_bytes();

    let trimmed = path.trim_start_matches('/');
    let (bucket, key) = match trimmed.find('/') {
        Some(pos) => (&trimmed[..pos], decode_key(&trimmed[pos + 1..])),
        None => (trimmed, String::new()),
    };

    // Service root
    if bucket.is_empty() {
        if method == Method::GET {
            return Ok(xml_response(StatusCode::OK, list_buckets_xml(&store)));
        }
        return Ok(error_response(
            StatusCode::METHOD_NOT_ALLOWED,
            "MethodNotAllowed",
            "unsupported service operation",
        ));
    }

    // Bucket-level operations
    if key.is_empty() {
        return Ok(match method {
            Method::PUT => {
                store.create_bucket(bucket);
                empty_response(StatusCode::OK)
            }
            Method::HEAD => match store.list_buckets().contains(&bucket.to_string()) {
                true => empty_response(StatusCode::OK),
                false => store_error_response(StoreError::NoSuchBucket),
            },
            _ => error_response(
                StatusCode::METHOD_NOT_ALLOWED,
                "MethodNotAllowed",
                "unsupported bucket operation",
            ),
        });
    }

    // Multipart surface
    let params = parse_query(&query);
    if method == Method::POST && params.contains_key("uploads") {
        return Ok(match store.begin_multipart(bucket, &key) {
            Ok(upload_id) => xml_response(
                StatusCode::OK,
                initiate_xml(bucket, &key, &upload_id),
            ),
            Err(e) => store_error_response(e),
        });
    }
    if let Some(upload_id) = params.get("uploadId") {
        return Ok(match method {
            Method::PUT => {
                let part_number: u32 = match params.get("partNumber").and_then(|n| n.parse().ok())
                {
                    Some(n) => n,
                    None => {
                        return Ok(error_response(
                            StatusCode::BAD_REQUEST,
                            "InvalidArgument",
                            "missing or invalid partNumber",
                        ))
                    }
                };
                match store.put_part(bucket, upload_id, part_number, body) {
                    Ok(etag) => Response::builder()
                        .status(StatusCode::OK)
                        .header("etag", etag)
                        .body(Full::new(Bytes::new()))
                        .unwrap(),
                    Err(e) => store_error_response(e),
                }
            }
            Method::POST => match parse_completion_body(&body) {
                Ok(parts) => match store.complete_multipart(bucket, upload_id, &parts) {
                    Ok((completed_key, etag)) => xml_response(
                        StatusCode::OK,
                        complete_xml(bucket, &completed_key, &etag),
                    ),
                    Err(e) => store_error_response(e),
                },
                Err(msg) => error_response(StatusCode::BAD_REQUEST, "MalformedXML", &msg),
            },
            Method::DELETE => match store.abort_multipart(bucket, upload_id) {
                Ok(()) => empty_response(StatusCode::NO_CONTENT),
                Err(e) => store_error_response(e),
            },
            _ => error_response(
                StatusCode::METHOD_NOT_ALLOWED,
                "MethodNotAllowed",
                "unsupported multipart operation",
            ),
        });
    }

    // Object operations
    Ok(match method {
        Method::PUT => match store.put_object(bucket, &key, body) {
            Ok(etag) => Response::builder()
                .status(StatusCode::OK)
                .header("etag", etag)
                .body(Full::new(Bytes::new()))
                .unwrap(),
            Err(e) => store_error_response(e),
        },
        Method::GET => match store.get_object(bucket, &key) {
            Ok((data, etag)) => object_response(data, etag, range_header.as_deref()),
            Err(e) => store_error_response(e),
        },
        Method::HEAD => match store.get_object(bucket, &key) {
            Ok((data, etag)) => Response::builder()
                .status(StatusCode::OK)
                .header("etag", etag)
                .header("content-length", data.len())
                .header("accept-ranges", "bytes")
                .body(Full::new(Bytes::new()))
                .unwrap(),
            // HEAD carries no body, so no error document either
            Err(e) => empty_response(match e {
                StoreError::NoSuchBucket | StoreError::NoSuchKey => StatusCode::NOT_FOUND,
                _ => StatusCode::BAD_REQUEST,
            }),
        },
        Method::DELETE => match store.delete_object(bucket, &key) {
            Ok(()) => empty_response(StatusCode::NO_CONTENT),
            Err(e) => store_error_response(e),
        },
        _ => error_response(
            StatusCode::METHOD_NOT_ALLOWED,
            "MethodNotAllowed",
            "unsupported object operation",
        ),
    })
}

fn decode_key(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(|c| c.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

fn parse_query(query: &str) -> std::collections::HashMap<String, String> {
    let mut params = std::collections::HashMap::new();
    for pair in query.split('&') {
        if pair.is_empty() {
            continue;
        }
        match pair.find('=') {
            Some(pos) => {
                let value = urlencoding::decode(&pair[pos + 1..])
                    .map(|c| c.into_owned())
                    .unwrap_or_else(|_| pair[pos + 1..].to_string());
                params.insert(pair[..pos].to_string(), value);
            }
            None => {
                params.insert(pair.to_string(), String::new());
            }
        }
    }
    params
}

/// Extract `(part_number, etag)` pairs from a completion document.
fn parse_completion_body(body: &[u8]) -> std::result::Result<Vec<(u32, String)>, String> {
    let numbers = xml::all_texts(body, &["CompleteMultipartUpload", "Part", "PartNumber"])
        .map_err(|e| e.to_string())?;
    let etags = xml::all_texts(body, &["CompleteMultipartUpload", "Part", "ETag"])
        .map_err(|e| e.to_string())?;

    if numbers.len() != etags.len() {
        return Err("mismatched PartNumber and ETag counts".to_string());
    }

    numbers
        .into_iter()
        .zip(etags)
        .map(|(n, etag)| {
            n.parse::<u32>()
                .map(|part_number| (part_number, etag))
                .map_err(|_| format!("invalid part number: {n}"))
        })
        .collect()
}

fn object_response(data: Bytes, etag: String, range: Option<&str>) -> Response<Body> {
    if let Some(range) = range.and_then(parse_range) {
        let (first, last) = range;
        let last = last.min(data.len().saturating_sub(1) as u64);
        if first >= data.len() as u64 || first > last {
            return error_response(
                StatusCode::RANGE_NOT_SATISFIABLE,
                "InvalidRange",
                "the requested range is not satisfiable",
            );
        }
        let slice = data.slice(first as usize..=last as usize);
        return Response::builder()
            .status(StatusCode::PARTIAL_CONTENT)
            .header("etag", etag)
            .header("content-length", slice.len())
            .header("content-range", format!("bytes {first}-{last}/{}", data.len()))
            .body(Full::new(slice))
            .unwrap();
    }

    Response::builder()
        .status(StatusCode::OK)
        .header("etag", etag)
        .header("content-length", data.len())
        .header("accept-ranges", "bytes")
        .body(Full::new(data))
        .unwrap()
}

/// Accept both `first-last` and `bytes=first-last`.
fn parse_range(raw: &str) -> Option<(u64, u64)> {
    let spec = raw.strip_prefix("bytes=").unwrap_or(raw);
    let (first, last) = spec.split_once('-')?;
    Some((first.parse().ok()?, last.parse().ok()?))
}

fn list_buckets_xml(store: &MemoryStore) -> String {
    let mut xml = String::with_capacity(256);
    xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    xml.push_str("<ListAllMyBucketsResult><Buckets>");
    for name in store.list_buckets() {
        xml.push_str("<Bucket><Name>");
        xml.push_str(&xml_escape(&name));
        xml.push_str("</Name></Bucket>");
    }
    xml.push_str("</Buckets></ListAllMyBucketsResult>");
    xml
}

fn initiate_xml(bucket: &str, key: &str, upload_id: &str) -> String {
    let mut xml = String::with_capacity(192);
    xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    xml.push_str("<InitiateMultipartUploadResult><Bucket>");
    xml.push_str(&xml_escape(bucket));
    xml.push_str("</Bucket><Key>");
    xml.push_str(&xml_escape(key));
    xml.push_str("</Key><UploadId>");
    xml.push_str(upload_id);
    xml.push_str("</UploadId></InitiateMultipartUploadResult>");
    xml
}

fn complete_xml(bucket: &str, key: &str, etag: &str) -> String {
    let mut xml = String::with_capacity(192);
    xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    xml.push_str("<CompleteMultipartUploadResult><Bucket>");
    xml.push_str(&xml_escape(bucket));
    xml.push_str("</Bucket><Key>");
    xml.push_str(&xml_escape(key));
    xml.push_str("</Key><ETag>");
    xml.push_str(&xml_escape(etag));
    xml.push_str("</ETag></CompleteMultipartUploadResult>");
    xml
}

fn xml_escape(s: &str) -> String {
    let mut buf = String::with_capacity(s.len() + 16);
    for ch in s.chars() {
        match ch {
            '&' => buf.push_str("&amp;"),
            '<' => buf.push_str("&lt;"),
            '>' => buf.push_str("&gt;"),
            _ => buf.push(ch),
        }
    }
    buf
}

fn store_error_response(err: StoreError) -> Response<Body> {
    let status = match err {
        StoreError::NoSuchBucket | StoreError::NoSuchKey | StoreError::NoSuchUpload => {
            StatusCode::NOT_FOUND
        }
        StoreError::InvalidPart => StatusCode::BAD_REQUEST,
    };
    error_response(status, err.code(), err.message())
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response<Body> {
    let body = format!(
        "<Error><Code>{}</Code><Message>{}</Message></Error>",
        code,
        xml_escape(message)
    );
    Response::builder()
        .status(status)
        .header("content-type", "application/xml")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

fn xml_response(status: StatusCode, body: String) -> Response<Body> {
    Response::builder()
        .status(status)
        .header("content-type", "application/xml")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

fn empty_response(status: StatusCode) -> Response<Body> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::new()))
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_range_both_forms() {
        assert_eq!(parse_range("0-499"), Some((0, 499)));
        assert_eq!(parse_range("bytes=0-499"), Some((0, 499)));
        assert_eq!(parse_range("junk"), None);
    }

    #[test]
    fn test_range_on_empty_object_is_not_satisfiable() {
        let response = object_response(Bytes::new(), "\"e\"".to_string(), Some("bytes=0-0"));
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    }

    #[test]
    fn test_range_past_end_is_not_satisfiable() {
        let response = object_response(
            Bytes::from_static(b"abc"),
            "\"e\"".to_string(),
            Some("10-20"),
        );
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    }

    #[test]
    fn test_xml_builders_escape_names() {
        let doc = initiate_xml("q&a", "docs/Q&A <v2>.pdf", "u1");
        assert!(doc.contains("<Bucket>q&amp;a</Bucket>"));
        assert!(doc.contains("<Key>docs/Q&amp;A &lt;v2&gt;.pdf</Key>"));

        let doc = complete_xml("q&a", "docs/Q&A.pdf", "\"etag\"");
        assert!(doc.contains("<Bucket>q&amp;a</Bucket>"));
        assert!(doc.contains("<Key>docs/Q&amp;A.pdf</Key>"));
    }

    #[test]
    fn test_parse_completion_body() {
        let body = br#"<CompleteMultipartUpload>
<Part><PartNumber>1</PartNumber><ETag>"a"</ETag></Part>
<Part><PartNumber>2</PartNumber><ETag>"b"</ETag></Part>
</CompleteMultipartUpload>"#;
        let parts = parse_completion_body(body).unwrap();
        assert_eq!(parts, vec![(1, "\"a\"".to_string()), (2, "\"b\"".to_string())]);
    }

    #[test]
    fn test_list_buckets_xml_shape() {
        let store = MemoryStore::new();
        store.create_bucket("alpha");
        store.create_bucket("beta");
        let xml_doc = list_buckets_xml(&store);
        assert!(xml_doc.contains("<Bucket><Name>alpha</Name></Bucket>"));
        assert!(xml_doc.contains("<Bucket><Name>beta</Name></Bucket>"));
    }
}
