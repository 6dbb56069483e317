use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::{Method, StatusCode};
use tokio::io::AsyncReadExt;
use tokio_util::io::StreamReader;

use api::root::{WebdavAuthScheme, WebdavSettings};

use crate::media::mime_hint;
use crate::storage::error::StorageError;
use crate::storage::path::{canonicalize, file_name};
use crate::storage::{ByteStream, Fetched, FileEntry, StorageClient};

// webdav client
//
// the rfc 4918 subset the catalog needs: PROPFIND at depth 0/1 for info and
// listings, ranged GET for partial reads, PUT/MKCOL/DELETE/COPY for the
// write surface.  multistatus responses are scanned with a small tag reader
// rather than a full xml stack, since the four properties we care about are
// fixed.

const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<D:propfind xmlns:D="DAV:">
  <D:prop>
    <D:resourcetype/>
    <D:getcontentlength/>
    <D:getlastmodified/>
  </D:prop>
</D:propfind>"#;

fn status_error(status: StatusCode, context: &str) -> StorageError {
    match status {
        StatusCode::UNAUTHORIZED => StorageError::Auth(context.to_owned()),
        StatusCode::FORBIDDEN => StorageError::PermissionDenied(context.to_owned()),
        StatusCode::NOT_FOUND => StorageError::NotFound(context.to_owned()),
        s if s.is_server_error() => StorageError::Transport(format!("{s}: {context}")),
        s => StorageError::Protocol(format!("{s}: {context}")),
    }
}

fn request_error(err: reqwest::Error) -> StorageError {
    if err.is_timeout() {
        StorageError::Timeout(Duration::from_secs(0))
    } else if err.is_connect() || err.is_request() {
        StorageError::Transport(err.to_string())
    } else {
        StorageError::Protocol(err.to_string())
    }
}

// namespace-agnostic extraction of <ns:local>text</ns:local>; properties in
// multistatus bodies are simple enough that tag scanning is reliable
fn find_tag_text<'a>(block: &'a str, local: &str) -> Option<&'a str> {
    let mut search = 0;

    while let Some(rel) = block[search..].find(local) {
        let at = search + rel;

        // must be an opening tag: preceded by '<' or '<ns:'
        let head = &block[..at];
        let open = head.rfind('<')?;

        let between = &head[open + 1..];
        if !(between.is_empty() || between.ends_with(':')) || between.starts_with('/') {
            search = at + local.len();
            continue;
        }

        let rest = &block[at + local.len()..];

        let close_of_open = rest.find('>')?;
        if rest[..close_of_open].contains('<') {
            search = at + local.len();
            continue;
        }

        // self-closing tag has no text
        if rest[..close_of_open].ends_with('/') {
            return Some("");
        }

        let content = &rest[close_of_open + 1..];
        let end = content.find("</")?;

        return Some(content[..end].trim());
    }

    None
}

fn tag_present(block: &str, local: &str) -> bool {
    find_tag_text(block, local).is_some()
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(value) = u8::from_str_radix(&input[i + 1..i + 3], 16) {
                out.push(value);
                i += 3;
                continue;
            }
        }

        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

fn percent_encode_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());

    for byte in path.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }

    out
}

// one <response> block of a multistatus body
fn parse_response_block(block: &str, base_path: &str) -> Option<FileEntry> {
    let href = find_tag_text(block, "href")?;

    // hrefs may be absolute urls or server-absolute paths
    let raw_path = match href.find("://") {
        Some(idx) => {
            let after = &href[idx + 3..];
            match after.find('/') {
                Some(slash) => &after[slash..],
                None => "/",
            }
        }
        None => href,
    };

    let decoded = percent_decode(raw_path.trim_end_matches('/'));

    // strip the collection prefix the server serves under
    let path = if base_path != "/" && decoded.starts_with(base_path) {
        let stripped = &decoded[base_path.len()..];
        if stripped.is_empty() { "/" } else { stripped }
    } else if decoded.is_empty() {
        "/"
    } else {
        &decoded
    }
    .to_owned();

    let is_dir = block
        .split("resourcetype")
        .nth(1)
        .map(|body| body.contains("collection"))
        .unwrap_or(false)
        || tag_present(block, "collection");

    let size = find_tag_text(block, "getcontentlength")
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);

    let modified = find_tag_text(block, "getlastmodified")
        .and_then(|s| chrono::DateTime::parse_from_rfc2822(s).ok())
        .map(|dt| dt.timestamp());

    let name = file_name(&path).to_owned();

    Some(FileEntry {
        mime_hint: if is_dir { None } else { mime_hint(&name) },
        name,
        path,
        size,
        modified,
        created: None,
        is_dir,
        permissions: None,
    })
}

fn parse_multistatus(body: &str, base_path: &str) -> Vec<FileEntry> {
    let mut entries = Vec::new();
    let mut rest = body;

    while let Some(start) = rest.find("response") {
        let after = &rest[start..];

        let Some(end) = after[1..].find("response") else {
            break;
        };

        let block = &after[..end + 1];

        if let Some(entry) = parse_response_block(block, base_path) {
            entries.push(entry);
        }

        rest = &after[end + 1 + "response".len()..];
    }

    entries
}

pub struct WebdavClient {
    http: reqwest::Client,
    base_url: String,

    // the path component of base_url, used to re-anchor hrefs
    base_path: String,

    username: Option<String>,
    password: Option<String>,
}

impl WebdavClient {
    pub fn new(settings: &WebdavSettings) -> Result<Self, StorageError> {
        if settings.url.is_empty() {
            return Err(StorageError::Config("webdav url is empty".to_owned()));
        }

        if matches!(settings.auth_scheme, WebdavAuthScheme::Digest) {
            return Err(StorageError::Config(
                "digest auth is not supported; use basic over tls".to_owned(),
            ));
        }

        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(!settings.tls_verify)
            .build()
            .map_err(|err| StorageError::Config(err.to_string()))?;

        let base_url = settings.url.trim_end_matches('/').to_owned();

        let base_path = match base_url.find("://") {
            Some(idx) => {
                let after = &base_url[idx + 3..];
                match after.find('/') {
                    Some(slash) => after[slash..].to_owned(),
                    None => "/".to_owned(),
                }
            }
            None => return Err(StorageError::Config("webdav url has no scheme".to_owned())),
        };

        Ok(WebdavClient {
            http,
            base_url,
            base_path,
            username: settings.username.clone(),
            password: settings.password.clone(),
        })
    }

    fn url_for(&self, canonical: &str) -> String {
        if canonical == "/" {
            format!("{}/", self.base_url)
        } else {
            format!("{}{}", self.base_url, percent_encode_path(canonical))
        }
    }

    fn request(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        let builder = self.http.request(method, url);

        match &self.username {
            Some(user) => builder.basic_auth(user, self.password.as_deref()),
            None => builder,
        }
    }

    async fn propfind(&self, canonical: &str, depth: &str) -> Result<String, StorageError> {
        let method = Method::from_bytes(b"PROPFIND")
            .map_err(|_| StorageError::Protocol("PROPFIND method".to_owned()))?;

        let resp = self
            .request(method, &self.url_for(canonical))
            .header("Depth", depth)
            .header("Content-Type", "application/xml")
            .body(PROPFIND_BODY)
            .send()
            .await
            .map_err(request_error)?;

        let status = resp.status();

        if !(status.is_success() || status == StatusCode::MULTI_STATUS) {
            return Err(status_error(status, canonical));
        }

        resp.text().await.map_err(request_error)
    }
}

#[async_trait]
impl StorageClient for WebdavClient {
    async fn connect(&self) -> Result<(), StorageError> {
        self.test_connection().await
    }

    async fn disconnect(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        // http is connectionless; the pool reconnects as needed
        true
    }

    async fn test_connection(&self) -> Result<(), StorageError> {
        self.propfind("/", "0").await.map(|_| ())
    }

    async fn list_directory(&self, path: &str) -> Result<Fetched<Vec<FileEntry>>, StorageError> {
        let vpath = canonicalize(path)?;

        let body = self.propfind(&vpath, "1").await?;

        // depth-1 multistatus includes the collection itself; drop it
        let entries = parse_multistatus(&body, &self.base_path)
            .into_iter()
            .filter(|entry| entry.path != vpath)
            .collect();

        Ok(Fetched::fresh(entries))
    }

    async fn get_file_info(&self, path: &str) -> Result<Fetched<FileEntry>, StorageError> {
        let vpath = canonicalize(path)?;

        let body = self.propfind(&vpath, "0").await?;

        parse_multistatus(&body, &self.base_path)
            .into_iter()
            .next()
            .map(Fetched::fresh)
            .ok_or_else(|| StorageError::Protocol(format!("empty multistatus for {vpath}")))
    }

    async fn file_exists(&self, path: &str) -> Result<bool, StorageError> {
        match self.get_file_info(path).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn read_file(&self, path: &str) -> Result<ByteStream, StorageError> {
        let vpath = canonicalize(path)?;

        let resp = self
            .request(Method::GET, &self.url_for(&vpath))
            .send()
            .await
            .map_err(request_error)?;

        if !resp.status().is_success() {
            return Err(status_error(resp.status(), &vpath));
        }

        let stream = Box::pin(
            resp.bytes_stream()
                .map_err(|err| std::io::Error::other(err.to_string())),
        );

        Ok(Box::new(StreamReader::new(stream)))
    }

    async fn read_partial(
        &self,
        path: &str,
        offset: u64,
        length: u64,
    ) -> Result<Vec<u8>, StorageError> {
        let vpath = canonicalize(path)?;

        let end = offset.saturating_add(length).saturating_sub(1);

        let resp = self
            .request(Method::GET, &self.url_for(&vpath))
            .header("Range", format!("bytes={offset}-{end}"))
            .send()
            .await
            .map_err(request_error)?;

        let status = resp.status();

        if !(status.is_success() || status == StatusCode::PARTIAL_CONTENT) {
            return Err(status_error(status, &vpath));
        }

        let bytes = resp.bytes().await.map_err(request_error)?;

        // servers without range support return the whole body
        let slice = if status == StatusCode::PARTIAL_CONTENT {
            bytes.as_ref()
        } else {
            let start = (offset as usize).min(bytes.len());
            let stop = ((offset + length) as usize).min(bytes.len());
            &bytes[start..stop]
        };

        Ok(slice.to_vec())
    }

    async fn write_file(&self, path: &str, mut data: ByteStream) -> Result<(), StorageError> {
        let vpath = canonicalize(path)?;

        let mut body = Vec::new();
        data.read_to_end(&mut body).await?;

        let resp = self
            .request(Method::PUT, &self.url_for(&vpath))
            .body(body)
            .send()
            .await
            .map_err(request_error)?;

        if !resp.status().is_success() {
            return Err(status_error(resp.status(), &vpath));
        }

        Ok(())
    }

    async fn copy_file(&self, src: &str, dst: &str) -> Result<(), StorageError> {
        let src = canonicalize(src)?;
        let dst = canonicalize(dst)?;

        let method = Method::from_bytes(b"COPY")
            .map_err(|_| StorageError::Protocol("COPY method".to_owned()))?;

        let resp = self
            .request(method, &self.url_for(&src))
            .header("Destination", self.url_for(&dst))
            .header("Overwrite", "T")
            .send()
            .await
            .map_err(request_error)?;

        if !resp.status().is_success() {
            return Err(status_error(resp.status(), &src));
        }

        Ok(())
    }

    async fn delete_file(&self, path: &str) -> Result<(), StorageError> {
        let vpath = canonicalize(path)?;

        let resp = self
            .request(Method::DELETE, &self.url_for(&vpath))
            .send()
            .await
            .map_err(request_error)?;

        if !resp.status().is_success() {
            return Err(status_error(resp.status(), &vpath));
        }

        Ok(())
    }

    async fn delete_directory(&self, path: &str, _recursive: bool) -> Result<(), StorageError> {
        // DELETE on a collection is recursive by definition in rfc 4918
        self.delete_file(path).await
    }

    async fn create_directory(&self, path: &str) -> Result<(), StorageError> {
        let vpath = canonicalize(path)?;

        let method = Method::from_bytes(b"MKCOL")
            .map_err(|_| StorageError::Protocol("MKCOL method".to_owned()))?;

        let resp = self
            .request(method, &self.url_for(&vpath))
            .send()
            .await
            .map_err(request_error)?;

        let status = resp.status();

        // 405 means the collection already exists
        if !(status.is_success() || status == StatusCode::METHOD_NOT_ALLOWED) {
            return Err(status_error(status, &vpath));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<D:multistatus xmlns:D="DAV:">
  <D:response>
    <D:href>/dav/media/</D:href>
    <D:propstat>
      <D:prop>
        <D:resourcetype><D:collection/></D:resourcetype>
        <D:getlastmodified>Wed, 31 Jan 2024 12:00:00 GMT</D:getlastmodified>
      </D:prop>
    </D:propstat>
  </D:response>
  <D:response>
    <D:href>/dav/media/Inception%20(2010).mkv</D:href>
    <D:propstat>
      <D:prop>
        <D:resourcetype/>
        <D:getcontentlength>1073741824</D:getcontentlength>
        <D:getlastmodified>Wed, 31 Jan 2024 12:00:00 GMT</D:getlastmodified>
      </D:prop>
    </D:propstat>
  </D:response>
</D:multistatus>"#;

    #[test]
    fn multistatus_parsing() {
        let entries = parse_multistatus(SAMPLE, "/dav");

        assert_eq!(entries.len(), 2);

        let dir = &entries[0];
        assert_eq!(dir.path, "/media");
        assert!(dir.is_dir);

        let file = &entries[1];
        assert_eq!(file.path, "/media/Inception (2010).mkv");
        assert_eq!(file.name, "Inception (2010).mkv");
        assert_eq!(file.size, 1073741824);
        assert!(!file.is_dir);
        assert!(file.modified.is_some());
    }

    #[test]
    fn tag_extraction() {
        assert_eq!(
            find_tag_text("<D:getcontentlength>42</D:getcontentlength>", "getcontentlength"),
            Some("42")
        );
        assert_eq!(find_tag_text("<a><b>x</b></a>", "b"), Some("x"));
        assert_eq!(find_tag_text("<a>x</a>", "b"), None);
    }

    #[test]
    fn percent_codec() {
        assert_eq!(percent_decode("a%20b%28c%29"), "a b(c)");
        assert_eq!(percent_encode_path("/tv/Season 1"), "/tv/Season%201");
    }

    #[test]
    fn digest_auth_is_rejected() {
        let settings = WebdavSettings {
            url: "https://dav.example.com/media".to_owned(),
            username: Some("u".to_owned()),
            password: Some("p".to_owned()),
            auth_scheme: WebdavAuthScheme::Digest,
            tls_verify: true,
        };

        assert!(matches!(
            WebdavClient::new(&settings),
            Err(StorageError::Config(_))
        ));
    }
}
