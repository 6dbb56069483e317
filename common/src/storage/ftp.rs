use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, trace};

use api::root::FtpSettings;

use crate::media::mime_hint;
use crate::storage::error::StorageError;
use crate::storage::path::{canonicalize, child, file_name, parent};
use crate::storage::{ByteStream, Fetched, FileEntry, StorageClient};

// ftp client
//
// a small implementation of the protocol surface the catalog actually
// needs: passive-mode transfers, MLSD listings with a LIST fallback, and
// REST+RETR for the partial reads the quick hasher depends on.  no crate in
// the surrounding ecosystem covers this, so the control/data plumbing is
// done directly on tokio sockets.

struct Reply {
    code: u16,
    text: String,
}

impl Reply {
    fn is_positive(&self) -> bool {
        self.code < 400
    }
}

struct FtpConn {
    control: BufStream<TcpStream>,

    // set when a streaming RETR handed its data socket to the caller; the
    // server's completion reply is consumed before the next command
    pending_reply: bool,
}

impl FtpConn {
    async fn read_reply(&mut self) -> Result<Reply, StorageError> {
        let mut line = String::new();

        if self.control.read_line(&mut line).await? == 0 {
            return Err(StorageError::Transport(
                "ftp control connection closed".to_owned(),
            ));
        }

        let code: u16 = line
            .get(0..3)
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| StorageError::Protocol(format!("malformed ftp reply: {line}")))?;

        let mut text = line.clone();

        // multiline replies run until a "NNN " terminator line
        if line.as_bytes().get(3) == Some(&b'-') {
            let terminator = format!("{code} ");

            loop {
                let mut next = String::new();

                if self.control.read_line(&mut next).await? == 0 {
                    return Err(StorageError::Transport(
                        "ftp control connection closed mid-reply".to_owned(),
                    ));
                }

                text.push_str(&next);

                if next.starts_with(&terminator) {
                    break;
                }
            }
        }

        trace!({ code = code }, "ftp reply");

        Ok(Reply { code, text })
    }

    async fn command(&mut self, cmd: &str) -> Result<Reply, StorageError> {
        if self.pending_reply {
            // completion of an earlier streamed transfer; outcome is the
            // stream consumer's problem, not ours
            let _ = self.read_reply().await;
            self.pending_reply = false;
        }

        trace!({ cmd = cmd.split_whitespace().next().unwrap_or("") }, "ftp command");

        self.control.write_all(cmd.as_bytes()).await?;
        self.control.write_all(b"\r\n").await?;
        self.control.flush().await?;

        self.read_reply().await
    }
}

fn reply_error(reply: &Reply) -> StorageError {
    match reply.code {
        530 | 331 | 332 => StorageError::Auth(reply.text.trim().to_owned()),
        550 | 553 => StorageError::NotFound(reply.text.trim().to_owned()),
        421 => StorageError::Transport(reply.text.trim().to_owned()),
        400..=499 => StorageError::Transport(reply.text.trim().to_owned()),
        _ => StorageError::Protocol(reply.text.trim().to_owned()),
    }
}

// "229 Entering Extended Passive Mode (|||6446|)"
fn parse_epsv_port(text: &str) -> Option<u16> {
    let open = text.find('(')?;
    let close = text[open..].find(')')? + open;
    let inner = &text[open + 1..close];

    inner.split('|').filter(|s| !s.is_empty()).next()?.parse().ok()
}

// "227 Entering Passive Mode (192,168,1,2,19,137)"
fn parse_pasv_addr(text: &str) -> Option<(String, u16)> {
    let open = text.find('(')?;
    let close = text[open..].find(')')? + open;

    let parts: Vec<u16> = text[open + 1..close]
        .split(',')
        .map(|s| s.trim().parse().ok())
        .collect::<Option<Vec<u16>>>()?;

    if parts.len() != 6 {
        return None;
    }

    let host = format!("{}.{}.{}.{}", parts[0], parts[1], parts[2], parts[3]);
    let port = parts[4] * 256 + parts[5];

    Some((host, port))
}

// "type=file;size=1234;modify=20240131120000; Example.mkv"
fn parse_mlsd_line(line: &str, dir: &str) -> Option<FileEntry> {
    let line = line.trim_end();
    let (facts, name) = line.split_once(' ')?;

    if name.is_empty() || name == "." || name == ".." {
        return None;
    }

    let mut is_dir = false;
    let mut size: u64 = 0;
    let mut modified = None;

    for fact in facts.split(';') {
        let Some((key, value)) = fact.split_once('=') else {
            continue;
        };

        match key.to_ascii_lowercase().as_str() {
            "type" => match value.to_ascii_lowercase().as_str() {
                "dir" => is_dir = true,
                "cdir" | "pdir" => return None,
                _ => {}
            },
            "size" => size = value.parse().unwrap_or(0),
            "modify" => modified = parse_mdtm(value),
            _ => {}
        }
    }

    Some(FileEntry {
        name: name.to_owned(),
        path: child(dir, name),
        size,
        modified,
        created: None,
        is_dir,
        permissions: None,
        mime_hint: if is_dir { None } else { mime_hint(name) },
    })
}

// "YYYYMMDDHHMMSS" per RFC 3659
fn parse_mdtm(value: &str) -> Option<i64> {
    let value = value.get(0..14)?;

    chrono::NaiveDateTime::parse_from_str(value, "%Y%m%d%H%M%S")
        .ok()
        .map(|dt| dt.and_utc().timestamp())
}

// classic unix LIST format; only name, size, and the directory bit are
// recoverable with any confidence
fn parse_list_line(line: &str, dir: &str) -> Option<FileEntry> {
    let line = line.trim_end();
    let fields: Vec<&str> = line.split_whitespace().collect();

    if fields.len() < 9 {
        return None;
    }

    let is_dir = line.starts_with('d');
    let size: u64 = fields[4].parse().unwrap_or(0);
    let name = fields[8..].join(" ");

    if name == "." || name == ".." {
        return None;
    }

    Some(FileEntry {
        path: child(dir, &name),
        size: if is_dir { 0 } else { size },
        modified: None,
        created: None,
        is_dir,
        permissions: None,
        mime_hint: if is_dir { None } else { mime_hint(&name) },
        name,
    })
}

pub struct FtpClient {
    settings: FtpSettings,
    conn: Mutex<Option<FtpConn>>,
    deadline: Duration,
}

impl FtpClient {
    pub fn new(settings: &FtpSettings) -> Result<Self, StorageError> {
        if settings.host.is_empty() {
            return Err(StorageError::Config("ftp host is empty".to_owned()));
        }

        if settings.use_tls {
            return Err(StorageError::Config(
                "ftps is not supported by this client".to_owned(),
            ));
        }

        if !settings.passive_mode {
            return Err(StorageError::Config(
                "only passive mode transfers are supported".to_owned(),
            ));
        }

        Ok(FtpClient {
            settings: settings.clone(),
            conn: Mutex::new(None),
            deadline: Duration::from_millis(settings.connection_timeout_ms),
        })
    }

    async fn dial(&self) -> Result<FtpConn, StorageError> {
        let addr = (self.settings.host.as_str(), self.settings.port);

        let stream = match timeout(self.deadline, TcpStream::connect(addr)).await {
            Ok(stream) => stream?,
            Err(_) => return Err(StorageError::Timeout(self.deadline)),
        };

        let mut conn = FtpConn {
            control: BufStream::new(stream),
            pending_reply: false,
        };

        let greeting = conn.read_reply().await?;
        if !greeting.is_positive() {
            return Err(reply_error(&greeting));
        }

        let user = self.settings.username.as_deref().unwrap_or("anonymous");

        let reply = conn.command(&format!("USER {user}")).await?;
        match reply.code {
            230 => {}
            331 => {
                let pass = self.settings.password.as_deref().unwrap_or("anonymous@");
                let reply = conn.command(&format!("PASS {pass}")).await?;

                if reply.code != 230 {
                    return Err(StorageError::Auth(reply.text.trim().to_owned()));
                }
            }
            _ => return Err(StorageError::Auth(reply.text.trim().to_owned())),
        }

        let reply = conn.command("TYPE I").await?;
        if !reply.is_positive() {
            return Err(reply_error(&reply));
        }

        debug!({ host = self.settings.host }, "ftp session established");

        Ok(conn)
    }

    // run op against the cached control connection, dialing if needed; a
    // transport error poisons the connection so the next call redials
    async fn with_conn<T, F>(&self, op: F) -> Result<T, StorageError>
    where
        F: AsyncFnOnce(&mut FtpConn) -> Result<T, StorageError>,
    {
        let mut guard = self.conn.lock().await;

        if guard.is_none() {
            *guard = Some(self.dial().await?);
        }

        let conn = guard.as_mut().expect("connection was just established");

        let result = match timeout(self.deadline, op(conn)).await {
            Ok(result) => result,
            Err(_) => Err(StorageError::Timeout(self.deadline)),
        };

        if matches!(
            result,
            Err(StorageError::Transport(_)) | Err(StorageError::Timeout(_))
        ) {
            *guard = None;
        }

        result
    }

    async fn open_data(&self, conn: &mut FtpConn) -> Result<TcpStream, StorageError> {
        // prefer EPSV, fall back to classic PASV
        let reply = conn.command("EPSV").await?;

        let (host, port) = if reply.code == 229 {
            let port = parse_epsv_port(&reply.text)
                .ok_or_else(|| StorageError::Protocol("bad EPSV reply".to_owned()))?;
            (self.settings.host.clone(), port)
        } else {
            let reply = conn.command("PASV").await?;

            if reply.code != 227 {
                return Err(reply_error(&reply));
            }

            parse_pasv_addr(&reply.text)
                .ok_or_else(|| StorageError::Protocol("bad PASV reply".to_owned()))?
        };

        match timeout(self.deadline, TcpStream::connect((host.as_str(), port))).await {
            Ok(stream) => Ok(stream?),
            Err(_) => Err(StorageError::Timeout(self.deadline)),
        }
    }

    async fn listing(&self, path: &str) -> Result<Vec<FileEntry>, StorageError> {
        let vpath = canonicalize(path)?;

        self.with_conn(async |conn| {
            let mut data = self.open_data(conn).await?;

            let reply = conn.command(&format!("MLSD {vpath}")).await?;

            let mlsd_supported = !matches!(reply.code, 500 | 502 | 504);

            let reply = if mlsd_supported {
                reply
            } else {
                // redo the data connection for the LIST fallback; the
                // failed MLSD never opened a transfer
                data = self.open_data(conn).await?;
                conn.command(&format!("LIST {vpath}")).await?
            };

            if !matches!(reply.code, 125 | 150) {
                return Err(reply_error(&reply));
            }

            let mut raw = String::new();
            data.read_to_string(&mut raw).await?;
            drop(data);

            let done = conn.read_reply().await?;
            if !done.is_positive() {
                return Err(reply_error(&done));
            }

            let entries = raw
                .lines()
                .filter_map(|line| {
                    if mlsd_supported {
                        parse_mlsd_line(line, &vpath)
                    } else {
                        parse_list_line(line, &vpath)
                    }
                })
                .collect();

            Ok(entries)
        })
        .await
    }
}

#[async_trait]
impl StorageClient for FtpClient {
    async fn connect(&self) -> Result<(), StorageError> {
        let mut guard = self.conn.lock().await;

        if guard.is_none() {
            *guard = Some(self.dial().await?);
        }

        Ok(())
    }

    async fn disconnect(&self) -> Result<(), StorageError> {
        let mut guard = self.conn.lock().await;

        if let Some(mut conn) = guard.take() {
            let _ = conn.command("QUIT").await;
        }

        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.conn.lock().await.is_some()
    }

    async fn test_connection(&self) -> Result<(), StorageError> {
        self.with_conn(async |conn| {
            let reply = conn.command("NOOP").await?;

            if reply.is_positive() {
                Ok(())
            } else {
                Err(reply_error(&reply))
            }
        })
        .await
    }

    async fn list_directory(&self, path: &str) -> Result<Fetched<Vec<FileEntry>>, StorageError> {
        Ok(Fetched::fresh(self.listing(path).await?))
    }

    async fn get_file_info(&self, path: &str) -> Result<Fetched<FileEntry>, StorageError> {
        let vpath = canonicalize(path)?;

        let entry = self
            .with_conn(async |conn| {
                let size_reply = conn.command(&format!("SIZE {vpath}")).await?;

                if size_reply.code == 213 {
                    let size: u64 = size_reply.text[3..].trim().parse().unwrap_or(0);

                    let modified = match conn.command(&format!("MDTM {vpath}")).await {
                        Ok(reply) if reply.code == 213 => parse_mdtm(reply.text[3..].trim()),
                        _ => None,
                    };

                    let name = file_name(&vpath).to_owned();

                    return Ok(FileEntry {
                        mime_hint: mime_hint(&name),
                        path: vpath.clone(),
                        size,
                        modified,
                        created: None,
                        is_dir: false,
                        permissions: None,
                        name,
                    });
                }

                // SIZE fails for directories; probe with CWD
                let cwd = conn.command(&format!("CWD {vpath}")).await?;

                if cwd.is_positive() {
                    let _ = conn.command("CWD /").await;

                    return Ok(FileEntry {
                        name: file_name(&vpath).to_owned(),
                        path: vpath.clone(),
                        size: 0,
                        modified: None,
                        created: None,
                        is_dir: true,
                        permissions: None,
                        mime_hint: None,
                    });
                }

                Err(StorageError::NotFound(vpath.clone()))
            })
            .await?;

        Ok(Fetched::fresh(entry))
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

        self.with_conn(async |conn| {
            let data = self.open_data(conn).await?;

            let reply = conn.command(&format!("RETR {vpath}")).await?;

            if !matches!(reply.code, 125 | 150) {
                return Err(reply_error(&reply));
            }

            // the completion reply stays on the control connection; it is
            // drained lazily before the next command
            conn.pending_reply = true;

            Ok(Box::new(data) as ByteStream)
        })
        .await
    }

    async fn read_partial(
        &self,
        path: &str,
        offset: u64,
        length: u64,
    ) -> Result<Vec<u8>, StorageError> {
        let vpath = canonicalize(path)?;

        self.with_conn(async |conn| {
            let data = self.open_data(conn).await?;

            if offset > 0 {
                let reply = conn.command(&format!("REST {offset}")).await?;

                if reply.code != 350 {
                    return Err(reply_error(&reply));
                }
            }

            let reply = conn.command(&format!("RETR {vpath}")).await?;

            if !matches!(reply.code, 125 | 150) {
                return Err(reply_error(&reply));
            }

            let mut buf = Vec::with_capacity(length.min(1 << 20) as usize);
            data.take(length).read_to_end(&mut buf).await?;

            // dropping the data socket aborts the remainder; the server
            // answers with either 226 or 426, both of which just mean the
            // transfer is over
            let _ = conn.read_reply().await;

            Ok(buf)
        })
        .await
    }

    async fn write_file(&self, path: &str, mut data: ByteStream) -> Result<(), StorageError> {
        let vpath = canonicalize(path)?;

        self.with_conn(async |conn| {
            let mut sock = self.open_data(conn).await?;

            let reply = conn.command(&format!("STOR {vpath}")).await?;

            if !matches!(reply.code, 125 | 150) {
                return Err(reply_error(&reply));
            }

            tokio::io::copy(&mut data, &mut sock).await?;
            sock.shutdown().await?;
            drop(sock);

            let done = conn.read_reply().await?;

            if done.is_positive() {
                Ok(())
            } else {
                Err(reply_error(&done))
            }
        })
        .await
    }

    async fn copy_file(&self, src: &str, dst: &str) -> Result<(), StorageError> {
        // ftp has no server-side copy; bounce through memory
        let data = self.read_partial(src, 0, u64::MAX).await?;

        self.write_file(dst, Box::new(std::io::Cursor::new(data)))
            .await
    }

    async fn delete_file(&self, path: &str) -> Result<(), StorageError> {
        let vpath = canonicalize(path)?;

        self.with_conn(async |conn| {
            let reply = conn.command(&format!("DELE {vpath}")).await?;

            if reply.is_positive() {
                Ok(())
            } else {
                Err(reply_error(&reply))
            }
        })
        .await
    }

    async fn delete_directory(&self, path: &str, recursive: bool) -> Result<(), StorageError> {
        let vpath = canonicalize(path)?;

        if recursive {
            let children = self.listing(&vpath).await?;

            for entry in children {
                if entry.is_dir {
                    self.delete_directory(&entry.path, true).await?;
                } else {
                    self.delete_file(&entry.path).await?;
                }
            }
        }

        self.with_conn(async |conn| {
            let reply = conn.command(&format!("RMD {vpath}")).await?;

            if reply.is_positive() {
                Ok(())
            } else {
                Err(reply_error(&reply))
            }
        })
        .await
    }

    async fn create_directory(&self, path: &str) -> Result<(), StorageError> {
        let vpath = canonicalize(path)?;

        // create ancestors first; an already-existing segment answers 550,
        // which is fine as long as the leaf succeeds
        let mut segments = Vec::new();
        let mut cursor = Some(vpath.clone());

        while let Some(p) = cursor {
            if p == "/" {
                break;
            }

            segments.push(p.clone());
            cursor = parent(&p);
        }

        segments.reverse();

        self.with_conn(async |conn| {
            for (idx, segment) in segments.iter().enumerate() {
                let reply = conn.command(&format!("MKD {segment}")).await?;

                let is_leaf = idx == segments.len() - 1;

                if is_leaf && !reply.is_positive() && reply.code != 550 {
                    return Err(reply_error(&reply));
                }
            }

            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epsv_parsing() {
        assert_eq!(
            parse_epsv_port("229 Entering Extended Passive Mode (|||6446|)"),
            Some(6446)
        );
        assert_eq!(parse_epsv_port("229 nonsense"), None);
    }

    #[test]
    fn pasv_parsing() {
        assert_eq!(
            parse_pasv_addr("227 Entering Passive Mode (192,168,1,2,19,137)"),
            Some(("192.168.1.2".to_owned(), 19 * 256 + 137))
        );
        assert_eq!(parse_pasv_addr("227 Entering Passive Mode (1,2,3)"), None);
    }

    #[test]
    fn mlsd_parsing() {
        let entry =
            parse_mlsd_line("type=file;size=1234;modify=20240131120000; Example.mkv", "/tv")
                .unwrap();

        assert_eq!(entry.name, "Example.mkv");
        assert_eq!(entry.path, "/tv/Example.mkv");
        assert_eq!(entry.size, 1234);
        assert!(!entry.is_dir);
        assert!(entry.modified.is_some());

        let dir = parse_mlsd_line("type=dir;modify=20240101000000; Season 1", "/tv").unwrap();
        assert!(dir.is_dir);
        assert_eq!(dir.path, "/tv/Season 1");

        // current/parent pseudo-entries are skipped
        assert!(parse_mlsd_line("type=cdir; .", "/tv").is_none());
    }

    #[test]
    fn list_fallback_parsing() {
        let entry = parse_list_line(
            "-rw-r--r--   1 ftp ftp     104857600 Jan 31 12:00 Big File.iso",
            "/pub",
        )
        .unwrap();

        assert_eq!(entry.name, "Big File.iso");
        assert_eq!(entry.size, 104857600);
        assert!(!entry.is_dir);

        let dir = parse_list_line("drwxr-xr-x   2 ftp ftp 4096 Jan 31 12:00 incoming", "/pub")
            .unwrap();
        assert!(dir.is_dir);
        assert_eq!(dir.size, 0);

        assert!(parse_list_line("total 12", "/pub").is_none());
    }

    #[test]
    fn mdtm_parsing() {
        assert!(parse_mdtm("20240131120000").is_some());
        assert!(parse_mdtm("garbage").is_none());
    }

    #[test]
    fn tls_and_active_mode_are_rejected() {
        let mut settings = FtpSettings {
            host: "ftp.example.com".to_owned(),
            port: 21,
            username: None,
            password: None,
            use_tls: true,
            passive_mode: true,
            connection_timeout_ms: 1000,
        };

        assert!(matches!(
            FtpClient::new(&settings),
            Err(StorageError::Config(_))
        ));

        settings.use_tls = false;
        settings.passive_mode = false;

        assert!(matches!(
            FtpClient::new(&settings),
            Err(StorageError::Config(_))
        ));
    }
}
