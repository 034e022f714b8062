use std::io::{self, Read, Seek, SeekFrom, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ssh2::{ErrorCode, FileStat, OpenFlags, OpenType, Session, Sftp};

use crate::common::{file_name, join_path, seconds_to_systemtime, StorageEntry};
use crate::transport::Transport;

// libssh2 SFTP status codes
const FX_NO_SUCH_FILE: i32 = 2;
const FX_PERMISSION_DENIED: i32 = 3;
const FX_NO_SUCH_PATH: i32 = 10;
const FX_FILE_ALREADY_EXISTS: i32 = 11;
// libssh2 session error code
const ERROR_TIMEOUT: i32 = -9;

const FILE_MODE: i32 = 0o644;
const DIR_MODE: i32 = 0o755;

/// SSH认证方式
#[derive(Clone)]
pub enum SftpAuth {
    Password(String),
    PrivateKey {
        path: PathBuf,
        passphrase: Option<String>,
    },
    Agent,
}

impl std::fmt::Debug for SftpAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SftpAuth::Password(_) => write!(f, "Password(***)"),
            SftpAuth::PrivateKey { path, .. } => write!(f, "PrivateKey({})", path.display()),
            SftpAuth::Agent => write!(f, "Agent"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SftpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: SftpAuth,
    pub timeout: Duration,
}

struct Connection {
    // keeps the transport alive for `sftp`
    _session: Session,
    sftp: Sftp,
}

/// SFTP transport over libssh2.
///
/// Sessions are opened lazily and kept in a small idle pool so concurrent
/// transfers each get their own channel. A session that fails at the
/// transport level is dropped instead of returned to the pool.
pub struct SftpTransport {
    settings: Arc<SftpSettings>,
    idle: Arc<Mutex<Vec<Connection>>>,
}

/// 将libssh2错误映射为io::Error，保留调用方依赖的ErrorKind
fn ssh_error(err: ssh2::Error) -> io::Error {
    let kind = match err.code() {
        ErrorCode::SFTP(FX_NO_SUCH_FILE) | ErrorCode::SFTP(FX_NO_SUCH_PATH) => io::ErrorKind::NotFound,
        ErrorCode::SFTP(FX_PERMISSION_DENIED) => io::ErrorKind::PermissionDenied,
        ErrorCode::SFTP(FX_FILE_ALREADY_EXISTS) => io::ErrorKind::AlreadyExists,
        ErrorCode::SFTP(_) => io::ErrorKind::Other,
        ErrorCode::Session(ERROR_TIMEOUT) => io::ErrorKind::TimedOut,
        ErrorCode::Session(_) => io::ErrorKind::ConnectionAborted,
    };
    io::Error::new(kind, err)
}

/// Errors after which the session is still usable.
fn is_recoverable(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied | io::ErrorKind::AlreadyExists
    )
}

fn entry_from_stat(path: String, stat: &FileStat) -> StorageEntry {
    let file_type = stat.file_type();
    StorageEntry {
        name: file_name(&path).to_string(),
        is_dir: file_type.is_dir(),
        is_file: file_type.is_file(),
        is_symlink: file_type.is_symlink(),
        size: stat.size.unwrap_or(0),
        modified: seconds_to_systemtime(stat.mtime.unwrap_or(0)),
        path,
    }
}

impl SftpTransport {
    pub fn new(settings: SftpSettings) -> Self {
        Self {
            settings: Arc::new(settings),
            idle: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn open(settings: &SftpSettings) -> io::Result<Connection> {
        let addrs: Vec<_> = (settings.host.as_str(), settings.port)
            .to_socket_addrs()?
            .collect();

        let mut last_error = io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} did not resolve to any address", settings.host),
        );
        let mut stream = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, settings.timeout) {
                Ok(tcp) => {
                    stream = Some(tcp);
                    break;
                }
                Err(e) => last_error = e,
            }
        }
        let tcp = stream.ok_or(last_error)?;

        let mut session = Session::new().map_err(ssh_error)?;
        session.set_timeout(settings.timeout.as_millis().min(u32::MAX as u128) as u32);
        session.set_tcp_stream(tcp);
        session.handshake().map_err(ssh_error)?;

        let user = settings.username.as_str();
        match &settings.auth {
            SftpAuth::Password(password) => session.userauth_password(user, password),
            SftpAuth::PrivateKey { path, passphrase } => {
                session.userauth_pubkey_file(user, None, path, passphrase.as_deref())
            }
            SftpAuth::Agent => session.userauth_agent(user),
        }
        .map_err(|e| io::Error::new(io::ErrorKind::PermissionDenied, e))?;

        if !session.authenticated() {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("authentication failed for {}@{}", user, settings.host),
            ));
        }

        let sftp = session.sftp().map_err(ssh_error)?;
        log::debug!(
            "Opened SFTP session to {}@{}:{}",
            user,
            settings.host,
            settings.port
        );

        Ok(Connection {
            _session: session,
            sftp,
        })
    }

    /// Runs a blocking SFTP operation on a pooled session.
    async fn with_sftp<R, F>(&self, op: F) -> io::Result<R>
    where
        F: FnOnce(&Sftp) -> io::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let settings = self.settings.clone();
        let idle = self.idle.clone();

        tokio::task::spawn_blocking(move || {
            let pooled = idle.lock().map_err(|_| poisoned())?.pop();
            let connection = match pooled {
                Some(connection) => connection,
                None => Self::open(&settings)?,
            };

            let result = op(&connection.sftp);
            let healthy = match &result {
                Ok(_) => true,
                Err(e) => is_recoverable(e),
            };
            if healthy {
                idle.lock().map_err(|_| poisoned())?.push(connection);
            } else {
                log::debug!("Dropping SFTP session to {}", settings.host);
            }

            result
        })
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
    }
}

fn poisoned() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "sftp session pool lock poisoned")
}

#[async_trait::async_trait]
impl Transport for SftpTransport {
    async fn connect(&self) -> io::Result<()> {
        self.with_sftp(|sftp| sftp.stat(Path::new("/")).map(|_| ()).map_err(ssh_error))
            .await
    }

    async fn stat(&self, path: &str) -> io::Result<StorageEntry> {
        let path = path.to_string();
        self.with_sftp(move |sftp| {
            let stat = sftp.stat(Path::new(&path)).map_err(ssh_error)?;
            Ok(entry_from_stat(path, &stat))
        })
        .await
    }

    async fn read_dir(&self, path: &str) -> io::Result<Vec<StorageEntry>> {
        let dir = path.to_string();
        self.with_sftp(move |sftp| {
            let listing = sftp.readdir(Path::new(&dir)).map_err(ssh_error)?;
            Ok(listing
                .into_iter()
                .filter_map(|(child, stat)| {
                    let name = child.file_name()?.to_string_lossy().into_owned();
                    Some(entry_from_stat(join_path(&dir, &name), &stat))
                })
                .collect())
        })
        .await
    }

    async fn create_dir(&self, path: &str) -> io::Result<()> {
        let path = path.to_string();
        self.with_sftp(move |sftp| sftp.mkdir(Path::new(&path), DIR_MODE).map_err(ssh_error))
            .await
    }

    async fn read_chunk(&self, path: &str, offset: u64, len: u64) -> io::Result<Vec<u8>> {
        let path = path.to_string();
        self.with_sftp(move |sftp| {
            let mut file = sftp.open(Path::new(&path)).map_err(ssh_error)?;
            file.seek(SeekFrom::Start(offset))?;

            let mut buffer = Vec::with_capacity(len as usize);
            file.take(len).read_to_end(&mut buffer)?;
            Ok(buffer)
        })
        .await
    }

    async fn read_file(&self, path: &str) -> io::Result<Vec<u8>> {
        let path = path.to_string();
        self.with_sftp(move |sftp| {
            let mut file = sftp.open(Path::new(&path)).map_err(ssh_error)?;
            let mut buffer = Vec::new();
            file.read_to_end(&mut buffer)?;
            Ok(buffer)
        })
        .await
    }

    async fn write_chunk(&self, path: &str, offset: u64, data: &[u8]) -> io::Result<()> {
        let path = path.to_string();
        let data = data.to_vec();
        self.with_sftp(move |sftp| {
            let flags = if offset == 0 {
                OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE
            } else {
                OpenFlags::WRITE
            };
            let mut file = sftp
                .open_mode(Path::new(&path), flags, FILE_MODE, OpenType::File)
                .map_err(ssh_error)?;
            if offset > 0 {
                file.seek(SeekFrom::Start(offset))?;
            }
            file.write_all(&data)?;
            file.flush()
        })
        .await
    }

    async fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        let from = from.to_string();
        let to = to.to_string();
        self.with_sftp(move |sftp| {
            sftp.rename(Path::new(&from), Path::new(&to), None)
                .map_err(ssh_error)
        })
        .await
    }

    async fn remove_file(&self, path: &str) -> io::Result<()> {
        let path = path.to_string();
        self.with_sftp(move |sftp| sftp.unlink(Path::new(&path)).map_err(ssh_error))
            .await
    }
}
