use derivative::Derivative;

/// The embedded default internal-client pipeline, used when
/// `--internal-client-conf-path` is not supplied. Mirrors the proxy
/// pipeline Swift ships by default for in-process account auto-creation.
pub const DEFAULT_INTERNAL_CLIENT_CONF: &str = "\
[DEFAULT]
swift_dir = /etc/swift
user = swift

[pipeline:main]
pipeline = catch_errors proxy-logging cache proxy-server

[app:proxy-server]
use = egg:swift#proxy
account_autocreate = true

[filter:cache]
use = egg:swift#memcache

[filter:proxy-logging]
use = egg:swift#proxy_logging

[filter:catch_errors]
use = egg:swift#catch_errors
";

/// Container-sharder daemon configuration, bound one-to-one with the
/// external interfaces this subsystem recognizes.
#[derive(Derivative, clap::Parser)]
#[derivative(Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Config {
    /// Root directory under which device mount points live.
    #[clap(long, env = "DEVICES", default_value = "/srv/node")]
    pub devices: String,

    /// Require devices to be an actual mount point before using them.
    #[clap(long = "mount-check", env = "MOUNT_CHECK", default_value = "true")]
    pub mount_check: bool,

    /// Seconds between the start of consecutive passes.
    #[clap(long, env = "INTERVAL", default_value = "1800")]
    pub interval: u64,

    /// Bounded worker-pool size used for network-I/O fan-out.
    #[clap(long, env = "CONCURRENCY", default_value = "8")]
    pub concurrency: usize,

    /// Target subtree size a split candidate must reach.
    #[clap(long = "shard-group-count", env = "SHARD_GROUP_COUNT", default_value = "500000")]
    pub shard_group_count: usize,

    /// Read timeout, in seconds, for internal HTTP and replication calls.
    #[clap(long = "node-timeout", env = "NODE_TIMEOUT", default_value = "10")]
    pub node_timeout: u64,

    /// Connect timeout, in seconds, for internal HTTP and replication calls.
    #[clap(long = "conn-timeout", env = "CONN_TIMEOUT", default_value = "5")]
    pub conn_timeout: u64,

    /// Retries attempted per internal request before giving up.
    #[clap(long = "request-tries", env = "REQUEST_TRIES", default_value = "3")]
    pub request_tries: u32,

    /// Age, in seconds, before a replicated handoff database is eligible
    /// for local cleanup.
    #[clap(long = "reclaim-age", env = "RECLAIM_AGE", default_value = "604800")]
    pub reclaim_age: u64,

    /// Path recon statistics are written to.
    #[clap(long = "recon-cache-path", env = "RECON_CACHE_PATH", default_value = "/var/cache/swift")]
    pub recon_cache_path: String,

    /// Swift configuration directory, consulted for the ring file.
    #[clap(long = "swift-dir", env = "SWIFT_DIR", default_value = "/etc/swift")]
    pub swift_dir: String,

    /// Local port the owning node's proxy/object servers bind.
    #[clap(long = "bind-port", env = "BIND_PORT", default_value = "6001")]
    pub bind_port: u16,

    /// Path to an internal-client pipeline configuration. Falls back to
    /// [`DEFAULT_INTERNAL_CLIENT_CONF`] when unset.
    #[clap(long = "internal-client-conf-path", env = "INTERNAL_CLIENT_CONF_PATH")]
    pub internal_client_conf_path: Option<String>,

    /// Run exactly one pass and exit, instead of looping forever.
    #[clap(long)]
    pub once: bool,

    /// Base URL of this node's own proxy endpoint, used for the internal
    /// HTTP client's outbound calls.
    #[clap(long = "proxy-base-url", env = "PROXY_BASE_URL", default_value = "http://127.0.0.1:6001/")]
    pub proxy_base_url: url::Url,

    /// Path to a ring description file (see `shard_ring::Ring::from_json`).
    #[clap(long = "ring-path", env = "RING_PATH", default_value = "/etc/swift/container.ring.json")]
    pub ring_path: String,

    /// This node's advertised IP, used to find locally-mounted handoff
    /// devices in the ring.
    #[clap(long = "local-ip", env = "LOCAL_IP", default_value = "127.0.0.1")]
    pub local_ip: String,
}

impl Config {
    /// The internal-client pipeline body: the file at
    /// `--internal-client-conf-path` if one was given and reads
    /// successfully, otherwise [`DEFAULT_INTERNAL_CLIENT_CONF`].
    pub fn internal_client_conf(&self) -> std::borrow::Cow<'static, str> {
        if let Some(path) = &self.internal_client_conf_path {
            if let Ok(contents) = std::fs::read_to_string(path) {
                return std::borrow::Cow::Owned(contents);
            }
            tracing::warn!(path, "failed to read internal-client-conf-path, using embedded default");
        }
        std::borrow::Cow::Borrowed(DEFAULT_INTERNAL_CLIENT_CONF)
    }
}
