// src/cli.rs

//! Command-line surface shared by the collector and the agent: flag
//! parsing, the introspection helpers, skeleton-directory creation and the
//! program bootstrap both binaries call.

use crate::config::{self, Config, Fragment};
use crate::core::filter::{FILTER_DOCS, build_filter};
use crate::core::parser::{PARSER_DOCS, build_parser};
use crate::core::resolver::Resolver;
use crate::core::source::{SOURCE_DOCS, build_source};
use crate::core::storage::{STORAGE_DOCS, build_storage};
use crate::daemon::{self, ReopenableLog};
use crate::runtime::{self, RunOptions};
use anyhow::{Context, Result, anyhow};
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::error;
use tracing_subscriber::filter::EnvFilter;

/// Command-line options. Long forms are canonical; the short forms are
/// synonyms.
#[derive(Parser, Debug)]
#[command(disable_version_flag = true)]
pub struct Opts {
    /// Listen address for the self-telemetry surface ('*' for all).
    #[arg(long, short = 'H', value_name = "addr")]
    pub listen_addr: Option<String>,

    /// Listen port for the self-telemetry surface.
    #[arg(long, short = 'P', value_name = "port")]
    pub listen_port: Option<u16>,

    /// Load this key=value configuration file.
    #[arg(long, short = 'c', value_name = "path")]
    pub config: Option<String>,

    /// Create a skeleton configuration directory tree and exit.
    #[arg(long, value_name = "dir")]
    pub config_dir_init: Option<PathBuf>,

    /// Detach and run in the background.
    #[arg(long)]
    pub daemon: bool,

    /// Stay in the foreground (the default).
    #[arg(long, overrides_with = "daemon")]
    pub no_daemon: bool,

    /// PID file location.
    #[arg(long, value_name = "path")]
    pub pid_file: Option<PathBuf>,

    /// Drop to this user after the listen socket is bound.
    #[arg(long, short = 'u', value_name = "name")]
    pub user: Option<String>,

    /// Drop to this group after the listen socket is bound.
    #[arg(long, short = 'g', value_name = "name")]
    pub group: Option<String>,

    /// Validate one driver fragment and exit.
    #[arg(long, value_name = "file")]
    pub check_fragment: Option<PathBuf>,

    /// List the available source drivers.
    #[arg(long)]
    pub source_list: bool,
    /// Print an example fragment for a source driver.
    #[arg(long, value_name = "driver")]
    pub source_config: Option<String>,
    /// Print the documentation of a source driver.
    #[arg(long, value_name = "driver")]
    pub source_doc: Option<String>,

    /// List the available parser drivers.
    #[arg(long)]
    pub parser_list: bool,
    /// Print an example fragment for a parser driver.
    #[arg(long, value_name = "driver")]
    pub parser_config: Option<String>,
    /// Print the documentation of a parser driver.
    #[arg(long, value_name = "driver")]
    pub parser_doc: Option<String>,

    /// List the available filter drivers.
    #[arg(long)]
    pub filter_list: bool,
    /// Print an example fragment for a filter driver.
    #[arg(long, value_name = "driver")]
    pub filter_config: Option<String>,
    /// Print the documentation of a filter driver.
    #[arg(long, value_name = "driver")]
    pub filter_doc: Option<String>,

    /// List the available storage drivers.
    #[arg(long)]
    pub storage_list: bool,
    /// Print an example fragment for a storage driver.
    #[arg(long, value_name = "driver")]
    pub storage_config: Option<String>,
    /// Print the documentation of a storage driver.
    #[arg(long, value_name = "driver")]
    pub storage_doc: Option<String>,

    /// Print the version and exit.
    #[arg(long, short = 'V')]
    pub version: bool,

    /// Print the version with build details and exit.
    #[arg(long)]
    pub extended_version: bool,
}

/// What distinguishes the two binaries.
pub struct ProgramInfo {
    pub name: &'static str,
    pub default_port: u16,
}

/// The shared entry point. Returns the process exit code: 0 for a clean
/// shutdown, 1 for any fatal startup error (a live PID file included).
pub fn run_program(program: ProgramInfo) -> i32 {
    let opts = Opts::parse();

    if let Some(code) = handle_early_flags(&opts, &program) {
        return code;
    }

    match bootstrap(opts, program) {
        Ok(()) => 0,
        Err(e) => {
            // Logging may not be initialized yet; stderr always works.
            eprintln!("{}: {e:#}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"));
            1
        }
    }
}

/// Everything past flag handling: config, daemonization, logging, the PID
/// file and the runtime itself.
fn bootstrap(opts: Opts, program: ProgramInfo) -> Result<()> {
    let config = match &opts.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load configuration from \"{path}\""))?,
        None => Config::default(),
    };
    let fragments = config::load_fragments(&config).context("failed to load fragments")?;

    // Daemonize before the runtime spins up any threads.
    if opts.daemon {
        daemon::daemonize()?;
    }

    // Logging: the configured file when one is set, stdout otherwise.
    // RUST_LOG overrides the config's log_level.
    let log_level =
        std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    let log = match &config.log_file {
        Some(path) => {
            let log = ReopenableLog::open(Path::new(path))
                .with_context(|| format!("failed to open log file '{path}'"))?;
            tracing_subscriber::fmt()
                .with_env_filter(EnvFilter::new(log_level))
                .compact()
                .with_ansi(false)
                .with_writer(log.clone())
                .init();
            Some(log)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(EnvFilter::new(log_level))
                .compact()
                .with_ansi(true)
                .init();
            None
        }
    };

    let pid_path = opts
        .pid_file
        .clone()
        .unwrap_or_else(|| daemon::default_pid_path(program.name));
    daemon::write_pid_file(&pid_path)?;

    let listen_addr = match &opts.listen_addr {
        Some(addr) if addr == "*" => "0.0.0.0".to_string(),
        Some(addr) => addr.clone(),
        None => config.bind_addr().to_string(),
    };
    let listen_port = opts
        .listen_port
        .or(config.http_port)
        .unwrap_or(program.default_port);

    let run_opts = RunOptions {
        config,
        fragments,
        listen_addr,
        listen_port,
        user: opts.user.clone(),
        group: opts.group.clone(),
        log,
    };

    let rt = tokio::runtime::Runtime::new().context("failed to start runtime")?;
    let result = rt.block_on(runtime::run(run_opts));
    daemon::remove_pid_file(&pid_path);
    if let Err(e) = &result {
        error!("Runtime error: {e:#}");
    }
    result
}

/// Handles the flags that run and exit without starting the daemon.
/// Returns the exit code when one was handled.
fn handle_early_flags(opts: &Opts, program: &ProgramInfo) -> Option<i32> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    if opts.version {
        println!("{} version {VERSION}", program.name);
        return Some(0);
    }
    if opts.extended_version {
        println!("{} version {VERSION}", program.name);
        println!("default telemetry port: {}", program.default_port);
        println!("source drivers:  {}", driver_names(SOURCE_DOCS));
        println!("parser drivers:  {}", driver_names(PARSER_DOCS));
        println!("filter drivers:  {}", driver_names(FILTER_DOCS));
        println!("storage drivers: {}", driver_names(STORAGE_DOCS));
        return Some(0);
    }

    for (flag, docs) in [
        (opts.source_list, SOURCE_DOCS),
        (opts.parser_list, PARSER_DOCS),
        (opts.filter_list, FILTER_DOCS),
        (opts.storage_list, STORAGE_DOCS),
    ] {
        if flag {
            for (name, _) in docs {
                println!("{name}");
            }
            return Some(0);
        }
    }

    for (wanted, docs) in [
        (&opts.source_doc, SOURCE_DOCS),
        (&opts.parser_doc, PARSER_DOCS),
        (&opts.filter_doc, FILTER_DOCS),
        (&opts.storage_doc, STORAGE_DOCS),
    ] {
        if let Some(driver) = wanted {
            return Some(match docs.iter().find(|(name, _)| name == driver) {
                Some((name, doc)) => {
                    println!("{name}: {doc}");
                    0
                }
                None => {
                    eprintln!("unknown driver '{driver}'");
                    1
                }
            });
        }
    }

    for wanted in [
        &opts.source_config,
        &opts.parser_config,
        &opts.filter_config,
        &opts.storage_config,
    ]
    .into_iter()
    .flatten()
    {
        return Some(match example_fragment(wanted) {
            Some(example) => {
                print!("{example}");
                0
            }
            None => {
                eprintln!("unknown driver '{wanted}'");
                1
            }
        });
    }

    if let Some(dir) = &opts.config_dir_init {
        return Some(match config_dir_init(dir, program) {
            Ok(()) => {
                println!("initialized configuration tree under {}", dir.display());
                0
            }
            Err(e) => {
                eprintln!("config-dir-init failed: {e:#}");
                1
            }
        });
    }

    if let Some(path) = &opts.check_fragment {
        return Some(match check_fragment(path) {
            Ok(kind) => {
                println!("{}: OK ({kind})", path.display());
                0
            }
            Err(e) => {
                eprintln!("{}: {e}", path.display());
                1
            }
        });
    }

    None
}

fn driver_names(docs: &[(&str, &str)]) -> String {
    docs.iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Validates one fragment by actually constructing its driver.
fn check_fragment(path: &Path) -> Result<&'static str> {
    let frag = Fragment::load(path).map_err(|e| anyhow!("{e}"))?;
    let driver = frag.driver.clone();

    if PARSER_DOCS.iter().any(|(name, _)| *name == driver) {
        let mut frag = frag;
        build_parser(&mut frag).map_err(|e| anyhow!("{e}"))?;
        return Ok("parser");
    }
    if FILTER_DOCS.iter().any(|(name, _)| *name == driver) {
        let mut frag = frag;
        build_filter(&mut frag).map_err(|e| anyhow!("{e}"))?;
        return Ok("filter");
    }
    if STORAGE_DOCS.iter().any(|(name, _)| *name == driver) {
        // Throwaway plumbing; the sink is built and dropped.
        let (_resolver, handle) = Resolver::new(Duration::from_secs(60), false);
        let (results_tx, _results_rx) = tokio::sync::mpsc::channel(1);
        let stats = crate::core::stats::StatsRegistry::new();
        let mut frag = frag;
        build_storage(&mut frag, handle, results_tx, &stats).map_err(|e| anyhow!("{e}"))?;
        return Ok("storage");
    }
    if SOURCE_DOCS.iter().any(|(name, _)| *name == driver) {
        let mut frag = frag;
        build_source(&mut frag).map_err(|e| anyhow!("{e}"))?;
        return Ok("source");
    }
    Err(anyhow!("unknown driver '{driver}'"))
}

/// An example fragment per driver tag, used by the `--*-config` helpers
/// and the skeleton tree.
fn example_fragment(driver: &str) -> Option<&'static str> {
    Some(match driver {
        "http" => {
            "driver = http\nurl = http://server.example.org/nginx_status\ninterval = 10\ntimeout = 5\nparsers = nginx\nstorage = graphite\n"
        }
        "exec" => {
            "driver = exec\ncommand = /usr/bin/vmstat -s\ninterval = 30\nparsers = stats\n"
        }
        "exec_ssh" => {
            "driver = exec_ssh\nhost = server.example.org\nuser = monitor\ncommand = /usr/bin/vmstat -s\ninterval = 60\nparsers = stats\n"
        }
        "mysql" => {
            "driver = mysql\nhost = db.example.org\nusername = monitor\npassword = secret\ninterval = 60\nparsers = stats\n"
        }
        "memcached" => {
            "driver = memcached\nhost = cache.example.org\ninterval = 30\nparsers = stats\n"
        }
        "static" => "driver = static\nbody = up=1\ninterval = 10\nparsers = stats\n",
        "dummy" => {
            "driver = dummy\nmax_delay = 0.5\nfail_ratio = 0.1\ninterval = 5\nparsers = stats\n"
        }
        "text_simple" => "driver = text_simple\n# warn_duplicates = yes\n",
        "json" => "driver = json\n",
        "xml_simple" => "driver = xml_simple\n",
        "tomcat" => "driver = tomcat\n",
        "nginx" => "driver = nginx\n",
        "apache" | "lighttpd" => "driver = apache\n",
        "varnish" => "driver = varnish\n",
        "script" => "driver = script\nfile = /etc/gatherd/parse.lua\n",
        "rewrite" => "driver = rewrite\nprefix = app.\n",
        "scale" => "driver = scale\nfactor = 0.001\nkeys = *_bytes\n",
        "prune" => "driver = prune\ndrop = uptime*\n",
        "sethost" => "driver = sethost\nhost = cluster.example.org\n",
        "route" => "driver = route\nstorage = graphite\n",
        "file" => "driver = file\ndir = /var/lib/gatherd/%Y/%m/%d\nprefix = sample-\n",
        "graphite" => "driver = graphite\nhost = graphite.example.org\nport = 2003\n",
        _ => return None,
    })
}

/// Creates the skeleton configuration tree: the four fragment directories
/// with example fragments plus a top-level config file.
fn config_dir_init(dir: &Path, program: &ProgramInfo) -> Result<()> {
    for sub in ["parser.d", "filter.d", "storage.d", "source.d"] {
        fs::create_dir_all(dir.join(sub))?;
    }
    let top = format!(
        "# {} configuration\nhttp_addr = *\nhttp_port = {}\nparsers = parser.d/*.conf\nfilters = filter.d/*.conf\nstorage = storage.d/*.conf\nsource_groups = source.d/*.conf\n",
        program.name, program.default_port
    );
    write_if_absent(&dir.join(format!("{}.conf", program.name)), &top)?;
    write_if_absent(
        &dir.join("parser.d/stats.conf"),
        example_fragment("text_simple").unwrap_or_default(),
    )?;
    write_if_absent(
        &dir.join("storage.d/graphite.conf"),
        example_fragment("graphite").unwrap_or_default(),
    )?;
    write_if_absent(
        &dir.join("source.d/example.conf"),
        "# driver = static\n# body = up=1\n# interval = 10\n# parsers = stats\n# storage = graphite\n",
    )?;
    Ok(())
}

fn write_if_absent(path: &Path, content: &str) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))
}
