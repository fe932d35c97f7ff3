// src/core/source/exec.rs

//! The exec family: local commands, commands behind an ssh prefix, and the
//! mysql batch client.

use super::{FetchContext, SourceDriver};
use crate::config::Fragment;
use crate::core::errors::GatherError;
use crate::core::subprocess::{CommandSpec, run_command};
use async_trait::async_trait;
use bytes::Bytes;

fn split_command(raw: &str) -> Result<(String, Vec<String>), GatherError> {
    let mut parts = raw.split_whitespace().map(str::to_string);
    let program = parts
        .next()
        .ok_or_else(|| GatherError::Config("empty command".into()))?;
    Ok((program, parts.collect()))
}

/// Runs a local command and emits its stdout.
pub struct ExecSource {
    spec: CommandSpec,
}

impl ExecSource {
    pub fn from_fragment(frag: &mut Fragment) -> Result<Self, GatherError> {
        let raw = frag
            .take_str("command")
            .ok_or_else(|| GatherError::Config("exec source needs a 'command' key".into()))?;
        let (program, args) = split_command(&raw)?;
        let mut spec = CommandSpec::new(program);
        spec.args = args;
        spec.require_zero_exit = frag.take_bool_or("require_zero_exit", true)?;
        Ok(Self { spec })
    }
}

#[async_trait]
impl SourceDriver for ExecSource {
    fn driver(&self) -> &'static str {
        "exec"
    }

    fn signature(&self) -> String {
        self.spec.signature()
    }

    fn endpoint(&self) -> (String, u16) {
        ("localhost".to_string(), 0)
    }

    async fn fetch(&self, ctx: &FetchContext) -> Result<Bytes, GatherError> {
        let out = run_command(&self.spec, ctx.timeout).await?;
        Ok(out.stdout)
    }
}

/// Exec with an injected `ssh [options] user@host` prefix; optionally
/// overrides the agent socket for the duration of the spawn.
pub struct ExecSshSource {
    host: String,
    spec: CommandSpec,
}

impl ExecSshSource {
    pub fn from_fragment(frag: &mut Fragment) -> Result<Self, GatherError> {
        let host = frag
            .take_str("host")
            .ok_or_else(|| GatherError::Config("exec_ssh source needs a 'host' key".into()))?;
        let command = frag
            .take_str("command")
            .ok_or_else(|| GatherError::Config("exec_ssh source needs a 'command' key".into()))?;
        let user = frag.take_str("user");

        let mut spec = CommandSpec::new("ssh");
        for opt in frag.take_list("ssh_options") {
            spec.args.push(opt);
        }
        let target = match &user {
            Some(user) => format!("{user}@{host}"),
            None => host.clone(),
        };
        spec.args.push(target);
        spec.args.push(command);
        if let Some(socket) = frag.take_str("agent_socket") {
            spec.envs.push(("SSH_AUTH_SOCK".to_string(), socket));
        }
        spec.require_zero_exit = frag.take_bool_or("require_zero_exit", true)?;
        Ok(Self { host, spec })
    }
}

#[async_trait]
impl SourceDriver for ExecSshSource {
    fn driver(&self) -> &'static str {
        "exec_ssh"
    }

    fn signature(&self) -> String {
        self.spec.signature()
    }

    fn endpoint(&self) -> (String, u16) {
        (self.host.clone(), 22)
    }

    async fn fetch(&self, ctx: &FetchContext) -> Result<Bytes, GatherError> {
        let out = run_command(&self.spec, ctx.timeout).await?;
        Ok(out.stdout)
    }
}

/// Spawns the mysql batch client; the daemon never speaks the wire
/// protocol itself. Output is tab-separated name/value rows.
pub struct MysqlSource {
    host: String,
    port: u16,
    spec: CommandSpec,
}

impl MysqlSource {
    pub fn from_fragment(frag: &mut Fragment) -> Result<Self, GatherError> {
        let host = frag.take_str_or("host", "localhost");
        let port = frag.take_parsed_or("port", 3306u16)?;
        let query = frag.take_str_or("query", "SHOW GLOBAL STATUS");

        let mut spec = CommandSpec::new(frag.take_str_or("mysql_binary", "mysql"));
        spec.args
            .extend(["-h".into(), host.clone(), "-P".into(), port.to_string()]);
        if let Some(user) = frag.take_str("username") {
            spec.args.extend(["-u".into(), user]);
        }
        if let Some(password) = frag.take_str("password") {
            spec.args.push(format!("--password={password}"));
        }
        if let Some(database) = frag.take_str("database") {
            spec.args.push(database);
        }
        // Batch mode, no column headers: plain name<TAB>value rows.
        spec.args.extend(["-B".into(), "-N".into(), "-e".into(), query]);
        Ok(Self { host, port, spec })
    }
}

#[async_trait]
impl SourceDriver for MysqlSource {
    fn driver(&self) -> &'static str {
        "mysql"
    }

    fn signature(&self) -> String {
        format!("mysql://{}:{}", self.host, self.port)
    }

    fn endpoint(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }

    async fn fetch(&self, ctx: &FetchContext) -> Result<Bytes, GatherError> {
        let out = run_command(&self.spec, ctx.timeout).await?;
        Ok(out.stdout)
    }
}
