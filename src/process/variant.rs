//! Server and proxy launch behaviour.
//!
//! The two variants differ only in how their command line is shaped and
//! whether a data directory must be initialised first, so they plug into
//! [`Process`](crate::Process) through the small [`ProcessVariant`] interface.

use std::fmt;
use std::path::Path;

use crate::constants::INIT_MARKER_FILE;
use crate::Result;
use crate::SetupError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProcessKind {
    #[default]
    Server,
    Proxy,
}

impl ProcessKind {
    /// Lower-case form used in generated names (`server_0`, `proxy_3`)
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessKind::Server => "server",
            ProcessKind::Proxy => "proxy",
        }
    }

    pub(crate) fn variant(
        self,
        cache_size_mb: u64,
    ) -> Box<dyn ProcessVariant> {
        match self {
            ProcessKind::Server => Box::new(ServerVariant { cache_size_mb }),
            ProcessKind::Proxy => Box::new(ProxyVariant),
        }
    }
}

impl fmt::Display for ProcessKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            ProcessKind::Server => f.write_str("Server"),
            ProcessKind::Proxy => f.write_str("Proxy"),
        }
    }
}

/// What a variant may look at when shaping a command line
#[derive(Debug, Clone, Copy)]
pub struct LaunchContext<'a> {
    pub data_dir: &'a Path,
    pub log_path: &'a Path,
    pub desired_name: &'a str,
    pub server_tags: &'a [String],
}

pub trait ProcessVariant: Send + Sync + fmt::Debug {
    fn kind(&self) -> ProcessKind;

    /// Shapes the base option list once, when the process is constructed
    fn build_launch_args(
        &self,
        options: &mut Vec<String>,
    ) -> Result<()>;

    /// Last additions to the command line of every start
    fn post_process_args(
        &self,
        ctx: &LaunchContext<'_>,
        args: &mut Vec<String>,
    );

    /// Arguments of a one-off initialisation run needed before this start
    fn initialization_args(
        &self,
        ctx: &LaunchContext<'_>,
    ) -> Option<Vec<String>>;
}

#[derive(Debug)]
pub struct ServerVariant {
    cache_size_mb: u64,
}

impl ProcessVariant for ServerVariant {
    fn kind(&self) -> ProcessKind {
        ProcessKind::Server
    }

    fn build_launch_args(
        &self,
        options: &mut Vec<String>,
    ) -> Result<()> {
        if !has_option(options, "--cache-size") {
            options.push("--cache-size".into());
            options.push(self.cache_size_mb.to_string());
        }

        if has_option(options, "--directory") {
            return Err(SetupError::InvalidConfig(
                "The --directory should not be provided in extra_options".into(),
            )
            .into());
        }

        options.insert(0, "serve".into());
        Ok(())
    }

    fn post_process_args(
        &self,
        ctx: &LaunchContext<'_>,
        args: &mut Vec<String>,
    ) {
        args.push("--directory".into());
        args.push(ctx.data_dir.display().to_string());
    }

    fn initialization_args(
        &self,
        ctx: &LaunchContext<'_>,
    ) -> Option<Vec<String>> {
        if ctx.data_dir.join(INIT_MARKER_FILE).exists() {
            return None;
        }

        let mut args = vec![
            "create".to_string(),
            "--server-name".into(),
            ctx.desired_name.into(),
            "--directory".into(),
            ctx.data_dir.display().to_string(),
            "--log-file".into(),
            ctx.log_path.display().to_string(),
        ];
        for tag in ctx.server_tags {
            args.push("--server-tag".into());
            args.push(tag.clone());
        }
        Some(args)
    }
}

#[derive(Debug)]
pub struct ProxyVariant;

impl ProcessVariant for ProxyVariant {
    fn kind(&self) -> ProcessKind {
        ProcessKind::Proxy
    }

    fn build_launch_args(
        &self,
        options: &mut Vec<String>,
    ) -> Result<()> {
        take_option(options, "--cache-size");
        options.insert(0, "proxy".into());
        Ok(())
    }

    fn post_process_args(
        &self,
        _ctx: &LaunchContext<'_>,
        _args: &mut Vec<String>,
    ) {
    }

    fn initialization_args(
        &self,
        _ctx: &LaunchContext<'_>,
    ) -> Option<Vec<String>> {
        None
    }
}

/// True for `--name value` as well as `--name=value`
pub(crate) fn has_option(
    options: &[String],
    name: &str,
) -> bool {
    let prefix = format!("{name}=");
    options.iter().any(|o| o == name || o.starts_with(&prefix))
}

/// Removes the first `--name value` / `--name=value` and returns the value
pub(crate) fn take_option(
    options: &mut Vec<String>,
    name: &str,
) -> Option<String> {
    let prefix = format!("{name}=");
    let pos = options.iter().position(|o| o == name || o.starts_with(&prefix))?;
    let option = options.remove(pos);
    if option == name {
        if pos < options.len() {
            return Some(options.remove(pos));
        }
        return None;
    }
    Some(option[prefix.len()..].trim_matches(|c| c == '\'' || c == '"').to_string())
}
