//! # Configuration
//!
//! Command-line options for the server and the directory layout they imply.

use std::path::PathBuf;

use clap::Parser;
use tracing::debug;

/// Run a bento server.
#[derive(Debug, Clone, Parser)]
#[command(name = "bentorun", version, about = "Run a bento server")]
pub struct Options {
    /// Server's IPv4 address.
    #[arg(default_value = "0.0.0.0")]
    pub host: String,

    /// Server's port.
    #[arg(default_value_t = 8888)]
    pub port: u16,

    /// Working directory (default: current working directory).
    #[arg(short = 'w', long)]
    pub working_dir: Option<PathBuf>,

    /// The command to run to execute a function, e.g.
    /// 'graphene-sgx/pal_loader graphene-sgx/manifest' for SGX execution.
    #[arg(short = 'c', long, default_value = "python3")]
    pub function_cmd: String,

    /// Driver entrypoint passed to the function command.
    #[arg(short = 'd', long, default_value = "driver.py")]
    pub driver: String,

    /// Log filter (trace, debug, info, warn, error or an EnvFilter directive).
    #[arg(short = 'l', long, default_value = "info")]
    pub log_level: String,
}

impl Options {
    /// Resolved working directory.
    pub fn working_dir(&self) -> std::io::Result<PathBuf> {
        match &self.working_dir {
            Some(dir) => std::path::absolute(dir),
            None => std::env::current_dir(),
        }
    }

    pub fn functions_dir(&self) -> std::io::Result<PathBuf> {
        Ok(self.working_dir()?.join("functions"))
    }

    pub fn instances_dir(&self) -> std::io::Result<PathBuf> {
        Ok(self.working_dir()?.join("instances"))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Creates the functions and instances directories.
    pub fn setup(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.functions_dir()?)?;
        std::fs::create_dir_all(self.instances_dir()?)?;
        Ok(())
    }

    /// Splits the function command into a program and its leading arguments.
    pub fn launcher(&self) -> std::io::Result<Launcher> {
        Launcher::new(&self.function_cmd, &self.driver, self.instances_dir()?)
    }

    pub fn log_config(&self) {
        debug!("configuration:");
        debug!("  host: {}", self.host);
        debug!("  port: {}", self.port);
        debug!("  working_dir: {:?}", self.working_dir());
        debug!("  functions_dir: {:?}", self.functions_dir());
        debug!("  instances_dir: {:?}", self.instances_dir());
        debug!("  function_cmd: {}", self.function_cmd);
        debug!("  driver: {}", self.driver);
        debug!("  log_level: {}", self.log_level);
    }
}

/// How to start an execution process.
///
/// An instance runs as `<program> <args..> <entrypoint> <encoded-payload>` with
/// its logs under `instances_dir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launcher {
    pub program: String,
    pub args: Vec<String>,
    pub entrypoint: String,
    pub instances_dir: PathBuf,
}

impl Launcher {
    pub fn new(function_cmd: &str, entrypoint: &str, instances_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let mut parts = function_cmd.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty function command")
        })?;
        Ok(Self {
            program,
            args: parts.collect(),
            entrypoint: entrypoint.to_string(),
            instances_dir: instances_dir.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_server() {
        let opts = Options::parse_from(["bentorun"]);
        assert_eq!(opts.addr(), "0.0.0.0:8888");
        assert_eq!(opts.function_cmd, "python3");
        assert_eq!(opts.driver, "driver.py");
        assert_eq!(opts.log_level, "info");
    }

    #[test]
    fn directories_follow_working_dir() {
        let opts = Options::parse_from(["bentorun", "127.0.0.1", "9000", "-w", "/srv/bento"]);
        assert_eq!(opts.addr(), "127.0.0.1:9000");
        assert_eq!(opts.functions_dir().unwrap(), PathBuf::from("/srv/bento/functions"));
        assert_eq!(opts.instances_dir().unwrap(), PathBuf::from("/srv/bento/instances"));
    }

    #[test]
    fn function_cmd_is_split_into_program_and_args() {
        let launcher = Launcher::new("graphene-sgx/pal_loader graphene-sgx/manifest", "driver.py", "/tmp").unwrap();
        assert_eq!(launcher.program, "graphene-sgx/pal_loader");
        assert_eq!(launcher.args, vec!["graphene-sgx/manifest".to_string()]);
        assert_eq!(launcher.entrypoint, "driver.py");

        assert!(Launcher::new("   ", "driver.py", "/tmp").is_err());
    }
}
