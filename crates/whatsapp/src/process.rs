//! Supervision of the Node.js Baileys sidecar process.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use {
    anyhow::{Context, Result, bail},
    tokio::{
        io::{AsyncBufReadExt, AsyncRead, BufReader},
        process::{Child, Command},
    },
    tracing::{Level, debug, error, info, warn},
};

use crate::sidecar::DEFAULT_SIDECAR_PORT;

/// Environment variable overriding the sidecar location.
pub const SIDECAR_DIR_ENV: &str = "LEMBAR_SIDECAR_DIR";

const SIDECAR_SUBDIR: &str = "sidecar/whatsapp-baileys";
const STARTUP_GRACE: Duration = Duration::from_millis(500);
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings for launching the sidecar.
#[derive(Debug, Clone)]
pub struct SidecarConfig {
    /// Directory containing the sidecar's `package.json`.
    pub sidecar_dir: PathBuf,
    pub port: u16,
    /// Where the sidecar stores credentials when a login names no directory.
    pub auth_dir: Option<PathBuf>,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            sidecar_dir: PathBuf::new(),
            port: DEFAULT_SIDECAR_PORT,
            auth_dir: None,
        }
    }
}

/// A running sidecar. Killed when dropped.
pub struct SidecarProcess {
    child: Child,
    port: u16,
}

impl SidecarProcess {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Ask the sidecar to exit, killing it if it does not within a few seconds.
    pub async fn stop(&mut self) -> Result<()> {
        info!("stopping WhatsApp sidecar");

        #[cfg(unix)]
        if let Some(pid) = self.child.id() {
            use nix::{
                sys::signal::{Signal, kill},
                unistd::Pid,
            };
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                debug!(pid, error = %e, "SIGTERM failed");
            }
        }

        #[cfg(not(unix))]
        let _ = self.child.start_kill();

        match tokio::time::timeout(STOP_TIMEOUT, self.child.wait()).await {
            Ok(Ok(status)) => info!(?status, "WhatsApp sidecar exited"),
            Ok(Err(e)) => warn!(error = %e, "failed to wait for WhatsApp sidecar"),
            Err(_) => {
                warn!("WhatsApp sidecar ignored SIGTERM, killing");
                self.child
                    .kill()
                    .await
                    .context("failed to kill WhatsApp sidecar")?;
            },
        }
        Ok(())
    }
}

/// Locate the sidecar directory.
///
/// Order: `explicit`, then `$LEMBAR_SIDECAR_DIR`, then `sidecar/whatsapp-baileys`
/// next to the executable (installed layout and `cargo run`), then relative to
/// the working directory.
pub fn find_sidecar_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if has_package_json(path) {
            return Ok(path.to_path_buf());
        }
        bail!(
            "WhatsApp sidecar directory {} has no package.json",
            path.display()
        );
    }

    if let Ok(dir) = std::env::var(SIDECAR_DIR_ENV) {
        let path = PathBuf::from(&dir);
        if has_package_json(&path) {
            return Ok(path);
        }
        warn!(path = %dir, "{SIDECAR_DIR_ENV} is set but has no package.json");
    }

    if let Ok(exe) = std::env::current_exe()
        && let Some(exe_dir) = exe.parent()
    {
        for up in ["..", "../.."] {
            let candidate = exe_dir.join(up).join(SIDECAR_SUBDIR);
            if has_package_json(&candidate) {
                return Ok(candidate);
            }
        }
    }

    for up in [".", "..", "../.."] {
        let candidate = Path::new(up).join(SIDECAR_SUBDIR);
        if has_package_json(&candidate) {
            return Ok(candidate.canonicalize().unwrap_or(candidate));
        }
    }

    bail!(
        "WhatsApp sidecar not found; set {SIDECAR_DIR_ENV} or whatsapp.sidecar_dir to the \
         directory containing {SIDECAR_SUBDIR}/package.json"
    )
}

fn has_package_json(dir: &Path) -> bool {
    dir.join("package.json").is_file()
}

/// Build the sidecar if needed, launch it and forward its output to tracing.
pub async fn start_sidecar(config: SidecarConfig) -> Result<SidecarProcess> {
    let dir = &config.sidecar_dir;
    if !has_package_json(dir) {
        bail!(
            "WhatsApp sidecar not found at {}; run `npm install && npm run build` there first",
            dir.display()
        );
    }

    if !dir.join("dist/index.js").exists() {
        info!(path = %dir.display(), "building WhatsApp sidecar");
        if !dir.join("node_modules").exists() {
            run_npm(dir, &["install"]).await?;
        }
        run_npm(dir, &["run", "build"]).await?;
    }

    info!(path = %dir.display(), port = config.port, "starting WhatsApp sidecar");
    let mut cmd = Command::new("node");
    cmd.arg("dist/index.js")
        .current_dir(dir)
        .env("LEMBAR_WHATSAPP_PORT", config.port.to_string())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(auth_dir) = &config.auth_dir {
        cmd.env("LEMBAR_WHATSAPP_AUTH_DIR", auth_dir);
    }

    let mut child = cmd.spawn().context("failed to spawn WhatsApp sidecar")?;
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_output(stdout, false));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_output(stderr, true));
    }

    // Catch immediate crashes (missing node, bad build) before connecting.
    tokio::time::sleep(STARTUP_GRACE).await;
    if let Some(status) = child
        .try_wait()
        .context("failed to poll WhatsApp sidecar")?
    {
        bail!("WhatsApp sidecar exited immediately with {status}");
    }

    info!(port = config.port, "WhatsApp sidecar started");
    Ok(SidecarProcess {
        child,
        port: config.port,
    })
}

async fn run_npm(dir: &Path, args: &[&str]) -> Result<()> {
    info!(path = %dir.display(), ?args, "running npm for WhatsApp sidecar");
    let output = Command::new("npm")
        .args(args)
        .current_dir(dir)
        .output()
        .await
        .with_context(|| format!("failed to run npm {}", args.join(" ")))?;
    if !output.status.success() {
        bail!(
            "npm {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(())
}

/// Re-log sidecar output under the `whatsapp_sidecar` target.
async fn forward_output(pipe: impl AsyncRead + Unpin, is_stderr: bool) {
    let mut lines = BufReader::new(pipe).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let (level, msg) = match parse_pino_line(&line) {
            Some(parsed) => parsed,
            None if is_stderr => (Level::WARN, line),
            None => (Level::INFO, line),
        };
        if level == Level::ERROR {
            error!(target: "whatsapp_sidecar", "{msg}");
        } else if level == Level::WARN {
            warn!(target: "whatsapp_sidecar", "{msg}");
        } else if level == Level::INFO {
            info!(target: "whatsapp_sidecar", "{msg}");
        } else {
            debug!(target: "whatsapp_sidecar", "{msg}");
        }
    }
}

/// Level and message of a pino JSON log line.
fn parse_pino_line(line: &str) -> Option<(Level, String)> {
    if !line.starts_with('{') {
        return None;
    }
    let log: serde_json::Value = serde_json::from_str(line).ok()?;
    let level = match log.get("level").and_then(|v| v.as_u64()).unwrap_or(30) {
        0..=29 => Level::DEBUG,
        30..=39 => Level::INFO,
        40..=49 => Level::WARN,
        _ => Level::ERROR,
    };
    let msg = log
        .get("msg")
        .and_then(|v| v.as_str())
        .unwrap_or(line)
        .to_string();
    Some((level, msg))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case::trace(r#"{"level":10,"msg":"frame"}"#, Level::DEBUG, "frame")]
    #[case::info(r#"{"level":30,"msg":"connected"}"#, Level::INFO, "connected")]
    #[case::warn(r#"{"level":40,"msg":"retrying"}"#, Level::WARN, "retrying")]
    #[case::fatal(r#"{"level":60,"msg":"boom"}"#, Level::ERROR, "boom")]
    #[case::no_level(r#"{"msg":"plain"}"#, Level::INFO, "plain")]
    fn pino_levels(#[case] line: &str, #[case] level: Level, #[case] msg: &str) {
        assert_eq!(parse_pino_line(line), Some((level, msg.to_string())));
    }

    #[test]
    fn plain_lines_are_not_pino() {
        assert_eq!(parse_pino_line("listening on 3710"), None);
        assert_eq!(parse_pino_line("{not json"), None);
    }

    #[test]
    fn explicit_dir_requires_package_json() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_sidecar_dir(Some(dir.path())).is_err());

        std::fs::write(dir.path().join("package.json"), "{}").unwrap();
        assert_eq!(find_sidecar_dir(Some(dir.path())).unwrap(), dir.path());
    }

    #[tokio::test]
    async fn start_rejects_missing_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let result = start_sidecar(SidecarConfig {
            sidecar_dir: dir.path().to_path_buf(),
            ..Default::default()
        })
        .await;
        assert!(result.is_err());
    }
}
